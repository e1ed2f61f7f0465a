//! Typed positional kernel arguments.
//!
//! An [`ArgList`] is created with the signature of one entry point. Slot
//! indices never change; only the values do, on every `set_arguments`.

use crate::backend::{ArgValue, MemId};
use crate::program::NativeKernel;
use crate::{ComputeError, ComputeResult};

/// Argument value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum KernelArg {
    Int(i32),
    Float(f32),
    /// Imported graphics surface plane; must be acquired around dispatch.
    SharedSurface(MemId),
    /// Plain device buffer.
    Buffer(MemId),
}

impl KernelArg {
    pub fn kind(&self) -> ArgKind {
        match self {
            Self::Int(_) => ArgKind::Int,
            Self::Float(_) => ArgKind::Float,
            Self::SharedSurface(_) => ArgKind::SharedSurface,
            Self::Buffer(_) => ArgKind::Buffer,
        }
    }

    fn native(&self) -> ArgValue {
        match *self {
            Self::Int(v) => ArgValue::Int(v),
            Self::Float(v) => ArgValue::Float(v),
            Self::SharedSurface(mem) | Self::Buffer(mem) => ArgValue::Mem(mem),
        }
    }
}

/// Declared type of a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgKind {
    Int,
    Float,
    SharedSurface,
    Buffer,
}

/// Ordered argument slots of one kernel.
#[derive(Debug, Clone, PartialEq)]
pub struct ArgList {
    kinds: Vec<ArgKind>,
    values: Vec<Option<KernelArg>>,
}

impl ArgList {
    /// Empty list with one slot per entry of `signature`.
    pub fn new(signature: &[ArgKind]) -> Self {
        Self {
            kinds: signature.to_vec(),
            values: vec![None; signature.len()],
        }
    }

    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }

    /// Store `arg` at `index`; the kind must match the signature.
    pub fn set(&mut self, index: u32, arg: KernelArg) -> ComputeResult<()> {
        let slot = index as usize;
        let kind = *self.kinds.get(slot).ok_or_else(|| ComputeError::ArgumentBindFailed {
            index,
            reason: format!("kernel takes {} arguments", self.kinds.len()),
        })?;
        if kind != arg.kind() {
            return Err(ComputeError::ArgumentBindFailed {
                index,
                reason: format!("expected {:?}, got {:?}", kind, arg.kind()),
            });
        }
        self.values[slot] = Some(arg);
        Ok(())
    }

    pub fn set_int(&mut self, index: u32, value: i32) -> ComputeResult<()> {
        self.set(index, KernelArg::Int(value))
    }

    pub fn set_float(&mut self, index: u32, value: f32) -> ComputeResult<()> {
        self.set(index, KernelArg::Float(value))
    }

    pub fn set_surface(&mut self, index: u32, mem: MemId) -> ComputeResult<()> {
        self.set(index, KernelArg::SharedSurface(mem))
    }

    pub fn set_buffer(&mut self, index: u32, mem: MemId) -> ComputeResult<()> {
        self.set(index, KernelArg::Buffer(mem))
    }

    pub fn get(&self, index: u32) -> Option<KernelArg> {
        self.values.get(index as usize).copied().flatten()
    }

    /// True when every slot holds a value.
    pub fn is_complete(&self) -> bool {
        self.values.iter().all(Option::is_some)
    }

    /// Push every value into `kernel`.
    pub fn bind(&self, kernel: &NativeKernel) -> ComputeResult<()> {
        for (slot, value) in self.values.iter().enumerate() {
            let index = slot as u32;
            let arg = value.ok_or_else(|| ComputeError::ArgumentBindFailed {
                index,
                reason: format!("argument of `{}` not set", kernel.name()),
            })?;
            kernel.set_arg(index, &arg.native())?;
        }
        Ok(())
    }

    /// Shared surfaces referenced, first occurrence order, no duplicates.
    pub fn shared_surfaces(&self) -> Vec<MemId> {
        let mut out = Vec::new();
        for value in self.values.iter().flatten() {
            if let KernelArg::SharedSurface(mem) = value {
                if !out.contains(mem) {
                    out.push(*mem);
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SIG: [ArgKind; 4] = [ArgKind::SharedSurface, ArgKind::SharedSurface, ArgKind::Int, ArgKind::Float];

    #[test]
    fn test_kind_mismatch_rejected() {
        let mut args = ArgList::new(&SIG);
        let err = args.set_int(0, 3).unwrap_err();
        assert!(matches!(err, ComputeError::ArgumentBindFailed { index: 0, .. }));
        assert!(args.set_int(4, 1).is_err());
        assert_eq!(args.get(0), None);
    }

    #[test]
    fn test_indices_fixed() {
        let mut args = ArgList::new(&SIG);
        args.set_float(3, 0.5).unwrap();
        args.set_int(2, 640).unwrap();
        args.set_int(2, 320).unwrap();
        assert_eq!(args.get(2), Some(KernelArg::Int(320)));
        assert_eq!(args.get(3), Some(KernelArg::Float(0.5)));
        assert_eq!(args.len(), 4);
        assert!(!args.is_complete());
    }

    #[test]
    fn test_shared_surfaces_dedup() {
        let mut args = ArgList::new(&SIG);
        args.set_surface(0, MemId::from_raw(7)).unwrap();
        args.set_surface(1, MemId::from_raw(7)).unwrap();
        assert_eq!(args.shared_surfaces(), vec![MemId::from_raw(7)]);

        let mut args = ArgList::new(&[ArgKind::SharedSurface, ArgKind::Buffer]);
        args.set_surface(0, MemId::from_raw(1)).unwrap();
        args.set_buffer(1, MemId::from_raw(2)).unwrap();
        assert_eq!(args.shared_surfaces(), vec![MemId::from_raw(1)]);
        assert!(args.is_complete());
    }
}
