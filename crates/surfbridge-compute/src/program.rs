//! Compiled kernel programs and the kernel objects created from them.

use std::sync::Arc;

use tracing::{debug, error};

use crate::backend::{ArgValue, KernelId, ProgramId};
use crate::env::ComputeEnvironment;
use crate::{ComputeError, ComputeResult};

/// One compiled source module. Released when the last kernel and the owning
/// store are gone.
#[derive(Debug)]
pub struct KernelProgram {
    env: Arc<ComputeEnvironment>,
    id: ProgramId,
    options: String,
}

impl KernelProgram {
    /// Compile `source` for the environment's device.
    ///
    /// On failure the error carries the build log, which is also logged.
    pub fn build(env: Arc<ComputeEnvironment>, source: &str, options: &str) -> ComputeResult<Self> {
        let result = env
            .driver()
            .build_program(env.context(), env.device(), source, options);
        let id = match result {
            Ok(id) => id,
            Err(ComputeError::Compile { log }) => {
                error!(options, "program build failed:\n{}", log);
                return Err(ComputeError::Compile { log });
            }
            Err(e) => return Err(e),
        };
        debug!(options, bytes = source.len(), "built program");
        Ok(Self {
            env,
            id,
            options: options.to_string(),
        })
    }

    pub fn env(&self) -> &Arc<ComputeEnvironment> {
        &self.env
    }

    pub fn id(&self) -> ProgramId {
        self.id
    }

    pub fn options(&self) -> &str {
        &self.options
    }

    /// Kernel object for entry point `name`.
    pub fn create_kernel(self: &Arc<Self>, name: &str) -> ComputeResult<NativeKernel> {
        let id = self
            .env
            .driver()
            .create_kernel(self.id, name)
            .map_err(|e| match e {
                ComputeError::KernelCreateFailed { .. } => e,
                other => ComputeError::KernelCreateFailed {
                    name: name.to_string(),
                    reason: other.to_string(),
                },
            })?;
        debug!(kernel = name, "created kernel");
        Ok(NativeKernel {
            program: Arc::clone(self),
            id,
            name: name.to_string(),
        })
    }
}

impl Drop for KernelProgram {
    fn drop(&mut self) {
        // SAFETY: kernels hold an Arc to the program, so they are gone.
        unsafe { self.env.driver().release_program(self.id) };
    }
}

/// Native kernel object, released on drop.
#[derive(Debug)]
pub struct NativeKernel {
    program: Arc<KernelProgram>,
    id: KernelId,
    name: String,
}

impl NativeKernel {
    pub fn id(&self) -> KernelId {
        self.id
    }

    /// Entry point name.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn env(&self) -> &Arc<ComputeEnvironment> {
        self.program.env()
    }

    pub(crate) fn set_arg(&self, index: u32, value: &ArgValue) -> ComputeResult<()> {
        self.env()
            .driver()
            .set_kernel_arg(self.id, index, value)
            .map_err(|e| match e {
                ComputeError::ArgumentBindFailed { .. } => e,
                other => ComputeError::ArgumentBindFailed {
                    index,
                    reason: other.to_string(),
                },
            })
    }
}

impl Drop for NativeKernel {
    fn drop(&mut self) {
        // SAFETY: sole owner of the kernel handle.
        unsafe { self.program.env().driver().release_kernel(self.id) };
    }
}
