//! Work-group geometry for 2-D dispatches.
//!
//! The local size in each dimension is the largest power of two that divides
//! the global size and does not exceed the preferred cap. The global size is
//! then rounded down to a multiple of the local size, so a dispatch may cover
//! slightly fewer items than requested. Kernels crop rather than overrun.

use surfbridge_core::Extent;

/// Default cap on the local size per dimension.
pub const PREFERRED_LOCAL_SIZE: usize = 8;

/// Largest power-of-two divisor of `global` that is `<= preferred`.
///
/// Returns 1 for `global == 0` or `preferred <= 1`.
pub fn choose_local_size(global: usize, preferred: usize) -> usize {
    if global == 0 {
        return 1;
    }
    let mut local = 1;
    while local * 2 <= preferred && global % (local * 2) == 0 {
        local *= 2;
    }
    local
}

/// Global and local sizes of one 2-D dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorkSize {
    pub global: [usize; 2],
    pub local: [usize; 2],
}

impl WorkSize {
    /// Geometry for `width x height` work items.
    pub fn new(width: usize, height: usize, preferred: usize) -> Self {
        let local = [
            choose_local_size(width, preferred),
            choose_local_size(height, preferred),
        ];
        let global = [width - width % local[0], height - height % local[1]];
        Self { global, local }
    }

    /// One work item per pixel of `extent`.
    pub fn for_extent(extent: Extent, preferred: usize) -> Self {
        Self::new(extent.width as usize, extent.height as usize, preferred)
    }

    /// Total work items.
    pub fn items(&self) -> usize {
        self.global[0] * self.global[1]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_divides_global() {
        for w in 0..=300 {
            for preferred in [1, 2, 4, 8, 16] {
                let ws = WorkSize::new(w, 17, preferred);
                for d in 0..2 {
                    assert!(ws.local[d] >= 1);
                    assert!(ws.local[d] <= preferred.max(1));
                    assert!(ws.local[d].is_power_of_two());
                    assert_eq!(ws.global[d] % ws.local[d], 0);
                }
                assert!(ws.global[0] <= w);
                assert!(ws.global[1] <= 17);
            }
        }
    }

    #[test]
    fn test_known_sizes() {
        assert_eq!(choose_local_size(640, 8), 8);
        assert_eq!(choose_local_size(480, 8), 8);
        assert_eq!(choose_local_size(320, 8), 8);
        assert_eq!(choose_local_size(6, 8), 2);
        assert_eq!(choose_local_size(7, 8), 1);
        assert_eq!(choose_local_size(0, 8), 1);

        let ws = WorkSize::for_extent(Extent::new(640, 480), PREFERRED_LOCAL_SIZE);
        assert_eq!(ws.global, [640, 480]);
        assert_eq!(ws.local, [8, 8]);
        assert_eq!(ws.items(), 307_200);
    }

    #[test]
    fn test_odd_size_is_exact_with_unit_local() {
        let ws = WorkSize::new(321, 241, 8);
        assert_eq!(ws.local, [1, 1]);
        assert_eq!(ws.global, [321, 241]);
    }
}
