//! Ordered execution of configured filters.

use crate::kernels::FilterKernel;
use crate::{ComputeError, ComputeResult};

/// Filters run one after another; each stage's chain completes before the
/// next starts.
#[derive(Debug, Default)]
pub struct FilterChain {
    stages: Vec<FilterKernel>,
}

impl FilterChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, stage: impl Into<FilterKernel>) -> &mut Self {
        self.stages.push(stage.into());
        self
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn stage(&self, index: usize) -> Option<&FilterKernel> {
        self.stages.get(index)
    }

    /// Mutable access, e.g. to reconfigure a stage for the next frame.
    pub fn stage_mut(&mut self, index: usize) -> Option<&mut FilterKernel> {
        self.stages.get_mut(index)
    }

    /// Run every stage. Stops at the first failure.
    pub fn run(&mut self) -> ComputeResult<()> {
        for (index, stage) in self.stages.iter_mut().enumerate() {
            let kernel = stage.name();
            stage.run().map_err(|e| ComputeError::StageFailed {
                index,
                kernel,
                source: Box::new(e),
            })?;
        }
        Ok(())
    }
}
