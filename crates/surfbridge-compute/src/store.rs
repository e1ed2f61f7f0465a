//! Filter store: one compiled program, filters created by name.

use std::sync::Arc;

use tracing::debug;

use crate::env::ComputeEnvironment;
use crate::geometry::PREFERRED_LOCAL_SIZE;
use crate::kernels::{BorderPad, FilterKernel, FormatConversion, KernelKind, SourceRepack};
use crate::program::KernelProgram;
use crate::shaders::KERNEL_SOURCE;
use crate::{ComputeError, ComputeResult};

/// Warnings are errors; relaxed math is fine for 8-bit video.
pub const DEFAULT_BUILD_OPTIONS: &str = "-I. -Werror -cl-fast-relaxed-math";

/// Program build and dispatch geometry settings.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct StoreConfig {
    /// Options passed to the program build.
    pub build_options: String,
    /// Cap on the local work size per dimension.
    pub preferred_local_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            build_options: DEFAULT_BUILD_OPTIONS.to_string(),
            preferred_local_size: PREFERRED_LOCAL_SIZE,
        }
    }
}

#[derive(Debug)]
pub struct FilterStore {
    program: Arc<KernelProgram>,
    config: StoreConfig,
}

impl FilterStore {
    /// Build `source` with [`StoreConfig::default`].
    pub fn build(env: Arc<ComputeEnvironment>, source: &str) -> ComputeResult<Self> {
        Self::build_with_config(env, source, StoreConfig::default())
    }

    pub fn build_with_config(
        env: Arc<ComputeEnvironment>,
        source: &str,
        config: StoreConfig,
    ) -> ComputeResult<Self> {
        let program = KernelProgram::build(env, source, &config.build_options)?;
        Ok(Self {
            program: Arc::new(program),
            config,
        })
    }

    /// Build the module shipped with this crate.
    pub fn with_default_kernels(env: Arc<ComputeEnvironment>) -> ComputeResult<Self> {
        Self::build(env, KERNEL_SOURCE)
    }

    /// Filter for store name `name` (`fmtConversion`, `copyMakeBorder`,
    /// `srcConversion`).
    pub fn create_kernel(&self, name: &str) -> ComputeResult<FilterKernel> {
        let kind = KernelKind::from_name(name).ok_or_else(|| ComputeError::UnknownKernel(name.to_string()))?;
        self.create(kind)
    }

    pub fn create(&self, kind: KernelKind) -> ComputeResult<FilterKernel> {
        let local = self.config.preferred_local_size.max(1);
        let kernel = match kind {
            KernelKind::FormatConversion => FormatConversion::create(&self.program, local)?.into(),
            KernelKind::BorderPad => BorderPad::create(&self.program, local)?.into(),
            KernelKind::SourceRepack => SourceRepack::create(&self.program, local)?.into(),
        };
        debug!(kernel = kind.name(), "created filter");
        Ok(kernel)
    }

    pub fn program(&self) -> &Arc<KernelProgram> {
        &self.program
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = StoreConfig::default();
        assert_eq!(config.build_options, "-I. -Werror -cl-fast-relaxed-math");
        assert_eq!(config.preferred_local_size, 8);
    }
}
