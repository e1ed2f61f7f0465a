//! Platform discovery and per-device environments.
//!
//! Owns what used to be process-wide: the list of platforms that can share
//! surfaces with D3D11 and the environment bound to each graphics device.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use surfbridge_core::GraphicsDevice;
use tracing::{debug, info, warn};

use crate::backend::{ComputeDriver, PlatformInfo};
use crate::env::{ComputeEnvironment, InteropPlatform};
use crate::{ComputeError, ComputeResult};

/// Which platforms discovery keeps.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct RuntimeConfig {
    /// Case-insensitive substring of the platform name or vendor.
    pub vendor_filter: Option<String>,
    /// Skip platforms without a GPU device.
    pub gpu_only: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            vendor_filter: None,
            gpu_only: true,
        }
    }
}

impl RuntimeConfig {
    /// Intel GPU platforms only.
    pub fn intel_only() -> Self {
        Self {
            vendor_filter: Some("Intel".to_string()),
            ..Self::default()
        }
    }

    pub fn accepts(&self, info: &PlatformInfo) -> bool {
        if self.gpu_only && info.gpu_devices == 0 {
            return false;
        }
        match &self.vendor_filter {
            Some(filter) => {
                let filter = filter.to_lowercase();
                info.name.to_lowercase().contains(&filter) || info.vendor.to_lowercase().contains(&filter)
            }
            None => true,
        }
    }
}

#[derive(Debug)]
pub struct InteropRuntime {
    driver: Arc<dyn ComputeDriver>,
    candidates: Vec<InteropPlatform>,
    environments: Mutex<HashMap<GraphicsDevice, Arc<ComputeEnvironment>>>,
}

impl InteropRuntime {
    /// Enumerate platforms and keep those accepted by `config` whose sharing
    /// extension resolves.
    pub fn discover(driver: Arc<dyn ComputeDriver>, config: &RuntimeConfig) -> ComputeResult<Self> {
        let platforms = driver.platforms()?;
        if platforms.is_empty() {
            return Err(ComputeError::PlatformDiscoveryFailed("no platforms".into()));
        }

        let mut candidates = Vec::new();
        for info in platforms {
            if !config.accepts(&info) {
                debug!(platform = %info.name, "platform filtered out");
                continue;
            }
            let name = info.name.clone();
            match InteropPlatform::initialize(Arc::clone(&driver), info) {
                Ok(platform) => candidates.push(platform),
                Err(e) => warn!(platform = %name, "skipping platform: {}", e),
            }
        }

        if candidates.is_empty() {
            return Err(ComputeError::PlatformDiscoveryFailed(
                "no platform supports D3D11 sharing".into(),
            ));
        }
        info!(driver = driver.name(), candidates = candidates.len(), "discovered interop platforms");
        Ok(Self {
            driver,
            candidates,
            environments: Mutex::new(HashMap::new()),
        })
    }

    /// Environment for `graphics`, bound on first request.
    ///
    /// Candidates are tried in enumeration order; the first that binds wins
    /// and is cached.
    pub fn environment_for(&self, graphics: GraphicsDevice) -> ComputeResult<Arc<ComputeEnvironment>> {
        let mut envs = self.environments.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(env) = envs.get(&graphics) {
            return Ok(Arc::clone(env));
        }

        let mut last_error = None;
        for candidate in &self.candidates {
            match candidate.bind_to_graphics_device(graphics) {
                Ok(env) => {
                    let env = Arc::new(env);
                    envs.insert(graphics, Arc::clone(&env));
                    return Ok(env);
                }
                Err(e) => {
                    debug!(platform = %candidate.info().name, "bind failed: {}", e);
                    last_error = Some(e);
                }
            }
        }

        let detail = last_error.map(|e| e.to_string()).unwrap_or_default();
        Err(ComputeError::DeviceBindingFailed(format!(
            "no platform accepted graphics device {:#x}: {}",
            graphics.id(),
            detail
        )))
    }

    /// Initialized platforms in enumeration order.
    pub fn candidates(&self) -> &[InteropPlatform] {
        &self.candidates
    }

    pub fn driver(&self) -> &Arc<dyn ComputeDriver> {
        &self.driver
    }
}
