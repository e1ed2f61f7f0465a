//! Backend detection.

use super::Backend;

/// Information about a compute driver.
#[derive(Debug, Clone)]
pub struct BackendInfo {
    pub backend: Backend,
    pub name: &'static str,
    pub available: bool,
    pub description: &'static str,
}

/// Detect compiled-in drivers and whether they can run here.
pub fn detect_backends() -> Vec<BackendInfo> {
    let mut backends = Vec::with_capacity(2);

    #[cfg(feature = "opencl")]
    backends.push(BackendInfo {
        backend: Backend::OpenCl,
        name: "OpenCL",
        available: Backend::OpenCl.is_available(),
        description: "OpenCL with cl_khr_d3d11_sharing",
    });

    backends.push(BackendInfo {
        backend: Backend::Recording,
        name: "Recording",
        available: true,
        description: "In-memory driver recording every native call",
    });

    backends
}

/// Get description of available backends.
pub fn describe_backends() -> String {
    let mut desc = String::new();
    for info in detect_backends() {
        let status = if info.available { "+" } else { "-" };
        desc.push_str(&format!("[{}] {}: {}\n", status, info.name, info.description));
    }
    desc
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_listed() {
        let backends = detect_backends();
        assert!(backends.iter().any(|b| b.backend == Backend::Recording && b.available));
        assert!(describe_backends().contains("[+] Recording"));
    }
}
