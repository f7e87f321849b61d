use serde::{Deserialize, Serialize};

/// An installed application as reported by the device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationInfo {
    pub identifier: String,
    pub name: String,
    /// Process id, `0` when the application is not running.
    #[serde(default)]
    pub pid: u32,
}

impl ApplicationInfo {
    pub fn is_running(&self) -> bool {
        self.pid != 0
    }
}

/// What to attach to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttachTarget {
    Pid(u32),
    /// A process looked up by name (system services).
    Name(String),
}

impl std::fmt::Display for AttachTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttachTarget::Pid(pid) => write!(f, "pid {pid}"),
            AttachTarget::Name(name) => write!(f, "{name}"),
        }
    }
}

/// Why a session went away.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DetachReason {
    ApplicationRequested,
    ProcessReplaced,
    ProcessTerminated,
    ServerTerminated,
    ConnectionTerminated,
    DeviceLost,
    #[serde(other)]
    Unknown,
}

impl std::fmt::Display for DetachReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DetachReason::ApplicationRequested => "application-requested",
            DetachReason::ProcessReplaced => "process-replaced",
            DetachReason::ProcessTerminated => "process-terminated",
            DetachReason::ServerTerminated => "server-terminated",
            DetachReason::ConnectionTerminated => "connection-terminated",
            DetachReason::DeviceLost => "device-lost",
            DetachReason::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Crash report accompanying a detach, if the process died.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrashReport {
    pub summary: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub report: String,
}
