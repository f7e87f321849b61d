use std::fmt;
use std::path::PathBuf;

use appdump_protocol::constants::DEFAULT_BYPASS_SERVICE;
use appdump_router::RouterStats;
use serde::{Deserialize, Serialize};

/// Phase of a dump run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DumpState {
    Idle,
    MainAttached,
    MainPrepared,
    MainDumping,
    ValidationBypassed,
    ChildEnumerated,
    /// Dumping the child with this pid.
    ChildDumping(u32),
    Cleanup,
    Done,
    Aborted,
}

impl DumpState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, DumpState::Done | DumpState::Aborted)
    }
}

impl fmt::Display for DumpState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DumpState::Idle => f.write_str("idle"),
            DumpState::MainAttached => f.write_str("main-attached"),
            DumpState::MainPrepared => f.write_str("main-prepared"),
            DumpState::MainDumping => f.write_str("main-dumping"),
            DumpState::ValidationBypassed => f.write_str("validation-bypassed"),
            DumpState::ChildEnumerated => f.write_str("child-enumerated"),
            DumpState::ChildDumping(pid) => write!(f, "child-dumping({pid})"),
            DumpState::Cleanup => f.write_str("cleanup"),
            DumpState::Done => f.write_str("done"),
            DumpState::Aborted => f.write_str("aborted"),
        }
    }
}

/// Names of the RPC methods the agent exports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentOps {
    #[serde(default = "default_prepare")]
    pub prepare: String,
    #[serde(default = "default_dump")]
    pub dump: String,
    /// Returns the bundle root path on the device.
    #[serde(default = "default_root")]
    pub root: String,
    /// Launches child components; returns their pids.
    #[serde(default = "default_launch_all")]
    pub launch_all: String,
    /// Disables validation for a pid; returns a status, non-zero on failure.
    #[serde(default = "default_bypass")]
    pub bypass: String,
}

fn default_prepare() -> String {
    "prepare".into()
}

fn default_dump() -> String {
    "dump".into()
}

fn default_root() -> String {
    "root".into()
}

fn default_launch_all() -> String {
    "launchAll".into()
}

fn default_bypass() -> String {
    "bypass".into()
}

impl Default for AgentOps {
    fn default() -> Self {
        Self {
            prepare: default_prepare(),
            dump: default_dump(),
            root: default_root(),
            launch_all: default_launch_all(),
            bypass: default_bypass(),
        }
    }
}

/// Inputs of one dump run.
#[derive(Debug, Clone)]
pub struct DumpOptions {
    /// Bundle identifier of the main application.
    pub identifier: String,
    /// Parent of the per-application output directory.
    pub output: PathBuf,
    /// Replace an existing output directory.
    pub force: bool,
    /// Source of the agent injected into every session.
    pub agent_source: String,
    /// Process name of the system service hosting the bypass session.
    pub bypass_service: String,
    pub ops: AgentOps,
}

impl DumpOptions {
    pub fn new(
        identifier: impl Into<String>,
        output: impl Into<PathBuf>,
        agent_source: impl Into<String>,
    ) -> Self {
        Self {
            identifier: identifier.into(),
            output: output.into(),
            force: false,
            agent_source: agent_source.into(),
            bypass_service: DEFAULT_BYPASS_SERVICE.to_string(),
            ops: AgentOps::default(),
        }
    }

    /// `<output>/<identifier>`
    pub fn app_dir(&self) -> PathBuf {
        self.output.join(&self.identifier)
    }
}

/// Result of dumping one child component.
#[derive(Debug, Clone)]
pub struct ChildOutcome {
    pub pid: u32,
    /// `None` when the child was dumped.
    pub error: Option<String>,
}

impl ChildOutcome {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Summary of a finished run.
#[derive(Debug, Clone)]
pub struct DumpReport {
    pub state: DumpState,
    pub app_dir: PathBuf,
    pub working_dir: PathBuf,
    /// Transfer counters of the main session.
    pub main: RouterStats,
    pub children: Vec<ChildOutcome>,
}

impl DumpReport {
    pub fn failed_children(&self) -> usize {
        self.children.iter().filter(|c| !c.is_ok()).count()
    }
}
