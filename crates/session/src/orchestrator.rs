//! End-to-end dump workflow.
//!
//! ```text
//! Idle -> MainAttached -> MainPrepared -> MainDumping -> ValidationBypassed
//!      -> ChildEnumerated -> ChildDumping(pid)* -> Cleanup -> Done
//! ```
//!
//! Any failure before the children are enumerated ends in `Aborted`.
//! Failures while dumping a child are recorded in its [`ChildOutcome`] and
//! the run continues with the next child.

use std::path::{Path, PathBuf};

use appdump_protocol::{ApplicationInfo, AttachTarget};
use appdump_transfer::{PathResolver, TransferProgress};
use serde_json::{Value, json};
use tracing::{debug, error, info, trace, warn};

use crate::backend::Device;
use crate::error::DumpError;
use crate::link::SessionLink;
use crate::types::{ChildOutcome, DumpOptions, DumpReport, DumpState};

/// Drives one dump run against a device.
pub struct DumpOrchestrator<'a> {
    device: &'a dyn Device,
    options: DumpOptions,
    state: DumpState,
    history: Vec<DumpState>,
}

/// Directories of a run, fixed once the bundle root is known.
struct Layout {
    root: String,
    app_dir: PathBuf,
    working_dir: PathBuf,
}

impl<'a> DumpOrchestrator<'a> {
    pub fn new(device: &'a dyn Device, options: DumpOptions) -> Self {
        Self {
            device,
            options,
            state: DumpState::Idle,
            history: vec![DumpState::Idle],
        }
    }

    pub fn state(&self) -> DumpState {
        self.state
    }

    /// Every state entered so far, in order.
    pub fn history(&self) -> &[DumpState] {
        &self.history
    }

    /// Runs the whole workflow.
    ///
    /// Sessions opened before a fatal error are torn down before the error
    /// is returned.
    pub async fn run(&mut self) -> Result<DumpReport, DumpError> {
        if let Err(e) = self.prepare_destination().await {
            return Err(self.abort(e));
        }

        // 1. Main target.
        let mut main = match self.attach_main().await {
            Ok(link) => link,
            Err(e) => return Err(self.abort(e)),
        };
        self.transition(DumpState::MainAttached);

        // 2-4. Layout, router, prepare + dump.
        let layout = match self.dump_main(&mut main).await {
            Ok(layout) => layout,
            Err(e) => {
                main.teardown().await;
                return Err(self.abort(e));
            }
        };

        // 5. Auxiliary bypass session.
        let mut bypass = match self.open_bypass(&main).await {
            Ok(link) => link,
            Err(e) => {
                main.teardown().await;
                return Err(self.abort(e));
            }
        };
        self.transition(DumpState::ValidationBypassed);

        // 6-7. Children.
        let children = self.dump_children(&mut main, &mut bypass, &layout).await;

        // 8. Cleanup.
        self.transition(DumpState::Cleanup);
        let main_stats = main.teardown().await.unwrap_or_default();
        bypass.teardown().await;
        self.transition(DumpState::Done);

        let report = DumpReport {
            state: self.state,
            app_dir: layout.app_dir,
            working_dir: layout.working_dir,
            main: main_stats,
            children,
        };
        info!(
            app = %self.options.identifier,
            path = %report.app_dir.display(),
            files = report.main.files_written,
            bytes = report.main.bytes_written,
            children = report.children.len(),
            failed_children = report.failed_children(),
            "dump complete"
        );
        Ok(report)
    }

    fn transition(&mut self, next: DumpState) {
        debug_assert!(
            !self.state.is_terminal(),
            "transition from terminal state {} to {next}",
            self.state
        );
        debug!(from = %self.state, to = %next, "dump state");
        self.state = next;
        self.history.push(next);
    }

    fn abort(&mut self, e: DumpError) -> DumpError {
        error!(app = %self.options.identifier, state = %self.state, error = %e, "dump aborted");
        self.transition(DumpState::Aborted);
        e
    }

    /// Refuses to overwrite an existing dump unless forced.
    async fn prepare_destination(&self) -> Result<(), DumpError> {
        let app_dir = self.options.app_dir();
        if !tokio::fs::try_exists(&app_dir).await? {
            return Ok(());
        }
        if !self.options.force {
            return Err(DumpError::DestinationExists(app_dir));
        }
        warn!(path = %app_dir.display(), "removing existing dump");
        tokio::fs::remove_dir_all(&app_dir).await?;
        Ok(())
    }

    /// Attaches to the main application, spawning it if it is not running.
    async fn attach_main(&self) -> Result<SessionLink, DumpError> {
        let app = self.find_app().await?;
        let source = &self.options.agent_source;

        if app.is_running() {
            info!(app = %app.identifier, pid = app.pid, "attaching to running app");
            let session = self.device.attach(AttachTarget::Pid(app.pid)).await?;
            return SessionLink::open("main", session, source).await;
        }

        let pid = self.device.spawn(app.identifier.clone()).await?;
        info!(app = %app.identifier, pid, "spawned app");
        let session = self.device.attach(AttachTarget::Pid(pid)).await?;
        let link = SessionLink::open("main", session, source).await?;
        if let Err(e) = self.device.resume(pid).await {
            link.teardown().await;
            return Err(e);
        }
        Ok(link)
    }

    async fn find_app(&self) -> Result<ApplicationInfo, DumpError> {
        let identifier = &self.options.identifier;
        self.device
            .enumerate_applications()
            .await?
            .into_iter()
            .find(|app| &app.identifier == identifier)
            .ok_or_else(|| DumpError::AppNotFound(identifier.clone()))
    }

    async fn dump_main(&mut self, main: &mut SessionLink) -> Result<Layout, DumpError> {
        let ops = self.options.ops.clone();

        let root = expect_string(&ops.root, main.call(&ops.root, vec![]).await?)?;
        let layout = self.layout(root)?;
        tokio::fs::create_dir_all(&layout.working_dir).await?;
        info!(
            root = %layout.root,
            path = %layout.working_dir.display(),
            "dumping main app"
        );

        main.bind_router(PathResolver::new(&layout.root, &layout.working_dir));
        main.on_progress(Box::new(log_progress));

        main.call(&ops.prepare, vec![]).await?;
        self.transition(DumpState::MainPrepared);

        self.transition(DumpState::MainDumping);
        main.call(&ops.dump, vec![]).await?;
        Ok(layout)
    }

    /// `<output>/<identifier>/Payload/<basename(root)>`
    fn layout(&self, root: String) -> Result<Layout, DumpError> {
        let bundle = Path::new(&root)
            .file_name()
            .ok_or_else(|| DumpError::InvalidResponse {
                method: self.options.ops.root.clone(),
                detail: format!("{root:?} has no final component"),
            })?
            .to_owned();
        let app_dir = self.options.app_dir();
        let working_dir = app_dir.join("Payload").join(bundle);
        Ok(Layout {
            root,
            app_dir,
            working_dir,
        })
    }

    async fn open_bypass(&self, main: &SessionLink) -> Result<SessionLink, DumpError> {
        let service = &self.options.bypass_service;
        let session = self.device.attach(AttachTarget::Name(service.clone())).await?;
        let mut link = SessionLink::open("bypass", session, &self.options.agent_source).await?;

        let op = &self.options.ops.bypass;
        let result = match link.call(op, vec![json!(main.pid())]).await {
            Ok(value) => expect_status(op, value),
            Err(e) => Err(e),
        };
        match result {
            Ok(0) => debug!(pid = main.pid(), "validation bypassed"),
            Ok(status) => warn!(pid = main.pid(), status, "validation bypass reported failure"),
            Err(e) => {
                link.teardown().await;
                return Err(e);
            }
        }
        Ok(link)
    }

    async fn dump_children(
        &mut self,
        main: &mut SessionLink,
        bypass: &mut SessionLink,
        layout: &Layout,
    ) -> Vec<ChildOutcome> {
        let op = self.options.ops.launch_all.clone();
        let pids = match main.call(&op, vec![]).await {
            Ok(value) => serde_json::from_value::<Vec<u32>>(value).map_err(|e| {
                DumpError::InvalidResponse {
                    method: op.clone(),
                    detail: e.to_string(),
                }
            }),
            Err(e) => Err(e),
        };
        let pids = match pids {
            Ok(pids) => pids,
            Err(e) => {
                error!(error = %e, "failed to launch child components");
                return Vec::new();
            }
        };
        self.transition(DumpState::ChildEnumerated);
        info!(count = pids.len(), "child components launched");

        let mut outcomes = Vec::with_capacity(pids.len());
        for pid in pids {
            self.transition(DumpState::ChildDumping(pid));
            let error = match self.dump_child(pid, bypass, layout).await {
                Ok(()) => {
                    info!(pid, "child dumped");
                    None
                }
                Err(e) => {
                    error!(pid, error = %e, "child dump failed, skipping");
                    Some(e.to_string())
                }
            };
            outcomes.push(ChildOutcome { pid, error });
        }
        outcomes
    }

    /// Dumps one launched child. The child is killed whatever the outcome.
    async fn dump_child(
        &self,
        pid: u32,
        bypass: &mut SessionLink,
        layout: &Layout,
    ) -> Result<(), DumpError> {
        let result = self.transfer_child(pid, bypass, layout).await;
        if let Err(e) = self.device.kill(pid).await {
            warn!(pid, error = %e, "failed to kill child");
        }
        result
    }

    async fn transfer_child(
        &self,
        pid: u32,
        bypass: &mut SessionLink,
        layout: &Layout,
    ) -> Result<(), DumpError> {
        let ops = &self.options.ops;

        let status = expect_status(&ops.bypass, bypass.call(&ops.bypass, vec![json!(pid)]).await?)?;
        if status != 0 {
            return Err(DumpError::ChildBypassFailed { pid, status });
        }

        let session = self.device.attach(AttachTarget::Pid(pid)).await?;
        let mut link =
            SessionLink::open(format!("child:{pid}"), session, &self.options.agent_source).await?;
        link.bind_router(PathResolver::new(&layout.root, &layout.working_dir));
        link.on_progress(Box::new(log_progress));

        let result = async {
            link.call(&ops.prepare, vec![]).await?;
            link.call(&ops.dump, vec![]).await?;
            Ok::<_, DumpError>(())
        }
        .await;

        link.teardown().await;
        result
    }
}

fn log_progress(progress: TransferProgress) {
    if progress.done {
        debug!(
            kind = %progress.kind,
            name = %progress.label,
            bytes = progress.received,
            rate = progress.bytes_per_second as u64,
            "transfer complete"
        );
    } else {
        trace!(
            kind = %progress.kind,
            name = %progress.label,
            received = progress.received,
            total = progress.total,
            percent = (progress.fraction() * 100.0).round() as u64,
            rate = progress.bytes_per_second as u64,
            "transfer progress"
        );
    }
}

fn expect_string(method: &str, value: Value) -> Result<String, DumpError> {
    match value {
        Value::String(s) => Ok(s),
        other => Err(DumpError::InvalidResponse {
            method: method.to_string(),
            detail: format!("expected a string, got {other}"),
        }),
    }
}

/// Bypass status; a missing return value counts as success.
fn expect_status(method: &str, value: Value) -> Result<i64, DumpError> {
    match value {
        Value::Null => Ok(0),
        Value::Number(n) => n.as_i64().ok_or_else(|| DumpError::InvalidResponse {
            method: method.to_string(),
            detail: format!("status {n} is not an integer"),
        }),
        other => Err(DumpError::InvalidResponse {
            method: method.to_string(),
            detail: format!("expected a status code, got {other}"),
        }),
    }
}
