use std::collections::HashMap;

use appdump_protocol::{
    AgentPayload, DownloadMessage, MemcpyMessage, PatchMessage, ScriptMessage, ScriptMessageKind,
    TransferEvent,
};
use appdump_transfer::{
    ChunkAssembler, PathResolver, ProgressCallback, ProgressTracker, StreamWriter, TransferError,
    TransferKind, apply_file_times, create_output_file, write_at, write_zeros_at,
};
use tracing::{debug, trace, warn};

use crate::RouterError;
use crate::sender::AckSender;

/// Outcome of dispatching one agent message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// A transfer message was applied.
    Handled,
    /// Not transfer traffic (log output, unknown subject or type).
    Ignored,
    /// The agent reported an error and is going away; the owning session
    /// should be torn down.
    Detaching(String),
}

/// Counters for one router, reported at session teardown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouterStats {
    pub blobs_open: usize,
    pub files_open: usize,
    pub files_written: u64,
    pub patches_applied: u64,
    pub bytes_written: u64,
}

/// Demultiplexes the transfer traffic of one agent session.
///
/// Owns every blob and file it opens; nothing else holds a reference to
/// them.
pub struct TransferRouter {
    resolver: PathResolver,
    sender: AckSender,
    blobs: HashMap<String, ChunkAssembler>,
    files: HashMap<String, StreamWriter>,
    progress: ProgressTracker,
    files_written: u64,
    patches_applied: u64,
    bytes_written: u64,
}

impl TransferRouter {
    pub fn new(resolver: PathResolver, sender: AckSender) -> Self {
        Self {
            resolver,
            sender,
            blobs: HashMap::new(),
            files: HashMap::new(),
            progress: ProgressTracker::default(),
            files_written: 0,
            patches_applied: 0,
            bytes_written: 0,
        }
    }

    /// Registers a progress callback for this router's transfers.
    pub fn on_progress(&mut self, callback: ProgressCallback) {
        self.progress.on_progress(callback);
    }

    pub fn resolver(&self) -> &PathResolver {
        &self.resolver
    }

    pub fn stats(&self) -> RouterStats {
        RouterStats {
            blobs_open: self.blobs.len(),
            files_open: self.files.len(),
            files_written: self.files_written,
            patches_applied: self.patches_applied,
            bytes_written: self.bytes_written,
        }
    }

    /// Interprets one agent message.
    ///
    /// Only `send` envelopes are routed, by exact subject match; unknown
    /// subjects and other message types are ignored. Errors are protocol
    /// violations and should end the session.
    pub async fn dispatch(
        &mut self,
        message: ScriptMessage,
        data: Option<Vec<u8>>,
    ) -> Result<Dispatch, RouterError> {
        match message.kind {
            ScriptMessageKind::Send => {}
            ScriptMessageKind::Error => {
                let summary = message.error_summary();
                if let Some(stack) = &message.stack {
                    debug!(%stack, "agent stack trace");
                }
                return Ok(Dispatch::Detaching(summary));
            }
            ScriptMessageKind::Log => {
                debug!(payload = ?message.payload.as_ref().map(|p| p.get()), "agent log");
                return Ok(Dispatch::Ignored);
            }
            ScriptMessageKind::Unknown => {
                warn!("ignoring agent message of unknown type");
                return Ok(Dispatch::Ignored);
            }
        }

        let payload = message
            .agent_payload()
            .map_err(|source| RouterError::InvalidPayload {
                subject: message.subject().unwrap_or_default(),
                source,
            })?;

        match payload {
            Some(AgentPayload::Memcpy(msg)) => self.handle_memcpy(msg, data)?,
            Some(AgentPayload::Patch(msg)) => self.handle_patch(msg).await?,
            Some(AgentPayload::Download(msg)) => self.handle_download(msg, data).await?,
            Some(AgentPayload::Unknown) | None => {
                trace!(subject = ?message.subject(), "ignoring unhandled subject");
                return Ok(Dispatch::Ignored);
            }
        }
        Ok(Dispatch::Handled)
    }

    // -----------------------------------------------------------------------
    // memcpy
    // -----------------------------------------------------------------------

    fn handle_memcpy(
        &mut self,
        msg: MemcpyMessage,
        data: Option<Vec<u8>>,
    ) -> Result<(), RouterError> {
        match msg.event {
            TransferEvent::Begin => {
                let size = msg.size.unwrap_or(0);
                debug!(session = %msg.session, size, "blob begin");
                let blob = ChunkAssembler::new(&msg.session, size);
                if self.blobs.insert(msg.session.clone(), blob).is_some() {
                    warn!(session = %msg.session, "blob token reused, discarding previous blob");
                }
                self.progress
                    .track(TransferKind::Blob, &msg.session, &msg.session, size);
                self.ack();
            }
            TransferEvent::Data => {
                let blob = self.blobs.get_mut(&msg.session).ok_or_else(|| {
                    TransferError::UnknownSession {
                        kind: TransferKind::Blob,
                        session: msg.session.clone(),
                    }
                })?;
                let data = data.ok_or_else(|| RouterError::MissingData {
                    subject: "memcpy",
                    session: msg.session.clone(),
                })?;
                let index = msg.index.ok_or(TransferError::MissingField {
                    subject: "memcpy",
                    field: "index",
                })?;
                let len = data.len() as u64;
                blob.feed(index, data)?;
                trace!(session = %msg.session, index, len, "blob chunk");
                self.progress.record(TransferKind::Blob, &msg.session, len);
                self.ack();
            }
            TransferEvent::End => {
                // Consumed by a later patch, not here.
                trace!(session = %msg.session, "blob end");
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // patch
    // -----------------------------------------------------------------------

    async fn handle_patch(&mut self, msg: PatchMessage) -> Result<(), RouterError> {
        let dest = self.resolver.resolve(&msg.filename).await?;

        let len = match (&msg.blob, msg.size) {
            (Some(token), _) => {
                let blob = self.blobs.remove(token).ok_or_else(|| {
                    TransferError::UnknownSession {
                        kind: TransferKind::Blob,
                        session: token.clone(),
                    }
                })?;
                self.progress.complete(TransferKind::Blob, token);
                let buf = blob.finish();
                write_at(&dest, msg.offset, &buf).await?;
                buf.len() as u64
            }
            (None, Some(size)) => {
                write_zeros_at(&dest, msg.offset, size).await?;
                size
            }
            (None, None) => {
                return Err(TransferError::MissingField {
                    subject: "patch",
                    field: "blob or size",
                }
                .into());
            }
        };

        debug!(
            path = %dest.display(),
            offset = msg.offset,
            len,
            zero_fill = msg.blob.is_none(),
            "patch applied"
        );
        self.patches_applied += 1;
        self.bytes_written += len;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // download
    // -----------------------------------------------------------------------

    async fn handle_download(
        &mut self,
        msg: DownloadMessage,
        data: Option<Vec<u8>>,
    ) -> Result<(), RouterError> {
        match msg.event {
            TransferEvent::Begin => {
                let filename = msg.filename.as_deref().ok_or(TransferError::MissingField {
                    subject: "download",
                    field: "filename",
                })?;
                let stat = msg.stat.ok_or(TransferError::MissingField {
                    subject: "download",
                    field: "stat",
                })?;

                let dest = self.resolver.resolve(filename).await?;
                let file = create_output_file(&dest, stat.mode).await?;
                let writer =
                    StreamWriter::new(&msg.session, dest.clone(), file, stat.size, Some(stat));
                if self.files.insert(msg.session.clone(), writer).is_some() {
                    warn!(session = %msg.session, "file token reused, closing previous file");
                }
                apply_file_times(&dest, &stat).await?;

                debug!(session = %msg.session, path = %dest.display(), size = stat.size, "file begin");
                self.progress
                    .track(TransferKind::File, &msg.session, filename, stat.size);
                self.ack();
            }
            TransferEvent::Data => {
                let writer = self.files.get_mut(&msg.session).ok_or_else(|| {
                    TransferError::UnknownSession {
                        kind: TransferKind::File,
                        session: msg.session.clone(),
                    }
                })?;
                let data = data.ok_or_else(|| RouterError::MissingData {
                    subject: "download",
                    session: msg.session.clone(),
                })?;
                writer.on_data(&data).await?;
                trace!(session = %msg.session, len = data.len(), "file chunk");
                self.progress
                    .record(TransferKind::File, &msg.session, data.len() as u64);
                self.ack();
            }
            TransferEvent::End => {
                let writer = self.files.remove(&msg.session).ok_or_else(|| {
                    TransferError::UnknownSession {
                        kind: TransferKind::File,
                        session: msg.session.clone(),
                    }
                })?;
                let path = writer.path().to_path_buf();
                let written = writer.finish().await?;
                self.progress.complete(TransferKind::File, &msg.session);
                self.files_written += 1;
                self.bytes_written += written;
                debug!(session = %msg.session, path = %path.display(), bytes = written, "file end");
            }
        }
        Ok(())
    }

    fn ack(&self) {
        // Fire-and-forget; a closed channel means the session is going away.
        let _ = self.sender.send_ack();
    }
}
