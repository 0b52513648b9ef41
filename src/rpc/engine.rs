//! Command router and transfer driver for one session.
//!
//! **Transport-decoupled**: the engine does not own a transport. The
//! session feeds it [`Frame`]s and sends whatever responses it appends to
//! the outbox. Program output from the worker bypasses the engine and goes
//! through the session's [`ResponseQueue`].
//!
//! Every handler returns `Result`; [`Engine::handle_frame`] is the single
//! place a fault becomes an `ERROR` response, so no handler can take the
//! session loop down.

use std::sync::Arc;

use log::{info, warn};
use serde_json::json;

use super::channels::ResponseQueue;
use super::codec::{ChunkPayload, decode_chunk, decode_command, parse_text_command};
use super::frame::Frame;
use super::transfer::{ChunkOutcome, CompletedTransfer, TransferKind, TransferState};
use super::transport::TransportKind;
use crate::app::commands::Command;
use crate::app::events::{Response, Status};
use crate::app::ports::{SharedStore, SharedSystem, with_store};
use crate::app::supervisor::ExecutionSupervisor;
use crate::config::DeviceConfig;
use crate::diagnostics::{DeviceInfo, RuntimeMetrics};
use crate::error::{DecodeError, Error, ProtocolError, Result};

/// Per-session router. Owns the session's transfer state.
pub struct Engine {
    link: TransportKind,
    config: DeviceConfig,
    transfer: TransferState,
    supervisor: Arc<ExecutionSupervisor>,
    store: SharedStore,
    system: SharedSystem,
    worker_sink: ResponseQueue,
    reboot_requested: bool,
}

impl Engine {
    pub fn new(
        link: TransportKind,
        config: &DeviceConfig,
        supervisor: Arc<ExecutionSupervisor>,
        store: SharedStore,
        system: SharedSystem,
        worker_sink: ResponseQueue,
    ) -> Self {
        Self {
            link,
            config: config.clone(),
            transfer: TransferState::new(config.max_transfer_bytes),
            supervisor,
            store,
            system,
            worker_sink,
            reboot_requested: false,
        }
    }

    pub fn transfer(&self) -> &TransferState {
        &self.transfer
    }

    /// Abandon the in-flight transfer, if any.
    pub fn reset_transfer(&mut self) {
        if self.transfer.is_active() {
            info!(
                "SESSION[{}]: transfer abandoned at {} bytes",
                self.link.label(),
                self.transfer.received()
            );
        }
        self.transfer.reset();
    }

    /// True once after a `reboot` command was acknowledged.
    pub fn take_reboot_request(&mut self) -> bool {
        core::mem::take(&mut self.reboot_requested)
    }

    /// Process one frame, appending every resulting response to `out`.
    pub fn handle_frame(&mut self, frame: Frame, out: &mut Vec<Response>) {
        let result = match frame {
            Frame::Command(bytes) => match decode_command(&bytes) {
                Ok(cmd) => self.dispatch(cmd, out),
                Err(e) => Err(e.into()),
            },
            Frame::Text(line) => self.dispatch(parse_text_command(&line), out),
            Frame::Chunk(payload) => self.on_chunk(payload, out),
            Frame::End => self.on_end(out),
        };

        if let Err(e) = result {
            warn!("SESSION[{}]: {}", self.link.label(), e);
            out.push(Response::error(e.to_string()));
        }
    }

    // ── Command dispatch ─────────────────────────────────────

    fn dispatch(&mut self, cmd: Command, out: &mut Vec<Response>) -> Result<()> {
        info!("SESSION[{}]: {}", self.link.label(), cmd.name());

        match cmd {
            Command::Run { code, filename } => self.run(code, filename, out),
            Command::Save { code, filename } => self.save(code, filename, out),
            Command::List => self.list(out),
            Command::Delete { filename } => self.delete(filename, out),
            Command::Reboot => {
                out.push(Response::info("rebooting..."));
                self.reboot_requested = true;
                Ok(())
            }
            Command::Info => self.info(out),
            Command::StartUpload { filename, size } => self.start_upload(filename, size, out),
            Command::StartRun { size } => self.start_run(size, out),
            Command::Stop => {
                out.push(self.supervisor.stop());
                Ok(())
            }
            Command::Unknown(name) => Err(ProtocolError::UnknownCommand(name).into()),
        }
    }

    fn run(
        &mut self,
        code: Option<String>,
        filename: Option<String>,
        out: &mut Vec<Response>,
    ) -> Result<()> {
        if self.supervisor.is_running() {
            return Err(ProtocolError::AlreadyRunning.into());
        }

        if let Some(code) = non_empty(code) {
            self.supervisor.start(code, None, self.worker_sink.clone())?;
            out.push(Response::info("code starting..."));
            return Ok(());
        }

        let Some(name) = non_empty(filename) else {
            return Err(ProtocolError::CodeOrFilenameRequired.into());
        };
        self.ensure_exists(&name)?;
        let bytes = with_store(&self.store, |s| s.read(&name)).map_err(|e| Error::Storage("read", e))?;
        let source = String::from_utf8(bytes).map_err(|_| DecodeError::InvalidUtf8)?;

        let ephemeral = self.config.is_ephemeral(&name).then(|| name.clone());
        self.supervisor
            .start(source, ephemeral, self.worker_sink.clone())?;
        out.push(Response::info(format!("running file: {name}")));
        Ok(())
    }

    fn save(
        &mut self,
        code: Option<String>,
        filename: Option<String>,
        out: &mut Vec<Response>,
    ) -> Result<()> {
        let (Some(code), Some(name)) = (non_empty(code), non_empty(filename)) else {
            return Err(ProtocolError::CodeAndFilenameRequired.into());
        };

        with_store(&self.store, |s| s.write(&name, code.as_bytes()))
            .map_err(|e| Error::Storage("save", e))?;
        info!("SESSION[{}]: saved {} ({} bytes)", self.link.label(), name, code.len());
        out.push(
            Response::new(Status::Success, format!("code saved: {name}"))
                .with_data(json!({ "filename": name, "size": code.len() })),
        );
        Ok(())
    }

    fn list(&mut self, out: &mut Vec<Response>) -> Result<()> {
        let mut entries = with_store(&self.store, |s| s.list()).map_err(|e| Error::Storage("list", e))?;
        entries.retain(|e| self.config.is_listed(&e.name));
        entries.sort_by(|a, b| a.name.cmp(&b.name));

        let files: Vec<_> = entries
            .iter()
            .map(|e| json!({ "name": e.name, "size": e.size }))
            .collect();
        out.push(
            Response::new(Status::Success, format!("found {} files", files.len()))
                .with_data(json!({ "files": files })),
        );
        Ok(())
    }

    fn delete(&mut self, filename: Option<String>, out: &mut Vec<Response>) -> Result<()> {
        let Some(name) = non_empty(filename) else {
            return Err(ProtocolError::FilenameRequired.into());
        };
        self.ensure_exists(&name)?;
        with_store(&self.store, |s| s.delete(&name)).map_err(|e| Error::Storage("delete", e))?;
        out.push(Response::new(Status::Success, format!("file deleted: {name}")));
        Ok(())
    }

    fn info(&mut self, out: &mut Vec<Response>) -> Result<()> {
        let metrics = with_store(&self.store, |s| Ok(RuntimeMetrics::collect(&*self.system, s)))
            .map_err(|e| Error::Storage("stat", e))?;
        let info = DeviceInfo::new(&*self.system, metrics, self.link);
        let data = serde_json::to_value(&info).map_err(|e| Error::Execution(e.to_string()))?;
        out.push(Response::new(Status::Success, "system info").with_data(data));
        Ok(())
    }

    fn start_upload(
        &mut self,
        filename: Option<String>,
        size: usize,
        out: &mut Vec<Response>,
    ) -> Result<()> {
        let Some(name) = non_empty(filename) else {
            return Err(ProtocolError::FilenameRequired.into());
        };
        if self.supervisor.is_running() {
            return Err(ProtocolError::AlreadyRunning.into());
        }
        if self.transfer.is_active() {
            warn!(
                "SESSION[{}]: start_upload replaces an open transfer",
                self.link.label()
            );
        }

        self.transfer.begin(
            TransferKind::UploadToStorage {
                target: name.clone(),
            },
            size,
        );
        info!("SESSION[{}]: upload {} ({} bytes)", self.link.label(), name, size);
        out.push(
            Response::new(Status::Ready, format!("ready to receive: {name}"))
                .with_data(json!({ "filename": name, "buffer_size": 0 })),
        );
        Ok(())
    }

    fn start_run(&mut self, size: usize, out: &mut Vec<Response>) -> Result<()> {
        if self.supervisor.is_running() {
            return Err(ProtocolError::AlreadyRunning.into());
        }
        if self.transfer.is_active() {
            return Err(ProtocolError::TransferInProgress.into());
        }

        self.transfer.begin(TransferKind::UploadToExecute, size);
        info!("SESSION[{}]: run transfer ({} bytes)", self.link.label(), size);
        out.push(
            Response::new(Status::ReadyRun, "ready to receive code")
                .with_data(json!({ "buffer_size": 0 })),
        );
        Ok(())
    }

    // ── Transfer ─────────────────────────────────────────────

    fn on_chunk(&mut self, payload: ChunkPayload, out: &mut Vec<Response>) -> Result<()> {
        if !self.transfer.is_active() {
            return Err(ProtocolError::NotReceiving.into());
        }

        let bytes = match decode_chunk(payload) {
            Ok(bytes) => bytes,
            Err(e) => {
                self.transfer.reset();
                return Err(e.into());
            }
        };

        match self.transfer.append(&bytes)? {
            ChunkOutcome::Progress(p) => {
                out.push(
                    Response::new(Status::Progress, "receiving...").with_data(json!({
                        "received": p.received,
                        "total": p.total,
                        "progress": p.percent,
                    })),
                );
                Ok(())
            }
            ChunkOutcome::Complete(done) => self.complete(done, out),
        }
    }

    fn on_end(&mut self, out: &mut Vec<Response>) -> Result<()> {
        let done = self.transfer.finish()?;
        self.complete(done, out)
    }

    /// The transfer state is already Idle by the time this runs.
    fn complete(&mut self, done: CompletedTransfer, out: &mut Vec<Response>) -> Result<()> {
        let size = done.data.len();
        match done.kind {
            TransferKind::UploadToStorage { target } => {
                with_store(&self.store, |s| s.write(&target, &done.data))
                    .map_err(|e| Error::Storage("save", e))?;
                info!("SESSION[{}]: stored {} ({} bytes)", self.link.label(), target, size);
                out.push(
                    Response::new(Status::Success, format!("file saved: {target}"))
                        .with_data(json!({ "filename": target, "size": size })),
                );
            }
            TransferKind::UploadToExecute => {
                let source = String::from_utf8(done.data).map_err(|_| DecodeError::InvalidUtf8)?;
                self.supervisor
                    .start(source, None, self.worker_sink.clone())?;
                out.push(Response::info("code starting..."));
            }
        }
        Ok(())
    }

    // ── Helpers ──────────────────────────────────────────────

    fn ensure_exists(&self, name: &str) -> Result<()> {
        let exists = with_store(&self.store, |s| Ok(s.exists(name)))
            .map_err(|e| Error::Storage("stat", e))?;
        if exists {
            Ok(())
        } else {
            Err(Error::NotFound(name.into()))
        }
    }
}

/// `None` for absent and empty strings alike.
fn non_empty(s: Option<String>) -> Option<String> {
    s.filter(|s| !s.is_empty())
}
