//! Test rig and mock adapters for integration tests.
//!
//! [`Rig`] wires one supervisor, store and system the way `main` does;
//! [`SerialPeer`] and [`BlePeer`] drive a session from the controller's
//! side of each transport and decode whatever comes back.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use codeloader::adapters::ble_transport::BleTransport;
use codeloader::adapters::lua::LuaInterpreter;
use codeloader::adapters::pins::BoardPins;
use codeloader::adapters::serial_transport::{LoopbackSerial, SerialTransport};
use codeloader::adapters::storage::MemStore;
use codeloader::adapters::system::SimSystem;
use codeloader::app::events::{Response, Status};
use codeloader::app::ports::{
    FileEntry, FileStore, Interpreter, SharedStore, StorageError, StorageUsage, with_store,
};
use codeloader::app::supervisor::{ExecutionSupervisor, ProgramEnv};
use codeloader::config::DeviceConfig;
use codeloader::rpc::codec::decode_response;
use codeloader::rpc::frame::BleChannel;
use codeloader::rpc::session::Session;
use serde_json::Value;

const WAIT_LIMIT: Duration = Duration::from_secs(5);

// ── Scripted interpreter ──────────────────────────────────────

/// Interpreter driven by one directive per source line:
///
/// - `print <text>`: emit one OUTPUT event
/// - `wait`: block until [`ScriptedInterpreter::release`] or cancellation
/// - `fail <msg>`: return `msg` as the fault
///
/// Every source it receives is recorded.
#[derive(Default)]
pub struct ScriptedInterpreter {
    sources: Mutex<Vec<String>>,
    released: AtomicBool,
}

#[allow(dead_code)]
impl ScriptedInterpreter {
    pub fn release(&self) {
        self.released.store(true, Ordering::Release);
    }

    pub fn sources(&self) -> Vec<String> {
        self.sources.lock().unwrap().clone()
    }

    pub fn runs(&self) -> usize {
        self.sources.lock().unwrap().len()
    }
}

impl Interpreter for ScriptedInterpreter {
    fn run(&self, source: &str, env: ProgramEnv) -> Result<(), String> {
        self.sources.lock().unwrap().push(source.to_owned());

        for line in source.lines() {
            if let Some(text) = line.strip_prefix("print ") {
                env.print(text);
            } else if line == "wait" {
                while !self.released.load(Ordering::Acquire) && !env.should_stop() {
                    std::thread::sleep(Duration::from_millis(1));
                }
            } else if let Some(msg) = line.strip_prefix("fail ") {
                return Err(msg.to_owned());
            }
        }
        Ok(())
    }
}

// ── Faulty store ──────────────────────────────────────────────

/// [`MemStore`] whose writes can be made to fail on demand.
pub struct FaultyStore {
    inner: MemStore,
    pub fail_writes: bool,
}

impl FaultyStore {
    pub fn new() -> Self {
        Self {
            inner: MemStore::with_capacity(64 * 1024),
            fail_writes: true,
        }
    }
}

impl FileStore for FaultyStore {
    fn read(&self, name: &str) -> Result<Vec<u8>, StorageError> {
        self.inner.read(name)
    }

    fn write(&mut self, name: &str, data: &[u8]) -> Result<(), StorageError> {
        if self.fail_writes {
            return Err(StorageError::Io("flash write error".into()));
        }
        self.inner.write(name, data)
    }

    fn delete(&mut self, name: &str) -> Result<(), StorageError> {
        self.inner.delete(name)
    }

    fn exists(&self, name: &str) -> bool {
        self.inner.exists(name)
    }

    fn list(&self) -> Result<Vec<FileEntry>, StorageError> {
        self.inner.list()
    }

    fn usage(&self) -> StorageUsage {
        self.inner.usage()
    }
}

// ── Rig ───────────────────────────────────────────────────────

pub struct Rig {
    pub config: DeviceConfig,
    pub store: SharedStore,
    pub system: Arc<SimSystem>,
    pub supervisor: Arc<ExecutionSupervisor>,
}

#[allow(dead_code)]
impl Rig {
    pub fn build(
        config: DeviceConfig,
        interpreter: Arc<dyn Interpreter>,
        store: SharedStore,
    ) -> Self {
        let system = Arc::new(SimSystem::new());
        let supervisor = Arc::new(ExecutionSupervisor::new(
            interpreter,
            store.clone(),
            Arc::new(Mutex::new(BoardPins::new())),
            system.clone(),
            config.worker_stack_kb,
        ));
        Self {
            config,
            store,
            system,
            supervisor,
        }
    }

    /// Default config, in-memory store, scripted interpreter.
    pub fn scripted() -> (Self, Arc<ScriptedInterpreter>) {
        Self::scripted_with(DeviceConfig::default())
    }

    pub fn scripted_with(config: DeviceConfig) -> (Self, Arc<ScriptedInterpreter>) {
        let interp = Arc::new(ScriptedInterpreter::default());
        let rig = Self::build(config, interp.clone(), mem_store());
        (rig, interp)
    }

    /// Default config, in-memory store, the real Lua interpreter.
    pub fn lua() -> Self {
        Self::build(
            DeviceConfig::default(),
            Arc::new(LuaInterpreter::new()),
            mem_store(),
        )
    }

    pub fn file(&self, name: &str) -> Option<Vec<u8>> {
        with_store(&self.store, |s| s.read(name)).ok()
    }

    pub fn put_file(&self, name: &str, data: &[u8]) {
        with_store(&self.store, |s| s.write(name, data)).unwrap();
    }

    pub fn serial(&self) -> SerialPeer {
        let port = LoopbackSerial::new();
        let session = Session::new(
            SerialTransport::new(port.clone(), &self.config),
            &self.config,
            self.supervisor.clone(),
            self.store.clone(),
            self.system.clone(),
        );
        SerialPeer {
            session,
            port,
            tag: self.config.serial_response_tag.to_string(),
            chars_per_poll: self.config.serial_max_chars_per_poll.max(1),
            now_ms: 0,
        }
    }

    /// BLE session, not yet connected.
    pub fn ble(&self) -> BlePeer {
        let session = Session::new(
            BleTransport::new(&self.config),
            &self.config,
            self.supervisor.clone(),
            self.store.clone(),
            self.system.clone(),
        );
        BlePeer {
            session,
            pending: Vec::new(),
        }
    }

    /// Block until the worker has exited.
    pub fn wait_idle(&self) {
        let deadline = Instant::now() + WAIT_LIMIT;
        while self.supervisor.is_running() {
            assert!(Instant::now() < deadline, "worker never finished");
            std::thread::sleep(Duration::from_millis(1));
        }
    }
}

pub fn mem_store() -> SharedStore {
    Arc::new(Mutex::new(MemStore::with_capacity(64 * 1024)))
}

// ── Serial peer ───────────────────────────────────────────────

pub struct SerialPeer {
    pub session: Session<SerialTransport<LoopbackSerial>>,
    port: LoopbackSerial,
    tag: String,
    chars_per_poll: usize,
    now_ms: u64,
}

#[allow(dead_code)]
impl SerialPeer {
    /// Type one line and return the responses it produced.
    pub fn line(&mut self, line: &str) -> Vec<Response> {
        self.raw_line(line.as_bytes())
    }

    /// Queue input without polling.
    pub fn type_ahead(&self, bytes: &[u8]) {
        self.port.push_input(bytes);
    }

    /// Like [`Self::line`], for input that need not be valid text.
    pub fn raw_line(&mut self, bytes: &[u8]) -> Vec<Response> {
        self.port.push_input(bytes);
        self.port.push_input(b"\n");
        // The transport reads a bounded number of characters per poll.
        let polls = bytes.len() / self.chars_per_poll + 2;
        for _ in 0..polls {
            self.tick();
        }
        self.take()
    }

    pub fn command(&mut self, cmd: Value) -> Vec<Response> {
        self.line(&cmd.to_string())
    }

    pub fn tick(&mut self) {
        self.now_ms += 1;
        self.session.poll(self.now_ms);
    }

    /// Decode every tagged line written so far. Untagged lines are
    /// ordinary console text and are skipped.
    pub fn take(&mut self) -> Vec<Response> {
        self.port
            .take_lines()
            .iter()
            .filter_map(|l| l.strip_prefix(self.tag.as_str()))
            .map(|json| decode_response(json.as_bytes()).unwrap())
            .collect()
    }

    /// Poll until a response matches `done`; returns everything seen.
    pub fn wait_for(&mut self, done: impl Fn(&Response) -> bool) -> Vec<Response> {
        self.wait_from(Vec::new(), done)
    }

    /// Like [`Self::wait_for`], counting responses already taken. A fast
    /// program can finish within the polls of the command that started it.
    pub fn wait_from(
        &mut self,
        mut seen: Vec<Response>,
        done: impl Fn(&Response) -> bool,
    ) -> Vec<Response> {
        let deadline = Instant::now() + WAIT_LIMIT;
        loop {
            self.tick();
            seen.extend(self.take());
            if seen.iter().any(&done) {
                return seen;
            }
            assert!(Instant::now() < deadline, "timed out; saw {seen:?}");
            std::thread::sleep(Duration::from_millis(1));
        }
    }
}

// ── BLE peer ──────────────────────────────────────────────────

pub struct BlePeer {
    pub session: Session<BleTransport>,
    /// Notification bytes not yet forming a whole envelope.
    pending: Vec<u8>,
}

#[allow(dead_code)]
impl BlePeer {
    pub fn connect(&mut self) -> Vec<Response> {
        self.session.transport_mut().on_connect();
        self.tick();
        self.take()
    }

    pub fn disconnect(&mut self) {
        self.session.transport_mut().on_disconnect();
        self.tick();
        // Anything notified before the drop is lost with the link.
        self.session.transport_mut().take_notifications();
        self.pending.clear();
    }

    pub fn command(&mut self, cmd: Value) -> Vec<Response> {
        self.write(BleChannel::Command, cmd.to_string().as_bytes())
    }

    pub fn chunk(&mut self, bytes: &[u8]) -> Vec<Response> {
        self.write(BleChannel::Chunk, bytes)
    }

    pub fn write(&mut self, channel: BleChannel, bytes: &[u8]) -> Vec<Response> {
        self.session.transport_mut().on_write(channel, bytes);
        self.tick();
        self.take()
    }

    pub fn tick(&mut self) {
        self.session.poll(0);
    }

    /// Reassemble notifications into envelopes. Envelopes are sent
    /// back to back with no delimiter, as a central receives them.
    pub fn take(&mut self) -> Vec<Response> {
        for fragment in self.session.transport_mut().take_notifications() {
            self.pending.extend_from_slice(&fragment);
        }
        let mut stream =
            serde_json::Deserializer::from_slice(&self.pending).into_iter::<Response>();
        let mut out = Vec::new();
        while let Some(Ok(r)) = stream.next() {
            out.push(r);
        }
        let used = stream.byte_offset();
        self.pending.drain(..used);
        out
    }

    pub fn wait_for(&mut self, done: impl Fn(&Response) -> bool) -> Vec<Response> {
        self.wait_from(Vec::new(), done)
    }

    pub fn wait_from(
        &mut self,
        mut seen: Vec<Response>,
        done: impl Fn(&Response) -> bool,
    ) -> Vec<Response> {
        let deadline = Instant::now() + WAIT_LIMIT;
        loop {
            self.tick();
            seen.extend(self.take());
            if seen.iter().any(&done) {
                return seen;
            }
            assert!(Instant::now() < deadline, "timed out; saw {seen:?}");
            std::thread::sleep(Duration::from_millis(1));
        }
    }
}

// ── Assertions ────────────────────────────────────────────────

#[allow(dead_code)]
pub fn is_terminal(r: &Response) -> bool {
    matches!(r.status, Status::Success | Status::Error)
}

#[allow(dead_code)]
pub fn statuses(responses: &[Response]) -> Vec<Status> {
    responses.iter().map(|r| r.status).collect()
}
