//! Execution supervisor: one background program at a time.
//!
//! ```text
//!  session loop                         program worker (APP core)
//!  ────────────                         ─────────────────────────
//!  start() ── running: false→true ──▶   Interpreter::run(source, env)
//!                                          │ print()  ──▶ OUTPUT
//!  stop()  ── cancel_requested=true        │ should_stop() ◀── polled
//!                                          ▼
//!                                       delete ephemeral file (best effort)
//!                                       running = false
//!                                       SUCCESS / ERROR unless cancelled
//! ```
//!
//! Cancellation is cooperative. A program that never calls `should_stop()`
//! runs until it returns on its own; `stop()` only raises the flag and
//! never waits for the worker.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use embedded_hal::digital::PinState;
use log::{debug, info, warn};

use super::events::{Response, Status};
use super::ports::{
    Interpreter, PinError, SharedPins, SharedStore, SharedSystem, StorageError, with_pins,
    with_store,
};
use crate::drivers::task_pin::{Core, spawn_on_core};
use crate::error::{Error, ProtocolError};
use crate::rpc::channels::ResponseQueue;

/// Worker task priority (FreeRTOS).
const WORKER_PRIORITY: u8 = 5;

// ───────────────────────────────────────────────────────────────
// Program environment
// ───────────────────────────────────────────────────────────────

/// The complete capability set a running program can reach.
///
/// The interpreter adapter binds each method to a program-visible name;
/// nothing outside this struct is exposed.
#[derive(Clone)]
pub struct ProgramEnv {
    output: ResponseQueue,
    cancel: Arc<AtomicBool>,
    pins: SharedPins,
    store: SharedStore,
    system: SharedSystem,
}

impl ProgramEnv {
    pub fn new(
        output: ResponseQueue,
        cancel: Arc<AtomicBool>,
        pins: SharedPins,
        store: SharedStore,
        system: SharedSystem,
    ) -> Self {
        Self {
            output,
            cancel,
            pins,
            store,
            system,
        }
    }

    /// Emit one `OUTPUT` event, in program order.
    pub fn print(&self, line: &str) {
        debug!("PROG: {}", line);
        self.output.push_blocking(Response::output(line));
    }

    /// Cancellation flag the program is expected to poll.
    pub fn should_stop(&self) -> bool {
        self.cancel.load(Ordering::Acquire)
    }

    pub fn sleep_ms(&self, ms: u64) {
        std::thread::sleep(std::time::Duration::from_millis(ms));
    }

    /// Milliseconds since boot.
    pub fn ticks_ms(&self) -> u64 {
        self.system.uptime_ms()
    }

    pub fn pin_write(&self, pin: u8, high: bool) -> Result<(), PinError> {
        with_pins(&self.pins, pin, |p| p.write(pin, PinState::from(high)))
    }

    pub fn pin_read(&self, pin: u8) -> Result<bool, PinError> {
        with_pins(&self.pins, pin, |p| p.read(pin)).map(|s| s == PinState::High)
    }

    pub fn pin_toggle(&self, pin: u8) -> Result<bool, PinError> {
        with_pins(&self.pins, pin, |p| p.toggle(pin)).map(|s| s == PinState::High)
    }

    pub fn heap_free(&self) -> u64 {
        self.system.heap_free()
    }

    pub fn heap_used(&self) -> u64 {
        self.system.heap_used()
    }

    /// Names of every stored entry.
    pub fn file_names(&self) -> Result<Vec<String>, StorageError> {
        with_store(&self.store, |s| s.list()).map(|v| v.into_iter().map(|e| e.name).collect())
    }

    pub fn file_exists(&self, name: &str) -> bool {
        with_store(&self.store, |s| Ok(s.exists(name))).unwrap_or(false)
    }
}

// ───────────────────────────────────────────────────────────────
// Supervisor
// ───────────────────────────────────────────────────────────────

/// Owns the single execution context shared by every session.
pub struct ExecutionSupervisor {
    running: Arc<AtomicBool>,
    cancel: Arc<AtomicBool>,
    interpreter: Arc<dyn Interpreter>,
    pins: SharedPins,
    store: SharedStore,
    system: SharedSystem,
    stack_kb: usize,
}

impl ExecutionSupervisor {
    pub fn new(
        interpreter: Arc<dyn Interpreter>,
        store: SharedStore,
        pins: SharedPins,
        system: SharedSystem,
        stack_kb: usize,
    ) -> Self {
        Self {
            running: Arc::new(AtomicBool::new(false)),
            cancel: Arc::new(AtomicBool::new(false)),
            interpreter,
            pins,
            store,
            system,
            stack_kb,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn cancel_requested(&self) -> bool {
        self.cancel.load(Ordering::Acquire)
    }

    /// Start `source` on the worker and return immediately.
    ///
    /// Output and the terminal event go to `sink`. `ephemeral` names a
    /// staging file removed once the run ends, whatever the outcome.
    pub fn start(
        &self,
        source: String,
        ephemeral: Option<String>,
        sink: ResponseQueue,
    ) -> Result<(), Error> {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(ProtocolError::AlreadyRunning.into());
        }
        self.cancel.store(false, Ordering::Release);

        let env = ProgramEnv::new(
            sink.clone(),
            self.cancel.clone(),
            self.pins.clone(),
            self.store.clone(),
            self.system.clone(),
        );
        let worker = Worker {
            running: RunningGuard(self.running.clone()),
            cancel: self.cancel.clone(),
            interpreter: self.interpreter.clone(),
            store: self.store.clone(),
            system: self.system.clone(),
            sink,
        };

        info!("SUPERVISOR: starting program ({} bytes)", source.len());
        spawn_on_core(Core::App, WORKER_PRIORITY, self.stack_kb, "prog-run\0", move || {
            worker.run(&source, env, ephemeral);
        })
        .map(|_| ())
        .map_err(|e| {
            // The closure (and its guard) was dropped, so `running` is
            // already false again.
            warn!("SUPERVISOR: worker spawn failed: {}", e);
            Error::Execution(format!("worker spawn failed: {e}"))
        })
    }

    /// Request cancellation. Never blocks on the worker.
    pub fn stop(&self) -> Response {
        if !self.is_running() {
            return Response::info("nothing running");
        }
        self.cancel.store(true, Ordering::Release);
        info!("SUPERVISOR: stop requested");
        Response::info("stopping...")
    }
}

// ── Worker side ───────────────────────────────────────────────

/// Clears `running` when dropped, including on panic unwinding.
struct RunningGuard(Arc<AtomicBool>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

struct Worker {
    running: RunningGuard,
    cancel: Arc<AtomicBool>,
    interpreter: Arc<dyn Interpreter>,
    store: SharedStore,
    system: SharedSystem,
    sink: ResponseQueue,
}

impl Worker {
    fn run(self, source: &str, env: ProgramEnv, ephemeral: Option<String>) {
        let outcome = self.interpreter.run(source, env);

        if let Some(name) = ephemeral {
            match with_store(&self.store, |s| s.delete(&name)) {
                Ok(()) => debug!("SUPERVISOR: removed staging file {}", name),
                Err(e) => debug!("SUPERVISOR: staging file {} not removed: {}", name, e),
            }
        }

        let cancelled = self.cancel.load(Ordering::Acquire);
        drop(self.running);

        match (cancelled, outcome) {
            (true, _) => info!("SUPERVISOR: program stopped"),
            (false, Ok(())) => {
                info!("SUPERVISOR: program finished");
                let free = self.system.heap_free();
                self.sink.push_blocking(
                    Response::new(Status::Success, "execution finished")
                        .with_data(serde_json::json!({ "memory_free": free })),
                );
            }
            (false, Err(fault)) => {
                warn!("SUPERVISOR: program fault: {}", fault);
                self.sink
                    .push_blocking(Response::error(Error::Execution(fault).to_string()));
            }
        }
    }
}
