//! Session: one transport, one engine, one outbound queue.
//!
//! ```text
//!   poll_link ───────────▶ on_connected / on_disconnected
//!   receive + poll_frame ─▶ Engine::handle_frame ─▶ outbox ──┐
//!   worker ─▶ ResponseQueue ────────────────────────────────┤
//!                                                           ▼
//!                                              encode_response ─▶ Transport::send
//! ```
//!
//! The session loop is the only writer to its transport. Delivery is
//! best-effort: while disconnected every response is dropped, never held
//! for a later connection.

use std::sync::Arc;

use log::{debug, info, warn};

use super::channels::ResponseQueue;
use super::codec::encode_response;
use super::engine::Engine;
use super::transport::{LinkEvent, Transport};
use crate::app::events::{Response, Status};
use crate::app::ports::{SharedStore, SharedSystem};
use crate::app::supervisor::ExecutionSupervisor;
use crate::config::DeviceConfig;

/// Welcome text sent on every new connection.
pub const WELCOME: &str = "welcome to the ESP32 code loader";

pub struct Session<T: Transport> {
    transport: T,
    engine: Engine,
    queue: ResponseQueue,
    system: SharedSystem,
    outbox: Vec<Response>,
    connected: bool,
    need_advertise: bool,
}

impl<T: Transport> Session<T> {
    pub fn new(
        transport: T,
        config: &DeviceConfig,
        supervisor: Arc<ExecutionSupervisor>,
        store: SharedStore,
        system: SharedSystem,
    ) -> Self {
        let queue = ResponseQueue::new();
        let engine = Engine::new(
            transport.kind(),
            config,
            supervisor,
            store,
            system.clone(),
            queue.clone(),
        );
        let connected = transport.is_connected();

        Self {
            transport,
            engine,
            queue,
            system,
            outbox: Vec::new(),
            connected,
            need_advertise: false,
        }
    }

    /// One pass of the session loop. Never blocks beyond the transport's
    /// own bounded poll.
    pub fn poll(&mut self, now_ms: u64) {
        while let Some(event) = self.transport.poll_link() {
            match event {
                LinkEvent::Connected => self.on_connected(),
                LinkEvent::Disconnected => self.on_disconnected(),
            }
        }

        self.transport.receive(now_ms);
        while let Some(frame) = self.transport.poll_frame() {
            self.engine.handle_frame(frame, &mut self.outbox);
            self.flush_outbox();

            if self.engine.take_reboot_request() {
                info!("SESSION[{}]: rebooting on request", self.label());
                self.system.reboot();
            }
        }

        while let Some(response) = self.queue.try_pop() {
            self.send(&response);
        }
    }

    /// Send an unsolicited response (e.g. a button event) if connected.
    pub fn broadcast(&mut self, response: &Response) {
        if self.connected {
            self.send(response);
        }
    }

    /// True once after a disconnect: the caller should restart advertising.
    pub fn take_advertise_request(&mut self) -> bool {
        core::mem::take(&mut self.need_advertise)
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    // ── Lifecycle ────────────────────────────────────────────

    fn on_connected(&mut self) {
        info!("SESSION[{}]: connected", self.label());
        self.connected = true;
        self.need_advertise = false;
        self.send(&Response::new(Status::Connected, WELCOME));
    }

    fn on_disconnected(&mut self) {
        info!("SESSION[{}]: disconnected", self.label());
        self.connected = false;
        self.need_advertise = true;
        self.outbox.clear();
        let dropped = self.queue.clear();
        if dropped > 0 {
            debug!("SESSION[{}]: dropped {} pending responses", self.label(), dropped);
        }
        self.engine.reset_transfer();
    }

    // ── Output ───────────────────────────────────────────────

    fn flush_outbox(&mut self) {
        let pending = core::mem::take(&mut self.outbox);
        for response in &pending {
            self.send(response);
        }
    }

    fn send(&mut self, response: &Response) {
        if !self.connected {
            debug!(
                "SESSION[{}]: not connected, dropping {:?}",
                self.label(),
                response.status
            );
            return;
        }
        let bytes = encode_response(response);
        if let Err(e) = self.transport.send(&bytes) {
            warn!("SESSION[{}]: send failed: {:?}", self.label(), e);
        }
    }

    fn label(&self) -> &'static str {
        self.transport.kind().label()
    }
}

/// Delayed advertising restart after a disconnect. A reconnect before the
/// delay runs out cancels the restart.
#[derive(Debug)]
pub struct ReadvertiseTimer {
    delay_ms: u64,
    due_at: Option<u64>,
}

impl ReadvertiseTimer {
    pub fn new(delay_ms: u32) -> Self {
        Self {
            delay_ms: u64::from(delay_ms),
            due_at: None,
        }
    }

    /// Call after each session pass. True when advertising should restart
    /// now.
    pub fn update<T: Transport>(&mut self, session: &mut Session<T>, now_ms: u64) -> bool {
        if session.take_advertise_request() {
            self.due_at = Some(now_ms.saturating_add(self.delay_ms));
        }
        if session.is_connected() {
            self.due_at = None;
            return false;
        }
        match self.due_at {
            Some(at) if now_ms >= at => {
                self.due_at = None;
                true
            }
            _ => false,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.due_at.is_some()
    }
}
