//! Transport-agnostic session engine.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                       Session Stack                          │
//! │                                                              │
//! │  ┌───────────┐   ┌──────────┐   ┌─────────────────────────┐  │
//! │  │ Transport │──▶│  Frame   │──▶│  Engine (router)        │  │
//! │  │ (trait)   │   │ decoder  │   │  ├─ TransferState       │  │
//! │  └───────────┘   └──────────┘   │  └─ ExecutionSupervisor │  │
//! │       ▲                         └────────────┬────────────┘  │
//! │       │          ┌──────────┐                │               │
//! │       └──────────│  Codec   │◀───────────────┘               │
//! │                  │ (JSON)   │◀── ResponseQueue ◀── worker    │
//! │                  └──────────┘                                │
//! └──────────────────────────────────────────────────────────────┘
//! ```

pub mod channels;
pub mod codec;
pub mod engine;
pub mod frame;
pub mod session;
pub mod transfer;
pub mod transport;
