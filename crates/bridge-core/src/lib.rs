//! Editor bridge core
//!
//! An authenticated JSON-RPC gateway exposing an interactive editor
//! session to local agents: method dispatch, a transaction staging engine
//! with optimistic version checks, a filtered event bus with bounded
//! replay, and a bounded trace ring for auditing.
//!
//! The gateway core is framing-agnostic; transports feed it
//! `serde_json::Value` frames and ship back whatever it returns.

pub mod agent;
pub mod config;
pub mod error;
pub mod events;
pub mod gateway;
pub mod host;
pub mod policy;
pub mod snapshot;
pub mod token;
pub mod trace;
pub mod tx;

pub use config::BridgeConfig;
pub use error::{Error, Result};
pub use events::EventHub;
pub use gateway::{ConnectionId, Gateway};
pub use host::{memory::MemoryHost, EditorHost};
pub use trace::{TraceBuffer, TraceItem, TraceKind, TraceStatus};
pub use tx::TxEngine;
