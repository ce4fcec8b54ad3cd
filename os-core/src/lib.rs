//! Core command plane for OpenSlack.
//!
//! Everything between a raw chat update and an executed operation lives here:
//! the policy gate, the failure rate limiter, the TOTP verifier, the two-step
//! approval store, the op registry, the dispatcher pipeline, the connector
//! subprocess subsystem, the config hot-reload path, and the outbound socket
//! server. Transport adapters (Telegram) and the daemon wiring live in the
//! `os-channels` and `os-app` crates.

pub mod approval;
pub mod configwatch;
pub mod connector;
pub mod dispatcher;
pub mod ipc;
pub mod ops;
pub mod policy;
pub mod ratelimit;
pub mod reload;
pub mod server;
pub mod tasks;
pub mod totp;
pub mod traits;
pub mod types;

pub use dispatcher::Dispatcher;
pub use traits::{MessageHandler, Notifier, NotifierRegistry};
pub use types::{InboundMessage, Notification};
