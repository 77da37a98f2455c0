//! Outbox replay
//!
//! Transmits queued mutations once connectivity returns.
//!
//! ## Flow
//!
//! 1. A [`Connectivity`] edge (or a manual call) starts a drain pass
//! 2. The pass walks the outbox oldest first
//! 3. [`SenderRegistry`] picks a [`Sender`] per row
//! 4. The outcome decides whether the row is removed, dropped or kept
//!
//! ## Usage
//!
//! ```ignore
//! let transport = Arc::new(HttpTransport::from_config(&config)?);
//! let engine = DrainEngine::new(queue, SenderRegistry::with_http_defaults(transport));
//!
//! let connectivity = Connectivity::new(false);
//! spawn_auto_drain(&connectivity, engine.clone());
//!
//! let report = engine.drain().await?;
//! ```

mod connectivity;
mod drain;
mod http;
pub mod payload;
mod sender;

pub use connectivity::{spawn_auto_drain, spawn_probe, Connectivity, ConnectivityEvent, ProbeHandle};
pub use drain::{drain, DrainEngine, DrainReport};
pub use http::{HttpSender, HttpTransport, MethodOverrideSender, IDEMPOTENCY_HEADER, METHOD_OVERRIDE_HEADER};
pub use sender::{
    sender_fn, FailureClass, FnSender, SendError, Sender, SenderRegistry, AUTO_SENDER,
    JSON_SENDER, METHOD_OVERRIDE_SENDER, MULTIPART_SENDER,
};
