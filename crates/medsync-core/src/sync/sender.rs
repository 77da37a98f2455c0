//! Sender contract and registry
//!
//! A sender knows how to encode and transmit one kind of mutation. The
//! drain engine stays agnostic of wire formats and only asks the registry
//! which sender to use for a row.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::QueuedMutation;

/// Registry key of the payload-classifying HTTP sender
pub const AUTO_SENDER: &str = "auto";
/// Registry key of the last-resort JSON sender
pub const JSON_SENDER: &str = "json";
/// Registry key of the sender that always builds a multipart body
pub const MULTIPART_SENDER: &str = "multipart";
/// Registry key of the sender that tunnels verbs through POST
pub const METHOD_OVERRIDE_SENDER: &str = "method-override";

/// Errors a sender can report
#[derive(Error, Debug)]
pub enum SendError {
    /// The server answered with a non-success status
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// No response (offline, DNS, connection reset, timeout)
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The stored payload could not be turned into a request body
    #[error("Invalid payload: {0}")]
    Payload(String),

    /// Endpoint or verb could not be turned into a request
    #[error("Invalid request: {0}")]
    Request(String),

    /// Nothing in the registry can replay this row
    #[error("No sender registered for collection '{0}'")]
    NoSender(String),

    /// Failure reported by a custom sender
    #[error("{message}")]
    Other {
        status: Option<u16>,
        message: String,
    },
}

impl SendError {
    /// Failure with a transport status, for custom senders
    pub fn with_status(status: u16, message: impl Into<String>) -> Self {
        SendError::Other {
            status: Some(status),
            message: message.into(),
        }
    }

    /// Failure without any transport status
    pub fn other(message: impl Into<String>) -> Self {
        SendError::Other {
            status: None,
            message: message.into(),
        }
    }

    /// Transport status code, when one is known
    pub fn status(&self) -> Option<u16> {
        match self {
            SendError::Status { status, .. } => Some(*status),
            SendError::Transport(e) => e.status().map(|s| s.as_u16()),
            SendError::Other { status, .. } => *status,
            _ => None,
        }
    }

    pub fn class(&self) -> FailureClass {
        FailureClass::from_status(self.status())
    }
}

/// How the drain engine treats a failed row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Client error that will never succeed: drop the row
    Permanent,
    /// Worth retrying on a later drain: keep the row
    Transient,
}

impl FailureClass {
    /// 4xx except 429 is permanent; everything else, including a missing
    /// status, is transient.
    pub fn from_status(status: Option<u16>) -> Self {
        match status {
            Some(s) if (400..500).contains(&s) && s != 429 => FailureClass::Permanent,
            _ => FailureClass::Transient,
        }
    }
}

/// Something that can replay a queued mutation
#[async_trait]
pub trait Sender: Send + Sync {
    async fn dispatch(&self, row: &QueuedMutation) -> Result<(), SendError>;
}

/// Adapter turning an async closure into a [`Sender`]
pub struct FnSender<F>(F);

/// Wrap an async closure as a sender
///
/// ```ignore
/// registry.register("audit", sender_fn(|row| async move {
///     tracing::info!(id = %row.id, "replayed");
///     Ok(())
/// }));
/// ```
pub fn sender_fn<F, Fut>(f: F) -> FnSender<F>
where
    F: Fn(QueuedMutation) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), SendError>> + Send,
{
    FnSender(f)
}

#[async_trait]
impl<F, Fut> Sender for FnSender<F>
where
    F: Fn(QueuedMutation) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), SendError>> + Send,
{
    async fn dispatch(&self, row: &QueuedMutation) -> Result<(), SendError> {
        (self.0)(row.clone()).await
    }
}

/// Named transport strategies
#[derive(Clone, Default)]
pub struct SenderRegistry {
    senders: HashMap<String, Arc<dyn Sender>>,
}

impl SenderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the sender under `key`
    pub fn register(&mut self, key: impl Into<String>, sender: impl Sender + 'static) -> &mut Self {
        self.senders.insert(key.into(), Arc::new(sender));
        self
    }

    /// Register an already shared sender under `key`
    pub fn register_shared(&mut self, key: impl Into<String>, sender: Arc<dyn Sender>) -> &mut Self {
        self.senders.insert(key.into(), sender);
        self
    }

    /// Builder-style [`register`](Self::register)
    pub fn with(mut self, key: impl Into<String>, sender: impl Sender + 'static) -> Self {
        self.register(key, sender);
        self
    }

    pub fn get(&self, key: &str) -> Option<Arc<dyn Sender>> {
        self.senders.get(key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.senders.contains_key(key)
    }

    /// Registered keys, sorted
    pub fn keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.senders.keys().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }

    /// Pick the sender for a row
    ///
    /// Priority: `meta.sender`, then the row's collection, then
    /// [`AUTO_SENDER`], then [`JSON_SENDER`]. Returns the key that matched.
    pub fn resolve<'a>(&self, row: &'a QueuedMutation) -> Option<(&'a str, Arc<dyn Sender>)> {
        let candidates = [
            row.meta.sender.as_deref(),
            Some(row.collection.as_str()),
            Some(AUTO_SENDER),
            Some(JSON_SENDER),
        ];

        candidates
            .into_iter()
            .flatten()
            .find_map(|key| self.get(key).map(|sender| (key, sender)))
    }
}
