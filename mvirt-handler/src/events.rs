//! Lifecycle events and the sinks that record them.
//!
//! Recording is best-effort: the manager logs sink failures and carries on.

use std::fmt;
use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::spec::VmIdentity;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to encode event: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("event queue full (capacity {0})")]
    Full(usize),

    #[error("sink unavailable: {0}")]
    Unavailable(String),
}

/// Lifecycle transitions recorded after a successful hypervisor operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LifecycleEvent {
    Created,
    Started,
    Resumed,
    Stopped,
    Deleted,
}

impl LifecycleEvent {
    pub fn message(&self) -> &'static str {
        match self {
            LifecycleEvent::Created => "VM defined",
            LifecycleEvent::Started => "VM started",
            LifecycleEvent::Resumed => "VM resumed",
            LifecycleEvent::Stopped => "VM stopped",
            LifecycleEvent::Deleted => "VM undefined",
        }
    }
}

impl fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleEvent::Created => "Created",
            LifecycleEvent::Started => "Started",
            LifecycleEvent::Resumed => "Resumed",
            LifecycleEvent::Stopped => "Stopped",
            LifecycleEvent::Deleted => "Deleted",
        };
        f.write_str(name)
    }
}

/// A recorded event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub identity: VmIdentity,
    pub kind: LifecycleEvent,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl Event {
    pub fn new(identity: &VmIdentity, kind: LifecycleEvent) -> Self {
        Self {
            identity: identity.clone(),
            kind,
            message: kind.message().to_string(),
            timestamp: Utc::now(),
        }
    }
}

/// Destination for lifecycle events, keyed by VM identity.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn record(&self, identity: &VmIdentity, kind: LifecycleEvent) -> Result<(), SinkError>;
}

/// Writes events to the `audit` tracing target.
#[derive(Debug, Default)]
pub struct TracingSink;

impl TracingSink {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl EventSink for TracingSink {
    async fn record(&self, identity: &VmIdentity, kind: LifecycleEvent) -> Result<(), SinkError> {
        tracing::info!(target: "audit", vm = %identity, event = %kind, "{}", kind.message());
        Ok(())
    }
}

/// Appends events as JSON lines to a file.
pub struct JsonlSink {
    path: PathBuf,
    // Serializes appends so concurrent records never interleave lines
    lock: Mutex<()>,
}

impl JsonlSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }
}

#[async_trait]
impl EventSink for JsonlSink {
    async fn record(&self, identity: &VmIdentity, kind: LifecycleEvent) -> Result<(), SinkError> {
        let mut line = serde_json::to_string(&Event::new(identity, kind))?;
        line.push('\n');

        let _guard = self.lock.lock().await;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}
