//! Hypervisor capabilities consumed by the domain manager.
//!
//! A [`Connection`] resolves and defines domains; a [`Domain`] handle drives a
//! single domain through its lifecycle. Both are narrow traits so backends can
//! be swapped (virsh, in-memory) without touching the reconciliation logic.

pub mod virsh;

use std::fmt;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HypervisorError {
    #[error("domain not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    Operation(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl HypervisorError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, HypervisorError::NotFound(_))
    }
}

/// Hypervisor calls issued by the manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Lookup,
    Define,
    GetState,
    Start,
    Resume,
    Destroy,
    Undefine,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::Lookup => "lookup",
            Operation::Define => "define",
            Operation::GetState => "get-state",
            Operation::Start => "start",
            Operation::Resume => "resume",
            Operation::Destroy => "destroy",
            Operation::Undefine => "undefine",
        };
        f.write_str(name)
    }
}

/// State of a domain as reported by the hypervisor at the instant of the query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DomainState {
    NoState,
    Running,
    Blocked,
    Paused,
    Shutdown,
    Shutoff,
    Crashed,
    PmSuspended,
    /// Reported by the backend but not classifiable.
    Unrecognized(String),
}

impl DomainState {
    /// Map a libvirt `virDomainState` code.
    pub fn from_code(code: i32) -> Self {
        match code {
            0 => DomainState::NoState,
            1 => DomainState::Running,
            2 => DomainState::Blocked,
            3 => DomainState::Paused,
            4 => DomainState::Shutdown,
            5 => DomainState::Shutoff,
            6 => DomainState::Crashed,
            7 => DomainState::PmSuspended,
            other => DomainState::Unrecognized(format!("state code {}", other)),
        }
    }

    /// Whether the hypervisor holds live resources for the domain.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            DomainState::Running
                | DomainState::Blocked
                | DomainState::Paused
                | DomainState::PmSuspended
        )
    }
}

impl fmt::Display for DomainState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DomainState::NoState => f.write_str("no state"),
            DomainState::Running => f.write_str("running"),
            DomainState::Blocked => f.write_str("blocked"),
            DomainState::Paused => f.write_str("paused"),
            DomainState::Shutdown => f.write_str("in shutdown"),
            DomainState::Shutoff => f.write_str("shut off"),
            DomainState::Crashed => f.write_str("crashed"),
            DomainState::PmSuspended => f.write_str("pmsuspended"),
            DomainState::Unrecognized(raw) => write!(f, "unrecognized ({})", raw),
        }
    }
}

/// Connection-level capabilities.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Resolve a domain by name. Missing domains yield [`HypervisorError::NotFound`].
    async fn lookup(&self, name: &str) -> Result<Box<dyn Domain>, HypervisorError>;

    /// Register a domain from a definition document without starting it.
    async fn define(&self, document: &[u8]) -> Result<Box<dyn Domain>, HypervisorError>;
}

/// Per-domain capabilities.
#[async_trait]
pub trait Domain: Send + Sync {
    fn name(&self) -> &str;

    async fn state(&self) -> Result<DomainState, HypervisorError>;

    async fn start(&self) -> Result<(), HypervisorError>;

    async fn resume(&self) -> Result<(), HypervisorError>;

    /// Forceful, immediate stop.
    async fn destroy(&self) -> Result<(), HypervisorError>;

    async fn undefine(&self) -> Result<(), HypervisorError>;
}

/// Outcome of resolving a domain by name.
pub enum Presence {
    Absent,
    Present(Box<dyn Domain>),
    LookupFailed(HypervisorError),
}

impl Presence {
    pub async fn observe(conn: &dyn Connection, name: &str) -> Self {
        match conn.lookup(name).await {
            Ok(domain) => Presence::Present(domain),
            Err(e) if e.is_not_found() => Presence::Absent,
            Err(e) => Presence::LookupFailed(e),
        }
    }
}

impl fmt::Debug for Presence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Presence::Absent => f.write_str("Absent"),
            Presence::Present(domain) => f.debug_tuple("Present").field(&domain.name()).finish(),
            Presence::LookupFailed(e) => f.debug_tuple("LookupFailed").field(e).finish(),
        }
    }
}
