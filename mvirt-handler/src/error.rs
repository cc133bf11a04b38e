//! Domain manager error types.

use thiserror::Error;

use crate::definition::SerializeError;
use crate::hypervisor::{DomainState, HypervisorError, Operation};
use crate::spec::{SpecError, VmIdentity};

/// Errors returned by synchronize and terminate.
///
/// Every variant names the VM it concerns. Partial progress is never rolled
/// back; the next reconciliation re-observes the domain.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("invalid spec for {identity}: {source}")]
    InvalidSpec {
        identity: VmIdentity,
        #[source]
        source: SpecError,
    },

    #[error("lookup of domain {identity} failed: {source}")]
    LookupFailed {
        identity: VmIdentity,
        #[source]
        source: HypervisorError,
    },

    #[error("querying state of domain {identity} failed: {source}")]
    StateQueryFailed {
        identity: VmIdentity,
        #[source]
        source: HypervisorError,
    },

    #[error("serializing definition of {identity} failed: {source}")]
    SerializeFailed {
        identity: VmIdentity,
        #[source]
        source: SerializeError,
    },

    #[error("define of domain {identity} failed: {source}")]
    DefineFailed {
        identity: VmIdentity,
        #[source]
        source: HypervisorError,
    },

    #[error("start of domain {identity} failed: {source}")]
    StartFailed {
        identity: VmIdentity,
        #[source]
        source: HypervisorError,
    },

    #[error("resume of domain {identity} failed: {source}")]
    ResumeFailed {
        identity: VmIdentity,
        #[source]
        source: HypervisorError,
    },

    #[error("destroy of domain {identity} failed: {source}")]
    DestroyFailed {
        identity: VmIdentity,
        #[source]
        source: HypervisorError,
    },

    #[error("undefine of domain {identity} failed: {source}")]
    UndefineFailed {
        identity: VmIdentity,
        #[source]
        source: HypervisorError,
    },

    #[error("domain {identity} is in unhandled state {state}")]
    UnhandledState {
        identity: VmIdentity,
        state: DomainState,
    },
}

impl DomainError {
    /// Wrap a failed hypervisor call.
    pub(crate) fn hypervisor(op: Operation, identity: &VmIdentity, source: HypervisorError) -> Self {
        let identity = identity.clone();
        match op {
            Operation::Lookup => DomainError::LookupFailed { identity, source },
            Operation::GetState => DomainError::StateQueryFailed { identity, source },
            Operation::Define => DomainError::DefineFailed { identity, source },
            Operation::Start => DomainError::StartFailed { identity, source },
            Operation::Resume => DomainError::ResumeFailed { identity, source },
            Operation::Destroy => DomainError::DestroyFailed { identity, source },
            Operation::Undefine => DomainError::UndefineFailed { identity, source },
        }
    }

    pub fn identity(&self) -> &VmIdentity {
        match self {
            DomainError::InvalidSpec { identity, .. }
            | DomainError::LookupFailed { identity, .. }
            | DomainError::StateQueryFailed { identity, .. }
            | DomainError::SerializeFailed { identity, .. }
            | DomainError::DefineFailed { identity, .. }
            | DomainError::StartFailed { identity, .. }
            | DomainError::ResumeFailed { identity, .. }
            | DomainError::DestroyFailed { identity, .. }
            | DomainError::UndefineFailed { identity, .. }
            | DomainError::UnhandledState { identity, .. } => identity,
        }
    }

    /// The hypervisor operation that failed, if any.
    ///
    /// Serialization happens before define is issued, so it maps to
    /// [`Operation::Define`].
    pub fn operation(&self) -> Option<Operation> {
        match self {
            DomainError::LookupFailed { .. } => Some(Operation::Lookup),
            DomainError::StateQueryFailed { .. } => Some(Operation::GetState),
            DomainError::SerializeFailed { .. } | DomainError::DefineFailed { .. } => {
                Some(Operation::Define)
            }
            DomainError::StartFailed { .. } => Some(Operation::Start),
            DomainError::ResumeFailed { .. } => Some(Operation::Resume),
            DomainError::DestroyFailed { .. } => Some(Operation::Destroy),
            DomainError::UndefineFailed { .. } => Some(Operation::Undefine),
            DomainError::InvalidSpec { .. } | DomainError::UnhandledState { .. } => None,
        }
    }
}

/// Result type for domain manager operations.
pub type Result<T> = std::result::Result<T, DomainError>;
