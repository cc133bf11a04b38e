//! mvirt-handler - converges hypervisor domains towards their VM specs.
//!
//! The [`DomainManager`] looks up a domain by VM identity, classifies what the
//! hypervisor reports and issues the minimal set of lifecycle operations
//! (define, start, resume, destroy, undefine) to reach the desired state.
//! Every call is self-contained, so the outer reconciliation loop can invoke
//! it on every tick.
//!
//! # Example
//! ```ignore
//! use std::sync::Arc;
//! use mvirt_handler::{DomainManager, LibvirtXml, ManagerConfig, TracingSink, VmSpec, VirshConnection};
//!
//! let manager = DomainManager::new(
//!     Arc::new(VirshConnection::new(None, "/var/lib/mvirt/domains")),
//!     Arc::new(TracingSink::new()),
//!     Arc::new(LibvirtXml),
//!     ManagerConfig::default(),
//! );
//! let events = manager.synchronize(&VmSpec::new("testvm")).await?;
//! ```

pub mod definition;
pub mod error;
pub mod events;
pub mod hypervisor;
pub mod manager;
pub mod reconciler;
pub mod spec;

#[cfg(any(test, feature = "test-util"))]
pub mod test_util;

pub use definition::{DefinitionSerializer, LibvirtXml, SerializeError};
pub use error::{DomainError, Result};
pub use events::{Event, EventSink, JsonlSink, LifecycleEvent, SinkError, TracingSink};
pub use hypervisor::virsh::VirshConnection;
pub use hypervisor::{Connection, Domain, DomainState, HypervisorError, Operation, Presence};
pub use manager::{DegradedStatePolicy, DomainManager, ManagerConfig};
pub use reconciler::Reconciler;
pub use spec::{DomainDefinition, SpecError, VmIdentity, VmSpec};
