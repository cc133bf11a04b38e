//! Test utilities for exercising the domain manager without a hypervisor.
//!
//! [`MemoryConnection`] simulates a libvirt-like hypervisor in process and
//! journals every call; [`RecordingSink`] keeps recorded events for assertions.

pub mod memory;
pub mod recorder;

pub use memory::{Call, MemoryConnection};
pub use recorder::RecordingSink;
