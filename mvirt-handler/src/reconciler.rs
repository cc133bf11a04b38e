//! Reconciler seam driven by the outer watch loop.

use async_trait::async_trait;

use crate::error::{DomainError, Result};
use crate::events::LifecycleEvent;
use crate::manager::DomainManager;
use crate::spec::VmSpec;

/// Trait for resource reconcilers.
#[async_trait]
pub trait Reconciler: Send + Sync {
    /// The spec type describing the desired state.
    type Spec;
    /// What a pass reports back.
    type Status;
    type Error: std::error::Error + Send + Sync + 'static;

    /// Compare desired vs actual state and take action.
    async fn reconcile(&self, spec: &Self::Spec) -> std::result::Result<Self::Status, Self::Error>;

    /// Handle resource deletion (finalization).
    async fn finalize(&self, spec: &Self::Spec) -> std::result::Result<Self::Status, Self::Error>;
}

#[async_trait]
impl Reconciler for DomainManager {
    type Spec = VmSpec;
    type Status = Vec<LifecycleEvent>;
    type Error = DomainError;

    async fn reconcile(&self, spec: &VmSpec) -> Result<Vec<LifecycleEvent>> {
        self.synchronize(spec).await
    }

    async fn finalize(&self, spec: &VmSpec) -> Result<Vec<LifecycleEvent>> {
        self.terminate(spec).await
    }
}
