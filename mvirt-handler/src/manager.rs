//! Domain manager - converges a hypervisor domain towards a VM spec.
//!
//! Each call looks the domain up once, classifies the observed state and
//! issues the operations for that state in a fixed order. Nothing is cached
//! between calls: the hypervisor's answer at the start of the call is the
//! only input besides the spec, so repeating a call is always safe. The
//! caller must serialize calls per VM identity.

use std::borrow::Cow;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::definition::DefinitionSerializer;
use crate::error::{DomainError, Result};
use crate::events::{EventSink, LifecycleEvent};
use crate::hypervisor::{Connection, Domain, DomainState, HypervisorError, Operation, Presence};
use crate::spec::{DomainDefinition, SpecError, VmIdentity, VmSpec};

/// What synchronize does with Blocked and PMSuspended domains.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DegradedStatePolicy {
    /// Leave the domain alone; it is alive enough.
    #[default]
    Leave,
    /// Destroy the domain and start it again.
    Restart,
    /// Fail with [`DomainError::UnhandledState`].
    Reject,
}

#[derive(Debug, Clone)]
pub struct ManagerConfig {
    pub degraded_policy: DegradedStatePolicy,
    /// Record `Deleted` when terminate only has to undefine a stopped domain.
    pub record_undefine_only: bool,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            degraded_policy: DegradedStatePolicy::Leave,
            record_undefine_only: true,
        }
    }
}

enum SyncAction {
    Nothing,
    Start,
    Resume,
    Restart,
}

enum TerminateAction {
    DestroyAndUndefine,
    Undefine,
}

pub struct DomainManager {
    conn: Arc<dyn Connection>,
    events: Arc<dyn EventSink>,
    serializer: Arc<dyn DefinitionSerializer>,
    config: ManagerConfig,
}

impl DomainManager {
    pub fn new(
        conn: Arc<dyn Connection>,
        events: Arc<dyn EventSink>,
        serializer: Arc<dyn DefinitionSerializer>,
        config: ManagerConfig,
    ) -> Self {
        Self {
            conn,
            events,
            serializer,
            config,
        }
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Make sure the domain for `spec` is defined and running.
    ///
    /// Returns the lifecycle events emitted by this call, in order. An empty
    /// list means the domain was already converged.
    pub async fn synchronize(&self, spec: &VmSpec) -> Result<Vec<LifecycleEvent>> {
        let identity = &spec.identity;
        spec.validate().map_err(|e| invalid(identity, e))?;
        let mut emitted = Vec::new();

        let (domain, state) = match self.observe(identity).await? {
            Some(domain) => {
                let state = self.query_state(identity, domain.as_ref()).await?;
                (domain, state)
            }
            None => {
                let document = self.serializer.serialize(&definition_of(spec)).map_err(|source| {
                    warn!(vm = %identity, error = %source, "Failed to serialize domain definition");
                    DomainError::SerializeFailed {
                        identity: identity.clone(),
                        source,
                    }
                })?;

                info!(vm = %identity, "Defining domain");
                let domain = self
                    .conn
                    .define(&document)
                    .await
                    .map_err(|e| self.failed(Operation::Define, identity, e))?;
                self.emit(identity, LifecycleEvent::Created, &mut emitted)
                    .await;

                // A freshly defined domain is not running yet
                (domain, DomainState::Shutdown)
            }
        };

        match self.sync_action(identity, &state)? {
            SyncAction::Nothing => {
                debug!(vm = %identity, %state, "Domain already converged");
            }
            SyncAction::Start => {
                info!(vm = %identity, %state, "Starting domain");
                domain
                    .start()
                    .await
                    .map_err(|e| self.failed(Operation::Start, identity, e))?;
                self.emit(identity, LifecycleEvent::Started, &mut emitted)
                    .await;
            }
            SyncAction::Resume => {
                info!(vm = %identity, "Resuming domain");
                domain
                    .resume()
                    .await
                    .map_err(|e| self.failed(Operation::Resume, identity, e))?;
                self.emit(identity, LifecycleEvent::Resumed, &mut emitted)
                    .await;
            }
            SyncAction::Restart => {
                info!(vm = %identity, %state, "Restarting domain");
                domain
                    .destroy()
                    .await
                    .map_err(|e| self.failed(Operation::Destroy, identity, e))?;
                self.emit(identity, LifecycleEvent::Stopped, &mut emitted)
                    .await;
                domain
                    .start()
                    .await
                    .map_err(|e| self.failed(Operation::Start, identity, e))?;
                self.emit(identity, LifecycleEvent::Started, &mut emitted)
                    .await;
            }
        }

        Ok(emitted)
    }

    /// Make sure no domain for `spec` remains defined.
    ///
    /// Returns the lifecycle events emitted by this call, in order.
    pub async fn terminate(&self, spec: &VmSpec) -> Result<Vec<LifecycleEvent>> {
        let identity = &spec.identity;
        // The definition is never used here, only the lookup name matters
        identity.validate().map_err(|e| invalid(identity, e))?;
        let mut emitted = Vec::new();

        let Some(domain) = self.observe(identity).await? else {
            debug!(vm = %identity, "Domain already absent");
            return Ok(emitted);
        };
        let state = self.query_state(identity, domain.as_ref()).await?;

        match terminate_action(identity, &state)? {
            TerminateAction::DestroyAndUndefine => {
                info!(vm = %identity, %state, "Destroying domain");
                domain
                    .destroy()
                    .await
                    .map_err(|e| self.failed(Operation::Destroy, identity, e))?;
                self.emit(identity, LifecycleEvent::Stopped, &mut emitted)
                    .await;

                self.undefine(identity, domain.as_ref()).await?;
                self.emit(identity, LifecycleEvent::Deleted, &mut emitted)
                    .await;
            }
            TerminateAction::Undefine => {
                self.undefine(identity, domain.as_ref()).await?;
                if self.config.record_undefine_only {
                    self.emit(identity, LifecycleEvent::Deleted, &mut emitted)
                        .await;
                }
            }
        }

        Ok(emitted)
    }

    /// Resolve the domain. `None` means the hypervisor has no such domain.
    async fn observe(&self, identity: &VmIdentity) -> Result<Option<Box<dyn Domain>>> {
        match Presence::observe(self.conn.as_ref(), identity.domain_name()).await {
            Presence::Present(domain) => Ok(Some(domain)),
            Presence::Absent => Ok(None),
            Presence::LookupFailed(e) => Err(self.failed(Operation::Lookup, identity, e)),
        }
    }

    async fn query_state(&self, identity: &VmIdentity, domain: &dyn Domain) -> Result<DomainState> {
        domain
            .state()
            .await
            .map_err(|e| self.failed(Operation::GetState, identity, e))
    }

    async fn undefine(&self, identity: &VmIdentity, domain: &dyn Domain) -> Result<()> {
        info!(vm = %identity, "Undefining domain");
        domain
            .undefine()
            .await
            .map_err(|e| self.failed(Operation::Undefine, identity, e))
    }

    fn sync_action(&self, identity: &VmIdentity, state: &DomainState) -> Result<SyncAction> {
        match state {
            DomainState::Running => Ok(SyncAction::Nothing),
            DomainState::Paused => Ok(SyncAction::Resume),
            DomainState::Crashed
            | DomainState::Shutdown
            | DomainState::Shutoff
            | DomainState::NoState => Ok(SyncAction::Start),
            DomainState::Blocked | DomainState::PmSuspended => match self.config.degraded_policy
            {
                DegradedStatePolicy::Leave => Ok(SyncAction::Nothing),
                DegradedStatePolicy::Restart => Ok(SyncAction::Restart),
                DegradedStatePolicy::Reject => Err(unhandled(identity, state)),
            },
            DomainState::Unrecognized(_) => Err(unhandled(identity, state)),
        }
    }

    /// Record an event. Sink failures are logged and otherwise ignored.
    async fn emit(
        &self,
        identity: &VmIdentity,
        kind: LifecycleEvent,
        emitted: &mut Vec<LifecycleEvent>,
    ) {
        emitted.push(kind);
        if let Err(e) = self.events.record(identity, kind).await {
            warn!(vm = %identity, event = %kind, error = %e, "Failed to record lifecycle event");
        }
    }

    fn failed(&self, op: Operation, identity: &VmIdentity, source: HypervisorError) -> DomainError {
        warn!(vm = %identity, %op, error = %source, "Hypervisor operation failed");
        DomainError::hypervisor(op, identity, source)
    }
}

fn terminate_action(identity: &VmIdentity, state: &DomainState) -> Result<TerminateAction> {
    match state {
        // Undefine requires the domain not to be running
        DomainState::Running
        | DomainState::Paused
        | DomainState::Blocked
        | DomainState::PmSuspended => Ok(TerminateAction::DestroyAndUndefine),
        DomainState::Crashed
        | DomainState::Shutdown
        | DomainState::Shutoff
        | DomainState::NoState => Ok(TerminateAction::Undefine),
        DomainState::Unrecognized(_) => Err(unhandled(identity, state)),
    }
}

/// The definition to hand to define, named after the VM when left unnamed.
fn definition_of(spec: &VmSpec) -> Cow<'_, DomainDefinition> {
    if spec.definition.name.is_empty() {
        let mut definition = spec.definition.clone();
        definition.name = spec.identity.domain_name().to_string();
        Cow::Owned(definition)
    } else {
        Cow::Borrowed(&spec.definition)
    }
}

fn invalid(identity: &VmIdentity, source: SpecError) -> DomainError {
    warn!(vm = %identity, error = %source, "Rejecting invalid spec");
    DomainError::InvalidSpec {
        identity: identity.clone(),
        source,
    }
}

fn unhandled(identity: &VmIdentity, state: &DomainState) -> DomainError {
    warn!(vm = %identity, %state, "No action defined for domain state");
    DomainError::UnhandledState {
        identity: identity.clone(),
        state: state.clone(),
    }
}
