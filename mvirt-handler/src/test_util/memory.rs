//! In-process hypervisor with libvirt lifecycle rules.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::hypervisor::{Connection, Domain, DomainState, HypervisorError, Operation};

/// A hypervisor call as seen by the simulator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub op: Operation,
    pub name: String,
}

struct DomainRecord {
    state: DomainState,
    document: Vec<u8>,
}

#[derive(Default)]
struct Inner {
    domains: HashMap<String, DomainRecord>,
    calls: Vec<Call>,
    failures: HashSet<Operation>,
}

impl Inner {
    /// Journal the call and apply injected failures.
    fn enter(&mut self, op: Operation, name: &str) -> Result<(), HypervisorError> {
        self.calls.push(Call {
            op,
            name: name.to_string(),
        });
        if self.failures.contains(&op) {
            return Err(HypervisorError::Operation(format!(
                "injected {} failure for {}",
                op, name
            )));
        }
        Ok(())
    }

    fn record_mut(&mut self, name: &str) -> Result<&mut DomainRecord, HypervisorError> {
        self.domains
            .get_mut(name)
            .ok_or_else(|| HypervisorError::NotFound(name.to_string()))
    }
}

/// Simulated hypervisor connection.
///
/// Clones share the same domain table and call journal.
#[derive(Clone, Default)]
pub struct MemoryConnection {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryConnection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a domain in the given state.
    pub async fn insert(&self, name: &str, state: DomainState) {
        let mut inner = self.inner.lock().await;
        inner.domains.insert(
            name.to_string(),
            DomainRecord {
                state,
                document: Vec::new(),
            },
        );
    }

    pub async fn set_state(&self, name: &str, state: DomainState) {
        if let Some(record) = self.inner.lock().await.domains.get_mut(name) {
            record.state = state;
        }
    }

    pub async fn state_of(&self, name: &str) -> Option<DomainState> {
        let inner = self.inner.lock().await;
        inner.domains.get(name).map(|r| r.state.clone())
    }

    pub async fn document_of(&self, name: &str) -> Option<Vec<u8>> {
        let inner = self.inner.lock().await;
        inner.domains.get(name).map(|r| r.document.clone())
    }

    pub async fn is_defined(&self, name: &str) -> bool {
        self.inner.lock().await.domains.contains_key(name)
    }

    /// Every call issued so far, in order.
    pub async fn calls(&self) -> Vec<Call> {
        self.inner.lock().await.calls.clone()
    }

    /// Operations issued so far, in order.
    pub async fn ops(&self) -> Vec<Operation> {
        self.inner.lock().await.calls.iter().map(|c| c.op).collect()
    }

    pub async fn clear_calls(&self) {
        self.inner.lock().await.calls.clear();
    }

    /// Make every following `op` fail until [`heal`](Self::heal) is called.
    pub async fn fail(&self, op: Operation) {
        self.inner.lock().await.failures.insert(op);
    }

    pub async fn heal(&self, op: Operation) {
        self.inner.lock().await.failures.remove(&op);
    }

    fn handle(&self, name: String) -> Box<dyn Domain> {
        Box::new(MemoryDomain {
            name,
            inner: Arc::clone(&self.inner),
        })
    }
}

#[async_trait]
impl Connection for MemoryConnection {
    async fn lookup(&self, name: &str) -> Result<Box<dyn Domain>, HypervisorError> {
        let mut inner = self.inner.lock().await;
        inner.enter(Operation::Lookup, name)?;
        if !inner.domains.contains_key(name) {
            return Err(HypervisorError::NotFound(name.to_string()));
        }
        Ok(self.handle(name.to_string()))
    }

    async fn define(&self, document: &[u8]) -> Result<Box<dyn Domain>, HypervisorError> {
        let name = domain_name(document).unwrap_or_default();
        let mut inner = self.inner.lock().await;
        inner.enter(Operation::Define, &name)?;
        if name.is_empty() {
            return Err(HypervisorError::Operation(
                "definition has no <name> element".into(),
            ));
        }

        // Redefining keeps the runtime state, like libvirt does
        inner
            .domains
            .entry(name.clone())
            .and_modify(|r| r.document = document.to_vec())
            .or_insert_with(|| DomainRecord {
                state: DomainState::Shutoff,
                document: document.to_vec(),
            });
        Ok(self.handle(name))
    }
}

struct MemoryDomain {
    name: String,
    inner: Arc<Mutex<Inner>>,
}

impl MemoryDomain {
    /// Apply a state transition if `allowed` accepts the current state.
    async fn transition(
        &self,
        op: Operation,
        allowed: fn(&DomainState) -> bool,
        next: DomainState,
    ) -> Result<(), HypervisorError> {
        let mut inner = self.inner.lock().await;
        inner.enter(op, &self.name)?;
        let record = inner.record_mut(&self.name)?;
        if !allowed(&record.state) {
            return Err(HypervisorError::Operation(format!(
                "cannot {} domain {} in state {}",
                op, self.name, record.state
            )));
        }
        record.state = next;
        Ok(())
    }
}

#[async_trait]
impl Domain for MemoryDomain {
    fn name(&self) -> &str {
        &self.name
    }

    async fn state(&self) -> Result<DomainState, HypervisorError> {
        let mut inner = self.inner.lock().await;
        inner.enter(Operation::GetState, &self.name)?;
        Ok(inner.record_mut(&self.name)?.state.clone())
    }

    async fn start(&self) -> Result<(), HypervisorError> {
        self.transition(Operation::Start, |s| !s.is_active(), DomainState::Running)
            .await
    }

    async fn resume(&self) -> Result<(), HypervisorError> {
        self.transition(
            Operation::Resume,
            |s| *s == DomainState::Paused,
            DomainState::Running,
        )
        .await
    }

    async fn destroy(&self) -> Result<(), HypervisorError> {
        self.transition(Operation::Destroy, DomainState::is_active, DomainState::Shutoff)
            .await
    }

    async fn undefine(&self) -> Result<(), HypervisorError> {
        let mut inner = self.inner.lock().await;
        inner.enter(Operation::Undefine, &self.name)?;
        let record = inner.record_mut(&self.name)?;
        if record.state.is_active() {
            return Err(HypervisorError::Operation(format!(
                "cannot undefine active domain {}",
                self.name
            )));
        }
        inner.domains.remove(&self.name);
        Ok(())
    }
}

/// Content of the first `<name>` element.
fn domain_name(document: &[u8]) -> Option<String> {
    let text = std::str::from_utf8(document).ok()?;
    let start = text.find("<name>")? + "<name>".len();
    let end = start + text[start..].find("</name>")?;
    Some(text[start..end].trim().to_string())
}
