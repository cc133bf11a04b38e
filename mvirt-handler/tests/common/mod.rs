//! Shared fixtures for domain manager integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use mvirt_handler::test_util::{MemoryConnection, RecordingSink};
use mvirt_handler::{DomainManager, LibvirtXml, ManagerConfig};

pub struct Harness {
    pub manager: DomainManager,
    pub conn: MemoryConnection,
    pub sink: Arc<RecordingSink>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(ManagerConfig::default())
    }

    pub fn with_config(config: ManagerConfig) -> Self {
        let conn = MemoryConnection::new();
        let sink = Arc::new(RecordingSink::default());
        let manager = DomainManager::new(
            Arc::new(conn.clone()),
            sink.clone(),
            Arc::new(LibvirtXml),
            config,
        );
        Self {
            manager,
            conn,
            sink,
        }
    }
}
