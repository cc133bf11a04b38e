//! Failure paths: abort on the first failed operation, record nothing for it,
//! and recover on the next pass.

mod common;

use common::Harness;
use mvirt_handler::{
    DomainDefinition, DomainError, DomainState, LifecycleEvent, Operation, SpecError, VmSpec,
};

#[tokio::test]
async fn test_lookup_failure_fails_fast() {
    let h = Harness::new();
    h.conn.insert("testvm", DomainState::Shutoff).await;
    h.conn.fail(Operation::Lookup).await;

    let err = h.manager.synchronize(&VmSpec::new("testvm")).await.unwrap_err();
    assert!(matches!(err, DomainError::LookupFailed { .. }));
    assert_eq!(h.conn.ops().await, vec![Operation::Lookup]);

    let err = h.manager.terminate(&VmSpec::new("testvm")).await.unwrap_err();
    assert!(matches!(err, DomainError::LookupFailed { .. }));
    assert!(h.conn.is_defined("testvm").await);
    assert!(h.sink.events().await.is_empty());
}

#[tokio::test]
async fn test_state_query_failure_is_reported() {
    let h = Harness::new();
    h.conn.insert("testvm", DomainState::Shutoff).await;
    h.conn.fail(Operation::GetState).await;

    let err = h.manager.synchronize(&VmSpec::new("testvm")).await.unwrap_err();
    assert!(matches!(err, DomainError::StateQueryFailed { .. }));
    assert_eq!(err.operation(), Some(Operation::GetState));
}

#[tokio::test]
async fn test_define_failure_records_nothing() {
    let h = Harness::new();
    h.conn.fail(Operation::Define).await;

    let err = h.manager.synchronize(&VmSpec::new("testvm")).await.unwrap_err();

    assert!(matches!(err, DomainError::DefineFailed { .. }));
    assert_eq!(err.identity().name, "testvm");
    assert!(h.sink.events().await.is_empty());
    assert_eq!(h.conn.ops().await, vec![Operation::Lookup, Operation::Define]);
}

#[tokio::test]
async fn test_invalid_definition_is_never_defined() {
    let h = Harness::new();
    let mut spec = VmSpec::new("testvm");
    spec.definition.memory_mb = 0;

    let err = h.manager.synchronize(&spec).await.unwrap_err();

    assert!(matches!(err, DomainError::SerializeFailed { .. }));
    assert_eq!(h.conn.ops().await, vec![Operation::Lookup]);
}

#[tokio::test]
async fn test_spec_naming_another_domain_is_rejected() {
    let h = Harness::new();
    h.conn.insert("other", DomainState::Running).await;
    let mut spec = VmSpec::new("db");
    spec.definition = DomainDefinition::minimal("other");

    let err = h.manager.synchronize(&spec).await.unwrap_err();
    assert!(matches!(
        err,
        DomainError::InvalidSpec {
            source: SpecError::NameMismatch { .. },
            ..
        }
    ));

    // Repeated passes never touch the hypervisor
    assert!(h.manager.synchronize(&spec).await.is_err());
    assert!(h.conn.ops().await.is_empty());
    assert!(!h.conn.is_defined("db").await);
    assert_eq!(h.conn.state_of("other").await, Some(DomainState::Running));
}

#[tokio::test]
async fn test_start_failure_after_define_is_retried_next_pass() {
    let h = Harness::new();
    let spec = VmSpec::new("testvm");
    h.conn.fail(Operation::Start).await;

    let err = h.manager.synchronize(&spec).await.unwrap_err();
    assert!(matches!(err, DomainError::StartFailed { .. }));
    // Define is kept, only its event was recorded
    assert_eq!(h.sink.kinds().await, vec![LifecycleEvent::Created]);
    assert_eq!(h.conn.state_of("testvm").await, Some(DomainState::Shutoff));

    h.conn.heal(Operation::Start).await;
    let emitted = h.manager.synchronize(&spec).await.unwrap();

    // No second define: the domain is found and started
    assert_eq!(emitted, vec![LifecycleEvent::Started]);
    assert_eq!(
        h.sink.kinds().await,
        vec![LifecycleEvent::Created, LifecycleEvent::Started]
    );
}

#[tokio::test]
async fn test_resume_failure_is_reported() {
    let h = Harness::new();
    h.conn.insert("testvm", DomainState::Paused).await;
    h.conn.fail(Operation::Resume).await;

    let err = h.manager.synchronize(&VmSpec::new("testvm")).await.unwrap_err();

    assert!(matches!(err, DomainError::ResumeFailed { .. }));
    assert!(h.sink.events().await.is_empty());
}

#[tokio::test]
async fn test_destroy_failure_skips_undefine() {
    let h = Harness::new();
    let spec = VmSpec::new("testvm");
    h.conn.insert("testvm", DomainState::Running).await;
    h.conn.fail(Operation::Destroy).await;

    let err = h.manager.terminate(&spec).await.unwrap_err();

    assert!(matches!(err, DomainError::DestroyFailed { .. }));
    assert!(!h.conn.ops().await.contains(&Operation::Undefine));
    assert!(h.sink.events().await.is_empty());
    assert!(h.conn.is_defined("testvm").await);
}

#[tokio::test]
async fn test_undefine_failure_after_destroy_resumes_with_undefine() {
    let h = Harness::new();
    let spec = VmSpec::new("testvm");
    h.conn.insert("testvm", DomainState::Running).await;
    h.conn.fail(Operation::Undefine).await;

    let err = h.manager.terminate(&spec).await.unwrap_err();
    assert!(matches!(err, DomainError::UndefineFailed { .. }));
    assert_eq!(h.sink.kinds().await, vec![LifecycleEvent::Stopped]);

    // Next pass observes a stopped domain and only undefines
    h.conn.heal(Operation::Undefine).await;
    h.conn.clear_calls().await;
    h.manager.terminate(&spec).await.unwrap();

    assert_eq!(
        h.conn.ops().await,
        vec![Operation::Lookup, Operation::GetState, Operation::Undefine]
    );
    assert_eq!(
        h.sink.kinds().await,
        vec![LifecycleEvent::Stopped, LifecycleEvent::Deleted]
    );
    assert!(!h.conn.is_defined("testvm").await);
}

#[tokio::test]
async fn test_error_messages_name_the_vm_and_operation() {
    let h = Harness::new();
    h.conn.insert("testvm", DomainState::Shutoff).await;
    h.conn.fail(Operation::Start).await;

    let err = h.manager.synchronize(&VmSpec::new("testvm")).await.unwrap_err();

    let message = err.to_string();
    assert!(message.contains("start"));
    assert!(message.contains("default/testvm"));
}
