//! End-to-end reconciliation behaviour over the in-memory store.

mod common;

use common::{account, policy, Harness, PLACEHOLDER_DOMAIN};
use labsync_core::DirectoryRecord;
use labsync_db::{IdentityRole, SyncRunStatus};
use labsync_reconcile::{ReconcileConfig, SyncError, SyncField};

#[tokio::test]
async fn test_local_email_survives_and_empty_phone_is_filled() {
    let harness = Harness::new(vec![DirectoryRecord::new("u1")]);
    harness.coordinator.run_full_sync().await.unwrap();

    let id = harness.identity_id("u1").await;
    harness
        .store
        .edit_identity(id, |i| {
            i.email = Some("alice@dept.edu".to_string());
            i.phone = Some(String::new());
        })
        .await;

    harness
        .source
        .replace(vec![DirectoryRecord::new("u1")
            .with_email("alice@ldap-system.local")
            .with_phone("555-0100")
            .with_home_path("/home/u1")])
        .await;
    let run = harness.coordinator.run_full_sync().await.unwrap();

    let identity = harness.identity("u1").await;
    assert_eq!(identity.email.as_deref(), Some("alice@dept.edu"));
    assert_eq!(identity.phone.as_deref(), Some("555-0100"));
    assert_eq!(identity.home_path.as_deref(), Some("/home/u1"));
    assert_eq!(run.counters.updated, 1);
}

#[tokio::test]
async fn test_second_pass_is_a_no_op() {
    let harness = Harness::new(vec![account("u1"), account("u2"), account("u3")]);

    let first = harness.coordinator.run_full_sync().await.unwrap();
    assert_eq!(first.status, SyncRunStatus::Completed);
    assert_eq!(first.counters.records_seen, 3);
    assert_eq!(first.counters.created, 3);

    let before = harness.store.identities().await;
    let second = harness.coordinator.run_full_sync().await.unwrap();
    assert_eq!(second.counters.unchanged, 3);
    assert_eq!(second.counters.touched(), 0);

    let after = harness.store.identities().await;
    assert_eq!(before.len(), after.len());
    for (b, a) in before.iter().zip(after.iter()) {
        assert_eq!(b.home_path, a.home_path);
        assert_eq!(b.display_name, a.display_name);
        assert_eq!(b.role, a.role);
        assert_eq!(b.is_active, a.is_active);
    }
}

#[tokio::test]
async fn test_protected_fields_never_overwritten() {
    let harness = Harness::new(vec![account("u1")]);
    harness.coordinator.run_full_sync().await.unwrap();

    let id = harness.identity_id("u1").await;
    harness
        .store
        .edit_identity(id, |i| {
            i.display_name = Some("Dr. U. One".to_string());
            i.phone = Some("555-1234".to_string());
        })
        .await;

    harness
        .source
        .replace(vec![account("u1")
            .with_display_name("u one")
            .with_phone("555-9999")
            .with_email("u1@dept.edu")])
        .await;
    harness.coordinator.run_full_sync().await.unwrap();

    let identity = harness.identity("u1").await;
    assert_eq!(identity.display_name.as_deref(), Some("Dr. U. One"));
    assert_eq!(identity.phone.as_deref(), Some("555-1234"));
    // Email was empty locally, so the directory value is taken.
    assert_eq!(identity.email.as_deref(), Some("u1@dept.edu"));
}

#[tokio::test]
async fn test_directory_owned_fields_always_follow_directory() {
    let harness = Harness::new(vec![account("u1")]);
    harness.coordinator.run_full_sync().await.unwrap();

    let id = harness.identity_id("u1").await;
    harness
        .store
        .edit_identity(id, |i| {
            i.home_path = Some("/local/override".to_string());
            i.login_shell = Some("/bin/zsh".to_string());
        })
        .await;

    harness
        .source
        .replace(vec![account("u1").with_uid_number("2001")])
        .await;
    harness.coordinator.run_full_sync().await.unwrap();

    let identity = harness.identity("u1").await;
    assert_eq!(identity.home_path.as_deref(), Some("/home/u1"));
    assert_eq!(identity.login_shell.as_deref(), Some("/bin/bash"));
    assert_eq!(identity.uid_number, Some(2001));
}

#[tokio::test]
async fn test_placeholder_email_is_replaced_by_directory_value() {
    let harness = Harness::new(vec![account("u1")]);
    harness.coordinator.run_full_sync().await.unwrap();

    let id = harness.identity_id("u1").await;
    harness
        .store
        .edit_identity(id, |i| {
            i.email = Some(format!("u1@{PLACEHOLDER_DOMAIN}"));
        })
        .await;

    harness
        .source
        .replace(vec![account("u1").with_email("u1@dept.edu")])
        .await;
    harness.coordinator.run_full_sync().await.unwrap();

    assert_eq!(
        harness.identity("u1").await.email.as_deref(),
        Some("u1@dept.edu")
    );
}

#[tokio::test]
async fn test_seeded_placeholder_email() {
    let harness = Harness::with_config(
        vec![account("u1"), account("u2").with_email("u2@dept.edu")],
        policy().with_seeding(true),
        ReconcileConfig::default(),
    );
    harness.coordinator.run_full_sync().await.unwrap();

    assert_eq!(
        harness.identity("u1").await.email.as_deref(),
        Some("u1@ldap-system.local")
    );
    assert_eq!(
        harness.identity("u2").await.email.as_deref(),
        Some("u2@dept.edu")
    );

    // The seed is not a local value, so the directory may replace it.
    let protected = harness.coordinator.get_protected_fields("u1").await.unwrap();
    assert!(!protected.contains(SyncField::Email));
}

#[tokio::test]
async fn test_get_protected_fields() {
    let harness = Harness::new(vec![account("pi"), account("s1")]);
    harness.coordinator.run_full_sync().await.unwrap();
    let pi = harness.make_pi("pi").await;
    harness.make_student("s1", pi).await;

    let pi_fields = harness.coordinator.get_protected_fields("pi").await.unwrap();
    assert!(pi_fields.contains(SyncField::DisplayName));
    assert!(pi_fields.contains(SyncField::Role));
    assert!(pi_fields.contains(SyncField::Department));
    assert!(pi_fields.contains(SyncField::LabName));
    assert!(!pi_fields.contains(SyncField::Email));
    assert!(pi_fields.iter().all(SyncField::is_locally_owned));

    let student_fields = harness.coordinator.get_protected_fields("s1").await.unwrap();
    assert!(student_fields.contains(SyncField::AcademicProgram));
    assert!(student_fields.contains(SyncField::EnrollmentStatus));
    assert!(!student_fields.contains(SyncField::Department));

    let err = harness
        .coordinator
        .get_protected_fields("nobody")
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::IdentityNotFound { .. }));
}

#[tokio::test]
async fn test_full_sync_deactivates_missing_identities() {
    let harness = Harness::new(vec![account("u1"), account("u2")]);
    harness.coordinator.run_full_sync().await.unwrap();

    harness.source.replace(vec![account("u1")]).await;
    let run = harness.coordinator.run_full_sync().await.unwrap();

    assert_eq!(run.counters.deactivated, 1);
    assert!(harness.identity("u1").await.is_active);
    let gone = harness.identity("u2").await;
    assert!(!gone.is_active);
    assert!(!gone.present_in_last_snapshot);
}

#[tokio::test]
async fn test_empty_full_snapshot_deactivates_everyone() {
    let harness = Harness::new(vec![account("u1"), account("u2")]);
    harness.coordinator.run_full_sync().await.unwrap();

    harness.source.replace(Vec::new()).await;
    let run = harness.coordinator.run_full_sync().await.unwrap();

    assert_eq!(run.counters.deactivated, 2);
    assert!(harness
        .store
        .identities()
        .await
        .iter()
        .all(|i| !i.is_active));
}

#[tokio::test]
async fn test_incremental_sync_never_deactivates() {
    let harness = Harness::new(vec![account("u1"), account("u2")]);
    harness.coordinator.run_full_sync().await.unwrap();

    harness
        .source
        .replace(vec![account("u1").with_login_shell("/bin/zsh")])
        .await;
    let since = harness.coordinator.incremental_baseline().await.unwrap();
    let run = harness.coordinator.run_incremental_sync(since).await.unwrap();

    assert_eq!(run.counters.deactivated, 0);
    assert_eq!(run.counters.updated, 1);
    assert!(harness.identity("u2").await.is_active);
    assert_eq!(
        harness.identity("u1").await.login_shell.as_deref(),
        Some("/bin/zsh")
    );
}

#[tokio::test]
async fn test_reactivation_keeps_role_and_profile() {
    let harness = Harness::new(vec![account("pi"), account("s1")]);
    harness.coordinator.run_full_sync().await.unwrap();
    let pi = harness.make_pi("pi").await;
    let student = harness.make_student("s1", pi).await;

    harness.source.replace(vec![account("pi")]).await;
    harness.coordinator.run_full_sync().await.unwrap();
    let deactivated = harness.identity("s1").await;
    assert!(!deactivated.is_active);
    assert_eq!(deactivated.role, IdentityRole::Student);
    assert_eq!(harness.store.student_profiles().await.len(), 1);

    harness
        .source
        .replace(vec![account("pi"), account("s1")])
        .await;
    let run = harness.coordinator.run_full_sync().await.unwrap();
    assert_eq!(run.counters.reactivated, 1);
    assert_eq!(run.counters.created, 0);

    let reactivated = harness.identity("s1").await;
    assert_eq!(reactivated.identity_id(), student);
    assert!(reactivated.is_active);
    assert_eq!(reactivated.role, IdentityRole::Student);

    let profiles = harness.store.student_profiles().await;
    assert_eq!(profiles.len(), 1);
    assert_eq!(profiles[0].identity_id, student.into_uuid());
    assert_eq!(
        harness
            .store
            .identities()
            .await
            .iter()
            .filter(|i| i.external_id == "s1")
            .count(),
        1
    );
}

#[tokio::test]
async fn test_directory_never_changes_role() {
    let harness = Harness::new(vec![account("pi")]);
    harness.coordinator.run_full_sync().await.unwrap();
    harness.make_pi("pi").await;

    harness
        .source
        .replace(vec![account("pi").with_home_path("/srv/pi")])
        .await;
    harness.coordinator.run_full_sync().await.unwrap();

    let identity = harness.identity("pi").await;
    assert_eq!(identity.role, IdentityRole::Pi);
    assert_eq!(identity.home_path.as_deref(), Some("/srv/pi"));
    assert_eq!(harness.store.pi_profiles().await.len(), 1);
}
