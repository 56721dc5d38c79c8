//! Verification Code Integration Tests
//!
//! Code lifecycle against the file-backed document store.

use chrono::{Duration, TimeZone, Utc};
use gatebot::codes::CodeManager;
use gatebot::store::Documents;
use gatebot::users::{Sender, UserDirectory};
use tempfile::TempDir;

fn create_manager(code: &'static str) -> (CodeManager, Documents, TempDir) {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let docs = Documents::open(temp_dir.path());
    let manager = CodeManager::new(docs.clone()).with_generator(move || code.to_string());
    (manager, docs, temp_dir)
}

#[test]
fn test_code_lifecycle() {
    let (manager, docs, _temp) = create_manager("482913");
    docs.update_settings(|s| s.code_expiry_minutes = 1);
    let t0 = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();

    let issued = manager.issue_at(42, Some("alice"), t0).unwrap();
    assert_eq!(issued.code, "482913");
    assert_eq!(issued.record.user_id, 42);
    assert_eq!(issued.record.expires_at, t0 + Duration::minutes(1));
    assert!(!issued.record.used);

    // Immediate redeem
    let record = manager.redeem_at("482913", t0).unwrap();
    assert!(record.used);
    assert_eq!(record.used_at, Some(t0));

    // Single use
    assert!(manager.redeem_at("482913", t0 + Duration::seconds(10)).is_none());

    // Used but unexpired codes survive the sweep
    assert_eq!(manager.sweep_at(t0 + Duration::seconds(30)), 0);
    assert!(manager.get("482913").is_some_and(|r| r.used));
}

#[test]
fn test_expired_code_rejected_and_swept() {
    let (manager, _docs, _temp) = create_manager("482913");
    let t0 = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
    manager.issue_at(42, None, t0).unwrap();

    let later = t0 + Duration::minutes(11);
    assert!(manager.redeem_at("482913", later).is_none());
    assert_eq!(manager.stats_at(later).active, 0);

    assert_eq!(manager.sweep_at(later), 1);
    assert!(manager.get("482913").is_none());
}

#[test]
fn test_codes_survive_reopen() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let code = {
        let manager = CodeManager::new(Documents::open(temp_dir.path()));
        manager.issue(7, Some("bob")).unwrap().code
    };

    let reopened = CodeManager::new(Documents::open(temp_dir.path()));
    let record = reopened.redeem(&code).expect("code persisted");
    assert_eq!(record.user_id, 7);
    assert_eq!(record.telegram_username.as_deref(), Some("bob"));
}

#[test]
fn test_redeem_verifies_known_user() {
    let (manager, docs, _temp) = create_manager("100200");
    let users = UserDirectory::new(docs);
    users.touch(&Sender::new(42, "Alice").with_username("alice"));

    let issued = manager.issue(42, Some("alice")).unwrap();
    let record = manager.redeem(&issued.code).unwrap();
    assert!(users.mark_verified(record.user_id));
    assert!(users.is_verified(42));
    assert!(!users.mark_verified(999));
}

#[test]
fn test_expiry_follows_settings() {
    let (manager, docs, _temp) = create_manager("555555");
    docs.update_settings(|s| s.code_expiry_minutes = 30);
    let t0 = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();

    let issued = manager.issue_at(1, None, t0).unwrap();
    assert_eq!(issued.record.expires_at, t0 + Duration::minutes(30));
    assert!(manager.redeem_at(&issued.code, t0 + Duration::minutes(25)).is_some());
}
