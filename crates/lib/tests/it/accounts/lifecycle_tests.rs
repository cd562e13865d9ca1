//! Register → verify → unregister scenarios: callback dispatch, TTL
//! promotion, compensation, idempotence, and concurrent registration.

use std::sync::Arc;
use std::time::Duration;

use banter::accounts::callbacks::CallbackDispatcher;
use banter::accounts::{AccountError, AccountManager};
use banter::session::Session;
use banter::store::{keys, Store, StoreError};

use crate::helpers::*;

fn account_keys(folded: &str) -> Vec<String> {
    vec![
        keys::exists(folded),
        keys::verified(folded),
        keys::callback(folded),
        keys::name(folded),
        keys::registered_time(folded),
        keys::credentials(folded),
    ]
}

#[test]
fn test_register_verify_round_trip_over_mailto() {
    let mut config = test_config();
    config.registration.verify_timeout_secs = 120;
    let (manager, store, mailer) = setup_manager_with_config(config);

    let alice = TestSession::new(1, "alice");
    manager
        .register(&as_dyn(&alice), "alice", "mailto", "a@x.example", "hunter2", "")
        .expect("registration failed");

    // exactly one dispatch, carrying a 32-hex-character code
    let sent = mailer.sent.lock().unwrap().clone();
    assert_eq!(sent.len(), 1);
    let code = extract_code(&sent[0]);
    assert_eq!(code.len(), 32);
    assert!(code.chars().all(|c| c.is_ascii_hexdigit()));

    // provisional record, everything under TTL
    store
        .view::<_, StoreError, _>(|tx| {
            assert!(tx.contains(&keys::exists("alice")));
            assert!(tx.has_ttl(&keys::exists("alice")));
            assert!(tx.has_ttl(&keys::credentials("alice")));
            assert!(!tx.contains(&keys::verified("alice")));
            Ok(())
        })
        .unwrap();

    // a wrong code is rejected, the right one verifies and promotes
    let wrong = "0".repeat(32);
    assert!(matches!(
        manager.verify(&as_dyn(&alice), "alice", &wrong),
        Err(AccountError::InvalidCode)
    ));
    manager
        .verify(&as_dyn(&alice), "alice", &code)
        .expect("verification failed");

    store
        .view::<_, StoreError, _>(|tx| {
            for key in account_keys("alice") {
                if tx.contains(&key) {
                    assert!(!tx.has_ttl(&key), "{key} still carries a TTL");
                }
            }
            assert!(tx.contains(&keys::verified("alice")));
            assert!(!tx.contains(&keys::verification_code("alice")));
            Ok(())
        })
        .unwrap();

    assert_eq!(manager.nick_to_account("alice"), "alice");
    assert_eq!(alice.account(), "alice");

    // verifying twice is a distinct error
    assert!(matches!(
        manager.verify(&as_dyn(&alice), "alice", &code),
        Err(AccountError::AlreadyVerified)
    ));
}

#[test]
fn test_register_rejects_bad_names() {
    let (manager, _store, _mailer) = setup_manager();
    let session = TestSession::new(1, "x");

    for bad in ["", "*", "bad name", "nick!user"] {
        assert!(matches!(
            manager.register(&as_dyn(&session), bad, "none", "", "", ""),
            Err(AccountError::CreationFailed)
        ));
    }

    // the guest rename prefix is reserved, case-insensitively
    assert!(matches!(
        manager.register(&as_dyn(&session), "Guest-17", "none", "", "", ""),
        Err(AccountError::AlreadyRegistered)
    ));
}

#[test]
fn test_register_same_name_twice() {
    let (manager, _store, _mailer) = setup_manager();
    let a = TestSession::new(1, "a");
    let b = TestSession::new(2, "b");

    manager
        .register(&as_dyn(&a), "alice", "none", "", "", "")
        .unwrap();
    assert!(matches!(
        manager.register(&as_dyn(&b), "Alice", "none", "", "", ""),
        Err(AccountError::AlreadyRegistered)
    ));
}

#[test]
fn test_register_duplicate_certfp() {
    let (manager, _store, _mailer) = setup_manager();
    let a = TestSession::new(1, "a");
    let b = TestSession::new(2, "b");

    manager
        .register(&as_dyn(&a), "alice", "none", "", "", "FP:01:02")
        .unwrap();
    assert!(matches!(
        manager.register(&as_dyn(&b), "bob", "none", "", "", "FP:01:02"),
        Err(AccountError::CertfpAlreadyExists)
    ));
}

#[test]
fn test_failed_callback_compensates_with_unregister() {
    let config = test_config();
    let store = Arc::new(Store::new());
    let dispatcher = CallbackDispatcher::new(
        "chat.example",
        config.registration.callbacks.mailto.clone(),
        Box::new(FailingMailer),
    );
    let manager = AccountManager::new(store.clone(), config, dispatcher);

    let session = TestSession::new(1, "a");
    assert!(matches!(
        manager.register(&as_dyn(&session), "alice", "mailto", "a@x.example", "pw", ""),
        Err(AccountError::CallbackFailed)
    ));

    // the record written before dispatch was rolled back
    store
        .view::<_, StoreError, _>(|tx| {
            assert!(!tx.contains(&keys::exists("alice")));
            Ok(())
        })
        .unwrap();
    assert!(matches!(
        manager.load_account("alice"),
        Err(AccountError::DoesNotExist)
    ));
}

#[test]
fn test_unregister_is_idempotent() {
    let (manager, store, _mailer) = setup_manager();
    let session = TestSession::new(1, "a");
    register_verified(&manager, &session, "alice", "hunter2", "");

    manager.unregister("alice").expect("first unregister failed");
    assert!(matches!(
        manager.unregister("alice"),
        Err(AccountError::DoesNotExist)
    ));

    store
        .view::<_, StoreError, _>(|tx| {
            for key in account_keys("alice") {
                assert!(!tx.contains(&key), "{key} survived unregistration");
            }
            Ok(())
        })
        .unwrap();
    assert_eq!(manager.nick_to_account("alice"), "");
    assert!(manager.logged_in_sessions("alice").is_empty());
}

#[test]
fn test_unregister_logs_out_sessions_and_notifies_observers() {
    let (manager, store, _mailer) = setup_manager();

    let alice_a = TestSession::new(1, "alice");
    let alice_b = TestSession::new(2, "alice2");
    let observer_a = TestSession::new(3, "watcher1");
    let observer_b = TestSession::new(4, "watcher2");
    alice_a.befriend(&observer_a);
    alice_b.befriend(&observer_b);

    register_verified(&manager, &alice_a, "alice", "hunter2", "FP:aa:bb");
    manager
        .authenticate_by_passphrase(&as_dyn(&alice_b), "alice", "hunter2")
        .unwrap();
    assert_eq!(manager.logged_in_sessions("alice").len(), 2);

    manager.unregister("alice").unwrap();

    assert_eq!(alice_a.account(), "");
    assert_eq!(alice_b.account(), "");
    assert!(manager.logged_in_sessions("alice").is_empty());
    assert_eq!(manager.nick_to_account("alice"), "");

    // cert index entry is gone
    store
        .view::<_, StoreError, _>(|tx| {
            assert!(!tx.contains(&keys::cert_to_account("FP:aa:bb")));
            Ok(())
        })
        .unwrap();

    // the notification fan-out runs detached; wait for it
    wait_for("observer notifications", || {
        observer_a.received().len() == 1 && observer_b.received().len() == 1
    });
    let (source, command, params) = observer_a.received().remove(0);
    assert_eq!(source, "alice!user@test.example");
    assert_eq!(command, "ACCOUNT");
    assert_eq!(params, vec!["*".to_string()]);
}

#[test]
fn test_concurrent_registration_of_one_name() {
    let (manager, store, _mailer) = setup_manager();
    let manager = Arc::new(manager);

    let threads: Vec<_> = (0..8u64)
        .map(|i| {
            let manager = Arc::clone(&manager);
            std::thread::spawn(move || {
                let session = TestSession::new(100 + i, "racer");
                manager.register(&as_dyn(&session), "dave", "none", "", "pw", "")
            })
        })
        .collect();

    let results: Vec<_> = threads.into_iter().map(|t| t.join().unwrap()).collect();
    let successes = results.iter().filter(|r| r.is_ok()).count();
    let conflicts = results
        .iter()
        .filter(|r| matches!(r, Err(AccountError::AlreadyRegistered)))
        .count();
    assert_eq!(successes, 1);
    assert_eq!(conflicts, 7);

    // exactly one persistent record
    let mut exists_keys = 0;
    store
        .view::<_, StoreError, _>(|tx| {
            tx.ascend_from(keys::EXISTS_PREFIX, |key, _| {
                if !key.starts_with(keys::EXISTS_PREFIX) {
                    return false;
                }
                exists_keys += 1;
                true
            });
            Ok(())
        })
        .unwrap();
    assert_eq!(exists_keys, 1);
}

#[test]
fn test_unverified_records_expire() {
    let mut config = test_config();
    config.registration.verify_timeout_secs = 1;
    let (manager, store, _mailer) = setup_manager_with_config(config);

    let session = TestSession::new(1, "a");
    manager
        .register(&as_dyn(&session), "eve", "none", "", "", "")
        .unwrap();

    store
        .view::<_, StoreError, _>(|tx| {
            assert!(tx.has_ttl(&keys::exists("eve")));
            Ok(())
        })
        .unwrap();

    std::thread::sleep(Duration::from_millis(1300));

    store
        .view::<_, StoreError, _>(|tx| {
            for key in account_keys("eve") {
                assert!(!tx.contains(&key), "{key} survived the TTL");
            }
            assert!(!tx.contains(&keys::verification_code("eve")));
            Ok(())
        })
        .unwrap();
    assert!(matches!(
        manager.load_account("eve"),
        Err(AccountError::DoesNotExist)
    ));
}

#[test]
fn test_verify_before_timeout_strips_every_ttl() {
    let mut config = test_config();
    config.registration.verify_timeout_secs = 60;
    let (manager, store, _mailer) = setup_manager_with_config(config);

    let session = TestSession::new(1, "a");
    manager
        .register(&as_dyn(&session), "frank", "none", "", "", "FP:0f")
        .unwrap();
    manager.verify(&as_dyn(&session), "frank", "").unwrap();

    store
        .view::<_, StoreError, _>(|tx| {
            for key in account_keys("frank") {
                if tx.contains(&key) {
                    assert!(!tx.has_ttl(&key), "{key} still carries a TTL");
                }
            }
            assert!(!tx.has_ttl(&keys::cert_to_account("FP:0f")));
            Ok(())
        })
        .unwrap();
}

#[test]
fn test_verify_nonexistent_account() {
    let (manager, _store, _mailer) = setup_manager();
    let session = TestSession::new(1, "a");
    assert!(matches!(
        manager.verify(&as_dyn(&session), "ghost", "code"),
        Err(AccountError::DoesNotExist)
    ));
}
