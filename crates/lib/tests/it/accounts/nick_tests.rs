//! Nick reservation: reserve, drop, operator drop, limits, and the
//! interaction between reservations and registration.

use banter::accounts::AccountError;

use crate::helpers::*;

#[test]
fn test_reserve_nick_blocks_registration() {
    let (manager, _store, _mailer) = setup_manager();
    let alice = TestSession::new(1, "alice");
    register_verified(&manager, &alice, "alice", "hunter2", "");

    manager
        .set_nick_reserved(&as_dyn(&alice), "ali", false, true)
        .expect("reservation failed");
    assert_eq!(manager.nick_to_account("ali"), "alice");
    assert_eq!(manager.nick_to_account("ALI"), "alice");

    // a reserved nick cannot become someone else's account
    let bob = TestSession::new(2, "bob");
    assert!(matches!(
        manager.register(&as_dyn(&bob), "ali", "none", "", "", ""),
        Err(AccountError::AlreadyRegistered)
    ));
}

#[test]
fn test_cannot_drop_primary_nick() {
    let (manager, _store, _mailer) = setup_manager();
    let alice = TestSession::new(1, "alice");
    register_verified(&manager, &alice, "alice", "hunter2", "");

    assert!(matches!(
        manager.set_nick_reserved(&as_dyn(&alice), "alice", false, false),
        Err(AccountError::CantDropPrimaryNick)
    ));
}

#[test]
fn test_reserve_requires_login() {
    let (manager, _store, _mailer) = setup_manager();
    let wanderer = TestSession::new(1, "wanderer");

    assert!(matches!(
        manager.set_nick_reserved(&as_dyn(&wanderer), "ali", false, true),
        Err(AccountError::NotLoggedIn)
    ));
}

#[test]
fn test_reserve_taken_nick() {
    let (manager, _store, _mailer) = setup_manager();
    let alice = TestSession::new(1, "alice");
    let bob = TestSession::new(2, "bob");
    register_verified(&manager, &alice, "alice", "pw", "");
    register_verified(&manager, &bob, "bob", "pw", "");

    manager
        .set_nick_reserved(&as_dyn(&alice), "ali", false, true)
        .unwrap();

    // someone else's reservation, and someone else's account name
    assert!(matches!(
        manager.set_nick_reserved(&as_dyn(&bob), "ali", false, true),
        Err(AccountError::NicknameReserved)
    ));
    assert!(matches!(
        manager.set_nick_reserved(&as_dyn(&bob), "alice", false, true),
        Err(AccountError::NicknameReserved)
    ));
    // dropping a nick reserved to someone else fails too
    assert!(matches!(
        manager.set_nick_reserved(&as_dyn(&bob), "ali", false, false),
        Err(AccountError::NicknameReserved)
    ));
}

#[test]
fn test_reserve_blocked_by_unverified_registration() {
    let (manager, _store, _mailer) = setup_manager();
    let alice = TestSession::new(1, "alice");
    let carol = TestSession::new(2, "carol");
    register_verified(&manager, &alice, "alice", "pw", "");

    // carol registered but has not verified yet; her nick is invisible in
    // the index but still cannot be poached
    manager
        .register(&as_dyn(&carol), "carol", "none", "", "pw", "")
        .unwrap();
    assert_eq!(manager.nick_to_account("carol"), "");

    assert!(matches!(
        manager.set_nick_reserved(&as_dyn(&alice), "carol", false, true),
        Err(AccountError::NicknameReserved)
    ));
}

#[test]
fn test_additional_nick_limit() {
    let mut config = test_config();
    config.nick_reservation.additional_nick_limit = 2;
    let (manager, _store, _mailer) = setup_manager_with_config(config);

    let alice = TestSession::new(1, "alice");
    register_verified(&manager, &alice, "alice", "pw", "");

    manager
        .set_nick_reserved(&as_dyn(&alice), "ali", false, true)
        .unwrap();
    manager
        .set_nick_reserved(&as_dyn(&alice), "al", false, true)
        .unwrap();
    assert!(matches!(
        manager.set_nick_reserved(&as_dyn(&alice), "a", false, true),
        Err(AccountError::TooManyNicks)
    ));
}

#[test]
fn test_drop_own_reservation() {
    let (manager, _store, _mailer) = setup_manager();
    let alice = TestSession::new(1, "alice");
    register_verified(&manager, &alice, "alice", "pw", "");

    manager
        .set_nick_reserved(&as_dyn(&alice), "ali", false, true)
        .unwrap();
    manager
        .set_nick_reserved(&as_dyn(&alice), "ali", false, false)
        .unwrap();
    assert_eq!(manager.nick_to_account("ali"), "");

    // and it can be reserved again afterwards
    manager
        .set_nick_reserved(&as_dyn(&alice), "ali", false, true)
        .unwrap();
    assert_eq!(manager.nick_to_account("ali"), "alice");
}

#[test]
fn test_operator_forced_drop() {
    let (manager, _store, _mailer) = setup_manager();
    let alice = TestSession::new(1, "alice");
    let oper = TestSession::new(2, "oper");
    register_verified(&manager, &alice, "alice", "pw", "");
    manager
        .set_nick_reserved(&as_dyn(&alice), "ali", false, true)
        .unwrap();

    // the operator is not logged in to alice's account, but sa_unreserve
    // targets whoever holds the nick
    manager
        .set_nick_reserved(&as_dyn(&oper), "ali", true, false)
        .unwrap();
    assert_eq!(manager.nick_to_account("ali"), "");

    // forced drop of an unreserved nick is a quiet no-op
    manager
        .set_nick_reserved(&as_dyn(&oper), "nobody", true, false)
        .unwrap();
}

#[test]
fn test_reservation_disabled_fails_fast() {
    let mut config = test_config();
    config.nick_reservation.enabled = false;
    let (manager, _store, _mailer) = setup_manager_with_config(config);

    let alice = TestSession::new(1, "alice");
    register_verified(&manager, &alice, "alice", "pw", "");
    assert!(matches!(
        manager.set_nick_reserved(&as_dyn(&alice), "ali", false, true),
        Err(AccountError::NickReservationFailed)
    ));
}

#[test]
fn test_nick_index_rebuild_reflects_store() {
    let (manager, store, _mailer) = setup_manager();

    let alice = TestSession::new(1, "alice");
    let bob = TestSession::new(2, "bob");
    let carol = TestSession::new(3, "carol");
    register_verified(&manager, &alice, "alice", "pw", "");
    register_verified(&manager, &bob, "bob", "pw", "");
    manager
        .set_nick_reserved(&as_dyn(&alice), "ali", false, true)
        .unwrap();
    // carol never verifies
    manager
        .register(&as_dyn(&carol), "carol", "none", "", "pw", "")
        .unwrap();

    // a fresh manager over the same store rebuilds the index from scratch
    let (rebuilt, _mailer) = manager_over_store(store, test_config());

    // every verified account reserves itself
    for account in ["alice", "bob"] {
        assert_eq!(rebuilt.nick_to_account(account), account);
    }
    assert_eq!(rebuilt.nick_to_account("ali"), "alice");
    assert_eq!(rebuilt.nick_to_account("carol"), "");

    // every index entry is justified by the referenced account's record
    for nick in ["alice", "ali", "bob"] {
        let owner = rebuilt.nick_to_account(nick);
        let account = rebuilt.load_account(&owner).unwrap();
        let folded_owner = rebuilt.nick_to_account(&owner);
        assert!(
            folded_owner == nick || account.additional_nicks.iter().any(|n| n == nick),
            "index entry {nick} -> {owner} has no justification in the store"
        );
    }
}
