//! Account lifecycle orchestration.
//!
//! Everything about accounts is persistent; the store is the authoritative
//! source of truth for all account information, and anything on the heap is
//! just a cache over it.
//!
//! # Locking
//!
//! Two locks with a strict acquisition order protect coherence between the
//! store and the caches:
//!
//! * the **cache lock** (tier 2), a readers-writer lock over the nick and
//!   session indexes, held only around single lookups and mutations;
//! * the **serial update mutex** (tier 3), held by every operation that
//!   mutates both the store and the caches. While it is held, the two are
//!   in sync and cache reads are authoritative.
//!
//! A task holding tier 3 may take tier 2, never the reverse. Neither lock
//! is ever held across an external side effect: `register` releases both
//! before dispatching the verification callback.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tracing::{debug, error};

pub mod callbacks;
pub mod errors;
pub mod mechanisms;
pub mod types;

pub use errors::AccountError;
pub use types::{Account, AccountCredentials, RawAccount};

use crate::config::AccountsConfig;
use crate::names;
use crate::passwd;
use crate::session::{Capability, Session};
use crate::store::{keys, Store, StoreError, Transaction};

use callbacks::CallbackDispatcher;

/// The in-memory indexes. Both reflect only what the store justifies:
/// `nick_to_account` holds reservations of verified accounts, and
/// `account_to_sessions` holds exactly the live sessions whose account tag
/// names the entry's account.
#[derive(Default)]
struct Caches {
    nick_to_account: HashMap<String, String>,
    account_to_sessions: HashMap<String, Vec<Arc<dyn Session>>>,
}

/// Registers, verifies, and authenticates accounts, and tracks which live
/// sessions are logged in to which account.
pub struct AccountManager {
    store: Arc<Store>,
    config: AccountsConfig,
    dispatcher: CallbackDispatcher,
    /// Tier 2.
    caches: RwLock<Caches>,
    /// Tier 3.
    serial_update: Mutex<()>,
}

impl AccountManager {
    /// Create a manager over the given store and build the nick index from
    /// it.
    pub fn new(store: Arc<Store>, config: AccountsConfig, dispatcher: CallbackDispatcher) -> Self {
        let manager = Self {
            store,
            config,
            dispatcher,
            caches: RwLock::new(Caches::default()),
            serial_update: Mutex::new(()),
        };
        manager.rebuild_nick_index();
        manager
    }

    /// Rebuild `nick_to_account` from the store: every verified account
    /// reserves its own folded name plus its additional nicks. Unverified
    /// accounts are excluded so a lapsed registration cannot block a nick.
    pub fn rebuild_nick_index(&self) {
        if !self.config.nick_reservation.enabled {
            return;
        }

        let _serial = self.serial_update.lock().unwrap();

        let mut result = HashMap::new();
        let scan: Result<(), StoreError> = self.store.view(|tx| {
            let mut accounts = Vec::new();
            tx.ascend_from(keys::EXISTS_PREFIX, |key, _value| {
                if !key.starts_with(keys::EXISTS_PREFIX) {
                    return false;
                }
                accounts.push(key[keys::EXISTS_PREFIX.len()..].to_string());
                true
            });

            for folded in accounts {
                if !tx.contains(&keys::verified(&folded)) {
                    continue;
                }
                result.insert(folded.clone(), folded.clone());
                if let Ok(raw_nicks) = tx.get(&keys::additional_nicks(&folded)) {
                    for nick in types::unmarshal_nicks(&raw_nicks) {
                        result.insert(nick, folded.clone());
                    }
                }
            }
            Ok(())
        });

        match scan {
            Ok(()) => {
                let mut caches = self.caches.write().unwrap();
                caches.nick_to_account = result;
            }
            Err(err) => error!("couldn't read reserved nicks: {err}"),
        }
    }

    /// Look up the folded account a nick is reserved to, or the empty
    /// string.
    pub fn nick_to_account(&self, nick: &str) -> String {
        let folded = match names::casefold(nick) {
            Ok(folded) => folded,
            Err(_) => return String::new(),
        };

        let caches = self.caches.read().unwrap();
        caches
            .nick_to_account
            .get(&folded)
            .cloned()
            .unwrap_or_default()
    }

    /// The live sessions currently logged in to an account.
    pub fn logged_in_sessions(&self, account: &str) -> Vec<Arc<dyn Session>> {
        let folded = match names::casefold(account) {
            Ok(folded) => folded,
            Err(_) => return Vec::new(),
        };

        let caches = self.caches.read().unwrap();
        caches
            .account_to_sessions
            .get(&folded)
            .cloned()
            .unwrap_or_default()
    }

    /// Register a new account in the unverified state and dispatch its
    /// verification callback.
    ///
    /// Every persistent key is written with the configured verification
    /// TTL, so an abandoned registration is reaped by the store. When the
    /// callback cannot be delivered the freshly written record is rolled
    /// back with [`unregister`](Self::unregister) and the error reported
    /// as `CallbackFailed`.
    pub fn register(
        &self,
        _session: &Arc<dyn Session>,
        name: &str,
        callback_namespace: &str,
        callback_value: &str,
        passphrase: &str,
        certfp: &str,
    ) -> Result<(), AccountError> {
        if name.is_empty() || name == "*" {
            return Err(AccountError::CreationFailed);
        }
        let folded = names::casefold(name).map_err(|_| AccountError::CreationFailed)?;

        // can't register a guest nickname
        let rename_prefix = self.config.nick_reservation.rename_prefix.to_lowercase();
        if !rename_prefix.is_empty() && folded.starts_with(&rename_prefix) {
            return Err(AccountError::AlreadyRegistered);
        }

        // always generate a salt, even with no passphrase to hash
        let mut creds = AccountCredentials {
            passphrase_salt: passwd::new_salt(),
            ..AccountCredentials::default()
        };
        // an empty fingerprint just means no certificate is authorized
        creds.certificate = certfp.to_string();
        if !passphrase.is_empty() {
            creds.passphrase_hash =
                passwd::hash(&creds.passphrase_salt, passphrase).map_err(|err| {
                    error!("could not hash password: {err}");
                    AccountError::CreationFailed
                })?;
        }
        let cred_text = creds.encode().map_err(|err| {
            error!("could not serialize credentials: {err}");
            AccountError::CreationFailed
        })?;

        let registered_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs()
            .to_string();
        let callback_spec = format!("{callback_namespace}:{callback_value}");
        let ttl = self.config.registration.verify_timeout();

        {
            let _serial = self.serial_update.lock().unwrap();

            // can't register an account with the same name as a reserved
            // nick
            if !self.nick_to_account(&folded).is_empty() {
                return Err(AccountError::AlreadyRegistered);
            }

            self.store.update(|tx| {
                if tx.contains(&keys::exists(&folded)) {
                    return Err(AccountError::AlreadyRegistered);
                }
                if !certfp.is_empty() && tx.contains(&keys::cert_to_account(certfp)) {
                    return Err(AccountError::CertfpAlreadyExists);
                }

                tx.set(&keys::exists(&folded), "1", ttl)?;
                tx.set(&keys::name(&folded), name, ttl)?;
                tx.set(&keys::registered_time(&folded), &registered_at, ttl)?;
                tx.set(&keys::credentials(&folded), &cred_text, ttl)?;
                tx.set(&keys::callback(&folded), &callback_spec, ttl)?;
                if !certfp.is_empty() {
                    tx.set(&keys::cert_to_account(certfp), &folded, ttl)?;
                }
                Ok(())
            })?;
        }

        // The callback blocks on the network; no lock may be held here.
        match self
            .dispatcher
            .dispatch(&folded, callback_namespace, callback_value)
        {
            Ok(code) => self.store.update(|tx| {
                tx.set(&keys::verification_code(&folded), &code, ttl)?;
                Ok(())
            }),
            Err(err) => {
                error!("failed to dispatch verification callback: {err}");
                let _ = self.unregister(&folded);
                Err(AccountError::CallbackFailed)
            }
        }
    }

    /// Verify an account with the code its callback delivered, promote its
    /// records to permanent storage, and log the session in.
    ///
    /// A stored code of `""` means no code was required; any input is
    /// accepted. Otherwise the comparison runs in constant time.
    pub fn verify(
        &self,
        session: &Arc<dyn Session>,
        name: &str,
        code: &str,
    ) -> Result<(), AccountError> {
        let folded = names::casefold(name).map_err(|_| AccountError::DoesNotExist)?;

        let raw = {
            let _serial = self.serial_update.lock().unwrap();

            let raw = self.store.update(|tx| {
                let raw = load_raw_account(tx, &folded)?;
                if raw.verified {
                    return Err(AccountError::AlreadyVerified);
                }

                let stored = tx
                    .get(&keys::verification_code(&folded))
                    .map_err(|_| AccountError::InvalidCode)?;
                if !(stored.is_empty() || passwd::codes_match(code, &stored)) {
                    return Err(AccountError::InvalidCode);
                }

                tx.set(&keys::verified(&folded), "1", None)?;
                // don't need the code anymore
                tx.delete(&keys::verification_code(&folded))?;
                // re-set all other keys, removing the TTL
                tx.set(&keys::exists(&folded), "1", None)?;
                tx.set(&keys::name(&folded), &raw.name, None)?;
                tx.set(&keys::registered_time(&folded), &raw.registered_at, None)?;
                tx.set(&keys::callback(&folded), &raw.callback, None)?;
                tx.set(&keys::credentials(&folded), &raw.credentials, None)?;

                if let Ok(creds) = AccountCredentials::decode(&raw.credentials) {
                    if !creds.certificate.is_empty() {
                        tx.set(&keys::cert_to_account(&creds.certificate), &folded, None)?;
                    }
                }
                Ok(raw)
            })?;

            let mut caches = self.caches.write().unwrap();
            caches
                .nick_to_account
                .insert(folded.clone(), folded.clone());
            raw
        };

        self.login(session, &raw.name);
        Ok(())
    }

    /// Reserve a nick to the session's account, or drop a reservation.
    ///
    /// With `sa_unreserve` a service operator force-drops the reservation
    /// regardless of who holds it; dropping a nick nobody holds is a
    /// successful no-op.
    pub fn set_nick_reserved(
        &self,
        session: &Arc<dyn Session>,
        nick: &str,
        sa_unreserve: bool,
        reserve: bool,
    ) -> Result<(), AccountError> {
        let nr_config = self.config.nick_reservation.clone();
        if !nr_config.enabled || (reserve && sa_unreserve) {
            return Err(AccountError::NickReservationFailed);
        }
        let folded = names::casefold(nick).map_err(|_| AccountError::NickReservationFailed)?;

        // the caches are in sync with the store while we hold this
        let _serial = self.serial_update.lock().unwrap();

        // the affected account is usually the session's own:
        let mut account = session.account();
        if sa_unreserve {
            // unless this is a forced drop:
            account = self.nick_to_account(&folded);
            if account.is_empty() {
                // nothing to do
                return Ok(());
            }
        }
        if account.is_empty() {
            return Err(AccountError::NotLoggedIn);
        }

        let account_for_nick = self.nick_to_account(&folded);
        if reserve && !account_for_nick.is_empty() {
            return Err(AccountError::NicknameReserved);
        } else if !reserve && !sa_unreserve && account_for_nick != account {
            return Err(AccountError::NicknameReserved);
        } else if !reserve && folded == account {
            return Err(AccountError::CantDropPrimaryNick);
        }

        let nicks_key = keys::additional_nicks(&account);
        let result: Result<(), AccountError> = self.store.update(|tx| {
            if reserve {
                // unverified registrations are invisible in the nick index
                // on purpose, but their nick still cannot be reserved out
                // from under them
                if tx.contains(&keys::exists(&folded)) {
                    return Err(AccountError::NicknameReserved);
                }
            }

            let raw_nicks = match tx.get(&nicks_key) {
                Ok(raw) => raw,
                Err(err) if err.is_not_found() => String::new(),
                Err(err) => return Err(err.into()),
            };
            let mut nicks = types::unmarshal_nicks(&raw_nicks);

            if reserve {
                if nicks.len() >= nr_config.additional_nick_limit {
                    return Err(AccountError::TooManyNicks);
                }
                nicks.push(folded.clone());
            } else {
                nicks.retain(|reserved| reserved != &folded);
            }

            tx.set(&nicks_key, &types::marshal_nicks(&nicks), None)?;
            Ok(())
        });

        match result {
            Ok(()) => {}
            Err(err @ (AccountError::TooManyNicks | AccountError::NicknameReserved)) => {
                return Err(err)
            }
            Err(err) => {
                error!("nick reservation storage failure: {err}");
                return Err(AccountError::NickReservationFailed);
            }
        }

        let mut caches = self.caches.write().unwrap();
        if reserve {
            debug!(nick = folded.as_str(), account = account.as_str(), "reserved nick");
            caches.nick_to_account.insert(folded, account);
        } else {
            debug!(nick = folded.as_str(), "dropped nick reservation");
            caches.nick_to_account.remove(&folded);
        }
        Ok(())
    }

    /// Authenticate a session against an account by passphrase and log it
    /// in.
    pub fn authenticate_by_passphrase(
        &self,
        session: &Arc<dyn Session>,
        account_name: &str,
        passphrase: &str,
    ) -> Result<(), AccountError> {
        let account = self.load_account(account_name)?;
        if !account.verified {
            return Err(AccountError::Unverified);
        }

        passwd::verify(
            &account.credentials.passphrase_hash,
            &account.credentials.passphrase_salt,
            passphrase,
        )
        .map_err(|_| AccountError::InvalidCredentials)?;

        self.login(session, &account.name);
        Ok(())
    }

    /// Authenticate a session by the fingerprint of its client certificate
    /// and log it in.
    pub fn authenticate_by_certfp(&self, session: &Arc<dyn Session>) -> Result<(), AccountError> {
        let fingerprint = session.cert_fingerprint();
        if fingerprint.is_empty() {
            return Err(AccountError::InvalidCredentials);
        }

        let raw = self.store.view(|tx| {
            let account = tx
                .get(&keys::cert_to_account(&fingerprint))
                .map_err(|_| AccountError::InvalidCredentials)?;
            let raw =
                load_raw_account(tx, &account).map_err(|_| AccountError::Unverified)?;
            if !raw.verified {
                return Err(AccountError::Unverified);
            }
            Ok(raw)
        })?;

        self.login(session, &raw.name);
        Ok(())
    }

    /// Load and decode an account from the store.
    pub fn load_account(&self, account_name: &str) -> Result<Account, AccountError> {
        let folded = names::casefold(account_name).map_err(|_| AccountError::DoesNotExist)?;

        let raw = self.store.view(|tx| load_raw_account(tx, &folded))?;

        let credentials = AccountCredentials::decode(&raw.credentials).map_err(|err| {
            error!("could not deserialize credentials: {err}");
            AccountError::DoesNotExist
        })?;
        let registered_at = raw
            .registered_at
            .parse::<u64>()
            .map(|secs| UNIX_EPOCH + Duration::from_secs(secs))
            .unwrap_or(UNIX_EPOCH);

        Ok(Account {
            name: raw.name,
            registered_at,
            credentials,
            verified: raw.verified,
            additional_nicks: types::unmarshal_nicks(&raw.additional_nicks),
        })
    }

    /// Log a session in to an account: tag the session and index it. A
    /// session logged in elsewhere is moved, so the index always lists a
    /// session under exactly its current tag.
    pub fn login(&self, session: &Arc<dyn Session>, account_name: &str) {
        let folded = match names::casefold(account_name) {
            Ok(folded) => folded,
            Err(_) => return,
        };

        let mut caches = self.caches.write().unwrap();

        let previous = session.account();
        if !previous.is_empty() && previous != folded {
            if let Some(sessions) = caches.account_to_sessions.get_mut(&previous) {
                if let Some(pos) = sessions.iter().position(|s| s.id() == session.id()) {
                    sessions.remove(pos);
                }
                if sessions.is_empty() {
                    caches.account_to_sessions.remove(&previous);
                }
            }
        }

        login_to_account(session, &folded);

        let sessions = caches.account_to_sessions.entry(folded).or_default();
        if !sessions.iter().any(|s| s.id() == session.id()) {
            sessions.push(Arc::clone(session));
        }
    }

    /// Log a session out of its account, if any.
    pub fn logout(&self, session: &Arc<dyn Session>) {
        let mut caches = self.caches.write().unwrap();

        let folded = session.account();
        if folded.is_empty() {
            return;
        }

        logout_of_account(session);

        if let Some(sessions) = caches.account_to_sessions.get_mut(&folded) {
            if let Some(pos) = sessions.iter().position(|s| s.id() == session.id()) {
                sessions.remove(pos);
            }
            if sessions.is_empty() {
                caches.account_to_sessions.remove(&folded);
            }
        }
    }

    /// Destroy an account: delete its persistent records, clear its cache
    /// entries, and forcibly log out every attached session.
    ///
    /// Cert-index cleanup runs in a second transaction on purpose: if it
    /// fails, the account must stay deleted. On the cache side the call is
    /// idempotent; a second call reports `DoesNotExist` and removes
    /// nothing.
    pub fn unregister(&self, account: &str) -> Result<(), AccountError> {
        let folded = names::casefold(account).map_err(|_| AccountError::DoesNotExist)?;

        let _serial = self.serial_update.lock().unwrap();

        let (existed, cred_text, raw_nicks) = self.store.update(|tx| {
            let existed = tx.contains(&keys::exists(&folded));
            let cred_text = tx.get(&keys::credentials(&folded)).ok();
            let raw_nicks = tx.get(&keys::additional_nicks(&folded)).unwrap_or_default();

            tx.delete(&keys::exists(&folded))?;
            tx.delete(&keys::name(&folded))?;
            tx.delete(&keys::verified(&folded))?;
            tx.delete(&keys::registered_time(&folded))?;
            tx.delete(&keys::callback(&folded))?;
            tx.delete(&keys::verification_code(&folded))?;
            tx.delete(&keys::additional_nicks(&folded))?;
            tx.delete(&keys::credentials(&folded))?;

            Ok::<_, AccountError>((existed, cred_text, raw_nicks))
        })?;

        if let Some(cred_text) = cred_text {
            // an undecodable blob means there is no cert to clean up; the
            // account is still unregistered
            if let Ok(creds) = AccountCredentials::decode(&cred_text) {
                if !creds.certificate.is_empty() {
                    let cert_key = keys::cert_to_account(&creds.certificate);
                    let cleanup: Result<(), AccountError> = self.store.update(|tx| {
                        let owned = tx
                            .get(&cert_key)
                            .map(|owner| owner == folded)
                            .unwrap_or(false);
                        if owned {
                            tx.delete(&cert_key)?;
                        }
                        Ok(())
                    });
                    if let Err(err) = cleanup {
                        error!("couldn't remove cert index entry: {err}");
                    }
                }
            }
        }

        let sessions = {
            let mut caches = self.caches.write().unwrap();
            caches.nick_to_account.remove(&folded);
            for nick in types::unmarshal_nicks(&raw_nicks) {
                caches.nick_to_account.remove(&nick);
            }
            caches
                .account_to_sessions
                .remove(&folded)
                .unwrap_or_default()
        };
        for session in &sessions {
            logout_of_account(session);
        }

        if existed {
            Ok(())
        } else {
            Err(AccountError::DoesNotExist)
        }
    }
}

/// Read the raw row set of an account inside a transaction. The
/// `account.exists` key is the existence sentinel; the other keys default
/// to empty when absent, which tolerates a partially expired TTL window.
fn load_raw_account(tx: &impl Transaction, folded: &str) -> Result<RawAccount, AccountError> {
    if !tx.contains(&keys::exists(folded)) {
        return Err(AccountError::DoesNotExist);
    }

    Ok(RawAccount {
        name: tx.get(&keys::name(folded)).unwrap_or_default(),
        registered_at: tx.get(&keys::registered_time(folded)).unwrap_or_default(),
        credentials: tx.get(&keys::credentials(folded)).unwrap_or_default(),
        callback: tx.get(&keys::callback(folded)).unwrap_or_default(),
        additional_nicks: tx.get(&keys::additional_nicks(folded)).unwrap_or_default(),
        verified: tx.contains(&keys::verified(folded)),
    })
}

/// Tag the session with an account and re-arm its nick timer when the tag
/// actually changed.
fn login_to_account(session: &Arc<dyn Session>, account: &str) {
    if session.set_account_name(account) {
        let session = Arc::clone(session);
        thread::spawn(move || session.touch_nick_timer());
    }
}

/// Clear the session's account tag and notify observing peers. The
/// notification fan-out does network I/O, so it runs detached.
fn logout_of_account(session: &Arc<dyn Session>) {
    if session.account().is_empty() {
        // already logged out
        return;
    }

    session.set_account_name("");
    {
        let session = Arc::clone(session);
        thread::spawn(move || session.touch_nick_timer());
    }

    let session = Arc::clone(session);
    thread::spawn(move || {
        let mask = session.nick_mask();
        for friend in session.friends(Capability::AccountNotify) {
            friend.send(&mask, "ACCOUNT", &["*".to_string()]);
        }
    });
}
