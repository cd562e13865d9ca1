//! SASL authentication mechanisms.
//!
//! The mechanisms that exist and that we support, as a flat registration
//! table keyed by mechanism name. Handlers share one contract so the table
//! can grow without touching the lifecycle core.

use std::str;
use std::sync::Arc;

use super::AccountManager;
use crate::session::Session;

/// A mechanism handler: given the manager, the authenticating session, the
/// advertised authentication identity, and the raw credential blob, either
/// logs the session in and returns `true`, or pushes a failure line into
/// the reply buffer and returns `false`.
pub type MechanismHandler =
    fn(&AccountManager, &Arc<dyn Session>, &str, &[u8], &mut Vec<String>) -> bool;

/// The SASL mechanisms that exist and that we support. This can move to a
/// runtime structure if mechanisms ever need to load or unload.
pub const ENABLED_MECHANISMS: &[(&str, MechanismHandler)] = &[
    ("PLAIN", auth_plain as MechanismHandler),
    ("EXTERNAL", auth_external as MechanismHandler),
];

/// Look up a mechanism handler by name.
pub fn lookup(name: &str) -> Option<MechanismHandler> {
    ENABLED_MECHANISMS
        .iter()
        .find(|(mechanism, _)| *mechanism == name)
        .map(|(_, handler)| *handler)
}

/// RFC 4616 PLAIN: the blob is `authzid NUL authcid NUL passwd`. The
/// authorization identity must be empty or equal to the authentication
/// identity; impersonation is not supported.
fn auth_plain(
    manager: &AccountManager,
    session: &Arc<dyn Session>,
    _authcid: &str,
    blob: &[u8],
    replies: &mut Vec<String>,
) -> bool {
    let parts: Vec<&[u8]> = blob.split(|byte| *byte == 0).collect();
    if parts.len() != 3 {
        replies.push("Invalid PLAIN response".to_string());
        return false;
    }

    let decoded: Option<Vec<&str>> = parts.into_iter().map(|part| str::from_utf8(part).ok()).collect();
    let decoded = match decoded {
        Some(fields) => fields,
        None => {
            replies.push("Invalid PLAIN response".to_string());
            return false;
        }
    };
    let (authzid, account, passphrase) = (decoded[0], decoded[1], decoded[2]);

    if !authzid.is_empty() && authzid != account {
        replies.push("Authorization identity does not match".to_string());
        return false;
    }

    match manager.authenticate_by_passphrase(session, account, passphrase) {
        Ok(()) => true,
        Err(err) => {
            replies.push(format!("Authentication failed: {err}"));
            false
        }
    }
}

/// EXTERNAL: authenticate by the TLS client certificate already presented
/// on the connection. The blob, when present, is an authorization identity
/// and must match the authentication identity.
fn auth_external(
    manager: &AccountManager,
    session: &Arc<dyn Session>,
    authcid: &str,
    blob: &[u8],
    replies: &mut Vec<String>,
) -> bool {
    if !blob.is_empty() && blob != authcid.as_bytes() {
        replies.push("Authorization identity does not match".to_string());
        return false;
    }

    match manager.authenticate_by_certfp(session) {
        Ok(()) => true,
        Err(err) => {
            replies.push(format!("Authentication failed: {err}"));
            false
        }
    }
}
