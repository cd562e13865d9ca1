//! Key schema for account records.
//!
//! The concrete string templates are part of the external storage contract;
//! other tooling (inspection scripts, migrations) relies on them. Every key
//! embeds the folded account name, except the cert index which is keyed by
//! fingerprint.

/// Prefix under which every account's existence sentinel lives. Scanning
/// from this prefix enumerates all accounts.
pub const EXISTS_PREFIX: &str = "account.exists ";

/// Existence sentinel; doubles as the registration marker.
pub fn exists(folded: &str) -> String {
    format!("account.exists {folded}")
}

/// Present iff the account has been verified.
pub fn verified(folded: &str) -> String {
    format!("account.verified {folded}")
}

/// The callback spec (`<namespace>:<value>`) used at registration.
pub fn callback(folded: &str) -> String {
    format!("account.callback {folded}")
}

/// The pending verification code; present only between registration and
/// verification.
pub fn verification_code(folded: &str) -> String {
    format!("account.verificationcode {folded}")
}

/// The preferred display name of the account, not folded.
pub fn name(folded: &str) -> String {
    format!("account.name {folded}")
}

/// Registration instant, decimal Unix seconds.
pub fn registered_time(folded: &str) -> String {
    format!("account.registered.time {folded}")
}

/// The serialized credential record.
pub fn credentials(folded: &str) -> String {
    format!("account.credentials {folded}")
}

/// Comma-joined folded nicks reserved beyond the account's own name.
pub fn additional_nicks(folded: &str) -> String {
    format!("account.additionalnicks {folded}")
}

/// Cert index: fingerprint → folded account name.
pub fn cert_to_account(fingerprint: &str) -> String {
    format!("account.creds.certfp {fingerprint}")
}
