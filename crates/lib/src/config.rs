//! Configuration for the account subsystem.
//!
//! The library never reads configuration files itself; the embedding server
//! deserializes its own config tree and hands an [`AccountsConfig`] to
//! [`AccountManager::new`](crate::AccountManager::new). Every field has a
//! default so partial config blocks deserialize cleanly.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for the account manager.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AccountsConfig {
    pub registration: RegistrationConfig,
    pub nick_reservation: NickReservationConfig,
}

/// Account registration options.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct RegistrationConfig {
    /// How long an unverified registration survives before the store reaps
    /// it, in seconds. `0` means unverified records never expire.
    pub verify_timeout_secs: u64,
    pub callbacks: CallbacksConfig,
}

impl RegistrationConfig {
    /// The TTL to apply to unverified account records, if any.
    pub fn verify_timeout(&self) -> Option<Duration> {
        if self.verify_timeout_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.verify_timeout_secs))
        }
    }
}

/// Verification-callback channels.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct CallbacksConfig {
    pub mailto: MailtoConfig,
}

/// Mail submission parameters for the `mailto` verification channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MailtoConfig {
    /// Sender address for verification mail.
    pub sender: String,
    /// Mail submission host.
    pub server: String,
    /// Mail submission port.
    pub port: u16,
    /// Optional username for plain authentication. Empty disables auth.
    pub username: String,
    /// Optional password for plain authentication.
    pub password: String,
    /// Subject line for the verification message. Empty selects a default
    /// naming the server.
    pub verify_message_subject: String,
}

impl Default for MailtoConfig {
    fn default() -> Self {
        Self {
            sender: String::new(),
            server: String::new(),
            port: 25,
            username: String::new(),
            password: String::new(),
            verify_message_subject: String::new(),
        }
    }
}

/// Nick reservation options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NickReservationConfig {
    /// When false the nick index stays empty and `SetNickReserved` fails
    /// fast.
    pub enabled: bool,
    /// Prefix used when the server renames guests; account names may not
    /// begin with it.
    pub rename_prefix: String,
    /// How many nicks an account may reserve beyond its own name.
    pub additional_nick_limit: usize,
}

impl Default for NickReservationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            rename_prefix: "Guest-".to_string(),
            additional_nick_limit: default_additional_nick_limit(),
        }
    }
}

fn default_additional_nick_limit() -> usize {
    2
}
