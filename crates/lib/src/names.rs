//! Canonicalization of account and nick names.
//!
//! Every name a user supplies is folded to a canonical comparison form
//! before it is used for lookups, uniqueness checks, or storage keys. The
//! display form stays whatever the user typed; the folded form is what the
//! rest of the system agrees on.
//!
//! Folding is deterministic and idempotent: `casefold(casefold(x)) ==
//! casefold(x)` for every accepted `x`. Rejections are user errors, not
//! internal ones.

use thiserror::Error;

/// Error types for name folding.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum NameError {
    #[error("Name is empty")]
    Empty,

    #[error("Name is the wildcard character")]
    Wildcard,

    #[error("Name contains forbidden character '{ch}'")]
    ForbiddenCharacter { ch: char },

    #[error("Name begins with forbidden character '{ch}'")]
    ForbiddenLeadingCharacter { ch: char },
}

/// Characters that can never appear in an account or nick name. These are
/// the IRC message separators and mask metacharacters; allowing them would
/// let a name masquerade as part of the protocol syntax.
const FORBIDDEN: &[char] = &['*', '?', '!', '@', ',', '.', ':', '$'];

/// Characters that cannot begin a name: channel-type sigils and the
/// characters the nick grammar reserves for modes and prefixes.
const FORBIDDEN_LEADING: &[char] = &['#', '&', '+', '~', '%', '-'];

/// Fold a user-supplied account or nick name to its canonical form.
///
/// The folded form is the Unicode-lowercased input. Validation runs on the
/// folded form, which is what makes the function idempotent: a string that
/// already is a folded form passes through unchanged.
///
/// # Errors
/// Returns a [`NameError`] for the empty string, the single `*` wildcard,
/// names containing separator or mask characters, whitespace or control
/// characters, and names beginning with a channel sigil or digit.
pub fn casefold(name: &str) -> Result<String, NameError> {
    if name.is_empty() {
        return Err(NameError::Empty);
    }
    if name == "*" {
        return Err(NameError::Wildcard);
    }

    let folded: String = name.chars().flat_map(|c| c.to_lowercase()).collect();

    let mut chars = folded.chars();
    // Non-empty checked above; lowercasing never produces an empty string.
    let first = chars.next().ok_or(NameError::Empty)?;
    if FORBIDDEN_LEADING.contains(&first) || first.is_ascii_digit() {
        return Err(NameError::ForbiddenLeadingCharacter { ch: first });
    }

    for ch in folded.chars() {
        if FORBIDDEN.contains(&ch) {
            return Err(NameError::ForbiddenCharacter { ch });
        }
        if ch.is_whitespace() || ch.is_control() {
            return Err(NameError::ForbiddenCharacter { ch });
        }
    }

    Ok(folded)
}
