//! Username derivation for the new-principal-per-rotation scheme.

use chrono::{DateTime, Utc};
use serde::Deserialize;

/// PostgreSQL truncates identifiers longer than this (NAMEDATALEN - 1).
pub const MAX_IDENTIFIER_LEN: usize = 63;

/// How the suffix of a new username is produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsernameSuffix {
    /// First 8 hex digits of a v4 UUID. Concurrent rotations cannot collide.
    #[default]
    Uuid,
    /// Unix timestamp in seconds.
    Timestamp,
}

impl UsernameSuffix {
    pub fn generate(self, now: DateTime<Utc>) -> String {
        match self {
            UsernameSuffix::Uuid => {
                let mut s = uuid::Uuid::new_v4().simple().to_string();
                s.truncate(8);
                s
            }
            UsernameSuffix::Timestamp => now.timestamp().to_string(),
        }
    }

    /// Whether `tail` looks like a suffix this strategy produced.
    fn produced(self, tail: &str) -> bool {
        match self {
            UsernameSuffix::Uuid => {
                tail.len() == 8 && tail.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
            }
            UsernameSuffix::Timestamp => tail.len() >= 9 && tail.bytes().all(|b| b.is_ascii_digit()),
        }
    }
}

/// `<base>_<suffix>`, where `base` is `current` minus any suffix a previous
/// rotation appended, truncated so the result fits in an identifier.
pub fn next_username(current: &str, strategy: UsernameSuffix, suffix: &str) -> String {
    let base = match current.rsplit_once('_') {
        Some((base, tail)) if !base.is_empty() && strategy.produced(tail) => base,
        _ => current,
    };

    let budget = MAX_IDENTIFIER_LEN.saturating_sub(suffix.len() + 1);
    let mut end = base.len().min(budget);
    while !base.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}_{}", &base[..end], suffix)
}
