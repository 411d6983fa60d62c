//! Logging helpers with automatic sensitive-data redaction.
//!
//! Key material must never reach log output, activity entries, or the
//! control plane. These wrappers make the safe rendering the easy one.

use std::fmt;

/// A wrapper that redacts its contents when displayed.
pub struct Redacted<T>(pub T);

impl<T: fmt::Display> fmt::Display for Redacted<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl<T: fmt::Debug> fmt::Debug for Redacted<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED]")
    }
}

/// Render a public key for logs and human-facing summaries: first and
/// last four characters with an ellipsis in between.
pub fn short_pubkey(pk: &str) -> String {
    if pk.len() > 12 {
        format!("{}…{}", &pk[..4], &pk[pk.len() - 4..])
    } else {
        pk.to_string()
    }
}

/// Human label for common Nostr event kinds, used in activity summaries.
pub fn kind_label(kind: u16) -> String {
    match kind {
        0 => "profile update".to_string(),
        1 => "note".to_string(),
        4 => "direct message".to_string(),
        22242 => "login".to_string(),
        24133 => "nostr-connect".to_string(),
        n => format!("kind {}", n),
    }
}

/// Truncate a string for display, appending an ellipsis when cut.
pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max).collect();
        format!("{}…", cut)
    }
}
