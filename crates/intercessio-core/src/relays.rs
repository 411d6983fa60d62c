//! Relay URL normalization.
//!
//! Session records store an ordered, deduplicated list of relay URLs,
//! each normalized to `wss://host[:port][/path]` with no trailing slash.
//! Normalization is idempotent.

use crate::error::{Error, Result};
use url::Url;

/// Normalize a single relay URL.
///
/// A bare `host` gains a `wss://` scheme; hosts are lowercased; trailing
/// slashes are stripped. Non-websocket schemes are rejected.
pub fn normalize_relay(input: &str) -> Result<String> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(Error::Protocol("empty relay url".into()));
    }

    let candidate = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("wss://{}", trimmed)
    };

    let url = Url::parse(&candidate)
        .map_err(|e| Error::Protocol(format!("invalid relay url '{}': {}", trimmed, e)))?;

    match url.scheme() {
        "ws" | "wss" => {}
        other => {
            return Err(Error::Protocol(format!(
                "invalid relay url '{}': unsupported scheme '{}'",
                trimmed, other
            )));
        }
    }

    let host = url
        .host_str()
        .ok_or_else(|| Error::Protocol(format!("invalid relay url '{}': missing host", trimmed)))?
        .to_ascii_lowercase();

    let mut out = format!("{}://{}", url.scheme(), host);
    if let Some(port) = url.port() {
        out.push(':');
        out.push_str(&port.to_string());
    }

    let path = url.path().trim_end_matches('/');
    if !path.is_empty() && path != "/" {
        out.push_str(path);
    }

    Ok(out)
}

/// Normalize a relay list: each entry normalized, duplicates removed,
/// original order preserved. Fails on the first invalid entry and on an
/// empty result.
pub fn normalize_relays(inputs: &[String]) -> Result<Vec<String>> {
    let mut out: Vec<String> = Vec::with_capacity(inputs.len());
    for input in inputs {
        let normalized = normalize_relay(input)?;
        if !out.contains(&normalized) {
            out.push(normalized);
        }
    }
    if out.is_empty() {
        return Err(Error::Protocol("at least one relay is required".into()));
    }
    Ok(out)
}
