//! # Intercessio Core Library
//!
//! A self-hosted remote-signing daemon for the Nostr protocol. Client
//! applications pair with the daemon over Nostr relays using the
//! Nostr Connect / bunker protocol; the daemon holds the user's long-term
//! signing key, evaluates every inbound request against a configurable
//! policy, and signs or refuses on the user's behalf.
//!
//! ## Guarantees
//!
//! - Every active pairing session survives a daemon restart
//! - Requests referred to a human resolve exactly once (approve, reject,
//!   or expiry), and the resolution is durable
//! - Key material lives in the secret vault and is held in process memory
//!   only while a session runtime needs it
//! - The control plane is local-only: a Unix socket guarded by filesystem
//!   permissions
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │              control plane (socket)          │
//! ├──────────────────────────────────────────────┤
//! │  session manager │ approvals │  activity     │
//! ├──────────────────────────────────────────────┤
//! │  provider (Nostr Connect) │ policy registry  │
//! ├──────────────────────────────────────────────┤
//! │   vault   │   keystore   │   session store   │
//! └──────────────────────────────────────────────┘
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, clippy::all)]

pub mod activity;
pub mod approval;
pub mod config;
pub mod control;
pub mod daemon;
pub mod error;
pub mod keystore;
pub mod logging;
pub mod notify;
pub mod policy;
pub mod provider;
pub mod relays;
pub mod session;
pub mod store;
pub mod vault;

pub use error::{Error, Result};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Capacity of the in-memory activity ring buffer.
pub const ACTIVITY_CAPACITY: usize = 200;

/// Default time-to-live for a pending approval, in seconds.
pub const DEFAULT_APPROVAL_TTL_SECS: u64 = 600;
