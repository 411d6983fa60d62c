//! Signing policy registry.
//!
//! A fixed catalog of named policies, compiled in. Each policy is a pure
//! function of the request context: no I/O, no suspension, deterministic
//! for equal inputs. Sessions reference policies by id; an id that is no
//! longer known resolves to the default.

use crate::session::record::SessionType;

/// Event kind used by Nostr Connect logins (client authentication).
pub const KIND_LOGIN: u16 = 22242;

/// Short text note event kind.
const KIND_NOTE: u16 = 1;

/// Profile metadata event kind.
const KIND_PROFILE: u16 = 0;

/// Outcome of a policy evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Sign immediately.
    Sign,
    /// Suspend and route to a human approver.
    Refer,
    /// Refuse immediately.
    Reject,
}

/// Everything a policy may look at.
#[derive(Debug, Clone)]
pub struct PolicyContext {
    /// Draft event kind.
    pub kind: u16,
    /// Draft event content.
    pub content: String,
    /// Requesting peer's public key.
    pub client: String,
    /// Owning session summary.
    pub session: SessionSummary,
}

/// The slice of session state visible to policies.
#[derive(Debug, Clone)]
pub struct SessionSummary {
    /// Session id.
    pub id: String,
    /// Session alias.
    pub alias: String,
    /// Pairing mode.
    pub kind: SessionType,
}

type PolicyFn = fn(&PolicyContext) -> Decision;

/// One catalog entry.
pub struct Policy {
    /// Stable identifier, referenced by session records.
    pub id: &'static str,
    /// Display label.
    pub label: &'static str,
    /// One-line description for pickers.
    pub description: &'static str,
    eval: PolicyFn,
}

impl Policy {
    /// Evaluate the policy against a request context.
    pub fn evaluate(&self, ctx: &PolicyContext) -> Decision {
        (self.eval)(ctx)
    }
}

/// Id of the policy used when a record references an unknown one.
pub const DEFAULT_POLICY_ID: &str = "login_auto_review";

static CATALOG: &[Policy] = &[
    Policy {
        id: "auto_sign",
        label: "Auto sign",
        description: "Sign every request without review",
        eval: |_ctx| Decision::Sign,
    },
    Policy {
        id: "online_login",
        label: "Logins only",
        description: "Sign login events, refuse everything else",
        eval: |ctx| {
            if ctx.kind == KIND_LOGIN {
                Decision::Sign
            } else {
                Decision::Reject
            }
        },
    },
    Policy {
        id: "login_and_publish",
        label: "Login + publish",
        description: "Sign logins and notes, refuse profile edits, review the rest",
        eval: |ctx| match ctx.kind {
            KIND_LOGIN | KIND_NOTE => Decision::Sign,
            KIND_PROFILE => Decision::Reject,
            _ => Decision::Refer,
        },
    },
    Policy {
        id: "login_auto_review",
        label: "Login auto, others review",
        description: "Sign logins, send everything else to review",
        eval: |ctx| {
            if ctx.kind == KIND_LOGIN {
                Decision::Sign
            } else {
                Decision::Refer
            }
        },
    },
];

/// The full catalog.
pub fn all() -> &'static [Policy] {
    CATALOG
}

/// Look up a policy by id.
pub fn get(id: &str) -> Option<&'static Policy> {
    CATALOG.iter().find(|p| p.id == id)
}

/// The default policy.
pub fn default_policy() -> &'static Policy {
    get(DEFAULT_POLICY_ID).unwrap_or(&CATALOG[0])
}

/// Resolve an id, falling back to the default when unknown.
pub fn resolve(id: &str) -> &'static Policy {
    get(id).unwrap_or_else(default_policy)
}
