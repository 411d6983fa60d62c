//! Out-of-band approval notifications.
//!
//! When a request is referred for review, a single HTTP POST describes
//! the pending task to an ntfy-compatible endpoint. Publication is
//! best-effort: failures are logged and swallowed, and the approval flow
//! proceeds regardless.

use crate::approval::ApprovalTask;
use crate::logging::{kind_label, short_pubkey};
use std::time::Duration;
use tracing::{debug, warn};

/// Environment variable naming the notification topic (preferred form).
pub const TOPIC_ENV: &str = "INTERCESSIO_NTFY_TOPIC";

/// Environment variable naming the notification topic (generic form).
pub const TOPIC_ENV_FALLBACK: &str = "NTFY_TOPIC";

/// Environment variable overriding the publisher base URL.
pub const BASE_URL_ENV: &str = "NTFY_BASE_URL";

/// Environment variable pointing at the dashboard, used for review links.
pub const REVIEW_LINK_ENV: &str = "IC_LINK";

const DEFAULT_BASE_URL: &str = "https://ntfy.sh";
const PUBLISH_TIMEOUT: Duration = Duration::from_secs(10);

/// Fire-and-forget approval notification publisher.
pub struct Notifier {
    topic: Option<String>,
    base_url: String,
    review_base: Option<String>,
    http: reqwest::Client,
}

impl Notifier {
    /// Build a notifier from the process environment. Without a topic the
    /// notifier is a no-op.
    pub fn from_env() -> Self {
        let topic = std::env::var(TOPIC_ENV)
            .or_else(|_| std::env::var(TOPIC_ENV_FALLBACK))
            .ok()
            .filter(|t| !t.is_empty());
        let base_url = std::env::var(BASE_URL_ENV)
            .ok()
            .filter(|u| !u.is_empty())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let review_base = std::env::var(REVIEW_LINK_ENV).ok().filter(|u| !u.is_empty());

        Self::new(topic, base_url, review_base)
    }

    /// Build a notifier with explicit configuration.
    pub fn new(topic: Option<String>, base_url: String, review_base: Option<String>) -> Self {
        Self {
            topic,
            base_url,
            review_base,
            http: reqwest::Client::new(),
        }
    }

    /// A notifier that never publishes.
    pub fn disabled() -> Self {
        Self::new(None, DEFAULT_BASE_URL.to_string(), None)
    }

    /// Whether a topic is configured.
    pub fn is_enabled(&self) -> bool {
        self.topic.is_some()
    }

    /// Publish a notification describing a pending approval. Best-effort.
    pub async fn publish(&self, task: &ApprovalTask) {
        let Some(topic) = &self.topic else {
            return;
        };

        let url = format!("{}/{}", self.base_url.trim_end_matches('/'), topic);
        let body = self.describe(task);

        let result = self
            .http
            .post(&url)
            .header("Title", "Signing approval requested")
            .header("Priority", "high")
            .timeout(PUBLISH_TIMEOUT)
            .body(body)
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => {
                debug!(task = %task.id, "approval notification published");
            }
            Ok(response) => {
                warn!(task = %task.id, status = %response.status(), "approval notification rejected");
            }
            Err(e) => {
                warn!(task = %task.id, error = %e, "approval notification failed");
            }
        }
    }

    fn describe(&self, task: &ApprovalTask) -> String {
        let session = if task.session_alias.is_empty() {
            task.session_id.chars().take(8).collect()
        } else {
            task.session_alias.clone()
        };

        let mut body = format!(
            "Session '{}': {} from {} wants a {} signed ({})",
            session,
            short_pubkey(&task.client),
            task.session_type.as_str(),
            kind_label(task.event_kind),
            task.policy_label,
        );
        if let Some(base) = &self.review_base {
            body.push_str(&format!(
                "\nReview: {}/approvals/{}",
                base.trim_end_matches('/'),
                task.id
            ));
        }
        body
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::approval::TaskStatus;
    use crate::session::record::SessionType;

    fn task() -> ApprovalTask {
        ApprovalTask {
            id: "task-1".into(),
            session_id: "0123456789".into(),
            session_alias: "phone".into(),
            session_type: SessionType::Bunker,
            client: "82341f882b6eabcd2ba7f1ef90aad961cf074af15b9ef44a09f9d2a8fbfbe6a2".into(),
            event_kind: 4,
            event_summary: "direct message".into(),
            policy_id: "login_and_publish".into(),
            policy_label: "Login + publish".into(),
            draft: "{}".into(),
            created_at: 0,
            expires_at: 0,
            status: TaskStatus::Pending,
        }
    }

    #[test]
    fn test_disabled_without_topic() {
        assert!(!Notifier::disabled().is_enabled());
        assert!(Notifier::new(Some("t".into()), "https://ntfy.sh".into(), None).is_enabled());
    }

    #[test]
    fn test_description_mentions_context_not_secrets() {
        let notifier = Notifier::new(
            Some("topic".into()),
            "https://ntfy.sh".into(),
            Some("https://dash.local".into()),
        );
        let body = notifier.describe(&task());

        assert!(body.contains("phone"));
        assert!(body.contains("direct message"));
        assert!(body.contains("Login + publish"));
        assert!(body.contains("https://dash.local/approvals/task-1"));
        // Short hash only, never the full client key.
        assert!(!body.contains("82341f882b6eabcd2ba7f1ef90aad961cf074af15b9ef44a09f9d2a8fbfbe6a2"));
    }

    #[tokio::test]
    async fn test_publish_without_topic_is_noop() {
        // Must return without any network interaction.
        Notifier::disabled().publish(&task()).await;
    }
}
