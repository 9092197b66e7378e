//! User Notification Collaborator
//!
//! Fire-and-forget delivery seam. Notification failure must never block
//! or roll back a ledger transition, so `notify` returns nothing and
//! implementations swallow their own errors.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use std::time::Duration;
use tracing::{info, warn};

const WEBHOOK_TIMEOUT_SECS: u64 = 5;

/// Seam for the external notification service
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, user_id: &str, title: &str, message: &str);
}

/// Notifier that only writes to the log. Default when no webhook is
/// configured.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, user_id: &str, title: &str, message: &str) {
        info!(target: "custodia::notify", user_id, title, message, "user notification");
    }
}

/// Best-effort webhook poster for the notification collaborator
pub struct WebhookNotifier {
    client: Client,
    endpoint: String,
}

impl WebhookNotifier {
    pub fn new(endpoint: impl Into<String>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(WEBHOOK_TIMEOUT_SECS))
            .build()
            .unwrap_or_default();

        Self {
            client,
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, user_id: &str, title: &str, message: &str) {
        let payload = json!({
            "userId": user_id,
            "title": title,
            "message": message,
        });

        match self.client.post(&self.endpoint).json(&payload).send().await {
            Ok(resp) if resp.status().is_success() => {}
            Ok(resp) => {
                warn!(target: "custodia::notify", user_id, status = %resp.status(), "notification webhook rejected");
            }
            Err(e) => {
                warn!(target: "custodia::notify", user_id, error = %e, "notification webhook unreachable");
            }
        }
    }
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use std::sync::Arc;
    use tokio::sync::Mutex;

    /// Records notifications for assertions in tests
    #[derive(Clone, Default)]
    pub struct RecordingNotifier {
        pub sent: Arc<Mutex<Vec<(String, String, String)>>>,
    }

    impl RecordingNotifier {
        pub fn new() -> Self {
            Self::default()
        }

        pub async fn count(&self) -> usize {
            self.sent.lock().await.len()
        }
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn notify(&self, user_id: &str, title: &str, message: &str) {
            self.sent.lock().await.push((
                user_id.to_string(),
                title.to_string(),
                message.to_string(),
            ));
        }
    }
}
