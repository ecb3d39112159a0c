use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;

use crate::database::{Database, Service, Webhook};
use crate::monitoring::types::ServiceStatus;

pub const STATUS_CHANGE_EVENT: &str = "status_change";
pub const WEBHOOK_SECRET_HEADER: &str = "X-Webhook-Secret";

/// Fire-and-forget event delivery. Implementations swallow and log their own
/// failures.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, event_type: &str, payload: Value);
}

/// Payload emitted when a service flips between UP and DOWN.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusChangeEvent {
    pub event: &'static str,
    pub service_id: i64,
    pub service_name: String,
    pub ip: String,
    pub status: ServiceStatus,
    pub timestamp: DateTime<Utc>,
}

impl StatusChangeEvent {
    pub fn new(service: &Service, status: ServiceStatus, timestamp: DateTime<Utc>) -> Self {
        Self {
            event: STATUS_CHANGE_EVENT,
            service_id: service.id,
            service_name: service.name.clone(),
            ip: service.ip.clone(),
            status,
            timestamp,
        }
    }

    pub fn to_payload(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Posts events to every active webhook subscribed to them.
pub struct WebhookNotifier {
    db: Arc<dyn Database>,
    client: Client,
}

impl WebhookNotifier {
    pub fn new(db: Arc<dyn Database>, timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { db, client })
    }

    async fn deliver(client: Client, webhook: Webhook, event_type: String, payload: Value) {
        let mut request = client.post(&webhook.url).json(&payload);
        if let Some(secret) = webhook.secret.as_deref().filter(|s| !s.is_empty()) {
            request = request.header(WEBHOOK_SECRET_HEADER, secret);
        }

        match request.send().await {
            Ok(response) if response.status().is_success() => {
                tracing::debug!(webhook = %webhook.name, event = %event_type, "webhook delivered");
            }
            Ok(response) => {
                tracing::warn!(
                    webhook = %webhook.name,
                    event = %event_type,
                    status = %response.status(),
                    "webhook rejected event"
                );
            }
            Err(e) => {
                tracing::warn!(webhook = %webhook.name, event = %event_type, error = %e, "webhook delivery failed");
            }
        }
    }

    async fn dispatch(
        db: Arc<dyn Database>,
        client: Client,
        event_type: String,
        payload: Value,
    ) {
        let webhooks = match db.active_webhooks().await {
            Ok(webhooks) => webhooks,
            Err(e) => {
                tracing::warn!(error = %e, "could not load webhooks, dropping {event_type} event");
                return;
            }
        };

        for webhook in webhooks.into_iter().filter(|w| w.subscribes_to(&event_type)) {
            tokio::spawn(Self::deliver(client.clone(), webhook, event_type.clone(), payload.clone()));
        }
    }
}

impl NotificationSink for WebhookNotifier {
    fn notify(&self, event_type: &str, payload: Value) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::warn!("no async runtime available, dropping {event_type} event");
            return;
        };

        handle.spawn(Self::dispatch(
            self.db.clone(),
            self.client.clone(),
            event_type.to_string(),
            payload,
        ));
    }
}

/// Sink that only logs, used when no webhooks are wanted.
#[derive(Debug, Default)]
pub struct LogNotifier;

impl NotificationSink for LogNotifier {
    fn notify(&self, event_type: &str, payload: Value) {
        tracing::info!(event = event_type, %payload, "notification");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::test_support::create_test_database;
    use crate::monitoring::types::CheckKind;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[test]
    fn test_status_change_payload_shape() {
        let mut service = Service::new("router", "192.168.1.1", CheckKind::Tcp);
        service.id = 7;
        let at = DateTime::from_timestamp(1_700_000_000, 0).unwrap();

        let payload = StatusChangeEvent::new(&service, ServiceStatus::Down, at).to_payload();
        assert_eq!(payload["event"], "status_change");
        assert_eq!(payload["service_id"], 7);
        assert_eq!(payload["service_name"], "router");
        assert_eq!(payload["ip"], "192.168.1.1");
        assert_eq!(payload["status"], "DOWN");
        assert!(payload["timestamp"].as_str().unwrap().starts_with("2023-11-14"));
    }

    #[tokio::test]
    async fn test_webhook_receives_event_with_secret() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/hook", listener.local_addr().unwrap());

        let (db, _dir) = create_test_database().await.unwrap();
        let mut hook = Webhook::new("ops", url, vec!["status_change".into()]);
        hook.secret = Some("s3cret".into());
        db.insert_webhook(&hook).await.unwrap();

        let notifier = WebhookNotifier::new(db, Duration::from_secs(5)).unwrap();
        notifier.notify(STATUS_CHANGE_EVENT, serde_json::json!({"status": "UP"}));

        let (mut socket, _) =
            tokio::time::timeout(Duration::from_secs(5), listener.accept()).await.unwrap().unwrap();
        let mut buf = vec![0u8; 4096];
        let mut received = String::new();
        while !received.contains("\"status\":\"UP\"") {
            let n = tokio::time::timeout(Duration::from_secs(5), socket.read(&mut buf))
                .await
                .unwrap()
                .unwrap();
            assert!(n > 0, "connection closed before body arrived");
            received.push_str(&String::from_utf8_lossy(&buf[..n]));
        }
        socket.write_all(b"HTTP/1.1 204 No Content\r\ncontent-length: 0\r\n\r\n").await.unwrap();

        let lower = received.to_lowercase();
        assert!(lower.starts_with("post /hook"));
        assert!(lower.contains("x-webhook-secret: s3cret"));
    }
}
