//! Operator notifications for a run's delta. Delivery is best effort: a
//! failed message is logged and reported back, never retried without bound.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use easm_core::{Delta, Failure, Notifier};
use reqwest::Client;
use std::time::Duration;

/// Posts `{"text": ...}` to an incoming-webhook URL (Slack compatible).
#[derive(Debug, Clone)]
pub struct Webhook {
    client: Client,
    url: String,
    timeout: Duration,
    retries: u32,
    retry_delay: Duration,
}

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

impl Webhook {
    pub fn new(url: impl Into<String>) -> Self {
        Webhook {
            client: Client::new(),
            url: url.into(),
            timeout: DEFAULT_TIMEOUT,
            retries: 0,
            retry_delay: Duration::from_secs(1),
        }
    }

    /// Deadline for one POST, connect through response.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retries(mut self, retries: u32, delay: Duration) -> Self {
        self.retries = retries;
        self.retry_delay = delay;
        self
    }

    async fn post_once(&self, text: &str) -> Result<()> {
        let payload = serde_json::json!({ "text": text });
        let resp = self
            .client
            .post(&self.url)
            .timeout(self.timeout)
            .json(&payload)
            .send()
            .await
            .context("failed to send webhook")?;
        if !resp.status().is_success() {
            bail!("webhook returned error status: {}", resp.status());
        }
        Ok(())
    }
}

#[async_trait]
impl Notifier for Webhook {
    async fn send(&self, text: &str) -> Result<()> {
        let mut attempt = 0;
        loop {
            match self.post_once(text).await {
                Ok(()) => return Ok(()),
                Err(e) if attempt < self.retries => {
                    attempt += 1;
                    tracing::debug!(attempt, error = %format!("{e:#}"), "webhook delivery failed; retrying");
                    tokio::time::sleep(self.retry_delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Used when no webhook is configured: messages only go to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogOnly;

#[async_trait]
impl Notifier for LogOnly {
    async fn send(&self, text: &str) -> Result<()> {
        tracing::info!(target: "easm::notify", "{text}");
        Ok(())
    }
}

/// One message per non-empty list, in a fixed order.
pub fn messages(delta: &Delta) -> Vec<String> {
    let sections = [
        ("New active subdomain records", &delta.new_active),
        ("New live subdomain hosts", &delta.new_live),
        ("Deprecated subdomain records", &delta.deprecated_active),
        ("Deprecated live subdomain hosts", &delta.deprecated_live),
    ];
    sections
        .into_iter()
        .filter(|(_, list)| !list.is_empty())
        .map(|(heading, list)| format!("{heading}: [{}]", list.join(", ")))
        .collect()
}

/// Send every message for `delta`; failures are collected, not propagated.
pub async fn deliver(notifier: &dyn Notifier, delta: &Delta) -> Vec<Failure> {
    let mut failures = Vec::new();
    for (i, text) in messages(delta).into_iter().enumerate() {
        if let Err(e) = notifier.send(&text).await {
            tracing::warn!(message = i, error = %format!("{e:#}"), "notification not delivered");
            failures.push(Failure::new(format!("notify:{i}"), "notify", format!("{e:#}")));
        }
    }
    failures
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn delta() -> Delta {
        Delta {
            new_active: vec!["a.example.com".into(), "b.example.com".into()],
            new_live: vec![],
            deprecated_active: vec!["old.example.com".into()],
            deprecated_live: vec![],
        }
    }

    /// Minimal webhook receiver: records request bodies, replies with `status`.
    async fn receiver(status: u16) -> (String, Arc<Mutex<Vec<String>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_bg = seen.clone();
        tokio::spawn(async move {
            loop {
                let Ok((mut sock, _)) = listener.accept().await else { return };
                let mut buf = Vec::new();
                let mut chunk = [0u8; 2048];
                loop {
                    let Ok(n) = sock.read(&mut chunk).await else { break };
                    if n == 0 {
                        break;
                    }
                    buf.extend_from_slice(&chunk[..n]);
                    let text = String::from_utf8_lossy(&buf).to_string();
                    if let Some(idx) = text.find("\r\n\r\n") {
                        let len = text[..idx]
                            .lines()
                            .find_map(|l| l.to_ascii_lowercase().strip_prefix("content-length:").map(|v| v.trim().to_string()))
                            .and_then(|v| v.parse::<usize>().ok())
                            .unwrap_or(0);
                        if buf.len() >= idx + 4 + len {
                            seen_bg.lock().unwrap().push(text[idx + 4..idx + 4 + len].to_string());
                            break;
                        }
                    }
                }
                let resp = format!("HTTP/1.1 {status} X\r\nContent-Length: 0\r\nConnection: close\r\n\r\n");
                let _ = sock.write_all(resp.as_bytes()).await;
                let _ = sock.shutdown().await;
            }
        });
        (format!("http://{addr}/hook"), seen)
    }

    /// Accepts connections and never answers.
    async fn silent_receiver() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((sock, _)) = listener.accept().await {
                held.push(sock);
            }
        });
        format!("http://{addr}/hook")
    }

    struct Flaky {
        sent: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Notifier for Flaky {
        async fn send(&self, text: &str) -> Result<()> {
            let mut sent = self.sent.lock().unwrap();
            sent.push(text.to_string());
            if sent.len() == 1 {
                bail!("channel down");
            }
            Ok(())
        }
    }

    #[test]
    fn one_message_per_non_empty_list() {
        let msgs = messages(&delta());
        assert_eq!(
            msgs,
            vec![
                "New active subdomain records: [a.example.com, b.example.com]",
                "Deprecated subdomain records: [old.example.com]",
            ]
        );
    }

    #[test]
    fn empty_delta_has_no_messages() {
        assert!(messages(&Delta::default()).is_empty());
    }

    #[tokio::test]
    async fn posts_text_payload() {
        let (url, seen) = receiver(200).await;
        let failures = deliver(&Webhook::new(url), &delta()).await;
        assert!(failures.is_empty());
        let bodies = seen.lock().unwrap().clone();
        assert_eq!(bodies.len(), 2);
        let v: serde_json::Value = serde_json::from_str(&bodies[0]).unwrap();
        assert_eq!(v["text"], "New active subdomain records: [a.example.com, b.example.com]");
    }

    #[tokio::test]
    async fn non_success_status_is_a_failure() {
        let (url, _) = receiver(500).await;
        let err = Webhook::new(url).send("hello").await.unwrap_err();
        assert!(err.to_string().contains("500"));
    }

    #[tokio::test]
    async fn retries_are_bounded() {
        let (url, seen) = receiver(503).await;
        let hook = Webhook::new(url).with_retries(2, Duration::from_millis(10));
        assert!(hook.send("hello").await.is_err());
        assert_eq!(seen.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn unreachable_webhook_does_not_stop_delivery() {
        let l = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/hook", l.local_addr().unwrap());
        drop(l);
        let failures = deliver(&Webhook::new(url), &delta()).await;
        assert_eq!(failures.len(), 2);
    }

    #[tokio::test]
    async fn silent_webhook_times_out() {
        let url = silent_receiver().await;
        let hook = Webhook::new(url).with_timeout(Duration::from_millis(200));
        let delta = Delta { new_live: vec!["a.example.com".into()], ..Delta::default() };
        let failures = tokio::time::timeout(Duration::from_secs(5), deliver(&hook, &delta))
            .await
            .expect("delivery must give up on a silent webhook");
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].code, "notify");
    }

    #[tokio::test]
    async fn failure_of_one_message_keeps_the_rest() {
        let flaky = Flaky { sent: Mutex::new(Vec::new()) };
        let failures = deliver(&flaky, &delta()).await;
        assert_eq!(failures.len(), 1);
        assert_eq!(flaky.sent.lock().unwrap().len(), 2);
    }
}
