use anyhow::{Context, Result};
use async_trait::async_trait;
use std::process::{Command, ExitStatus};
use std::thread::JoinHandle;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Raw HTTP reply as seen by the delivery strategies.
#[derive(Debug, Clone)]
pub struct HttpReply {
    pub status: u16,
    pub body: String,
}

impl HttpReply {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// The request never produced an HTTP status.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request timed out: {0}")]
    Timeout(String),
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("request failed: {0}")]
    Request(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            TransportError::Timeout(e.to_string())
        } else if e.is_connect() {
            TransportError::Connect(e.to_string())
        } else {
            TransportError::Request(e.to_string())
        }
    }
}

#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn post_json(
        &self,
        url: &str,
        bearer: Option<&str>,
        body: &serde_json::Value,
    ) -> Result<HttpReply, TransportError>;
}

pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn post_json(
        &self,
        url: &str,
        bearer: Option<&str>,
        body: &serde_json::Value,
    ) -> Result<HttpReply, TransportError> {
        debug!("POST {}", url);

        let mut request = self
            .client
            .post(url)
            .header("Content-Type", "application/json")
            .json(body);
        if let Some(token) = bearer {
            request = request.header("Authorization", format!("Bearer {}", token));
        }

        let response = request.send().await?;
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        Ok(HttpReply { status, body })
    }
}

/// Platform hand-off for URIs the operator completes by hand (sms:, messaging deep links).
pub trait NativeComposer: Send + Sync {
    /// Fire-and-forget: failures to launch are not reported.
    fn hand_off(&self, uri: &str);
}

pub struct SystemComposer;

/// Spawn `program uri` and reap the child on a background thread.
fn launch(program: &str, uri: &str) -> Option<JoinHandle<std::io::Result<ExitStatus>>> {
    let mut child = Command::new(program).arg(uri).spawn().ok()?;
    Some(std::thread::spawn(move || child.wait()))
}

impl NativeComposer for SystemComposer {
    fn hand_off(&self, uri: &str) {
        debug!("Handing off to native composer: {}", uri);
        // Try xdg-open (Linux), then open (macOS)
        if launch("xdg-open", uri).is_none() {
            let _ = launch("open", uri);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_post_json_sends_bearer_and_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v21.0/555/messages"))
            .and(header("authorization", "Bearer secret-token"))
            .and(body_json(json!({"to": "919876543210"})))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"messages":[]}"#))
            .expect(1)
            .mount(&server)
            .await;

        let transport = ReqwestTransport::new(Duration::from_secs(5)).unwrap();
        let reply = transport
            .post_json(
                &format!("{}/v21.0/555/messages", server.uri()),
                Some("secret-token"),
                &json!({"to": "919876543210"}),
            )
            .await
            .unwrap();

        assert!(reply.is_success());
        assert_eq!(reply.body, r#"{"messages":[]}"#);
    }

    #[tokio::test]
    async fn test_error_status_is_a_reply_not_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("denied"))
            .mount(&server)
            .await;

        let transport = ReqwestTransport::new(Duration::from_secs(5)).unwrap();
        let reply = transport
            .post_json(&server.uri(), None, &json!({}))
            .await
            .unwrap();

        assert_eq!(reply.status, 401);
        assert!(!reply.is_success());
        assert_eq!(reply.body, "denied");
    }

    #[tokio::test]
    async fn test_unreachable_host_is_transport_error() {
        // Bind then drop a listener so the port is known to be closed.
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };

        let transport = ReqwestTransport::new(Duration::from_secs(2)).unwrap();
        let result = transport
            .post_json(&format!("http://127.0.0.1:{}/send", port), None, &json!({}))
            .await;

        assert!(result.is_err());
    }

    #[test]
    fn test_launch_waits_on_child() {
        let handle = launch("true", "sms:12345?body=x").unwrap();
        assert!(handle.join().unwrap().unwrap().success());
    }

    #[test]
    fn test_launch_missing_program() {
        assert!(launch("temple-dispatch-no-such-opener", "sms:1").is_none());
    }

    #[test]
    fn test_reply_success_range() {
        let reply = |status| HttpReply {
            status,
            body: String::new(),
        };
        assert!(reply(200).is_success());
        assert!(reply(204).is_success());
        assert!(!reply(302).is_success());
        assert!(!reply(500).is_success());
    }
}

/// Scripted stand-ins for the I/O capabilities.
#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use serde_json::Value;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    /// Pops one response per call and records every request.
    #[derive(Default)]
    pub(crate) struct ScriptedTransport {
        responses: Mutex<VecDeque<Result<HttpReply, TransportError>>>,
        calls: Mutex<Vec<(String, Option<String>, Value)>>,
    }

    impl ScriptedTransport {
        pub(crate) fn new(responses: Vec<Result<HttpReply, TransportError>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                calls: Mutex::default(),
            })
        }

        pub(crate) fn calls(&self) -> Vec<(String, Option<String>, Value)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl HttpTransport for ScriptedTransport {
        async fn post_json(
            &self,
            url: &str,
            bearer: Option<&str>,
            body: &Value,
        ) -> Result<HttpReply, TransportError> {
            self.calls.lock().unwrap().push((
                url.to_string(),
                bearer.map(str::to_string),
                body.clone(),
            ));
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(TransportError::Request("unscripted call".to_string())))
        }
    }

    #[derive(Default)]
    pub(crate) struct RecordingComposer {
        pub(crate) uris: Mutex<Vec<String>>,
    }

    impl NativeComposer for RecordingComposer {
        fn hand_off(&self, uri: &str) {
            self.uris.lock().unwrap().push(uri.to_string());
        }
    }

    pub(crate) fn reply(status: u16, body: &str) -> Result<HttpReply, TransportError> {
        Ok(HttpReply {
            status,
            body: body.to_string(),
        })
    }
}
