use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::{DispatchMode, StaffRole};
use crate::config::CloudApiConfig;
use crate::gateway::GatewayConfiguration;
use crate::transport::{HttpTransport, TransportError};

pub const SIMULATION_WARNING: &str =
    "Virtual session: no real message was sent. Use the manual dispatch link for real delivery.";
pub const BLOCKED_ERROR: &str =
    "Protocol blocked: automated delivery was intercepted before reaching the cloud API.";
const REJECTED_FALLBACK_ERROR: &str = "Cloud API authentication failed";

const HINT_REFRESH_TOKEN: &str = "Refresh the access token in gateway settings.";
const HINT_CHECK_ROUTING: &str = "Check the phone number ID and template permissions.";
const HINT_UNBLOCK: &str = "Enable the CORS proxy or configure a relay endpoint.";

/// Everything a strategy may read while attempting delivery.
pub struct DispatchContext<'a> {
    /// Normalized recipient digits
    pub recipient: &'a str,
    /// Canonical envelope text
    pub envelope: &'a str,
    pub role: StaffRole,
    pub gateway: &'a GatewayConfiguration,
}

/// Why a delivery attempt, or a whole dispatch, did not go through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    InvalidRecipient,
    /// No HTTP status came back from the relay
    Unreachable,
    /// An endpoint answered with a non-2xx status
    Rejected,
    /// The direct call never reached the cloud API
    Blocked,
    NoStrategy,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureKind::InvalidRecipient => write!(f, "INVALID_RECIPIENT"),
            FailureKind::Unreachable => write!(f, "UNREACHABLE"),
            FailureKind::Rejected => write!(f, "REJECTED"),
            FailureKind::Blocked => write!(f, "BLOCKED"),
            FailureKind::NoStrategy => write!(f, "NO_STRATEGY"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StrategyOutcome {
    Delivered {
        mode: DispatchMode,
        status: String,
        warning: Option<String>,
    },
    /// Tried and failed. Only terminal when no later strategy delivers.
    Failed {
        error: String,
        hint: Option<String>,
        kind: FailureKind,
    },
    Skipped {
        reason: String,
    },
}

#[async_trait]
pub trait DeliveryStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    async fn attempt(&self, ctx: &DispatchContext<'_>) -> StrategyOutcome;
}

/// No routing identifier provisioned: pretend to deliver after a short handshake delay.
pub struct SimulationStrategy {
    delay: Duration,
}

impl SimulationStrategy {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

#[async_trait]
impl DeliveryStrategy for SimulationStrategy {
    fn name(&self) -> &'static str {
        "simulation"
    }

    async fn attempt(&self, ctx: &DispatchContext<'_>) -> StrategyOutcome {
        if !ctx.gateway.is_demo_mode() {
            return StrategyOutcome::Skipped {
                reason: "routing identifier configured".to_string(),
            };
        }

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        StrategyOutcome::Delivered {
            mode: DispatchMode::Simulation,
            status: "SYNC_READY".to_string(),
            warning: Some(SIMULATION_WARNING.to_string()),
        }
    }
}

#[derive(Debug, Serialize)]
struct RelayPayload<'a> {
    to: &'a str,
    message: &'a str,
    role: StaffRole,
}

/// Operator-hosted relay. Any 2xx counts as delivered.
pub struct RelayStrategy {
    http: Arc<dyn HttpTransport>,
}

impl RelayStrategy {
    pub fn new(http: Arc<dyn HttpTransport>) -> Self {
        Self { http }
    }
}

#[async_trait]
impl DeliveryStrategy for RelayStrategy {
    fn name(&self) -> &'static str {
        "relay"
    }

    async fn attempt(&self, ctx: &DispatchContext<'_>) -> StrategyOutcome {
        let Some(url) = ctx.gateway.relay_endpoint() else {
            return StrategyOutcome::Skipped {
                reason: "no relay endpoint configured".to_string(),
            };
        };

        let relay = RelayPayload {
            to: ctx.recipient,
            message: ctx.envelope,
            role: ctx.role,
        };
        let payload = json!(relay);

        match self.http.post_json(url, None, &payload).await {
            Ok(reply) if reply.is_success() => StrategyOutcome::Delivered {
                mode: DispatchMode::Relay,
                status: "SENT".to_string(),
                warning: None,
            },
            Ok(reply) => {
                warn!("Relay {} answered HTTP {}", url, reply.status);
                StrategyOutcome::Failed {
                    error: format!("Relay responded with HTTP {}", reply.status),
                    hint: None,
                    kind: FailureKind::Rejected,
                }
            }
            Err(e) => {
                warn!("Relay {} unreachable: {}", url, e);
                StrategyOutcome::Failed {
                    error: format!("Relay unreachable: {}", e),
                    hint: None,
                    kind: FailureKind::Unreachable,
                }
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: Option<String>,
}

/// Reason reported by the cloud API, if its body carries one.
fn remote_reason(body: &str) -> Option<String> {
    serde_json::from_str::<ApiErrorBody>(body)
        .ok()
        .and_then(|b| b.error)
        .and_then(|e| e.message)
        .filter(|m| !m.trim().is_empty())
}

fn rejection_hint(status: u16) -> &'static str {
    match status {
        401 | 403 => HINT_REFRESH_TOKEN,
        _ => HINT_CHECK_ROUTING,
    }
}

/// The bearer token would leave through a third-party proxy.
fn token_via_proxy(gateway: &GatewayConfiguration) -> bool {
    gateway.use_cors_proxy && !gateway.access_token.is_empty()
}

/// Direct call to the cloud messaging API with the stored bearer token.
pub struct CloudApiStrategy {
    http: Arc<dyn HttpTransport>,
    api: CloudApiConfig,
}

impl CloudApiStrategy {
    pub fn new(http: Arc<dyn HttpTransport>, api: CloudApiConfig) -> Self {
        Self { http, api }
    }

    fn endpoint(&self, gateway: &GatewayConfiguration) -> String {
        let target = self.api.messages_url(&gateway.phone_number_id);
        if token_via_proxy(gateway) {
            warn!(
                "Access token for {} is routed through the CORS proxy {}",
                gateway.phone_number_id, self.api.cors_proxy_prefix
            );
        }
        if gateway.use_cors_proxy {
            self.api.proxied(&target)
        } else {
            target
        }
    }
}

#[async_trait]
impl DeliveryStrategy for CloudApiStrategy {
    fn name(&self) -> &'static str {
        "cloud_api"
    }

    async fn attempt(&self, ctx: &DispatchContext<'_>) -> StrategyOutcome {
        let url = self.endpoint(ctx.gateway);
        let payload = json!({
            "messaging_product": "whatsapp",
            "to": ctx.recipient,
            "type": "text",
            "text": { "body": ctx.envelope },
        });

        debug!("Calling cloud API for {}", ctx.recipient);
        match self
            .http
            .post_json(&url, Some(&ctx.gateway.access_token), &payload)
            .await
        {
            Ok(reply) if reply.is_success() => StrategyOutcome::Delivered {
                mode: DispatchMode::Live,
                status: "SENT".to_string(),
                warning: None,
            },
            Ok(reply) => StrategyOutcome::Failed {
                error: remote_reason(&reply.body)
                    .unwrap_or_else(|| REJECTED_FALLBACK_ERROR.to_string()),
                hint: Some(rejection_hint(reply.status).to_string()),
                kind: FailureKind::Rejected,
            },
            Err(e) => {
                if let TransportError::Timeout(_) = e {
                    warn!("Cloud API timed out: {}", e);
                } else {
                    warn!("Cloud API unreachable: {}", e);
                }
                StrategyOutcome::Failed {
                    error: BLOCKED_ERROR.to_string(),
                    hint: Some(HINT_UNBLOCK.to_string()),
                    kind: FailureKind::Blocked,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::testing::ScriptedTransport;

    #[test]
    fn test_remote_reason_extracts_message() {
        let body = r#"{"error":{"message":"Invalid OAuth access token.","code":190}}"#;
        assert_eq!(
            remote_reason(body).as_deref(),
            Some("Invalid OAuth access token.")
        );
    }

    #[test]
    fn test_remote_reason_absent_or_malformed() {
        assert_eq!(remote_reason(""), None);
        assert_eq!(remote_reason("<html>bad gateway</html>"), None);
        assert_eq!(remote_reason(r#"{"error":{}}"#), None);
        assert_eq!(remote_reason(r#"{"error":{"message":"  "}}"#), None);
    }

    #[test]
    fn test_rejection_hint_by_status() {
        assert_eq!(rejection_hint(401), HINT_REFRESH_TOKEN);
        assert_eq!(rejection_hint(403), HINT_REFRESH_TOKEN);
        assert_eq!(rejection_hint(400), HINT_CHECK_ROUTING);
    }

    fn gateway(token: &str, use_cors_proxy: bool) -> GatewayConfiguration {
        GatewayConfiguration {
            access_token: token.to_string(),
            phone_number_id: "555".to_string(),
            use_cors_proxy,
            ..Default::default()
        }
    }

    #[test]
    fn test_endpoint_proxy_toggle() {
        let api = CloudApiConfig {
            base_url: "https://graph.test".to_string(),
            version: "v21.0".to_string(),
            cors_proxy_prefix: "https://proxy.test/?url=".to_string(),
        };
        let cloud = CloudApiStrategy::new(ScriptedTransport::new(vec![]), api);

        assert_eq!(
            cloud.endpoint(&gateway("tok", false)),
            "https://graph.test/v21.0/555/messages"
        );
        let proxied = "https://proxy.test/?url=https%3A%2F%2Fgraph.test%2Fv21.0%2F555%2Fmessages";
        assert_eq!(cloud.endpoint(&gateway("tok", true)), proxied);
        assert_eq!(cloud.endpoint(&gateway("", true)), proxied);
    }

    #[test]
    fn test_token_via_proxy() {
        assert!(token_via_proxy(&gateway("tok", true)));
        assert!(!token_via_proxy(&gateway("", true)));
        assert!(!token_via_proxy(&gateway("tok", false)));
    }

    #[test]
    fn test_failure_kind_labels() {
        assert_eq!(FailureKind::Blocked.to_string(), "BLOCKED");
        assert_eq!(FailureKind::InvalidRecipient.to_string(), "INVALID_RECIPIENT");
    }

    #[test]
    fn test_relay_payload_shape() {
        let relay = RelayPayload {
            to: "12345",
            message: "hello",
            role: StaffRole::Medical,
        };
        let value = json!(relay);
        assert_eq!(
            value,
            json!({"to": "12345", "message": "hello", "role": "MEDICAL"})
        );
    }
}
