pub mod envelope;
pub mod strategy;

use anyhow::Result;
use chrono::{Local, NaiveTime};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::gateway::GatewayConfiguration;
use crate::transport::{HttpTransport, NativeComposer};
use strategy::{
    CloudApiStrategy, DeliveryStrategy, DispatchContext, RelayStrategy, SimulationStrategy,
    StrategyOutcome,
};

pub use strategy::FailureKind;

const INVALID_RECIPIENT_ERROR: &str = "Recipient phone number contains no digits";
const NO_STRATEGY_ERROR: &str = "No delivery strategy accepted the alert";

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum Channel {
    /// Rich messaging channel, delivered through the gateway
    WhatsApp,
    /// Basic text channel, handed to the native composer
    Sms,
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Channel::WhatsApp => write!(f, "WHATSAPP"),
            Channel::Sms => write!(f, "SMS"),
        }
    }
}

impl std::str::FromStr for Channel {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "whatsapp" => Ok(Channel::WhatsApp),
            "sms" => Ok(Channel::Sms),
            other => anyhow::bail!("Unknown channel '{}' (expected whatsapp or sms)", other),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum StaffRole {
    Security,
    Volunteer,
    Medical,
    Admin,
    All,
}

impl std::fmt::Display for StaffRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StaffRole::Security => write!(f, "SECURITY"),
            StaffRole::Volunteer => write!(f, "VOLUNTEER"),
            StaffRole::Medical => write!(f, "MEDICAL"),
            StaffRole::Admin => write!(f, "ADMIN"),
            StaffRole::All => write!(f, "ALL"),
        }
    }
}

impl std::str::FromStr for StaffRole {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "SECURITY" => Ok(StaffRole::Security),
            "VOLUNTEER" => Ok(StaffRole::Volunteer),
            "MEDICAL" => Ok(StaffRole::Medical),
            "ADMIN" => Ok(StaffRole::Admin),
            "ALL" => Ok(StaffRole::All),
            other => anyhow::bail!("Unknown staff role '{}'", other),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DispatchMode {
    Simulation,
    Relay,
    Live,
    BasicChannel,
    Failed,
}

impl std::fmt::Display for DispatchMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DispatchMode::Simulation => write!(f, "SIMULATION"),
            DispatchMode::Relay => write!(f, "RELAY"),
            DispatchMode::Live => write!(f, "LIVE"),
            DispatchMode::BasicChannel => write!(f, "BASIC_CHANNEL"),
            DispatchMode::Failed => write!(f, "FAILED"),
        }
    }
}

/// A single staff alert, created per operator action.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct DispatchRequest {
    pub channel: Channel,
    /// Phone number in any formatting
    pub recipient: String,
    pub message: String,
    pub role: StaffRole,
}

/// Outcome of one dispatch. Never an error: failures carry a manual fallback instead.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchResult {
    pub success: bool,
    pub mode: DispatchMode,
    pub status: String,
    pub warning: Option<String>,
    pub error: Option<String>,
    /// Set exactly when `success` is false.
    pub failure: Option<FailureKind>,
    /// Remediation for the specific failure; shown alongside, never instead of, the manual link.
    pub hint: Option<String>,
    /// Pre-filled messaging link. Present on every result that passed validation.
    pub manual_link: Option<String>,
    /// Non-terminal strategy failures, e.g. an unreachable relay before a direct delivery.
    pub diagnostics: Vec<String>,
}

impl DispatchResult {
    fn invalid(error: &str) -> Self {
        Self {
            success: false,
            mode: DispatchMode::Failed,
            status: "INVALID_RECIPIENT".to_string(),
            warning: None,
            error: Some(error.to_string()),
            failure: Some(FailureKind::InvalidRecipient),
            hint: None,
            manual_link: None,
            diagnostics: Vec::new(),
        }
    }

    fn delivered(
        mode: DispatchMode,
        status: String,
        warning: Option<String>,
        manual_link: String,
    ) -> Self {
        Self {
            success: true,
            mode,
            status,
            warning,
            error: None,
            failure: None,
            hint: None,
            manual_link: Some(manual_link),
            diagnostics: Vec::new(),
        }
    }

    fn failed(
        error: String,
        kind: FailureKind,
        hint: Option<String>,
        manual_link: String,
    ) -> Self {
        Self {
            success: false,
            mode: DispatchMode::Failed,
            status: "MANUAL_REQUIRED".to_string(),
            warning: None,
            error: Some(error),
            failure: Some(kind),
            hint,
            manual_link: Some(manual_link),
            diagnostics: Vec::new(),
        }
    }
}

struct StrategyFailure {
    strategy: &'static str,
    error: String,
    hint: Option<String>,
    kind: FailureKind,
}

impl StrategyFailure {
    fn describe(&self) -> String {
        format!("{}: {}", self.strategy, self.error)
    }
}

/// Best-effort staff alert delivery with a deterministic manual fallback.
pub struct NotificationDispatcher {
    composer: Arc<dyn NativeComposer>,
    strategies: Vec<Box<dyn DeliveryStrategy>>,
}

impl NotificationDispatcher {
    /// Default chain: simulation, then relay, then the direct cloud API.
    pub fn new(
        config: &Config,
        http: Arc<dyn HttpTransport>,
        composer: Arc<dyn NativeComposer>,
    ) -> Self {
        let strategies: Vec<Box<dyn DeliveryStrategy>> = vec![
            Box::new(SimulationStrategy::new(Duration::from_millis(
                config.dispatch.simulation_delay_ms,
            ))),
            Box::new(RelayStrategy::new(http.clone())),
            Box::new(CloudApiStrategy::new(http, config.cloud_api.clone())),
        ];
        Self::with_strategies(composer, strategies)
    }

    pub fn with_strategies(
        composer: Arc<dyn NativeComposer>,
        strategies: Vec<Box<dyn DeliveryStrategy>>,
    ) -> Self {
        Self {
            composer,
            strategies,
        }
    }

    pub async fn dispatch(
        &self,
        request: &DispatchRequest,
        gateway: &GatewayConfiguration,
    ) -> DispatchResult {
        self.dispatch_at(request, gateway, Local::now().time()).await
    }

    /// Dispatch with an explicit envelope timestamp.
    pub async fn dispatch_at(
        &self,
        request: &DispatchRequest,
        gateway: &GatewayConfiguration,
        at: NaiveTime,
    ) -> DispatchResult {
        let recipient = envelope::normalize_recipient(&request.recipient);
        if recipient.is_empty() {
            warn!("Rejected alert: '{}' has no digits", request.recipient);
            return DispatchResult::invalid(INVALID_RECIPIENT_ERROR);
        }

        let text = envelope::compose(request.role, &request.message, at);
        let manual_link = envelope::manual_link(&recipient, &text);

        if request.channel == Channel::Sms {
            self.composer.hand_off(&envelope::sms_uri(&recipient, &text));
            info!("SMS to {} handed to native composer", recipient);
            return DispatchResult::delivered(
                DispatchMode::BasicChannel,
                "HANDED_OFF".to_string(),
                None,
                manual_link,
            );
        }

        let ctx = DispatchContext {
            recipient: &recipient,
            envelope: &text,
            role: request.role,
            gateway,
        };

        let mut diagnostics = Vec::new();
        let mut last_failure: Option<StrategyFailure> = None;

        for strategy in &self.strategies {
            debug!("Attempting {} delivery to {}", strategy.name(), recipient);
            match strategy.attempt(&ctx).await {
                StrategyOutcome::Delivered {
                    mode,
                    status,
                    warning,
                } => {
                    if let Some(prev) = last_failure.take() {
                        diagnostics.push(prev.describe());
                    }
                    info!("Alert to {} delivered via {} ({})", recipient, strategy.name(), mode);
                    let mut result =
                        DispatchResult::delivered(mode, status, warning, manual_link);
                    result.diagnostics = diagnostics;
                    return result;
                }
                StrategyOutcome::Failed { error, hint, kind } => {
                    let failure = StrategyFailure {
                        strategy: strategy.name(),
                        error,
                        hint,
                        kind,
                    };
                    if let Some(prev) = last_failure.replace(failure) {
                        diagnostics.push(prev.describe());
                    }
                }
                StrategyOutcome::Skipped { reason } => {
                    debug!("Skipped {}: {}", strategy.name(), reason);
                }
            }
        }

        let mut result = match last_failure {
            Some(failure) => {
                warn!(
                    "Alert to {} not delivered ({}): {}",
                    recipient, failure.strategy, failure.error
                );
                DispatchResult::failed(failure.error, failure.kind, failure.hint, manual_link)
            }
            None => {
                warn!("No delivery strategy applied for {}", recipient);
                DispatchResult::failed(
                    NO_STRATEGY_ERROR.to_string(),
                    FailureKind::NoStrategy,
                    None,
                    manual_link,
                )
            }
        };
        result.diagnostics = diagnostics;
        result
    }
}
