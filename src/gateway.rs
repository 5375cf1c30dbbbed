use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::store::LocalStore;

/// Fixed key the gateway settings are persisted under.
pub const GATEWAY_CONFIG_KEY: &str = "svsd_gateway_config";

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum GatewayStatus {
    #[default]
    Connected,
    Disconnected,
    Standby,
}

impl std::fmt::Display for GatewayStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GatewayStatus::Connected => write!(f, "CONNECTED"),
            GatewayStatus::Disconnected => write!(f, "DISCONNECTED"),
            GatewayStatus::Standby => write!(f, "STANDBY"),
        }
    }
}

/// Operator-provisioned messaging credentials. Read-only during a dispatch.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct GatewayConfiguration {
    pub access_token: String,
    /// Routing identifier for the cloud API. Empty means demo/simulation mode.
    pub phone_number_id: String,
    pub relay_url: Option<String>,
    pub sender_name: String,
    pub status: GatewayStatus,
    pub use_cors_proxy: bool,
}

impl Default for GatewayConfiguration {
    fn default() -> Self {
        Self {
            access_token: String::new(),
            phone_number_id: String::new(),
            relay_url: Some("http://localhost:8000/send".to_string()),
            sender_name: "Command Center - Dwaraka Tirumala".to_string(),
            status: GatewayStatus::Connected,
            use_cors_proxy: true,
        }
    }
}

impl GatewayConfiguration {
    pub fn is_demo_mode(&self) -> bool {
        self.phone_number_id.trim().is_empty()
    }

    /// Headline shown by the console status view.
    pub fn mode_label(&self) -> &'static str {
        if self.is_demo_mode() {
            "DEMO MODE"
        } else {
            "LIVE GATEWAY"
        }
    }

    /// Relay URL, only when it looks like an HTTP(S) endpoint.
    pub fn relay_endpoint(&self) -> Option<&str> {
        self.relay_url
            .as_deref()
            .map(str::trim)
            .filter(|url| url.starts_with("http"))
    }

    /// Load from the local store, falling back to built-in defaults when nothing was saved.
    pub async fn load(store: &LocalStore) -> Result<Self> {
        match store.get(GATEWAY_CONFIG_KEY).await? {
            Some(raw) => {
                debug!("Loaded gateway settings from '{}'", GATEWAY_CONFIG_KEY);
                serde_json::from_str(&raw).with_context(|| {
                    format!("Corrupt gateway settings under '{}'", GATEWAY_CONFIG_KEY)
                })
            }
            None => {
                info!("No saved gateway settings, using defaults");
                Ok(Self::default())
            }
        }
    }

    pub async fn save(&self, store: &LocalStore) -> Result<()> {
        let raw = serde_json::to_string(self).context("Failed to encode gateway settings")?;
        store.set(GATEWAY_CONFIG_KEY, &raw).await?;
        info!("Gateway settings saved");
        Ok(())
    }
}
