//! Gateway settings wizard.
//!
//! Prompts for the messaging gateway credentials, pre-filled with whatever is
//! currently saved, and persists them to the local store. If no `config.toml`
//! exists yet, a starter one is written next to it.
//!
//! Press Enter to keep a value, or type `-` to clear it.

use anyhow::{Context, Result};
use std::path::PathBuf;

use temple_dispatch::config::Config;
use temple_dispatch::gateway::{GatewayConfiguration, GatewayStatus};
use temple_dispatch::store::LocalStore;

// ── Answer handling ────────────────────────────────────────────────────────────

/// Empty keeps the current value, `-` clears it, anything else replaces it.
fn apply_answer(current: &str, answer: &str) -> String {
    match answer.trim() {
        "" => current.to_owned(),
        "-" => String::new(),
        other => other.to_owned(),
    }
}

fn apply_flag(current: bool, answer: &str) -> Result<bool> {
    match answer.trim().to_ascii_lowercase().as_str() {
        "" => Ok(current),
        "y" | "yes" | "on" | "true" => Ok(true),
        "n" | "no" | "off" | "false" => Ok(false),
        other => anyhow::bail!("Expected yes or no, got '{other}'"),
    }
}

fn apply_status(current: GatewayStatus, answer: &str) -> Result<GatewayStatus> {
    match answer.trim().to_ascii_uppercase().as_str() {
        "" => Ok(current),
        "CONNECTED" => Ok(GatewayStatus::Connected),
        "DISCONNECTED" => Ok(GatewayStatus::Disconnected),
        "STANDBY" => Ok(GatewayStatus::Standby),
        other => anyhow::bail!("Unknown gateway status '{other}'"),
    }
}

/// Never echo a stored token back in full.
fn mask_secret(secret: &str) -> String {
    if secret.is_empty() {
        return "not set".to_owned();
    }
    let tail: String = secret
        .chars()
        .rev()
        .take(4)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    format!("set, ends …{tail}")
}

// ── Config formatting ──────────────────────────────────────────────────────────

/// Produces a starter config.toml string. Extracted so it can be unit-tested.
fn format_config(db_path: &str) -> String {
    format!(
        r#"[storage]
database_path = "{db_path}"

[dispatch]
simulation_delay_ms = 800
request_timeout_ms = 10000

[cloud_api]
base_url = "https://graph.facebook.com"
version = "v21.0"
cors_proxy_prefix = "https://corsproxy.io/?url="
"#
    )
}

// ── Entry point ────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    use std::io::{self, Write};

    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    if !config_path.exists() {
        std::fs::write(&config_path, format_config("temple-dispatch.db"))
            .with_context(|| format!("Could not write {}", config_path.display()))?;
        println!("✓  Starter config written to {}", config_path.display());
    }

    let config = Config::load(&config_path)?;
    let store = LocalStore::open(&config.storage.database_path)?;
    let mut gateway = GatewayConfiguration::load(&store).await?;

    println!("=== Gateway Settings ===\n");

    let read_line = |prompt: &str| -> Result<String> {
        print!("{prompt}");
        io::stdout().flush()?;
        let mut buf = String::new();
        io::stdin().read_line(&mut buf)?;
        Ok(buf.trim().to_owned())
    };

    let relay = gateway.relay_url.clone().unwrap_or_default();

    gateway.access_token = apply_answer(
        &gateway.access_token,
        &read_line(&format!(
            "Access token [{}]: ",
            mask_secret(&gateway.access_token)
        ))?,
    );
    gateway.phone_number_id = apply_answer(
        &gateway.phone_number_id,
        &read_line(&format!(
            "Phone number ID, empty for demo mode [{}]: ",
            gateway.phone_number_id
        ))?,
    );
    let relay = apply_answer(&relay, &read_line(&format!("Relay URL [{relay}]: "))?);
    gateway.relay_url = (!relay.is_empty()).then_some(relay);
    gateway.sender_name = apply_answer(
        &gateway.sender_name,
        &read_line(&format!("Sender name [{}]: ", gateway.sender_name))?,
    );
    gateway.use_cors_proxy = apply_flag(
        gateway.use_cors_proxy,
        &read_line(&format!(
            "Use CORS proxy (y/n) [{}]: ",
            if gateway.use_cors_proxy { "y" } else { "n" }
        ))?,
    )?;
    gateway.status = apply_status(
        gateway.status,
        &read_line(&format!(
            "Gateway status (CONNECTED/DISCONNECTED/STANDBY) [{}]: ",
            gateway.status
        ))?,
    )?;

    gateway.save(&store).await?;

    println!(
        "\n✓  Gateway settings saved to {}",
        config.storage.database_path.display()
    );
    if gateway.is_demo_mode() {
        println!("   No phone number ID: dispatches will run in demo mode.");
    }
    Ok(())
}

// ── Tests ──────────────────────────────────────────────────────────────────────
