use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use temple_dispatch::config::Config;
use temple_dispatch::dispatch::{
    Channel, DispatchRequest, DispatchResult, NotificationDispatcher, StaffRole,
};
use temple_dispatch::gateway::GatewayConfiguration;
use temple_dispatch::store::journal::Journal;
use temple_dispatch::store::outbox::Outbox;
use temple_dispatch::store::LocalStore;
use temple_dispatch::sync::{self, SyncReport};
use temple_dispatch::transport::{ReqwestTransport, SystemComposer};

const USAGE: &str = "\
Usage: temple-dispatch [--config <path>] <command>

Commands:
  send <whatsapp|sms> <phone> <role> <message...>   Dispatch a staff alert
  queue <phone> <role> <message...>                 Hold an alert in the offline queue
  sync                                              Replay queued alerts, keeping undelivered ones
  history [n]                                       Show the last n dispatches (default 10)
  status                                            Show gateway mode and queue size

Roles: SECURITY, VOLUNTEER, MEDICAL, ADMIN, ALL";

#[derive(Debug, PartialEq)]
enum Command {
    Send(DispatchRequest),
    Queue(DispatchRequest),
    Sync,
    History(usize),
    Status,
}

fn parse_request(channel: Channel, rest: &[String]) -> Result<DispatchRequest> {
    let [recipient, role, message @ ..] = rest else {
        anyhow::bail!("Expected <phone> <role> <message...>");
    };
    let message = message.join(" ");
    if message.trim().is_empty() {
        anyhow::bail!("Alert message is empty");
    }
    Ok(DispatchRequest {
        channel,
        recipient: recipient.clone(),
        message,
        role: role.parse::<StaffRole>()?,
    })
}

/// Parse command-line arguments (program name excluded).
fn parse_args(args: &[String]) -> Result<(PathBuf, Command)> {
    let (config_path, rest) = match args {
        [flag, path, rest @ ..] if flag == "--config" => (PathBuf::from(path), rest),
        _ => (PathBuf::from("config.toml"), args),
    };

    let command = match rest {
        [cmd, channel, tail @ ..] if cmd == "send" => {
            Command::Send(parse_request(channel.parse()?, tail)?)
        }
        [cmd, tail @ ..] if cmd == "queue" => {
            Command::Queue(parse_request(Channel::WhatsApp, tail)?)
        }
        [cmd] if cmd == "sync" => Command::Sync,
        [cmd] if cmd == "history" => Command::History(10),
        [cmd, n] if cmd == "history" => Command::History(
            n.parse()
                .with_context(|| format!("Invalid history length: {}", n))?,
        ),
        [cmd] if cmd == "status" => Command::Status,
        _ => anyhow::bail!("Unrecognized command"),
    };

    Ok((config_path, command))
}

fn render_sync(report: &SyncReport) -> String {
    let mut out = String::new();
    for failure in &report.failures {
        out.push_str(&render_result(failure));
    }
    out.push_str(&format!(
        "Synced {} item(s): {} alert(s) replayed, {} delivered, {} kept for the next sync.\n",
        report.synced, report.replayed, report.delivered, report.retained
    ));
    out
}

/// Operator-facing rendering. A failure always shows the manual dispatch link.
fn render_result(result: &DispatchResult) -> String {
    let mut out = String::new();
    if result.success {
        out.push_str(&format!("✓  Delivered [{}] {}\n", result.mode, result.status));
    } else {
        let kind = result
            .failure
            .map(|kind| format!(" [{}]", kind))
            .unwrap_or_default();
        out.push_str(&format!(
            "✗  Not delivered{}: {}\n",
            kind,
            result.error.as_deref().unwrap_or("unknown error")
        ));
    }
    if let Some(warning) = &result.warning {
        out.push_str(&format!("   warning: {}\n", warning));
    }
    for diagnostic in &result.diagnostics {
        out.push_str(&format!("   diagnostic: {}\n", diagnostic));
    }
    if let Some(hint) = &result.hint {
        out.push_str(&format!("   hint: {}\n", hint));
    }
    if let Some(link) = &result.manual_link {
        if !result.success || result.warning.is_some() {
            out.push_str(&format!("   manual dispatch: {}\n", link));
        }
    }
    out
}

struct Console {
    gateway: GatewayConfiguration,
    dispatcher: NotificationDispatcher,
    outbox: Outbox,
    journal: Journal,
}

impl Console {
    async fn open(config: &Config) -> Result<Self> {
        let store = LocalStore::open(&config.storage.database_path)?;
        let gateway = GatewayConfiguration::load(&store).await?;
        let http = Arc::new(ReqwestTransport::new(Duration::from_millis(
            config.dispatch.request_timeout_ms,
        ))?);
        let dispatcher = NotificationDispatcher::new(config, http, Arc::new(SystemComposer));

        Ok(Self {
            gateway,
            dispatcher,
            outbox: Outbox::new(store.connection()),
            journal: Journal::new(store.connection()),
        })
    }

    async fn send(&self, request: &DispatchRequest) -> Result<()> {
        let result =
            sync::dispatch_and_record(&self.dispatcher, &self.journal, request, &self.gateway)
                .await;
        print!("{}", render_result(&result));
        Ok(())
    }

    async fn queue(&self, request: &DispatchRequest) -> Result<()> {
        let len = sync::queue_alert(&self.outbox, request).await?;
        println!("Queued. {} item(s) waiting for sync.", len);
        Ok(())
    }

    async fn sync(&self) -> Result<()> {
        if self.outbox.count().await? == 0 {
            println!("Offline queue is empty.");
            return Ok(());
        }
        let report =
            sync::replay_outbox(&self.outbox, &self.journal, &self.dispatcher, &self.gateway)
                .await?;
        print!("{}", render_sync(&report));
        Ok(())
    }

    async fn history(&self, limit: usize) -> Result<()> {
        let entries = self.journal.recent(limit).await?;
        if entries.is_empty() {
            println!("No dispatches recorded.");
        }
        for entry in entries {
            println!(
                "{}  {:<8} {:<9} {:<13} {} {}{}",
                entry.recorded_at,
                entry.channel,
                entry.role,
                entry.mode,
                if entry.success { "✓" } else { "✗" },
                entry.recipient,
                entry
                    .error
                    .as_deref()
                    .map(|e| format!("  ({})", e))
                    .unwrap_or_default()
            );
        }
        Ok(())
    }

    async fn status(&self) -> Result<()> {
        let gateway = &self.gateway;
        println!("Gateway:     {} ({})", gateway.mode_label(), gateway.status);
        println!("Sender:      {}", gateway.sender_name);
        println!(
            "Relay:       {}",
            gateway.relay_endpoint().unwrap_or("(none)")
        );
        println!(
            "CORS proxy:  {}",
            if gateway.use_cors_proxy { "on" } else { "off" }
        );
        println!("Queued:      {}", self.outbox.count().await?);
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,temple_dispatch=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let (config_path, command) = match parse_args(&args) {
        Ok(parsed) => parsed,
        Err(e) => {
            eprintln!("{}\n\n{}", e, USAGE);
            std::process::exit(2);
        }
    };

    info!("Loading configuration from: {}", config_path.display());
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    let console = Console::open(&config).await?;
    match command {
        Command::Send(request) => console.send(&request).await,
        Command::Queue(request) => console.queue(&request).await,
        Command::Sync => console.sync().await,
        Command::History(limit) => console.history(limit).await,
        Command::Status => console.status().await,
    }
}
