//! Offline queue capture and replay.
//!
//! Alerts raised while the gateway is unusable are held in the outbox. A sync
//! replays each one through the dispatcher and only removes it once it was
//! delivered, so an interrupted or failing sync never loses an alert. A crash
//! between delivery and removal replays that alert again on the next sync.

use anyhow::{Context, Result};
use tracing::{error, info, warn};

use crate::dispatch::{DispatchRequest, DispatchResult, NotificationDispatcher};
use crate::gateway::GatewayConfiguration;
use crate::store::journal::Journal;
use crate::store::outbox::{OfflineKind, Outbox};

/// Hold an alert until the next sync. Returns the resulting queue length.
pub async fn queue_alert(outbox: &Outbox, request: &DispatchRequest) -> Result<usize> {
    let payload = serde_json::to_value(request).context("Failed to encode alert")?;
    outbox.enqueue(OfflineKind::Alert, &payload).await
}

/// Dispatch and journal the attempt. A journal write failure is logged, never returned.
pub async fn dispatch_and_record(
    dispatcher: &NotificationDispatcher,
    journal: &Journal,
    request: &DispatchRequest,
    gateway: &GatewayConfiguration,
) -> DispatchResult {
    let result = dispatcher.dispatch(request, gateway).await;
    if let Err(e) = journal.record(request, &result).await {
        error!("Failed to journal dispatch: {:#}", e);
    }
    result
}

#[derive(Debug, Default)]
pub struct SyncReport {
    /// Items removed from the queue
    pub synced: usize,
    /// Alerts sent back through the dispatcher
    pub replayed: usize,
    pub delivered: usize,
    /// Items still queued: undelivered and undecodable alerts
    pub retained: usize,
    pub failures: Vec<DispatchResult>,
}

/// Replay queued alerts oldest first. Non-alert items are acknowledged without replay.
pub async fn replay_outbox(
    outbox: &Outbox,
    journal: &Journal,
    dispatcher: &NotificationDispatcher,
    gateway: &GatewayConfiguration,
) -> Result<SyncReport> {
    let mut report = SyncReport::default();

    for item in outbox.pending().await? {
        if item.kind != OfflineKind::Alert {
            outbox.remove(&item.id).await?;
            report.synced += 1;
            continue;
        }

        let request: DispatchRequest = match serde_json::from_value(item.payload) {
            Ok(request) => request,
            Err(e) => {
                warn!("Keeping undecodable queued alert {}: {}", item.id, e);
                report.retained += 1;
                continue;
            }
        };

        report.replayed += 1;
        let result = dispatch_and_record(dispatcher, journal, &request, gateway).await;
        if result.success {
            outbox.remove(&item.id).await?;
            report.delivered += 1;
            report.synced += 1;
        } else {
            warn!("Queued alert {} still undelivered, keeping it", item.id);
            report.retained += 1;
            report.failures.push(result);
        }
    }

    info!(
        "Sync finished: {} synced, {} replayed, {} delivered, {} retained",
        report.synced, report.replayed, report.delivered, report.retained
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::dispatch::{Channel, DispatchMode, StaffRole};
    use crate::store::LocalStore;
    use crate::transport::testing::{reply, RecordingComposer, ScriptedTransport};
    use crate::transport::{HttpReply, TransportError};
    use serde_json::json;
    use std::sync::Arc;

    struct Fixture {
        _store: LocalStore,
        outbox: Outbox,
        journal: Journal,
    }

    fn fixture() -> Fixture {
        let store = LocalStore::open_in_memory().unwrap();
        Fixture {
            outbox: Outbox::new(store.connection()),
            journal: Journal::new(store.connection()),
            _store: store,
        }
    }

    fn dispatcher(
        script: Vec<Result<HttpReply, TransportError>>,
    ) -> (NotificationDispatcher, Arc<ScriptedTransport>) {
        let mut config = Config::default();
        config.dispatch.simulation_delay_ms = 0;
        let http = ScriptedTransport::new(script);
        let d = NotificationDispatcher::new(
            &config,
            http.clone(),
            Arc::new(RecordingComposer::default()),
        );
        (d, http)
    }

    fn live_gateway() -> GatewayConfiguration {
        GatewayConfiguration {
            access_token: "tok".to_string(),
            phone_number_id: "555".to_string(),
            relay_url: None,
            use_cors_proxy: false,
            ..Default::default()
        }
    }

    fn alert() -> DispatchRequest {
        DispatchRequest {
            channel: Channel::WhatsApp,
            recipient: "+91 98765-43210".to_string(),
            message: "Hold pilgrims at East Gate".to_string(),
            role: StaffRole::Volunteer,
        }
    }

    #[tokio::test]
    async fn test_queue_alert_stores_request() {
        let f = fixture();

        assert_eq!(queue_alert(&f.outbox, &alert()).await.unwrap(), 1);

        let items = f.outbox.pending().await.unwrap();
        assert_eq!(items[0].kind, OfflineKind::Alert);
        let stored: DispatchRequest = serde_json::from_value(items[0].payload.clone()).unwrap();
        assert_eq!(stored, alert());
    }

    #[tokio::test]
    async fn test_mixed_queue_replays_only_alerts() {
        let f = fixture();
        f.outbox
            .enqueue(OfflineKind::Analytics, &json!({"density": 72}))
            .await
            .unwrap();
        queue_alert(&f.outbox, &alert()).await.unwrap();
        f.outbox
            .enqueue(OfflineKind::ChatMsg, &json!({"text": "namaskaram"}))
            .await
            .unwrap();
        let (d, http) = dispatcher(vec![reply(200, "{}")]);

        let report = replay_outbox(&f.outbox, &f.journal, &d, &live_gateway())
            .await
            .unwrap();

        assert_eq!(report.synced, 3);
        assert_eq!(report.replayed, 1);
        assert_eq!(report.delivered, 1);
        assert_eq!(report.retained, 0);
        assert_eq!(http.calls().len(), 1);
        assert_eq!(http.calls()[0].2["to"], "919876543210");
        assert_eq!(f.outbox.count().await.unwrap(), 0);

        let entries = f.journal.recent(10).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].success);
        assert_eq!(entries[0].mode, "LIVE");
    }

    #[tokio::test]
    async fn test_failed_replay_keeps_alert_queued() {
        let f = fixture();
        queue_alert(&f.outbox, &alert()).await.unwrap();
        let (d, _) = dispatcher(vec![Err(TransportError::Connect("refused".to_string()))]);

        let report = replay_outbox(&f.outbox, &f.journal, &d, &live_gateway())
            .await
            .unwrap();

        assert_eq!(report.synced, 0);
        assert_eq!(report.replayed, 1);
        assert_eq!(report.delivered, 0);
        assert_eq!(report.retained, 1);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].mode, DispatchMode::Failed);
        assert!(report.failures[0].manual_link.is_some());
        assert_eq!(f.outbox.count().await.unwrap(), 1);

        let entries = f.journal.recent(10).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert!(!entries[0].success);

        // Next sync with the gateway back delivers and clears it
        let (d, _) = dispatcher(vec![reply(200, "{}")]);
        let report = replay_outbox(&f.outbox, &f.journal, &d, &live_gateway())
            .await
            .unwrap();
        assert_eq!(report.delivered, 1);
        assert_eq!(report.synced, 1);
        assert_eq!(f.outbox.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_undecodable_alert_is_retained_without_dispatch() {
        let f = fixture();
        f.outbox
            .enqueue(OfflineKind::Alert, &json!({"recipient": 12345}))
            .await
            .unwrap();
        let (d, http) = dispatcher(vec![]);

        let report = replay_outbox(&f.outbox, &f.journal, &d, &live_gateway())
            .await
            .unwrap();

        assert_eq!(report.synced, 0);
        assert_eq!(report.replayed, 0);
        assert_eq!(report.retained, 1);
        assert!(http.calls().is_empty());
        assert!(f.journal.recent(10).await.unwrap().is_empty());
        assert_eq!(f.outbox.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_empty_queue_reports_nothing() {
        let f = fixture();
        let (d, _) = dispatcher(vec![]);

        let report = replay_outbox(&f.outbox, &f.journal, &d, &live_gateway())
            .await
            .unwrap();

        assert_eq!(report.synced, 0);
        assert_eq!(report.retained, 0);
        assert!(report.failures.is_empty());
    }
}
