//! Per-session polling scheduler.
//!
//! Owns the set of active pollers keyed by session id. Each poller is a tokio
//! task driven by a ticker and a cancellation token; a tick runs the strictly
//! sequential pipeline fetch → parse → map → store → publish for that
//! session's endpoint, keeping only the snapshot of the session-owned machine
//! id. Tick failures log at warn and the ticker keeps firing.
//!
//! A global active flag plus the last requested interval let sessions created
//! mid-run join the rotation without another global start.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::CollectorError;
use crate::mapper::map_streams;
use crate::metadata::MetadataStore;
use crate::mtconnect::{self, parse_current, parse_probe};
use crate::sink::DownstreamSink;
use crate::store::SnapshotStore;
use crate::types::ConnectionInfo;

/// Interval used before any global start recorded one (the original
/// collector's fixed cadence).
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// One running poller.
struct ActivePoller {
    machine_id: String,
    token: CancellationToken,
}

struct SchedulerState {
    pollers: HashMap<String, ActivePoller>,
    is_active: bool,
    interval: Duration,
}

/// The set of active pollers plus the shared pipeline collaborators.
pub struct PollingScheduler {
    client: reqwest::Client,
    metadata: Arc<MetadataStore>,
    store: Arc<SnapshotStore>,
    sink: Arc<dyn DownstreamSink>,
    state: Mutex<SchedulerState>,
}

impl PollingScheduler {
    pub fn new(
        client: reqwest::Client,
        metadata: Arc<MetadataStore>,
        store: Arc<SnapshotStore>,
        sink: Arc<dyn DownstreamSink>,
    ) -> Self {
        Self {
            client,
            metadata,
            store,
            sink,
            state: Mutex::new(SchedulerState {
                pollers: HashMap::new(),
                is_active: false,
                interval: DEFAULT_POLL_INTERVAL,
            }),
        }
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, SchedulerState> {
        self.state.lock().unwrap_or_else(|e| {
            warn!("Scheduler state lock poisoned, recovering");
            e.into_inner()
        })
    }

    /// Spawn a periodic poller for this session. Errors with Conflict when a
    /// poller for the session already exists.
    pub fn start_for_session(
        &self,
        session: &ConnectionInfo,
        interval: Duration,
    ) -> Result<(), CollectorError> {
        let mut state = self.lock_state();
        if state.pollers.contains_key(&session.session_id) {
            return Err(CollectorError::Conflict(format!(
                "polling already active for session '{}'",
                session.session_id
            )));
        }

        let token = CancellationToken::new();
        let task_token = token.clone();
        let client = self.client.clone();
        let metadata = Arc::clone(&self.metadata);
        let store = Arc::clone(&self.store);
        let sink = Arc::clone(&self.sink);
        let endpoint = session.config.endpoint_url.clone();
        let machine_id = session.machine_id.clone();
        let session_id = session.session_id.clone();

        tokio::spawn(async move {
            info!(
                session = %session_id,
                machine = %machine_id,
                interval_ms = interval.as_millis() as u64,
                "Poller task starting"
            );
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = task_token.cancelled() => {
                        info!(session = %session_id, "Poller task stopped");
                        return;
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = poll_tick(
                            &client,
                            &endpoint,
                            &machine_id,
                            &metadata,
                            &store,
                            sink.as_ref(),
                        )
                        .await
                        {
                            warn!(session = %session_id, error = %e, "Poll tick failed");
                        }
                    }
                }
            }
        });

        state.pollers.insert(
            session.session_id.clone(),
            ActivePoller {
                machine_id: session.machine_id.clone(),
                token,
            },
        );
        Ok(())
    }

    /// Signal the session's poller to exit and forget it. Idempotent:
    /// stopping an unknown session succeeds (session deletion calls this
    /// regardless of polling state).
    pub fn stop_for_session(&self, session_id: &str) {
        let removed = self.lock_state().pollers.remove(session_id);
        if let Some(poller) = removed {
            poller.token.cancel();
            info!(
                session = %session_id,
                machine = %poller.machine_id,
                "Poller cancelled"
            );
        }
    }

    /// Mark polling globally active, record the interval, and start a poller
    /// for every healthy connection. Partial failures are collected;
    /// successful starts are not rolled back.
    pub fn start_all(
        &self,
        connections: &[ConnectionInfo],
        interval: Duration,
    ) -> Result<(), CollectorError> {
        {
            let mut state = self.lock_state();
            state.is_active = true;
            state.interval = interval;
        }

        let mut failures = Vec::new();
        for connection in connections.iter().filter(|c| c.is_healthy) {
            if let Err(e) = self.start_for_session(connection, interval) {
                failures.push(format!("{}: {e}", connection.session_id));
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(CollectorError::Conflict(format!(
                "failed to start polling for {} session(s): {}",
                failures.len(),
                failures.join("; ")
            )))
        }
    }

    /// Mark polling globally inactive and stop every active poller.
    pub fn stop_all(&self) {
        let mut state = self.lock_state();
        state.is_active = false;
        for (session_id, poller) in state.pollers.drain() {
            poller.token.cancel();
            info!(session = %session_id, "Poller cancelled");
        }
    }

    /// Called by the session registry for every freshly created session: join
    /// the rotation at the recorded interval when global polling is active,
    /// otherwise do nothing.
    pub fn start_if_global_active(&self, session: &ConnectionInfo) -> Result<(), CollectorError> {
        let (is_active, interval) = {
            let state = self.lock_state();
            (state.is_active, state.interval)
        };
        if !is_active {
            return Ok(());
        }
        self.start_for_session(session, interval)
    }

    /// Health probe: one `/probe` fetch against the endpoint.
    pub async fn check_endpoint(&self, endpoint: &str) -> Result<(), CollectorError> {
        let url = mtconnect::probe_url(endpoint);
        mtconnect::fetch_xml(&self.client, &url).await.map(|_| ())
    }

    /// Fetch and index the endpoint's probe, merging into the shared
    /// metadata bundle.
    pub async fn load_metadata_for_endpoint(&self, endpoint: &str) -> Result<(), CollectorError> {
        let url = mtconnect::probe_url(endpoint);
        info!(url = %url, "Loading probe metadata");
        let xml = mtconnect::fetch_xml(&self.client, &url).await?;
        let document = parse_probe(&xml)?;
        self.metadata.index_probe(&document);
        Ok(())
    }

    /// Number of currently running pollers.
    pub fn active_count(&self) -> usize {
        self.lock_state().pollers.len()
    }

    /// Whether a global start is in effect.
    pub fn is_polling_active(&self) -> bool {
        self.lock_state().is_active
    }
}

/// One strictly sequential pipeline pass for a session's endpoint. Snapshots
/// for machines other than the session-owned one are discarded.
async fn poll_tick(
    client: &reqwest::Client,
    endpoint: &str,
    machine_id: &str,
    metadata: &MetadataStore,
    store: &SnapshotStore,
    sink: &dyn DownstreamSink,
) -> Result<(), CollectorError> {
    let url = mtconnect::current_url(endpoint);
    let xml = mtconnect::fetch_xml(client, &url).await?;
    let streams = parse_current(&xml)?;

    // One read guard for the whole mapping pass; dropped before the publish
    // suspension point.
    let snapshots = {
        let bundle = metadata.read();
        map_streams(&streams, &bundle)
    };

    for snapshot in snapshots {
        if snapshot.machine_id != machine_id {
            continue;
        }
        let payload = serde_json::to_vec(&snapshot)
            .map_err(|e| CollectorError::Downstream(format!("snapshot serialization: {e}")))?;
        store.set(machine_id, snapshot);
        sink.publish(machine_id.as_bytes(), &payload).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::MemorySink;
    use crate::types::ConnectionConfig;
    use chrono::Utc;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const PROBE: &str = r#"<MTConnectDevices><Devices>
<Device id="d1" name="M1" uuid="uuid-m1">
  <DataItems>
    <DataItem id="avail1" category="EVENT" type="AVAILABILITY"/>
  </DataItems>
</Device>
</Devices></MTConnectDevices>"#;

    const CURRENT: &str = r#"<MTConnectStreams><Streams>
<DeviceStream name="M1" uuid="uuid-m1">
  <ComponentStream component="Device" name="M1" componentId="d1">
    <Events>
      <Availability dataItemId="avail1" timestamp="2024-05-01T10:00:00Z">AVAILABLE</Availability>
    </Events>
  </ComponentStream>
</DeviceStream>
</Streams></MTConnectStreams>"#;

    fn connection(session_id: &str, machine_id: &str, endpoint: &str) -> ConnectionInfo {
        ConnectionInfo {
            session_id: session_id.to_string(),
            machine_id: machine_id.to_string(),
            config: ConnectionConfig {
                endpoint_url: endpoint.to_string(),
                model: "VF-2".to_string(),
                manufacturer: "Haas".to_string(),
            },
            created_at: Utc::now(),
            last_used: Utc::now(),
            use_count: 1,
            is_healthy: true,
        }
    }

    fn scheduler_with_sink(sink: Arc<MemorySink>) -> PollingScheduler {
        PollingScheduler::new(
            reqwest::Client::new(),
            Arc::new(MetadataStore::new()),
            Arc::new(SnapshotStore::new()),
            sink,
        )
    }

    async fn mock_agent() -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/probe"))
            .respond_with(ResponseTemplate::new(200).set_body_string(PROBE))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/current"))
            .respond_with(ResponseTemplate::new(200).set_body_string(CURRENT))
            .mount(&server)
            .await;
        server
    }

    #[tokio::test]
    async fn test_double_start_is_a_conflict() {
        let scheduler = scheduler_with_sink(Arc::new(MemorySink::new()));
        let conn = connection("s-1", "M1", "http://127.0.0.1:1");

        scheduler
            .start_for_session(&conn, Duration::from_secs(60))
            .unwrap();
        let err = scheduler
            .start_for_session(&conn, Duration::from_secs(60))
            .unwrap_err();
        assert!(matches!(err, CollectorError::Conflict(_)));

        scheduler.stop_all();
    }

    #[tokio::test]
    async fn test_stop_unknown_session_is_idempotent() {
        let scheduler = scheduler_with_sink(Arc::new(MemorySink::new()));
        scheduler.stop_for_session("never-started");
        assert_eq!(scheduler.active_count(), 0);
    }

    #[tokio::test]
    async fn test_stop_then_start_again_succeeds() {
        let scheduler = scheduler_with_sink(Arc::new(MemorySink::new()));
        let conn = connection("s-1", "M1", "http://127.0.0.1:1");

        scheduler
            .start_for_session(&conn, Duration::from_secs(60))
            .unwrap();
        scheduler.stop_for_session("s-1");
        scheduler
            .start_for_session(&conn, Duration::from_secs(60))
            .unwrap();
        assert_eq!(scheduler.active_count(), 1);

        scheduler.stop_all();
    }

    #[tokio::test]
    async fn test_stop_all_then_start_all_reproduces_active_set() {
        let scheduler = scheduler_with_sink(Arc::new(MemorySink::new()));
        let healthy_a = connection("s-a", "MA", "http://127.0.0.1:1");
        let healthy_b = connection("s-b", "MB", "http://127.0.0.1:1");
        let mut unhealthy = connection("s-c", "MC", "http://127.0.0.1:1");
        unhealthy.is_healthy = false;
        let connections = vec![healthy_a, healthy_b, unhealthy];

        scheduler
            .start_all(&connections, Duration::from_secs(60))
            .unwrap();
        assert_eq!(scheduler.active_count(), 2);
        assert!(scheduler.is_polling_active());

        scheduler.stop_all();
        assert_eq!(scheduler.active_count(), 0);
        assert!(!scheduler.is_polling_active());

        scheduler
            .start_all(&connections, Duration::from_secs(60))
            .unwrap();
        assert_eq!(scheduler.active_count(), 2);

        scheduler.stop_all();
    }

    #[tokio::test]
    async fn test_start_if_global_active_is_a_noop_when_inactive() {
        let scheduler = scheduler_with_sink(Arc::new(MemorySink::new()));
        let conn = connection("s-1", "M1", "http://127.0.0.1:1");

        scheduler.start_if_global_active(&conn).unwrap();
        assert_eq!(scheduler.active_count(), 0);
    }

    #[tokio::test]
    async fn test_poller_stores_and_publishes_snapshot() {
        let agent = mock_agent().await;
        let sink = Arc::new(MemorySink::new());
        let scheduler = scheduler_with_sink(Arc::clone(&sink));

        scheduler
            .load_metadata_for_endpoint(&agent.uri())
            .await
            .unwrap();

        let conn = connection("s-1", "M1", &agent.uri());
        scheduler
            .start_for_session(&conn, Duration::from_millis(50))
            .unwrap();

        tokio::time::sleep(Duration::from_millis(200)).await;
        scheduler.stop_all();

        let snapshot = scheduler.store.get("M1").unwrap();
        assert_eq!(snapshot.is_enabled, crate::types::Reported::Known(true));
        assert!(sink.keys().contains(&"M1".to_string()));
    }

    #[tokio::test]
    async fn test_failed_fetch_keeps_ticker_alive() {
        // Endpoint starts broken, then recovers: the poller must survive the
        // failed ticks and store a snapshot once the agent responds.
        let agent = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/current"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(2)
            .mount(&agent)
            .await;
        Mock::given(method("GET"))
            .and(path("/probe"))
            .respond_with(ResponseTemplate::new(200).set_body_string(PROBE))
            .mount(&agent)
            .await;
        Mock::given(method("GET"))
            .and(path("/current"))
            .respond_with(ResponseTemplate::new(200).set_body_string(CURRENT))
            .mount(&agent)
            .await;

        let sink = Arc::new(MemorySink::new());
        let scheduler = scheduler_with_sink(Arc::clone(&sink));
        scheduler
            .load_metadata_for_endpoint(&agent.uri())
            .await
            .unwrap();

        let conn = connection("s-1", "M1", &agent.uri());
        scheduler
            .start_for_session(&conn, Duration::from_millis(40))
            .unwrap();

        tokio::time::sleep(Duration::from_millis(300)).await;
        scheduler.stop_all();

        assert!(scheduler.store.get("M1").is_some());
    }

    #[tokio::test]
    async fn test_check_endpoint_reports_failures() {
        let agent = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/probe"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&agent)
            .await;

        let scheduler = scheduler_with_sink(Arc::new(MemorySink::new()));
        let err = scheduler.check_endpoint(&agent.uri()).await.unwrap_err();
        assert!(matches!(err, CollectorError::Fetch { .. }));
    }
}
