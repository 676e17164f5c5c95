//! Session registry.
//!
//! A session binds a caller to one device behind an MTConnect endpoint.
//! Creation validates the endpoint's `/probe` against the declared model,
//! indexes the probe metadata, and — when a global polling start is in
//! effect — joins the new session into the rotation immediately.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::CollectorError;
use crate::mtconnect::{self, parse_probe, ProbeDevice};
use crate::polling::PollingScheduler;
use crate::types::{ConnectionConfig, ConnectionInfo, ConnectionRequest};

/// Result of a health check: the refreshed record plus the probe error when
/// the endpoint is unhealthy.
#[derive(Debug)]
pub struct CheckOutcome {
    pub info: ConnectionInfo,
    pub error: Option<CollectorError>,
}

/// Pool of active sessions.
pub struct SessionRegistry {
    client: reqwest::Client,
    scheduler: Arc<PollingScheduler>,
    pool: Mutex<HashMap<String, ConnectionInfo>>,
}

impl SessionRegistry {
    pub fn new(client: reqwest::Client, scheduler: Arc<PollingScheduler>) -> Self {
        Self {
            client,
            scheduler,
            pool: Mutex::new(HashMap::new()),
        }
    }

    fn lock_pool(&self) -> std::sync::MutexGuard<'_, HashMap<String, ConnectionInfo>> {
        self.pool.lock().unwrap_or_else(|e| {
            warn!("Session pool lock poisoned, recovering");
            e.into_inner()
        })
    }

    fn find_duplicate(
        pool: &HashMap<String, ConnectionInfo>,
        request: &ConnectionRequest,
    ) -> Option<String> {
        pool.values()
            .find(|conn| {
                conn.config.endpoint_url == request.endpoint_url
                    && conn.config.model == request.model
            })
            .map(|conn| conn.session_id.clone())
    }

    /// Validate the endpoint's probe and commit a new session.
    pub async fn create(
        &self,
        request: ConnectionRequest,
    ) -> Result<ConnectionInfo, CollectorError> {
        // Fast rejection before touching the network; checked again under the
        // insertion lock below.
        if let Some(existing) = Self::find_duplicate(&self.lock_pool(), &request) {
            return Err(duplicate_error(&request, &existing));
        }

        let url = mtconnect::probe_url(&request.endpoint_url);
        let xml = mtconnect::fetch_xml(&self.client, &url).await?;
        let document = parse_probe(&xml)?;
        if document.devices.is_empty() {
            return Err(CollectorError::NotFound(format!(
                "no devices found in /probe response from {url}"
            )));
        }

        let Some(device) = find_device_by_model(&document.devices, &request.model) else {
            return Err(CollectorError::NotFound(format!(
                "device with model '{}' not found on endpoint {}",
                request.model, request.endpoint_url
            )));
        };
        let manufacturer = device
            .description
            .as_ref()
            .map(|d| d.manufacturer.clone())
            .unwrap_or_default();

        if !request.manufacturer.is_empty()
            && !manufacturer.eq_ignore_ascii_case(&request.manufacturer)
        {
            return Err(CollectorError::Validation(format!(
                "manufacturer '{}' does not match the probe's manufacturer '{}' for model '{}'",
                request.manufacturer, manufacturer, request.model
            )));
        }

        self.scheduler
            .load_metadata_for_endpoint(&request.endpoint_url)
            .await?;

        let now = Utc::now();
        let info = ConnectionInfo {
            session_id: Uuid::new_v4().to_string(),
            machine_id: device.name.clone(),
            config: ConnectionConfig {
                endpoint_url: request.endpoint_url.clone(),
                model: request.model.clone(),
                manufacturer,
            },
            created_at: now,
            last_used: now,
            use_count: 1,
            is_healthy: true,
        };

        {
            let mut pool = self.lock_pool();
            if let Some(existing) = Self::find_duplicate(&pool, &request) {
                return Err(duplicate_error(&request, &existing));
            }
            pool.insert(info.session_id.clone(), info.clone());
        }
        info!(
            session = %info.session_id,
            machine = %info.machine_id,
            endpoint = %info.config.endpoint_url,
            "Session created"
        );

        // A failure to auto-join the rotation must not undo the create.
        if let Err(e) = self.scheduler.start_if_global_active(&info) {
            warn!(
                session = %info.session_id,
                error = %e,
                "Failed to auto-start polling for new session"
            );
        }

        Ok(info)
    }

    pub fn get(&self, session_id: &str) -> Option<ConnectionInfo> {
        self.lock_pool().get(session_id).cloned()
    }

    pub fn get_all(&self) -> Vec<ConnectionInfo> {
        self.lock_pool().values().cloned().collect()
    }

    /// Remove a session and stop its poller.
    pub fn delete(&self, session_id: &str) -> Result<(), CollectorError> {
        {
            let mut pool = self.lock_pool();
            if pool.remove(session_id).is_none() {
                return Err(CollectorError::NotFound(format!(
                    "session '{session_id}' not found"
                )));
            }
        }
        self.scheduler.stop_for_session(session_id);
        info!(session = %session_id, "Session deleted");
        Ok(())
    }

    /// Probe the session's endpoint and refresh its health flag, last-used
    /// time, and use counter.
    pub async fn check(&self, session_id: &str) -> Result<CheckOutcome, CollectorError> {
        let endpoint = self
            .get(session_id)
            .ok_or_else(|| {
                CollectorError::NotFound(format!("session '{session_id}' not found"))
            })?
            .config
            .endpoint_url;

        let result = self.scheduler.check_endpoint(&endpoint).await;

        let mut pool = self.lock_pool();
        let conn = pool.get_mut(session_id).ok_or_else(|| {
            CollectorError::NotFound(format!("session '{session_id}' not found"))
        })?;
        conn.is_healthy = result.is_ok();
        conn.last_used = Utc::now();
        conn.use_count += 1;

        Ok(CheckOutcome {
            info: conn.clone(),
            error: result.err(),
        })
    }
}

fn duplicate_error(request: &ConnectionRequest, existing_session: &str) -> CollectorError {
    CollectorError::Conflict(format!(
        "a session for model '{}' on endpoint '{}' already exists with SessionID: {}",
        request.model, request.endpoint_url, existing_session
    ))
}

/// Scan probe devices for one whose Description free-text contains the
/// declared model. Runs of whitespace collapse to single spaces before the
/// substring match, so multi-line descriptions still match.
fn find_device_by_model<'a>(devices: &'a [ProbeDevice], model: &str) -> Option<&'a ProbeDevice> {
    devices.iter().find(|device| {
        device.description.as_ref().is_some_and(|description| {
            let normalized = description
                .text
                .split_whitespace()
                .collect::<Vec<_>>()
                .join(" ");
            normalized.contains(model)
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::MetadataStore;
    use crate::sink::MemorySink;
    use crate::store::SnapshotStore;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const PROBE: &str = r#"<MTConnectDevices><Devices>
<Device id="d1" name="M1" uuid="uuid-m1">
  <Description manufacturer="Haas" model="VF-2" serialNumber="123">
    Haas
      VF-2 vertical
    machining center
  </Description>
  <DataItems>
    <DataItem id="avail1" category="EVENT" type="AVAILABILITY"/>
  </DataItems>
</Device>
</Devices></MTConnectDevices>"#;

    fn registry(client: reqwest::Client) -> SessionRegistry {
        let scheduler = Arc::new(PollingScheduler::new(
            client.clone(),
            Arc::new(MetadataStore::new()),
            Arc::new(SnapshotStore::new()),
            Arc::new(MemorySink::new()),
        ));
        SessionRegistry::new(client, scheduler)
    }

    async fn probe_server() -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/probe"))
            .respond_with(ResponseTemplate::new(200).set_body_string(PROBE))
            .mount(&server)
            .await;
        server
    }

    fn request(endpoint: &str, model: &str, manufacturer: &str) -> ConnectionRequest {
        ConnectionRequest {
            endpoint_url: endpoint.to_string(),
            model: model.to_string(),
            manufacturer: manufacturer.to_string(),
        }
    }

    #[tokio::test]
    async fn test_create_resolves_machine_and_manufacturer_from_probe() {
        let server = probe_server().await;
        let registry = registry(reqwest::Client::new());

        let info = registry
            .create(request(&server.uri(), "VF-2 vertical", ""))
            .await
            .unwrap();
        assert_eq!(info.machine_id, "M1");
        assert_eq!(info.config.manufacturer, "Haas");
        assert!(info.is_healthy);
        assert_eq!(info.use_count, 1);
        assert_eq!(registry.get_all().len(), 1);
        assert!(registry.get(&info.session_id).is_some());
    }

    #[tokio::test]
    async fn test_create_matches_model_across_collapsed_whitespace() {
        // "VF-2 vertical" spans a newline plus indentation in the raw text.
        let server = probe_server().await;
        let registry = registry(reqwest::Client::new());
        assert!(registry
            .create(request(&server.uri(), "VF-2 vertical machining", ""))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_create_unknown_model_is_not_found() {
        let server = probe_server().await;
        let registry = registry(reqwest::Client::new());

        let err = registry
            .create(request(&server.uri(), "DMU-50", ""))
            .await
            .unwrap_err();
        assert!(matches!(err, CollectorError::NotFound(_)));
        assert!(registry.get_all().is_empty());
    }

    #[tokio::test]
    async fn test_create_manufacturer_mismatch_rejected() {
        let server = probe_server().await;
        let registry = registry(reqwest::Client::new());

        let err = registry
            .create(request(&server.uri(), "VF-2", "DMG Mori"))
            .await
            .unwrap_err();
        assert!(matches!(err, CollectorError::Validation(_)));
    }

    #[tokio::test]
    async fn test_create_manufacturer_match_is_case_insensitive() {
        let server = probe_server().await;
        let registry = registry(reqwest::Client::new());
        assert!(registry
            .create(request(&server.uri(), "VF-2", "haas"))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_duplicate_create_conflicts_without_mutating_pool() {
        let server = probe_server().await;
        let registry = registry(reqwest::Client::new());

        registry
            .create(request(&server.uri(), "VF-2", ""))
            .await
            .unwrap();
        let err = registry
            .create(request(&server.uri(), "VF-2", ""))
            .await
            .unwrap_err();
        assert!(matches!(err, CollectorError::Conflict(_)));
        assert_eq!(registry.get_all().len(), 1);
    }

    #[tokio::test]
    async fn test_same_endpoint_different_model_is_allowed() {
        let server = MockServer::start().await;
        let probe = r#"<MTConnectDevices><Devices>
<Device id="d1" name="M1" uuid="uuid-m1">
  <Description manufacturer="Haas" model="VF-2">VF-2</Description>
</Device>
<Device id="d2" name="M2" uuid="uuid-m2">
  <Description manufacturer="Haas" model="VF-4">VF-4</Description>
</Device>
</Devices></MTConnectDevices>"#;
        Mock::given(method("GET"))
            .and(path("/probe"))
            .respond_with(ResponseTemplate::new(200).set_body_string(probe))
            .mount(&server)
            .await;

        let registry = registry(reqwest::Client::new());
        let first = registry.create(request(&server.uri(), "VF-2", "")).await.unwrap();
        let second = registry.create(request(&server.uri(), "VF-4", "")).await.unwrap();
        assert_eq!(first.machine_id, "M1");
        assert_eq!(second.machine_id, "M2");
    }

    #[tokio::test]
    async fn test_delete_unknown_session_is_not_found() {
        let registry = registry(reqwest::Client::new());
        let err = registry.delete("missing").unwrap_err();
        assert!(matches!(err, CollectorError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_delete_removes_session() {
        let server = probe_server().await;
        let registry = registry(reqwest::Client::new());
        let info = registry
            .create(request(&server.uri(), "VF-2", ""))
            .await
            .unwrap();

        registry.delete(&info.session_id).unwrap();
        assert!(registry.get(&info.session_id).is_none());
        // Deleting again reports the absence.
        assert!(registry.delete(&info.session_id).is_err());
    }

    #[tokio::test]
    async fn test_check_updates_health_and_counters() {
        let server = probe_server().await;
        let registry = registry(reqwest::Client::new());
        let info = registry
            .create(request(&server.uri(), "VF-2", ""))
            .await
            .unwrap();

        let outcome = registry.check(&info.session_id).await.unwrap();
        assert!(outcome.error.is_none());
        assert!(outcome.info.is_healthy);
        assert_eq!(outcome.info.use_count, 2);
    }

    #[tokio::test]
    async fn test_check_marks_unhealthy_on_probe_failure() {
        let server = probe_server().await;
        let registry = registry(reqwest::Client::new());
        let info = registry
            .create(request(&server.uri(), "VF-2", ""))
            .await
            .unwrap();

        // The agent goes away.
        server.reset().await;
        Mock::given(method("GET"))
            .and(path("/probe"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let outcome = registry.check(&info.session_id).await.unwrap();
        assert!(outcome.error.is_some());
        assert!(!outcome.info.is_healthy);
        assert_eq!(registry.get(&info.session_id).unwrap().is_healthy, false);
    }
}
