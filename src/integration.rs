/// Integration Client: talks to a Home Assistant instance over its REST API
/// for light toggling and brightness nudges.
///
/// Grounded in `HaManager.py` — same three operations, same stateful
/// "last light touched" rule for brightness (`increase_brightness`/
/// `decrease_brightness` act on whichever light `toggle_light` last named;
/// calling either before any toggle is a no-op warning, not an error), same
/// swallow-and-log behavior for HTTP failures rather than propagating them
/// into the dispatcher. `ureq` replaces `httpx` as the teacher crate already
/// depends on it; blocking calls are pushed onto `spawn_blocking` since the
/// rest of the crate is async.
use std::sync::Mutex;
use std::time::Duration;

use serde_json::json;

use crate::error::{Error, Result};

pub struct IntegrationClient {
    api_url: String,
    token: String,
    timeout: Duration,
    last_light_entity_id: Mutex<Option<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LightState {
    pub entity_id: String,
    pub state: String,
    pub name: String,
}

impl IntegrationClient {
    /// `base_url` is normalized the same way the original does: trailing
    /// slash stripped, `/api` appended if not already present.
    pub fn new(base_url: &str, token: String, timeout: Duration) -> Self {
        let trimmed = base_url.trim_end_matches('/');
        let api_url = if trimmed.ends_with("/api") { trimmed.to_string() } else { format!("{trimmed}/api") };
        Self { api_url, token, timeout, last_light_entity_id: Mutex::new(None) }
    }

    async fn call_service(&self, domain: &'static str, service: &'static str, data: serde_json::Value) -> Result<()> {
        let url = format!("{}/services/{}/{}", self.api_url, domain, service);
        let token = self.token.clone();
        let timeout = self.timeout;
        tokio::task::spawn_blocking(move || {
            ureq::post(&url)
                .header("Authorization", &format!("Bearer {token}"))
                .config()
                .timeout_global(Some(timeout))
                .build()
                .send_json(data)
                .map(|_| ())
        })
        .await
        .map_err(|e| Error::Fatal(e.to_string()))?
        .map_err(|e| {
            log::error!("HA service call failed: {e}");
            Error::TransportUnavailable(e.to_string())
        })
    }

    /// `GET /states`, filtered to `light.*` entities.
    pub async fn list_lights(&self) -> Result<Vec<LightState>> {
        let url = format!("{}/states", self.api_url);
        let token = self.token.clone();
        let timeout = self.timeout;
        let body = tokio::task::spawn_blocking(move || {
            ureq::get(&url)
                .header("Authorization", &format!("Bearer {token}"))
                .config()
                .timeout_global(Some(timeout))
                .build()
                .call()
                .and_then(|mut resp| resp.body_mut().read_to_string().map_err(Into::into))
        })
        .await
        .map_err(|e| Error::Fatal(e.to_string()))?
        .map_err(|e| {
            log::error!("HA list_lights failed: {e}");
            Error::TransportUnavailable(e.to_string())
        })?;

        let states: Vec<serde_json::Value> = serde_json::from_str(&body).map_err(|e| Error::Fatal(e.to_string()))?;
        let lights = states
            .into_iter()
            .filter_map(|state| {
                let entity_id = state.get("entity_id")?.as_str()?.to_string();
                if !entity_id.starts_with("light.") {
                    return None;
                }
                let state_value = state.get("state").and_then(|s| s.as_str()).unwrap_or("unknown").to_string();
                let name = state
                    .get("attributes")
                    .and_then(|a| a.get("friendly_name"))
                    .and_then(|n| n.as_str())
                    .map(str::to_string)
                    .unwrap_or_else(|| entity_id.clone());
                Some(LightState { entity_id, state: state_value, name })
            })
            .collect();
        Ok(lights)
    }

    pub async fn toggle_light(&self, entity_id: &str) -> Result<()> {
        let result = self.call_service("light", "toggle", json!({ "entity_id": entity_id })).await;
        *self.last_light_entity_id.lock().unwrap() = Some(entity_id.to_string());
        result
    }

    async fn turn_on(&self, extra: serde_json::Value) -> Result<()> {
        let entity_id = self.last_light_entity_id.lock().unwrap().clone();
        let Some(entity_id) = entity_id else {
            log::warn!("Tried to change brightness without setting light first");
            return Ok(());
        };
        let mut data = json!({ "entity_id": entity_id });
        data.as_object_mut().unwrap().extend(extra.as_object().unwrap().clone());
        self.call_service("light", "turn_on", data).await
    }

    pub async fn increase_brightness(&self) -> Result<()> {
        self.turn_on(json!({ "brightness_step_pct": 10 })).await
    }

    pub async fn decrease_brightness(&self) -> Result<()> {
        self.turn_on(json!({ "brightness_step_pct": -10 })).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_base_url() {
        let c = IntegrationClient::new("http://ha.local:8123/", "tok".into(), Duration::from_secs(5));
        assert_eq!(c.api_url, "http://ha.local:8123/api");

        let c2 = IntegrationClient::new("http://ha.local:8123/api", "tok".into(), Duration::from_secs(5));
        assert_eq!(c2.api_url, "http://ha.local:8123/api");
    }

    #[tokio::test]
    async fn brightness_without_prior_toggle_is_a_noop() {
        let c = IntegrationClient::new("http://127.0.0.1:1", "tok".into(), Duration::from_millis(1));
        let result = c.increase_brightness().await;
        assert!(result.is_ok());
    }
}
