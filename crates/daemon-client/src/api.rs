//! Typed daemon operations.
//!
//! Every operation has a pure `*_request` builder plus an async method that
//! sends it through a [`Modem`] and interprets the answer. Non-2xx replies
//! always surface as [`ClientError::Daemon`] with the daemon's body intact.

use daemon_wire::{Method, RequestDescriptor, ResponseMessage};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{ClientError, Result};
use crate::modem::Modem;
use crate::spec::ContainerSpec;

pub const DEFAULT_API_VERSION: &str = "v1.43";

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct CreatedContainer {
    pub id: String,
    #[serde(default)]
    pub warnings: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct ContainerSummary {
    pub id: String,
    #[serde(default)]
    pub names: Vec<String>,
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub labels: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WaitBody {
    status_code: i64,
    #[serde(default)]
    error: Option<WaitError>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WaitError {
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct DaemonMessage {
    message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonApi {
    version: String,
}

impl Default for DaemonApi {
    fn default() -> Self {
        Self::new(DEFAULT_API_VERSION)
    }
}

impl DaemonApi {
    pub fn new(version: impl Into<String>) -> Self {
        let version = version.into();
        let version = version.trim_matches('/').to_string();
        Self { version }
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    fn path(&self, rest: &str) -> String {
        format!("/{}/{}", self.version, rest)
    }

    fn post_empty(&self, rest: &str) -> RequestDescriptor {
        RequestDescriptor::new(Method::Post, self.path(rest)).header("Content-Length", "0")
    }

    pub fn ping_request(&self) -> RequestDescriptor {
        RequestDescriptor::new(Method::Get, self.path("_ping"))
    }

    pub fn list_request(&self, all: bool) -> RequestDescriptor {
        RequestDescriptor::new(Method::Get, self.path(&format!("containers/json?all={all}")))
    }

    pub fn create_request(&self, spec: &ContainerSpec) -> Result<RequestDescriptor> {
        let body = spec.to_create_body()?;
        Ok(RequestDescriptor::new(Method::Post, self.path("containers/create")).json(body))
    }

    pub fn start_request(&self, id: &str) -> RequestDescriptor {
        self.post_empty(&format!("containers/{id}/start"))
    }

    pub fn stop_request(&self, id: &str, grace: Duration) -> RequestDescriptor {
        self.post_empty(&format!("containers/{id}/stop?t={}", grace.as_secs()))
    }

    pub fn wait_request(&self, id: &str) -> RequestDescriptor {
        self.post_empty(&format!("containers/{id}/wait"))
    }

    pub fn kill_request(&self, id: &str) -> RequestDescriptor {
        self.post_empty(&format!("containers/{id}/kill?signal=SIGKILL"))
    }

    pub fn logs_request(&self, id: &str) -> RequestDescriptor {
        RequestDescriptor::new(
            Method::Get,
            self.path(&format!(
                "containers/{id}/logs?stdout=true&stderr=true&timestamps=true"
            )),
        )
    }

    pub fn remove_request(&self, id: &str, force: bool) -> RequestDescriptor {
        RequestDescriptor::new(
            Method::Delete,
            self.path(&format!("containers/{id}?force={force}")),
        )
    }

    pub async fn ping(&self, modem: &Modem) -> Result<()> {
        self.call(modem, self.ping_request(), &[]).await.map(drop)
    }

    pub async fn list(&self, modem: &Modem, all: bool) -> Result<Vec<ContainerSummary>> {
        let response = self.call(modem, self.list_request(all), &[]).await?;
        Ok(serde_json::from_slice(response.body())?)
    }

    pub async fn create(&self, modem: &Modem, spec: &ContainerSpec) -> Result<CreatedContainer> {
        let response = self.call(modem, self.create_request(spec)?, &[]).await?;
        let created: CreatedContainer = serde_json::from_slice(response.body())?;
        for warning in created.warnings.iter().flatten() {
            warn!(container = %created.id, %warning, "daemon warning on create");
        }
        Ok(created)
    }

    /// Start a created container. Starting one that already runs is not an error.
    pub async fn start(&self, modem: &Modem, id: &str) -> Result<()> {
        self.call(modem, self.start_request(id), &[304])
            .await
            .map(drop)
    }

    pub async fn stop(&self, modem: &Modem, id: &str, grace: Duration) -> Result<()> {
        self.call(modem, self.stop_request(id, grace), &[304])
            .await
            .map(drop)
    }

    /// Block until the container exits and return its exit code.
    pub async fn wait(&self, modem: &Modem, id: &str) -> Result<i64> {
        let response = self.call(modem, self.wait_request(id), &[]).await?;
        let body: WaitBody = serde_json::from_slice(response.body())?;
        if let Some(error) = body.error.filter(|error| !error.message.is_empty()) {
            warn!(container = %id, error = %error.message, "daemon reported a wait error");
        }
        Ok(body.status_code)
    }

    pub async fn kill(&self, modem: &Modem, id: &str) -> Result<()> {
        self.call(modem, self.kill_request(id), &[]).await.map(drop)
    }

    /// Raw multiplexed log stream of both outputs, with timestamps.
    pub async fn logs(&self, modem: &Modem, id: &str) -> Result<Vec<u8>> {
        let response = self.call(modem, self.logs_request(id), &[]).await?;
        Ok(response.into_body())
    }

    pub async fn remove(&self, modem: &Modem, id: &str, force: bool) -> Result<()> {
        self.call(modem, self.remove_request(id, force), &[])
            .await
            .map(drop)
    }

    async fn call(
        &self,
        modem: &Modem,
        request: RequestDescriptor,
        also_ok: &[u16],
    ) -> Result<ResponseMessage> {
        let response = modem.request(&request).await?;
        debug!(
            method = %request.method(),
            path = request.path(),
            status = response.status(),
            "daemon call"
        );
        if response.is_success() || also_ok.contains(&response.status()) {
            Ok(response)
        } else {
            Err(daemon_error(&response))
        }
    }
}

fn daemon_error(response: &ResponseMessage) -> ClientError {
    let body = response.body_text().into_owned();
    let message = serde_json::from_str::<DaemonMessage>(&body)
        .map(|parsed| parsed.message)
        .ok()
        .or_else(|| Some(body.trim().to_string()).filter(|text| !text.is_empty()))
        .unwrap_or_else(|| response.status_text().to_string());
    ClientError::Daemon {
        status: response.status(),
        message,
        body,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use daemon_wire::ResponseParser;

    fn response(raw: &[u8]) -> ResponseMessage {
        ResponseParser::new().feed(raw).unwrap().unwrap()
    }

    #[test]
    fn paths_carry_the_api_version() {
        let api = DaemonApi::new("/v1.41/");
        assert_eq!(api.ping_request().path(), "/v1.41/_ping");
        assert_eq!(
            api.logs_request("abc").path(),
            "/v1.41/containers/abc/logs?stdout=true&stderr=true&timestamps=true"
        );
        assert_eq!(
            api.kill_request("abc").path(),
            "/v1.41/containers/abc/kill?signal=SIGKILL"
        );
        assert_eq!(
            api.stop_request("abc", Duration::from_secs(5)).path(),
            "/v1.41/containers/abc/stop?t=5"
        );
        assert_eq!(api.remove_request("abc", true).method(), Method::Delete);
        assert_eq!(api.list_request(true).path(), "/v1.41/containers/json?all=true");
    }

    #[test]
    fn bodyless_posts_declare_zero_length() {
        let api = DaemonApi::default();
        let start = api.start_request("abc");
        assert_eq!(start.headers().get("content-length"), Some("0"));
        assert_eq!(start.headers().get("host"), Some("localhost"));
    }

    #[test]
    fn daemon_error_prefers_json_message() {
        let err = daemon_error(&response(
            b"HTTP/1.1 404 Not Found\r\nContent-Length: 37\r\n\r\n{\"message\":\"No such container: abcd\"}",
        ));
        match err {
            ClientError::Daemon {
                status,
                message,
                body,
            } => {
                assert_eq!(status, 404);
                assert_eq!(message, "No such container: abcd");
                assert!(body.contains("abcd"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn daemon_error_falls_back_to_status_text() {
        let err = daemon_error(&response(b"HTTP/1.1 500 Server Error\r\n\r\n"));
        assert_eq!(err.to_string(), "daemon returned 500: Server Error");
    }
}
