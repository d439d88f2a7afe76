//! Flightdeck worker client
//!
//! A type-safe HTTP client for the agent that runs on every container host.
//! The control plane talks to workers exclusively through the
//! [`ContainerHost`] trait, so the engine, radar, and worker pool can be
//! exercised against recording fakes; this crate's [`WorkerClient`] is the
//! production implementation.
//!
//! The wire format is a boundary concern: these paths and bodies are the one
//! place in the codebase that knows them.

pub mod error;
pub mod host;

pub use error::{ClientError, Result};
pub use host::{
    CheckRequest, CheckResponse, ContainerHost, ContainerInfo, ContainerSpec, GetRequest, LogLine,
    LogStream, MountSpec, ProcessSpec, ProcessUpdate, PutRequest, ResourceResponse, RootFs,
    VersionResult, VolumeSpec, VolumeStrategy,
};

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;

/// HTTP client for container-host agents.
///
/// Unlike a single-endpoint API client, every call takes the target worker's
/// address: the pool picks a worker per operation and the same client fans
/// out across the fleet.
#[derive(Debug, Clone)]
pub struct WorkerClient {
    client: Client,
}

impl WorkerClient {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }

    /// Create a client with a custom `reqwest` client, e.g. to configure
    /// timeouts for slow networks.
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    fn url(addr: &str, path: &str) -> String {
        format!("{}{}", addr.trim_end_matches('/'), path)
    }

    async fn handle_response<T: DeserializeOwned>(&self, response: reqwest::Response) -> Result<T> {
        let status = response.status();

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ClientError::api_error(status.as_u16(), error_text));
        }

        response
            .json()
            .await
            .map_err(|e| ClientError::ParseError(format!("Failed to parse JSON response: {}", e)))
    }

    async fn handle_empty_response(&self, response: reqwest::Response) -> Result<()> {
        let status = response.status();

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ClientError::api_error(status.as_u16(), error_text));
        }

        Ok(())
    }
}

impl Default for WorkerClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContainerHost for WorkerClient {
    async fn create_container(&self, addr: &str, spec: ContainerSpec) -> Result<()> {
        let url = Self::url(addr, "/containers");
        let response = self.client.post(&url).json(&spec).send().await?;
        self.handle_empty_response(response).await
    }

    async fn lookup_container(&self, addr: &str, handle: &str) -> Result<Option<ContainerInfo>> {
        let url = Self::url(addr, &format!("/containers/{}", handle));
        let response = self.client.get(&url).send().await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }

        self.handle_response(response).await.map(Some)
    }

    async fn destroy_container(&self, addr: &str, handle: &str) -> Result<()> {
        let url = Self::url(addr, &format!("/containers/{}", handle));
        let response = self.client.delete(&url).send().await?;
        self.handle_empty_response(response).await
    }

    async fn set_container_ttl(&self, addr: &str, handle: &str, ttl_seconds: i64) -> Result<()> {
        let url = Self::url(addr, &format!("/containers/{}/ttl", handle));
        let response = self
            .client
            .put(&url)
            .json(&serde_json::json!({ "ttl_seconds": ttl_seconds }))
            .send()
            .await?;
        self.handle_empty_response(response).await
    }

    async fn check(&self, addr: &str, handle: &str, req: CheckRequest) -> Result<CheckResponse> {
        let url = Self::url(addr, &format!("/containers/{}/check", handle));
        let response = self.client.post(&url).json(&req).send().await?;
        self.handle_response(response).await
    }

    async fn run_get(&self, addr: &str, handle: &str, req: GetRequest) -> Result<ResourceResponse> {
        let url = Self::url(addr, &format!("/containers/{}/get", handle));
        let response = self.client.post(&url).json(&req).send().await?;
        self.handle_response(response).await
    }

    async fn run_put(&self, addr: &str, handle: &str, req: PutRequest) -> Result<ResourceResponse> {
        let url = Self::url(addr, &format!("/containers/{}/put", handle));
        let response = self.client.post(&url).json(&req).send().await?;
        self.handle_response(response).await
    }

    async fn spawn_process(&self, addr: &str, handle: &str, spec: ProcessSpec) -> Result<()> {
        let url = Self::url(addr, &format!("/containers/{}/processes", handle));
        let response = self.client.post(&url).json(&spec).send().await?;
        self.handle_empty_response(response).await
    }

    async fn find_process(&self, addr: &str, handle: &str, process_id: &str) -> Result<bool> {
        let url = Self::url(addr, &format!("/containers/{}/processes/{}", handle, process_id));
        let response = self.client.get(&url).send().await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(false);
        }

        self.handle_empty_response(response).await.map(|_| true)
    }

    async fn poll_process(
        &self,
        addr: &str,
        handle: &str,
        process_id: &str,
        cursor: u64,
    ) -> Result<ProcessUpdate> {
        let url = Self::url(
            addr,
            &format!(
                "/containers/{}/processes/{}/poll?cursor={}",
                handle, process_id, cursor
            ),
        );
        let response = self.client.get(&url).send().await?;
        self.handle_response(response).await
    }

    async fn stop_process(&self, addr: &str, handle: &str, process_id: &str) -> Result<()> {
        let url = Self::url(
            addr,
            &format!("/containers/{}/processes/{}/stop", handle, process_id),
        );
        let response = self.client.post(&url).send().await?;
        self.handle_empty_response(response).await
    }

    async fn create_volume(&self, volumes_addr: &str, spec: VolumeSpec) -> Result<()> {
        let url = Self::url(volumes_addr, "/volumes");
        let response = self.client.post(&url).json(&spec).send().await?;
        self.handle_empty_response(response).await
    }

    async fn set_volume_ttl(&self, volumes_addr: &str, handle: &str, ttl_seconds: i64) -> Result<()> {
        let url = Self::url(volumes_addr, &format!("/volumes/{}/ttl", handle));
        let response = self
            .client
            .put(&url)
            .json(&serde_json::json!({ "ttl_seconds": ttl_seconds }))
            .send()
            .await?;
        self.handle_empty_response(response).await
    }

    async fn set_volume_property(
        &self,
        volumes_addr: &str,
        handle: &str,
        name: &str,
        value: &str,
    ) -> Result<()> {
        let url = Self::url(
            volumes_addr,
            &format!("/volumes/{}/properties/{}", handle, name),
        );
        let response = self.client.put(&url).json(&serde_json::json!(value)).send().await?;
        self.handle_empty_response(response).await
    }

    async fn stream_volume(
        &self,
        src_volumes_addr: &str,
        src_handle: &str,
        dest_volumes_addr: &str,
        dest_handle: &str,
    ) -> Result<()> {
        // The destination pulls from the source; the control plane only
        // brokers the addresses.
        let url = Self::url(
            dest_volumes_addr,
            &format!("/volumes/{}/stream-in", dest_handle),
        );
        let response = self
            .client
            .post(&url)
            .json(&serde_json::json!({
                "source_addr": src_volumes_addr,
                "source_handle": src_handle,
            }))
            .send()
            .await?;
        self.handle_empty_response(response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_joins_without_double_slash() {
        assert_eq!(
            WorkerClient::url("http://worker:7777/", "/containers"),
            "http://worker:7777/containers"
        );
        assert_eq!(
            WorkerClient::url("http://worker:7777", "/containers"),
            "http://worker:7777/containers"
        );
    }
}
