//! Container engine abstraction.
//!
//! The orchestrator and the image resolver only talk to the engine through the
//! [`Engine`] trait. [`docker::DockerEngine`] implements it over bollard; tests
//! use the in-memory [`fake::FakeEngine`].

use std::collections::BTreeSet;

use async_trait::async_trait;
use futures::stream::BoxStream;

pub mod docker;
#[cfg(test)]
pub mod fake;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("no such object: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("engine rejected the request ({status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("engine unreachable: {0}")]
    Transport(String),
    #[error("invalid container configuration: {0}")]
    Config(#[from] serde_json::Error),
}

/// State of a container as read before it is replaced.
///
/// `runtime_config` and `host_config` are kept in the engine's own wire
/// format, the orchestrator only ever touches the image field.
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerSnapshot {
    pub id: String,
    pub name: String,
    pub runtime_config: serde_json::Value,
    pub host_config: serde_json::Value,
    pub networks: BTreeSet<String>,
}

/// Credentials for a private registry.
#[derive(Clone, PartialEq, Eq)]
pub struct RegistryAuth {
    pub server_address: String,
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for RegistryAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryAuth")
            .field("server_address", &self.server_address)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// One line of pull output.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PullProgress {
    pub id: Option<String>,
    pub status: Option<String>,
    pub progress: Option<String>,
}

pub type PullStream<'a> = BoxStream<'a, Result<PullProgress, EngineError>>;

/// The engine primitives needed to replace a container.
///
/// Every call is a single, individually atomic engine operation. Nothing here
/// spans more than one call, so callers must not assume transactions.
#[async_trait]
pub trait Engine: Send + Sync {
    async fn inspect(&self, name: &str) -> Result<ContainerSnapshot, EngineError>;

    async fn image_exists(&self, image: &str) -> Result<bool, EngineError>;

    /// Checks that a configuration taken from [`Engine::inspect`] can be
    /// handed back to [`Engine::create_container`]. Makes no engine call.
    fn check_config(
        &self,
        runtime_config: &serde_json::Value,
        host_config: &serde_json::Value,
    ) -> Result<(), EngineError>;

    fn pull_image<'a>(&'a self, image: &'a str, auth: Option<RegistryAuth>) -> PullStream<'a>;

    async fn stop_container(&self, name: &str) -> Result<(), EngineError>;

    async fn remove_container(&self, name: &str, force: bool) -> Result<(), EngineError>;

    /// Returns the id of the created container.
    async fn create_container(
        &self,
        name: &str,
        runtime_config: serde_json::Value,
        host_config: serde_json::Value,
    ) -> Result<String, EngineError>;

    async fn connect_network(&self, network: &str, container_id: &str) -> Result<(), EngineError>;

    async fn start_container(&self, container_id: &str) -> Result<(), EngineError>;
}
