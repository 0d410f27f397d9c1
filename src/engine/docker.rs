//! Docker implementation of [`Engine`] using bollard.
//!
//! The bollard client is connection pooled and cheap to clone, so a single
//! [`DockerEngine`] is shared by every request.

use async_trait::async_trait;
use bollard::Docker;
use bollard::auth::DockerCredentials;
use bollard::models::{ContainerCreateBody, EndpointSettings, HostConfig, NetworkConnectRequest};
use bollard::query_parameters::{
    CreateContainerOptions, CreateContainerOptionsBuilder, CreateImageOptions,
    CreateImageOptionsBuilder, InspectContainerOptions, InspectContainerOptionsBuilder,
    RemoveContainerOptions, RemoveContainerOptionsBuilder, StartContainerOptions,
    StartContainerOptionsBuilder, StopContainerOptions, StopContainerOptionsBuilder,
};
use futures_util::StreamExt;

use crate::engine::{
    ContainerSnapshot, Engine, EngineError, PullProgress, PullStream, RegistryAuth,
};
use crate::image::reference::ImageReference;

impl From<bollard::errors::Error> for EngineError {
    fn from(err: bollard::errors::Error) -> Self {
        match err {
            bollard::errors::Error::DockerResponseServerError {
                status_code: 404,
                message,
            } => EngineError::NotFound(message),
            bollard::errors::Error::DockerResponseServerError {
                status_code: 409,
                message,
            } => EngineError::Conflict(message),
            bollard::errors::Error::DockerResponseServerError {
                status_code,
                message,
            } => EngineError::Rejected {
                status: status_code,
                message,
            },
            other => EngineError::Transport(other.to_string()),
        }
    }
}

impl From<RegistryAuth> for DockerCredentials {
    fn from(auth: RegistryAuth) -> Self {
        DockerCredentials {
            username: Some(auth.username),
            password: Some(auth.password),
            serveraddress: Some(auth.server_address),
            ..Default::default()
        }
    }
}

/// Rebuilds the typed create request from the configuration read by
/// `inspect`.
fn create_body(
    runtime_config: serde_json::Value,
    host_config: serde_json::Value,
) -> Result<ContainerCreateBody, EngineError> {
    let mut body: ContainerCreateBody = serde_json::from_value(runtime_config)?;
    body.host_config = serde_json::from_value::<Option<HostConfig>>(host_config)?;
    Ok(body)
}

#[derive(Clone)]
pub struct DockerEngine {
    docker: Docker,
}

impl DockerEngine {
    /// Connect using the local defaults (`DOCKER_HOST`, otherwise the unix
    /// socket on Linux/macOS and the named pipe on Windows).
    pub fn connect() -> Result<Self, EngineError> {
        let docker = Docker::connect_with_local_defaults()?;
        Ok(Self { docker })
    }

    pub async fn ping(&self) -> Result<(), EngineError> {
        self.docker.ping().await?;
        Ok(())
    }
}

#[async_trait]
impl Engine for DockerEngine {
    async fn inspect(&self, name: &str) -> Result<ContainerSnapshot, EngineError> {
        let options: InspectContainerOptions = InspectContainerOptionsBuilder::new().build();
        let info = self.docker.inspect_container(name, Some(options)).await?;

        let id = info
            .id
            .ok_or_else(|| EngineError::NotFound(format!("container {name} has no id")))?;
        let name = info
            .name
            .as_deref()
            .map(|n| n.strip_prefix('/').unwrap_or(n).to_string())
            .unwrap_or_else(|| name.to_string());

        let runtime_config = match info.config {
            Some(config) => serde_json::to_value(config)?,
            None => serde_json::Value::Null,
        };
        let host_config = match info.host_config {
            Some(host_config) => serde_json::to_value(host_config)?,
            None => serde_json::Value::Null,
        };
        let networks = info
            .network_settings
            .and_then(|settings| settings.networks)
            .map(|networks| networks.into_keys().collect())
            .unwrap_or_default();

        Ok(ContainerSnapshot {
            id,
            name,
            runtime_config,
            host_config,
            networks,
        })
    }

    async fn image_exists(&self, image: &str) -> Result<bool, EngineError> {
        match self.docker.inspect_image(image).await {
            Ok(_) => Ok(true),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn check_config(
        &self,
        runtime_config: &serde_json::Value,
        host_config: &serde_json::Value,
    ) -> Result<(), EngineError> {
        create_body(runtime_config.clone(), host_config.clone()).map(|_| ())
    }

    fn pull_image<'a>(&'a self, image: &'a str, auth: Option<RegistryAuth>) -> PullStream<'a> {
        let reference = ImageReference::parse(image);

        let mut builder = CreateImageOptionsBuilder::new().from_image(reference.repository());
        if let Some(tag) = reference.tag_or_digest() {
            builder = builder.tag(tag);
        }
        let options: CreateImageOptions = builder.build();

        self.docker
            .create_image(Some(options), None, auth.map(DockerCredentials::from))
            .map(|item| {
                item.map(|info| PullProgress {
                    id: info.id,
                    status: info.status,
                    progress: info.progress,
                })
                .map_err(EngineError::from)
            })
            .boxed()
    }

    async fn stop_container(&self, name: &str) -> Result<(), EngineError> {
        let options: StopContainerOptions = StopContainerOptionsBuilder::new().build();

        match self.docker.stop_container(name, Some(options)).await {
            Ok(_) => Ok(()),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 304, ..
            }) => {
                log::debug!("Container {name} already stopped");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn remove_container(&self, name: &str, force: bool) -> Result<(), EngineError> {
        let options: RemoveContainerOptions =
            RemoveContainerOptionsBuilder::new().force(force).build();
        self.docker.remove_container(name, Some(options)).await?;
        Ok(())
    }

    async fn create_container(
        &self,
        name: &str,
        runtime_config: serde_json::Value,
        host_config: serde_json::Value,
    ) -> Result<String, EngineError> {
        let body = create_body(runtime_config, host_config)?;
        let options: CreateContainerOptions = CreateContainerOptionsBuilder::new().name(name).build();
        let response = self.docker.create_container(Some(options), body).await?;

        for warning in &response.warnings {
            log::warn!("Engine warning while creating {name}: {warning}");
        }
        Ok(response.id)
    }

    async fn connect_network(
        &self,
        network: &str,
        container_id: &str,
    ) -> Result<(), EngineError> {
        let request = NetworkConnectRequest {
            container: Some(container_id.to_string()),
            endpoint_config: Some(EndpointSettings::default()),
        };
        self.docker.connect_network(network, request).await?;
        Ok(())
    }

    async fn start_container(&self, container_id: &str) -> Result<(), EngineError> {
        let options: StartContainerOptions = StartContainerOptionsBuilder::new().build();
        self.docker
            .start_container(container_id, Some(options))
            .await?;
        Ok(())
    }
}
