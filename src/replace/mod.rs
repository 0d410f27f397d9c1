//! In-place container replacement.
//!
//! [`Replacer::replace`] turns "container `name` running image A" into
//! "container `name` running image B" with a fixed, linear sequence of engine
//! calls:
//!
//! 1. inspect the current container
//! 2. make sure the target image is present
//! 3. derive the new configuration (old config, new image) and check that
//!    the engine will accept it
//! 4. stop the old container (failure is only logged)
//! 5. remove the old container
//! 6. create the new container under the same name
//! 7. reconnect every network the old container was attached to
//! 8. start the new container, force-removing it if the start fails
//!
//! There are no retries. Between steps 5 and 6 no container with that name
//! exists, which makes a `create` failure the one outcome that leaves the
//! host without the service.

use std::fmt;
use std::sync::Arc;

use crate::engine::{ContainerSnapshot, Engine, EngineError};
use crate::image::{ImageResolver, PullError};

/// A validated request to move container `name` onto `image`.
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
pub struct ReplacementRequest {
    pub name: String,
    pub image: String,
}

/// Step of the replacement sequence a failure happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Inspect,
    Pull,
    Remove,
    Create,
    Network,
    Start,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Inspect => "inspect",
            Stage::Pull => "pull",
            Stage::Remove => "remove",
            Stage::Create => "create",
            Stage::Network => "network",
            Stage::Start => "start",
        }
    }

    /// Whether a failure at this stage happened before any engine mutation,
    /// leaving the old container untouched.
    pub fn is_safe(self) -> bool {
        matches!(self, Stage::Inspect | Stage::Pull)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FailureCause {
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error(transparent)]
    Pull(#[from] PullError),
}

#[derive(Debug, thiserror::Error)]
pub enum ReplaceError {
    #[error("{stage} stage failed: {source}")]
    Stage {
        stage: Stage,
        #[source]
        source: FailureCause,
        /// Only ever set for [`Stage::Start`], when the unstartable container
        /// was removed again.
        recovery_performed: bool,
    },
    #[error("internal error: {0}")]
    Internal(String),
}

impl ReplaceError {
    fn at(stage: Stage, source: impl Into<FailureCause>) -> Self {
        ReplaceError::Stage {
            stage,
            source: source.into(),
            recovery_performed: false,
        }
    }

    pub fn stage(&self) -> Option<Stage> {
        match self {
            ReplaceError::Stage { stage, .. } => Some(*stage),
            ReplaceError::Internal(_) => None,
        }
    }

    pub fn recovery_performed(&self) -> bool {
        matches!(
            self,
            ReplaceError::Stage {
                recovery_performed: true,
                ..
            }
        )
    }

    /// Label used for metrics.
    pub fn outcome(&self) -> &'static str {
        self.stage().map(Stage::as_str).unwrap_or("internal")
    }
}

/// Configuration for the replacement container.
#[derive(Debug, Clone, PartialEq)]
pub struct DerivedConfig {
    pub runtime_config: serde_json::Value,
    pub host_config: serde_json::Value,
}

impl DerivedConfig {
    /// Copies the snapshot's configuration with the image swapped.
    pub fn derive(snapshot: &ContainerSnapshot, image: &str) -> Result<Self, ReplaceError> {
        let mut runtime_config = snapshot.runtime_config.clone();
        let fields = runtime_config.as_object_mut().ok_or_else(|| {
            ReplaceError::Internal(format!(
                "container {} has a malformed runtime config",
                snapshot.name
            ))
        })?;
        fields.insert("Image".to_string(), image.into());

        let host_config = match &snapshot.host_config {
            serde_json::Value::Null => serde_json::Value::Null,
            value @ serde_json::Value::Object(_) => value.clone(),
            _ => {
                return Err(ReplaceError::Internal(format!(
                    "container {} has a malformed host config",
                    snapshot.name
                )));
            }
        };

        Ok(Self {
            runtime_config,
            host_config,
        })
    }
}

/// Drives the replacement sequence. Cheap to clone.
#[derive(Clone)]
pub struct Replacer {
    engine: Arc<dyn Engine>,
    resolver: Arc<dyn ImageResolver>,
}

impl Replacer {
    pub fn new(engine: Arc<dyn Engine>, resolver: Arc<dyn ImageResolver>) -> Self {
        Self { engine, resolver }
    }

    /// Replaces the container and returns the id of the new one.
    pub async fn replace(&self, req: &ReplacementRequest) -> Result<String, ReplaceError> {
        let name = req.name.as_str();

        let snapshot = self
            .engine
            .inspect(name)
            .await
            .map_err(|e| ReplaceError::at(Stage::Inspect, e))?;
        log::info!(
            "Replacing container {name} ({}) with image {}",
            short_id(&snapshot.id),
            req.image
        );

        self.resolver
            .ensure_image(&req.image)
            .await
            .map_err(|e| ReplaceError::at(Stage::Pull, e))?;

        let derived = DerivedConfig::derive(&snapshot, &req.image)?;
        self.engine
            .check_config(&derived.runtime_config, &derived.host_config)
            .map_err(|e| {
                ReplaceError::Internal(format!(
                    "configuration of container {name} cannot be recreated: {e}"
                ))
            })?;

        if let Err(e) = self.engine.stop_container(name).await {
            log::warn!("Error stopping old container {name}, removing anyway: {e}");
        }

        self.engine
            .remove_container(name, false)
            .await
            .map_err(|e| ReplaceError::at(Stage::Remove, e))?;
        log::info!("Removed old container {name}");

        let new_id = self
            .engine
            .create_container(name, derived.runtime_config, derived.host_config)
            .await
            .map_err(|e| {
                log::error!(
                    "Old container {name} was removed but its replacement could not be created, no container named {name} exists: {e}"
                );
                ReplaceError::at(Stage::Create, e)
            })?;
        log::info!("Created container {name} ({})", short_id(&new_id));

        // A half wired container is left in place for the operator to inspect
        for network in &snapshot.networks {
            self.engine
                .connect_network(network, &new_id)
                .await
                .map_err(|e| {
                    log::error!("Failed to connect {name} to network {network}: {e}");
                    ReplaceError::at(Stage::Network, e)
                })?;
            log::debug!("Connected {name} to network {network}");
        }

        if let Err(e) = self.engine.start_container(&new_id).await {
            log::error!("Failed to start new container {name}: {e}");
            let recovery_performed = match self.engine.remove_container(&new_id, true).await {
                Ok(()) => {
                    log::warn!("Removed unstartable container {name} ({})", short_id(&new_id));
                    true
                }
                Err(cleanup) => {
                    log::error!(
                        "Cleanup of unstartable container {name} ({}) failed: {cleanup}",
                        short_id(&new_id)
                    );
                    false
                }
            };
            return Err(ReplaceError::Stage {
                stage: Stage::Start,
                source: e.into(),
                recovery_performed,
            });
        }

        log::info!("Container {name} is running image {}", req.image);
        Ok(new_id)
    }
}

fn short_id(id: &str) -> &str {
    id.get(..12).unwrap_or(id)
}
