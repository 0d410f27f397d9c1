use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt;

use crate::engine::{Engine, EngineError, RegistryAuth};
use crate::image::credentials::CredentialsProvider;
use crate::image::reference::ImageReference;

#[derive(Debug, thiserror::Error)]
#[error("unable to pull {image}: {source}")]
pub struct PullError {
    pub image: String,
    #[source]
    pub source: EngineError,
}

/// Makes sure an image is available locally before it is used.
#[async_trait]
pub trait ImageResolver: Send + Sync {
    async fn ensure_image(&self, image: &str) -> Result<(), PullError>;
}

/// Resolves images against an [`Engine`], pulling only when the image is not
/// present yet.
pub struct EngineImageResolver {
    engine: Arc<dyn Engine>,
    credentials: Option<Arc<dyn CredentialsProvider>>,
}

impl EngineImageResolver {
    pub fn new(engine: Arc<dyn Engine>, credentials: Option<Arc<dyn CredentialsProvider>>) -> Self {
        Self {
            engine,
            credentials,
        }
    }

    /// Credential lookup never fails the pull. Anything that goes wrong is
    /// logged and the pull goes ahead unauthenticated.
    async fn registry_auth(&self, reference: &ImageReference<'_>) -> Option<RegistryAuth> {
        let registry = reference.registry_host()?;
        let provider = self.credentials.as_ref()?;
        match provider.credentials(registry).await {
            Ok(auth) => {
                log::debug!("Using stored credentials for {registry}");
                Some(auth)
            }
            Err(e) => {
                log::warn!("No credentials for {registry}, pulling anonymously: {e}");
                None
            }
        }
    }
}

#[async_trait]
impl ImageResolver for EngineImageResolver {
    async fn ensure_image(&self, image: &str) -> Result<(), PullError> {
        match self.engine.image_exists(image).await {
            Ok(true) => {
                log::debug!("Image {image} already present");
                return Ok(());
            }
            Ok(false) => {}
            Err(e) => log::warn!("Unable to inspect image {image}, pulling anyway: {e}"),
        }

        let reference = ImageReference::parse(image);
        let auth = self.registry_auth(&reference).await;

        log::info!("Pulling image {image}");
        let mut stream = self.engine.pull_image(image, auth);
        while let Some(result) = stream.next().await {
            match result {
                Ok(progress) => {
                    if let Some(status) = progress.status {
                        match (progress.id, progress.progress) {
                            (Some(id), Some(bar)) => log::debug!("Pull status: {id}: {status} {bar}"),
                            (Some(id), None) => log::debug!("Pull status: {id}: {status}"),
                            _ => log::debug!("Pull status: {status}"),
                        }
                    }
                }
                Err(source) => {
                    log::error!("Failed to pull image {image}: {source}");
                    return Err(PullError {
                        image: image.to_string(),
                        source,
                    });
                }
            }
        }

        log::info!("Image {image} pulled successfully");
        Ok(())
    }
}
