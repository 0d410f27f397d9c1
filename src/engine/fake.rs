//! In-memory engine for tests.
//!
//! Containers are a map from name to state, images are two sets: the ones
//! present locally and the ones a pull can fetch. Every call is recorded and
//! any operation can be made to fail, either always or only on its n-th call.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::json;

use crate::engine::{
    ContainerSnapshot, Engine, EngineError, PullProgress, PullStream, RegistryAuth,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Inspect(String),
    ImageExists(String),
    /// Image and the username used to authenticate, if any.
    PullImage(String, Option<String>),
    Stop(String),
    Remove(String, bool),
    Create(String),
    Connect(String, String),
    Start(String),
}

impl Call {
    pub fn is_mutation(&self) -> bool {
        !matches!(self, Call::Inspect(_) | Call::ImageExists(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    /// [`Engine::check_config`], which is not recorded as a call.
    CheckConfig,
    Inspect,
    ImageExists,
    Pull,
    Stop,
    Remove { force: bool },
    Create,
    Connect,
    Start,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FakeContainer {
    pub id: String,
    pub name: String,
    pub image: String,
    pub running: bool,
    pub runtime_config: serde_json::Value,
    pub host_config: serde_json::Value,
    pub networks: BTreeSet<String>,
}

#[derive(Default)]
struct State {
    containers: HashMap<String, FakeContainer>,
    images: HashSet<String>,
    remote_images: HashSet<String>,
    failures: HashSet<Op>,
    nth_failures: HashMap<Op, usize>,
    op_counts: HashMap<Op, usize>,
    calls: Vec<Call>,
    next_id: u64,
}

impl State {
    fn record(&mut self, call: Call, op: Op) -> Result<(), EngineError> {
        self.calls.push(call);
        let count = self.op_counts.entry(op).or_default();
        *count += 1;
        let count = *count;
        if self.failures.contains(&op) || self.nth_failures.get(&op) == Some(&count) {
            return Err(EngineError::Rejected {
                status: 500,
                message: format!("injected {op:?} failure"),
            });
        }
        Ok(())
    }

    fn find_mut(&mut self, name_or_id: &str) -> Option<&mut FakeContainer> {
        self.containers
            .values_mut()
            .find(|c| c.name == name_or_id || c.id == name_or_id)
    }

    fn allocate_id(&mut self) -> String {
        self.next_id += 1;
        format!("{:012x}", 0xc0ffee000000 + self.next_id)
    }
}

#[derive(Default)]
pub struct FakeEngine {
    state: Mutex<State>,
    inspect_delay: Mutex<Option<Duration>>,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a running container on `image` attached to `networks`. The image
    /// becomes locally present.
    pub fn add_container(&self, name: &str, image: &str, networks: &[&str]) -> String {
        let mut state = self.state.lock().unwrap();
        let id = state.allocate_id();
        state.images.insert(image.to_string());
        state.containers.insert(
            name.to_string(),
            FakeContainer {
                id: id.clone(),
                name: name.to_string(),
                image: image.to_string(),
                running: true,
                runtime_config: json!({
                    "Image": image,
                    "Env": ["APP_ENV=production"],
                    "Labels": {"tier": name},
                }),
                host_config: json!({
                    "RestartPolicy": {"Name": "unless-stopped"},
                    "Binds": [format!("/srv/{name}:/data")],
                }),
                networks: networks.iter().map(|n| n.to_string()).collect(),
            },
        );
        id
    }

    pub fn set_stopped(&self, name: &str) {
        if let Some(container) = self.state.lock().unwrap().containers.get_mut(name) {
            container.running = false;
        }
    }

    pub fn set_runtime_config(&self, name: &str, runtime_config: serde_json::Value) {
        if let Some(container) = self.state.lock().unwrap().containers.get_mut(name) {
            container.runtime_config = runtime_config;
        }
    }

    pub fn add_image(&self, image: &str) {
        self.state.lock().unwrap().images.insert(image.to_string());
    }

    pub fn add_remote_image(&self, image: &str) {
        self.state
            .lock()
            .unwrap()
            .remote_images
            .insert(image.to_string());
    }

    pub fn fail(&self, op: Op) {
        self.state.lock().unwrap().failures.insert(op);
    }

    /// Fails only the `n`-th call (counting from 1) of `op`.
    pub fn fail_nth(&self, op: Op, n: usize) {
        self.state.lock().unwrap().nth_failures.insert(op, n);
    }

    pub fn set_inspect_delay(&self, delay: Duration) {
        *self.inspect_delay.lock().unwrap() = Some(delay);
    }

    pub fn has_image(&self, image: &str) -> bool {
        self.state.lock().unwrap().images.contains(image)
    }

    pub fn container(&self, name: &str) -> Option<FakeContainer> {
        self.state.lock().unwrap().containers.get(name).cloned()
    }

    pub fn container_count(&self) -> usize {
        self.state.lock().unwrap().containers.len()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn mutations(&self) -> Vec<Call> {
        self.calls().into_iter().filter(Call::is_mutation).collect()
    }
}

#[async_trait]
impl Engine for FakeEngine {
    async fn inspect(&self, name: &str) -> Result<ContainerSnapshot, EngineError> {
        let delay = *self.inspect_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock().unwrap();
        state.record(Call::Inspect(name.to_string()), Op::Inspect)?;
        let container = state
            .containers
            .get(name)
            .ok_or_else(|| EngineError::NotFound(format!("No such container: {name}")))?;
        Ok(ContainerSnapshot {
            id: container.id.clone(),
            name: container.name.clone(),
            runtime_config: container.runtime_config.clone(),
            host_config: container.host_config.clone(),
            networks: container.networks.clone(),
        })
    }

    async fn image_exists(&self, image: &str) -> Result<bool, EngineError> {
        let mut state = self.state.lock().unwrap();
        state.record(Call::ImageExists(image.to_string()), Op::ImageExists)?;
        Ok(state.images.contains(image))
    }

    fn check_config(
        &self,
        runtime_config: &serde_json::Value,
        _host_config: &serde_json::Value,
    ) -> Result<(), EngineError> {
        if self.state.lock().unwrap().failures.contains(&Op::CheckConfig) {
            return Err(EngineError::Rejected {
                status: 400,
                message: "injected CheckConfig failure".to_string(),
            });
        }
        if !runtime_config["Image"].is_string() {
            return Err(EngineError::Rejected {
                status: 400,
                message: "no image specified".to_string(),
            });
        }
        Ok(())
    }

    fn pull_image<'a>(&'a self, image: &'a str, auth: Option<RegistryAuth>) -> PullStream<'a> {
        let mut state = self.state.lock().unwrap();
        let call = Call::PullImage(image.to_string(), auth.map(|a| a.username));
        let items = match state.record(call, Op::Pull) {
            Err(e) => vec![Err(e)],
            Ok(()) if state.remote_images.contains(image) => {
                state.images.insert(image.to_string());
                vec![
                    Ok(PullProgress {
                        status: Some(format!("Pulling from {image}")),
                        ..Default::default()
                    }),
                    Ok(PullProgress {
                        id: Some("a1b2c3".to_string()),
                        status: Some("Downloading".to_string()),
                        progress: Some("[=====>    ]".to_string()),
                    }),
                    Ok(PullProgress {
                        status: Some(format!("Downloaded newer image for {image}")),
                        ..Default::default()
                    }),
                ]
            }
            Ok(()) => vec![Err(EngineError::NotFound(format!(
                "manifest for {image} not found"
            )))],
        };
        futures::stream::iter(items).boxed()
    }

    async fn stop_container(&self, name: &str) -> Result<(), EngineError> {
        let mut state = self.state.lock().unwrap();
        state.record(Call::Stop(name.to_string()), Op::Stop)?;
        let container = state
            .find_mut(name)
            .ok_or_else(|| EngineError::NotFound(format!("No such container: {name}")))?;
        container.running = false;
        Ok(())
    }

    async fn remove_container(&self, name: &str, force: bool) -> Result<(), EngineError> {
        let mut state = self.state.lock().unwrap();
        state.record(Call::Remove(name.to_string(), force), Op::Remove { force })?;
        let container = state
            .find_mut(name)
            .ok_or_else(|| EngineError::NotFound(format!("No such container: {name}")))?;
        if container.running && !force {
            return Err(EngineError::Conflict(format!(
                "cannot remove running container {name}, stop it first or force remove"
            )));
        }
        let key = container.name.clone();
        state.containers.remove(&key);
        Ok(())
    }

    async fn create_container(
        &self,
        name: &str,
        runtime_config: serde_json::Value,
        host_config: serde_json::Value,
    ) -> Result<String, EngineError> {
        let mut state = self.state.lock().unwrap();
        state.record(Call::Create(name.to_string()), Op::Create)?;
        if state.containers.contains_key(name) {
            return Err(EngineError::Conflict(format!(
                "container name {name} is already in use"
            )));
        }
        let image = runtime_config["Image"]
            .as_str()
            .ok_or_else(|| EngineError::Rejected {
                status: 400,
                message: "no image specified".to_string(),
            })?
            .to_string();
        if !state.images.contains(&image) {
            return Err(EngineError::NotFound(format!("No such image: {image}")));
        }

        let id = state.allocate_id();
        state.containers.insert(
            name.to_string(),
            FakeContainer {
                id: id.clone(),
                name: name.to_string(),
                image,
                running: false,
                runtime_config,
                host_config,
                networks: BTreeSet::new(),
            },
        );
        Ok(id)
    }

    async fn connect_network(
        &self,
        network: &str,
        container_id: &str,
    ) -> Result<(), EngineError> {
        let mut state = self.state.lock().unwrap();
        state.record(
            Call::Connect(network.to_string(), container_id.to_string()),
            Op::Connect,
        )?;
        let container = state.find_mut(container_id).ok_or_else(|| {
            EngineError::NotFound(format!("No such container: {container_id}"))
        })?;
        container.networks.insert(network.to_string());
        Ok(())
    }

    async fn start_container(&self, container_id: &str) -> Result<(), EngineError> {
        let mut state = self.state.lock().unwrap();
        state.record(Call::Start(container_id.to_string()), Op::Start)?;
        let container = state.find_mut(container_id).ok_or_else(|| {
            EngineError::NotFound(format!("No such container: {container_id}"))
        })?;
        container.running = true;
        Ok(())
    }
}
