//! Registry credentials from the Docker client configuration.
//!
//! Lookups follow the same precedence as the docker CLI: a per-registry
//! `credHelpers` entry, then the global `credsStore`, then plain `auths`.

use async_trait::async_trait;
use base64::Engine as _;
use std::collections::HashMap;
use std::io::{BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use crate::engine::RegistryAuth;

#[derive(Debug, thiserror::Error)]
pub enum CredentialsError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("no docker config directory (set DOCKER_CONFIG or HOME)")]
    NoConfigDir,
    #[error("credential helper docker-credential-{helper} failed: {message}")]
    Helper { helper: String, message: String },
    #[error("malformed auth entry for {0}")]
    MalformedAuth(String),
    #[error("no credentials found for {0}")]
    NotFound(String),
    #[error("credential lookup aborted: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Source of registry credentials, keyed by registry host.
#[async_trait]
pub trait CredentialsProvider: Send + Sync {
    async fn credentials(&self, registry: &str) -> Result<RegistryAuth, CredentialsError>;
}

#[derive(serde::Deserialize, Debug, Default)]
struct AuthEntry {
    auth: Option<String>,
}

#[derive(serde::Deserialize, Debug, Default)]
struct DockerConfig {
    #[serde(default)]
    auths: HashMap<String, AuthEntry>,
    #[serde(rename = "credHelpers", alias = "credsHelpers", default)]
    cred_helpers: HashMap<String, String>,
    #[serde(rename = "credsStore")]
    creds_store: Option<String>,
}

#[derive(serde::Deserialize)]
struct CredStoreOutput {
    #[serde(rename = "Username")]
    username: String,
    #[serde(rename = "Secret")]
    secret: String,
}

/// Reads `config.json` from `DOCKER_CONFIG` or `~/.docker`.
#[derive(Debug, Clone)]
pub struct DockerConfigCredentials {
    config_dir: PathBuf,
}

impl DockerConfigCredentials {
    pub fn new(config_dir: impl Into<PathBuf>) -> Self {
        Self {
            config_dir: config_dir.into(),
        }
    }

    pub fn from_env() -> Result<Self, CredentialsError> {
        if let Some(dir) = std::env::var_os("DOCKER_CONFIG") {
            return Ok(Self::new(dir));
        }
        let home = std::env::var_os("HOME").ok_or(CredentialsError::NoConfigDir)?;
        Ok(Self::new(PathBuf::from(home).join(".docker")))
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    fn read_config(&self) -> Result<DockerConfig, CredentialsError> {
        let file = std::fs::File::open(self.config_dir.join("config.json"))?;
        Ok(serde_json::from_reader(BufReader::new(file))?)
    }

    fn lookup(&self, registry: &str) -> Result<RegistryAuth, CredentialsError> {
        let config = self.read_config()?;

        if let Some(helper) = config.cred_helpers.get(registry) {
            return call_credential_helper(helper, registry);
        }

        if let Some(helper) = config.creds_store.as_deref() {
            return call_credential_helper(helper, registry);
        }

        // Fallback to plain text credentials from "auths"
        match config.auths.get(registry).and_then(|entry| entry.auth.as_ref()) {
            Some(auth) => decode_auth(registry, auth),
            None => Err(CredentialsError::NotFound(registry.to_string())),
        }
    }
}

#[async_trait]
impl CredentialsProvider for DockerConfigCredentials {
    async fn credentials(&self, registry: &str) -> Result<RegistryAuth, CredentialsError> {
        let this = self.clone();
        let registry = registry.to_string();
        tokio::task::spawn_blocking(move || this.lookup(&registry)).await?
    }
}

fn call_credential_helper(helper: &str, registry: &str) -> Result<RegistryAuth, CredentialsError> {
    let helper_err = |message: String| CredentialsError::Helper {
        helper: helper.to_string(),
        message,
    };

    let mut process = Command::new(format!("docker-credential-{helper}"))
        .arg("get")
        .stderr(Stdio::piped())
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .spawn()?;

    let mut stdin = process
        .stdin
        .take()
        .ok_or_else(|| helper_err("stdin unavailable".to_string()))?;
    stdin.write_all(registry.as_bytes())?;
    drop(stdin);

    let output = process.wait_with_output()?;
    if !output.status.success() {
        return Err(helper_err(failure_message(&output.stdout, &output.stderr)));
    }

    let creds: CredStoreOutput = serde_json::from_slice(&output.stdout)?;
    Ok(RegistryAuth {
        server_address: registry.to_string(),
        username: creds.username,
        password: creds.secret,
    })
}

/// Helpers report "not found" on stdout but most other failures on stderr.
fn failure_message(stdout: &[u8], stderr: &[u8]) -> String {
    let stdout = String::from_utf8_lossy(stdout);
    let stdout = stdout.trim();
    if !stdout.is_empty() {
        return stdout.to_string();
    }
    String::from_utf8_lossy(stderr).trim().to_string()
}

fn decode_auth(registry: &str, auth: &str) -> Result<RegistryAuth, CredentialsError> {
    let malformed = || CredentialsError::MalformedAuth(registry.to_string());
    let decoded = base64::prelude::BASE64_STANDARD
        .decode(auth)
        .map_err(|_| malformed())?;
    let decoded = String::from_utf8(decoded).map_err(|_| malformed())?;
    let (username, password) = decoded.split_once(':').ok_or_else(malformed)?;

    Ok(RegistryAuth {
        server_address: registry.to_string(),
        username: username.to_string(),
        password: password.to_string(),
    })
}
