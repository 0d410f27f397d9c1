use std::collections::BTreeSet;
use std::time::Duration;

use rand::RngCore;

use crate::cli::Args;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum SignatureMode {
    /// Hex encoded HMAC-SHA256 of the raw request body, keyed by the secret.
    #[default]
    Hmac,
    /// The header carries the secret itself.
    Plain,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("CONTAINER_ALLOW_LIST must be a JSON array of strings: {0}")]
    AllowList(#[from] serde_json::Error),
    #[error("REQUEST_TIMEOUT_SECONDS must be greater than zero")]
    ZeroTimeout,
}

/// Shared secret. Never printed through `Debug`.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    fn generate() -> Self {
        let mut bytes = [0u8; 16];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self(hex::encode(bytes))
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Secret(<redacted>)")
    }
}

/// Runtime configuration, read once at startup.
#[derive(Debug, Clone)]
pub struct HotswapConfig {
    pub secret: Secret,
    pub signature_mode: SignatureMode,
    pub request_timeout: Duration,
    pub port: u16,
    /// Empty means every container may be replaced.
    pub allow_list: BTreeSet<String>,
}

impl HotswapConfig {
    pub fn from_args(args: &Args) -> Result<Self, ConfigError> {
        let secret = match args.secret_key.as_deref() {
            Some(secret) if !secret.is_empty() => Secret::new(secret),
            _ => {
                let secret = Secret::generate();
                log::info!("Temporarily generated secret key: {}", secret.expose());
                secret
            }
        };

        if args.request_timeout_seconds == 0 {
            return Err(ConfigError::ZeroTimeout);
        }

        let allow_list = match args.container_allow_list.as_deref() {
            Some(list) if !list.trim().is_empty() => parse_allow_list(list)?,
            _ => BTreeSet::new(),
        };
        log::debug!("CONTAINER_ALLOW_LIST: {allow_list:?}");

        Ok(Self {
            secret,
            signature_mode: args.signature_mode,
            request_timeout: Duration::from_secs(args.request_timeout_seconds),
            port: args.port,
            allow_list,
        })
    }
}

fn parse_allow_list(list: &str) -> Result<BTreeSet<String>, ConfigError> {
    let names: Vec<String> = serde_json::from_str(list)?;
    Ok(names.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn args(extra: &[&str]) -> Args {
        let argv = std::iter::once("hotswap").chain(extra.iter().copied());
        Args::try_parse_from(argv).expect("Failed to parse args")
    }

    #[test]
    fn test_defaults() {
        let mut args = args(&[]);
        // The test environment may export any of these
        args.secret_key = None;
        args.container_allow_list = None;
        args.request_timeout_seconds = 300;

        let config = HotswapConfig::from_args(&args).unwrap();
        assert_eq!(config.secret.expose().len(), 32);
        assert!(config.allow_list.is_empty());
        assert_eq!(config.request_timeout, Duration::from_secs(300));
    }

    #[test]
    fn test_explicit_values() {
        let args = args(&[
            "--secret-key",
            "s3cret",
            "--signature-mode",
            "plain",
            "--request-timeout-seconds",
            "30",
            "--port",
            "9000",
            "--container-allow-list",
            r#"["web", "worker"]"#,
        ]);

        let config = HotswapConfig::from_args(&args).unwrap();
        assert_eq!(config.secret, Secret::new("s3cret"));
        assert_eq!(config.signature_mode, SignatureMode::Plain);
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert_eq!(config.port, 9000);
        assert_eq!(
            config.allow_list.into_iter().collect::<Vec<_>>(),
            vec!["web".to_string(), "worker".to_string()]
        );
    }

    #[test]
    fn test_empty_secret_is_generated() {
        let args = args(&["--secret-key", ""]);
        let config = HotswapConfig::from_args(&args).unwrap();
        assert!(!config.secret.expose().is_empty());
    }

    #[test]
    fn test_malformed_allow_list() {
        let args = args(&["--container-allow-list", "web,worker"]);
        let res = HotswapConfig::from_args(&args);
        assert!(matches!(res, Err(ConfigError::AllowList(_))), "{res:?}");
    }

    #[test]
    fn test_zero_timeout_is_rejected() {
        let args = args(&["--request-timeout-seconds", "0"]);
        assert!(matches!(
            HotswapConfig::from_args(&args),
            Err(ConfigError::ZeroTimeout)
        ));
    }

    #[test]
    fn test_secret_is_redacted() {
        let secret = Secret::new("hunter2");
        assert!(!format!("{secret:?}").contains("hunter2"));
    }
}
