use clap::Parser;

use crate::config::SignatureMode;

/// Webhook that replaces a running container with one on a new image.
///
/// Every option can also be set through the environment variable named next
/// to it.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Shared secret used to verify request signatures. A random one is
    /// generated and logged when unset.
    #[arg(long, env = "SECRET_KEY", hide_env_values = true)]
    pub secret_key: Option<String>,

    /// How the X-Signature header is checked. In hmac mode the HMAC covers the
    /// exact request body bytes as sent, not a re-encoded form of the JSON, so
    /// clients must sign the body they send byte for byte.
    #[arg(long, env = "SIGNATURE_MODE", value_enum, default_value_t = SignatureMode::Hmac)]
    pub signature_mode: SignatureMode,

    /// Deadline for a whole replacement request, in seconds.
    #[arg(long, env = "REQUEST_TIMEOUT_SECONDS", default_value_t = 300)]
    pub request_timeout_seconds: u64,

    /// Port to listen on.
    #[arg(long, env = "PORT", default_value_t = 8080)]
    pub port: u16,

    /// JSON array of container names that may be replaced, e.g. '["web","worker"]'.
    #[arg(long, env = "CONTAINER_ALLOW_LIST")]
    pub container_allow_list: Option<String>,

    /// Log filter, e.g. "debug" or "hotswap=trace,bollard=warn".
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}
