//! Checks an inbound webhook call before anything touches the engine.

use std::collections::BTreeSet;

use axum::http::{HeaderMap, Method, StatusCode, header};
use axum::response::{IntoResponse, Response};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::config::{HotswapConfig, Secret, SignatureMode};
use crate::replace::ReplacementRequest;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "X-Signature";

#[derive(Debug, thiserror::Error)]
pub enum AdmissionError {
    #[error("missing signature")]
    MissingSignature,
    #[error("Only POST requests allowed")]
    Method,
    #[error("Request body must be json")]
    ContentType,
    #[error("signature mismatched")]
    SignatureMismatch,
    #[error("Bad request")]
    Body(#[source] serde_json::Error),
    #[error("{0}")]
    Invalid(&'static str),
    #[error("Container is not in allow list")]
    NotAllowed(String),
}

impl AdmissionError {
    pub fn status(&self) -> StatusCode {
        match self {
            AdmissionError::MissingSignature | AdmissionError::SignatureMismatch => {
                StatusCode::UNAUTHORIZED
            }
            _ => StatusCode::BAD_REQUEST,
        }
    }

    /// Label used for metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            AdmissionError::MissingSignature | AdmissionError::SignatureMismatch => "signature",
            AdmissionError::Method => "method",
            AdmissionError::ContentType => "content_type",
            AdmissionError::Body(_) => "body",
            AdmissionError::Invalid(_) => "validation",
            AdmissionError::NotAllowed(_) => "allow_list",
        }
    }
}

impl IntoResponse for AdmissionError {
    fn into_response(self) -> Response {
        (self.status(), self.to_string()).into_response()
    }
}

/// Signature, method, content type and allow-list checks, in that order.
#[derive(Debug, Clone)]
pub struct AdmissionGate {
    secret: Secret,
    mode: SignatureMode,
    allow_list: BTreeSet<String>,
}

impl AdmissionGate {
    pub fn new(config: &HotswapConfig) -> Self {
        Self {
            secret: config.secret.clone(),
            mode: config.signature_mode,
            allow_list: config.allow_list.clone(),
        }
    }

    pub fn admit(
        &self,
        method: &Method,
        headers: &HeaderMap,
        body: &[u8],
    ) -> Result<ReplacementRequest, AdmissionError> {
        let signature = headers
            .get(SIGNATURE_HEADER)
            .and_then(|value| value.to_str().ok())
            .filter(|value| !value.is_empty())
            .ok_or(AdmissionError::MissingSignature)?;

        if *method != Method::POST {
            return Err(AdmissionError::Method);
        }

        if !is_json(headers) {
            return Err(AdmissionError::ContentType);
        }

        // The body is authenticated before it is parsed
        if !self.verify(signature, body) {
            return Err(AdmissionError::SignatureMismatch);
        }

        let req: ReplacementRequest = serde_json::from_slice(body).map_err(AdmissionError::Body)?;
        if req.name.trim().is_empty() {
            return Err(AdmissionError::Invalid("Container name must not be empty"));
        }
        if req.image.trim().is_empty() {
            return Err(AdmissionError::Invalid("Image must not be empty"));
        }

        if !self.allow_list.is_empty() && !self.allow_list.contains(&req.name) {
            return Err(AdmissionError::NotAllowed(req.name));
        }

        Ok(req)
    }

    fn verify(&self, signature: &str, body: &[u8]) -> bool {
        match self.mode {
            SignatureMode::Plain => signature
                .as_bytes()
                .ct_eq(self.secret.expose().as_bytes())
                .into(),
            SignatureMode::Hmac => {
                let Ok(provided) = hex::decode(signature.trim()) else {
                    return false;
                };
                let Ok(mut mac) = HmacSha256::new_from_slice(self.secret.expose().as_bytes())
                else {
                    return false;
                };
                mac.update(body);
                mac.verify_slice(&provided).is_ok()
            }
        }
    }
}

/// `application/json`, optionally with parameters such as a charset.
fn is_json(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(';').next())
        .is_some_and(|mime| mime.trim().eq_ignore_ascii_case("application/json"))
}

#[cfg(test)]
pub(crate) fn sign(secret: &str, body: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC takes any key size");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}
