// =============================================================================
// Event Detector: External crisis-detection capability
// =============================================================================
//
// Two calls, both charged against the daily budget by the monitor:
//
//   cheap_scan()        -> candidate topics with a raw confidence
//   deep_verify(topic)  -> severity, credibility, category, sectors, summary
//
// `HttpEventDetector` talks JSON to a provider endpoint and signs every body
// with HMAC-SHA256 (hex) in the `X-COUNCIL-SIGNATURE` header, keyed by
// `X-COUNCIL-KEY`. `IdleDetector` is used when no endpoint is configured.
// =============================================================================

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;
use tracing::{debug, instrument};

use crate::crisis::alert::Verification;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Error)]
pub enum DetectorError {
    #[error("detector request failed: {0}")]
    Http(String),

    #[error("detector returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("failed to decode detector response: {0}")]
    Decode(String),

    #[error("detector configuration error: {0}")]
    Config(String),

    #[error("no detector configured")]
    Unavailable,
}

/// One topic surfaced by a cheap scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanCandidate {
    pub topic: String,
    pub raw_confidence: f64,
}

#[async_trait]
pub trait EventDetector: Send + Sync {
    /// Broad, inexpensive sweep for candidate events.
    async fn cheap_scan(&self) -> Result<Vec<ScanCandidate>, DetectorError>;

    /// Expensive, focused verification of a single topic.
    async fn deep_verify(&self, topic: &str) -> Result<Verification, DetectorError>;

    fn name(&self) -> &str;
}

// =============================================================================
// HTTP provider
// =============================================================================

#[derive(Serialize)]
struct ScanRequest {
    timestamp: u64,
}

#[derive(Serialize)]
struct VerifyRequest<'a> {
    topic: &'a str,
    timestamp: u64,
}

#[derive(Deserialize)]
struct ScanResponse {
    #[serde(default)]
    candidates: Vec<ScanCandidate>,
}

#[derive(Clone)]
pub struct HttpEventDetector {
    secret: String,
    base_url: String,
    client: reqwest::Client,
}

impl HttpEventDetector {
    pub fn new(
        base_url: impl Into<String>,
        api_key: &str,
        secret: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, DetectorError> {
        let mut default_headers = HeaderMap::new();
        let key = HeaderValue::from_str(api_key)
            .map_err(|e| DetectorError::Config(format!("invalid api key header: {e}")))?;
        default_headers.insert("X-COUNCIL-KEY", key);
        default_headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let client = reqwest::Client::builder()
            .default_headers(default_headers)
            .timeout(timeout)
            .build()
            .map_err(|e| DetectorError::Config(e.to_string()))?;

        let base_url = base_url.into().trim_end_matches('/').to_string();
        debug!(base_url = %base_url, "HttpEventDetector initialised");

        Ok(Self {
            secret: secret.into(),
            base_url,
            client,
        })
    }

    /// Hex HMAC-SHA256 of `payload` under the shared secret.
    pub fn sign(&self, payload: &[u8]) -> Result<String, DetectorError> {
        sign_with(&self.secret, payload)
    }

    async fn post<T: Serialize + ?Sized>(&self, path: &str, body: &T) -> Result<String, DetectorError> {
        let payload =
            serde_json::to_vec(body).map_err(|e| DetectorError::Decode(e.to_string()))?;
        let signature = self.sign(&payload)?;
        let url = format!("{}{}", self.base_url, path);

        let resp = self
            .client
            .post(&url)
            .header("X-COUNCIL-SIGNATURE", signature)
            .body(payload)
            .send()
            .await
            .map_err(|e| DetectorError::Http(e.to_string()))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| DetectorError::Http(e.to_string()))?;

        if !status.is_success() {
            return Err(DetectorError::Status {
                status: status.as_u16(),
                body: text,
            });
        }
        Ok(text)
    }
}

fn sign_with(secret: &str, payload: &[u8]) -> Result<String, DetectorError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| DetectorError::Config(e.to_string()))?;
    mac.update(payload);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

fn timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[async_trait]
impl EventDetector for HttpEventDetector {
    #[instrument(skip(self), name = "detector::cheap_scan")]
    async fn cheap_scan(&self) -> Result<Vec<ScanCandidate>, DetectorError> {
        let body = ScanRequest {
            timestamp: timestamp_ms(),
        };
        let text = self.post("/scan", &body).await?;
        let parsed: ScanResponse =
            serde_json::from_str(&text).map_err(|e| DetectorError::Decode(e.to_string()))?;
        debug!(candidates = parsed.candidates.len(), "scan completed");
        Ok(parsed.candidates)
    }

    #[instrument(skip(self), name = "detector::deep_verify")]
    async fn deep_verify(&self, topic: &str) -> Result<Verification, DetectorError> {
        let body = VerifyRequest {
            topic,
            timestamp: timestamp_ms(),
        };
        let text = self.post("/verify", &body).await?;
        serde_json::from_str(&text).map_err(|e| DetectorError::Decode(e.to_string()))
    }

    fn name(&self) -> &str {
        "http"
    }
}

impl std::fmt::Debug for HttpEventDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpEventDetector")
            .field("base_url", &self.base_url)
            .finish()
    }
}

// =============================================================================
// Idle provider
// =============================================================================

/// Detector that never finds anything. Verifications are unavailable.
#[derive(Debug, Default, Clone, Copy)]
pub struct IdleDetector;

#[async_trait]
impl EventDetector for IdleDetector {
    async fn cheap_scan(&self) -> Result<Vec<ScanCandidate>, DetectorError> {
        Ok(Vec::new())
    }

    async fn deep_verify(&self, _topic: &str) -> Result<Verification, DetectorError> {
        Err(DetectorError::Unavailable)
    }

    fn name(&self) -> &str {
        "idle"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hmac_matches_reference_vector() {
        // RFC 4231, test case 2.
        let sig = sign_with("Jefe", b"what do ya want for nothing?").unwrap();
        assert_eq!(
            sig,
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn http_detector_trims_base_url() {
        let d = HttpEventDetector::new(
            "https://events.example.com/",
            "key",
            "secret",
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(d.base_url, "https://events.example.com");
        assert_eq!(d.name(), "http");
    }

    #[test]
    fn scan_response_tolerates_missing_candidates() {
        let parsed: ScanResponse = serde_json::from_str("{}").unwrap();
        assert!(parsed.candidates.is_empty());
    }

    #[tokio::test]
    async fn idle_detector_finds_nothing() {
        let d = IdleDetector;
        assert!(d.cheap_scan().await.unwrap().is_empty());
        assert!(matches!(
            d.deep_verify("anything").await,
            Err(DetectorError::Unavailable)
        ));
    }
}
