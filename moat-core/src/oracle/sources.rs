//! Gas price sources
//!
//! Each source is one tier in the oracle's priority order and declares its
//! own confidence grade and fetch timeout. HTTP sources use a blocking
//! reqwest client with the timeout applied at the transport layer as well,
//! so a stuck connection cannot outlive the oracle's patience by much.

use super::Confidence;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use thiserror::Error;

/// Failures of a single source attempt. All of these are swallowed by the
/// oracle (logged, counted, next source tried); none reach the caller.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("fetch timed out after {after:?}")]
    Timeout { after: Duration },
    #[error("http status {status}")]
    Http { status: u16 },
    #[error("rate limited")]
    RateLimited,
    #[error("transport error: {0}")]
    Transport(String),
    #[error("malformed response: {0}")]
    Malformed(String),
    #[error("implausible value: {value}")]
    Implausible { value: f64 },
}

impl SourceError {
    /// Stable label for metrics
    pub fn reason_label(&self) -> &'static str {
        match self {
            Self::Timeout { .. } => "timeout",
            Self::Http { .. } => "http",
            Self::RateLimited => "rate_limited",
            Self::Transport(_) => "transport",
            Self::Malformed(_) => "malformed",
            Self::Implausible { .. } => "implausible",
        }
    }
}

/// One tier of the oracle's priority order.
///
/// `fetch` returns the gas price in gwei for `key` (the chain the oracle was
/// asked about). Implementations are called from a dedicated fetch thread
/// and must be self-contained; the oracle enforces `timeout()` from the
/// outside regardless of what the implementation does internally.
pub trait GasPriceSource: Send + Sync {
    fn name(&self) -> &str;
    fn confidence(&self) -> Confidence;
    fn timeout(&self) -> Duration;
    fn fetch(&self, key: &str) -> Result<f64, SourceError>;
}

fn map_reqwest_error(e: reqwest::Error, timeout: Duration) -> SourceError {
    if e.is_timeout() {
        SourceError::Timeout { after: timeout }
    } else {
        SourceError::Transport(e.to_string())
    }
}

fn check_status(status: reqwest::StatusCode) -> Result<(), SourceError> {
    if status.as_u16() == 429 {
        return Err(SourceError::RateLimited);
    }
    if !status.is_success() {
        return Err(SourceError::Http {
            status: status.as_u16(),
        });
    }
    Ok(())
}

/// Parse a decimal gwei string ("12.5") as returned by gas tracker APIs
fn parse_gwei(raw: &str) -> Result<f64, SourceError> {
    raw.trim()
        .parse::<f64>()
        .map_err(|_| SourceError::Malformed(format!("not a gwei number: {:?}", raw)))
}

/// Parse a 0x-prefixed hex wei quantity into gwei
fn parse_hex_wei(raw: &str) -> Result<f64, SourceError> {
    let digits = raw
        .strip_prefix("0x")
        .or_else(|| raw.strip_prefix("0X"))
        .ok_or_else(|| SourceError::Malformed(format!("missing 0x prefix: {:?}", raw)))?;
    let wei = u128::from_str_radix(digits, 16)
        .map_err(|_| SourceError::Malformed(format!("bad hex quantity: {:?}", raw)))?;
    Ok(wei as f64 / 1e9)
}

// ---------------------------------------------------------------------------
// Etherscan-style gas tracker (premium tier)
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct GasTrackerResponse {
    result: Option<GasTrackerResult>,
}

#[derive(Debug, Deserialize)]
struct GasTrackerResult {
    #[serde(rename = "ProposeGasPrice")]
    propose_gas_price: String,
}

/// Gas tracker HTTP API (Etherscan `gastracker.gasoracle` shape).
/// Values come back as decimal gwei strings.
pub struct EtherscanGasSource {
    endpoint: String,
    api_key: String,
    chain_id: u64,
    timeout: Duration,
    confidence: Confidence,
    client: reqwest::blocking::Client,
}

impl EtherscanGasSource {
    pub fn new(api_key: impl Into<String>) -> Result<Self, SourceError> {
        let timeout = Duration::from_secs(3);
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SourceError::Transport(e.to_string()))?;
        Ok(Self {
            endpoint: "https://api.etherscan.io/v2/api".to_string(),
            api_key: api_key.into(),
            chain_id: 1,
            timeout,
            confidence: Confidence::High,
            client,
        })
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn with_chain_id(mut self, chain_id: u64) -> Self {
        self.chain_id = chain_id;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl GasPriceSource for EtherscanGasSource {
    fn name(&self) -> &str {
        "etherscan"
    }

    fn confidence(&self) -> Confidence {
        self.confidence
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn fetch(&self, _key: &str) -> Result<f64, SourceError> {
        let url = format!(
            "{}?chainid={}&module=gastracker&action=gasoracle&apikey={}",
            self.endpoint, self.chain_id, self.api_key
        );
        let resp = self
            .client
            .get(&url)
            .send()
            .map_err(|e| map_reqwest_error(e, self.timeout))?;
        check_status(resp.status())?;

        let parsed: GasTrackerResponse = resp
            .json()
            .map_err(|e| SourceError::Malformed(e.to_string()))?;
        let result = parsed
            .result
            .ok_or_else(|| SourceError::Malformed("missing result".into()))?;

        parse_gwei(&result.propose_gas_price)
    }
}

// ---------------------------------------------------------------------------
// JSON-RPC node query (secondary tier)
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RpcResponse {
    result: Option<String>,
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    message: String,
}

/// `eth_gasPrice` against a JSON-RPC node. Returns hex wei; converted to gwei.
pub struct JsonRpcGasSource {
    endpoint: String,
    timeout: Duration,
    confidence: Confidence,
    client: reqwest::blocking::Client,
}

impl JsonRpcGasSource {
    pub fn new(endpoint: impl Into<String>) -> Result<Self, SourceError> {
        let timeout = Duration::from_secs(3);
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SourceError::Transport(e.to_string()))?;
        Ok(Self {
            endpoint: endpoint.into(),
            timeout,
            confidence: Confidence::Medium,
            client,
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_confidence(mut self, confidence: Confidence) -> Self {
        self.confidence = confidence;
        self
    }
}

impl GasPriceSource for JsonRpcGasSource {
    fn name(&self) -> &str {
        "json_rpc"
    }

    fn confidence(&self) -> Confidence {
        self.confidence
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn fetch(&self, _key: &str) -> Result<f64, SourceError> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "eth_gasPrice",
            "params": [],
        });
        let resp = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .map_err(|e| map_reqwest_error(e, self.timeout))?;
        check_status(resp.status())?;

        let parsed: RpcResponse = resp
            .json()
            .map_err(|e| SourceError::Malformed(e.to_string()))?;
        if let Some(err) = parsed.error {
            return Err(SourceError::Transport(err.message));
        }
        let result = parsed
            .result
            .ok_or_else(|| SourceError::Malformed("missing result".into()))?;

        parse_hex_wei(&result)
    }
}

// ---------------------------------------------------------------------------
// Fixed-value tier
// ---------------------------------------------------------------------------

/// A source that always answers with a fixed value. Used as an explicit
/// low-trust tier and for tests.
pub struct StaticGasSource {
    name: String,
    value: f64,
    confidence: Confidence,
}

impl StaticGasSource {
    pub fn new(name: impl Into<String>, value: f64, confidence: Confidence) -> Self {
        Self {
            name: name.into(),
            value,
            confidence,
        }
    }
}

impl GasPriceSource for StaticGasSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn confidence(&self) -> Confidence {
        self.confidence
    }

    fn timeout(&self) -> Duration {
        Duration::from_millis(50)
    }

    fn fetch(&self, _key: &str) -> Result<f64, SourceError> {
        Ok(self.value)
    }
}
