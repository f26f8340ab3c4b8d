//! Chain gateway
//!
//! Everything the engine knows about the chain arrives through the
//! [`ChainGateway`] trait: height, candidate pages, record payloads, serial
//! statuses, proving and broadcast. [`HttpGateway`] is the production
//! implementation; tests script a [`crate::MockGateway`] instead.
//!
//! Every HTTP request runs under a single timeout arbiter: the response
//! races the deadline, whichever resolves first wins, and a timed-out
//! attempt drops its request future before the retry sleep. Late responses
//! are simply re-observed on the next attempt, which is safe because all
//! gateway calls are idempotent from the engine's point of view.

use crate::{Error, Result};
use async_trait::async_trait;
use obscura_core::{Authorization, OwnershipCandidate};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;

/// Deadline for one HTTP attempt
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Hydration payload for one record output
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordInfo {
    /// Chain transition id that produced the record
    pub transition_id: String,
    /// Output position within the transition
    pub output_index: u32,
    /// Chain transaction id the transition belongs to
    pub transaction_id: String,
    /// Record ciphertext (bech32 `obscrec1...`)
    pub ciphertext: String,
    /// Program that produced the record
    pub program_id: String,
    /// Function that produced the record
    pub function_name: String,
    /// Block height of the producing transaction
    pub block_height: u32,
    /// Block timestamp (unix seconds)
    pub block_timestamp: i64,
}

/// Spend status for one serial number
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SerialNumberStatus {
    /// The queried serial number
    pub serial_number: String,
    /// Whether the chain has seen it spent
    pub spent: bool,
    /// Spend block height
    #[serde(default)]
    pub block_height: Option<u32>,
    /// Spending chain transaction id
    #[serde(default)]
    pub transaction_id: Option<String>,
    /// Spending chain transition id
    #[serde(default)]
    pub transition_id: Option<String>,
    /// Spend block timestamp (unix seconds)
    #[serde(default)]
    pub block_timestamp: Option<i64>,
}

/// A signed authorization pair plus the program sources needed to prove it
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRequest {
    /// The primary transition authorization
    pub authorization: Authorization,
    /// The fee transition authorization, when a fee is paid
    pub fee_authorization: Option<Authorization>,
    /// Source of the executed program
    pub program: String,
    /// Sources of imported programs, keyed by program id
    #[serde(default)]
    pub imports: BTreeMap<String, String>,
    /// Function being executed
    pub function_name: String,
}

/// Proved transaction material returned by the gateway
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResponse {
    /// Chain transaction id
    pub transaction_id: String,
    /// Serialized transaction, ready to broadcast
    pub transaction: String,
    /// Chain transition ids, main transition first
    #[serde(default)]
    pub transition_ids: Vec<String>,
}

/// An authorization pair handed to a remote prover
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DelegationRequest {
    /// The primary transition authorization
    pub authorization: Authorization,
    /// The fee transition authorization, when a fee is paid
    pub fee_authorization: Option<Authorization>,
    /// Whether the prover should broadcast on completion
    pub broadcast: bool,
}

/// Lifecycle state of a delegated proving request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DelegatedState {
    /// Accepted, not yet proving
    Pending,
    /// Proof generation in progress
    Proving,
    /// Proved (and broadcast, when requested)
    Completed,
    /// Proving or broadcast failed remotely
    Failed,
}

/// Status of a delegated proving request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DelegatedStatus {
    /// The polled request id
    pub request_id: String,
    /// Current remote state
    pub state: DelegatedState,
    /// Chain transaction id, present once completed
    #[serde(default)]
    pub transaction_id: Option<String>,
    /// Remote failure reason, present once failed
    #[serde(default)]
    pub error: Option<String>,
}

/// Retry behavior for transient gateway failures
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Attempts before giving up
    pub max_attempts: u32,
    /// Backoff before the first retry
    pub initial_backoff: Duration,
    /// Upper bound for the backoff
    pub max_backoff: Duration,
    /// Growth factor between attempts
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }
}

/// Chain access used by the sync pipeline and the transaction lifecycle.
///
/// Implementations must be safe to call concurrently.
#[async_trait]
pub trait ChainGateway: Send + Sync {
    /// Latest block height
    async fn get_height(&self, chain: &str) -> Result<u32>;

    /// Program source by id
    async fn get_program(&self, chain: &str, program_id: &str) -> Result<String>;

    /// One page of ownership candidates for a block range
    async fn get_ownership_candidates(
        &self,
        chain: &str,
        start: u32,
        end: u32,
        page: u32,
    ) -> Result<Vec<OwnershipCandidate>>;

    /// Record payloads by (transition id, output index)
    async fn get_records_by_transition(
        &self,
        chain: &str,
        keys: &[(String, u32)],
    ) -> Result<Vec<RecordInfo>>;

    /// Spend status for a batch of serial numbers
    async fn get_serial_numbers(
        &self,
        chain: &str,
        serial_numbers: &[String],
    ) -> Result<Vec<SerialNumberStatus>>;

    /// Prove an authorized execution into a broadcastable transaction
    async fn execute_authorization(
        &self,
        chain: &str,
        request: &ExecutionRequest,
    ) -> Result<ExecutionResponse>;

    /// Broadcast a proved transaction, returning its chain id
    async fn broadcast_transaction(&self, chain: &str, transaction: &str) -> Result<String>;

    /// Hand an authorization pair to a remote prover, returning a request id
    async fn delegate_transaction(
        &self,
        chain: &str,
        request: &DelegationRequest,
    ) -> Result<String>;

    /// Poll a delegated proving request
    async fn get_delegated_transaction(
        &self,
        chain: &str,
        request_id: &str,
    ) -> Result<DelegatedStatus>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RecordKey<'a> {
    transition_id: &'a str,
    output_index: u32,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SerialQuery<'a> {
    serial_numbers: &'a [String],
}

#[derive(Serialize)]
struct BroadcastBody<'a> {
    transaction: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BroadcastReply {
    transaction_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DelegateReply {
    request_id: String,
}

/// HTTP implementation of [`ChainGateway`]
pub struct HttpGateway {
    client: reqwest::Client,
    base_url: String,
    retry: RetryConfig,
    request_timeout: Duration,
}

impl HttpGateway {
    /// A gateway with default retry policy and timeouts
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        Self::with_config(base_url, RetryConfig::default(), DEFAULT_REQUEST_TIMEOUT)
    }

    /// A gateway with explicit retry policy and per-attempt timeout
    pub fn with_config(
        base_url: impl Into<String>,
        retry: RetryConfig,
        request_timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        let base_url = base_url.into().trim_end_matches('/').to_string();

        Ok(Self {
            client,
            base_url,
            retry,
            request_timeout,
        })
    }

    /// Run one request under the timeout arbiter and retry policy.
    ///
    /// Transient failures back off exponentially with jitter; anything else
    /// returns immediately.
    async fn request_with_retry<T, F, Fut>(&self, description: &str, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        let mut backoff = self.retry.initial_backoff;

        loop {
            let err = match tokio::time::timeout(self.request_timeout, operation()).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(err)) if !err.is_transient() => return Err(err),
                Ok(Err(err)) => err,
                Err(_) => Error::Timeout(self.request_timeout),
            };

            attempt += 1;
            if attempt >= self.retry.max_attempts {
                return Err(err);
            }
            tracing::warn!(
                "{} failed (attempt {}), retrying in {:?}: {}",
                description,
                attempt,
                backoff,
                err
            );
            tokio::time::sleep(jitter_duration(backoff)).await;
            backoff = backoff
                .mul_f64(self.retry.backoff_multiplier)
                .min(self.retry.max_backoff);
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, url: String) -> Result<T> {
        let response = self.client.get(&url).send().await?;
        let response = error_for_status(response).await?;
        Ok(response.json().await?)
    }

    async fn post_json<B, T>(&self, url: String, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let response = self.client.post(&url).json(body).send().await?;
        let response = error_for_status(response).await?;
        Ok(response.json().await?)
    }
}

#[async_trait]
impl ChainGateway for HttpGateway {
    async fn get_height(&self, chain: &str) -> Result<u32> {
        let url = format!("{}/{}/latest/height", self.base_url, chain);
        self.request_with_retry("get_height", || self.get_json(url.clone()))
            .await
    }

    async fn get_program(&self, chain: &str, program_id: &str) -> Result<String> {
        let url = format!("{}/{}/program/{}", self.base_url, chain, program_id);
        self.request_with_retry("get_program", || self.get_json(url.clone()))
            .await
    }

    async fn get_ownership_candidates(
        &self,
        chain: &str,
        start: u32,
        end: u32,
        page: u32,
    ) -> Result<Vec<OwnershipCandidate>> {
        let url = format!(
            "{}/{}/ownership/candidates?start={}&end={}&page={}",
            self.base_url, chain, start, end, page
        );
        self.request_with_retry("get_ownership_candidates", || self.get_json(url.clone()))
            .await
    }

    async fn get_records_by_transition(
        &self,
        chain: &str,
        keys: &[(String, u32)],
    ) -> Result<Vec<RecordInfo>> {
        let url = format!("{}/{}/records/by-transition", self.base_url, chain);
        let body: Vec<RecordKey<'_>> = keys
            .iter()
            .map(|(transition_id, output_index)| RecordKey {
                transition_id,
                output_index: *output_index,
            })
            .collect();
        self.request_with_retry("get_records_by_transition", || {
            self.post_json(url.clone(), &body)
        })
        .await
    }

    async fn get_serial_numbers(
        &self,
        chain: &str,
        serial_numbers: &[String],
    ) -> Result<Vec<SerialNumberStatus>> {
        let url = format!("{}/{}/serials/status", self.base_url, chain);
        let body = SerialQuery { serial_numbers };
        self.request_with_retry("get_serial_numbers", || self.post_json(url.clone(), &body))
            .await
    }

    async fn execute_authorization(
        &self,
        chain: &str,
        request: &ExecutionRequest,
    ) -> Result<ExecutionResponse> {
        let url = format!("{}/{}/transaction/execute", self.base_url, chain);
        self.request_with_retry("execute_authorization", || self.post_json(url.clone(), request))
            .await
    }

    async fn broadcast_transaction(&self, chain: &str, transaction: &str) -> Result<String> {
        let url = format!("{}/{}/transaction/broadcast", self.base_url, chain);
        let body = BroadcastBody { transaction };
        let reply: BroadcastReply = self
            .request_with_retry("broadcast_transaction", || self.post_json(url.clone(), &body))
            .await?;
        Ok(reply.transaction_id)
    }

    async fn delegate_transaction(
        &self,
        chain: &str,
        request: &DelegationRequest,
    ) -> Result<String> {
        let url = format!("{}/{}/transaction/delegate", self.base_url, chain);
        let reply: DelegateReply = self
            .request_with_retry("delegate_transaction", || self.post_json(url.clone(), request))
            .await?;
        Ok(reply.request_id)
    }

    async fn get_delegated_transaction(
        &self,
        chain: &str,
        request_id: &str,
    ) -> Result<DelegatedStatus> {
        let url = format!(
            "{}/{}/transaction/delegate/{}",
            self.base_url, chain, request_id
        );
        self.request_with_retry("get_delegated_transaction", || self.get_json(url.clone()))
            .await
    }
}

/// Map HTTP failure statuses onto the error taxonomy: client errors are
/// explicit rejections, everything else is transient.
async fn error_for_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let message = format!("HTTP {status}: {body}");
    if status.is_client_error() {
        Err(Error::Rejected(message))
    } else {
        Err(Error::Gateway(message))
    }
}

/// Randomize a backoff to 80-120% of its nominal value
fn jitter_duration(duration: Duration) -> Duration {
    use rand::Rng;
    let millis = duration.as_millis() as f64;
    let jittered = millis * rand::thread_rng().gen_range(0.8..1.2);
    Duration::from_millis(jittered.max(1.0) as u64)
}
