use crate::error::ChainError;
use crate::utils::error::compact_error;
use alloy::primitives::Address;
use alloy::providers::{Provider, ProviderBuilder, RootProvider};
use alloy::rpc::types::{Filter, Log};
use alloy::transports::http::Http;
use async_trait::async_trait;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::{sleep, timeout};

pub type HttpProvider = RootProvider<Http<Client>>;

const CONNECT_MAX_ATTEMPTS: u32 = 3;
const CONNECT_RETRY_DELAY: Duration = Duration::from_secs(2);
const CONNECT_PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Read surface the range scanner depends on. `ChainClient` is the live
/// implementation; tests drive the scanner with a scripted source.
#[async_trait]
pub trait ChainSource: Send + Sync {
    /// Current chain height. One RPC round-trip, no internal retry.
    async fn latest_height(&self) -> Result<u64, ChainError>;

    /// All logs emitted by `address` with block number in
    /// `[from_block, to_block]` inclusive. One round-trip, no retry.
    async fn filter_logs(
        &self,
        address: Address,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<Log>, ChainError>;
}

/// Thin connection wrapper around an alloy HTTP provider. Holds exactly one
/// live provider; `reconnect` swaps it for a fresh one against the same
/// endpoint.
#[derive(Debug)]
pub struct ChainClient {
    endpoint: reqwest::Url,
    provider: RwLock<Arc<HttpProvider>>,
}

impl ChainClient {
    /// Dial `endpoint` and verify liveness with a height probe, retrying up
    /// to [`CONNECT_MAX_ATTEMPTS`] times. Exhausting the retry budget is a
    /// fatal startup error.
    pub async fn connect(endpoint: &str) -> Result<Self, ChainError> {
        let url = endpoint
            .parse::<reqwest::Url>()
            .map_err(|e| ChainError::InvalidUrl {
                url: endpoint.to_string(),
                reason: e.to_string(),
            })?;

        let mut last_reason = String::new();
        for attempt in 1..=CONNECT_MAX_ATTEMPTS {
            match Self::attempt_connection(&url).await {
                Ok(provider) => {
                    return Ok(Self {
                        endpoint: url,
                        provider: RwLock::new(provider),
                    });
                }
                Err(reason) => {
                    tracing::warn!(
                        "[RPC] Connection attempt {}/{} failed: {}",
                        attempt,
                        CONNECT_MAX_ATTEMPTS,
                        reason
                    );
                    last_reason = reason;
                }
            }
            if attempt < CONNECT_MAX_ATTEMPTS {
                sleep(CONNECT_RETRY_DELAY).await;
            }
        }

        Err(ChainError::ConnectExhausted {
            attempts: CONNECT_MAX_ATTEMPTS,
            reason: last_reason,
        })
    }

    async fn attempt_connection(url: &reqwest::Url) -> Result<Arc<HttpProvider>, String> {
        let provider: HttpProvider = ProviderBuilder::new().on_http(url.clone());
        match timeout(CONNECT_PROBE_TIMEOUT, provider.get_block_number()).await {
            Ok(Ok(height)) => {
                tracing::info!("[RPC] Connected; probe height {}", height);
                Ok(Arc::new(provider))
            }
            Ok(Err(err)) => Err(compact_error(err)),
            Err(_) => Err(format!(
                "liveness probe timed out after {}ms",
                CONNECT_PROBE_TIMEOUT.as_millis()
            )),
        }
    }

    /// Tear down the current provider and establish a fresh one against the
    /// configured endpoint, with the same retry budget as `connect`.
    pub async fn reconnect(&self) -> Result<(), ChainError> {
        let mut last_reason = String::new();
        for attempt in 1..=CONNECT_MAX_ATTEMPTS {
            match Self::attempt_connection(&self.endpoint).await {
                Ok(provider) => {
                    *self.provider.write().await = provider;
                    return Ok(());
                }
                Err(reason) => {
                    tracing::warn!(
                        "[RPC] Reconnect attempt {}/{} failed: {}",
                        attempt,
                        CONNECT_MAX_ATTEMPTS,
                        reason
                    );
                    last_reason = reason;
                }
            }
            if attempt < CONNECT_MAX_ATTEMPTS {
                sleep(CONNECT_RETRY_DELAY).await;
            }
        }
        Err(ChainError::ConnectExhausted {
            attempts: CONNECT_MAX_ATTEMPTS,
            reason: last_reason,
        })
    }

    async fn provider(&self) -> Arc<HttpProvider> {
        self.provider.read().await.clone()
    }
}

#[async_trait]
impl ChainSource for ChainClient {
    async fn latest_height(&self) -> Result<u64, ChainError> {
        let provider = self.provider().await;
        provider
            .get_block_number()
            .await
            .map_err(|err| ChainError::Transient {
                context: "eth_blockNumber".to_string(),
                reason: compact_error(err),
            })
    }

    async fn filter_logs(
        &self,
        address: Address,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<Log>, ChainError> {
        let filter = Filter::new()
            .address(address)
            .from_block(from_block)
            .to_block(to_block);
        let provider = self.provider().await;
        provider
            .get_logs(&filter)
            .await
            .map_err(|err| ChainError::Transient {
                context: format!("eth_getLogs({address:#x}, [{from_block},{to_block}])"),
                reason: compact_error(err),
            })
    }
}
