//! Ledger Gateway Adapter
//!
//! Implements the mutation ports by posting JSON requests to a signing
//! gateway that holds the ledger SDK. The operator account and key travel as
//! request headers; the gateway signs and submits the transaction and
//! replies once a receipt is available.
//!
//! | Operation | Request |
//! |-----------|---------|
//! | create collection | `POST {base}/collections` |
//! | mint item | `POST {base}/collections/{id}/mint` |
//! | create channel | `POST {base}/topics` |
//! | publish | `POST {base}/topics/{id}/messages` |

use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use super::mirror::parse_consensus_timestamp;
use crate::domain::ports::{ChannelSpec, ChannelWriter, CollectionSpec, LedgerWriter, PublishReceipt};
use crate::error::{Error, Result};

/// Header carrying the operator account id.
pub const OPERATOR_ACCOUNT_HEADER: &str = "x-operator-account";

/// Header carrying the operator private key.
pub const OPERATOR_KEY_HEADER: &str = "x-operator-key";

// =============================================================================
// Configuration
// =============================================================================

/// Gateway client configuration
#[derive(Clone)]
pub struct GatewayConfig {
    /// Gateway base URL
    pub base_url: String,

    /// Operator account id (treasury, supply authority, payer)
    pub operator_account: String,

    /// Operator private key
    pub operator_key: String,

    /// Operator public key, attached to channels as admin/submit key
    pub operator_public_key: Option<String>,

    /// Per-request timeout
    pub request_timeout: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080/api/v1".to_string(),
            operator_account: String::new(),
            operator_key: String::new(),
            operator_public_key: None,
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl std::fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("base_url", &self.base_url)
            .field("operator_account", &self.operator_account)
            .field("operator_key", &"<redacted>")
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

// =============================================================================
// Wire Types
// =============================================================================

#[derive(Debug, Serialize)]
struct CreateCollectionRequest<'a> {
    name: &'a str,
    symbol: &'a str,
    treasury_account: &'a str,
    supply_authority: &'a str,
}

#[derive(Debug, Deserialize)]
struct CreateCollectionResponse {
    token_id: String,
}

#[derive(Debug, Serialize)]
struct MintRequest {
    /// base64
    metadata: String,
}

#[derive(Debug, Deserialize)]
struct MintResponse {
    serial_number: u64,
}

#[derive(Debug, Serialize)]
struct CreateTopicRequest<'a> {
    memo: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    admin_key: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    submit_key: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct CreateTopicResponse {
    topic_id: String,
}

#[derive(Debug, Serialize)]
struct PublishRequest {
    /// base64
    message: String,
}

#[derive(Debug, Deserialize)]
struct PublishResponse {
    topic_id: String,
    sequence_number: u64,
    consensus_timestamp: String,
}

// =============================================================================
// Client
// =============================================================================

/// Mutation ports backed by a signing gateway
#[derive(Debug, Clone)]
pub struct LedgerGatewayClient {
    config: GatewayConfig,
    client: Client,
}

impl LedgerGatewayClient {
    /// Create a new gateway client
    pub fn new(config: GatewayConfig) -> Result<Self> {
        if config.operator_account.is_empty() || config.operator_key.is_empty() {
            return Err(Error::Config(
                "operator account and key are required for the ledger gateway".into(),
            ));
        }
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| Error::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { config, client })
    }

    async fn post<B, R>(&self, operation: &str, path: &str, body: &B) -> Result<R>
    where
        B: Serialize + ?Sized + Sync,
        R: DeserializeOwned,
    {
        let url = format!("{}{}", self.config.base_url.trim_end_matches('/'), path);
        debug!(url = %url, operation, "Submitting to ledger gateway");

        let response = self
            .client
            .post(&url)
            .header(OPERATOR_ACCOUNT_HEADER, &self.config.operator_account)
            .header(OPERATOR_KEY_HEADER, &self.config.operator_key)
            .json(body)
            .send()
            .await
            .map_err(|e| Error::mutation(operation, e))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(Error::mutation(
                operation,
                format!("gateway returned {status}: {}", detail.trim()),
            ));
        }

        response
            .json()
            .await
            .map_err(|e| Error::mutation(operation, format!("invalid gateway response: {e}")))
    }
}

#[async_trait]
impl LedgerWriter for LedgerGatewayClient {
    fn operator_account(&self) -> &str {
        &self.config.operator_account
    }

    #[instrument(skip(self, spec), fields(symbol = %spec.symbol))]
    async fn create_collection(&self, spec: &CollectionSpec) -> Result<String> {
        let request = CreateCollectionRequest {
            name: &spec.name,
            symbol: &spec.symbol,
            treasury_account: &spec.treasury_account,
            supply_authority: &spec.supply_authority,
        };
        let response: CreateCollectionResponse =
            self.post("create_collection", "/collections", &request).await?;
        Ok(response.token_id)
    }

    #[instrument(skip(self, metadata), fields(collection_id = %collection_id))]
    async fn mint_item(&self, collection_id: &str, metadata: &[u8]) -> Result<u64> {
        let request = MintRequest {
            metadata: STANDARD.encode(metadata),
        };
        let path = format!("/collections/{collection_id}/mint");
        let response: MintResponse = self.post("mint_item", &path, &request).await?;
        Ok(response.serial_number)
    }
}

#[async_trait]
impl ChannelWriter for LedgerGatewayClient {
    fn operator_account(&self) -> &str {
        &self.config.operator_account
    }

    fn operator_public_key(&self) -> Option<String> {
        self.config.operator_public_key.clone()
    }

    #[instrument(skip(self, spec))]
    async fn create_channel(&self, spec: &ChannelSpec) -> Result<String> {
        let request = CreateTopicRequest {
            memo: &spec.memo,
            admin_key: spec.admin_key.as_deref(),
            submit_key: spec.submit_key.as_deref(),
        };
        let response: CreateTopicResponse = self.post("create_channel", "/topics", &request).await?;
        Ok(response.topic_id)
    }

    #[instrument(skip(self, payload), fields(channel_id = %channel_id))]
    async fn publish(&self, channel_id: &str, payload: &[u8]) -> Result<PublishReceipt> {
        let request = PublishRequest {
            message: STANDARD.encode(payload),
        };
        let path = format!("/topics/{channel_id}/messages");
        let response: PublishResponse = self.post("publish", &path, &request).await?;
        Ok(PublishReceipt {
            channel_id: response.topic_id,
            sequence_number: response.sequence_number,
            consensus_time: parse_consensus_timestamp(&response.consensus_timestamp)
                .map_err(|e| Error::mutation("publish", e))?,
        })
    }
}
