//! Mirror Node Adapter
//!
//! Read-only REST client for the ledger's mirror API. Implements
//! `LedgerQuery` (collection items, newest first) and `ChannelFeed` (channel
//! messages in consensus order).

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use futures::stream::{self, BoxStream, StreamExt};
use reqwest::{Client, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, instrument};

use crate::domain::ports::{ChannelFeed, ChannelMessage, ItemPage, LedgerItem, LedgerQuery, MessageWindow};
use crate::error::{Error, Result};

// =============================================================================
// Configuration
// =============================================================================

/// Mirror client configuration
#[derive(Debug, Clone)]
pub struct MirrorConfig {
    /// Base URL including the API prefix
    pub base_url: String,

    /// Per-request timeout
    pub request_timeout: Duration,

    /// Messages requested per page when reading channels
    pub message_page_size: usize,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            base_url: "https://testnet.mirrornode.hedera.com/api/v1".to_string(),
            request_timeout: Duration::from_secs(30),
            message_page_size: 100,
        }
    }
}

// =============================================================================
// Wire Types
// =============================================================================

#[derive(Debug, Default, Deserialize)]
struct Links {
    next: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NftsResponse {
    #[serde(default)]
    nfts: Vec<LedgerItem>,
    #[serde(default)]
    links: Links,
}

#[derive(Debug, Deserialize)]
struct TopicMessage {
    topic_id: String,
    sequence_number: u64,
    consensus_timestamp: String,
    message: String,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    messages: Vec<TopicMessage>,
    #[serde(default)]
    links: Links,
}

/// Parse a `seconds.nanoseconds` consensus timestamp.
pub fn parse_consensus_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    let invalid = || Error::LedgerQuery(format!("invalid consensus timestamp '{raw}'"));
    let (secs, nanos) = raw.split_once('.').unwrap_or((raw, "0"));
    let secs: i64 = secs.parse().map_err(|_| invalid())?;
    // right-pad so "1700000000.5" is half a second
    let nanos: u32 = format!("{nanos:0<9}")
        .get(..9)
        .and_then(|n| n.parse().ok())
        .ok_or_else(invalid)?;
    DateTime::from_timestamp(secs, nanos).ok_or_else(invalid)
}

/// Format a time as a `seconds.nanoseconds` consensus timestamp.
pub fn format_consensus_timestamp(time: &DateTime<Utc>) -> String {
    format!("{}.{:09}", time.timestamp(), time.timestamp_subsec_nanos())
}

impl TopicMessage {
    fn into_message(self) -> Result<ChannelMessage> {
        let payload = STANDARD
            .decode(self.message.trim())
            .map_err(|e| Error::LedgerQuery(format!("invalid message payload: {e}")))?;
        Ok(ChannelMessage {
            channel_id: self.topic_id,
            sequence_number: self.sequence_number,
            consensus_time: parse_consensus_timestamp(&self.consensus_timestamp)?,
            payload,
        })
    }
}

// =============================================================================
// Client
// =============================================================================

/// REST client for the mirror API
#[derive(Debug, Clone)]
pub struct MirrorNodeClient {
    config: MirrorConfig,
    base: Url,
    client: Client,
}

impl MirrorNodeClient {
    /// Create a new mirror client
    pub fn new(config: MirrorConfig) -> Result<Self> {
        let base = Url::parse(config.base_url.trim_end_matches('/'))
            .map_err(|e| Error::Config(format!("invalid mirror URL '{}': {e}", config.base_url)))?;
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| Error::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            config,
            base,
            client,
        })
    }

    pub fn config(&self) -> &MirrorConfig {
        &self.config
    }

    fn base_str(&self) -> &str {
        self.base.as_str().trim_end_matches('/')
    }

    /// Resolve a `links.next` value (path and query) against the base origin.
    fn resolve(&self, next: &str) -> Result<Url> {
        self.base
            .join(next)
            .map_err(|e| Error::LedgerQuery(format!("invalid next link '{next}': {e}")))
    }

    fn first_items_url(&self, collection_id: &str, limit: usize) -> Result<Url> {
        let url = format!(
            "{}/tokens/{}/nfts?limit={}&order=desc",
            self.base_str(),
            collection_id,
            limit
        );
        Url::parse(&url).map_err(|e| Error::LedgerQuery(format!("invalid URL '{url}': {e}")))
    }

    fn first_messages_url(&self, channel_id: &str, window: &MessageWindow) -> Result<Url> {
        let mut url = format!(
            "{}/topics/{}/messages?limit={}&order=asc",
            self.base_str(),
            channel_id,
            self.config.message_page_size
        );
        if let Some(start) = &window.start_time {
            url.push_str(&format!("&timestamp=gte:{}", format_consensus_timestamp(start)));
        }
        if let Some(end) = &window.end_time {
            url.push_str(&format!("&timestamp=lt:{}", format_consensus_timestamp(end)));
        }
        Url::parse(&url).map_err(|e| Error::LedgerQuery(format!("invalid URL '{url}': {e}")))
    }

    /// GET a JSON document; `None` on 404.
    async fn get_json<T: DeserializeOwned>(client: &Client, url: Url) -> Result<Option<T>> {
        debug!(url = %url, "Querying mirror node");

        let response = client
            .get(url)
            .send()
            .await
            .map_err(Error::MirrorConnection)?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(Error::LedgerQuery(format!(
                "Query failed with status: {}",
                response.status()
            )));
        }

        response
            .json()
            .await
            .map(Some)
            .map_err(|e| Error::LedgerQuery(format!("invalid response: {e}")))
    }
}

#[async_trait]
impl LedgerQuery for MirrorNodeClient {
    #[instrument(skip(self), fields(collection_id = %collection_id))]
    async fn items_page(
        &self,
        collection_id: &str,
        cursor: Option<&str>,
        limit: usize,
    ) -> Result<ItemPage> {
        let url = match cursor {
            Some(next) => self.resolve(next)?,
            None => self.first_items_url(collection_id, limit)?,
        };

        let Some(body) = Self::get_json::<NftsResponse>(&self.client, url).await? else {
            debug!("Collection unknown to mirror node");
            return Ok(ItemPage::empty());
        };

        Ok(ItemPage {
            items: body.nfts,
            next: body.links.next.filter(|n| !n.is_empty()),
        })
    }
}

/// Cursor over paged channel messages.
struct FeedState {
    client: Client,
    base: Url,
    next: Option<Url>,
    buffered: VecDeque<TopicMessage>,
}

impl FeedState {
    async fn advance(mut self) -> Result<Option<(ChannelMessage, FeedState)>> {
        loop {
            if let Some(raw) = self.buffered.pop_front() {
                let message = raw.into_message()?;
                return Ok(Some((message, self)));
            }
            let Some(url) = self.next.take() else {
                return Ok(None);
            };
            let page: Option<MessagesResponse> = MirrorNodeClient::get_json(&self.client, url).await?;
            let Some(page) = page else {
                return Ok(None);
            };
            if let Some(next) = page.links.next.filter(|n| !n.is_empty()) {
                let url = self.base.join(&next).map_err(|e| {
                    Error::LedgerQuery(format!("invalid next link '{next}': {e}"))
                })?;
                self.next = Some(url);
            }
            if page.messages.is_empty() {
                return Ok(None);
            }
            self.buffered.extend(page.messages);
        }
    }
}

#[async_trait]
impl ChannelFeed for MirrorNodeClient {
    #[instrument(skip(self, window), fields(channel_id = %channel_id))]
    async fn messages(
        &self,
        channel_id: &str,
        window: &MessageWindow,
    ) -> Result<BoxStream<'static, Result<ChannelMessage>>> {
        let state = FeedState {
            client: self.client.clone(),
            base: self.base.clone(),
            next: Some(self.first_messages_url(channel_id, window)?),
            buffered: VecDeque::new(),
        };

        Ok(stream::try_unfold(state, FeedState::advance).boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn client_for(server: &MockServer) -> MirrorNodeClient {
        MirrorNodeClient::new(MirrorConfig {
            base_url: format!("{}/api/v1", server.uri()),
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_default_config() {
        let config = MirrorConfig::default();
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert!(config.base_url.ends_with("/api/v1"));
    }

    #[test]
    fn test_invalid_base_url() {
        let result = MirrorNodeClient::new(MirrorConfig {
            base_url: "not a url".into(),
            ..Default::default()
        });
        assert_matches!(result, Err(Error::Config(_)));
    }

    #[test]
    fn test_consensus_timestamps() {
        let t = parse_consensus_timestamp("1700000000.000000123").unwrap();
        assert_eq!(t.timestamp(), 1_700_000_000);
        assert_eq!(t.timestamp_subsec_nanos(), 123);
        assert_eq!(format_consensus_timestamp(&t), "1700000000.000000123");

        let half = parse_consensus_timestamp("1700000000.5").unwrap();
        assert_eq!(half.timestamp_subsec_nanos(), 500_000_000);

        assert!(parse_consensus_timestamp("soon").is_err());
    }

    #[tokio::test]
    async fn test_items_page_follows_next_link() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/tokens/0.0.5/nfts"))
            .and(query_param("order", "desc"))
            .and(query_param("limit", "100"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "nfts": [{"token_id": "0.0.5", "serial_number": 2, "metadata": "YQ==", "created_timestamp": "1.0"}],
                "links": {"next": "/api/v1/tokens/0.0.5/nfts?limit=100&order=desc&serialnumber=lt:2"}
            })))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let page = client.items_page("0.0.5", None, 100).await.unwrap();
        assert_eq!(page.items[0].serial, 2);

        let next = page.next.unwrap();
        assert_eq!(
            client.resolve(&next).unwrap().as_str(),
            format!("{}{}", server.uri(), next)
        );
    }

    #[tokio::test]
    async fn test_items_page_404_is_empty() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let page = client_for(&server).await.items_page("0.0.5", None, 100).await.unwrap();
        assert_eq!(page, ItemPage::empty());
    }

    #[tokio::test]
    async fn test_items_page_500_is_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let result = client_for(&server).await.items_page("0.0.5", None, 100).await;
        assert_matches!(result, Err(Error::LedgerQuery(msg)) if msg.contains("500"));
    }

    #[tokio::test]
    async fn test_messages_stream_pages() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/topics/0.0.9/messages"))
            .and(query_param("order", "asc"))
            .and(query_param("page", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "messages": [{"topic_id": "0.0.9", "sequence_number": 2, "consensus_timestamp": "1700000001.0", "message": STANDARD.encode("second")}],
                "links": {"next": null}
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v1/topics/0.0.9/messages"))
            .and(query_param("order", "asc"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "messages": [{"topic_id": "0.0.9", "sequence_number": 1, "consensus_timestamp": "1700000000.0", "message": STANDARD.encode("first")}],
                "links": {"next": "/api/v1/topics/0.0.9/messages?limit=100&order=asc&page=2"}
            })))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let messages: Vec<_> = client
            .messages("0.0.9", &MessageWindow::default())
            .await
            .unwrap()
            .collect()
            .await;

        let texts: Vec<_> = messages.into_iter().map(|m| m.unwrap().text()).collect();
        assert_eq!(texts, vec!["first", "second"]);
    }
}
