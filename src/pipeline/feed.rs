use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, FixedOffset};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::bus::Emitter;
use crate::common::error::{IngestError, Result};
use crate::domain::cap::{cap_time, Reference};
use crate::infra::http_client::HttpClientPort;
use crate::pipeline::interruptible_sleep;
use crate::resolver::{ReferenceResolver, Resolution};

pub const FEED_ACCEPT: &str = "application/ld+json";

#[derive(Debug, Clone)]
pub struct Config {
    /// External catalog URL listing recent alert references.
    pub feed_url: String,
    /// Pause between poll cycles.
    pub poll_interval: Duration,
}

#[derive(Debug, Deserialize)]
struct FeedEntry {
    id: String,
    sender: String,
    #[serde(with = "cap_time")]
    sent: DateTime<FixedOffset>,
}

#[derive(Debug, Deserialize)]
struct FeedDocument {
    #[serde(rename = "@graph")]
    graph: Vec<FeedEntry>,
}

/// Polls the external catalog and schedules a fetch for every listed
/// alert the system does not already have or expect.
pub struct FeedPoller {
    config: Config,
    http: Arc<dyn HttpClientPort>,
    resolver: ReferenceResolver,
    fetch_requests: Arc<dyn Emitter>,
}

impl FeedPoller {
    pub fn new(
        config: Config,
        http: Arc<dyn HttpClientPort>,
        resolver: ReferenceResolver,
        fetch_requests: Arc<dyn Emitter>,
    ) -> FeedPoller {
        FeedPoller {
            config,
            http,
            resolver,
            fetch_requests,
        }
    }

    /// Runs poll cycles until shutdown. Any catalog, parse or
    /// resolution failure aborts the cycle and is returned to the
    /// supervisor; a malformed feed is not assumed self-healing
    /// within one interval.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        loop {
            info!(url = %self.config.feed_url, "fetching alert references from feed");
            let references = self.fetch_references().await?;
            debug!(count = references.len(), "feed returned references");

            for reference in &references {
                if self.resolver.resolve(reference).await? == Resolution::Unknown {
                    info!(
                        sender = %reference.sender,
                        identifier = %reference.identifier,
                        "requesting fetch"
                    );
                    let payload = serde_json::to_vec(reference)?;
                    self.fetch_requests.emit(&reference.key(), payload).await?;
                }
            }

            debug!(interval = ?self.config.poll_interval, "sleeping until next poll");
            if !interruptible_sleep(self.config.poll_interval, &shutdown).await {
                return Ok(());
            }
        }
    }

    async fn fetch_references(&self) -> Result<Vec<Reference>> {
        let response = self.http.get(&self.config.feed_url, FEED_ACCEPT).await?;
        if response.status != 200 {
            return Err(IngestError::Feed(format!(
                "catalog returned status {}",
                response.status
            )));
        }
        let document: FeedDocument = serde_json::from_slice(&response.body)?;
        Ok(document
            .graph
            .into_iter()
            .map(|entry| Reference {
                sender: entry.sender,
                identifier: entry.id,
                sent: entry.sent,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::memory::MemoryBus;
    use crate::infra::http_client::HttpGetResult;
    use crate::resolver::ReferenceResolver;
    use crate::store::InMemoryAlertStore;
    use async_trait::async_trait;

    const FEED_BODY: &str = r#"{
        "@graph": [
            {"id": "urn:oid:1", "sender": "cap-pac@canada.ca", "sent": "2021-03-01T15:00:00-05:00"},
            {"id": "urn:oid:2", "sender": "cap-pac@canada.ca", "sent": "2021-03-01T16:00:00-05:00"}
        ]
    }"#;

    struct StaticHttp {
        status: u16,
        body: &'static str,
    }

    #[async_trait]
    impl HttpClientPort for StaticHttp {
        async fn get(&self, _url: &str, accept: &str) -> Result<HttpGetResult> {
            assert_eq!(accept, FEED_ACCEPT);
            Ok(HttpGetResult {
                status: self.status,
                body: self.body.as_bytes().to_vec(),
            })
        }
    }

    fn poller(http: StaticHttp, bus: &Arc<MemoryBus>) -> FeedPoller {
        let store = Arc::new(InMemoryAlertStore::new());
        let resolver = ReferenceResolver::new(store, bus.view("fetch"));
        FeedPoller::new(
            Config {
                feed_url: "http://feed.example/alerts".to_string(),
                poll_interval: Duration::from_secs(60),
            },
            Arc::new(http),
            resolver,
            bus.emitter("fetch"),
        )
    }

    #[tokio::test]
    async fn test_parses_feed_document() {
        let bus = MemoryBus::new(4);
        let poller = poller(
            StaticHttp {
                status: 200,
                body: FEED_BODY,
            },
            &bus,
        );
        let references = poller.fetch_references().await.unwrap();
        assert_eq!(references.len(), 2);
        assert_eq!(references[0].identifier, "urn:oid:1");
        assert_eq!(references[0].sender, "cap-pac@canada.ca");
    }

    #[tokio::test]
    async fn test_emits_fetch_requests_for_unknown_references() {
        let bus = MemoryBus::new(4);
        let poller = poller(
            StaticHttp {
                status: 200,
                body: FEED_BODY,
            },
            &bus,
        );

        // Cancelled token: one full cycle, then the sleep aborts.
        let shutdown = CancellationToken::new();
        shutdown.cancel();
        poller.run(shutdown).await.unwrap();
        assert_eq!(bus.topic("fetch").len(), 2);
    }

    #[tokio::test]
    async fn test_skips_references_already_requested() {
        let bus = MemoryBus::new(4);
        let poller = poller(
            StaticHttp {
                status: 200,
                body: FEED_BODY,
            },
            &bus,
        );

        let shutdown = CancellationToken::new();
        shutdown.cancel();
        poller.run(shutdown.clone()).await.unwrap();
        // Second cycle over the same feed finds everything pending.
        poller.run(shutdown).await.unwrap();
        assert_eq!(bus.topic("fetch").len(), 2);
    }

    #[tokio::test]
    async fn test_non_200_feed_is_fatal() {
        let bus = MemoryBus::new(4);
        let poller = poller(
            StaticHttp {
                status: 503,
                body: "",
            },
            &bus,
        );
        let result = poller.run(CancellationToken::new()).await;
        assert!(matches!(result, Err(IngestError::Feed(_))));
    }

    #[tokio::test]
    async fn test_malformed_feed_is_fatal() {
        let bus = MemoryBus::new(4);
        let poller = poller(
            StaticHttp {
                status: 200,
                body: "{\"@graph\": [{\"id\": 42}]}",
            },
            &bus,
        );
        let result = poller.run(CancellationToken::new()).await;
        assert!(matches!(result, Err(IngestError::Json(_))));
    }
}
