use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Url;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::bus::{Emitter, Message};
use crate::common::error::{IngestError, Result};
use crate::domain::cap::{Alert, Reference};
use crate::infra::http_client::HttpClientPort;
use crate::pipeline::{interruptible_sleep, MessageHandler};

pub const ALERT_ACCEPT: &str = "application/cap+xml";

/// Fixed backoff before the single retry of a failed candidate sweep.
const RETRY_BACKOFF: Duration = Duration::from_secs(15);

#[derive(Debug, Clone)]
pub struct Config {
    /// Ordered candidate base URLs; the reference identifier resolves
    /// as a relative reference against each.
    pub fetch_urls: Vec<String>,
    /// Settle delay before each message is processed, allowing
    /// upstream replication to catch up.
    pub delay: Duration,
}

enum Outcome {
    Fetched(Alert),
    /// 404 from the last candidate: the authoritative "does not exist".
    NotFound,
}

/// Consumes fetch requests and turns them into full alerts by trying
/// the candidate sources in order.
pub struct FetchStage {
    config: Config,
    http: Arc<dyn HttpClientPort>,
    alerts: Arc<dyn Emitter>,
}

impl FetchStage {
    pub fn new(config: Config, http: Arc<dyn HttpClientPort>, alerts: Arc<dyn Emitter>) -> FetchStage {
        FetchStage {
            config,
            http,
            alerts,
        }
    }

    /// One pass over the candidate list. The first 200 wins; a 404
    /// from the last candidate is authoritative; everything else makes
    /// the sweep fail.
    async fn sweep(&self, reference: &Reference) -> Result<Outcome> {
        if self.config.fetch_urls.is_empty() {
            return Err(IngestError::Config("no fetch URLs configured".to_string()));
        }
        let last = self.config.fetch_urls.len() - 1;

        for (i, base) in self.config.fetch_urls.iter().enumerate() {
            let url = match Url::parse(base).and_then(|b| b.join(&reference.identifier)) {
                Ok(url) => url,
                Err(e) => {
                    warn!(%base, error = %e, "invalid candidate URL");
                    if i == last {
                        return Err(IngestError::Fetch(format!("invalid candidate URL {base}: {e}")));
                    }
                    continue;
                }
            };

            info!(url = %url, "fetching alert");
            let response = match self.http.get(url.as_str(), ALERT_ACCEPT).await {
                Ok(response) => response,
                Err(e) => {
                    warn!(url = %url, error = %e, "fetch attempt failed");
                    if i == last {
                        return Err(e);
                    }
                    continue;
                }
            };

            info!(status = response.status, key = %reference.key(), "got response");
            if response.status == 200 {
                let alert = Alert::from_xml(&response.body)?;
                return Ok(Outcome::Fetched(alert));
            }
            if response.status == 404 && i == last {
                return Ok(Outcome::NotFound);
            }
        }

        Err(IngestError::Fetch(
            "unable to fetch alert from any candidate".to_string(),
        ))
    }
}

#[async_trait]
impl MessageHandler for FetchStage {
    async fn handle(&self, message: Message, shutdown: &CancellationToken) -> Result<()> {
        if !interruptible_sleep(self.config.delay, shutdown).await {
            return Ok(());
        }

        let reference: Reference = match serde_json::from_slice(&message.payload) {
            Ok(reference) => reference,
            Err(e) => {
                error!(key = %message.key, error = %e, "dropping undecodable fetch request");
                return Ok(());
            }
        };
        info!(key = %message.key, reference = %reference, "received fetch request");

        let outcome = match self.sweep(&reference).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(key = %message.key, error = %e, "candidate sweep failed, retrying once");
                if !interruptible_sleep(RETRY_BACKOFF, shutdown).await {
                    return Ok(());
                }
                match self.sweep(&reference).await {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        // Accepted data loss; the feed re-surfaces live
                        // references on a later poll cycle.
                        error!(key = %message.key, error = %e, "fetch failed after retry, dropping");
                        return Ok(());
                    }
                }
            }
        };

        match outcome {
            Outcome::NotFound => {
                info!(key = %message.key, reference = %reference, "alert not found");
                Ok(())
            }
            Outcome::Fetched(alert) => {
                let payload = serde_json::to_vec(&alert)?;
                self.alerts.emit(&alert.id(), payload).await
            }
        }
    }
}
