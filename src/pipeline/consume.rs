use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::bus::{Emitter, Message};
use crate::common::error::Result;
use crate::domain::canonical::{self, DEFAULT_LANGUAGE};
use crate::domain::cap::{self, MessageType, Status};
use crate::geocode::GeocodeMap;
use crate::pipeline::{interruptible_sleep, MessageHandler};
use crate::resolver::{ReferenceResolver, Resolution};
use crate::store::AlertStore;

#[derive(Debug, Clone)]
pub struct Config {
    /// Settle delay before each message is processed.
    pub delay: Duration,
    /// Origin system identifier stamped on every canonical alert.
    pub origin_system: String,
}

/// Consumes fetched alerts: re-injects unresolved references as fetch
/// requests, backfills missing polygons, converts to the canonical
/// schema and persists what passes the accept-filter.
pub struct ConsumeStage {
    config: Config,
    resolver: ReferenceResolver,
    store: Arc<dyn AlertStore>,
    geocodes: Arc<GeocodeMap>,
    fetch_requests: Arc<dyn Emitter>,
    forward: Option<Arc<dyn Emitter>>,
}

impl ConsumeStage {
    pub fn new(
        config: Config,
        resolver: ReferenceResolver,
        store: Arc<dyn AlertStore>,
        geocodes: Arc<GeocodeMap>,
        fetch_requests: Arc<dyn Emitter>,
        forward: Option<Arc<dyn Emitter>>,
    ) -> ConsumeStage {
        ConsumeStage {
            config,
            resolver,
            store,
            geocodes,
            fetch_requests,
            forward,
        }
    }

    /// Schedules a fetch for every reference the system neither stores
    /// nor expects. Reference chains (and cycles) terminate here: once
    /// a key is in the store or the dedup view, nothing is re-emitted.
    async fn request_references(&self, alert: &cap::Alert) -> Result<()> {
        for reference in &alert.references {
            if self.resolver.resolve(reference).await? == Resolution::Unknown {
                info!(reference = %reference, "requesting referenced alert");
                let payload = serde_json::to_vec(reference)?;
                self.fetch_requests.emit(&reference.key(), payload).await?;
            }
        }
        Ok(())
    }

    fn enrich(&self, alert: &mut cap::Alert) {
        for info in &mut alert.infos {
            if info.language.as_deref().map_or(true, str::is_empty) {
                info.language = Some(DEFAULT_LANGUAGE.to_string());
            }

            for area in &mut info.areas {
                if !area.polygons.is_empty() || !area.circles.is_empty() {
                    continue;
                }
                // Fill in the polygons based on UGC geocodes
                let codes: Vec<String> = area.geo_code_values("UGC").map(String::from).collect();
                for code in codes {
                    match self.geocodes.get(&code) {
                        Some(polygon) => area.polygons.push(polygon.clone()),
                        None => warn!(%code, "cannot find polygon for UGC code"),
                    }
                }
            }
        }
    }
}

/// Whether an alert belongs in the durable store.
fn accepts(alert: &canonical::Alert) -> bool {
    matches!(
        alert.status,
        Status::Actual | Status::Exercise | Status::Test
    ) && matches!(
        alert.message_type,
        MessageType::Alert | MessageType::Update | MessageType::Cancel
    )
}

#[async_trait]
impl MessageHandler for ConsumeStage {
    async fn handle(&self, message: Message, shutdown: &CancellationToken) -> Result<()> {
        if !interruptible_sleep(self.config.delay, shutdown).await {
            return Ok(());
        }

        // An unparsable payload is isolated to this message; the rest
        // of the partition keeps flowing.
        let mut alert: cap::Alert = match serde_json::from_slice(&message.payload) {
            Ok(alert) => alert,
            Err(e) => {
                error!(key = %message.key, error = %e, "dropping undecodable alert payload");
                return Ok(());
            }
        };
        info!(
            key = %message.key,
            sender = %alert.sender,
            identifier = %alert.identifier,
            "received alert"
        );

        self.request_references(&alert).await?;

        self.enrich(&mut alert);

        let canonical = canonical::Alert::from_wire(&alert, &self.config.origin_system);

        if accepts(&canonical) {
            self.store.add(canonical.clone()).await?;
        }

        if let Some(forward) = &self.forward {
            let payload = serde_json::to_vec(&canonical)?;
            forward.emit(&message.key, payload).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::memory::MemoryBus;
    use crate::domain::geo::{Circle, Polygon};
    use crate::store::InMemoryAlertStore;
    use chrono::DateTime;

    fn wire_alert(status: Status, msg_type: MessageType) -> cap::Alert {
        cap::Alert {
            identifier: "urn:oid:1".to_string(),
            sender: "cap-pac@canada.ca".to_string(),
            sent: DateTime::parse_from_rfc3339("2021-03-01T15:00:00-05:00").unwrap(),
            status,
            msg_type,
            references: vec![],
            infos: vec![],
        }
    }

    fn alert_message(alert: &cap::Alert) -> Message {
        Message {
            key: alert.id(),
            payload: serde_json::to_vec(alert).unwrap(),
        }
    }

    struct Fixture {
        bus: Arc<MemoryBus>,
        store: Arc<InMemoryAlertStore>,
        stage: ConsumeStage,
    }

    fn fixture(geocodes: GeocodeMap, forward: bool) -> Fixture {
        let bus = MemoryBus::new(4);
        let store = Arc::new(InMemoryAlertStore::new());
        let resolver = ReferenceResolver::new(store.clone(), bus.view("fetch"));
        let stage = ConsumeStage::new(
            Config {
                delay: Duration::ZERO,
                origin_system: "naads".to_string(),
            },
            resolver,
            store.clone(),
            Arc::new(geocodes),
            bus.emitter("fetch"),
            forward.then(|| bus.emitter("forward")),
        );
        Fixture { bus, store, stage }
    }

    #[tokio::test]
    async fn test_accept_filter_persists_test_update() {
        let f = fixture(GeocodeMap::new(), false);
        let alert = wire_alert(Status::Test, MessageType::Update);
        f.stage
            .handle(alert_message(&alert), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(f.store.len(), 1);
        let stored = f.store.get(&alert.id()).unwrap();
        assert_eq!(stored.origin_system, "naads");
    }

    #[tokio::test]
    async fn test_accept_filter_rejects_draft_but_forwards() {
        let f = fixture(GeocodeMap::new(), true);
        let alert = wire_alert(Status::Draft, MessageType::Alert);
        f.stage
            .handle(alert_message(&alert), &CancellationToken::new())
            .await
            .unwrap();
        assert!(f.store.is_empty());
        // Forwarded regardless of the accept-filter, keyed like the input
        assert_eq!(f.bus.topic("forward").len(), 1);
    }

    #[tokio::test]
    async fn test_accept_filter_rejects_ack_messages() {
        let f = fixture(GeocodeMap::new(), false);
        let alert = wire_alert(Status::Actual, MessageType::Ack);
        f.stage
            .handle(alert_message(&alert), &CancellationToken::new())
            .await
            .unwrap();
        assert!(f.store.is_empty());
    }

    #[tokio::test]
    async fn test_enrichment_fills_polygons_from_ugc() {
        let polygon = Polygon(vec![[-89.21, 48.52], [-88.97, 48.52]]);
        let mut geocodes = GeocodeMap::new();
        geocodes.insert("ONZ000", polygon.clone());

        let f = fixture(geocodes, false);
        let mut alert = wire_alert(Status::Actual, MessageType::Alert);
        alert.infos = vec![cap::Info {
            language: None,
            event: None,
            headline: None,
            description: None,
            areas: vec![cap::Area {
                area_desc: None,
                geo_codes: vec![
                    cap::NamedValue {
                        value_name: "UGC".to_string(),
                        value: "ONZ000".to_string(),
                    },
                    cap::NamedValue {
                        value_name: "UGC".to_string(),
                        value: "XXZ999".to_string(),
                    },
                ],
                polygons: vec![],
                circles: vec![],
            }],
        }];

        f.stage
            .handle(alert_message(&alert), &CancellationToken::new())
            .await
            .unwrap();

        let stored = f.store.get(&alert.id()).unwrap();
        let area = &stored.infos[0].areas[0];
        // The matched code fills exactly its polygon; the miss is skipped
        assert_eq!(area.polygons, vec![polygon]);
        assert_eq!(stored.infos[0].language, DEFAULT_LANGUAGE);
    }

    #[tokio::test]
    async fn test_enrichment_leaves_areas_with_circles_alone() {
        let mut geocodes = GeocodeMap::new();
        geocodes.insert("ONZ000", Polygon(vec![[-89.21, 48.52]]));

        let f = fixture(geocodes, false);
        let mut alert = wire_alert(Status::Actual, MessageType::Alert);
        alert.infos = vec![cap::Info {
            language: Some("fr-CA".to_string()),
            event: None,
            headline: None,
            description: None,
            areas: vec![cap::Area {
                area_desc: None,
                geo_codes: vec![cap::NamedValue {
                    value_name: "UGC".to_string(),
                    value: "ONZ000".to_string(),
                }],
                polygons: vec![],
                circles: vec![Circle {
                    center: [-75.69, 45.42],
                    radius: 25.0,
                }],
            }],
        }];

        f.stage
            .handle(alert_message(&alert), &CancellationToken::new())
            .await
            .unwrap();

        let stored = f.store.get(&alert.id()).unwrap();
        let area = &stored.infos[0].areas[0];
        assert!(area.polygons.is_empty());
        assert_eq!(area.circles.len(), 1);
        assert_eq!(stored.infos[0].language, "fr-CA");
    }

    #[tokio::test]
    async fn test_unknown_references_are_requested_once() {
        let f = fixture(GeocodeMap::new(), false);
        let mut alert = wire_alert(Status::Actual, MessageType::Update);
        alert.references = vec![cap::Reference {
            sender: "cap-pac@canada.ca".to_string(),
            identifier: "urn:oid:0".to_string(),
            sent: DateTime::parse_from_rfc3339("2021-03-01T14:00:00-05:00").unwrap(),
        }];

        f.stage
            .handle(alert_message(&alert), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(f.bus.topic("fetch").len(), 1);

        // Reprocessing finds the reference pending; nothing new emitted
        f.stage
            .handle(alert_message(&alert), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(f.bus.topic("fetch").len(), 1);
    }

    #[tokio::test]
    async fn test_undecodable_payload_is_dropped_not_fatal() {
        let f = fixture(GeocodeMap::new(), false);
        f.stage
            .handle(
                Message {
                    key: "k".to_string(),
                    payload: b"<alert>not the bus codec</alert>".to_vec(),
                },
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert!(f.store.is_empty());
    }
}
