use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::info;

use cap_ingester::bus::memory::MemoryBus;
use cap_ingester::geocode::{GeocodeMap, UgcKind};
use cap_ingester::infra::http_client::{HttpClientPort, ReqwestHttp};
use cap_ingester::logging;
use cap_ingester::pipeline::consume::{self, ConsumeStage};
use cap_ingester::pipeline::feed::{self, FeedPoller};
use cap_ingester::pipeline::fetch::{self, FetchStage};
use cap_ingester::pipeline::run_stage;
use cap_ingester::resolver::ReferenceResolver;
use cap_ingester::store::{AlertStore, InMemoryAlertStore};

#[derive(Parser)]
#[command(name = "cap_ingester")]
#[command(about = "CAP weather alert ingestion pipeline")]
#[command(version = "0.1.0")]
struct Cli {
    /// Partition count for every bus topic
    #[arg(long, default_value_t = 4)]
    partitions: usize,

    /// Fetch-request topic name
    #[arg(long, default_value = "cap-fetch")]
    fetch_topic: String,

    /// Alerts topic name
    #[arg(long, default_value = "cap-alerts")]
    alerts_topic: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the feed poller, fetch and consume stages over the
    /// in-process bus
    Run {
        /// External catalog feed URL
        #[arg(long)]
        feed_url: String,

        /// Feed poll interval, in seconds
        #[arg(long, default_value_t = 60)]
        interval: u64,

        /// Candidate source base URLs, in order (repeatable)
        #[arg(long = "fetch-url", required = true)]
        fetch_urls: Vec<String>,

        /// Per-message settle delay for the fetch stage, in seconds
        #[arg(long, default_value_t = 0)]
        fetch_delay: u64,

        /// Per-message settle delay for the consume stage, in seconds
        #[arg(long, default_value_t = 0)]
        consume_delay: u64,

        /// Origin system name stamped on stored alerts
        #[arg(long, default_value = "naads")]
        system: String,

        /// UGC county polygon dataset (JSON)
        #[arg(long)]
        ugc_c: Option<PathBuf>,

        /// UGC public-zone polygon dataset (JSON)
        #[arg(long)]
        ugc_z: Option<PathBuf>,

        /// Optional downstream topic for chained topologies
        #[arg(long)]
        forward_topic: Option<String>,
    },
}

fn load_geocodes(ugc_c: Option<&PathBuf>, ugc_z: Option<&PathBuf>) -> anyhow::Result<GeocodeMap> {
    let mut geocodes = GeocodeMap::new();
    if let Some(path) = ugc_c {
        info!(path = %path.display(), "loading UGC county polygons");
        let count = geocodes.load(path, UgcKind::County)?;
        info!(count, "loaded county polygons");
    }
    if let Some(path) = ugc_z {
        info!(path = %path.display(), "loading UGC public-zone polygons");
        let count = geocodes.load(path, UgcKind::PublicZone)?;
        info!(count, "loaded public-zone polygons");
    }
    Ok(geocodes)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init_logging();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            feed_url,
            interval,
            fetch_urls,
            fetch_delay,
            consume_delay,
            system,
            ugc_c,
            ugc_z,
            forward_topic,
        } => {
            let geocodes = load_geocodes(ugc_c.as_ref(), ugc_z.as_ref())?;

            let bus = MemoryBus::new(cli.partitions);
            let store: Arc<dyn AlertStore> = Arc::new(InMemoryAlertStore::new());
            let http: Arc<dyn HttpClientPort> = Arc::new(ReqwestHttp::new()?);
            let resolver = ReferenceResolver::new(store.clone(), bus.view(&cli.fetch_topic));

            let poller = FeedPoller::new(
                feed::Config {
                    feed_url,
                    poll_interval: Duration::from_secs(interval),
                },
                http.clone(),
                resolver.clone(),
                bus.emitter(&cli.fetch_topic),
            );

            let fetch_stage = Arc::new(FetchStage::new(
                fetch::Config {
                    fetch_urls,
                    delay: Duration::from_secs(fetch_delay),
                },
                http.clone(),
                bus.emitter(&cli.alerts_topic),
            ));

            let consume_stage = Arc::new(ConsumeStage::new(
                consume::Config {
                    delay: Duration::from_secs(consume_delay),
                    origin_system: system,
                },
                resolver.clone(),
                store.clone(),
                Arc::new(geocodes),
                bus.emitter(&cli.fetch_topic),
                forward_topic.map(|topic| bus.emitter(&topic)),
            ));

            let shutdown = CancellationToken::new();
            let mut stages = JoinSet::new();

            let streams = bus.subscribe(&cli.fetch_topic);
            stages.spawn(run_stage(fetch_stage, streams, shutdown.clone()));

            let streams = bus.subscribe(&cli.alerts_topic);
            stages.spawn(run_stage(consume_stage, streams, shutdown.clone()));

            {
                let shutdown = shutdown.clone();
                stages.spawn(async move { poller.run(shutdown).await });
            }

            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("signal received, terminating");
                    shutdown.cancel();
                }
                Some(finished) = stages.join_next() => {
                    // A stage stopped on its own; bring the rest down
                    shutdown.cancel();
                    finished??;
                }
            }

            while let Some(finished) = stages.join_next().await {
                finished??;
            }
            info!("pipeline stopped");
        }
    }

    Ok(())
}
