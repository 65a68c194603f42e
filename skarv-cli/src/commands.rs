use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use rand::{Rng, SeedableRng};
use tokio::sync::watch;
use tracing::{info, warn};

use skarv_codec::{build_fragment, DatagramView, Level, Src};
use skarv_config::{PeerEndpoint, SkarvConfig};
use skarv_engine::{run_builder, EventConsumer};
use skarv_telemetry::{EventLogger, MetricsRecorder};
use skarv_transport::{Link, MemoryFabric, Message, PostOutcome, Transport};

/// Well-known in-process ingress endpoint of this builder.
const INGRESS_ADDR: &str = "skarv";
const INGRESS_PORT: u16 = 32770;

#[derive(Parser)]
#[command(version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the builder from a validated configuration until interrupted
    Run(RunArgs),
    /// Run a loopback simulation with generated contributors
    Simulate(SimulateArgs),
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Configuration file; defaults to config/skarv.yaml + SKARV_* env
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct SimulateArgs {
    /// Number of events each contributor sends
    #[arg(long, default_value_t = 100)]
    pub events: u64,
    /// Number of contributors (ids 1..=n)
    #[arg(long, default_value_t = 3)]
    pub contributors: u32,
    /// Number of consumer queue groups
    #[arg(long, default_value_t = 1)]
    pub queues: usize,
    #[arg(long, default_value_t = 0)]
    pub seed: u64,
    /// Maximum random payload size per fragment
    #[arg(long, default_value_t = 64)]
    pub payload: usize,
}

/// Logs every delivered event. The run-mode consumer of last resort when
/// no real client is attached in-process.
struct EventDump {
    queue: usize,
}

impl EventConsumer for EventDump {
    fn consume(&mut self, event: &DatagramView<'_>) {
        info!(
            queue = self.queue,
            event_id = event.header().event_id,
            size = event.size(),
            "event delivered"
        );
    }
}

struct Counting {
    hits: Arc<AtomicU64>,
}

impl EventConsumer for Counting {
    fn consume(&mut self, _event: &DatagramView<'_>) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }
}

/// Echoes posted buffer requests back to the ingress endpoint as
/// returning credits.
fn spawn_credit_echo(
    fabric: &MemoryFabric,
    requests: crossbeam::channel::Receiver<Message>,
) -> std::thread::JoinHandle<()> {
    let home = fabric
        .connect(INGRESS_ADDR, INGRESS_PORT, 1_000)
        .expect("ingress endpoint is bound before peers");
    std::thread::spawn(move || {
        while let Ok(request) = requests.recv() {
            if home.post(&[], request.imm).is_err() {
                break;
            }
        }
    })
}

pub async fn run_live(args: RunArgs) -> anyhow::Result<()> {
    let config = match args.config {
        Some(path) => SkarvConfig::load_from_path(path)?,
        None => SkarvConfig::load()?,
    };
    EventLogger::init(&config.telemetry.log_filter);
    let metrics = MetricsRecorder::new();

    let fabric = MemoryFabric::new();
    let ingress = fabric.bind(
        INGRESS_ADDR,
        INGRESS_PORT,
        config.membership.own_id,
        config.engine.ring_capacity,
    );
    let mut echoes = Vec::new();
    for (peer_id, peer) in config.membership.peers.iter().enumerate() {
        let requests = fabric.bind(&peer.addr, peer.port, peer_id as u32, 64);
        echoes.push(spawn_credit_echo(&fabric, requests));
    }

    let consumers: Vec<(usize, Box<dyn EventConsumer>)> = (0..config.engine.num_queue_groups)
        .map(|queue| (queue, Box::new(EventDump { queue }) as Box<dyn EventConsumer>))
        .collect();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let metrics_enabled = config.telemetry.metrics_enabled;
    let report_metrics = metrics.clone();
    let runner = {
        let fabric = fabric.clone();
        tokio::spawn(async move {
            run_builder(config, &fabric, ingress, consumers, shutdown_rx, metrics).await
        })
    };

    tokio::signal::ctrl_c().await?;
    info!("interrupt received, shutting down");
    shutdown_tx.send(true)?;
    let report = runner.await??;
    info!(
        events_built = report.events_built,
        fragments_received = report.fragments_received,
        duplicates = report.duplicates,
        "run complete"
    );
    if metrics_enabled {
        println!("{}", report_metrics.gather_metrics()?);
    }
    drop(fabric);
    for echo in echoes {
        let _ = echo.join();
    }
    Ok(())
}

pub async fn run_simulation(args: SimulateArgs) -> anyhow::Result<()> {
    EventLogger::init("info");
    let metrics = MetricsRecorder::new();

    let mut config = SkarvConfig::default();
    config.engine.num_queue_groups = args.queues;
    config.membership.own_id = 0;
    config.membership.contributors = (1..=args.contributors).collect();
    config.membership.peers = vec![
        PeerEndpoint {
            addr: "teb0".into(),
            port: 32768,
        },
        PeerEndpoint {
            addr: "teb1".into(),
            port: 32768,
        },
    ];

    let fabric = MemoryFabric::new();
    let ingress = fabric.bind(INGRESS_ADDR, INGRESS_PORT, 0, 1024);
    let teb0 = fabric.bind("teb0", 32768, 0, 64);
    let teb1 = fabric.bind("teb1", 32768, 1, 64);
    let echoes = vec![
        spawn_credit_echo(&fabric, teb0),
        spawn_credit_echo(&fabric, teb1),
    ];

    let delivered = Arc::new(AtomicU64::new(0));
    let consumers: Vec<(usize, Box<dyn EventConsumer>)> = (0..args.queues)
        .map(|queue| {
            (
                queue,
                Box::new(Counting {
                    hits: delivered.clone(),
                }) as Box<dyn EventConsumer>,
            )
        })
        .collect();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let runner = {
        let fabric = fabric.clone();
        let metrics = metrics.clone();
        tokio::spawn(async move {
            run_builder(config, &fabric, ingress, consumers, shutdown_rx, metrics).await
        })
    };

    let producers: Vec<_> = (1..=args.contributors)
        .map(|contributor| spawn_contributor(&fabric, contributor, &args))
        .collect();

    // One delivery per queue group per event.
    let expected = args.events * args.queues as u64;
    let deadline =
        tokio::time::Instant::now() + Duration::from_secs(10) + Duration::from_millis(args.events);
    while delivered.load(Ordering::Relaxed) < expected {
        if tokio::time::Instant::now() > deadline {
            warn!(
                delivered = delivered.load(Ordering::Relaxed),
                expected, "simulation timed out"
            );
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    for producer in producers {
        let _ = producer.join();
    }
    shutdown_tx.send(true)?;
    let report = runner.await??;
    info!(
        events_built = report.events_built,
        fragments_received = report.fragments_received,
        duplicates = report.duplicates,
        deliveries = delivered.load(Ordering::Relaxed),
        "simulation complete"
    );
    println!("{}", metrics.gather_metrics()?);
    drop(fabric);
    for echo in echoes {
        let _ = echo.join();
    }
    Ok(())
}

/// Sends `events` fragments with seeded random payloads as one
/// contributor. A refused post is retried until the endpoint drains.
fn spawn_contributor(
    fabric: &MemoryFabric,
    contributor: u32,
    args: &SimulateArgs,
) -> std::thread::JoinHandle<()> {
    let link = fabric
        .connect(INGRESS_ADDR, INGRESS_PORT, 1_000)
        .expect("ingress endpoint is bound before contributors");
    let events = args.events;
    let seed = args.seed;
    let max_payload = args.payload.max(16);
    std::thread::spawn(move || {
        let mut rng = rand::rngs::StdRng::seed_from_u64(seed.wrapping_add(contributor as u64));
        for event_id in 1..=events {
            let len = rng.random_range(16..=max_payload);
            let mut payload = vec![0u8; len];
            rng.fill(&mut payload[..]);
            let bytes = build_fragment(
                event_id,
                event_id * 10,
                Src::new(Level::Source, contributor),
                &payload,
            )
            .expect("fragment arena sized for its payload");
            loop {
                match link.post(&bytes, 0) {
                    Ok(PostOutcome::Delivered) => break,
                    Ok(PostOutcome::NotDelivered) => {
                        std::thread::sleep(Duration::from_millis(1));
                    }
                    Err(_) => return,
                }
            }
        }
    })
}
