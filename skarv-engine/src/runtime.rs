//! ## skarv-engine::runtime
//! **Builder runtime: ingress, assembly and distribution tasks**
//!
//! The runtime wires the full pipeline: fragments arrive from the
//! transport, the assembler correlates them into completed events, the
//! SPSC ring hands those to the distribution task, and replenishment
//! credits flow back upstream. Two blocking loops run on the tokio
//! blocking pool; a watch channel latches shutdown, after which each
//! loop exits at its next iteration with in-flight buffers abandoned.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam::channel::{Receiver, RecvTimeoutError};
use opentelemetry::KeyValue;
use tokio::sync::watch;
use tracing::{error, info, instrument, warn};

use skarv_codec::{DatagramView, Transition, DGRAM_HEADER_SIZE};
use skarv_config::SkarvConfig;
use skarv_core::assembly::{CompletedEvent, ContributorSet, EventAssembler, Fragment};
use skarv_core::pool::{BufferPool, SlotIndex};
use skarv_core::registry::{FragmentRef, FragmentRegistry};
use skarv_core::ring::CompletionRing;
use skarv_telemetry::{EventLogger, MetricsRecorder};
use skarv_transport::{ImmKind, ImmValue, Link, Message, Transport};

use crate::distribution::{DistributionEngine, ProcessOutcome};
use crate::error::EngineError;
use crate::groups::{ConsumerGroups, EventConsumer};
use crate::strategy::{BuilderStrategy, DeliveryStrategy};

const IDLE_POLL: Duration = Duration::from_millis(10);

/// Final tallies of one builder run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuilderReport {
    pub events_built: u64,
    pub fragments_received: u64,
    pub duplicates: u64,
}

/// Connects one link per configured peer. A peer that cannot be reached
/// at startup is a hard error; the run never starts half-connected.
pub fn connect_peers<T>(
    transport: &T,
    config: &SkarvConfig,
) -> Result<Vec<Box<dyn Link>>, EngineError>
where
    T: Transport,
    T::Link: 'static,
{
    let timeout_ms = config.membership.connect_timeout_ms;
    let mut links: Vec<Box<dyn Link>> = Vec::with_capacity(config.membership.peers.len());
    for peer in &config.membership.peers {
        let link = transport.connect(&peer.addr, peer.port, timeout_ms)?;
        info!(addr = %peer.addr, port = peer.port, id = link.id(), "peer link up");
        links.push(Box::new(link));
    }
    Ok(links)
}

/// Runs the builder until shutdown latches.
///
/// `ingress` carries both contributor fragments and returning
/// replenishment credits; `consumers` attach under their queue index
/// before the first event is delivered.
#[instrument(
    level = "info",
    name = "run_builder",
    skip(config, transport, ingress, consumers, shutdown, metrics)
)]
pub async fn run_builder<T>(
    config: SkarvConfig,
    transport: &T,
    ingress: Receiver<Message>,
    consumers: Vec<(usize, Box<dyn EventConsumer>)>,
    shutdown: watch::Receiver<bool>,
    metrics: MetricsRecorder,
) -> Result<BuilderReport, EngineError>
where
    T: Transport,
    T::Link: 'static,
{
    let links = connect_peers(transport, &config)?;
    let own_id = config.membership.own_id;

    let pool = Arc::new(BufferPool::new(
        config.engine.max_buffers,
        config.engine.buffer_size,
    )?);
    let registry = Arc::new(FragmentRegistry::new());
    let expected = ContributorSet::from_ids(config.membership.contributors.iter().copied())?;
    let ring = CompletionRing::with_capacity(config.engine.ring_capacity)?;
    let ring_consumer = ring.share();

    let mut groups = ConsumerGroups::new(config.engine.num_queue_groups);
    for (queue, consumer) in consumers {
        groups.attach(queue, consumer)?;
    }

    let strategy = BuilderStrategy::new(registry.clone(), links, own_id);
    let mut engine = DistributionEngine::new(
        pool.clone(),
        groups,
        strategy,
        registry.clone(),
        metrics.clone(),
    );

    EventLogger::log_event(
        "run_started",
        vec![
            KeyValue::new("own_id", own_id as i64),
            KeyValue::new("contributors", expected.len() as i64),
            KeyValue::new("buffers", config.engine.max_buffers as i64),
        ],
    )
    .await;

    // Seed one outstanding credit per peer so contributors have buffers
    // to fill from the first event on.
    for _ in 0..engine.pool().capacity().min(config.membership.peers.len()) {
        engine.request_buffer();
    }

    // Latched by the distribution task on any exit so a fatal error
    // also stops ingress.
    let stop = Arc::new(AtomicBool::new(false));

    let ingress_shutdown = shutdown.clone();
    let ingress_stop = stop.clone();
    let ingress_metrics = metrics.clone();
    let ingress_pool = pool.clone();
    let ingress_registry = registry.clone();
    let ingress_handle = tokio::task::spawn_blocking(move || {
        ingress_loop(
            ingress,
            EventAssembler::new(expected),
            ingress_registry,
            ingress_pool,
            ring,
            own_id,
            ingress_metrics,
            ingress_shutdown,
            ingress_stop,
        )
    });

    let distribution_handle = tokio::task::spawn_blocking(move || {
        let result = distribution_loop(&mut engine, ring_consumer, shutdown);
        stop.store(true, Ordering::Release);
        result.map(|()| engine.event_count())
    });

    let events_built = distribution_handle.await?;
    let (fragments_received, duplicates) = ingress_handle.await?;
    let events_built = events_built?;

    EventLogger::log_event(
        "run_stopped",
        vec![
            KeyValue::new("events_built", events_built as i64),
            KeyValue::new("fragments_received", fragments_received as i64),
        ],
    )
    .await;

    Ok(BuilderReport {
        events_built,
        fragments_received,
        duplicates,
    })
}

/// Receives transport messages, returns credits to the pool and feeds
/// the assembler, pushing completed events onto the ring. Returns the
/// fragment and duplicate tallies.
#[allow(clippy::too_many_arguments)]
fn ingress_loop(
    ingress: Receiver<Message>,
    mut assembler: EventAssembler,
    registry: Arc<FragmentRegistry>,
    pool: Arc<BufferPool>,
    ring: CompletionRing,
    own_id: u32,
    metrics: MetricsRecorder,
    shutdown: watch::Receiver<bool>,
    stop: Arc<AtomicBool>,
) -> (u64, u64) {
    let mut fragments_received = 0u64;
    let mut backlog: VecDeque<CompletedEvent> = VecDeque::new();

    loop {
        if *shutdown.borrow() || stop.load(Ordering::Acquire) {
            break;
        }
        // Completed events held back by a full ring go out first so the
        // non-decreasing handoff order is preserved.
        while let Some(event) = backlog.pop_front() {
            if let Err(back) = ring.send(event) {
                backlog.push_front(back);
                break;
            }
        }

        let message = match ingress.recv_timeout(IDLE_POLL) {
            Ok(message) => message,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };

        // Credits come home as empty-payload messages carrying the
        // posted immediate value. A fragment's immediate value is never
        // interpreted as a credit: contributors are free to post any
        // imm, including zero, alongside their payload.
        if message.payload.is_empty() {
            let imm = ImmValue::from_raw(message.imm);
            if imm.kind() == Some(ImmKind::Buffer) && imm.source() == own_id {
                if let Err(error) = pool.release(SlotIndex(imm.index())) {
                    error!(%error, index = imm.index(), "credit release failed");
                }
            } else {
                warn!(imm = message.imm, "unrecognized empty message dropped");
            }
            continue;
        }

        if ingest_fragment(&message, &mut assembler, &registry, &metrics) {
            fragments_received += 1;
        }
        for event in assembler.drain_complete() {
            // While older completions wait in the backlog, newer ones
            // queue behind them; sending directly could pass an older
            // event if the consumer freed a ring slot in between.
            if !backlog.is_empty() {
                backlog.push_back(event);
            } else if let Err(back) = ring.send(event) {
                warn!(event_id = back.event_id, "completion ring full, holding event");
                backlog.push_back(back);
            }
        }
    }
    (fragments_received, assembler.duplicates())
}

/// Parses and records one fragment. Malformed or out-of-set fragments
/// are dropped with a warning; they must not take the builder down.
fn ingest_fragment(
    message: &Message,
    assembler: &mut EventAssembler,
    registry: &FragmentRegistry,
    metrics: &MetricsRecorder,
) -> bool {
    let view = match DatagramView::parse(&message.payload) {
        Ok(view) => view,
        Err(error) => {
            warn!(%error, "malformed fragment dropped");
            return false;
        }
    };
    if view.header().transition != Transition::Event {
        info!(
            transition = ?view.header().transition,
            event_id = view.header().event_id,
            "run transition received"
        );
        return false;
    }

    let root = view.root();
    let arena = registry.register(message.payload.clone());
    let fragment = Fragment {
        event_id: view.header().event_id,
        timestamp: view.header().timestamp,
        contributor: root.header().src.value(),
        damage: root.header().damage,
        extent: root.extent(),
        location: FragmentRef {
            arena,
            offset: DGRAM_HEADER_SIZE as u32,
        },
    };
    match assembler.insert(fragment) {
        Ok(()) => {
            metrics.fragments_received.inc();
            true
        }
        Err(error) => {
            warn!(%error, "fragment rejected");
            registry.retire(arena);
            false
        }
    }
}

/// Drains the ring into the engine. A deferred event is retried before
/// anything newer; a fatal error propagates and ends the run.
fn distribution_loop<S: DeliveryStrategy>(
    engine: &mut DistributionEngine<S>,
    ring: CompletionRing,
    shutdown: watch::Receiver<bool>,
) -> Result<(), EngineError> {
    let mut deferred: Option<CompletedEvent> = None;
    loop {
        if *shutdown.borrow() {
            break;
        }
        let event = match deferred.take() {
            Some(event) => event,
            None => match ring.recv() {
                Some(event) => event,
                None => {
                    std::thread::sleep(IDLE_POLL);
                    continue;
                }
            },
        };
        match engine.process(event) {
            Ok(ProcessOutcome::Delivered) => {}
            Ok(ProcessOutcome::Deferred(back)) => {
                deferred = Some(back);
                std::thread::sleep(IDLE_POLL);
            }
            Err(error) if error.is_fatal() => {
                error!(%error, "fatal distribution error");
                return Err(error);
            }
            Err(error) => {
                warn!(%error, "event dropped");
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam::channel::bounded;
    use skarv_codec::{build_fragment, Level, Src};

    fn fragment_message(event_id: u64, contributor: u32, imm: u32) -> Message {
        let payload = build_fragment(
            event_id,
            event_id * 10,
            Src::new(Level::Source, contributor),
            b"payload",
        )
        .unwrap();
        Message { payload, imm }
    }

    fn spawn_ingress(
        ingress: Receiver<Message>,
        pool: Arc<BufferPool>,
        registry: Arc<FragmentRegistry>,
        ring: CompletionRing,
        own_id: u32,
    ) -> (watch::Sender<bool>, std::thread::JoinHandle<(u64, u64)>) {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let assembler = EventAssembler::new(ContributorSet::from_ids([1]).unwrap());
        let handle = std::thread::spawn(move || {
            ingress_loop(
                ingress,
                assembler,
                registry,
                pool,
                ring,
                own_id,
                MetricsRecorder::new(),
                shutdown_rx,
                Arc::new(AtomicBool::new(false)),
            )
        });
        (shutdown_tx, handle)
    }

    #[test]
    fn fragment_with_zero_imm_leaves_outstanding_slots_alone() {
        // Builder id 0: a zero immediate value on a fragment decodes as
        // (Buffer, source 0, index 0) and must still not count as a
        // returning credit while slot 0 is riding an upstream request.
        let pool = Arc::new(BufferPool::new(1, 256).unwrap());
        let held = pool.acquire().unwrap();
        let registry = Arc::new(FragmentRegistry::new());
        let ring = CompletionRing::with_capacity(4).unwrap();
        let consumer = ring.share();

        let (tx, rx) = bounded(8);
        tx.send(fragment_message(1, 1, 0)).unwrap();
        drop(tx);
        let (_shutdown_tx, handle) = spawn_ingress(rx, pool.clone(), registry, ring, 0);
        let (fragments, duplicates) = handle.join().unwrap();

        assert_eq!((fragments, duplicates), (1, 0));
        // Slot 0 is still outstanding; only the assembler saw the bytes.
        assert_eq!(pool.outstanding(), 1);
        assert_eq!(pool.free_count(), 0);
        assert_eq!(consumer.recv().unwrap().event_id, 1);
        pool.release(held).unwrap();
    }

    #[test]
    fn empty_credit_message_releases_its_slot() {
        let pool = Arc::new(BufferPool::new(2, 256).unwrap());
        let index = pool.acquire().unwrap();
        let registry = Arc::new(FragmentRegistry::new());
        let ring = CompletionRing::with_capacity(4).unwrap();

        let (tx, rx) = bounded(8);
        let imm = ImmValue::pack(ImmKind::Buffer, 0, index.0);
        tx.send(Message {
            payload: bytes::Bytes::new(),
            imm: imm.raw(),
        })
        .unwrap();
        drop(tx);
        let (_shutdown_tx, handle) = spawn_ingress(rx, pool.clone(), registry, ring, 0);
        handle.join().unwrap();

        assert_eq!(pool.free_count(), 2);
        assert_eq!(pool.outstanding(), 0);
    }

    #[test]
    fn full_ring_keeps_handoff_in_event_order() {
        // Ring of 2 forces most completions through the backlog while
        // the consumer drains concurrently; the handoff order must stay
        // non-decreasing throughout.
        let pool = Arc::new(BufferPool::new(4, 256).unwrap());
        let registry = Arc::new(FragmentRegistry::new());
        let ring = CompletionRing::with_capacity(2).unwrap();
        let consumer = ring.share();

        let (tx, rx) = bounded(32);
        for event_id in 1..=16 {
            tx.send(fragment_message(event_id, 1, 0)).unwrap();
        }
        let (shutdown_tx, handle) = spawn_ingress(rx, pool, registry, ring, 7);

        let mut seen = Vec::new();
        while seen.len() < 16 {
            if let Some(event) = consumer.recv() {
                seen.push(event.event_id);
            } else {
                std::thread::yield_now();
            }
        }
        shutdown_tx.send(true).unwrap();
        drop(tx);
        let (fragments, _) = handle.join().unwrap();

        assert_eq!(fragments, 16);
        assert_eq!(seen, (1..=16).collect::<Vec<u64>>());
    }
}
