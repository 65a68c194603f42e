//! ## skarv-engine::distribution
//! **Generic distribution engine**
//!
//! Takes completed events, materializes each into an acquired buffer
//! slot, delivers it to every attached consumer group, reclaims the slot
//! in the same operation, and drives upstream buffer replenishment. The
//! pool and free list are owned here; the assembler only ever hands over
//! completed-event descriptors, never buffer indices.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, error, trace, warn};

use skarv_codec::DatagramView;
use skarv_core::assembly::CompletedEvent;
use skarv_core::pool::BufferPool;
use skarv_core::registry::FragmentRegistry;
use skarv_telemetry::MetricsRecorder;

use crate::error::EngineError;
use crate::groups::ConsumerGroups;
use crate::strategy::{DeliveryStrategy, RequestOutcome};

/// Outcome of processing one completed event.
#[derive(Debug)]
pub enum ProcessOutcome {
    Delivered,
    /// No free buffer was available; the event is handed back and the
    /// caller retries it on the next cycle.
    Deferred(CompletedEvent),
}

pub struct DistributionEngine<S: DeliveryStrategy> {
    pool: Arc<BufferPool>,
    groups: ConsumerGroups,
    strategy: S,
    registry: Arc<FragmentRegistry>,
    metrics: MetricsRecorder,
    event_count: u64,
}

impl<S: DeliveryStrategy> DistributionEngine<S> {
    pub fn new(
        pool: Arc<BufferPool>,
        groups: ConsumerGroups,
        strategy: S,
        registry: Arc<FragmentRegistry>,
        metrics: MetricsRecorder,
    ) -> Self {
        Self {
            pool,
            groups,
            strategy,
            registry,
            metrics,
            event_count: 0,
        }
    }

    /// Materialize, deliver, reclaim, replenish.
    ///
    /// Size is validated before any copy: a built event larger than one
    /// slot is fatal, because the copy would overrun into a neighboring
    /// slot. An exhausted pool is backpressure, not an error.
    pub fn process(&mut self, event: CompletedEvent) -> Result<ProcessOutcome, EngineError> {
        let size = event.built_size();
        let slot_size = self.pool.slot_size();
        if size > slot_size {
            return Err(EngineError::EventTooLarge { size, slot_size });
        }

        let Some(index) = self.pool.acquire() else {
            self.metrics.pool_exhausted.inc();
            debug!(event_id = event.event_id, "no free buffer, deferring event");
            return Ok(ProcessOutcome::Deferred(event));
        };

        let started = Instant::now();
        let written = {
            let mut slot = self.pool.slot(index)?;
            match self.strategy.on_build_event(&event, &mut slot[..]) {
                Ok(written) => written,
                Err(e) => {
                    drop(slot);
                    // Keep accounting intact even on the way down: the
                    // slot goes back and the dropped event's fragment
                    // memory is retired with it.
                    if let Err(release) = self.pool.release(index) {
                        error!(%release, "release failed during build error handling");
                    }
                    for fragment in &event.directory {
                        self.registry.retire(fragment.location.arena);
                    }
                    return Err(e);
                }
            }
        };

        // The built event no longer references contributor-side memory.
        for fragment in &event.directory {
            self.registry.retire(fragment.location.arena);
        }

        {
            let slot = self.pool.slot(index)?;
            let view = DatagramView::parse(&slot[..written])?;
            let delivered = self.groups.deliver(&view);
            self.metrics.deliveries.inc_by(delivered as f64);
            trace!(
                event_id = event.event_id,
                deliveries = delivered,
                size = written,
                "event delivered"
            );
        }

        // Every group has consumed; reclaim in the same operation.
        self.pool.release(index)?;
        self.strategy.on_release_buffer(index);
        self.event_count += 1;
        self.metrics.events_built.inc();
        self.metrics
            .build_latency
            .observe(started.elapsed().as_nanos() as f64);

        self.request_buffer();
        Ok(ProcessOutcome::Delivered)
    }

    /// Requests one replacement buffer from upstream. An empty free list
    /// or an all-peers post failure is logged and skipped; the next cycle
    /// retries.
    pub fn request_buffer(&mut self) {
        let Some(index) = self.pool.acquire() else {
            self.metrics.pool_exhausted.inc();
            warn!("free list empty, skipping buffer request");
            return;
        };
        match self.strategy.on_request_buffer(index) {
            RequestOutcome::Posted { peer } => {
                self.metrics.requests_posted.inc();
                trace!(index = index.0, peer, "buffer request posted");
            }
            RequestOutcome::Dropped => {
                self.metrics.requests_dropped.inc();
                warn!(index = index.0, "unable to post buffer request to any peer");
                // Hand the index back: sustained peer failure must stall
                // replenishment, not leak slots.
                if let Err(e) = self.pool.release(index) {
                    error!(%e, "release failed after dropped buffer request");
                }
            }
        }
    }

    pub fn pool(&self) -> &Arc<BufferPool> {
        &self.pool
    }

    pub fn event_count(&self) -> u64 {
        self.event_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use skarv_codec::{build_fragment, Damage, Level, Src, DGRAM_HEADER_SIZE, HEADER_SIZE};
    use skarv_core::assembly::Fragment;
    use skarv_core::registry::FragmentRef;
    use skarv_transport::{ImmKind, ImmValue, MemoryFabric, Transport};

    use crate::groups::EventConsumer;
    use crate::strategy::BuilderStrategy;

    const OWN_ID: u32 = 9;

    struct Recorder {
        seen: Arc<Mutex<Vec<(u64, Vec<Vec<u8>>)>>>,
    }

    impl EventConsumer for Recorder {
        fn consume(&mut self, event: &DatagramView<'_>) {
            let payloads = event
                .root()
                .children()
                .map(|child| child.map(|node| node.payload().to_vec()))
                .collect::<Result<Vec<_>, _>>()
                .unwrap();
            self.seen.lock().push((event.header().event_id, payloads));
        }
    }

    fn register_fragment(
        registry: &FragmentRegistry,
        event_id: u64,
        contributor: u32,
        payload: &[u8],
    ) -> Fragment {
        let bytes =
            build_fragment(event_id, event_id * 10, Src::new(Level::Source, contributor), payload)
                .unwrap();
        let arena = registry.register(bytes);
        Fragment {
            event_id,
            timestamp: event_id * 10,
            contributor,
            damage: Damage::none(),
            extent: (HEADER_SIZE + payload.len()) as u32,
            location: FragmentRef {
                arena,
                offset: DGRAM_HEADER_SIZE as u32,
            },
        }
    }

    fn completed_event(registry: &FragmentRegistry, event_id: u64) -> CompletedEvent {
        let directory = vec![
            register_fragment(registry, event_id, 2, b"beta"),
            register_fragment(registry, event_id, 1, b"alpha"),
        ];
        CompletedEvent {
            event_id,
            timestamp: event_id * 10,
            damage: Damage::none(),
            directory,
        }
    }

    fn engine_with_links(
        pool_capacity: usize,
        links: Vec<Box<dyn skarv_transport::Link>>,
        seen: Arc<Mutex<Vec<(u64, Vec<Vec<u8>>)>>>,
    ) -> (DistributionEngine<BuilderStrategy>, Arc<FragmentRegistry>) {
        let pool = Arc::new(BufferPool::new(pool_capacity, 1024).unwrap());
        let registry = Arc::new(FragmentRegistry::new());
        let mut groups = ConsumerGroups::new(1);
        groups.attach(0, Box::new(Recorder { seen })).unwrap();
        let strategy = BuilderStrategy::new(registry.clone(), links, OWN_ID);
        let engine = DistributionEngine::new(
            pool,
            groups,
            strategy,
            registry.clone(),
            MetricsRecorder::new(),
        );
        (engine, registry)
    }

    #[test]
    fn delivers_built_event_and_posts_replenishment() {
        let fabric = MemoryFabric::new();
        let rx = fabric.bind("teb0", 32768, 0, 8);
        let link = fabric.connect("teb0", 32768, 100).unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (mut engine, registry) = engine_with_links(8, vec![Box::new(link)], seen.clone());

        let event = completed_event(&registry, 42);
        let outcome = engine.process(event).unwrap();
        assert!(matches!(outcome, ProcessOutcome::Delivered));

        // Sub-nodes appear in arrival order.
        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, 42);
        assert_eq!(seen[0].1, vec![b"beta".to_vec(), b"alpha".to_vec()]);

        // Contributor-side memory is retired after materialization.
        assert!(registry.is_empty());

        // One index rides the posted buffer request; the delivery slot
        // itself came back to the free list.
        assert_eq!(engine.pool().free_count(), 7);
        assert_eq!(engine.pool().outstanding(), 1);
        let message = rx.try_recv().unwrap();
        assert!(message.payload.is_empty());
        let imm = ImmValue::from_raw(message.imm);
        assert_eq!(imm.kind(), Some(ImmKind::Buffer));
        assert_eq!(imm.source(), OWN_ID);
        assert_eq!(engine.event_count(), 1);
    }

    #[test]
    fn exhausted_pool_defers_the_event() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (mut engine, registry) = engine_with_links(1, Vec::new(), seen.clone());
        let held = engine.pool().acquire().unwrap();

        let event = completed_event(&registry, 7);
        match engine.process(event).unwrap() {
            ProcessOutcome::Deferred(back) => assert_eq!(back.event_id, 7),
            other => panic!("expected deferral, got {other:?}"),
        }
        // Nothing was delivered or retired.
        assert!(seen.lock().is_empty());
        assert_eq!(registry.len(), 2);
        engine.pool().release(held).unwrap();
    }

    #[test]
    fn oversized_event_is_fatal() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (mut engine, registry) = engine_with_links(4, Vec::new(), seen);
        let mut event = completed_event(&registry, 3);
        event.directory[0].extent = 4096;

        let err = engine.process(event).unwrap_err();
        assert!(matches!(err, EngineError::EventTooLarge { .. }));
        assert!(err.is_fatal());
        // No slot was consumed by the rejected event.
        assert_eq!(engine.pool().free_count(), 4);
    }

    struct FailingStrategy;

    impl DeliveryStrategy for FailingStrategy {
        fn on_build_event(
            &mut self,
            _event: &CompletedEvent,
            _slot: &mut [u8],
        ) -> Result<usize, EngineError> {
            Err(EngineError::Processing("refused".into()))
        }

        fn on_release_buffer(&mut self, _index: skarv_core::pool::SlotIndex) {}

        fn on_request_buffer(&mut self, _index: skarv_core::pool::SlotIndex) -> RequestOutcome {
            RequestOutcome::Dropped
        }
    }

    #[test]
    fn failed_build_retires_fragments_and_returns_the_slot() {
        let pool = Arc::new(BufferPool::new(2, 1024).unwrap());
        let registry = Arc::new(FragmentRegistry::new());
        let mut engine = DistributionEngine::new(
            pool,
            ConsumerGroups::new(1),
            FailingStrategy,
            registry.clone(),
            MetricsRecorder::new(),
        );

        let event = completed_event(&registry, 5);
        assert_eq!(registry.len(), 2);
        assert!(engine.process(event).is_err());
        // The dropped event must not pin fragment memory or a slot.
        assert!(registry.is_empty());
        assert_eq!(engine.pool().free_count(), 2);
        assert_eq!(engine.pool().outstanding(), 0);
    }

    #[test]
    fn dropped_request_returns_the_index_to_the_free_list() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (mut engine, registry) = engine_with_links(4, Vec::new(), seen);

        let event = completed_event(&registry, 11);
        assert!(matches!(
            engine.process(event).unwrap(),
            ProcessOutcome::Delivered
        ));
        // With no reachable peer the request is dropped and the index
        // handed back; every slot is accounted for.
        assert_eq!(engine.pool().free_count(), 4);
        assert_eq!(engine.pool().outstanding(), 0);
    }
}
