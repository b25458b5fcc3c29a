//! Scan coordinator: one fill/drain/shutdown cycle per target group
//!
//! ```text
//! Idle -> Filling -> Draining -> ShuttingDown -> Joined -> ... -> Closed
//! ```

use super::queue::TaskQueue;
use super::worker::{Worker, WorkerContext};
use super::{RunReport, RunState, RunSummary, Transliterator};
use crate::catalog::CardCatalog;
use crate::config::SettingsView;
use crate::dns::{DomainChecker, NameResolver};
use crate::snmp::{Transport, UdpTransport};
use crate::store::RecordStore;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Instant;

/// Builds the transport each worker owns
pub type TransportFactory = Arc<dyn Fn(&SettingsView) -> Box<dyn Transport> + Send + Sync>;

fn udp_factory() -> TransportFactory {
    Arc::new(|settings: &SettingsView| -> Box<dyn Transport> {
        Box::new(UdpTransport::new(settings.snmp.transport_options()))
    })
}

pub struct ScanCoordinator {
    store: Arc<RecordStore>,
    catalog: Arc<CardCatalog>,
    transport_factory: TransportFactory,
    resolver: Option<Arc<dyn NameResolver>>,
    transliterator: Option<Arc<dyn Transliterator>>,
    state: Mutex<RunState>,
}

impl ScanCoordinator {
    pub fn new(store: RecordStore, catalog: CardCatalog) -> Self {
        Self {
            store: Arc::new(store),
            catalog: Arc::new(catalog),
            transport_factory: udp_factory(),
            resolver: None,
            transliterator: None,
            state: Mutex::new(RunState::Idle),
        }
    }

    /// Replace the UDP transport (simulated agents, alternative ports)
    pub fn with_transport_factory<F>(mut self, factory: F) -> Self
    where
        F: Fn(&SettingsView) -> Box<dyn Transport> + Send + Sync + 'static,
    {
        self.transport_factory = Arc::new(factory);
        self
    }

    /// Enable the domain name check
    pub fn with_name_resolver(mut self, resolver: Arc<dyn NameResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn with_transliterator(mut self, transliterator: Arc<dyn Transliterator>) -> Self {
        self.transliterator = Some(transliterator);
        self
    }

    pub fn state(&self) -> RunState {
        *self.state.lock()
    }

    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    fn set_state(&self, state: RunState) {
        log::debug!("Coordinator state: {}", state);
        *self.state.lock() = state;
    }

    /// Poll every group in turn, then close the store
    pub fn run(&self, groups: Vec<SettingsView>) -> crate::Result<RunReport> {
        let mut total = RunReport::default();
        let result = groups.into_iter().try_for_each(|group| {
            let report = self.run_group(group)?;
            total.absorb(&report);
            Ok::<(), crate::DiscoveryError>(())
        });

        self.store.close();
        self.set_state(RunState::Closed);
        result?;

        log::info!("Run finished: {}", total);
        Ok(total)
    }

    /// One fill/drain/shutdown cycle over a group's targets
    pub fn run_group(&self, mut settings: SettingsView) -> crate::Result<RunReport> {
        let start = Instant::now();
        let targets = std::mem::take(&mut settings.targets);
        if settings.threads == 0 {
            log::warn!("Group '{}': zero threads configured, using one worker", settings.name);
        }
        let worker_count = settings.threads.max(1).min(targets.len());
        let summary = Arc::new(RunSummary::new());

        log::info!(
            "Group '{}': {} targets, {} workers",
            settings.name,
            targets.len(),
            worker_count
        );

        let domain_checker = self
            .resolver
            .as_ref()
            .map(|resolver| Arc::new(DomainChecker::new(Arc::clone(resolver), settings.supply_zone.clone())));
        let settings = Arc::new(settings);
        let context = Arc::new(WorkerContext {
            settings: Arc::clone(&settings),
            catalog: Arc::clone(&self.catalog),
            summary: Arc::clone(&summary),
            domain_checker,
            transliterator: self.transliterator.clone(),
        });

        let queue = TaskQueue::bounded(targets.len() + worker_count);
        let mut workers = Vec::with_capacity(worker_count);
        for id in 0..worker_count {
            let session = match self.store.session() {
                Ok(session) => session,
                Err(e) => {
                    shutdown(&queue, workers);
                    return Err(e.into());
                }
            };
            let transport = (self.transport_factory)(settings.as_ref());
            match Worker::spawn(id, Arc::clone(&context), queue.receiver(), transport, session) {
                Ok(worker) => workers.push(worker),
                Err(e) => {
                    shutdown(&queue, workers);
                    return Err(e);
                }
            }
        }

        self.set_state(RunState::Filling);
        for address in &targets {
            queue.put(*address);
        }

        self.set_state(RunState::Draining);
        queue.join();

        self.set_state(RunState::ShuttingDown);
        shutdown(&queue, workers);
        self.set_state(RunState::Joined);

        let report = RunReport::from_summary(&summary, targets.len(), worker_count, start.elapsed());
        log::info!("Group '{}' finished: {}", settings.name, report);
        Ok(report)
    }
}

/// One sentinel per worker, then join them all
fn shutdown(queue: &TaskQueue, workers: Vec<Worker>) {
    for _ in &workers {
        queue.put_sentinel();
    }
    for worker in workers {
        let id = worker.id();
        if let Err(e) = worker.join() {
            log::warn!("Worker {} failed to join cleanly: {}", id, e);
        }
    }
}
