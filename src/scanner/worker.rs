//! Worker threads and the per-device pipeline
//!
//! Each worker owns one transport and one store session for its whole life.
//! Per address it runs: identity request, location and contact, optional
//! transliteration, optional domain check, card match, attribute fetch,
//! commit. Failures are contained to the address being processed.

use super::queue::TaskReceiver;
use super::{RunSummary, Transliterator};
use crate::catalog::CardCatalog;
use crate::config::SettingsView;
use crate::device::Device;
use crate::dns::DomainChecker;
use crate::error::DiscoveryError;
use crate::fetch;
use crate::snmp::mib::well_known::{SNMPV2_MIB, SYS_CONTACT, SYS_DESCR, SYS_LOCATION};
use crate::snmp::{Locator, Outcome, SnmpSession, Transport};
use crate::store::StoreSession;
use chrono::Utc;
use std::net::IpAddr;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Read-only state shared by the workers of one group
pub struct WorkerContext {
    pub settings: Arc<SettingsView>,
    pub catalog: Arc<CardCatalog>,
    pub summary: Arc<RunSummary>,
    pub domain_checker: Option<Arc<DomainChecker>>,
    pub transliterator: Option<Arc<dyn Transliterator>>,
}

/// What happened to one address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceOutcome {
    /// No answer to the identity request; nothing written
    Silent,
    /// Record written; `new` when the address was not in the store before
    Stored { new: bool, recognized: bool },
}

/// A polling thread
pub struct Worker {
    id: usize,
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    pub fn spawn(
        id: usize,
        context: Arc<WorkerContext>,
        tasks: TaskReceiver,
        transport: Box<dyn Transport>,
        store: StoreSession,
    ) -> Result<Self, DiscoveryError> {
        let handle = thread::Builder::new()
            .name(format!("argus-worker-{}", id))
            .spawn(move || worker_loop(id, context, tasks, transport, store))
            .map_err(|e| DiscoveryError::Worker {
                id,
                reason: e.to_string(),
            })?;

        Ok(Self {
            id,
            handle: Some(handle),
        })
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// Wait for the thread to exit
    pub fn join(mut self) -> Result<(), DiscoveryError> {
        match self.handle.take() {
            Some(handle) => handle.join().map_err(|_| DiscoveryError::Worker {
                id: self.id,
                reason: "worker thread panicked".to_string(),
            }),
            None => Ok(()),
        }
    }
}

fn worker_loop(
    id: usize,
    context: Arc<WorkerContext>,
    tasks: TaskReceiver,
    mut transport: Box<dyn Transport>,
    mut store: StoreSession,
) {
    log::debug!("Worker {} started", id);

    while let Some((address, _guard)) = tasks.recv() {
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            process_device(&context, transport.as_mut(), &mut store, address)
        }));

        match result {
            Ok(Ok(DeviceOutcome::Silent)) => log::debug!("{}: no answer", address),
            Ok(Ok(DeviceOutcome::Stored { new, recognized })) => log::info!(
                "{}: stored{}{}",
                address,
                if new { " (new)" } else { "" },
                if recognized { "" } else { ", unrecognized" }
            ),
            Ok(Err(e)) => {
                log::error!("{}: {}", address, e);
                store.rollback();
            }
            Err(_) => {
                log::error!("{}: worker {} pipeline panicked", address, id);
                store.rollback();
            }
        }
        // `_guard` drops here and acknowledges the task
    }

    store.close();
    log::debug!("Worker {} stopped", id);
}

/// Poll one address and persist what was found
pub fn process_device(
    context: &WorkerContext,
    transport: &mut dyn Transport,
    store: &mut StoreSession,
    address: IpAddr,
) -> Result<DeviceOutcome, DiscoveryError> {
    let settings = &context.settings;
    let mut session = SnmpSession::new(transport, address, &settings.community)
        .with_max_calls(settings.snmp.max_calls);

    let sys_descr = match session.get(&system_object(SYS_DESCR)) {
        Outcome::Value(value) => value.as_text().unwrap_or_default(),
        Outcome::Empty | Outcome::Failed(_) => return Ok(DeviceOutcome::Silent),
    };
    context.summary.record_responding();

    let previous = store.get(&address)?;
    let new = previous.is_none();
    let mut device = Device::observed(address, Utc::now(), previous.as_ref());

    device.location = session.get(&system_object(SYS_LOCATION)).value().and_then(|v| v.as_text());
    device.contact = session.get(&system_object(SYS_CONTACT)).value().and_then(|v| v.as_text());

    if let (Some(schema), Some(transliterator), Some(location)) = (
        settings.transliteration_schema.as_deref(),
        context.transliterator.as_ref(),
        device.location.as_deref(),
    ) {
        device.location_latin = transliterator.transliterate(location, schema);
    }

    if let Some(checker) = &context.domain_checker {
        checker.apply(&mut device);
    }

    let binding = settings.binding_for(&address);
    let recognized = match context.catalog.identify(&sys_descr, binding) {
        Some(card) => {
            log::debug!("{}: matched card {}", address, card.name());
            device.vendor = card.vendor.clone();
            device.series = card.series.clone();
            device.rancid_type = card.rancid_type.clone();
            fetch::fetch(&mut session, &mut device, card, settings);
            true
        }
        None => {
            log::info!("{}: unrecognized ({})", address, sys_descr);
            if let Some(binding) = binding {
                device.vendor = Some(binding.vendor.clone());
                device.series = Some(binding.series.clone());
            }
            device.mark_unrecognized();
            false
        }
    };

    store.put(device);
    store.commit()?;
    if new {
        context.summary.record_new();
    }
    Ok(DeviceOutcome::Stored { new, recognized })
}

fn system_object(name: &str) -> Locator {
    Locator::symbolic(SNMPV2_MIB, name).with_index(&[0])
}
