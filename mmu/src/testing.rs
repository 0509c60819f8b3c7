//! Mock collaborators for the unit tests

use alloc::{
    collections::BTreeMap,
    format,
    string::String,
    sync::Arc,
    vec::Vec,
};
use core::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, AtomicUsize, Ordering};

use spin::Mutex;

use crate::{
    config::MmuConfig,
    fault::{FaultDisposition, FaultEvent},
    iommu::IommuMmu,
    platform::{
        Clock, DeviceId, DomainFaultHandler, FaultTelemetry, IommuPlatform, PlatformError,
        PlatformServices, PowerManager, StateAllocator,
    },
    sg::{FaultFlags, IommuProt, ScatterGatherList},
};

/// Domain handle handed out by [`MockIommu`].
#[derive(Debug)]
pub struct MockDomain {
    pub id: u32,
}

/// (domain id, iova) -> (bytes, prot)
pub type MappingTable = BTreeMap<(u32, u64), (usize, IommuProt)>;

#[derive(Default)]
struct IommuState {
    next_id: u32,
    live: Vec<u32>,
    allocs: usize,
    frees: usize,
    attached: Vec<(u32, DeviceId)>,
    mappings: MappingTable,
    handlers: BTreeMap<u32, Arc<dyn DomainFaultHandler>>,
    attach_error: Option<PlatformError>,
    detach_error: Option<PlatformError>,
    map_error: Option<PlatformError>,
    short_map: Option<usize>,
}

/// Recording platform IOMMU service
#[derive(Default)]
pub struct MockIommu {
    state: Mutex<IommuState>,
}

impl MockIommu {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocs(&self) -> usize {
        self.state.lock().allocs
    }

    pub fn frees(&self) -> usize {
        self.state.lock().frees
    }

    pub fn live_domains(&self) -> usize {
        self.state.lock().live.len()
    }

    pub fn is_attached(&self, domain: u32, device: DeviceId) -> bool {
        self.state.lock().attached.contains(&(domain, device))
    }

    pub fn has_fault_handler(&self, domain: u32) -> bool {
        self.state.lock().handlers.contains_key(&domain)
    }

    pub fn mapped_bytes(&self) -> usize {
        self.state.lock().mappings.values().map(|(len, _)| *len).sum()
    }

    pub fn snapshot(&self) -> MappingTable {
        self.state.lock().mappings.clone()
    }

    pub fn fail_attach(&self, err: PlatformError) {
        self.state.lock().attach_error = Some(err);
    }

    pub fn fail_detach(&self, err: PlatformError) {
        self.state.lock().detach_error = Some(err);
    }

    pub fn fail_map(&self, err: PlatformError) {
        self.state.lock().map_error = Some(err);
    }

    /// Make every subsequent map report `bytes` mapped.
    pub fn short_map(&self, bytes: Option<usize>) {
        self.state.lock().short_map = bytes;
    }

    /// Deliver a fault the way the hardware interrupt path would. `None` if
    /// no callback is registered for the domain.
    pub fn inject_fault(
        &self,
        domain: u32,
        device: DeviceId,
        iova: u64,
        flags: FaultFlags,
    ) -> Option<FaultDisposition> {
        // Release the state lock before calling out
        let handler = self.state.lock().handlers.get(&domain).cloned()?;
        Some(handler.on_fault(device, iova, flags))
    }
}

impl IommuPlatform for MockIommu {
    type Domain = MockDomain;

    fn domain_alloc(&self) -> Result<MockDomain, PlatformError> {
        let mut state = self.state.lock();
        state.next_id += 1;
        let id = state.next_id;
        state.live.push(id);
        state.allocs += 1;
        Ok(MockDomain { id })
    }

    fn domain_free(&self, domain: MockDomain) {
        let mut state = self.state.lock();
        state.live.retain(|&id| id != domain.id);
        state.handlers.remove(&domain.id);
        state.mappings.retain(|&(id, _), _| id != domain.id);
        state.frees += 1;
    }

    fn attach_device(&self, domain: &MockDomain, device: DeviceId) -> Result<(), PlatformError> {
        let mut state = self.state.lock();
        if let Some(err) = state.attach_error {
            return Err(err);
        }
        state.attached.push((domain.id, device));
        Ok(())
    }

    fn detach_device(&self, domain: &MockDomain, device: DeviceId) -> Result<(), PlatformError> {
        let mut state = self.state.lock();
        state.attached.retain(|&entry| entry != (domain.id, device));
        match state.detach_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn map_sg(
        &self,
        domain: &MockDomain,
        iova: u64,
        sgl: &ScatterGatherList,
        prot: IommuProt,
    ) -> Result<usize, PlatformError> {
        let mut state = self.state.lock();
        if let Some(err) = state.map_error {
            return Err(err);
        }
        let mapped = state.short_map.unwrap_or(sgl.total_length as usize);
        if mapped > 0 {
            state.mappings.insert((domain.id, iova), (mapped, prot));
        }
        Ok(mapped)
    }

    fn unmap(&self, domain: &MockDomain, iova: u64, length: usize) -> usize {
        let mut state = self.state.lock();
        let end = iova.saturating_add(length as u64);
        let mut unmapped = 0;
        state.mappings.retain(|&(id, start), (len, _)| {
            let inside = id == domain.id && start >= iova && start < end;
            if inside {
                unmapped += *len;
            }
            !inside
        });
        unmapped
    }

    fn set_fault_handler(&self, domain: &MockDomain, handler: Arc<dyn DomainFaultHandler>) {
        self.state.lock().handlers.insert(domain.id, handler);
    }
}

/// Reference-counting power manager
#[derive(Default)]
pub struct MockPower {
    refcount: AtomicI64,
    acquires: AtomicUsize,
    releases: AtomicUsize,
    fail_next: AtomicBool,
}

impl MockPower {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn refcount(&self) -> i64 {
        self.refcount.load(Ordering::SeqCst)
    }

    pub fn acquires(&self) -> usize {
        self.acquires.load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }

    pub fn fail_next_acquire(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }
}

impl PowerManager for MockPower {
    fn acquire(&self, _device: DeviceId) -> Result<(), PlatformError> {
        self.refcount.fetch_add(1, Ordering::SeqCst);
        self.acquires.fetch_add(1, Ordering::SeqCst);
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(PlatformError::new(-110));
        }
        Ok(())
    }

    fn release(&self, _device: DeviceId) {
        self.refcount.fetch_sub(1, Ordering::SeqCst);
        self.releases.fetch_add(1, Ordering::SeqCst);
    }
}

/// Clock advanced by hand
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new(start_ms: u64) -> Self {
        Self {
            now: AtomicU64::new(start_ms),
        }
    }

    pub fn advance(&self, ms: u64) {
        self.now.fetch_add(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// State allocator that can be switched into exhaustion
#[derive(Default)]
pub struct MockHeap {
    exhausted: AtomicBool,
    reserved: AtomicUsize,
}

impl MockHeap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_exhausted(&self, exhausted: bool) {
        self.exhausted.store(exhausted, Ordering::SeqCst);
    }

    pub fn reserved(&self) -> usize {
        self.reserved.load(Ordering::SeqCst)
    }
}

impl StateAllocator for MockHeap {
    fn try_reserve(&self, bytes: usize) -> bool {
        if self.exhausted.load(Ordering::SeqCst) {
            return false;
        }
        self.reserved.fetch_add(bytes, Ordering::SeqCst);
        true
    }

    fn release(&self, bytes: usize) {
        self.reserved.fetch_sub(bytes, Ordering::SeqCst);
    }
}

/// Telemetry sink that keeps every event
#[derive(Default)]
pub struct RecordingTelemetry {
    events: Mutex<Vec<FaultEvent>>,
}

impl RecordingTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<FaultEvent> {
        self.events.lock().clone()
    }
}

impl FaultTelemetry for RecordingTelemetry {
    fn report(&self, event: &FaultEvent) {
        self.events.lock().push(*event);
    }
}

/// One set of collaborators wired together.
pub struct TestRig {
    pub iommu: Arc<MockIommu>,
    pub power: Arc<MockPower>,
    pub clock: Arc<ManualClock>,
    pub heap: Arc<MockHeap>,
    pub telemetry: Arc<RecordingTelemetry>,
}

impl TestRig {
    pub fn new() -> Self {
        Self {
            iommu: Arc::new(MockIommu::new()),
            power: Arc::new(MockPower::new()),
            clock: Arc::new(ManualClock::new(0)),
            heap: Arc::new(MockHeap::new()),
            telemetry: Arc::new(RecordingTelemetry::new()),
        }
    }

    pub fn services(&self) -> PlatformServices<MockIommu> {
        PlatformServices::new(self.iommu.clone(), self.power.clone(), self.clock.clone())
            .with_heap(self.heap.clone())
            .with_telemetry(self.telemetry.clone())
    }

    pub fn adapter(&self, device: DeviceId) -> IommuMmu<MockIommu> {
        IommuMmu::create(device, self.services(), &MmuConfig::new()).unwrap()
    }
}

/// Logger that keeps every record for later assertions.
struct CapturingLogger {
    records: Mutex<Vec<(log::Level, String)>>,
}

impl log::Log for CapturingLogger {
    fn enabled(&self, _metadata: &log::Metadata) -> bool {
        true
    }

    fn log(&self, record: &log::Record) {
        self.records
            .lock()
            .push((record.level(), format!("{}", record.args())));
    }

    fn flush(&self) {}
}

static LOGGER: CapturingLogger = CapturingLogger {
    records: Mutex::new(Vec::new()),
};

/// Install the capturing logger. Safe to call from every test.
pub fn init_logger() {
    // Another test may have won the race; that logger is this one.
    let _ = log::set_logger(&LOGGER);
    log::set_max_level(log::LevelFilter::Trace);
}

/// Whether a record at `level` containing `needle` was logged.
pub fn logged(level: log::Level, needle: &str) -> bool {
    LOGGER
        .records
        .lock()
        .iter()
        .any(|(l, msg)| *l == level && msg.contains(needle))
}
