//! The perf front end: one active PMU, started and stopped on every CPU at
//! once, with optional sampling of the overflows into a [`PerfOutput`].

use crate::error::PerfError;
use crate::lock::{IrqLock, LockMode};
use crate::platform::{Platform, PerfRegs};
use crate::pmu::{
    cpu_slot, Event, EventConfig, OverflowHandler, Pmu, PmuRegistry, PmuType, MAX_CPUS,
    PERF_MAX_EVENT,
};
use byteorder::{ByteOrder, NativeEndian};
use log::{debug, error, info};
use smallvec::SmallVec;
use std::fmt::Write;
use std::sync::Arc;

mod output;

pub use self::output::{BufNotifyHook, PerfOutput};

pub const PERF_DATA_MAGIC_WORD: u32 = 0xEFEF_EF00;
pub const PERF_MAX_FILTER_TSKS: usize = 32;
pub const PERF_MAX_CALLCHAIN_DEPTH: usize = 10;
pub const PERF_DEFAULT_BUFFER_SIZE: usize = 20 * 1024;

/// Bits of [`PerfConfigAttr::sample_type`].
pub mod sample_type {
    pub const CPU: u32 = 1 << 0;
    pub const TID: u32 = 1 << 1;
    pub const TYPE: u32 = 1 << 2;
    pub const PERIOD: u32 = 1 << 3;
    pub const TIMESTAMP: u32 = 1 << 4;
    pub const IP: u32 = 1 << 5;
    pub const CALLCHAIN: u32 = 1 << 6;
    pub const PID: u32 = 1 << 7;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PerfStatus {
    Uninit,
    Started,
    Stopped,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PerfEventConfig {
    pub pmu_type: PmuType,
    pub events: Vec<EventConfig>,
    /// Count cycles through the /64 prescaler.
    pub predivided: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PerfConfigAttr {
    pub events_cfg: PerfEventConfig,
    /// Only sample these tasks. Empty samples every task.
    pub task_ids: Vec<u32>,
    pub process_ids: Vec<u32>,
    pub sample_type: u32,
    /// Without sampling only the final counts are reported.
    pub need_sample: bool,
}

/// Header written at the start of every sampled section.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PerfDataHdr {
    pub magic: u32,
    pub len: u32,
    pub sample_type: u32,
    pub section_id: u32,
    pub event_type: u32,
}

impl PerfDataHdr {
    pub const SIZE: usize = 20;

    pub fn serialize(&self, bytes: &mut [u8]) {
        NativeEndian::write_u32(&mut bytes[0..4], self.magic);
        NativeEndian::write_u32(&mut bytes[4..8], self.len);
        NativeEndian::write_u32(&mut bytes[8..12], self.sample_type);
        NativeEndian::write_u32(&mut bytes[12..16], self.section_id);
        NativeEndian::write_u32(&mut bytes[16..20], self.event_type);
    }

    pub fn deserialize(bytes: &[u8]) -> PerfDataHdr {
        PerfDataHdr {
            magic: NativeEndian::read_u32(&bytes[0..4]),
            len: NativeEndian::read_u32(&bytes[4..8]),
            sample_type: NativeEndian::read_u32(&bytes[8..12]),
            section_id: NativeEndian::read_u32(&bytes[12..16]),
            event_type: NativeEndian::read_u32(&bytes[16..20]),
        }
    }
}

#[derive(Default)]
struct SampleFilter {
    need_sample: bool,
    sample_type: u32,
    task_ids: SmallVec<[u32; PERF_MAX_FILTER_TSKS]>,
    process_ids: SmallVec<[u32; PERF_MAX_FILTER_TSKS]>,
}

fn filter_id(id: u32, ids: &[u32]) -> bool {
    ids.is_empty() || ids.contains(&id)
}

/// The overflow handler shared by every PMU the front end drives.
pub struct Sampler {
    platform: Arc<dyn Platform>,
    filter: IrqLock<SampleFilter>,
    output: PerfOutput,
}

impl Sampler {
    fn collect(&self, sample_type: u32, event: &Event, regs: &PerfRegs) -> SmallVec<[u8; 128]> {
        let platform = &*self.platform;
        let mut data = SmallVec::new();
        let mut word = [0u8; 8];

        let mut push_u32 = |data: &mut SmallVec<[u8; 128]>, value: u32| {
            NativeEndian::write_u32(&mut word[..4], value);
            data.extend_from_slice(&word[..4]);
        };

        if sample_type & sample_type::CPU != 0 {
            push_u32(&mut data, platform.current_cpu());
        }
        if sample_type & sample_type::TID != 0 {
            push_u32(&mut data, platform.current_task());
        }
        if sample_type & sample_type::PID != 0 {
            push_u32(&mut data, platform.current_pid());
        }
        if sample_type & sample_type::TYPE != 0 {
            push_u32(&mut data, event.event_id);
        }
        if sample_type & sample_type::PERIOD != 0 {
            push_u32(&mut data, event.period);
        }

        let mut word = [0u8; 8];
        if sample_type & sample_type::TIMESTAMP != 0 {
            NativeEndian::write_u64(&mut word, platform.cycles());
            data.extend_from_slice(&word);
        }
        if sample_type & sample_type::IP != 0 {
            NativeEndian::write_u64(&mut word, regs.pc as u64);
            data.extend_from_slice(&word);
        }
        if sample_type & sample_type::CALLCHAIN != 0 {
            let mut ips = [0usize; PERF_MAX_CALLCHAIN_DEPTH];
            let depth = platform.backtrace(regs.fp, &mut ips);
            debug!("Sampler: backtrace depth = {}, fp = {:#x}", depth, regs.fp);

            NativeEndian::write_u32(&mut word[..4], depth as u32);
            data.extend_from_slice(&word[..4]);
            for &ip in &ips[..depth] {
                NativeEndian::write_u64(&mut word, ip as u64);
                data.extend_from_slice(&word);
            }
        }
        data
    }
}

impl OverflowHandler for Sampler {
    fn handle_overflow(&self, event: &Event, regs: &PerfRegs) {
        let filter = self.filter.lock();
        if !filter.need_sample {
            return;
        }

        let task = self.platform.current_task();
        let pid = self.platform.current_pid();
        if !filter_id(task, &filter.task_ids) || !filter_id(pid, &filter.process_ids) {
            return;
        }

        let sample_type = filter.sample_type;
        drop(filter);

        let data = self.collect(sample_type, event, regs);
        self.output.write(&data);
    }
}

struct PerfCb {
    status: PerfStatus,
    pmu: Option<Arc<dyn Pmu>>,
    pmu_type: PmuType,
    need_sample: bool,
    /// Per CPU: whether the PMU is counting there.
    started_on: [bool; MAX_CPUS],
    start_time: u64,
    end_time: u64,
}

/// Owns the PMU registry and the active configuration.
pub struct Perf {
    platform: Arc<dyn Platform>,
    registry: PmuRegistry,
    sampler: Arc<Sampler>,
    cb: IrqLock<PerfCb>,
}

impl Perf {
    pub fn new(
        platform: Arc<dyn Platform>,
        mode: LockMode,
        buffer_size: usize,
    ) -> Result<Perf, PerfError> {
        let output =
            PerfOutput::new(platform.clone(), mode, buffer_size).ok_or(PerfError::BufError)?;

        let sampler = Arc::new(Sampler {
            platform: platform.clone(),
            filter: IrqLock::new(platform.clone(), mode, SampleFilter::default()),
            output,
        });

        Ok(Perf {
            registry: PmuRegistry::new(platform.clone(), mode),
            cb: IrqLock::new(
                platform.clone(),
                mode,
                PerfCb {
                    status: PerfStatus::Uninit,
                    pmu: None,
                    pmu_type: PmuType::Hw,
                    need_sample: false,
                    started_on: [false; MAX_CPUS],
                    start_time: 0,
                    end_time: 0,
                },
            ),
            platform,
            sampler,
        })
    }

    /// The handler every PMU driven by this front end must report to.
    pub fn overflow_handler(&self) -> Arc<dyn OverflowHandler> {
        self.sampler.clone()
    }

    pub fn registry(&self) -> &PmuRegistry {
        &self.registry
    }

    pub fn status(&self) -> PerfStatus {
        self.cb.lock().status
    }

    /// Registers the PMU backends. Allowed once.
    pub fn init(&self, pmus: Vec<Arc<dyn Pmu>>) -> Result<(), PerfError> {
        let mut cb = self.cb.lock();
        if cb.status != PerfStatus::Uninit {
            return Err(PerfError::StatusInvalid(cb.status));
        }

        for pmu in pmus {
            let ty = pmu.pmu_type();
            if let Err(e) = self.registry.register(pmu) {
                error!("Perf::init: {}", e);
                return Err(match ty {
                    PmuType::Timed => PerfError::TimedInit,
                    PmuType::Sw => PerfError::SwInit,
                    PmuType::Hw | PmuType::Raw => PerfError::HwInit,
                });
            }
        }

        cb.status = PerfStatus::Stopped;
        Ok(())
    }

    pub fn config(&self, attr: &PerfConfigAttr) -> Result<(), PerfError> {
        let mut cb = self.cb.lock();
        if cb.status != PerfStatus::Stopped {
            error!("Perf::config: status error {:?}", cb.status);
            return Err(PerfError::StatusInvalid(cb.status));
        }

        cb.pmu = None;
        cb.need_sample = attr.need_sample;
        {
            let mut filter = self.sampler.filter.lock();
            filter.need_sample = attr.need_sample;
            filter.sample_type = attr.sample_type;
            filter.task_ids = attr.task_ids.iter().copied().take(PERF_MAX_FILTER_TSKS).collect();
            filter.process_ids = attr
                .process_ids
                .iter()
                .copied()
                .take(PERF_MAX_FILTER_TSKS)
                .collect();
        }

        let result = self.config_events(&mut cb, &attr.events_cfg);
        self.dump_config(&cb, attr);
        result
    }

    fn config_events(&self, cb: &mut PerfCb, cfg: &PerfEventConfig) -> Result<(), PerfError> {
        let pmu = match self.registry.get(cfg.pmu_type) {
            Some(pmu) => pmu,
            None => {
                error!("Perf::config: type error {:?}", cfg.pmu_type);
                return Err(PerfError::InvalidPmu(cfg.pmu_type.as_u32()));
            }
        };

        let n = cfg.events.len().min(PERF_MAX_EVENT);
        pmu.events().lock().assign(&cfg.events[..n], cfg.predivided);

        if let Err(e) = pmu.config(cfg.pmu_type) {
            error!("Perf::config: failed: {}", e);
            pmu.events().lock().clear();
            return Err(PerfError::PmuConfig);
        }

        cb.pmu = Some(pmu);
        cb.pmu_type = cfg.pmu_type;
        Ok(())
    }

    fn dump_config(&self, cb: &PerfCb, attr: &PerfConfigAttr) {
        match cb.pmu {
            Some(ref pmu) => {
                debug!("type: {:?}", cb.pmu_type);
                let events = pmu.events().lock();
                for (i, event) in events.iter().enumerate() {
                    debug!("events[{}]: {}, {:#x}", i, event.event_id, event.period);
                }
                debug!("predivided: {}", events.cnt_divided);
            }
            None => debug!("pmu is None"),
        }
        debug!("sampleType: {:#x}", attr.sample_type);
        debug!("filter taskIds: {:?}", attr.task_ids);
        debug!("filter processIds: {:?}", attr.process_ids);
        debug!("needSample: {}", attr.need_sample);
    }

    fn param_valid(cb: &PerfCb) -> bool {
        match cb.pmu {
            Some(ref pmu) => pmu.events().lock().iter().any(|e| e.period != 0),
            None => false,
        }
    }

    pub fn start(&self, section_id: u32) -> Result<(), PerfError> {
        let mut cb = self.cb.lock();
        if cb.status != PerfStatus::Stopped {
            error!("Perf::start: status error {:?}", cb.status);
            return Err(PerfError::StatusInvalid(cb.status));
        }

        if !Self::param_valid(&cb) {
            error!("Perf::start: no event configured, call config first");
            return Err(PerfError::NotConfigured);
        }

        if cb.need_sample {
            let hdr = PerfDataHdr {
                magic: PERF_DATA_MAGIC_WORD,
                len: PerfDataHdr::SIZE as u32,
                sample_type: self.sampler.filter.lock().sample_type,
                section_id,
                event_type: cb.pmu_type.as_u32(),
            };
            let mut bytes = [0u8; PerfDataHdr::SIZE];
            hdr.serialize(&mut bytes);
            if !self.sampler.output.write(&bytes) {
                error!("Perf::start: section header does not fit");
                return Err(PerfError::BufError);
            }
        }

        let platform = &*self.platform;
        let cb = &mut *cb;
        if let Some(ref pmu) = cb.pmu {
            let started_on = &mut cb.started_on;
            platform.smp_call(&mut || {
                let cpu = platform.current_cpu();
                let slot = &mut started_on[cpu_slot(cpu)];
                if *slot {
                    error!("Perf::start: already started on core {}", cpu);
                    return;
                }
                match pmu.start() {
                    Ok(()) => *slot = true,
                    Err(e) => error!("Perf::start: start on core {} failed: {}", cpu, e),
                }
            });
        }

        cb.status = PerfStatus::Started;
        cb.start_time = platform.cycles();
        Ok(())
    }

    pub fn stop(&self) -> Result<(), PerfError> {
        let mut cb = self.cb.lock();
        if cb.status != PerfStatus::Started {
            error!("Perf::stop: status error {:?}", cb.status);
            return Err(PerfError::StatusInvalid(cb.status));
        }

        let platform = &*self.platform;
        let cb = &mut *cb;
        if let Some(ref pmu) = cb.pmu {
            let started_on = &mut cb.started_on;
            let need_sample = cb.need_sample;
            platform.smp_call(&mut || {
                let cpu = platform.current_cpu();
                let slot = &mut started_on[cpu_slot(cpu)];
                if !*slot {
                    error!("Perf::stop: not started on core {}", cpu);
                    return;
                }
                if let Err(e) = pmu.stop() {
                    error!("Perf::stop: stop on core {} failed: {}", cpu, e);
                    return;
                }
                if !need_sample {
                    print_counts(platform, &**pmu, cpu);
                }
                *slot = false;
            });
        }

        self.sampler.output.flush();
        if cb.need_sample {
            self.sampler.output.log_info();
        }

        cb.status = PerfStatus::Stopped;
        cb.end_time = platform.cycles();

        let seconds = cb.end_time.saturating_sub(cb.start_time) as f64
            / platform.clock_freq().max(1) as f64;
        platform.print(&format!("time used: {:.6}(s)\n", seconds));
        info!("Perf::stop: {} cycles", cb.end_time.saturating_sub(cb.start_time));
        Ok(())
    }

    /// Drains sampled data.
    pub fn data_read(&self, dest: &mut [u8]) -> usize {
        self.sampler.output.read(dest)
    }

    pub fn notify_hook_reg(&self, hook: Option<BufNotifyHook>) {
        self.sampler.output.set_notify_hook(hook);
    }

    pub fn flush_hook_reg(&self, hook: Option<BufNotifyHook>) {
        self.sampler.output.set_flush_hook(hook);
    }

    /// Counts of the active PMU on `cpu`, as `(name, event id, count)`.
    pub fn counts(&self, cpu: u32) -> Vec<(&'static str, u32, u64)> {
        let cb = self.cb.lock();
        match cb.pmu {
            Some(ref pmu) => pmu
                .events()
                .lock()
                .iter()
                .map(|e| (pmu.event_name(e), e.event_id, e.count_on(cpu)))
                .collect(),
            None => Vec::new(),
        }
    }
}

fn print_counts(platform: &dyn Platform, pmu: &dyn Pmu, cpu: u32) {
    let events = pmu.events().lock();
    let mut text = String::new();
    for event in events.iter() {
        // Events without a period were never bound.
        if event.period == 0 {
            continue;
        }
        let _ = writeln!(
            text,
            "[{}] eventType: {:#x} [core {}]: {}",
            pmu.event_name(event),
            event.event_id,
            cpu,
            event.count_on(cpu)
        );
    }
    drop(events);
    platform.print(&text);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pmu::{KernelHook, SwEvent, SwPmu};
    use crate::testing_common::FakePlatform;

    fn sw_perf(cpus: u32) -> (Arc<FakePlatform>, Perf, Arc<SwPmu>) {
        let platform = Arc::new(FakePlatform::new(cpus));
        let perf = Perf::new(platform.clone(), LockMode::Smp, 4096).unwrap();
        let sw = Arc::new(SwPmu::new(
            platform.clone(),
            LockMode::Smp,
            perf.overflow_handler(),
        ));
        perf.init(vec![sw.clone() as Arc<dyn Pmu>]).unwrap();
        (platform, perf, sw)
    }

    fn attr(need_sample: bool, sample_type: u32) -> PerfConfigAttr {
        PerfConfigAttr {
            events_cfg: PerfEventConfig {
                pmu_type: PmuType::Sw,
                events: vec![EventConfig {
                    event_id: SwEvent::TaskSwitch as u32,
                    period: 2,
                }],
                predivided: false,
            },
            task_ids: Vec::new(),
            process_ids: Vec::new(),
            sample_type,
            need_sample,
        }
    }

    #[test]
    fn lifecycle_is_enforced() {
        let (_, perf, _) = sw_perf(1);
        assert_eq!(perf.status(), PerfStatus::Stopped);
        assert_eq!(perf.stop(), Err(PerfError::StatusInvalid(PerfStatus::Stopped)));
        assert_eq!(perf.start(0), Err(PerfError::NotConfigured));
        assert_eq!(perf.init(Vec::new()), Err(PerfError::StatusInvalid(PerfStatus::Stopped)));

        perf.config(&attr(false, 0)).unwrap();
        perf.start(0).unwrap();
        assert_eq!(perf.config(&attr(false, 0)), Err(PerfError::StatusInvalid(PerfStatus::Started)));
        perf.stop().unwrap();
    }

    #[test]
    fn missing_pmu_and_bad_config() {
        let (_, perf, sw) = sw_perf(1);

        let mut hw = attr(false, 0);
        hw.events_cfg.pmu_type = PmuType::Hw;
        assert_eq!(perf.config(&hw), Err(PerfError::InvalidPmu(0)));

        let mut bad = attr(false, 0);
        bad.events_cfg.events[0].event_id = 9;
        assert_eq!(perf.config(&bad), Err(PerfError::PmuConfig));
        assert_eq!(sw.events().lock().nr, 0);
    }

    #[test]
    fn counting_prints_per_core_totals() {
        let (platform, perf, sw) = sw_perf(2);
        perf.config(&attr(false, 0)).unwrap();
        perf.start(0).unwrap();

        platform.set_cpu(1);
        for _ in 0..5 {
            sw.on_hook(KernelHook::TaskSwitchedIn);
        }
        platform.set_cpu(0);

        perf.stop().unwrap();
        let console = platform.console();
        assert!(console.contains("[task switch] eventType: 0x1 [core 0]: 0"));
        assert!(console.contains("[task switch] eventType: 0x1 [core 1]: 5"));
        assert!(console.contains("time used: "));
        assert_eq!(perf.counts(1), vec![("task switch", 1, 5)]);
    }

    #[test]
    fn sampling_writes_header_and_records() {
        let (platform, perf, sw) = sw_perf(1);
        platform.set_task(7);
        perf.config(&attr(
            true,
            sample_type::CPU | sample_type::TID | sample_type::PERIOD,
        ))
        .unwrap();
        perf.start(42).unwrap();

        for _ in 0..4 {
            sw.on_hook(KernelHook::TaskSwitchedIn);
        }
        perf.stop().unwrap();

        let mut data = [0u8; 256];
        let n = perf.data_read(&mut data);
        assert_eq!(n, PerfDataHdr::SIZE + 2 * 12);

        let hdr = PerfDataHdr::deserialize(&data);
        assert_eq!(hdr.magic, PERF_DATA_MAGIC_WORD);
        assert_eq!(hdr.section_id, 42);
        assert_eq!(hdr.event_type, PmuType::Sw.as_u32());

        let record = &data[PerfDataHdr::SIZE..PerfDataHdr::SIZE + 12];
        assert_eq!(NativeEndian::read_u32(&record[0..4]), 0);
        assert_eq!(NativeEndian::read_u32(&record[4..8]), 7);
        assert_eq!(NativeEndian::read_u32(&record[8..12]), 2);
    }

    #[test]
    fn task_filter_limits_sampling() {
        let (platform, perf, sw) = sw_perf(1);
        let mut cfg = attr(true, sample_type::TID);
        cfg.task_ids = vec![3];
        perf.config(&cfg).unwrap();
        perf.start(0).unwrap();

        platform.set_task(4);
        for _ in 0..4 {
            sw.on_hook(KernelHook::TaskSwitchedIn);
        }
        platform.set_task(3);
        for _ in 0..2 {
            sw.on_hook(KernelHook::TaskSwitchedIn);
        }
        perf.stop().unwrap();

        let mut data = [0u8; 256];
        assert_eq!(perf.data_read(&mut data), PerfDataHdr::SIZE + 4);
        assert_eq!(NativeEndian::read_u32(&data[PerfDataHdr::SIZE..]), 3);
    }
}
