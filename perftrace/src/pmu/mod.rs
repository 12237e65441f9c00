//! Performance monitoring units.
//!
//! A [`Pmu`] owns one [`PerfEvent`] set and knows how to program it onto its
//! event source. There are three sources:
//!
//! - [`HwPmu`]: hardware counters, driven by a per-architecture
//!   [`HwCounterDriver`] such as [`Armv7Pmu`].
//! - [`SwPmu`]: counts kernel hook invocations.
//! - [`TimedPmu`]: samples every CPU from a periodic high resolution timer.
//!
//! Whatever the source, overflows end up in the [`OverflowHandler`] that was
//! handed to the PMU when it was built.

use crate::error::PerfError;
use crate::lock::IrqLock;
use crate::platform::PerfRegs;
use log::error;

mod armv7;
mod hw;
mod registry;
mod sw;
mod timed;

pub use self::armv7::{Armv7Pmu, Armv7Regs};
pub use self::hw::{HwCounterDriver, HwPmu};
pub use self::registry::PmuRegistry;
pub use self::sw::{KernelHook, SwEvent, SwPmu};
pub use self::timed::{HrTimer, TimedEvent, TimedPmu, TIMER_PERIOD_LOWER_BOUND_US};

#[cfg(target_arch = "arm")]
pub use self::armv7::Cp15Regs;

/// Maximum number of events one PMU can carry.
pub const PERF_MAX_EVENT: usize = 7;

/// Upper bound on CPU ids; per-CPU counts are kept in fixed arrays.
pub const MAX_CPUS: usize = 8;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum PmuType {
    Hw = 0,
    Timed = 1,
    Sw = 2,
    /// Hardware events given as raw counter encodings.
    Raw = 3,
}

impl PmuType {
    pub const COUNT: usize = 4;

    pub fn from_u32(value: u32) -> Option<PmuType> {
        match value {
            0 => Some(PmuType::Hw),
            1 => Some(PmuType::Timed),
            2 => Some(PmuType::Sw),
            3 => Some(PmuType::Raw),
            _ => None,
        }
    }

    pub fn as_u32(self) -> u32 {
        self as u32
    }

    pub fn from_name(name: &str) -> Option<PmuType> {
        match name {
            "hw" => Some(PmuType::Hw),
            "timed" => Some(PmuType::Timed),
            "sw" => Some(PmuType::Sw),
            "raw" => Some(PmuType::Raw),
            _ => None,
        }
    }
}

/// Logical hardware events. The per-architecture driver translates these
/// into its own counter encodings.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum HwEvent {
    CpuCycles = 0,
    Instructions = 1,
    DcacheReferences = 2,
    DcacheMisses = 3,
    IcacheReferences = 4,
    IcacheMisses = 5,
    BranchInstructions = 6,
    BranchMisses = 7,
}

impl HwEvent {
    pub const ALL: [HwEvent; 8] = [
        HwEvent::CpuCycles,
        HwEvent::Instructions,
        HwEvent::DcacheReferences,
        HwEvent::DcacheMisses,
        HwEvent::IcacheReferences,
        HwEvent::IcacheMisses,
        HwEvent::BranchInstructions,
        HwEvent::BranchMisses,
    ];

    pub fn from_u32(value: u32) -> Option<HwEvent> {
        HwEvent::ALL.get(value as usize).copied()
    }

    pub fn name(self) -> &'static str {
        match self {
            HwEvent::CpuCycles => "cycles",
            HwEvent::Instructions => "instructions",
            HwEvent::DcacheReferences => "dcache",
            HwEvent::DcacheMisses => "dcache-misses",
            HwEvent::IcacheReferences => "icache",
            HwEvent::IcacheMisses => "icache-misses",
            HwEvent::BranchInstructions => "branches",
            HwEvent::BranchMisses => "branches-misses",
        }
    }

    pub fn by_name(name: &str) -> Option<HwEvent> {
        HwEvent::ALL.iter().copied().find(|event| event.name() == name)
    }
}

/// One configured event. `counter` is whatever slot the owning PMU bound
/// the event to: a hardware counter index, a kernel hook code, or unused.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Event {
    pub event_id: u32,
    pub counter: u32,
    /// Zero disables the event.
    pub period: u32,
    pub count: [u64; MAX_CPUS],
}

impl Event {
    pub fn new(event_id: u32, period: u32) -> Event {
        Event {
            event_id,
            period,
            ..Event::default()
        }
    }

    /// Folds `value` into the count of `cpu`. Only the low 32 bits of
    /// `value` are taken.
    #[inline]
    pub fn update_count(&mut self, cpu: u32, value: u64) {
        self.count[cpu_slot(cpu)] += value & 0xFFFF_FFFF;
    }

    #[inline]
    pub fn count_on(&self, cpu: u32) -> u64 {
        self.count[cpu_slot(cpu)]
    }

    pub fn total_count(&self) -> u64 {
        self.count.iter().sum()
    }
}

#[inline]
pub(crate) fn cpu_slot(cpu: u32) -> usize {
    let slot = cpu as usize;
    if slot >= MAX_CPUS {
        error!("cpu {} beyond the {} per-cpu slots, counted in the last slot", cpu, MAX_CPUS);
        return MAX_CPUS - 1;
    }
    slot
}

/// The event set of one PMU.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PerfEvent {
    pub nr: usize,
    pub per: [Event; PERF_MAX_EVENT],
    /// Request to count cycles with the hardware prescaler.
    pub cnt_divided: bool,
}

impl PerfEvent {
    pub fn iter(&self) -> impl Iterator<Item = &Event> {
        self.per[..self.nr].iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Event> {
        self.per[..self.nr].iter_mut()
    }

    pub fn clear(&mut self) {
        *self = PerfEvent::default();
    }

    /// Replaces the set with `requested`, keeping at most
    /// [`PERF_MAX_EVENT`] entries.
    pub fn assign(&mut self, requested: &[EventConfig], cnt_divided: bool) {
        self.clear();
        for (slot, cfg) in self.per.iter_mut().zip(requested) {
            *slot = Event::new(cfg.event_id, cfg.period);
            self.nr += 1;
        }
        self.cnt_divided = cnt_divided;
    }

    pub fn clear_counts_on(&mut self, cpu: u32) {
        for event in self.iter_mut() {
            event.count[cpu_slot(cpu)] = 0;
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EventConfig {
    pub event_id: u32,
    pub period: u32,
}

/// Receives every counter overflow, whatever PMU produced it.
pub trait OverflowHandler: Send + Sync {
    fn handle_overflow(&self, event: &Event, regs: &PerfRegs);
}

/// Handler that drops every overflow.
pub struct NullOverflowHandler;

impl OverflowHandler for NullOverflowHandler {
    fn handle_overflow(&self, _event: &Event, _regs: &PerfRegs) {}
}

pub trait Pmu: Send + Sync {
    /// The registry slot this PMU occupies.
    fn pmu_type(&self) -> PmuType;

    fn events(&self) -> &IrqLock<PerfEvent>;

    /// Validates the populated event set and binds every event to a counter.
    /// `requested` is the type the caller asked for; for the hardware PMU it
    /// decides whether event ids are logical ([`PmuType::Hw`]) or raw
    /// encodings ([`PmuType::Raw`]).
    fn config(&self, requested: PmuType) -> Result<(), PerfError>;

    /// Starts counting on the calling CPU.
    fn start(&self) -> Result<(), PerfError>;

    /// Stops counting on the calling CPU and folds the final counts in.
    fn stop(&self) -> Result<(), PerfError>;

    fn event_name(&self, event: &Event) -> &'static str;
}
