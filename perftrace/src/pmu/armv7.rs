//! ARMv7 performance monitor extension.
//!
//! Counters count up and raise an interrupt when they wrap, so a period `p`
//! is loaded as the countdown value `0xFFFF_FFFF - p`.

use super::hw::HwCounterDriver;
use super::{Event, HwEvent, MAX_CPUS};
use crate::lock::{IrqLock, LockMode};
use crate::platform::Platform;
use log::{debug, error, info};
use smallvec::SmallVec;
use std::sync::Arc;

const PMNC_E: u32 = 1 << 0;
const PMNC_P: u32 = 1 << 1;
const PMNC_C: u32 = 1 << 2;
const PMNC_D: u32 = 1 << 3;
const PMNC_MASK: u32 = 0x3F;

const FLAG_MASK: u32 = 0xFFFF_FFFF;
const EVTYPE_MASK: u32 = 0xC800_00FF;

const IDX_CYCLE_COUNTER: u32 = 0;
const IDX_COUNTER0: u32 = 1;
const IDX_COUNTER_LAST: u32 = 4;
const IDX_MAX_COUNTER: u32 = IDX_COUNTER_LAST + 1;

const CCNT_PERIOD_LOWER_BOUND: u32 = 0x0000_0000;
const CCNT_PERIOD_UPPER_BOUND: u32 = 0xFFFF_FF00;

/// Counter encodings indexed by [`HwEvent`].
const EVENT_MAP: [u32; 8] = [
    0xFF, // cycles
    0x08, // instructions
    0x04, // dcache
    0x03, // dcache-misses
    0x14, // icache
    0x01, // icache-misses
    0x0C, // branches
    0x10, // branches-misses
];

#[inline]
pub fn period_calc(period: u32) -> u32 {
    0xFFFF_FFFF - period
}

/// Hardware counter number of a driver counter index. The cycle counter is
/// bit 31 of the enable, interrupt and overflow registers.
#[inline]
fn idx_to_cnt(index: u32) -> u32 {
    index.wrapping_sub(IDX_COUNTER0) & 0x1F
}

#[inline]
fn cnt_to_bit(counter: u32) -> u32 {
    1 << counter
}

#[inline]
fn counter_valid(index: u32) -> bool {
    index <= IDX_COUNTER_LAST
}

/// The CP15 c9 registers of the performance monitor.
pub trait Armv7Regs: Send + Sync {
    fn read_pmnc(&self) -> u32;
    fn write_pmnc(&self, value: u32);
    /// PMSELR, takes a hardware counter number.
    fn select_counter(&self, counter: u32);
    fn read_ccnt(&self) -> u32;
    fn write_ccnt(&self, value: u32);
    /// PMXEVCNTR of the selected counter.
    fn read_selected(&self) -> u32;
    fn write_selected(&self, value: u32);
    /// PMXEVTYPER of the selected counter.
    fn write_event_type(&self, value: u32);
    fn write_cnten_set(&self, bits: u32);
    fn write_cnten_clr(&self, bits: u32);
    fn write_inten_set(&self, bits: u32);
    fn write_inten_clr(&self, bits: u32);
    fn read_overflow(&self) -> u32;
    /// Writing a one clears that overflow flag.
    fn write_overflow(&self, bits: u32);
}

impl<R: Armv7Regs + ?Sized> Armv7Regs for Arc<R> {
    fn read_pmnc(&self) -> u32 {
        (**self).read_pmnc()
    }
    fn write_pmnc(&self, value: u32) {
        (**self).write_pmnc(value)
    }
    fn select_counter(&self, counter: u32) {
        (**self).select_counter(counter)
    }
    fn read_ccnt(&self) -> u32 {
        (**self).read_ccnt()
    }
    fn write_ccnt(&self, value: u32) {
        (**self).write_ccnt(value)
    }
    fn read_selected(&self) -> u32 {
        (**self).read_selected()
    }
    fn write_selected(&self, value: u32) {
        (**self).write_selected(value)
    }
    fn write_event_type(&self, value: u32) {
        (**self).write_event_type(value)
    }
    fn write_cnten_set(&self, bits: u32) {
        (**self).write_cnten_set(bits)
    }
    fn write_cnten_clr(&self, bits: u32) {
        (**self).write_cnten_clr(bits)
    }
    fn write_inten_set(&self, bits: u32) {
        (**self).write_inten_set(bits)
    }
    fn write_inten_clr(&self, bits: u32) {
        (**self).write_inten_clr(bits)
    }
    fn read_overflow(&self) -> u32 {
        (**self).read_overflow()
    }
    fn write_overflow(&self, bits: u32) {
        (**self).write_overflow(bits)
    }
}

pub struct Armv7Pmu<R> {
    regs: R,
    platform: Arc<dyn Platform>,
    /// Serializes read-modify-write sequences on the counter registers.
    lock: IrqLock<()>,
    /// PMU interrupt line of each CPU.
    irqs: SmallVec<[u32; MAX_CPUS]>,
}

impl<R: Armv7Regs> Armv7Pmu<R> {
    pub fn new(regs: R, platform: Arc<dyn Platform>, mode: LockMode, irqs: Vec<u32>) -> Armv7Pmu<R> {
        Armv7Pmu {
            regs,
            lock: IrqLock::new(platform.clone(), mode, ()),
            platform,
            irqs: SmallVec::from_vec(irqs),
        }
    }

    fn write_pmnc(&self, value: u32) {
        self.regs.write_pmnc(value & PMNC_MASK);
    }

    fn select(&self, index: u32) {
        self.regs.select_counter(idx_to_cnt(index));
    }

    fn set_counter(&self, index: u32, value: u32) {
        if !counter_valid(index) {
            error!("Armv7Pmu: writing wrong counter {}", index);
        } else if index == IDX_CYCLE_COUNTER {
            self.regs.write_ccnt(value);
        } else {
            self.select(index);
            self.regs.write_selected(value);
        }
    }

    fn bind_event(&self, index: u32, event_id: u32) {
        debug!("Armv7Pmu: bind event {:#x} to counter {}", event_id, index);
        self.select(index);
        self.regs.write_event_type(event_id & EVTYPE_MASK);
    }

    fn enable_counter(&self, index: u32) {
        self.regs.write_cnten_set(cnt_to_bit(idx_to_cnt(index)));
    }

    fn disable_counter(&self, index: u32) {
        self.regs.write_cnten_clr(cnt_to_bit(idx_to_cnt(index)));
    }

    fn enable_interrupt(&self, index: u32) {
        self.regs.write_inten_set(cnt_to_bit(idx_to_cnt(index)));
    }

    fn disable_interrupt(&self, index: u32) {
        let bit = cnt_to_bit(idx_to_cnt(index));
        self.regs.write_inten_clr(bit);
        // Drop a pending overflow along with the interrupt.
        self.regs.write_overflow(bit);
    }

    fn current_irq(&self) -> Option<u32> {
        self.irqs
            .get(self.platform.current_cpu() as usize)
            .copied()
    }
}

impl<R: Armv7Regs> HwCounterDriver for Armv7Pmu<R> {
    fn can_divide(&self) -> bool {
        true
    }

    fn max_counter(&self) -> u32 {
        IDX_MAX_COUNTER
    }

    fn cycle_counter(&self) -> u32 {
        IDX_CYCLE_COUNTER
    }

    fn counter0(&self) -> u32 {
        IDX_COUNTER0
    }

    fn valid_period(&self, period: u32) -> bool {
        let calc = period_calc(period);
        calc > period_calc(CCNT_PERIOD_UPPER_BOUND) && calc < period_calc(CCNT_PERIOD_LOWER_BOUND)
    }

    fn map_event(&self, event_id: u32) -> Option<u32> {
        Some(EVENT_MAP.get(event_id as usize).copied().unwrap_or(event_id))
    }

    fn unmap_event(&self, code: u32) -> Option<u32> {
        EVENT_MAP
            .iter()
            .position(|&c| c == code)
            .map(|i| HwEvent::ALL[i] as u32)
    }

    fn enable(&self, event: &Event) {
        let cnt = event.counter;
        if !counter_valid(cnt) {
            error!("Armv7Pmu::enable: wrong counter {}", cnt);
            return;
        }

        if event.period == 0 {
            info!("Armv7Pmu::enable: event period not valid, counter {}", cnt);
            return;
        }

        let _guard = self.lock.lock();
        self.disable_counter(cnt);
        // The cycle counter counts a fixed event.
        if cnt != IDX_CYCLE_COUNTER {
            self.bind_event(cnt, event.event_id);
        }
        self.enable_interrupt(cnt);
        self.enable_counter(cnt);

        debug!("Armv7Pmu::enable: event {:#x} counter {}", event.event_id, cnt);
    }

    fn disable(&self, event: &Event) {
        let cnt = event.counter;
        if !counter_valid(cnt) {
            error!("Armv7Pmu::disable: wrong counter {}", cnt);
            return;
        }

        let _guard = self.lock.lock();
        self.disable_counter(cnt);
        self.disable_interrupt(cnt);
    }

    fn start(&self, divided: bool) {
        debug!("Armv7Pmu: starting");
        {
            let _guard = self.lock.lock();
            let mut reg = self.regs.read_pmnc() | PMNC_E;
            if divided {
                reg |= PMNC_D;
            } else {
                reg &= !PMNC_D;
            }
            self.write_pmnc(reg);
        }

        if let Some(irq) = self.current_irq() {
            self.platform.irq_unmask(irq);
        }
    }

    fn stop(&self) {
        debug!("Armv7Pmu: stopping");
        {
            let _guard = self.lock.lock();
            let reg = self.regs.read_pmnc() & !PMNC_E;
            self.write_pmnc(reg);
        }

        if let Some(irq) = self.current_irq() {
            self.platform.irq_mask(irq);
        }
    }

    fn clear(&self, divided: bool) {
        let _guard = self.lock.lock();
        for index in IDX_CYCLE_COUNTER..IDX_MAX_COUNTER {
            self.disable_counter(index);
            self.disable_interrupt(index);
        }

        let divider = if divided { PMNC_D } else { 0 };
        self.write_pmnc(PMNC_P | PMNC_C | divider);
    }

    fn set_period(&self, event: &Event) {
        if event.period != 0 {
            info!(
                "Armv7Pmu: counter {}, period {:#x}",
                event.counter, event.period
            );
            self.set_counter(event.counter, period_calc(event.period));
        }
    }

    fn read_count(&self, event: &Event) -> u64 {
        let index = event.counter;
        let mut value = 0;

        if !counter_valid(index) {
            error!("Armv7Pmu: reading wrong counter {}", index);
        } else if index == IDX_CYCLE_COUNTER {
            value = self.regs.read_ccnt();
        } else {
            self.select(index);
            value = self.regs.read_selected();
        }

        let start = period_calc(event.period);
        if value < start {
            if self.overflowed(self.overflow_status(), index) {
                value = value.wrapping_add(event.period);
            }
        } else {
            value -= start;
        }
        value as u64
    }

    fn overflow_status(&self) -> u32 {
        let value = self.regs.read_overflow() & FLAG_MASK;
        self.regs.write_overflow(value);
        value
    }

    fn overflowed(&self, status: u32, counter: u32) -> bool {
        status & cnt_to_bit(idx_to_cnt(counter)) != 0
    }
}

#[cfg(target_arch = "arm")]
mod cp15 {
    use super::Armv7Regs;
    use std::arch::asm;

    /// Direct coprocessor access. Only usable at PL1.
    pub struct Cp15Regs;

    #[inline(always)]
    fn isb() {
        unsafe { asm!("isb", options(nomem, nostack, preserves_flags)) };
    }

    macro_rules! mrc {
        ($crm:literal, $op2:literal) => {{
            let value: u32;
            unsafe {
                asm!(
                    concat!("mrc p15, 0, {}, c9, ", $crm, ", ", $op2),
                    out(reg) value,
                    options(nomem, nostack, preserves_flags)
                )
            };
            value
        }};
    }

    macro_rules! mcr {
        ($crm:literal, $op2:literal, $value:expr) => {{
            let value: u32 = $value;
            unsafe {
                asm!(
                    concat!("mcr p15, 0, {}, c9, ", $crm, ", ", $op2),
                    in(reg) value,
                    options(nomem, nostack, preserves_flags)
                )
            };
        }};
    }

    impl Armv7Regs for Cp15Regs {
        fn read_pmnc(&self) -> u32 {
            mrc!("c12", "0")
        }
        fn write_pmnc(&self, value: u32) {
            mcr!("c12", "0", value);
            isb();
        }
        fn select_counter(&self, counter: u32) {
            mcr!("c12", "5", counter);
            isb();
        }
        fn read_ccnt(&self) -> u32 {
            mrc!("c13", "0")
        }
        fn write_ccnt(&self, value: u32) {
            mcr!("c13", "0", value);
        }
        fn read_selected(&self) -> u32 {
            mrc!("c13", "2")
        }
        fn write_selected(&self, value: u32) {
            mcr!("c13", "2", value);
        }
        fn write_event_type(&self, value: u32) {
            mcr!("c13", "1", value);
        }
        fn write_cnten_set(&self, bits: u32) {
            mcr!("c12", "1", bits);
        }
        fn write_cnten_clr(&self, bits: u32) {
            mcr!("c12", "2", bits);
        }
        fn write_inten_set(&self, bits: u32) {
            mcr!("c14", "1", bits);
            isb();
        }
        fn write_inten_clr(&self, bits: u32) {
            mcr!("c14", "2", bits);
            isb();
        }
        fn read_overflow(&self) -> u32 {
            mrc!("c12", "3")
        }
        fn write_overflow(&self, bits: u32) {
            mcr!("c12", "3", bits);
        }
    }
}

#[cfg(target_arch = "arm")]
pub use self::cp15::Cp15Regs;
