use super::{cpu_slot, Event, HwEvent, OverflowHandler, PerfEvent, Pmu, PmuType};
use crate::error::PerfError;
use crate::lock::{IrqLock, LockMode};
use crate::platform::Platform;
use log::{debug, error};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Register level operations of one architecture's counter block.
///
/// Counter indices are the driver's own numbering. `cycle_counter()` is the
/// dedicated cycle counter, general purpose counters run from `counter0()`
/// up to, but excluding, `max_counter()`.
pub trait HwCounterDriver: Send + Sync {
    /// Whether the cycle counter has a /64 prescaler.
    fn can_divide(&self) -> bool;

    /// Shift that undoes the prescaler when reading the cycle counter.
    fn divider_shift(&self) -> u32 {
        6
    }

    fn max_counter(&self) -> u32;

    fn cycle_counter(&self) -> u32;

    fn counter0(&self) -> u32;

    /// Whether `period` leaves a usable countdown window.
    fn valid_period(&self, period: u32) -> bool;

    /// Translates a logical [`HwEvent`] id into the counter encoding. Ids
    /// past the known table are passed through unchanged.
    fn map_event(&self, event_id: u32) -> Option<u32>;

    /// The logical event for a counter encoding.
    fn unmap_event(&self, code: u32) -> Option<u32>;

    fn enable(&self, event: &Event);

    fn disable(&self, event: &Event);

    /// Enables counting on this CPU and unmasks its overflow interrupt.
    fn start(&self, divided: bool);

    fn stop(&self);

    /// Disables every counter and resets the counter block.
    fn clear(&self, divided: bool);

    fn set_period(&self, event: &Event);

    /// Number of events counted since the event's period was loaded.
    fn read_count(&self, event: &Event) -> u64;

    /// Reads and clears the overflow flags. Zero means nothing overflowed.
    fn overflow_status(&self) -> u32;

    fn overflowed(&self, status: u32, counter: u32) -> bool;
}

/// Multiplexes an event set onto the counters of a [`HwCounterDriver`].
pub struct HwPmu<D> {
    driver: D,
    platform: Arc<dyn Platform>,
    handler: Arc<dyn OverflowHandler>,
    events: IrqLock<PerfEvent>,
    cnt_divided: AtomicBool,
}

impl<D: HwCounterDriver> HwPmu<D> {
    pub fn new(
        driver: D,
        platform: Arc<dyn Platform>,
        mode: LockMode,
        handler: Arc<dyn OverflowHandler>,
    ) -> HwPmu<D> {
        HwPmu {
            driver,
            events: IrqLock::new(platform.clone(), mode, PerfEvent::default()),
            platform,
            handler,
            cnt_divided: AtomicBool::new(false),
        }
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn cnt_divided(&self) -> bool {
        self.cnt_divided.load(Ordering::Relaxed)
    }

    /// The PMU overflow interrupt of the current CPU.
    pub fn handle_irq(&self) {
        let status = self.driver.overflow_status();
        if status == 0 {
            return;
        }

        let regs = self.platform.irq_regs();
        let cpu = self.platform.current_cpu();

        self.driver.stop();

        {
            let mut events = self.events.lock();
            for event in events.iter_mut() {
                // One interrupt serves every counter.
                if !self.driver.overflowed(status, event.counter) || event.period == 0 {
                    continue;
                }

                self.driver.set_period(event);
                let period = event.period as u64;
                event.update_count(cpu, period);
                self.handler.handle_overflow(event, &regs);
            }
        }

        self.driver.start(self.cnt_divided());
    }
}

impl<D: HwCounterDriver> Pmu for HwPmu<D> {
    fn pmu_type(&self) -> PmuType {
        PmuType::Hw
    }

    fn events(&self) -> &IrqLock<PerfEvent> {
        &self.events
    }

    fn config(&self, requested: PmuType) -> Result<(), PerfError> {
        let driver = &self.driver;
        let cycle_code = driver
            .map_event(HwEvent::CpuCycles as u32)
            .ok_or(PerfError::UnmappedEvent(HwEvent::CpuCycles as u32))?;

        let max_counter = driver.max_counter();
        let cycle_counter = driver.cycle_counter();
        let mut counter = driver.counter0();

        let mut events = self.events.lock();
        for (i, event) in events.iter_mut().enumerate() {
            if !driver.valid_period(event.period) {
                error!("HwPmu::config: period {:#x} invalid", event.period);
                return Err(PerfError::InvalidPeriod(event.period));
            }

            if requested == PmuType::Hw {
                event.event_id = driver
                    .map_event(event.event_id)
                    .ok_or(PerfError::UnmappedEvent(event.event_id))?;
            }

            if event.event_id == cycle_code {
                event.counter = cycle_counter;
            } else {
                event.counter = counter;
                counter += 1;
            }

            if counter > max_counter {
                error!(
                    "HwPmu::config: max events: {} excluding cycle event",
                    max_counter - 1
                );
                return Err(PerfError::CounterBudget(max_counter - 1));
            }

            debug!(
                "HwPmu::config: {} event_id = {:#x}, counter = {:#x}, period = {:#x}",
                i, event.event_id, event.counter, event.period
            );
        }

        let divided = events.cnt_divided && driver.can_divide();
        self.cnt_divided.store(divided, Ordering::Relaxed);
        Ok(())
    }

    fn start(&self) -> Result<(), PerfError> {
        let cpu = self.platform.current_cpu();
        let divided = self.cnt_divided();

        self.driver.clear(divided);

        let mut events = self.events.lock();
        for event in events.iter_mut() {
            self.driver.set_period(event);
            self.driver.enable(event);
            event.count[cpu_slot(cpu)] = 0;
        }
        drop(events);

        self.driver.start(divided);
        Ok(())
    }

    fn stop(&self) -> Result<(), PerfError> {
        let cpu = self.platform.current_cpu();
        let divided = self.cnt_divided();

        self.driver.stop();

        let mut events = self.events.lock();
        for event in events.iter_mut() {
            let value = self.driver.read_count(event);
            let slot = &mut event.count[cpu_slot(cpu)];
            *slot += value;

            let logical = self.driver.unmap_event(event.event_id);
            if logical == Some(HwEvent::CpuCycles as u32) && divided {
                *slot <<= self.driver.divider_shift();
            }

            debug!(
                "HwPmu::stop: [{}] {:#x} = {}",
                logical
                    .and_then(HwEvent::from_u32)
                    .map_or("unknown", HwEvent::name),
                event.event_id,
                *slot
            );
        }
        Ok(())
    }

    fn event_name(&self, event: &Event) -> &'static str {
        self.driver
            .unmap_event(event.event_id)
            .and_then(HwEvent::from_u32)
            .map_or("unknown", HwEvent::name)
    }
}
