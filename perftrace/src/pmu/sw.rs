use super::{cpu_slot, Event, OverflowHandler, PerfEvent, Pmu, PmuType};
use crate::error::PerfError;
use crate::lock::{IrqLock, LockMode};
use crate::platform::Platform;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Kernel hook points a software event can count.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum KernelHook {
    MemAlloc = 1,
    MuxPend = 2,
    IsrEnter = 3,
    TaskSwitchedIn = 4,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum SwEvent {
    TaskSwitch = 1,
    IrqResponse = 2,
    MemAlloc = 3,
    MuxPend = 4,
}

impl SwEvent {
    pub const ALL: [SwEvent; 4] = [
        SwEvent::TaskSwitch,
        SwEvent::IrqResponse,
        SwEvent::MemAlloc,
        SwEvent::MuxPend,
    ];

    pub fn from_u32(value: u32) -> Option<SwEvent> {
        SwEvent::ALL.iter().copied().find(|e| *e as u32 == value)
    }

    pub fn name(self) -> &'static str {
        match self {
            SwEvent::TaskSwitch => "task switch",
            SwEvent::IrqResponse => "irq response",
            SwEvent::MemAlloc => "mem alloc",
            SwEvent::MuxPend => "mux pend",
        }
    }

    pub fn hook(self) -> KernelHook {
        match self {
            SwEvent::TaskSwitch => KernelHook::TaskSwitchedIn,
            SwEvent::IrqResponse => KernelHook::IsrEnter,
            SwEvent::MemAlloc => KernelHook::MemAlloc,
            SwEvent::MuxPend => KernelHook::MuxPend,
        }
    }
}

/// Counts kernel hook invocations. Every `period`-th hit on a CPU is
/// reported as an overflow.
pub struct SwPmu {
    platform: Arc<dyn Platform>,
    handler: Arc<dyn OverflowHandler>,
    events: IrqLock<PerfEvent>,
    enable: AtomicBool,
}

impl SwPmu {
    pub fn new(
        platform: Arc<dyn Platform>,
        mode: LockMode,
        handler: Arc<dyn OverflowHandler>,
    ) -> SwPmu {
        SwPmu {
            events: IrqLock::new(platform.clone(), mode, PerfEvent::default()),
            platform,
            handler,
            enable: AtomicBool::new(false),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enable.load(Ordering::Acquire)
    }

    /// Called from the instrumented kernel path.
    pub fn on_hook(&self, hook: KernelHook) {
        if !self.is_enabled() {
            return;
        }

        let cpu = self.platform.current_cpu();
        let mut events = self.events.lock();
        if let Some(event) = events.iter_mut().find(|e| e.counter == hook as u32) {
            event.update_count(cpu, 1);
            if event.count[cpu_slot(cpu)] % event.period as u64 == 0 {
                let regs = self.platform.caller_regs();
                self.handler.handle_overflow(event, &regs);
            }
        };
    }
}

impl Pmu for SwPmu {
    fn pmu_type(&self) -> PmuType {
        PmuType::Sw
    }

    fn events(&self) -> &IrqLock<PerfEvent> {
        &self.events
    }

    fn config(&self, _requested: PmuType) -> Result<(), PerfError> {
        let mut events = self.events.lock();
        for event in events.iter_mut() {
            let sw = SwEvent::from_u32(event.event_id).ok_or(PerfError::InvalidEvent(event.event_id))?;
            if event.period == 0 {
                return Err(PerfError::InvalidPeriod(0));
            }
            event.counter = sw.hook() as u32;
        }
        Ok(())
    }

    fn start(&self) -> Result<(), PerfError> {
        let cpu = self.platform.current_cpu();
        self.events.lock().clear_counts_on(cpu);
        self.enable.store(true, Ordering::Release);
        Ok(())
    }

    fn stop(&self) -> Result<(), PerfError> {
        self.enable.store(false, Ordering::Release);
        Ok(())
    }

    fn event_name(&self, event: &Event) -> &'static str {
        SwEvent::from_u32(event.event_id).map_or("unknown", SwEvent::name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pmu::EventConfig;
    use crate::testing_common::{FakePlatform, RecordingOverflowHandler};

    fn configured(events: &[(u32, u32)]) -> (Arc<RecordingOverflowHandler>, SwPmu, Result<(), PerfError>) {
        let platform = Arc::new(FakePlatform::new(1));
        let handler = Arc::new(RecordingOverflowHandler::default());
        let pmu = SwPmu::new(platform, LockMode::Smp, handler.clone());

        let cfg: Vec<_> = events
            .iter()
            .map(|&(event_id, period)| EventConfig { event_id, period })
            .collect();
        pmu.events().lock().assign(&cfg, false);
        let result = pmu.config(PmuType::Sw);
        (handler, pmu, result)
    }

    #[test]
    fn rejects_out_of_range_ids_and_zero_periods() {
        assert_eq!(configured(&[(0, 1)]).2, Err(PerfError::InvalidEvent(0)));
        assert_eq!(configured(&[(5, 1)]).2, Err(PerfError::InvalidEvent(5)));
        assert_eq!(configured(&[(1, 0)]).2, Err(PerfError::InvalidPeriod(0)));
    }

    #[test]
    fn every_period_th_hit_overflows() {
        let (handler, pmu, result) = configured(&[
            (SwEvent::TaskSwitch as u32, 3),
            (SwEvent::MemAlloc as u32, 1),
        ]);
        result.unwrap();

        // Disabled until started.
        pmu.on_hook(KernelHook::TaskSwitchedIn);
        assert_eq!(pmu.events().lock().per[0].count_on(0), 0);

        pmu.start().unwrap();
        for _ in 0..7 {
            pmu.on_hook(KernelHook::TaskSwitchedIn);
        }
        pmu.on_hook(KernelHook::IsrEnter);

        assert_eq!(pmu.events().lock().per[0].count_on(0), 7);
        assert_eq!(handler.overflows(), vec![1, 1]);

        pmu.on_hook(KernelHook::MemAlloc);
        assert_eq!(handler.overflows(), vec![1, 1, 3]);

        pmu.stop().unwrap();
        pmu.on_hook(KernelHook::MemAlloc);
        assert_eq!(pmu.events().lock().per[1].count_on(0), 1);
        assert_eq!(pmu.event_name(&pmu.events().lock().per[1]), "mem alloc");
    }
}
