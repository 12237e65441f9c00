use super::{Event, OverflowHandler, PerfEvent, Pmu, PmuType};
use crate::error::PerfError;
use crate::lock::{IrqLock, LockMode};
use crate::platform::Platform;
use log::{error, info};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Shortest sampling period the timed PMU accepts, in microseconds.
pub const TIMER_PERIOD_LOWER_BOUND_US: u32 = 100;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum TimedEvent {
    CpuClock = 0,
}

/// A periodic high resolution timer. Once started it calls
/// [`TimedPmu::on_timer`] every `period` until cancelled.
pub trait HrTimer: Send + Sync {
    fn start(&self, period: Duration) -> Result<(), PerfError>;
    fn cancel(&self);
}

impl<T: HrTimer + ?Sized> HrTimer for Arc<T> {
    fn start(&self, period: Duration) -> Result<(), PerfError> {
        (**self).start(period)
    }

    fn cancel(&self) {
        (**self).cancel()
    }
}

/// Samples every CPU from a single periodic timer owned by `timer_cpu`.
pub struct TimedPmu {
    platform: Arc<dyn Platform>,
    handler: Arc<dyn OverflowHandler>,
    timer: Box<dyn HrTimer>,
    timer_cpu: u32,
    events: IrqLock<PerfEvent>,
    period_us: AtomicU32,
    enable: AtomicBool,
}

impl TimedPmu {
    pub fn new(
        platform: Arc<dyn Platform>,
        mode: LockMode,
        handler: Arc<dyn OverflowHandler>,
        timer: Box<dyn HrTimer>,
        timer_cpu: u32,
    ) -> TimedPmu {
        TimedPmu {
            events: IrqLock::new(platform.clone(), mode, PerfEvent::default()),
            platform,
            handler,
            timer,
            timer_cpu,
            period_us: AtomicU32::new(TIMER_PERIOD_LOWER_BOUND_US),
            enable: AtomicBool::new(false),
        }
    }

    pub fn period(&self) -> Duration {
        Duration::from_micros(self.period_us.load(Ordering::Relaxed) as u64)
    }

    pub fn is_enabled(&self) -> bool {
        self.enable.load(Ordering::Acquire)
    }

    /// Timer expiry. Every CPU reports one tick for every configured event.
    pub fn on_timer(&self) {
        self.platform.smp_call(&mut || self.sample_local());
    }

    fn sample_local(&self) {
        let regs = self.platform.irq_regs();
        let cpu = self.platform.current_cpu();

        let mut events = self.events.lock();
        for event in events.iter_mut() {
            event.update_count(cpu, 1);
            self.handler.handle_overflow(event, &regs);
        }
    }
}

impl Pmu for TimedPmu {
    fn pmu_type(&self) -> PmuType {
        PmuType::Timed
    }

    fn events(&self) -> &IrqLock<PerfEvent> {
        &self.events
    }

    fn config(&self, _requested: PmuType) -> Result<(), PerfError> {
        let events = self.events.lock();
        let event = match events.iter().next() {
            Some(event) => event,
            None => return Err(PerfError::NotConfigured),
        };

        if event.event_id != TimedEvent::CpuClock as u32 {
            return Err(PerfError::InvalidEvent(event.event_id));
        }

        let mut period = event.period;
        if period < TIMER_PERIOD_LOWER_BOUND_US {
            period = TIMER_PERIOD_LOWER_BOUND_US;
            error!(
                "TimedPmu::config: period should be >= {} us, using {} us",
                TIMER_PERIOD_LOWER_BOUND_US, period
            );
        }

        info!(
            "TimedPmu::config: hrtimer period {}s {}us",
            period / 1_000_000,
            period % 1_000_000
        );
        self.period_us.store(period, Ordering::Relaxed);
        Ok(())
    }

    fn start(&self) -> Result<(), PerfError> {
        let cpu = self.platform.current_cpu();
        self.events.lock().clear_counts_on(cpu);

        if cpu != self.timer_cpu {
            return Ok(());
        }

        if let Err(e) = self.timer.start(self.period()) {
            error!("TimedPmu::start: hrtimer start failed");
            return Err(e);
        }
        self.enable.store(true, Ordering::Release);
        Ok(())
    }

    fn stop(&self) -> Result<(), PerfError> {
        if self.platform.current_cpu() != self.timer_cpu {
            return Ok(());
        }

        self.enable.store(false, Ordering::Release);
        self.timer.cancel();
        Ok(())
    }

    fn event_name(&self, event: &Event) -> &'static str {
        if event.event_id == TimedEvent::CpuClock as u32 {
            "timed"
        } else {
            "unknown"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pmu::EventConfig;
    use crate::testing_common::{FakePlatform, ManualTimer, RecordingOverflowHandler};

    fn timed(
        cpus: u32,
        timer_cpu: u32,
        period: u32,
    ) -> (Arc<FakePlatform>, Arc<ManualTimer>, Arc<RecordingOverflowHandler>, TimedPmu) {
        let platform = Arc::new(FakePlatform::new(cpus));
        let timer = Arc::new(ManualTimer::default());
        let handler = Arc::new(RecordingOverflowHandler::default());
        let pmu = TimedPmu::new(
            platform.clone(),
            LockMode::Smp,
            handler.clone(),
            Box::new(timer.clone()),
            timer_cpu,
        );
        pmu.events().lock().assign(
            &[EventConfig {
                event_id: TimedEvent::CpuClock as u32,
                period,
            }],
            false,
        );
        (platform, timer, handler, pmu)
    }

    #[test]
    fn short_periods_are_clamped() {
        let (_, _, _, pmu) = timed(1, 0, 10);
        pmu.config(PmuType::Timed).unwrap();
        assert_eq!(pmu.period(), Duration::from_micros(100));

        let (_, _, _, pmu) = timed(1, 0, 2_500_000);
        pmu.config(PmuType::Timed).unwrap();
        assert_eq!(pmu.period(), Duration::from_micros(2_500_000));
    }

    #[test]
    fn unknown_event_fails() {
        let (_, _, _, pmu) = timed(1, 0, 1000);
        pmu.events().lock().per[0].event_id = 3;
        assert_eq!(pmu.config(PmuType::Timed), Err(PerfError::InvalidEvent(3)));
    }

    #[test]
    fn only_the_owner_cpu_arms_the_timer() {
        let (platform, timer, _, pmu) = timed(2, 1, 1000);
        pmu.config(PmuType::Timed).unwrap();

        platform.set_cpu(0);
        pmu.start().unwrap();
        assert_eq!(timer.armed(), None);

        platform.set_cpu(1);
        pmu.start().unwrap();
        assert_eq!(timer.armed(), Some(Duration::from_micros(1000)));
        assert!(pmu.is_enabled());

        platform.set_cpu(0);
        pmu.stop().unwrap();
        assert!(pmu.is_enabled());

        platform.set_cpu(1);
        pmu.stop().unwrap();
        assert_eq!(timer.armed(), None);
        assert!(!pmu.is_enabled());
    }

    #[test]
    fn every_fire_samples_all_cpus() {
        let (_, _, handler, pmu) = timed(3, 0, 1000);
        pmu.config(PmuType::Timed).unwrap();
        pmu.start().unwrap();

        pmu.on_timer();
        pmu.on_timer();

        let events = pmu.events().lock();
        assert_eq!(events.per[0].count_on(0), 2);
        assert_eq!(events.per[0].count_on(1), 2);
        assert_eq!(events.per[0].count_on(2), 2);
        assert_eq!(handler.overflows().len(), 6);
        assert_eq!(pmu.event_name(&events.per[0]), "timed");
    }
}
