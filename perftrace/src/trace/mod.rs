//! Kernel event tracing.
//!
//! Instrumented kernel paths call [`Tracer::hook`]. Events that pass the
//! event mask become a [`TraceEventFrame`] which goes to the
//! [`OfflineRecorder`] ring or is streamed to the client through the
//! [`Transport`], depending on the [`TraceMode`].
//!
//! ```text
//!  UNINIT --init--> INITED (online) --start--> STARTED <--start-- STOPPED
//!     \                                         |   ^                ^
//!      `---init--> STARTED (offline)             |   `--------------. |
//!                                                `-------stop--------'
//! ```

use crate::error::TraceError;
use crate::lock::IrqLock;
use crate::platform::Platform;
use log::{debug, error, info};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

mod agent;
pub mod cnv;
mod config;
mod device;
pub mod events;
mod frame;
mod offline;
mod online;
mod pipeline;
mod shell;
mod sink;
pub mod tlv;
mod transport;

pub use self::agent::{TraceClientCmd, TraceCmd, TRACE_CMD_END_CHAR};
pub use self::config::{
    HwiIgnore, TraceConfig, TraceMode, DEFAULT_OBJ_MAX_NUM, DEFAULT_RECORD_COUNT,
    DEFAULT_TASK_LIMIT, DEFAULT_TLV_BUF_SIZE,
};
pub use self::device::{TraceDevice, TraceIoctl, UsrEventInfo, TRACE_DEVICE_MODE, TRACE_DEVICE_PATH};
pub use self::frame::{
    name_from_bytes, offsets, CoreInfo, FrameLayout, ObjData, OfflineHead, TraceEventFrame,
    FRAME_BACKTRACE_LIMIT, FRAME_PARAMS_LIMIT, OBJ_NAME_SIZE, TRACE_BIGLITTLE_WORD,
    TRACE_CTL_MAGIC,
};
pub use self::offline::OfflineRecorder;
pub use self::online::OnlineSink;
pub use self::pipeline::{LoopbackPipeline, NullPipeline, SerialPipeline, TracePipeline};
pub use self::shell::{trace_dump, trace_mask};
pub use self::sink::TraceSink;
pub use self::transport::Transport;

use self::events::{
    mode_flag, EVENT_MASK, HWI_FLAG, MEM_INFO, MEM_INFO_REQ, TASK_CREATE, TASK_FLAG,
    TASK_PRIOSET,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TraceState {
    Uninit,
    Inited,
    Started,
    Stopped,
}

/// Extra HWI filter. Returning `true` drops the event.
pub type HwiFilterHook = Arc<dyn Fn(u32) -> bool + Send + Sync>;

struct TraceCtrl {
    state: TraceState,
    event_count: u32,
    hwi_filter: Option<HwiFilterHook>,
}

pub struct Tracer {
    platform: Arc<dyn Platform>,
    config: TraceConfig,
    transport: Arc<Transport>,
    sink: spin::Once<Box<dyn TraceSink>>,
    /// The trace lock. Also serializes the event counter.
    ctrl: IrqLock<TraceCtrl>,
    enabled: AtomicBool,
    mask: AtomicU32,
    agent: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl Tracer {
    pub fn new(
        platform: Arc<dyn Platform>,
        config: TraceConfig,
        pipeline: Box<dyn TracePipeline>,
    ) -> Result<Tracer, TraceError> {
        let transport = Arc::new(Transport::new(
            platform.clone(),
            config.lock_mode,
            pipeline,
            config.tlv_buf_size,
            config.layout,
        )?);

        Ok(Tracer {
            ctrl: IrqLock::new(
                platform.clone(),
                config.lock_mode,
                TraceCtrl {
                    state: TraceState::Uninit,
                    event_count: 0,
                    hwi_filter: None,
                },
            ),
            mask: AtomicU32::new(config.default_mask & EVENT_MASK),
            platform,
            config,
            transport,
            sink: spin::Once::new(),
            enabled: AtomicBool::new(false),
            agent: parking_lot::Mutex::new(None),
        })
    }

    /// Sets up the sink and, if configured, the control agent. Offline
    /// tracing starts right away; online tracing waits for the client.
    pub fn init(self: &Arc<Self>) -> Result<(), TraceError> {
        let state = self.state();
        if state != TraceState::Uninit {
            error!("trace has been initialized already, the current state is: {:?}", state);
            return Err(TraceError::AlreadyInitialized);
        }

        self.transport.init()?;

        let sink: Box<dyn TraceSink> = match self.config.mode {
            TraceMode::Offline => Box::new(OfflineRecorder::new(
                self.platform.clone(),
                &self.config,
                self.transport.clone(),
            )?),
            TraceMode::Online => Box::new(OnlineSink::new(
                self.platform.clone(),
                self.transport.clone(),
            )),
        };

        let mut ctrl = self.ctrl.lock();
        if ctrl.state != TraceState::Uninit || self.sink.get().is_some() {
            return Err(TraceError::AlreadyInitialized);
        }

        if self.config.control_agent {
            let handle = agent::spawn(Arc::downgrade(self), self.transport.clone())
                .map_err(|e| {
                    error!("trace init create agent task error: {}", e);
                    TraceError::AgentSpawn(e.to_string())
                })?;
            *self.agent.lock() = Some(handle);
        }

        self.sink.call_once(|| sink);
        ctrl.event_count = 0;
        match self.config.mode {
            TraceMode::Online => {
                self.enabled.store(false, Ordering::Release);
                ctrl.state = TraceState::Inited;
            }
            TraceMode::Offline => {
                self.enabled.store(true, Ordering::Release);
                ctrl.state = TraceState::Started;
            }
        }

        info!("trace initialized in {:?} mode", self.config.mode);
        Ok(())
    }

    pub fn config(&self) -> &TraceConfig {
        &self.config
    }

    pub fn state(&self) -> TraceState {
        self.ctrl.lock().state
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn sink(&self) -> Option<&dyn TraceSink> {
        self.sink.get().map(|sink| &**sink)
    }

    /// Starting a started tracer does nothing.
    pub fn start(&self) -> Result<(), TraceError> {
        let mut ctrl = self.ctrl.lock();
        match ctrl.state {
            TraceState::Started => return Ok(()),
            TraceState::Uninit => {
                error!("trace not inited, be sure Tracer::init executed successfully");
                return Err(TraceError::StatusInvalid(TraceState::Uninit));
            }
            TraceState::Inited | TraceState::Stopped => {}
        }

        if let Some(sink) = self.sink.get() {
            sink.notify_start();
        }
        self.enabled.store(true, Ordering::Release);
        ctrl.state = TraceState::Started;
        drop(ctrl);

        self.hook(MEM_INFO_REQ, self.platform.system_mem_pool() as u64, &[]);
        Ok(())
    }

    pub fn stop(&self) -> Result<(), TraceError> {
        let mut ctrl = self.ctrl.lock();
        if ctrl.state != TraceState::Started {
            debug!("Tracer::stop: not started, state {:?}", ctrl.state);
            return Ok(());
        }

        self.enabled.store(false, Ordering::Release);
        ctrl.state = TraceState::Stopped;
        if let Some(sink) = self.sink.get() {
            sink.notify_stop();
        }
        Ok(())
    }

    /// Drops the recorded frames. The object table is kept.
    pub fn reset(&self) -> Result<(), TraceError> {
        match self.initialized_sink() {
            Ok(sink) => {
                sink.reset();
                Ok(())
            }
            Err(e) => {
                error!("trace not inited, be sure Tracer::init executed successfully");
                Err(e)
            }
        }
    }

    /// Prints the recording to the console, or sends it to the client.
    pub fn dump(&self, to_client: bool) -> Result<(), TraceError> {
        let state = self.state();
        if state != TraceState::Stopped {
            error!(
                "trace dump must after trace stopped, the current state is: {:?}",
                state
            );
            return Err(TraceError::StatusInvalid(state));
        }
        self.initialized_sink()?.dump(to_client);
        Ok(())
    }

    /// Copy of the offline recording.
    pub fn record(&self) -> Result<Vec<u8>, TraceError> {
        self.initialized_sink()?.image().ok_or(TraceError::NotOffline)
    }

    /// Copies the start of the offline recording into `dest`.
    pub fn read_record(&self, dest: &mut [u8]) -> Result<usize, TraceError> {
        self.initialized_sink()?
            .read_image(dest)
            .ok_or(TraceError::NotOffline)
    }

    fn initialized_sink(&self) -> Result<&dyn TraceSink, TraceError> {
        self.sink()
            .ok_or(TraceError::StatusInvalid(TraceState::Uninit))
    }

    /// Only the class bits of `mask` are kept.
    pub fn set_event_mask(&self, mask: u32) {
        self.mask.store(mask & EVENT_MASK, Ordering::Release);
    }

    pub fn event_mask(&self) -> u32 {
        self.mask.load(Ordering::Acquire)
    }

    pub fn hwi_filter_hook_reg(&self, hook: Option<HwiFilterHook>) {
        self.ctrl.lock().hwi_filter = hook;
    }

    fn hwi_filtered(&self, irq: u32) -> bool {
        if self.config.hwi_ignore.contains(irq) {
            return true;
        }
        let hook = self.ctrl.lock().hwi_filter.clone();
        hook.map_or(false, |hook| hook(irq))
    }

    /// Records one kernel event. Safe to call from interrupt context.
    pub fn hook(&self, event_type: u32, identity: u64, params: &[u64]) {
        let sink: &dyn TraceSink = match self.sink.get() {
            Some(sink) => &**sink,
            None => return,
        };

        // Objects are recorded whatever the mask says.
        if event_type == TASK_CREATE || event_type == TASK_PRIOSET {
            if self.config.mode == TraceMode::Offline || self.is_enabled() {
                sink.obj_add(identity as u32);
            }
        }

        if !self.is_enabled() || event_type & self.event_mask() == 0 {
            return;
        }

        let mut id = identity;
        match mode_flag(event_type) {
            HWI_FLAG => {
                if self.hwi_filtered(identity as u32) {
                    return;
                }
            }
            TASK_FLAG => id = sink.mask_tid(identity as u32) as u64,
            _ if event_type == MEM_INFO_REQ => {
                let status = self
                    .platform
                    .mem_pool_info(identity as usize)
                    .unwrap_or_default();
                self.hook(
                    MEM_INFO,
                    identity,
                    &[status.used as u64, status.free as u64],
                );
                return;
            }
            _ => {}
        }

        let frame = self.set_frame(sink, event_type, id, params);
        sink.write_event(&frame);
    }

    fn set_frame(
        &self,
        sink: &dyn TraceSink,
        event_type: u32,
        identity: u64,
        params: &[u64],
    ) -> TraceEventFrame {
        let layout = &self.config.layout;
        let param_count = params.len().min(layout.params());
        let mut frame = TraceEventFrame::default();

        {
            let mut ctrl = self.ctrl.lock();
            let platform = &*self.platform;

            frame.cur_task = sink.mask_tid(platform.current_task());
            frame.cur_pid = platform.current_pid();
            frame.identity = identity;
            frame.cur_time = platform.cycles();
            frame.event_type = event_type;

            if layout.core_msg {
                frame.core = CoreInfo {
                    cpu_id: platform.current_cpu() as u8,
                    hwi_active: platform.in_interrupt(),
                    task_lock_cnt: platform.sched_lock_count().min(0xF) as u8,
                    param_count: param_count as u8,
                };
            }

            let depth = layout.backtrace();
            if depth > 0 {
                let mut lr = [0usize; FRAME_BACKTRACE_LIMIT];
                let n = platform.record_lr(&mut lr[..depth]);
                for (dst, &src) in frame.link_reg.iter_mut().zip(&lr[..n]) {
                    *dst = src as u64;
                }
            }

            if layout.event_count {
                frame.event_count = ctrl.event_count;
                ctrl.event_count = ctrl.event_count.wrapping_add(1);
            }
        }

        frame.params[..param_count].copy_from_slice(&params[..param_count]);
        frame
    }
}

#[cfg(test)]
mod tests {
    use super::events::*;
    use super::*;
    use crate::platform::PerfRegs;
    use crate::testing_common::{FakePlatform, FAKE_SYSTEM_POOL};

    fn offline(records: usize) -> (Arc<FakePlatform>, Arc<Tracer>) {
        let platform = Arc::new(FakePlatform::new(2));
        let tracer = Arc::new(
            Tracer::new(
                platform.clone(),
                TraceConfig::offline_with_records(records),
                Box::new(NullPipeline),
            )
            .unwrap(),
        );
        (platform, tracer)
    }

    fn offline_frames(tracer: &Tracer) -> Vec<TraceEventFrame> {
        let image = tracer.record().unwrap();
        let head = OfflineHead::deserialize::<byteorder::NativeEndian>(&image);
        let layout = tracer.config().layout;
        image[head.frame_offset as usize..]
            .chunks_exact(head.frame_size as usize)
            .map(|bytes| TraceEventFrame::deserialize::<byteorder::NativeEndian>(&layout, bytes))
            .collect()
    }

    #[test]
    fn start_before_init_fails() {
        let (_, tracer) = offline(4);
        assert_eq!(
            tracer.start(),
            Err(TraceError::StatusInvalid(TraceState::Uninit))
        );
        assert_eq!(tracer.state(), TraceState::Uninit);
        assert!(tracer.reset().is_err());
        assert!(tracer.record().is_err());
    }

    #[test]
    fn offline_init_starts_and_double_init_fails() {
        let (_, tracer) = offline(4);
        tracer.init().unwrap();
        assert_eq!(tracer.state(), TraceState::Started);
        assert!(tracer.is_enabled());
        assert_eq!(tracer.init(), Err(TraceError::AlreadyInitialized));

        assert_eq!(tracer.start(), Ok(()));
        assert_eq!(tracer.state(), TraceState::Started);
    }

    #[test]
    fn init_with_a_small_buffer_stays_uninit() {
        let platform = Arc::new(FakePlatform::new(1));
        let config = TraceConfig {
            buffer_size: 16,
            ..TraceConfig::default()
        };
        let tracer = Arc::new(Tracer::new(platform, config, Box::new(NullPipeline)).unwrap());
        assert!(matches!(tracer.init(), Err(TraceError::BufTooSmall { .. })));
        assert_eq!(tracer.state(), TraceState::Uninit);
    }

    #[test]
    fn dump_outside_stopped_fails() {
        let (platform, tracer) = offline(2);
        assert!(tracer.dump(false).is_err());
        tracer.init().unwrap();
        tracer.hook(TASK_SWITCH, 3, &[]);

        assert_eq!(
            tracer.dump(false),
            Err(TraceError::StatusInvalid(TraceState::Started))
        );
        assert_eq!(platform.console(), "");
        assert_eq!(offline_frames(&tracer)[0].event_type, TASK_SWITCH);

        tracer.stop().unwrap();
        assert_eq!(tracer.stop(), Ok(()));
        assert_eq!(tracer.state(), TraceState::Stopped);
        tracer.dump(false).unwrap();
        assert!(platform.console().contains("*******TraceInfo end*******"));
    }

    #[test]
    fn stop_outside_started_does_nothing() {
        let platform = Arc::new(FakePlatform::new(1));
        let tracer = Arc::new(
            Tracer::new(platform, TraceConfig::online(), Box::new(NullPipeline)).unwrap(),
        );
        assert_eq!(tracer.stop(), Ok(()));
        assert_eq!(tracer.state(), TraceState::Uninit);

        tracer.init().unwrap();
        assert_eq!(tracer.stop(), Ok(()));
        assert_eq!(tracer.state(), TraceState::Inited);
        assert!(!tracer.is_enabled());
    }

    #[test]
    fn frame_fields() {
        let (platform, tracer) = offline(4);
        tracer.init().unwrap();
        platform.set_task(9);
        platform.set_pid(4);
        platform.set_cpu(1);
        platform.set_cycles(5000);
        platform.set_in_interrupt(true);
        platform.set_sched_lock_count(20);

        tracer.hook(HWI_RESPONSE_IN, 77, &[1, 2, 3, 4, 5]);
        tracer.hook(HWI_RESPONSE_OUT, 77, &[]);

        let frames = offline_frames(&tracer);
        let first = &frames[0];
        assert_eq!(first.event_type, HWI_RESPONSE_IN);
        assert_eq!(first.cur_task, 9);
        assert_eq!(first.cur_pid, 4);
        assert_eq!(first.identity, 77);
        assert_eq!(first.cur_time, 5000);
        assert_eq!(
            first.core,
            CoreInfo {
                cpu_id: 1,
                hwi_active: true,
                task_lock_cnt: 15,
                param_count: 3,
            }
        );
        assert_eq!(first.event_count, 0);
        assert_eq!(&first.params[..4], &[1, 2, 3, 0]);

        assert_eq!(frames[1].event_count, 1);
        assert_eq!(frames[1].core.param_count, 0);
        assert!(frames[1].cur_time > first.cur_time);
    }

    #[test]
    fn hwi_filtering() {
        let (_, tracer) = offline(8);
        tracer.init().unwrap();
        let ignore = tracer.config().hwi_ignore.clone();

        tracer.hook(HWI_RESPONSE_IN, ignore.uart as u64, &[]);
        tracer.hook(HWI_RESPONSE_IN, ignore.tick as u64, &[]);
        tracer.hook(HWI_RESPONSE_IN, 1, &[]);
        tracer.hwi_filter_hook_reg(Some(Arc::new(|irq| irq == 50)));
        tracer.hook(HWI_RESPONSE_IN, 50, &[]);
        tracer.hook(HWI_RESPONSE_IN, 51, &[]);

        let ids: Vec<u64> = offline_frames(&tracer)
            .iter()
            .filter(|f| !f.is_empty())
            .map(|f| f.identity)
            .collect();
        assert_eq!(ids, vec![51]);
    }

    #[test]
    fn masked_events_only_touch_the_object_table() {
        let (platform, tracer) = offline(4);
        platform.add_task(6, 3, "net");
        tracer.init().unwrap();
        tracer.set_event_mask(HWI_FLAG);
        assert_eq!(tracer.event_mask(), HWI_FLAG);

        tracer.hook(TASK_CREATE, 6, &[0, 3]);
        tracer.hook(TASK_SWITCH, 6, &[]);
        assert!(offline_frames(&tracer).iter().all(|f| f.is_empty()));

        let sink = tracer.sink().unwrap();
        assert_eq!(sink.mask_tid(6), 0x0001_0006);

        tracer.set_event_mask(0x45);
        assert_eq!(tracer.event_mask(), 0x40);
        tracer.hook(TASK_SWITCH, 6, &[]);
        assert_eq!(offline_frames(&tracer)[0].identity, 0x0001_0006);
    }

    #[test]
    fn start_requests_memory_info() {
        let (platform, tracer) = offline(4);
        platform.set_mem_pool(FAKE_SYSTEM_POOL, 1024, 4096);
        tracer.init().unwrap();
        tracer.set_event_mask(MEM_FLAG);
        tracer.stop().unwrap();
        tracer.reset().unwrap();

        tracer.start().unwrap();
        let frames = offline_frames(&tracer);
        assert_eq!(frames[0].event_type, MEM_INFO);
        assert_eq!(frames[0].identity, FAKE_SYSTEM_POOL as u64);
        assert_eq!(&frames[0].params[..2], &[1024, 4096]);
        assert!(frames[1].is_empty());
    }

    #[test]
    fn backtrace_is_recorded_when_configured() {
        let platform = Arc::new(FakePlatform::new(1));
        platform.set_regs(PerfRegs { pc: 0x10, fp: 0x20 });
        platform.set_backtrace(vec![0x8000_0010, 0x8000_0020, 0x8000_0030]);
        let mut config = TraceConfig::offline_with_records(2);
        config.layout.backtrace_depth = 2;
        config.buffer_size = config.head_size() + 2 * config.layout.frame_size();
        let tracer = Arc::new(Tracer::new(platform, config, Box::new(NullPipeline)).unwrap());
        tracer.init().unwrap();

        tracer.hook(TASK_SWITCH, 1, &[]);
        let frame = offline_frames(&tracer)[0];
        assert_eq!(&frame.link_reg[..3], &[0x8000_0010, 0x8000_0020, 0]);
    }

    #[test]
    fn online_mode_streams() {
        let platform = Arc::new(FakePlatform::new(1));
        platform.add_task(1, 31, "idle");
        let client = LoopbackPipeline::new();
        let tracer = Arc::new(
            Tracer::new(platform, TraceConfig::online(), Box::new(client.clone())).unwrap(),
        );
        tracer.init().unwrap();
        assert_eq!(tracer.state(), TraceState::Inited);
        assert!(!tracer.is_enabled());

        // Not streamed before the client starts the trace.
        tracer.hook(TASK_CREATE, 2, &[]);
        assert_eq!(client.sent_count(), 0);

        tracer.start().unwrap();
        tracer.hook(TASK_SWITCH, 1, &[]);
        tracer.stop().unwrap();

        let types: Vec<u8> = client.take_sent().iter().map(|m| m[1]).collect();
        // notify, head, obj table, event, notify
        assert_eq!(types, vec![0, 1, 2, 3, 0]);
        assert_eq!(tracer.record(), Err(TraceError::NotOffline));
        assert_eq!(tracer.dump(false), Ok(()));
    }
}
