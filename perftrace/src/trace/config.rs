use super::events::DEFAULT_MASK;
use super::frame::{FrameLayout, ObjData, OfflineHead};
use crate::lock::LockMode;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TraceMode {
    /// Frames go to a ring buffer that is dumped later.
    Offline,
    /// Frames are streamed to a client as they are captured.
    Online,
}

impl TraceMode {
    /// Stamped into the `version` field of every header.
    pub fn version(self) -> u32 {
        match self {
            TraceMode::Offline => 0,
            TraceMode::Online => 1,
        }
    }

    pub fn from_version(version: u32) -> Option<TraceMode> {
        match version {
            0 => Some(TraceMode::Offline),
            1 => Some(TraceMode::Online),
            _ => None,
        }
    }
}

/// Interrupts whose HWI events are never recorded.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HwiIgnore {
    pub uart: u32,
    pub tick: u32,
    /// The scheduling IPI, on SMP kernels.
    pub sched_ipi: Option<u32>,
}

impl Default for HwiIgnore {
    fn default() -> HwiIgnore {
        HwiIgnore {
            uart: 38,
            tick: 29,
            sched_ipi: Some(1),
        }
    }
}

impl HwiIgnore {
    pub fn contains(&self, irq: u32) -> bool {
        irq == self.uart || irq == self.tick || self.sched_ipi == Some(irq)
    }
}

pub const DEFAULT_OBJ_MAX_NUM: usize = 32;
pub const DEFAULT_TASK_LIMIT: usize = 128;
pub const DEFAULT_RECORD_COUNT: usize = 2048;
pub const DEFAULT_TLV_BUF_SIZE: usize = 100;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TraceConfig {
    pub mode: TraceMode,
    pub lock_mode: LockMode,
    /// Size of the offline recording: header, object table and frames.
    pub buffer_size: usize,
    /// Object table slots. Zero disables the table.
    pub obj_max_num: usize,
    /// Task ids below this get a reuse generation.
    pub task_limit: usize,
    pub layout: FrameLayout,
    /// Bytes available for one encoded TLV message.
    pub tlv_buf_size: usize,
    pub default_mask: u32,
    pub hwi_ignore: HwiIgnore,
    /// Run a thread that takes commands from the client.
    pub control_agent: bool,
}

impl Default for TraceConfig {
    fn default() -> TraceConfig {
        let layout = FrameLayout::default();
        TraceConfig {
            mode: TraceMode::Offline,
            lock_mode: LockMode::Smp,
            buffer_size: OfflineHead::SIZE
                + ObjData::SIZE * DEFAULT_OBJ_MAX_NUM
                + layout.frame_size() * DEFAULT_RECORD_COUNT,
            obj_max_num: DEFAULT_OBJ_MAX_NUM,
            task_limit: DEFAULT_TASK_LIMIT,
            layout,
            tlv_buf_size: DEFAULT_TLV_BUF_SIZE,
            default_mask: DEFAULT_MASK,
            hwi_ignore: HwiIgnore::default(),
            control_agent: false,
        }
    }
}

impl TraceConfig {
    pub fn online() -> TraceConfig {
        TraceConfig {
            mode: TraceMode::Online,
            ..TraceConfig::default()
        }
    }

    /// Offline configuration whose ring holds exactly `records` frames.
    pub fn offline_with_records(records: usize) -> TraceConfig {
        let mut config = TraceConfig::default();
        config.buffer_size = config.head_size() + config.layout.frame_size() * records;
        config
    }

    /// Header plus object table.
    pub fn head_size(&self) -> usize {
        OfflineHead::SIZE + ObjData::SIZE * self.obj_max_num
    }
}
