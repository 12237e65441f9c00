//! In-memory records of the tracer and their byte layout.
//!
//! Every record is stored in native byte order. Readers on another machine
//! detect the order from [`OfflineHead::marker`] and pass the matching
//! [`ByteOrder`] to the `deserialize` functions.

use byteorder::{ByteOrder, NativeEndian};

/// Written first in every header; reads back as `0x78563412` when the
/// producer had the other byte order.
pub const TRACE_BIGLITTLE_WORD: u32 = 0x1234_5678;

/// Parameter of the start/stop notifications.
pub const TRACE_CTL_MAGIC: u32 = 0xDEAD_BEEF;

pub const FRAME_PARAMS_LIMIT: usize = 16;
pub const FRAME_BACKTRACE_LIMIT: usize = 8;

/// Bytes of a task name kept in an [`ObjData`].
pub const OBJ_NAME_SIZE: usize = 32;

/// Which optional parts a [`TraceEventFrame`] carries on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameLayout {
    /// cpu id, interrupt flag, scheduler lock count and parameter count.
    pub core_msg: bool,
    pub event_count: bool,
    /// Return addresses recorded per frame.
    pub backtrace_depth: usize,
    pub max_params: usize,
}

impl Default for FrameLayout {
    fn default() -> FrameLayout {
        FrameLayout {
            core_msg: true,
            event_count: true,
            backtrace_depth: 0,
            max_params: 3,
        }
    }
}

const FIXED_PART_SIZE: usize = 28;

impl FrameLayout {
    pub fn params(&self) -> usize {
        self.max_params.min(FRAME_PARAMS_LIMIT)
    }

    pub fn backtrace(&self) -> usize {
        self.backtrace_depth.min(FRAME_BACKTRACE_LIMIT)
    }

    pub fn core_offset(&self) -> Option<usize> {
        if self.core_msg {
            Some(FIXED_PART_SIZE)
        } else {
            None
        }
    }

    pub fn event_count_offset(&self) -> Option<usize> {
        if self.event_count {
            Some(FIXED_PART_SIZE + if self.core_msg { 4 } else { 0 })
        } else {
            None
        }
    }

    pub fn link_reg_offset(&self) -> usize {
        FIXED_PART_SIZE + if self.core_msg { 4 } else { 0 } + if self.event_count { 4 } else { 0 }
    }

    pub fn params_offset(&self) -> usize {
        self.link_reg_offset() + 8 * self.backtrace()
    }

    pub fn frame_size(&self) -> usize {
        self.params_offset() + 8 * self.params()
    }
}

/// Byte offsets of the fixed part of a serialized frame.
pub mod offsets {
    pub const EVENT_TYPE: usize = 0;
    pub const CUR_TASK: usize = 4;
    pub const CUR_PID: usize = 8;
    pub const IDENTITY: usize = 12;
    pub const CUR_TIME: usize = 20;
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CoreInfo {
    pub cpu_id: u8,
    pub hwi_active: bool,
    /// Saturates at 15.
    pub task_lock_cnt: u8,
    pub param_count: u8,
}

impl CoreInfo {
    /// Packs into `cpuid:8 | hwiActive:4 | taskLockCnt:4 | paramCount:4`,
    /// lowest field first.
    pub fn pack(&self) -> u32 {
        (self.cpu_id as u32)
            | ((self.hwi_active as u32) << 8)
            | (((self.task_lock_cnt & 0xF) as u32) << 12)
            | (((self.param_count & 0xF) as u32) << 16)
    }

    pub fn unpack(value: u32) -> CoreInfo {
        CoreInfo {
            cpu_id: value as u8,
            hwi_active: (value >> 8) & 0xF != 0,
            task_lock_cnt: ((value >> 12) & 0xF) as u8,
            param_count: ((value >> 16) & 0xF) as u8,
        }
    }
}

/// One trace record. Built on the stack by the hook path.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TraceEventFrame {
    pub event_type: u32,
    /// Task id, tagged with its reuse generation in offline mode.
    pub cur_task: u32,
    pub cur_pid: u32,
    pub identity: u64,
    /// Cycle counter at capture.
    pub cur_time: u64,
    pub core: CoreInfo,
    pub event_count: u32,
    pub link_reg: [u64; FRAME_BACKTRACE_LIMIT],
    pub params: [u64; FRAME_PARAMS_LIMIT],
}

impl TraceEventFrame {
    /// `bytes` must hold `layout.frame_size()` bytes.
    pub fn serialize(&self, layout: &FrameLayout, bytes: &mut [u8]) {
        let bytes = &mut bytes[..layout.frame_size()];

        NativeEndian::write_u32(&mut bytes[offsets::EVENT_TYPE..], self.event_type);
        NativeEndian::write_u32(&mut bytes[offsets::CUR_TASK..], self.cur_task);
        NativeEndian::write_u32(&mut bytes[offsets::CUR_PID..], self.cur_pid);
        NativeEndian::write_u64(&mut bytes[offsets::IDENTITY..], self.identity);
        NativeEndian::write_u64(&mut bytes[offsets::CUR_TIME..], self.cur_time);

        if let Some(offset) = layout.core_offset() {
            NativeEndian::write_u32(&mut bytes[offset..], self.core.pack());
        }
        if let Some(offset) = layout.event_count_offset() {
            NativeEndian::write_u32(&mut bytes[offset..], self.event_count);
        }

        let lr = layout.link_reg_offset();
        NativeEndian::write_u64_into(
            &self.link_reg[..layout.backtrace()],
            &mut bytes[lr..lr + 8 * layout.backtrace()],
        );

        let params = layout.params_offset();
        NativeEndian::write_u64_into(&self.params[..layout.params()], &mut bytes[params..]);
    }

    pub fn deserialize<B: ByteOrder>(layout: &FrameLayout, bytes: &[u8]) -> TraceEventFrame {
        let bytes = &bytes[..layout.frame_size()];
        let mut frame = TraceEventFrame {
            event_type: B::read_u32(&bytes[offsets::EVENT_TYPE..]),
            cur_task: B::read_u32(&bytes[offsets::CUR_TASK..]),
            cur_pid: B::read_u32(&bytes[offsets::CUR_PID..]),
            identity: B::read_u64(&bytes[offsets::IDENTITY..]),
            cur_time: B::read_u64(&bytes[offsets::CUR_TIME..]),
            ..TraceEventFrame::default()
        };

        if let Some(offset) = layout.core_offset() {
            frame.core = CoreInfo::unpack(B::read_u32(&bytes[offset..]));
        }
        if let Some(offset) = layout.event_count_offset() {
            frame.event_count = B::read_u32(&bytes[offset..]);
        }

        let lr = layout.link_reg_offset();
        B::read_u64_into(
            &bytes[lr..lr + 8 * layout.backtrace()],
            &mut frame.link_reg[..layout.backtrace()],
        );

        let params = layout.params_offset();
        B::read_u64_into(&bytes[params..], &mut frame.params[..layout.params()]);
        frame
    }

    /// Frames never written are all zero.
    pub fn is_empty(&self) -> bool {
        *self == TraceEventFrame::default()
    }
}

/// Task metadata kept next to the frames so task ids can be named.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ObjData {
    pub id: u32,
    pub prio: u32,
    /// NUL padded.
    pub name: [u8; OBJ_NAME_SIZE],
}

impl Default for ObjData {
    fn default() -> ObjData {
        ObjData {
            id: 0,
            prio: 0,
            name: [0; OBJ_NAME_SIZE],
        }
    }
}

impl ObjData {
    pub const SIZE: usize = 8 + OBJ_NAME_SIZE;

    pub fn name_str(&self) -> &str {
        name_from_bytes(&self.name)
    }

    pub fn serialize(&self, bytes: &mut [u8]) {
        NativeEndian::write_u32(&mut bytes[0..4], self.id);
        NativeEndian::write_u32(&mut bytes[4..8], self.prio);
        bytes[8..Self::SIZE].copy_from_slice(&self.name);
    }

    pub fn deserialize<B: ByteOrder>(bytes: &[u8]) -> ObjData {
        let mut obj = ObjData {
            id: B::read_u32(&bytes[0..4]),
            prio: B::read_u32(&bytes[4..8]),
            name: [0; OBJ_NAME_SIZE],
        };
        let name = &bytes[8..bytes.len().min(Self::SIZE)];
        obj.name[..name.len()].copy_from_slice(name);
        obj
    }
}

/// The part up to the first NUL, lossily cut at invalid UTF-8.
pub fn name_from_bytes(bytes: &[u8]) -> &str {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    match std::str::from_utf8(&bytes[..end]) {
        Ok(name) => name,
        Err(e) => std::str::from_utf8(&bytes[..e.valid_up_to()]).unwrap_or(""),
    }
}

/// Leading header of an offline recording. Offsets are absolute from the
/// start of the recording.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct OfflineHead {
    pub marker: u32,
    pub version: u32,
    pub clock_freq: u32,
    pub obj_size: u32,
    pub frame_size: u32,
    pub obj_offset: u32,
    pub frame_offset: u32,
    pub total_len: u32,
}

impl OfflineHead {
    pub const SIZE: usize = 32;

    /// Length of the `marker, version, clock_freq` prefix that is also sent
    /// on its own as the HEAD message.
    pub const BASE_INFO_SIZE: usize = 12;

    pub fn serialize(&self, bytes: &mut [u8]) {
        let fields = [
            self.marker,
            self.version,
            self.clock_freq,
            self.obj_size,
            self.frame_size,
            self.obj_offset,
            self.frame_offset,
            self.total_len,
        ];
        NativeEndian::write_u32_into(&fields, &mut bytes[..Self::SIZE]);
    }

    pub fn deserialize<B: ByteOrder>(bytes: &[u8]) -> OfflineHead {
        let mut fields = [0u32; 8];
        B::read_u32_into(&bytes[..Self::SIZE], &mut fields);
        OfflineHead {
            marker: fields[0],
            version: fields[1],
            clock_freq: fields[2],
            obj_size: fields[3],
            frame_size: fields[4],
            obj_offset: fields[5],
            frame_offset: fields[6],
            total_len: fields[7],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use byteorder::{BigEndian, LittleEndian};

    #[test]
    fn default_layout_size() {
        let layout = FrameLayout::default();
        assert_eq!(layout.core_offset(), Some(28));
        assert_eq!(layout.event_count_offset(), Some(32));
        assert_eq!(layout.params_offset(), 36);
        assert_eq!(layout.frame_size(), 60);

        let bare = FrameLayout {
            core_msg: false,
            event_count: false,
            backtrace_depth: 2,
            max_params: 40,
        };
        assert_eq!(bare.event_count_offset(), None);
        assert_eq!(bare.params_offset(), 44);
        assert_eq!(bare.frame_size(), 44 + 8 * FRAME_PARAMS_LIMIT);
    }

    #[test]
    fn core_info_bitfields() {
        let core = CoreInfo {
            cpu_id: 3,
            hwi_active: true,
            task_lock_cnt: 15,
            param_count: 2,
        };
        assert_eq!(core.pack(), 0x0002_F103);
        assert_eq!(CoreInfo::unpack(core.pack()), core);
    }

    #[test]
    fn frame_reads_back_in_the_other_byte_order() {
        let layout = FrameLayout {
            backtrace_depth: 1,
            ..FrameLayout::default()
        };
        let mut frame = TraceEventFrame {
            event_type: 0x45,
            cur_task: 0x0001_0007,
            cur_pid: 2,
            identity: 0xAB,
            cur_time: 0x1_0000_0010,
            event_count: 9,
            ..TraceEventFrame::default()
        };
        frame.link_reg[0] = 0x8000_1234;
        frame.params[..3].copy_from_slice(&[1, 2, 3]);

        let mut bytes = vec![0u8; layout.frame_size()];
        frame.serialize(&layout, &mut bytes);

        let native = if cfg!(target_endian = "little") {
            TraceEventFrame::deserialize::<LittleEndian>(&layout, &bytes)
        } else {
            TraceEventFrame::deserialize::<BigEndian>(&layout, &bytes)
        };
        assert_eq!(native, frame);

        let swapped = if cfg!(target_endian = "little") {
            TraceEventFrame::deserialize::<BigEndian>(&layout, &bytes)
        } else {
            TraceEventFrame::deserialize::<LittleEndian>(&layout, &bytes)
        };
        assert_eq!(swapped.event_type, 0x4500_0000);
    }

    #[test]
    fn names_stop_at_nul() {
        let mut obj = ObjData::default();
        obj.name[..4].copy_from_slice(b"idle");
        assert_eq!(obj.name_str(), "idle");
        assert_eq!(name_from_bytes(b"ab\xffcd"), "ab");
    }
}
