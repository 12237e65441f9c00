//! Parser for images of the offline recorder.

use crate::{DecodeError, Endianness};
use byteorder::{BigEndian, ByteOrder, LittleEndian};
use perftrace::trace::events;
use perftrace::trace::{
    FrameLayout, ObjData, OfflineHead, TraceEventFrame, TraceMode, TRACE_BIGLITTLE_WORD,
};
use rustc_hash::FxHashMap;
use serde::Serialize;

/// A parsed offline recording.
#[derive(Clone, Debug)]
pub struct OfflineDump {
    endianness: Endianness,
    header: OfflineHead,
    layout: FrameLayout,
    objects: Vec<ObjData>,
    frames: Vec<TraceEventFrame>,
}

impl OfflineDump {
    /// Parses an image recorded with the default frame layout.
    pub fn parse(bytes: &[u8]) -> Result<OfflineDump, DecodeError> {
        OfflineDump::parse_with_layout(bytes, FrameLayout::default())
    }

    /// The header records the frame size only, so the reader has to know
    /// which optional fields the recorder was configured with.
    pub fn parse_with_layout(bytes: &[u8], layout: FrameLayout) -> Result<OfflineDump, DecodeError> {
        check_len(bytes, OfflineHead::SIZE)?;
        match Endianness::detect(&bytes[..4], TRACE_BIGLITTLE_WORD)? {
            Endianness::Little => parse_as::<LittleEndian>(bytes, layout, Endianness::Little),
            Endianness::Big => parse_as::<BigEndian>(bytes, layout, Endianness::Big),
        }
    }

    pub fn endianness(&self) -> Endianness {
        self.endianness
    }

    pub fn header(&self) -> &OfflineHead {
        &self.header
    }

    pub fn layout(&self) -> &FrameLayout {
        &self.layout
    }

    /// Every slot of the object table, in slot order.
    pub fn objects(&self) -> &[ObjData] {
        &self.objects
    }

    /// Every slot of the ring, in slot order.
    pub fn frames(&self) -> &[TraceEventFrame] {
        &self.frames
    }

    /// Recorded frames, oldest first.
    pub fn events(&self) -> Vec<&TraceEventFrame> {
        let mut events: Vec<_> = self.frames.iter().filter(|f| !f.is_empty()).collect();
        events.sort_by_key(|f| f.cur_time);
        events
    }

    /// Names of the recorded task ids. Later table entries win.
    pub fn task_names(&self) -> FxHashMap<u32, &str> {
        self.objects
            .iter()
            .filter(|obj| *obj != &ObjData::default())
            .map(|obj| (obj.id, obj.name_str()))
            .collect()
    }

    /// Plain records of the recorded events, oldest first.
    pub fn event_records(&self) -> Vec<EventRecord> {
        let names = self.task_names();
        self.events()
            .into_iter()
            .map(|frame| EventRecord::new(frame, &self.layout, &names))
            .collect()
    }

    pub fn object_records(&self) -> Vec<ObjRecord> {
        self.objects
            .iter()
            .enumerate()
            .filter(|(_, obj)| **obj != ObjData::default())
            .map(|(index, obj)| ObjRecord {
                index,
                id: obj.id,
                prio: obj.prio,
                name: obj.name_str().to_string(),
            })
            .collect()
    }
}

fn check_len(bytes: &[u8], needed: usize) -> Result<(), DecodeError> {
    if bytes.len() < needed {
        Err(DecodeError::Truncated {
            needed,
            len: bytes.len(),
        })
    } else {
        Ok(())
    }
}

fn parse_as<B: ByteOrder>(
    bytes: &[u8],
    layout: FrameLayout,
    endianness: Endianness,
) -> Result<OfflineDump, DecodeError> {
    let header = OfflineHead::deserialize::<B>(bytes);

    if TraceMode::from_version(header.version) != Some(TraceMode::Offline) {
        return Err(DecodeError::UnknownVersion(header.version));
    }
    if header.obj_size as usize != ObjData::SIZE {
        return Err(DecodeError::LayoutMismatch(format!(
            "object size {} but {} expected",
            header.obj_size,
            ObjData::SIZE
        )));
    }
    let frame_size = layout.frame_size();
    if header.frame_size as usize != frame_size {
        return Err(DecodeError::LayoutMismatch(format!(
            "frame size {} but the layout gives {}",
            header.frame_size, frame_size
        )));
    }

    let total_len = header.total_len as usize;
    let obj_offset = header.obj_offset as usize;
    let frame_offset = header.frame_offset as usize;
    check_len(bytes, total_len)?;
    if obj_offset < OfflineHead::SIZE || frame_offset < obj_offset || frame_offset > total_len {
        return Err(DecodeError::LayoutMismatch(format!(
            "offsets {:#x}/{:#x} outside of {:#x} bytes",
            obj_offset, frame_offset, total_len
        )));
    }

    let objects = bytes[obj_offset..frame_offset]
        .chunks_exact(ObjData::SIZE)
        .map(ObjData::deserialize::<B>)
        .collect();

    let frames = bytes[frame_offset..total_len]
        .chunks_exact(frame_size)
        .map(|chunk| TraceEventFrame::deserialize::<B>(&layout, chunk))
        .collect();

    Ok(OfflineDump {
        endianness,
        header,
        layout,
        objects,
        frames,
    })
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ObjRecord {
    pub index: usize,
    pub id: u32,
    pub prio: u32,
    pub name: String,
}

/// One event, with the fields the layout recorded.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct EventRecord {
    pub time: u64,
    pub event_type: u32,
    pub event_name: Option<&'static str>,
    pub pid: u32,
    pub task: u32,
    pub task_name: Option<String>,
    pub identity: u64,
    pub cpu: Option<u8>,
    pub hwi_active: Option<bool>,
    pub task_lock_cnt: Option<u8>,
    pub event_count: Option<u32>,
    pub backtrace: Vec<u64>,
    pub params: Vec<u64>,
}

impl EventRecord {
    pub fn new(
        frame: &TraceEventFrame,
        layout: &FrameLayout,
        names: &FxHashMap<u32, &str>,
    ) -> EventRecord {
        let core = layout.core_msg.then_some(frame.core);
        let param_count = match core {
            Some(core) => (core.param_count as usize).min(layout.params()),
            None => layout.params(),
        };

        EventRecord {
            time: frame.cur_time,
            event_type: frame.event_type,
            event_name: events::name(frame.event_type),
            pid: frame.cur_pid,
            task: frame.cur_task,
            task_name: names.get(&frame.cur_task).map(|name| name.to_string()),
            identity: frame.identity,
            cpu: core.map(|c| c.cpu_id),
            hwi_active: core.map(|c| c.hwi_active),
            task_lock_cnt: core.map(|c| c.task_lock_cnt),
            event_count: layout.event_count.then_some(frame.event_count),
            backtrace: frame.link_reg[..layout.backtrace()].to_vec(),
            params: frame.params[..param_count].to_vec(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use byteorder::NativeEndian;

    fn image(records: usize) -> Vec<u8> {
        let layout = FrameLayout::default();
        let head_size = OfflineHead::SIZE + ObjData::SIZE * 2;
        let total = head_size + layout.frame_size() * records;
        let mut bytes = vec![0u8; total];
        OfflineHead {
            marker: TRACE_BIGLITTLE_WORD,
            version: 0,
            clock_freq: 1000,
            obj_size: ObjData::SIZE as u32,
            frame_size: layout.frame_size() as u32,
            obj_offset: OfflineHead::SIZE as u32,
            frame_offset: head_size as u32,
            total_len: total as u32,
        }
        .serialize(&mut bytes);
        bytes
    }

    #[test]
    fn rejects_foreign_data() {
        assert!(matches!(
            OfflineDump::parse(&[0u8; 8]),
            Err(DecodeError::Truncated { needed: 32, len: 8 })
        ));
        assert_eq!(
            OfflineDump::parse(&[0xAB; 64]).err(),
            Some(DecodeError::BadEndianMarker(0xABAB_ABAB))
        );

        let mut online = image(1);
        NativeEndian::write_u32(&mut online[4..8], 1);
        assert_eq!(
            OfflineDump::parse(&online).err(),
            Some(DecodeError::UnknownVersion(1))
        );
    }

    #[test]
    fn layout_must_match() {
        let bytes = image(2);
        let layout = FrameLayout {
            max_params: 4,
            ..FrameLayout::default()
        };
        assert!(matches!(
            OfflineDump::parse_with_layout(&bytes, layout),
            Err(DecodeError::LayoutMismatch(_))
        ));
        assert!(matches!(
            OfflineDump::parse(&bytes[..bytes.len() - 1]),
            Err(DecodeError::Truncated { .. })
        ));
    }

    #[test]
    fn empty_recording() {
        let dump = OfflineDump::parse(&image(3)).unwrap();
        assert_eq!(dump.frames().len(), 3);
        assert_eq!(dump.objects().len(), 2);
        assert!(dump.events().is_empty());
        assert!(dump.task_names().is_empty());
        assert_eq!(dump.header().clock_freq, 1000);
    }
}
