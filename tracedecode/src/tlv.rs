//! Decoder for captured streams of TLV trace messages.

use crate::offline::{EventRecord, ObjRecord};
use crate::{DecodeError, Endianness};
use byteorder::{BigEndian, ByteOrder, LittleEndian};
use perftrace::trace::tlv::{crc16, tags, MsgType, TLV_HEAD_SIZE, TLV_MAGIC};
use perftrace::trace::{
    name_from_bytes, CoreInfo, FrameLayout, ObjData, TraceEventFrame, FRAME_PARAMS_LIMIT,
    OBJ_NAME_SIZE,
};
use rustc_hash::FxHashMap;
use serde::Serialize;
use smallvec::SmallVec;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TlvMessage {
    Notify {
        cmd: u32,
        param: u32,
    },
    Head {
        marker: u32,
        version: u32,
        clock_freq: u32,
    },
    Obj {
        id: u32,
        prio: u32,
        name: String,
    },
    Event(EventMessage),
}

/// The fields an EVENT message carries. Backtraces are never sent.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct EventMessage {
    pub event_type: u32,
    pub time: u64,
    pub task: u32,
    pub pid: u32,
    pub identity: u64,
    pub cpu: Option<u8>,
    pub hwi_active: Option<bool>,
    pub task_lock_cnt: Option<u8>,
    pub event_count: Option<u32>,
    pub params: Vec<u64>,
}

impl EventMessage {
    /// The frame the message was encoded from, minus the backtrace.
    pub fn to_frame(&self) -> TraceEventFrame {
        let mut frame = TraceEventFrame {
            event_type: self.event_type,
            cur_task: self.task,
            cur_pid: self.pid,
            identity: self.identity,
            cur_time: self.time,
            core: CoreInfo {
                cpu_id: self.cpu.unwrap_or(0),
                hwi_active: self.hwi_active.unwrap_or(false),
                task_lock_cnt: self.task_lock_cnt.unwrap_or(0),
                param_count: 0,
            },
            event_count: self.event_count.unwrap_or(0),
            ..TraceEventFrame::default()
        };
        let n = self.params.len().min(FRAME_PARAMS_LIMIT);
        frame.params[..n].copy_from_slice(&self.params[..n]);
        frame.core.param_count = n as u8;
        frame
    }
}

type Items<'a> = SmallVec<[(u8, &'a [u8]); 9]>;

/// Splits one message off the front of `bytes`, checking magic, length and
/// crc. Returns the message type, its TLVs and the bytes consumed.
fn split_message<B: ByteOrder>(
    bytes: &[u8],
    offset: usize,
) -> Result<(MsgType, Items<'_>, usize), DecodeError> {
    if bytes.len() < TLV_HEAD_SIZE {
        return Err(DecodeError::Truncated {
            needed: TLV_HEAD_SIZE,
            len: bytes.len(),
        });
    }
    if bytes[0] != TLV_MAGIC {
        return Err(DecodeError::BadMagic {
            magic: bytes[0],
            offset,
        });
    }
    let msg_type = MsgType::from_u8(bytes[1]).ok_or(DecodeError::UnknownMsgType(bytes[1]))?;
    let len = B::read_u16(&bytes[2..4]) as usize;
    let expected = B::read_u16(&bytes[4..6]);

    let end = TLV_HEAD_SIZE + len;
    if bytes.len() < end {
        return Err(DecodeError::Truncated {
            needed: end,
            len: bytes.len(),
        });
    }
    let body = &bytes[TLV_HEAD_SIZE..end];
    let actual = crc16(body);
    if actual != expected {
        return Err(DecodeError::CrcMismatch { expected, actual });
    }

    let mut items = Items::new();
    let mut pos = 0;
    while pos < body.len() {
        if pos + 2 > body.len() {
            return Err(DecodeError::MalformedTlv(offset + TLV_HEAD_SIZE + pos));
        }
        let tag = body[pos];
        let n = body[pos + 1] as usize;
        let value_end = pos + 2 + n;
        if value_end > body.len() {
            return Err(DecodeError::MalformedTlv(offset + TLV_HEAD_SIZE + pos));
        }
        items.push((tag, &body[pos + 2..value_end]));
        pos = value_end;
    }

    Ok((msg_type, items, end))
}

struct Fields<'a> {
    items: Items<'a>,
    offset: usize,
}

impl<'a> Fields<'a> {
    fn get(&self, tag: u8) -> Option<&'a [u8]> {
        self.items.iter().find(|(t, _)| *t == tag).map(|&(_, v)| v)
    }

    fn u32<B: ByteOrder>(&self, tag: u8) -> Result<Option<u32>, DecodeError> {
        match self.get(tag) {
            Some(v) if v.len() == 4 => Ok(Some(B::read_u32(v))),
            Some(_) => Err(DecodeError::MalformedTlv(self.offset)),
            None => Ok(None),
        }
    }

    fn u64<B: ByteOrder>(&self, tag: u8) -> Result<Option<u64>, DecodeError> {
        match self.get(tag) {
            Some(v) if v.len() == 8 => Ok(Some(B::read_u64(v))),
            Some(_) => Err(DecodeError::MalformedTlv(self.offset)),
            None => Ok(None),
        }
    }
}

/// Decodes the message at the start of `bytes`, returning it and its
/// encoded length. `offset` is only used in errors.
pub fn decode_message<B: ByteOrder>(
    bytes: &[u8],
    offset: usize,
) -> Result<(TlvMessage, usize), DecodeError> {
    let (msg_type, items, len) = split_message::<B>(bytes, offset)?;
    let fields = Fields { items, offset };

    let message = match msg_type {
        MsgType::Notify => TlvMessage::Notify {
            cmd: fields.u32::<B>(tags::NOTIFY_CMD)?.unwrap_or(0),
            param: fields.u32::<B>(tags::NOTIFY_PARAMS)?.unwrap_or(0),
        },
        MsgType::Head => TlvMessage::Head {
            marker: fields.u32::<B>(tags::HEAD_ENDIAN)?.unwrap_or(0),
            version: fields.u32::<B>(tags::HEAD_VERSION)?.unwrap_or(0),
            clock_freq: fields.u32::<B>(tags::HEAD_CLOCK_FREQ)?.unwrap_or(0),
        },
        MsgType::Obj => {
            let name = fields.get(tags::OBJ_NAME).unwrap_or(&[]);
            TlvMessage::Obj {
                id: fields.u32::<B>(tags::OBJ_ADDR)?.unwrap_or(0),
                prio: fields.u32::<B>(tags::OBJ_PRIO)?.unwrap_or(0),
                name: name_from_bytes(&name[..name.len().min(OBJ_NAME_SIZE)]).to_string(),
            }
        }
        MsgType::Event => {
            let core = fields.u32::<B>(tags::EVENT_CORE)?.map(CoreInfo::unpack);
            let params = match fields.get(tags::EVENT_PARAMS) {
                Some(v) if v.len() % 8 == 0 => {
                    let mut params = vec![0u64; v.len() / 8];
                    B::read_u64_into(v, &mut params);
                    params
                }
                Some(_) => return Err(DecodeError::MalformedTlv(offset)),
                None => Vec::new(),
            };
            TlvMessage::Event(EventMessage {
                event_type: fields.u32::<B>(tags::EVENT_CODE)?.unwrap_or(0),
                time: fields.u64::<B>(tags::EVENT_CUR_TIME)?.unwrap_or(0),
                task: fields.u32::<B>(tags::EVENT_CUR_TASK)?.unwrap_or(0),
                pid: fields.u32::<B>(tags::EVENT_CUR_PID)?.unwrap_or(0),
                identity: fields.u64::<B>(tags::EVENT_IDENTITY)?.unwrap_or(0),
                cpu: core.map(|c| c.cpu_id),
                hwi_active: core.map(|c| c.hwi_active),
                task_lock_cnt: core.map(|c| c.task_lock_cnt),
                event_count: fields.u32::<B>(tags::EVENT_COUNT)?,
                params,
            })
        }
    };

    Ok((message, len))
}

/// Guesses the producer's byte order from the first message: the order in
/// which its length and crc check out.
pub fn detect_endianness(bytes: &[u8]) -> Option<Endianness> {
    if split_message::<LittleEndian>(bytes, 0).is_ok() {
        Some(Endianness::Little)
    } else if split_message::<BigEndian>(bytes, 0).is_ok() {
        Some(Endianness::Big)
    } else {
        None
    }
}

/// Decodes a whole capture. The byte order is taken from the first message.
pub fn decode_stream(bytes: &[u8]) -> Result<Vec<TlvMessage>, DecodeError> {
    if bytes.is_empty() {
        return Ok(Vec::new());
    }
    match detect_endianness(bytes) {
        Some(Endianness::Little) => decode_all::<LittleEndian>(bytes),
        Some(Endianness::Big) => decode_all::<BigEndian>(bytes),
        // Report whatever is wrong with the first message.
        None => decode_all::<LittleEndian>(bytes),
    }
}

fn decode_all<B: ByteOrder>(bytes: &[u8]) -> Result<Vec<TlvMessage>, DecodeError> {
    let mut messages = Vec::new();
    let mut offset = 0;
    while offset < bytes.len() {
        let (message, len) = decode_message::<B>(&bytes[offset..], offset)?;
        messages.push(message);
        offset += len;
    }
    Ok(messages)
}

/// Event frames of a capture, rebuilt with `layout`'s params and ordered by
/// timestamp.
pub fn events_by_time(messages: &[TlvMessage], layout: &FrameLayout) -> Vec<TraceEventFrame> {
    let mut frames: Vec<TraceEventFrame> = messages
        .iter()
        .filter_map(|m| match m {
            TlvMessage::Event(event) => {
                let mut frame = event.to_frame();
                let n = layout.params().min(event.params.len());
                frame.params[n..].iter_mut().for_each(|p| *p = 0);
                Some(frame)
            }
            _ => None,
        })
        .collect();
    frames.sort_by_key(|f| f.cur_time);
    frames
}

/// Object table entries of a capture.
pub fn objects(messages: &[TlvMessage]) -> Vec<ObjData> {
    messages
        .iter()
        .filter_map(|m| match m {
            TlvMessage::Obj { id, prio, name } => {
                let mut obj = ObjData {
                    id: *id,
                    prio: *prio,
                    ..ObjData::default()
                };
                let n = name.len().min(OBJ_NAME_SIZE - 1);
                obj.name[..n].copy_from_slice(&name.as_bytes()[..n]);
                Some(obj)
            }
            _ => None,
        })
        .collect()
}

/// Plain records of a capture's events, oldest first, named after the
/// capture's object table.
pub fn event_records(messages: &[TlvMessage], layout: &FrameLayout) -> Vec<EventRecord> {
    let objs = objects(messages);
    let names: FxHashMap<u32, &str> = objs.iter().map(|o| (o.id, o.name_str())).collect();
    events_by_time(messages, layout)
        .iter()
        .map(|frame| EventRecord::new(frame, layout, &names))
        .collect()
}

pub fn object_records(messages: &[TlvMessage]) -> Vec<ObjRecord> {
    objects(messages)
        .iter()
        .enumerate()
        .map(|(index, obj)| ObjRecord {
            index,
            id: obj.id,
            prio: obj.prio,
            name: obj.name_str().to_string(),
        })
        .collect()
}
