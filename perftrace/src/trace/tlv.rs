//! Type-length-value encoding of trace messages.
//!
//! A message is a 6 byte header followed by a body of TLVs:
//!
//! ```text
//! +------+----------+-----------+-----------+------+-----+-------+-----
//! | 0xFF | msg_type | len (u16) | crc (u16) | tag  | len | value | ...
//! +------+----------+-----------+-----------+------+-----+-------+-----
//! ```
//!
//! `len` and `crc` cover the body only and are in the producer's byte
//! order. Each TLV value is copied unchanged out of the serialized record, so
//! multi-byte values are in the producer's byte order as well. The receiver
//! learns that order from the HEAD message's endian marker.

use super::frame::{offsets, FrameLayout, OBJ_NAME_SIZE};
use byteorder::{ByteOrder, NativeEndian};
use smallvec::SmallVec;

pub const TLV_MAGIC: u8 = 0xFF;
pub const TLV_HEAD_SIZE: usize = 6;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MsgType {
    Notify = 0,
    Head = 1,
    Obj = 2,
    Event = 3,
}

impl MsgType {
    pub fn from_u8(value: u8) -> Option<MsgType> {
        match value {
            0 => Some(MsgType::Notify),
            1 => Some(MsgType::Head),
            2 => Some(MsgType::Obj),
            3 => Some(MsgType::Event),
            _ => None,
        }
    }
}

/// Tag values, per message type.
pub mod tags {
    pub const NOTIFY_CMD: u8 = 1;
    pub const NOTIFY_PARAMS: u8 = 2;

    pub const HEAD_ENDIAN: u8 = 1;
    pub const HEAD_VERSION: u8 = 2;
    pub const HEAD_CLOCK_FREQ: u8 = 8;

    pub const OBJ_ADDR: u8 = 1;
    pub const OBJ_PRIO: u8 = 2;
    pub const OBJ_NAME: u8 = 3;

    pub const EVENT_CORE: u8 = 1;
    pub const EVENT_CODE: u8 = 2;
    pub const EVENT_CUR_TIME: u8 = 3;
    pub const EVENT_COUNT: u8 = 4;
    pub const EVENT_CUR_TASK: u8 = 5;
    pub const EVENT_IDENTITY: u8 = 6;
    pub const EVENT_PARAMS: u8 = 7;
    pub const EVENT_CUR_PID: u8 = 8;
}

/// Where one TLV's value sits in the serialized source record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TlvTable {
    pub tag: u8,
    pub offset: usize,
    pub len: usize,
}

/// Ends a table.
pub const TLV_TABLE_END: TlvTable = TlvTable {
    tag: 0,
    offset: 0,
    len: 0,
};

const fn entry(tag: u8, offset: usize, len: usize) -> TlvTable {
    TlvTable { tag, offset, len }
}

/// Source: `cmd u32, param u32`.
pub const NOTIFY_TABLE: &[TlvTable] = &[
    entry(tags::NOTIFY_CMD, 0, 4),
    entry(tags::NOTIFY_PARAMS, 4, 4),
    TLV_TABLE_END,
];

/// Source: the base info prefix of an offline header.
pub const HEAD_TABLE: &[TlvTable] = &[
    entry(tags::HEAD_ENDIAN, 0, 4),
    entry(tags::HEAD_VERSION, 4, 4),
    entry(tags::HEAD_CLOCK_FREQ, 8, 4),
    TLV_TABLE_END,
];

/// Source: a serialized object.
pub const OBJ_TABLE: &[TlvTable] = &[
    entry(tags::OBJ_ADDR, 0, 4),
    entry(tags::OBJ_PRIO, 4, 4),
    entry(tags::OBJ_NAME, 8, OBJ_NAME_SIZE),
    TLV_TABLE_END,
];

/// Table for frames serialized with `layout`. Backtraces are not sent.
pub fn event_table(layout: &FrameLayout) -> SmallVec<[TlvTable; 9]> {
    let mut table = SmallVec::new();
    if let Some(offset) = layout.core_offset() {
        table.push(entry(tags::EVENT_CORE, offset, 4));
    }
    table.push(entry(tags::EVENT_CODE, offsets::EVENT_TYPE, 4));
    table.push(entry(tags::EVENT_CUR_TIME, offsets::CUR_TIME, 8));
    if let Some(offset) = layout.event_count_offset() {
        table.push(entry(tags::EVENT_COUNT, offset, 4));
    }
    table.push(entry(tags::EVENT_CUR_TASK, offsets::CUR_TASK, 4));
    table.push(entry(tags::EVENT_IDENTITY, offsets::IDENTITY, 8));
    if layout.params() > 0 {
        table.push(entry(tags::EVENT_PARAMS, layout.params_offset(), 8 * layout.params()));
    }
    table.push(entry(tags::EVENT_CUR_PID, offsets::CUR_PID, 4));
    table.push(TLV_TABLE_END);
    table
}

/// CRC-16/XMODEM: polynomial 0x1021, initial value 0, no reflection.
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0;
    for &byte in data {
        crc ^= (byte as u16) << 8;
        for _ in 0..8 {
            crc = if crc & 0x8000 != 0 {
                (crc << 1) ^ 0x1021
            } else {
                crc << 1
            };
        }
    }
    crc
}

/// Writes one TLV and returns its length. An empty value writes nothing.
///
/// `dest` must hold `value.len() + 2` bytes and `value` must be shorter
/// than 256 bytes.
pub fn write_tlv(dest: &mut [u8], tag: u8, value: &[u8]) -> usize {
    if value.is_empty() {
        return 0;
    }
    dest[0] = tag;
    dest[1] = value.len() as u8;
    dest[2..2 + value.len()].copy_from_slice(value);
    value.len() + 2
}

/// Encodes `src` as a message of `msg_type` into `dest`, one TLV per table
/// entry. Entries that would not fit into `dest`, and everything after
/// them, are left out. Returns the encoded length, header included.
pub fn encode(msg_type: MsgType, table: &[TlvTable], src: &[u8], dest: &mut [u8]) -> usize {
    if dest.len() < TLV_HEAD_SIZE {
        return 0;
    }

    let (head, body) = dest.split_at_mut(TLV_HEAD_SIZE);
    let mut len = 0;
    for item in table.iter().take_while(|item| item.tag != TLV_TABLE_END.tag) {
        let end = item.offset + item.len;
        if end > src.len() || item.len > u8::MAX as usize {
            break;
        }
        if len + item.len + 2 > body.len() {
            break;
        }
        len += write_tlv(&mut body[len..], item.tag, &src[item.offset..end]);
    }

    head[0] = TLV_MAGIC;
    head[1] = msg_type as u8;
    NativeEndian::write_u16(&mut head[2..4], len as u16);
    NativeEndian::write_u16(&mut head[4..6], crc16(&body[..len]));

    TLV_HEAD_SIZE + len
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crc_check_value() {
        assert_eq!(crc16(b"123456789"), 0x31C3);
        assert_eq!(crc16(&[]), 0);
    }

    #[test]
    fn empty_value_writes_nothing() {
        let mut dest = [0xAAu8; 4];
        assert_eq!(write_tlv(&mut dest, 1, &[]), 0);
        assert_eq!(dest, [0xAA; 4]);
        assert_eq!(write_tlv(&mut dest, 7, &[1, 2]), 4);
        assert_eq!(dest, [7, 2, 1, 2]);
    }

    #[test]
    fn notify_message_layout() {
        let mut src = [0u8; 8];
        NativeEndian::write_u32(&mut src[0..4], 0x11);
        NativeEndian::write_u32(&mut src[4..8], 0xDEAD_BEEF);

        let mut dest = [0u8; 32];
        let n = encode(MsgType::Notify, NOTIFY_TABLE, &src, &mut dest);
        assert_eq!(n, TLV_HEAD_SIZE + 12);
        assert_eq!(dest[0], TLV_MAGIC);
        assert_eq!(dest[1], MsgType::Notify as u8);
        assert_eq!(NativeEndian::read_u16(&dest[2..4]), 12);
        assert_eq!(NativeEndian::read_u16(&dest[4..6]), crc16(&dest[6..18]));
        assert_eq!(&dest[6..8], &[tags::NOTIFY_CMD, 4]);
        assert_eq!(&dest[8..12], &src[0..4]);
        assert_eq!(&dest[12..14], &[tags::NOTIFY_PARAMS, 4]);
    }

    #[test]
    fn encoding_stops_before_a_tlv_that_does_not_fit() {
        let src = [1u8; 8];
        let mut dest = [0u8; TLV_HEAD_SIZE + 9];
        let n = encode(MsgType::Notify, NOTIFY_TABLE, &src, &mut dest);
        assert_eq!(n, TLV_HEAD_SIZE + 6);
        assert_eq!(NativeEndian::read_u16(&dest[2..4]), 6);

        assert_eq!(encode(MsgType::Notify, NOTIFY_TABLE, &src, &mut [0u8; 5]), 0);
    }

    #[test]
    fn event_table_follows_layout() {
        let table = event_table(&FrameLayout::default());
        let order: Vec<u8> = table.iter().map(|t| t.tag).collect();
        assert_eq!(order, vec![1, 2, 3, 4, 5, 6, 7, 8, 0]);
        assert_eq!(table[6], entry(tags::EVENT_PARAMS, 36, 24));

        let bare = event_table(&FrameLayout {
            core_msg: false,
            event_count: false,
            backtrace_depth: 0,
            max_params: 0,
        });
        let order: Vec<u8> = bare.iter().map(|t| t.tag).collect();
        assert_eq!(order, vec![2, 3, 5, 6, 8, 0]);
    }
}
