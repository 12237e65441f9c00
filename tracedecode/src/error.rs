use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("data truncated: need {needed} bytes, have {len}")]
    Truncated { needed: usize, len: usize },
    #[error("unrecognized endian marker {0:#010x}")]
    BadEndianMarker(u32),
    #[error("unsupported trace version {0}")]
    UnknownVersion(u32),
    #[error("recording layout does not match: {0}")]
    LayoutMismatch(String),
    #[error("bad message magic {magic:#04x} at offset {offset}")]
    BadMagic { magic: u8, offset: usize },
    #[error("unknown message type {0}")]
    UnknownMsgType(u8),
    #[error("crc mismatch: header says {expected:#06x}, body has {actual:#06x}")]
    CrcMismatch { expected: u16, actual: u16 },
    #[error("malformed tlv at offset {0}")]
    MalformedTlv(usize),
}
