//! Readers for what `perftrace` produces: images of the offline recorder
//! ([`OfflineDump`]) and captured streams of TLV messages ([`tlv`]).

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use serde::Serialize;

mod error;
pub mod offline;
pub mod tlv;

pub use crate::error::DecodeError;
pub use crate::offline::{EventRecord, ObjRecord, OfflineDump};
pub use crate::tlv::{EventMessage, TlvMessage};

/// Byte order of the machine that produced the data.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum Endianness {
    Little,
    Big,
}

impl Endianness {
    /// Finds the order in which `bytes` reads as `marker`.
    pub fn detect(bytes: &[u8], marker: u32) -> Result<Endianness, DecodeError> {
        if LittleEndian::read_u32(bytes) == marker {
            Ok(Endianness::Little)
        } else if BigEndian::read_u32(bytes) == marker {
            Ok(Endianness::Big)
        } else {
            Err(DecodeError::BadEndianMarker(LittleEndian::read_u32(bytes)))
        }
    }
}
