//! The `/dev/trace` character device, minus the VFS glue.

use super::events::user_event;
use super::Tracer;
use crate::error::TraceError;
use byteorder::{ByteOrder, NativeEndian};
use log::error;
use std::sync::Arc;

pub const TRACE_DEVICE_PATH: &str = "/dev/trace";
pub const TRACE_DEVICE_MODE: u32 = 0o666;

const TRACE_IOC_MAGIC: u32 = b'T' as u32;

/// Requests accepted by [`TraceDevice::ioctl`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TraceIoctl {
    Start,
    Stop,
    Reset,
    Dump { to_client: bool },
    SetMask(u32),
}

impl TraceIoctl {
    pub const START: u32 = TRACE_IOC_MAGIC << 8 | 1;
    pub const STOP: u32 = TRACE_IOC_MAGIC << 8 | 2;
    pub const RESET: u32 = TRACE_IOC_MAGIC << 8 | 3;
    pub const DUMP: u32 = TRACE_IOC_MAGIC << 8 | 4;
    pub const SET_MASK: u32 = TRACE_IOC_MAGIC << 8 | 5;

    /// Decodes a raw request number and its argument.
    pub fn from_raw(cmd: u32, arg: usize) -> Option<TraceIoctl> {
        Some(match cmd {
            Self::START => TraceIoctl::Start,
            Self::STOP => TraceIoctl::Stop,
            Self::RESET => TraceIoctl::Reset,
            Self::DUMP => TraceIoctl::Dump { to_client: arg != 0 },
            Self::SET_MASK => TraceIoctl::SetMask(arg as u32),
            _ => return None,
        })
    }
}

/// A user event as written to the device.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct UsrEventInfo {
    /// Only the low four bits are kept.
    pub event_type: u32,
    pub identity: u64,
    pub params: [u64; 3],
}

impl UsrEventInfo {
    pub const SIZE: usize = 4 + 8 + 8 * 3;

    pub fn serialize(&self, bytes: &mut [u8]) {
        NativeEndian::write_u32(&mut bytes[0..4], self.event_type);
        NativeEndian::write_u64(&mut bytes[4..12], self.identity);
        NativeEndian::write_u64_into(&self.params, &mut bytes[12..Self::SIZE]);
    }

    pub fn deserialize(bytes: &[u8]) -> UsrEventInfo {
        let mut params = [0u64; 3];
        NativeEndian::read_u64_into(&bytes[12..Self::SIZE], &mut params);
        UsrEventInfo {
            event_type: NativeEndian::read_u32(&bytes[0..4]),
            identity: NativeEndian::read_u64(&bytes[4..12]),
            params,
        }
    }
}

pub struct TraceDevice {
    tracer: Arc<Tracer>,
}

impl TraceDevice {
    pub fn new(tracer: Arc<Tracer>) -> TraceDevice {
        TraceDevice { tracer }
    }

    pub fn ioctl(&self, cmd: TraceIoctl) -> Result<(), TraceError> {
        match cmd {
            TraceIoctl::Start => self.tracer.start(),
            TraceIoctl::Stop => self.tracer.stop(),
            TraceIoctl::Reset => self.tracer.reset(),
            TraceIoctl::Dump { to_client } => self.tracer.dump(to_client),
            TraceIoctl::SetMask(mask) => {
                self.tracer.set_event_mask(mask);
                Ok(())
            }
        }
    }

    pub fn ioctl_raw(&self, cmd: u32, arg: usize) -> Result<(), TraceError> {
        match TraceIoctl::from_raw(cmd, arg) {
            Some(cmd) => self.ioctl(cmd),
            None => {
                error!("trace ioctl: unknown request {:#x}", cmd);
                Err(TraceError::InvalidArgument("unknown ioctl request"))
            }
        }
    }

    /// Reads the start of the offline recording.
    pub fn read(&self, buf: &mut [u8]) -> Result<usize, TraceError> {
        if buf.len() % 4 != 0 {
            error!("trace read: length {} is not a multiple of 4", buf.len());
            return Err(TraceError::InvalidArgument("read length must be a multiple of 4"));
        }
        self.tracer.read_record(buf)
    }

    /// Records the user event in `buf`, which must be exactly one
    /// [`UsrEventInfo`].
    pub fn write(&self, buf: &[u8]) -> Result<usize, TraceError> {
        if buf.len() != UsrEventInfo::SIZE {
            error!(
                "trace write: expected {} bytes, got {}",
                UsrEventInfo::SIZE,
                buf.len()
            );
            return Err(TraceError::InvalidArgument("write must carry one user event"));
        }

        let info = UsrEventInfo::deserialize(buf);
        self.tracer
            .hook(user_event(info.event_type), info.identity, &info.params);
        Ok(buf.len())
    }
}
