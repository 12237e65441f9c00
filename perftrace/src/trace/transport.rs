use super::frame::{FrameLayout, TraceEventFrame};
use super::pipeline::TracePipeline;
use super::tlv::{self, MsgType, TlvTable};
use crate::error::TraceError;
use crate::lock::{IrqLock, LockMode};
use crate::platform::Platform;
use byteorder::{ByteOrder, NativeEndian};
use log::{debug, error};
use smallvec::SmallVec;
use std::sync::Arc;
use std::time::Duration;

/// Encodes records into TLV messages and hands them to the pipeline. Sends
/// are serialized through one encode buffer.
pub struct Transport {
    pipeline: Box<dyn TracePipeline>,
    buf: IrqLock<Vec<u8>>,
    buf_size: usize,
    layout: FrameLayout,
    event_table: SmallVec<[TlvTable; 9]>,
}

impl Transport {
    pub fn new(
        platform: Arc<dyn Platform>,
        mode: LockMode,
        pipeline: Box<dyn TracePipeline>,
        buf_size: usize,
        layout: FrameLayout,
    ) -> Result<Transport, TraceError> {
        let mut buf = Vec::new();
        buf.try_reserve_exact(buf_size)
            .map_err(|_| TraceError::NoMemory(buf_size))?;
        buf.resize(buf_size, 0);

        Ok(Transport {
            pipeline,
            buf: IrqLock::new(platform, mode, buf),
            buf_size,
            event_table: tlv::event_table(&layout),
            layout,
        })
    }

    pub fn init(&self) -> Result<(), TraceError> {
        self.pipeline
            .init()
            .map_err(|e| TraceError::PipelineInit(e.to_string()))
    }

    pub fn layout(&self) -> &FrameLayout {
        &self.layout
    }

    /// Encodes and sends `src`, a serialized record of `msg_type`. Records
    /// longer than the encode buffer are dropped.
    pub fn send(&self, msg_type: MsgType, src: &[u8]) {
        if src.len() > self.buf_size {
            error!(
                "Transport::send: {:?} record of {} bytes exceeds the {} byte buffer",
                msg_type,
                src.len(),
                self.buf_size
            );
            return;
        }

        let table: &[TlvTable] = match msg_type {
            MsgType::Notify => tlv::NOTIFY_TABLE,
            MsgType::Head => tlv::HEAD_TABLE,
            MsgType::Obj => tlv::OBJ_TABLE,
            MsgType::Event => &self.event_table,
        };

        let mut buf = self.buf.lock();
        let len = tlv::encode(msg_type, table, src, &mut buf);
        debug!("Transport::send: {:?}, {} bytes", msg_type, len);
        if let Err(e) = self.pipeline.data_send(&buf[..len]) {
            error!("Transport::send: {}", e);
        }
    }

    pub fn send_notify(&self, cmd: u32, param: u32) {
        let mut src = [0u8; 8];
        NativeEndian::write_u32_into(&[cmd, param], &mut src);
        self.send(MsgType::Notify, &src);
    }

    pub fn send_event(&self, frame: &TraceEventFrame) {
        let mut src = [0u8; 256];
        let size = self.layout.frame_size();
        frame.serialize(&self.layout, &mut src[..size]);
        self.send(MsgType::Event, &src[..size]);
    }

    pub fn recv(&self, buf: &mut [u8], timeout: Duration) -> usize {
        match self.pipeline.data_recv(buf, timeout) {
            Ok(n) => n,
            Err(e) => {
                error!("Transport::recv: {}", e);
                0
            }
        }
    }

    /// Blocks until client data arrives. `false` once the pipeline has
    /// nothing more to deliver.
    pub fn wait(&self) -> bool {
        match self.pipeline.wait() {
            Ok(()) => true,
            Err(e) => {
                debug!("Transport::wait: {}", e);
                false
            }
        }
    }
}
