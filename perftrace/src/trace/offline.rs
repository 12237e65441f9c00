//! The offline recorder: one contiguous allocation holding a header, a
//! circular object table and a circular frame ring.
//!
//! ```text
//! +--------------+---------------------------+---------------------------+
//! | OfflineHead  | ObjData x obj_max_num     | frame x max_records       |
//! +--------------+---------------------------+---------------------------+
//! 0              obj_offset                  frame_offset         total_len
//! ```
//!
//! The image is kept in the byte order of the running kernel, so it can be
//! read out as is.

use super::config::{TraceConfig, TraceMode};
use super::frame::{
    FrameLayout, ObjData, OfflineHead, TraceEventFrame, TRACE_BIGLITTLE_WORD,
};
use super::sink::{task_obj, TraceSink};
use super::tlv::MsgType;
use super::transport::Transport;
use crate::error::TraceError;
use crate::lock::{IrqLock, LockMode};
use crate::platform::Platform;
use byteorder::NativeEndian;
use log::{error, info};
use std::fmt::Write;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Task ids use the low 16 bits of a recorded id, the reuse generation the
/// high 16 bits.
const BITS_NUM_FOR_TASK_ID: u32 = 16;

struct Ring {
    buf: Vec<u8>,
    cur_index: usize,
    cur_obj_index: usize,
}

pub struct OfflineRecorder {
    platform: Arc<dyn Platform>,
    transport: Arc<Transport>,
    layout: FrameLayout,
    smp: bool,
    head: OfflineHead,
    max_records: usize,
    max_objs: usize,
    generations: Box<[AtomicU32]>,
    ring: IrqLock<Ring>,
}

impl OfflineRecorder {
    /// Allocates and stamps a recording of `config.buffer_size` bytes.
    pub fn new(
        platform: Arc<dyn Platform>,
        config: &TraceConfig,
        transport: Arc<Transport>,
    ) -> Result<OfflineRecorder, TraceError> {
        let size = config.buffer_size;
        let head_size = config.head_size();
        if size <= head_size {
            error!("trace buf size not enough than {:#x}", head_size);
            return Err(TraceError::BufTooSmall {
                size,
                needed: head_size,
            });
        }

        let frame_size = config.layout.frame_size();
        let mut buf = Vec::new();
        buf.try_reserve_exact(size)
            .map_err(|_| TraceError::NoMemory(size))?;
        buf.resize(size, 0);

        let head = OfflineHead {
            marker: TRACE_BIGLITTLE_WORD,
            version: TraceMode::Offline.version(),
            clock_freq: platform.clock_freq(),
            obj_size: ObjData::SIZE as u32,
            frame_size: frame_size as u32,
            obj_offset: OfflineHead::SIZE as u32,
            frame_offset: head_size as u32,
            total_len: size as u32,
        };
        head.serialize(&mut buf[..OfflineHead::SIZE]);

        let max_records = (size - head_size) / frame_size;
        info!(
            "OfflineRecorder: {} bytes, {} objects, {} frames of {} bytes",
            size, config.obj_max_num, max_records, frame_size
        );

        Ok(OfflineRecorder {
            ring: IrqLock::new(
                platform.clone(),
                config.lock_mode,
                Ring {
                    buf,
                    cur_index: 0,
                    cur_obj_index: 0,
                },
            ),
            platform,
            transport,
            layout: config.layout,
            smp: config.lock_mode == LockMode::Smp,
            head,
            max_records,
            max_objs: config.obj_max_num,
            generations: (0..config.task_limit).map(|_| AtomicU32::new(0)).collect(),
        })
    }

    pub fn head(&self) -> &OfflineHead {
        &self.head
    }

    pub fn max_records(&self) -> usize {
        self.max_records
    }

    /// Slot the next frame goes to.
    pub fn cur_index(&self) -> usize {
        self.ring.lock().cur_index
    }

    pub fn cur_obj_index(&self) -> usize {
        self.ring.lock().cur_obj_index
    }

    pub fn frame(&self, index: usize) -> Option<TraceEventFrame> {
        if index >= self.max_records {
            return None;
        }
        let offset = self.frame_offset(index);
        let ring = self.ring.lock();
        Some(TraceEventFrame::deserialize::<NativeEndian>(
            &self.layout,
            &ring.buf[offset..],
        ))
    }

    pub fn obj(&self, index: usize) -> Option<ObjData> {
        if index >= self.max_objs {
            return None;
        }
        let offset = self.obj_offset(index);
        let ring = self.ring.lock();
        Some(ObjData::deserialize::<NativeEndian>(
            &ring.buf[offset..offset + ObjData::SIZE],
        ))
    }

    fn frame_offset(&self, index: usize) -> usize {
        self.head.frame_offset as usize + index * self.layout.frame_size()
    }

    fn obj_offset(&self, index: usize) -> usize {
        self.head.obj_offset as usize + index * ObjData::SIZE
    }

    fn render(&self, image: &[u8], cur_index: usize, cur_obj_index: usize) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "*******TraceInfo begin*******");
        let _ = writeln!(out, "clockFreq = {}", self.head.clock_freq);

        if self.max_objs > 0 {
            let _ = writeln!(out, "CurObjIndex = {}", cur_obj_index);
            let _ = writeln!(out, "Index   TaskID   TaskPrio   TaskName ");
            for i in 0..self.max_objs {
                let offset = self.obj_offset(i);
                let obj = ObjData::deserialize::<NativeEndian>(&image[offset..offset + ObjData::SIZE]);
                let _ = writeln!(out, "{:<7} 0x{:<6x} {:<10} {}", i, obj.id, obj.prio, obj.name_str());
            }
            let _ = writeln!(out);
        }

        let _ = writeln!(out, "CurEvtIndex = {}", cur_index);
        out.push_str("Index   Time(cycles)      EventType      CurPid   CurTask   Identity      ");
        if self.layout.core_msg {
            out.push_str("cpuid    hwiActive    taskLockCnt    ");
        }
        if self.layout.event_count {
            out.push_str("eventCount    ");
        }
        if self.layout.backtrace() > 0 {
            out.push_str("backtrace ");
            for _ in 0..self.layout.backtrace() {
                out.push_str("           ");
            }
        }
        if self.layout.params() > 0 {
            out.push_str("params    ");
        }
        out.push('\n');

        for i in 0..self.max_records {
            let frame = TraceEventFrame::deserialize::<NativeEndian>(
                &self.layout,
                &image[self.frame_offset(i)..],
            );
            let _ = write!(
                out,
                "{:<7} 0x{:<15x} 0x{:<12x} 0x{:<7x} 0x{:<7x} 0x{:<11x} ",
                i, frame.cur_time, frame.event_type, frame.cur_pid, frame.cur_task, frame.identity
            );
            if self.layout.core_msg {
                let mut task_lock_cnt = frame.core.task_lock_cnt as u32;
                // The trace lock itself holds one scheduler lock on SMP.
                if self.smp {
                    task_lock_cnt = task_lock_cnt.wrapping_sub(1);
                }
                let _ = write!(
                    out,
                    "{:<11} {:<11} {:<11}",
                    frame.core.cpu_id, frame.core.hwi_active as u32, task_lock_cnt
                );
            }
            if self.layout.event_count {
                let _ = write!(out, "{:<11}", frame.event_count);
            }
            for lr in &frame.link_reg[..self.layout.backtrace()] {
                let _ = write!(out, "0x{:<11x}", lr);
            }
            for param in &frame.params[..self.layout.params()] {
                let _ = write!(out, "0x{:<11x}", param);
            }
            out.push('\n');
        }

        let _ = writeln!(out, "*******TraceInfo end*******");
        out
    }

    fn send_info(&self, image: &[u8]) {
        self.transport.send(MsgType::Head, &image[..OfflineHead::SIZE]);

        for i in 0..self.max_objs {
            let offset = self.obj_offset(i);
            self.transport.send(MsgType::Obj, &image[offset..offset + ObjData::SIZE]);
        }

        let frame_size = self.layout.frame_size();
        for i in 0..self.max_records {
            let offset = self.frame_offset(i);
            self.transport.send(MsgType::Event, &image[offset..offset + frame_size]);
        }
    }
}

impl TraceSink for OfflineRecorder {
    fn mask_tid(&self, tid: u32) -> u32 {
        match self.generations.get(tid as usize) {
            Some(generation) => tid | (generation.load(Ordering::Relaxed) << BITS_NUM_FOR_TASK_ID),
            None => tid,
        }
    }

    fn obj_add(&self, task_id: u32) {
        let mut ring = self.ring.lock();
        let index = ring.cur_obj_index;
        if index >= self.max_objs {
            return;
        }

        if let Some(generation) = self.generations.get(task_id as usize) {
            generation.fetch_add(1, Ordering::Relaxed);
        }

        let obj = task_obj(&*self.platform, task_id, self.mask_tid(task_id));
        let offset = self.obj_offset(index);
        obj.serialize(&mut ring.buf[offset..offset + ObjData::SIZE]);

        ring.cur_obj_index += 1;
        if ring.cur_obj_index >= self.max_objs {
            ring.cur_obj_index = 0;
        }
    }

    fn write_event(&self, frame: &TraceEventFrame) {
        let mut ring = self.ring.lock();
        if self.max_records == 0 {
            return;
        }

        let offset = self.frame_offset(ring.cur_index);
        frame.serialize(&self.layout, &mut ring.buf[offset..]);

        ring.cur_index += 1;
        if ring.cur_index >= self.max_records {
            ring.cur_index = 0;
        }
    }

    fn reset(&self) {
        let mut ring = self.ring.lock();
        let start = self.head.frame_offset as usize;
        let end = start + self.max_records * self.layout.frame_size();
        ring.buf[start..end].fill(0);
        ring.cur_index = 0;
    }

    fn dump(&self, to_client: bool) {
        let (image, cur_index, cur_obj_index) = {
            let ring = self.ring.lock();
            (ring.buf.clone(), ring.cur_index, ring.cur_obj_index)
        };

        if to_client {
            self.send_info(&image);
        } else {
            self.platform.print(&self.render(&image, cur_index, cur_obj_index));
        }
    }

    fn image(&self) -> Option<Vec<u8>> {
        Some(self.ring.lock().buf.clone())
    }

    fn read_image(&self, dest: &mut [u8]) -> Option<usize> {
        let ring = self.ring.lock();
        let n = dest.len().min(ring.buf.len());
        dest[..n].copy_from_slice(&ring.buf[..n]);
        Some(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing_common::FakePlatform;
    use crate::trace::pipeline::{LoopbackPipeline, NullPipeline};
    use crate::trace::TracePipeline;

    fn recorder_with(
        config: &TraceConfig,
        pipeline: Box<dyn TracePipeline>,
    ) -> (Arc<FakePlatform>, OfflineRecorder) {
        let platform = Arc::new(FakePlatform::new(1));
        let transport = Arc::new(
            Transport::new(
                platform.clone(),
                config.lock_mode,
                pipeline,
                config.tlv_buf_size,
                config.layout,
            )
            .unwrap(),
        );
        let recorder = OfflineRecorder::new(platform.clone(), config, transport).unwrap();
        (platform, recorder)
    }

    fn recorder(records: usize) -> (Arc<FakePlatform>, OfflineRecorder) {
        recorder_with(&TraceConfig::offline_with_records(records), Box::new(NullPipeline))
    }

    fn frame(event_type: u32, cur_time: u64) -> TraceEventFrame {
        TraceEventFrame {
            event_type,
            cur_time,
            ..TraceEventFrame::default()
        }
    }

    #[test]
    fn too_small_buffer_fails() {
        let config = TraceConfig::offline_with_records(0);
        let platform = Arc::new(FakePlatform::new(1));
        let transport = Arc::new(
            Transport::new(
                platform.clone(),
                LockMode::Smp,
                Box::new(NullPipeline),
                100,
                config.layout,
            )
            .unwrap(),
        );
        let needed = config.head_size();
        assert_eq!(
            OfflineRecorder::new(platform, &config, transport).err(),
            Some(TraceError::BufTooSmall {
                size: needed,
                needed
            })
        );
    }

    #[test]
    fn header_is_stamped() {
        let (_, recorder) = recorder(4);
        let image = recorder.image().unwrap();
        let head = OfflineHead::deserialize::<NativeEndian>(&image);
        assert_eq!(head.marker, TRACE_BIGLITTLE_WORD);
        assert_eq!(head.version, 0);
        assert_eq!(head.obj_size, 40);
        assert_eq!(head.frame_size, 60);
        assert_eq!(head.obj_offset, 32);
        assert_eq!(head.frame_offset, 32 + 40 * 32);
        assert_eq!(head.total_len as usize, image.len());
        assert_eq!(recorder.max_records(), 4);
    }

    #[test]
    fn ring_wraps_over_the_oldest_frame() {
        let (_, recorder) = recorder(3);
        for i in 1..=4 {
            recorder.write_event(&frame(0x45, i));
        }
        assert_eq!(recorder.cur_index(), 1);
        assert_eq!(recorder.frame(0).unwrap().cur_time, 4);
        assert_eq!(recorder.frame(1).unwrap().cur_time, 2);
        assert_eq!(recorder.frame(2).unwrap().cur_time, 3);
        assert_eq!(recorder.frame(3), None);
    }

    #[test]
    fn reset_clears_frames_but_keeps_objects() {
        let (platform, recorder) = recorder(2);
        platform.add_task(5, 10, "worker");
        recorder.obj_add(5);
        recorder.write_event(&frame(0x45, 7));

        recorder.reset();
        assert_eq!(recorder.cur_index(), 0);
        assert!(recorder.frame(0).unwrap().is_empty());
        assert_eq!(recorder.obj(0).unwrap().name_str(), "worker");
    }

    #[test]
    fn object_adds_bump_the_generation() {
        let (platform, recorder) = recorder(1);
        platform.add_task(5, 10, "worker");
        assert_eq!(recorder.mask_tid(5), 5);

        recorder.obj_add(5);
        recorder.obj_add(5);
        assert_eq!(recorder.mask_tid(5), 0x0002_0005);
        assert_eq!(recorder.mask_tid(500), 500);

        let first = recorder.obj(0).unwrap();
        assert_eq!((first.id, first.prio), (0x0001_0005, 10));
        assert_eq!(recorder.obj(1).unwrap().id, 0x0002_0005);
        assert_eq!(recorder.cur_obj_index(), 2);
    }

    #[test]
    fn object_table_wraps_and_can_be_disabled() {
        let mut config = TraceConfig::offline_with_records(1);
        config.obj_max_num = 2;
        config.buffer_size = config.head_size() + 60;
        let (_, recorder) = recorder_with(&config, Box::new(NullPipeline));
        for id in 1..=3 {
            recorder.obj_add(id);
        }
        assert_eq!(recorder.cur_obj_index(), 1);
        assert_eq!(recorder.obj(0).unwrap().id & 0xFFFF, 3);

        config.obj_max_num = 0;
        config.buffer_size = config.head_size() + 60;
        let (_, recorder) = recorder_with(&config, Box::new(NullPipeline));
        recorder.obj_add(1);
        assert_eq!(recorder.cur_obj_index(), 0);
        assert_eq!(recorder.mask_tid(1), 1);
    }

    #[test]
    fn dump_to_client_sends_everything() {
        let client = LoopbackPipeline::new();
        let (_, recorder) =
            recorder_with(&TraceConfig::offline_with_records(2), Box::new(client.clone()));
        recorder.dump(true);

        let sent = client.take_sent();
        assert_eq!(sent.len(), 1 + 32 + 2);
        assert_eq!(sent[0][1], MsgType::Head as u8);
        assert_eq!(sent[1][1], MsgType::Obj as u8);
        assert_eq!(sent[34][1], MsgType::Event as u8);
    }
}
