use super::config::TraceMode;
use super::events::{SYS_START, SYS_STOP};
use super::frame::{ObjData, OfflineHead, TraceEventFrame, TRACE_BIGLITTLE_WORD, TRACE_CTL_MAGIC};
use super::sink::{task_obj, TraceSink};
use super::tlv::MsgType;
use super::transport::Transport;
use crate::platform::Platform;
use log::debug;
use std::sync::Arc;

/// Streams every record to the client as soon as it is captured. Nothing is
/// kept, so there is nothing to reset or dump.
pub struct OnlineSink {
    platform: Arc<dyn Platform>,
    transport: Arc<Transport>,
}

impl OnlineSink {
    pub fn new(platform: Arc<dyn Platform>, transport: Arc<Transport>) -> OnlineSink {
        OnlineSink {
            platform,
            transport,
        }
    }

    fn send_obj(&self, task_id: u32) {
        let obj = task_obj(&*self.platform, task_id, task_id);
        let mut bytes = [0u8; ObjData::SIZE];
        obj.serialize(&mut bytes);
        self.transport.send(MsgType::Obj, &bytes);
    }

    fn send_head(&self) {
        let head = OfflineHead {
            marker: TRACE_BIGLITTLE_WORD,
            version: TraceMode::Online.version(),
            clock_freq: self.platform.clock_freq(),
            ..OfflineHead::default()
        };
        let mut bytes = [0u8; OfflineHead::SIZE];
        head.serialize(&mut bytes);
        self.transport
            .send(MsgType::Head, &bytes[..OfflineHead::BASE_INFO_SIZE]);
    }
}

impl TraceSink for OnlineSink {
    fn mask_tid(&self, tid: u32) -> u32 {
        tid
    }

    fn obj_add(&self, task_id: u32) {
        self.send_obj(task_id);
    }

    fn write_event(&self, frame: &TraceEventFrame) {
        self.transport.send_event(frame);
    }

    fn reset(&self) {}

    fn dump(&self, _to_client: bool) {
        debug!("OnlineSink: records are streamed, nothing to dump");
    }

    fn notify_start(&self) {
        self.transport.send_notify(SYS_START, TRACE_CTL_MAGIC);
        self.send_head();
        self.platform.for_each_task(&mut |task_id| self.send_obj(task_id));
    }

    fn notify_stop(&self) {
        self.transport.send_notify(SYS_STOP, TRACE_CTL_MAGIC);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::LockMode;
    use crate::testing_common::FakePlatform;
    use crate::trace::frame::FrameLayout;
    use crate::trace::pipeline::LoopbackPipeline;

    #[test]
    fn start_announces_head_and_tasks() {
        let platform = Arc::new(FakePlatform::new(1));
        platform.add_task(1, 0, "idle");
        platform.add_task(2, 5, "shell");

        let client = LoopbackPipeline::new();
        let transport = Arc::new(
            Transport::new(
                platform.clone(),
                LockMode::Smp,
                Box::new(client.clone()),
                100,
                FrameLayout::default(),
            )
            .unwrap(),
        );
        let sink = OnlineSink::new(platform, transport);

        sink.notify_start();
        sink.notify_stop();
        let types: Vec<u8> = client.take_sent().iter().map(|m| m[1]).collect();
        assert_eq!(types, vec![0, 1, 2, 2, 0]);
        assert_eq!(sink.mask_tid(7), 7);
    }
}
