use super::frame::{ObjData, TraceEventFrame};
use crate::platform::Platform;

/// Where captured frames and task objects end up. One implementation per
/// [`TraceMode`](super::TraceMode).
pub trait TraceSink: Send + Sync {
    /// Identity recorded for task `tid`.
    fn mask_tid(&self, tid: u32) -> u32;

    fn obj_add(&self, task_id: u32);

    fn write_event(&self, frame: &TraceEventFrame);

    /// Drops recorded frames.
    fn reset(&self);

    fn dump(&self, to_client: bool);

    fn notify_start(&self) {}

    fn notify_stop(&self) {}

    /// The raw recording, if this sink keeps one.
    fn image(&self) -> Option<Vec<u8>> {
        None
    }

    /// Copies the start of the raw recording into `dest`.
    fn read_image(&self, _dest: &mut [u8]) -> Option<usize> {
        None
    }
}

/// Object describing task `task_id`, recorded under `id`.
pub(crate) fn task_obj(platform: &dyn Platform, task_id: u32, id: u32) -> ObjData {
    let mut obj = ObjData {
        id,
        ..ObjData::default()
    };
    // Keep the last byte as terminator.
    let name_len = obj.name.len() - 1;
    obj.prio = platform
        .task_info(task_id, &mut obj.name[..name_len])
        .unwrap_or(0);
    obj
}
