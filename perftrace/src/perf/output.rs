use crate::lock::{IrqLock, LockMode};
use crate::platform::Platform;
use log::{error, info};
use std::collections::VecDeque;
use std::sync::Arc;

pub type BufNotifyHook = Arc<dyn Fn() + Send + Sync>;

struct Inner {
    buf: VecDeque<u8>,
    capacity: usize,
    watermark: usize,
    notify: Option<BufNotifyHook>,
    flush: Option<BufNotifyHook>,
}

/// Bounded byte queue the sampler writes records into. A record that does
/// not fit is dropped whole.
pub struct PerfOutput {
    inner: IrqLock<Inner>,
}

impl PerfOutput {
    /// Fails when `capacity` bytes cannot be allocated.
    pub fn new(platform: Arc<dyn Platform>, mode: LockMode, capacity: usize) -> Option<PerfOutput> {
        let mut buf = VecDeque::new();
        if buf.try_reserve_exact(capacity).is_err() {
            error!("PerfOutput::new: could not allocate {} bytes", capacity);
            return None;
        }

        Some(PerfOutput {
            inner: IrqLock::new(
                platform,
                mode,
                Inner {
                    buf,
                    capacity,
                    watermark: capacity / 2,
                    notify: None,
                    flush: None,
                },
            ),
        })
    }

    pub fn set_notify_hook(&self, hook: Option<BufNotifyHook>) {
        self.inner.lock().notify = hook;
    }

    pub fn set_flush_hook(&self, hook: Option<BufNotifyHook>) {
        self.inner.lock().flush = hook;
    }

    /// Returns `false` when the record was dropped.
    pub fn write(&self, data: &[u8]) -> bool {
        let notify = {
            let mut inner = self.inner.lock();
            if inner.buf.len() + data.len() > inner.capacity {
                error!(
                    "PerfOutput::write: buffer full, dropping {} bytes ({} of {} used)",
                    data.len(),
                    inner.buf.len(),
                    inner.capacity
                );
                return false;
            }

            inner.buf.extend(data);
            if inner.buf.len() >= inner.watermark {
                inner.notify.clone()
            } else {
                None
            }
        };

        if let Some(notify) = notify {
            notify();
        }
        true
    }

    /// Moves up to `dest.len()` bytes out of the buffer.
    pub fn read(&self, dest: &mut [u8]) -> usize {
        let mut inner = self.inner.lock();
        let n = dest.len().min(inner.buf.len());
        for (dst, src) in dest.iter_mut().zip(inner.buf.drain(..n)) {
            *dst = src;
        }
        n
    }

    pub fn len(&self) -> usize {
        self.inner.lock().buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn flush(&self) {
        let flush = self.inner.lock().flush.clone();
        if let Some(flush) = flush {
            flush();
        }
    }

    pub fn log_info(&self) {
        let inner = self.inner.lock();
        info!(
            "PerfOutput: {} bytes of perf data pending ({} byte buffer)",
            inner.buf.len(),
            inner.capacity
        );
    }
}
