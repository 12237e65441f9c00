//! Transports that carry encoded trace messages to a client, and client
//! commands back.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::Arc;
use std::time::Duration;

pub trait TracePipeline: Send + Sync {
    fn init(&self) -> io::Result<()> {
        Ok(())
    }

    /// Sends one encoded message.
    fn data_send(&self, data: &[u8]) -> io::Result<()>;

    /// Reads received bytes into `buf`. A zero `timeout` does not wait.
    fn data_recv(&self, buf: &mut [u8], timeout: Duration) -> io::Result<usize>;

    /// Blocks until data can be received. An error means no more data will
    /// ever arrive.
    fn wait(&self) -> io::Result<()>;
}

/// Drops everything and never receives.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullPipeline;

impl TracePipeline for NullPipeline {
    fn data_send(&self, _data: &[u8]) -> io::Result<()> {
        Ok(())
    }

    fn data_recv(&self, _buf: &mut [u8], _timeout: Duration) -> io::Result<usize> {
        Ok(0)
    }

    fn wait(&self) -> io::Result<()> {
        Err(io::Error::new(io::ErrorKind::Unsupported, "null pipeline"))
    }
}

/// A byte stream such as a serial port, split into its two directions.
pub struct SerialPipeline {
    tx: Mutex<Box<dyn Write + Send>>,
    rx: Option<Mutex<Box<dyn Read + Send>>>,
}

impl SerialPipeline {
    pub fn new(tx: Box<dyn Write + Send>, rx: Option<Box<dyn Read + Send>>) -> SerialPipeline {
        SerialPipeline {
            tx: Mutex::new(tx),
            rx: rx.map(Mutex::new),
        }
    }
}

impl TracePipeline for SerialPipeline {
    fn data_send(&self, data: &[u8]) -> io::Result<()> {
        let mut tx = self.tx.lock();
        tx.write_all(data)?;
        tx.flush()
    }

    fn data_recv(&self, buf: &mut [u8], _timeout: Duration) -> io::Result<usize> {
        match self.rx {
            Some(ref rx) => rx.lock().read(buf),
            None => Ok(0),
        }
    }

    fn wait(&self) -> io::Result<()> {
        if self.rx.is_some() {
            Ok(())
        } else {
            Err(io::Error::new(io::ErrorKind::Unsupported, "serial pipeline has no input"))
        }
    }
}

#[derive(Default)]
struct LoopbackState {
    /// Client to kernel.
    inbound: VecDeque<u8>,
    /// Kernel to client, one entry per message.
    outbound: Vec<Vec<u8>>,
    closed: bool,
}

#[derive(Default)]
struct LoopbackShared {
    state: Mutex<LoopbackState>,
    readable: Condvar,
}

/// In-process pipeline. Clones share the same channel; one clone is handed
/// to the tracer and the other plays the client.
#[derive(Clone, Default)]
pub struct LoopbackPipeline {
    shared: Arc<LoopbackShared>,
}

impl LoopbackPipeline {
    pub fn new() -> LoopbackPipeline {
        LoopbackPipeline::default()
    }

    /// Client side: queues bytes for the tracer.
    pub fn client_send(&self, data: &[u8]) {
        let mut state = self.shared.state.lock();
        state.inbound.extend(data);
        self.shared.readable.notify_all();
    }

    /// Client side: takes every message sent so far.
    pub fn take_sent(&self) -> Vec<Vec<u8>> {
        std::mem::take(&mut self.shared.state.lock().outbound)
    }

    pub fn sent_count(&self) -> usize {
        self.shared.state.lock().outbound.len()
    }

    /// Wakes up and fails every waiter.
    pub fn close(&self) {
        self.shared.state.lock().closed = true;
        self.shared.readable.notify_all();
    }
}

impl TracePipeline for LoopbackPipeline {
    fn data_send(&self, data: &[u8]) -> io::Result<()> {
        let mut state = self.shared.state.lock();
        if state.closed {
            return Err(io::ErrorKind::BrokenPipe.into());
        }
        state.outbound.push(data.to_vec());
        Ok(())
    }

    fn data_recv(&self, buf: &mut [u8], timeout: Duration) -> io::Result<usize> {
        let mut state = self.shared.state.lock();
        if state.inbound.is_empty() && !state.closed && timeout > Duration::ZERO {
            let _ = self.shared.readable.wait_for(&mut state, timeout);
        }

        let n = buf.len().min(state.inbound.len());
        for (dst, src) in buf.iter_mut().zip(state.inbound.drain(..n)) {
            *dst = src;
        }
        Ok(n)
    }

    fn wait(&self) -> io::Result<()> {
        let mut state = self.shared.state.lock();
        while state.inbound.is_empty() && !state.closed {
            self.shared.readable.wait(&mut state);
        }
        if state.inbound.is_empty() {
            Err(io::ErrorKind::BrokenPipe.into())
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn loopback_wakes_waiter() {
        let kernel = LoopbackPipeline::new();
        let client = kernel.clone();

        let waiter = thread::spawn(move || {
            kernel.wait().unwrap();
            let mut buf = [0u8; 4];
            let n = kernel.data_recv(&mut buf, Duration::ZERO).unwrap();
            (n, buf)
        });

        client.client_send(&[1, 2, 3]);
        assert_eq!(waiter.join().unwrap(), (3, [1, 2, 3, 0]));
    }

    #[test]
    fn loopback_close_fails_wait() {
        let pipeline = LoopbackPipeline::new();
        pipeline.data_send(&[9]).unwrap();
        pipeline.close();

        assert!(pipeline.wait().is_err());
        assert!(pipeline.data_send(&[9]).is_err());
        assert_eq!(pipeline.take_sent(), vec![vec![9]]);
    }

    #[test]
    fn serial_writes_through() {
        let sink = Arc::new(Mutex::new(Vec::new()));

        struct Shared(Arc<Mutex<Vec<u8>>>);
        impl Write for Shared {
            fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
                self.0.lock().extend_from_slice(buf);
                Ok(buf.len())
            }
            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }

        let pipeline = SerialPipeline::new(Box::new(Shared(sink.clone())), None);
        pipeline.data_send(&[0xFF, 0]).unwrap();
        assert_eq!(*sink.lock(), vec![0xFF, 0]);
        assert!(pipeline.wait().is_err());

        let input: &[u8] = &[1, 2, 3, 4, 5, 6, 0x0D];
        let pipeline = SerialPipeline::new(Box::new(io::sink()), Some(Box::new(input)));
        pipeline.wait().unwrap();
        let mut cmd = [0u8; 7];
        assert_eq!(pipeline.data_recv(&mut cmd, Duration::ZERO).unwrap(), 7);
    }
}
