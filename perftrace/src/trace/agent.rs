//! The control agent: a thread that takes commands from the trace client.

use super::transport::Transport;
use super::Tracer;
use log::{debug, warn};
use std::io;
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Terminates every client command.
pub const TRACE_CMD_END_CHAR: u8 = 0x0D;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum TraceCmd {
    Start = 1,
    Stop = 2,
    SetEventMask = 3,
    RecordDump = 4,
}

impl TraceCmd {
    pub fn from_u8(value: u8) -> Option<TraceCmd> {
        match value {
            1 => Some(TraceCmd::Start),
            2 => Some(TraceCmd::Stop),
            3 => Some(TraceCmd::SetEventMask),
            4 => Some(TraceCmd::RecordDump),
            _ => None,
        }
    }
}

/// A command as sent by the client: the command byte, five parameter
/// bytes and the end byte.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TraceClientCmd {
    pub cmd: u8,
    pub params: [u8; 5],
    pub end: u8,
}

impl TraceClientCmd {
    pub const SIZE: usize = 7;

    pub fn parse(bytes: &[u8; Self::SIZE]) -> TraceClientCmd {
        let mut params = [0u8; 5];
        params.copy_from_slice(&bytes[1..6]);
        TraceClientCmd {
            cmd: bytes[0],
            params,
            end: bytes[6],
        }
    }

    pub fn is_valid(&self) -> bool {
        self.end == TRACE_CMD_END_CHAR && self.command().is_some()
    }

    pub fn command(&self) -> Option<TraceCmd> {
        TraceCmd::from_u8(self.cmd)
    }

    /// The event mask carried by `SetEventMask`, most significant byte first.
    pub fn mask(&self) -> u32 {
        u32::from_be_bytes([self.params[0], self.params[1], self.params[2], self.params[3]])
    }
}

pub(crate) fn handle(tracer: &Tracer, msg: &TraceClientCmd) {
    if !msg.is_valid() {
        debug!("trace agent: ignoring {:?}", msg);
        return;
    }

    let result = match msg.command() {
        Some(TraceCmd::Start) => tracer.start(),
        Some(TraceCmd::Stop) => tracer.stop(),
        Some(TraceCmd::SetEventMask) => {
            tracer.set_event_mask(msg.mask());
            Ok(())
        }
        Some(TraceCmd::RecordDump) => tracer.dump(true),
        None => Ok(()),
    };

    if let Err(e) = result {
        warn!("trace agent: {:?} failed: {}", msg.command(), e);
    }
}

/// Spawns the agent. It stops once the pipeline stops delivering or the
/// tracer is gone.
pub(crate) fn spawn(tracer: Weak<Tracer>, transport: Arc<Transport>) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("TraceAgent".to_string())
        .spawn(move || {
            while transport.wait() {
                let mut bytes = [0u8; TraceClientCmd::SIZE];
                transport.recv(&mut bytes, Duration::ZERO);

                let tracer = match tracer.upgrade() {
                    Some(tracer) => tracer,
                    None => break,
                };
                handle(&tracer, &TraceClientCmd::parse(&bytes));
            }
            debug!("trace agent exiting");
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing_common::FakePlatform;
    use crate::trace::{LoopbackPipeline, NullPipeline, TraceConfig, TraceState};

    fn cmd(bytes: [u8; 7]) -> TraceClientCmd {
        TraceClientCmd::parse(&bytes)
    }

    #[test]
    fn validity() {
        assert!(cmd([1, 0, 0, 0, 0, 0, 0x0D]).is_valid());
        assert!(cmd([4, 0, 0, 0, 0, 0, 0x0D]).is_valid());
        assert!(!cmd([5, 0, 0, 0, 0, 0, 0x0D]).is_valid());
        assert!(!cmd([0, 0, 0, 0, 0, 0, 0x0D]).is_valid());
        assert!(!cmd([1, 0, 0, 0, 0, 0, 0x0A]).is_valid());
        assert_eq!(cmd([3, 0x12, 0x34, 0x56, 0x78, 0, 0x0D]).mask(), 0x1234_5678);
    }

    #[test]
    fn commands_drive_the_tracer() {
        let platform = Arc::new(FakePlatform::new(1));
        let tracer = Arc::new(
            Tracer::new(platform, TraceConfig::online(), Box::new(NullPipeline)).unwrap(),
        );
        tracer.init().unwrap();

        handle(&tracer, &cmd([1, 0, 0, 0, 0, 0, 0x0D]));
        assert_eq!(tracer.state(), TraceState::Started);

        handle(&tracer, &cmd([3, 0x00, 0x00, 0x01, 0x2F, 0, 0x0D]));
        assert_eq!(tracer.event_mask(), 0x120);

        // Wrong terminator.
        handle(&tracer, &cmd([2, 0, 0, 0, 0, 0, 0x00]));
        assert_eq!(tracer.state(), TraceState::Started);

        handle(&tracer, &cmd([2, 0, 0, 0, 0, 0, 0x0D]));
        assert_eq!(tracer.state(), TraceState::Stopped);
    }

    #[test]
    fn agent_thread_serves_the_client() {
        let platform = Arc::new(FakePlatform::new(1));
        let client = LoopbackPipeline::new();
        let config = TraceConfig {
            control_agent: true,
            ..TraceConfig::online()
        };
        let tracer = Arc::new(Tracer::new(platform, config, Box::new(client.clone())).unwrap());
        tracer.init().unwrap();

        client.client_send(&[1, 0, 0, 0, 0, 0, 0x0D]);
        let started = (0..500).any(|_| {
            if tracer.state() == TraceState::Started {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
            false
        });
        assert!(started);

        client.close();
    }
}
