//! Argument handling of the `trace_mask` and `trace_dump` shell commands.

use super::Tracer;
use crate::error::TraceError;

/// `trace_mask [ID]`: sets the event mask, or restores the default mask
/// when no argument is given.
pub fn trace_mask(tracer: &Tracer, args: &[&str]) -> Result<(), TraceError> {
    let mask = match args {
        [] => tracer.config().default_mask,
        [arg] => parse_ulong(arg),
        _ => {
            tracer.platform.print("\nUsage: trace_mask or trace_mask ID\n");
            return Err(TraceError::InvalidArgument("trace_mask takes at most one argument"));
        }
    };
    tracer.set_event_mask(mask);
    Ok(())
}

/// `trace_dump [1/0]`: dumps the recording, to the client when the
/// argument is non-zero.
pub fn trace_dump(tracer: &Tracer, args: &[&str]) -> Result<(), TraceError> {
    let to_client = match args {
        [] => false,
        [arg] => parse_ulong(arg) != 0,
        _ => {
            tracer.platform.print("\nUsage: trace_dump or trace_dump [1/0]\n");
            return Err(TraceError::InvalidArgument("trace_dump takes at most one argument"));
        }
    };
    tracer.dump(to_client)
}

/// Parses like `strtoul(arg, NULL, 0)`: `0x` prefix for hex, a leading `0`
/// for octal. Parsing stops at the first invalid digit.
fn parse_ulong(arg: &str) -> u32 {
    let arg = arg.trim_start();
    let (digits, radix) = if let Some(hex) = arg
        .strip_prefix("0x")
        .or_else(|| arg.strip_prefix("0X"))
    {
        (hex, 16)
    } else if arg.len() > 1 && arg.starts_with('0') {
        (&arg[1..], 8)
    } else {
        (arg, 10)
    };

    digits
        .chars()
        .map_while(|c| c.to_digit(radix))
        .fold(0u32, |acc, d| acc.wrapping_mul(radix).wrapping_add(d))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing_common::FakePlatform;
    use crate::trace::events::DEFAULT_MASK;
    use crate::trace::{NullPipeline, TraceConfig};
    use std::sync::Arc;

    fn tracer() -> (Arc<FakePlatform>, Arc<Tracer>) {
        let platform = Arc::new(FakePlatform::new(1));
        let tracer = Arc::new(
            Tracer::new(
                platform.clone(),
                TraceConfig::offline_with_records(2),
                Box::new(NullPipeline),
            )
            .unwrap(),
        );
        tracer.init().unwrap();
        (platform, tracer)
    }

    #[test]
    fn numbers_parse_like_strtoul() {
        assert_eq!(parse_ulong("0x2f0"), 0x2F0);
        assert_eq!(parse_ulong("0X10"), 0x10);
        assert_eq!(parse_ulong("010"), 8);
        assert_eq!(parse_ulong("96"), 96);
        assert_eq!(parse_ulong("0"), 0);
        assert_eq!(parse_ulong("12abc"), 12);
        assert_eq!(parse_ulong("zz"), 0);
    }

    #[test]
    fn mask_arguments() {
        let (platform, tracer) = tracer();
        trace_mask(&tracer, &["0x120"]).unwrap();
        assert_eq!(tracer.event_mask(), 0x120);

        trace_mask(&tracer, &[]).unwrap();
        assert_eq!(tracer.event_mask(), DEFAULT_MASK);

        assert!(trace_mask(&tracer, &["1", "2"]).is_err());
        assert_eq!(platform.console(), "\nUsage: trace_mask or trace_mask ID\n");
        assert_eq!(tracer.event_mask(), DEFAULT_MASK);
    }

    #[test]
    fn dump_arguments() {
        let (platform, tracer) = tracer();
        assert!(trace_dump(&tracer, &["1", "0"]).is_err());
        assert_eq!(platform.take_console(), "\nUsage: trace_dump or trace_dump [1/0]\n");

        tracer.stop().unwrap();
        trace_dump(&tracer, &["0"]).unwrap();
        assert!(platform.take_console().starts_with("*******TraceInfo begin*******"));
    }
}
