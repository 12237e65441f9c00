#[macro_use]
extern crate prettytable;

use std::error::Error;
use std::fs::File;
use std::path::PathBuf;

use clap::Parser;
use memmap2::Mmap;
use perftrace::trace::FrameLayout;
use prettytable::Table;
use serde_json::json;
use tracedecode::tlv::{self, TlvMessage};
use tracedecode::{EventRecord, ObjRecord, OfflineDump};

#[derive(Parser, Debug)]
struct Opt {
    /// Image read back from the trace device, or a capture of the client
    /// pipeline with `--tlv`
    file: PathBuf,
    /// Decode a capture of online TLV messages
    #[arg(long = "tlv")]
    tlv: bool,
    /// Parameters recorded per event
    #[arg(long = "params", default_value_t = 3)]
    params: usize,
    /// Return addresses recorded per event
    #[arg(long = "backtrace", default_value_t = 0)]
    backtrace: usize,
    /// The recorder was built without cpu/interrupt info
    #[arg(long = "no-core")]
    no_core: bool,
    /// The recorder was built without event counters
    #[arg(long = "no-count")]
    no_count: bool,
    /// Print json instead of tables
    #[arg(long = "json")]
    json: bool,
}

impl Opt {
    fn layout(&self) -> FrameLayout {
        FrameLayout {
            core_msg: !self.no_core,
            event_count: !self.no_count,
            backtrace_depth: self.backtrace,
            max_params: self.params,
        }
    }
}

fn print_objects(objects: &[ObjRecord]) {
    let mut table = Table::new();
    table.add_row(row!["Index", "TaskID", "Priority", "Name"]);
    for obj in objects {
        table.add_row(row![
            obj.index,
            format!("{:#x}", obj.id),
            obj.prio,
            obj.name,
        ]);
    }
    table.printstd();
}

fn print_events(events: &[EventRecord]) {
    let mut table = Table::new();
    table.add_row(row![
        "Time(cycles)",
        "Event",
        "CPU",
        "Task",
        "Identity",
        "Count",
        "Params",
    ]);
    for event in events {
        let name = match event.event_name {
            Some(name) => name.to_string(),
            None => format!("{:#x}", event.event_type),
        };
        let task = match &event.task_name {
            Some(task_name) => format!("{:#x} ({})", event.task, task_name),
            None => format!("{:#x}", event.task),
        };
        let params: Vec<String> = event.params.iter().map(|p| format!("{:#x}", p)).collect();
        table.add_row(row![
            event.time,
            name,
            event.cpu.map(|c| c.to_string()).unwrap_or_default(),
            task,
            format!("{:#x}", event.identity),
            event.event_count.map(|c| c.to_string()).unwrap_or_default(),
            params.join(" "),
        ]);
    }
    table.printstd();
}

fn dump_offline(opt: &Opt, bytes: &[u8]) -> Result<(), Box<dyn Error + Send + Sync>> {
    let dump = OfflineDump::parse_with_layout(bytes, opt.layout())?;
    let objects = dump.object_records();
    let events = dump.event_records();

    if opt.json {
        let out = json!({
            "endianness": dump.endianness(),
            "clock_freq": dump.header().clock_freq,
            "objects": objects,
            "events": events,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!(
        "{:?} endian, clock {} Hz, {} slots",
        dump.endianness(),
        dump.header().clock_freq,
        dump.frames().len()
    );
    print_objects(&objects);
    print_events(&events);
    Ok(())
}

fn dump_tlv(opt: &Opt, bytes: &[u8]) -> Result<(), Box<dyn Error + Send + Sync>> {
    let messages = tlv::decode_stream(bytes)?;
    let layout = opt.layout();

    if opt.json {
        println!("{}", serde_json::to_string_pretty(&messages)?);
        return Ok(());
    }

    for message in &messages {
        match message {
            TlvMessage::Head { clock_freq, .. } => println!("session, clock {} Hz", clock_freq),
            TlvMessage::Notify { cmd, param } => {
                println!("notify cmd {:#x} param {:#x}", cmd, param)
            }
            _ => {}
        }
    }
    print_objects(&tlv::object_records(&messages));
    print_events(&tlv::event_records(&messages, &layout));
    Ok(())
}

fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    let opt = Opt::parse();

    let file = File::open(&opt.file)?;
    // The file is only read while mapped.
    let bytes = unsafe { Mmap::map(&file)? };

    if opt.tlv {
        dump_tlv(&opt, &bytes)
    } else {
        dump_offline(&opt, &bytes)
    }
}
