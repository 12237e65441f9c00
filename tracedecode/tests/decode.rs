use byteorder::{BigEndian, ByteOrder};
use perftrace::testing_common::{FakePlatform, FAKE_CLOCK_FREQ};
use perftrace::trace::events::{HWI_RESPONSE_IN, TASK_CREATE, TASK_SWITCH};
use perftrace::trace::{
    CoreInfo, FrameLayout, LoopbackPipeline, NullPipeline, ObjData, OfflineHead,
    TRACE_BIGLITTLE_WORD,
};
use perftrace::{TraceConfig, Tracer};
use std::sync::Arc;
use tracedecode::tlv::{decode_stream, event_records, events_by_time, object_records, objects};
use tracedecode::{Endianness, OfflineDump, TlvMessage};

#[test]
fn recorded_image_round_trips() {
    let platform = Arc::new(FakePlatform::new(2));
    platform.add_task(3, 20, "sensor");
    platform.add_task(4, 25, "logger");
    let tracer = Arc::new(
        Tracer::new(
            platform.clone(),
            TraceConfig::offline_with_records(3),
            Box::new(NullPipeline),
        )
        .unwrap(),
    );
    tracer.init().unwrap();

    tracer.hook(TASK_CREATE, 3, &[0, 20]);
    tracer.hook(TASK_CREATE, 4, &[0, 25]);
    platform.set_task(3);
    tracer.hook(TASK_SWITCH, 4, &[1, 2]);
    platform.set_task(4);
    platform.set_cpu(1);
    // Overwrites the first create.
    tracer.hook(HWI_RESPONSE_IN, 50, &[]);

    let dump = OfflineDump::parse(&tracer.record().unwrap()).unwrap();
    assert_eq!(dump.endianness(), native());
    assert_eq!(dump.header().clock_freq, FAKE_CLOCK_FREQ);
    assert_eq!(dump.frames().len(), 3);

    let names = dump.task_names();
    assert_eq!(names.get(&0x0001_0003), Some(&"sensor"));
    assert_eq!(names.get(&0x0001_0004), Some(&"logger"));

    let records = dump.event_records();
    let types: Vec<u32> = records.iter().map(|r| r.event_type).collect();
    assert_eq!(types, vec![TASK_CREATE, TASK_SWITCH, HWI_RESPONSE_IN]);
    assert!(records.windows(2).all(|w| w[0].time < w[1].time));

    let switch = &records[1];
    assert_eq!(switch.event_name, Some("TASK_SWITCH"));
    assert_eq!(switch.identity, 0x0001_0004);
    assert_eq!(switch.task, 0x0001_0003);
    assert_eq!(switch.task_name.as_deref(), Some("sensor"));
    assert_eq!(switch.params, vec![1, 2]);
    assert_eq!(records[2].cpu, Some(1));
    assert_eq!(records[2].event_count, Some(3));

    let json = serde_json::to_value(&records[2]).unwrap();
    assert_eq!(json["event_name"], "HWI_RESPONSE_IN");
    assert_eq!(json["identity"], 50);
}

fn native() -> Endianness {
    if cfg!(target_endian = "big") {
        Endianness::Big
    } else {
        Endianness::Little
    }
}

#[test]
fn big_endian_image_is_detected() {
    let layout = FrameLayout::default();
    let head_size = OfflineHead::SIZE + ObjData::SIZE;
    let total = head_size + layout.frame_size();
    let mut bytes = vec![0u8; total];

    BigEndian::write_u32_into(
        &[
            TRACE_BIGLITTLE_WORD,
            0,
            24_000_000,
            ObjData::SIZE as u32,
            layout.frame_size() as u32,
            OfflineHead::SIZE as u32,
            head_size as u32,
            total as u32,
        ],
        &mut bytes[..OfflineHead::SIZE],
    );

    let obj = &mut bytes[OfflineHead::SIZE..head_size];
    BigEndian::write_u32(&mut obj[0..4], 7);
    BigEndian::write_u32(&mut obj[4..8], 9);
    obj[8..12].copy_from_slice(b"idle");

    let frame = &mut bytes[head_size..];
    BigEndian::write_u32(&mut frame[0..4], TASK_SWITCH);
    BigEndian::write_u32(&mut frame[4..8], 7);
    BigEndian::write_u32(&mut frame[8..12], 1);
    BigEndian::write_u64(&mut frame[12..20], 0x1122_3344);
    BigEndian::write_u64(&mut frame[20..28], 5000);
    let core = CoreInfo {
        cpu_id: 2,
        hwi_active: false,
        task_lock_cnt: 1,
        param_count: 1,
    };
    BigEndian::write_u32(&mut frame[28..32], core.pack());
    BigEndian::write_u32(&mut frame[32..36], 42);
    BigEndian::write_u64(&mut frame[36..44], 0xAB);

    let dump = OfflineDump::parse(&bytes).unwrap();
    assert_eq!(dump.endianness(), Endianness::Big);
    assert_eq!(dump.header().clock_freq, 24_000_000);
    assert_eq!(dump.objects()[0].name_str(), "idle");

    let records = dump.event_records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].identity, 0x1122_3344);
    assert_eq!(records[0].time, 5000);
    assert_eq!(records[0].cpu, Some(2));
    assert_eq!(records[0].event_count, Some(42));
    assert_eq!(records[0].params, vec![0xAB]);
    assert_eq!(records[0].task_name.as_deref(), Some("idle"));
}

#[test]
fn online_capture_decodes() {
    let platform = Arc::new(FakePlatform::new(1));
    platform.add_task(1, 31, "idle");
    let client = LoopbackPipeline::new();
    let tracer = Arc::new(
        Tracer::new(platform.clone(), TraceConfig::online(), Box::new(client.clone())).unwrap(),
    );
    tracer.init().unwrap();
    tracer.start().unwrap();
    tracer.hook(TASK_SWITCH, 1, &[3]);
    tracer.hook(HWI_RESPONSE_IN, 60, &[]);
    tracer.stop().unwrap();

    let capture: Vec<u8> = client.take_sent().concat();
    let messages = decode_stream(&capture).unwrap();
    assert_eq!(messages.len(), 6);
    assert!(matches!(
        messages[1],
        TlvMessage::Head {
            marker: TRACE_BIGLITTLE_WORD,
            version: 1,
            clock_freq: FAKE_CLOCK_FREQ,
        }
    ));

    let objs = objects(&messages);
    assert_eq!(objs.len(), 1);
    assert_eq!((objs[0].id, objs[0].prio, objs[0].name_str()), (1, 31, "idle"));

    let frames = events_by_time(&messages, &FrameLayout::default());
    assert_eq!(frames.len(), 2);
    assert_eq!(frames[0].event_type, TASK_SWITCH);
    assert_eq!(frames[0].params[0], 3);
    assert_eq!(frames[1].identity, 60);

    let records = event_records(&messages, &FrameLayout::default());
    assert_eq!(records[0].task_name.as_deref(), Some("idle"));
    assert_eq!(records[1].event_name, Some("HWI_RESPONSE_IN"));
    assert_eq!(object_records(&messages)[0].name, "idle");

    let json = serde_json::to_string(&messages[0]).unwrap();
    assert!(json.starts_with("{\"type\":\"notify\""));
}
