#![cfg(feature = "pipeline")]

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use typewire::frame::{Envelope, FrameConfig};
use typewire::messages::{register_demo_types, Ping, SensorReading, StringCommand};
use typewire::pipeline::{
    replay_file, DiscardHandler, Logger, SerializationManager, ServiceConfig,
};
use typewire::registry::TypeRegistry;
use typewire::transport::MemoryDevice;

fn temp_log(tag: &str) -> PathBuf {
    std::env::temp_dir().join(format!(
        "typewire-{tag}-{}-{}.log",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("time should be after epoch")
            .as_nanos()
    ))
}

fn fast() -> ServiceConfig {
    ServiceConfig {
        manifest_request_interval_ms: 20,
        ..ServiceConfig::default()
    }
}

#[test]
fn logged_traffic_replays_with_identical_dispatch() {
    let path = temp_log("replay");

    let sender = SerializationManager::new(fast());
    // registered in a different order than the receiver
    sender.register::<SensorReading>("LISData", 1).unwrap();
    sender.register::<Ping>("PingData", 1).unwrap();
    sender.register::<StringCommand>("StrCmdData", 1).unwrap();

    let receiver = SerializationManager::new(fast());
    register_demo_types(receiver.registry()).unwrap();
    let live = Arc::new(Mutex::new(Vec::new()));
    let live_sink = Arc::clone(&live);

    let (dev_s, dev_r) = MemoryDevice::pair();
    sender.start_service(Arc::new(dev_s), DiscardHandler).unwrap();
    receiver
        .start_service(Arc::new(dev_r), move |env: &Envelope| {
            live_sink.lock().unwrap().push(format!("{env:?}"));
        })
        .unwrap();
    assert!(sender.wait_for_manifest(Duration::from_secs(5)));
    assert!(receiver.wait_for_manifest(Duration::from_secs(5)));

    receiver
        .start_logger(Logger::create(&path, FrameConfig::default()).unwrap())
        .unwrap();
    sender.send(StringCommand::new("arm")).unwrap();
    sender.send(Ping::new(5)).unwrap();
    sender.send(SensorReading::new(-1, 0, 1)).unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    while receiver.stats().logged < 3 && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(receiver.stats().logged, 3);
    assert!(receiver.stop_logger());
    sender.stop_service();
    receiver.stop_service();

    let offline = Arc::new(TypeRegistry::new());
    register_demo_types(&offline).unwrap();
    let replayed = Arc::new(Mutex::new(Vec::new()));
    let replay_sink = Arc::clone(&replayed);
    let stats = replay_file(
        &offline,
        &path,
        move |env: &Envelope| {
            replay_sink.lock().unwrap().push(format!("{env:?}"));
        },
        FrameConfig::default(),
    )
    .unwrap();

    assert_eq!(*replayed.lock().unwrap(), *live.lock().unwrap());
    assert_eq!(stats.dispatched, 3);
    assert_eq!(stats.manifests_applied, 1);
    assert_eq!(stats.link.checksum_failures, 0);
    let _ = std::fs::remove_file(&path);
}

#[test]
fn corrupted_log_drops_only_damaged_frames() {
    let path = temp_log("corrupt");
    let registry = TypeRegistry::new();
    register_demo_types(&registry).unwrap();
    let ping = registry.id_of::<Ping>().unwrap();

    let logger = Logger::create(&path, FrameConfig::default()).unwrap();
    logger.write_manifest(&registry.extract_manifest()).unwrap();
    for ms in [10, 20, 30] {
        logger.log(&Envelope::new(ping, Box::new(Ping::new(ms)))).unwrap();
    }
    logger.close();

    // a ping frame is 3 header bytes + 4 payload bytes + 1 checksum; flip a
    // payload byte of the middle one
    let mut bytes = std::fs::read(&path).unwrap();
    let middle = bytes.len() - 2 * 8 + 4;
    bytes[middle] ^= 0x01;
    std::fs::write(&path, &bytes).unwrap();

    let offline = Arc::new(TypeRegistry::new());
    register_demo_types(&offline).unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let stats = replay_file(
        &offline,
        &path,
        move |env: &Envelope| {
            if let Some(p) = env.downcast_ref::<Ping>() {
                sink.lock().unwrap().push(p.timestamp_ms);
            }
        },
        FrameConfig::default(),
    )
    .unwrap();

    assert_eq!(*seen.lock().unwrap(), vec![10, 30]);
    assert_eq!(stats.link.checksum_failures, 1);
    let _ = std::fs::remove_file(&path);
}
