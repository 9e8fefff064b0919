use std::sync::Arc;

use typewire::frame::{FrameCodec, FrameConfig};
use typewire::messages::{Ping, SensorReading, StringCommand};
use typewire::registry::{Manifest, TypeRegistry, MANIFEST_TYPE_ID};
use typewire::transport::MemoryDevice;

/// A knows {StringCommand, Ping}; B knows {Ping, SensorReading}, so Ping has
/// a different local id on each side.
fn endpoints() -> (TypeRegistry, TypeRegistry) {
    let a = TypeRegistry::new();
    a.register::<StringCommand>("StrCmdData", 1).unwrap();
    a.register::<Ping>("PingData", 1).unwrap();

    let b = TypeRegistry::new();
    b.register::<Ping>("PingData", 1).unwrap();
    b.register::<SensorReading>("LISData", 1).unwrap();
    (a, b)
}

#[test]
fn manifests_converge_to_mutual_translation() {
    let (a, b) = endpoints();
    let ping_a = a.id_of::<Ping>().unwrap();
    let ping_b = b.id_of::<Ping>().unwrap();
    assert_ne!(ping_a, ping_b);

    assert_eq!(a.apply_manifest(&b.extract_manifest()), 3);
    assert_eq!(b.apply_manifest(&a.extract_manifest()), 3);

    assert!(a.is_own_enabled(ping_a));
    assert!(b.is_own_enabled(ping_b));
    assert_eq!(a.translate(ping_b), Some(ping_a));
    assert_eq!(b.translate(ping_a), Some(ping_b));
    assert!(a.is_manifest_received());
    assert!(b.is_manifest_received());
}

#[test]
fn types_missing_on_the_peer_stay_disabled() {
    let (a, b) = endpoints();
    a.apply_manifest(&b.extract_manifest());
    b.apply_manifest(&a.extract_manifest());

    let cmd = a.id_of::<StringCommand>().unwrap();
    let sensor = b.id_of::<SensorReading>().unwrap();
    assert!(!a.is_own_enabled(cmd));
    assert!(!b.is_own_enabled(sensor));
    assert!(!b.is_foreign_enabled(cmd));
    assert!(!a.is_foreign_enabled(sensor));
}

#[test]
fn manifests_exchanged_over_a_link_enable_decoding() {
    let (a, b) = endpoints();
    let (dev_a, dev_b) = MemoryDevice::pair();
    let link_a = FrameCodec::with_device(Arc::new(dev_a), FrameConfig::default());
    let link_b = FrameCodec::with_device(Arc::new(dev_b), FrameConfig::default());

    link_a
        .write_frame(MANIFEST_TYPE_ID, &a.extract_manifest())
        .unwrap();
    let env = link_b.read_frame(&b).unwrap().unwrap();
    let manifest = env
        .downcast_ref::<Manifest>()
        .unwrap();
    b.apply_manifest(manifest);

    // a frames Ping under its own id; b decodes it under b's id
    link_a
        .write_frame(a.id_of::<Ping>().unwrap(), &Ping::new(77))
        .unwrap();
    let env = link_b.read_frame(&b).unwrap().unwrap();
    assert_eq!(env.id(), b.id_of::<Ping>().unwrap());
    assert_eq!(env.downcast_ref::<Ping>(), Some(&Ping::new(77)));

    // a type b never heard of is skipped by the header scan
    link_a
        .write_frame(a.id_of::<StringCommand>().unwrap(), &StringCommand::new("x"))
        .unwrap();
    link_a
        .write_frame(a.id_of::<Ping>().unwrap(), &Ping::new(78))
        .unwrap();
    let env = link_b.read_frame(&b).unwrap().unwrap();
    assert_eq!(env.downcast_ref::<Ping>(), Some(&Ping::new(78)));
    assert!(link_b.stats().header_rejects >= 1);
}
