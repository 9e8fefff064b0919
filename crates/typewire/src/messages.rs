//! Demo payload types.
//!
//! These are the messages the `typewire` binary speaks. Applications define
//! their own types the same way: implement [`Message`] and register the type
//! under a stable name and version.

use std::time::{SystemTime, UNIX_EPOCH};

use typewire_frame::{Message, Result, WireReader, WireWriter};
use typewire_registry::TypeRegistry;

pub const STRING_COMMAND_NAME: &str = "StrCmdData";
pub const STRING_COMMAND_VERSION: u8 = 1;
pub const PING_NAME: &str = "PingData";
pub const PING_VERSION: u8 = 1;
pub const SENSOR_READING_NAME: &str = "LISData";
pub const SENSOR_READING_VERSION: u8 = 1;

/// Free-form text command.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StringCommand {
    pub text: String,
}

impl StringCommand {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

impl Message for StringCommand {
    fn write(&self, out: &mut WireWriter<'_>) -> Result<()> {
        out.write_str(&self.text)
    }

    fn read(&mut self, input: &mut WireReader<'_>) -> Result<()> {
        self.text = input.read_string()?;
        Ok(())
    }
}

/// Liveness probe carrying the sender's wall clock in milliseconds,
/// truncated to 32 bits.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Ping {
    pub timestamp_ms: u32,
}

impl Ping {
    pub fn new(timestamp_ms: u32) -> Self {
        Self { timestamp_ms }
    }

    pub fn now() -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();
        Self {
            timestamp_ms: millis as u32,
        }
    }
}

impl Message for Ping {
    fn write(&self, out: &mut WireWriter<'_>) -> Result<()> {
        out.write_u32(self.timestamp_ms);
        Ok(())
    }

    fn read(&mut self, input: &mut WireReader<'_>) -> Result<()> {
        self.timestamp_ms = input.read_u32()?;
        Ok(())
    }
}

/// Three-axis accelerometer sample.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SensorReading {
    pub x: i16,
    pub y: i16,
    pub z: i16,
}

impl SensorReading {
    pub fn new(x: i16, y: i16, z: i16) -> Self {
        Self { x, y, z }
    }
}

impl Message for SensorReading {
    fn write(&self, out: &mut WireWriter<'_>) -> Result<()> {
        out.write_i16(self.x);
        out.write_i16(self.y);
        out.write_i16(self.z);
        Ok(())
    }

    fn read(&mut self, input: &mut WireReader<'_>) -> Result<()> {
        self.x = input.read_i16()?;
        self.y = input.read_i16()?;
        self.z = input.read_i16()?;
        Ok(())
    }
}

/// Register every demo type, in a fixed order.
pub fn register_demo_types(registry: &TypeRegistry) -> typewire_registry::Result<()> {
    registry.register::<StringCommand>(STRING_COMMAND_NAME, STRING_COMMAND_VERSION)?;
    registry.register::<Ping>(PING_NAME, PING_VERSION)?;
    registry.register::<SensorReading>(SENSOR_READING_NAME, SENSOR_READING_VERSION)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use typewire_frame::{FrameCodec, FrameConfig};
    use typewire_transport::MemoryDevice;

    use super::*;

    #[test]
    fn demo_types_round_trip_through_a_link() {
        let registry = TypeRegistry::new();
        register_demo_types(&registry).unwrap();
        registry.accept_identity();

        let (a, b) = MemoryDevice::pair();
        let tx = FrameCodec::with_device(Arc::new(a), FrameConfig::default());
        let rx = FrameCodec::with_device(Arc::new(b), FrameConfig::default());

        let text = StringCommand::new("reboot now");
        let ping = Ping::new(0xDEAD_BEEF);
        let sensor = SensorReading::new(-512, 0, 1023);
        tx.write_frame(registry.id_of::<StringCommand>().unwrap(), &text)
            .unwrap();
        tx.write_frame(registry.id_of::<Ping>().unwrap(), &ping).unwrap();
        tx.write_frame(registry.id_of::<SensorReading>().unwrap(), &sensor)
            .unwrap();

        let got = rx.read_frame(&registry).unwrap().unwrap();
        assert_eq!(got.downcast_ref::<StringCommand>(), Some(&text));
        let got = rx.read_frame(&registry).unwrap().unwrap();
        assert_eq!(got.downcast_ref::<Ping>(), Some(&ping));
        let got = rx.read_frame(&registry).unwrap().unwrap();
        assert_eq!(got.downcast_ref::<SensorReading>(), Some(&sensor));
    }

    #[test]
    fn demo_types_take_consecutive_user_ids() {
        let registry = TypeRegistry::new();
        register_demo_types(&registry).unwrap();
        assert_eq!(registry.id_of::<StringCommand>(), Some(2));
        assert_eq!(registry.id_of::<Ping>(), Some(3));
        assert_eq!(registry.id_of::<SensorReading>(), Some(4));
        assert!(register_demo_types(&registry).is_err());
    }
}
