use serde::Serialize;
use typewire_frame::{FrameError, Message, TypeId, TypeVersion, WireReader, WireWriter};

use crate::registry::MAX_TYPES;

/// One `(id, version, name)` record of a [`Manifest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ManifestEntry {
    pub id: TypeId,
    pub version: TypeVersion,
    pub name: String,
}

/// The list of types an endpoint knows, exchanged during negotiation.
///
/// Wire layout: a checksummed `u32` record count, then per record the id
/// byte, the version byte and the length-prefixed name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Manifest {
    pub entries: Vec<ManifestEntry>,
}

impl Manifest {
    pub fn new(entries: Vec<ManifestEntry>) -> Self {
        Self { entries }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ManifestEntry> {
        self.entries.iter()
    }
}

impl Message for Manifest {
    fn write(&self, out: &mut WireWriter<'_>) -> typewire_frame::Result<()> {
        let count = u32::try_from(self.entries.len()).map_err(|_| FrameError::LengthTooLarge {
            len: self.entries.len(),
            max: MAX_TYPES,
        })?;
        out.write_checksummed_u32(count);
        for entry in &self.entries {
            out.write_u8(entry.id);
            out.write_u8(entry.version);
            out.write_str(&entry.name)?;
        }
        Ok(())
    }

    fn read(&mut self, input: &mut WireReader<'_>) -> typewire_frame::Result<()> {
        let count = input.read_checksummed_u32()? as usize;
        if count > MAX_TYPES {
            return Err(FrameError::LengthTooLarge {
                len: count,
                max: MAX_TYPES,
            });
        }
        self.entries.clear();
        self.entries.reserve(count);
        for _ in 0..count {
            let id = input.read_u8()?;
            let version = input.read_u8()?;
            let name = input.read_string()?;
            self.entries.push(ManifestEntry { id, version, name });
        }
        Ok(())
    }
}
