//! Message types and a fixed resolver shared by the unit tests.

use crate::error::Result;
use crate::message::{Message, TypeId, TypeResolver};
use crate::reader::WireReader;
use crate::writer::WireWriter;

pub const TEXT_ID: TypeId = 2;
pub const POINT_ID: TypeId = 3;

#[derive(Debug, Default, Clone, PartialEq)]
pub struct Text {
    pub text: String,
}

impl Message for Text {
    fn write(&self, out: &mut WireWriter<'_>) -> Result<()> {
        out.write_str(&self.text)
    }

    fn read(&mut self, input: &mut WireReader<'_>) -> Result<()> {
        self.text = input.read_string()?;
        Ok(())
    }
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct Point {
    pub x: i16,
    pub y: i32,
    pub z: f64,
}

impl Message for Point {
    fn write(&self, out: &mut WireWriter<'_>) -> Result<()> {
        out.write_i16(self.x);
        out.write_i32(self.y);
        out.write_f64(self.z);
        Ok(())
    }

    fn read(&mut self, input: &mut WireReader<'_>) -> Result<()> {
        self.x = input.read_i16()?;
        self.y = input.read_i32()?;
        self.z = input.read_f64()?;
        Ok(())
    }
}

/// Identity resolver over the test types, optionally restricted.
pub struct TableResolver {
    enabled: Vec<TypeId>,
}

impl TableResolver {
    pub fn all() -> Self {
        Self::only(&[TEXT_ID, POINT_ID])
    }

    pub fn only(ids: &[TypeId]) -> Self {
        Self {
            enabled: ids.to_vec(),
        }
    }
}

impl TypeResolver for TableResolver {
    fn is_foreign_enabled(&self, foreign: TypeId) -> bool {
        self.enabled.contains(&foreign)
    }

    fn instantiate_foreign(&self, foreign: TypeId) -> Option<(TypeId, Box<dyn Message>)> {
        if !self.is_foreign_enabled(foreign) {
            return None;
        }
        match foreign {
            TEXT_ID => Some((foreign, Box::new(Text::default()))),
            POINT_ID => Some((foreign, Box::new(Point::default()))),
            _ => None,
        }
    }
}
