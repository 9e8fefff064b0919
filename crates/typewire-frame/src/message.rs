use std::any::Any;
use std::fmt;

use crate::error::Result;
use crate::reader::WireReader;
use crate::writer::WireWriter;

/// Numeric type identifier as it appears in a frame header.
///
/// Identifiers are assigned per build and are only meaningful on the wire
/// after manifest negotiation has translated them.
pub type TypeId = u8;

/// Version tag of a message type; types match only on name *and* version.
pub type TypeVersion = u8;

/// Dynamic-typing helpers for [`Message`] trait objects.
pub trait AsAny: Any {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
    fn into_any(self: Box<Self>) -> Box<dyn Any>;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any> {
        self
    }
}

/// A payload that can travel inside a frame.
///
/// `write` emits the payload through the checksumming primitives of
/// [`WireWriter`]; `read` fills a default-constructed instance from a
/// [`WireReader`]. The two must mirror each other field by field.
pub trait Message: AsAny + Send + fmt::Debug {
    fn write(&self, out: &mut WireWriter<'_>) -> Result<()>;
    fn read(&mut self, input: &mut WireReader<'_>) -> Result<()>;
}

/// A message together with its *local* type identifier.
///
/// Envelopes are move-only: whichever pipeline stage holds one owns the
/// message, and dropping it frees the message.
pub struct Envelope {
    id: TypeId,
    body: Box<dyn Message>,
}

impl Envelope {
    pub fn new(id: TypeId, body: Box<dyn Message>) -> Self {
        Self { id, body }
    }

    /// Local type identifier.
    pub fn id(&self) -> TypeId {
        self.id
    }

    pub fn message(&self) -> &dyn Message {
        &*self.body
    }

    /// Whether the payload is a `T`.
    pub fn is<T: Message>(&self) -> bool {
        (*self.body).as_any().is::<T>()
    }

    pub fn downcast_ref<T: Message>(&self) -> Option<&T> {
        (*self.body).as_any().downcast_ref::<T>()
    }

    pub fn downcast_mut<T: Message>(&mut self) -> Option<&mut T> {
        (*self.body).as_any_mut().downcast_mut::<T>()
    }

    /// Take the payload out as a `T`, if it is one.
    pub fn into_inner<T: Message>(self) -> Option<Box<T>> {
        self.body.into_any().downcast::<T>().ok()
    }
}

impl fmt::Debug for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Envelope")
            .field("id", &self.id)
            .field("body", &self.body)
            .finish()
    }
}

/// Translates type identifiers seen on the wire.
///
/// The frame codec consults a resolver while scanning headers (unknown or
/// disabled identifiers are not frame starts) and to construct the payload
/// of an accepted frame.
pub trait TypeResolver: Send + Sync {
    /// Whether `foreign` maps to a local type that is currently enabled.
    fn is_foreign_enabled(&self, foreign: TypeId) -> bool;

    /// Build a fresh, default instance for `foreign`, returning it with its
    /// local identifier. `None` if unmapped or disabled.
    fn instantiate_foreign(&self, foreign: TypeId) -> Option<(TypeId, Box<dyn Message>)>;
}
