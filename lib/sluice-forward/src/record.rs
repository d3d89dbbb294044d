//! Records handed to the forwarder by the upstream pipeline.

use bytes::Bytes;

/// A classified event record.
///
/// The forwarder only ever reads a record for the duration of a call; anything it keeps is copied first.
pub trait Record {
    /// Event type tag, used for filtering.
    fn event_type(&self) -> &str;

    /// Serialized form of the record, written downstream as-is.
    fn payload(&self) -> &[u8];
}

/// A basic owned record.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Entry {
    event_type: String,
    payload: Bytes,
}

impl Entry {
    /// Creates a new `Entry`.
    pub fn new<T, P>(event_type: T, payload: P) -> Self
    where
        T: Into<String>,
        P: Into<Bytes>,
    {
        Self {
            event_type: event_type.into(),
            payload: payload.into(),
        }
    }
}

impl Record for Entry {
    fn event_type(&self) -> &str {
        &self.event_type
    }

    fn payload(&self) -> &[u8] {
        &self.payload
    }
}

impl<R: Record + ?Sized> Record for &R {
    fn event_type(&self) -> &str {
        (**self).event_type()
    }

    fn payload(&self) -> &[u8] {
        (**self).payload()
    }
}
