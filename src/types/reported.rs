//! Values that may not have been observed yet.
//!
//! Several snapshot fields are derived from stream values that an agent may
//! simply never emit. On the wire those fields are polymorphic for
//! compatibility with existing consumers: either the concrete value or the
//! literal string `"UNAVAILABLE"`. Internally they are a tagged union.

use serde::{Serialize, Serializer};

use super::snapshot::UNAVAILABLE;

/// A value that is either known from the stream or not yet observed.
///
/// Serializes as the inner value when known, and as the literal string
/// `"UNAVAILABLE"` otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Reported<T> {
    /// No contributing stream value has been observed.
    #[default]
    Unavailable,
    /// The derived value.
    Known(T),
}

impl<T> Reported<T> {
    /// True while no stream value has been observed.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable)
    }

    /// The known value, if any.
    pub fn known(&self) -> Option<&T> {
        match self {
            Self::Unavailable => None,
            Self::Known(value) => Some(value),
        }
    }

    /// Mutable access to the known value, inserting a default on first touch.
    pub fn known_or_default(&mut self) -> &mut T
    where
        T: Default,
    {
        if self.is_unavailable() {
            *self = Self::Known(T::default());
        }
        match self {
            Self::Known(value) => value,
            Self::Unavailable => unreachable!("just initialized"),
        }
    }
}

impl<T> From<T> for Reported<T> {
    fn from(value: T) -> Self {
        Self::Known(value)
    }
}

impl<T: Serialize> Serialize for Reported<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Unavailable => serializer.serialize_str(UNAVAILABLE),
            Self::Known(value) => value.serialize(serializer),
        }
    }
}
