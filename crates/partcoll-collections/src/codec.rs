//! Element encoding.
//!
//! Elements travel through the store as `bincode` bytes, so two elements are the
//! same entry exactly when their encodings are equal.

use std::hash::Hash;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::Result;

/// Bounds every element stored in a distributed collection must meet.
pub trait Element:
    Serialize + DeserializeOwned + Clone + Eq + Hash + Send + Sync + 'static
{
}

impl<T> Element for T where
    T: Serialize + DeserializeOwned + Clone + Eq + Hash + Send + Sync + 'static
{
}

/// Encodes a value into store bytes.
pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
    Ok(bincode::serialize(value)?)
}

/// Decodes store bytes into a value.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    Ok(bincode::deserialize(bytes)?)
}
