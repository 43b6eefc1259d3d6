//! Codec Module
//!
//! Full-object binary codec with a type registry.
//!
//! ## Responsibilities
//! - Map runtime types to numeric wire ids (or to their type name when unregistered)
//! - Serialize a value together with enough type information to rebuild it
//! - Deserialize bytes back into a value of the original runtime type
//!
//! ## Frame Format
//! ```text
//! ┌────────────────┬─────────────────────────────────────────────┐
//! │ TypeTag varint │ Body                                        │
//! └────────────────┴─────────────────────────────────────────────┘
//!   0        null, no body
//!   1        NameLen varint + Name (UTF-8) + serializer payload
//!   2..      registered id, serializer payload
//! ```
//!
//! Tags below [`FIRST_USER_ID`] belong to the built-in registrations, so
//! their meaning is identical in every process.

mod defaults;
mod object;
mod registry;
mod serializer;

use std::any::Any;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

pub use object::ObjectCodec;
pub(crate) use object::Lookup;
pub use serializer::{BincodeSerializer, Serializer};

/// Tag written for a null value
pub const NULL_TAG: u32 = 0;

/// Tag written for values of unregistered types (type name follows)
pub const NAMED_TAG: u32 = 1;

/// First id handed out to user registrations
pub const FIRST_USER_ID: u32 = 64;

/// A decoded value of some registered runtime type
pub type Object = Arc<dyn Any + Send + Sync>;

/// Bound for any value a store can hold
pub trait Storable: Any + Send + Sync + Clone {}

impl<T: Any + Send + Sync + Clone> Storable for T {}

/// Values the codec can handle without prior registration
pub trait Persist: Storable + Serialize + DeserializeOwned {}

impl<T: Storable + Serialize + DeserializeOwned> Persist for T {}
