//! Pluggable per-type serializers

use std::any::{type_name, Any};
use std::marker::PhantomData;
use std::sync::Arc;

use bincode::Options;
use bytes::{BufMut, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::{Object, Storable};
use crate::error::{EmberError, Result};

/// Writes and reads the body of one type's frame
///
/// `read` must consume exactly the bytes `write` produced and leave the rest
/// of `input` untouched.
pub trait Serializer<T>: Send + Sync + 'static {
    fn write(&self, value: &T, out: &mut BytesMut) -> Result<()>;

    fn read(&self, input: &mut &[u8]) -> Result<T>;
}

/// Default serializer: bincode with varint integers
#[derive(Debug, Clone, Copy, Default)]
pub struct BincodeSerializer;

impl<T: Serialize + DeserializeOwned> Serializer<T> for BincodeSerializer {
    fn write(&self, value: &T, out: &mut BytesMut) -> Result<()> {
        let mut writer = out.writer();
        bincode::DefaultOptions::new().serialize_into(&mut writer, value)?;
        Ok(())
    }

    fn read(&self, input: &mut &[u8]) -> Result<T> {
        // Trailing bytes belong to the enclosing frame
        let options = bincode::DefaultOptions::new().allow_trailing_bytes();
        Ok(options.deserialize_from(input)?)
    }
}

/// Type-erased view of a `Serializer<T>` stored in the registry
pub(crate) trait ErasedSerializer: Send + Sync {
    fn write(&self, value: &(dyn Any + Send + Sync), out: &mut BytesMut) -> Result<()>;

    fn read(&self, input: &mut &[u8]) -> Result<Object>;
}

struct Typed<T, S> {
    serializer: S,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Storable, S: Serializer<T>> ErasedSerializer for Typed<T, S> {
    fn write(&self, value: &(dyn Any + Send + Sync), out: &mut BytesMut) -> Result<()> {
        let value = value
            .downcast_ref::<T>()
            .ok_or(EmberError::TypeMismatch {
                expected: type_name::<T>(),
                found: "another registered type",
            })?;
        self.serializer.write(value, out)
    }

    fn read(&self, input: &mut &[u8]) -> Result<Object> {
        let value = self.serializer.read(input)?;
        Ok(Arc::new(value))
    }
}

pub(crate) fn erase<T: Storable, S: Serializer<T>>(serializer: S) -> Arc<dyn ErasedSerializer> {
    Arc::new(Typed::<T, S> {
        serializer,
        _marker: PhantomData,
    })
}
