//! Object codec
//!
//! Writes and reads complete values (type tag + body) through the registry.

use std::any::{type_name, Any, TypeId};
use std::fmt;
use std::sync::{Arc, OnceLock};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use parking_lot::RwLock;

use super::defaults::register_defaults;
use super::registry::{IdRequest, Registration, TypeRegistry};
use super::serializer::{erase, ErasedSerializer};
use super::{BincodeSerializer, Object, Persist, Serializer, Storable, NAMED_TAG, NULL_TAG};
use crate::error::{EmberError, Result};
use crate::varint::{read_int, write_int};

/// Full-object binary codec
///
/// Values of unregistered types are written with their type name and
/// registered on the fly, so a reader in the same process can always decode
/// what a writer produced. A reader in another process must register those
/// types (by id or by name) before reading; [`register_with_name`] pins the
/// name written to disk.
///
/// [`register_with_name`]: ObjectCodec::register_with_name
///
/// ## Concurrency
/// The registry sits behind an `RwLock`; encoding only takes the read lock
/// long enough to clone the registration.
pub struct ObjectCodec {
    registry: RwLock<TypeRegistry>,
}

static SHARED: OnceLock<Arc<ObjectCodec>> = OnceLock::new();

/// A decoded value along with the name of its runtime type
pub(crate) struct Decoded {
    pub value: Object,
    pub type_name: &'static str,
}

/// Result of reading a frame whose type may not be registered yet
pub(crate) enum Lookup {
    Null,
    Decoded(Decoded),
    /// The tag names a type this codec does not know; nothing was consumed
    /// past the tag
    Unknown,
}

/// Type tag at the front of a frame
enum Tag<'a> {
    Null,
    Id(u32),
    Named(&'a str),
}

impl ObjectCodec {
    /// Create a codec with the built-in registrations installed
    pub fn new() -> Self {
        let mut registry = TypeRegistry::new();
        // Fixed ids in an empty registry cannot collide
        if let Err(e) = register_defaults(&mut registry) {
            tracing::error!("Built-in codec registration failed: {}", e);
        }
        Self {
            registry: RwLock::new(registry),
        }
    }

    /// Process-wide codec used by stores that are not given their own
    ///
    /// Types registered here (explicitly or on first write) are readable by
    /// every store in the process that uses it.
    pub fn shared() -> Arc<ObjectCodec> {
        Arc::clone(SHARED.get_or_init(|| Arc::new(ObjectCodec::new())))
    }

    // =========================================================================
    // Registration
    // =========================================================================

    /// Register `T` with the next free id (no-op if it already has one)
    pub fn register<T: Persist>(&self) -> Result<u32> {
        self.register_inner::<T>(IdRequest::Auto, erase::<T, _>(BincodeSerializer), false)
    }

    /// Register `T` with an explicit id
    ///
    /// Fails with `InvalidArgument` if `T` already has a different id or the
    /// id belongs to another type.
    pub fn register_with_id<T: Persist>(&self, id: u32) -> Result<u32> {
        self.register_inner::<T>(IdRequest::Explicit(id), erase::<T, _>(BincodeSerializer), false)
    }

    /// Register `T` for the name fallback under a caller-chosen name
    ///
    /// Values of `T` are still written by name, but with `name` instead of
    /// the compiler-provided type name, which may change between builds.
    pub fn register_with_name<T: Persist>(&self, name: &'static str) -> Result<()> {
        if name.is_empty() {
            return Err(EmberError::InvalidArgument(
                "type name must not be empty".to_string(),
            ));
        }

        let mut registry = self.registry.write();
        if let Some(owner) = registry.by_name(name) {
            if owner.type_id != TypeId::of::<T>() {
                return Err(EmberError::InvalidArgument(format!(
                    "Type name {} is already taken by {}",
                    name, owner.type_name
                )));
            }
        }
        registry.register(
            TypeId::of::<T>(),
            name,
            IdRequest::Named,
            Some(erase::<T, _>(BincodeSerializer)),
        )?;
        Ok(())
    }

    /// Register `T` with a custom serializer, replacing any previous one
    pub fn register_with_serializer<T, S>(&self, serializer: S) -> Result<u32>
    where
        T: Storable,
        S: Serializer<T>,
    {
        self.register_inner::<T>(IdRequest::Auto, erase::<T, S>(serializer), true)
    }

    /// Register `T` with a custom serializer and an explicit id
    pub fn register_with_serializer_and_id<T, S>(&self, serializer: S, id: u32) -> Result<u32>
    where
        T: Storable,
        S: Serializer<T>,
    {
        self.register_inner::<T>(IdRequest::Explicit(id), erase::<T, S>(serializer), true)
    }

    fn register_inner<T: Storable>(
        &self,
        request: IdRequest,
        serializer: Arc<dyn ErasedSerializer>,
        replace_serializer: bool,
    ) -> Result<u32> {
        let mut registry = self.registry.write();

        let known = registry.by_type(TypeId::of::<T>()).is_some();
        let serializer = (replace_serializer || !known).then_some(serializer);

        let id = registry.register(TypeId::of::<T>(), type_name::<T>(), request, serializer)?;
        id.ok_or_else(|| {
            EmberError::InvalidArgument(format!("{} did not receive an id", type_name::<T>()))
        })
    }

    /// Make sure `T` can be written, registering it by name if needed
    pub(crate) fn ensure_registered<T: Persist>(&self) -> Result<()> {
        if self.registry.read().by_type(TypeId::of::<T>()).is_some() {
            return Ok(());
        }

        let mut registry = self.registry.write();
        if registry.by_type(TypeId::of::<T>()).is_none() {
            registry.register(
                TypeId::of::<T>(),
                type_name::<T>(),
                IdRequest::Named,
                Some(erase::<T, _>(BincodeSerializer)),
            )?;
            tracing::debug!("Registered {} by name", type_name::<T>());
        }
        Ok(())
    }

    /// Whether `T` can be written and read by this codec
    pub fn is_registered<T: 'static>(&self) -> bool {
        self.registry.read().by_type(TypeId::of::<T>()).is_some()
    }

    /// Numeric id of `T`, if it has one
    pub fn id_of<T: 'static>(&self) -> Option<u32> {
        self.registry
            .read()
            .by_type(TypeId::of::<T>())
            .and_then(|r| r.id)
    }

    /// Type name registered under `id`
    pub fn type_name_of(&self, id: u32) -> Option<&'static str> {
        self.registry.read().by_id(id).map(|r| r.type_name)
    }

    /// Number of registered types, built-ins included
    pub fn registered_count(&self) -> usize {
        self.registry.read().len()
    }

    // =========================================================================
    // Writing
    // =========================================================================

    /// Serialize `value` with its type tag
    pub fn write<T: Persist>(&self, value: &T) -> Result<Bytes> {
        self.ensure_registered::<T>()?;
        let mut out = BytesMut::new();
        self.write_object_into(Some(value as &(dyn Any + Send + Sync)), &mut out)?;
        Ok(out.freeze())
    }

    /// Serialize an optional value; `None` is written as null
    pub fn write_option<T: Persist>(&self, value: Option<&T>) -> Result<Bytes> {
        match value {
            Some(value) => self.write(value),
            None => Ok(self.write_null()),
        }
    }

    /// The encoding of null
    pub fn write_null(&self) -> Bytes {
        let mut out = BytesMut::with_capacity(1);
        write_int(&mut out, NULL_TAG as i32, true);
        out.freeze()
    }

    /// Serialize a type-erased value, which must already be registered
    pub fn write_object(&self, value: Option<&(dyn Any + Send + Sync)>) -> Result<Bytes> {
        let mut out = BytesMut::new();
        self.write_object_into(value, &mut out)?;
        Ok(out.freeze())
    }

    pub(crate) fn write_object_into(
        &self,
        value: Option<&(dyn Any + Send + Sync)>,
        out: &mut BytesMut,
    ) -> Result<()> {
        let value = match value {
            Some(value) => value,
            None => {
                write_int(out, NULL_TAG as i32, true);
                return Ok(());
            }
        };

        let registration = self.lookup((*value).type_id())?;
        match registration.id {
            Some(id) => {
                write_int(out, id as i32, true);
            }
            None => {
                let name = registration.type_name.as_bytes();
                write_int(out, NAMED_TAG as i32, true);
                write_int(out, name.len() as i32, true);
                out.put_slice(name);
            }
        }

        registration.serializer.write(value, out)
    }

    fn lookup(&self, type_id: TypeId) -> Result<Arc<Registration>> {
        self.registry.read().by_type(type_id).ok_or_else(|| {
            EmberError::Serialization("Cannot write a value of an unregistered type".to_string())
        })
    }

    // =========================================================================
    // Reading
    // =========================================================================

    /// Deserialize a complete frame; `Ok(None)` means null
    ///
    /// The frame must span all of `bytes`.
    pub fn read(&self, bytes: &[u8]) -> Result<Option<Object>> {
        let mut input = bytes;
        let decoded = self.read_from(&mut input)?;
        if input.has_remaining() {
            return Err(EmberError::Serialization(format!(
                "{} trailing bytes after value",
                input.remaining()
            )));
        }
        Ok(decoded.map(|d| d.value))
    }

    /// Deserialize a frame and downcast it to `T`
    pub fn read_as<T: Storable>(&self, bytes: &[u8]) -> Result<Option<T>> {
        let mut input = bytes;
        let decoded = match self.read_from(&mut input)? {
            Some(decoded) => decoded,
            None => return Ok(None),
        };

        match decoded.value.downcast_ref::<T>() {
            Some(value) => Ok(Some(value.clone())),
            None => Err(EmberError::TypeMismatch {
                expected: type_name::<T>(),
                found: decoded.type_name,
            }),
        }
    }

    /// Read one frame from the front of `input`, advancing past it
    pub(crate) fn read_from(&self, input: &mut &[u8]) -> Result<Option<Decoded>> {
        let tag = read_tag(input)?;
        let registration = match self.resolve(&tag) {
            Some(registration) => registration,
            None => return Ok(None),
        };
        let registration = registration.ok_or_else(|| match tag {
            Tag::Named(name) => EmberError::Serialization(format!("Unknown type name: {}", name)),
            Tag::Id(id) => EmberError::Serialization(format!("Unknown type id: {}", id)),
            Tag::Null => EmberError::Serialization("Unexpected null tag".to_string()),
        })?;

        let value = registration.serializer.read(input)?;
        Ok(Some(Decoded {
            value,
            type_name: registration.type_name,
        }))
    }

    /// Like [`read_from`](Self::read_from), but an unregistered type is
    /// reported instead of failing
    pub(crate) fn read_known(&self, input: &mut &[u8]) -> Result<Lookup> {
        let tag = read_tag(input)?;
        let registration = match self.resolve(&tag) {
            None => return Ok(Lookup::Null),
            Some(None) => return Ok(Lookup::Unknown),
            Some(Some(registration)) => registration,
        };

        let value = registration.serializer.read(input)?;
        Ok(Lookup::Decoded(Decoded {
            value,
            type_name: registration.type_name,
        }))
    }

    /// `None` for null, `Some(None)` for an unknown type
    fn resolve(&self, tag: &Tag<'_>) -> Option<Option<Arc<Registration>>> {
        let registry = self.registry.read();
        match tag {
            Tag::Null => None,
            Tag::Id(id) => Some(registry.by_id(*id)),
            Tag::Named(name) => Some(registry.by_name(name)),
        }
    }
}

fn read_tag<'a>(input: &mut &'a [u8]) -> Result<Tag<'a>> {
    match read_int(input, true)? as u32 {
        NULL_TAG => Ok(Tag::Null),
        NAMED_TAG => read_name(input).map(Tag::Named),
        id => Ok(Tag::Id(id)),
    }
}

fn read_name<'a>(input: &mut &'a [u8]) -> Result<&'a str> {
    let len = read_int(input, true)?;
    let len = usize::try_from(len)
        .map_err(|_| EmberError::Serialization(format!("Negative type name length: {}", len)))?;
    if input.len() < len {
        return Err(EmberError::truncated("type name"));
    }

    let (name, rest) = input.split_at(len);
    *input = rest;
    std::str::from_utf8(name)
        .map_err(|e| EmberError::Serialization(format!("Type name is not UTF-8: {}", e)))
}

impl Default for ObjectCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ObjectCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectCodec")
            .field("registered", &self.registered_count())
            .finish()
    }
}
