//! Built-in registrations
//!
//! Scalars, their nullable forms, and sequences of both get fixed ids
//! starting at 2. The order below is part of the wire format: append only.

use std::any::{type_name, TypeId};

use super::registry::{IdRequest, TypeRegistry};
use super::serializer::erase;
use super::BincodeSerializer;
use crate::error::Result;

macro_rules! builtin {
    ($registry:expr, $id:expr, $($ty:ty),+ $(,)?) => {{
        $(
            $registry.register(
                TypeId::of::<$ty>(),
                type_name::<$ty>(),
                IdRequest::Builtin($id),
                Some(erase::<$ty, _>(BincodeSerializer)),
            )?;
            $id += 1;
        )+
    }};
}

/// Install every built-in registration into `registry`
pub(crate) fn register_defaults(registry: &mut TypeRegistry) -> Result<()> {
    let mut id: u32 = 2;

    builtin!(
        registry, id,
        bool, i8, i16, i32, i64, u8, u16, u32, u64, f32, f64, char, String,
    );
    builtin!(
        registry, id,
        Option<bool>, Option<i8>, Option<i16>, Option<i32>, Option<i64>,
        Option<u8>, Option<u16>, Option<u32>, Option<u64>,
        Option<f32>, Option<f64>, Option<char>, Option<String>,
    );
    builtin!(
        registry, id,
        Vec<bool>, Vec<i8>, Vec<i16>, Vec<i32>, Vec<i64>,
        Vec<u8>, Vec<u16>, Vec<u32>, Vec<u64>,
        Vec<f32>, Vec<f64>, Vec<char>, Vec<String>,
    );
    builtin!(
        registry, id,
        Vec<Option<bool>>, Vec<Option<i8>>, Vec<Option<i16>>, Vec<Option<i32>>, Vec<Option<i64>>,
        Vec<Option<u8>>, Vec<Option<u16>>, Vec<Option<u32>>, Vec<Option<u64>>,
        Vec<Option<f32>>, Vec<Option<f64>>, Vec<Option<char>>, Vec<Option<String>>,
    );

    debug_assert!(id <= super::FIRST_USER_ID);
    Ok(())
}
