//! Type registry
//!
//! Three indexes over the same registrations:
//! - `TypeId` → registration (write path)
//! - numeric id → registration (read path, registered types)
//! - type name → registration (read path, name fallback)

use std::any::TypeId;
use std::collections::HashMap;
use std::sync::Arc;

use super::serializer::ErasedSerializer;
use super::{FIRST_USER_ID, NAMED_TAG, NULL_TAG};
use crate::error::{EmberError, Result};

/// A single registered type
pub(crate) struct Registration {
    /// Wire id, or `None` when written through the name fallback
    pub id: Option<u32>,
    pub type_id: TypeId,
    pub type_name: &'static str,
    pub serializer: Arc<dyn ErasedSerializer>,
}

/// How a registration request picks its id
pub(crate) enum IdRequest {
    /// Keep the current id, or hand out the next free one
    Auto,
    /// Exactly this id
    Explicit(u32),
    /// Built-in registration with a fixed id below the user range
    Builtin(u32),
    /// No id, written by name
    Named,
}

pub(crate) struct TypeRegistry {
    by_type: HashMap<TypeId, Arc<Registration>>,
    by_id: HashMap<u32, Arc<Registration>>,
    by_name: HashMap<&'static str, Arc<Registration>>,
    next_id: u32,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self {
            by_type: HashMap::new(),
            by_id: HashMap::new(),
            by_name: HashMap::new(),
            next_id: FIRST_USER_ID,
        }
    }

    pub fn by_type(&self, type_id: TypeId) -> Option<Arc<Registration>> {
        self.by_type.get(&type_id).cloned()
    }

    pub fn by_id(&self, id: u32) -> Option<Arc<Registration>> {
        self.by_id.get(&id).cloned()
    }

    pub fn by_name(&self, name: &str) -> Option<Arc<Registration>> {
        self.by_name.get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.by_type.len()
    }

    /// Add or update a registration
    ///
    /// `serializer == None` keeps the serializer of an existing registration
    /// (callers always pass one for a new type). Returns the resulting id,
    /// `None` for name-only registrations.
    pub fn register(
        &mut self,
        type_id: TypeId,
        type_name: &'static str,
        request: IdRequest,
        serializer: Option<Arc<dyn ErasedSerializer>>,
    ) -> Result<Option<u32>> {
        let existing = self.by_type.get(&type_id).cloned();

        let id = match request {
            IdRequest::Named => existing.as_ref().and_then(|r| r.id),
            IdRequest::Auto => match existing.as_ref().and_then(|r| r.id) {
                Some(id) => Some(id),
                None => Some(self.allocate_id()),
            },
            IdRequest::Explicit(id) => {
                if id < FIRST_USER_ID || id > i32::MAX as u32 {
                    return Err(EmberError::InvalidArgument(format!(
                        "Registration id {} for {} is outside the user range [{}, {}]",
                        id,
                        type_name,
                        FIRST_USER_ID,
                        i32::MAX
                    )));
                }
                Some(self.claim_id(id, type_id, type_name, existing.as_deref())?)
            }
            IdRequest::Builtin(id) => {
                debug_assert!(id != NULL_TAG && id != NAMED_TAG && id < FIRST_USER_ID);
                Some(self.claim_id(id, type_id, type_name, existing.as_deref())?)
            }
        };

        let serializer = match (serializer, existing.as_ref()) {
            (Some(serializer), _) => serializer,
            (None, Some(existing)) => Arc::clone(&existing.serializer),
            (None, None) => {
                return Err(EmberError::InvalidArgument(format!(
                    "No serializer supplied for new registration of {}",
                    type_name
                )))
            }
        };

        let registration = Arc::new(Registration {
            id,
            type_id,
            type_name,
            serializer,
        });

        if let Some(id) = id {
            self.by_id.insert(id, Arc::clone(&registration));
        }
        self.by_name.insert(type_name, Arc::clone(&registration));
        self.by_type.insert(type_id, registration);

        Ok(id)
    }

    /// Validate an explicit id against the current registrations
    fn claim_id(
        &self,
        id: u32,
        type_id: TypeId,
        type_name: &'static str,
        existing: Option<&Registration>,
    ) -> Result<u32> {
        if let Some(current) = existing.and_then(|r| r.id) {
            if current != id {
                return Err(EmberError::InvalidArgument(format!(
                    "{} is already registered with id {}, cannot re-register with id {}",
                    type_name, current, id
                )));
            }
        }

        if let Some(owner) = self.by_id.get(&id) {
            if owner.type_id != type_id {
                return Err(EmberError::InvalidArgument(format!(
                    "Id {} is already taken by {}",
                    id, owner.type_name
                )));
            }
        }

        Ok(id)
    }

    fn allocate_id(&mut self) -> u32 {
        while self.by_id.contains_key(&self.next_id) {
            self.next_id += 1;
        }
        let id = self.next_id;
        self.next_id += 1;
        id
    }
}
