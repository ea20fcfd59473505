//! Message headers with typed keys.
//!
//! Values are stored serialized so every backend can persist them, but they are
//! only reachable through a `HeaderKey<T>` that fixes the value type at compile
//! time. Reading a header with the wrong type is impossible without declaring a
//! second key for the same name.

use std::collections::BTreeMap;
use std::fmt;
use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// A header name bound to its value type.
///
/// ```ignore
/// const TENANT: HeaderKey<String> = HeaderKey::new("tenant");
/// headers.insert(&TENANT, &"acme".to_string())?;
/// let tenant: Option<String> = headers.get(&TENANT)?;
/// ```
pub struct HeaderKey<T> {
    name: &'static str,
    _marker: PhantomData<fn() -> T>,
}

impl<T> HeaderKey<T> {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            _marker: PhantomData,
        }
    }

    pub const fn name(&self) -> &'static str {
        self.name
    }
}

impl<T> Clone for HeaderKey<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for HeaderKey<T> {}

impl<T> fmt::Debug for HeaderKey<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("HeaderKey").field(&self.name).finish()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum HeaderError {
    #[error("header {name} could not be encoded: {source}")]
    Encode {
        name: &'static str,
        source: serde_json::Error,
    },

    #[error("header {name} does not hold the expected type: {source}")]
    Decode {
        name: &'static str,
        source: serde_json::Error,
    },
}

/// Header bag attached to a message at send time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Headers {
    values: BTreeMap<String, serde_json::Value>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<T: Serialize>(&mut self, key: &HeaderKey<T>, value: &T) -> Result<(), HeaderError> {
        let encoded = serde_json::to_value(value).map_err(|source| HeaderError::Encode {
            name: key.name,
            source,
        })?;
        self.values.insert(key.name.to_string(), encoded);
        Ok(())
    }

    /// Builder-style insert.
    pub fn with<T: Serialize>(mut self, key: &HeaderKey<T>, value: &T) -> Result<Self, HeaderError> {
        self.insert(key, value)?;
        Ok(self)
    }

    pub fn get<T: DeserializeOwned>(&self, key: &HeaderKey<T>) -> Result<Option<T>, HeaderError> {
        self.values
            .get(key.name)
            .map(|value| {
                T::deserialize(value).map_err(|source| HeaderError::Decode {
                    name: key.name,
                    source,
                })
            })
            .transpose()
    }

    pub fn remove<T>(&mut self, key: &HeaderKey<T>) -> bool {
        self.values.remove(key.name).is_some()
    }

    pub fn contains<T>(&self, key: &HeaderKey<T>) -> bool {
        self.values.contains_key(key.name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Headers owned by the queue protocol itself.
pub mod standard {
    use super::HeaderKey;

    /// How many times the stale-lease scanner has reclaimed this message.
    pub const HEARTBEAT_RESETS: HeaderKey<u32> = HeaderKey::new("workqueue.heartbeat_resets");

    /// W3C trace context, carried through untouched.
    pub const TRACE_PARENT: HeaderKey<String> = HeaderKey::new("workqueue.trace_parent");
}
