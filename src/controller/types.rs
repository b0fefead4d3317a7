//! # Core Types
//!
//! Object identities and the read-only credential snapshot used by a scan cycle.

use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// Namespaced object identity
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Identity of an object, `None` when it has no name.
    /// Objects without a namespace fall back to `default`.
    pub fn from_meta(meta: &ObjectMeta) -> Option<Self> {
        let name = meta.name.as_deref()?;
        let namespace = meta.namespace.as_deref().unwrap_or("default");
        Some(Self::new(namespace, name))
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Immutable snapshot of a Secret, as far as expiry evaluation cares
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub key: ObjectKey,
    pub annotations: BTreeMap<String, String>,
    pub created_at: Option<DateTime<Utc>>,
}

impl Credential {
    pub fn from_secret(secret: &Secret) -> Option<Self> {
        let key = ObjectKey::from_meta(&secret.metadata)?;
        Some(Self {
            key,
            annotations: secret.metadata.annotations.clone().unwrap_or_default(),
            created_at: secret.metadata.creation_timestamp.as_ref().map(|time| time.0),
        })
    }

    /// Non-empty expiry annotation value
    pub fn expiry_value(&self, annotation_key: &str) -> Option<&str> {
        self.annotations
            .get(annotation_key)
            .map(String::as_str)
            .filter(|value| !value.trim().is_empty())
    }
}
