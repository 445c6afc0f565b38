//! Deterministic object identifiers for synthesized catalog rows.
//!
//! An OID is derived from the SHA-256 digest of `namespace:kind:name` with
//! the name lowercased, so the same object keeps its OID across sessions and
//! restarts. Derived values never fall below [`FIRST_USER_OID`].

use dashmap::DashMap;
use sha2::{Digest, Sha256};

pub const PG_CATALOG_NAMESPACE_OID: u32 = 11;
pub const PUBLIC_NAMESPACE_OID: u32 = 2200;
pub const INFORMATION_SCHEMA_NAMESPACE_OID: u32 = 11323;
pub const FIRST_USER_OID: u32 = 16384;

/// Owner reported for every synthesized object (the bootstrap superuser).
pub const BOOTSTRAP_OWNER_OID: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    Namespace,
    Table,
    Column,
    Constraint,
    Index,
    Type,
}

impl ObjectKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ObjectKind::Namespace => "namespace",
            ObjectKind::Table => "table",
            ObjectKind::Column => "column",
            ObjectKind::Constraint => "constraint",
            ObjectKind::Index => "index",
            ObjectKind::Type => "type",
        }
    }
}

pub fn well_known_namespace_oid(name: &str) -> Option<u32> {
    match name.to_ascii_lowercase().as_str() {
        "pg_catalog" => Some(PG_CATALOG_NAMESPACE_OID),
        "public" => Some(PUBLIC_NAMESPACE_OID),
        "information_schema" => Some(INFORMATION_SCHEMA_NAMESPACE_OID),
        _ => None,
    }
}

/// Pure derivation, no caching.
pub fn derive_oid(namespace: &str, kind: ObjectKind, name: &str) -> u32 {
    let identity = format!("{}:{}:{}", namespace, kind.as_str(), name.to_lowercase());
    let digest = Sha256::digest(identity.as_bytes());
    let raw = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);
    let span = u32::MAX - FIRST_USER_OID + 1;
    FIRST_USER_OID + raw % span
}

/// Process-wide cache of derived OIDs. Lookups are lock-free reads; inserts
/// lock a single shard.
#[derive(Debug, Default)]
pub struct OidRegistry {
    cache: DashMap<(String, ObjectKind, String), u32>,
}

impl OidRegistry {
    pub fn new() -> Self {
        Self {
            cache: DashMap::new(),
        }
    }

    pub fn oid(&self, namespace: &str, kind: ObjectKind, name: &str) -> u32 {
        let key = (namespace.to_string(), kind, name.to_lowercase());
        if let Some(found) = self.cache.get(&key) {
            return *found;
        }
        *self
            .cache
            .entry(key)
            .or_insert_with(|| derive_oid(namespace, kind, name))
    }

    pub fn namespace_oid(&self, name: &str) -> u32 {
        well_known_namespace_oid(name)
            .unwrap_or_else(|| self.oid("", ObjectKind::Namespace, name))
    }

    pub fn table_oid(&self, schema: &str, table: &str) -> u32 {
        self.oid(schema, ObjectKind::Table, table)
    }

    pub fn column_oid(&self, schema: &str, table: &str, column: &str) -> u32 {
        self.oid(schema, ObjectKind::Column, &format!("{table}.{column}"))
    }

    pub fn constraint_oid(&self, schema: &str, table: &str, constraint: &str) -> u32 {
        self.oid(schema, ObjectKind::Constraint, &format!("{table}.{constraint}"))
    }

    pub fn index_oid(&self, schema: &str, table: &str, index: &str) -> u32 {
        self.oid(schema, ObjectKind::Index, &format!("{table}.{index}"))
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}
