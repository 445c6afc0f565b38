//! Bidirectional mapping between the client-visible default schema
//! (`public`) and the backend's default schema.

use crate::error::GatewayError;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};
use tracing::info;

pub const CLIENT_DEFAULT_SCHEMA: &str = "public";
pub const DEFAULT_BACKEND_SCHEMA: &str = "SQLUser";
pub const SCHEMA_ENV_VAR: &str = "PGBRIDGE_BACKEND_SCHEMA";

/// Backend system namespaces start with this character and are never mapped.
pub const RESERVED_PREFIX: char = '%';

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MappingSource {
    Default,
    Environment,
    Config,
    Runtime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaMapping {
    pub client_schema: String,
    pub backend_schema: String,
    pub source: MappingSource,
}

impl Default for SchemaMapping {
    fn default() -> Self {
        Self {
            client_schema: CLIENT_DEFAULT_SCHEMA.to_string(),
            backend_schema: DEFAULT_BACKEND_SCHEMA.to_string(),
            source: MappingSource::Default,
        }
    }
}

impl SchemaMapping {
    pub fn new(backend_schema: impl Into<String>, source: MappingSource) -> Self {
        Self {
            client_schema: CLIENT_DEFAULT_SCHEMA.to_string(),
            backend_schema: backend_schema.into(),
            source,
        }
    }

    /// Resolves the startup mapping: environment beats config beats default.
    pub fn resolve(config_schema: Option<&str>) -> Self {
        match std::env::var(SCHEMA_ENV_VAR) {
            Ok(value) if !value.trim().is_empty() => {
                SchemaMapping::new(value.trim(), MappingSource::Environment)
            }
            _ => match config_schema {
                Some(schema) if !schema.trim().is_empty() => {
                    SchemaMapping::new(schema.trim(), MappingSource::Config)
                }
                _ => SchemaMapping::default(),
            },
        }
    }

    pub fn is_reserved(name: &str) -> bool {
        name.starts_with(RESERVED_PREFIX)
    }

    /// Client schema name to backend schema name, when the mapping applies.
    pub fn to_backend(&self, schema: &str) -> Option<&str> {
        if Self::is_reserved(schema) {
            return None;
        }
        schema
            .eq_ignore_ascii_case(&self.client_schema)
            .then_some(self.backend_schema.as_str())
    }

    /// Backend schema name to client schema name, when the mapping applies.
    pub fn to_client(&self, schema: &str) -> Option<&str> {
        if Self::is_reserved(schema) {
            return None;
        }
        schema
            .eq_ignore_ascii_case(&self.backend_schema)
            .then_some(self.client_schema.as_str())
    }

    fn validate(&self) -> Result<(), GatewayError> {
        for name in [&self.client_schema, &self.backend_schema] {
            if name.trim().is_empty() {
                return Err(GatewayError::InvalidParameter(
                    "schema names must not be empty".into(),
                ));
            }
            if Self::is_reserved(name) {
                return Err(GatewayError::InvalidParameter(format!(
                    "schema {name} uses the reserved '{RESERVED_PREFIX}' prefix"
                )));
            }
        }
        Ok(())
    }
}

/// Shared, runtime-reconfigurable mapping. Readers take a snapshot per
/// statement so a concurrent `set` never splits one translation.
#[derive(Debug, Clone, Default)]
pub struct SchemaMappingHandle {
    inner: Arc<RwLock<SchemaMapping>>,
}

impl SchemaMappingHandle {
    pub fn new(mapping: SchemaMapping) -> Self {
        Self {
            inner: Arc::new(RwLock::new(mapping)),
        }
    }

    pub fn get(&self) -> SchemaMapping {
        match self.inner.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn set(&self, mapping: SchemaMapping) -> Result<SchemaMapping, GatewayError> {
        mapping.validate()?;
        let mut guard = match self.inner.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        info!(
            client_schema = %mapping.client_schema,
            backend_schema = %mapping.backend_schema,
            "schema mapping updated"
        );
        *guard = mapping.clone();
        Ok(mapping)
    }

    /// Administrative reconfiguration. Either a new backend schema for
    /// `public`, or an explicit `(client, backend)` pair.
    pub fn configure(
        &self,
        backend_schema: Option<&str>,
        pair: Option<(&str, &str)>,
    ) -> Result<SchemaMapping, GatewayError> {
        let mapping = match (pair, backend_schema) {
            (Some((client, backend)), _) => SchemaMapping {
                client_schema: client.to_string(),
                backend_schema: backend.to_string(),
                source: MappingSource::Runtime,
            },
            (None, Some(backend)) => SchemaMapping::new(backend, MappingSource::Runtime),
            (None, None) => {
                return Err(GatewayError::InvalidParameter(
                    "must provide either a backend schema or a mapping".into(),
                ))
            }
        };
        self.set(mapping)
    }
}
