#[cfg(test)]
mod tests {
    use crate::oid::{derive_oid, FIRST_USER_OID};
    use crate::pgtype::{format_type, oids, type_modifier, type_modifier_for};
    use crate::schema::{MappingSource, SchemaMapping, SchemaMappingHandle};
    use crate::types::Value;
    use crate::{GatewayError, ObjectKind, OidRegistry, PgType};
    use std::cmp::Ordering;
    use std::collections::HashSet;

    #[test]
    fn oid_is_stable_across_registries() {
        let first = OidRegistry::new();
        let second = OidRegistry::new();
        let a = first.table_oid("SQLUser", "users");
        let b = second.table_oid("SQLUser", "users");
        assert_eq!(a, b);
        assert_eq!(a, first.table_oid("SQLUser", "users"));
        assert_eq!(a, derive_oid("SQLUser", ObjectKind::Table, "users"));
        assert!(a >= FIRST_USER_OID);
    }

    #[test]
    fn oid_ignores_name_case() {
        let registry = OidRegistry::new();
        let lower = registry.table_oid("SQLUser", "users");
        assert_eq!(lower, registry.table_oid("SQLUser", "USERS"));
        assert_eq!(lower, registry.table_oid("SQLUser", "Users"));
    }

    #[test]
    fn oid_distinguishes_kinds_and_columns() {
        let registry = OidRegistry::new();
        let oids: HashSet<u32> = [
            registry.table_oid("SQLUser", "users"),
            registry.column_oid("SQLUser", "users", "id"),
            registry.column_oid("SQLUser", "users", "name"),
            registry.column_oid("SQLUser", "orders", "id"),
            registry.constraint_oid("SQLUser", "users", "users_pkey"),
            registry.index_oid("SQLUser", "users", "users_pkey"),
        ]
        .into_iter()
        .collect();
        assert_eq!(oids.len(), 6);
    }

    #[test]
    fn oid_has_no_collisions_on_large_sample() {
        let registry = OidRegistry::new();
        let oids: HashSet<u32> = (0..5000)
            .map(|i| registry.table_oid("SQLUser", &format!("table_{i}")))
            .collect();
        assert_eq!(oids.len(), 5000);
        assert!(oids.iter().all(|oid| *oid >= FIRST_USER_OID));
        assert_eq!(registry.len(), 5000);
    }

    #[test]
    fn well_known_namespaces_use_fixed_oids() {
        let registry = OidRegistry::new();
        assert_eq!(registry.namespace_oid("pg_catalog"), 11);
        assert_eq!(registry.namespace_oid("public"), 2200);
        assert_eq!(registry.namespace_oid("information_schema"), 11323);
        assert!(registry.namespace_oid("Analytics") >= FIRST_USER_OID);
    }

    #[test]
    fn backend_types_map_to_pg_types() {
        assert_eq!(PgType::from_backend("BIGINT").oid, oids::INT8);
        assert_eq!(PgType::from_backend("INTEGER").oid, oids::INT4);
        assert_eq!(PgType::from_backend("TINYINT").oid, oids::INT2);
        assert_eq!(PgType::from_backend("VARCHAR(50)").oid, oids::VARCHAR);
        assert_eq!(PgType::from_backend("LONGVARCHAR").oid, oids::TEXT);
        assert_eq!(PgType::from_backend("NUMERIC(10,2)").oid, oids::NUMERIC);
        assert_eq!(PgType::from_backend("DOUBLE").oid, oids::FLOAT8);
        assert_eq!(PgType::from_backend("TIMESTAMP").oid, oids::TIMESTAMP);
        assert_eq!(PgType::from_backend("VARBINARY").oid, oids::BYTEA);
        assert_eq!(PgType::from_backend("VECTOR(FLOAT,3)").oid, oids::VECTOR);
        assert_eq!(PgType::from_backend("BIT").oid, oids::BOOL);
        assert_eq!(PgType::from_backend("SMALLINT[]").oid, oids::INT2_ARRAY);
        assert_eq!(PgType::from_backend("SOMETHING_ELSE").oid, oids::VARCHAR);
        assert_eq!(PgType::from_backend("DATE").len, 4);
    }

    #[test]
    fn type_modifiers_follow_pg_encoding() {
        assert_eq!(type_modifier("VARCHAR(50)"), 54);
        assert_eq!(type_modifier("CHAR(1)"), 5);
        assert_eq!(type_modifier("NUMERIC(10,2)"), ((10 << 16) | 2) + 4);
        assert_eq!(type_modifier("INTEGER"), -1);
        assert_eq!(type_modifier("VARCHAR"), -1);
        let numeric = PgType::from_backend("NUMERIC");
        assert_eq!(type_modifier_for(&numeric, None, Some(8), Some(3)), ((8 << 16) | 3) + 4);
        let varchar = PgType::from_backend("VARCHAR");
        assert_eq!(type_modifier_for(&varchar, Some(255), None, None), 259);
    }

    #[test]
    fn format_type_renders_modifiers() {
        assert_eq!(format_type(oids::VARCHAR, 54).as_deref(), Some("character varying(50)"));
        assert_eq!(
            format_type(oids::NUMERIC, ((10 << 16) | 2) + 4).as_deref(),
            Some("numeric(10,2)")
        );
        assert_eq!(format_type(oids::INT4, -1).as_deref(), Some("integer"));
        assert_eq!(format_type(999_999, -1), None);
    }

    #[test]
    fn schema_mapping_is_case_insensitive_and_skips_reserved() {
        let mapping = SchemaMapping::default();
        assert_eq!(mapping.to_backend("PUBLIC"), Some("SQLUser"));
        assert_eq!(mapping.to_backend("Public"), Some("SQLUser"));
        assert_eq!(mapping.to_backend("sales"), None);
        assert_eq!(mapping.to_client("SQLUSER"), Some("public"));
        assert_eq!(mapping.to_client("%SYS"), None);
    }

    #[test]
    fn schema_handle_reconfigures_at_runtime() {
        let handle = SchemaMappingHandle::new(SchemaMapping::default());
        let updated = handle.configure(Some("MyAppSchema"), None).expect("configure");
        assert_eq!(updated.backend_schema, "MyAppSchema");
        assert_eq!(updated.source, MappingSource::Runtime);
        assert_eq!(handle.get().backend_schema, "MyAppSchema");

        let pair = handle
            .configure(None, Some(("public", "CustomSchema")))
            .expect("configure pair");
        assert_eq!(pair.backend_schema, "CustomSchema");

        let err = handle.configure(None, None).expect_err("missing argument");
        assert!(err.to_string().contains("must provide"));
        assert!(handle.configure(Some("%SYS"), None).is_err());
        assert_eq!(handle.get().backend_schema, "CustomSchema");
    }

    #[test]
    fn value_ordering_puts_nulls_last() {
        assert_eq!(Value::Int(1).compare(&Value::Float(1.5)), Ordering::Less);
        assert_eq!(Value::Null.compare(&Value::Int(1)), Ordering::Greater);
        assert_eq!(Value::Int(2).sql_eq(&Value::Text("2".into())), Some(true));
        assert_eq!(Value::Null.sql_eq(&Value::Null), None);
    }

    #[test]
    fn vector_literals_parse() {
        assert_eq!(Value::parse_vector("[1, 2.5,3]"), Some(vec![1.0, 2.5, 3.0]));
        assert_eq!(Value::parse_vector("1,2"), Some(vec![1.0, 2.0]));
        assert_eq!(Value::parse_vector("[a,b]"), None);
        assert_eq!(Value::Vector(vec![0.5, 1.0]).to_string(), "[0.5,1]");
    }

    #[test]
    fn error_codes_and_fatality() {
        assert_eq!(GatewayError::Cancelled.sqlstate(), "57014");
        assert_eq!(GatewayError::InFailedTransaction.sqlstate(), "25P02");
        assert!(GatewayError::auth_failed("bob").is_fatal());
        assert!(!GatewayError::backend("42S02", "Table not found").is_fatal());
        assert_eq!(
            GatewayError::UnsupportedCatalog("pg_depend".into()).to_string(),
            "unsupported catalog query: pg_depend"
        );
    }
}
