#[cfg(test)]
mod tests {
    use crate::catalog::{
        is_catalog_query, CatalogContext, CatalogEmulator, CatalogSnapshot, ColumnInfo,
        ConstraintInfo, ConstraintKind, ForeignKeyRef, TableInfo, TableKind,
    };
    use crate::command::{classify, command_tag, StatementKind, TransactionCommand};
    use crate::engine::{EvalError, Evaluator, RelationSource};
    use crate::lexer::{render, tokenize};
    use crate::output::{fold_column_names, translate_rows};
    use crate::split::{max_param_index, split_statements};
    use crate::translate::{
        inline_order_by_vectors, IdentifierCase, Translator, TranslatorConfig,
        MAX_VECTOR_LITERAL_LEN,
    };
    use pgbridge_core::{Column, GatewayError, OidRegistry, ResultSet, SchemaMapping, Value};
    use sqlparser::ast::{Query, Statement};
    use sqlparser::dialect::PostgreSqlDialect;
    use sqlparser::parser::Parser;
    use std::collections::HashMap;
    use std::sync::Arc;

    fn translate(sql: &str) -> String {
        Translator::default()
            .translate(sql, &SchemaMapping::default())
            .sql
    }

    #[test]
    fn lexer_is_lossless() {
        let sql = "SELECT E'a\\'b', $tag$ x;'y $tag$, \"Q\"\"d\" /* c /* n */ */ -- t\n FROM t WHERE a::int <-> $12";
        assert_eq!(render(&tokenize(sql)), sql);
    }

    #[test]
    fn folds_identifiers_and_numbers_params() {
        let out = Translator::default().translate(
            "select id, name from users where id = $1;",
            &SchemaMapping::default(),
        );
        assert_eq!(out.sql, "SELECT ID, NAME FROM USERS WHERE ID = ?");
        assert_eq!(out.param_order, vec![1]);
        assert_eq!(out.param_count, 1);
    }

    #[test]
    fn literals_and_quoted_identifiers_are_untouched() {
        let sql = "SELECT 'it''s $1 ; public.x::int' AS \"MixedCase\"";
        let out = Translator::default().translate(sql, &SchemaMapping::default());
        assert_eq!(out.sql, sql);
        assert!(out.param_order.is_empty());
    }

    #[test]
    fn out_of_order_params_bind_in_marker_order() {
        let out = Translator::default().translate(
            "UPDATE t SET a = $2 WHERE id = $1",
            &SchemaMapping::default(),
        );
        assert_eq!(out.sql, "UPDATE T SET A = ? WHERE ID = ?");
        assert_eq!(out.param_order, vec![2, 1]);
        assert_eq!(out.bind(&["first", "second"]), Some(vec!["second", "first"]));
        assert_eq!(out.bind(&["only"]), None);
    }

    #[test]
    fn rewrites_casts() {
        assert_eq!(
            translate("SELECT x::int, y::varchar(10), z::double precision FROM t"),
            "SELECT CAST(X AS INTEGER), CAST(Y AS VARCHAR(10)), CAST(Z AS DOUBLE) FROM T"
        );
        assert_eq!(translate("SELECT flag::boolean"), "SELECT CAST(FLAG AS BIT)");
        assert_eq!(translate("SELECT oid::regclass"), "SELECT OID::REGCLASS");
    }

    #[test]
    fn cast_of_group_after_keyword_keeps_the_keyword_outside() {
        assert_eq!(translate("SELECT(1+2)::int"), "SELECT CAST((1+2) AS INTEGER)");
        assert_eq!(
            translate("SELECT a FROM t WHERE(b)::int = 1 AND(c)::int = 2"),
            "SELECT A FROM T WHERE CAST((B) AS INTEGER) = 1 AND CAST((C) AS INTEGER) = 2"
        );
        assert_eq!(translate("SELECT abs(x)::int FROM t"), "SELECT CAST(ABS(X) AS INTEGER) FROM T");
    }

    #[test]
    fn rewrites_vector_operators() {
        assert_eq!(
            translate("SELECT id FROM items ORDER BY embedding <-> $1 LIMIT 5"),
            "SELECT ID FROM ITEMS ORDER BY VECTOR_L2(EMBEDDING, TO_VECTOR(?, FLOAT)) LIMIT 5"
        );
        assert_eq!(
            translate("SELECT embedding <=> '[1,2,3]' FROM items"),
            "SELECT (1 - VECTOR_COSINE(EMBEDDING, TO_VECTOR('[1,2,3]', FLOAT))) FROM ITEMS"
        );
        assert_eq!(
            translate("SELECT a <#> b FROM items"),
            "SELECT (0 - VECTOR_DOT_PRODUCT(A, B)) FROM ITEMS"
        );
    }

    const NEAREST: &str = "SELECT ID FROM ITEMS WHERE CATEGORY = ? ORDER BY VECTOR_L2(EMBEDDING, TO_VECTOR(?, FLOAT)) LIMIT ?";

    #[test]
    fn order_by_vector_parameter_is_inlined() {
        let out = inline_order_by_vectors(
            NEAREST,
            vec![
                Value::Text("books".into()),
                Value::Vector(vec![0.5, 1.0, 2.0]),
                Value::Int(5),
            ],
        );
        assert_eq!(
            out.sql,
            "SELECT ID FROM ITEMS WHERE CATEGORY = ? ORDER BY VECTOR_L2(EMBEDDING, TO_VECTOR('0.5,1,2', FLOAT)) LIMIT ?"
        );
        assert_eq!(out.params, vec![Value::Text("books".into()), Value::Int(5)]);

        let out = inline_order_by_vectors(
            "SELECT ID FROM ITEMS ORDER BY VECTOR_COSINE(EMBEDDING, TO_VECTOR(?)) DESC",
            vec![Value::Text("[1,2]".into())],
        );
        assert_eq!(
            out.sql,
            "SELECT ID FROM ITEMS ORDER BY VECTOR_COSINE(EMBEDDING, TO_VECTOR('[1,2]', FLOAT)) DESC"
        );
        assert!(out.params.is_empty());
    }

    #[test]
    fn base64_vectors_are_expanded() {
        use base64::Engine;
        let bytes: Vec<u8> = [1.5f32, -2.0f32].iter().flat_map(|f| f.to_le_bytes()).collect();
        let encoded = format!("base64:{}", base64::engine::general_purpose::STANDARD.encode(bytes));

        let out = inline_order_by_vectors(
            "SELECT ID FROM ITEMS ORDER BY VECTOR_DOT_PRODUCT(EMBEDDING, TO_VECTOR(?, FLOAT))",
            vec![Value::Text(encoded.clone())],
        );
        assert_eq!(
            out.sql,
            "SELECT ID FROM ITEMS ORDER BY VECTOR_DOT_PRODUCT(EMBEDDING, TO_VECTOR('1.5,-2', FLOAT))"
        );
        assert!(out.params.is_empty());

        let sql = format!("SELECT ID FROM ITEMS ORDER BY VECTOR_L2(EMBEDDING, TO_VECTOR('{encoded}', FLOAT))");
        let out = inline_order_by_vectors(&sql, Vec::new());
        assert_eq!(
            out.sql,
            "SELECT ID FROM ITEMS ORDER BY VECTOR_L2(EMBEDDING, TO_VECTOR('1.5,-2', FLOAT))"
        );
    }

    #[test]
    fn long_vectors_stay_parameters() {
        let parts = vec!["0.25"; 1024];
        let long = format!("[{}]", parts.join(","));
        assert!(long.len() > MAX_VECTOR_LITERAL_LEN);
        let params = vec![
            Value::Text("books".into()),
            Value::Text(long),
            Value::Int(5),
        ];
        let out = inline_order_by_vectors(NEAREST, params.clone());
        assert_eq!(out.sql, NEAREST);
        assert_eq!(out.params, params);
    }

    #[test]
    fn select_list_and_non_numeric_vectors_are_left_alone() {
        let select_list = "SELECT VECTOR_L2(EMBEDDING, TO_VECTOR(?, FLOAT)) FROM ITEMS";
        let out = inline_order_by_vectors(select_list, vec![Value::Vector(vec![1.0])]);
        assert_eq!(out.sql, select_list);
        assert_eq!(out.params.len(), 1);

        for hostile in ["1,2', FLOAT)) --", "not a vector"] {
            let params = vec![
                Value::Text("books".into()),
                Value::Text(hostile.into()),
                Value::Int(5),
            ];
            let out = inline_order_by_vectors(NEAREST, params.clone());
            assert_eq!(out.sql, NEAREST);
            assert_eq!(out.params, params);
        }
    }

    #[test]
    fn rewrites_transaction_verbs() {
        assert_eq!(translate("begin"), "START TRANSACTION");
        assert_eq!(translate("commit work"), "COMMIT");
        assert_eq!(translate("ROLLBACK"), "ROLLBACK");
        assert_eq!(translate("abort"), "ROLLBACK");
        assert_eq!(translate("savepoint my_sp"), "SAVEPOINT my_sp");
        assert_eq!(
            translate("rollback to savepoint My_Sp"),
            "ROLLBACK TO SAVEPOINT My_Sp"
        );
        assert_eq!(translate("release sp1"), "RELEASE SAVEPOINT sp1");
    }

    #[test]
    fn maps_client_schema_to_backend() {
        assert_eq!(
            translate("SELECT * FROM public.users"),
            "SELECT * FROM SQLUser.USERS"
        );
        assert_eq!(
            translate("SELECT table_name FROM information_schema.tables WHERE table_schema = 'public'"),
            "SELECT TABLE_NAME FROM INFORMATION_SCHEMA.TABLES WHERE TABLE_SCHEMA = 'SQLUser'"
        );
        assert_eq!(
            translate("SELECT 1 FROM x WHERE table_schema NOT IN ('public', 'other')"),
            "SELECT 1 FROM X WHERE TABLE_SCHEMA NOT IN ('SQLUser', 'other')"
        );
        assert_eq!(translate("SELECT 'public'"), "SELECT 'public'");
    }

    #[test]
    fn preserve_case_leaves_words_alone() {
        let translator = Translator::new(TranslatorConfig {
            identifier_case: IdentifierCase::Preserve,
        });
        let out = translator.translate("select Id from Users", &SchemaMapping::default());
        assert_eq!(out.sql, "select Id from Users");
    }

    #[test]
    fn splits_outside_literals_and_comments() {
        let parts = split_statements("SELECT 'a;b'; -- x;\n SELECT 2;;");
        assert_eq!(parts, vec!["SELECT 'a;b'", "-- x;\n SELECT 2"]);
        assert!(split_statements("  ;  ").is_empty());
        assert_eq!(max_param_index("SELECT $3, '$9', $1"), 3);
    }

    #[test]
    fn classifies_statements() {
        assert_eq!(classify("  -- nothing\n"), StatementKind::Empty);
        assert_eq!(
            classify("ROLLBACK TO SAVEPOINT sp"),
            StatementKind::Transaction(TransactionCommand::RollbackTo("sp".into()))
        );
        assert_eq!(
            classify("SET search_path TO public"),
            StatementKind::Set {
                name: "search_path".into(),
                value: "public".into()
            }
        );
        assert_eq!(
            classify("show TRANSACTION ISOLATION LEVEL"),
            StatementKind::Show("transaction isolation level".into())
        );
        assert_eq!(classify("DEALLOCATE ALL"), StatementKind::Deallocate(None));
        assert_eq!(classify("SET TRANSACTION READ ONLY"), StatementKind::Command);
        assert_eq!(classify("(SELECT 1)"), StatementKind::Query);
    }

    #[test]
    fn builds_command_tags() {
        assert_eq!(command_tag("insert into t values (1)", 3), "INSERT 0 3");
        assert_eq!(command_tag("delete from t", 0), "DELETE 0");
        assert_eq!(command_tag("select 1", 1), "SELECT 1");
        assert_eq!(command_tag("CREATE UNIQUE INDEX i ON t(a)", 0), "CREATE INDEX");
        assert_eq!(command_tag("create or replace view v as select 1", 0), "CREATE VIEW");
        assert_eq!(command_tag("truncate t", 0), "TRUNCATE TABLE");
    }

    #[test]
    fn folds_output_names_and_schema_values() {
        let mut columns = vec![
            Column::new("ID", "INTEGER"),
            Column::new("UserName", "VARCHAR"),
            Column::new("TABLE_SCHEMA", "VARCHAR"),
        ];
        fold_column_names(&mut columns);
        let names: Vec<&str> = columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["id", "UserName", "table_schema"]);

        let mut rows = vec![
            vec![Value::Int(1), Value::Null, Value::Text("SQLUser".into())],
            vec![Value::Int(2), Value::Null, Value::Text("%SYS".into())],
        ];
        translate_rows(&columns, &mut rows, &SchemaMapping::default());
        assert_eq!(rows[0][2], Value::Text("public".into()));
        assert_eq!(rows[1][2], Value::Text("%SYS".into()));
    }

    struct Tables(HashMap<String, ResultSet>);

    impl RelationSource for Tables {
        fn relation(&self, parts: &[String]) -> Result<ResultSet, EvalError> {
            let name = parts.last().map(|p| p.to_lowercase()).unwrap_or_default();
            self.0
                .get(&name)
                .cloned()
                .ok_or(EvalError::UnknownRelation(name))
        }
    }

    fn text(s: &str) -> Value {
        Value::Text(s.into())
    }

    fn fixture() -> Tables {
        let employees = ResultSet::new(
            vec![
                Column::new("id", "INTEGER"),
                Column::new("name", "VARCHAR"),
                Column::new("dept", "VARCHAR"),
            ],
            vec![
                vec![Value::Int(1), text("ann"), text("eng")],
                vec![Value::Int(2), text("bob"), text("eng")],
                vec![Value::Int(3), text("cy"), text("ops")],
                vec![Value::Int(4), text("di"), Value::Null],
            ],
        );
        let depts = ResultSet::new(
            vec![Column::new("code", "VARCHAR"), Column::new("title", "VARCHAR")],
            vec![vec![text("eng"), text("Engineering")]],
        );
        let mut tables = HashMap::new();
        tables.insert("employees".to_string(), employees);
        tables.insert("depts".to_string(), depts);
        Tables(tables)
    }

    fn parse_query(sql: &str) -> Query {
        let mut statements = Parser::parse_sql(&PostgreSqlDialect {}, sql).expect("parse");
        match statements.remove(0) {
            Statement::Query(query) => *query,
            other => panic!("not a query: {other}"),
        }
    }

    fn run(sql: &str, params: &[Value]) -> ResultSet {
        let tables = fixture();
        Evaluator::new(&tables, params)
            .query(&parse_query(sql))
            .expect("evaluate")
    }

    #[test]
    fn evaluates_grouping_and_ordering() {
        let result = run(
            "SELECT dept, COUNT(*) AS n FROM employees WHERE dept IS NOT NULL \
             GROUP BY dept ORDER BY n DESC, dept",
            &[],
        );
        assert_eq!(result.columns[0].name, "dept");
        assert_eq!(result.columns[1].name, "n");
        assert_eq!(result.columns[1].type_name, "BIGINT");
        assert_eq!(
            result.rows,
            vec![vec![text("eng"), Value::Int(2)], vec![text("ops"), Value::Int(1)]]
        );
    }

    #[test]
    fn aggregates_over_empty_input_yield_one_row() {
        let result = run("SELECT COUNT(*), MAX(id) FROM employees WHERE id > 10", &[]);
        assert_eq!(result.rows, vec![vec![Value::Int(0), Value::Null]]);
    }

    #[test]
    fn evaluates_like_in_subquery_and_params() {
        let result = run("SELECT name FROM employees WHERE name LIKE '_o%'", &[]);
        assert_eq!(result.rows, vec![vec![text("bob")]]);

        let result = run(
            "SELECT name FROM employees WHERE id IN (SELECT id FROM employees WHERE dept = 'ops')",
            &[],
        );
        assert_eq!(result.rows, vec![vec![text("cy")]]);

        let result = run("SELECT name FROM employees WHERE id = $1", &[Value::Int(2)]);
        assert_eq!(result.rows, vec![vec![text("bob")]]);
    }

    #[test]
    fn left_join_pads_with_nulls() {
        let result = run(
            "SELECT e.name, d.title FROM employees e LEFT JOIN depts d ON d.code = e.dept ORDER BY e.id",
            &[],
        );
        let titles: Vec<Value> = result.rows.iter().map(|r| r[1].clone()).collect();
        assert_eq!(
            titles,
            vec![text("Engineering"), text("Engineering"), Value::Null, Value::Null]
        );
    }

    #[test]
    fn set_operations_respect_quantifier() {
        let result = run("SELECT 1 UNION SELECT 1 UNION ALL SELECT 2", &[]);
        assert_eq!(result.rows, vec![vec![Value::Int(1)], vec![Value::Int(2)]]);
    }

    #[test]
    fn unknown_relation_is_reported() {
        let tables = fixture();
        let err = Evaluator::new(&tables, &[])
            .query(&parse_query("SELECT * FROM missing"))
            .expect_err("unknown table");
        assert_eq!(err.sqlstate(), "42P01");
    }

    fn snapshot() -> CatalogSnapshot {
        let mut users = TableInfo::new("SQLUser", "Users", TableKind::Table);
        users.columns = vec![
            ColumnInfo {
                nullable: false,
                ..ColumnInfo::new("ID", 1, "INTEGER")
            },
            ColumnInfo {
                char_length: Some(50),
                ..ColumnInfo::new("Name", 2, "VARCHAR(50)")
            },
        ];
        users.constraints = vec![ConstraintInfo {
            name: "USERS_PK".into(),
            kind: ConstraintKind::PrimaryKey,
            columns: vec!["ID".into()],
            references: None,
        }];

        let mut orders = TableInfo::new("SQLUser", "Orders", TableKind::Table);
        orders.columns = vec![
            ColumnInfo::new("Order_Id", 1, "INTEGER"),
            ColumnInfo::new("User_Id", 2, "INTEGER"),
            ColumnInfo {
                precision: Some(10),
                scale: Some(2),
                ..ColumnInfo::new("Amount", 3, "NUMERIC(10,2)")
            },
        ];
        orders.constraints = vec![
            ConstraintInfo {
                name: "ORDERS_PK".into(),
                kind: ConstraintKind::PrimaryKey,
                columns: vec!["Order_Id".into()],
                references: None,
            },
            ConstraintInfo {
                name: "ORDERS_USER_FK".into(),
                kind: ConstraintKind::ForeignKey,
                columns: vec!["User_Id".into()],
                references: Some(ForeignKeyRef {
                    schema: "SQLUser".into(),
                    table: "Users".into(),
                    columns: vec!["ID".into()],
                }),
            },
        ];
        CatalogSnapshot {
            schemas: vec!["SQLUser".into(), "Reporting".into()],
            tables: vec![users, orders],
        }
    }

    fn catalog(sql: &str) -> Result<ResultSet, GatewayError> {
        let emulator = CatalogEmulator::new(Arc::new(OidRegistry::new()), "16.0");
        let snapshot = snapshot();
        let mapping = SchemaMapping::default();
        let ctx = CatalogContext {
            snapshot: &snapshot,
            mapping: &mapping,
            user: "alice",
            database: "appdb",
        };
        emulator.execute(sql, &ctx, &[])
    }

    #[test]
    fn recognises_catalog_queries() {
        assert!(is_catalog_query("SELECT relname FROM pg_catalog.pg_class"));
        assert!(is_catalog_query("SELECT 'users'::regclass::oid"));
        assert!(is_catalog_query("select version()"));
        assert!(is_catalog_query("SELECT * FROM pg_depend"));
        assert!(!is_catalog_query("SELECT * FROM users WHERE name = 'pg_class'"));
        assert!(!is_catalog_query("this is not sql"));
    }

    #[test]
    fn lists_columns_of_public_tables() {
        let result = catalog(
            "SELECT c.relname, a.attname, a.attnum FROM pg_catalog.pg_class c \
             JOIN pg_catalog.pg_attribute a ON a.attrelid = c.oid \
             JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace \
             WHERE n.nspname = 'public' AND c.relkind = 'r' ORDER BY c.relname, a.attnum",
        )
        .expect("catalog query");
        let rows: Vec<(String, String, i64)> = result
            .rows
            .iter()
            .map(|r| (r[0].to_string(), r[1].to_string(), r[2].as_i64().unwrap_or(-1)))
            .collect();
        assert_eq!(
            rows,
            vec![
                ("orders".into(), "order_id".into(), 1),
                ("orders".into(), "user_id".into(), 2),
                ("orders".into(), "amount".into(), 3),
                ("users".into(), "id".into(), 1),
                ("users".into(), "name".into(), 2),
            ]
        );
    }

    #[test]
    fn constraint_keys_follow_attribute_numbers() {
        let result = catalog(
            "SELECT con.conname, con.conkey, con.confkey, a.attname FROM pg_constraint con \
             JOIN pg_attribute a ON a.attrelid = con.conrelid AND a.attnum = ANY(con.conkey) \
             WHERE con.contype = 'f'",
        )
        .expect("catalog query");
        assert_eq!(result.rows.len(), 1);
        let row = &result.rows[0];
        assert_eq!(row[0], text("orders_user_fk"));
        assert_eq!(row[1], Value::Array(vec![Value::Int(2)]));
        assert_eq!(row[2], Value::Array(vec![Value::Int(1)]));
        assert_eq!(row[3], text("user_id"));

        let result = catalog(
            "SELECT pg_get_constraintdef(oid) FROM pg_constraint WHERE contype = 'f'",
        )
        .expect("constraint definition");
        assert_eq!(
            result.rows,
            vec![vec![text("FOREIGN KEY (user_id) REFERENCES users(id)")]]
        );
    }

    #[test]
    fn regclass_resolves_through_the_registry() {
        let registry = OidRegistry::new();
        let expected = i64::from(registry.table_oid("SQLUser", "Users"));
        let result = catalog("SELECT 'users'::regclass::oid").expect("regclass");
        assert_eq!(result.columns[0].name, "oid");
        assert_eq!(result.rows, vec![vec![Value::Int(expected)]]);
    }

    #[test]
    fn typmods_and_format_type() {
        let result = catalog(
            "SELECT a.attname, format_type(a.atttypid, a.atttypmod) FROM pg_attribute a \
             JOIN pg_class c ON c.oid = a.attrelid WHERE c.relname = 'orders' AND a.attnum = 3",
        )
        .expect("format_type");
        assert_eq!(
            result.rows,
            vec![vec![text("amount"), text("numeric(10,2)")]]
        );
    }

    #[test]
    fn unsupported_catalog_relation_is_rejected() {
        let err = catalog("SELECT * FROM pg_depend").expect_err("unsupported");
        assert_eq!(err.sqlstate(), "0A000");
        assert!(err.to_string().contains("unsupported catalog query"));
    }

    #[test]
    fn describe_reports_shape_without_rows() {
        let emulator = CatalogEmulator::new(Arc::new(OidRegistry::new()), "16.0");
        let snapshot = snapshot();
        let mapping = SchemaMapping::default();
        let ctx = CatalogContext {
            snapshot: &snapshot,
            mapping: &mapping,
            user: "alice",
            database: "appdb",
        };
        let result = emulator
            .describe("SELECT relname, relkind FROM pg_class WHERE oid = $1", &ctx, 1)
            .expect("describe");
        assert!(result.rows.is_empty());
        assert_eq!(result.columns[0].name, "relname");
        assert_eq!(result.columns[0].type_name, "NAME");
    }
}
