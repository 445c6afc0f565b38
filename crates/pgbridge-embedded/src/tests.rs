#[cfg(test)]
mod tests {
    use crate::connector::EmbeddedConnector;
    use crate::executor::{describe, Executor, Session};
    use crate::{Database, EngineError};
    use pgbridge_bridge::{
        load_snapshot, BackendConnection, BackendFailure, Bridge, BridgeConfig, CancellationToken,
        Interrupt, Outcome, PoolConfig, RawOutcome, RetryPolicy,
    };
    use pgbridge_core::{ResultSet, Value};
    use pgbridge_sql::catalog::ConstraintKind;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;

    fn text(s: &str) -> Value {
        Value::Text(s.into())
    }

    async fn run(conn: &mut dyn BackendConnection, sql: &str, params: &[Value]) -> RawOutcome {
        conn.execute(sql, params)
            .await
            .unwrap_or_else(|err| panic!("{sql}: {err}"))
    }

    async fn fail(conn: &mut dyn BackendConnection, sql: &str, params: &[Value]) -> BackendFailure {
        match conn.execute(sql, params).await {
            Ok(outcome) => panic!("{sql} succeeded: {outcome:?}"),
            Err(failure) => failure,
        }
    }

    async fn rows(conn: &mut dyn BackendConnection, sql: &str, params: &[Value]) -> ResultSet {
        match run(conn, sql, params).await {
            RawOutcome::Rows(set) => set,
            other => panic!("{sql} returned {other:?}"),
        }
    }

    async fn setup(conn: &mut dyn BackendConnection) {
        run(
            conn,
            "CREATE TABLE USERS (ID INTEGER PRIMARY KEY, NAME VARCHAR(50) NOT NULL, EMAIL VARCHAR(100) UNIQUE)",
            &[],
        )
        .await;
        run(
            conn,
            "CREATE TABLE ORDERS (ID INTEGER, USER_ID INTEGER, TOTAL NUMERIC(10,2) DEFAULT 0, \
             PRIMARY KEY (ID), FOREIGN KEY (USER_ID) REFERENCES USERS (ID))",
            &[],
        )
        .await;
    }

    #[tokio::test]
    async fn create_insert_select_flow() {
        let mut conn = EmbeddedConnector::new().open();
        setup(&mut conn).await;
        let inserted = run(
            &mut conn,
            "INSERT INTO USERS (ID, NAME, EMAIL) VALUES (?, ?, ?), (?, ?, NULL)",
            &[
                Value::Int(1),
                text("alice"),
                text("a@example.com"),
                text("2"),
                text("bob"),
            ],
        )
        .await;
        assert_eq!(inserted, RawOutcome::Affected(2));

        let set = rows(&mut conn, "SELECT ID, NAME FROM USERS WHERE ID = ?", &[text("2")]).await;
        assert_eq!(set.columns[0].name, "ID");
        assert_eq!(set.columns[0].type_name, "INTEGER");
        assert_eq!(set.columns[1].type_name, "VARCHAR(50)");
        assert_eq!(set.rows, vec![vec![Value::Int(2), text("bob")]]);

        run(&mut conn, "INSERT INTO ORDERS (ID, USER_ID) VALUES (10, 1)", &[]).await;
        let set = rows(&mut conn, "SELECT TOTAL FROM ORDERS", &[]).await;
        assert_eq!(set.rows, vec![vec![Value::Float(0.0)]]);
    }

    #[tokio::test]
    async fn dml_touching_no_rows_reports_sqlcode_100() {
        let mut conn = EmbeddedConnector::new().open();
        setup(&mut conn).await;
        let failure = fail(&mut conn, "DELETE FROM USERS", &[]).await;
        assert!(failure.is_no_data());
        assert_eq!(failure.sqlstate, "02000");
        let failure = fail(&mut conn, "UPDATE USERS SET NAME = 'x' WHERE ID = 1", &[]).await;
        assert!(failure.is_no_data());
        let failure = fail(&mut conn, "INSERT INTO USERS SELECT * FROM USERS", &[]).await;
        assert!(failure.is_no_data());
    }

    #[tokio::test]
    async fn postgres_only_syntax_is_rejected() {
        let mut conn = EmbeddedConnector::new().open();
        for sql in [
            "SELECT 1;",
            "SELECT $1",
            "BEGIN",
            "ROLLBACK TO SP1",
            "RELEASE SP1",
        ] {
            let failure = fail(&mut conn, sql, &[Value::Int(1)]).await;
            assert_eq!(failure.sqlstate, "42601", "{sql}");
            assert_eq!(failure.sqlcode, -1, "{sql}");
        }
        let failure = fail(&mut conn, "SELECT ? + ?", &[Value::Int(1)]).await;
        assert_eq!(failure.sqlstate, "07001");
    }

    #[tokio::test]
    async fn constraints_are_enforced() {
        let mut conn = EmbeddedConnector::new().open();
        setup(&mut conn).await;
        run(&mut conn, "INSERT INTO USERS (ID, NAME) VALUES (1, 'alice')", &[]).await;

        let failure = fail(&mut conn, "INSERT INTO USERS (ID) VALUES (2)", &[]).await;
        assert_eq!(failure.sqlstate, "23502");
        let failure = fail(&mut conn, "INSERT INTO USERS (ID, NAME) VALUES (1, 'again')", &[]).await;
        assert_eq!(failure.sqlstate, "23505");
        assert_eq!(failure.sqlcode, -119);
        let failure = fail(&mut conn, "INSERT INTO ORDERS (ID, USER_ID) VALUES (1, 99)", &[]).await;
        assert_eq!(failure.sqlstate, "23503");
        let failure = fail(
            &mut conn,
            "INSERT INTO USERS (ID, NAME) VALUES (3, 'a name that is far too long for the fifty character column')",
            &[],
        )
        .await;
        assert_eq!(failure.sqlstate, "22001");

        run(&mut conn, "INSERT INTO ORDERS (ID, USER_ID) VALUES (1, 1)", &[]).await;
        let failure = fail(&mut conn, "DELETE FROM USERS WHERE ID = 1", &[]).await;
        assert_eq!(failure.sqlstate, "23503");
        let failure = fail(&mut conn, "DROP TABLE USERS", &[]).await;
        assert_eq!(failure.sqlstate, "2BP01");
        let failure = fail(&mut conn, "CREATE TABLE USERS (ID INTEGER)", &[]).await;
        assert_eq!(failure.sqlstate, "42P07");

        // A failed multi-row insert leaves nothing behind.
        let failure = fail(
            &mut conn,
            "INSERT INTO USERS (ID, NAME) VALUES (5, 'eve'), (1, 'dup')",
            &[],
        )
        .await;
        assert_eq!(failure.sqlstate, "23505");
        let set = rows(&mut conn, "SELECT COUNT(*) FROM USERS", &[]).await;
        assert_eq!(set.rows, vec![vec![Value::Int(1)]]);
    }

    #[tokio::test]
    async fn savepoints_undo_partial_work() {
        let mut conn = EmbeddedConnector::new().open();
        setup(&mut conn).await;
        run(&mut conn, "START TRANSACTION", &[]).await;
        run(&mut conn, "INSERT INTO USERS (ID, NAME) VALUES (1, 'alice')", &[]).await;
        run(&mut conn, "SAVEPOINT sp1", &[]).await;
        run(&mut conn, "INSERT INTO USERS (ID, NAME) VALUES (2, 'bob')", &[]).await;
        run(&mut conn, "UPDATE USERS SET NAME = 'carol' WHERE ID = 1", &[]).await;
        run(&mut conn, "ROLLBACK TO SAVEPOINT sp1", &[]).await;
        run(&mut conn, "COMMIT", &[]).await;

        let set = rows(&mut conn, "SELECT ID, NAME FROM USERS ORDER BY ID", &[]).await;
        assert_eq!(set.rows, vec![vec![Value::Int(1), text("alice")]]);
        assert!(!conn.in_transaction());

        let failure = fail(&mut conn, "ROLLBACK TO SAVEPOINT sp1", &[]).await;
        assert_eq!(failure.sqlstate, "3B001");
    }

    #[test]
    fn rollback_and_abandon_revert_everything() {
        let mut db = Database::new();
        let flag = AtomicBool::new(false);
        let mut session = Session::default();
        let mut exec = Executor::new(&mut db, &mut session, &flag);
        exec.execute("CREATE TABLE T (A INTEGER)", &[]).expect("create");
        exec.execute("START TRANSACTION", &[]).expect("start");
        exec.execute("INSERT INTO T (A) VALUES (1)", &[]).expect("insert");
        exec.execute("CREATE TABLE U (B INTEGER)", &[]).expect("create u");
        exec.execute("ROLLBACK", &[]).expect("rollback");
        let err = exec.execute("SELECT * FROM U", &[]).expect_err("U rolled back");
        assert_eq!(err.sqlstate(), "42P01");
        assert_eq!(
            exec.execute("DELETE FROM T", &[]).expect_err("empty"),
            EngineError::NoData
        );

        exec.execute("START TRANSACTION", &[]).expect("start");
        exec.execute("INSERT INTO T (A) VALUES (2)", &[]).expect("insert");
        drop(exec);
        assert!(session.in_transaction());
        session.abandon(&mut db);
        let mut exec = Executor::new(&mut db, &mut session, &flag);
        match exec.execute("SELECT COUNT(*) FROM T", &[]).expect("count") {
            RawOutcome::Rows(set) => assert_eq!(set.rows, vec![vec![Value::Int(0)]]),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn vectors_order_by_distance() {
        let mut conn = EmbeddedConnector::new().open();
        run(
            &mut conn,
            "CREATE TABLE ITEMS (ID INTEGER PRIMARY KEY, EMBEDDING VECTOR(FLOAT, 3))",
            &[],
        )
        .await;
        for (id, vector) in [(1, "[1,0,0]"), (2, "[0,1,0]"), (3, "[0.9,0.1,0]")] {
            run(
                &mut conn,
                "INSERT INTO ITEMS (ID, EMBEDDING) VALUES (?, TO_VECTOR(?, FLOAT))",
                &[Value::Int(id), text(vector)],
            )
            .await;
        }
        let set = rows(
            &mut conn,
            "SELECT ID, VECTOR_L2(EMBEDDING, TO_VECTOR(?, FLOAT)) AS DIST FROM ITEMS \
             ORDER BY DIST LIMIT 2",
            &[text("[1,0,0]")],
        )
        .await;
        let ids: Vec<Value> = set.rows.iter().map(|r| r[0].clone()).collect();
        assert_eq!(ids, vec![Value::Int(1), Value::Int(3)]);
        assert_eq!(set.columns[1].type_name, "DOUBLE");

        let failure = fail(
            &mut conn,
            "INSERT INTO ITEMS (ID, EMBEDDING) VALUES (4, TO_VECTOR('[1,2]', FLOAT))",
            &[],
        )
        .await;
        assert_eq!(failure.sqlstate, "22000");
    }

    #[tokio::test]
    async fn views_and_describe() {
        let mut conn = EmbeddedConnector::new().open();
        setup(&mut conn).await;
        run(&mut conn, "INSERT INTO USERS (ID, NAME) VALUES (1, 'alice'), (2, 'bob')", &[]).await;
        run(
            &mut conn,
            "CREATE VIEW USER_NAMES (USER_NAME) AS SELECT NAME FROM USERS WHERE ID > 1",
            &[],
        )
        .await;
        let set = rows(&mut conn, "SELECT USER_NAME FROM USER_NAMES", &[]).await;
        assert_eq!(set.rows, vec![vec![text("bob")]]);

        let columns = conn
            .describe("SELECT ID, NAME FROM USERS WHERE ID = ?")
            .await
            .expect("describe");
        let described: Vec<(&str, &str)> = columns
            .iter()
            .map(|c| (c.name.as_str(), c.type_name.as_str()))
            .collect();
        assert_eq!(described, vec![("ID", "INTEGER"), ("NAME", "VARCHAR(50)")]);
        let columns = conn
            .describe("DELETE FROM USERS WHERE ID = ?")
            .await
            .expect("describe");
        assert!(columns.is_empty());
        // Unknown relations fail at describe time.
        let db = Database::new();
        assert!(describe(&db, "SELECT * FROM MISSING").is_err());
    }

    #[tokio::test]
    async fn interrupt_aborts_the_running_statement() {
        let mut conn = EmbeddedConnector::new().open();
        setup(&mut conn).await;
        conn.interrupt_handle().interrupt();
        let failure = fail(&mut conn, "SELECT * FROM USERS", &[]).await;
        assert_eq!(failure.sqlstate, "57014");
        rows(&mut conn, "SELECT * FROM USERS", &[]).await;
    }

    #[tokio::test]
    async fn information_schema_round_trips_through_the_bridge() {
        let connector = EmbeddedConnector::new();
        let mut conn = connector.open();
        setup(&mut conn).await;
        run(
            &mut conn,
            "CREATE TABLE LINES (ORDER_ID INTEGER, LINE_NO INTEGER, QTY INTEGER, \
             CONSTRAINT LINES_PK PRIMARY KEY (ORDER_ID, LINE_NO), \
             CONSTRAINT LINES_ORDER_FK FOREIGN KEY (ORDER_ID) REFERENCES ORDERS (ID))",
            &[],
        )
        .await;

        let bridge = Bridge::new(
            Arc::new(connector),
            PoolConfig::default(),
            RetryPolicy::default(),
            BridgeConfig::default(),
        );
        let snapshot = load_snapshot(&bridge, &CancellationToken::new())
            .await
            .expect("snapshot");
        assert_eq!(snapshot.schemas, vec!["SQLUser".to_string()]);
        assert_eq!(snapshot.tables.len(), 3);

        let users = snapshot.table("SQLUser", "USERS").expect("users");
        let names: Vec<&str> = users.columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["ID", "NAME", "EMAIL"]);
        assert!(!users.columns[0].nullable);
        assert_eq!(users.columns[1].char_length, Some(50));

        let orders = snapshot.table("SQLUser", "ORDERS").expect("orders");
        let total = orders.column("TOTAL").expect("total");
        assert_eq!((total.precision, total.scale), (Some(10), Some(2)));
        assert_eq!(total.default.as_deref(), Some("0"));
        let fk = orders
            .constraints
            .iter()
            .find(|c| c.kind == ConstraintKind::ForeignKey)
            .expect("fk");
        let target = fk.references.as_ref().expect("target");
        assert_eq!(target.table, "USERS");
        assert_eq!(target.columns, vec!["ID".to_string()]);

        let lines = snapshot.table("SQLUser", "LINES").expect("lines");
        let pk = lines
            .constraints
            .iter()
            .find(|c| c.name == "LINES_PK")
            .expect("pk");
        assert_eq!(pk.columns, vec!["ORDER_ID".to_string(), "LINE_NO".to_string()]);

        // DML through the bridge: zero rows is a tagged success.
        let outcome = bridge
            .execute("DELETE FROM LINES", &[], &CancellationToken::new())
            .await
            .expect("delete");
        assert_eq!(
            outcome,
            Outcome::Command {
                tag: "DELETE 0".into()
            }
        );
    }
}
