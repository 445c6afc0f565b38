#[cfg(test)]
mod tests {
    use crate::admin::{self, AdminState, MappingUpdate};
    use crate::auth::{Authenticator, ScramVerifier, SCRAM_MECHANISM};
    use crate::cancel::CancelRegistry;
    use crate::config::{AuthConfig, AuthMethod, Config, TlsConfig, UserConfig};
    use crate::server::Gateway;
    use crate::session;
    use crate::tls::build_acceptor;
    use axum::extract::State;
    use axum::http::StatusCode;
    use axum::Json;
    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine;
    use bytes::{BufMut, BytesMut};
    use hmac::{Hmac, Mac};
    use pgbridge_core::GatewayError;
    use pgbridge_embedded::EmbeddedConnector;
    use sha2::{Digest, Sha256};
    use std::io::Write;
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

    const PROTOCOL_3: i32 = 196_608;
    const INT4_OID: u32 = 23;

    /// One backend message as the client sees it.
    #[derive(Debug)]
    struct Msg {
        tag: u8,
        body: Vec<u8>,
    }

    impl Msg {
        fn tag(&self) -> char {
            self.tag as char
        }

        fn int(&self, at: usize) -> i32 {
            let mut raw = [0u8; 4];
            raw.copy_from_slice(&self.body[at..at + 4]);
            i32::from_be_bytes(raw)
        }

        /// CommandComplete tag.
        fn text(&self) -> String {
            String::from_utf8_lossy(self.body.split(|b| *b == 0).next().unwrap_or_default())
                .into_owned()
        }

        /// `C` field of an ErrorResponse or NoticeResponse.
        fn sqlstate(&self) -> String {
            self.body
                .split(|b| *b == 0)
                .find_map(|field| field.strip_prefix(b"C"))
                .map(|code| String::from_utf8_lossy(code).into_owned())
                .unwrap_or_default()
        }

        /// Column values of a DataRow; `None` for NULL.
        fn values(&self) -> Vec<Option<Vec<u8>>> {
            let count = u16::from_be_bytes([self.body[0], self.body[1]]) as usize;
            let mut at = 2;
            let mut out = Vec::with_capacity(count);
            for _ in 0..count {
                let len = self.int(at);
                at += 4;
                if len < 0 {
                    out.push(None);
                } else {
                    out.push(Some(self.body[at..at + len as usize].to_vec()));
                    at += len as usize;
                }
            }
            out
        }

        fn text_values(&self) -> Vec<String> {
            self.values()
                .into_iter()
                .map(|v| String::from_utf8(v.unwrap_or_default()).expect("utf8"))
                .collect()
        }

        /// Field names of a RowDescription.
        fn field_names(&self) -> Vec<String> {
            let count = u16::from_be_bytes([self.body[0], self.body[1]]) as usize;
            let mut at = 2;
            let mut names = Vec::with_capacity(count);
            for _ in 0..count {
                let end = at + self.body[at..].iter().position(|b| *b == 0).expect("name");
                names.push(String::from_utf8_lossy(&self.body[at..end]).into_owned());
                at = end + 1 + 18;
            }
            names
        }

        /// (type oid, format code) of each RowDescription field.
        fn field_types_and_formats(&self) -> Vec<(i32, i16)> {
            let count = u16::from_be_bytes([self.body[0], self.body[1]]) as usize;
            let mut at = 2;
            let mut fields = Vec::with_capacity(count);
            for _ in 0..count {
                let end = at + self.body[at..].iter().position(|b| *b == 0).expect("name");
                let oid = self.int(end + 7);
                let format = i16::from_be_bytes([self.body[end + 17], self.body[end + 18]]);
                fields.push((oid, format));
                at = end + 1 + 18;
            }
            fields
        }
    }

    struct Client {
        stream: DuplexStream,
    }

    impl Client {
        async fn send(&mut self, tag: u8, body: &[u8]) {
            let mut buf = BytesMut::new();
            buf.put_u8(tag);
            buf.put_i32(body.len() as i32 + 4);
            buf.extend_from_slice(body);
            self.stream.write_all(&buf).await.expect("send");
        }

        async fn startup(&mut self, user: &str) {
            let mut body = BytesMut::new();
            body.put_i32(PROTOCOL_3);
            for (key, value) in [("user", user), ("database", "appdb"), ("application_name", "tests")] {
                body.extend_from_slice(key.as_bytes());
                body.put_u8(0);
                body.extend_from_slice(value.as_bytes());
                body.put_u8(0);
            }
            body.put_u8(0);
            let mut packet = BytesMut::new();
            packet.put_i32(body.len() as i32 + 4);
            packet.extend_from_slice(&body);
            self.stream.write_all(&packet).await.expect("startup");
        }

        async fn recv(&mut self) -> Msg {
            let tag = self.stream.read_u8().await.expect("tag");
            let len = self.stream.read_i32().await.expect("len");
            let mut body = vec![0u8; len as usize - 4];
            self.stream.read_exact(&mut body).await.expect("body");
            Msg { tag, body }
        }

        /// Reads through the next ReadyForQuery, which is returned last.
        async fn until_ready(&mut self) -> Vec<Msg> {
            let mut out = Vec::new();
            loop {
                let msg = self.recv().await;
                let done = msg.tag == b'Z';
                out.push(msg);
                if done {
                    return out;
                }
            }
        }

        async fn query(&mut self, sql: &str) -> Vec<Msg> {
            let mut body = sql.as_bytes().to_vec();
            body.push(0);
            self.send(b'Q', &body).await;
            self.until_ready().await
        }

        /// Runs `sql` and returns its rows as text.
        async fn rows(&mut self, sql: &str) -> Vec<Vec<String>> {
            let msgs = self.query(sql).await;
            if let Some(err) = msgs.iter().find(|m| m.tag == b'E') {
                panic!("{sql} failed: {}", String::from_utf8_lossy(&err.body));
            }
            msgs.iter()
                .filter(|m| m.tag == b'D')
                .map(Msg::text_values)
                .collect()
        }

        async fn parse(&mut self, name: &str, sql: &str, oids: &[u32]) {
            let mut body = BytesMut::new();
            put_cstr(&mut body, name);
            put_cstr(&mut body, sql);
            body.put_i16(oids.len() as i16);
            for oid in oids {
                body.put_u32(*oid);
            }
            self.send(b'P', &body).await;
        }

        async fn bind(&mut self, portal: &str, statement: &str, params: &[(i16, &[u8])], results: &[i16]) {
            let mut body = BytesMut::new();
            put_cstr(&mut body, portal);
            put_cstr(&mut body, statement);
            body.put_i16(params.len() as i16);
            for (format, _) in params {
                body.put_i16(*format);
            }
            body.put_i16(params.len() as i16);
            for (_, value) in params {
                body.put_i32(value.len() as i32);
                body.extend_from_slice(value);
            }
            body.put_i16(results.len() as i16);
            for format in results {
                body.put_i16(*format);
            }
            self.send(b'B', &body).await;
        }

        async fn describe(&mut self, target: u8, name: &str) {
            let mut body = BytesMut::new();
            body.put_u8(target);
            put_cstr(&mut body, name);
            self.send(b'D', &body).await;
        }

        async fn execute(&mut self, portal: &str, max_rows: i32) {
            let mut body = BytesMut::new();
            put_cstr(&mut body, portal);
            body.put_i32(max_rows);
            self.send(b'E', &body).await;
        }

        async fn sync(&mut self) -> Vec<Msg> {
            self.send(b'S', &[]).await;
            self.until_ready().await
        }
    }

    fn put_cstr(buf: &mut BytesMut, s: &str) {
        buf.extend_from_slice(s.as_bytes());
        buf.put_u8(0);
    }

    fn tags(msgs: &[Msg]) -> String {
        msgs.iter().map(Msg::tag).collect()
    }

    fn ready_state(msgs: &[Msg]) -> char {
        let last = msgs.last().expect("ready");
        assert_eq!(last.tag(), 'Z');
        last.body[0] as char
    }

    fn trust_config() -> Config {
        let mut config = Config::default();
        config.security.auth.method = AuthMethod::Trust;
        config.admin.enabled = false;
        config
    }

    fn gateway(config: Config) -> Arc<Gateway> {
        Arc::new(Gateway::new(config, Arc::new(EmbeddedConnector::new())).expect("gateway"))
    }

    fn open(gateway: &Arc<Gateway>) -> Client {
        let (client, server) = tokio::io::duplex(64 * 1024);
        tokio::spawn(session::serve(server, gateway.clone()));
        Client { stream: client }
    }

    async fn connect(gateway: &Arc<Gateway>) -> (Client, Vec<Msg>) {
        let mut client = open(gateway);
        client.startup("alice").await;
        let greeting = client.until_ready().await;
        (client, greeting)
    }

    fn user(name: &str, plain: &str) -> UserConfig {
        UserConfig {
            username: name.to_string(),
            password_hash: None,
            password_plain: Some(plain.to_string()),
            scram_verifier: None,
            superuser: false,
        }
    }

    #[test]
    fn config_parses_and_validates() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        writeln!(
            file,
            r#"
[server]
listen_addr = "0.0.0.0:6543"
server_version = "16.2"

[backend]
pool_size = 4
statement_timeout_ms = 1500

[translation]
backend_schema = "Sales"
identifier_case = "preserve"

[security.auth]
method = "scram-sha-256"

[[security.auth.users]]
username = "alice"
password_plain = "secret"
superuser = true
"#
        )
        .expect("write");
        let path = file.path().to_str().expect("path").to_string();
        let config = Config::from_path(&path).expect("config");
        assert_eq!(config.server.listen_addr, "0.0.0.0:6543");
        assert_eq!(config.server.server_version_num(), "160002");
        assert_eq!(config.backend.pool().base_size, 4);
        assert_eq!(
            config.backend.bridge().statement_timeout,
            Some(std::time::Duration::from_millis(1500))
        );
        assert_eq!(config.translation.backend_schema.as_deref(), Some("Sales"));
        assert!(config.security.auth.users[0].superuser);
        assert!(config.admin.enabled);

        assert!(Config::from_toml("[server]\nlisten_addr = \"nowhere\"\n").is_err());
        assert!(Config::from_toml("[security.auth]\nmethod = \"password\"\n").is_err());
        assert!(Config::from_toml("[security.tls]\nenabled = true\n[security.auth]\nmethod = \"trust\"\n").is_err());
        assert!(Config::from_toml("[security.auth]\nmethod = \"trust\"\n").is_ok());
    }

    #[test]
    fn tls_acceptor_needs_readable_pem_files() {
        let disabled = TlsConfig::default();
        assert!(build_acceptor(&disabled).expect("disabled").is_none());

        let empty = tempfile::NamedTempFile::new().expect("tempfile");
        let path = empty.path().to_str().expect("path").to_string();
        let config = TlsConfig {
            enabled: true,
            cert_path: Some(path.clone()),
            key_path: Some(path),
        };
        let err = build_acceptor(&config).err().expect("no certificates");
        assert!(err.to_string().contains("no certificates"));

        let missing = TlsConfig {
            enabled: true,
            cert_path: Some("/nonexistent/server.crt".into()),
            key_path: Some("/nonexistent/server.key".into()),
        };
        assert!(build_acceptor(&missing).is_err());
    }

    #[test]
    fn scram_verifier_text_round_trips_through_derive() {
        let derived = ScramVerifier::derive("pencil", b"saltsaltsaltsalt".to_vec(), 4096);
        let text = format!(
            "SCRAM-SHA-256${}:{}${}:{}",
            derived.iterations,
            BASE64.encode(&derived.salt),
            BASE64.encode(&derived.stored_key),
            BASE64.encode(&derived.server_key)
        );
        assert_eq!(ScramVerifier::parse(&text), Some(derived));
        assert_eq!(ScramVerifier::parse("md5abcdef"), None);
    }

    #[test]
    fn password_verification_accepts_plain_and_rejects_others() {
        let config = AuthConfig {
            method: AuthMethod::Password,
            users: vec![user("alice", "secret")],
        };
        let auth = Authenticator::new(&config).expect("authenticator");
        auth.verify_password("alice", "secret").expect("right password");
        let err = auth.verify_password("alice", "wrong").expect_err("wrong password");
        assert_eq!(err.sqlstate(), "28P01");
        assert!(auth.verify_password("mallory", "secret").is_err());
    }

    fn hmac(key: &[u8], data: &[u8]) -> Vec<u8> {
        let mut mac = Hmac::<Sha256>::new_from_slice(key).expect("hmac key");
        mac.update(data);
        mac.finalize().into_bytes().to_vec()
    }

    /// Client side of SCRAM-SHA-256: returns the client-final-message.
    fn client_final(password: &str, client_first_bare: &str, server_first: &str) -> String {
        let attr = |name: &str| {
            server_first
                .split(',')
                .find_map(|a| a.strip_prefix(name))
                .expect("server-first attribute")
                .to_string()
        };
        let nonce = attr("r=");
        let salt = BASE64.decode(attr("s=")).expect("salt");
        let iterations: u32 = attr("i=").parse().expect("iterations");
        let mut salted = [0u8; 32];
        pbkdf2::pbkdf2_hmac::<Sha256>(password.as_bytes(), &salt, iterations, &mut salted);
        let client_key = hmac(&salted, b"Client Key");
        let stored_key = Sha256::digest(&client_key);
        let without_proof = format!("c=biws,r={nonce}");
        let auth_message = format!("{client_first_bare},{server_first},{without_proof}");
        let signature = hmac(&stored_key, auth_message.as_bytes());
        let proof: Vec<u8> = client_key.iter().zip(&signature).map(|(a, b)| a ^ b).collect();
        format!("{without_proof},p={}", BASE64.encode(proof))
    }

    async fn scram_login(gateway: &Arc<Gateway>, password: &str) -> Vec<Msg> {
        let mut client = open(gateway);
        client.startup("alice").await;
        let sasl = client.recv().await;
        assert_eq!((sasl.tag(), sasl.int(0)), ('R', 10));
        assert!(String::from_utf8_lossy(&sasl.body).contains(SCRAM_MECHANISM));

        let bare = "n=alice,r=fyko+d2lbbFgONRv9qkxdawL";
        let first = format!("n,,{bare}");
        let mut body = BytesMut::new();
        put_cstr(&mut body, SCRAM_MECHANISM);
        body.put_i32(first.len() as i32);
        body.extend_from_slice(first.as_bytes());
        client.send(b'p', &body).await;

        let cont = client.recv().await;
        assert_eq!((cont.tag(), cont.int(0)), ('R', 11));
        let server_first = String::from_utf8(cont.body[4..].to_vec()).expect("utf8");
        assert!(server_first.starts_with("r=fyko+d2lbbFgONRv9qkxdawL"));
        let reply = client_final(password, bare, &server_first);
        client.send(b'p', reply.as_bytes()).await;

        let mut out = Vec::new();
        loop {
            let msg = client.recv().await;
            let done = matches!(msg.tag, b'Z' | b'E');
            out.push(msg);
            if done {
                return out;
            }
        }
    }

    #[tokio::test]
    async fn scram_handshake_authenticates_and_rejects_bad_proofs() {
        let mut config = trust_config();
        config.security.auth = AuthConfig {
            method: AuthMethod::ScramSha256,
            users: vec![user("alice", "pencil")],
        };
        let gateway = gateway(config);

        let msgs = scram_login(&gateway, "pencil").await;
        let fin = &msgs[0];
        assert_eq!((fin.tag(), fin.int(0)), ('R', 12));
        assert!(fin.body[4..].starts_with(b"v="));
        assert_eq!((msgs[1].tag(), msgs[1].int(0)), ('R', 0));
        assert_eq!(ready_state(&msgs), 'I');

        let msgs = scram_login(&gateway, "not pencil").await;
        let err = msgs.last().expect("error");
        assert_eq!(err.tag(), 'E');
        assert_eq!(err.sqlstate(), "28P01");
    }

    #[tokio::test]
    async fn startup_reports_parameters_and_key_data() {
        let gateway = gateway(trust_config());
        let (_client, greeting) = connect(&gateway).await;
        assert_eq!(greeting[0].tag(), 'R');
        assert_eq!(greeting[0].int(0), 0);
        let params: Vec<String> = greeting
            .iter()
            .filter(|m| m.tag == b'S')
            .map(Msg::text)
            .collect();
        for key in ["server_version", "server_encoding", "client_encoding", "DateStyle", "integer_datetimes"] {
            assert!(params.iter().any(|p| p == key), "missing {key}");
        }
        let app = greeting
            .iter()
            .find(|m| m.tag == b'S' && m.text() == "application_name")
            .expect("application_name");
        assert!(app.body.ends_with(b"tests\0"));
        let key = greeting.iter().find(|m| m.tag == b'K').expect("key data");
        assert!(key.int(0) > 0);
        assert_eq!(ready_state(&greeting), 'I');
        assert_eq!(gateway.cancel.len(), 1);
    }

    #[tokio::test]
    async fn ssl_request_is_declined_without_tls() {
        let gateway = gateway(trust_config());
        let mut client = open(&gateway);
        let mut packet = BytesMut::new();
        packet.put_i32(8);
        packet.put_i32(80_877_103);
        client.stream.write_all(&packet).await.expect("ssl request");
        assert_eq!(client.stream.read_u8().await.expect("answer"), b'N');
        client.startup("alice").await;
        assert_eq!(ready_state(&client.until_ready().await), 'I');
    }

    #[tokio::test]
    async fn unsupported_protocol_version_is_fatal() {
        let gateway = gateway(trust_config());
        let mut client = open(&gateway);
        let mut packet = BytesMut::new();
        packet.put_i32(8);
        packet.put_i32(2 << 16);
        client.stream.write_all(&packet).await.expect("startup");
        let err = client.recv().await;
        assert_eq!(err.tag(), 'E');
        assert_eq!(err.sqlstate(), "0A000");
    }

    #[tokio::test]
    async fn simple_queries_round_trip_through_the_backend() {
        let gateway = gateway(trust_config());
        let (mut client, _) = connect(&gateway).await;

        assert_eq!(client.rows("SELECT 1").await, vec![vec!["1".to_string()]]);

        let msgs = client
            .query("CREATE TABLE users (id int primary key, name varchar(20))")
            .await;
        assert_eq!(tags(&msgs), "CZ");
        assert_eq!(msgs[0].text(), "CREATE TABLE");

        let msgs = client
            .query("INSERT INTO users VALUES (1, 'alice'); INSERT INTO users VALUES (2, 'bob')")
            .await;
        assert_eq!(tags(&msgs), "CCZ");
        assert_eq!(msgs[1].text(), "INSERT 0 1");

        let msgs = client.query("SELECT id, name FROM users ORDER BY id").await;
        assert_eq!(tags(&msgs), "TDDCZ");
        assert_eq!(msgs[0].field_names(), vec!["id", "name"]);
        assert_eq!(msgs[2].text_values(), vec!["2", "bob"]);
        assert_eq!(msgs[3].text(), "SELECT 2");

        let msgs = client.query("DELETE FROM users WHERE id = 99").await;
        assert_eq!(msgs[0].text(), "DELETE 0");

        let msgs = client.query("").await;
        assert_eq!(tags(&msgs), "IZ");

        let msgs = client.query("SELECT * FROM missing; SELECT 1").await;
        assert_eq!(tags(&msgs), "EZ");
        assert_eq!(msgs[0].sqlstate(), "42P01");
    }

    #[tokio::test]
    async fn set_and_show_use_session_settings() {
        let gateway = gateway(trust_config());
        let (mut client, _) = connect(&gateway).await;

        let msgs = client.query("SET application_name = 'reports'").await;
        assert_eq!(tags(&msgs), "SCZ");
        assert_eq!(msgs[1].text(), "SET");

        assert_eq!(client.rows("SHOW application_name").await, vec![vec!["reports".to_string()]]);
        let msgs = client.query("SHOW no_such_setting").await;
        assert_eq!(msgs[0].sqlstate(), "42704");
    }

    #[tokio::test]
    async fn transaction_blocks_track_failure_until_rollback() {
        let gateway = gateway(trust_config());
        let (mut client, _) = connect(&gateway).await;
        client.query("CREATE TABLE t (a int)").await;

        let msgs = client.query("BEGIN").await;
        assert_eq!(msgs[0].text(), "BEGIN");
        assert_eq!(ready_state(&msgs), 'T');
        assert_eq!(ready_state(&client.query("INSERT INTO t VALUES (1)").await), 'T');

        let msgs = client.query("SELECT * FROM missing").await;
        assert_eq!(msgs[0].sqlstate(), "42P01");
        assert_eq!(ready_state(&msgs), 'E');

        let msgs = client.query("SELECT 1").await;
        assert_eq!(msgs[0].sqlstate(), "25P02");
        assert_eq!(ready_state(&msgs), 'E');

        let msgs = client.query("COMMIT").await;
        assert_eq!(msgs[0].text(), "ROLLBACK");
        assert_eq!(ready_state(&msgs), 'I');

        assert_eq!(client.rows("SELECT COUNT(*) FROM t").await, vec![vec!["0".to_string()]]);

        let msgs = client.query("COMMIT").await;
        assert_eq!(tags(&msgs), "NCZ");
        assert_eq!(msgs[0].sqlstate(), "25P01");
    }

    #[tokio::test]
    async fn savepoints_roll_back_partial_work() {
        let gateway = gateway(trust_config());
        let (mut client, _) = connect(&gateway).await;
        client.query("CREATE TABLE t (a int)").await;

        for sql in [
            "BEGIN",
            "INSERT INTO t VALUES (1)",
            "SAVEPOINT sp1",
            "INSERT INTO t VALUES (2)",
        ] {
            assert_eq!(ready_state(&client.query(sql).await), 'T', "{sql}");
        }
        assert_eq!(ready_state(&client.query("SELECT * FROM missing").await), 'E');
        let msgs = client.query("ROLLBACK TO SAVEPOINT sp1").await;
        assert_eq!(msgs[0].text(), "ROLLBACK");
        assert_eq!(ready_state(&msgs), 'T');
        assert_eq!(ready_state(&client.query("COMMIT").await), 'I');

        assert_eq!(client.rows("SELECT a FROM t").await, vec![vec!["1".to_string()]]);

        let msgs = client.query("SAVEPOINT outside").await;
        assert_eq!(msgs[0].sqlstate(), "25P01");
        assert_eq!(ready_state(&msgs), 'I');
    }

    #[tokio::test]
    async fn extended_protocol_binds_binary_and_suspends_portals() {
        let gateway = gateway(trust_config());
        let (mut client, _) = connect(&gateway).await;
        client
            .query("CREATE TABLE users (id int primary key, name varchar(20))")
            .await;
        client
            .query("INSERT INTO users VALUES (1, 'alice'), (2, 'bob'), (3, 'carol')")
            .await;

        client
            .parse("by_id", "SELECT id, name FROM users WHERE id > $1 ORDER BY id", &[INT4_OID])
            .await;
        client.describe(b'S', "by_id").await;
        client.bind("", "by_id", &[(1, &0i32.to_be_bytes()[..])], &[1, 0]).await;
        client.execute("", 2).await;
        client.execute("", 0).await;
        let msgs = client.sync().await;
        assert_eq!(tags(&msgs), "1tT2DDsDCZ");

        let params = &msgs[1];
        assert_eq!(params.body[..2], [0, 1]);
        assert_eq!(params.int(2), INT4_OID as i32);
        assert_eq!(msgs[2].field_names(), vec!["id", "name"]);

        let first = msgs[4].values();
        assert_eq!(first[0].as_deref(), Some(&1i32.to_be_bytes()[..]));
        assert_eq!(first[1].as_deref(), Some(&b"alice"[..]));
        assert_eq!(msgs[8].text(), "SELECT 1");

        // The named statement survives Sync; text parameters work too.
        client.bind("", "by_id", &[(0, &b"2"[..])], &[]).await;
        client.execute("", 0).await;
        let msgs = client.sync().await;
        assert_eq!(tags(&msgs), "2DCZ");
        assert_eq!(msgs[1].text_values(), vec!["3", "carol"]);
    }

    #[tokio::test]
    async fn described_portal_formats_match_data_rows() {
        const TIMESTAMP_OID: i32 = 1114;
        let gateway = gateway(trust_config());
        let (mut client, _) = connect(&gateway).await;
        client
            .query("CREATE TABLE events (id int primary key, happened timestamp, note varchar(20))")
            .await;
        let msgs = client
            .query("INSERT INTO events VALUES (7, '2000-01-02 00:00:01', 'first')")
            .await;
        assert_eq!(tags(&msgs), "CZ");
        client
            .parse("events", "SELECT id, happened, note FROM events", &[])
            .await;

        // One result code applies to every column.
        client.bind("", "events", &[], &[1]).await;
        client.describe(b'P', "").await;
        client.execute("", 0).await;
        let msgs = client.sync().await;
        assert_eq!(tags(&msgs), "12TDCZ");
        let fields = msgs[2].field_types_and_formats();
        assert_eq!(fields[..2], [(INT4_OID as i32, 1), (TIMESTAMP_OID, 1)]);
        assert_eq!(fields[2].1, 1);
        let row = msgs[3].values();
        assert_eq!(row[0].as_deref(), Some(&7i32.to_be_bytes()[..]));
        // Microseconds since 2000-01-01.
        assert_eq!(row[1].as_deref(), Some(&86_401_000_000i64.to_be_bytes()[..]));
        assert_eq!(row[2].as_deref(), Some(&b"first"[..]));

        // One result code per column.
        client.bind("", "events", &[], &[0, 1, 0]).await;
        client.describe(b'P', "").await;
        client.execute("", 0).await;
        let msgs = client.sync().await;
        assert_eq!(tags(&msgs), "2TDCZ");
        let formats: Vec<i16> = msgs[1]
            .field_types_and_formats()
            .into_iter()
            .map(|(_, format)| format)
            .collect();
        assert_eq!(formats, vec![0, 1, 0]);
        let row = msgs[2].values();
        assert_eq!(row[0].as_deref(), Some(&b"7"[..]));
        assert_eq!(row[1].as_deref(), Some(&86_401_000_000i64.to_be_bytes()[..]));
        assert_eq!(row[2].as_deref(), Some(&b"first"[..]));
    }

    fn vector_literal(value: f32, dims: usize) -> String {
        let parts: Vec<String> = (0..dims).map(|_| value.to_string()).collect();
        format!("[{}]", parts.join(","))
    }

    #[tokio::test]
    async fn vector_similarity_query_orders_by_distance() {
        let gateway = gateway(trust_config());
        let (mut client, _) = connect(&gateway).await;
        let msgs = client
            .query("CREATE TABLE items (id int primary key, embedding vector(float, 1024))")
            .await;
        assert_eq!(ready_state(&msgs), 'I');

        client
            .parse("insert_item", "INSERT INTO items VALUES ($1, $2::vector)", &[INT4_OID, 0])
            .await;
        for id in 1..=20 {
            let id_text = id.to_string();
            let vector = vector_literal(id as f32, 1024);
            client
                .bind("", "insert_item", &[(0, id_text.as_bytes()), (0, vector.as_bytes())], &[])
                .await;
            client.execute("", 0).await;
        }
        let msgs = client.sync().await;
        assert!(msgs.iter().all(|m| m.tag != b'E'), "insert failed");
        assert_eq!(msgs.iter().filter(|m| m.tag == b'C').count(), 20);

        client
            .parse("", "SELECT id FROM items ORDER BY embedding <-> $1 LIMIT 5", &[])
            .await;
        let probe = vector_literal(3.2, 1024);
        client.bind("", "", &[(0, probe.as_bytes())], &[]).await;
        client.describe(b'P', "").await;
        client.execute("", 0).await;
        let msgs = client.sync().await;
        assert_eq!(tags(&msgs), "12TDDDDDCZ");
        let ids: Vec<String> = msgs
            .iter()
            .filter(|m| m.tag == b'D')
            .map(|m| m.text_values().remove(0))
            .collect();
        assert_eq!(ids, vec!["3", "4", "2", "5", "1"]);
        assert_eq!(msgs[8].text(), "SELECT 5");
    }

    #[tokio::test]
    async fn short_order_by_vectors_are_inlined_around_other_parameters() {
        let gateway = gateway(trust_config());
        let (mut client, _) = connect(&gateway).await;
        client
            .query("CREATE TABLE docs (id int primary key, kind varchar(10), embedding vector(float, 3))")
            .await;
        let msgs = client
            .query(
                "INSERT INTO docs VALUES (1, 'a', TO_VECTOR('[0,0,0]', FLOAT)), \
                 (2, 'a', TO_VECTOR('[5,5,5]', FLOAT)), (3, 'b', TO_VECTOR('[1,1,1]', FLOAT)), \
                 (4, 'a', TO_VECTOR('[2,2,2]', FLOAT))",
            )
            .await;
        assert_eq!(tags(&msgs), "CZ");

        client
            .parse(
                "",
                "SELECT id FROM docs WHERE kind = $1 ORDER BY embedding <-> $2 LIMIT $3",
                &[0, 0, INT4_OID],
            )
            .await;
        client
            .bind(
                "",
                "",
                &[(0, &b"a"[..]), (0, &b"[2,2,2.5]"[..]), (1, &2i32.to_be_bytes()[..])],
                &[],
            )
            .await;
        client.execute("", 0).await;
        let msgs = client.sync().await;
        assert_eq!(tags(&msgs), "12DDCZ");
        let ids: Vec<String> = msgs
            .iter()
            .filter(|m| m.tag == b'D')
            .map(|m| m.text_values().remove(0))
            .collect();
        assert_eq!(ids, vec!["4", "1"]);
    }

    #[tokio::test]
    async fn extended_errors_skip_to_sync() {
        let gateway = gateway(trust_config());
        let (mut client, _) = connect(&gateway).await;

        client.parse("s1", "SELECT 1", &[]).await;
        client.parse("s1", "SELECT 2", &[]).await;
        client.bind("", "s1", &[], &[]).await;
        client.execute("", 0).await;
        let msgs = client.sync().await;
        assert_eq!(tags(&msgs), "1EZ");
        assert_eq!(msgs[1].sqlstate(), "42P05");

        client.bind("", "nope", &[], &[]).await;
        let msgs = client.sync().await;
        assert_eq!(msgs[0].sqlstate(), "26000");

        client.bind("", "s1", &[(0, &b"1"[..])], &[]).await;
        let msgs = client.sync().await;
        assert_eq!(msgs[0].sqlstate(), "08P01");

        client.execute("gone", 0).await;
        let msgs = client.sync().await;
        assert_eq!(msgs[0].sqlstate(), "34000");
        assert_eq!(ready_state(&msgs), 'I');

        client.parse("", "SELECT 1; SELECT 2", &[]).await;
        let msgs = client.sync().await;
        assert_eq!(msgs[0].sqlstate(), "42601");
    }

    #[tokio::test]
    async fn catalog_queries_see_backend_tables_under_public() {
        let gateway = gateway(trust_config());
        let (mut client, _) = connect(&gateway).await;
        client.query("CREATE TABLE users (id int, name varchar(20))").await;

        let rows = client
            .rows(
                "SELECT c.relname FROM pg_catalog.pg_class c \
                 JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace \
                 WHERE n.nspname = 'public' AND c.relkind = 'r'",
            )
            .await;
        assert_eq!(rows, vec![vec!["users".to_string()]]);

        let msgs = client.query("SELECT * FROM pg_depend").await;
        assert_eq!(msgs[0].tag(), 'E');
    }

    #[test]
    fn cancel_requires_matching_secret_and_running_statement() {
        let registry = Arc::new(CancelRegistry::new());
        let registration = registry.register();
        assert!(!registry.cancel(registration.pid, registration.secret));

        let token = registration.arm();
        assert!(!registry.cancel(registration.pid, registration.secret.wrapping_add(1)));
        assert!(!token.is_cancelled());
        assert!(registry.cancel(registration.pid, registration.secret));
        assert!(token.is_cancelled());

        registration.disarm();
        assert!(!registry.cancel(registration.pid, registration.secret));
        drop(registration);
        assert_eq!(registry.len(), 0);
    }

    #[tokio::test]
    async fn admin_reports_readiness_and_updates_mapping() {
        let gateway = gateway(trust_config());
        let state = AdminState {
            bridge: gateway.bridge.clone(),
            mapping: gateway.mapping.clone(),
            cancel: gateway.cancel.clone(),
        };
        assert_eq!(admin::health().await, "ok");

        let (status, Json(readiness)) = admin::ready(State(state.clone())).await;
        assert_eq!(status, StatusCode::OK);
        assert!(readiness.ready);
        assert!(readiness.error.is_none());

        let update = MappingUpdate {
            backend_schema: Some("Sales".into()),
            client_schema: None,
        };
        let Json(mapping) = admin::put_mapping(State(state.clone()), Json(update))
            .await
            .expect("update mapping");
        assert_eq!(mapping.backend_schema, "Sales");
        let Json(current) = admin::get_mapping(State(state.clone())).await;
        assert_eq!(current, mapping);

        let bad = MappingUpdate {
            backend_schema: Some(String::new()),
            client_schema: None,
        };
        let (status, _) = admin::put_mapping(State(state), Json(bad))
            .await
            .expect_err("empty schema");
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn fatal_errors_are_classified() {
        assert!(GatewayError::Protocol("x".into()).is_fatal());
        assert!(!GatewayError::InvalidMessage("x".into()).is_fatal());
        assert_eq!(GatewayError::InvalidMessage("x".into()).sqlstate(), "08P01");
    }
}
