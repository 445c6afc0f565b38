#[cfg(test)]
mod tests {
    use crate::backend::{encode_message, write_message};
    use crate::codec::{decode_param, encode_value, resolve_formats, FormatCode};
    use crate::frontend::{
        decode_message, read_message, read_message_limited, read_startup, MAX_AUTH_MESSAGE_LEN,
    };
    use crate::messages::{
        parse_sasl_initial_response, BackendMessage, FrontendMessage, RowDescriptionField,
        TransactionState, PROTOCOL_VERSION_3,
    };
    use bytes::BytesMut;
    use chrono::NaiveDate;
    use pgbridge_core::pgtype::oids;
    use pgbridge_core::{GatewayError, PgType, Value};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn startup_packet(code: i32, body: &[u8]) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&((body.len() + 8) as i32).to_be_bytes());
        buf.extend_from_slice(&code.to_be_bytes());
        buf.extend_from_slice(body);
        buf
    }

    fn pg_type(oid: u32) -> PgType {
        PgType::by_oid(oid).expect("builtin type")
    }

    #[tokio::test]
    async fn startup_parses_params() {
        let (mut client, mut server) = tokio::io::duplex(128);
        let packet = startup_packet(
            PROTOCOL_VERSION_3,
            b"user\0alice\0database\0appdb\0application_name\0psql\0\0",
        );
        client.write_all(&packet).await.expect("write");
        match read_startup(&mut server).await.expect("read") {
            FrontendMessage::Startup { protocol, params } => {
                assert_eq!(protocol, PROTOCOL_VERSION_3);
                assert_eq!(params.get("user").map(String::as_str), Some("alice"));
                assert_eq!(params.get("database").map(String::as_str), Some("appdb"));
                assert_eq!(params.get("application_name").map(String::as_str), Some("psql"));
            }
            other => panic!("unexpected startup {other:?}"),
        }
    }

    #[tokio::test]
    async fn ssl_and_cancel_requests_are_recognised() {
        let (mut client, mut server) = tokio::io::duplex(128);
        client
            .write_all(&startup_packet(80877103, &[]))
            .await
            .expect("write ssl");
        let mut cancel = Vec::new();
        cancel.extend_from_slice(&42i32.to_be_bytes());
        cancel.extend_from_slice(&(-7i32).to_be_bytes());
        client
            .write_all(&startup_packet(80877102, &cancel))
            .await
            .expect("write cancel");

        assert_eq!(read_startup(&mut server).await.expect("ssl"), FrontendMessage::SslRequest);
        assert_eq!(
            read_startup(&mut server).await.expect("cancel"),
            FrontendMessage::CancelRequest { pid: 42, secret: -7 }
        );
    }

    #[tokio::test]
    async fn oversized_startup_is_rejected() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client
            .write_all(&20_000i32.to_be_bytes())
            .await
            .expect("write");
        let err = read_startup(&mut server).await.expect_err("too long");
        assert!(err.to_string().contains("invalid startup packet length"));
    }

    #[tokio::test]
    async fn password_message_over_auth_limit_is_rejected() {
        let (mut client, mut server) = tokio::io::duplex(64);
        let mut header = vec![b'p'];
        header.extend_from_slice(&(1i32 << 20).to_be_bytes());
        client.write_all(&header).await.expect("write");
        let err = read_message_limited(&mut server, MAX_AUTH_MESSAGE_LEN)
            .await
            .expect_err("too long");
        assert!(err.to_string().contains("invalid length"));

        let mut small = vec![b'p'];
        small.extend_from_slice(&9i32.to_be_bytes());
        small.extend_from_slice(b"demo\0");
        client.write_all(&small).await.expect("write");
        assert_eq!(
            read_message_limited(&mut server, MAX_AUTH_MESSAGE_LEN)
                .await
                .expect("password"),
            FrontendMessage::Password {
                data: b"demo\0".to_vec()
            }
        );
    }

    #[tokio::test]
    async fn eof_reads_as_terminate() {
        let (client, mut server) = tokio::io::duplex(16);
        drop(client);
        assert_eq!(
            read_message(&mut server).await.expect("eof"),
            FrontendMessage::Terminate
        );
    }

    #[tokio::test]
    async fn write_auth_cleartext_message() {
        let (mut client, mut server) = tokio::io::duplex(32);
        write_message(&mut server, BackendMessage::AuthenticationCleartextPassword)
            .await
            .expect("write");
        let mut bytes = [0u8; 9];
        client.read_exact(&mut bytes).await.expect("read");
        assert_eq!(bytes[0], b'R');
        assert_eq!(i32::from_be_bytes(bytes[1..5].try_into().expect("len")), 8);
        assert_eq!(i32::from_be_bytes(bytes[5..9].try_into().expect("code")), 3);
    }

    #[test]
    fn sasl_mechanism_list_is_double_terminated() {
        let mut buf = BytesMut::new();
        encode_message(
            &mut buf,
            &BackendMessage::AuthenticationSasl {
                mechanisms: vec!["SCRAM-SHA-256".into()],
            },
        );
        assert_eq!(buf[0], b'R');
        assert_eq!(&buf[5..9], &10i32.to_be_bytes());
        assert_eq!(&buf[9..], b"SCRAM-SHA-256\0\0");
        let len = i32::from_be_bytes(buf[1..5].try_into().expect("len")) as usize;
        assert_eq!(len + 1, buf.len());
    }

    #[test]
    fn sasl_initial_response_splits_mechanism() {
        let mut data = b"SCRAM-SHA-256\0".to_vec();
        let client_first = b"n,,n=,r=abc";
        data.extend_from_slice(&(client_first.len() as i32).to_be_bytes());
        data.extend_from_slice(client_first);
        let (mechanism, payload) = parse_sasl_initial_response(&data).expect("parse");
        assert_eq!(mechanism, "SCRAM-SHA-256");
        assert_eq!(payload, client_first);
        assert!(parse_sasl_initial_response(b"SCRAM").is_err());
    }

    #[test]
    fn ready_for_query_carries_state() {
        let mut buf = BytesMut::new();
        encode_message(
            &mut buf,
            &BackendMessage::ReadyForQuery {
                state: TransactionState::Error,
            },
        );
        assert_eq!(&buf[..], &[b'Z', 0, 0, 0, 5, b'E']);
    }

    #[test]
    fn bind_decodes_params_and_null() {
        let mut body = Vec::new();
        body.extend_from_slice(b"p1\0s1\0");
        body.extend_from_slice(&1i16.to_be_bytes());
        body.extend_from_slice(&1i16.to_be_bytes());
        body.extend_from_slice(&2i16.to_be_bytes());
        body.extend_from_slice(&4i32.to_be_bytes());
        body.extend_from_slice(&7i32.to_be_bytes());
        body.extend_from_slice(&(-1i32).to_be_bytes());
        body.extend_from_slice(&0i16.to_be_bytes());
        match decode_message(b'B', &body).expect("bind") {
            FrontendMessage::Bind {
                portal_name,
                statement_name,
                param_format_codes,
                param_values,
                result_format_codes,
            } => {
                assert_eq!(portal_name, "p1");
                assert_eq!(statement_name, "s1");
                assert_eq!(param_format_codes, vec![1]);
                assert_eq!(param_values, vec![Some(7i32.to_be_bytes().to_vec()), None]);
                assert!(result_format_codes.is_empty());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn truncated_bind_is_protocol_error() {
        let mut body = b"\0\0".to_vec();
        body.extend_from_slice(&0i16.to_be_bytes());
        body.extend_from_slice(&1i16.to_be_bytes());
        body.extend_from_slice(&100i32.to_be_bytes());
        let err = decode_message(b'B', &body).expect_err("truncated");
        assert!(matches!(err, GatewayError::Protocol(_)));
    }

    #[test]
    fn row_description_and_data_row_layout() {
        let mut buf = BytesMut::new();
        let mut field = RowDescriptionField::new("id", oids::INT4, 4);
        field.table_oid = 16500;
        field.column_id = 1;
        encode_message(&mut buf, &BackendMessage::RowDescription { fields: vec![field] });
        assert_eq!(buf[0], b'T');
        assert_eq!(&buf[5..7], &1i16.to_be_bytes());
        assert_eq!(&buf[7..10], b"id\0");
        assert_eq!(&buf[10..14], &16500u32.to_be_bytes());
        assert_eq!(&buf[14..16], &1i16.to_be_bytes());
        assert_eq!(&buf[16..20], &23u32.to_be_bytes());
        assert_eq!(&buf[20..22], &4i16.to_be_bytes());
        assert_eq!(&buf[22..26], &(-1i32).to_be_bytes());
        assert_eq!(&buf[26..28], &0i16.to_be_bytes());

        let mut row = BytesMut::new();
        encode_message(
            &mut row,
            &BackendMessage::DataRow {
                values: vec![Some(b"1".to_vec()), None],
            },
        );
        assert_eq!(&row[5..7], &2i16.to_be_bytes());
        assert_eq!(&row[7..11], &1i32.to_be_bytes());
        assert_eq!(row[11], b'1');
        assert_eq!(&row[12..16], &(-1i32).to_be_bytes());
    }

    #[test]
    fn error_response_contains_sqlstate() {
        let mut buf = BytesMut::new();
        encode_message(&mut buf, &BackendMessage::error(&GatewayError::InFailedTransaction));
        let text = String::from_utf8_lossy(&buf[5..]).to_string();
        assert!(text.contains("SERROR\0"));
        assert!(text.contains("C25P02\0"));
        assert!(text.contains("Mcurrent transaction is aborted"));
    }

    #[test]
    fn format_codes_resolve_per_column() {
        assert_eq!(resolve_formats(&[], 2).expect("none"), vec![FormatCode::Text; 2]);
        assert_eq!(resolve_formats(&[1], 3).expect("one"), vec![FormatCode::Binary; 3]);
        assert_eq!(
            resolve_formats(&[0, 1], 2).expect("each"),
            vec![FormatCode::Text, FormatCode::Binary]
        );
        assert!(resolve_formats(&[0, 1], 3).is_err());
        assert!(resolve_formats(&[2], 1).is_err());
    }

    #[test]
    fn text_encoding_follows_pg_conventions() {
        let enc = |v: Value, oid: u32| {
            encode_value(&v, &pg_type(oid), FormatCode::Text)
                .expect("encode")
                .map(|b| String::from_utf8(b).expect("utf8"))
        };
        assert_eq!(enc(Value::Int(1), oids::BOOL).as_deref(), Some("t"));
        assert_eq!(enc(Value::Bool(false), oids::BOOL).as_deref(), Some("f"));
        assert_eq!(enc(Value::Float(f64::INFINITY), oids::FLOAT8).as_deref(), Some("Infinity"));
        assert_eq!(enc(Value::Null, oids::INT4), None);
        assert_eq!(
            enc(Value::Text("[1,2,3]".into()), oids::VECTOR).as_deref(),
            Some("[1,2,3]")
        );
        let ts = NaiveDate::from_ymd_opt(2024, 3, 1)
            .expect("date")
            .and_hms_micro_opt(12, 30, 0, 250_000)
            .expect("time");
        assert_eq!(
            enc(Value::Timestamp(ts), oids::TIMESTAMP).as_deref(),
            Some("2024-03-01 12:30:00.25")
        );
        assert_eq!(
            enc(Value::Array(vec![Value::Int(1), Value::Int(3)]), oids::INT2_ARRAY).as_deref(),
            Some("{1,3}")
        );
    }

    #[test]
    fn binary_encoding_uses_network_order_and_pg_epoch() {
        let enc = |v: Value, oid: u32| {
            encode_value(&v, &pg_type(oid), FormatCode::Binary)
                .expect("encode")
                .expect("not null")
        };
        assert_eq!(enc(Value::Int(5), oids::INT4), 5i32.to_be_bytes().to_vec());
        assert_eq!(enc(Value::Int(5), oids::INT8), 5i64.to_be_bytes().to_vec());
        assert_eq!(enc(Value::Bool(true), oids::BOOL), vec![1]);
        let epoch = NaiveDate::from_ymd_opt(2000, 1, 1)
            .expect("date")
            .and_hms_opt(0, 0, 1)
            .expect("time");
        assert_eq!(
            enc(Value::Timestamp(epoch), oids::TIMESTAMP),
            1_000_000i64.to_be_bytes().to_vec()
        );
        let date = NaiveDate::from_ymd_opt(2000, 1, 11).expect("date");
        assert_eq!(enc(Value::Date(date), oids::DATE), 10i32.to_be_bytes().to_vec());
        assert!(encode_value(&Value::Int(70_000), &pg_type(oids::INT2), FormatCode::Binary).is_err());
    }

    #[test]
    fn binary_numeric_uses_base_10000_digits() {
        let bytes = encode_value(
            &Value::Text("12345.6".into()),
            &pg_type(oids::NUMERIC),
            FormatCode::Binary,
        )
        .expect("encode")
        .expect("not null");
        let words: Vec<i16> = bytes
            .chunks(2)
            .map(|c| i16::from_be_bytes([c[0], c[1]]))
            .collect();
        // ndigits, weight, sign, dscale, digits 1 2345 6000
        assert_eq!(words, vec![3, 1, 0, 1, 1, 2345, 6000]);
    }

    #[test]
    fn params_decode_by_declared_type() {
        assert_eq!(
            decode_param(Some(&b"42"[..]), oids::INT4, FormatCode::Text).expect("int"),
            Value::Int(42)
        );
        assert_eq!(
            decode_param(Some(&b"42"[..]), 0, FormatCode::Text).expect("untyped"),
            Value::Text("42".into())
        );
        assert_eq!(decode_param(None, oids::INT4, FormatCode::Binary).expect("null"), Value::Null);
        assert!(matches!(
            decode_param(Some(&b"abc"[..]), oids::INT4, FormatCode::Text),
            Err(GatewayError::InvalidParameter(_))
        ));
        assert_eq!(
            decode_param(Some(&9i64.to_be_bytes()[..]), 0, FormatCode::Binary).expect("inferred"),
            Value::Int(9)
        );
        assert_eq!(
            decode_param(Some(&1.5f64.to_be_bytes()[..]), oids::FLOAT8, FormatCode::Binary)
                .expect("float"),
            Value::Float(1.5)
        );
    }

    #[test]
    fn binary_float_array_param_becomes_vector() {
        let mut raw = Vec::new();
        raw.extend_from_slice(&1i32.to_be_bytes());
        raw.extend_from_slice(&0i32.to_be_bytes());
        raw.extend_from_slice(&oids::FLOAT4.to_be_bytes());
        raw.extend_from_slice(&2i32.to_be_bytes());
        raw.extend_from_slice(&1i32.to_be_bytes());
        for f in [0.5f32, 2.0f32] {
            raw.extend_from_slice(&4i32.to_be_bytes());
            raw.extend_from_slice(&f.to_be_bytes());
        }
        assert_eq!(
            decode_param(Some(raw.as_slice()), oids::FLOAT4_ARRAY, FormatCode::Binary).expect("array"),
            Value::Vector(vec![0.5, 2.0])
        );
        assert_eq!(
            decode_param(Some(raw.as_slice()), 0, FormatCode::Binary).expect("untyped array"),
            Value::Vector(vec![0.5, 2.0])
        );
    }

    #[test]
    fn array_count_larger_than_payload_is_rejected() {
        let mut raw = Vec::new();
        raw.extend_from_slice(&1i32.to_be_bytes());
        raw.extend_from_slice(&0i32.to_be_bytes());
        raw.extend_from_slice(&oids::INT4.to_be_bytes());
        raw.extend_from_slice(&i32::MAX.to_be_bytes());
        raw.extend_from_slice(&1i32.to_be_bytes());
        let err = decode_param(Some(raw.as_slice()), oids::INT4_ARRAY, FormatCode::Binary)
            .expect_err("oversized count");
        assert!(!err.is_fatal());
        // Untyped parameters fall back to text instead of decoding the header.
        assert!(matches!(
            decode_param(Some(raw.as_slice()), 0, FormatCode::Binary),
            Ok(Value::Text(_))
        ));
    }
}
