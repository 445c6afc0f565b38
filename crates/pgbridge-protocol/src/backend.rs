use crate::messages::{BackendMessage, ErrorFields};
use anyhow::Result;
use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Encodes one message and flushes it to the stream.
pub async fn write_message<S: AsyncWrite + Unpin>(stream: &mut S, msg: BackendMessage) -> Result<()> {
    let mut buf = BytesMut::new();
    encode_message(&mut buf, &msg);
    stream.write_all(&buf).await?;
    stream.flush().await?;
    Ok(())
}

/// Writes out everything buffered so far and clears the buffer.
pub async fn flush_buffer<S: AsyncWrite + Unpin>(stream: &mut S, buf: &mut BytesMut) -> Result<()> {
    if !buf.is_empty() {
        stream.write_all(buf).await?;
        buf.clear();
    }
    stream.flush().await?;
    Ok(())
}

/// Appends the wire form of `msg` to `buf`.
pub fn encode_message(buf: &mut BytesMut, msg: &BackendMessage) {
    match msg {
        BackendMessage::AuthenticationOk => {
            buf.put_u8(b'R');
            buf.put_i32(8);
            buf.put_i32(0);
        }
        BackendMessage::AuthenticationCleartextPassword => {
            buf.put_u8(b'R');
            buf.put_i32(8);
            buf.put_i32(3);
        }
        BackendMessage::AuthenticationSasl { mechanisms } => {
            let mut payload = BytesMut::new();
            payload.put_i32(10);
            for mechanism in mechanisms {
                put_cstring(&mut payload, mechanism);
            }
            payload.put_u8(0);
            frame(buf, b'R', &payload);
        }
        BackendMessage::AuthenticationSaslContinue { data } => {
            let mut payload = BytesMut::new();
            payload.put_i32(11);
            payload.extend_from_slice(data);
            frame(buf, b'R', &payload);
        }
        BackendMessage::AuthenticationSaslFinal { data } => {
            let mut payload = BytesMut::new();
            payload.put_i32(12);
            payload.extend_from_slice(data);
            frame(buf, b'R', &payload);
        }
        BackendMessage::ParameterStatus { key, value } => {
            let mut payload = BytesMut::new();
            put_cstring(&mut payload, key);
            put_cstring(&mut payload, value);
            frame(buf, b'S', &payload);
        }
        BackendMessage::BackendKeyData { pid, secret } => {
            buf.put_u8(b'K');
            buf.put_i32(12);
            buf.put_i32(*pid);
            buf.put_i32(*secret);
        }
        BackendMessage::ReadyForQuery { state } => {
            buf.put_u8(b'Z');
            buf.put_i32(5);
            buf.put_u8(state.wire_byte());
        }
        BackendMessage::ParseComplete => empty(buf, b'1'),
        BackendMessage::BindComplete => empty(buf, b'2'),
        BackendMessage::CloseComplete => empty(buf, b'3'),
        BackendMessage::NoData => empty(buf, b'n'),
        BackendMessage::PortalSuspended => empty(buf, b's'),
        BackendMessage::EmptyQueryResponse => empty(buf, b'I'),
        BackendMessage::ParameterDescription { type_oids } => {
            let mut payload = BytesMut::new();
            payload.put_i16(type_oids.len() as i16);
            for oid in type_oids {
                payload.put_u32(*oid);
            }
            frame(buf, b't', &payload);
        }
        BackendMessage::RowDescription { fields } => {
            let mut payload = BytesMut::new();
            payload.put_i16(fields.len() as i16);
            for field in fields {
                put_cstring(&mut payload, &field.name);
                payload.put_u32(field.table_oid);
                payload.put_i16(field.column_id);
                payload.put_u32(field.type_oid);
                payload.put_i16(field.type_len);
                payload.put_i32(field.type_modifier);
                payload.put_i16(field.format.code());
            }
            frame(buf, b'T', &payload);
        }
        BackendMessage::DataRow { values } => {
            let mut payload = BytesMut::new();
            payload.put_i16(values.len() as i16);
            for value in values {
                match value {
                    Some(v) => {
                        payload.put_i32(v.len() as i32);
                        payload.extend_from_slice(v);
                    }
                    None => payload.put_i32(-1),
                }
            }
            frame(buf, b'D', &payload);
        }
        BackendMessage::CommandComplete { tag } => {
            let mut payload = BytesMut::new();
            put_cstring(&mut payload, tag);
            frame(buf, b'C', &payload);
        }
        BackendMessage::ErrorResponse(fields) => frame(buf, b'E', &error_payload(fields)),
        BackendMessage::NoticeResponse(fields) => frame(buf, b'N', &error_payload(fields)),
    }
}

fn error_payload(fields: &ErrorFields) -> BytesMut {
    let mut payload = BytesMut::new();
    payload.put_u8(b'S');
    put_cstring(&mut payload, fields.severity.as_str());
    payload.put_u8(b'V');
    put_cstring(&mut payload, fields.severity.as_str());
    payload.put_u8(b'C');
    put_cstring(&mut payload, &fields.code);
    payload.put_u8(b'M');
    put_cstring(&mut payload, &fields.message);
    if let Some(detail) = &fields.detail {
        payload.put_u8(b'D');
        put_cstring(&mut payload, detail);
    }
    if let Some(hint) = &fields.hint {
        payload.put_u8(b'H');
        put_cstring(&mut payload, hint);
    }
    payload.put_u8(0);
    payload
}

fn frame(buf: &mut BytesMut, tag: u8, payload: &[u8]) {
    buf.put_u8(tag);
    buf.put_i32((payload.len() + 4) as i32);
    buf.extend_from_slice(payload);
}

fn empty(buf: &mut BytesMut, tag: u8) {
    buf.put_u8(tag);
    buf.put_i32(4);
}

fn put_cstring(buf: &mut BytesMut, value: &str) {
    buf.extend_from_slice(value.as_bytes());
    buf.put_u8(0);
}
