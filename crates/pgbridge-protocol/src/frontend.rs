use crate::messages::{
    CloseTarget, DescribeTarget, FrontendMessage, CANCEL_REQUEST_CODE, GSSENC_REQUEST_CODE,
    SSL_REQUEST_CODE,
};
use anyhow::Result;
use pgbridge_core::GatewayError;
use std::collections::HashMap;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Upper bound on a single frontend message.
pub const MAX_MESSAGE_LEN: usize = 1 << 30;
/// Upper bound on password and SASL messages read before authentication.
pub const MAX_AUTH_MESSAGE_LEN: usize = 65_536;
const MAX_STARTUP_LEN: usize = 10_000;

/// Reads an untyped startup-phase packet: StartupMessage, SSLRequest,
/// GSSENCRequest or CancelRequest.
pub async fn read_startup<S: AsyncRead + Unpin>(stream: &mut S) -> Result<FrontendMessage> {
    let len = stream.read_i32().await?;
    if len < 8 || len as usize > MAX_STARTUP_LEN {
        return Err(GatewayError::Protocol(format!("invalid startup packet length {len}")).into());
    }
    let code = stream.read_i32().await?;
    let mut buf = vec![0u8; len as usize - 8];
    stream.read_exact(&mut buf).await?;
    match code {
        SSL_REQUEST_CODE => Ok(FrontendMessage::SslRequest),
        GSSENC_REQUEST_CODE => Ok(FrontendMessage::GssEncRequest),
        CANCEL_REQUEST_CODE => {
            let mut cursor = Cursor::new(&buf);
            let pid = cursor.i32()?;
            let secret = cursor.i32()?;
            Ok(FrontendMessage::CancelRequest { pid, secret })
        }
        protocol => {
            let params = parse_params(&buf);
            Ok(FrontendMessage::Startup { protocol, params })
        }
    }
}

/// Reads one typed message. A clean EOF at a message boundary is reported
/// as Terminate.
pub async fn read_message<S: AsyncRead + Unpin>(stream: &mut S) -> Result<FrontendMessage> {
    read_message_limited(stream, MAX_MESSAGE_LEN).await
}

/// Like [`read_message`], rejecting bodies longer than `max_len` before
/// anything is buffered.
pub async fn read_message_limited<S: AsyncRead + Unpin>(
    stream: &mut S,
    max_len: usize,
) -> Result<FrontendMessage> {
    let msg_type = match stream.read_u8().await {
        Ok(v) => v,
        Err(_) => return Ok(FrontendMessage::Terminate),
    };
    let len = stream.read_i32().await?;
    if len < 4 || len as usize > max_len {
        return Err(GatewayError::Protocol(format!(
            "invalid length {len} for message type '{}'",
            msg_type as char
        ))
        .into());
    }
    let mut buf = vec![0u8; len as usize - 4];
    stream.read_exact(&mut buf).await?;
    Ok(decode_message(msg_type, &buf)?)
}

/// Decodes a typed message body (without the type byte and length).
pub fn decode_message(msg_type: u8, buf: &[u8]) -> Result<FrontendMessage, GatewayError> {
    let mut cursor = Cursor::new(buf);
    let msg = match msg_type {
        b'Q' => FrontendMessage::Query {
            sql: cursor.cstring()?,
        },
        b'p' => FrontendMessage::Password { data: buf.to_vec() },
        b'X' => FrontendMessage::Terminate,
        b'P' => {
            let statement_name = cursor.cstring()?;
            let query = cursor.cstring()?;
            let count = cursor.i16()?.max(0) as usize;
            let mut param_oids = Vec::with_capacity(count);
            for _ in 0..count {
                param_oids.push(cursor.i32()? as u32);
            }
            FrontendMessage::Parse {
                statement_name,
                query,
                param_oids,
            }
        }
        b'B' => {
            let portal_name = cursor.cstring()?;
            let statement_name = cursor.cstring()?;
            let format_count = cursor.i16()?.max(0) as usize;
            let mut param_format_codes = Vec::with_capacity(format_count);
            for _ in 0..format_count {
                param_format_codes.push(cursor.i16()?);
            }
            let value_count = cursor.i16()?.max(0) as usize;
            let mut param_values = Vec::with_capacity(value_count);
            for _ in 0..value_count {
                let len = cursor.i32()?;
                if len < 0 {
                    param_values.push(None);
                } else {
                    param_values.push(Some(cursor.bytes(len as usize)?.to_vec()));
                }
            }
            let result_count = cursor.i16()?.max(0) as usize;
            let mut result_format_codes = Vec::with_capacity(result_count);
            for _ in 0..result_count {
                result_format_codes.push(cursor.i16()?);
            }
            FrontendMessage::Bind {
                portal_name,
                statement_name,
                param_format_codes,
                param_values,
                result_format_codes,
            }
        }
        b'D' => {
            let target = match cursor.u8()? {
                b'S' => DescribeTarget::Statement,
                b'P' => DescribeTarget::Portal,
                other => {
                    return Err(GatewayError::Protocol(format!(
                        "invalid Describe target '{}'",
                        other as char
                    )))
                }
            };
            FrontendMessage::Describe {
                target,
                name: cursor.cstring()?,
            }
        }
        b'E' => FrontendMessage::Execute {
            portal_name: cursor.cstring()?,
            max_rows: cursor.i32()?,
        },
        b'C' => {
            let target = match cursor.u8()? {
                b'S' => CloseTarget::Statement,
                b'P' => CloseTarget::Portal,
                other => {
                    return Err(GatewayError::Protocol(format!(
                        "invalid Close target '{}'",
                        other as char
                    )))
                }
            };
            FrontendMessage::Close {
                target,
                name: cursor.cstring()?,
            }
        }
        b'S' => FrontendMessage::Sync,
        b'H' => FrontendMessage::Flush,
        other => FrontendMessage::Unsupported { code: other },
    };
    Ok(msg)
}

fn parse_params(buf: &[u8]) -> HashMap<String, String> {
    let mut params = HashMap::new();
    let mut i = 0;
    while i < buf.len() {
        let key = read_cstring(&buf[i..]);
        if key.is_empty() {
            break;
        }
        i += key.len() + 1;
        if i > buf.len() {
            break;
        }
        let value = read_cstring(&buf[i..]);
        i += value.len() + 1;
        params.insert(key, value);
    }
    params
}

fn read_cstring(buf: &[u8]) -> String {
    let mut end = 0;
    while end < buf.len() && buf[end] != 0 {
        end += 1;
    }
    String::from_utf8_lossy(&buf[..end]).to_string()
}

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn bytes(&mut self, len: usize) -> Result<&'a [u8], GatewayError> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.buf.len())
            .ok_or_else(|| GatewayError::Protocol("message truncated".into()))?;
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, GatewayError> {
        Ok(self.bytes(1)?[0])
    }

    fn i16(&mut self) -> Result<i16, GatewayError> {
        let b = self.bytes(2)?;
        Ok(i16::from_be_bytes([b[0], b[1]]))
    }

    fn i32(&mut self) -> Result<i32, GatewayError> {
        let b = self.bytes(4)?;
        Ok(i32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn cstring(&mut self) -> Result<String, GatewayError> {
        let rest = &self.buf[self.pos..];
        let nul = rest
            .iter()
            .position(|b| *b == 0)
            .ok_or_else(|| GatewayError::Protocol("unterminated string in message".into()))?;
        let value = String::from_utf8(rest[..nul].to_vec())
            .map_err(|_| GatewayError::Protocol("invalid UTF-8 in message".into()))?;
        self.pos += nul + 1;
        Ok(value)
    }
}
