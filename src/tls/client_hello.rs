//! TLS record header and ClientHello decoding, just far enough to find the
//! server name.
//!
//! Every length field is checked against its enclosing boundary before the
//! bytes behind it are touched, so a malformed hello fails without reading
//! past what the record declared.

use super::buffer::{HeadBuffer, Liveness};
use crate::error::{CapacityError, ProtocolError, SniProxyResult};
use tokio::io::AsyncRead;

pub const RECORD_HEADER_LEN: usize = 5;
pub const CONTENT_TYPE_HANDSHAKE: u8 = 0x16;
pub const HANDSHAKE_CLIENT_HELLO: u8 = 0x01;
pub const HANDSHAKE_HEADER_LEN: usize = 4;
pub const EXTENSION_SERVER_NAME: u16 = 0x0000;
pub const NAME_TYPE_HOST_NAME: u8 = 0x00;

/// Read the 5-byte record header and return the declared record length.
///
/// The record must be a Handshake record no longer than `limit`; the version
/// bytes are ignored.
pub async fn read_record_header<R, L>(buf: &mut HeadBuffer<'_, R, L>, limit: usize) -> SniProxyResult<usize>
where
    R: AsyncRead + Unpin,
    L: Liveness,
{
    let content_type = buf.read_u8().await?;
    if content_type != CONTENT_TYPE_HANDSHAKE {
        return Err(ProtocolError::NotHandshakeRecord(content_type).into());
    }
    buf.skip(2).await?;
    let length = usize::from(buf.read_u16().await?);
    if length > limit {
        return Err(CapacityError::ClientHelloTooLong { length, limit }.into());
    }
    Ok(length)
}

/// Walk the handshake message of a record of `record_length` bytes and return
/// the first non-empty host name in the ServerName extension.
pub async fn parse_client_hello<R, L>(
    buf: &mut HeadBuffer<'_, R, L>,
    record_length: usize,
) -> SniProxyResult<String>
where
    R: AsyncRead + Unpin,
    L: Liveness,
{
    let msg_type = buf.read_u8().await?;
    if msg_type != HANDSHAKE_CLIENT_HELLO {
        return Err(ProtocolError::NotClientHello(msg_type).into());
    }
    let client_hello_length = buf.read_u24().await? as usize;
    if record_length != client_hello_length + HANDSHAKE_HEADER_LEN {
        return Err(ProtocolError::LengthMismatch {
            record_length,
            client_hello_length,
        }
        .into());
    }
    let end = buf.read_index() + client_hello_length;

    // legacy_version + random
    require(buf, end, 2 + 32, "random")?;
    buf.skip(2 + 32).await?;

    require(buf, end, 1, "session_id length")?;
    let session_id_length = usize::from(buf.read_u8().await?);
    require(buf, end, session_id_length, "session_id")?;
    buf.skip(session_id_length).await?;

    require(buf, end, 2, "cipher_suites length")?;
    let cipher_suites_length = usize::from(buf.read_u16().await?);
    require(buf, end, cipher_suites_length, "cipher_suites")?;
    buf.skip(cipher_suites_length).await?;

    require(buf, end, 1, "compression_methods length")?;
    let compression_methods_length = usize::from(buf.read_u8().await?);
    require(buf, end, compression_methods_length, "compression_methods")?;
    buf.skip(compression_methods_length).await?;

    // The extensions block is optional in a ClientHello
    if remaining(buf, end) == 0 {
        return Err(ProtocolError::ServerNameNotFound.into());
    }
    require(buf, end, 2, "extensions length")?;
    let extensions_length = usize::from(buf.read_u16().await?);
    let left = remaining(buf, end);
    if extensions_length > left {
        return Err(ProtocolError::ExtensionsOutOfBounds {
            extensions_length,
            remaining: left,
        }
        .into());
    }

    let extensions_end = buf.read_index() + extensions_length;
    while buf.read_index() < extensions_end {
        require(buf, extensions_end, 4, "extension header")?;
        let extension_type = buf.read_u16().await?;
        let length = usize::from(buf.read_u16().await?);
        let left = remaining(buf, extensions_end);
        if length > left {
            return Err(ProtocolError::ExtensionOutOfBounds {
                extension_type,
                length,
                remaining: left,
            }
            .into());
        }

        if extension_type != EXTENSION_SERVER_NAME {
            buf.skip(length).await?;
            continue;
        }
        if let Some(name) = parse_server_name_list(buf, length).await? {
            return Ok(name);
        }
    }

    Err(ProtocolError::ServerNameNotFound.into())
}

/// Body of a ServerName extension of `extension_length` bytes. Consumes the
/// whole body unless a host name is found first.
async fn parse_server_name_list<R, L>(
    buf: &mut HeadBuffer<'_, R, L>,
    extension_length: usize,
) -> SniProxyResult<Option<String>>
where
    R: AsyncRead + Unpin,
    L: Liveness,
{
    if extension_length < 2 {
        return Err(ProtocolError::ServerNameListLengthMismatch {
            extension_length,
            list_length: 0,
        }
        .into());
    }
    let list_length = usize::from(buf.read_u16().await?);
    if extension_length != list_length + 2 {
        return Err(ProtocolError::ServerNameListLengthMismatch {
            extension_length,
            list_length,
        }
        .into());
    }

    let list_end = buf.read_index() + list_length;
    while buf.read_index() < list_end {
        require(buf, list_end, 3, "server name entry header")?;
        let name_type = buf.read_u8().await?;
        let length = usize::from(buf.read_u16().await?);
        let left = remaining(buf, list_end);
        if length > left {
            return Err(ProtocolError::ServerNameOutOfBounds {
                length,
                remaining: left,
            }
            .into());
        }
        if name_type == NAME_TYPE_HOST_NAME && length > 0 {
            return match buf.read_string(length).await? {
                Some(name) => Ok(Some(name)),
                None => Err(ProtocolError::InvalidServerName.into()),
            };
        }
        buf.skip(length).await?;
    }
    Ok(None)
}

fn remaining<R, L>(buf: &HeadBuffer<'_, R, L>, end: usize) -> usize
where
    R: AsyncRead + Unpin,
    L: Liveness,
{
    end.saturating_sub(buf.read_index())
}

fn require<R, L>(buf: &HeadBuffer<'_, R, L>, end: usize, len: usize, field: &'static str) -> SniProxyResult<()>
where
    R: AsyncRead + Unpin,
    L: Liveness,
{
    if len > remaining(buf, end) {
        return Err(ProtocolError::FieldOutOfBounds { field }.into());
    }
    Ok(())
}
