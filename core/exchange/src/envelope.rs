use astra_types::{CoreError, SchemaName};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::ExchangeConfig;

#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("schema name of {0} bytes exceeds limit of {1}")]
    SchemaNameTooLong(usize, usize),
    #[error("message of {0} bytes exceeds limit of {1}")]
    MessageTooLarge(usize, usize),
    #[error("unknown schema: {0}")]
    InvalidSchema(#[from] CoreError),
    #[error("schema name is not valid utf-8")]
    NotUtf8,
}

/// One request or response on the exchange stream: `(schema_name_length_u16,
/// schema_name_bytes, payload_length_u32, payload_bytes[,
/// signature_length_u16, signature_bytes])`. A single leading byte ahead of
/// the signature length indicates whether a signature follows at all.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub schema: SchemaName,
    pub payload: Bytes,
    pub signature: Option<Bytes>,
}

impl Envelope {
    pub fn encode(&self) -> BytesMut {
        let schema_name = self.schema.as_str().as_bytes();
        let mut buf = BytesMut::with_capacity(schema_name.len() + self.payload.len() + 16);
        buf.put_u16(schema_name.len() as u16);
        buf.put_slice(schema_name);
        buf.put_u32(self.payload.len() as u32);
        buf.put_slice(&self.payload);
        match &self.signature {
            Some(sig) => {
                buf.put_u8(1);
                buf.put_u16(sig.len() as u16);
                buf.put_slice(sig);
            }
            None => buf.put_u8(0),
        }
        buf
    }

    /// Reads one framed message from `reader`. Oversize messages are
    /// rejected as soon as their declared length is known, without reading
    /// the payload itself.
    pub async fn read_from<R: AsyncRead + Unpin>(
        reader: &mut R,
        config: &ExchangeConfig,
    ) -> Result<Self, EnvelopeError> {
        let schema_len = reader.read_u16().await? as usize;
        if schema_len > config.max_schema_name {
            return Err(EnvelopeError::SchemaNameTooLong(schema_len, config.max_schema_name));
        }
        let mut schema_buf = vec![0u8; schema_len];
        reader.read_exact(&mut schema_buf).await?;
        let schema_name = std::str::from_utf8(&schema_buf).map_err(|_| EnvelopeError::NotUtf8)?;
        let schema: SchemaName = schema_name.parse()?;

        let payload_len = reader.read_u32().await? as usize;
        if payload_len > config.max_message_size {
            return Err(EnvelopeError::MessageTooLarge(payload_len, config.max_message_size));
        }
        let mut payload = vec![0u8; payload_len];
        reader.read_exact(&mut payload).await?;

        let has_signature = reader.read_u8().await?;
        let signature = if has_signature != 0 {
            let sig_len = reader.read_u16().await? as usize;
            let mut sig_buf = vec![0u8; sig_len];
            reader.read_exact(&mut sig_buf).await?;
            Some(Bytes::from(sig_buf))
        } else {
            None
        };

        Ok(Envelope {
            schema,
            payload: Bytes::from(payload),
            signature,
        })
    }

    pub async fn write_to<W: AsyncWrite + Unpin>(&self, writer: &mut W) -> Result<(), EnvelopeError> {
        let mut buf = self.encode();
        writer.write_all_buf(&mut buf).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Round-trips through an in-memory buffer; primarily for tests and for
    /// transports that already hand over a contiguous frame.
    pub fn decode(mut bytes: Bytes, config: &ExchangeConfig) -> Result<Self, EnvelopeError> {
        if bytes.remaining() < 2 {
            return Err(EnvelopeError::Io(std::io::ErrorKind::UnexpectedEof.into()));
        }
        let schema_len = bytes.get_u16() as usize;
        if schema_len > config.max_schema_name {
            return Err(EnvelopeError::SchemaNameTooLong(schema_len, config.max_schema_name));
        }
        let schema_buf = bytes.split_to(schema_len);
        let schema_name = std::str::from_utf8(&schema_buf).map_err(|_| EnvelopeError::NotUtf8)?;
        let schema: SchemaName = schema_name.parse()?;

        let payload_len = bytes.get_u32() as usize;
        if payload_len > config.max_message_size {
            return Err(EnvelopeError::MessageTooLarge(payload_len, config.max_message_size));
        }
        let payload = bytes.split_to(payload_len);

        let has_signature = bytes.get_u8();
        let signature = if has_signature != 0 {
            let sig_len = bytes.get_u16() as usize;
            Some(bytes.split_to(sig_len))
        } else {
            None
        };

        Ok(Envelope {
            schema,
            payload,
            signature,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ExchangeConfig;

    #[test]
    fn round_trips_without_signature() {
        let envelope = Envelope {
            schema: SchemaName::Omm,
            payload: Bytes::from_static(b"hello"),
            signature: None,
        };
        let encoded = envelope.encode().freeze();
        let decoded = Envelope::decode(encoded, &ExchangeConfig::default()).unwrap();
        assert_eq!(decoded.schema, SchemaName::Omm);
        assert_eq!(decoded.payload, Bytes::from_static(b"hello"));
        assert!(decoded.signature.is_none());
    }

    #[test]
    fn round_trips_with_signature() {
        let envelope = Envelope {
            schema: SchemaName::Cdm,
            payload: Bytes::from_static(b"payload"),
            signature: Some(Bytes::from_static(b"sig-bytes")),
        };
        let encoded = envelope.encode().freeze();
        let decoded = Envelope::decode(encoded, &ExchangeConfig::default()).unwrap();
        assert_eq!(decoded.signature, Some(Bytes::from_static(b"sig-bytes")));
    }

    #[test]
    fn rejects_oversize_payload_length() {
        let config = ExchangeConfig {
            max_message_size: 4,
            ..ExchangeConfig::default()
        };
        let envelope = Envelope {
            schema: SchemaName::Omm,
            payload: Bytes::from_static(b"too long"),
            signature: None,
        };
        let encoded = envelope.encode().freeze();
        assert!(matches!(
            Envelope::decode(encoded, &config),
            Err(EnvelopeError::MessageTooLarge(_, _))
        ));
    }
}
