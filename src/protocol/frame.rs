//! Frame codec
//!
//! Wire unit is a fixed 8-byte header followed by the body:
//!
//! | offset | size | field                                  |
//! |--------|------|----------------------------------------|
//! | 0      | 4    | compression flag, `u32` LE (0 raw, 1 gzip) |
//! | 4      | 4    | body length, `u32` LE                  |
//! | 8      | n    | UTF-8 JSON body, optionally gzip'd     |

use std::io::{Read, Write};

use bytes::{BufMut, Bytes, BytesMut};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{DataserError, Result};

/// Size of the fixed header in bytes
pub const HEADER_LEN: usize = 8;

/// Upper bound on a single body; anything larger means the stream is out of sync
pub const MAX_BODY_LEN: usize = 64 * 1024 * 1024;

/// Decoded frame header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub compressed: bool,
    pub body_len: usize,
}

impl FrameHeader {
    pub fn new(compressed: bool, body_len: usize) -> Self {
        Self {
            compressed,
            body_len,
        }
    }

    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        buf[0..4].copy_from_slice(&u32::from(self.compressed).to_le_bytes());
        buf[4..8].copy_from_slice(&(self.body_len as u32).to_le_bytes());
        buf
    }

    /// Unpack a header. Any non-zero flag means compressed.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let header: [u8; HEADER_LEN] = bytes
            .get(..HEADER_LEN)
            .and_then(|b| b.try_into().ok())
            .ok_or_else(|| {
                DataserError::Protocol(format!(
                    "header needs {} bytes, got {}",
                    HEADER_LEN,
                    bytes.len()
                ))
            })?;

        let flag = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
        let body_len = u32::from_le_bytes([header[4], header[5], header[6], header[7]]) as usize;

        if body_len > MAX_BODY_LEN {
            return Err(DataserError::Protocol(format!(
                "body length {} exceeds limit {}",
                body_len, MAX_BODY_LEN
            )));
        }

        Ok(Self {
            compressed: flag != 0,
            body_len,
        })
    }
}

/// Serialize a payload into a complete frame
pub fn encode(payload: &Value, compress: bool) -> Result<Bytes> {
    let json = serde_json::to_vec(payload)
        .map_err(|e| DataserError::Serialization(format!("Failed to serialize: {}", e)))?;

    let body = if compress {
        let mut encoder = GzEncoder::new(Vec::with_capacity(json.len() / 2), Compression::default());
        encoder.write_all(&json)?;
        encoder.finish()?
    } else {
        json
    };

    if body.len() > MAX_BODY_LEN {
        return Err(DataserError::Serialization(format!(
            "body length {} exceeds limit {}",
            body.len(),
            MAX_BODY_LEN
        )));
    }

    let mut frame = BytesMut::with_capacity(HEADER_LEN + body.len());
    frame.put_slice(&FrameHeader::new(compress, body.len()).encode());
    frame.put_slice(&body);
    Ok(frame.freeze())
}

/// Decode a complete in-memory frame (header + body)
pub fn decode(frame: &[u8]) -> Result<Value> {
    let header = FrameHeader::decode(frame)?;
    let body = &frame[HEADER_LEN..];
    if body.len() != header.body_len {
        return Err(DataserError::Protocol(format!(
            "declared body length {} but frame carries {}",
            header.body_len,
            body.len()
        )));
    }
    decode_body(&header, body)
}

/// Decompress (if flagged) and parse a body
pub fn decode_body(header: &FrameHeader, body: &[u8]) -> Result<Value> {
    if header.compressed {
        let mut json = Vec::with_capacity(body.len() * 4);
        GzDecoder::new(body)
            .read_to_end(&mut json)
            .map_err(|e| DataserError::Protocol(format!("gzip decompression failed: {}", e)))?;
        parse_json(&json)
    } else {
        parse_json(body)
    }
}

fn parse_json(bytes: &[u8]) -> Result<Value> {
    let text = std::str::from_utf8(bytes)
        .map_err(|e| DataserError::Protocol(format!("body is not UTF-8: {}", e)))?;
    Ok(serde_json::from_str(text)?)
}

/// Outcome of reading one header off the stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderRead {
    Frame(FrameHeader),
    /// Zero bytes before EOF: the peer closed deliberately
    Closed,
    /// Short header or unusable length
    Malformed(String),
}

/// Read exactly one header, looping over partial reads until the header is
/// complete or the stream ends.
pub async fn read_header<R>(reader: &mut R) -> std::io::Result<HeaderRead>
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; HEADER_LEN];
    let mut filled = 0;

    while filled < HEADER_LEN {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }

    Ok(match filled {
        0 => HeaderRead::Closed,
        HEADER_LEN => match FrameHeader::decode(&buf) {
            Ok(header) => HeaderRead::Frame(header),
            Err(e) => HeaderRead::Malformed(e.to_string()),
        },
        n => HeaderRead::Malformed(format!("short header: {} of {} bytes", n, HEADER_LEN)),
    })
}

/// Assemble exactly `len` body bytes; one read may yield fewer than asked.
pub async fn read_body<R>(reader: &mut R, len: usize) -> Result<BytesMut>
where
    R: AsyncRead + Unpin,
{
    let mut body = BytesMut::zeroed(len);
    let mut filled = 0;

    while filled < len {
        let n = reader.read(&mut body[filled..]).await?;
        if n == 0 {
            return Err(DataserError::Protocol(format!(
                "stream ended after {} of {} body bytes",
                filled, len
            )));
        }
        filled += n;
    }

    Ok(body)
}

/// Read and decode one whole frame, returning its header and envelope
pub async fn read_frame<R>(reader: &mut R) -> Result<(FrameHeader, Value)>
where
    R: AsyncRead + Unpin,
{
    match read_header(reader).await? {
        HeaderRead::Frame(header) => {
            let body = read_body(reader, header.body_len).await?;
            let value = decode_body(&header, &body)?;
            Ok((header, value))
        }
        HeaderRead::Closed => Err(DataserError::RemoteClosed),
        HeaderRead::Malformed(reason) => Err(DataserError::Protocol(reason)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_payload() -> Value {
        json!({
            "act": "quotes",
            "success": true,
            "data": [{"symbol": "000001", "price": 11.52, "name": "平安银行"}]
        })
    }

    #[test]
    fn test_encode_decode_preserves_payload() {
        for compress in [false, true] {
            let frame = encode(&sample_payload(), compress).unwrap();
            assert_eq!(decode(&frame).unwrap(), sample_payload());
        }
    }

    #[test]
    fn test_header_declares_actual_body_length() {
        let frame = encode(&sample_payload(), true).unwrap();
        let header = FrameHeader::decode(&frame).unwrap();
        assert!(header.compressed);
        assert_eq!(header.body_len, frame.len() - HEADER_LEN);
    }

    #[test]
    fn test_header_layout_is_little_endian() {
        let bytes = FrameHeader::new(true, 258).encode();
        assert_eq!(bytes, [1, 0, 0, 0, 2, 1, 0, 0]);
    }

    #[test]
    fn test_nonzero_flag_means_compressed() {
        let mut bytes = FrameHeader::new(false, 4).encode();
        bytes[0] = 7;
        assert!(FrameHeader::decode(&bytes).unwrap().compressed);
    }

    #[test]
    fn test_oversized_length_rejected() {
        let bytes = FrameHeader::new(false, MAX_BODY_LEN + 1).encode();
        assert!(matches!(
            FrameHeader::decode(&bytes),
            Err(DataserError::Protocol(_))
        ));
    }

    #[test]
    fn test_corrupt_gzip_is_protocol_error() {
        let header = FrameHeader::new(true, 4);
        let result = decode_body(&header, b"nope");
        assert!(matches!(result, Err(DataserError::Protocol(_))));
    }

    #[test]
    fn test_length_mismatch_rejected() {
        let mut frame = encode(&sample_payload(), false).unwrap().to_vec();
        frame.pop();
        assert!(decode(&frame).is_err());
    }

    #[tokio::test]
    async fn test_body_reassembled_from_fragments() {
        let frame = encode(&sample_payload(), false).unwrap();
        let (head, body) = frame.split_at(HEADER_LEN);

        let mut builder = tokio_test::io::Builder::new();
        builder.read(&head[..3]).read(&head[3..]);
        for chunk in body.chunks(5) {
            builder.read(chunk);
        }
        let mut mock = builder.build();

        let (header, value) = read_frame(&mut mock).await.unwrap();
        assert_eq!(header.body_len, body.len());
        assert_eq!(value, sample_payload());
    }

    #[tokio::test]
    async fn test_compressed_body_across_fragments() {
        let frame = encode(&sample_payload(), true).unwrap();
        let mut builder = tokio_test::io::Builder::new();
        for chunk in frame.chunks(3) {
            builder.read(chunk);
        }
        let mut mock = builder.build();

        let (header, value) = read_frame(&mut mock).await.unwrap();
        assert!(header.compressed);
        assert_eq!(value, sample_payload());
    }

    #[tokio::test]
    async fn test_empty_read_is_remote_close() {
        let mut mock = tokio_test::io::Builder::new().build();
        assert_eq!(read_header(&mut mock).await.unwrap(), HeaderRead::Closed);
    }

    #[tokio::test]
    async fn test_short_header_is_malformed() {
        let mut mock = tokio_test::io::Builder::new().read(&[1, 0, 0]).build();
        match read_header(&mut mock).await.unwrap() {
            HeaderRead::Malformed(reason) => assert!(reason.contains("short header")),
            other => panic!("expected malformed header, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_truncated_body_is_protocol_error() {
        let frame = encode(&sample_payload(), false).unwrap();
        let mut mock = tokio_test::io::Builder::new()
            .read(&frame[..frame.len() - 4])
            .build();
        assert!(matches!(
            read_frame(&mut mock).await,
            Err(DataserError::Protocol(_))
        ));
    }
}
