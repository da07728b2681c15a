// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Request/response framing over an async byte stream.
//!
//! Frames are `Key: Value\n` header lines terminated by an empty line.
//! Unknown keys are ignored (forward compatibility); missing keys default
//! to zero (`Id` defaults to the nil UUID). `Content-Length` is the only
//! mandatory response header — its absence is a [`FramingError`].

use std::collections::HashMap;

use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use uuid::Uuid;

use crate::error::FramingError;
use crate::model::{Bitrate, Priority, RequestFrame, ResponseFrame};

const MAX_HEADER_LINE: usize = 4096;
const MAX_HEADERS: usize = 32;

async fn read_headers<R>(reader: &mut BufReader<R>) -> Result<HashMap<String, String>, FramingError>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut headers = HashMap::new();
    loop {
        let mut line = String::new();
        let n = reader.read_line(&mut line).await?;
        if n == 0 {
            return Err(FramingError::Eof);
        }
        let line = line.trim_end_matches(['\n', '\r']);
        if line.is_empty() {
            break;
        }
        if line.len() > MAX_HEADER_LINE || headers.len() >= MAX_HEADERS {
            return Err(FramingError::MalformedHeader(line.to_string()));
        }
        let (key, value) = line
            .split_once(':')
            .ok_or_else(|| FramingError::MalformedHeader(line.to_string()))?;
        headers.insert(key.trim().to_string(), value.trim().to_string());
    }
    Ok(headers)
}

fn header_i64(headers: &HashMap<String, String>, key: &str) -> i64 {
    headers
        .get(key)
        .and_then(|v| v.parse::<i64>().ok())
        .unwrap_or(0)
}

fn header_u64(headers: &HashMap<String, String>, key: &str) -> u64 {
    headers
        .get(key)
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(0)
}

/// Parse one request frame from `reader`. The caller owns a `BufReader` so
/// pipelined requests on the same stream can be parsed back-to-back without
/// re-buffering.
pub async fn read_request<R>(reader: &mut BufReader<R>) -> Result<RequestFrame, FramingError>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let headers = read_headers(reader).await?;
    let id = headers
        .get("Id")
        .and_then(|v| Uuid::parse_str(v).ok())
        .unwrap_or(Uuid::nil());
    Ok(RequestFrame {
        id,
        priority: Priority::from_wire_value(header_i64(&headers, "Priority")),
        bitrate: Bitrate::from_wire_value(header_i64(&headers, "Bitrate")),
        segment: header_u64(&headers, "Segment") as u32,
        tile: header_u64(&headers, "Tile") as u32,
        timeout_ms: header_u64(&headers, "Timeout"),
    })
}

/// Write one request frame to `writer`, without flushing.
pub async fn write_request<W>(writer: &mut W, req: &RequestFrame) -> Result<(), FramingError>
where
    W: AsyncWrite + Unpin,
{
    let header = format!(
        "Id: {}\nPriority: {}\nBitrate: {}\nSegment: {}\nTile: {}\nTimeout: {}\n\n",
        req.id,
        req.priority.wire_value(),
        req.bitrate.wire_value(),
        req.segment,
        req.tile,
        req.timeout_ms,
    );
    writer.write_all(header.as_bytes()).await?;
    Ok(())
}

/// Parse one response frame from `reader`, including its payload.
pub async fn read_response<R>(reader: &mut BufReader<R>) -> Result<ResponseFrame, FramingError>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let headers = read_headers(reader).await?;
    let content_length = headers
        .get("Content-Length")
        .ok_or(FramingError::MissingContentLength)?
        .parse::<usize>()
        .map_err(|_| FramingError::MalformedHeader("Content-Length".to_string()))?;

    let mut data = vec![0u8; content_length];
    let mut read_total = 0;
    while read_total < content_length {
        let n = tokio::io::AsyncReadExt::read(reader, &mut data[read_total..]).await?;
        if n == 0 {
            return Err(FramingError::ShortPayload {
                expected: content_length,
                got: read_total,
            });
        }
        read_total += n;
    }

    Ok(ResponseFrame {
        priority: Priority::from_wire_value(header_i64(&headers, "Priority")),
        bitrate: Bitrate::from_wire_value(header_i64(&headers, "Bitrate")),
        segment: header_u64(&headers, "Segment") as u32,
        tile: header_u64(&headers, "Tile") as u32,
        data,
    })
}

/// Write one response frame (header + payload) to `writer`, without flushing.
pub async fn write_response<W>(writer: &mut W, res: &ResponseFrame) -> Result<(), FramingError>
where
    W: AsyncWrite + Unpin,
{
    let header = format!(
        "Priority: {}\nBitrate: {}\nSegment: {}\nTile: {}\nContent-Length: {}\n\n",
        res.priority.wire_value(),
        res.bitrate.wire_value(),
        res.segment,
        res.tile,
        res.data.len(),
    );
    writer.write_all(header.as_bytes()).await?;
    writer.write_all(&res.data).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::BufReader;

    fn rt() -> tokio::runtime::Runtime {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap()
    }

    #[test]
    fn request_round_trip() {
        rt().block_on(async {
            let req = RequestFrame {
                id: Uuid::new_v4(),
                priority: Priority::High,
                bitrate: Bitrate::High,
                segment: 42,
                tile: 7,
                timeout_ms: 250,
            };
            let mut buf = Vec::new();
            write_request(&mut buf, &req).await.unwrap();
            let mut reader = BufReader::new(buf.as_slice());
            let parsed = read_request(&mut reader).await.unwrap();
            assert_eq!(parsed, req);
        });
    }

    #[test]
    fn response_round_trip_with_payload() {
        rt().block_on(async {
            let res = ResponseFrame {
                priority: Priority::Low,
                bitrate: Bitrate::Medium,
                segment: 3,
                tile: 1,
                data: vec![1, 2, 3, 4, 5],
            };
            let mut buf = Vec::new();
            write_response(&mut buf, &res).await.unwrap();
            let mut reader = BufReader::new(buf.as_slice());
            let parsed = read_response(&mut reader).await.unwrap();
            assert_eq!(parsed, res);
        });
    }

    #[test]
    fn response_missing_content_length_is_an_error() {
        rt().block_on(async {
            let mut reader = BufReader::new("Priority: 0\n\n".as_bytes());
            let err = read_response(&mut reader).await.unwrap_err();
            assert!(matches!(err, FramingError::MissingContentLength));
        });
    }

    #[test]
    fn unknown_headers_are_ignored() {
        rt().block_on(async {
            let raw = "Id: 123e4567-e89b-12d3-a456-426614174000\nPriority: 1\nFuture-Field: xyz\nSegment: 5\nTile: 2\nTimeout: 10\n\n";
            let mut reader = BufReader::new(raw.as_bytes());
            let req = read_request(&mut reader).await.unwrap();
            assert_eq!(req.segment, 5);
            assert_eq!(req.tile, 2);
            assert_eq!(req.priority, Priority::Medium);
        });
    }

    #[test]
    fn missing_keys_default_to_zero() {
        rt().block_on(async {
            let mut reader = BufReader::new("\n".as_bytes());
            let req = read_request(&mut reader).await.unwrap();
            assert_eq!(req.segment, 0);
            assert_eq!(req.tile, 0);
            assert_eq!(req.timeout_ms, 0);
            assert_eq!(req.id, Uuid::nil());
        });
    }
}
