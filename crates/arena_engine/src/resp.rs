//! Minimal RESP2 client used by the score and XP stores.
//!
//! One shared TCP connection framed with the RESP2 codec; commands are
//! serialized through a mutex so request/response pairing is preserved.
//! Pipelines (`MULTI`/`EXEC` and friends) are written as a batch of frames
//! and read back as the same number of replies. A failed round trip drops
//! the connection; the next caller reconnects.

use anyhow::{anyhow, Context};
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use redis_protocol::codec::Resp2;
use redis_protocol::resp2::types::{BytesFrame, Resp2Frame};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::codec::Framed;

use crate::error::ActionError;

type RespFramed = Framed<TcpStream, Resp2>;

/// Shared RESP2 connection with reconnect-on-error.
pub struct RespClient {
    addr: String,
    conn: Mutex<Option<RespFramed>>,
}

impl RespClient {
    /// Connect eagerly so an unreachable store is a startup failure.
    pub async fn connect(addr: &str) -> anyhow::Result<Self> {
        let framed = dial(addr).await?;
        Ok(Self {
            addr: addr.to_string(),
            conn: Mutex::new(Some(framed)),
        })
    }

    /// Issue a single command and return its reply frame.
    pub async fn command(&self, parts: &[Bytes]) -> Result<BytesFrame, ActionError> {
        let frame = command_frame(parts);
        let mut replies = self.pipeline(std::slice::from_ref(&frame)).await?;
        replies
            .pop()
            .ok_or_else(|| ActionError::Transient(anyhow!("missing reply from {}", self.addr)))
    }

    /// Write `frames` back to back and read one reply per frame, in order.
    pub async fn pipeline(&self, frames: &[BytesFrame]) -> Result<Vec<BytesFrame>, ActionError> {
        let mut guard = self.conn.lock().await;
        if guard.is_none() {
            *guard = Some(
                dial(&self.addr)
                    .await
                    .with_context(|| format!("reconnect to {}", self.addr))?,
            );
        }
        let framed = guard.as_mut().expect("connection just ensured");

        let result = round_trip(framed, frames).await;
        if result.is_err() {
            // Drop the half-broken connection; the next call redials.
            *guard = None;
        }
        result.map_err(ActionError::Transient)
    }

    /// Close the underlying socket. Called by the lifecycle output phase.
    pub async fn close(&self) {
        let mut guard = self.conn.lock().await;
        if let Some(framed) = guard.take() {
            let mut stream = framed.into_inner();
            let _ = stream.shutdown().await;
        }
    }
}

impl std::fmt::Debug for RespClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RespClient").field("addr", &self.addr).finish()
    }
}

async fn dial(addr: &str) -> anyhow::Result<RespFramed> {
    let stream = TcpStream::connect(addr)
        .await
        .with_context(|| format!("connect to redis at {addr}"))?;
    stream.set_nodelay(true).ok();
    Ok(Framed::new(stream, Resp2::default()))
}

async fn round_trip(framed: &mut RespFramed, frames: &[BytesFrame]) -> anyhow::Result<Vec<BytesFrame>> {
    for frame in frames {
        framed
            .feed(frame.clone())
            .await
            .context("write resp frame")?;
    }
    <RespFramed as SinkExt<BytesFrame>>::flush(framed)
        .await
        .context("flush resp frames")?;

    let mut replies = Vec::with_capacity(frames.len());
    for _ in 0..frames.len() {
        match framed.next().await {
            Some(Ok(frame)) => replies.push(frame),
            Some(Err(err)) => return Err(anyhow!("read resp frame: {err}")),
            None => return Err(anyhow!("redis connection closed mid-reply")),
        }
    }
    Ok(replies)
}

/// Build a command frame from bulk-string parts.
pub fn command_frame(parts: &[Bytes]) -> BytesFrame {
    BytesFrame::Array(
        parts
            .iter()
            .map(|part| BytesFrame::BulkString(part.clone()))
            .collect(),
    )
}

/// Convenience for building command parts from mixed argument types.
pub fn arg(value: impl ToString) -> Bytes {
    Bytes::from(value.to_string())
}

/// Interpret a reply as a redis-side error if it is one.
pub fn check_error(frame: &BytesFrame) -> anyhow::Result<()> {
    if let BytesFrame::Error(message) = frame {
        return Err(anyhow!("redis error: {message}"));
    }
    Ok(())
}

/// Decode an integer reply (`:n` or a numeric bulk string).
pub fn as_i64(frame: &BytesFrame) -> anyhow::Result<i64> {
    check_error(frame)?;
    match frame {
        BytesFrame::Integer(value) => Ok(*value),
        other => as_f64(other).map(|value| value as i64),
    }
}

/// Decode a numeric reply that redis formats as a bulk string float
/// (`ZSCORE`, `ZINCRBY`).
pub fn as_f64(frame: &BytesFrame) -> anyhow::Result<f64> {
    check_error(frame)?;
    match frame {
        BytesFrame::Integer(value) => Ok(*value as f64),
        BytesFrame::BulkString(_) | BytesFrame::SimpleString(_) => {
            let text = frame
                .as_str()
                .ok_or_else(|| anyhow!("non-utf8 numeric reply"))?;
            text.parse::<f64>()
                .map_err(|err| anyhow!("parse numeric reply {text:?}: {err}"))
        }
        other => Err(anyhow!("unexpected numeric reply: {other:?}")),
    }
}

/// Decode an array-of-strings reply (`SMEMBERS`, `ZRANGE`).
pub fn as_string_array(frame: &BytesFrame) -> anyhow::Result<Vec<String>> {
    check_error(frame)?;
    let BytesFrame::Array(items) = frame else {
        return Err(anyhow!("expected array reply, got {frame:?}"));
    };
    items
        .iter()
        .map(|item| {
            item.as_str()
                .map(|s| s.to_string())
                .ok_or_else(|| anyhow!("non-string array element: {item:?}"))
        })
        .collect()
}

/// Decode an `EXEC` reply into its per-command result frames.
pub fn as_exec_results(frame: &BytesFrame) -> anyhow::Result<Vec<BytesFrame>> {
    check_error(frame)?;
    match frame {
        BytesFrame::Array(items) => Ok(items.clone()),
        BytesFrame::Null => Err(anyhow!("redis transaction aborted")),
        other => Err(anyhow!("unexpected EXEC reply: {other:?}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_replies_decode() {
        assert_eq!(as_i64(&BytesFrame::Integer(42)).unwrap(), 42);
        let bulk = BytesFrame::BulkString(Bytes::from_static(b"10"));
        assert_eq!(as_i64(&bulk).unwrap(), 10);
        let float = BytesFrame::BulkString(Bytes::from_static(b"12.0"));
        assert_eq!(as_f64(&float).unwrap(), 12.0);
    }

    #[test]
    fn error_replies_surface() {
        let err = BytesFrame::Error(String::from("WRONGTYPE").into());
        assert!(as_i64(&err).is_err());
        assert!(as_string_array(&err).is_err());
    }

    #[test]
    fn command_frames_are_bulk_string_arrays() {
        let frame = command_frame(&[arg("ZSCORE"), arg("leaderboard:{1}:data"), arg("u1")]);
        let BytesFrame::Array(parts) = frame else {
            panic!("expected array");
        };
        assert_eq!(parts.len(), 3);
        assert!(matches!(parts[0], BytesFrame::BulkString(_)));
    }
}
