//! Length-prefixed JSON framing shared by every link in the system.
//!
//! A frame is a 4-byte big-endian unsigned length `N` followed by exactly
//! `N` bytes of one JSON object. `N` may not exceed [`MAX_FRAME_LEN`]; an
//! oversize header is rejected before any payload bytes are consumed and is
//! fatal for the connection.

use std::io;
use std::time::Duration;

use bytes::{Buf, BufMut, BytesMut};
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::net::TcpStream;
use tokio_util::codec::{Decoder, Encoder, Framed};

/// Maximum payload size of a single frame (1 MiB).
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

const HEADER_LEN: usize = 4;

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("declared frame length {declared} exceeds {MAX_FRAME_LEN}")]
    Oversize { declared: usize },
    #[error("frame payload is not a JSON object")]
    NotAnObject,
    #[error("frame JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("read deadline elapsed")]
    Deadline,
    #[error("connection closed")]
    Closed,
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Codec for [`Framed`] streams carrying length-prefixed JSON objects.
#[derive(Debug, Default)]
pub struct FrameCodec;

impl Decoder for FrameCodec {
    type Item = Value;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Value>, FrameError> {
        if src.len() < HEADER_LEN {
            return Ok(None);
        }
        let mut header = [0u8; HEADER_LEN];
        header.copy_from_slice(&src[..HEADER_LEN]);
        let declared = u32::from_be_bytes(header) as usize;
        if declared > MAX_FRAME_LEN {
            // Do not consume past the header; the connection is done for.
            return Err(FrameError::Oversize { declared });
        }
        if src.len() < HEADER_LEN + declared {
            src.reserve(HEADER_LEN + declared - src.len());
            return Ok(None);
        }
        src.advance(HEADER_LEN);
        let payload = src.split_to(declared);
        let value: Value = serde_json::from_slice(&payload)?;
        if !value.is_object() {
            return Err(FrameError::NotAnObject);
        }
        Ok(Some(value))
    }
}

impl Encoder<Value> for FrameCodec {
    type Error = FrameError;

    fn encode(&mut self, item: Value, dst: &mut BytesMut) -> Result<(), FrameError> {
        if !item.is_object() {
            return Err(FrameError::NotAnObject);
        }
        let payload = serde_json::to_vec(&item)?;
        if payload.len() > MAX_FRAME_LEN {
            return Err(FrameError::Oversize {
                declared: payload.len(),
            });
        }
        dst.reserve(HEADER_LEN + payload.len());
        dst.put_u32(payload.len() as u32);
        dst.put_slice(&payload);
        Ok(())
    }
}

/// A TCP stream speaking the framing protocol.
pub type FramedJson = Framed<TcpStream, FrameCodec>;

/// Wrap a freshly accepted or connected stream.
pub fn framed(stream: TcpStream) -> FramedJson {
    Framed::new(stream, FrameCodec)
}

/// Write one message.
pub async fn send<T: Serialize>(framed: &mut FramedJson, msg: &T) -> Result<(), FrameError> {
    let value = serde_json::to_value(msg)?;
    framed.send(value).await
}

/// Read exactly one raw frame, or `None` on clean EOF.
pub async fn recv_value(framed: &mut FramedJson) -> Result<Option<Value>, FrameError> {
    match framed.next().await {
        Some(result) => result.map(Some),
        None => Ok(None),
    }
}

/// Read exactly one message and decode it into `T`.
pub async fn recv<T: DeserializeOwned>(framed: &mut FramedJson) -> Result<Option<T>, FrameError> {
    match recv_value(framed).await? {
        Some(value) => Ok(Some(serde_json::from_value(value)?)),
        None => Ok(None),
    }
}

/// Read one message with a per-read deadline.
pub async fn recv_deadline<T: DeserializeOwned>(
    framed: &mut FramedJson,
    deadline: Duration,
) -> Result<Option<T>, FrameError> {
    match tokio::time::timeout(deadline, recv(framed)).await {
        Ok(result) => result,
        Err(_) => Err(FrameError::Deadline),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn encode_to_bytes(value: Value) -> BytesMut {
        let mut buf = BytesMut::new();
        FrameCodec.encode(value, &mut buf).unwrap();
        buf
    }

    #[test]
    fn single_frame_round_trips() {
        let msg = serde_json::json!({"action": "login", "data": {"email": "a@x"}});
        let mut buf = encode_to_bytes(msg.clone());
        let decoded = FrameCodec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, msg);
        assert!(buf.is_empty());
    }

    #[test]
    fn partial_header_yields_none() {
        let mut buf = BytesMut::from(&[0u8, 0][..]);
        assert!(FrameCodec.decode(&mut buf).unwrap().is_none());
        assert_eq!(buf.len(), 2);
    }

    #[test]
    fn partial_payload_yields_none() {
        let msg = serde_json::json!({"k": "v"});
        let full = encode_to_bytes(msg);
        let mut buf = BytesMut::from(&full[..full.len() - 3]);
        assert!(FrameCodec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn oversize_header_rejected_without_consuming() {
        let declared = (MAX_FRAME_LEN + 1) as u32;
        let mut buf = BytesMut::new();
        buf.put_u32(declared);
        buf.put_slice(b"xxxx");
        let err = FrameCodec.decode(&mut buf).unwrap_err();
        assert!(matches!(err, FrameError::Oversize { .. }));
        // Header still in place: nothing beyond it was consumed.
        assert_eq!(buf.len(), 8);
    }

    #[test]
    fn non_object_payload_rejected() {
        let payload = b"[1,2,3]";
        let mut buf = BytesMut::new();
        buf.put_u32(payload.len() as u32);
        buf.put_slice(payload);
        let err = FrameCodec.decode(&mut buf).unwrap_err();
        assert!(matches!(err, FrameError::NotAnObject));
    }

    #[test]
    fn undecodable_json_rejected() {
        let payload = b"{not json";
        let mut buf = BytesMut::new();
        buf.put_u32(payload.len() as u32);
        buf.put_slice(payload);
        let err = FrameCodec.decode(&mut buf).unwrap_err();
        assert!(matches!(err, FrameError::Json(_)));
    }

    #[test]
    fn encoding_a_non_object_is_an_error() {
        let mut buf = BytesMut::new();
        let err = FrameCodec.encode(serde_json::json!(42), &mut buf).unwrap_err();
        assert!(matches!(err, FrameError::NotAnObject));
    }

    proptest! {
        /// Any byte-aligned concatenation of valid frames decodes back to
        /// the original message sequence.
        #[test]
        fn concatenated_frames_round_trip(
            texts in proptest::collection::vec("[a-z0-9 ]{0,40}", 1..8)
        ) {
            let messages: Vec<Value> = texts
                .iter()
                .enumerate()
                .map(|(i, t)| serde_json::json!({"seq": i, "text": t}))
                .collect();

            let mut wire = BytesMut::new();
            for msg in &messages {
                let mut one = BytesMut::new();
                FrameCodec.encode(msg.clone(), &mut one).unwrap();
                wire.extend_from_slice(&one);
            }

            let mut decoded = Vec::new();
            while let Some(msg) = FrameCodec.decode(&mut wire).unwrap() {
                decoded.push(msg);
            }
            prop_assert_eq!(decoded, messages);
            prop_assert!(wire.is_empty());
        }
    }

    #[tokio::test]
    async fn framed_send_recv_over_tcp() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut framed = framed(stream);
            let value = recv_value(&mut framed).await.unwrap().unwrap();
            send(&mut framed, &value).await.unwrap();
        });

        let stream = TcpStream::connect(addr).await.unwrap();
        let mut client = framed(stream);
        let msg = serde_json::json!({"hello": "world"});
        send(&mut client, &msg).await.unwrap();
        let echoed = recv_value(&mut client).await.unwrap().unwrap();
        assert_eq!(echoed, msg);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn recv_deadline_times_out() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let _server = tokio::spawn(async move {
            let (_stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let stream = TcpStream::connect(addr).await.unwrap();
        let mut client = framed(stream);
        let result: Result<Option<Value>, _> =
            recv_deadline(&mut client, Duration::from_millis(50)).await;
        assert!(matches!(result, Err(FrameError::Deadline)));
    }
}
