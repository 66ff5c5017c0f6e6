//! Shared protocols and helpers for integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use eventnet::net::{Connection, Engine, Event, EventKind, Protocol, ProtocolError};

pub const HEAD_LEN: usize = 4;
pub const MAX_BODY: usize = 1024;

/// Encode a 4-byte big-endian length header followed by `body`.
pub fn frame(body: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(HEAD_LEN + body.len());
    buf.extend_from_slice(&(body.len() as u32).to_be_bytes());
    buf.extend_from_slice(body);
    buf
}

fn decode_len(head: &[u8]) -> Result<usize, ProtocolError> {
    let raw: [u8; HEAD_LEN] = head
        .try_into()
        .map_err(|_| ProtocolError::Header(format!("expected {} header bytes", HEAD_LEN)))?;
    let len = u32::from_be_bytes(raw) as usize;
    if len == 0 || len > MAX_BODY {
        return Err(ProtocolError::Header(format!("body length {} out of range", len)));
    }
    Ok(len)
}

/// Length-prefixed UTF-8 text frames.
#[derive(Debug, Default)]
pub struct TextProtocol;

impl Protocol for TextProtocol {
    type Header = usize;
    type Message = String;

    fn head_len(&self) -> usize {
        HEAD_LEN
    }

    fn body_len(&self, head: &[u8]) -> Result<(usize, usize), ProtocolError> {
        let len = decode_len(head)?;
        Ok((len, len))
    }

    fn parse(&self, _head: usize, body: Bytes) -> Result<String, ProtocolError> {
        String::from_utf8(body.to_vec()).map_err(|e| ProtocolError::Body(e.to_string()))
    }

    fn serialize(&self, message: &String) -> Result<Bytes, ProtocolError> {
        if message.is_empty() || message.len() > MAX_BODY {
            return Err(ProtocolError::Serialize(format!("message length {}", message.len())));
        }
        Ok(Bytes::from(frame(message.as_bytes())))
    }
}

/// Structured message carried by [`JsonProtocol`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub seq: u32,
    pub command: String,
    pub body: String,
}

impl Message {
    pub fn new(seq: u32, command: &str, body: &str) -> Self {
        Self {
            seq,
            command: command.to_string(),
            body: body.to_string(),
        }
    }
}

/// Length-prefixed JSON frames.
#[derive(Debug, Default)]
pub struct JsonProtocol;

impl Protocol for JsonProtocol {
    type Header = ();
    type Message = Message;

    fn head_len(&self) -> usize {
        HEAD_LEN
    }

    fn body_len(&self, head: &[u8]) -> Result<((), usize), ProtocolError> {
        Ok(((), decode_len(head)?))
    }

    fn parse(&self, _head: (), body: Bytes) -> Result<Message, ProtocolError> {
        serde_json::from_slice(&body).map_err(|e| ProtocolError::Body(e.to_string()))
    }

    fn serialize(&self, message: &Message) -> Result<Bytes, ProtocolError> {
        let body = serde_json::to_vec(message).map_err(|e| ProtocolError::Serialize(e.to_string()))?;
        let mut buf = BytesMut::with_capacity(HEAD_LEN + body.len());
        buf.put_u32(body.len() as u32);
        buf.put_slice(&body);
        Ok(buf.freeze())
    }
}

/// Unframed protocol whose accept filter can be switched off.
#[derive(Debug)]
pub struct Gatekeeper {
    pub open: AtomicBool,
}

impl Gatekeeper {
    pub fn new(open: bool) -> Self {
        Self {
            open: AtomicBool::new(open),
        }
    }
}

impl Protocol for Gatekeeper {
    type Header = ();
    type Message = Bytes;

    fn filter_accept(&self, _conn: &Connection<Self>) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn head_len(&self) -> usize {
        0
    }

    fn body_len(&self, _head: &[u8]) -> Result<((), usize), ProtocolError> {
        Ok(((), 0))
    }

    fn parse(&self, _head: (), body: Bytes) -> Result<Bytes, ProtocolError> {
        Ok(body)
    }

    fn serialize(&self, message: &Bytes) -> Result<Bytes, ProtocolError> {
        Ok(message.clone())
    }
}

/// Poll until a non-timeout event arrives or `limit` passes.
pub async fn next_event<P: Protocol>(engine: &Engine<P>, limit: Duration) -> Option<Event<P>> {
    let deadline = tokio::time::Instant::now() + limit;
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            return None;
        }
        match engine.poll_event(remaining).await.expect("engine destroyed") {
            Event::Timeout => continue,
            event => return Some(event),
        }
    }
}

/// Poll until an event of `kind` arrives, discarding others.
pub async fn wait_for<P: Protocol>(engine: &Engine<P>, kind: EventKind) -> Event<P> {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        match next_event(engine, remaining).await {
            Some(event) if event.kind() == kind => return event,
            Some(_) => continue,
            None => panic!("timed out waiting for {:?}", kind),
        }
    }
}

/// Poll until the predicate holds, checking every few milliseconds.
pub async fn eventually<F: Fn() -> bool>(check: F) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
