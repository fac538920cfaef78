//! Scripted in-memory connector shared by the integration tests
#![allow(dead_code)]

use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use apns_legacy::{ApnsResult, Connector, Endpoint};
use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

/// Stream that records writes, serves canned read data, and can refuse writes
pub struct ScriptedStream {
    written: Arc<Mutex<Vec<u8>>>,
    readable: Vec<u8>,
    read_pos: usize,
    fail_writes: bool,
    yield_next_write: bool,
    /// Bytes accepted before every further write stays pending
    write_budget: Option<usize>,
    shutdowns: Arc<AtomicUsize>,
}

impl AsyncRead for ScriptedStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let remaining = &self.readable[self.read_pos..];
        let n = remaining.len().min(buf.remaining());
        buf.put_slice(&remaining[..n]);
        self.read_pos += n;
        Poll::Ready(Ok(()))
    }
}

impl AsyncWrite for ScriptedStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        if self.fail_writes {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "connection reset by gateway",
            )));
        }

        // Give other tasks a chance to run between writes
        if self.yield_next_write {
            self.yield_next_write = false;
            cx.waker().wake_by_ref();
            return Poll::Pending;
        }
        self.yield_next_write = true;

        let accepted = match self.write_budget {
            Some(0) => return Poll::Pending,
            Some(budget) => {
                let accepted = budget.min(buf.len());
                self.write_budget = Some(budget - accepted);
                accepted
            }
            None => buf.len(),
        };

        self.written.lock().unwrap().extend_from_slice(&buf[..accepted]);
        Poll::Ready(Ok(accepted))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
        Poll::Ready(Ok(()))
    }
}

/// Connector whose first `failing_sessions` sessions refuse every write and
/// whose first `stalling_sessions` sessions hang after `stall_after` bytes
#[derive(Clone, Default)]
pub struct ScriptedConnector {
    pub failing_sessions: usize,
    pub stalling_sessions: usize,
    pub stall_after: usize,
    pub feedback_data: Vec<u8>,
    pub written: Arc<Mutex<Vec<u8>>>,
    pub endpoints: Arc<Mutex<Vec<Endpoint>>>,
    pub connects: Arc<AtomicUsize>,
    pub shutdowns: Arc<AtomicUsize>,
}

impl ScriptedConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(failing_sessions: usize) -> Self {
        Self {
            failing_sessions,
            ..Self::default()
        }
    }

    pub fn stalling(stalling_sessions: usize, stall_after: usize) -> Self {
        Self {
            stalling_sessions,
            stall_after,
            ..Self::default()
        }
    }

    pub fn with_feedback(feedback_data: Vec<u8>) -> Self {
        Self {
            feedback_data,
            ..Self::default()
        }
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn shutdowns(&self) -> usize {
        self.shutdowns.load(Ordering::SeqCst)
    }

    pub fn written(&self) -> Vec<u8> {
        self.written.lock().unwrap().clone()
    }

    pub fn endpoints(&self) -> Vec<Endpoint> {
        self.endpoints.lock().unwrap().clone()
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    type Stream = ScriptedStream;

    async fn connect(&self, endpoint: &Endpoint) -> ApnsResult<ScriptedStream> {
        let previous = self.connects.fetch_add(1, Ordering::SeqCst);
        self.endpoints.lock().unwrap().push(endpoint.clone());

        Ok(ScriptedStream {
            written: self.written.clone(),
            readable: self.feedback_data.clone(),
            read_pos: 0,
            fail_writes: previous < self.failing_sessions,
            yield_next_write: false,
            write_budget: (previous < self.stalling_sessions).then_some(self.stall_after),
            shutdowns: self.shutdowns.clone(),
        })
    }
}

/// One 38-byte feedback record
pub fn feedback_record(seconds: u32, token: [u8; 32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(38);
    bytes.extend_from_slice(&seconds.to_be_bytes());
    bytes.extend_from_slice(&32u16.to_be_bytes());
    bytes.extend_from_slice(&token);
    bytes
}
