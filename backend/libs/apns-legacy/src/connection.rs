//! Session lifecycle for the gateway and feedback services
//!
//! `ConnectionManager` is the only place a session is opened or closed. Work
//! runs through [`ConnectionManager::ensure_session_and_run`], which opens a
//! session when none is live, retries transient I/O failures on a fresh
//! session, and tears the session down afterwards unless persistence is on.

use std::io;

use async_trait::async_trait;
use futures::future::BoxFuture;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

use crate::config::Endpoint;
use crate::error::{ApnsError, ApnsResult};
use crate::retry::RetryPolicy;

/// Opens the encrypted stream a session runs over
#[async_trait]
pub trait Connector: Send + Sync {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send;

    /// Connect to `endpoint` and complete the handshake
    ///
    /// Returns `ApnsError::Config` for problems that retrying cannot fix and
    /// `ApnsError::Io` for transport failures.
    async fn connect(&self, endpoint: &Endpoint) -> ApnsResult<Self::Stream>;
}

/// A live encrypted stream
///
/// The stream owns the underlying socket, so the transport and the TLS state
/// are opened and closed together.
pub struct Session<S> {
    stream: S,
    endpoint: Endpoint,
}

impl<S> Session<S>
where
    S: AsyncWrite + Unpin,
{
    fn new(stream: S, endpoint: Endpoint) -> Self {
        Self { stream, endpoint }
    }

    pub fn stream_mut(&mut self) -> &mut S {
        &mut self.stream
    }

    /// Shut the stream down; failures are logged, never returned
    async fn close(mut self) {
        if let Err(e) = self.stream.shutdown().await {
            debug!(endpoint = %self.endpoint, error = %e, "Session shutdown was not clean");
        }
        debug!(endpoint = %self.endpoint, "Session closed");
    }
}

pub struct ConnectionManager<C: Connector> {
    connector: C,
    endpoint: Endpoint,
    retry: RetryPolicy,
    persistent: bool,
    session: Option<Session<C::Stream>>,
    handshakes: u64,
}

impl<C: Connector> ConnectionManager<C> {
    pub fn new(connector: C, endpoint: Endpoint, retry: RetryPolicy, persistent: bool) -> Self {
        Self {
            connector,
            endpoint,
            retry,
            persistent,
            session: None,
            handshakes: 0,
        }
    }

    pub fn is_persistent(&self) -> bool {
        self.persistent
    }

    pub fn has_session(&self) -> bool {
        self.session.is_some()
    }

    /// Sessions opened so far, gateway and ephemeral alike
    pub fn handshakes(&self) -> u64 {
        self.handshakes
    }

    pub fn start_persistence(&mut self) {
        self.persistent = true;
        info!(endpoint = %self.endpoint, "Session persistence enabled");
    }

    /// Disable persistence and close any open session
    pub async fn stop_persistence(&mut self) {
        self.persistent = false;
        self.close_session().await;
        info!(endpoint = %self.endpoint, "Session persistence disabled");
    }

    /// Close the current session, if any
    pub async fn close_session(&mut self) {
        if let Some(session) = self.session.take() {
            session.close().await;
        }
    }

    /// Run `work` over a live gateway session
    ///
    /// I/O errors from connecting or from `work` discard the session and start
    /// over on a fresh one, up to the retry budget. Configuration errors are
    /// returned immediately. Without persistence the session is closed once
    /// `work` succeeds. Dropping the returned future mid-call discards the
    /// session in use, persistent or not.
    pub async fn ensure_session_and_run<T, F>(&mut self, mut work: F) -> ApnsResult<T>
    where
        F: for<'a> FnMut(&'a mut C::Stream) -> BoxFuture<'a, io::Result<T>>,
    {
        let mut attempt = 1;

        loop {
            match self.run_once(&mut work).await {
                Ok(value) => return Ok(value),
                Err(ApnsError::Io(err)) => {
                    if !self.retry.allows_another(attempt) {
                        warn!(
                            endpoint = %self.endpoint,
                            attempt,
                            max_attempts = self.retry.max_attempts,
                            error = %err,
                            "Retry budget exhausted"
                        );
                        return Err(ApnsError::Io(err));
                    }

                    let delay = self.retry.delay_after(attempt);
                    warn!(
                        endpoint = %self.endpoint,
                        attempt,
                        max_attempts = self.retry.max_attempts,
                        error = %err,
                        "Session I/O failed, retrying on a fresh session"
                    );
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }

                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn run_once<T, F>(&mut self, work: &mut F) -> ApnsResult<T>
    where
        F: for<'a> FnMut(&'a mut C::Stream) -> BoxFuture<'a, io::Result<T>>,
    {
        // The session stays out of `self.session` while `work` runs, so a
        // cancelled call drops it instead of leaving a half-written stream behind
        let mut session = match self.session.take() {
            Some(session) => session,
            None => {
                let stream = self.connector.connect(&self.endpoint).await?;
                self.handshakes += 1;
                Session::new(stream, self.endpoint.clone())
            }
        };

        match work(session.stream_mut()).await {
            Ok(value) => {
                if self.persistent {
                    self.session = Some(session);
                } else {
                    session.close().await;
                }
                Ok(value)
            }
            Err(err) => {
                session.close().await;
                Err(err.into())
            }
        }
    }

    /// Run `work` over a dedicated session to `endpoint`
    ///
    /// The session never replaces the gateway session and is shut down
    /// whatever the outcome. There is no retry.
    pub async fn run_ephemeral<T, F>(&mut self, endpoint: &Endpoint, work: F) -> ApnsResult<T>
    where
        F: for<'a> FnOnce(&'a mut C::Stream) -> BoxFuture<'a, io::Result<T>>,
    {
        let stream = self.connector.connect(endpoint).await?;
        self.handshakes += 1;

        let mut session = Session::new(stream, endpoint.clone());
        let result = work(session.stream_mut()).await;
        session.close().await;

        Ok(result?)
    }
}
