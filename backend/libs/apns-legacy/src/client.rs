use std::sync::Arc;

use futures::FutureExt;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::config::ApnsConfig;
use crate::connection::{ConnectionManager, Connector};
use crate::error::ApnsResult;
use crate::feedback::{self, FeedbackRecord};
use crate::notification::{Message, Notification, PackagedNotification};
use crate::retry::RetryPolicy;
use crate::tls::TlsConnector;

/// Client for the binary gateway and feedback services
///
/// All sends and feedback reads on one client run under a single lock, so
/// notifications from one `send` call are never interleaved with another
/// call's traffic. Ordering between separate calls is whatever order the lock
/// is acquired in.
pub struct ApnsClient<C: Connector = TlsConnector> {
    config: ApnsConfig,
    inner: Mutex<ConnectionManager<C>>,
}

impl ApnsClient<TlsConnector> {
    /// Creates a client that connects over mutually-authenticated TLS
    ///
    /// Nothing is loaded or opened here; certificate problems surface on the
    /// first send or feedback call.
    pub fn new(config: ApnsConfig) -> Self {
        let connector = TlsConnector::from_config(&config);
        Self::with_connector(config, connector)
    }
}

impl<C: Connector> ApnsClient<C> {
    pub fn with_connector(config: ApnsConfig, connector: C) -> Self {
        let manager = ConnectionManager::new(
            connector,
            config.gateway_endpoint(),
            RetryPolicy::new(config.retries, config.retry_backoff),
            config.persistent,
        );

        info!(
            host = %config.host,
            port = config.port,
            persistent = config.persistent,
            "Initialized APNs client"
        );

        Self {
            config,
            inner: Mutex::new(manager),
        }
    }

    pub fn config(&self) -> &ApnsConfig {
        &self.config
    }

    /// Write every notification, in order, over one session
    ///
    /// A failed write restarts the whole batch on a fresh session. The
    /// gateway sends no acknowledgement, so success only means the bytes were
    /// accepted by the transport.
    pub async fn send<N>(&self, notifications: &[N]) -> ApnsResult<()>
    where
        N: PackagedNotification,
    {
        if notifications.is_empty() {
            return Ok(());
        }

        let frames: Arc<Vec<Vec<u8>>> = Arc::new(
            notifications
                .iter()
                .map(|notification| notification.packaged_bytes())
                .collect(),
        );

        let mut manager = self.inner.lock().await;
        manager
            .ensure_session_and_run(|stream| {
                let frames = frames.clone();
                async move {
                    for frame in frames.iter() {
                        stream.write_all(frame).await?;
                    }
                    stream.flush().await
                }
                .boxed()
            })
            .await?;

        debug!(count = frames.len(), "Notifications written");
        Ok(())
    }

    /// Build a notification for one device and send it
    pub async fn send_notification(
        &self,
        device_token: &str,
        message: impl Into<Message>,
    ) -> ApnsResult<()> {
        let notification = Notification::new(device_token, message)?;
        self.send(&[notification]).await
    }

    /// Drain the feedback service
    ///
    /// Opens a dedicated session to the feedback host, never the gateway
    /// session, and always closes it afterwards.
    pub async fn feedback(&self) -> ApnsResult<Vec<FeedbackRecord>> {
        let endpoint = self.config.feedback_endpoint();

        let mut manager = self.inner.lock().await;
        let records = manager
            .run_ephemeral(&endpoint, |stream| feedback::read_records(stream).boxed())
            .await?;

        info!(%endpoint, records = records.len(), "Feedback drained");
        Ok(records)
    }

    pub async fn start_persistence(&self) {
        self.inner.lock().await.start_persistence();
    }

    /// Turn persistence off and close the open session, if any
    pub async fn stop_persistence(&self) {
        self.inner.lock().await.stop_persistence().await;
    }

    pub async fn is_persistent(&self) -> bool {
        self.inner.lock().await.is_persistent()
    }

    /// Sessions opened by this client so far
    pub async fn handshakes(&self) -> u64 {
        self.inner.lock().await.handshakes()
    }
}
