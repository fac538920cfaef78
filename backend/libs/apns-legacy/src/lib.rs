/// Nova APNs Legacy Library
///
/// Client for Apple's binary push protocol: notifications are written as
/// framed bytes over a mutually-authenticated TLS connection to the gateway,
/// and expired device tokens are drained from the feedback service.
///
/// It handles:
/// - Client certificate and key loading from a single PEM file
/// - Session reuse (persistence) or one session per call
/// - Bounded retry of failed writes on a fresh session
/// - Notification framing with payload truncation
/// - Feedback record decoding
///
/// ```rust,no_run
/// use apns_legacy::{ApnsClient, ApnsConfig, Message};
///
/// # async fn example() -> apns_legacy::ApnsResult<()> {
/// let config = ApnsConfig::new("gateway.push.apple.com", "/certs/apns.pem");
/// let client = ApnsClient::new(config);
///
/// client
///     .send_notification(
///         "740f4707bebcf74f9b7c25d48e3358945f6aa01da5ddb387462c7eaf61bb78ad",
///         Message::alert("Hello").with_badge(1),
///     )
///     .await?;
///
/// for record in client.feedback().await? {
///     println!("{} expired at {}", record.device_token, record.timestamp);
/// }
/// # Ok(())
/// # }
/// ```
pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod feedback;
pub mod notification;
pub mod retry;
pub mod tls;

pub use client::ApnsClient;
pub use config::{derive_feedback_host, ApnsConfig, Endpoint};
pub use connection::{ConnectionManager, Connector, Session};
pub use error::{ApnsError, ApnsResult};
pub use feedback::FeedbackRecord;
pub use notification::{Message, Notification, PackagedNotification};
pub use retry::RetryPolicy;
pub use tls::{ClientIdentity, TlsConnector};
