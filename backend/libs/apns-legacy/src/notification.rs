//! Notification framing for the binary gateway protocol
//!
//! The connection layer only needs [`PackagedNotification::packaged_bytes`].
//! [`Notification`] produces the simple (command 0) frame:
//!
//! ```text
//! | 0x00 | token len: u16 BE (32) | token: 32 bytes | payload len: u16 BE | payload |
//! ```

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::warn;

use crate::error::{ApnsError, ApnsResult};
use crate::feedback::DEVICE_TOKEN_LEN;

/// Largest payload the gateway accepts for the simple frame
pub const MAX_PAYLOAD_LEN: usize = 256;

const SIMPLE_FRAME_COMMAND: u8 = 0;

/// One complete protocol frame, written to the session verbatim
pub trait PackagedNotification: Send + Sync {
    fn packaged_bytes(&self) -> Vec<u8>;
}

impl PackagedNotification for [u8] {
    fn packaged_bytes(&self) -> Vec<u8> {
        self.to_vec()
    }
}

impl PackagedNotification for Vec<u8> {
    fn packaged_bytes(&self) -> Vec<u8> {
        self.clone()
    }
}

impl<T: PackagedNotification + ?Sized> PackagedNotification for &T {
    fn packaged_bytes(&self) -> Vec<u8> {
        (**self).packaged_bytes()
    }
}

/// Message content shown on the device
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Message {
    pub alert: Option<String>,
    pub badge: Option<u32>,
    pub sound: Option<String>,
    pub content_available: bool,
    /// Extra top-level payload keys next to `aps`
    pub custom: Map<String, Value>,
}

impl Message {
    pub fn alert(text: impl Into<String>) -> Self {
        Self {
            alert: Some(text.into()),
            ..Default::default()
        }
    }

    pub fn with_badge(mut self, badge: u32) -> Self {
        self.badge = Some(badge);
        self
    }

    pub fn with_sound(mut self, sound: impl Into<String>) -> Self {
        self.sound = Some(sound.into());
        self
    }

    pub fn with_content_available(mut self) -> Self {
        self.content_available = true;
        self
    }

    pub fn with_custom(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.custom.insert(key.into(), value.into());
        self
    }
}

impl From<&str> for Message {
    fn from(text: &str) -> Self {
        Message::alert(text)
    }
}

impl From<String> for Message {
    fn from(text: String) -> Self {
        Message::alert(text)
    }
}

#[derive(Serialize)]
struct Aps<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    alert: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    badge: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    sound: Option<&'a str>,
    #[serde(rename = "content-available", skip_serializing_if = "Option::is_none")]
    content_available: Option<u8>,
}

#[derive(Serialize)]
struct Payload<'a> {
    aps: Aps<'a>,
    #[serde(flatten)]
    custom: &'a Map<String, Value>,
}

fn encode_payload(message: &Message, alert: Option<&str>) -> ApnsResult<Vec<u8>> {
    let payload = Payload {
        aps: Aps {
            alert,
            badge: message.badge,
            sound: message.sound.as_deref(),
            content_available: message.content_available.then_some(1),
        },
        custom: &message.custom,
    };

    Ok(serde_json::to_vec(&payload)?)
}

fn truncate_on_char_boundary(text: &str, max_len: usize) -> &str {
    let mut end = max_len.min(text.len());
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

/// Serialize the payload, shortening the alert until it fits
fn fitted_payload(message: &Message) -> ApnsResult<Vec<u8>> {
    let mut payload = encode_payload(message, message.alert.as_deref())?;
    let Some(alert) = message.alert.as_deref() else {
        return Ok(payload);
    };

    let mut alert_len = alert.len();
    while payload.len() > MAX_PAYLOAD_LEN && alert_len > 0 {
        let overflow = payload.len() - MAX_PAYLOAD_LEN;
        let trimmed = truncate_on_char_boundary(alert, alert_len.saturating_sub(overflow));
        alert_len = trimmed.len();
        payload = encode_payload(message, Some(trimmed))?;
    }

    if payload.len() > MAX_PAYLOAD_LEN {
        warn!(
            payload_len = payload.len(),
            max = MAX_PAYLOAD_LEN,
            "Payload exceeds the gateway limit even without alert text"
        );
    }

    Ok(payload)
}

/// Parse a device token in hex, ignoring whitespace and `<`, `>`, `|`
pub fn parse_device_token(token: &str) -> ApnsResult<[u8; DEVICE_TOKEN_LEN]> {
    let compact: String = token
        .chars()
        .filter(|c| !c.is_whitespace() && !matches!(c, '<' | '>' | '|'))
        .collect();

    let bytes = hex::decode(&compact)
        .map_err(|e| ApnsError::InvalidDeviceToken(format!("{token:?} is not hex: {e}")))?;

    bytes.try_into().map_err(|bytes: Vec<u8>| {
        ApnsError::InvalidDeviceToken(format!(
            "expected {DEVICE_TOKEN_LEN} bytes, got {}",
            bytes.len()
        ))
    })
}

/// A framed notification for one device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    device_token: [u8; DEVICE_TOKEN_LEN],
    payload: Vec<u8>,
}

impl Notification {
    pub fn new(device_token: &str, message: impl Into<Message>) -> ApnsResult<Self> {
        let device_token = parse_device_token(device_token)?;
        let payload = fitted_payload(&message.into())?;
        u16::try_from(payload.len()).map_err(|_| ApnsError::PayloadTooLarge(payload.len()))?;

        Ok(Self {
            device_token,
            payload,
        })
    }

    pub fn device_token(&self) -> String {
        hex::encode(self.device_token)
    }

    /// JSON payload as sent
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }
}

impl PackagedNotification for Notification {
    fn packaged_bytes(&self) -> Vec<u8> {
        let mut frame = Vec::with_capacity(1 + 2 + DEVICE_TOKEN_LEN + 2 + self.payload.len());
        frame.push(SIMPLE_FRAME_COMMAND);
        frame.extend_from_slice(&(DEVICE_TOKEN_LEN as u16).to_be_bytes());
        frame.extend_from_slice(&self.device_token);
        // Length fits in u16, checked in `new`
        frame.extend_from_slice(&(self.payload.len() as u16).to_be_bytes());
        frame.extend_from_slice(&self.payload);
        frame
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const TOKEN: &str = "<740f4707 bebcf74f 9b7c25d4 8e335894 5f6aa01d a5ddb387 462c7eaf 61bb78ad>";

    #[test]
    fn test_parse_device_token() {
        let token = parse_device_token(TOKEN).unwrap();

        assert_eq!(token[0], 0x74);
        assert_eq!(token[31], 0xad);
    }

    #[test]
    fn test_parse_device_token_rejects_bad_input() {
        assert!(matches!(
            parse_device_token("zz"),
            Err(ApnsError::InvalidDeviceToken(_))
        ));
        assert!(matches!(
            parse_device_token("abcd"),
            Err(ApnsError::InvalidDeviceToken(_))
        ));
    }

    #[test]
    fn test_simple_frame_layout() {
        let notification = Notification::new(TOKEN, "Hello").unwrap();
        let frame = notification.packaged_bytes();
        let payload = notification.payload();

        assert_eq!(frame[0], 0);
        assert_eq!(&frame[1..3], &[0, 32]);
        assert_eq!(&frame[3..35], &parse_device_token(TOKEN).unwrap());
        assert_eq!(
            u16::from_be_bytes([frame[35], frame[36]]) as usize,
            payload.len()
        );
        assert_eq!(&frame[37..], payload);
        assert_eq!(notification.device_token().len(), 64);
    }

    #[test]
    fn test_payload_contents() {
        let message = Message::alert("Hello")
            .with_badge(3)
            .with_sound("default")
            .with_content_available()
            .with_custom("thread", "abc");
        let notification = Notification::new(TOKEN, message).unwrap();

        let payload: Value = serde_json::from_slice(notification.payload()).unwrap();
        assert_eq!(
            payload,
            json!({
                "aps": {"alert": "Hello", "badge": 3, "sound": "default", "content-available": 1},
                "thread": "abc"
            })
        );
    }

    #[test]
    fn test_long_alert_is_truncated() {
        let notification = Notification::new(TOKEN, "é".repeat(400)).unwrap();

        assert!(notification.payload().len() <= MAX_PAYLOAD_LEN);
        let payload: Value = serde_json::from_slice(notification.payload()).unwrap();
        let alert = payload["aps"]["alert"].as_str().unwrap();
        assert!(!alert.is_empty());
        assert!(alert.chars().all(|c| c == 'é'));
    }

    #[test]
    fn test_short_payload_untouched() {
        let notification = Notification::new(TOKEN, Message::alert("Hi").with_badge(1)).unwrap();
        assert_eq!(
            notification.payload(),
            br#"{"aps":{"alert":"Hi","badge":1}}"#
        );
    }

    #[test]
    fn test_oversized_custom_payload_keeps_exact_length() {
        let message = Message::alert("hi").with_custom("blob", "x".repeat(1_000));
        let notification = Notification::new(TOKEN, message).unwrap();
        let frame = notification.packaged_bytes();

        assert!(notification.payload().len() > MAX_PAYLOAD_LEN);
        assert_eq!(
            u16::from_be_bytes([frame[35], frame[36]]) as usize,
            notification.payload().len()
        );
    }

    #[test]
    fn test_payload_beyond_length_field_is_rejected() {
        let message = Message::alert("hi").with_custom("blob", "x".repeat(70_000));

        let err = Notification::new(TOKEN, message).unwrap_err();
        assert!(matches!(err, ApnsError::PayloadTooLarge(len) if len > usize::from(u16::MAX)));
    }

    #[test]
    fn test_raw_frames_pass_through() {
        let raw = vec![1u8, 2, 3];
        assert_eq!(raw.packaged_bytes(), vec![1, 2, 3]);
        assert_eq!((&raw).packaged_bytes(), vec![1, 2, 3]);
        assert_eq!(raw.as_slice().packaged_bytes(), vec![1, 2, 3]);
    }
}
