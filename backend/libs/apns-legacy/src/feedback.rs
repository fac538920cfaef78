//! Feedback service records
//!
//! The feedback service streams fixed 38-byte records and closes the
//! connection when it has nothing more to report:
//!
//! ```text
//! | timestamp: u32 BE | token length: u16 BE | device token: 32 bytes |
//! ```

use std::io;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt};

pub const FEEDBACK_RECORD_LEN: usize = 38;
pub const DEVICE_TOKEN_LEN: usize = 32;

/// A device token the feedback service reports as no longer valid
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedbackRecord {
    /// When the service determined the app was gone from the device
    pub timestamp: DateTime<Utc>,
    /// 64-character lowercase hex
    pub device_token: String,
}

impl FeedbackRecord {
    pub fn decode(record: &[u8; FEEDBACK_RECORD_LEN]) -> Self {
        let seconds = u32::from_be_bytes([record[0], record[1], record[2], record[3]]);
        // Bytes 4..6 carry the token length; the token field is always 32 bytes wide
        let token = &record[6..];

        Self {
            timestamp: DateTime::from_timestamp(i64::from(seconds), 0)
                .unwrap_or(DateTime::UNIX_EPOCH),
            device_token: hex::encode(token),
        }
    }
}

/// Read records until the stream ends
///
/// A trailing partial record is dropped silently. Errors other than
/// end-of-stream are returned.
pub async fn read_records<R>(reader: &mut R) -> io::Result<Vec<FeedbackRecord>>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut records = Vec::new();
    let mut buf = [0u8; FEEDBACK_RECORD_LEN];

    loop {
        match reader.read_exact(&mut buf).await {
            Ok(_) => records.push(FeedbackRecord::decode(&buf)),
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e),
        }
    }

    Ok(records)
}
