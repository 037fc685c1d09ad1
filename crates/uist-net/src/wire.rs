//! Wire envelope and stream framing.
//!
//! Every message on the wire is a fixed header followed by its payload:
//!
//! ```text
//! +----------------+------------------+------------------+------------------+
//! | message id u16 | content type u8  | content len u16  | payload          |
//! | little-endian  |                  | little-endian    | (content len)    |
//! +----------------+------------------+------------------+------------------+
//! ```
//!
//! The header is always [`HEADER_LEN`] bytes. A payload never exceeds
//! [`MAX_MESSAGE_LENGTH`] bytes, and for every known content type its length
//! must equal [`ContentType::payload_size`].

use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::messages::{ContentType, MessageId};

/// Encoded header size in bytes.
pub const HEADER_LEN: usize = 5;

/// Largest payload a message may carry.
pub const MAX_MESSAGE_LENGTH: u16 = 512;

/// Errors that can occur while encoding, decoding or transferring messages.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    /// The declared payload size exceeds [`MAX_MESSAGE_LENGTH`].
    #[error("payload size {size} exceeds maximum {max}")]
    PayloadTooLarge {
        /// The declared payload size.
        size: u16,
        /// The protocol maximum.
        max: u16,
    },

    /// The payload length does not match the size registered for its type.
    #[error("{content_type} expects {expected} bytes, got {actual}")]
    LengthMismatch {
        /// Content type named in the header.
        content_type: ContentType,
        /// Size registered for the content type.
        expected: u16,
        /// Length actually declared or supplied.
        actual: usize,
    },

    /// A header buffer shorter than [`HEADER_LEN`].
    #[error("header needs {HEADER_LEN} bytes, got {0}")]
    TruncatedHeader(usize),

    /// Payload encoding or decoding failed.
    #[error("payload codec error: {0}")]
    Payload(#[from] postcard::Error),

    /// The peer closed the connection before a complete message arrived.
    #[error("connection closed")]
    ConnectionClosed,

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl WireError {
    /// Whether the stream can no longer be used after this error.
    ///
    /// Non-fatal errors concern a single message, which has already been
    /// consumed from the stream and can simply be dropped.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::ConnectionClosed | Self::Io(_))
    }
}

// ---------------------------------------------------------------------------
// Header
// ---------------------------------------------------------------------------

/// Fixed-size message header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MessageHeader {
    /// Entity the message belongs to, or a reserved id.
    pub message_id: MessageId,
    /// Payload layout.
    pub content_type: ContentType,
    /// Payload length in bytes.
    pub content_length: u16,
}

impl MessageHeader {
    /// Encode into the fixed little-endian layout.
    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let id = self.message_id.0.to_le_bytes();
        let len = self.content_length.to_le_bytes();
        [id[0], id[1], self.content_type.0, len[0], len[1]]
    }

    /// Decode from the first [`HEADER_LEN`] bytes of `bytes`.
    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        let Some(bytes) = bytes.get(..HEADER_LEN) else {
            return Err(WireError::TruncatedHeader(bytes.len()));
        };
        Ok(Self {
            message_id: MessageId(u16::from_le_bytes([bytes[0], bytes[1]])),
            content_type: ContentType(bytes[2]),
            content_length: u16::from_le_bytes([bytes[3], bytes[4]]),
        })
    }

    /// Check the declared length against the protocol limits.
    pub fn validate(&self) -> Result<(), WireError> {
        if self.content_length > MAX_MESSAGE_LENGTH {
            return Err(WireError::PayloadTooLarge {
                size: self.content_length,
                max: MAX_MESSAGE_LENGTH,
            });
        }
        match self.content_type.payload_size() {
            Some(expected) if expected != self.content_length => Err(WireError::LengthMismatch {
                content_type: self.content_type,
                expected,
                actual: usize::from(self.content_length),
            }),
            _ => Ok(()),
        }
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// A complete message: header plus payload.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WireMessage {
    pub header: MessageHeader,
    pub payload: Vec<u8>,
}

impl WireMessage {
    /// Build a message, filling in the content length from the payload.
    pub fn new(
        message_id: MessageId,
        content_type: ContentType,
        payload: Vec<u8>,
    ) -> Result<Self, WireError> {
        if payload.len() > usize::from(MAX_MESSAGE_LENGTH) {
            return Err(WireError::PayloadTooLarge {
                size: u16::try_from(payload.len()).unwrap_or(u16::MAX),
                max: MAX_MESSAGE_LENGTH,
            });
        }
        Ok(Self {
            header: MessageHeader {
                message_id,
                content_type,
                content_length: payload.len() as u16,
            },
            payload,
        })
    }

    pub fn message_id(&self) -> MessageId {
        self.header.message_id
    }

    pub fn content_type(&self) -> ContentType {
        self.header.content_type
    }

    /// Encode header and payload into one contiguous buffer.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN + self.payload.len());
        out.extend_from_slice(&self.header.encode());
        out.extend_from_slice(&self.payload);
        out
    }
}

// ---------------------------------------------------------------------------
// Stream I/O
// ---------------------------------------------------------------------------

fn map_eof(e: std::io::Error) -> WireError {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        WireError::ConnectionClosed
    } else {
        WireError::Io(e)
    }
}

/// Read a single message from the stream.
///
/// Reads the header, then exactly the declared number of body bytes, so the
/// stream stays aligned on the next header even when the message turns out
/// to be invalid. Invalid messages produce a non-fatal error; see
/// [`WireError::is_fatal`].
pub async fn read_message<R: AsyncReadExt + Unpin>(
    reader: &mut R,
) -> Result<WireMessage, WireError> {
    let mut header_buf = [0u8; HEADER_LEN];
    reader.read_exact(&mut header_buf).await.map_err(map_eof)?;
    let header = MessageHeader::decode(&header_buf)?;

    let mut payload = vec![0u8; usize::from(header.content_length)];
    if !payload.is_empty() {
        reader.read_exact(&mut payload).await.map_err(map_eof)?;
    }

    header.validate()?;
    Ok(WireMessage { header, payload })
}

/// Write a single message to the stream.
pub async fn write_message<W: AsyncWriteExt + Unpin>(
    writer: &mut W,
    message: &WireMessage,
) -> Result<(), WireError> {
    if usize::from(message.header.content_length) != message.payload.len() {
        return Err(WireError::LengthMismatch {
            content_type: message.header.content_type,
            expected: message.header.content_length,
            actual: message.payload.len(),
        });
    }
    message.header.validate()?;

    writer.write_all(&message.encode()).await?;
    writer.flush().await?;
    Ok(())
}
