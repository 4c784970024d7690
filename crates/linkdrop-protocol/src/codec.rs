//! Codec for encoding and decoding delivery frames.
//!
//! Frames are plain JSON text, one frame per WebSocket message.

use thiserror::Error;

use crate::frames::ServerFrame;

/// Maximum encoded frame size (1 MiB).
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame exceeds maximum size.
    #[error("Frame size {0} exceeds maximum {MAX_FRAME_SIZE}")]
    FrameTooLarge(usize),

    /// JSON encoding or decoding error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Encode a frame to its JSON text form.
///
/// # Errors
///
/// Returns an error if the frame is too large or serialization fails.
pub fn encode(frame: &ServerFrame) -> Result<String, ProtocolError> {
    let text = serde_json::to_string(frame)?;

    if text.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(text.len()));
    }

    Ok(text)
}

/// Decode a frame from JSON text.
///
/// # Errors
///
/// Returns an error if the text is too large or is not a known frame shape.
pub fn decode(text: &str) -> Result<ServerFrame, ProtocolError> {
    if text.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(text.len()));
    }

    Ok(serde_json::from_str(text)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frames::Link;
    use chrono::Utc;

    #[test]
    fn test_encode_connected() {
        let text = encode(&ServerFrame::connected()).unwrap();
        assert_eq!(text, r#"{"message":"Connected"}"#);
    }

    #[test]
    fn test_decode_distinguishes_shapes() {
        assert!(decode(r#"{"message":"Connected"}"#).unwrap().is_connected());
        assert_eq!(
            decode(r#"{"error":"Device already connected"}"#).unwrap(),
            ServerFrame::error("Device already connected")
        );

        let link = Link {
            id: 3,
            user_id: 1,
            from_device_id: 1,
            to_device_id: 2,
            url: "https://example.com/a?b=c".to_string(),
            created_at: Utc::now(),
        };
        let text = encode(&ServerFrame::link(link.clone())).unwrap();
        assert_eq!(decode(&text).unwrap(), ServerFrame::Link(link));
    }

    #[test]
    fn test_decode_garbage() {
        assert!(matches!(decode("not json"), Err(ProtocolError::Json(_))));
        assert!(matches!(decode(r#"{"other":1}"#), Err(ProtocolError::Json(_))));
    }

    #[test]
    fn test_frame_too_large() {
        let frame = ServerFrame::error("x".repeat(MAX_FRAME_SIZE));
        match encode(&frame) {
            Err(ProtocolError::FrameTooLarge(_)) => {}
            other => panic!("Expected FrameTooLarge error, got {:?}", other),
        }
    }
}
