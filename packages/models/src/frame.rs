//! Fixed-layout binary frames received over the realtime channel.
//!
//! Every binary frame starts with a big-endian `u32` tag selecting the layout
//! of the remaining bytes:
//!
//! | Tag | Fields |
//! |---|---|
//! | 1 | `u32` image subtype @4, image bytes @8.. |
//! | 3 | `u32` node id length `L` @4, UTF-8 node id @8..8+L, UTF-8 text @8+L.. |
//! | 4 | `u32` metadata length `M` @4, UTF-8 JSON metadata @8..8+M, image bytes @8+M.. |
//!
//! Any other tag is invalid. Image payloads are kept as [`Bytes`] slices into
//! the original frame, so decoding never copies pixel data.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::NodeId;

/// Preview image frame: `u32` image subtype, then raw image bytes.
pub const TAG_PREVIEW_IMAGE: u32 = 1;
/// Progress text frame: length-prefixed node id, then free text.
pub const TAG_PROGRESS_TEXT: u32 = 3;
/// Preview image frame with a JSON metadata prefix.
pub const TAG_PREVIEW_IMAGE_WITH_METADATA: u32 = 4;

const TAG_LEN: usize = 4;
const HEADER_LEN: usize = 8;

/// Image encoding declared by a preview frame's subtype field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreviewImageFormat {
    Jpeg,
    Png,
}

impl PreviewImageFormat {
    /// Maps the wire subtype code to a format. `2` is PNG; `1` and every
    /// unassigned code fall back to JPEG.
    #[must_use]
    pub const fn from_subtype(code: u32) -> Self {
        if code == 2 { Self::Png } else { Self::Jpeg }
    }

    #[must_use]
    pub const fn mime(self) -> &'static str {
        match self {
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
        }
    }
}

/// A typed binary blob, analogous to a browser `Blob`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreviewBlob {
    /// MIME type of `bytes`
    pub mime: String,
    /// Raw image bytes
    pub bytes: Bytes,
}

/// Per-node progress text decoded from a tag-3 frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressText {
    pub node_id: String,
    pub text: String,
}

/// JSON metadata prefix carried by a tag-4 frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreviewMetadata {
    pub node_id: NodeId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_node_id: Option<NodeId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_node_id: Option<NodeId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub real_node_id: Option<NodeId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_id: Option<String>,
    /// MIME type of the image bytes following the metadata
    pub image_type: String,
}

/// Preview image plus the node/prompt identifiers from its metadata prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreviewWithMetadata {
    pub blob: PreviewBlob,
    pub node_id: NodeId,
    pub display_node_id: Option<NodeId>,
    pub parent_node_id: Option<NodeId>,
    pub real_node_id: Option<NodeId>,
    pub prompt_id: Option<String>,
}

/// One successfully decoded binary frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedFrame {
    Preview(PreviewBlob),
    ProgressText(ProgressText),
    PreviewWithMetadata(PreviewWithMetadata),
}

/// Error returned when a binary frame fails to decode.
#[derive(Debug, Error)]
pub enum FrameDecodeError {
    #[error("Frame too short: {len} bytes")]
    TooShort { len: usize },
    #[error("Unknown binary message type {tag}")]
    UnknownTag { tag: u32 },
    #[error("Declared field length {len} exceeds the {available} payload bytes")]
    LengthOutOfBounds { len: usize, available: usize },
    #[error(transparent)]
    Utf8(#[from] std::str::Utf8Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_be_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}

fn read_len(bytes: &[u8], offset: usize) -> usize {
    usize::try_from(read_u32(bytes, offset)).unwrap_or(usize::MAX)
}

/// Decodes one binary frame.
///
/// # Errors
///
/// * If the frame is shorter than its fixed header
/// * If the tag is not one of the known frame types
/// * If a declared field length runs past the end of the frame
/// * If a text field is not valid UTF-8
/// * If tag-4 metadata is not valid JSON of the expected shape
pub fn decode(bytes: &Bytes) -> Result<DecodedFrame, FrameDecodeError> {
    if bytes.len() < TAG_LEN {
        return Err(FrameDecodeError::TooShort { len: bytes.len() });
    }

    let tag = read_u32(bytes, 0);

    match tag {
        TAG_PREVIEW_IMAGE => {
            if bytes.len() < HEADER_LEN {
                return Err(FrameDecodeError::TooShort { len: bytes.len() });
            }
            let format = PreviewImageFormat::from_subtype(read_u32(bytes, TAG_LEN));
            Ok(DecodedFrame::Preview(PreviewBlob {
                mime: format.mime().to_string(),
                bytes: bytes.slice(HEADER_LEN..),
            }))
        }
        TAG_PROGRESS_TEXT => {
            if bytes.len() < HEADER_LEN {
                return Err(FrameDecodeError::TooShort { len: bytes.len() });
            }
            let node_id_len = read_len(bytes, TAG_LEN);
            let available = bytes.len() - HEADER_LEN;
            if node_id_len > available {
                return Err(FrameDecodeError::LengthOutOfBounds {
                    len: node_id_len,
                    available,
                });
            }
            let node_id = std::str::from_utf8(&bytes[HEADER_LEN..HEADER_LEN + node_id_len])?;
            let text = std::str::from_utf8(&bytes[HEADER_LEN + node_id_len..])?;
            Ok(DecodedFrame::ProgressText(ProgressText {
                node_id: node_id.to_string(),
                text: text.to_string(),
            }))
        }
        TAG_PREVIEW_IMAGE_WITH_METADATA => {
            if bytes.len() < HEADER_LEN {
                return Err(FrameDecodeError::TooShort { len: bytes.len() });
            }
            let metadata_len = read_len(bytes, TAG_LEN);
            let available = bytes.len() - HEADER_LEN;
            if metadata_len > available {
                return Err(FrameDecodeError::LengthOutOfBounds {
                    len: metadata_len,
                    available,
                });
            }
            let metadata: PreviewMetadata =
                serde_json::from_slice(&bytes[HEADER_LEN..HEADER_LEN + metadata_len])?;
            let blob = PreviewBlob {
                mime: metadata.image_type,
                bytes: bytes.slice(HEADER_LEN + metadata_len..),
            };
            Ok(DecodedFrame::PreviewWithMetadata(PreviewWithMetadata {
                blob,
                node_id: metadata.node_id,
                display_node_id: metadata.display_node_id,
                parent_node_id: metadata.parent_node_id,
                real_node_id: metadata.real_node_id,
                prompt_id: metadata.prompt_id,
            }))
        }
        tag => Err(FrameDecodeError::UnknownTag { tag }),
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn frame(tag: u32, field: u32, rest: &[u8]) -> Bytes {
        let mut data = Vec::with_capacity(8 + rest.len());
        data.extend_from_slice(&tag.to_be_bytes());
        data.extend_from_slice(&field.to_be_bytes());
        data.extend_from_slice(rest);
        Bytes::from(data)
    }

    #[test_log::test]
    fn preview_subtype_two_decodes_as_png() {
        let decoded = decode(&frame(TAG_PREVIEW_IMAGE, 2, &[0xAA, 0xBB])).unwrap();

        assert_eq!(
            decoded,
            DecodedFrame::Preview(PreviewBlob {
                mime: "image/png".to_string(),
                bytes: Bytes::from_static(&[0xAA, 0xBB]),
            })
        );
    }

    #[test_log::test]
    fn preview_subtype_one_and_unassigned_codes_decode_as_jpeg() {
        for subtype in [1, 0, 3, 99] {
            let DecodedFrame::Preview(blob) =
                decode(&frame(TAG_PREVIEW_IMAGE, subtype, &[0x01])).unwrap()
            else {
                panic!("expected preview frame");
            };
            assert_eq!(blob.mime, "image/jpeg");
        }
    }

    #[test_log::test]
    fn preview_with_no_image_bytes_decodes_to_an_empty_blob() {
        let DecodedFrame::Preview(blob) = decode(&frame(TAG_PREVIEW_IMAGE, 2, &[])).unwrap() else {
            panic!("expected preview frame");
        };
        assert!(blob.bytes.is_empty());
    }

    #[test_log::test]
    fn progress_text_splits_node_id_and_text_at_the_declared_length() {
        let mut rest = Vec::new();
        rest.extend_from_slice(b"node-7");
        rest.extend_from_slice(b"compiling shaders");

        let decoded = decode(&frame(TAG_PROGRESS_TEXT, 6, &rest)).unwrap();

        assert_eq!(
            decoded,
            DecodedFrame::ProgressText(ProgressText {
                node_id: "node-7".to_string(),
                text: "compiling shaders".to_string(),
            })
        );
    }

    #[test_log::test]
    fn progress_text_with_zero_length_node_id_keeps_all_bytes_as_text() {
        let decoded = decode(&frame(TAG_PROGRESS_TEXT, 0, b"all text")).unwrap();

        assert_eq!(
            decoded,
            DecodedFrame::ProgressText(ProgressText {
                node_id: String::new(),
                text: "all text".to_string(),
            })
        );
    }

    #[test_log::test]
    fn progress_text_rejects_a_length_past_the_end_of_the_frame() {
        let err = decode(&frame(TAG_PROGRESS_TEXT, 10, b"abc")).unwrap_err();

        assert!(matches!(
            err,
            FrameDecodeError::LengthOutOfBounds {
                len: 10,
                available: 3,
            }
        ));
    }

    #[test_log::test]
    fn progress_text_rejects_invalid_utf8() {
        let err = decode(&frame(TAG_PROGRESS_TEXT, 2, &[0xFF, 0xFE, b'o', b'k'])).unwrap_err();

        assert!(matches!(err, FrameDecodeError::Utf8(_)));
    }

    #[test_log::test]
    fn preview_with_metadata_extracts_ids_and_mime_from_the_prefix() {
        let metadata = serde_json::json!({
            "node_id": "10",
            "display_node_id": "12",
            "parent_node_id": 3,
            "real_node_id": "10",
            "prompt_id": "prompt-1",
            "image_type": "image/webp",
        })
        .to_string();
        let mut rest = metadata.clone().into_bytes();
        rest.extend_from_slice(&[0xDE, 0xAD]);

        let decoded = decode(&frame(
            TAG_PREVIEW_IMAGE_WITH_METADATA,
            u32::try_from(metadata.len()).unwrap(),
            &rest,
        ))
        .unwrap();

        assert_eq!(
            decoded,
            DecodedFrame::PreviewWithMetadata(PreviewWithMetadata {
                blob: PreviewBlob {
                    mime: "image/webp".to_string(),
                    bytes: Bytes::from_static(&[0xDE, 0xAD]),
                },
                node_id: NodeId::String("10".into()),
                display_node_id: Some(NodeId::String("12".into())),
                parent_node_id: Some(NodeId::Number(3)),
                real_node_id: Some(NodeId::String("10".into())),
                prompt_id: Some("prompt-1".to_string()),
            })
        );
    }

    #[test_log::test]
    fn preview_with_metadata_rejects_malformed_metadata() {
        let err = decode(&frame(TAG_PREVIEW_IMAGE_WITH_METADATA, 4, b"{oops")).unwrap_err();

        assert!(matches!(err, FrameDecodeError::Json(_)));
    }

    #[test_log::test]
    fn unknown_tags_are_rejected() {
        let err = decode(&frame(2, 0, &[])).unwrap_err();

        assert!(matches!(err, FrameDecodeError::UnknownTag { tag: 2 }));
    }

    #[test_log::test]
    fn frames_shorter_than_the_header_are_rejected() {
        assert!(matches!(
            decode(&Bytes::from_static(&[0, 0])).unwrap_err(),
            FrameDecodeError::TooShort { len: 2 }
        ));
        assert!(matches!(
            decode(&Bytes::from_static(&[0, 0, 0, 1, 0])).unwrap_err(),
            FrameDecodeError::TooShort { len: 5 }
        ));
    }
}
