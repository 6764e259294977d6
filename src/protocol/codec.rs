use bytes::{BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::protocol::message::{parse_length, ProtocolError, Request, Response, RESULT};
use crate::protocol::{MAX_FRAME_LEN, MAX_RESULT_LEN};

const RESULT_PREFIX: &[u8] = b"result:";

/// Server-side codec: decodes [`Request`]s and encodes [`Response`]s.
#[derive(Debug, Default, Clone, Copy)]
pub struct RequestCodec;

/// Client-side codec: encodes [`Request`]s and decodes [`Response`]s.
#[derive(Debug, Default, Clone, Copy)]
pub struct ResponseCodec;

impl Decoder for RequestCodec {
    type Item = Request;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Request>, ProtocolError> {
        if src.starts_with(RESULT_PREFIX) {
            return decode_result(src);
        }
        if src.len() > MAX_FRAME_LEN {
            return Err(ProtocolError::FrameTooLarge { max: MAX_FRAME_LEN });
        }
        Ok(None)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Request>, ProtocolError> {
        if let Some(request) = self.decode(src)? {
            return Ok(Some(request));
        }
        if src.is_empty() {
            return Ok(None);
        }

        let frame = src.split();
        let text = std::str::from_utf8(&frame).map_err(|_| ProtocolError::InvalidUtf8)?;
        // A result frame that reaches EOF here never delivered its full payload.
        Request::parse(text.trim()).map(Some)
    }
}

/// Decode a `result:<id>:<length>:<payload>` frame once `length` payload bytes
/// have been buffered.
fn decode_result(src: &mut BytesMut) -> Result<Option<Request>, ProtocolError> {
    let header = &src[RESULT_PREFIX.len()..];
    let Some(id_end) = header.iter().position(|b| *b == b':') else {
        return header_incomplete(src);
    };
    let Some(len_end) = header[id_end + 1..].iter().position(|b| *b == b':') else {
        return header_incomplete(src);
    };

    let length_bytes = &header[id_end + 1..id_end + 1 + len_end];
    let length_text = std::str::from_utf8(length_bytes).map_err(|_| ProtocolError::InvalidUtf8)?;
    let length = parse_length(length_text)?;
    if length > MAX_RESULT_LEN {
        return Err(ProtocolError::FrameTooLarge {
            max: MAX_RESULT_LEN,
        });
    }

    let payload_start = RESULT_PREFIX.len() + id_end + 1 + len_end + 1;
    let frame_len = payload_start
        .checked_add(length)
        .ok_or(ProtocolError::FrameTooLarge {
            max: MAX_RESULT_LEN,
        })?;
    if src.len() < frame_len {
        src.reserve(frame_len - src.len());
        return Ok(None);
    }

    let frame = src.split_to(frame_len);
    let text = std::str::from_utf8(&frame).map_err(|_| ProtocolError::InvalidUtf8)?;
    Request::parse(text).map(Some)
}

fn header_incomplete(src: &BytesMut) -> Result<Option<Request>, ProtocolError> {
    if src.len() > MAX_FRAME_LEN {
        return Err(ProtocolError::Malformed {
            command: RESULT,
            reason: "header exceeds frame limit".to_string(),
        });
    }
    Ok(None)
}

impl Encoder<Response> for RequestCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: Response, dst: &mut BytesMut) -> Result<(), ProtocolError> {
        dst.put_slice(item.as_str().as_bytes());
        Ok(())
    }
}

impl Decoder for ResponseCodec {
    type Item = Response;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Response>, ProtocolError> {
        if src.len() > MAX_FRAME_LEN {
            return Err(ProtocolError::FrameTooLarge { max: MAX_FRAME_LEN });
        }
        Ok(None)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Response>, ProtocolError> {
        self.decode(src)?;
        if src.is_empty() {
            return Ok(None);
        }
        let frame = src.split();
        let text = std::str::from_utf8(&frame).map_err(|_| ProtocolError::InvalidUtf8)?;
        Ok(Some(Response::parse(text.trim())))
    }
}

impl Encoder<Request> for ResponseCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: Request, dst: &mut BytesMut) -> Result<(), ProtocolError> {
        if let Request::Result { payload, .. } = &item {
            if payload.len() > MAX_RESULT_LEN {
                return Err(ProtocolError::FrameTooLarge {
                    max: MAX_RESULT_LEN,
                });
            }
        }
        let frame = item.to_string();
        if !matches!(item, Request::Result { .. }) && frame.len() > MAX_FRAME_LEN {
            return Err(ProtocolError::FrameTooLarge { max: MAX_FRAME_LEN });
        }
        dst.put_slice(frame.as_bytes());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_frames_wait_for_eof() {
        let mut codec = RequestCodec;
        let mut buf = BytesMut::from("dispatch:abc123");
        assert!(codec.decode(&mut buf).unwrap().is_none());
        assert_eq!(
            codec.decode_eof(&mut buf).unwrap(),
            Some(Request::Dispatch {
                commit_id: "abc123".to_string()
            })
        );
        assert!(buf.is_empty());
    }

    #[test]
    fn trailing_newline_is_ignored() {
        let mut codec = RequestCodec;
        let mut buf = BytesMut::from("ping\n");
        assert_eq!(codec.decode_eof(&mut buf).unwrap(), Some(Request::Ping));
    }

    #[test]
    fn result_frame_completes_without_eof() {
        let mut codec = RequestCodec;
        let mut buf = BytesMut::from("result:abc:5:he");
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(b"llo");
        assert_eq!(
            codec.decode(&mut buf).unwrap(),
            Some(Request::Result {
                commit_id: "abc".to_string(),
                payload: "hello".to_string(),
            })
        );
    }

    #[test]
    fn result_payload_may_exceed_frame_limit() {
        let payload = "x".repeat(MAX_FRAME_LEN * 4);
        let mut buf = BytesMut::from(format!("result:abc:{}:{}", payload.len(), payload).as_str());
        let mut codec = RequestCodec;
        match codec.decode(&mut buf).unwrap() {
            Some(Request::Result { payload: got, .. }) => assert_eq!(got, payload),
            other => panic!("unexpected frame: {:?}", other),
        }
    }

    #[test]
    fn truncated_result_fails_at_eof() {
        let mut codec = RequestCodec;
        let mut buf = BytesMut::from("result:abc:10:short");
        assert!(matches!(
            codec.decode_eof(&mut buf),
            Err(ProtocolError::Truncated { .. })
        ));
    }

    #[test]
    fn huge_declared_length_is_rejected_before_buffering() {
        let mut codec = RequestCodec;
        let mut buf = BytesMut::from("result:a:9223372036854775000:x");
        assert!(matches!(
            codec.decode(&mut buf),
            Err(ProtocolError::FrameTooLarge { max: MAX_RESULT_LEN })
        ));
        assert!(buf.capacity() < MAX_RESULT_LEN);
    }

    #[test]
    fn maximal_declared_length_does_not_overflow() {
        let mut codec = RequestCodec;
        let mut buf = BytesMut::from("result:a:18446744073709551615:x");
        assert!(matches!(
            codec.decode(&mut buf),
            Err(ProtocolError::FrameTooLarge { .. })
        ));
    }

    #[test]
    fn declared_length_at_the_limit_waits_for_payload() {
        let mut codec = RequestCodec;
        let mut buf = BytesMut::from(format!("result:a:{}:x", MAX_RESULT_LEN).as_str());
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn oversized_result_is_not_encoded() {
        let mut codec = ResponseCodec;
        let mut buf = BytesMut::new();
        let request = Request::Result {
            commit_id: "abc".to_string(),
            payload: "x".repeat(MAX_RESULT_LEN + 1),
        };
        assert!(matches!(
            codec.encode(request, &mut buf),
            Err(ProtocolError::FrameTooLarge { max: MAX_RESULT_LEN })
        ));
        assert!(buf.is_empty());
    }

    #[test]
    fn oversized_plain_frame_is_rejected() {
        let mut codec = RequestCodec;
        let mut buf = BytesMut::from("x".repeat(MAX_FRAME_LEN + 1).as_str());
        assert!(matches!(
            codec.decode(&mut buf),
            Err(ProtocolError::FrameTooLarge { .. })
        ));
    }

    #[test]
    fn response_decodes_at_eof() {
        let mut codec = ResponseCodec;
        let mut buf = BytesMut::from("BUSY");
        assert!(codec.decode(&mut buf).unwrap().is_none());
        assert_eq!(codec.decode_eof(&mut buf).unwrap(), Some(Response::Busy));
        assert_eq!(codec.decode_eof(&mut buf).unwrap(), None);
    }
}
