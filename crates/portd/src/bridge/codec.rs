//! Framed text codec for stream transports.
//!
//! Uses LengthDelimitedCodec for framing; each frame is one UTF-8 text record
//! (one JSON value). Works over any AsyncRead/AsyncWrite (sockets, pipes).

use std::io;
use std::string::FromUtf8Error;

use tokio_util::bytes::{Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder, LengthDelimitedCodec};

/// Codec that frames text records with a 4-byte length prefix.
///
/// Decoding does not parse JSON: a malformed record still arrives as a frame
/// so the dispatcher can answer it instead of losing the stream. A frame that
/// is not UTF-8 is yielded as an item-level error; the stream keeps going.
pub struct FrameCodec {
    inner: LengthDelimitedCodec,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameCodec {
    pub fn new() -> Self {
        Self {
            inner: LengthDelimitedCodec::builder()
                .length_field_length(4)
                .new_codec(),
        }
    }
}

impl Decoder for FrameCodec {
    type Item = Result<String, FromUtf8Error>;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        Ok(self
            .inner
            .decode(src)?
            .map(|bytes| String::from_utf8(bytes.to_vec())))
    }
}

impl Encoder<String> for FrameCodec {
    type Error = io::Error;

    fn encode(&mut self, item: String, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let len = item.len();
        tracing::trace!(frame_size_bytes = len, "Encoding frame");
        if len > 100_000 {
            tracing::info!(
                frame_size_bytes = len,
                frame_size_kb = len / 1024,
                "Large frame being encoded"
            );
        }
        self.inner.encode(Bytes::from(item), dst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_waits_for_complete_frame() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::new();
        codec
            .encode(r#"{"name":"read"}"#.to_string(), &mut buf)
            .unwrap();

        let mut partial = buf.split_to(6);
        assert!(codec.decode(&mut partial).unwrap().is_none());

        partial.unsplit(buf);
        let frame = codec.decode(&mut partial).unwrap().unwrap().unwrap();
        assert_eq!(frame, r#"{"name":"read"}"#);
    }

    #[test]
    fn malformed_json_still_decodes_as_frame() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::new();
        codec.encode("{not json".to_string(), &mut buf).unwrap();

        assert_eq!(codec.decode(&mut buf).unwrap().unwrap().unwrap(), "{not json");
    }

    #[test]
    fn invalid_utf8_frame_does_not_poison_the_buffer() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::new();
        codec
            .inner
            .encode(Bytes::from_static(&[0xff, 0xfe]), &mut buf)
            .unwrap();
        codec.encode("next".to_string(), &mut buf).unwrap();

        assert!(codec.decode(&mut buf).unwrap().unwrap().is_err());
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap().unwrap(), "next");
    }
}
