//! Pluggable message codecs for the post-handshake byte stream.
//!
//! Once a handshake completes, the transport delivers raw chunks that may
//! split or coalesce messages arbitrarily. A [`MessageCodec`] describes how
//! those bytes are cut into [`Payload`]s and how outbound payloads are
//! wrapped. The default [`LengthDelimitedMessageCodec`] prefixes every
//! message with a 4-byte big-endian length followed by a one-byte kind.

use std::io;

use bytes::{BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder, LengthDelimitedCodec};

use crate::{
    connection::Payload,
    error::{FramingError, PipelineError},
    http::HandshakeRequest,
};

/// Minimum frame length in bytes.
///
/// Frame lengths passed to codec constructors are clamped to at least this
/// value so a WELCOME envelope always fits.
pub const MIN_FRAME_LENGTH: usize = 64;

/// Maximum frame length in bytes (16 MiB).
pub const MAX_FRAME_LENGTH: usize = 16 * 1024 * 1024;

/// Length prefix header size (4 bytes for big-endian u32).
pub const LENGTH_HEADER_SIZE: usize = 4;

/// Kind byte marking a UTF-8 text message.
pub const KIND_TEXT: u8 = 0x01;
/// Kind byte marking an opaque binary message.
pub const KIND_BINARY: u8 = 0x02;

pub(crate) fn clamp_frame_length(value: usize) -> usize {
    value.clamp(MIN_FRAME_LENGTH, MAX_FRAME_LENGTH)
}

impl From<FramingError> for io::Error {
    fn from(error: FramingError) -> Self { io::Error::new(io::ErrorKind::InvalidData, error) }
}

/// Recover the typed framing error carried by a codec `io::Error`.
///
/// Errors that did not originate in the codec are treated as transport
/// failures.
#[must_use]
pub fn classify(error: io::Error) -> PipelineError {
    match error.downcast::<FramingError>() {
        Ok(framing) => PipelineError::Framing(framing),
        Err(other) => PipelineError::Transport(other),
    }
}

/// Trait for pluggable message codecs.
///
/// The decoder is instantiated once per connection so it may keep state;
/// the encoder is shared by every connection of a stage.
pub trait MessageCodec: Send + Clone + 'static {
    /// Decoder type for this codec.
    type Decoder: Decoder<Item = Payload, Error = io::Error> + Send;
    /// Encoder type for this codec.
    type Encoder: Encoder<Payload, Error = io::Error> + Send;

    /// Create a decoder for a new connection.
    fn decoder(&self) -> Self::Decoder;

    /// Create an encoder.
    fn encoder(&self) -> Self::Encoder;

    /// Raw bytes sent to the client once its handshake is accepted.
    ///
    /// Returns `None` when the codec needs no acknowledgement.
    fn handshake_response(&self, _request: &HandshakeRequest) -> Option<Bytes> { None }

    /// Maximum frame length this codec will accept.
    fn max_frame_length(&self) -> usize;
}

/// Default codec built on `tokio_util`'s `LengthDelimitedCodec`.
///
/// Each frame is `[len: u32 BE][kind: u8][body]` where `len` counts the kind
/// byte and body.
#[derive(Clone, Debug)]
pub struct LengthDelimitedMessageCodec {
    max_frame_length: usize,
}

impl LengthDelimitedMessageCodec {
    /// Construct a new codec with a maximum frame length.
    #[must_use]
    pub fn new(max_frame_length: usize) -> Self {
        Self {
            max_frame_length: clamp_frame_length(max_frame_length),
        }
    }

    fn new_inner_codec(&self) -> LengthDelimitedCodec {
        LengthDelimitedCodec::builder()
            .max_frame_length(self.max_frame_length)
            .new_codec()
    }
}

impl Default for LengthDelimitedMessageCodec {
    fn default() -> Self { Self::new(crate::config::DEFAULT_MAX_FRAME_LENGTH) }
}

#[doc(hidden)]
pub struct LengthDelimitedDecoder {
    inner: LengthDelimitedCodec,
    max_frame_length: usize,
    /// Set once the inner codec has consumed a header and awaits the body.
    in_frame: bool,
}

impl LengthDelimitedDecoder {
    fn announced_size(src: &BytesMut) -> Option<usize> {
        src.get(..LENGTH_HEADER_SIZE)
            .and_then(|slice| <[u8; LENGTH_HEADER_SIZE]>::try_from(slice).ok())
            .map(|bytes| u32::from_be_bytes(bytes) as usize)
    }
}

impl Decoder for LengthDelimitedDecoder {
    type Item = Payload;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        // Only a frame start carries a length prefix.
        let announced = if self.in_frame { None } else { Self::announced_size(src) };
        if let Some(size) = announced.filter(|&size| size > self.max_frame_length) {
            return Err(FramingError::OversizedFrame {
                size,
                max: self.max_frame_length,
            }
            .into());
        }
        let Some(mut frame) = self.inner.decode(src)? else {
            self.in_frame |= announced.is_some();
            return Ok(None);
        };
        self.in_frame = false;
        if frame.is_empty() {
            return Err(FramingError::EmptyFrame.into());
        }
        let kind = frame.split_to(1)[0];
        match kind {
            KIND_TEXT => String::from_utf8(frame.to_vec())
                .map(|text| Some(Payload::Text(text)))
                .map_err(|_| FramingError::InvalidUtf8.into()),
            KIND_BINARY => Ok(Some(Payload::Binary(frame.freeze()))),
            other => Err(FramingError::UnknownKind(other).into()),
        }
    }
}

#[doc(hidden)]
pub struct LengthDelimitedEncoder {
    inner: LengthDelimitedCodec,
    max_frame_length: usize,
}

impl Encoder<Payload> for LengthDelimitedEncoder {
    type Error = io::Error;

    fn encode(&mut self, item: Payload, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let size = item.len() + 1;
        if size > self.max_frame_length {
            return Err(FramingError::OversizedFrame {
                size,
                max: self.max_frame_length,
            }
            .into());
        }
        let kind = match item {
            Payload::Text(_) => KIND_TEXT,
            Payload::Binary(_) => KIND_BINARY,
        };
        let mut frame = BytesMut::with_capacity(size);
        frame.put_u8(kind);
        frame.put_slice(item.as_bytes());
        self.inner.encode(frame.freeze(), dst)
    }
}

impl MessageCodec for LengthDelimitedMessageCodec {
    type Decoder = LengthDelimitedDecoder;
    type Encoder = LengthDelimitedEncoder;

    fn decoder(&self) -> Self::Decoder {
        LengthDelimitedDecoder {
            inner: self.new_inner_codec(),
            max_frame_length: self.max_frame_length,
            in_frame: false,
        }
    }

    fn encoder(&self) -> Self::Encoder {
        LengthDelimitedEncoder {
            inner: self.new_inner_codec(),
            max_frame_length: self.max_frame_length,
        }
    }

    fn handshake_response(&self, _request: &HandshakeRequest) -> Option<Bytes> {
        Some(Bytes::from_static(
            b"HTTP/1.1 101 Switching Protocols\r\nUpgrade: topicwire\r\nConnection: Upgrade\r\n\r\n",
        ))
    }

    fn max_frame_length(&self) -> usize { self.max_frame_length }
}

#[cfg(test)]
mod tests {
    use rstest::{fixture, rstest};

    use super::*;

    #[fixture]
    fn codec() -> LengthDelimitedMessageCodec { LengthDelimitedMessageCodec::new(128) }

    fn encode(codec: &LengthDelimitedMessageCodec, payload: Payload) -> BytesMut {
        let mut buf = BytesMut::new();
        codec
            .encoder()
            .encode(payload, &mut buf)
            .expect("encode should succeed");
        buf
    }

    #[rstest]
    fn text_frame_layout(codec: LengthDelimitedMessageCodec) {
        let buf = encode(&codec, Payload::from("hi"));
        assert_eq!(&buf[..], &[0, 0, 0, 3, KIND_TEXT, b'h', b'i']);
    }

    #[rstest]
    fn decodes_coalesced_frames(codec: LengthDelimitedMessageCodec) {
        let mut buf = encode(&codec, Payload::from("one"));
        buf.extend_from_slice(&encode(&codec, Payload::Binary(Bytes::from_static(&[9, 9]))));
        let mut decoder = codec.decoder();
        assert_eq!(
            decoder.decode(&mut buf).expect("decode"),
            Some(Payload::from("one"))
        );
        assert_eq!(
            decoder.decode(&mut buf).expect("decode"),
            Some(Payload::Binary(Bytes::from_static(&[9, 9])))
        );
        assert_eq!(decoder.decode(&mut buf).expect("decode"), None);
    }

    #[rstest]
    fn waits_for_split_frame(codec: LengthDelimitedMessageCodec) {
        let full = encode(&codec, Payload::from("split"));
        let mut decoder = codec.decoder();
        let mut buf = BytesMut::from(&full[..5]);
        assert_eq!(decoder.decode(&mut buf).expect("decode"), None);
        buf.extend_from_slice(&full[5..]);
        assert_eq!(
            decoder.decode(&mut buf).expect("decode"),
            Some(Payload::from("split"))
        );
    }

    #[rstest]
    #[case::inside_header(2)]
    #[case::after_kind_byte(6)]
    #[case::inside_body(9)]
    fn body_bytes_are_not_read_as_a_length(
        codec: LengthDelimitedMessageCodec,
        #[case] split: usize,
    ) {
        // Body bytes such as `"new` would announce an oversized frame if
        // they were taken for a header.
        let full = encode(&codec, Payload::from(r#"[5,"news"]"#));
        let mut decoder = codec.decoder();
        let mut buf = BytesMut::from(&full[..split]);
        assert_eq!(decoder.decode(&mut buf).expect("decode head"), None);
        buf.extend_from_slice(&full[split..]);
        assert_eq!(
            decoder.decode(&mut buf).expect("decode tail"),
            Some(Payload::from(r#"[5,"news"]"#))
        );
        assert_eq!(decoder.decode(&mut buf).expect("drained"), None);
    }

    #[rstest]
    fn oversized_length_after_a_split_frame_is_still_rejected(codec: LengthDelimitedMessageCodec) {
        let full = encode(&codec, Payload::from("first"));
        let mut decoder = codec.decoder();
        let mut buf = BytesMut::from(&full[..7]);
        assert_eq!(decoder.decode(&mut buf).expect("decode head"), None);
        buf.extend_from_slice(&full[7..]);
        buf.extend_from_slice(&[0, 0, 1, 0]);
        assert_eq!(
            decoder.decode(&mut buf).expect("decode tail"),
            Some(Payload::from("first"))
        );
        let err = decoder
            .decode(&mut buf)
            .expect_err("next header is oversized");
        assert!(matches!(
            classify(err),
            PipelineError::Framing(FramingError::OversizedFrame { size: 256, max: 128 })
        ));
    }

    #[rstest]
    #[case(&[0, 0, 0, 0], PipelineError::Framing(FramingError::EmptyFrame))]
    #[case(&[0, 0, 0, 1, 7], PipelineError::Framing(FramingError::UnknownKind(7)))]
    #[case(&[0, 0, 0, 2, KIND_TEXT, 0xff], PipelineError::Framing(FramingError::InvalidUtf8))]
    #[case(
        &[0, 0, 1, 0],
        PipelineError::Framing(FramingError::OversizedFrame { size: 256, max: 128 })
    )]
    fn rejects_bad_frames(
        codec: LengthDelimitedMessageCodec,
        #[case] bytes: &[u8],
        #[case] expected: PipelineError,
    ) {
        let mut buf = BytesMut::from(bytes);
        let err = codec
            .decoder()
            .decode(&mut buf)
            .expect_err("frame should be rejected");
        assert_eq!(classify(err).to_string(), expected.to_string());
    }

    #[rstest]
    fn encoder_refuses_oversized_payload(codec: LengthDelimitedMessageCodec) {
        let mut buf = BytesMut::new();
        let err = codec
            .encoder()
            .encode(Payload::from("x".repeat(200)), &mut buf)
            .expect_err("payload exceeds limit");
        assert!(matches!(
            classify(err),
            PipelineError::Framing(FramingError::OversizedFrame { size: 201, max: 128 })
        ));
    }

    #[test]
    fn non_codec_errors_are_transport_failures() {
        let err = io::Error::from(io::ErrorKind::ConnectionReset);
        assert!(matches!(classify(err), PipelineError::Transport(_)));
    }

    #[rstest]
    #[case(0, MIN_FRAME_LENGTH)]
    #[case(usize::MAX, MAX_FRAME_LENGTH)]
    #[case(4096, 4096)]
    fn frame_length_is_clamped(#[case] requested: usize, #[case] expected: usize) {
        assert_eq!(LengthDelimitedMessageCodec::new(requested).max_frame_length(), expected);
    }
}
