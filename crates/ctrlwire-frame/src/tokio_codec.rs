//! `tokio_util::codec` adapter for async transports.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use crate::codec::{decode_frame, encode_frame, LENGTH_PREFIX_SIZE};
use crate::error::{FrameError, Result};
use crate::message::WrapperMessage;

/// Frames `WrapperMessage`s for use with `tokio_util::codec::Framed`.
#[derive(Debug, Clone, Copy, Default)]
pub struct WrapperCodec;

impl Decoder for WrapperCodec {
    type Item = WrapperMessage;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<WrapperMessage>> {
        decode_frame(src)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<WrapperMessage>> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None if src.is_empty() => Ok(None),
            None => Err(FrameError::Truncated {
                expected: LENGTH_PREFIX_SIZE + src[0] as usize,
                received: src.len(),
            }),
        }
    }
}

impl Encoder<WrapperMessage> for WrapperCodec {
    type Error = FrameError;

    fn encode(&mut self, item: WrapperMessage, dst: &mut BytesMut) -> Result<()> {
        encode_frame(&item, dst)
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use futures_util::{SinkExt, StreamExt};
    use tokio::io::AsyncWriteExt;
    use tokio_util::codec::{FramedRead, FramedWrite};

    use super::*;
    use crate::message::{MessageType, OutboundMessage, SyncRequest};

    #[tokio::test]
    async fn framed_roundtrip() {
        let (client, server) = tokio::io::duplex(1024);
        let mut sink = FramedWrite::new(client, WrapperCodec);
        let mut stream = FramedRead::new(server, WrapperCodec);

        let first = OutboundMessage::from(SyncRequest { last_sync_time: 5 })
            .wrap(1)
            .unwrap();
        let second = WrapperMessage::new(
            MessageType::SyncRouteResponse,
            Bytes::from_static(b"route"),
            2,
        );

        sink.send(first.clone()).await.unwrap();
        sink.send(second.clone()).await.unwrap();

        assert_eq!(stream.next().await.unwrap().unwrap(), first);
        assert_eq!(stream.next().await.unwrap().unwrap(), second);
    }

    #[tokio::test]
    async fn framed_eof_mid_frame_is_truncated() {
        let (mut client, server) = tokio::io::duplex(64);
        let mut stream = FramedRead::new(server, WrapperCodec);

        client.write_all(&[0x06, 0x08, 0x01]).await.unwrap();
        drop(client);

        let err = stream.next().await.unwrap().unwrap_err();
        assert!(matches!(
            err,
            FrameError::Truncated {
                expected: 7,
                received: 3
            }
        ));
    }

    #[tokio::test]
    async fn framed_clean_eof_ends_stream() {
        let (client, server) = tokio::io::duplex(64);
        let mut stream = FramedRead::new(server, WrapperCodec);
        drop(client);
        assert!(stream.next().await.is_none());
    }

    #[test]
    fn encoder_rejects_oversized() {
        let mut dst = BytesMut::new();
        let big = WrapperMessage::new(MessageType::SyncRequest, vec![0u8; 400], 1);
        let err = WrapperCodec.encode(big, &mut dst).unwrap_err();
        assert!(matches!(err, FrameError::FrameTooLarge { .. }));
    }
}
