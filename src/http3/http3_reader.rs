use bytes::{Buf, Bytes, BytesMut};
use tokio::io::AsyncRead;
use tokio_util::io::read_buf;
use tracing::{debug, warn};
use crate::http3::http3_errors::{Http3Error, ProtocolError};
use crate::http3::http3_frame::{FrameHeader, FrameType};
use crate::http3::varint::decode_varint;

/// A complete frame, header included.
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub header: FrameHeader,
    pub bytes: Bytes,
}

impl RawFrame {
    pub fn payload(&self) -> Bytes {
        self.bytes.slice(self.header.header_len..)
    }
}

/// Buffers bytes of one unidirectional stream until whole frames are
/// available.
pub struct FrameReader<R> {
    reader: R,
    buf: BytesMut,
    max_frame_size: u64,
    // Payload bytes of a discarded frame still to come off the stream.
    skip_remaining: u64,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {

    pub fn with(reader: R, buffered: BytesMut, max_frame_size: u64) -> Self {
        FrameReader { reader, buf: buffered, max_frame_size, skip_remaining: 0 }
    }

    /// Returns `false` once the peer finished the stream and nothing is left.
    pub async fn ensure_buffered(&mut self) -> Result<bool, Http3Error> {
        if !self.buf.is_empty() {
            return Ok(true);
        }
        Ok(self.fill().await? > 0)
    }

    /// Reads the varint that opens every unidirectional stream.
    pub async fn read_varint(&mut self) -> Result<Option<u64>, Http3Error> {
        loop {
            if let Some(value) = decode_varint(&mut self.buf) {
                return Ok(Some(value));
            }
            if self.fill().await? == 0 {
                return Ok(None);
            }
        }
    }

    /// `Ok(None)` when the stream ends, even in the middle of a frame; a
    /// partially received frame is dropped.
    ///
    /// Frames of unknown type larger than the size limit are discarded as
    /// they arrive instead of being buffered.
    pub async fn next_frame(&mut self) -> Result<Option<RawFrame>, Http3Error> {
        loop {
            if self.skip_remaining > 0 {
                let skipped = self.skip_remaining.min(self.buf.len() as u64);
                self.buf.advance(skipped as usize);
                self.skip_remaining -= skipped;
            }

            if self.skip_remaining == 0 {
                if let Some(header) = FrameHeader::peek(&self.buf) {
                    if header.payload_len > self.max_frame_size {
                        //    Implementations MUST ignore unknown or unsupported values
                        //    in all extensible protocol elements.
                        if let FrameType::Unknown(code) = header.frame_type {
                            debug!("discarding unknown frame type {:#x} with {} byte payload", code, header.payload_len);
                            self.buf.advance(header.header_len);
                            self.skip_remaining = header.payload_len;
                            continue;
                        }
                        return Err(ProtocolError::FrameMalformed("control frame exceeds the size limit").into());
                    }

                    let frame_len = header.frame_len() as usize;
                    if self.buf.len() >= frame_len {
                        let bytes = self.buf.split_to(frame_len).freeze();
                        return Ok(Some(RawFrame { header, bytes }));
                    }
                }
            }

            if self.fill().await? == 0 {
                if self.buf.has_remaining() {
                    debug!("stream ended with {} bytes of an incomplete frame", self.buf.len());
                }
                return Ok(None);
            }
        }
    }

    #[cfg(test)]
    fn into_parts(self) -> (R, BytesMut) {
        (self.reader, self.buf)
    }

    async fn fill(&mut self) -> Result<usize, Http3Error> {
        read_buf(&mut self.reader, &mut self.buf)
            .await
            .map_err(|e| {
                warn!("reading a critical stream failed: {}", e);
                Http3Error::from(ProtocolError::ClosedCriticalStream)
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn reassembles_frames_split_across_reads() {
        let (mut client, server) = tokio::io::duplex(64);
        let mut reader = FrameReader::with(server, BytesMut::new(), 1024);

        let writer = tokio::spawn(async move {
            client.write_all(&[0x04, 0x02]).await.unwrap();
            client.flush().await.unwrap();
            tokio::task::yield_now().await;
            client.write_all(&[0x06, 0x01, 0x07, 0x01, 0x00]).await.unwrap();
        });

        let settings = reader.next_frame().await.unwrap().unwrap();
        assert_eq!(settings.header.frame_type, FrameType::Settings);
        assert_eq!(&settings.payload()[..], &[0x06, 0x01]);

        let goaway = reader.next_frame().await.unwrap().unwrap();
        assert_eq!(goaway.header.frame_type, FrameType::GoAway);
        assert_eq!(&goaway.bytes[..], &[0x07, 0x01, 0x00]);

        writer.await.unwrap();
        assert!(reader.next_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn drops_incomplete_frame_at_end_of_stream() {
        let mut reader = FrameReader::with(&b"\x04\x05\x06"[..], BytesMut::new(), 1024);
        assert!(reader.next_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn rejects_oversized_frames_before_buffering_them() {
        // declares a 16384 byte payload
        let mut reader = FrameReader::with(&b"\x04\x80\x00\x40\x00"[..], BytesMut::new(), 1024);
        let error = reader.next_frame().await.unwrap_err();
        assert!(matches!(error.protocol_error(), Some(ProtocolError::FrameMalformed(_))));
    }

    #[tokio::test]
    async fn skips_oversized_unknown_frames_as_they_stream_in() {
        let (mut client, server) = tokio::io::duplex(256);
        let mut reader = FrameReader::with(server, BytesMut::new(), 1024);

        let writer = tokio::spawn(async move {
            // unknown type 0x21 with a 20000 byte payload, then GOAWAY(4)
            client.write_all(&[0x21, 0x80, 0x00, 0x4e, 0x20]).await.unwrap();
            client.write_all(&vec![0xaa; 20_000]).await.unwrap();
            client.write_all(&[0x07, 0x01, 0x04]).await.unwrap();
        });

        let goaway = reader.next_frame().await.unwrap().unwrap();
        assert_eq!(goaway.header.frame_type, FrameType::GoAway);
        assert_eq!(&goaway.payload()[..], &[0x04]);
        assert_eq!(reader.skip_remaining, 0);

        writer.await.unwrap();
        assert!(reader.next_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn oversized_known_frames_are_still_rejected() {
        // PUSH_PROMISE declaring a 20000 byte payload
        let mut reader = FrameReader::with(&b"\x05\x80\x00\x4e\x20"[..], BytesMut::new(), 1024);
        let error = reader.next_frame().await.unwrap_err();
        assert!(matches!(error.protocol_error(), Some(ProtocolError::FrameMalformed(_))));
    }

    #[tokio::test]
    async fn reads_stream_type_then_keeps_the_rest() {
        let mut reader = FrameReader::with(&b"\x00\x04\x00"[..], BytesMut::new(), 1024);
        assert_eq!(reader.read_varint().await.unwrap(), Some(0x00));

        let (_, rest) = reader.into_parts();
        assert_eq!(&rest[..], &[0x04, 0x00]);
    }
}
