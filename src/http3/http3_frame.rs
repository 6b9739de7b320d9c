use bytes::BufMut;
use crate::http3::varint::{encode_varint, peek_varint, VarIntBoundsExceeded};

// https://www.rfc-editor.org/rfc/rfc9114.html#section-7.2
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    Data,
    Headers,
    CancelPush,
    Settings,
    PushPromise,
    GoAway,
    MaxPushId,
    /// PRIORITY, PING, WINDOW_UPDATE and CONTINUATION from HTTP/2.
    ReservedHttp2(u64),
    Unknown(u64),
}

impl FrameType {

    pub fn from_code(code: u64) -> Self {
        match code {
            0x00 => FrameType::Data,
            0x01 => FrameType::Headers,
            0x03 => FrameType::CancelPush,
            0x04 => FrameType::Settings,
            0x05 => FrameType::PushPromise,
            0x07 => FrameType::GoAway,
            0x0d => FrameType::MaxPushId,
            0x02 | 0x06 | 0x08 | 0x09 => FrameType::ReservedHttp2(code),
            _ => FrameType::Unknown(code),
        }
    }

    pub fn code(&self) -> u64 {
        match *self {
            FrameType::Data => 0x00,
            FrameType::Headers => 0x01,
            FrameType::CancelPush => 0x03,
            FrameType::Settings => 0x04,
            FrameType::PushPromise => 0x05,
            FrameType::GoAway => 0x07,
            FrameType::MaxPushId => 0x0d,
            FrameType::ReservedHttp2(code) => code,
            FrameType::Unknown(code) => code,
        }
    }
}

// https://www.rfc-editor.org/rfc/rfc9114.html#section-6.2
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamType {
    Control,
    Push,
    QpackEncoder,
    QpackDecoder,
    Unknown(u64),
}

impl StreamType {

    pub fn from_code(code: u64) -> Self {
        match code {
            0x00 => StreamType::Control,
            0x01 => StreamType::Push,
            0x02 => StreamType::QpackEncoder,
            0x03 => StreamType::QpackDecoder,
            _ => StreamType::Unknown(code),
        }
    }

    pub fn code(&self) -> u64 {
        match *self {
            StreamType::Control => 0x00,
            StreamType::Push => 0x01,
            StreamType::QpackEncoder => 0x02,
            StreamType::QpackDecoder => 0x03,
            StreamType::Unknown(code) => code,
        }
    }

    pub fn encode<B: BufMut>(&self, buf: &mut B) -> Result<(), VarIntBoundsExceeded> {
        encode_varint(self.code(), buf)
    }
}

//    HTTP/3 Frame Format {
//      Type (i),
//      Length (i),
//      Frame Payload (..),
//    }
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub frame_type: FrameType,
    pub payload_len: u64,
    pub header_len: usize,
}

impl FrameHeader {

    /// `None` until both varints of the header are available.
    pub fn peek(bytes: &[u8]) -> Option<FrameHeader> {
        let (type_code, type_len) = peek_varint(bytes)?;
        let (payload_len, len_len) = peek_varint(&bytes[type_len..])?;

        Some(FrameHeader {
            frame_type: FrameType::from_code(type_code),
            payload_len,
            header_len: type_len + len_len,
        })
    }

    pub fn frame_len(&self) -> u64 {
        self.header_len as u64 + self.payload_len
    }
}
