use bytes::{Buf, BufMut, Bytes, BytesMut};
use crate::http3::http3_errors::ProtocolError;
use crate::http3::http3_frame::FrameType;
use crate::http3::setting_registry::Setting;
use crate::http3::varint::{decode_varint, encode_varint, varint_len, VarIntBoundsExceeded};

// https://www.rfc-editor.org/rfc/rfc9114.html#section-7.2.4
//
//    SETTINGS Frame {
//      Type (i) = 0x04,
//      Length (i),
//      Setting (..) ...,
//    }
//
//    Setting {
//      Identifier (i),
//      Value (i),
//    }
pub struct SettingsFrame;

impl SettingsFrame {

    pub fn encode(settings: &[Setting]) -> Result<Bytes, VarIntBoundsExceeded> {
        let payload = Self::encode_payload(settings)?;
        let payload_len = payload.len() as u64;
        let type_code = FrameType::Settings.code();

        let mut buf = BytesMut::with_capacity(
            varint_len(type_code) + varint_len(payload_len) + payload.len()
        );
        encode_varint(type_code, &mut buf)?;
        encode_varint(payload_len, &mut buf)?;
        buf.put(payload);
        Ok(buf.freeze())
    }

    pub fn encode_payload(settings: &[Setting]) -> Result<Bytes, VarIntBoundsExceeded> {
        let mut buf = BytesMut::with_capacity(settings.len() * 4);
        for setting in settings {
            encode_varint(setting.identifier().code(), &mut buf)?;
            encode_varint(setting.value(), &mut buf)?;
        }
        Ok(buf.freeze())
    }

    /// Decodes one whole SETTINGS frame from the front of `buf`.
    ///
    /// Identifiers are not interpreted: unknown ones come back as opaque
    /// pairs and duplicates are returned as they appear.
    pub fn decode<B: Buf>(buf: &mut B) -> Result<Vec<Setting>, ProtocolError> {
        let type_code = decode_varint(buf)
            .ok_or(ProtocolError::FrameMalformed("truncated frame type"))?;
        if FrameType::from_code(type_code) != FrameType::Settings {
            return Err(ProtocolError::UnexpectedFrame(type_code));
        }

        let payload_len = decode_varint(buf)
            .ok_or(ProtocolError::FrameMalformed("truncated frame length"))?;
        if (buf.remaining() as u64) < payload_len {
            return Err(ProtocolError::FrameMalformed("SETTINGS payload shorter than its declared length"));
        }

        Self::decode_payload(buf.copy_to_bytes(payload_len as usize))
    }

    pub fn decode_payload(mut payload: Bytes) -> Result<Vec<Setting>, ProtocolError> {
        let mut out = Vec::new();
        while payload.has_remaining() {
            let identifier = decode_varint(&mut payload)
                .ok_or(ProtocolError::FrameMalformed("setting identifier runs past the frame end"))?;
            let value = decode_varint(&mut payload)
                .ok_or(ProtocolError::FrameMalformed("setting value runs past the frame end"))?;
            out.push(Setting::from_wire(identifier, value));
        }
        Ok(out)
    }
}
