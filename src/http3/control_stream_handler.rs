use std::collections::HashSet;
use bytes::{Buf, BytesMut};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::select;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use crate::http3::frame_settings::SettingsFrame;
use crate::http3::http3_errors::{Http3Error, ProtocolError};
use crate::http3::http3_frame::{FrameType, StreamType};
use crate::http3::http3_reader::{FrameReader, RawFrame};
use crate::http3::peer_settings::PeerSettings;
use crate::http3::setting_registry::Setting;
use crate::http3::varint::decode_varint;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlStreamState {
    Idle,
    AwaitingSettings,
    SettingsReceived,
    Streaming,
}

/// Owns both control streams of a connection.
///
/// Outbound: the stream type followed by exactly one SETTINGS frame.
/// Inbound: the first frame must be SETTINGS and it may appear only once.
/// Every violation here is fatal to the whole connection.
pub struct ControlStreamHandler {
    outbound_state: ControlStreamState,
    inbound_state: ControlStreamState,
    remote_settings: PeerSettings,
    goaway_id: Option<u64>,
    ready: watch::Sender<bool>,
}

impl ControlStreamHandler {

    pub fn new(remote_settings: PeerSettings) -> Self {
        let (ready, _) = watch::channel(false);
        ControlStreamHandler {
            outbound_state: ControlStreamState::Idle,
            inbound_state: ControlStreamState::Idle,
            remote_settings,
            goaway_id: None,
            ready,
        }
    }

    /// Flips to `true` once the peer's SETTINGS have been applied.
    pub fn ready(&self) -> watch::Receiver<bool> {
        self.ready.subscribe()
    }

    pub fn inbound_state(&self) -> ControlStreamState {
        self.inbound_state
    }

    pub fn outbound_state(&self) -> ControlStreamState {
        self.outbound_state
    }

    pub fn remote_settings(&self) -> &PeerSettings {
        &self.remote_settings
    }

    pub(crate) fn remote_settings_mut(&mut self) -> &mut PeerSettings {
        &mut self.remote_settings
    }

    pub fn goaway_id(&self) -> Option<u64> {
        self.goaway_id
    }

    pub async fn open_outbound<W>(&mut self, local_settings: &PeerSettings, writer: &mut W) -> Result<(), Http3Error>
    where
        W: AsyncWrite + Unpin,
    {
        if self.outbound_state != ControlStreamState::Idle {
            warn!("outbound control stream is already open");
            return Ok(());
        }

        let parameters = local_settings.get_non_default_parameters();
        let frame = SettingsFrame::encode(&parameters)
            .map_err(|_| ProtocolError::FrameMalformed("local setting does not fit in a varint"))?;

        let mut buf = BytesMut::with_capacity(frame.len() + 1);
        StreamType::Control.encode(&mut buf)
            .map_err(|_| ProtocolError::FrameMalformed("stream type does not fit in a varint"))?;
        buf.extend_from_slice(&frame);

        let written = async {
            writer.write_all(&buf).await?;
            writer.flush().await
        }.await;
        if let Err(e) = written {
            warn!("failed to write the outbound control stream: {}", e);
            return Err(ProtocolError::ClosedCriticalStream.into());
        }

        self.outbound_state = ControlStreamState::Streaming;
        info!("sent SETTINGS with {} parameters", parameters.len());
        Ok(())
    }

    /// Reads the peer's control stream until it fails or `token` is
    /// cancelled. A frame that is still being received on cancellation is
    /// abandoned.
    pub async fn serve_inbound<R>(&mut self, mut reader: FrameReader<R>, token: &CancellationToken) -> Result<(), Http3Error>
    where
        R: AsyncRead + Unpin,
    {
        select! {
            biased;

            _ = token.cancelled() => {
                debug!("inbound control stream task is cancelled.");
                Ok(())
            }

            result = self.read_inbound(&mut reader) => result,
        }
    }

    async fn read_inbound<R>(&mut self, reader: &mut FrameReader<R>) -> Result<(), Http3Error>
    where
        R: AsyncRead + Unpin,
    {
        if !reader.ensure_buffered().await? {
            return Err(ProtocolError::ClosedCriticalStream.into());
        }
        self.inbound_state = ControlStreamState::AwaitingSettings;

        loop {
            match reader.next_frame().await? {
                Some(frame) => self.on_frame(frame)?,
                //    If either control stream is closed at any point, this MUST be
                //    treated as a connection error of type H3_CLOSED_CRITICAL_STREAM.
                None => return Err(ProtocolError::ClosedCriticalStream.into()),
            }
        }
    }

    pub fn on_frame(&mut self, frame: RawFrame) -> Result<(), Http3Error> {
        match self.inbound_state {
            ControlStreamState::Idle | ControlStreamState::AwaitingSettings => self.on_first_frame(frame),
            ControlStreamState::SettingsReceived | ControlStreamState::Streaming => self.on_later_frame(frame),
        }
    }

    fn on_first_frame(&mut self, frame: RawFrame) -> Result<(), Http3Error> {
        self.inbound_state = ControlStreamState::AwaitingSettings;

        let mut bytes = frame.bytes;
        let settings = match SettingsFrame::decode(&mut bytes) {
            Ok(settings) => settings,
            Err(ProtocolError::UnexpectedFrame(frame_type)) => {
                warn!("control stream started with frame type {:#x} instead of SETTINGS", frame_type);
                return Err(ProtocolError::MissingSettings.into());
            }
            Err(e) => return Err(e.into()),
        };
        debug!("received SETTINGS {:?}", settings);

        self.inbound_state = ControlStreamState::SettingsReceived;
        self.apply(settings)?;
        self.inbound_state = ControlStreamState::Streaming;

        self.ready.send_replace(true);
        Ok(())
    }

    // Nothing is applied unless the whole frame is acceptable.
    fn apply(&mut self, settings: Vec<Setting>) -> Result<(), Http3Error> {
        let mut seen = HashSet::with_capacity(settings.len());
        for setting in &settings {
            let code = setting.identifier().code();
            if !seen.insert(code) {
                return Err(ProtocolError::DuplicateSetting(code).into());
            }
            setting.identifier()
                .validate(setting.value())
                .map_err(ProtocolError::from)?;
        }

        for setting in settings {
            self.remote_settings
                .set(setting.identifier(), setting.value())
                .map_err(ProtocolError::from)?;
        }
        Ok(())
    }

    fn on_later_frame(&mut self, frame: RawFrame) -> Result<(), Http3Error> {
        let frame_type = frame.header.frame_type;
        match frame_type {
            FrameType::Settings => Err(ProtocolError::SettingsAlreadyReceived.into()),
            FrameType::GoAway => {
                let id = Self::single_varint(&frame)?;
                info!("peer sent GOAWAY with id {}", id);
                self.goaway_id.replace(id);
                Ok(())
            },
            FrameType::MaxPushId | FrameType::CancelPush => {
                let id = Self::single_varint(&frame)?;
                debug!("ignoring {:?} for push id {}", frame_type, id);
                Ok(())
            },
            FrameType::Data | FrameType::Headers | FrameType::PushPromise | FrameType::ReservedHttp2(_) => {
                Err(ProtocolError::UnexpectedFrame(frame_type.code()).into())
            },
            FrameType::Unknown(code) => {
                debug!("skipping unknown frame type {:#x} on the control stream", code);
                Ok(())
            },
        }
    }

    fn single_varint(frame: &RawFrame) -> Result<u64, Http3Error> {
        let mut payload = frame.payload();
        let value = decode_varint(&mut payload)
            .ok_or(ProtocolError::FrameMalformed("truncated varint payload"))?;
        if payload.has_remaining() {
            return Err(ProtocolError::FrameMalformed("trailing bytes after varint payload").into());
        }
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use bytes::Bytes;
    use super::*;
    use crate::http3::connection_settings_enforcer::ConnectionSettingsEnforcer;
    use crate::http3::http3_conn_options::Http3Limits;
    use crate::http3::http3_errors::SettingError;
    use crate::http3::http3_frame::FrameHeader;
    use crate::http3::setting_registry::SettingIdentifier;

    fn raw(bytes: &[u8]) -> RawFrame {
        RawFrame {
            header: FrameHeader::peek(bytes).unwrap(),
            bytes: Bytes::copy_from_slice(bytes),
        }
    }

    fn handler() -> (ControlStreamHandler, Arc<ConnectionSettingsEnforcer>) {
        let enforcer = Arc::new(ConnectionSettingsEnforcer::new());
        let handler = ControlStreamHandler::new(PeerSettings::remote(enforcer.clone()));
        (handler, enforcer)
    }

    fn protocol_error(result: Result<(), Http3Error>) -> ProtocolError {
        let error = result.unwrap_err();
        assert!(error.is_connection_error());
        error.protocol_error().cloned().unwrap()
    }

    #[test]
    fn settings_first_then_streaming() {
        let (mut handler, enforcer) = handler();
        let ready = handler.ready();

        handler.on_frame(raw(&[0x04, 0x02, 0x06, 0x01])).unwrap();

        assert_eq!(handler.inbound_state(), ControlStreamState::Streaming);
        assert_eq!(enforcer.max_header_list_size(), 1);
        assert!(*ready.borrow());
    }

    #[test]
    fn other_frame_first_is_missing_settings() {
        let (mut handler, _) = handler();
        let error = protocol_error(handler.on_frame(raw(&[0x07, 0x01, 0x00])));
        assert_eq!(error, ProtocolError::MissingSettings);
    }

    #[test]
    fn second_settings_frame_is_rejected() {
        let (mut handler, _) = handler();
        handler.on_frame(raw(&[0x04, 0x00])).unwrap();

        let error = protocol_error(handler.on_frame(raw(&[0x04, 0x02, 0x06, 0x01])));
        assert_eq!(error, ProtocolError::SettingsAlreadyReceived);
    }

    #[test]
    fn unknown_identifier_is_kept_without_effect() {
        let (mut handler, enforcer) = handler();
        // (0x1234, 5) then (0x06, 100)
        handler.on_frame(raw(&[0x04, 0x06, 0x52, 0x34, 0x05, 0x06, 0x40, 0x64])).unwrap();

        assert_eq!(handler.remote_settings().get_raw(0x1234), Some(5));
        assert_eq!(enforcer.max_header_list_size(), 100);
    }

    #[test]
    fn out_of_range_value_applies_nothing() {
        let (mut handler, enforcer) = handler();
        // (0x06, 1) then (0x08, 2)
        let error = protocol_error(handler.on_frame(raw(&[0x04, 0x04, 0x06, 0x01, 0x08, 0x02])));

        assert_eq!(error, ProtocolError::Setting(SettingError::OutOfRange { identifier: 0x08, value: 2 }));
        assert_eq!(handler.remote_settings().get_raw(0x06), None);
        assert_ne!(enforcer.max_header_list_size(), 1);
    }

    #[test]
    fn reserved_http2_setting_is_rejected() {
        let (mut handler, _) = handler();
        let error = protocol_error(handler.on_frame(raw(&[0x04, 0x02, 0x04, 0x00])));
        assert!(matches!(error, ProtocolError::Setting(_)));
    }

    #[test]
    fn duplicate_identifier_is_rejected() {
        let (mut handler, enforcer) = handler();
        let error = protocol_error(handler.on_frame(raw(&[0x04, 0x04, 0x06, 0x01, 0x06, 0x02])));

        assert_eq!(error, ProtocolError::DuplicateSetting(0x06));
        assert_ne!(enforcer.max_header_list_size(), 1);
    }

    #[test]
    fn frames_after_settings() {
        let (mut handler, _) = handler();
        handler.on_frame(raw(&[0x04, 0x00])).unwrap();

        handler.on_frame(raw(&[0x07, 0x01, 0x08])).unwrap();
        assert_eq!(handler.goaway_id(), Some(8));

        // unknown type 0x21 with a two byte payload
        handler.on_frame(raw(&[0x21, 0x02, 0xaa, 0xbb])).unwrap();

        let error = protocol_error(handler.on_frame(raw(&[0x00, 0x01, 0xff])));
        assert_eq!(error, ProtocolError::UnexpectedFrame(0x00));
    }

    #[test]
    fn malformed_goaway_is_rejected() {
        let (mut handler, _) = handler();
        handler.on_frame(raw(&[0x04, 0x00])).unwrap();

        let error = protocol_error(handler.on_frame(raw(&[0x07, 0x02, 0x08, 0x00])));
        assert!(matches!(error, ProtocolError::FrameMalformed(_)));
    }

    #[tokio::test]
    async fn outbound_writes_stream_type_and_settings_once() {
        let (mut handler, _) = handler();
        let local = PeerSettings::local(&Http3Limits::default()).unwrap();
        let mut out = Vec::new();

        handler.open_outbound(&local, &mut out).await.unwrap();
        handler.open_outbound(&local, &mut out).await.unwrap();

        // control stream, SETTINGS, (0x06, 32768)
        assert_eq!(out, vec![0x00, 0x04, 0x05, 0x06, 0x80, 0x00, 0x80, 0x00]);
        assert_eq!(handler.outbound_state(), ControlStreamState::Streaming);
    }

    #[tokio::test]
    async fn closing_the_control_stream_is_fatal() {
        let (mut handler, _) = handler();
        let token = CancellationToken::new();
        let reader = FrameReader::with(&b"\x04\x00"[..], BytesMut::new(), 1024);

        let error = protocol_error(handler.serve_inbound(reader, &token).await);

        assert_eq!(error, ProtocolError::ClosedCriticalStream);
        assert_eq!(handler.inbound_state(), ControlStreamState::Streaming);
        assert_eq!(handler.remote_settings().get(SettingIdentifier::MaxHeaderListSize), crate::http3::varint::MAX_VARINT);
    }

    #[tokio::test]
    async fn cancellation_abandons_a_partial_frame() {
        let (mut handler, _) = handler();
        let (mut peer, local) = tokio::io::duplex(64);
        peer.write_all(&[0x04, 0x04, 0x06]).await.unwrap();

        let token = CancellationToken::new();
        token.cancel();
        let reader = FrameReader::with(local, BytesMut::new(), 1024);

        handler.serve_inbound(reader, &token).await.unwrap();
        assert_ne!(handler.inbound_state(), ControlStreamState::Streaming);
    }
}
