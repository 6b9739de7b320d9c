use std::sync::{Arc, Mutex, PoisonError};
use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::select;
use tokio::spawn;
use tokio::sync::mpsc::{self, Receiver, Sender, UnboundedReceiver};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use crate::http3::connection_settings_enforcer::ConnectionSettingsEnforcer;
use crate::http3::control_stream_handler::ControlStreamHandler;
use crate::http3::http3_conn_options::Http3Limits;
use crate::http3::http3_errors::{ErrorCode, Http3Error, ProtocolError};
use crate::http3::http3_frame::StreamType;
use crate::http3::http3_reader::FrameReader;
use crate::http3::http3_request_stream::{HeaderField, Http3RequestStream, RequestStreamMessage};
use crate::http3::peer_settings::PeerSettings;
use crate::http3::setting_registry::Setting;

/// What the connection asks of the QUIC transport underneath it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportCommand {
    ResetStream {
        stream_id: u64,
        code: ErrorCode,
        reason: String,
    },
    CloseConnection {
        code: ErrorCode,
        reason: String,
    },
}

pub struct RequestStreamHandle {
    pub sender: Sender<RequestStreamMessage>,
    pub token: CancellationToken,
    pub join_handle: JoinHandle<Result<Vec<HeaderField>, Http3Error>>,
}

// Taken by whichever unidirectional stream turns out to be the peer's
// control stream.
type ControlStreamSlot = Arc<Mutex<Option<ControlStreamHandler>>>;

/// Settings negotiation for one HTTP/3 connection.
///
/// The transport hands over streams as it accepts them and executes the
/// [`TransportCommand`]s it receives back.
pub struct Http3Connection {
    limits: Http3Limits,
    local_settings: PeerSettings,
    enforcer: Arc<ConnectionSettingsEnforcer>,
    control_stream: ControlStreamSlot,
    ready: watch::Receiver<bool>,
    root_token: CancellationToken,
    transport: Sender<TransportCommand>,
}

impl Http3Connection {

    /// Writes our control stream preamble and SETTINGS to `outbound`.
    pub async fn start<W>(limits: Http3Limits, outbound: &mut W) -> anyhow::Result<(Self, Receiver<TransportCommand>)>
    where
        W: AsyncWrite + Unpin,
    {
        let local_settings = PeerSettings::local(&limits)?;
        let enforcer = Arc::new(
            ConnectionSettingsEnforcer::with_local_header_list_size(limits.max_request_headers_total_size())
        );

        let mut handler = ControlStreamHandler::new(PeerSettings::remote(enforcer.clone()));
        let ready = handler.ready();
        handler.open_outbound(&local_settings, outbound).await?;

        let (transport, commands) = mpsc::channel::<TransportCommand>(100);

        let connection = Http3Connection {
            limits,
            local_settings,
            enforcer,
            control_stream: Arc::new(Mutex::new(Some(handler))),
            ready,
            root_token: CancellationToken::new(),
            transport,
        };
        Ok((connection, commands))
    }

    pub fn limits(&self) -> &Http3Limits {
        &self.limits
    }

    pub fn local_settings(&self) -> &PeerSettings {
        &self.local_settings
    }

    pub fn enforcer(&self) -> Arc<ConnectionSettingsEnforcer> {
        self.enforcer.clone()
    }

    /// `None` after the peer's control stream has been accepted.
    pub fn subscribe_peer_settings(&self) -> Option<UnboundedReceiver<Setting>> {
        self.control_stream
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_mut()
            .map(|handler| handler.remote_settings_mut().subscribe())
    }

    pub fn control_stream_ready(&self) -> watch::Receiver<bool> {
        self.ready.clone()
    }

    /// `false` if the connection closed before the peer's SETTINGS arrived.
    pub async fn wait_for_control_stream(&self) -> bool {
        let mut ready = self.ready.clone();
        select! {
            biased;

            res = ready.wait_for(|ready| *ready) => res.is_ok(),
            _ = self.root_token.cancelled() => false,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.root_token.is_cancelled()
    }

    /// Stops every task of this connection without telling the peer.
    pub fn close(&self) {
        info!("closing connection");
        self.root_token.cancel();
    }

    /// Identifies a peer-initiated unidirectional stream by its type on a
    /// task of its own, so a peer that never sends the type holds up nothing
    /// else.
    ///
    /// Only the control stream is read further. The task yields `Ok(None)`
    /// if the stream ended before its type arrived or the connection closed.
    pub fn accept_uni_stream<R>(&self, reader: R) -> JoinHandle<anyhow::Result<Option<StreamType>>>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let acceptor = UniStreamAcceptor {
            control_stream: self.control_stream.clone(),
            transport: self.transport.clone(),
            token: self.root_token.clone(),
            max_control_frame_size: self.limits.max_control_frame_size(),
        };
        spawn(acceptor.accept(reader))
    }

    /// Starts enforcing header limits on a new request stream. Decoded
    /// fields are fed through the returned sender.
    pub fn accept_request_stream(&self, stream_id: u64) -> RequestStreamHandle {
        let (sender, receiver) = mpsc::channel::<RequestStreamMessage>(100);
        let token = self.root_token.child_token();
        let stream = Http3RequestStream::new(
            stream_id,
            receiver,
            self.transport.clone(),
            self.enforcer.clone(),
            token.clone(),
        );

        RequestStreamHandle {
            sender,
            token,
            join_handle: spawn(stream.serve()),
        }
    }
}

struct UniStreamAcceptor {
    control_stream: ControlStreamSlot,
    transport: Sender<TransportCommand>,
    token: CancellationToken,
    max_control_frame_size: u64,
}

impl UniStreamAcceptor {

    async fn accept<R>(self, reader: R) -> anyhow::Result<Option<StreamType>>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let mut reader = FrameReader::with(reader, BytesMut::new(), self.max_control_frame_size);
        let read = select! {
            biased;

            _ = self.token.cancelled() => {
                debug!("connection closed before the stream type arrived");
                return Ok(None);
            }

            read = reader.read_varint() => read,
        };

        let code = match read {
            Ok(Some(code)) => code,
            Ok(None) => {
                debug!("unidirectional stream ended before its type");
                return Ok(None);
            },
            Err(e) => {
                debug!("unidirectional stream failed before its type: {}", e);
                return Ok(None);
            },
        };

        let stream_type = StreamType::from_code(code);
        match stream_type {
            StreamType::Control => {
                let handler = self.control_stream
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .take();
                let Some(handler) = handler else {
                    return Err(self.fail(ProtocolError::DuplicateControlStream).await);
                };
                info!("peer control stream accepted");

                let token = self.token.clone();
                let transport = self.transport.clone();
                let _join_handle = spawn(async move {
                    if let Err(e) = run_control_stream(handler, reader, &token).await {
                        report_error(e, &transport, &token).await;
                    }
                });
            },
            //    Only servers can push; if a server receives a client-initiated
            //    push stream, this MUST be treated as a connection error of type
            //    H3_STREAM_CREATION_ERROR.
            StreamType::Push => {
                return Err(self.fail(ProtocolError::UnexpectedPushStream).await);
            },
            StreamType::QpackEncoder | StreamType::QpackDecoder => {
                debug!("{:?} stream belongs to the QPACK layer", stream_type);
            },
            StreamType::Unknown(code) => {
                debug!("ignoring unidirectional stream of unknown type {:#x}", code);
            },
        }
        Ok(Some(stream_type))
    }

    async fn fail(&self, error: ProtocolError) -> anyhow::Error {
        let reported = anyhow::Error::from(Http3Error::from(error.clone()));
        report_error(reported, &self.transport, &self.token).await;
        Http3Error::from(error).into()
    }
}

async fn run_control_stream<R>(mut handler: ControlStreamHandler,
                               reader: FrameReader<R>,
                               token: &CancellationToken) -> anyhow::Result<()>
where
    R: AsyncRead + Unpin,
{
    handler.serve_inbound(reader, token).await?;
    debug!("control stream task finished, GOAWAY id {:?}", handler.goaway_id());
    Ok(())
}

async fn report_error(error: anyhow::Error, transport: &Sender<TransportCommand>, token: &CancellationToken) {
    let command = match error.downcast::<Http3Error>() {
        Ok(Http3Error::ConnectionError { code, source }) => {
            TransportCommand::CloseConnection { code, reason: source.to_string() }
        },
        Ok(Http3Error::StreamError { stream_id, code, reason }) => {
            warn!("resetting stream {}: {}", stream_id, reason);
            let _ = transport.send(TransportCommand::ResetStream { stream_id, code, reason }).await;
            return;
        },
        Err(other) => {
            TransportCommand::CloseConnection { code: ErrorCode::InternalError, reason: other.to_string() }
        },
    };

    // Only the first fatal error reaches the peer.
    if token.is_cancelled() {
        debug!("connection already closing, dropping {:?}", command);
        return;
    }
    warn!("closing connection: {:?}", command);
    let _ = transport.send(command).await;
    token.cancel();
}

#[cfg(test)]
mod tests {
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;
    use tokio::time::timeout;
    use super::*;

    #[tokio::test]
    async fn start_advertises_local_settings() {
        let mut out = Vec::new();
        let (connection, _commands) = Http3Connection::start(Http3Limits::default(), &mut out).await.unwrap();

        assert_eq!(out, vec![0x00, 0x04, 0x05, 0x06, 0x80, 0x00, 0x80, 0x00]);
        assert!(!*connection.control_stream_ready().borrow());
        assert!(!connection.is_closed());
    }

    #[tokio::test]
    async fn qpack_and_unknown_streams_are_left_alone() {
        let mut out = Vec::new();
        let (connection, mut commands) = Http3Connection::start(Http3Limits::default(), &mut out).await.unwrap();

        let qpack_encoder: &'static [u8] = &[0x02, 0x00];
        let qpack = connection.accept_uni_stream(qpack_encoder).await.unwrap().unwrap();
        assert_eq!(qpack, Some(StreamType::QpackEncoder));

        // reserved type 0x21
        let reserved: &'static [u8] = &[0x21];
        let unknown = connection.accept_uni_stream(reserved).await.unwrap().unwrap();
        assert_eq!(unknown, Some(StreamType::Unknown(0x21)));

        let finished: &'static [u8] = &[];
        let empty = connection.accept_uni_stream(finished).await.unwrap().unwrap();
        assert_eq!(empty, None);

        assert!(commands.try_recv().is_err());
        assert!(!connection.is_closed());
    }

    #[tokio::test]
    async fn push_stream_from_client_closes_the_connection() {
        let mut out = Vec::new();
        let (connection, mut commands) = Http3Connection::start(Http3Limits::default(), &mut out).await.unwrap();

        let push: &'static [u8] = &[0x01];
        let error = connection.accept_uni_stream(push).await.unwrap().unwrap_err();
        let error = error.downcast::<Http3Error>().unwrap();
        assert_eq!(error.protocol_error(), Some(&ProtocolError::UnexpectedPushStream));

        assert_eq!(commands.recv().await.unwrap(), TransportCommand::CloseConnection {
            code: ErrorCode::StreamCreationError,
            reason: ProtocolError::UnexpectedPushStream.to_string(),
        });
        assert!(connection.is_closed());
    }

    #[tokio::test]
    async fn closed_connection_cancels_request_streams() {
        let mut out = Vec::new();
        let (connection, _commands) = Http3Connection::start(Http3Limits::default(), &mut out).await.unwrap();
        let handle = connection.accept_request_stream(0);

        connection.close();

        let error = handle.join_handle.await.unwrap().unwrap_err();
        assert_eq!(error.code(), ErrorCode::RequestCancelled);
        assert!(!connection.wait_for_control_stream().await);
    }

    #[tokio::test]
    async fn stalled_stream_does_not_hold_up_the_control_stream() {
        let mut out = Vec::new();
        let (connection, _commands) = Http3Connection::start(Http3Limits::default(), &mut out).await.unwrap();

        // Opened but the stream type never arrives.
        let (_stalled_peer, stalled) = tokio::io::duplex(64);
        let stalled = connection.accept_uni_stream(stalled);

        let (mut peer, control) = tokio::io::duplex(64);
        peer.write_all(&[0x00, 0x04, 0x00]).await.unwrap();
        let control = connection.accept_uni_stream(control);

        let accepted = timeout(Duration::from_secs(5), control).await.unwrap().unwrap().unwrap();
        assert_eq!(accepted, Some(StreamType::Control));
        assert!(timeout(Duration::from_secs(5), connection.wait_for_control_stream()).await.unwrap());

        // Request streams can still be opened while the stalled stream waits.
        let request = connection.accept_request_stream(0);
        request.sender.send(RequestStreamMessage::EndHeaders).await.unwrap();
        assert!(request.join_handle.await.unwrap().unwrap().is_empty());

        assert!(!stalled.is_finished());
        connection.close();
        assert_eq!(stalled.await.unwrap().unwrap(), None);
    }
}
