use std::sync::Arc;
use bytes::Bytes;
use tokio::select;
use tokio::sync::mpsc::{Receiver, Sender};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use crate::http3::connection_settings_enforcer::ConnectionSettingsEnforcer;
use crate::http3::http3_connection::TransportCommand;
use crate::http3::http3_errors::{ErrorCode, Http3Error, ProtocolError};

// https://www.rfc-editor.org/rfc/rfc9114.html#section-4.2.2
//
//    The size of a field list is calculated based on the uncompressed size of
//    fields, including the length of the name and value in bytes plus an
//    overhead of 32 bytes for each field.
const FIELD_OVERHEAD: u64 = 32;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderField {
    pub name: Bytes,
    pub value: Bytes,
}

impl HeaderField {

    pub fn new(name: impl Into<Bytes>, value: impl Into<Bytes>) -> Self {
        HeaderField {
            name: name.into(),
            value: value.into(),
        }
    }

    pub fn size(&self) -> u64 {
        self.name.len() as u64 + self.value.len() as u64 + FIELD_OVERHEAD
    }
}

/// Running size of one request's header list.
pub struct HeaderListAccumulator {
    stream_id: u64,
    total_size: u64,
    enforcer: Arc<ConnectionSettingsEnforcer>,
}

impl HeaderListAccumulator {

    pub fn new(stream_id: u64, enforcer: Arc<ConnectionSettingsEnforcer>) -> Self {
        HeaderListAccumulator { stream_id, total_size: 0, enforcer }
    }

    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    // The ceiling is read again for every field, so a SETTINGS frame that
    // lands in the middle of a header block applies to the rest of it.
    pub fn on_header(&mut self, field: &HeaderField) -> Result<(), ProtocolError> {
        self.total_size = self.total_size.saturating_add(field.size());
        self.enforcer.check_header_list_size(self.stream_id, self.total_size)
    }
}

/// Decoded header fields handed over by the QPACK decoder.
#[derive(Debug)]
pub enum RequestStreamMessage {
    HeaderField(HeaderField),
    EndHeaders,
}

pub struct Http3RequestStream {
    stream_id: u64,
    receiver: Receiver<RequestStreamMessage>,
    transport: Sender<TransportCommand>,
    token: CancellationToken,
    accumulator: HeaderListAccumulator,
}

impl Http3RequestStream {

    pub fn new(stream_id: u64,
               receiver: Receiver<RequestStreamMessage>,
               transport: Sender<TransportCommand>,
               enforcer: Arc<ConnectionSettingsEnforcer>,
               token: CancellationToken) -> Self {
        Http3RequestStream {
            stream_id,
            receiver,
            transport,
            token,
            accumulator: HeaderListAccumulator::new(stream_id, enforcer),
        }
    }

    /// Collects one header block. Going over the peer's limit resets only
    /// this stream.
    pub async fn serve(mut self) -> Result<Vec<HeaderField>, Http3Error> {
        let mut fields = Vec::new();

        loop {
            select! {
                biased;

                _ = self.token.cancelled() => {
                    debug!("request stream {} is cancelled.", self.stream_id);
                    return Err(Http3Error::stream_error(self.stream_id, ErrorCode::RequestCancelled, "connection is closing"));
                }

                message = self.receiver.recv() => {
                    match message {
                        Some(RequestStreamMessage::HeaderField(field)) => {
                            if let Err(e) = self.accumulator.on_header(&field) {
                                return Err(self.reset(e).await);
                            }
                            fields.push(field);
                        },
                        Some(RequestStreamMessage::EndHeaders) => {
                            debug!("stream {} header list is {} bytes", self.stream_id, self.accumulator.total_size());
                            return Ok(fields);
                        },
                        None => {
                            return Err(Http3Error::stream_error(self.stream_id, ErrorCode::RequestIncomplete, "header block ended early"));
                        },
                    }
                }
            }
        }
    }

    async fn reset(&self, error: ProtocolError) -> Http3Error {
        let error = Http3Error::from(error);
        if let Http3Error::StreamError { stream_id, code, reason } = &error {
            warn!("resetting stream {}: {}", stream_id, reason);
            let command = TransportCommand::ResetStream {
                stream_id: *stream_id,
                code: *code,
                reason: reason.clone(),
            };
            if self.transport.send(command).await.is_err() {
                debug!("transport is gone, dropping reset of stream {}", stream_id);
            }
        }
        self.token.cancel();
        error
    }
}
