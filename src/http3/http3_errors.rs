use thiserror::Error;

pub const EXCEEDED_MAX_HEADER_LIST_SIZE: &str = "Exceeded client request max header list size.";

// Error handling : https://www.rfc-editor.org/rfc/rfc9114.html#section-8
#[derive(Debug, Error)]
pub enum Http3Error {
    #[error("connection error {code:?}: {source}")]
    ConnectionError {
        code: ErrorCode,
        source: ProtocolError,
    },

    #[error("stream {stream_id} error {code:?}: {reason}")]
    StreamError {
        stream_id: u64,
        code: ErrorCode,
        reason: String,
    },
}

impl Http3Error {

    pub fn stream_error(stream_id: u64, code: ErrorCode, reason: impl Into<String>) -> Self {
        Http3Error::StreamError {
            stream_id,
            code,
            reason: reason.into(),
        }
    }

    /// Any protocol error observed on a control stream takes the whole
    /// connection down.
    pub fn connection_error(source: ProtocolError) -> Self {
        Http3Error::ConnectionError {
            code: source.code(),
            source,
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            Http3Error::ConnectionError { code, .. } => *code,
            Http3Error::StreamError { code, .. } => *code,
        }
    }

    pub fn is_connection_error(&self) -> bool {
        matches!(self, Http3Error::ConnectionError { .. })
    }

    pub fn protocol_error(&self) -> Option<&ProtocolError> {
        match self {
            Http3Error::ConnectionError { source, .. } => Some(source),
            Http3Error::StreamError { .. } => None,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SettingError {
    #[error("value {value} is out of range for setting {identifier:#x}")]
    OutOfRange { identifier: u64, value: u64 },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("expected a SETTINGS frame, got frame type {0:#x}")]
    UnexpectedFrame(u64),

    #[error("first frame on the control stream was not SETTINGS")]
    MissingSettings,

    #[error("SETTINGS frame received twice on the control stream")]
    SettingsAlreadyReceived,

    #[error("malformed frame: {0}")]
    FrameMalformed(&'static str),

    #[error("setting {0:#x} appears more than once in a SETTINGS frame")]
    DuplicateSetting(u64),

    #[error(transparent)]
    Setting(#[from] SettingError),

    #[error("control stream closed")]
    ClosedCriticalStream,

    #[error("peer opened a second control stream")]
    DuplicateControlStream,

    #[error("client opened a push stream")]
    UnexpectedPushStream,

    #[error("stream {stream_id}: {reason}")]
    ExcessiveLoad { stream_id: u64, reason: String },
}

impl ProtocolError {

    pub fn code(&self) -> ErrorCode {
        match self {
            ProtocolError::UnexpectedFrame(_) => ErrorCode::FrameUnexpected,
            ProtocolError::MissingSettings => ErrorCode::MissingSettings,
            ProtocolError::SettingsAlreadyReceived => ErrorCode::FrameUnexpected,
            ProtocolError::FrameMalformed(_) => ErrorCode::FrameError,
            ProtocolError::DuplicateSetting(_) => ErrorCode::SettingsError,
            ProtocolError::Setting(_) => ErrorCode::SettingsError,
            ProtocolError::ClosedCriticalStream => ErrorCode::ClosedCriticalStream,
            ProtocolError::DuplicateControlStream => ErrorCode::StreamCreationError,
            ProtocolError::UnexpectedPushStream => ErrorCode::StreamCreationError,
            // Same code the header parser resets the stream with.
            ProtocolError::ExcessiveLoad { .. } => ErrorCode::GeneralProtocolError,
        }
    }
}

impl From<ProtocolError> for Http3Error {
    fn from(value: ProtocolError) -> Self {
        match value {
            ProtocolError::ExcessiveLoad { stream_id, reason } => {
                Http3Error::stream_error(stream_id, ErrorCode::GeneralProtocolError, reason)
            }
            other => Http3Error::connection_error(other),
        }
    }
}

// Error Code : https://www.rfc-editor.org/rfc/rfc9114.html#section-8.1
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ErrorCode {
    NoError,
    GeneralProtocolError,
    InternalError,
    StreamCreationError,
    ClosedCriticalStream,
    FrameUnexpected,
    FrameError,
    ExcessiveLoad,
    IdError,
    SettingsError,
    MissingSettings,
    RequestRejected,
    RequestCancelled,
    RequestIncomplete,
    MessageError,
    ConnectError,
    VersionFallback,
}

impl From<ErrorCode> for u64 {
    fn from(value: ErrorCode) -> Self {
        match value {
            ErrorCode::NoError => 0x100,
            ErrorCode::GeneralProtocolError => 0x101,
            ErrorCode::InternalError => 0x102,
            ErrorCode::StreamCreationError => 0x103,
            ErrorCode::ClosedCriticalStream => 0x104,
            ErrorCode::FrameUnexpected => 0x105,
            ErrorCode::FrameError => 0x106,
            ErrorCode::ExcessiveLoad => 0x107,
            ErrorCode::IdError => 0x108,
            ErrorCode::SettingsError => 0x109,
            ErrorCode::MissingSettings => 0x10a,
            ErrorCode::RequestRejected => 0x10b,
            ErrorCode::RequestCancelled => 0x10c,
            ErrorCode::RequestIncomplete => 0x10d,
            ErrorCode::MessageError => 0x10e,
            ErrorCode::ConnectError => 0x10f,
            ErrorCode::VersionFallback => 0x110,
        }
    }
}
