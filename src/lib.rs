pub mod http3;

pub use http3::connection_settings_enforcer::ConnectionSettingsEnforcer;
pub use http3::control_stream_handler::{ControlStreamHandler, ControlStreamState};
pub use http3::http3_conn_options::{Http3Limits, Http3LimitsBuilder};
pub use http3::http3_connection::{Http3Connection, RequestStreamHandle, TransportCommand};
pub use http3::http3_errors::{ErrorCode, Http3Error, ProtocolError, SettingError};
pub use http3::http3_request_stream::{HeaderField, HeaderListAccumulator, RequestStreamMessage};
pub use http3::peer_settings::PeerSettings;
pub use http3::setting_registry::{Setting, SettingIdentifier};
