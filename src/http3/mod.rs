pub mod connection_settings_enforcer;
pub mod control_stream_handler;
pub mod frame_settings;
pub mod http3_conn_options;
pub mod http3_connection;
pub mod http3_errors;
pub mod http3_frame;
pub mod http3_reader;
pub mod http3_request_stream;
pub mod peer_settings;
pub mod setting_registry;
pub mod varint;
