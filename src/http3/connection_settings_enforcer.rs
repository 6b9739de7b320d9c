use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::debug;
use crate::http3::http3_errors::{ProtocolError, EXCEEDED_MAX_HEADER_LIST_SIZE};
use crate::http3::setting_registry::{SettingEffect, SettingIdentifier};

/// Limits the peer asked for, read by every request stream of a connection.
///
/// Only the control stream handler writes here. Readers never lock: each
/// value is a single atomic and is read fresh on every check, because a
/// request stream may start before the peer's SETTINGS have arrived.
#[derive(Debug)]
pub struct ConnectionSettingsEnforcer {
    // What we advertised ourselves. Fixed for the connection's lifetime.
    local_max_header_list_size: u64,
    max_header_list_size: AtomicU64,
    qpack_max_table_capacity: AtomicU64,
    qpack_blocked_streams: AtomicU64,
    extended_connect: AtomicBool,
}

impl Default for ConnectionSettingsEnforcer {
    fn default() -> Self {
        let default_of = |identifier: SettingIdentifier| identifier.default_value().unwrap_or(0);

        ConnectionSettingsEnforcer {
            local_max_header_list_size: default_of(SettingIdentifier::MaxHeaderListSize),
            max_header_list_size: AtomicU64::new(default_of(SettingIdentifier::MaxHeaderListSize)),
            qpack_max_table_capacity: AtomicU64::new(default_of(SettingIdentifier::QpackMaxTableCapacity)),
            qpack_blocked_streams: AtomicU64::new(default_of(SettingIdentifier::QpackBlockedStreams)),
            extended_connect: AtomicBool::new(default_of(SettingIdentifier::EnableConnectProtocol) == 1),
        }
    }
}

impl ConnectionSettingsEnforcer {

    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_local_header_list_size(size: u64) -> Self {
        ConnectionSettingsEnforcer {
            local_max_header_list_size: size,
            ..Self::default()
        }
    }

    /// The ceiling the peer advertised.
    pub fn max_header_list_size(&self) -> u64 {
        self.max_header_list_size.load(Ordering::Acquire)
    }

    /// The lower of our advertised ceiling and the peer's.
    pub fn header_list_limit(&self) -> u64 {
        self.local_max_header_list_size.min(self.max_header_list_size())
    }

    pub fn qpack_max_table_capacity(&self) -> u64 {
        self.qpack_max_table_capacity.load(Ordering::Acquire)
    }

    pub fn qpack_blocked_streams(&self) -> u64 {
        self.qpack_blocked_streams.load(Ordering::Acquire)
    }

    pub fn extended_connect_enabled(&self) -> bool {
        self.extended_connect.load(Ordering::Acquire)
    }

    pub(crate) fn apply(&self, effect: SettingEffect, value: u64) {
        match effect {
            SettingEffect::None => (),
            SettingEffect::HeaderListCeiling => {
                debug!("max header list size is now {}", value);
                self.max_header_list_size.store(value, Ordering::Release)
            },
            SettingEffect::QpackTableCapacity => self.qpack_max_table_capacity.store(value, Ordering::Release),
            SettingEffect::QpackBlockedStreams => self.qpack_blocked_streams.store(value, Ordering::Release),
            SettingEffect::ExtendedConnect => self.extended_connect.store(value == 1, Ordering::Release),
        }
    }

    pub fn check_header_list_size(&self, stream_id: u64, total_size: u64) -> Result<(), ProtocolError> {
        if total_size > self.header_list_limit() {
            return Err(ProtocolError::ExcessiveLoad {
                stream_id,
                reason: EXCEEDED_MAX_HEADER_LIST_SIZE.to_string(),
            });
        }
        Ok(())
    }
}
