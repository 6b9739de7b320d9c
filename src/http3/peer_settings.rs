use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::debug;
use crate::http3::connection_settings_enforcer::ConnectionSettingsEnforcer;
use crate::http3::http3_conn_options::Http3Limits;
use crate::http3::http3_errors::SettingError;
use crate::http3::setting_registry::{Setting, SettingIdentifier};

/// Setting values for one direction of a connection.
///
/// The local instance describes what we advertise. The remote instance is
/// bound to the connection's [`ConnectionSettingsEnforcer`] so that every
/// accepted value immediately takes effect on request streams.
#[derive(Debug, Default)]
pub struct PeerSettings {
    values: BTreeMap<u64, u64>,
    enforcer: Option<Arc<ConnectionSettingsEnforcer>>,
    observers: Vec<UnboundedSender<Setting>>,
}

impl PeerSettings {

    pub fn new() -> Self {
        Self::default()
    }

    pub fn local(limits: &Http3Limits) -> Result<Self, SettingError> {
        let mut settings = PeerSettings::new();
        settings.set(SettingIdentifier::MaxHeaderListSize, limits.max_request_headers_total_size())?;
        settings.set(SettingIdentifier::QpackMaxTableCapacity, limits.qpack_max_table_capacity())?;
        settings.set(SettingIdentifier::QpackBlockedStreams, limits.qpack_blocked_streams())?;
        settings.set(SettingIdentifier::EnableConnectProtocol, limits.enable_connect_protocol() as u64)?;
        Ok(settings)
    }

    pub fn remote(enforcer: Arc<ConnectionSettingsEnforcer>) -> Self {
        PeerSettings {
            enforcer: Some(enforcer),
            ..Self::default()
        }
    }

    /// Every accepted setting is also sent to the returned receiver.
    pub fn subscribe(&mut self) -> UnboundedReceiver<Setting> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.observers.push(tx);
        rx
    }

    /// The enforcer sees the new value before the mapping changes, and both
    /// happen under `&mut self`, so nobody reads one without the other.
    pub fn set(&mut self, identifier: SettingIdentifier, value: u64) -> Result<(), SettingError> {
        identifier.validate(value)?;
        let setting = Setting::new(identifier, value)?;

        match identifier.rule() {
            Some(rule) => {
                if let Some(enforcer) = &self.enforcer {
                    enforcer.apply(rule.effect, value);
                }
                debug!("{} set to {}", rule.name, value);
            },
            None => {
                //    Setting identifiers of the format 0x1f * N + 0x21 ... are
                //    reserved. Implementations MUST ignore any parameter with an
                //    identifier they do not understand.
                debug!("storing unknown setting {:#x} = {}", identifier.code(), value);
            }
        }

        self.values.insert(identifier.code(), value);
        self.observers.retain(|tx| tx.send(setting).is_ok());
        Ok(())
    }

    pub fn get(&self, identifier: SettingIdentifier) -> u64 {
        self.values
            .get(&identifier.code())
            .copied()
            .or_else(|| identifier.default_value())
            .unwrap_or(0)
    }

    /// Only values that were actually received or configured, unknown ones
    /// included.
    pub fn get_raw(&self, code: u64) -> Option<u64> {
        self.values.get(&code).copied()
    }

    pub fn get_non_default_parameters(&self) -> Vec<Setting> {
        self.values
            .iter()
            .map(|(code, value)| (SettingIdentifier::from_code(*code), *value))
            .filter(|(identifier, value)| identifier.default_value() != Some(*value))
            .filter_map(|(identifier, value)| Setting::new(identifier, value).ok())
            .collect()
    }

    pub fn max_header_list_size(&self) -> u64 {
        self.get(SettingIdentifier::MaxHeaderListSize)
    }
}
