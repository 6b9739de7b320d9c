use crate::http3::http3_errors::SettingError;
use crate::http3::varint::MAX_VARINT;

// https://www.rfc-editor.org/rfc/rfc9114.html#section-7.2.4.1
const QPACK_MAX_TABLE_CAPACITY: u64 = 0x01;
const MAX_FIELD_SECTION_SIZE: u64 = 0x06;
const QPACK_BLOCKED_STREAMS: u64 = 0x07;
// https://www.rfc-editor.org/rfc/rfc9220.html#section-5
const ENABLE_CONNECT_PROTOCOL: u64 = 0x08;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SettingIdentifier {
    QpackMaxTableCapacity,
    /// SETTINGS_MAX_FIELD_SECTION_SIZE, the max header list size.
    MaxHeaderListSize,
    QpackBlockedStreams,
    EnableConnectProtocol,
    /// HTTP/2 identifiers 0x02..=0x05 have no meaning in HTTP/3.
    ReservedHttp2(u64),
    Unknown(u64),
}

/// What a newly accepted value changes on the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingEffect {
    None,
    HeaderListCeiling,
    QpackTableCapacity,
    QpackBlockedStreams,
    ExtendedConnect,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueRange {
    Between(u64, u64),
    Forbidden,
}

impl ValueRange {
    pub fn contains(&self, value: u64) -> bool {
        match *self {
            ValueRange::Between(min, max) => min <= value && value <= max,
            ValueRange::Forbidden => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SettingRule {
    pub name: &'static str,
    pub default: u64,
    pub range: ValueRange,
    pub effect: SettingEffect,
}

const ANY_VALUE: ValueRange = ValueRange::Between(0, MAX_VARINT);

const QPACK_MAX_TABLE_CAPACITY_RULE: SettingRule = SettingRule {
    name: "SETTINGS_QPACK_MAX_TABLE_CAPACITY",
    default: 0,
    range: ANY_VALUE,
    effect: SettingEffect::QpackTableCapacity,
};

// The initial value is unlimited.
const MAX_HEADER_LIST_SIZE_RULE: SettingRule = SettingRule {
    name: "SETTINGS_MAX_FIELD_SECTION_SIZE",
    default: MAX_VARINT,
    range: ANY_VALUE,
    effect: SettingEffect::HeaderListCeiling,
};

const QPACK_BLOCKED_STREAMS_RULE: SettingRule = SettingRule {
    name: "SETTINGS_QPACK_BLOCKED_STREAMS",
    default: 0,
    range: ANY_VALUE,
    effect: SettingEffect::QpackBlockedStreams,
};

const ENABLE_CONNECT_PROTOCOL_RULE: SettingRule = SettingRule {
    name: "SETTINGS_ENABLE_CONNECT_PROTOCOL",
    default: 0,
    range: ValueRange::Between(0, 1),
    effect: SettingEffect::ExtendedConnect,
};

//    Setting identifiers that were defined in [HTTP/2] where there is no
//    corresponding HTTP/3 setting have also been reserved. These reserved
//    settings MUST NOT be sent, and their receipt MUST be treated as a
//    connection error of type H3_SETTINGS_ERROR.
const RESERVED_HTTP2_RULE: SettingRule = SettingRule {
    name: "reserved HTTP/2 setting",
    default: 0,
    range: ValueRange::Forbidden,
    effect: SettingEffect::None,
};

impl SettingIdentifier {

    pub fn from_code(code: u64) -> Self {
        match code {
            QPACK_MAX_TABLE_CAPACITY => SettingIdentifier::QpackMaxTableCapacity,
            MAX_FIELD_SECTION_SIZE => SettingIdentifier::MaxHeaderListSize,
            QPACK_BLOCKED_STREAMS => SettingIdentifier::QpackBlockedStreams,
            ENABLE_CONNECT_PROTOCOL => SettingIdentifier::EnableConnectProtocol,
            0x02..=0x05 => SettingIdentifier::ReservedHttp2(code),
            _ => SettingIdentifier::Unknown(code),
        }
    }

    pub fn code(&self) -> u64 {
        match *self {
            SettingIdentifier::QpackMaxTableCapacity => QPACK_MAX_TABLE_CAPACITY,
            SettingIdentifier::MaxHeaderListSize => MAX_FIELD_SECTION_SIZE,
            SettingIdentifier::QpackBlockedStreams => QPACK_BLOCKED_STREAMS,
            SettingIdentifier::EnableConnectProtocol => ENABLE_CONNECT_PROTOCOL,
            SettingIdentifier::ReservedHttp2(code) => code,
            SettingIdentifier::Unknown(code) => code,
        }
    }

    /// `None` for identifiers this endpoint does not understand.
    pub fn rule(&self) -> Option<&'static SettingRule> {
        match self {
            SettingIdentifier::QpackMaxTableCapacity => Some(&QPACK_MAX_TABLE_CAPACITY_RULE),
            SettingIdentifier::MaxHeaderListSize => Some(&MAX_HEADER_LIST_SIZE_RULE),
            SettingIdentifier::QpackBlockedStreams => Some(&QPACK_BLOCKED_STREAMS_RULE),
            SettingIdentifier::EnableConnectProtocol => Some(&ENABLE_CONNECT_PROTOCOL_RULE),
            SettingIdentifier::ReservedHttp2(_) => Some(&RESERVED_HTTP2_RULE),
            SettingIdentifier::Unknown(_) => None,
        }
    }

    pub fn is_recognized(&self) -> bool {
        self.rule().is_some()
    }

    pub fn default_value(&self) -> Option<u64> {
        self.rule().map(|rule| rule.default)
    }

    /// Unknown identifiers accept any value the wire can carry.
    pub fn validate(&self, value: u64) -> Result<(), SettingError> {
        let range = self.rule().map_or(ANY_VALUE, |rule| rule.range);
        if range.contains(value) {
            Ok(())
        } else {
            Err(SettingError::OutOfRange { identifier: self.code(), value })
        }
    }
}

impl From<u64> for SettingIdentifier {
    fn from(value: u64) -> Self {
        SettingIdentifier::from_code(value)
    }
}

impl From<SettingIdentifier> for u64 {
    fn from(value: SettingIdentifier) -> Self {
        value.code()
    }
}

/// One (identifier, value) pair. Both halves always fit in a varint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Setting {
    identifier: SettingIdentifier,
    value: u64,
}

impl Setting {

    pub fn new(identifier: SettingIdentifier, value: u64) -> Result<Self, SettingError> {
        if value > MAX_VARINT || identifier.code() > MAX_VARINT {
            return Err(SettingError::OutOfRange { identifier: identifier.code(), value });
        }
        Ok(Setting { identifier, value })
    }

    // Values decoded off the wire are bounded by the varint encoding.
    pub(crate) fn from_wire(code: u64, value: u64) -> Self {
        Setting { identifier: SettingIdentifier::from_code(code), value }
    }

    pub fn identifier(&self) -> SettingIdentifier {
        self.identifier
    }

    pub fn value(&self) -> u64 {
        self.value
    }
}
