/// Limits this endpoint advertises to its peer. The header list size is
/// also enforced on incoming requests, together with the peer's own ceiling.
#[derive(Debug, Clone)]
pub struct Http3Limits {
    max_request_headers_total_size: u64,
    qpack_max_table_capacity: u64,
    qpack_blocked_streams: u64,
    enable_connect_protocol: bool,
    max_control_frame_size: u64,
}

impl Default for Http3Limits {
    fn default() -> Self {
        Http3Limits {
            max_request_headers_total_size: 32 * 1024,
            qpack_max_table_capacity: 0,
            qpack_blocked_streams: 0,
            enable_connect_protocol: false,
            max_control_frame_size: 16 * 1024,
        }
    }
}

impl Http3Limits {

    pub fn builder() -> Http3LimitsBuilder {
        Http3LimitsBuilder::new()
    }

    pub fn max_request_headers_total_size(&self) -> u64 {
        self.max_request_headers_total_size
    }

    pub fn qpack_max_table_capacity(&self) -> u64 {
        self.qpack_max_table_capacity
    }

    pub fn qpack_blocked_streams(&self) -> u64 {
        self.qpack_blocked_streams
    }

    pub fn enable_connect_protocol(&self) -> bool {
        self.enable_connect_protocol
    }

    pub fn max_control_frame_size(&self) -> u64 {
        self.max_control_frame_size
    }
}

pub struct Http3LimitsBuilder {
    max_request_headers_total_size: Option<u64>,
    qpack_max_table_capacity: Option<u64>,
    qpack_blocked_streams: Option<u64>,
    enable_connect_protocol: Option<bool>,
    max_control_frame_size: Option<u64>,
}

impl Http3LimitsBuilder {

    pub fn new() -> Self {
        Http3LimitsBuilder {
            max_request_headers_total_size: None,
            qpack_max_table_capacity: None,
            qpack_blocked_streams: None,
            enable_connect_protocol: None,
            max_control_frame_size: None,
        }
    }

    pub fn max_request_headers_total_size(&mut self, size: u64) -> &mut Self {
        self.max_request_headers_total_size.replace(size);
        self
    }

    pub fn qpack_max_table_capacity(&mut self, capacity: u64) -> &mut Self {
        self.qpack_max_table_capacity.replace(capacity);
        self
    }

    pub fn qpack_blocked_streams(&mut self, streams: u64) -> &mut Self {
        self.qpack_blocked_streams.replace(streams);
        self
    }

    pub fn enable_connect_protocol(&mut self, enable: bool) -> &mut Self {
        self.enable_connect_protocol.replace(enable);
        self
    }

    pub fn max_control_frame_size(&mut self, size: u64) -> &mut Self {
        self.max_control_frame_size.replace(size);
        self
    }

    pub fn build(&self) -> Http3Limits {
        let defaults = Http3Limits::default();
        Http3Limits {
            max_request_headers_total_size: self.max_request_headers_total_size
                .unwrap_or(defaults.max_request_headers_total_size),
            qpack_max_table_capacity: self.qpack_max_table_capacity
                .unwrap_or(defaults.qpack_max_table_capacity),
            qpack_blocked_streams: self.qpack_blocked_streams
                .unwrap_or(defaults.qpack_blocked_streams),
            enable_connect_protocol: self.enable_connect_protocol
                .unwrap_or(defaults.enable_connect_protocol),
            max_control_frame_size: self.max_control_frame_size
                .unwrap_or(defaults.max_control_frame_size),
        }
    }
}

impl Default for Http3LimitsBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_keeps_defaults_for_unset_fields() {
        let limits = Http3Limits::builder()
            .max_request_headers_total_size(1024)
            .enable_connect_protocol(true)
            .build();

        assert_eq!(limits.max_request_headers_total_size(), 1024);
        assert!(limits.enable_connect_protocol());
        assert_eq!(limits.qpack_max_table_capacity(), 0);
        assert_eq!(limits.max_control_frame_size(), 16 * 1024);
    }
}
