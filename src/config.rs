//! Configuration constants for the gateway firmware

/// CPU frequency in Hz
pub const CPU_FREQ_HZ: u32 = 16_000_000;

/// RS-485 bus baud rate
pub const RS485_BAUD: u32 = 9600;

/// Modem AT-command UART baud rate
pub const MODEM_BAUD: u32 = 115_200;

/// Capacity of each UART receive ring (one slot always stays empty)
pub const RX_RING_CAPACITY: usize = 256;

/// Capacity of each inter-task relay queue
pub const RELAY_QUEUE_CAPACITY: usize = 256;

/// Bounded AT response accumulator
pub const AT_RESPONSE_CAPACITY: usize = 512;

/// Line buffer used while scanning for unsolicited result codes
pub const URC_LINE_CAPACITY: usize = 256;

/// Longest in-band command considered for matching
pub const COMMAND_CAPACITY: usize = 128;

/// Transceiver settle time after switching to transmit
pub const DIRECTION_SETTLE_MS: u32 = 1;

/// Hold time before switching back to receive
pub const TRAILING_SETTLE_MS: u32 = 2;

/// RS-485 transmit burst ends after this long without a byte
pub const TX_QUIET_WINDOW_MS: u32 = 10;

/// Quiet period that completes an expected-substring wait
pub const AT_QUIET_PERIOD_MS: u32 = 100;

/// Default server the gateway dials at boot
pub const TCP_SERVER_HOST: &str = "2401:ce00:c5af:75d0::f8a";
pub const TCP_SERVER_PORT: u16 = 18655;
pub const TCP_SOCKET_ID: u8 = 0;

/// Runtime view of the build-time defaults above.
///
/// Boards and tests override single fields with struct update syntax:
/// `GatewayConfig { socket_id: 1, ..GatewayConfig::DEFAULT }`.
#[derive(Debug, Clone, Copy)]
pub struct GatewayConfig {
    pub server_host: &'static str,
    pub server_port: u16,
    pub socket_id: u8,
    /// Modem power-on hold, one progress mark per second
    pub power_on_seconds: u8,
    pub self_test_attempts: u8,
    pub self_test_timeout_ms: u32,
    pub self_test_retry_delay_ms: u32,
    pub registration_attempts: u8,
    pub registration_timeout_ms: u32,
    pub registration_interval_ms: u32,
    pub operator_timeout_ms: u32,
    pub activation_timeout_ms: u32,
    /// Silent wait for address assignment before querying it
    pub ip_assign_wait_ms: u32,
    pub ip_query_timeout_ms: u32,
    pub socket_close_timeout_ms: u32,
    /// Notification routing (`AT+QURCCFG`) before the socket opens
    pub urc_config_timeout_ms: u32,
    pub socket_open_timeout_ms: u32,
    pub socket_notify_timeout_ms: u32,
    /// Delay between a receive notification and the data read
    pub urc_settle_ms: u32,
    /// Largest payload requested per read
    pub read_max_len: u16,
    pub read_timeout_ms: u32,
}

impl GatewayConfig {
    pub const DEFAULT: GatewayConfig = GatewayConfig {
        server_host: TCP_SERVER_HOST,
        server_port: TCP_SERVER_PORT,
        socket_id: TCP_SOCKET_ID,
        power_on_seconds: 15,
        self_test_attempts: 3,
        self_test_timeout_ms: 2000,
        self_test_retry_delay_ms: 500,
        registration_attempts: 20,
        registration_timeout_ms: 2000,
        registration_interval_ms: 2000,
        operator_timeout_ms: 3000,
        activation_timeout_ms: 15_000,
        ip_assign_wait_ms: 10_000,
        ip_query_timeout_ms: 3000,
        socket_close_timeout_ms: 2000,
        urc_config_timeout_ms: 2000,
        socket_open_timeout_ms: 5000,
        socket_notify_timeout_ms: 30_000,
        urc_settle_ms: 50,
        read_max_len: 256,
        // 2s collection window plus the module's processing allowance
        read_timeout_ms: 2100,
    };
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}
