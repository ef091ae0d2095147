//! Quectel RG200U session controller.
//!
//! Runs the one-shot bring-up sequence (power hold, self-test, registration,
//! operator, data context, addresses), opens the TCP socket and afterwards
//! serves socket reads and closes through the shared AT engine.

use embedded_hal::serial;
use heapless::String;
use ufmt::{uWrite, uwrite};

use crate::config::GatewayConfig;
use crate::os::Timebase;
use crate::protocol::at::{AtEngine, AtResponse, Completion, Termination};
use crate::protocol::qird::{self, ReadOutcome};
use crate::protocol::{find, parse_pair_after};

pub const OPERATOR_CAPACITY: usize = 64;
pub const IPV4_CAPACITY: usize = 32;
pub const IPV6_CAPACITY: usize = 64;
const COMMAND_LINE_CAPACITY: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessTechnology {
    Nr5g,
    Lte,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextStatus {
    NotAttempted,
    Activated,
    /// Activation answered `ERROR`, taken as already up
    AlreadyActive,
    Timeout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectError {
    /// Open command got no `OK`
    CommandFailed(Termination),
    /// No `+QIOPEN:` within the notification budget
    NoOpenNotification,
    /// Modem reported a nonzero socket error
    Socket { code: u16, reason: &'static str },
    /// `+QIOPEN:` present but unreadable
    Malformed,
    /// Bring-up stopped before the socket step
    Skipped,
}

/// Outcome of the bring-up sequence
#[derive(Debug, Clone)]
pub struct BootReport {
    pub self_test: bool,
    pub registration: Option<AccessTechnology>,
    pub operator: String<OPERATOR_CAPACITY>,
    pub context: ContextStatus,
    pub ipv4: String<IPV4_CAPACITY>,
    pub ipv6: String<IPV6_CAPACITY>,
    pub link: Result<(), ConnectError>,
}

impl BootReport {
    fn new() -> Self {
        Self {
            self_test: false,
            registration: None,
            operator: fixed("Unknown"),
            context: ContextStatus::NotAttempted,
            ipv4: fixed("0.0.0.0"),
            ipv6: fixed("::"),
            link: Err(ConnectError::Skipped),
        }
    }
}

/// Power control of the modem command UART. The UART is held down while the
/// module boots so its start-up noise never reaches the receive ring.
pub trait UartControl {
    fn shutdown(&mut self);
    fn restart(&mut self);
}

/// Human-readable reason for a socket error code
pub fn socket_error_reason(code: u16) -> &'static str {
    match code {
        0 => "Operation success",
        550 => "Unknown error",
        551 => "Operation blocked",
        552 => "Invalid parameters",
        553 => "Memory not enough",
        554 => "Socket creation failed",
        555 => "Operation not supported",
        556 => "Socket bind failed",
        557 => "Socket listen failed",
        558 => "Socket write failed",
        559 => "Socket read failed",
        560 => "Socket accept failed",
        561 => "PDP context opening failed",
        562 => "PDP context closure failed",
        563 => "Socket identity has been used",
        564 => "DNS busy",
        565 => "DNS parse failed",
        566 => "Socket connect failed",
        567 => "Socket has been closed",
        568 => "Operation busy",
        569 => "Operation timeout",
        570 => "PDP context broken down",
        571 => "Cancel sending",
        572 => "Operation not allowed",
        573 => "APN not configured",
        574 => "Port busy",
        _ => "Unknown",
    }
}

pub struct ModemSession<'a, TX, T> {
    at: AtEngine<'a, TX, T>,
    config: GatewayConfig,
    state: SessionState,
}

impl<'a, TX, T> ModemSession<'a, TX, T>
where
    TX: serial::Write<u8>,
    T: Timebase,
{
    pub fn new(at: AtEngine<'a, TX, T>, config: GatewayConfig) -> Self {
        Self {
            at,
            config,
            state: SessionState::Disconnected,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn engine(&mut self) -> &mut AtEngine<'a, TX, T> {
        &mut self.at
    }

    fn set_state(&mut self, state: SessionState) {
        if self.state != state {
            log::info!("session {:?} -> {:?}", self.state, state);
            self.state = state;
        }
    }

    /// Whole boot sequence including the socket. Progress text goes to `out`.
    pub fn bring_up<U, W>(&mut self, uart: &mut U, out: &mut W) -> BootReport
    where
        U: UartControl,
        W: uWrite,
    {
        let mut report = BootReport::new();
        self.power_sequence(uart, out);

        say(out, "=== RG200U 4G Module Self-Test ===\r\n\r\n");
        report.self_test = self.self_test(out);
        if report.self_test {
            report.registration = self.wait_for_registration(out);
            if let Some(operator) = self.query_operator(out) {
                report.operator = operator;
            }
            report.context = self.activate_context(out);
            self.query_addresses(&mut report, out);
        } else {
            say(out, "\r\nError: RG200U not responding!\r\n");
        }

        print_summary(&report, out);
        self.at.delay_ms(10);
        // Leftover command replies must not reach the relay path
        self.at.discard_pending();

        if report.self_test {
            say(out, "\r\n[TCP] Connecting to server...\r\n");
            report.link = self.connect_tcp_server(out);
            match report.link {
                Ok(()) => {
                    let _ = uwrite!(
                        out,
                        "[TCP] Connected to {}:{}\r\n[TCP] TCP transparent mode enabled.\r\n",
                        self.config.server_host,
                        self.config.server_port
                    );
                }
                Err(_) => say(out, "[TCP] Connection failed!\r\n"),
            }
            say(out, "\r\n");
            self.at.delay_ms(10);
        }
        report
    }

    /// Holds the modem UART down for the power-on window, drawing one
    /// progress mark per second, then brings it back with an empty ring
    pub fn power_sequence<U, W>(&mut self, uart: &mut U, out: &mut W)
    where
        U: UartControl,
        W: uWrite,
    {
        uart.shutdown();
        say(out, "\r\n==================================\r\n");
        say(out, "  RG200U 4G Gateway Starting...\r\n");
        say(out, "==================================\r\n");
        say(out, "Hardware boot: [");
        for _ in 0..self.config.power_on_seconds {
            self.at.delay_ms(1000);
            say(out, "=");
        }
        say(out, "] Done\r\n\r\n");
        uart.restart();
        self.at.delay_ms(100);
        self.at.discard_pending();
    }

    /// `AT` probe; true on the first reply carrying `OK`
    pub fn self_test<W: uWrite>(&mut self, out: &mut W) -> bool {
        say(out, "[1/5] Testing AT command...");
        for _ in 0..self.config.self_test_attempts {
            let response = self.at.send_command("AT\r\n", self.config.self_test_timeout_ms);
            if response.is_success() && response.contains("OK") {
                say(out, " OK\r\n");
                return true;
            }
            self.at.delay_ms(self.config.self_test_retry_delay_ms);
        }
        log::error!("modem self-test failed");
        say(out, " FAILED\r\n");
        false
    }

    /// Polls 5G then LTE registration until either reports home or roaming
    pub fn wait_for_registration<W: uWrite>(&mut self, out: &mut W) -> Option<AccessTechnology> {
        say(out, "[2/5] Checking network registration...");
        let queries = [
            ("AT+C5GREG?\r\n", "+C5GREG:", AccessTechnology::Nr5g, " Registered (5G)\r\n"),
            ("AT+CEREG?\r\n", "+CEREG:", AccessTechnology::Lte, " Registered (4G)\r\n"),
        ];
        for _ in 0..self.config.registration_attempts {
            for (command, tag, technology, banner) in queries {
                let response = self.at.send_command(command, self.config.registration_timeout_ms);
                if response.is_success() && is_registered(&response, tag) {
                    say(out, banner);
                    return Some(technology);
                }
            }
            say(out, ".");
            self.at.delay_ms(self.config.registration_interval_ms);
        }
        log::warn!("network registration not reached");
        say(out, " FAILED (not registered)\r\n");
        None
    }

    pub fn query_operator<W: uWrite>(&mut self, out: &mut W) -> Option<String<OPERATOR_CAPACITY>> {
        say(out, "[3/5] Querying operator...");
        let response = self.at.send_command("AT+COPS?\r\n", self.config.operator_timeout_ms);
        if !response.is_success() {
            say(out, " Timeout\r\n");
            return None;
        }
        let operator = parse_operator(response.as_bytes());
        let shown = operator.as_ref().map_or("Unknown", |name| name.as_str());
        let _ = uwrite!(out, " {}\r\n", shown);
        operator
    }

    pub fn activate_context<W: uWrite>(&mut self, out: &mut W) -> ContextStatus {
        say(out, "[4/5] Activating data connection...");
        let response = self
            .at
            .send_command("AT+QNETDEVCTL=1,1,1\r\n", self.config.activation_timeout_ms);
        match response.termination() {
            Termination::Ok => {
                say(out, " OK\r\n");
                ContextStatus::Activated
            }
            Termination::Error => {
                say(out, " Already active\r\n");
                ContextStatus::AlreadyActive
            }
            _ => {
                say(out, " Timeout\r\n");
                ContextStatus::Timeout
            }
        }
    }

    /// Waits for address assignment, then fills the report's addresses
    pub fn query_addresses<W: uWrite>(&mut self, report: &mut BootReport, out: &mut W) {
        say(out, "[5/5] Querying IP address...");
        self.at.delay_ms(self.config.ip_assign_wait_ms);
        let response = self.at.send_command("AT+CGPADDR\r\n", self.config.ip_query_timeout_ms);
        if !response.is_success() {
            say(out, " Timeout\r\n");
            return;
        }
        let (ipv4, ipv6) = parse_addresses(response.as_bytes());
        if let Some(ipv4) = ipv4 {
            report.ipv4 = ipv4;
        }
        if let Some(ipv6) = ipv6 {
            report.ipv6 = ipv6;
        }
        say(out, " OK\r\n");
    }

    /// Closes any stale socket, routes notifications to every port and opens
    /// the configured TCP connection. Connected only after both the `OK` and
    /// a zero-error `+QIOPEN:` notification.
    pub fn connect_tcp_server<W: uWrite>(&mut self, out: &mut W) -> Result<(), ConnectError> {
        self.at.discard_pending();
        let close = self.close_command();
        self.at.send_command(&close, self.config.socket_close_timeout_ms);
        self.at.send_command(
            "AT+QURCCFG=\"urcport\",\"all\"\r\n",
            self.config.urc_config_timeout_ms,
        );

        let mut open: String<COMMAND_LINE_CAPACITY> = String::new();
        let _ = uwrite!(
            &mut open,
            "AT+QIOPEN=1,{},\"TCP\",\"{}\",{},0,0\r\n",
            self.config.socket_id,
            self.config.server_host,
            self.config.server_port
        );

        self.set_state(SessionState::Connecting);
        let result = self.open_socket(&open);
        match result {
            Ok(()) => {
                self.set_state(SessionState::Connected);
                self.at.discard_pending();
            }
            Err(error) => {
                log::error!("socket open failed: {:?}", error);
                if let ConnectError::Socket { code, reason } = error {
                    let _ = uwrite!(out, "[ERROR] Connection failed with code {} ({})\r\n", code, reason);
                }
                self.set_state(SessionState::Error);
            }
        }
        result
    }

    fn open_socket(&mut self, command: &str) -> Result<(), ConnectError> {
        let reply = self.at.send_command(command, self.config.socket_open_timeout_ms);
        if !reply.is_success() || !reply.contains("OK") {
            return Err(ConnectError::CommandFailed(reply.termination()));
        }
        let notification = self
            .at
            .wait_for_response("+QIOPEN:", self.config.socket_notify_timeout_ms);
        if !notification.is_success() {
            return Err(ConnectError::NoOpenNotification);
        }
        let (_, code) =
            parse_pair_after(notification.as_bytes(), b"+QIOPEN:").ok_or(ConnectError::Malformed)?;
        match u16::try_from(code) {
            Ok(0) => Ok(()),
            Ok(code) => Err(ConnectError::Socket {
                code,
                reason: socket_error_reason(code),
            }),
            Err(_) => Err(ConnectError::Malformed),
        }
    }

    /// `AT+QIRD=<id>,<max>` for the configured socket
    pub fn read_command(&self) -> String<32> {
        let mut command = String::new();
        let _ = uwrite!(&mut command, "AT+QIRD={},{}\r\n", self.config.socket_id, self.config.read_max_len);
        command
    }

    /// Starts a socket read without blocking; collect it with `poll_read`
    pub fn start_read(&mut self) {
        let command = self.read_command();
        self.at
            .start(&command, Completion::Terminator, self.config.read_timeout_ms);
    }

    pub fn poll_read(&mut self) -> Option<AtResponse> {
        self.at.poll()
    }

    /// Blocking socket read into `buffer`; returns the payload length
    pub fn read_data(&mut self, buffer: &mut [u8]) -> usize {
        self.start_read();
        let response = loop {
            if let Some(response) = self.at.poll() {
                break response;
            }
            self.at.delay_ms(1);
        };
        copy_payload(&response, self.config.read_max_len as usize, buffer)
    }

    /// Closes the socket; the session is disconnected whatever the reply
    pub fn close(&mut self) -> bool {
        let command = self.close_command();
        let response = self.at.send_command(&command, self.config.socket_close_timeout_ms);
        self.set_state(SessionState::Disconnected);
        response.is_ok()
    }

    /// The modem reported `socket` closed by the peer or the network
    pub fn on_socket_closed(&mut self, socket: u8) {
        if socket == self.config.socket_id && self.state == SessionState::Connected {
            log::warn!("socket {} closed by peer", socket);
            self.set_state(SessionState::Disconnected);
        }
    }

    fn close_command(&self) -> String<24> {
        let mut command = String::new();
        let _ = uwrite!(&mut command, "AT+QICLOSE={}\r\n", self.config.socket_id);
        command
    }
}

/// Copies the framed payload of a read reply; zero when there is none
pub fn copy_payload(response: &AtResponse, max_len: usize, buffer: &mut [u8]) -> usize {
    if !response.is_ok() {
        return 0;
    }
    match qird::parse(response.as_bytes(), max_len.min(buffer.len())) {
        ReadOutcome::Data(read) => {
            buffer[..read.payload.len()].copy_from_slice(read.payload);
            read.payload.len()
        }
        ReadOutcome::NoData | ReadOutcome::Malformed => 0,
    }
}

fn is_registered(response: &AtResponse, tag: &str) -> bool {
    matches!(parse_pair_after(response.as_bytes(), tag.as_bytes()), Some((_, 1 | 5)))
}

fn say<W: uWrite>(out: &mut W, text: &str) {
    let _ = out.write_str(text);
}

fn fixed<const N: usize>(text: &str) -> String<N> {
    let mut s = String::new();
    let _ = s.push_str(text);
    s
}

/// Quoted field starting at `bytes[0]`, which must be `"`; returns the text
/// (clipped to the capacity) and the index of the closing quote
fn quoted<const N: usize>(bytes: &[u8]) -> Option<(String<N>, usize)> {
    let body = bytes.strip_prefix(b"\"")?;
    let end = body.iter().position(|&b| b == b'"').unwrap_or(body.len());
    let text = core::str::from_utf8(&body[..end.min(N - 1)]).ok()?;
    Some((fixed(text), end + 1))
}

/// `+COPS: 0,0,"CHN-UNICOM",13` -> `CHN-UNICOM`
pub fn parse_operator(response: &[u8]) -> Option<String<OPERATOR_CAPACITY>> {
    let open = response.iter().position(|&b| b == b'"')?;
    let rest = &response[open + 1..];
    // An unterminated quote leaves the default in place
    rest.iter().position(|&b| b == b'"')?;
    quoted(&response[open..]).map(|(name, _)| name)
}

/// `+CGPADDR: 1,"10.0.0.2","2408:8440::1"` -> both addresses
pub fn parse_addresses(
    response: &[u8],
) -> (Option<String<IPV4_CAPACITY>>, Option<String<IPV6_CAPACITY>>) {
    let Some(tag) = find(response, b"+CGPADDR:") else {
        return (None, None);
    };
    let fields = &response[tag..];
    let Some(first) = fields.iter().position(|&b| b == b'"') else {
        return (None, None);
    };
    let Some((ipv4, close)) = quoted::<IPV4_CAPACITY>(&fields[first..]) else {
        return (None, None);
    };
    let after = first + close + 1;
    if after > fields.len() {
        return (Some(ipv4), None);
    }
    let ipv6 = fields[after..]
        .iter()
        .position(|&b| b == b'"')
        .and_then(|second| quoted::<IPV6_CAPACITY>(&fields[after + second..]))
        .map(|(address, _)| address);
    (Some(ipv4), ipv6)
}

fn print_summary<W: uWrite>(report: &BootReport, out: &mut W) {
    say(out, "\r\n==================================\r\n");
    say(out, "  RG200U 4G Gateway Ready\r\n");
    say(out, "==================================\r\n");
    let _ = uwrite!(
        out,
        "Operator : {}\r\nIPv4     : {}\r\nIPv6     : {}\r\n",
        report.operator.as_str(),
        report.ipv4.as_str(),
        report.ipv6.as_str()
    );
    say(out, "==================================\r\n");
    say(out, "Transparent mode enabled.\r\n\r\n");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::os::Clock;
    use crate::testing::{modem_rig, ModemSim, SimClock, TextSink};

    #[derive(Default)]
    struct UartLog {
        events: std::vec::Vec<&'static str>,
    }

    impl UartControl for UartLog {
        fn shutdown(&mut self) {
            self.events.push("shutdown");
        }

        fn restart(&mut self) {
            self.events.push("restart");
        }
    }

    fn session(config: GatewayConfig) -> (SimClock, ModemSim, ModemSession<'static, ModemSim, SimClock>) {
        let (clock, modem, rx) = modem_rig();
        let at = AtEngine::new(modem.clone(), rx, clock.clone());
        (clock, modem, ModemSession::new(at, config))
    }

    fn quick_config() -> GatewayConfig {
        GatewayConfig {
            power_on_seconds: 2,
            ip_assign_wait_ms: 100,
            ..GatewayConfig::DEFAULT
        }
    }

    fn healthy_modem(modem: &ModemSim) {
        modem
            .on("AT\r\n", &[(20, "AT\r\r\nOK\r\n")])
            .on("AT+C5GREG?", &[(20, "\r\n+C5GREG: 0,0\r\n\r\nOK\r\n")])
            .on("AT+CEREG?", &[(20, "\r\n+CEREG: 0,5\r\n\r\nOK\r\n")])
            .on("AT+COPS?", &[(30, "\r\n+COPS: 0,0,\"CHN-UNICOM\",13\r\n\r\nOK\r\n")])
            .on("AT+QNETDEVCTL", &[(500, "\r\nERROR\r\n")])
            .on(
                "AT+CGPADDR",
                &[(40, "\r\n+CGPADDR: 1,\"100.76.245.80\",\"2408:8440:1::5\"\r\n\r\nOK\r\n")],
            )
            .on("AT+QICLOSE", &[(10, "\r\nOK\r\n")])
            .on("AT+QURCCFG", &[(10, "\r\nOK\r\n")])
            .on("AT+QIOPEN", &[(30, "\r\nOK\r\n"), (400, "\r\n+QIOPEN: 0,0\r\n")]);
    }

    #[test]
    fn socket_error_is_reported_with_reason() {
        let (_clock, modem, mut session) = session(GatewayConfig::DEFAULT);
        modem.on("AT+QIOPEN", &[(5, "OK\r\n"), (505, "+QIOPEN: 0,566\r\n")]);
        let mut out = TextSink::default();

        let result = session.connect_tcp_server(&mut out);

        assert_eq!(
            result,
            Err(ConnectError::Socket { code: 566, reason: "Socket connect failed" })
        );
        assert_eq!(session.state(), SessionState::Error);
        assert!(out.0.contains("[ERROR] Connection failed with code 566 (Socket connect failed)"));
        let commands = modem.commands();
        assert_eq!(commands[0], "AT+QICLOSE=0\r\n");
        assert_eq!(commands[1], "AT+QURCCFG=\"urcport\",\"all\"\r\n");
        assert_eq!(commands[2], "AT+QIOPEN=1,0,\"TCP\",\"2401:ce00:c5af:75d0::f8a\",18655,0,0\r\n");
    }

    #[test]
    fn socket_opens_on_zero_error_code() {
        let (_clock, modem, mut session) = session(GatewayConfig::DEFAULT);
        modem.on("AT+QIOPEN", &[(5, "OK\r\n"), (300, "+QIOPEN: 0, 0\r\n")]);
        assert_eq!(session.connect_tcp_server(&mut TextSink::default()), Ok(()));
        assert_eq!(session.state(), SessionState::Connected);

        session.on_socket_closed(1);
        assert_eq!(session.state(), SessionState::Connected);
        session.on_socket_closed(0);
        assert_eq!(session.state(), SessionState::Disconnected);
    }

    #[test]
    fn close_after_connect_disconnects() {
        let (_clock, modem, mut session) = session(GatewayConfig::DEFAULT);
        modem
            .on("AT+QICLOSE", &[(10, "\r\nOK\r\n")])
            .on("AT+QIOPEN", &[(5, "OK\r\n"), (300, "+QIOPEN: 0,0\r\n")]);
        assert_eq!(session.connect_tcp_server(&mut TextSink::default()), Ok(()));
        assert_eq!(session.state(), SessionState::Connected);

        assert!(session.close());
        assert_eq!(session.state(), SessionState::Disconnected);
        assert_eq!(modem.commands().last().map(std::string::String::as_str), Some("AT+QICLOSE=0\r\n"));
    }

    #[test]
    fn close_disconnects_even_when_modem_is_silent() {
        let config = GatewayConfig { socket_id: 2, ..GatewayConfig::DEFAULT };
        let (clock, modem, mut session) = session(config);
        modem
            .on_times("AT+QICLOSE", 1, &[(10, "\r\nOK\r\n")])
            .on("AT+QIOPEN", &[(5, "OK\r\n"), (300, "+QIOPEN: 2,0\r\n")]);
        assert_eq!(session.connect_tcp_server(&mut TextSink::default()), Ok(()));

        let before = clock.now_ms();
        assert!(!session.close());
        assert_eq!(session.state(), SessionState::Disconnected);
        assert_eq!(modem.commands().last().map(std::string::String::as_str), Some("AT+QICLOSE=2\r\n"));
        assert!(clock.now_ms() - before >= GatewayConfig::DEFAULT.socket_close_timeout_ms);
    }

    #[test]
    fn urc_routing_has_its_own_budget() {
        let config = GatewayConfig { urc_config_timeout_ms: 250, ..GatewayConfig::DEFAULT };
        let (clock, modem, mut session) = session(config);
        modem
            .on("AT+QICLOSE", &[(10, "\r\nOK\r\n")])
            .on("AT+QIOPEN", &[(5, "OK\r\n"), (300, "+QIOPEN: 0,0\r\n")]);

        assert_eq!(session.connect_tcp_server(&mut TextSink::default()), Ok(()));
        // silent AT+QURCCFG costs its own 250 ms, not the close budget
        assert!(clock.now_ms() >= 250);
        assert!(clock.now_ms() < config.socket_close_timeout_ms);
    }

    #[test]
    fn missing_notification_fails_after_budget() {
        let config = GatewayConfig { socket_notify_timeout_ms: 1000, ..GatewayConfig::DEFAULT };
        let (clock, modem, mut session) = session(config);
        modem.on("AT+QIOPEN", &[(5, "OK\r\n")]);
        let result = session.connect_tcp_server(&mut TextSink::default());
        assert_eq!(result, Err(ConnectError::NoOpenNotification));
        assert_eq!(session.state(), SessionState::Error);
        // close and urc config time out at 2s each, then 1s for the notification
        assert!(clock.now_ms() >= 5000);
    }

    #[test]
    fn open_rejected_immediately() {
        let (_clock, modem, mut session) = session(GatewayConfig::DEFAULT);
        modem.on("AT+QIOPEN", &[(5, "ERROR\r\n")]);
        assert_eq!(
            session.connect_tcp_server(&mut TextSink::default()),
            Err(ConnectError::CommandFailed(Termination::Error))
        );
    }

    #[test]
    fn full_bring_up_reports_everything() {
        let (_clock, modem, mut session) = session(quick_config());
        healthy_modem(&modem);
        let mut uart = UartLog::default();
        let mut out = TextSink::default();

        let report = session.bring_up(&mut uart, &mut out);

        assert_eq!(uart.events, vec!["shutdown", "restart"]);
        assert!(report.self_test);
        assert_eq!(report.registration, Some(AccessTechnology::Lte));
        assert_eq!(report.operator.as_str(), "CHN-UNICOM");
        assert_eq!(report.context, ContextStatus::AlreadyActive);
        assert_eq!(report.ipv4.as_str(), "100.76.245.80");
        assert_eq!(report.ipv6.as_str(), "2408:8440:1::5");
        assert_eq!(report.link, Ok(()));
        assert_eq!(session.state(), SessionState::Connected);

        assert!(out.0.contains("Hardware boot: [==] Done"));
        assert!(out.0.contains("[2/5] Checking network registration... Registered (4G)"));
        assert!(out.0.contains("[4/5] Activating data connection... Already active"));
        assert!(out.0.contains("Operator : CHN-UNICOM\r\n"));
        assert!(out.0.contains("[TCP] Connected to 2401:ce00:c5af:75d0::f8a:18655"));
    }

    #[test]
    fn dead_modem_skips_to_summary() {
        let (clock, modem, mut session) = session(quick_config());
        let mut out = TextSink::default();

        let report = session.bring_up(&mut UartLog::default(), &mut out);

        assert!(!report.self_test);
        assert_eq!(report.link, Err(ConnectError::Skipped));
        assert_eq!(report.operator.as_str(), "Unknown");
        assert_eq!(report.ipv4.as_str(), "0.0.0.0");
        assert_eq!(report.ipv6.as_str(), "::");
        assert_eq!(modem.commands(), vec!["AT\r\n"; 3]);
        assert!(out.0.contains(" FAILED\r\n\r\nError: RG200U not responding!"));
        assert!(out.0.contains("RG200U 4G Gateway Ready"));
        assert!(!out.0.contains("[TCP]"));
        // power hold, three 2s probes with 500ms gaps
        assert!(clock.now_ms() >= 2000 + 100 + 3 * 2500);
    }

    #[test]
    fn registration_failure_does_not_stop_bring_up() {
        let config = GatewayConfig { registration_attempts: 2, ..quick_config() };
        let (_clock, modem, mut session) = session(config);
        modem.on_times("AT+CEREG?", 2, &[(20, "\r\n+CEREG: 0,2\r\n\r\nOK\r\n")]);
        healthy_modem(&modem);
        let mut out = TextSink::default();

        let report = session.bring_up(&mut UartLog::default(), &mut out);

        assert_eq!(report.registration, None);
        assert!(out.0.contains("registration..... FAILED (not registered)"));
        assert_eq!(report.operator.as_str(), "CHN-UNICOM");
        assert_eq!(report.link, Ok(()));
    }

    #[test]
    fn blocking_read_returns_payload() {
        let (_clock, modem, mut session) = session(GatewayConfig::DEFAULT);
        modem.on("AT+QIRD=0,256", &[(20, "\r\n+QIRD: 5\r\nhello\r\n\r\nOK\r\n")]);
        let mut buffer = [0u8; 256];
        let len = session.read_data(&mut buffer);
        assert_eq!(&buffer[..len], b"hello");
    }

    #[test]
    fn address_and_operator_parsing() {
        let (v4, v6) = parse_addresses(b"AT+CGPADDR\r\r\n+CGPADDR: 1,\"10.1.2.3\"\r\n\r\nOK\r\n");
        assert_eq!(v4.as_deref(), Some("10.1.2.3"));
        assert_eq!(v6, None);
        assert_eq!(parse_addresses(b"+CGPADDR: 1\r\nOK\r\n"), (None, None));
        assert_eq!(parse_operator(b"+COPS: 0\r\nOK\r\n"), None);
        assert_eq!(parse_operator(b"+COPS: 0,0,\"\",7").as_deref(), Some(""));
    }

    #[test]
    fn error_table_edges() {
        assert_eq!(socket_error_reason(0), "Operation success");
        assert_eq!(socket_error_reason(574), "Port busy");
        assert_eq!(socket_error_reason(575), "Unknown");
        assert_eq!(socket_error_reason(549), "Unknown");
    }
}
