//! Gateway application: boot sequence and the steady-state relay tasks.
//!
//! Upstream: RS-485 receive ring -> `Rs485RxTask` -> queue -> `ModemTxTask`.
//! Downstream: modem receive ring -> `ModemRxTask` (notification scan, socket
//! read, command interception) -> queue -> `Rs485TxTask`. Raw modem output is
//! never relayed; only socket payloads and command echoes travel downstream.

use core::cell::RefCell;

use embedded_hal::blocking::delay::DelayMs;
use embedded_hal::digital::v2::OutputPin;
use embedded_hal::serial;
use heapless::Vec;

use crate::config::{RELAY_QUEUE_CAPACITY, RX_RING_CAPACITY, TX_QUIET_WINDOW_MS};
use crate::diagnostics::{Diagnostics, ErrorCode};
use crate::drivers::half_duplex::{HalfDuplexLine, LineOwner};
use crate::drivers::modem::{BootReport, ModemSession, UartControl};
use crate::drivers::relay::RelayBank;
use crate::hal::ring_buffer::{ByteRingBuffer, Consumer, Producer};
use crate::os::{elapsed_ms, Clock, Deadline, Timebase};
use crate::protocol::at::{AtResponse, Termination};
use crate::protocol::command::{CommandInterceptor, Interception};
use crate::protocol::qird::{self, ReadOutcome};
use crate::protocol::urc::{UrcDetector, UrcEvent};
use crate::protocol::{GatewayError, Result};
use crate::rtos::{Scheduler, SoftTimers, Task, TaskPriority, TaskState};

/// Bytes a relay task moves per dispatch, so receive draining is never
/// starved by a long transmit
const MAX_BYTES_PER_PASS: usize = 32;

/// One socket read plus its command echo
const DOWNLINK_PENDING_CAPACITY: usize = 512;

pub const RECEIVE_PERIOD_MS: u32 = 1;
pub const MONITOR_PERIOD_MS: u32 = 500;
pub const DIAGNOSTICS_REPORT_MS: u32 = 10_000;

/// RS-485 receive ring to the upstream queue
pub struct Rs485RxTask<'a> {
    source: Consumer<'a, RX_RING_CAPACITY>,
    queue: Producer<'a, RELAY_QUEUE_CAPACITY>,
    diagnostics: &'a Diagnostics,
    ring_dropped: u8,
    queue_full: bool,
}

impl<'a> Rs485RxTask<'a> {
    pub fn new(
        source: Consumer<'a, RX_RING_CAPACITY>,
        queue: Producer<'a, RELAY_QUEUE_CAPACITY>,
        diagnostics: &'a Diagnostics,
    ) -> Self {
        let ring_dropped = source.dropped();
        Self {
            source,
            queue,
            diagnostics,
            ring_dropped,
            queue_full: false,
        }
    }
}

impl Task for Rs485RxTask<'_> {
    fn name(&self) -> &'static str {
        "rs485_rx"
    }

    fn run(&mut self, now: u32) -> TaskState {
        report_ring_drops(self.diagnostics, &self.source, &mut self.ring_dropped, now);

        while let Some(byte) = self.source.peek() {
            if !self.queue.push(byte) {
                // Left in the ring; only the interrupt side drops
                if !self.queue_full {
                    log::warn!("upstream queue full");
                    self.diagnostics.report(ErrorCode::BufferOverrun, now, 0);
                    self.queue_full = true;
                }
                return TaskState::Ready;
            }
            self.source.pop();
        }
        self.queue_full = false;
        TaskState::Ready
    }
}

/// Upstream queue to the modem, paused while an AT exchange is in flight
pub struct ModemTxTask<'s, 'm, MTX, T> {
    queue: Consumer<'s, RELAY_QUEUE_CAPACITY>,
    session: &'s RefCell<ModemSession<'m, MTX, T>>,
    diagnostics: &'s Diagnostics,
}

impl<'s, 'm, MTX, T> ModemTxTask<'s, 'm, MTX, T> {
    pub fn new(
        queue: Consumer<'s, RELAY_QUEUE_CAPACITY>,
        session: &'s RefCell<ModemSession<'m, MTX, T>>,
        diagnostics: &'s Diagnostics,
    ) -> Self {
        Self {
            queue,
            session,
            diagnostics,
        }
    }
}

impl<MTX, T> Task for ModemTxTask<'_, '_, MTX, T>
where
    MTX: serial::Write<u8>,
    T: Timebase,
{
    fn name(&self) -> &'static str {
        "modem_tx"
    }

    fn run(&mut self, now: u32) -> TaskState {
        if self.queue.is_empty() {
            return TaskState::Ready;
        }
        let cell = self.session;
        let Ok(mut session) = cell.try_borrow_mut() else {
            return TaskState::Blocked;
        };
        let engine = session.engine();
        if engine.is_busy() {
            return TaskState::Ready;
        }

        let mut sent = 0;
        while sent < MAX_BYTES_PER_PASS {
            let Some(byte) = self.queue.peek() else { break };
            match engine.write_raw(byte) {
                Ok(()) => {
                    self.queue.pop();
                    sent += 1;
                }
                Err(nb::Error::WouldBlock) => break,
                Err(nb::Error::Other(_)) => {
                    self.queue.pop();
                    self.diagnostics.report(ErrorCode::HardwareFault, now, byte as u32);
                    break;
                }
            }
        }
        self.diagnostics.add_up(sent as u32);
        TaskState::Ready
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RxPhase {
    /// Feeding modem output to the notification detector
    Scanning,
    /// Data announced, waiting before the read
    Settling { since: u32 },
    /// Socket read in flight
    Reading,
}

/// Modem receive ring: notification scan, socket reads and relay commands
pub struct ModemRxTask<'s, 'm, MTX, T, K1, K2> {
    session: &'s RefCell<ModemSession<'m, MTX, T>>,
    queue: Producer<'s, RELAY_QUEUE_CAPACITY>,
    relays: RelayBank<K1, K2>,
    interceptor: CommandInterceptor,
    urc: UrcDetector,
    diagnostics: &'s Diagnostics,
    phase: RxPhase,
    pending: Vec<u8, DOWNLINK_PENDING_CAPACITY>,
    pending_sent: usize,
    ring_dropped: u8,
}

impl<'s, 'm, MTX, T, K1, K2> ModemRxTask<'s, 'm, MTX, T, K1, K2>
where
    MTX: serial::Write<u8>,
    T: Timebase,
    K1: OutputPin,
    K2: OutputPin,
{
    pub fn new(
        session: &'s RefCell<ModemSession<'m, MTX, T>>,
        queue: Producer<'s, RELAY_QUEUE_CAPACITY>,
        relays: RelayBank<K1, K2>,
        diagnostics: &'s Diagnostics,
    ) -> Self {
        Self {
            session,
            queue,
            relays,
            interceptor: CommandInterceptor::new(),
            urc: UrcDetector::new(),
            diagnostics,
            phase: RxPhase::Scanning,
            pending: Vec::new(),
            pending_sent: 0,
            ring_dropped: 0,
        }
    }

    /// Moves held-back downstream bytes into the queue as space allows
    fn flush_pending(&mut self) -> bool {
        while self.pending_sent < self.pending.len() {
            if !self.queue.push(self.pending[self.pending_sent]) {
                return false;
            }
            self.pending_sent += 1;
        }
        self.pending.clear();
        self.pending_sent = 0;
        true
    }

    fn complete_read(&mut self, response: &AtResponse, max_len: usize, settle_ms: u32, now: u32) -> RxPhase {
        if !response.is_ok() {
            let code = match response.termination() {
                Termination::Timeout => ErrorCode::Timeout,
                _ => ErrorCode::ProtocolFailure,
            };
            log::warn!("socket read failed: {:?}", response.termination());
            self.diagnostics.report(code, now, 0);
            return RxPhase::Scanning;
        }

        match qird::parse(response.as_bytes(), max_len) {
            ReadOutcome::Data(read) => {
                log::debug!("socket read {} bytes", read.payload.len());
                if self.pending.extend_from_slice(read.payload).is_err() {
                    self.diagnostics.report(ErrorCode::BufferOverrun, now, read.payload.len() as u32);
                }
                let mut echo = PendingText(&mut self.pending);
                match self.interceptor.process(read.payload, &mut self.relays, &mut echo) {
                    Interception::Applied(_) => self.diagnostics.command(true),
                    Interception::Unknown => self.diagnostics.command(false),
                    Interception::PinFailed(_) => {
                        self.diagnostics.report(ErrorCode::HardwareFault, now, 0)
                    }
                }
                if read.payload.len() >= max_len {
                    // More may be waiting in the modem
                    RxPhase::Settling { since: now.wrapping_sub(settle_ms) }
                } else {
                    RxPhase::Scanning
                }
            }
            ReadOutcome::NoData => RxPhase::Scanning,
            ReadOutcome::Malformed => {
                self.diagnostics.report(ErrorCode::ProtocolFailure, now, 0);
                RxPhase::Scanning
            }
        }
    }
}

impl<MTX, T, K1, K2> Task for ModemRxTask<'_, '_, MTX, T, K1, K2>
where
    MTX: serial::Write<u8>,
    T: Timebase,
    K1: OutputPin,
    K2: OutputPin,
{
    fn name(&self) -> &'static str {
        "modem_rx"
    }

    fn run(&mut self, now: u32) -> TaskState {
        let flushed = self.flush_pending();
        let cell = self.session;
        let Ok(mut session) = cell.try_borrow_mut() else {
            return TaskState::Blocked;
        };
        let dropped = session.engine().rx_dropped();
        if dropped != self.ring_dropped {
            self.diagnostics
                .report(ErrorCode::BufferOverrun, now, dropped.wrapping_sub(self.ring_dropped) as u32);
            self.ring_dropped = dropped;
        }

        let config = *session.config();
        match self.phase {
            RxPhase::Scanning => {
                for _ in 0..MAX_BYTES_PER_PASS {
                    let Some(byte) = session.engine().read_byte() else { break };
                    match self.urc.feed(byte) {
                        Some(UrcEvent::DataReady) => {
                            self.phase = RxPhase::Settling { since: now };
                            break;
                        }
                        Some(UrcEvent::Closed(socket)) => session.on_socket_closed(socket),
                        Some(UrcEvent::LineOverflow) => {
                            self.diagnostics.report(ErrorCode::BufferOverrun, now, 0)
                        }
                        None => {}
                    }
                }
            }
            RxPhase::Settling { since } => {
                if flushed && elapsed_ms(now, since) >= config.urc_settle_ms {
                    session.start_read();
                    self.phase = RxPhase::Reading;
                }
            }
            RxPhase::Reading => {
                if let Some(response) = session.poll_read() {
                    drop(session);
                    self.urc.reset();
                    self.phase = self.complete_read(
                        &response,
                        config.read_max_len as usize,
                        config.urc_settle_ms,
                        now,
                    );
                }
            }
        }
        TaskState::Ready
    }
}

struct PendingText<'v, const N: usize>(&'v mut Vec<u8, N>);

impl<const N: usize> ufmt::uWrite for PendingText<'_, N> {
    type Error = GatewayError;

    fn write_str(&mut self, s: &str) -> Result<()> {
        self.0
            .extend_from_slice(s.as_bytes())
            .map_err(|_| GatewayError::BufferOverflow)
    }
}

/// Downstream queue to the RS-485 line. The first byte of a burst switches
/// the line to transmit; it goes back to receive once the queue has been
/// empty for the quiet window, counted from when the last byte left the UART.
pub struct Rs485TxTask<'a, TX, RE, SHDN, D, C> {
    queue: Consumer<'a, RELAY_QUEUE_CAPACITY>,
    line: &'a HalfDuplexLine<TX, RE, SHDN, D>,
    clock: &'a C,
    diagnostics: &'a Diagnostics,
    quiet: Option<Deadline>,
}

impl<'a, TX, RE, SHDN, D, C> Rs485TxTask<'a, TX, RE, SHDN, D, C> {
    pub fn new(
        queue: Consumer<'a, RELAY_QUEUE_CAPACITY>,
        line: &'a HalfDuplexLine<TX, RE, SHDN, D>,
        clock: &'a C,
        diagnostics: &'a Diagnostics,
    ) -> Self {
        Self {
            queue,
            line,
            clock,
            diagnostics,
            quiet: None,
        }
    }
}

impl<TX, RE, SHDN, D, C> Task for Rs485TxTask<'_, TX, RE, SHDN, D, C>
where
    TX: serial::Write<u8>,
    RE: OutputPin,
    SHDN: OutputPin,
    D: DelayMs<u32>,
    C: Clock,
{
    fn name(&self) -> &'static str {
        "rs485_tx"
    }

    fn run(&mut self, now: u32) -> TaskState {
        if self.queue.is_empty() {
            if let Some(quiet) = self.quiet {
                // `now` is taken before the pass; the deadline may be younger
                if quiet.is_expired(self.clock.now_ms()) {
                    if self.line.release(LineOwner::Relay).is_err() {
                        self.diagnostics.report(ErrorCode::HardwareFault, now, 0);
                    }
                    self.quiet = None;
                }
            }
            return TaskState::Ready;
        }

        if self.quiet.is_none() {
            match self.line.acquire_transmit(LineOwner::Relay) {
                Ok(()) => {}
                Err(GatewayError::LineBusy) => return TaskState::Blocked,
                Err(_) => {
                    self.diagnostics.report(ErrorCode::HardwareFault, now, 0);
                    return TaskState::Ready;
                }
            }
        }

        let mut sent = 0;
        while sent < MAX_BYTES_PER_PASS {
            let Some(byte) = self.queue.pop() else { break };
            if self.line.send_byte(LineOwner::Relay, byte).is_err() {
                self.diagnostics.report(ErrorCode::HardwareFault, now, byte as u32);
                break;
            }
            sent += 1;
        }
        // send_byte returns once the byte is out of the shift register
        self.quiet = Some(Deadline::after(self.clock.now_ms(), TX_QUIET_WINDOW_MS));
        self.diagnostics.add_down(sent as u32);
        TaskState::Ready
    }
}

pub struct MonitorContext<'a> {
    pub diagnostics: &'a Diagnostics,
    pub reports: u32,
}

fn report_diagnostics(context: &mut MonitorContext<'_>) {
    context.diagnostics.log_summary();
    context.reports = context.reports.wrapping_add(1);
}

/// Low-priority housekeeping driven by soft timers
pub struct MonitorTask<'a> {
    timers: SoftTimers<MonitorContext<'a>, 2>,
    context: MonitorContext<'a>,
    last_tick: Option<u32>,
}

impl<'a> MonitorTask<'a> {
    pub fn new(diagnostics: &'a Diagnostics, report_period_ms: u32) -> Self {
        let mut timers = SoftTimers::new();
        if timers.register(report_period_ms, report_diagnostics).is_none() {
            log::warn!("diagnostics timer not registered");
        }
        Self {
            timers,
            context: MonitorContext { diagnostics, reports: 0 },
            last_tick: None,
        }
    }

    pub fn reports(&self) -> u32 {
        self.context.reports
    }
}

impl Task for MonitorTask<'_> {
    fn name(&self) -> &'static str {
        "monitor"
    }

    fn run(&mut self, now: u32) -> TaskState {
        let elapsed = self.last_tick.map_or(0, |last| elapsed_ms(now, last));
        self.last_tick = Some(now);
        self.timers.tick(&mut self.context, elapsed);
        TaskState::Ready
    }
}

fn report_ring_drops<const N: usize>(
    diagnostics: &Diagnostics,
    ring: &Consumer<'_, N>,
    seen: &mut u8,
    now: u32,
) {
    let dropped = ring.dropped();
    if dropped != *seen {
        log::warn!("receive ring dropped {} bytes", dropped.wrapping_sub(*seen));
        diagnostics.report(ErrorCode::BufferOverrun, now, dropped.wrapping_sub(*seen) as u32);
        *seen = dropped;
    }
}

/// Runs the modem bring-up with its progress text on the RS-485 line
pub fn boot<TX, RE, SHDN, D, MTX, T, U>(
    session: &mut ModemSession<'_, MTX, T>,
    line: &HalfDuplexLine<TX, RE, SHDN, D>,
    uart: &mut U,
) -> Result<BootReport>
where
    TX: serial::Write<u8>,
    RE: OutputPin,
    SHDN: OutputPin,
    D: DelayMs<u32>,
    MTX: serial::Write<u8>,
    T: Timebase,
    U: UartControl,
{
    line.acquire_transmit(LineOwner::Boot)?;
    let report = session.bring_up(uart, &mut line.writer(LineOwner::Boot));
    line.release(LineOwner::Boot)?;
    log::info!("boot done, link {:?}", report.link);
    Ok(report)
}

/// Hardware handed to `run` after boot
pub struct Gateway<'a, TX, RE, SHDN, D, MTX, T, K1, K2> {
    pub line: &'a HalfDuplexLine<TX, RE, SHDN, D>,
    pub session: ModemSession<'a, MTX, T>,
    pub relays: RelayBank<K1, K2>,
    pub rs485_rx: Consumer<'a, RX_RING_CAPACITY>,
}

/// Starts the relay tasks and dispatches them forever
pub fn run<TX, RE, SHDN, D, MTX, T, K1, K2, C>(
    gateway: Gateway<'_, TX, RE, SHDN, D, MTX, T, K1, K2>,
    clock: &C,
    idle: impl FnMut(),
) -> !
where
    TX: serial::Write<u8>,
    RE: OutputPin,
    SHDN: OutputPin,
    D: DelayMs<u32>,
    MTX: serial::Write<u8>,
    T: Timebase,
    K1: OutputPin,
    K2: OutputPin,
    C: Clock,
{
    let Gateway { line, session, relays, rs485_rx } = gateway;
    let diagnostics = Diagnostics::new();
    let session = RefCell::new(session);
    let mut upstream = ByteRingBuffer::<RELAY_QUEUE_CAPACITY>::new();
    let mut downstream = ByteRingBuffer::<RELAY_QUEUE_CAPACITY>::new();
    let (up_in, up_out) = upstream.split();
    let (down_in, down_out) = downstream.split();

    let mut rs485_rx_task = Rs485RxTask::new(rs485_rx, up_in, &diagnostics);
    let mut modem_rx_task = ModemRxTask::new(&session, down_in, relays, &diagnostics);
    let mut modem_tx_task = ModemTxTask::new(up_out, &session, &diagnostics);
    let mut rs485_tx_task = Rs485TxTask::new(down_out, line, clock, &diagnostics);
    let mut monitor_task = MonitorTask::new(&diagnostics, DIAGNOSTICS_REPORT_MS);

    let now = clock.now_ms();
    let mut scheduler: Scheduler<'_, 5> = Scheduler::new();
    let tasks: [(&mut dyn Task, TaskPriority, u32); 5] = [
        (&mut rs485_rx_task, TaskPriority::High, RECEIVE_PERIOD_MS),
        (&mut modem_rx_task, TaskPriority::High, RECEIVE_PERIOD_MS),
        (&mut modem_tx_task, TaskPriority::Normal, 0),
        (&mut rs485_tx_task, TaskPriority::Normal, 0),
        (&mut monitor_task, TaskPriority::Low, MONITOR_PERIOD_MS),
    ];
    for (task, priority, period) in tasks {
        if scheduler.add_task(task, priority, period, now).is_none() {
            log::error!("task table full");
        }
    }
    log::info!("relay running, {} tasks", scheduler.task_count());
    scheduler.run(clock, idle)
}
