//! Emulated ignition controller.
//!
//! [`MockController`] behaves like the controller firmware on the other end
//! of the serial line: it parses 7-byte request frames, ignores anything
//! with a bad header or checksum, and answers known commands with one reply
//! frame each. It keeps its own RPM reading, shift, timing table, and LED so
//! tests can check what the engine wrote.
//!
//! The handle is cheaply cloneable; all clones share one device. Hand one
//! clone to the engine as its transport and keep another to drive and
//! inspect the device.
//!
//! Fault injection covers the ways a real line misbehaves: replies can be
//! dropped, corrupted, preceded by garbage, or delivered a few bytes at a
//! time.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use ignitor_core::error::{Error, Result};
use ignitor_core::transport::Transport;

const HEADER: u8 = 0xAA;
const FRAME_LEN: usize = 7;
const SLOTS: usize = 11;

/// Which firmware the emulator runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Firmware {
    /// Speed/angle bench firmware.
    AngleProbe,
    /// RPM meter with timing table and status LED.
    TimingMeter,
    /// Capacitor-discharge ignition with shift, table, and flash commit.
    Cdi,
}

/// One slot of the emulated timing table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeviceRecord {
    pub rpm: u16,
    pub value: u8,
}

#[derive(Debug)]
struct DeviceState {
    firmware: Firmware,
    connected: bool,
    rpm: u32,
    speed: u32,
    angle: u32,
    shift: u8,
    led: bool,
    saves: usize,
    table: [DeviceRecord; SLOTS],
    rx: Vec<u8>,
    outgoing: VecDeque<u8>,
    requests: Vec<[u8; FRAME_LEN]>,
    drop_replies: usize,
    corrupt_replies: usize,
    garbage: Vec<u8>,
    silent: bool,
    chunk_size: usize,
}

fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, &b| acc.wrapping_add(b))
}

fn frame(cmd: u8, payload: [u8; 4]) -> [u8; FRAME_LEN] {
    let mut out = [HEADER, cmd, payload[0], payload[1], payload[2], payload[3], 0];
    out[6] = checksum(&out[..6]);
    out
}

fn record_payload(slot: u8, record: DeviceRecord) -> [u8; 4] {
    let rpm = record.rpm.to_le_bytes();
    [slot, record.value, rpm[0], rpm[1]]
}

impl DeviceState {
    fn new(firmware: Firmware) -> Self {
        // Breakpoints of the CDI factory table.
        let mut table = [DeviceRecord::default(); SLOTS];
        let rpms = [60, 1620, 1860, 2100, 2340, 2580, 2820, 3060, 3300, 3540, 5100];
        for (slot, rpm) in table.iter_mut().zip(rpms) {
            slot.rpm = rpm;
        }
        Self {
            firmware,
            connected: true,
            rpm: 0,
            speed: 0,
            angle: 0,
            shift: 5,
            led: false,
            saves: 0,
            table,
            rx: Vec::new(),
            outgoing: VecDeque::new(),
            requests: Vec::new(),
            drop_replies: 0,
            corrupt_replies: 0,
            garbage: Vec::new(),
            silent: false,
            chunk_size: usize::MAX,
        }
    }

    fn accept(&mut self, data: &[u8]) {
        self.rx.extend_from_slice(data);
        loop {
            let Some(start) = self.rx.iter().position(|&b| b == HEADER) else {
                self.rx.clear();
                return;
            };
            self.rx.drain(..start);
            if self.rx.len() < FRAME_LEN {
                return;
            }
            let mut request = [0u8; FRAME_LEN];
            request.copy_from_slice(&self.rx[..FRAME_LEN]);
            if checksum(&request[..6]) != request[6] {
                // Firmware drops the byte and hunts for the next header.
                self.rx.drain(..1);
                continue;
            }
            self.rx.drain(..FRAME_LEN);
            self.requests.push(request);
            if let Some(reply) = self.execute(&request) {
                self.emit(reply);
            }
        }
    }

    fn execute(&mut self, request: &[u8; FRAME_LEN]) -> Option<[u8; FRAME_LEN]> {
        let cmd = request[1];
        let payload = [request[2], request[3], request[4], request[5]];
        let slot = payload[0] as usize;
        let reply = match (self.firmware, cmd) {
            (Firmware::AngleProbe, 0x01) => self.speed.to_le_bytes(),
            (Firmware::AngleProbe, 0x02) => self.angle.to_le_bytes(),
            (Firmware::AngleProbe, 0x81) => {
                self.angle = u32::from_le_bytes(payload);
                payload
            }
            (Firmware::TimingMeter, 0x01) => self.rpm.to_le_bytes(),
            (Firmware::Cdi, 0x01) => (self.rpm.min(u16::MAX as u32)).to_le_bytes(),
            (Firmware::TimingMeter, 0x02) | (Firmware::Cdi, 0x21) => {
                let record = *self.table.get(slot)?;
                record_payload(payload[0], record)
            }
            (Firmware::TimingMeter, 0x82) | (Firmware::Cdi, 0xA1) => {
                let entry = self.table.get_mut(slot)?;
                entry.value = payload[1];
                entry.rpm = u16::from_le_bytes([payload[2], payload[3]]);
                payload
            }
            (Firmware::TimingMeter, 0x05) => {
                self.led = payload[0] != 0;
                payload
            }
            (Firmware::Cdi, 0x22) => [self.shift, 0, 0, 0],
            (Firmware::Cdi, 0xA2) => {
                self.shift = payload[0];
                payload
            }
            (Firmware::Cdi, 0xAF) => {
                self.saves += 1;
                [0; 4]
            }
            _ => return None,
        };
        Some(frame(cmd, reply))
    }

    fn emit(&mut self, mut reply: [u8; FRAME_LEN]) {
        if self.silent {
            return;
        }
        if self.drop_replies > 0 {
            self.drop_replies -= 1;
            return;
        }
        if self.corrupt_replies > 0 {
            self.corrupt_replies -= 1;
            reply[6] = reply[6].wrapping_add(1);
        }
        let garbage = std::mem::take(&mut self.garbage);
        self.outgoing.extend(garbage);
        self.outgoing.extend(reply);
    }
}

/// Emulated controller, usable directly as a [`Transport`].
#[derive(Debug, Clone)]
pub struct MockController {
    state: Arc<Mutex<DeviceState>>,
}

impl MockController {
    /// Emulate the given firmware with factory defaults.
    pub fn new(firmware: Firmware) -> Self {
        Self {
            state: Arc::new(Mutex::new(DeviceState::new(firmware))),
        }
    }

    pub fn cdi() -> Self {
        Self::new(Firmware::Cdi)
    }

    pub fn timing_meter() -> Self {
        Self::new(Firmware::TimingMeter)
    }

    pub fn angle_probe() -> Self {
        Self::new(Firmware::AngleProbe)
    }

    fn lock(&self) -> MutexGuard<'_, DeviceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // -----------------------------------------------------------------
    // Device state
    // -----------------------------------------------------------------

    pub fn set_rpm(&self, rpm: u32) {
        self.lock().rpm = rpm;
    }

    pub fn set_speed(&self, speed: u32) {
        self.lock().speed = speed;
    }

    pub fn angle(&self) -> u32 {
        self.lock().angle
    }

    pub fn set_angle(&self, angle: u32) {
        self.lock().angle = angle;
    }

    pub fn shift(&self) -> u8 {
        self.lock().shift
    }

    pub fn set_shift(&self, shift: u8) {
        self.lock().shift = shift;
    }

    pub fn led(&self) -> bool {
        self.lock().led
    }

    /// Number of SAVE MEMORY commands executed.
    pub fn saves(&self) -> usize {
        self.lock().saves
    }

    /// One slot of the device's table. Panics on an out-of-range slot.
    pub fn record(&self, slot: usize) -> DeviceRecord {
        self.lock().table[slot]
    }

    pub fn set_record(&self, slot: usize, record: DeviceRecord) {
        self.lock().table[slot] = record;
    }

    // -----------------------------------------------------------------
    // Traffic inspection
    // -----------------------------------------------------------------

    /// Every valid request frame received so far.
    pub fn requests(&self) -> Vec<[u8; FRAME_LEN]> {
        self.lock().requests.clone()
    }

    /// Number of valid requests received with command byte `opcode`.
    pub fn request_count(&self, opcode: u8) -> usize {
        self.lock()
            .requests
            .iter()
            .filter(|r| r[1] == opcode)
            .count()
    }

    // -----------------------------------------------------------------
    // Fault injection
    // -----------------------------------------------------------------

    /// Swallow the next `n` replies.
    pub fn drop_replies(&self, n: usize) {
        self.lock().drop_replies = n;
    }

    /// Send the next `n` replies with a wrong checksum.
    pub fn corrupt_replies(&self, n: usize) {
        self.lock().corrupt_replies = n;
    }

    /// Prefix the next reply with `bytes`.
    pub fn garbage_before_next_reply(&self, bytes: &[u8]) {
        self.lock().garbage = bytes.to_vec();
    }

    /// Put bytes on the line right away, unprompted.
    pub fn inject(&self, bytes: &[u8]) {
        self.lock().outgoing.extend(bytes);
    }

    /// Stop (or resume) answering requests altogether.
    pub fn set_silent(&self, silent: bool) {
        self.lock().silent = silent;
    }

    /// Deliver reply bytes at most `n` at a time.
    pub fn set_chunk_size(&self, n: usize) {
        self.lock().chunk_size = n.max(1);
    }

    /// Unplug (or replug) the emulated cable.
    pub fn set_connected(&self, connected: bool) {
        self.lock().connected = connected;
    }
}

#[async_trait]
impl Transport for MockController {
    async fn send(&mut self, data: &[u8]) -> Result<()> {
        let mut state = self.lock();
        if !state.connected {
            return Err(Error::ConnectionLost);
        }
        state.accept(data);
        Ok(())
    }

    async fn receive(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        {
            let mut state = self.lock();
            if !state.connected {
                return Err(Error::ConnectionLost);
            }
            if !state.outgoing.is_empty() {
                let n = state.outgoing.len().min(buf.len()).min(state.chunk_size);
                for (slot, byte) in buf.iter_mut().zip(state.outgoing.drain(..n)) {
                    *slot = byte;
                }
                return Ok(n);
            }
        }
        tokio::time::sleep(timeout).await;
        Err(Error::Timeout)
    }

    async fn close(&mut self) -> Result<()> {
        self.lock().outgoing.clear();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.lock().connected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn exchange(device: &mut MockController, request: [u8; FRAME_LEN]) -> Vec<u8> {
        device.send(&request).await.unwrap();
        let mut buf = [0u8; 64];
        match device.receive(&mut buf, Duration::from_millis(1)).await {
            Ok(n) => buf[..n].to_vec(),
            Err(_) => Vec::new(),
        }
    }

    #[tokio::test]
    async fn cdi_reports_rpm_as_u16() {
        let mut device = MockController::cdi();
        device.set_rpm(1620);
        let reply = exchange(&mut device, frame(0x01, [0; 4])).await;
        assert_eq!(reply, vec![0xAA, 0x01, 0x54, 0x06, 0x00, 0x00, 0x05]);
    }

    #[tokio::test]
    async fn cdi_record_round_trip() {
        let mut device = MockController::cdi();
        let set = frame(0xA1, [3, 12, 0x4C, 0x06]);
        assert_eq!(exchange(&mut device, set).await, set.to_vec());
        assert_eq!(device.record(3), DeviceRecord { rpm: 1612, value: 12 });

        let reply = exchange(&mut device, frame(0x21, [3, 0, 0, 0])).await;
        assert_eq!(reply, set_cmd(set, 0x21).to_vec());
    }

    fn set_cmd(mut f: [u8; FRAME_LEN], cmd: u8) -> [u8; FRAME_LEN] {
        f[1] = cmd;
        f[6] = checksum(&f[..6]);
        f
    }

    #[tokio::test]
    async fn meter_led() {
        let mut device = MockController::timing_meter();
        let on = [0xAA, 0x05, 0x01, 0x00, 0x00, 0x00, 0xB0];
        assert_eq!(exchange(&mut device, on).await, on.to_vec());
        assert!(device.led());
    }

    #[tokio::test]
    async fn bad_checksum_is_ignored() {
        let mut device = MockController::cdi();
        let reply = exchange(&mut device, [0xAA, 0x01, 0, 0, 0, 0, 0x00]).await;
        assert!(reply.is_empty());
        assert!(device.requests().is_empty());
    }

    #[tokio::test]
    async fn unknown_command_gets_no_reply() {
        let mut device = MockController::timing_meter();
        let reply = exchange(&mut device, frame(0xAF, [0; 4])).await;
        assert!(reply.is_empty());
        assert_eq!(device.request_count(0xAF), 1);
    }

    #[tokio::test]
    async fn faults() {
        let mut device = MockController::angle_probe();
        device.set_speed(7);

        device.drop_replies(1);
        assert!(exchange(&mut device, frame(0x01, [0; 4])).await.is_empty());

        device.corrupt_replies(1);
        let reply = exchange(&mut device, frame(0x01, [0; 4])).await;
        assert_ne!(reply[6], checksum(&reply[..6]));

        device.garbage_before_next_reply(&[0x13, 0x37]);
        let reply = exchange(&mut device, frame(0x01, [0; 4])).await;
        assert_eq!(&reply[..2], &[0x13, 0x37]);
        assert_eq!(&reply[2..], &frame(0x01, [7, 0, 0, 0]));
    }

    #[tokio::test]
    async fn clones_share_state() {
        let device = MockController::cdi();
        let mut transport = device.clone();
        transport.send(&frame(0xA2, [20, 0, 0, 0])).await.unwrap();
        assert_eq!(device.shift(), 20);
    }
}
