//! Remote transmitter
//!
//! Exists while the server advertises transmit support. Local settings are
//! pushed as TRANSMIT_ACTION commands, each only when it differs from the
//! value last sent. Remote press state arrives the other way and only takes
//! effect once both prebuffer leads have elapsed, so the reported status
//! follows what is actually on air.

use crossbeam_channel::Sender;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::dsp::SampleStream;
use crate::error::TransportError;
use crate::network::PacketSender;
use crate::protocol::transmit::{TransmitAction, TransmitterDescriptor};
use crate::protocol::Command;
use crate::transmit::back_channel::BackChannel;

#[derive(Debug, Default)]
struct TxState {
    tx_status: Option<bool>,
    software_gain: Option<u8>,
    hardware_gain: Option<u8>,
    frequency: Option<i32>,
    pa_enabled: Option<bool>,
    remote_pressed: bool,
    remote_changed_at: Option<Instant>,
}

/// Prebuffer leads shared with the session, in milliseconds
#[derive(Debug, Clone, Default)]
pub struct PrebufferLeads {
    pub rx_msec: Arc<AtomicU32>,
    pub tx_msec: Arc<AtomicU32>,
}

impl PrebufferLeads {
    pub fn new(rx_msec: u32, tx_msec: u32) -> Self {
        Self {
            rx_msec: Arc::new(AtomicU32::new(rx_msec)),
            tx_msec: Arc::new(AtomicU32::new(tx_msec)),
        }
    }

    pub fn total(&self) -> Duration {
        let rx = self.rx_msec.load(Ordering::Relaxed) as u64;
        let tx = self.tx_msec.load(Ordering::Relaxed) as u64;
        Duration::from_millis(rx + tx)
    }
}

pub struct RemoteTransmitter {
    sender: Arc<PacketSender>,
    descriptor: TransmitterDescriptor,
    state: Mutex<TxState>,
    leads: PrebufferLeads,
    alive: Arc<AtomicBool>,
    back_channel: Mutex<Option<BackChannel>>,
}

impl RemoteTransmitter {
    pub fn new(
        sender: Arc<PacketSender>,
        descriptor: TransmitterDescriptor,
        leads: PrebufferLeads,
    ) -> Self {
        tracing::info!(
            "Remote transmitter available: {} (zones {}/{})",
            descriptor.transmitter_name,
            descriptor.normal_zone,
            descriptor.red_zone
        );
        Self {
            sender,
            descriptor,
            state: Mutex::new(TxState::default()),
            leads,
            alive: Arc::new(AtomicBool::new(true)),
            back_channel: Mutex::new(None),
        }
    }

    pub fn descriptor(&self) -> &TransmitterDescriptor {
        &self.descriptor
    }

    fn send_action(&self, action: &TransmitAction) -> Result<(), TransportError> {
        let Some(args) = action.to_wire() else {
            return Ok(());
        };
        tracing::debug!("Transmit action: {:?}", action);
        self.sender.send_command(Command::TransmitAction, &args)
    }

    /// Send `action` unless `slot` already holds `value`
    fn update<T: Copy + PartialEq>(
        &self,
        slot: impl FnOnce(&mut TxState) -> &mut Option<T>,
        value: T,
        action: TransmitAction,
    ) -> Result<(), TransportError> {
        if !self.sender.is_open() {
            return Ok(());
        }
        let mut state = self.state.lock();
        let last = slot(&mut *state);
        if *last == Some(value) {
            return Ok(());
        }
        self.send_action(&action)?;
        *last = Some(value);
        Ok(())
    }

    pub fn set_transmit_status(&self, status: bool) -> Result<(), TransportError> {
        self.update(|s| &mut s.tx_status, status, TransmitAction::TransmitStatus(status))
    }

    pub fn set_software_gain(&self, gain: u8) -> Result<(), TransportError> {
        self.update(|s| &mut s.software_gain, gain, TransmitAction::TransmitSoftwareGain(gain))
    }

    pub fn set_hardware_gain(&self, gain: u8) -> Result<(), TransportError> {
        self.update(|s| &mut s.hardware_gain, gain, TransmitAction::TransmitHardwareGain(gain))
    }

    pub fn set_transmit_frequency(&self, frequency: i32) -> Result<(), TransportError> {
        self.update(
            |s| &mut s.frequency,
            frequency,
            TransmitAction::TransmitFrequency(frequency),
        )
    }

    pub fn set_pa_enabled(&self, enabled: bool) -> Result<(), TransportError> {
        self.update(|s| &mut s.pa_enabled, enabled, TransmitAction::PaEnabled(enabled))
    }

    pub fn hardware_gain(&self) -> u8 {
        self.state
            .lock()
            .hardware_gain
            .unwrap_or(self.descriptor.hardware_gain)
    }

    pub fn software_gain(&self) -> u8 {
        self.state.lock().software_gain.unwrap_or(0)
    }

    /// Attach local transmit audio. Replaces any running back-channel.
    pub fn set_transmit_stream(&self, input: Arc<SampleStream>) -> crate::Result<()> {
        let mut back_channel = self.back_channel.lock();
        if let Some(mut previous) = back_channel.take() {
            previous.stop();
        }
        self.alive.store(true, Ordering::Release);
        *back_channel = Some(BackChannel::spawn(
            self.sender.clone(),
            input,
            self.alive.clone(),
        )?);
        Ok(())
    }

    /// Record state reported by the server
    pub fn apply_remote(&self, actions: &[TransmitAction], now: Instant) {
        let mut state = self.state.lock();
        for action in actions {
            match action {
                TransmitAction::TransmitStatus(pressed) => {
                    tracing::info!("From remote: tx = {}", pressed);
                    if *pressed != state.remote_pressed {
                        state.remote_pressed = *pressed;
                        state.remote_changed_at = Some(now);
                    }
                }
                TransmitAction::Unknown(key) => {
                    tracing::debug!("Ignoring remote transmit key {}", key)
                }
                other => tracing::debug!("Remote transmit state: {:?}", other),
            }
        }
    }

    /// Local press state or the remote one, the latter delayed by the
    /// combined prebuffer leads
    pub fn tx_status_at(&self, now: Instant) -> bool {
        let state = self.state.lock();
        let mut remote = state.remote_pressed;
        if let Some(changed_at) = state.remote_changed_at {
            if now.saturating_duration_since(changed_at) < self.leads.total() {
                remote = !remote;
            }
        }
        state.tx_status.unwrap_or(false) || remote
    }

    pub fn tx_status(&self) -> bool {
        self.tx_status_at(Instant::now())
    }

    /// Stop the back-channel and join it. Further setters are still
    /// accepted but nothing streams until a new transmit stream is set.
    pub fn shutdown(&self) {
        self.alive.store(false, Ordering::Release);
        if let Some(mut back_channel) = self.back_channel.lock().take() {
            back_channel.stop();
        }
    }
}

impl Drop for RemoteTransmitter {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Emits transmit status edges from the worker's idle hook
pub struct TxStatusMonitor {
    previous: bool,
    events: Sender<bool>,
}

impl TxStatusMonitor {
    pub fn new(events: Sender<bool>) -> Self {
        Self {
            previous: false,
            events,
        }
    }

    /// Returns the new status when it changed
    pub fn poll(&mut self, status: bool) -> Option<bool> {
        if status == self.previous {
            return None;
        }
        tracing::info!("Emit TX status: {}", status);
        self.previous = status;
        // nobody listening is fine
        let _ = self.events.send(status);
        Some(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::framing::Packet;
    use crate::network::sender::tests::SharedBuffer;
    use crate::protocol::{CommandPacket, PacketType};

    fn transmitter(leads: PrebufferLeads) -> (RemoteTransmitter, SharedBuffer) {
        let buffer = SharedBuffer::default();
        let sender = Arc::new(PacketSender::new(buffer.clone()));
        (
            RemoteTransmitter::new(sender, TransmitterDescriptor::default(), leads),
            buffer,
        )
    }

    fn actions(packets: &[Packet]) -> Vec<String> {
        packets
            .iter()
            .filter(|p| p.packet_type() == Some(PacketType::Command))
            .map(|p| CommandPacket::parse(p.payload.clone()).unwrap())
            .filter(|c| c.command() == Some(Command::TransmitAction))
            .map(|c| String::from_utf8_lossy(&c.args).trim_end_matches('\0').to_string())
            .collect()
    }

    #[test]
    fn test_setters_only_send_changes() {
        let (tx, buffer) = transmitter(PrebufferLeads::new(0, 0));
        tx.set_pa_enabled(true).unwrap();
        tx.set_pa_enabled(true).unwrap();
        tx.set_hardware_gain(20).unwrap();
        tx.set_hardware_gain(20).unwrap();
        tx.set_hardware_gain(21).unwrap();
        tx.set_transmit_status(true).unwrap();
        tx.set_transmit_status(true).unwrap();
        tx.set_transmit_frequency(7_074_000).unwrap();
        tx.set_software_gain(3).unwrap();

        assert_eq!(
            actions(&buffer.packets()),
            vec![
                r#"{"paEnabled":true}"#,
                r#"{"transmitHardwareGain":20}"#,
                r#"{"transmitHardwareGain":21}"#,
                r#"{"transmitStatus":true}"#,
                r#"{"transmitFrequency":7074000}"#,
                r#"{"transmitSoftwareGain":3}"#,
            ]
        );
        assert_eq!(tx.hardware_gain(), 21);
        assert_eq!(tx.software_gain(), 3);
    }

    #[test]
    fn test_closed_sender_is_a_no_op() {
        let (tx, buffer) = transmitter(PrebufferLeads::new(0, 0));
        tx.sender.mark_closed();
        tx.set_pa_enabled(true).unwrap();
        assert!(buffer.packets().is_empty());
        assert_eq!(tx.hardware_gain(), TransmitterDescriptor::default().hardware_gain);
    }

    #[test]
    fn test_remote_status_waits_for_leads() {
        let (tx, _buffer) = transmitter(PrebufferLeads::new(100, 200));
        let t0 = Instant::now();
        assert!(!tx.tx_status_at(t0));

        tx.apply_remote(&[TransmitAction::TransmitStatus(true)], t0);
        assert!(!tx.tx_status_at(t0 + Duration::from_millis(299)));
        assert!(tx.tx_status_at(t0 + Duration::from_millis(300)));

        let t1 = t0 + Duration::from_secs(1);
        tx.apply_remote(&[TransmitAction::TransmitStatus(false)], t1);
        assert!(tx.tx_status_at(t1 + Duration::from_millis(100)));
        assert!(!tx.tx_status_at(t1 + Duration::from_millis(300)));

        // repeated reports do not restart the delay
        tx.apply_remote(&[TransmitAction::TransmitStatus(false)], t1 + Duration::from_millis(400));
        assert!(!tx.tx_status_at(t1 + Duration::from_millis(450)));
    }

    #[test]
    fn test_local_status_wins() {
        let (tx, _buffer) = transmitter(PrebufferLeads::new(100, 100));
        tx.set_transmit_status(true).unwrap();
        assert!(tx.tx_status());
        tx.apply_remote(&[TransmitAction::Unknown("swr".into())], Instant::now());
        assert!(tx.tx_status());
    }

    #[test]
    fn test_monitor_suppresses_repeats() {
        let (events_tx, events_rx) = crossbeam_channel::unbounded();
        let mut monitor = TxStatusMonitor::new(events_tx);
        assert_eq!(monitor.poll(false), None);
        assert_eq!(monitor.poll(true), Some(true));
        assert_eq!(monitor.poll(true), None);
        assert_eq!(monitor.poll(false), Some(false));
        assert_eq!(events_rx.try_iter().collect::<Vec<_>>(), vec![true, false]);
    }

    #[test]
    fn test_shutdown_joins_back_channel() {
        let (tx, _buffer) = transmitter(PrebufferLeads::new(0, 0));
        let input = Arc::new(SampleStream::new(4800));
        tx.set_transmit_stream(input.clone()).unwrap();
        tx.set_transmit_stream(input.clone()).unwrap();
        tx.shutdown();
        assert!(tx.back_channel.lock().is_none());
        // the stream is re-armed for whoever owns it
        input.swap(vec![]).unwrap();
        assert_eq!(input.try_read(), Some(vec![]));
    }
}
