//! Receive loop
//!
//! Runs on its own thread for the lifetime of a session: idle hook, blocking
//! receive, dispatch. Transport errors and pipeline failures end the loop;
//! malformed or unknown packets are logged and skipped.

use bytes::Bytes;
use std::io::Read;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use crate::client::session::Shared;
use crate::client::state::SessionState;
use crate::codec::{BasebandDecompressor, BasebandEncoding};
use crate::error::{Error, TransportError};
use crate::network::framing::{Packet, PacketReader};
use crate::protocol::transmit::{TransmitAction, TransmitterDescriptor};
use crate::protocol::{parse_f32_array, Command, CommandPacket, PacketType};
use crate::transmit::{RemoteTransmitter, TxStatusMonitor};

pub(crate) struct Worker<R> {
    reader: PacketReader<R>,
    shared: Arc<Shared>,
    decompressor: BasebandDecompressor,
    monitor: TxStatusMonitor,
}

impl<R: Read> Worker<R> {
    pub(crate) fn new(
        reader: PacketReader<R>,
        shared: Arc<Shared>,
        decompressor: BasebandDecompressor,
        monitor: TxStatusMonitor,
    ) -> Self {
        Self {
            reader,
            shared,
            decompressor,
            monitor,
        }
    }

    pub(crate) fn run(mut self) {
        loop {
            self.idle();

            let packet = match self.reader.receive() {
                Ok(packet) => packet,
                Err(TransportError::Closed) => {
                    tracing::info!("Connection closed");
                    break;
                }
                Err(e) => {
                    tracing::error!("Receive failed: {}", e);
                    break;
                }
            };
            self.shared
                .stats
                .bytes_received
                .fetch_add(packet.wire_size() as u64, Ordering::Relaxed);

            if let Err(e) = self.dispatch(packet) {
                tracing::error!("Closing session: {}", e);
                break;
            }
        }

        self.shared.sender.mark_closed();
        self.shared.shutdown.shutdown();
        self.shared.state.advance(SessionState::Closed);
        let cancelled = self.shared.acks.cancel_all();
        if cancelled > 0 {
            tracing::debug!("Cancelled {} pending waiters", cancelled);
        }
        tracing::debug!("Worker stopped after {} packets", self.reader.packets_read());
    }

    /// Emit transmit status edges
    fn idle(&mut self) {
        let transmitter = self.shared.transmitter.lock().clone();
        if let Some(transmitter) = transmitter {
            self.monitor.poll(transmitter.tx_status());
        }
    }

    fn dispatch(&mut self, packet: Packet) -> Result<(), Error> {
        let Some(packet_type) = packet.packet_type() else {
            self.shared.stats.unknown_packets.fetch_add(1, Ordering::Relaxed);
            tracing::warn!("Skipping packet of unknown type {}", packet.raw_type);
            return Ok(());
        };

        match packet_type {
            PacketType::Command => {
                self.shared.stats.command_packets.fetch_add(1, Ordering::Relaxed);
                self.on_command(packet.payload);
                Ok(())
            }
            PacketType::CommandAck => {
                self.shared.stats.ack_packets.fetch_add(1, Ordering::Relaxed);
                self.on_ack(packet.payload);
                Ok(())
            }
            PacketType::Baseband
            | PacketType::BasebandCompressed
            | PacketType::BasebandExperimentalFft => self.on_baseband(packet_type, &packet.payload),
            PacketType::Error => {
                self.shared.stats.error_packets.fetch_add(1, Ordering::Relaxed);
                tracing::error!("Server error: {:?}", packet.payload.first());
                Ok(())
            }
            PacketType::TransmitData => {
                tracing::debug!("Ignoring inbound transmit data");
                Ok(())
            }
        }
    }

    fn on_command(&mut self, payload: Bytes) {
        let packet = match CommandPacket::parse(payload) {
            Ok(packet) => packet,
            Err(e) => {
                tracing::warn!("{}", e);
                return;
            }
        };
        let Some(command) = packet.command() else {
            tracing::warn!("Skipping unknown command {:#x}", packet.raw_cmd);
            return;
        };
        let args = packet.args;
        tracing::trace!("<- {:?} ({} bytes)", command, args.len());

        match command {
            Command::SetSampleRate => match read_f64(&args) {
                Some(rate) => {
                    tracing::info!("Server sample rate: {} S/s", rate);
                    *self.shared.sample_rate.lock() = rate;
                    self.shared.prebuffer.set_sample_rate(rate);
                }
                None => tracing::warn!("SET_SAMPLERATE with {} byte argument", args.len()),
            },
            Command::GetUi => {
                *self.shared.ui_snapshot.lock() = args;
            }
            Command::SecureChallenge => {
                self.shared.handshake.on_challenge(&args);
            }
            Command::SetFrequency => match read_f64(&args) {
                Some(frequency) => {
                    tracing::info!("Server tuned to {} Hz", frequency);
                    *self.shared.remote_frequency.lock() = Some(frequency);
                }
                None => tracing::warn!("SET_FREQUENCY with {} byte argument", args.len()),
            },
            Command::TransmitAction => self.on_transmit_action(&args),
            Command::EfftNoiseFigure => {
                self.shared.efft.set_noise_figure(parse_f32_array(&args));
            }
            Command::SetTransmitterSupported => {
                let mut transmitter = self.shared.transmitter.lock();
                if transmitter.is_none() {
                    *transmitter = Some(Arc::new(RemoteTransmitter::new(
                        self.shared.sender.clone(),
                        TransmitterDescriptor::parse(&args),
                        self.shared.leads.clone(),
                    )));
                }
            }
            Command::SetTransmitterNotSupported => {
                let transmitter = self.shared.transmitter.lock().take();
                if let Some(transmitter) = transmitter {
                    tracing::info!("Remote transmitter withdrawn");
                    transmitter.shutdown();
                }
            }
            Command::Disconnect => {
                tracing::error!("Asked to disconnect by the server");
                self.shared.busy.store(true, Ordering::Release);
                self.shared.state.mark_busy();
                self.shared.acks.cancel_all();
            }
            Command::GetSampleRate
            | Command::UiAction
            | Command::Start
            | Command::Stop
            | Command::SetSampleType
            | Command::SetCompression
            | Command::SetFftZstdCompression
            | Command::SetEfftLossRate => {
                tracing::debug!("Ignoring client-bound {:?}", command);
            }
        }
    }

    fn on_transmit_action(&mut self, args: &[u8]) {
        let actions = match TransmitAction::parse_all(args) {
            Ok(actions) => actions,
            Err(e) => {
                tracing::info!("{}", e);
                return;
            }
        };
        match self.shared.transmitter.lock().as_ref() {
            Some(transmitter) => transmitter.apply_remote(&actions, Instant::now()),
            None => tracing::debug!("Transmit state without a transmitter: {:?}", actions),
        }
    }

    fn on_ack(&mut self, payload: Bytes) {
        let packet = match CommandPacket::parse(payload) {
            Ok(packet) => packet,
            Err(e) => {
                tracing::warn!("{}", e);
                return;
            }
        };
        let Some(command) = packet.command() else {
            tracing::warn!("Skipping ack for unknown command {:#x}", packet.raw_cmd);
            return;
        };

        if matches!(command, Command::GetUi | Command::UiAction) {
            *self.shared.ui_snapshot.lock() = packet.args.clone();
        }
        if !self.shared.acks.notify(command, packet.args) {
            tracing::debug!("Unsolicited ack for {:?}", command);
        }
    }

    fn on_baseband(&mut self, packet_type: PacketType, payload: &[u8]) -> Result<(), Error> {
        let Some(encoding) = BasebandEncoding::from_packet_type(packet_type) else {
            return Ok(());
        };
        self.shared.stats.baseband_packets.fetch_add(1, Ordering::Relaxed);

        if let Some(frame) = self.decompressor.decode(encoding, payload)? {
            self.shared.decomp_in.swap(frame)?;
        }
        self.update_stream_time();
        Ok(())
    }

    /// Wall-clock time of the samples now leaving the prebuffer. Never
    /// moves backwards.
    fn update_stream_time(&self) {
        let now_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_millis() as i64);
        let stream_time = now_ms - self.shared.prebuffer.buffered_msec() as i64;
        self.shared
            .stream_time_ms
            .fetch_max(stream_time, Ordering::AcqRel);
    }
}

fn read_f64(args: &[u8]) -> Option<f64> {
    let bytes: [u8; 8] = args.try_into().ok()?;
    Some(f64::from_le_bytes(bytes))
}
