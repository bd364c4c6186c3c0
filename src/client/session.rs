//! Client session
//!
//! A [`Session`] owns one server connection: the receive worker, the DSP
//! pipeline feeding the host's output stream, the ack registry and the
//! optional remote transmitter. Host calls may come from any thread.

use bytes::Bytes;
use crossbeam_channel::Receiver;
use parking_lot::Mutex;
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicI64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::Span;
use uuid::Uuid;

use crate::auth::{Challenge, Handshake};
use crate::client::pipeline::Pipeline;
use crate::client::state::{SessionState, SessionStats, StateCell, StatsSnapshot};
use crate::client::worker::Worker;
use crate::codec::{BasebandDecompressor, BasebandFrame, EfftControl};
use crate::config::ClientConfig;
use crate::dsp::{
    FailureHook, Prebuffer, PrebufferHandle, PrebufferStats, SampleStream, Stream,
};
use crate::error::{ConnectError, Error, Result, TransportError};
use crate::network::{connect, AckRegistry, PacketSender, PacketWaiter, ShutdownHandle, WaitError};
use crate::network::framing::PacketReader;
use crate::protocol::{Command, CompressionType, SampleType};
use crate::transmit::{PrebufferLeads, RemoteTransmitter, TxStatusMonitor};

/// State shared between the host-facing [`Session`] and its worker
pub(crate) struct Shared {
    pub(crate) id: Uuid,
    pub(crate) config: ClientConfig,
    pub(crate) hmac_key: Mutex<Option<Vec<u8>>>,
    pub(crate) sender: Arc<PacketSender>,
    pub(crate) shutdown: ShutdownHandle,
    pub(crate) acks: AckRegistry,
    pub(crate) handshake: Handshake,
    pub(crate) state: StateCell,
    pub(crate) stats: SessionStats,
    pub(crate) busy: AtomicBool,
    /// Rate last announced by the server
    pub(crate) sample_rate: Mutex<f64>,
    /// Rate sent with the next START
    pub(crate) requested_sample_rate: AtomicI32,
    pub(crate) remote_frequency: Mutex<Option<f64>>,
    pub(crate) leads: PrebufferLeads,
    pub(crate) transmitter: Mutex<Option<Arc<RemoteTransmitter>>>,
    pub(crate) ui_snapshot: Mutex<Bytes>,
    pub(crate) stream_time_ms: AtomicI64,
    pub(crate) prebuffer: PrebufferHandle,
    pub(crate) efft: Arc<EfftControl>,
    pub(crate) decomp_in: Arc<Stream<BasebandFrame>>,
}

pub struct Session {
    inner: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
    pipeline: Mutex<Option<Pipeline>>,
    tx_events: Receiver<bool>,
    /// Serializes synchronous UI requests
    ui_lock: Mutex<()>,
    span: Span,
    closed: AtomicBool,
}

impl Session {
    /// Connect, start the worker and pipeline, and fetch the initial UI.
    ///
    /// Decoded baseband is written to `output` until the session closes.
    pub fn connect(
        config: &ClientConfig,
        output: Arc<SampleStream>,
    ) -> std::result::Result<Self, ConnectError> {
        let id = Uuid::new_v4();
        let span = tracing::info_span!("session", id = %id);
        let _enter = span.enter();

        tracing::info!("Connecting to {}:{}", config.host, config.port);
        let stream = connect(&config.host, config.port, config.connect_timeout())?;
        let session = Self::spawn(id, config, stream, output, span.clone())
            .map_err(|e| ConnectError::Refused(e.to_string()))?;

        session.inner.state.advance(SessionState::AwaitingUi);
        match session.get_ui() {
            Ok(_) => {}
            Err(Error::Connect(e)) => return Err(e),
            Err(e) => return Err(ConnectError::Refused(e.to_string())),
        }
        session.inner.state.advance(SessionState::Idle);

        session.set_sample_type(config.sample_type).map_err(refused)?;
        session.set_compression(config.compression).map_err(refused)?;
        session.set_loss_factor(config.loss_factor).map_err(refused)?;
        tracing::info!("Connected");

        drop(_enter);
        Ok(session)
    }

    fn spawn(
        id: Uuid,
        config: &ClientConfig,
        stream: TcpStream,
        output: Arc<SampleStream>,
        span: Span,
    ) -> Result<Self> {
        let shutdown = ShutdownHandle::new(&stream)?;
        let sender = Arc::new(PacketSender::new(stream.try_clone()?));

        let efft = Arc::new(EfftControl::new(config.noise_multiplier_db));
        // a stage that cannot hand off ends the session: the worker sees the
        // socket go down and tears down to Closed
        let on_failure: FailureHook = {
            let sender = sender.clone();
            let shutdown = ShutdownHandle::new(&stream)?;
            Arc::new(move || {
                tracing::error!("Pipeline failed, closing connection");
                sender.mark_closed();
                shutdown.shutdown();
            })
        };
        let pipeline = Pipeline::spawn(
            Prebuffer::new(config.rx_prebuffer_msec, config.sample_rate as f64),
            efft.clone(),
            output,
            on_failure,
        )?;

        let inner = Arc::new(Shared {
            id,
            config: config.clone(),
            hmac_key: Mutex::new(config.hmac_key_bytes().map(<[u8]>::to_vec)),
            sender,
            shutdown,
            acks: AckRegistry::new(),
            handshake: Handshake::new(),
            state: StateCell::new(SessionState::Connecting),
            stats: SessionStats::default(),
            busy: AtomicBool::new(false),
            sample_rate: Mutex::new(config.sample_rate as f64),
            requested_sample_rate: AtomicI32::new(config.sample_rate),
            remote_frequency: Mutex::new(None),
            leads: PrebufferLeads::new(config.rx_prebuffer_msec, config.tx_prebuffer_msec),
            transmitter: Mutex::new(None),
            ui_snapshot: Mutex::new(Bytes::new()),
            stream_time_ms: AtomicI64::new(0),
            prebuffer: pipeline.prebuffer(),
            efft,
            decomp_in: pipeline.input(),
        });

        let (events_tx, tx_events) = crossbeam_channel::unbounded();
        let worker = Worker::new(
            PacketReader::new(stream),
            inner.clone(),
            BasebandDecompressor::new()?,
            TxStatusMonitor::new(events_tx),
        );
        let worker_span = span.clone();
        let handle = thread::Builder::new()
            .name("session-worker".into())
            .spawn(move || {
                let _enter = worker_span.enter();
                worker.run();
            })?;

        Ok(Self {
            inner,
            worker: Mutex::new(Some(handle)),
            pipeline: Mutex::new(Some(pipeline)),
            tx_events,
            ui_lock: Mutex::new(()),
            span,
            closed: AtomicBool::new(false),
        })
    }

    /// Send a fire-and-forget command; a closed connection is not an error
    fn command(&self, cmd: Command, args: &[u8]) -> Result<()> {
        if !self.inner.sender.is_open() {
            tracing::debug!("Dropping {:?}: connection closed", cmd);
            return Ok(());
        }
        self.inner.sender.send_command(cmd, args)?;
        Ok(())
    }

    pub fn set_frequency(&self, frequency: f64) -> Result<()> {
        self.command(Command::SetFrequency, &frequency.to_le_bytes())
    }

    /// Rate requested from the server on the next [`start`](Self::start)
    pub fn set_sample_rate(&self, sample_rate: i32) -> Result<()> {
        self.inner
            .requested_sample_rate
            .store(sample_rate, Ordering::Relaxed);
        Ok(())
    }

    pub fn set_sample_type(&self, sample_type: SampleType) -> Result<()> {
        self.command(Command::SetSampleType, &[sample_type as u8])
    }

    pub fn set_compression(&self, compression: CompressionType) -> Result<()> {
        let legacy = compression == CompressionType::Legacy;
        let lossy = compression == CompressionType::Lossy;
        self.command(Command::SetCompression, &[legacy as u8])?;
        self.command(Command::SetFftZstdCompression, &[lossy as u8])
    }

    pub fn set_loss_factor(&self, factor: f64) -> Result<()> {
        self.command(Command::SetEfftLossRate, &factor.to_le_bytes())
    }

    pub fn set_noise_multiplier_db(&self, db: f32) {
        self.inner.efft.set_noise_multiplier_db(db);
    }

    pub fn set_rx_prebuffer_msec(&self, msec: u32) {
        self.inner.leads.rx_msec.store(msec, Ordering::Relaxed);
    }

    pub fn set_tx_prebuffer_msec(&self, msec: u32) {
        self.inner.leads.tx_msec.store(msec, Ordering::Relaxed);
    }

    pub fn set_hmac_key(&self, key: Option<Vec<u8>>) {
        *self.inner.hmac_key.lock() = key;
    }

    /// Start streaming.
    ///
    /// A pending challenge without a configured key fails with
    /// [`AuthError::MissingCredential`](crate::error::AuthError) before
    /// anything is sent.
    pub fn start(&self) -> Result<()> {
        if !self.inner.sender.is_open() {
            return Ok(());
        }
        let tx_prebuffer = self.inner.leads.tx_msec.load(Ordering::Relaxed);
        let args = {
            let key = self.inner.hmac_key.lock();
            self.inner
                .handshake
                .start_args(key.as_deref(), tx_prebuffer as i32)?
        };

        let rx_prebuffer = self.inner.leads.rx_msec.load(Ordering::Relaxed);
        self.inner.prebuffer.set_prebuffer_msec(rx_prebuffer);
        self.inner.prebuffer.set_sample_rate(*self.inner.sample_rate.lock());
        self.inner.prebuffer.clear();
        self.inner.efft.clear_noise_figure();

        let requested = self.inner.requested_sample_rate.load(Ordering::Relaxed);
        self.command(Command::SetSampleRate, &requested.to_le_bytes())?;
        self.command(Command::Start, &args.encode()?)?;
        self.inner.state.advance(SessionState::Streaming);
        tracing::info!("Started at {} S/s", requested);

        self.get_ui()?;
        Ok(())
    }

    pub fn stop(&self) -> Result<()> {
        if !self.inner.sender.is_open() {
            return Ok(());
        }
        self.command(Command::Stop, &[])?;
        self.get_ui()?;
        self.inner.prebuffer.clear();
        self.inner.state.advance(SessionState::Idle);
        tracing::info!("Stopped");
        Ok(())
    }

    /// Fetch the server UI, waiting up to the protocol timeout
    pub fn get_ui(&self) -> Result<Bytes> {
        let _guard = self.ui_lock.lock();
        if !self.inner.sender.is_open() {
            return Err(ConnectError::Closed.into());
        }
        self.request(Command::GetUi, Command::GetUi, &[])
    }

    /// Forward a UI interaction. With `sync` set, wait for the server's
    /// resync and return the refreshed UI.
    pub fn ui_action(&self, sync: bool, payload: &[u8]) -> Result<Option<Bytes>> {
        let mut args = Vec::with_capacity(payload.len() + 1);
        args.push(sync as u8);
        args.extend_from_slice(payload);

        if !sync {
            self.command(Command::UiAction, &args)?;
            return Ok(None);
        }

        let _guard = self.ui_lock.lock();
        if !self.inner.sender.is_open() {
            return Err(ConnectError::Closed.into());
        }
        self.request(Command::UiAction, Command::UiAction, &args).map(Some)
    }

    /// Register a waiter for the ack of `cmd`
    pub fn await_ack(&self, cmd: Command) -> Result<Arc<PacketWaiter>> {
        Ok(self.inner.acks.register(cmd)?)
    }

    /// Drop a waiter that will no longer be waited on
    pub fn handled(&self, waiter: &Arc<PacketWaiter>) {
        self.inner.acks.release(waiter);
    }

    fn request(&self, cmd: Command, ack: Command, args: &[u8]) -> Result<Bytes> {
        let waiter = self.await_ack(ack)?;
        if let Err(e) = self.inner.sender.send_command(cmd, args) {
            self.handled(&waiter);
            return Err(e.into());
        }

        let result = waiter.wait(self.inner.config.protocol_timeout());
        self.handled(&waiter);
        match result {
            Ok(args) => Ok(args),
            Err(WaitError::Timeout) if self.is_busy() => Err(ConnectError::Busy.into()),
            Err(WaitError::Timeout) => {
                tracing::warn!("No answer to {:?}", cmd);
                Err(ConnectError::Timeout.into())
            }
            Err(WaitError::Cancelled) if self.is_busy() => Err(ConnectError::Busy.into()),
            Err(WaitError::Cancelled) => Err(ConnectError::Closed.into()),
        }
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn state(&self) -> SessionState {
        self.inner.state.get()
    }

    pub fn is_open(&self) -> bool {
        self.inner.sender.is_open()
    }

    /// Whether the server asked us to disconnect
    pub fn is_busy(&self) -> bool {
        self.inner.busy.load(Ordering::Acquire)
    }

    /// Last UI snapshot received from the server
    pub fn ui_snapshot(&self) -> Bytes {
        self.inner.ui_snapshot.lock().clone()
    }

    pub fn sample_rate(&self) -> f64 {
        *self.inner.sample_rate.lock()
    }

    pub fn remote_frequency(&self) -> Option<f64> {
        *self.inner.remote_frequency.lock()
    }

    pub fn challenge(&self) -> Option<Challenge> {
        self.inner.handshake.challenge()
    }

    pub fn transmitter(&self) -> Option<Arc<RemoteTransmitter>> {
        self.inner.transmitter.lock().clone()
    }

    /// Transmit status edges, emitted by the worker
    pub fn tx_status_events(&self) -> Receiver<bool> {
        self.tx_events.clone()
    }

    /// Wall-clock milliseconds of the samples currently leaving the prebuffer
    pub fn stream_time_ms(&self) -> i64 {
        self.inner.stream_time_ms.load(Ordering::Acquire)
    }

    pub fn prebuffer_stats(&self) -> PrebufferStats {
        self.inner.prebuffer.stats()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.inner.stats.snapshot(self.inner.sender.bytes_sent())
    }

    /// Close the connection and join every thread. Idempotent.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let _enter = self.span.enter();

        self.inner.decomp_in.stop_writer();
        self.inner.sender.mark_closed();
        self.inner.shutdown.shutdown();
        if let Some(worker) = self.worker.lock().take() {
            if worker.join().is_err() {
                tracing::error!("Worker thread panicked");
            }
        }
        self.inner.decomp_in.clear_write_stop();

        if let Some(mut pipeline) = self.pipeline.lock().take() {
            pipeline.stop();
        }
        if let Some(transmitter) = self.inner.transmitter.lock().take() {
            transmitter.shutdown();
        }
        self.inner.state.advance(SessionState::Closed);
        tracing::info!("Session closed");
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}

fn refused(e: Error) -> ConnectError {
    match e {
        Error::Connect(e) => e,
        Error::Transport(TransportError::Closed) => ConnectError::Closed,
        other => ConnectError::Refused(other.to_string()),
    }
}
