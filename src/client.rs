//! The per-device worker: connects, polls register sections, decodes replies
//! and hands telemetry to the [`Consumer`].

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::time::{sleep_until, Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::ClientConfig;
use crate::device::{DeviceVariant, Framing};
use crate::dispatch::{dispatch, Consumer};
use crate::error::{ClientError, ProtocolError, TransportError};
use crate::frame::{self, FrameKind};
use crate::rate_limiter::RateLimiter;
use crate::scheduler::SectionScheduler;
use crate::supervisor::{Connected, ConnectionState, ConnectionSupervisor, RetryPolicy};
use crate::telemetry::Telemetry;
use crate::transport::Transport;

/// Requests a running client accepts besides stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    WriteRegister { register: u16, value: u16 },
}

/// What handling a single frame amounted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handled {
    /// The expected section was decoded. `sweep_done` is set when that was the
    /// last section of the device.
    Section { sweep_done: bool },
    WriteAck,
    Dropped,
}

enum Step {
    Next,
    SweepDone,
    Lost(TransportError),
    Cancelled,
}

pub struct DeviceClient<T> {
    config: ClientConfig,
    transport: T,
    consumer: Arc<dyn Consumer>,
    supervisor: ConnectionSupervisor,
    scheduler: SectionScheduler,
    limiter: RateLimiter,
    data: Option<Telemetry>,
    cancel: CancellationToken,
    initialized: watch::Sender<bool>,
    commands: mpsc::Receiver<Command>,
    command_tx: mpsc::Sender<Command>,
}

impl<T: Transport> DeviceClient<T> {
    pub fn new(config: ClientConfig, transport: T, consumer: Arc<dyn Consumer>) -> Self {
        Self::with_retry_policy(config, transport, consumer, RetryPolicy::default())
    }

    pub fn with_retry_policy(
        config: ClientConfig,
        transport: T,
        consumer: Arc<dyn Consumer>,
        policy: RetryPolicy,
    ) -> Self {
        let limiter = match config.rate_limit() {
            Some(interval) => RateLimiter::new(interval),
            None => RateLimiter::disabled(),
        };
        let (initialized, _) = watch::channel(false);
        let (command_tx, commands) = mpsc::channel(8);
        info!(
            alias = %config.device.alias,
            address = %config.device.address,
            variant = ?config.variant,
            "Init client"
        );
        Self {
            scheduler: SectionScheduler::new(config.variant.sections()),
            config,
            transport,
            consumer,
            supervisor: ConnectionSupervisor::new(policy),
            limiter,
            data: None,
            cancel: CancellationToken::new(),
            initialized,
            commands,
            command_tx,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn variant(&self) -> DeviceVariant {
        self.config.variant
    }

    pub fn state(&self) -> ConnectionState {
        self.supervisor.state()
    }

    /// Everything decoded so far, merged across sections. `None` until the first
    /// section has been decoded.
    pub fn last_telemetry(&self) -> Option<&Telemetry> {
        self.data.as_ref()
    }

    pub fn scheduler(&self) -> &SectionScheduler {
        &self.scheduler
    }

    pub(crate) fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub(crate) fn initialized(&self) -> watch::Receiver<bool> {
        self.initialized.subscribe()
    }

    pub(crate) fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.supervisor.subscribe()
    }

    pub(crate) fn command_sender(&self) -> mpsc::Sender<Command> {
        self.command_tx.clone()
    }

    /// Connect, poll until stopped or failed, then release the transport.
    pub async fn run(mut self) {
        let result = self.run_session().await;
        // Whatever happened, a stop waiting on initialization must not hang.
        self.initialized.send_replace(true);

        self.commands.close();
        while let Ok(command) = self.commands.try_recv() {
            warn!(?command, "client stopped, command dropped");
        }

        match result {
            Ok(()) => {
                self.supervisor.disconnect(&mut self.transport).await;
                info!(alias = %self.config.device.alias, "Disconnected");
            }
            Err(err) => {
                error!(alias = %self.config.device.alias, "Exception occurred: {err}");
                let consumer = Arc::clone(&self.consumer);
                let device = &self.config.device;
                dispatch("on_error", || consumer.on_error(device, &err));
                self.supervisor.release(&mut self.transport).await;
            }
        }
    }

    async fn run_session(&mut self) -> Result<(), ClientError> {
        let discovered = self
            .supervisor
            .discover(
                &mut self.transport,
                &self.config.device,
                self.config.variant.alias_prefixes(),
            )
            .await;
        self.initialized.send_replace(true);
        discovered?;

        match self.supervisor.connect(&mut self.transport, &self.cancel).await? {
            Connected::Ready => {}
            Connected::Cancelled => return Ok(()),
        }

        loop {
            if self.cancel.is_cancelled() {
                return Ok(());
            }

            let mut step = match self.request_current_section().await {
                Ok(()) => self.await_section().await,
                Err(err) => Step::Lost(err),
            };

            if matches!(step, Step::SweepDone) {
                if !self.config.continuous {
                    info!("Single read complete");
                    return Ok(());
                }
                if self.config.variant.solicited() {
                    step = self.idle(self.config.poll_interval()).await;
                }
            }

            match step {
                Step::Next | Step::SweepDone => {}
                Step::Cancelled => return Ok(()),
                Step::Lost(cause) => {
                    let reconnected = self
                        .supervisor
                        .reconnect(&mut self.transport, cause, &self.cancel)
                        .await?;
                    if reconnected == Connected::Cancelled {
                        return Ok(());
                    }
                    self.scheduler.reset();
                }
            }
        }
    }

    async fn request_current_section(&mut self) -> Result<(), TransportError> {
        if !self.config.variant.solicited() {
            return Ok(());
        }
        let section = *self.scheduler.current();
        let request =
            frame::encode_read(self.config.device.device_id, section.register, section.word_count);
        debug!(tx = %hex::encode(&request), register = section.register, "read section");
        self.transport.write(&request).await
    }

    /// Wait until the outstanding section has been answered.
    async fn await_section(&mut self) -> Step {
        let deadline = self.config.read_timeout().map(|timeout| Instant::now() + timeout);
        loop {
            let timer = async {
                match deadline {
                    Some(deadline) => sleep_until(deadline).await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                () = self.cancel.cancelled() => return Step::Cancelled,
                () = timer => {
                    error!(
                        register = self.scheduler.current().register,
                        "on_read_timeout => please check your device_id!"
                    );
                    return Step::Lost(TransportError::Timeout);
                }
                Some(command) = self.commands.recv() => {
                    if let Some(lost) = self.serve(command).await {
                        return lost;
                    }
                }
                notification = self.transport.next_notification() => {
                    let frame = match notification {
                        Ok(Some(frame)) => frame,
                        Ok(None) => return Step::Lost(TransportError::StreamEnded),
                        Err(err) => return Step::Lost(err),
                    };
                    match self.handle_frame(&frame) {
                        Handled::Section { sweep_done: true } => return Step::SweepDone,
                        Handled::Section { sweep_done: false } => return Step::Next,
                        Handled::WriteAck | Handled::Dropped => {}
                    }
                }
            }
        }
    }

    /// Sleep between sweeps, serving commands meanwhile.
    async fn idle(&mut self, period: Duration) -> Step {
        let deadline = Instant::now() + period;
        loop {
            tokio::select! {
                () = self.cancel.cancelled() => return Step::Cancelled,
                () = sleep_until(deadline) => return Step::Next,
                Some(command) = self.commands.recv() => {
                    if let Some(lost) = self.serve(command).await {
                        return lost;
                    }
                }
            }
        }
    }

    /// Run `command`. Only a failure of the link itself ends the session; a
    /// request the device can't take is logged and skipped.
    async fn serve(&mut self, command: Command) -> Option<Step> {
        match self.execute(command).await {
            Ok(()) => None,
            Err(TransportError::Unsupported(what)) => {
                warn!(?command, "device does not support {what}, command skipped");
                None
            }
            Err(err) => Some(Step::Lost(err)),
        }
    }

    async fn execute(&mut self, command: Command) -> Result<(), TransportError> {
        match command {
            Command::WriteRegister { register, value } => {
                info!(register, value, "setting register");
                let request = frame::encode_write(self.config.device.device_id, register, value);
                debug!(tx = %hex::encode(&request), "write register");
                self.transport.write(&request).await
            }
        }
    }

    /// Classify and decode one notification. Once the last section of a sweep
    /// is in, the merged snapshot is rate limited and dispatched.
    ///
    /// Never fails: frames that can't be used are logged and dropped, leaving the
    /// telemetry snapshot untouched.
    pub fn handle_frame(&mut self, frame: &[u8]) -> Handled {
        debug!(rx = %hex::encode(frame), "notification");
        let Some(kind) = frame::classify(frame) else {
            return Handled::Dropped;
        };
        match kind {
            FrameKind::ReadResponse => self.handle_read_response(frame),
            FrameKind::Unknown(op) if Some(op) == self.config.variant.notify_operation() => {
                self.handle_read_response(frame)
            }
            FrameKind::WriteAck => {
                match frame::decode_write_ack(frame) {
                    Some((register, value)) => info!(register, value, "write operation complete"),
                    None => warn!(len = frame.len(), "short write acknowledgement"),
                }
                Handled::WriteAck
            }
            FrameKind::Unknown(op) => {
                warn!("on_data_received: {}", ProtocolError::UnknownOperation(op));
                Handled::Dropped
            }
        }
    }

    fn handle_read_response(&mut self, frame: &[u8]) -> Handled {
        let section = *self.scheduler.current();
        let framing = self.config.variant.framing();

        if !section.accepts(frame, framing) {
            let err = ProtocolError::LengthMismatch {
                register: section.register,
                expected: section.expected_len(framing),
                actual: frame.len(),
            };
            warn!("on_data_received: {err}");
            return Handled::Dropped;
        }
        if framing == Framing::ModbusRead && !frame::checksum_ok(frame) {
            warn!(register = section.register, "on_data_received: {}", ProtocolError::Checksum);
            return Handled::Dropped;
        }

        let telemetry = section.parse(frame);
        debug!(register = section.register, fields = telemetry.len(), "decoded section");
        self.data.get_or_insert_with(Telemetry::new).extend(telemetry);

        let sweep_done = self.scheduler.advance();
        if sweep_done {
            self.deliver();
        }
        Handled::Section { sweep_done }
    }

    fn deliver(&mut self) {
        if !self.limiter.should_process(Instant::now()) {
            debug!("rate limited, skipping delivery");
            return;
        }
        if let Some(telemetry) = &self.data {
            let consumer = Arc::clone(&self.consumer);
            let device = &self.config.device;
            dispatch("on_data", || consumer.on_data(device, telemetry));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfiguredDevice;
    use crate::device::shunt::NOTIFY_OPERATION;
    use crate::telemetry::Value;
    use crate::transport::Discovery;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tracing_test::traced_test;

    struct NullTransport {
        found: bool,
    }

    #[async_trait]
    impl Transport for NullTransport {
        async fn discover(&mut self, _: &ConfiguredDevice) -> Result<Discovery, TransportError> {
            if self.found {
                Ok(Discovery::Found)
            } else {
                Ok(Discovery::NotFound { candidates: Vec::new() })
            }
        }
        async fn connect(&mut self) -> Result<(), TransportError> {
            Ok(())
        }
        async fn write(&mut self, _: &[u8]) -> Result<(), TransportError> {
            Ok(())
        }
        async fn next_notification(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
            Ok(None)
        }
        async fn disconnect(&mut self) -> Result<(), TransportError> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct Recorder {
        data: Mutex<Vec<Telemetry>>,
        fail: bool,
    }

    impl Consumer for Recorder {
        fn on_data(&self, _: &ConfiguredDevice, telemetry: &Telemetry) -> anyhow::Result<()> {
            self.data.lock().unwrap().push(telemetry.clone());
            if self.fail {
                anyhow::bail!("consumer failed");
            }
            Ok(())
        }
    }

    fn client(variant: DeviceVariant, consumer: Arc<Recorder>) -> DeviceClient<NullTransport> {
        let device = ConfiguredDevice {
            device_id: 255,
            alias: "RMTShunt300A1B2".into(),
            address: "AA:BB:CC:DD:EE:FF".into(),
            adapter: String::new(),
        };
        let transport = NullTransport { found: true };
        DeviceClient::new(ClientConfig::new(device, variant), transport, consumer)
    }

    fn controller_reply(words: &[u16]) -> Vec<u8> {
        let mut reply = vec![0xff, 0x03, (words.len() * 2) as u8];
        for word in words {
            reply.extend_from_slice(&word.to_be_bytes());
        }
        let crc = crc16::State::<crc16::MODBUS>::calculate(&reply).to_le_bytes();
        reply.extend_from_slice(&crc);
        reply
    }

    fn shunt_frame(amps: [u8; 3], volts: [u8; 3]) -> Vec<u8> {
        let mut frame = vec![0u8; 110];
        frame[0] = 0xff;
        frame[1] = NOTIFY_OPERATION;
        frame[21..24].copy_from_slice(&amps);
        frame[25..28].copy_from_slice(&volts);
        frame
    }

    #[test]
    fn test_shunt_frame_is_decoded_and_dispatched() {
        let recorder = Arc::new(Recorder::default());
        let mut client = client(DeviceVariant::SmartShunt, recorder.clone());

        let handled = client.handle_frame(&shunt_frame([0xff, 0xf8, 0x30], [0x00, 0x31, 0x38]));

        assert_eq!(handled, Handled::Section { sweep_done: true });
        let telemetry = client.last_telemetry().unwrap();
        assert_eq!(telemetry.get("discharge_watts"), Some(Value::Float(-25.2)));
        assert_eq!(recorder.data.lock().unwrap().len(), 1);
    }

    #[traced_test]
    #[test]
    fn test_length_mismatch_keeps_snapshot() {
        let recorder = Arc::new(Recorder::default());
        let mut client = client(DeviceVariant::SmartShunt, recorder.clone());
        client.handle_frame(&shunt_frame([0xff, 0xf8, 0x30], [0x00, 0x31, 0x38]));
        let before = client.last_telemetry().cloned();

        let mut short = shunt_frame([0x00, 0x00, 0x01], [0x00, 0x00, 0x01]);
        short.truncate(100);
        assert_eq!(client.handle_frame(&short), Handled::Dropped);

        assert_eq!(client.last_telemetry().cloned(), before);
        assert_eq!(recorder.data.lock().unwrap().len(), 1);
        assert!(logs_contain("does not match section"));
    }

    #[traced_test]
    #[test]
    fn test_unknown_operation_is_ignored() {
        let recorder = Arc::new(Recorder::default());
        let mut client = client(DeviceVariant::SmartShunt, recorder.clone());
        let mut frame = shunt_frame([0xff, 0xf8, 0x30], [0x00, 0x31, 0x38]);
        frame[1] = 0x99;

        assert_eq!(client.handle_frame(&frame), Handled::Dropped);

        assert!(client.last_telemetry().is_none());
        assert!(recorder.data.lock().unwrap().is_empty());
        assert_eq!(client.scheduler().index(), 0);
        assert!(logs_contain("unknown operation=0x99"));
    }

    #[test]
    fn test_malformed_frame_is_dropped() {
        let recorder = Arc::new(Recorder::default());
        let mut client = client(DeviceVariant::SmartShunt, recorder.clone());
        assert_eq!(client.handle_frame(&[0xff]), Handled::Dropped);
        assert!(client.last_telemetry().is_none());
    }

    #[test]
    fn test_failing_consumer_does_not_break_decoding() {
        let recorder = Arc::new(Recorder { fail: true, ..Default::default() });
        let mut client = client(DeviceVariant::SmartShunt, recorder.clone());

        let frame = shunt_frame([0xff, 0xf8, 0x30], [0x00, 0x31, 0x38]);
        assert_eq!(client.handle_frame(&frame), Handled::Section { sweep_done: true });
        assert_eq!(client.handle_frame(&frame), Handled::Section { sweep_done: true });

        assert_eq!(recorder.data.lock().unwrap().len(), 2);
        assert!(client.last_telemetry().is_some());
    }

    #[test]
    fn test_write_ack_does_not_advance() {
        let recorder = Arc::new(Recorder::default());
        let mut client = client(DeviceVariant::ChargeController, recorder.clone());
        let ack = frame::encode_write(255, 266, 1);

        assert_eq!(client.handle_frame(&ack), Handled::WriteAck);
        assert_eq!(client.scheduler().index(), 0);
        assert!(recorder.data.lock().unwrap().is_empty());
    }

    #[test]
    fn test_controller_crc_mismatch_is_dropped() {
        let recorder = Arc::new(Recorder::default());
        let mut client = client(DeviceVariant::ChargeController, recorder.clone());
        let frame = [0xff, 0x03, 0x02, 0x00, 0x10, 0x00, 0x00];

        assert_eq!(client.handle_frame(&frame), Handled::Dropped);
        assert!(recorder.data.lock().unwrap().is_empty());
    }

    #[test]
    fn test_controller_sections_are_merged_and_dispatched_once() {
        let recorder = Arc::new(Recorder::default());
        let mut client = client(DeviceVariant::ChargeController, recorder.clone());

        let address = client.handle_frame(&controller_reply(&[0x0010]));
        assert_eq!(address, Handled::Section { sweep_done: false });
        assert_eq!(client.last_telemetry().unwrap().get("device_id"), Some(Value::Int(16)));
        assert!(recorder.data.lock().unwrap().is_empty());

        let mut charging = [0u16; 34];
        charging[1] = 126;
        assert_eq!(
            client.handle_frame(&controller_reply(&charging)),
            Handled::Section { sweep_done: false }
        );
        assert_eq!(
            client.handle_frame(&controller_reply(&[2])),
            Handled::Section { sweep_done: true }
        );

        let data = recorder.data.lock().unwrap();
        assert_eq!(data.len(), 1);
        assert_eq!(data[0].get("device_id"), Some(Value::Int(16)));
        assert_eq!(data[0].get("battery_voltage"), Some(Value::Float(12.6)));
        assert!(data[0].get("battery_type").is_some());
    }

    #[traced_test]
    #[tokio::test]
    async fn test_commands_left_on_exit_are_dropped() {
        let mut client = client(DeviceVariant::ChargeController, Arc::new(Recorder::default()));
        client.transport.found = false;
        let commands = client.command_sender();
        commands.send(Command::WriteRegister { register: 266, value: 1 }).await.unwrap();

        client.run().await;

        assert!(logs_contain("command dropped"));
        assert!(commands.send(Command::WriteRegister { register: 266, value: 0 }).await.is_err());
    }
}
