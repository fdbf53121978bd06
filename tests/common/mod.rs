#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use crc16::{State, MODBUS};
use solarread::{
    Candidate, ClientError, ConfiguredDevice, Consumer, Discovery, Telemetry, Transport,
    TransportError,
};
use tokio::sync::{mpsc, Notify};

#[derive(Debug, Default)]
pub struct Stats {
    pub discovers: u32,
    pub connects: u32,
    pub disconnects: u32,
    pub writes: Vec<Vec<u8>>,
}

/// What the device sends back for a written request.
pub type Responder = fn(&[u8]) -> Option<Vec<u8>>;

/// In-memory peripheral. Frames pushed through the sender returned by `new` are
/// delivered as notifications; `None` ends the notification stream.
pub struct MockTransport {
    pub found: bool,
    pub candidates: Vec<Candidate>,
    pub connect_script: VecDeque<bool>,
    pub responder: Option<Responder>,
    /// Refuse function 6 writes the way a device without a writable
    /// characteristic does.
    pub reject_writes: bool,
    pub discover_gate: Option<Arc<Notify>>,
    stats: Arc<Mutex<Stats>>,
    frames: mpsc::UnboundedReceiver<Option<Vec<u8>>>,
    pending: VecDeque<Vec<u8>>,
}

impl MockTransport {
    pub fn new() -> (Self, mpsc::UnboundedSender<Option<Vec<u8>>>, Arc<Mutex<Stats>>) {
        let (tx, frames) = mpsc::unbounded_channel();
        let stats = Arc::new(Mutex::new(Stats::default()));
        let transport = Self {
            found: true,
            candidates: Vec::new(),
            connect_script: VecDeque::new(),
            responder: None,
            reject_writes: false,
            discover_gate: None,
            stats: stats.clone(),
            frames,
            pending: VecDeque::new(),
        };
        (transport, tx, stats)
    }

    pub fn with_connects(mut self, outcomes: &[bool]) -> Self {
        self.connect_script = outcomes.iter().copied().collect();
        self
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn discover(&mut self, _: &ConfiguredDevice) -> Result<Discovery, TransportError> {
        if let Some(gate) = &self.discover_gate {
            gate.notified().await;
        }
        self.stats.lock().unwrap().discovers += 1;
        if self.found {
            Ok(Discovery::Found)
        } else {
            Ok(Discovery::NotFound { candidates: self.candidates.clone() })
        }
    }

    async fn connect(&mut self) -> Result<(), TransportError> {
        self.stats.lock().unwrap().connects += 1;
        match self.connect_script.pop_front() {
            Some(false) => Err(TransportError::Other("connection refused".into())),
            _ => Ok(()),
        }
    }

    async fn write(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        if self.reject_writes && frame.get(1) == Some(&6) {
            return Err(TransportError::Unsupported("the write characteristic"));
        }
        self.stats.lock().unwrap().writes.push(frame.to_vec());
        if let Some(reply) = self.responder.and_then(|responder| responder(frame)) {
            self.pending.push_back(reply);
        }
        Ok(())
    }

    async fn next_notification(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        if let Some(frame) = self.pending.pop_front() {
            return Ok(Some(frame));
        }
        match self.frames.recv().await {
            Some(frame) => Ok(frame),
            // Test dropped its sender: behave like a silent device.
            None => std::future::pending().await,
        }
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        self.stats.lock().unwrap().disconnects += 1;
        Ok(())
    }
}

/// Forwards everything it receives into channels the test can await.
pub struct ChannelConsumer {
    data: mpsc::UnboundedSender<Telemetry>,
    errors: mpsc::UnboundedSender<String>,
}

impl ChannelConsumer {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Telemetry>, mpsc::UnboundedReceiver<String>) {
        let (data, data_rx) = mpsc::unbounded_channel();
        let (errors, errors_rx) = mpsc::unbounded_channel();
        (Arc::new(Self { data, errors }), data_rx, errors_rx)
    }
}

impl Consumer for ChannelConsumer {
    fn on_data(&self, _: &ConfiguredDevice, telemetry: &Telemetry) -> anyhow::Result<()> {
        let _ = self.data.send(telemetry.clone());
        Ok(())
    }

    fn on_error(&self, _: &ConfiguredDevice, error: &ClientError) -> anyhow::Result<()> {
        let kind = match error {
            ClientError::Configuration { .. } => "configuration",
            ClientError::Discovery(_) => "discovery",
            ClientError::ReconnectExhausted { .. } => "exhausted",
            ClientError::FatalReconnect(_) => "fatal_reconnect",
        };
        let _ = self.errors.send(kind.to_string());
        Ok(())
    }
}

pub fn device() -> ConfiguredDevice {
    ConfiguredDevice {
        device_id: 255,
        alias: "RMTShunt300A1B2".into(),
        address: "AA:BB:CC:DD:EE:FF".into(),
        adapter: "hci0".into(),
    }
}

/// A 110 byte shunt notification carrying -2.000 A at 12.600 V.
pub fn shunt_frame() -> Vec<u8> {
    let mut frame = vec![0u8; 110];
    frame[0] = 0xff;
    frame[1] = 0x57;
    frame[21..24].copy_from_slice(&[0xff, 0xf8, 0x30]);
    frame[25..28].copy_from_slice(&[0x00, 0x31, 0x38]);
    frame
}

/// Answers function 3 requests the way a charge controller does, with the low
/// byte of every word set to its index.
pub fn controller_responder(request: &[u8]) -> Option<Vec<u8>> {
    if request.get(1) != Some(&3) {
        return None;
    }
    let words = u16::from_be_bytes([request[4], request[5]]) as usize;
    let mut reply = vec![request[0], 3, (words * 2) as u8];
    for i in 0..words {
        reply.extend_from_slice(&[0x00, i as u8]);
    }
    let crc = State::<MODBUS>::calculate(&reply).to_le_bytes();
    reply.extend_from_slice(&crc);
    Some(reply)
}
