//! Test utilities: frame encoding and a scripted connector
//!
//! [`encode_frame`] produces wire frames for a schema, and
//! [`ScriptedConnector`] replays a fixed sequence of connect outcomes and
//! reads so session behaviour can be driven deterministically.

#![cfg(any(test, feature = "benchmark"))]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::connection::{Connection, Connector};
use crate::types::{FieldDescriptor, FrameSchema, ServerTarget};
use crate::{IngestError, Result};

/// The three-field schema used throughout the tests: `ready`, `fault`, `temp`.
pub fn ready_fault_temp_schema() -> FrameSchema {
    FrameSchema::new(vec![
        FieldDescriptor::bool("ready"),
        FieldDescriptor::bool("fault"),
        FieldDescriptor::float("temp"),
    ])
    .expect("static schema is valid")
}

/// Encode one frame of exactly [`FrameSchema::frame_len`] bytes.
///
/// `bools` and `floats` are given in bool-field and float-field order.
pub fn encode_frame(schema: &FrameSchema, bools: &[bool], floats: &[f32]) -> Vec<u8> {
    assert_eq!(bools.len(), schema.bool_count(), "one value per bool field");
    assert_eq!(floats.len(), schema.float_count(), "one value per float field");

    let mut frame = vec![0u8; schema.frame_len()];
    for (i, _) in bools.iter().enumerate().filter(|(_, set)| **set) {
        frame[i / 8] |= 1 << (i % 8);
    }

    let offset = schema.float_offset();
    for (i, value) in floats.iter().enumerate() {
        let start = offset + i * 4;
        frame[start..start + 4].copy_from_slice(&value.to_le_bytes());
    }
    frame
}

/// One scripted event.
#[derive(Debug, Clone)]
pub enum Step {
    /// A connect attempt that fails
    RefuseConnect,
    /// A connect attempt that succeeds and then serves these reads
    Connect(Vec<Step>),
    /// A read returning these bytes (empty means the peer closed)
    Frame(Vec<u8>),
    /// A read failing with a connection reset
    ReadError,
}

#[derive(Debug, Default)]
struct ScriptState {
    shared: VecDeque<Step>,
    per_server: HashMap<String, VecDeque<Step>>,
    connect_calls: usize,
    heartbeats: Vec<u8>,
}

/// Connector replaying a script. Once the script is exhausted, connect
/// attempts and reads never complete.
///
/// Servers with their own script (see [`ScriptedConnector::per_server`]) use
/// it; every other server draws from the shared script.
#[derive(Debug, Clone, Default)]
pub struct ScriptedConnector {
    state: Arc<Mutex<ScriptState>>,
}

impl ScriptedConnector {
    pub fn new(steps: Vec<Step>) -> Self {
        let state = ScriptState { shared: steps.into(), ..ScriptState::default() };
        Self { state: Arc::new(Mutex::new(state)) }
    }

    /// One script per server name.
    pub fn per_server<I, S>(scripts: I) -> Self
    where
        I: IntoIterator<Item = (S, Vec<Step>)>,
        S: Into<String>,
    {
        let per_server: HashMap<String, VecDeque<Step>> = scripts
            .into_iter()
            .map(|(name, steps)| (name.into(), VecDeque::from(steps)))
            .collect();
        let state = ScriptState { per_server, ..ScriptState::default() };
        Self { state: Arc::new(Mutex::new(state)) }
    }

    /// Number of connect attempts made so far.
    pub fn connects(&self) -> usize {
        lock(&self.state).connect_calls
    }

    /// Every heartbeat byte sent, across all connections.
    pub fn heartbeats(&self) -> Vec<u8> {
        lock(&self.state).heartbeats.clone()
    }
}

fn lock(state: &Mutex<ScriptState>) -> MutexGuard<'_, ScriptState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait::async_trait]
impl Connector for ScriptedConnector {
    type Connection = ScriptedConnection;

    async fn connect(&self, target: &ServerTarget) -> Result<ScriptedConnection> {
        let step = {
            let mut state = lock(&self.state);
            state.connect_calls += 1;
            match state.per_server.get_mut(&target.name) {
                Some(script) => script.pop_front(),
                None => state.shared.pop_front(),
            }
        };

        match step {
            Some(Step::Connect(reads)) => {
                Ok(ScriptedConnection { reads: reads.into(), state: Arc::clone(&self.state) })
            }
            Some(_) => Err(IngestError::connection_failed(format!(
                "scripted refusal for {}",
                target.name
            ))),
            None => std::future::pending().await,
        }
    }
}

/// Connection serving scripted reads.
#[derive(Debug)]
pub struct ScriptedConnection {
    reads: VecDeque<Step>,
    state: Arc<Mutex<ScriptState>>,
}

#[async_trait::async_trait]
impl Connection for ScriptedConnection {
    async fn send_heartbeat(&mut self, beat: u8) -> Result<()> {
        lock(&self.state).heartbeats.push(beat);
        Ok(())
    }

    async fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize> {
        match self.reads.pop_front() {
            Some(Step::Frame(bytes)) => {
                let n = bytes.len().min(buf.len());
                buf[..n].copy_from_slice(&bytes[..n]);
                Ok(n)
            }
            Some(_) => Err(IngestError::io(
                "read",
                std::io::Error::new(std::io::ErrorKind::ConnectionReset, "scripted reset"),
            )),
            None => std::future::pending().await,
        }
    }
}
