//! In-process instrument link for tests and dry runs
//!
//! Clones share state, so a test can hand one clone to a session and
//! inspect the recorded command log through another.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::InstrumentError;
use crate::instrument::link::InstrumentLink;

#[derive(Default)]
struct MockState {
    commands: Vec<String>,
    responses: HashMap<String, String>,
    failing: Option<String>,
    closed: bool,
}

/// Recording instrument link
#[derive(Clone, Default)]
pub struct MockInstrument {
    state: Arc<Mutex<MockState>>,
}

impl MockInstrument {
    /// Instrument reporting `max_rate` S/s as its maximum stream rate
    pub fn new(max_rate: f64) -> Self {
        Self::with_response("STREAMRATEMAX?", &max_rate.to_string())
    }

    /// Instrument answering `query` with `response`
    pub fn with_response(query: &str, response: &str) -> Self {
        let mock = Self::default();
        mock.set_response(query, response);
        mock
    }

    pub fn set_response(&self, query: &str, response: &str) {
        self.state
            .lock()
            .responses
            .insert(query.to_string(), response.to_string());
    }

    /// Make every command starting with `prefix` fail
    pub fn fail_on(&self, prefix: &str) {
        self.state.lock().failing = Some(prefix.to_string());
    }

    /// Commands received so far, in order
    pub fn commands(&self) -> Vec<String> {
        self.state.lock().commands.clone()
    }

    pub fn clear(&self) {
        self.state.lock().commands.clear();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    fn record(&self, command: &str) -> Result<(), InstrumentError> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(InstrumentError::Io("link closed".into()));
        }
        state.commands.push(command.to_string());
        match &state.failing {
            Some(prefix) if command.starts_with(prefix.as_str()) => {
                Err(InstrumentError::Io(format!("injected failure on {}", command)))
            }
            _ => Ok(()),
        }
    }
}

impl InstrumentLink for MockInstrument {
    fn write(&mut self, command: &str) -> Result<(), InstrumentError> {
        self.record(command)
    }

    fn query(&mut self, command: &str) -> Result<String, InstrumentError> {
        self.record(command)?;
        Ok(self
            .state
            .lock()
            .responses
            .get(command)
            .cloned()
            .unwrap_or_default())
    }

    fn close(&mut self) -> Result<(), InstrumentError> {
        self.state.lock().closed = true;
        Ok(())
    }
}
