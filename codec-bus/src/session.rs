//! Codec session lifecycle.
//!
//! ```text
//! Unconfigured ─configure─► Configured ─start─► Started ─acquire─► Running ◄─┐
//!                                                  │                  │ flush  │
//!                                                  │                  ▼        │
//!                                                  │               Flushing ───┘
//!                                                  └──────stop──────► Stopped ─release─► Released
//! ```
//!
//! `release()` is accepted from every state but `Released`; a device failure
//! jumps straight to `Released`.

use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use crate::{
    device::CodecDevice,
    engine::CodecEngine,
    error::{CodecError, Result},
    exchange::{BufferExchange, ExchangeConfig, ExchangeStats, OutputEvent},
    format::{CodecMode, MediaFormat},
    slot::{BufferFlags, BufferInfo, BufferSlot, InputSlot, OutputSlot, SlotOwner, SlotSide},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SessionState {
    Unconfigured,
    Configured,
    Started,
    Running,
    Flushing,
    Stopped,
    Released,
}

impl SessionState {
    /// Whether the device worker is alive in this state.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            SessionState::Started | SessionState::Running | SessionState::Flushing
        )
    }
}

struct Inner {
    state: SessionState,
    mode: Option<CodecMode>,
    input_format: Option<MediaFormat>,
    initial_output: Option<MediaFormat>,
    engine: Option<Box<dyn CodecEngine>>,
    device: Option<CodecDevice>,
    config: ExchangeConfig,
}

/// One open handle to a codec device.
///
/// All methods take `&self`; share the session between the input and output
/// contexts with an `Arc`.
pub struct CodecSession {
    name: String,
    inner: Mutex<Inner>,
    exchange: Arc<BufferExchange>,
}

impl CodecSession {
    pub fn new(engine: Box<dyn CodecEngine>) -> Self {
        Self::with_config(engine, ExchangeConfig::default())
    }

    pub fn with_config(engine: Box<dyn CodecEngine>, config: ExchangeConfig) -> Self {
        let name = engine.name().to_string();
        Self {
            name,
            inner: Mutex::new(Inner {
                state: SessionState::Unconfigured,
                mode: None,
                input_format: None,
                initial_output: None,
                engine: Some(engine),
                device: None,
                config,
            }),
            exchange: Arc::new(BufferExchange::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> SessionState {
        let mut inner = self.lock();
        let _ = self.sync_failure(&mut inner);
        inner.state
    }

    pub fn mode(&self) -> Option<CodecMode> {
        self.lock().mode
    }

    pub fn input_format(&self) -> Option<MediaFormat> {
        self.lock().input_format.clone()
    }

    pub fn configure(&self, format: MediaFormat, mode: CodecMode) -> Result<()> {
        let mut inner = self.lock();
        if inner.state != SessionState::Unconfigured {
            return Err(CodecError::InvalidState {
                op: "configure",
                state: inner.state,
            });
        }
        let Some(engine) = inner.engine.as_mut() else {
            return Err(CodecError::DeviceFailure("engine missing".to_string()));
        };
        match engine.configure(&format, mode) {
            Ok(output) => {
                log::info!(
                    "{}: configured {:?} input {} output {}",
                    self.name,
                    mode,
                    format,
                    output
                );
                if let Some(size) = format.max_input_size() {
                    inner.config.input_capacity = size;
                }
                if let Some(size) = output.frame_size() {
                    inner.config.output_capacity = inner.config.output_capacity.max(size);
                }
                inner.mode = Some(mode);
                inner.input_format = Some(format);
                inner.initial_output = Some(output);
                inner.state = SessionState::Configured;
                Ok(())
            }
            Err(e) => {
                let msg = format!("{} configure: {:#}", self.name, e);
                log::error!("{}", msg);
                self.teardown(&mut inner, SessionState::Released);
                Err(CodecError::DeviceFailure(msg))
            }
        }
    }

    /// Allocates the buffer pool and starts the device worker.
    pub fn start(&self) -> Result<()> {
        let mut inner = self.lock();
        if inner.state != SessionState::Configured {
            return Err(CodecError::InvalidState {
                op: "start",
                state: inner.state,
            });
        }
        let initial = inner
            .initial_output
            .clone()
            .or_else(|| inner.input_format.clone())
            .ok_or_else(|| CodecError::DeviceFailure("no output format".to_string()))?;
        let engine = inner
            .engine
            .take()
            .ok_or_else(|| CodecError::DeviceFailure("engine missing".to_string()))?;
        self.exchange.start(&inner.config, initial)?;
        match CodecDevice::spawn(Arc::clone(&self.exchange), engine) {
            Ok(device) => {
                inner.device = Some(device);
                inner.state = SessionState::Started;
                log::info!("{}: started", self.name);
                Ok(())
            }
            Err(e) => {
                let msg = format!("{:#}", e);
                self.teardown(&mut inner, SessionState::Released);
                Err(CodecError::DeviceFailure(msg))
            }
        }
    }

    pub fn acquire_input(&self, timeout: Duration) -> Result<InputSlot> {
        self.enter_running("acquire_input")?;
        let result = self.exchange.acquire_input(timeout);
        self.observe(result)
    }

    /// Hands a filled input buffer back to the device.
    pub fn submit_input(
        &self,
        slot: InputSlot,
        size: usize,
        pts_us: i64,
        end_of_stream: bool,
    ) -> Result<()> {
        let flags = if end_of_stream {
            BufferFlags::END_OF_STREAM
        } else {
            BufferFlags::empty()
        };
        self.queue_input(slot, BufferInfo::new(size, pts_us, flags))
    }

    /// Like `submit_input`, with full control over the buffer flags.
    pub fn queue_input(&self, slot: InputSlot, info: BufferInfo) -> Result<()> {
        self.enter_running("submit_input")?;
        let result = self.exchange.submit_input(slot, info);
        self.observe(result)
    }

    pub fn acquire_output(&self, timeout: Duration) -> Result<OutputEvent> {
        self.enter_running("acquire_output")?;
        let result = self.exchange.acquire_output(timeout);
        self.observe(result)
    }

    pub fn release_output(&self, slot: OutputSlot, render: bool) -> Result<()> {
        self.enter_running("release_output")?;
        let result = self.exchange.release_output(slot, render);
        self.observe(result)
    }

    /// Current output format. After `FormatChanged` this is the new format.
    pub fn output_format(&self) -> Result<MediaFormat> {
        let inner = self.lock();
        match inner.state {
            SessionState::Unconfigured | SessionState::Released => Err(CodecError::InvalidState {
                op: "output_format",
                state: inner.state,
            }),
            _ => self
                .exchange
                .output_format()
                .or_else(|| inner.initial_output.clone())
                .ok_or_else(|| CodecError::DeviceFailure("no output format".to_string())),
        }
    }

    /// Drops every in-flight buffer without signalling end of stream.
    /// Slots held by the caller are invalidated.
    pub fn flush(&self) -> Result<()> {
        {
            let mut inner = self.lock();
            self.sync_failure(&mut inner)?;
            match inner.state {
                SessionState::Started | SessionState::Running => {
                    inner.state = SessionState::Flushing;
                }
                state => return Err(CodecError::InvalidState { op: "flush", state }),
            }
        }
        let result = self.exchange.flush();
        let mut inner = self.lock();
        if inner.state == SessionState::Flushing {
            inner.state = SessionState::Running;
        }
        if result.is_ok() {
            log::debug!("{}: flushed", self.name);
        }
        drop(inner);
        self.observe(result)
    }

    pub fn stop(&self) -> Result<()> {
        let mut inner = self.lock();
        self.sync_failure(&mut inner)?;
        if !inner.state.is_active() {
            return Err(CodecError::InvalidState {
                op: "stop",
                state: inner.state,
            });
        }
        self.teardown(&mut inner, SessionState::Stopped);
        log::info!("{}: stopped", self.name);
        Ok(())
    }

    /// Frees all device resources. No call is valid afterwards.
    pub fn release(&self) -> Result<()> {
        let mut inner = self.lock();
        if inner.state == SessionState::Released {
            return Err(CodecError::InvalidState {
                op: "release",
                state: inner.state,
            });
        }
        self.teardown(&mut inner, SessionState::Released);
        log::info!("{}: released", self.name);
        Ok(())
    }

    /// Unblocks every pending acquire and forces the session to `Stopped`.
    /// Only valid once started; cancelling a stopped session does nothing.
    pub fn cancel(&self) -> Result<()> {
        let mut inner = self.lock();
        match inner.state {
            SessionState::Started | SessionState::Running | SessionState::Flushing => {
                self.exchange.cancel();
                self.teardown(&mut inner, SessionState::Stopped);
                log::info!("{}: cancelled", self.name);
                Ok(())
            }
            SessionState::Stopped => Ok(()),
            state => Err(CodecError::InvalidState {
                op: "cancel",
                state,
            }),
        }
    }

    pub fn stats(&self) -> ExchangeStats {
        self.exchange.stats()
    }

    pub fn slots(&self, side: SlotSide) -> Vec<BufferSlot> {
        self.exchange.slots(side)
    }

    pub fn owned_by(&self, side: SlotSide, owner: SlotOwner) -> usize {
        self.exchange.owned_by(side, owner)
    }

    /// Number of buffers submitted but not yet drained.
    pub fn in_flight(&self) -> usize {
        self.exchange.in_flight()
    }

    fn enter_running(&self, op: &'static str) -> Result<()> {
        let mut inner = self.lock();
        self.sync_failure(&mut inner)?;
        match inner.state {
            SessionState::Started => {
                inner.state = SessionState::Running;
                Ok(())
            }
            // flush in progress: the exchange holds callers until it is done
            SessionState::Running | SessionState::Flushing => Ok(()),
            state => Err(CodecError::InvalidState { op, state }),
        }
    }

    fn observe<T>(&self, result: Result<T>) -> Result<T> {
        if let Err(CodecError::DeviceFailure(msg)) = &result {
            let mut inner = self.lock();
            if inner.state != SessionState::Released {
                log::error!("{}: releasing after device failure: {}", self.name, msg);
                self.teardown(&mut inner, SessionState::Released);
            }
        }
        result
    }

    /// Releases the session if the worker reported a failure. Returns the
    /// error for the caller that observed it.
    fn sync_failure(&self, inner: &mut Inner) -> Result<()> {
        if inner.state.is_active() {
            if let Some(msg) = self.exchange.failure() {
                log::error!("{}: releasing after device failure: {}", self.name, msg);
                self.teardown(inner, SessionState::Released);
                return Err(CodecError::DeviceFailure(msg));
            }
        }
        Ok(())
    }

    fn teardown(&self, inner: &mut Inner, next: SessionState) {
        self.exchange.stop();
        if let Some(mut device) = inner.device.take() {
            if let Some(engine) = device.join() {
                if next != SessionState::Released {
                    inner.engine = Some(engine);
                }
            }
        }
        if next == SessionState::Released {
            inner.engine = None;
        }
        inner.state = next;
    }
}

impl Drop for CodecSession {
    fn drop(&mut self) {
        let inner = self.inner.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(mut device) = inner.device.take() {
            self.exchange.stop();
            device.join();
        }
    }
}

#[cfg(test)]
#[path = "session_test.rs"]
mod session_test;
