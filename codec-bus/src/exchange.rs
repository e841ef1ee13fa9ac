//! Buffer exchange between the application and a codec device.
//!
//! ```text
//!  application                      exchange                        device worker
//!  acquire_input  ◄── free_inputs ◄─────────────── finish_job ◄──── process
//!  submit_input   ──► queued_inputs ──────────────► next_job
//!  acquire_output ◄── ready (buffers + formats) ◄─ deliver
//!  release_output ──► free_outputs ──────────────► deliver
//! ```
//!
//! Every slot is owned by exactly one side. All ownership changes happen under
//! one mutex; blocked callers wait on a single condvar that is notified on
//! every change.

use std::{
    collections::VecDeque,
    sync::{
        Condvar, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use bytes::BytesMut;

use crate::{
    error::{CodecError, Result},
    format::MediaFormat,
    session::SessionState,
    slot::{BufferInfo, BufferSlot, InputSlot, OutputSlot, SlotOwner, SlotSide},
};

static NEXT_EXCHANGE_ID: AtomicU64 = AtomicU64::new(1);

/// Buffer pool geometry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExchangeConfig {
    pub input_slots: usize,
    pub output_slots: usize,
    pub input_capacity: usize,
    pub output_capacity: usize,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            input_slots: 4,
            output_slots: 4,
            input_capacity: 1024 * 1024,
            output_capacity: 1024 * 1024,
        }
    }
}

/// Result of `acquire_output`.
#[derive(Debug)]
pub enum OutputEvent {
    Buffer(OutputSlot),
    /// The output format changed; re-read it before consuming more output.
    FormatChanged,
}

/// Counters kept by the exchange, mostly for logging.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ExchangeStats {
    pub inputs_queued: u64,
    pub outputs_delivered: u64,
    pub outputs_rendered: u64,
    pub outputs_dropped: u64,
    pub format_changes: u64,
}

/// Work handed to the device worker: one submitted input buffer.
pub(crate) struct DeviceJob {
    pub index: usize,
    pub epoch: u64,
    pub info: BufferInfo,
    pub buffer: BytesMut,
    /// Set on the first job after a flush; the engine must drop its state.
    pub reset: bool,
}

impl DeviceJob {
    pub fn payload(&self) -> &[u8] {
        &self.buffer[..self.info.size]
    }
}

enum Ready {
    Buffer(usize),
    Format(MediaFormat),
}

struct Entry {
    capacity: usize,
    buffer: Option<BytesMut>,
    owner: SlotOwner,
    valid: bool,
    info: BufferInfo,
}

impl Entry {
    fn new(capacity: usize, buffer: BytesMut) -> Self {
        Self {
            capacity,
            buffer: Some(buffer),
            owner: SlotOwner::Device,
            valid: false,
            info: BufferInfo::default(),
        }
    }

    fn snapshot(&self, index: usize, side: SlotSide) -> BufferSlot {
        BufferSlot {
            index,
            side,
            capacity: self.capacity,
            valid: self.valid,
            info: self.info,
            owner: self.owner,
        }
    }
}

struct QueuedInput {
    index: usize,
    info: BufferInfo,
    buffer: BytesMut,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    Idle,
    Active,
    Stopped,
}

struct State {
    phase: Phase,
    epoch: u64,
    flushing: bool,
    cancelled: bool,
    failure: Option<String>,
    inputs: Vec<Entry>,
    outputs: Vec<Entry>,
    free_inputs: VecDeque<usize>,
    queued_inputs: VecDeque<QueuedInput>,
    free_outputs: VecDeque<usize>,
    ready: VecDeque<Ready>,
    /// Last format queued by the device.
    announced_format: Option<MediaFormat>,
    /// Last format observed by the application through `FormatChanged`.
    output_format: Option<MediaFormat>,
    input_eos: bool,
    worker_busy: bool,
    reset_engine: bool,
    stats: ExchangeStats,
}

impl State {
    fn check_usable(&self, op: &'static str) -> Result<()> {
        if let Some(msg) = &self.failure {
            return Err(CodecError::DeviceFailure(msg.clone()));
        }
        if self.cancelled {
            return Err(CodecError::Cancelled);
        }
        match self.phase {
            Phase::Active => Ok(()),
            Phase::Idle => Err(CodecError::InvalidState {
                op,
                state: SessionState::Configured,
            }),
            Phase::Stopped => Err(CodecError::InvalidState {
                op,
                state: SessionState::Stopped,
            }),
        }
    }

    fn check_handle(
        &self,
        exchange_id: u64,
        own_id: u64,
        epoch: u64,
        index: usize,
        side: SlotSide,
    ) -> Result<()> {
        if exchange_id != own_id {
            return Err(CodecError::InvalidSlot {
                index,
                reason: "slot belongs to another session",
            });
        }
        if epoch != self.epoch {
            return Err(CodecError::InvalidSlot {
                index,
                reason: "slot was invalidated by flush or stop",
            });
        }
        let entries = match side {
            SlotSide::Input => &self.inputs,
            SlotSide::Output => &self.outputs,
        };
        match entries.get(index) {
            None => Err(CodecError::InvalidSlot {
                index,
                reason: "index out of range",
            }),
            Some(entry) if entry.owner != SlotOwner::Application => Err(CodecError::InvalidSlot {
                index,
                reason: "slot is not held by the application",
            }),
            Some(_) => Ok(()),
        }
    }

    /// Returns every slot to the device and empties both queues.
    /// Format markers survive so no transition goes unreported.
    fn reclaim_all(&mut self) {
        while let Some(queued) = self.queued_inputs.pop_front() {
            self.inputs[queued.index].buffer = Some(queued.buffer);
        }
        for entry in self.inputs.iter_mut() {
            if entry.buffer.is_none() {
                entry.buffer = Some(BytesMut::zeroed(entry.capacity));
            }
            entry.owner = SlotOwner::Device;
            entry.valid = false;
            entry.info = BufferInfo::default();
        }
        for entry in self.outputs.iter_mut() {
            if entry.buffer.is_none() {
                entry.buffer = Some(BytesMut::with_capacity(entry.capacity));
            }
            entry.owner = SlotOwner::Device;
            entry.valid = false;
            entry.info = BufferInfo::default();
        }
        let dropped = self
            .ready
            .iter()
            .filter(|r| matches!(r, Ready::Buffer(_)))
            .count();
        self.stats.outputs_dropped += dropped as u64;
        self.ready.retain(|r| matches!(r, Ready::Format(_)));
        self.free_inputs = (0..self.inputs.len()).collect();
        self.free_outputs = (0..self.outputs.len()).collect();
        self.input_eos = false;
    }
}

pub struct BufferExchange {
    id: u64,
    state: Mutex<State>,
    changed: Condvar,
}

impl BufferExchange {
    pub fn new() -> Self {
        Self {
            id: NEXT_EXCHANGE_ID.fetch_add(1, Ordering::Relaxed),
            state: Mutex::new(State {
                phase: Phase::Idle,
                epoch: 0,
                flushing: false,
                cancelled: false,
                failure: None,
                inputs: Vec::new(),
                outputs: Vec::new(),
                free_inputs: VecDeque::new(),
                queued_inputs: VecDeque::new(),
                free_outputs: VecDeque::new(),
                ready: VecDeque::new(),
                announced_format: None,
                output_format: None,
                input_eos: false,
                worker_busy: false,
                reset_engine: false,
                stats: ExchangeStats::default(),
            }),
            changed: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wait_until<'a>(
        &self,
        guard: MutexGuard<'a, State>,
        deadline: Instant,
    ) -> Result<MutexGuard<'a, State>> {
        let now = Instant::now();
        if now >= deadline {
            return Err(CodecError::Timeout);
        }
        let (guard, _) = self
            .changed
            .wait_timeout(guard, deadline - now)
            .unwrap_or_else(PoisonError::into_inner);
        Ok(guard)
    }

    fn wait<'a>(&self, guard: MutexGuard<'a, State>) -> MutexGuard<'a, State> {
        self.changed
            .wait(guard)
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Allocates the buffer pool and queues the initial output format.
    pub fn start(&self, config: &ExchangeConfig, initial_format: MediaFormat) -> Result<()> {
        let mut st = self.lock();
        if st.phase != Phase::Idle {
            return Err(CodecError::InvalidState {
                op: "start",
                state: SessionState::Started,
            });
        }
        st.inputs = (0..config.input_slots)
            .map(|_| Entry::new(config.input_capacity, BytesMut::zeroed(config.input_capacity)))
            .collect();
        st.outputs = (0..config.output_slots)
            .map(|_| {
                Entry::new(
                    config.output_capacity,
                    BytesMut::with_capacity(config.output_capacity),
                )
            })
            .collect();
        st.free_inputs = (0..config.input_slots).collect();
        st.free_outputs = (0..config.output_slots).collect();
        st.epoch += 1;
        st.phase = Phase::Active;
        st.announced_format = Some(initial_format.clone());
        st.ready.push_back(Ready::Format(initial_format));
        log::debug!(
            "exchange {} started: {} input / {} output slots",
            self.id,
            config.input_slots,
            config.output_slots
        );
        self.changed.notify_all();
        Ok(())
    }

    pub fn acquire_input(&self, timeout: Duration) -> Result<InputSlot> {
        let deadline = Instant::now() + timeout;
        let mut st = self.lock();
        loop {
            st.check_usable("acquire_input")?;
            if st.input_eos {
                return Err(CodecError::InvalidState {
                    op: "acquire_input after end of stream",
                    state: SessionState::Running,
                });
            }
            if !st.flushing {
                if let Some(index) = st.free_inputs.pop_front() {
                    let epoch = st.epoch;
                    let entry = &mut st.inputs[index];
                    let mut buffer = entry
                        .buffer
                        .take()
                        .unwrap_or_else(|| BytesMut::zeroed(entry.capacity));
                    buffer.resize(entry.capacity, 0);
                    entry.owner = SlotOwner::Application;
                    entry.valid = false;
                    return Ok(InputSlot {
                        index,
                        exchange_id: self.id,
                        epoch,
                        buffer,
                    });
                }
            }
            st = self.wait_until(st, deadline)?;
        }
    }

    pub fn submit_input(&self, slot: InputSlot, info: BufferInfo) -> Result<()> {
        let mut st = self.lock();
        st.check_usable("submit_input")?;
        st.check_handle(slot.exchange_id, self.id, slot.epoch, slot.index, SlotSide::Input)?;
        if info.size > slot.capacity() {
            return Err(CodecError::InvalidSlot {
                index: slot.index,
                reason: "size exceeds slot capacity",
            });
        }
        if st.input_eos {
            return Err(CodecError::InvalidState {
                op: "submit_input after end of stream",
                state: SessionState::Running,
            });
        }
        let entry = &mut st.inputs[slot.index];
        entry.owner = SlotOwner::Device;
        entry.valid = true;
        entry.info = info;
        if info.is_end_of_stream() {
            st.input_eos = true;
        }
        st.stats.inputs_queued += 1;
        st.queued_inputs.push_back(QueuedInput {
            index: slot.index,
            info,
            buffer: slot.buffer,
        });
        self.changed.notify_all();
        Ok(())
    }

    pub fn acquire_output(&self, timeout: Duration) -> Result<OutputEvent> {
        let deadline = Instant::now() + timeout;
        let mut st = self.lock();
        loop {
            st.check_usable("acquire_output")?;
            if !st.flushing {
                match st.ready.pop_front() {
                    Some(Ready::Format(format)) => {
                        st.output_format = Some(format);
                        st.stats.format_changes += 1;
                        return Ok(OutputEvent::FormatChanged);
                    }
                    Some(Ready::Buffer(index)) => {
                        let epoch = st.epoch;
                        let entry = &mut st.outputs[index];
                        let buffer = entry
                            .buffer
                            .take()
                            .unwrap_or_else(|| BytesMut::with_capacity(entry.capacity));
                        entry.owner = SlotOwner::Application;
                        return Ok(OutputEvent::Buffer(OutputSlot {
                            index,
                            exchange_id: self.id,
                            epoch,
                            buffer,
                            info: entry.info,
                        }));
                    }
                    None => {}
                }
            }
            st = self.wait_until(st, deadline)?;
        }
    }

    pub fn release_output(&self, slot: OutputSlot, render: bool) -> Result<()> {
        let mut st = self.lock();
        st.check_usable("release_output")?;
        st.check_handle(slot.exchange_id, self.id, slot.epoch, slot.index, SlotSide::Output)?;
        let entry = &mut st.outputs[slot.index];
        let mut buffer = slot.buffer;
        buffer.clear();
        entry.buffer = Some(buffer);
        entry.owner = SlotOwner::Device;
        entry.valid = false;
        if render {
            st.stats.outputs_rendered += 1;
        } else {
            st.stats.outputs_dropped += 1;
        }
        st.free_outputs.push_back(slot.index);
        self.changed.notify_all();
        Ok(())
    }

    /// Discards every in-flight buffer. Waits for the device worker to go idle
    /// so nothing submitted before the flush can surface after it.
    pub fn flush(&self) -> Result<()> {
        let mut st = self.lock();
        st.check_usable("flush")?;
        st.flushing = true;
        st.epoch += 1;
        self.changed.notify_all();
        while st.worker_busy {
            st = self.wait(st);
        }
        st.reclaim_all();
        st.reset_engine = true;
        st.flushing = false;
        self.changed.notify_all();
        Ok(())
    }

    /// Stops the exchange and hands every slot back to the device.
    pub fn stop(&self) {
        let mut st = self.lock();
        if st.phase == Phase::Stopped {
            return;
        }
        st.phase = Phase::Stopped;
        st.epoch += 1;
        self.changed.notify_all();
        while st.worker_busy {
            st = self.wait(st);
        }
        st.reclaim_all();
        self.changed.notify_all();
    }

    /// Unblocks every pending acquire with `Cancelled`.
    pub fn cancel(&self) {
        let mut st = self.lock();
        st.cancelled = true;
        self.changed.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        self.lock().cancelled
    }

    pub fn failure(&self) -> Option<String> {
        self.lock().failure.clone()
    }

    /// Format last reported through `FormatChanged`, or the pending one.
    pub fn output_format(&self) -> Option<MediaFormat> {
        let st = self.lock();
        st.output_format
            .clone()
            .or_else(|| st.announced_format.clone())
    }

    pub fn stats(&self) -> ExchangeStats {
        self.lock().stats
    }

    pub fn slots(&self, side: SlotSide) -> Vec<BufferSlot> {
        let st = self.lock();
        let entries = match side {
            SlotSide::Input => &st.inputs,
            SlotSide::Output => &st.outputs,
        };
        entries
            .iter()
            .enumerate()
            .map(|(i, e)| e.snapshot(i, side))
            .collect()
    }

    pub fn owned_by(&self, side: SlotSide, owner: SlotOwner) -> usize {
        self.slots(side).iter().filter(|s| s.owner == owner).count()
    }

    /// Number of submitted inputs and undrained outputs.
    pub fn in_flight(&self) -> usize {
        let st = self.lock();
        let ready = st
            .ready
            .iter()
            .filter(|r| matches!(r, Ready::Buffer(_)))
            .count();
        st.queued_inputs.len() + ready + usize::from(st.worker_busy)
    }

    // ------------------------------------------------------------------
    // device side
    // ------------------------------------------------------------------

    /// Blocks until an input is queued. Returns `None` once the exchange is
    /// stopped or failed.
    pub(crate) fn next_job(&self) -> Option<DeviceJob> {
        let mut st = self.lock();
        loop {
            if st.phase != Phase::Active || st.failure.is_some() {
                return None;
            }
            if !st.flushing {
                if let Some(queued) = st.queued_inputs.pop_front() {
                    st.worker_busy = true;
                    let reset = std::mem::take(&mut st.reset_engine);
                    return Some(DeviceJob {
                        index: queued.index,
                        epoch: st.epoch,
                        info: queued.info,
                        buffer: queued.buffer,
                        reset,
                    });
                }
            }
            st = self.wait(st);
        }
    }

    /// Queues a format change if it differs from the last one announced.
    ///
    /// A flush does not discard the change: the engine has already switched,
    /// so the marker is queued even for a job from an older epoch.
    pub(crate) fn announce_format(&self, format: MediaFormat) {
        let mut st = self.lock();
        if st.phase != Phase::Active || st.announced_format.as_ref() == Some(&format) {
            return;
        }
        log::debug!("exchange {}: output format -> {}", self.id, format);
        st.announced_format = Some(format.clone());
        st.ready.push_back(Ready::Format(format));
        self.changed.notify_all();
    }

    /// Copies one produced buffer into a free output slot, waiting for one if
    /// needed. Returns false if the output was discarded by flush or stop.
    pub(crate) fn deliver(&self, epoch: u64, data: &[u8], info: BufferInfo) -> bool {
        let mut st = self.lock();
        loop {
            if st.epoch != epoch || st.phase != Phase::Active || st.failure.is_some() {
                return false;
            }
            if let Some(index) = st.free_outputs.pop_front() {
                let entry = &mut st.outputs[index];
                let buffer = entry
                    .buffer
                    .get_or_insert_with(|| BytesMut::with_capacity(data.len()));
                buffer.clear();
                buffer.extend_from_slice(data);
                entry.capacity = entry.capacity.max(buffer.capacity());
                entry.info = BufferInfo::new(data.len(), info.pts_us, info.flags);
                entry.valid = true;
                st.stats.outputs_delivered += 1;
                st.ready.push_back(Ready::Buffer(index));
                self.changed.notify_all();
                return true;
            }
            st = self.wait(st);
        }
    }

    /// Returns a processed input slot to the free list.
    pub(crate) fn finish_job(&self, job: DeviceJob) {
        let mut st = self.lock();
        let entry = &mut st.inputs[job.index];
        entry.buffer = Some(job.buffer);
        entry.owner = SlotOwner::Device;
        entry.valid = false;
        st.free_inputs.push_back(job.index);
        st.worker_busy = false;
        self.changed.notify_all();
    }

    pub(crate) fn fail(&self, msg: String) {
        let mut st = self.lock();
        log::error!("exchange {}: device failure: {}", self.id, msg);
        st.failure = Some(msg);
        st.worker_busy = false;
        self.changed.notify_all();
    }
}

impl Default for BufferExchange {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "exchange_test.rs"]
mod exchange_test;
