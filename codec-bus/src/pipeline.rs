//! Moves data from a source through a codec session into a sink.
//!
//! ```text
//!             spawn_blocking                      spawn_blocking
//! MediaSource ──► [input context] ──► CodecSession ──► [output context] ──► MediaSink
//!                  acquire/fill/submit               acquire/forward/release
//! ```
//!
//! Both contexts block on their acquire calls for at most
//! `PipelineSettings::timeout`; consecutive timeouts past `max_retries` fail
//! the run. Any failure, or the cancellation token firing, cancels the
//! session, which unblocks the other context.

use std::{sync::Arc, time::Duration};

use anyhow::Context as _;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::{
    error::CodecError,
    exchange::OutputEvent,
    session::{CodecSession, SessionState},
    sink::{MediaSink, OutputFrame},
    slot::BufferInfo,
    source::MediaSource,
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PipelineSettings {
    /// Bound on each acquire call.
    pub timeout: Duration,
    /// Consecutive timeouts tolerated per context.
    pub max_retries: u32,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(10),
            max_retries: 500,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PipelineReport {
    pub inputs_submitted: u64,
    pub frames_forwarded: u64,
    pub frames_rendered: u64,
    pub format_changes: u64,
    pub input_retries: u64,
    pub output_retries: u64,
    pub end_of_stream: bool,
}

#[derive(Default)]
struct InputReport {
    submitted: u64,
    retries: u64,
}

#[derive(Default)]
struct OutputReport {
    forwarded: u64,
    rendered: u64,
    format_changes: u64,
    retries: u64,
    end_of_stream: bool,
}

pub struct Pipeline {
    session: Arc<CodecSession>,
    settings: PipelineSettings,
    cancel: CancellationToken,
}

impl Pipeline {
    pub fn new(session: Arc<CodecSession>, settings: PipelineSettings) -> Self {
        Self {
            session,
            settings,
            cancel: CancellationToken::new(),
        }
    }

    /// Uses `token` instead of a private one, so cancelling a parent token
    /// stops the run.
    pub fn with_cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn session(&self) -> &Arc<CodecSession> {
        &self.session
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Runs until the sink has seen end of stream, then stops the session.
    /// A `Configured` session is started first.
    pub async fn run<S, K>(&self, source: S, sink: K) -> anyhow::Result<PipelineReport>
    where
        S: MediaSource,
        K: MediaSink,
    {
        // state() may tear down a failed device, so keep it off the runtime
        let session = Arc::clone(&self.session);
        tokio::task::spawn_blocking(move || match session.state() {
            SessionState::Configured => session.start().context("start session"),
            SessionState::Started | SessionState::Running => Ok(()),
            state => Err(CodecError::InvalidState {
                op: "run pipeline",
                state,
            })
            .context("pipeline"),
        })
        .await
        .context("join start")??;
        log::info!(
            "pipeline: {} -> {}",
            source.format(),
            self.session.name()
        );

        let session = Arc::clone(&self.session);
        let settings = self.settings.clone();
        let mut input: JoinHandle<anyhow::Result<InputReport>> =
            tokio::task::spawn_blocking(move || input_loop(&session, source, &settings));

        let session = Arc::clone(&self.session);
        let settings = self.settings.clone();
        let mut output: JoinHandle<anyhow::Result<OutputReport>> =
            tokio::task::spawn_blocking(move || output_loop(&session, sink, &settings));

        let mut input_result = None;
        let mut output_result = None;
        let mut first_error: Option<anyhow::Error> = None;
        let mut cancelled = false;

        while input_result.is_none() || output_result.is_none() {
            tokio::select! {
                r = &mut input, if input_result.is_none() => {
                    match flatten(r) {
                        Ok(report) => input_result = Some(report),
                        Err(e) => {
                            input_result = Some(InputReport::default());
                            self.fail(&mut first_error, e, "input").await;
                        }
                    }
                }
                r = &mut output, if output_result.is_none() => {
                    match flatten(r) {
                        Ok(report) => output_result = Some(report),
                        Err(e) => {
                            output_result = Some(OutputReport::default());
                            self.fail(&mut first_error, e, "output").await;
                        }
                    }
                }
                _ = self.cancel.cancelled(), if !cancelled => {
                    cancelled = true;
                    log::info!("pipeline: cancelled");
                    self.abort_session().await;
                }
            }
        }

        let session = Arc::clone(&self.session);
        tokio::task::spawn_blocking(move || {
            if session.state().is_active() {
                session.stop()
            } else {
                Ok(())
            }
        })
        .await
        .context("join stop")?
        .context("stop session")?;

        if cancelled {
            return Err(CodecError::Cancelled).context("pipeline cancelled");
        }
        if let Some(e) = first_error {
            return Err(e);
        }

        let input = input_result.unwrap_or_default();
        let output = output_result.unwrap_or_default();
        let report = PipelineReport {
            inputs_submitted: input.submitted,
            frames_forwarded: output.forwarded,
            frames_rendered: output.rendered,
            format_changes: output.format_changes,
            input_retries: input.retries,
            output_retries: output.retries,
            end_of_stream: output.end_of_stream,
        };
        log::info!("pipeline finished: {:?}", report);
        Ok(report)
    }

    async fn fail(&self, first: &mut Option<anyhow::Error>, e: anyhow::Error, side: &str) {
        match first {
            None => {
                log::error!("pipeline {} failed: {:#}", side, e);
                *first = Some(e);
                self.abort_session().await;
            }
            // a device failure outranks whatever the other context tripped over
            Some(earlier) if is_fatal(&e) && !is_fatal(earlier) => {
                log::error!("pipeline {} failed: {:#}", side, e);
                *first = Some(e);
            }
            Some(_) => {
                log::debug!("pipeline {} stopped after earlier failure: {:#}", side, e);
            }
        }
    }

    async fn abort_session(&self) {
        let session = Arc::clone(&self.session);
        match tokio::task::spawn_blocking(move || session.cancel()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => log::debug!("pipeline: session not cancelled: {}", e),
            Err(e) => log::error!("pipeline: cancel session task failed: {}", e),
        }
    }
}

fn flatten<T>(r: Result<anyhow::Result<T>, tokio::task::JoinError>) -> anyhow::Result<T> {
    match r {
        Ok(inner) => inner,
        Err(e) => Err(anyhow::anyhow!("pipeline task failed: {}", e)),
    }
}

fn is_fatal(e: &anyhow::Error) -> bool {
    e.downcast_ref::<CodecError>()
        .is_some_and(CodecError::is_fatal)
}

fn timeout_exceeded(side: &str, retries: u32) -> anyhow::Error {
    anyhow::Error::new(CodecError::Timeout).context(format!(
        "{}: no buffer after {} consecutive retries",
        side, retries
    ))
}

fn input_loop<S: MediaSource>(
    session: &CodecSession,
    mut source: S,
    settings: &PipelineSettings,
) -> anyhow::Result<InputReport> {
    let mut report = InputReport::default();
    let mut retries = 0u32;
    let mut last_pts_us = 0i64;
    let mut exhausted = false;

    loop {
        let mut slot = match session.acquire_input(settings.timeout) {
            Ok(slot) => {
                retries = 0;
                slot
            }
            Err(CodecError::Timeout) => {
                report.retries += 1;
                retries += 1;
                if retries > settings.max_retries {
                    return Err(timeout_exceeded("input", settings.max_retries));
                }
                continue;
            }
            Err(e) => return Err(e).context("acquire input"),
        };

        let sample = if exhausted {
            None
        } else {
            source.read_sample(slot.buffer_mut()).context("read sample")?
        };

        let result = match sample {
            Some(sample) => {
                last_pts_us = sample.pts_us;
                session.queue_input(
                    slot,
                    BufferInfo::new(sample.size, sample.pts_us, sample.flags),
                )
            }
            None => {
                if !exhausted {
                    log::debug!("input end of stream after {} buffers", report.submitted);
                }
                exhausted = true;
                session.submit_input(slot, 0, last_pts_us, true)
            }
        };

        match result {
            Ok(()) => {
                report.submitted += 1;
                if exhausted {
                    return Ok(report);
                }
            }
            // flushed while we were filling it; the sample is gone
            Err(CodecError::InvalidSlot { index, reason }) => {
                log::warn!("input slot {} dropped: {}", index, reason);
            }
            Err(e) => return Err(e).context("submit input"),
        }
    }
}

fn output_loop<K: MediaSink>(
    session: &CodecSession,
    mut sink: K,
    settings: &PipelineSettings,
) -> anyhow::Result<OutputReport> {
    let mut report = OutputReport::default();
    let mut retries = 0u32;

    loop {
        match session.acquire_output(settings.timeout) {
            Ok(OutputEvent::FormatChanged) => {
                retries = 0;
                let format = session.output_format().context("query output format")?;
                log::info!("output format has changed to {}", format);
                if let Some(color) = format.color_format() {
                    log::info!("detected color format: {}", color);
                }
                sink.on_format_changed(&format).context("sink format change")?;
                report.format_changes += 1;
            }
            Ok(OutputEvent::Buffer(slot)) => {
                retries = 0;
                let eos = slot.is_end_of_stream();
                let render = if slot.size() > 0 {
                    let frame = OutputFrame {
                        index: slot.index(),
                        data: slot.data(),
                        pts_us: slot.pts_us(),
                        flags: slot.flags(),
                    };
                    report.forwarded += 1;
                    sink.on_frame(&frame).context("sink frame")?
                } else {
                    false
                };
                match session.release_output(slot, render) {
                    Ok(()) => {
                        if render {
                            report.rendered += 1;
                        }
                    }
                    Err(CodecError::InvalidSlot { index, reason }) => {
                        log::warn!("output slot {} dropped: {}", index, reason);
                    }
                    Err(e) => return Err(e).context("release output"),
                }
                if eos {
                    log::debug!("output end of stream after {} frames", report.forwarded);
                    sink.on_end_of_stream().context("sink end of stream")?;
                    report.end_of_stream = true;
                    return Ok(report);
                }
            }
            Err(CodecError::Timeout) => {
                report.retries += 1;
                retries += 1;
                if retries > settings.max_retries {
                    return Err(timeout_exceeded("output", settings.max_retries));
                }
            }
            Err(e) => return Err(e).context("acquire output"),
        }
    }
}

#[cfg(test)]
#[path = "pipeline_test.rs"]
mod pipeline_test;
