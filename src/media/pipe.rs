use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use anyhow::Context as _;
use codec_bus::{
    engine::{CodecEngine, PassthroughEngine},
    exchange::ExchangeConfig,
    format::{CodecMode, MediaFormat},
    pipeline::{Pipeline, PipelineReport, PipelineSettings},
    session::CodecSession,
    sink::{LogSink, MediaSink, OutputFrame},
    source::{FrameCountSource, MediaSource},
};
use tokio_util::sync::CancellationToken;

use crate::media::{
    stream::RawSinkSource,
    types::{InputConfig, OutputDest, PipeConfig, VideoRawFrame},
};

/// Pipeline: one codec session fed from the configured input
pub struct Pipe {
    config: PipeConfig,
    cancel: CancellationToken,
    started: AtomicBool,
}

impl Pipe {
    pub fn new(config: PipeConfig) -> Self {
        Self {
            config,
            cancel: CancellationToken::new(),
            started: AtomicBool::new(false),
        }
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Check if the pipeline is running
    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Relaxed)
    }

    /// Check if the pipeline has been cancelled
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Runs the input to end of stream, or until cancelled.
    pub async fn run(&self) -> anyhow::Result<PipelineReport> {
        if self.started.swap(true, Ordering::Relaxed) {
            return Err(anyhow::anyhow!("pipe already started"));
        }
        let result = self.run_inner().await;
        self.started.store(false, Ordering::Relaxed);
        result
    }

    async fn run_inner(&self) -> anyhow::Result<PipelineReport> {
        let (source, engine) = open_input(&self.config.input)?;
        let format = source.format();
        log::info!("Pipe: starting with input {}", format);

        let session = Arc::new(CodecSession::with_config(
            engine,
            self.config.exchange.clone(),
        ));
        session
            .configure(format, CodecMode::Decoder)
            .context("configure codec")?;

        let sink = FanoutSink::new(&self.config.outputs);
        let pipeline = Pipeline::new(Arc::clone(&session), self.config.settings.clone())
            .with_cancel_token(self.cancel.child_token());
        let result = pipeline.run(source, sink).await;

        // outputs must see the end even when the run failed
        for dest in &self.config.outputs {
            if let OutputDest::RawFrame { sink } = dest {
                sink.finish();
            }
        }
        if let Err(e) = session.release() {
            log::debug!("Pipe: release: {}", e);
        }
        result
    }
}

fn open_input(
    input: &InputConfig,
) -> anyhow::Result<(Box<dyn MediaSource>, Box<dyn CodecEngine>)> {
    match input {
        InputConfig::Synthetic {
            width,
            height,
            fps,
            frames,
            resize,
        } => {
            let mut source = FrameCountSource::new(*width, *height, *fps, *frames);
            let mut engine = PassthroughEngine::new();
            if let Some(resize) = resize {
                source = source.with_resolution_change(resize.at_frame, resize.width, resize.height);
                engine = engine.with_format_change(resize.at_frame, source.format_at(resize.at_frame));
            }
            let source = SizedSource {
                max_input_size: source.max_frame_size(),
                inner: source,
            };
            Ok((Box::new(source), Box::new(engine)))
        }
        #[cfg(feature = "ffmpeg")]
        InputConfig::File {
            path,
            prefer_hardware,
        } => {
            let source = codec_bus::ffmpeg::FfmpegSource::open(path)?;
            let engine =
                codec_bus::ffmpeg::FfmpegDecoder::new(&source).with_hardware(*prefer_hardware);
            Ok((Box::new(source), Box::new(engine)))
        }
        #[cfg(not(feature = "ffmpeg"))]
        InputConfig::File { path, .. } => Err(anyhow::anyhow!(
            "cannot open {}: built without ffmpeg support",
            path
        )),
    }
}

/// Announces the largest sample a source produces, so input slots are sized
/// for it.
struct SizedSource<S> {
    inner: S,
    max_input_size: usize,
}

impl<S: MediaSource> MediaSource for SizedSource<S> {
    fn format(&self) -> MediaFormat {
        self.inner.format().with_max_input_size(self.max_input_size)
    }

    fn read_sample(
        &mut self,
        buf: &mut [u8],
    ) -> anyhow::Result<Option<codec_bus::source::SampleInfo>> {
        self.inner.read_sample(buf)
    }
}

/// Forwards decoded frames to a raw frame channel.
pub struct RawFrameSink {
    sink: Arc<RawSinkSource>,
    format: Option<MediaFormat>,
    closed: bool,
}

impl RawFrameSink {
    pub fn new(sink: Arc<RawSinkSource>) -> Self {
        Self {
            sink,
            format: None,
            closed: false,
        }
    }
}

impl MediaSink for RawFrameSink {
    fn on_format_changed(&mut self, format: &MediaFormat) -> anyhow::Result<()> {
        self.format = Some(format.clone());
        Ok(())
    }

    fn on_frame(&mut self, frame: &OutputFrame<'_>) -> anyhow::Result<bool> {
        if self.closed {
            return Ok(false);
        }
        let (width, height, color_format) = match &self.format {
            Some(f) => (f.width(), f.height(), f.color_format()),
            None => (0, 0, None),
        };
        let raw = VideoRawFrame {
            data: bytes::Bytes::copy_from_slice(frame.data),
            width,
            height,
            color_format,
            pts_us: frame.pts_us,
            is_key: frame.is_key(),
        };
        if !self.sink.push_blocking(raw) {
            log::warn!("Pipe: raw frame reader gone, dropping further frames");
            self.closed = true;
            return Ok(false);
        }
        Ok(true)
    }

    fn on_end_of_stream(&mut self) -> anyhow::Result<()> {
        self.sink.finish();
        Ok(())
    }
}

/// Hands every event to each output. A frame is rendered if any output
/// wants it rendered.
struct FanoutSink {
    outputs: Vec<Box<dyn MediaSink>>,
}

impl FanoutSink {
    fn new(dests: &[OutputDest]) -> Self {
        let outputs = dests
            .iter()
            .map(|dest| -> Box<dyn MediaSink> {
                log::info!("Pipe: adding {} output", dest_name(dest));
                match dest {
                    OutputDest::Log => Box::new(LogSink::new()),
                    OutputDest::RawFrame { sink } => Box::new(RawFrameSink::new(Arc::clone(sink))),
                }
            })
            .collect();
        Self { outputs }
    }
}

impl MediaSink for FanoutSink {
    fn on_format_changed(&mut self, format: &MediaFormat) -> anyhow::Result<()> {
        for output in self.outputs.iter_mut() {
            output.on_format_changed(format)?;
        }
        Ok(())
    }

    fn on_frame(&mut self, frame: &OutputFrame<'_>) -> anyhow::Result<bool> {
        let mut render = false;
        for output in self.outputs.iter_mut() {
            render |= output.on_frame(frame)?;
        }
        Ok(render)
    }

    fn on_end_of_stream(&mut self) -> anyhow::Result<()> {
        for output in self.outputs.iter_mut() {
            output.on_end_of_stream()?;
        }
        Ok(())
    }
}

pub fn dest_name(dest: &OutputDest) -> &'static str {
    match dest {
        OutputDest::Log => "log",
        OutputDest::RawFrame { .. } => "raw_frame",
    }
}

impl PipeConfig {
    pub fn builder() -> PipeConfigBuilder {
        PipeConfigBuilder::default()
    }
}

#[derive(Default)]
pub struct PipeConfigBuilder {
    input: Option<InputConfig>,
    outputs: Vec<OutputDest>,
    exchange: ExchangeConfig,
    settings: PipelineSettings,
}

impl PipeConfigBuilder {
    pub fn input(mut self, input: InputConfig) -> Self {
        self.input = Some(input);
        self
    }

    pub fn input_file(mut self, path: impl Into<String>) -> Self {
        self.input = Some(InputConfig::File {
            path: path.into(),
            prefer_hardware: true,
        });
        self
    }

    pub fn exchange(mut self, exchange: ExchangeConfig) -> Self {
        self.exchange = exchange;
        self
    }

    pub fn settings(mut self, settings: PipelineSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn add_log_output(mut self) -> Self {
        self.outputs.push(OutputDest::Log);
        self
    }

    pub fn add_raw_frame_output(mut self, sink: Arc<RawSinkSource>) -> Self {
        self.outputs.push(OutputDest::RawFrame { sink });
        self
    }

    pub fn build(self) -> PipeConfig {
        PipeConfig {
            input: self.input.unwrap_or_default(),
            outputs: self.outputs,
            exchange: self.exchange,
            settings: self.settings,
        }
    }
}

#[cfg(test)]
#[path = "pipe_test.rs"]
mod pipe_test;
