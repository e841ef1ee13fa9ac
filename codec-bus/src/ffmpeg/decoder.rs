use bytes::BytesMut;
use ffmpeg_next::{codec::Parameters, format::Pixel};

use super::{FfmpegSource, MICROS, find_hw_decoder};
use crate::{
    color::ColorFormat,
    engine::{CodecEngine, EngineInput, EngineOutput},
    format::{CodecMode, MIME_VIDEO_RAW, MediaFormat},
    slot::BufferFlags,
};

// The decoder context is only driven from the device worker thread.
unsafe impl Send for FfmpegDecoder {}

/// Video decoder engine backed by libavcodec. Emits tightly packed raw
/// planes and reports a format change whenever geometry or pixel format
/// of the decoded frames changes.
pub struct FfmpegDecoder {
    name: String,
    parameters: Parameters,
    prefer_hardware: bool,
    inner: Option<ffmpeg_next::codec::decoder::Video>,
    current: Option<MediaFormat>,
}

impl FfmpegDecoder {
    pub fn new(source: &FfmpegSource) -> Self {
        Self::from_parameters(source.parameters().clone())
    }

    pub fn from_parameters(parameters: Parameters) -> Self {
        Self {
            name: format!("ffmpeg-{}", parameters.id().name()),
            parameters,
            prefer_hardware: true,
            inner: None,
            current: None,
        }
    }

    pub fn with_hardware(mut self, prefer: bool) -> Self {
        self.prefer_hardware = prefer;
        self
    }

    fn context(&self) -> anyhow::Result<ffmpeg_next::codec::Context> {
        let mut ctx = ffmpeg_next::codec::Context::from_parameters(self.parameters.clone())?;
        unsafe {
            (*ctx.as_mut_ptr()).time_base = MICROS.into();
        }
        Ok(ctx)
    }

    fn open(&self) -> anyhow::Result<ffmpeg_next::codec::decoder::Video> {
        let codec_id = self.parameters.id();
        if self.prefer_hardware {
            if let Some(codec) = find_hw_decoder(codec_id) {
                let hw_name = codec.name().to_string();
                match self
                    .context()?
                    .decoder()
                    .open_as(codec)
                    .and_then(|opened| opened.video())
                {
                    Ok(decoder) => return Ok(decoder),
                    Err(e) => log::warn!(
                        "{}: hardware decoder {} failed ({}), falling back to software",
                        self.name,
                        hw_name,
                        e
                    ),
                }
            }
        }
        let decoder = self.context()?.decoder().video()?;
        log::info!("{}: using software decoder", self.name);
        Ok(decoder)
    }
}

impl CodecEngine for FfmpegDecoder {
    fn name(&self) -> &str {
        &self.name
    }

    fn configure(&mut self, format: &MediaFormat, mode: CodecMode) -> anyhow::Result<MediaFormat> {
        if mode != CodecMode::Decoder {
            return Err(anyhow::anyhow!("{} can only decode", self.name));
        }
        let decoder = self.open()?;
        if decoder.width() == 0 || decoder.height() == 0 {
            return Err(anyhow::anyhow!("missing codec parameters for {}", format));
        }
        let output = raw_format(decoder.width(), decoder.height(), decoder.format(), format);
        self.inner = Some(decoder);
        self.current = Some(output.clone());
        Ok(output)
    }

    fn process(
        &mut self,
        input: EngineInput<'_>,
        out: &mut Vec<EngineOutput>,
    ) -> anyhow::Result<()> {
        let decoder = self
            .inner
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("decoder not configured"))?;
        if !input.data.is_empty() {
            let mut packet = ffmpeg_next::Packet::copy(input.data);
            packet.set_pts(Some(input.pts_us));
            if input.flags.contains(BufferFlags::KEY_FRAME) {
                packet.set_flags(ffmpeg_next::packet::Flags::KEY);
            }
            decoder.send_packet(&packet)?;
        }
        receive_frames(decoder, &mut self.current, out)
    }

    fn drain(&mut self, out: &mut Vec<EngineOutput>) -> anyhow::Result<()> {
        let decoder = self
            .inner
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("decoder not configured"))?;
        decoder.send_eof()?;
        receive_frames(decoder, &mut self.current, out)
    }

    fn reset(&mut self) -> anyhow::Result<()> {
        if let Some(decoder) = self.inner.as_mut() {
            decoder.flush();
        }
        Ok(())
    }
}

fn receive_frames(
    decoder: &mut ffmpeg_next::codec::decoder::Video,
    current: &mut Option<MediaFormat>,
    out: &mut Vec<EngineOutput>,
) -> anyhow::Result<()> {
    loop {
        let mut frame = ffmpeg_next::frame::Video::empty();
        match decoder.receive_frame(&mut frame) {
            Ok(()) => {}
            Err(ffmpeg_next::Error::Eof) => return Ok(()),
            Err(ffmpeg_next::Error::Other { errno }) if errno == ffmpeg_next::util::error::EAGAIN => {
                return Ok(());
            }
            Err(err) => return Err(err.into()),
        }

        let base = current
            .clone()
            .unwrap_or_else(|| MediaFormat::video(MIME_VIDEO_RAW, 0, 0));
        let format = raw_format(frame.width(), frame.height(), frame.format(), &base);
        if current.as_ref() != Some(&format) {
            *current = Some(format.clone());
            out.push(EngineOutput::FormatChanged(format));
        }

        let flags = if frame.is_key() {
            BufferFlags::KEY_FRAME
        } else {
            BufferFlags::empty()
        };
        let pts_us = frame.timestamp().or(frame.pts()).unwrap_or(0);
        out.push(EngineOutput::buffer(pack_planes(&frame).freeze(), pts_us, flags));
    }
}

/// Copies each plane row by row, dropping the stride padding.
fn pack_planes(frame: &ffmpeg_next::frame::Video) -> BytesMut {
    let mut data = BytesMut::new();
    for plane in 0..frame.planes() {
        let stride = frame.stride(plane);
        let row = unsafe {
            ffmpeg_next::ffi::av_image_get_linesize(
                frame.format().into(),
                frame.width() as i32,
                plane as i32,
            )
        };
        let row = if row > 0 { (row as usize).min(stride) } else { stride };
        let src = frame.data(plane);
        for y in 0..frame.plane_height(plane) as usize {
            let start = y * stride;
            if let Some(line) = src.get(start..start + row) {
                data.extend_from_slice(line);
            }
        }
    }
    data
}

fn raw_format(width: u32, height: u32, pixel: Pixel, base: &MediaFormat) -> MediaFormat {
    let mut format = MediaFormat::video(MIME_VIDEO_RAW, width, height)
        .with_color_format(color_format(pixel));
    if let Some(fps) = base.frame_rate() {
        format = format.with_frame_rate(fps);
    }
    format
}

fn color_format(pixel: Pixel) -> ColorFormat {
    match pixel {
        Pixel::YUV420P | Pixel::YUVJ420P => ColorFormat::Yuv420Planar,
        Pixel::NV12 => ColorFormat::Yuv420SemiPlanar,
        Pixel::YUV422P | Pixel::YUVJ422P => ColorFormat::Yuv422Planar,
        Pixel::RGB24 => ColorFormat::Rgb888,
        Pixel::BGR24 => ColorFormat::Bgr888,
        Pixel::BGRA => ColorFormat::Bgra8888,
        Pixel::GRAY8 => ColorFormat::L8,
        other => {
            let code: ffmpeg_next::ffi::AVPixelFormat = other.into();
            ColorFormat::Unknown(code as i32 as u32)
        }
    }
}
