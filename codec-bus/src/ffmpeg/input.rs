use std::path::Path;

use ffmpeg_next::{Rational, Rescale, codec::Parameters};

use super::MICROS;
use crate::{
    format::{MIME_VIDEO_AVC, MIME_VIDEO_HEVC, MediaFormat},
    slot::BufferFlags,
    source::{MediaSource, SampleInfo},
};

// Parameters wraps a raw AVCodecParameters pointer that only this source touches.
unsafe impl Send for FfmpegSource {}

/// Demuxes the first video track of a container file.
pub struct FfmpegSource {
    url: String,
    inner: ffmpeg_next::format::context::Input,
    track: usize,
    time_base: Rational,
    parameters: Parameters,
    format: MediaFormat,
}

impl FfmpegSource {
    pub fn open(url: &str) -> anyhow::Result<Self> {
        let path = Path::new(url);
        let inner = ffmpeg_next::format::input(path)
            .map_err(|e| anyhow::anyhow!("open {}: {}", url, e))?;

        let (track, time_base, rate, parameters) = {
            let stream = inner
                .streams()
                .find(|s| s.parameters().medium() == ffmpeg_next::media::Type::Video)
                .ok_or_else(|| anyhow::anyhow!("no video track in {}", url))?;
            (
                stream.index(),
                stream.time_base(),
                stream.avg_frame_rate(),
                stream.parameters(),
            )
        };

        let (width, height) = unsafe {
            let ptr = parameters.as_ptr() as *const ffmpeg_next::ffi::AVCodecParameters;
            ((*ptr).width.max(0) as u32, (*ptr).height.max(0) as u32)
        };
        let raw_frame = width as usize * height as usize * 3 / 2;
        let mut format = MediaFormat::video(mime_for(parameters.id()), width, height)
            .with_max_input_size(raw_frame.max(256 * 1024));
        if rate.denominator() > 0 && rate.numerator() > 0 {
            let fps = (rate.numerator() as f64 / rate.denominator() as f64).round() as u32;
            format = format.with_frame_rate(fps);
        }
        log::info!(
            "{}: video track {} {:?} {}x{} time_base {}",
            url,
            track,
            parameters.id(),
            width,
            height,
            time_base
        );

        Ok(Self {
            url: url.to_string(),
            inner,
            track,
            time_base,
            parameters,
            format,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn track(&self) -> usize {
        self.track
    }

    pub fn parameters(&self) -> &Parameters {
        &self.parameters
    }
}

impl MediaSource for FfmpegSource {
    fn format(&self) -> MediaFormat {
        self.format.clone()
    }

    fn read_sample(&mut self, buf: &mut [u8]) -> anyhow::Result<Option<SampleInfo>> {
        for (stream, packet) in self.inner.packets() {
            if stream.index() != self.track {
                continue;
            }
            let data = packet.data().unwrap_or_default();
            if data.len() > buf.len() {
                return Err(anyhow::anyhow!(
                    "{}: packet of {} bytes does not fit a {} byte buffer",
                    self.url,
                    data.len(),
                    buf.len()
                ));
            }
            buf[..data.len()].copy_from_slice(data);
            let pts = packet.pts().or(packet.dts()).unwrap_or(0);
            let flags = if packet.is_key() {
                BufferFlags::KEY_FRAME
            } else {
                BufferFlags::empty()
            };
            return Ok(Some(SampleInfo {
                size: data.len(),
                pts_us: pts.rescale(self.time_base, MICROS),
                flags,
            }));
        }
        log::debug!("{}: end of input", self.url);
        Ok(None)
    }
}

fn mime_for(id: ffmpeg_next::codec::Id) -> String {
    match id {
        ffmpeg_next::codec::Id::H264 => MIME_VIDEO_AVC.to_string(),
        ffmpeg_next::codec::Id::HEVC => MIME_VIDEO_HEVC.to_string(),
        ffmpeg_next::codec::Id::VP8 => "video/x-vnd.on2.vp8".to_string(),
        ffmpeg_next::codec::Id::VP9 => "video/x-vnd.on2.vp9".to_string(),
        ffmpeg_next::codec::Id::AV1 => "video/av01".to_string(),
        ffmpeg_next::codec::Id::MPEG4 => "video/mp4v-es".to_string(),
        other => format!("video/{}", other.name()),
    }
}
