use std::sync::Arc;

use codec_bus::CodecError;
use futures::StreamExt;

use crate::media::{
    pipe::Pipe,
    stream::RawSinkSource,
    types::PipeConfig,
};

mod config;
mod media;

fn init_logging() {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .filter_module("codec_bus", log::LevelFilter::Debug)
        .filter_module("mediacodec_app", log::LevelFilter::Debug)
        .init();
}

#[tokio::main]
async fn main() {
    init_logging();
    #[cfg(feature = "ffmpeg")]
    {
        if let Err(e) = codec_bus::ffmpeg::init() {
            log::error!("{:#}", e);
            std::process::exit(1);
        }
    }

    let config = config::config();
    let mut builder = PipeConfig::builder()
        .exchange(config.exchange())
        .settings(config.settings());
    builder = match std::env::args().nth(1) {
        Some(path) => builder.input_file(path),
        None => builder.input(config.input.clone()),
    };
    if config.log_frames {
        builder = builder.add_log_output();
    }
    let mut reader = None;
    if config.raw_frames {
        let frames = Arc::new(RawSinkSource::new());
        builder = builder.add_raw_frame_output(Arc::clone(&frames));
        reader = Some(tokio::spawn(async move {
            let mut stream = RawSinkSource::as_stream(frames);
            let mut count = 0u64;
            while let Some(frame) = stream.next().await {
                if frame.is_key {
                    let luma = frame.luma().map_or(0, <[u8]>::len);
                    log::debug!("raw key frame: {} luma {} bytes", frame, luma);
                }
                count += 1;
            }
            log::info!("raw frame stream ended after {} frames", count);
        }));
    }

    let pipe = Arc::new(Pipe::new(builder.build()));
    let mut runner = {
        let pipe = Arc::clone(&pipe);
        tokio::spawn(async move { pipe.run().await })
    };

    let finished = tokio::select! {
        r = &mut runner => Some(r),
        _ = tokio::signal::ctrl_c() => None,
    };
    let result = match finished {
        Some(r) => r,
        None => {
            if pipe.is_started() {
                log::info!("interrupted, stopping");
            }
            pipe.cancel();
            runner.await
        }
    };
    if let Some(reader) = reader {
        let _ = reader.await;
    }

    match result {
        Ok(Ok(report)) => log::info!("done: {:?}", report),
        Ok(Err(e)) if e.downcast_ref::<CodecError>() == Some(&CodecError::Cancelled) => {
            log::info!("stopped");
        }
        Ok(Err(e)) => {
            log::error!("pipe failed: {:#}", e);
            std::process::exit(1);
        }
        Err(e) => {
            log::error!("pipe task failed: {}", e);
            std::process::exit(1);
        }
    }
}
