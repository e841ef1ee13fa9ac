use std::{sync::Arc, thread::JoinHandle};

use crate::{
    engine::{CodecEngine, EngineInput, EngineOutput},
    exchange::BufferExchange,
    slot::{BufferFlags, BufferInfo},
};

/// The device side of a session: a thread that takes submitted input
/// buffers from the exchange, runs them through the engine and fills
/// output slots with the result.
pub struct CodecDevice {
    name: String,
    handle: Option<JoinHandle<Box<dyn CodecEngine>>>,
}

impl CodecDevice {
    pub(crate) fn spawn(
        exchange: Arc<BufferExchange>,
        engine: Box<dyn CodecEngine>,
    ) -> anyhow::Result<Self> {
        let name = format!("codec-{}", engine.name());
        let handle = std::thread::Builder::new()
            .name(name.clone())
            .spawn(move || Self::device_loop(exchange, engine))
            .map_err(|e| anyhow::anyhow!("spawn device thread {}: {}", name, e))?;
        Ok(Self {
            name,
            handle: Some(handle),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Waits for the worker to exit. The exchange must already be stopped or
    /// failed, otherwise this blocks until it is.
    pub(crate) fn join(&mut self) -> Option<Box<dyn CodecEngine>> {
        let handle = self.handle.take()?;
        match handle.join() {
            Ok(engine) => Some(engine),
            Err(_) => {
                log::error!("{}: device thread panicked", self.name);
                None
            }
        }
    }

    fn device_loop(exchange: Arc<BufferExchange>, mut engine: Box<dyn CodecEngine>) -> Box<dyn CodecEngine> {
        let _guard = PanicGuard(&exchange);
        let mut out = Vec::new();
        while let Some(job) = exchange.next_job() {
            if job.reset {
                if let Err(e) = engine.reset() {
                    exchange.fail(format!("{} reset: {:#}", engine.name(), e));
                    break;
                }
            }
            let eos = job.info.is_end_of_stream();
            out.clear();
            let input = EngineInput {
                data: job.payload(),
                pts_us: job.info.pts_us,
                flags: job.info.flags,
            };
            let result = engine.process(input, &mut out).and_then(|_| {
                if eos {
                    engine.drain(&mut out)
                } else {
                    Ok(())
                }
            });
            if let Err(e) = result {
                exchange.fail(format!("{}: {:#}", engine.name(), e));
                break;
            }

            let mut delivered = true;
            for output in out.drain(..) {
                delivered = match output {
                    EngineOutput::FormatChanged(format) => {
                        exchange.announce_format(format);
                        true
                    }
                    EngineOutput::Buffer { data, info } => exchange.deliver(job.epoch, &data, info),
                };
                if !delivered {
                    break;
                }
            }
            if eos && delivered {
                log::debug!("{}: output end of stream", engine.name());
                exchange.deliver(
                    job.epoch,
                    &[],
                    BufferInfo::new(0, job.info.pts_us, BufferFlags::END_OF_STREAM),
                );
            }
            exchange.finish_job(job);
        }
        engine
    }
}

impl Drop for CodecDevice {
    fn drop(&mut self) {
        if self.handle.is_some() {
            log::warn!("{}: device dropped while running", self.name);
        }
    }
}

/// Marks the exchange failed if the engine panics, so nobody waits on a
/// worker that is gone.
struct PanicGuard<'a>(&'a BufferExchange);

impl Drop for PanicGuard<'_> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.0.fail("device worker panicked".to_string());
        }
    }
}
