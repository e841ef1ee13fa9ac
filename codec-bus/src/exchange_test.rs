use std::{sync::Arc, thread, time::Duration};

use super::*;
use crate::{format::MIME_VIDEO_RAW, slot::BufferFlags};

const SHORT: Duration = Duration::from_millis(20);

fn raw(width: u32, height: u32) -> MediaFormat {
    MediaFormat::video(MIME_VIDEO_RAW, width, height)
}

fn started() -> BufferExchange {
    let exchange = BufferExchange::new();
    let config = ExchangeConfig {
        input_slots: 2,
        output_slots: 2,
        input_capacity: 16,
        output_capacity: 16,
    };
    exchange.start(&config, raw(4, 4)).unwrap();
    exchange
}

fn expect_format(exchange: &BufferExchange) {
    match exchange.acquire_output(SHORT) {
        Ok(OutputEvent::FormatChanged) => {}
        other => panic!("expected FormatChanged, got {:?}", other),
    }
}

fn expect_buffer(exchange: &BufferExchange) -> OutputSlot {
    match exchange.acquire_output(SHORT) {
        Ok(OutputEvent::Buffer(slot)) => slot,
        other => panic!("expected a buffer, got {:?}", other),
    }
}

/// Submits `data` and plays the device for it.
fn roundtrip(exchange: &BufferExchange, data: &[u8], pts_us: i64) {
    let mut slot = exchange.acquire_input(SHORT).unwrap();
    slot.write(data).unwrap();
    exchange
        .submit_input(slot, BufferInfo::new(data.len(), pts_us, BufferFlags::empty()))
        .unwrap();
    let job = exchange.next_job().unwrap();
    assert!(exchange.deliver(job.epoch, job.payload(), job.info));
    exchange.finish_job(job);
}

#[test]
fn test_acquire_before_start_is_invalid_state() {
    let exchange = BufferExchange::new();
    assert!(matches!(
        exchange.acquire_input(SHORT),
        Err(CodecError::InvalidState { .. })
    ));
}

#[test]
fn test_initial_format_is_reported_first() {
    let exchange = started();
    expect_format(&exchange);
    assert_eq!(exchange.output_format(), Some(raw(4, 4)));
    assert_eq!(exchange.stats().format_changes, 1);
    assert!(matches!(exchange.acquire_output(SHORT), Err(CodecError::Timeout)));
}

#[test]
fn test_acquired_inputs_are_distinct_until_pool_runs_dry() {
    let exchange = started();
    let a = exchange.acquire_input(SHORT).unwrap();
    let b = exchange.acquire_input(SHORT).unwrap();
    assert_ne!(a.index(), b.index());
    assert_eq!(a.capacity(), 16);
    assert_eq!(exchange.owned_by(SlotSide::Input, SlotOwner::Application), 2);
    assert!(matches!(exchange.acquire_input(SHORT), Err(CodecError::Timeout)));
}

#[test]
fn test_buffer_flows_through_device_side() {
    let exchange = started();
    roundtrip(&exchange, b"frame", 40);

    expect_format(&exchange);
    let out = expect_buffer(&exchange);
    assert_eq!(out.data(), b"frame");
    assert_eq!(out.pts_us(), 40);
    assert_eq!(exchange.owned_by(SlotSide::Output, SlotOwner::Application), 1);

    exchange.release_output(out, true).unwrap();
    let stats = exchange.stats();
    assert_eq!(stats.inputs_queued, 1);
    assert_eq!(stats.outputs_delivered, 1);
    assert_eq!(stats.outputs_rendered, 1);
    assert_eq!(exchange.owned_by(SlotSide::Output, SlotOwner::Application), 0);
    assert_eq!(exchange.in_flight(), 0);
}

#[test]
fn test_oversized_submit_is_rejected() {
    let exchange = started();
    let slot = exchange.acquire_input(SHORT).unwrap();
    let info = BufferInfo::new(17, 0, BufferFlags::empty());
    assert!(matches!(
        exchange.submit_input(slot, info),
        Err(CodecError::InvalidSlot { .. })
    ));
}

#[test]
fn test_slot_from_other_session_is_rejected() {
    let first = started();
    let second = started();
    let slot = first.acquire_input(SHORT).unwrap();
    let err = second
        .submit_input(slot, BufferInfo::new(1, 0, BufferFlags::empty()))
        .unwrap_err();
    assert_eq!(
        err,
        CodecError::InvalidSlot {
            index: 0,
            reason: "slot belongs to another session"
        }
    );
}

#[test]
fn test_flush_invalidates_held_slots() {
    let exchange = started();
    let input = exchange.acquire_input(SHORT).unwrap();
    roundtrip(&exchange, b"x", 0);
    expect_format(&exchange);
    let output = expect_buffer(&exchange);

    exchange.flush().unwrap();

    assert!(matches!(
        exchange.submit_input(input, BufferInfo::new(1, 0, BufferFlags::empty())),
        Err(CodecError::InvalidSlot { .. })
    ));
    assert!(matches!(
        exchange.release_output(output, false),
        Err(CodecError::InvalidSlot { .. })
    ));
    assert_eq!(exchange.owned_by(SlotSide::Input, SlotOwner::Application), 0);
    assert_eq!(exchange.owned_by(SlotSide::Output, SlotOwner::Application), 0);
}

#[test]
fn test_flush_drops_buffers_but_keeps_format_markers() {
    let exchange = started();
    let slot = exchange.acquire_input(SHORT).unwrap();
    exchange
        .submit_input(slot, BufferInfo::new(1, 0, BufferFlags::empty()))
        .unwrap();
    let job = exchange.next_job().unwrap();
    exchange.announce_format(raw(8, 8));
    assert!(exchange.deliver(job.epoch, b"x", job.info));
    exchange.finish_job(job);
    assert_eq!(exchange.in_flight(), 1);

    exchange.flush().unwrap();

    assert_eq!(exchange.in_flight(), 0);
    assert_eq!(exchange.stats().outputs_dropped, 1);
    expect_format(&exchange);
    expect_format(&exchange);
    assert_eq!(exchange.output_format(), Some(raw(8, 8)));
    assert!(matches!(exchange.acquire_output(SHORT), Err(CodecError::Timeout)));
}

#[test]
fn test_format_announced_after_flush_is_kept() {
    let exchange = Arc::new(started());
    expect_format(&exchange);
    let slot = exchange.acquire_input(SHORT).unwrap();
    exchange
        .submit_input(slot, BufferInfo::new(1, 0, BufferFlags::empty()))
        .unwrap();
    let job = exchange.next_job().unwrap();

    let flusher = {
        let exchange = Arc::clone(&exchange);
        thread::spawn(move || exchange.flush())
    };
    // flush bumps the epoch, then waits for this job
    thread::sleep(Duration::from_millis(50));
    exchange.announce_format(raw(8, 8));
    assert!(!exchange.deliver(job.epoch, b"x", job.info));
    exchange.finish_job(job);
    flusher.join().unwrap().unwrap();

    expect_format(&exchange);
    assert_eq!(exchange.output_format(), Some(raw(8, 8)));
    assert!(matches!(exchange.acquire_output(SHORT), Err(CodecError::Timeout)));
}

#[test]
fn test_repeated_format_is_announced_once() {
    let exchange = started();
    let slot = exchange.acquire_input(SHORT).unwrap();
    exchange
        .submit_input(slot, BufferInfo::new(1, 0, BufferFlags::empty()))
        .unwrap();
    let job = exchange.next_job().unwrap();
    exchange.announce_format(raw(4, 4));
    exchange.announce_format(raw(8, 8));
    exchange.announce_format(raw(8, 8));
    assert!(exchange.deliver(job.epoch, b"y", job.info));
    exchange.finish_job(job);

    expect_format(&exchange);
    expect_format(&exchange);
    assert_eq!(exchange.output_format(), Some(raw(8, 8)));
    let out = expect_buffer(&exchange);
    assert_eq!(out.data(), b"y");
    assert_eq!(exchange.stats().format_changes, 2);
}

#[test]
fn test_flush_waits_for_busy_worker() {
    let exchange = Arc::new(started());
    let slot = exchange.acquire_input(SHORT).unwrap();
    exchange
        .submit_input(slot, BufferInfo::new(1, 0, BufferFlags::empty()))
        .unwrap();
    let job = exchange.next_job().unwrap();
    assert!(!job.reset);

    let flusher = {
        let exchange = Arc::clone(&exchange);
        thread::spawn(move || exchange.flush())
    };
    thread::sleep(Duration::from_millis(50));
    assert!(!flusher.is_finished());
    // output produced from pre-flush input is discarded
    assert!(!exchange.deliver(job.epoch, b"late", job.info));

    exchange.finish_job(job);
    flusher.join().unwrap().unwrap();

    let slot = exchange.acquire_input(SHORT).unwrap();
    exchange
        .submit_input(slot, BufferInfo::new(1, 0, BufferFlags::empty()))
        .unwrap();
    assert!(exchange.next_job().unwrap().reset);
}

#[test]
fn test_cancel_unblocks_pending_acquire() {
    let exchange = Arc::new(started());
    let _a = exchange.acquire_input(SHORT).unwrap();
    let _b = exchange.acquire_input(SHORT).unwrap();

    let waiter = {
        let exchange = Arc::clone(&exchange);
        thread::spawn(move || exchange.acquire_input(Duration::from_secs(10)).map(|s| s.index()))
    };
    thread::sleep(Duration::from_millis(50));
    exchange.cancel();

    assert_eq!(waiter.join().unwrap(), Err(CodecError::Cancelled));
    assert!(exchange.is_cancelled());
}

#[test]
fn test_input_after_end_of_stream_is_refused() {
    let exchange = started();
    let slot = exchange.acquire_input(SHORT).unwrap();
    exchange
        .submit_input(slot, BufferInfo::new(0, 0, BufferFlags::END_OF_STREAM))
        .unwrap();
    assert!(matches!(
        exchange.acquire_input(SHORT),
        Err(CodecError::InvalidState { .. })
    ));

    exchange.flush().unwrap();
    assert!(exchange.acquire_input(SHORT).is_ok());
}

#[test]
fn test_stop_returns_every_slot_to_device() {
    let exchange = started();
    let _held = exchange.acquire_input(SHORT).unwrap();
    roundtrip(&exchange, b"z", 0);
    expect_format(&exchange);
    let _out = expect_buffer(&exchange);

    exchange.stop();

    assert_eq!(exchange.owned_by(SlotSide::Input, SlotOwner::Application), 0);
    assert_eq!(exchange.owned_by(SlotSide::Output, SlotOwner::Application), 0);
    assert!(exchange.next_job().is_none());
    assert!(matches!(
        exchange.acquire_output(SHORT),
        Err(CodecError::InvalidState {
            state: SessionState::Stopped,
            ..
        })
    ));
}

#[test]
fn test_device_failure_is_reported_to_callers() {
    let exchange = started();
    exchange.fail("boom".to_string());
    assert_eq!(exchange.failure(), Some("boom".to_string()));
    assert_eq!(
        exchange.acquire_input(SHORT).map(|s| s.index()),
        Err(CodecError::DeviceFailure("boom".to_string()))
    );
}
