//! End-to-end decode-loop scenarios: a scripted demuxer feeds packets in,
//! a playback-side thread drains rings out.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use byteorder::{BigEndian, WriteBytesExt};
use framelink::config::{DecoderConfig, OutputConfig};
use framelink::constants::FRAME_SAMPLES;
use framelink::{
    AlignedBuf, Block, ChannelSink, DecodeError, DecoderSession, DownmixEngine, DownmixProvider,
    EngineError, EngineHandle, EngineLifecycleManager, EngineRegistry, FourCc, FrameDecodeEngine,
    FrameSyncInfo, HeaderError, Packet, Pts, RingConsumer, RingError, SessionError, SourceItem,
    StreamCursor, TransformEngine, TransformProvider, source_channel, spawn,
};

const BLOCK_LEN: usize = FRAME_SAMPLES * 2;
/// 1536 samples at 48 kHz.
const FRAME_MICROS: u64 = 32_000;

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

// ── Test frame format ────────────────────────────────────────────────────────
//
// header: 0x0B 0x77, rate code (0 = 48000, 1 = 44100, 2 = 32000), channel
// tag; payload: one seed byte. The decode fills the whole block with the
// seed so tests can tell frames apart.

struct TestFrameEngine;

impl FrameDecodeEngine for TestFrameEngine {
    fn parse_header(&mut self, cursor: &mut StreamCursor) -> Result<FrameSyncInfo, HeaderError> {
        if cursor.read_u16()? != 0x0B77 {
            return Err(HeaderError::Invalid("bad sync word"));
        }
        let sample_rate = match cursor.read_byte()? {
            0 => 48_000,
            1 => 44_100,
            2 => 32_000,
            _ => return Err(HeaderError::Invalid("bad rate code")),
        };
        let channel_tag = cursor.read_byte()?;
        Ok(FrameSyncInfo {
            sample_rate,
            frame_samples: FRAME_SAMPLES,
            channel_tag,
        })
    }

    fn decode_payload(
        &mut self,
        cursor: &mut StreamCursor,
        transform: &mut EngineHandle<dyn TransformEngine>,
        downmix: &mut EngineHandle<dyn DownmixEngine>,
        out: &mut [i16],
    ) -> Result<(), DecodeError> {
        let seed = cursor.read_byte()?;
        let mut coeffs = vec![f32::from(seed); 256];

        let (engine, scratch) = transform.engine_and_scratch();
        engine.inverse_transform(&mut coeffs, 2, scratch);

        let (engine, scratch) = downmix.engine_and_scratch();
        engine.downmix(&coeffs, 2, out, scratch);
        Ok(())
    }
}

struct PassTransform;

impl TransformEngine for PassTransform {
    fn name(&self) -> &str {
        "imdct-test"
    }

    fn scratch_words(&self) -> &[usize] {
        &[256]
    }

    fn inverse_transform(&mut self, coeffs: &mut [f32], _channels: usize, scratch: &mut [AlignedBuf]) {
        // Identity transform bounced through the aligned scratch lane.
        scratch[0][..coeffs.len()].copy_from_slice(coeffs);
        coeffs.copy_from_slice(&scratch[0][..coeffs.len()]);
    }
}

struct FoldDownmix;

impl DownmixEngine for FoldDownmix {
    fn name(&self) -> &str {
        "fold-test"
    }

    fn scratch_words(&self) -> &[usize] {
        &[]
    }

    fn downmix(&mut self, samples: &[f32], _channels: usize, out: &mut [i16], _: &mut [AlignedBuf]) {
        for (i, slot) in out.iter_mut().enumerate() {
            *slot = samples[i % samples.len()] as i16;
        }
    }
}

struct PassTransformProvider;

impl TransformProvider for PassTransformProvider {
    fn name(&self) -> &str {
        "imdct-test"
    }

    fn priority(&self) -> u32 {
        50
    }

    fn instantiate(&self) -> Result<Box<dyn TransformEngine>, EngineError> {
        Ok(Box::new(PassTransform))
    }
}

struct FoldDownmixProvider;

impl DownmixProvider for FoldDownmixProvider {
    fn name(&self) -> &str {
        "fold-test"
    }

    fn priority(&self) -> u32 {
        50
    }

    fn instantiate(&self) -> Result<Box<dyn DownmixEngine>, EngineError> {
        Ok(Box::new(FoldDownmix))
    }
}

fn lifecycle() -> EngineLifecycleManager {
    let mut registry = EngineRegistry::new();
    registry.register_transform(Arc::new(PassTransformProvider));
    registry.register_downmix(Arc::new(FoldDownmixProvider));
    EngineLifecycleManager::new(Arc::new(registry))
}

fn config_with_capacity(ring_capacity: usize) -> DecoderConfig {
    DecoderConfig {
        output: OutputConfig { ring_capacity },
        ..DecoderConfig::default()
    }
}

// ── Stream builders ──────────────────────────────────────────────────────────

fn frame_bytes(rate_code: u8, seed: u8) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.write_u16::<BigEndian>(0x0B77).unwrap();
    buf.push(rate_code);
    buf.push(0); // channel tag
    buf.push(seed);
    buf
}

fn corrupt_frame_bytes(seed: u8) -> Vec<u8> {
    let mut buf = frame_bytes(0, seed);
    buf[0] = 0xFF;
    buf[1] = 0xFF;
    buf
}

/// A demux-unit packet: sync pointer, `garbage` filler bytes the pointer
/// skips, then the frames back to back.
fn unit_packet(garbage: &[u8], frames: &[Vec<u8>], pts: Option<u64>) -> SourceItem {
    let mut data = Vec::new();
    data.write_u16::<BigEndian>(garbage.len() as u16).unwrap();
    data.extend_from_slice(garbage);
    for frame in frames {
        data.extend_from_slice(frame);
    }
    SourceItem::Packet(Packet {
        data: data.into(),
        pts,
        pes_start: true,
    })
}

/// A continuation packet inside a unit: frames only, no pointer.
fn data_packet(frames: &[Vec<u8>], pts: Option<u64>) -> SourceItem {
    let mut data = Vec::new();
    for frame in frames {
        data.extend_from_slice(frame);
    }
    SourceItem::Packet(Packet {
        data: data.into(),
        pts,
        pes_start: false,
    })
}

/// Drain every ring the sink hands out; returns, per ring, its sample rate,
/// blocks and final write index.
fn collect_rings(
    consumer_rx: flume::Receiver<RingConsumer>,
) -> thread::JoinHandle<Vec<(u32, Vec<Block>, usize)>> {
    thread::spawn(move || {
        let mut rings = Vec::new();
        while let Ok(consumer) = consumer_rx.recv() {
            let rate = consumer.sample_rate();
            let mut blocks = Vec::new();
            while let Some(block) = consumer.recv() {
                blocks.push(block);
            }
            let write_index = consumer.ring().write_index();
            rings.push((rate, blocks, write_index));
        }
        rings
    })
}

// ── Scenarios ────────────────────────────────────────────────────────────────

#[test]
fn ten_clean_frames_publish_with_matching_timestamps() {
    init_tracing();

    let (packet_tx, source) = source_channel();
    packet_tx
        .send(unit_packet(&[], &[frame_bytes(0, 0)], Some(0)))
        .unwrap();
    for i in 1..10u8 {
        packet_tx
            .send(data_packet(
                &[frame_bytes(0, i)],
                Some(u64::from(i) * FRAME_MICROS),
            ))
            .unwrap();
    }
    drop(packet_tx);

    let (sink, consumer_rx) = ChannelSink::new();
    let collector = collect_rings(consumer_rx);

    let lifecycle = lifecycle();
    let mut session = DecoderSession::new(
        Box::new(source),
        FourCc::A52,
        Box::new(TestFrameEngine),
        Box::new(sink),
        &lifecycle,
        &config_with_capacity(16),
    )
    .unwrap();
    session.run().unwrap();
    drop(session);

    let rings = collector.join().unwrap();
    assert_eq!(rings.len(), 1);
    let (rate, blocks, write_index) = &rings[0];
    assert_eq!(*rate, 48_000);
    assert_eq!(blocks.len(), 10);
    assert_eq!(*write_index, 10 & 15);

    for (i, block) in blocks.iter().enumerate() {
        assert_eq!(block.pts, Pts::Known(i as u64 * FRAME_MICROS));
        assert_eq!(block.pcm.len(), BLOCK_LEN);
        assert!(block.pcm.iter().all(|&s| s == i as i16));
    }
}

#[test]
fn corrupt_header_drops_one_frame_and_recovery_resumes() {
    init_tracing();

    let mut first: Vec<Vec<u8>> = (0..4).map(|i| frame_bytes(0, i)).collect();
    first.push(corrupt_frame_bytes(4));
    let second: Vec<Vec<u8>> = (5..10).map(|i| frame_bytes(0, i)).collect();

    let (packet_tx, source) = source_channel();
    packet_tx.send(unit_packet(&[], &first, Some(0))).unwrap();
    packet_tx
        .send(unit_packet(&[], &second, Some(5 * FRAME_MICROS)))
        .unwrap();
    drop(packet_tx);

    let (sink, consumer_rx) = ChannelSink::new();
    let collector = collect_rings(consumer_rx);

    let lifecycle = lifecycle();
    let mut session = DecoderSession::new(
        Box::new(source),
        FourCc::A52,
        Box::new(TestFrameEngine),
        Box::new(sink),
        &lifecycle,
        &config_with_capacity(16),
    )
    .unwrap();
    session.run().unwrap();
    drop(session);

    let rings = collector.join().unwrap();
    assert_eq!(rings.len(), 1);
    let (_, blocks, _) = &rings[0];

    // The corrupted frame publishes nothing; everything around it survives.
    let seeds: Vec<i16> = blocks.iter().map(|b| b.pcm[0]).collect();
    assert_eq!(seeds, vec![0, 1, 2, 3, 5, 6, 7, 8, 9]);

    assert_eq!(blocks[0].pts, Pts::Known(0));
    assert_eq!(blocks[3].pts, Pts::Continuation);
    // First frame of the re-synced unit carries that unit's timestamp.
    assert_eq!(blocks[4].pts, Pts::Known(5 * FRAME_MICROS));
}

#[test]
fn rate_change_rebuilds_the_ring_between_slots() {
    init_tracing();

    let mut frames: Vec<Vec<u8>> = (0..5).map(|i| frame_bytes(0, i)).collect();
    frames.extend((5..10).map(|i| frame_bytes(1, i)));

    let (packet_tx, source) = source_channel();
    packet_tx.send(unit_packet(&[], &frames, None)).unwrap();
    drop(packet_tx);

    let (sink, consumer_rx) = ChannelSink::new();
    let collector = collect_rings(consumer_rx);

    let lifecycle = lifecycle();
    let mut session = DecoderSession::new(
        Box::new(source),
        FourCc::A52,
        Box::new(TestFrameEngine),
        Box::new(sink),
        &lifecycle,
        &config_with_capacity(8),
    )
    .unwrap();
    session.run().unwrap();
    drop(session);

    let rings = collector.join().unwrap();
    assert_eq!(rings.len(), 2);

    let (first_rate, first_blocks, _) = &rings[0];
    assert_eq!(*first_rate, 48_000);
    let first_seeds: Vec<i16> = first_blocks.iter().map(|b| b.pcm[0]).collect();
    assert_eq!(first_seeds, vec![0, 1, 2, 3, 4]);

    let (second_rate, second_blocks, _) = &rings[1];
    assert_eq!(*second_rate, 44_100);
    let second_seeds: Vec<i16> = second_blocks.iter().map(|b| b.pcm[0]).collect();
    assert_eq!(second_seeds, vec![5, 6, 7, 8, 9]);

    // No timestamps upstream: every slot still carries the sentinel.
    assert!(
        first_blocks
            .iter()
            .chain(second_blocks.iter())
            .all(|b| b.pts == Pts::Continuation)
    );
}

#[test]
fn hunt_skips_leading_garbage_via_the_sync_pointer() {
    init_tracing();

    let mut rng_garbage = vec![0u8; 37];
    for (i, byte) in rng_garbage.iter_mut().enumerate() {
        *byte = rand::random::<u8>().wrapping_add(i as u8);
    }
    let frames: Vec<Vec<u8>> = (0..3).map(|i| frame_bytes(0, i)).collect();

    let (packet_tx, source) = source_channel();
    // Two mid-unit packets the hunt has to pass over first.
    packet_tx
        .send(data_packet(&[vec![0xAA, 0xBB, 0xCC]], None))
        .unwrap();
    packet_tx.send(data_packet(&[vec![0x0B]], None)).unwrap();
    packet_tx
        .send(unit_packet(&rng_garbage, &frames, Some(0)))
        .unwrap();
    drop(packet_tx);

    let (sink, consumer_rx) = ChannelSink::new();
    let collector = collect_rings(consumer_rx);

    let lifecycle = lifecycle();
    let mut session = DecoderSession::new(
        Box::new(source),
        FourCc::A52,
        Box::new(TestFrameEngine),
        Box::new(sink),
        &lifecycle,
        &config_with_capacity(8),
    )
    .unwrap();
    session.run().unwrap();
    drop(session);

    let rings = collector.join().unwrap();
    assert_eq!(rings.len(), 1);
    let seeds: Vec<i16> = rings[0].1.iter().map(|b| b.pcm[0]).collect();
    assert_eq!(seeds, vec![0, 1, 2]);
}

#[test]
fn stop_flag_interrupts_a_starved_session() {
    init_tracing();

    // Keep the sender alive so the source never ends on its own.
    let (packet_tx, source) = source_channel();

    let (sink, consumer_rx) = ChannelSink::new();
    drop(consumer_rx); // never reached: no ring is ever created

    let lifecycle = lifecycle();
    let session = DecoderSession::new(
        Box::new(source),
        FourCc::A52,
        Box::new(TestFrameEngine),
        Box::new(sink),
        &lifecycle,
        &config_with_capacity(8),
    )
    .unwrap();

    let handle = spawn(session);
    thread::sleep(Duration::from_millis(30));
    handle.stop();
    assert!(handle.join().is_none());
    drop(packet_tx);
}

#[test]
fn upstream_fault_surfaces_as_a_session_error() {
    init_tracing();

    let (packet_tx, source) = source_channel();
    packet_tx
        .send(unit_packet(&[], &[frame_bytes(0, 1)], Some(0)))
        .unwrap();
    packet_tx
        .send(SourceItem::Fatal("demux lost the transport".into()))
        .unwrap();

    let (sink, consumer_rx) = ChannelSink::new();
    let collector = collect_rings(consumer_rx);

    let lifecycle = lifecycle();
    let session = DecoderSession::new(
        Box::new(source),
        FourCc::A52,
        Box::new(TestFrameEngine),
        Box::new(sink),
        &lifecycle,
        &config_with_capacity(8),
    )
    .unwrap();

    let handle = spawn(session);
    match handle.join() {
        Some(SessionError::Upstream(msg)) => assert_eq!(msg, "demux lost the transport"),
        other => panic!("expected upstream failure, got {other:?}"),
    }

    // The frame before the fault still made it out.
    let rings = collector.join().unwrap();
    assert_eq!(rings.len(), 1);
    assert_eq!(rings[0].1.len(), 1);
}

#[test]
fn wrong_codec_tag_is_refused_before_binding_engines() {
    init_tracing();

    let (_packet_tx, source) = source_channel();
    let (sink, _consumer_rx) = ChannelSink::new();
    let lifecycle = lifecycle();

    let result = DecoderSession::new(
        Box::new(source),
        FourCc(*b"mpga"),
        Box::new(TestFrameEngine),
        Box::new(sink),
        &lifecycle,
        &DecoderConfig::default(),
    );
    assert!(matches!(result, Err(SessionError::UnsupportedCodec(_))));
    assert_eq!(lifecycle.bound_count(), 0);
}

#[test]
fn ring_creation_failure_is_fatal() {
    init_tracing();

    let (packet_tx, source) = source_channel();
    packet_tx
        .send(unit_packet(&[], &[frame_bytes(0, 1)], Some(0)))
        .unwrap();
    drop(packet_tx);

    // A capacity the ring cannot accept: creation fails on the first frame.
    let (sink, _consumer_rx) = ChannelSink::new();

    let lifecycle = lifecycle();
    let mut session = DecoderSession::new(
        Box::new(source),
        FourCc::A52,
        Box::new(TestFrameEngine),
        Box::new(sink),
        &lifecycle,
        &config_with_capacity(12),
    )
    .unwrap();

    match session.run() {
        Err(SessionError::Ring(RingError::BadCapacity(12))) => {}
        other => panic!("expected ring failure, got {other:?}"),
    }
}
