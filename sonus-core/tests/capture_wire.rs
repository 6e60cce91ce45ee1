//! End-to-end outbound path: ring buffer → conditioning → VAD → resample
//! → PCM16 → base64 → `input_audio_buffer.append`, checked at the JSON
//! wire level the way the server sees it.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::thread;
use std::time::{Duration, Instant};

use sonus_core::capture::pipeline::{self, CaptureDiagnostics, PipelineContext};
use sonus_core::capture::{create_capture_ring, CaptureConfig, VoiceEndTracker};
use sonus_core::codec::base64_to_bytes;
use sonus_core::{ClientMessage, TARGET_SAMPLE_RATE};

use ringbuf::traits::Producer;
use tokio::sync::{broadcast, mpsc};

const CAPTURE_RATE: u32 = 48_000;
const BLOCK: usize = 1_024;

fn tone(samples: usize, freq: f32, amplitude: f32) -> Vec<f32> {
    (0..samples)
        .map(|i| {
            (2.0 * std::f32::consts::PI * freq * i as f32 / CAPTURE_RATE as f32).sin() * amplitude
        })
        .collect()
}

fn recv_append(
    rx: &mut mpsc::UnboundedReceiver<ClientMessage>,
    timeout: Duration,
) -> ClientMessage {
    let start = Instant::now();
    loop {
        match rx.try_recv() {
            Ok(msg) => return msg,
            Err(_) => {
                if start.elapsed() >= timeout {
                    panic!("timed out waiting for an append message");
                }
                thread::sleep(Duration::from_millis(5));
            }
        }
    }
}

#[test]
fn captured_tone_reaches_the_wire_at_24khz_pcm16() {
    let (mut producer, consumer) = create_capture_ring();
    producer.push_slice(&tone(BLOCK * 2, 440.0, 0.4));

    let config = CaptureConfig {
        block_samples: BLOCK,
        ..CaptureConfig::default()
    };
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel();
    let (activity_tx, _activity_rx) = broadcast::channel(64);
    let running = Arc::new(AtomicBool::new(true));

    let ctx = PipelineContext {
        config,
        consumer,
        running: Arc::clone(&running),
        outbound_tx,
        activity_tx,
        voice_end: VoiceEndTracker::default(),
        capture_sample_rate: CAPTURE_RATE,
        diagnostics: Arc::new(CaptureDiagnostics::default()),
    };
    let handle = thread::spawn(move || pipeline::run(ctx));

    let msg = recv_append(&mut outbound_rx, Duration::from_secs(2));
    running.store(false, Ordering::SeqCst);
    handle.join().expect("pipeline thread panicked");

    // Wire shape: the exact JSON the server parses.
    let wire = serde_json::to_value(&msg).expect("append serializes");
    assert_eq!(wire["type"], "input_audio_buffer.append");
    assert!(wire["t0"].as_f64().expect("t0 is a number") > 0.0);

    // Payload contract: 1024 samples at 48 kHz resample to 512 at 24 kHz,
    // two bytes per PCM16 sample.
    let audio = wire["audio"].as_str().expect("audio is base64 text");
    let bytes = base64_to_bytes(audio).expect("payload decodes");
    let expected_samples = BLOCK * TARGET_SAMPLE_RATE as usize / CAPTURE_RATE as usize;
    assert_eq!(bytes.len(), expected_samples * 2);

    // A 0.4-amplitude tone attenuated by 0.8 still carries real energy.
    let peak = bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]).unsigned_abs())
        .max()
        .unwrap_or(0);
    assert!(peak > 2_000, "peak {peak} too quiet for the input tone");
}

#[test]
fn speech_then_silence_yields_one_voice_end_edge() {
    let (mut producer, consumer) = create_capture_ring();
    // ≈ 170 ms of tone (well past the 30 ms entry debounce), then
    // ≈ 340 ms of silence (past the 250 ms hangover).
    producer.push_slice(&tone(BLOCK * 8, 440.0, 0.4));
    producer.push_slice(&vec![0.0f32; BLOCK * 16]);

    let config = CaptureConfig {
        block_samples: BLOCK,
        ..CaptureConfig::default()
    };
    let (outbound_tx, _outbound_rx) = mpsc::unbounded_channel();
    let (activity_tx, mut activity_rx) = broadcast::channel(256);
    let running = Arc::new(AtomicBool::new(true));
    let voice_end = VoiceEndTracker::default();

    let ctx = PipelineContext {
        config,
        consumer,
        running: Arc::clone(&running),
        outbound_tx,
        activity_tx,
        voice_end: voice_end.clone(),
        capture_sample_rate: CAPTURE_RATE,
        diagnostics: Arc::new(CaptureDiagnostics::default()),
    };
    let handle = thread::spawn(move || pipeline::run(ctx));

    let mut edges = 0usize;
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        match activity_rx.try_recv() {
            Ok(event) if event.voice_ended => edges += 1,
            Ok(_) => {}
            Err(broadcast::error::TryRecvError::Empty) => {
                thread::sleep(Duration::from_millis(5));
            }
            Err(broadcast::error::TryRecvError::Lagged(_)) => {}
            Err(broadcast::error::TryRecvError::Closed) => break,
        }
    }
    running.store(false, Ordering::SeqCst);
    handle.join().expect("pipeline thread panicked");

    assert_eq!(edges, 1, "exactly one voice-end edge per speech run");
    assert!(voice_end.last_ms().is_some());
}
