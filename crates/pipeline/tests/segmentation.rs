//! Segmenter behaviour inside a running engine

mod common;

use std::time::Duration;

use async_trait::async_trait;
use parley_core::{ControlSignal, Frame, FramePayload, Result};
use parley_pipeline::{
    EngineConfig, FrameProcessor, PipelineEngine, Segmenter, SegmenterConfig, Stage, StageContext,
};
use tokio::sync::mpsc;

use common::{chunk_duration, silence, tone};

/// Terminal stage that hands every frame to the test
struct Probe {
    tx: mpsc::UnboundedSender<Frame>,
}

#[async_trait]
impl FrameProcessor for Probe {
    async fn process(&mut self, frame: Frame, _ctx: &StageContext) -> Result<()> {
        let _ = self.tx.send(frame);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "probe"
    }
}

const END_MARKER: &str = "end-of-input";

fn segmenter_engine() -> (PipelineEngine, mpsc::UnboundedReceiver<Frame>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let engine = PipelineEngine::spawn(
        vec![
            Segmenter::new(SegmenterConfig::default()).into(),
            Stage::custom(Probe { tx }),
        ],
        EngineConfig::default(),
    );
    (engine, rx)
}

async fn feed(engine: &PipelineEngine, chunk: parley_core::AudioChunk, total: Duration) {
    let count = (total.as_millis() / chunk_duration().as_millis()) as usize;
    for _ in 0..count {
        engine.submit(chunk.clone()).await.unwrap();
    }
}

async fn collect(engine: &PipelineEngine, rx: &mut mpsc::UnboundedReceiver<Frame>) -> Vec<Frame> {
    engine
        .submit(ControlSignal::SystemPrompt(END_MARKER.to_string()))
        .await
        .unwrap();

    let mut frames = Vec::new();
    while let Some(frame) = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
    {
        if frame.control() == Some(&ControlSignal::SystemPrompt(END_MARKER.to_string())) {
            break;
        }
        frames.push(frame);
    }
    frames
}

fn count_signal(frames: &[Frame], signal: &ControlSignal) -> usize {
    frames.iter().filter(|f| f.control() == Some(signal)).count()
}

#[tokio::test]
async fn test_silence_never_starts_an_utterance() {
    let (engine, mut rx) = segmenter_engine();
    feed(&engine, silence(chunk_duration()), Duration::from_secs(5)).await;

    let frames = collect(&engine, &mut rx).await;

    assert_eq!(count_signal(&frames, &ControlSignal::StartOfSpeech), 0);
    assert_eq!(count_signal(&frames, &ControlSignal::EndOfSpeech), 0);
    // Passthrough audio still flows, untagged
    assert_eq!(frames.len(), 250);
    assert!(frames.iter().all(|f| f.audio().map_or(false, |a| !a.is_utterance())));
}

#[tokio::test]
async fn test_single_utterance_is_bounded_once() {
    let (engine, mut rx) = segmenter_engine();
    feed(&engine, tone(chunk_duration()), Duration::from_secs(3)).await;
    feed(&engine, silence(chunk_duration()), Duration::from_secs(1)).await;

    let frames = collect(&engine, &mut rx).await;

    assert_eq!(count_signal(&frames, &ControlSignal::StartOfSpeech), 1);
    assert_eq!(count_signal(&frames, &ControlSignal::EndOfSpeech), 1);

    let start = frames
        .iter()
        .position(|f| f.control() == Some(&ControlSignal::StartOfSpeech))
        .unwrap();
    let end = frames
        .iter()
        .position(|f| f.control() == Some(&ControlSignal::EndOfSpeech))
        .unwrap();
    assert!(start < end);

    // The onset held back by the debounce window is released as utterance audio
    let first_audio = &frames[start + 1];
    assert_eq!(first_audio.sequence(), frames[start].sequence());
    assert!(first_audio.audio().unwrap().is_utterance());

    // EndOfSpeech comes at least one silence window after the last loud chunk
    let last_loud = frames
        .iter()
        .filter_map(|f| f.audio().map(|a| (f.sequence(), a)))
        .filter(|(_, a)| a.energy_db() >= SegmenterConfig::default().energy_threshold_db)
        .map(|(seq, _)| seq)
        .max()
        .unwrap();
    let end_seq = frames[end].sequence();
    let silence_after = chunk_duration() * (end_seq - last_loud) as u32;
    assert!(silence_after >= SegmenterConfig::default().stop_silence);

    // Everything after the utterance is passthrough again
    assert!(frames[end + 1..]
        .iter()
        .filter_map(|f| f.audio())
        .all(|a| !a.is_utterance()));
}

#[tokio::test]
async fn test_short_noise_is_released_untagged() {
    let (engine, mut rx) = segmenter_engine();
    feed(&engine, silence(chunk_duration()), Duration::from_millis(100)).await;
    feed(&engine, tone(chunk_duration()), Duration::from_millis(100)).await;
    feed(&engine, silence(chunk_duration()), Duration::from_millis(200)).await;

    let frames = collect(&engine, &mut rx).await;

    assert_eq!(count_signal(&frames, &ControlSignal::StartOfSpeech), 0);
    assert_eq!(frames.len(), 20);

    // Held frames come out in submission order
    let sequences: Vec<u64> = frames.iter().map(Frame::sequence).collect();
    let mut sorted = sequences.clone();
    sorted.sort_unstable();
    assert_eq!(sequences, sorted);
}

#[tokio::test]
async fn test_control_frames_keep_order_behind_held_audio() {
    let (engine, mut rx) = segmenter_engine();
    feed(&engine, tone(chunk_duration()), Duration::from_millis(100)).await;
    engine.submit(ControlSignal::ContextReady).await.unwrap();
    feed(&engine, tone(chunk_duration()), Duration::from_millis(200)).await;

    let frames = collect(&engine, &mut rx).await;

    let ready = frames
        .iter()
        .position(|f| matches!(f.payload(), FramePayload::Control(ControlSignal::ContextReady)))
        .unwrap();
    let audio_before = frames[..ready].iter().filter(|f| f.audio().is_some()).count();
    assert_eq!(audio_before, 5);
}
