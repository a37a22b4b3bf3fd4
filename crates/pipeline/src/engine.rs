//! Pipeline engine
//!
//! Runs an ordered chain of [`Stage`]s, each in its own task, connected by
//! bounded channels. Data and in-band control frames travel through the
//! channels in order. Interrupts and cancellation travel out of band so
//! that a stage blocked on a full queue or an external call still sees them.
//!
//! ```text
//! submit ──► [stage 0] ──► [stage 1] ──► ... ──► [stage n]
//!               ▲              ▲                     ▲
//!               └──── interrupt watch / cancel token ┘
//! ```

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::{Stream, StreamExt};
use parking_lot::Mutex;
use parley_config::PipelineConfig;
use parley_core::{
    Capability, ControlSignal, Direction, Error, Frame, FramePayload, InterruptMark,
    InterruptReason, Result,
};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::cancel::CancelToken;
use crate::stage::Stage;

/// Engine tuning
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub queue_capacity: usize,
    pub capability_deadline: Duration,
    pub max_consecutive_failures: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::from(&PipelineConfig::default())
    }
}

impl From<&PipelineConfig> for EngineConfig {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            queue_capacity: config.stage_queue_capacity.max(1),
            capability_deadline: config.capability_deadline(),
            max_consecutive_failures: config.max_consecutive_failures.max(1),
        }
    }
}

/// Lifecycle notifications
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// An interrupt was issued
    Interrupted(InterruptMark),
    /// A stage failed; the current turn was abandoned
    StageFailed {
        stage: &'static str,
        error: Error,
        consecutive: u32,
    },
    /// Failures crossed the limit; the pipeline is being cancelled
    Escalated { failures: u32 },
    /// The outbound transport failed
    TransportClosed(String),
    /// The pipeline was cancelled
    Cancelled,
}

/// Whether the assistant is producing or playing a response
///
/// Set when a response starts, cleared once its audio has been paced out
/// or an interrupt discards it.
#[derive(Debug, Default)]
pub struct AssistantActivity {
    active: AtomicBool,
}

impl AssistantActivity {
    pub fn begin(&self) {
        self.active.store(true, Ordering::SeqCst);
    }

    pub fn finish(&self) {
        self.active.store(false, Ordering::SeqCst);
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

/// State shared by the engine handle and every stage task
pub(crate) struct EngineShared {
    cancel: CancelToken,
    interrupts: watch::Sender<InterruptMark>,
    /// Next inbound sequence number; numbering starts at 1
    inbound_seq: AtomicU64,
    /// Next outbound sequence number; numbering starts at 1
    outbound_seq: AtomicU64,
    /// Inbound sequence of the turn the generator is answering, 0 if none
    turn_origin: AtomicU64,
    config: EngineConfig,
    events: broadcast::Sender<EngineEvent>,
    assistant: AssistantActivity,
}

impl EngineShared {
    fn emit_event(&self, event: EngineEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn mark(&self) -> InterruptMark {
        *self.interrupts.borrow()
    }

    /// Issue a new interrupt mark and notify every stage
    fn raise_interrupt(&self, inbound: u64, reason: InterruptReason) -> InterruptMark {
        let outbound = self.outbound_seq.load(Ordering::SeqCst);
        let mut issued = InterruptMark::default();
        self.interrupts.send_modify(|mark| {
            *mark = mark.advance(inbound, outbound, reason);
            issued = *mark;
        });
        self.assistant.finish();

        let reason_label = match reason {
            InterruptReason::BargeIn => "barge_in",
            InterruptReason::TurnAbandoned => "turn_abandoned",
        };
        metrics::counter!("parley_interrupts_total", "reason" => reason_label).increment(1);
        tracing::debug!(
            reason = reason_label,
            inbound = issued.inbound,
            outbound = issued.outbound,
            epoch = issued.epoch,
            "Interrupt issued"
        );
        self.emit_event(EngineEvent::Interrupted(issued));
        issued
    }

    fn abandon_turn(&self) -> InterruptMark {
        let origin = self.turn_origin.load(Ordering::SeqCst);
        let inbound = if origin == 0 { 0 } else { origin + 1 };
        self.raise_interrupt(inbound, InterruptReason::TurnAbandoned)
    }

    fn record_failure(&self, stage: &'static str, error: Error, consecutive: u32) {
        metrics::counter!("parley_stage_failures_total", "stage" => stage).increment(1);
        tracing::warn!(
            stage,
            error = %error,
            consecutive,
            "Stage failed, abandoning current turn"
        );
        self.emit_event(EngineEvent::StageFailed {
            stage,
            error,
            consecutive,
        });

        if consecutive >= self.config.max_consecutive_failures {
            tracing::error!(
                failures = consecutive,
                "Too many consecutive failures, cancelling pipeline"
            );
            self.emit_event(EngineEvent::Escalated {
                failures: consecutive,
            });
            self.shutdown();
            return;
        }

        self.abandon_turn();
    }

    fn shutdown(&self) -> bool {
        if !self.cancel.cancel() {
            return false;
        }
        tracing::info!("Pipeline cancelled");
        self.emit_event(EngineEvent::Cancelled);
        true
    }
}

/// Frame currently being processed by a stage
#[derive(Debug, Clone, Copy)]
struct SourceFrame {
    direction: Direction,
    sequence: u64,
    turn_scoped: bool,
}

/// Per-stage view of the engine handed to [`crate::FrameProcessor`]s
pub struct StageContext {
    shared: Arc<EngineShared>,
    stage: &'static str,
    output: Option<mpsc::Sender<Frame>>,
    source: Mutex<Option<SourceFrame>>,
    /// Consecutive failures of this stage
    failures: AtomicU32,
}

impl StageContext {
    fn new(shared: Arc<EngineShared>, stage: &'static str, output: Option<mpsc::Sender<Frame>>) -> Self {
        Self {
            shared,
            stage,
            output,
            source: Mutex::new(None),
            failures: AtomicU32::new(0),
        }
    }

    pub fn stage_name(&self) -> &'static str {
        self.stage
    }

    /// Send a frame to the next stage
    ///
    /// Waits while the downstream queue is full. Frames that an interrupt
    /// has already covered, or that derive from covered work, are dropped.
    pub async fn emit(&self, frame: Frame) -> Result<()> {
        if self.is_source_stale() || self.shared.mark().is_stale(&frame) {
            self.discard(&frame);
            return Ok(());
        }

        let Some(output) = &self.output else {
            return Ok(());
        };

        tokio::select! {
            biased;
            _ = self.shared.cancel.cancelled() => Err(Error::Cancelled),
            sent = output.send(frame) => sent.map_err(|_| Error::Cancelled),
        }
    }

    /// Allocate a sequence number for a newly generated outbound frame
    pub fn next_outbound_sequence(&self) -> u64 {
        self.shared.outbound_seq.fetch_add(1, Ordering::SeqCst)
    }

    /// Interrupt everything inbound below `inbound` and all outbound work so far
    pub fn raise_barge_in(&self, inbound: u64) -> InterruptMark {
        self.shared.raise_interrupt(inbound, InterruptReason::BargeIn)
    }

    /// Record the inbound frame whose turn the generator is now answering
    pub fn begin_turn(&self, inbound_sequence: u64) {
        self.shared
            .turn_origin
            .store(inbound_sequence, Ordering::SeqCst);
    }

    pub fn assistant(&self) -> &AssistantActivity {
        &self.shared.assistant
    }

    pub fn interrupt_mark(&self) -> InterruptMark {
        self.shared.mark()
    }

    pub fn deadline(&self) -> Duration {
        self.shared.config.capability_deadline
    }

    pub fn is_cancelled(&self) -> bool {
        self.shared.cancel.is_cancelled()
    }

    /// Run one external call under the capability deadline
    ///
    /// Elapsed deadlines surface as [`Error::CapabilityTimeout`]. A
    /// successful call resets this stage's consecutive failure count.
    pub async fn call<T, F>(&self, capability: Capability, work: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let started = Instant::now();
        let result = tokio::select! {
            biased;
            _ = self.shared.cancel.cancelled() => return Err(Error::Cancelled),
            outcome = tokio::time::timeout(self.deadline(), work) => match outcome {
                Ok(result) => result,
                Err(_) => Err(Error::CapabilityTimeout {
                    capability,
                    elapsed_ms: started.elapsed().as_millis() as u64,
                }),
            },
        };

        metrics::histogram!(
            "parley_capability_latency_seconds",
            "capability" => capability.as_str()
        )
        .record(started.elapsed().as_secs_f64());

        if result.is_ok() {
            self.failures.store(0, Ordering::SeqCst);
        }
        result
    }

    /// Next item of a capability stream, each item under its own deadline
    pub async fn next_within<S, T>(&self, capability: Capability, stream: &mut S) -> Result<Option<T>>
    where
        S: Stream<Item = Result<T>> + Unpin,
    {
        self.call(capability, async { stream.next().await.transpose() })
            .await
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.failures.load(Ordering::SeqCst)
    }

    fn set_source(&self, source: Option<SourceFrame>) {
        *self.source.lock() = source;
    }

    fn is_source_stale(&self) -> bool {
        let Some(source) = *self.source.lock() else {
            return false;
        };
        source.turn_scoped && self.shared.mark().covers(source.direction, source.sequence)
    }

    fn discard(&self, frame: &Frame) {
        metrics::counter!("parley_frames_dropped_total", "stage" => self.stage).increment(1);
        tracing::trace!(
            stage = self.stage,
            kind = frame.kind(),
            sequence = frame.sequence(),
            "Dropped stale frame"
        );
    }
}

/// Per-direction ordering check at a stage input
#[derive(Debug, Default)]
struct SequenceTracker {
    inbound: u64,
    outbound: u64,
}

impl SequenceTracker {
    fn observe(&mut self, stage: &'static str, frame: &Frame) -> Result<()> {
        let last_seen = match frame.direction() {
            Direction::Inbound => &mut self.inbound,
            Direction::Outbound => &mut self.outbound,
        };
        if frame.sequence() < *last_seen {
            return Err(Error::SequenceViolation {
                stage,
                sequence: frame.sequence(),
                last_seen: *last_seen,
            });
        }
        *last_seen = frame.sequence();
        Ok(())
    }
}

enum Outcome {
    Done(Result<()>),
    Abandoned,
    Cancelled,
}

/// `interrupts` is subscribed before the task starts, so a mark raised
/// before its first poll still reaches `on_interrupt`.
async fn run_stage(
    mut stage: Stage,
    mut input: mpsc::Receiver<Frame>,
    mut interrupts: watch::Receiver<InterruptMark>,
    ctx: StageContext,
) {
    let name = stage.name();
    let mut mark = *interrupts.borrow();
    let mut order = SequenceTracker::default();

    tracing::debug!(stage = name, "Stage started");

    loop {
        let frame = tokio::select! {
            biased;
            _ = ctx.shared.cancel.cancelled() => break,
            changed = interrupts.changed() => {
                if changed.is_err() {
                    break;
                }
                mark = *interrupts.borrow_and_update();
                stage.on_interrupt(&mark, &ctx).await;
                continue;
            }
            frame = input.recv() => match frame {
                Some(frame) => frame,
                None => break,
            },
        };

        if mark.is_stale(&frame) {
            ctx.discard(&frame);
            continue;
        }

        if let Err(violation) = order.observe(name, &frame) {
            tracing::trace!(stage = name, error = %violation, "Dropped out-of-order frame");
            continue;
        }

        let source = SourceFrame {
            direction: frame.direction(),
            sequence: frame.sequence(),
            turn_scoped: frame.is_turn_scoped(),
        };
        ctx.set_source(Some(source));

        let mut interrupted = false;
        let outcome = {
            let work = stage.process(frame, &ctx);
            tokio::pin!(work);
            loop {
                tokio::select! {
                    biased;
                    _ = ctx.shared.cancel.cancelled() => break Outcome::Cancelled,
                    changed = interrupts.changed() => {
                        if changed.is_err() {
                            break Outcome::Cancelled;
                        }
                        mark = *interrupts.borrow_and_update();
                        interrupted = true;
                        if source.turn_scoped && mark.covers(source.direction, source.sequence) {
                            break Outcome::Abandoned;
                        }
                    }
                    result = &mut work => break Outcome::Done(result),
                }
            }
        };

        ctx.set_source(None);
        if interrupted {
            stage.on_interrupt(&mark, &ctx).await;
        }

        match outcome {
            Outcome::Done(Ok(())) => {}
            Outcome::Done(Err(error)) => {
                if !handle_stage_error(name, error, &ctx) {
                    break;
                }
            }
            Outcome::Abandoned => {
                tracing::debug!(
                    stage = name,
                    sequence = source.sequence,
                    "Abandoned in-flight work after interrupt"
                );
            }
            Outcome::Cancelled => break,
        }
    }

    tracing::debug!(stage = name, "Stage stopped");
}

/// Returns whether the stage keeps running
fn handle_stage_error(stage: &'static str, error: Error, ctx: &StageContext) -> bool {
    if error.is_recoverable() {
        let consecutive = ctx.failures.fetch_add(1, Ordering::SeqCst) + 1;
        ctx.shared.record_failure(stage, error, consecutive);
        return !ctx.shared.cancel.is_cancelled();
    }

    match error {
        Error::SequenceViolation { .. } => {
            tracing::trace!(stage, error = %error, "Dropped out-of-order frame");
            true
        }
        Error::Transport(message) => {
            tracing::error!(stage, error = %message, "Outbound transport failed");
            ctx.shared
                .emit_event(EngineEvent::TransportClosed(message));
            ctx.shared.shutdown();
            false
        }
        Error::Configuration(message) => {
            tracing::error!(stage, error = %message, "Stage misconfigured");
            ctx.shared.shutdown();
            false
        }
        _ => false,
    }
}

/// Handle to a running pipeline
pub struct PipelineEngine {
    shared: Arc<EngineShared>,
    input: tokio::sync::Mutex<mpsc::Sender<Frame>>,
    closed: watch::Receiver<bool>,
}

impl PipelineEngine {
    /// Start one task per stage, in order
    pub fn spawn(stages: Vec<Stage>, config: EngineConfig) -> Self {
        let capacity = config.queue_capacity.max(1);
        let (events, _) = broadcast::channel(64);
        let (interrupts, _) = watch::channel(InterruptMark::default());

        let shared = Arc::new(EngineShared {
            cancel: CancelToken::new(),
            interrupts,
            inbound_seq: AtomicU64::new(1),
            outbound_seq: AtomicU64::new(1),
            turn_origin: AtomicU64::new(0),
            config,
            events,
            assistant: AssistantActivity::default(),
        });

        let (input_tx, first_rx) = mpsc::channel(capacity);
        let mut upstream = first_rx;
        let mut handles: Vec<JoinHandle<()>> = Vec::with_capacity(stages.len());
        let mut stages = stages.into_iter().peekable();

        while let Some(stage) = stages.next() {
            let (downstream_tx, downstream_rx) = if stages.peek().is_some() {
                let (tx, rx) = mpsc::channel(capacity);
                (Some(tx), Some(rx))
            } else {
                (None, None)
            };

            let ctx = StageContext::new(shared.clone(), stage.name(), downstream_tx);
            let interrupts = shared.interrupts.subscribe();
            handles.push(tokio::spawn(run_stage(stage, upstream, interrupts, ctx)));

            match downstream_rx {
                Some(rx) => upstream = rx,
                None => break,
            }
        }

        let (closed_tx, closed) = watch::channel(false);
        tokio::spawn(async move {
            for handle in handles {
                if let Err(e) = handle.await {
                    tracing::error!(error = %e, "Stage task failed");
                }
            }
            closed_tx.send_replace(true);
        });

        Self {
            shared,
            input: tokio::sync::Mutex::new(input_tx),
            closed,
        }
    }

    /// Feed one inbound frame into the first stage
    ///
    /// Sequence numbers are stamped here. `Cancel` stops the pipeline and
    /// `Interrupt` is raised out of band instead of being queued.
    pub async fn submit(&self, payload: impl Into<FramePayload>) -> Result<()> {
        if self.shared.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let payload = payload.into();
        match &payload {
            FramePayload::Control(ControlSignal::Cancel) => {
                self.cancel();
                return Ok(());
            }
            FramePayload::Control(ControlSignal::Interrupt(_)) => {
                self.interrupt();
                return Ok(());
            }
            _ => {}
        }

        // Allocation and enqueue happen under one lock so numbering matches queue order
        let input = self.input.lock().await;
        let sequence = self.shared.inbound_seq.fetch_add(1, Ordering::SeqCst);
        let frame = Frame::inbound(sequence, payload);

        tokio::select! {
            biased;
            _ = self.shared.cancel.cancelled() => Err(Error::Cancelled),
            sent = input.send(frame) => sent.map_err(|_| Error::Cancelled),
        }
    }

    /// Barge in: discard everything submitted and generated so far
    pub fn interrupt(&self) -> InterruptMark {
        let inbound = self.shared.inbound_seq.load(Ordering::SeqCst);
        self.shared
            .raise_interrupt(inbound, InterruptReason::BargeIn)
    }

    /// Cancel every stage; returns `true` for the call that cancelled
    pub fn cancel(&self) -> bool {
        self.shared.shutdown()
    }

    pub fn is_cancelled(&self) -> bool {
        self.shared.cancel.is_cancelled()
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.shared.cancel.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.shared.events.subscribe()
    }

    pub fn interrupt_mark(&self) -> InterruptMark {
        self.shared.mark()
    }

    pub fn assistant_active(&self) -> bool {
        self.shared.assistant.is_active()
    }

    /// Resolves once every stage task has exited
    pub async fn closed(&self) {
        let mut closed = self.closed.clone();
        loop {
            if *closed.borrow_and_update() {
                return;
            }
            if closed.changed().await.is_err() {
                return;
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }
}

impl Drop for PipelineEngine {
    fn drop(&mut self) {
        self.shared.shutdown();
    }
}
