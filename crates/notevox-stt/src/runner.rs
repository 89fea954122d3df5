//! Per-source recognition runner
//!
//! Drives one engine run per source: feeds converted frames, filters
//! low-confidence snippets, restarts the engine transparently on a silence
//! timeout, and emits exactly one final transcript when told to finalize.

use crate::types::{EngineError, EngineEvent, RecognitionConfig, SnippetEvent, TranscriptEvent};
use crate::{EngineFactory, RecognitionStream};
use notevox_foundation::SourceKind;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Input to a runner. Frames and the finalize signal share one channel so
/// per-session ordering is preserved.
#[derive(Debug)]
pub enum RunnerInput {
    Frame(Vec<i16>),
    Finalize,
}

#[derive(Debug, Clone)]
pub enum RunnerEvent {
    Snippet(SnippetEvent),
    Transcript(TranscriptEvent),
    /// Unrecoverable engine failure; the session surfaces it.
    Failed { source: SourceKind, message: String },
}

#[derive(Debug, Clone, Default)]
pub struct RunnerMetrics {
    pub frames_in: u64,
    pub snippets_emitted: u64,
    pub snippets_suppressed: u64,
    pub silence_restarts: u64,
    pub finals_emitted: u64,
}

pub struct RecognitionRunner {
    session_id: u64,
    source: SourceKind,
    input_rx: mpsc::Receiver<RunnerInput>,
    event_tx: mpsc::Sender<RunnerEvent>,
    engine: Box<dyn RecognitionStream>,
    factory: EngineFactory,
    config: RecognitionConfig,
    /// Finalized text carried across silence restarts and engine-internal
    /// segment finals.
    carried: String,
    /// Latest snippet text from the current engine run.
    live: String,
    last_confidence: f32,
    sequence: u64,
    started_at: Instant,
    metrics: Arc<RwLock<RunnerMetrics>>,
}

impl RecognitionRunner {
    pub fn new(
        session_id: u64,
        source: SourceKind,
        factory: EngineFactory,
        config: RecognitionConfig,
        input_rx: mpsc::Receiver<RunnerInput>,
        event_tx: mpsc::Sender<RunnerEvent>,
    ) -> Result<Self, EngineError> {
        let engine = factory(source)?;
        Ok(Self {
            session_id,
            source,
            input_rx,
            event_tx,
            engine,
            factory,
            config,
            carried: String::new(),
            live: String::new(),
            last_confidence: 0.0,
            sequence: 0,
            started_at: Instant::now(),
            metrics: Arc::new(RwLock::new(RunnerMetrics::default())),
        })
    }

    pub fn metrics_handle(&self) -> Arc<RwLock<RunnerMetrics>> {
        self.metrics.clone()
    }

    pub async fn run(mut self) {
        info!(target: "stt", "{} runner started (session {})", self.source, self.session_id);
        while let Some(input) = self.input_rx.recv().await {
            match input {
                RunnerInput::Frame(pcm) => self.handle_frame(&pcm).await,
                RunnerInput::Finalize => {
                    self.handle_finalize().await;
                    break;
                }
            }
        }

        let metrics = self.metrics.read();
        info!(
            target: "stt",
            "{} runner done - frames: {}, snippets: {} ({} suppressed), restarts: {}, finals: {}",
            self.source,
            metrics.frames_in,
            metrics.snippets_emitted,
            metrics.snippets_suppressed,
            metrics.silence_restarts,
            metrics.finals_emitted
        );
    }

    async fn handle_frame(&mut self, pcm: &[i16]) {
        self.metrics.write().frames_in += 1;

        match self.engine.accept_frame(pcm) {
            Ok(Some(EngineEvent::Snippet { text, confidence })) => {
                if confidence < self.config.confidence_threshold {
                    self.metrics.write().snippets_suppressed += 1;
                    debug!(
                        target: "stt",
                        "{}: suppressed snippet at confidence {:.2}", self.source, confidence
                    );
                    return;
                }
                self.live = text;
                self.last_confidence = confidence;
                self.sequence += 1;
                self.metrics.write().snippets_emitted += 1;
                let event = SnippetEvent {
                    session_id: self.session_id,
                    source: self.source,
                    text: self.merged_text(),
                    confidence,
                    sequence: self.sequence,
                };
                self.send(RunnerEvent::Snippet(event)).await;
            }
            Ok(Some(EngineEvent::Final { text, confidence })) => {
                // The engine closed a segment on its own; fold it into the
                // carry and keep the run going without surfacing a final.
                self.carried = join_text(&self.carried, &text);
                self.live.clear();
                self.last_confidence = confidence;
            }
            Ok(None) => {}
            Err(EngineError::SilenceTimeout) => self.restart_after_silence(),
            Err(EngineError::Fatal(message)) => {
                error!(target: "stt", "{} engine failed: {}", self.source, message);
                self.send(RunnerEvent::Failed {
                    source: self.source,
                    message,
                })
                .await;
            }
        }
    }

    /// Replace the engine and carry the accumulated text forward. Invisible
    /// to the caller: no final is emitted and later snippets extend the
    /// carried text.
    fn restart_after_silence(&mut self) {
        self.metrics.write().silence_restarts += 1;
        self.carried = join_text(&self.carried, &self.live);
        self.live.clear();
        info!(
            target: "stt",
            "{}: silence timeout, restarting engine run (carrying {} chars)",
            self.source,
            self.carried.len()
        );
        match (self.factory)(self.source) {
            Ok(engine) => self.engine = engine,
            Err(e) => {
                error!(target: "stt", "{}: engine restart failed: {}", self.source, e);
            }
        }
    }

    async fn handle_finalize(&mut self) {
        let final_text = match self.engine.finalize() {
            Ok(Some(EngineEvent::Final { text, confidence })) => {
                self.last_confidence = confidence;
                text
            }
            Ok(Some(EngineEvent::Snippet { text, .. })) => text,
            Ok(None) => std::mem::take(&mut self.live),
            Err(e) => {
                // Do not block the stop path on a dying engine; fall back to
                // the interim text already accumulated.
                warn!(target: "stt", "{}: finalize failed ({}), using interim text", self.source, e);
                std::mem::take(&mut self.live)
            }
        };

        let text = join_text(&self.carried, &final_text);
        let event = TranscriptEvent {
            session_id: self.session_id,
            source: self.source,
            word_count: text.split_whitespace().count(),
            text,
            confidence: self.last_confidence,
            is_final: true,
            duration_ms: self.started_at.elapsed().as_millis() as u64,
        };
        self.metrics.write().finals_emitted += 1;
        self.send(RunnerEvent::Transcript(event)).await;
    }

    fn merged_text(&self) -> String {
        join_text(&self.carried, &self.live)
    }

    async fn send(&self, event: RunnerEvent) {
        // Bounded wait so a stalled consumer can never wedge the runner.
        match tokio::time::timeout(
            std::time::Duration::from_secs(5),
            self.event_tx.send(event),
        )
        .await
        {
            Ok(Ok(())) => {}
            Ok(Err(_)) => debug!(target: "stt", "{}: event channel closed", self.source),
            Err(_) => warn!(target: "stt", "{}: event send timed out, consumer too slow", self.source),
        }
    }
}

fn join_text(a: &str, b: &str) -> String {
    match (a.is_empty(), b.is_empty()) {
        (true, _) => b.to_string(),
        (_, true) => a.to_string(),
        _ => format!("{a} {b}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_text_skips_empty_sides() {
        assert_eq!(join_text("", "bar"), "bar");
        assert_eq!(join_text("foo", ""), "foo");
        assert_eq!(join_text("foo", "bar"), "foo bar");
        assert_eq!(join_text("", ""), "");
    }
}
