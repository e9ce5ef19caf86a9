//! Ordered, bounded-concurrency speech synthesis.
//!
//! A [`SpeechPool`] is created once per process and owns the shared worker
//! permits. Each response stream gets its own [`SpeechDispatcher`] which
//! submits sentences as background jobs and hands the audio back strictly
//! in submission order, no matter which job finishes first.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::FutureExt;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

use super::synth::{SpeechSynthesizer, Voice};
use crate::error::{AssistantError, Result};

/// Synthesized audio for one sentence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioEvent {
    pub audio: Bytes,
    pub sentence: String,
}

/// Process-wide synthesis pool shared by all dispatchers.
#[derive(Clone)]
pub struct SpeechPool {
    permits: Arc<Semaphore>,
    synth: Arc<dyn SpeechSynthesizer>,
    voice: Voice,
}

impl std::fmt::Debug for SpeechPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpeechPool")
            .field("available_permits", &self.permits.available_permits())
            .field("voice", &self.voice)
            .finish()
    }
}

impl SpeechPool {
    /// Create a pool running at most `workers` syntheses at once.
    pub fn new(synth: Arc<dyn SpeechSynthesizer>, voice: Voice, workers: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(workers.max(1))),
            synth,
            voice,
        }
    }

    pub fn voice(&self) -> &Voice {
        &self.voice
    }

    /// A fresh dispatcher for one response stream.
    pub fn dispatcher(&self) -> SpeechDispatcher {
        SpeechDispatcher {
            pool: self.clone(),
            jobs: VecDeque::new(),
            next_order: 0,
        }
    }
}

struct AudioJob {
    order: u64,
    sentence: String,
    handle: JoinHandle<Result<Bytes>>,
}

/// Per-stream ordered queue of synthesis jobs.
///
/// Dropping the dispatcher aborts every outstanding job.
pub struct SpeechDispatcher {
    pool: SpeechPool,
    jobs: VecDeque<AudioJob>,
    next_order: u64,
}

impl std::fmt::Debug for SpeechDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpeechDispatcher")
            .field("pending", &self.jobs.len())
            .field("next_order", &self.next_order)
            .finish()
    }
}

impl SpeechDispatcher {
    /// Number of jobs not yet drained.
    pub fn pending(&self) -> usize {
        self.jobs.len()
    }

    /// Queue a sentence for synthesis. Blank text is ignored.
    pub fn submit(&mut self, sentence: &str) {
        let sentence = sentence.trim();
        if sentence.is_empty() {
            return;
        }

        let permits = Arc::clone(&self.pool.permits);
        let synth = Arc::clone(&self.pool.synth);
        let voice = self.pool.voice.clone();
        let text = sentence.to_owned();
        let handle = tokio::spawn(async move {
            let _permit = permits
                .acquire_owned()
                .await
                .map_err(|_| AssistantError::Speech("speech pool closed".to_owned()))?;
            let audio = synth.synthesize(&text, &voice).await?;
            if audio.is_empty() {
                return Err(AssistantError::Speech("empty audio".to_owned()));
            }
            Ok(audio)
        });

        let order = self.next_order;
        self.next_order += 1;
        tracing::debug!(order, chars = sentence.len(), "speech job submitted");
        self.jobs.push_back(AudioJob {
            order,
            sentence: sentence.to_owned(),
            handle,
        });
    }

    /// Collect finished jobs from the front of the queue without waiting.
    ///
    /// Stops at the first unfinished job so output order always matches
    /// submission order. Failed jobs are skipped.
    pub fn drain_ready(&mut self) -> Vec<AudioEvent> {
        let mut ready = Vec::new();
        while let Some(mut job) = self.jobs.pop_front() {
            if !job.handle.is_finished() {
                self.jobs.push_front(job);
                break;
            }
            match (&mut job.handle).now_or_never() {
                Some(joined) => {
                    if let Some(event) = Self::complete(job.order, job.sentence, joined) {
                        ready.push(event);
                    }
                }
                None => {
                    self.jobs.push_front(job);
                    break;
                }
            }
        }
        ready
    }

    /// Wait for every outstanding job in order.
    ///
    /// Each job gets up to `per_job` to finish; a job that times out is
    /// aborted and skipped.
    pub async fn drain_all(&mut self, per_job: Duration) -> Vec<AudioEvent> {
        let mut ready = Vec::with_capacity(self.jobs.len());
        while let Some(mut job) = self.jobs.pop_front() {
            match tokio::time::timeout(per_job, &mut job.handle).await {
                Ok(joined) => {
                    if let Some(event) = Self::complete(job.order, job.sentence, joined) {
                        ready.push(event);
                    }
                }
                Err(_) => {
                    tracing::warn!(order = job.order, "speech job timed out, skipping");
                    job.handle.abort();
                }
            }
        }
        ready
    }

    /// Abort every outstanding job.
    pub fn cancel_all(&mut self) {
        let count = self.jobs.len();
        for job in self.jobs.drain(..) {
            job.handle.abort();
        }
        if count > 0 {
            tracing::debug!(count, "speech jobs cancelled");
        }
    }

    fn complete(
        order: u64,
        sentence: String,
        joined: std::result::Result<Result<Bytes>, tokio::task::JoinError>,
    ) -> Option<AudioEvent> {
        match joined {
            Ok(Ok(audio)) => Some(AudioEvent { audio, sentence }),
            Ok(Err(e)) => {
                tracing::warn!(order, error = %e, "speech synthesis failed, skipping sentence");
                None
            }
            Err(e) => {
                tracing::warn!(order, error = %e, "speech job did not complete");
                None
            }
        }
    }
}

impl Drop for SpeechDispatcher {
    fn drop(&mut self) {
        self.cancel_all();
    }
}
