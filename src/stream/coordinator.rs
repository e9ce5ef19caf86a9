//! Per-request streaming coordinator.
//!
//! Turns a [`ChatStream`] into client [`StreamEvent`]s. Text is forwarded
//! the moment it arrives; when speech is requested each delta also feeds a
//! [`SentenceSegmenter`] whose sentences go to a [`SpeechDispatcher`], and
//! finished audio is interleaved in sentence order.
//!
//! ```text
//! STARTED → STREAMING → FLUSHING → DONE
//!               └──────→ ERRORED → DONE
//! ```
//!
//! Audio for a sentence is always emitted after the text that completed it.
//! Dropping the event stream drops the dispatcher, which aborts any
//! outstanding synthesis.

use std::pin::Pin;
use std::time::Duration;

use futures_util::{Stream, StreamExt};

use super::event::StreamEvent;
use crate::chat::{ChatChunk, ChatStream};
use crate::speech::{SentenceSegmenter, SpeechDispatcher, SpeechPool};

/// Client event stream. Always ends with exactly one terminal event.
pub type EventStream = Pin<Box<dyn Stream<Item = StreamEvent> + Send>>;

/// Coordinator lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Started,
    Streaming,
    Flushing,
    Errored,
    Done,
}

/// Builds event streams; one instance is shared by all requests.
#[derive(Debug, Clone)]
pub struct StreamCoordinator {
    speech: Option<SpeechPool>,
    drain_timeout: Duration,
}

struct SpeechState {
    segmenter: SentenceSegmenter,
    dispatcher: SpeechDispatcher,
}

impl StreamCoordinator {
    /// `speech` is `None` when synthesis is disabled; requests asking for
    /// audio then get text only.
    pub fn new(speech: Option<SpeechPool>, drain_timeout: Duration) -> Self {
        Self {
            speech,
            drain_timeout,
        }
    }

    pub fn speech_enabled(&self) -> bool {
        self.speech.is_some()
    }

    /// Drive `upstream` and produce client events.
    pub fn run(&self, session_id: String, upstream: ChatStream, tts: bool) -> EventStream {
        let pool = if tts { self.speech.clone() } else { None };
        let drain_timeout = self.drain_timeout;

        Box::pin(async_stream::stream! {
            let mut state = StreamState::Started;
            yield StreamEvent::Open { session_id: session_id.clone() };

            let mut speech = pool.map(|p| SpeechState {
                segmenter: SentenceSegmenter::new(),
                dispatcher: p.dispatcher(),
            });
            let mut upstream = upstream;
            let mut failure = None;

            transition(&mut state, StreamState::Streaming);
            while let Some(item) = upstream.next().await {
                match item {
                    Ok(ChatChunk::Search(payload)) => {
                        yield StreamEvent::SearchResults(payload);
                    }
                    Ok(ChatChunk::Delta(text)) => {
                        yield StreamEvent::Text(text.clone());
                        if let Some(s) = speech.as_mut() {
                            for audio in s.dispatcher.drain_ready() {
                                yield StreamEvent::from(audio);
                            }
                            for sentence in s.segmenter.feed(&text) {
                                s.dispatcher.submit(&sentence);
                            }
                        }
                    }
                    Err(e) => {
                        failure = Some(e);
                        break;
                    }
                }
            }

            match failure {
                Some(e) => {
                    transition(&mut state, StreamState::Errored);
                    if let Some(s) = speech.as_mut() {
                        s.dispatcher.cancel_all();
                    }
                    tracing::error!(code = e.code(), error = %e, "stream failed");
                    transition(&mut state, StreamState::Done);
                    yield StreamEvent::Error { message: e.message() };
                }
                None => {
                    transition(&mut state, StreamState::Flushing);
                    if let Some(s) = speech.as_mut() {
                        for sentence in s.segmenter.flush() {
                            s.dispatcher.submit(&sentence);
                        }
                        for audio in s.dispatcher.drain_all(drain_timeout).await {
                            yield StreamEvent::from(audio);
                        }
                    }
                    transition(&mut state, StreamState::Done);
                    yield StreamEvent::Done { session_id };
                }
            }
        })
    }
}

fn transition(state: &mut StreamState, next: StreamState) {
    tracing::debug!(from = ?*state, to = ?next, "stream state");
    *state = next;
}
