//! Ordered credential fallback for one logical upstream.
//!
//! [`ProviderFallbackClient`] tries each provider in priority order. A
//! whole-response call wraps every provider in [`RetryPolicy::upstream`]
//! before moving on; when every provider fails the caller gets
//! [`AssistantError::AllUpstreamFailed`] with a fixed user-facing message.
//!
//! # Streaming policy
//!
//! A streamed call falls back only while nothing has been yielded. Once a
//! provider has produced a delta, a later failure ends the stream with
//! [`AssistantError::Stream`] instead of restarting the prompt on the next
//! credential, so the client never sees duplicated text.

use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Instant;

use futures_util::{Stream, StreamExt};

use super::message::Message;
use super::provider::{ChatProvider, UpstreamError};
use crate::error::{AssistantError, Result};
use crate::retry::RetryPolicy;

/// A stream of text deltas after fallback handling.
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Tracks failures across credentials for the final error.
#[derive(Debug, Default)]
struct Attempts {
    tried: Vec<String>,
    all_rate_limited: bool,
    last: Option<UpstreamError>,
}

impl Attempts {
    fn new() -> Self {
        Self {
            all_rate_limited: true,
            ..Self::default()
        }
    }

    fn record(&mut self, index: usize, total: usize, label: &str, error: UpstreamError) {
        if error.is_rate_limited() {
            tracing::warn!(attempt = index + 1, total, credential = label, "credential rate limited");
        } else {
            self.all_rate_limited = false;
            let brief: String = error.message.chars().take(100).collect();
            tracing::warn!(attempt = index + 1, total, credential = label, error = %brief, "credential failed");
        }
        self.tried.push(label.to_owned());
        self.last = Some(error);
    }

    fn into_error(self) -> AssistantError {
        tracing::error!(
            tried = %self.tried.join(", "),
            rate_limited = self.all_rate_limited,
            "all upstream credentials failed"
        );
        AssistantError::AllUpstreamFailed {
            rate_limited: self.all_rate_limited && self.last.is_some(),
            source: self.last,
        }
    }
}

/// Tries an ordered list of providers until one succeeds.
pub struct ProviderFallbackClient {
    providers: Vec<Arc<dyn ChatProvider>>,
    retry: RetryPolicy,
    fallback_count: Arc<AtomicU32>,
}

impl std::fmt::Debug for ProviderFallbackClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let labels: Vec<String> = self.providers.iter().map(|p| p.label()).collect();
        f.debug_struct("ProviderFallbackClient")
            .field("providers", &labels)
            .field("retry", &self.retry)
            .field("fallback_count", &self.fallback_count())
            .finish()
    }
}

impl ProviderFallbackClient {
    /// Create a client over `providers` in priority order.
    ///
    /// # Errors
    /// Returns [`AssistantError::Config`] when `providers` is empty.
    pub fn new(providers: Vec<Arc<dyn ChatProvider>>) -> Result<Self> {
        if providers.is_empty() {
            return Err(AssistantError::Config(
                "at least one upstream credential is required".into(),
            ));
        }
        tracing::info!(credentials = providers.len(), "upstream client ready (primary-first fallback)");
        Ok(Self {
            providers,
            retry: RetryPolicy::upstream(),
            fallback_count: Arc::new(AtomicU32::new(0)),
        })
    }

    /// Override the per-credential retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Number of times a call moved on to a later credential.
    pub fn fallback_count(&self) -> u32 {
        self.fallback_count.load(Ordering::Relaxed)
    }

    /// Request a whole response, falling back across credentials.
    pub async fn invoke(&self, messages: &[Message]) -> Result<String> {
        let total = self.providers.len();
        let mut attempts = Attempts::new();

        for (i, provider) in self.providers.iter().enumerate() {
            let label = provider.label();
            tracing::info!(attempt = i + 1, total, credential = %label, "calling upstream");
            let started = Instant::now();

            match self.retry.run(|| provider.complete(messages)).await {
                Ok(text) => {
                    tracing::info!(
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        chars = text.len(),
                        "upstream_call"
                    );
                    if i > 0 {
                        tracing::info!(attempt = i + 1, total, credential = %label, "fallback successful");
                    }
                    return Ok(text);
                }
                Err(e) => {
                    attempts.record(i, total, &label, e);
                    if i + 1 < total {
                        self.fallback_count.fetch_add(1, Ordering::Relaxed);
                        tracing::info!("falling back to next credential");
                    }
                }
            }
        }

        Err(attempts.into_error())
    }

    /// Request an incremental response.
    ///
    /// The returned stream is lazy: no request is sent until it is polled.
    /// It ends after the last delta on success, or with exactly one `Err`.
    pub fn stream(&self, messages: Vec<Message>) -> TextStream {
        let providers = self.providers.clone();
        let fallback_count = Arc::clone(&self.fallback_count);

        Box::pin(async_stream::stream! {
            let total = providers.len();
            let mut attempts = Attempts::new();
            let mut finished = false;

            for (i, provider) in providers.iter().enumerate() {
                let label = provider.label();
                tracing::info!(attempt = i + 1, total, credential = %label, "streaming from upstream");
                let started = Instant::now();

                let mut upstream = match provider.stream(&messages).await {
                    Ok(s) => s,
                    Err(e) => {
                        attempts.record(i, total, &label, e);
                        if i + 1 < total {
                            fallback_count.fetch_add(1, Ordering::Relaxed);
                            tracing::info!("falling back to next credential for stream");
                        }
                        continue;
                    }
                };

                let mut yielded = 0usize;
                let mut failure = None;
                while let Some(item) = upstream.next().await {
                    match item {
                        Ok(delta) if delta.is_empty() => {}
                        Ok(delta) => {
                            if yielded == 0 {
                                tracing::info!(elapsed_ms = started.elapsed().as_millis() as u64, "first_delta");
                            }
                            yielded += 1;
                            yield Ok(delta);
                        }
                        Err(e) => {
                            failure = Some(e);
                            break;
                        }
                    }
                }

                match failure {
                    None => {
                        tracing::info!(
                            elapsed_ms = started.elapsed().as_millis() as u64,
                            deltas = yielded,
                            "stream_total"
                        );
                        if i > 0 && yielded > 0 {
                            tracing::info!(attempt = i + 1, total, credential = %label, "fallback successful");
                        }
                        finished = true;
                        break;
                    }
                    Some(e) if yielded > 0 => {
                        tracing::warn!(
                            credential = %label,
                            deltas = yielded,
                            error = %e,
                            "upstream stream failed after output; not falling back"
                        );
                        yield Err(AssistantError::Stream(format!(
                            "response interrupted after {yielded} chunks: {}",
                            e.message
                        )));
                        finished = true;
                        break;
                    }
                    Some(e) => {
                        attempts.record(i, total, &label, e);
                        if i + 1 < total {
                            fallback_count.fetch_add(1, Ordering::Relaxed);
                            tracing::info!("falling back to next credential for stream");
                        }
                    }
                }
            }

            if !finished {
                yield Err(attempts.into_error());
            }
        })
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::llm::provider::DeltaStream;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Scripted provider: each call pops the next outcome.
    enum Outcome {
        Text(&'static str),
        Fail(UpstreamError),
        Stream(Vec<std::result::Result<&'static str, UpstreamError>>),
    }

    struct ScriptedProvider {
        name: &'static str,
        script: Mutex<Vec<Outcome>>,
        calls: AtomicU32,
    }

    impl ScriptedProvider {
        fn new(name: &'static str, script: Vec<Outcome>) -> Arc<Self> {
            Arc::new(Self {
                name,
                script: Mutex::new(script),
                calls: AtomicU32::new(0),
            })
        }

        fn next(&self) -> Outcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut script = self.script.lock().unwrap();
            if script.is_empty() {
                Outcome::Fail(UpstreamError::other("script exhausted"))
            } else {
                script.remove(0)
            }
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ChatProvider for ScriptedProvider {
        fn label(&self) -> String {
            self.name.to_owned()
        }

        async fn complete(&self, _messages: &[Message]) -> std::result::Result<String, UpstreamError> {
            match self.next() {
                Outcome::Text(t) => Ok(t.to_owned()),
                Outcome::Fail(e) => Err(e),
                Outcome::Stream(_) => Err(UpstreamError::other("unexpected stream outcome")),
            }
        }

        async fn stream(&self, _messages: &[Message]) -> std::result::Result<DeltaStream, UpstreamError> {
            match self.next() {
                Outcome::Stream(items) => {
                    let items: Vec<_> = items.into_iter().map(|r| r.map(String::from)).collect();
                    Ok(Box::pin(futures_util::stream::iter(items)))
                }
                Outcome::Fail(e) => Err(e),
                Outcome::Text(t) => Ok(Box::pin(futures_util::stream::iter(vec![Ok(t.to_owned())]))),
            }
        }
    }

    fn client(providers: &[&Arc<ScriptedProvider>]) -> ProviderFallbackClient {
        let list: Vec<Arc<dyn ChatProvider>> = providers
            .iter()
            .map(|p| Arc::clone(p) as Arc<dyn ChatProvider>)
            .collect();
        ProviderFallbackClient::new(list)
            .unwrap()
            .with_retry(RetryPolicy::new(2, Duration::from_millis(1)))
    }

    async fn collect(stream: TextStream) -> Vec<Result<String>> {
        stream.collect().await
    }

    #[test]
    fn empty_provider_list_is_config_error() {
        let err = ProviderFallbackClient::new(Vec::new()).unwrap_err();
        assert_eq!(err.code(), "CONFIG_INVALID");
    }

    #[tokio::test]
    async fn first_success_returns_immediately() {
        let a = ScriptedProvider::new("a", vec![Outcome::Text("from a")]);
        let b = ScriptedProvider::new("b", vec![Outcome::Text("from b")]);
        let c = client(&[&a, &b]);
        assert_eq!(c.invoke(&[]).await.unwrap(), "from a");
        assert_eq!(b.calls(), 0);
        assert_eq!(c.fallback_count(), 0);
    }

    #[tokio::test]
    async fn retry_within_credential_before_fallback() {
        let a = ScriptedProvider::new(
            "a",
            vec![Outcome::Fail(UpstreamError::other("blip")), Outcome::Text("retried")],
        );
        let b = ScriptedProvider::new("b", vec![]);
        let c = client(&[&a, &b]);
        assert_eq!(c.invoke(&[]).await.unwrap(), "retried");
        assert_eq!(a.calls(), 2);
        assert_eq!(b.calls(), 0);
    }

    #[tokio::test]
    async fn third_credential_succeeds_after_two_fail() {
        let a = ScriptedProvider::new("a", vec![]);
        let b = ScriptedProvider::new("b", vec![]);
        let third = ScriptedProvider::new("c", vec![Outcome::Text("from c")]);
        let c = client(&[&a, &b, &third]);
        assert_eq!(c.invoke(&[]).await.unwrap(), "from c");
        assert_eq!(a.calls(), 2);
        assert_eq!(b.calls(), 2);
        assert_eq!(third.calls(), 1);
        assert_eq!(c.fallback_count(), 2);
    }

    #[tokio::test]
    async fn all_fail_is_distinguished_error() {
        let a = ScriptedProvider::new("a", vec![]);
        let b = ScriptedProvider::new("b", vec![]);
        let err = client(&[&a, &b]).invoke(&[]).await.unwrap_err();
        assert!(matches!(err, AssistantError::AllUpstreamFailed { rate_limited: false, .. }));
        assert_eq!(err.code(), "ALL_UPSTREAM_FAILED");
    }

    #[tokio::test]
    async fn all_rate_limited_flagged() {
        let rl = || Outcome::Fail(UpstreamError::rate_limited("HTTP 429"));
        let a = ScriptedProvider::new("a", vec![rl(), rl()]);
        let b = ScriptedProvider::new("b", vec![rl(), rl()]);
        let err = client(&[&a, &b]).invoke(&[]).await.unwrap_err();
        assert!(err.is_rate_limited());
    }

    #[tokio::test]
    async fn mixed_failures_not_flagged_rate_limited() {
        let a = ScriptedProvider::new(
            "a",
            vec![
                Outcome::Fail(UpstreamError::rate_limited("429")),
                Outcome::Fail(UpstreamError::rate_limited("429")),
            ],
        );
        let b = ScriptedProvider::new("b", vec![]);
        let err = client(&[&a, &b]).invoke(&[]).await.unwrap_err();
        assert!(!err.is_rate_limited());
    }

    #[tokio::test]
    async fn stream_success_yields_all_deltas() {
        let a = ScriptedProvider::new("a", vec![Outcome::Stream(vec![Ok("Hel"), Ok(""), Ok("lo")])]);
        let items = collect(client(&[&a]).stream(vec![])).await;
        let texts: Vec<String> = items.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(texts, vec!["Hel", "lo"]);
    }

    #[tokio::test]
    async fn stream_falls_back_when_open_fails() {
        let a = ScriptedProvider::new("a", vec![Outcome::Fail(UpstreamError::from_status(503, "down"))]);
        let b = ScriptedProvider::new("b", vec![Outcome::Stream(vec![Ok("ok")])]);
        let c = client(&[&a, &b]);
        let items = collect(c.stream(vec![])).await;
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].as_deref().unwrap(), "ok");
        assert_eq!(c.fallback_count(), 1);
    }

    #[tokio::test]
    async fn stream_falls_back_when_failing_before_first_delta() {
        let a = ScriptedProvider::new(
            "a",
            vec![Outcome::Stream(vec![Err(UpstreamError::other("reset"))])],
        );
        let b = ScriptedProvider::new("b", vec![Outcome::Stream(vec![Ok("fine")])]);
        let items = collect(client(&[&a, &b]).stream(vec![])).await;
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].as_deref().unwrap(), "fine");
    }

    #[tokio::test]
    async fn stream_does_not_fall_back_after_partial_output() {
        let a = ScriptedProvider::new(
            "a",
            vec![Outcome::Stream(vec![Ok("Partial "), Err(UpstreamError::other("reset"))])],
        );
        let b = ScriptedProvider::new("b", vec![Outcome::Stream(vec![Ok("duplicate")])]);
        let items = collect(client(&[&a, &b]).stream(vec![])).await;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_deref().unwrap(), "Partial ");
        assert!(matches!(items[1], Err(AssistantError::Stream(_))));
        assert_eq!(b.calls(), 0);
    }

    #[tokio::test]
    async fn stream_all_fail_yields_single_error() {
        let a = ScriptedProvider::new("a", vec![Outcome::Fail(UpstreamError::rate_limited("429"))]);
        let b = ScriptedProvider::new("b", vec![Outcome::Fail(UpstreamError::rate_limited("429"))]);
        let items = collect(client(&[&a, &b]).stream(vec![])).await;
        assert_eq!(items.len(), 1);
        match &items[0] {
            Err(e) => {
                assert_eq!(e.code(), "ALL_UPSTREAM_FAILED");
                assert!(e.is_rate_limited());
            }
            Ok(_) => unreachable!("expected error"),
        }
    }

    #[tokio::test]
    async fn stream_is_lazy() {
        let a = ScriptedProvider::new("a", vec![Outcome::Stream(vec![Ok("x")])]);
        let c = client(&[&a]);
        let stream = c.stream(vec![]);
        assert_eq!(a.calls(), 0);
        drop(stream);
        assert_eq!(a.calls(), 0);
    }
}
