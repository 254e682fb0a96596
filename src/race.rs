//! Async race multiplexer
//!
//! Drains any number of independent item streams concurrently and yields
//! each item the moment its source produces it, tagged with the index of the
//! source. Sources are polled from the caller's task through a
//! `FuturesUnordered`, so nothing is spawned and a slow source never blocks
//! a fast one.

use futures::future::BoxFuture;
use futures::stream::{self, BoxStream, FuturesUnordered, Stream, StreamExt};
use futures::FutureExt;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// What to do when a source yields an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorPolicy {
    /// Drop the failing source and keep draining the others
    Continue,
    /// Stop everything and hand the error to the caller
    Throw,
}

/// An item together with the index of the source that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Raced<T> {
    /// Position of the source in the list given to [`RaceMultiplexer::new`]
    pub source_index: usize,
    /// The produced item
    pub item: T,
}

type CancelHook = Box<dyn FnOnce() -> anyhow::Result<()> + Send>;

/// One input of the multiplexer.
pub struct RaceSource<T, E> {
    stream: BoxStream<'static, Result<T, E>>,
    cancel_hook: Option<CancelHook>,
}

impl<T, E> RaceSource<T, E> {
    /// Wrap a stream as a race source.
    #[must_use]
    pub fn new(stream: BoxStream<'static, Result<T, E>>) -> Self {
        Self {
            stream,
            cancel_hook: None,
        }
    }

    /// Attach a hook invoked when the race is cancelled while this source is
    /// still live. Errors from the hook are logged and ignored.
    #[must_use]
    pub fn with_cancel_hook<H>(mut self, hook: H) -> Self
    where
        H: FnOnce() -> anyhow::Result<()> + Send + 'static,
    {
        self.cancel_hook = Some(Box::new(hook));
        self
    }
}

type Pull<T, E> = BoxFuture<'static, (usize, Option<Result<T, E>>, BoxStream<'static, Result<T, E>>)>;

fn pull<T, E>(index: usize, stream: BoxStream<'static, Result<T, E>>) -> Pull<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    stream
        .into_future()
        .map(move |(item, rest)| (index, item, rest))
        .boxed()
}

/// Fan-in scheduler over independent fallible sources.
pub struct RaceMultiplexer<T, E, F> {
    in_flight: FuturesUnordered<Pull<T, E>>,
    cancel_hooks: Vec<Option<CancelHook>>,
    cancel: CancellationToken,
    on_error: F,
    finished: bool,
}

impl<T, E, F> RaceMultiplexer<T, E, F>
where
    T: Send + 'static,
    E: Send + 'static,
    F: FnMut(usize, &E) -> ErrorPolicy,
{
    /// Start pulling from every source at once.
    pub fn new(sources: Vec<RaceSource<T, E>>, cancel: CancellationToken, on_error: F) -> Self {
        let in_flight = FuturesUnordered::new();
        let mut cancel_hooks = Vec::with_capacity(sources.len());
        for (index, source) in sources.into_iter().enumerate() {
            cancel_hooks.push(source.cancel_hook);
            in_flight.push(pull(index, source.stream));
        }

        Self {
            in_flight,
            cancel_hooks,
            cancel,
            on_error,
            finished: false,
        }
    }

    /// Number of sources that are still being pulled.
    #[must_use]
    pub fn live_sources(&self) -> usize {
        self.in_flight.len()
    }

    /// Wait for the next item from whichever source is ready first.
    ///
    /// Returns `None` once every source is exhausted, after cancellation,
    /// or after an error was thrown. Cancel-safe: dropping the returned
    /// future loses nothing.
    pub async fn next(&mut self) -> Option<Result<Raced<T>, E>> {
        loop {
            if self.finished {
                return None;
            }
            if self.cancel.is_cancelled() {
                self.shutdown();
                return None;
            }
            if self.in_flight.is_empty() {
                self.finished = true;
                return None;
            }

            let pulled = tokio::select! {
                biased;
                () = self.cancel.cancelled() => None,
                pulled = self.in_flight.next() => pulled,
            };
            let Some((index, item, rest)) = pulled else {
                continue;
            };
            if self.cancel.is_cancelled() {
                self.shutdown();
                return None;
            }

            match item {
                Some(Ok(item)) => {
                    self.in_flight.push(pull(index, rest));
                    return Some(Ok(Raced {
                        source_index: index,
                        item,
                    }));
                }
                Some(Err(error)) => match (self.on_error)(index, &error) {
                    ErrorPolicy::Continue => {
                        debug!(source_index = index, "race source failed, dropping it");
                        self.cancel_hooks[index] = None;
                    }
                    ErrorPolicy::Throw => {
                        debug!(source_index = index, "race source failed, aborting race");
                        self.cancel_hooks[index] = None;
                        drop(rest);
                        self.shutdown();
                        return Some(Err(error));
                    }
                },
                None => {
                    self.cancel_hooks[index] = None;
                }
            }
        }
    }

    /// Turn the multiplexer into a `Stream` of raced items.
    pub fn into_stream(self) -> impl Stream<Item = Result<Raced<T>, E>> {
        stream::unfold(self, |mut race| async move {
            race.next().await.map(|item| (item, race))
        })
    }
}

impl<T, E, F> RaceMultiplexer<T, E, F> {
    /// Notify every live source and drop all of them. Safe to call twice.
    pub fn shutdown(&mut self) {
        self.finished = true;
        for (index, hook) in self.cancel_hooks.iter_mut().enumerate() {
            if let Some(hook) = hook.take() {
                if let Err(err) = hook() {
                    debug!(source_index = index, error = %err, "cancel hook failed");
                }
            }
        }
        self.in_flight.clear();
    }
}

impl<T, E, F> Drop for RaceMultiplexer<T, E, F> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::time::{sleep, Instant};

    fn delayed(value: usize, millis: u64) -> BoxStream<'static, Result<usize, String>> {
        stream::once(async move {
            sleep(Duration::from_millis(millis)).await;
            Ok(value)
        })
        .boxed()
    }

    fn failing(message: &str) -> BoxStream<'static, Result<usize, String>> {
        stream::once(futures::future::ready(Err(message.to_string()))).boxed()
    }

    fn keep_going(_: usize, _: &String) -> ErrorPolicy {
        ErrorPolicy::Continue
    }

    fn throw_all(_: usize, _: &String) -> ErrorPolicy {
        ErrorPolicy::Throw
    }

    fn counting_hook(
        counter: &Arc<AtomicUsize>,
    ) -> impl FnOnce() -> anyhow::Result<()> + Send + 'static {
        let counter = Arc::clone(counter);
        move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    async fn collect_items<F>(race: &mut RaceMultiplexer<usize, String, F>) -> Vec<Raced<usize>>
    where
        F: FnMut(usize, &String) -> ErrorPolicy,
    {
        let mut items = Vec::new();
        while let Some(result) = race.next().await {
            items.push(result.unwrap());
        }
        items
    }

    #[tokio::test(start_paused = true)]
    async fn test_items_arrive_in_completion_order() {
        let sources = vec![
            RaceSource::new(delayed(0, 30)),
            RaceSource::new(delayed(1, 10)),
            RaceSource::new(delayed(2, 20)),
        ];
        let mut race = RaceMultiplexer::new(sources, CancellationToken::new(), keep_going);

        let order: Vec<usize> = collect_items(&mut race)
            .await
            .into_iter()
            .map(|raced| raced.source_index)
            .collect();
        assert_eq!(order, vec![1, 2, 0]);
    }

    #[tokio::test]
    async fn test_zero_sources_yield_nothing() {
        let mut race: RaceMultiplexer<usize, String, _> =
            RaceMultiplexer::new(Vec::new(), CancellationToken::new(), throw_all);
        assert!(race.next().await.is_none());
        assert!(race.next().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_continue_policy_keeps_other_sources_running() {
        let sources = vec![
            RaceSource::new(failing("boom")),
            RaceSource::new(delayed(1, 50)),
            RaceSource::new(delayed(2, 10)),
        ];
        let mut race = RaceMultiplexer::new(sources, CancellationToken::new(), keep_going);

        let items = collect_items(&mut race).await;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].item, 2);
        assert_eq!(items[1].item, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_throw_policy_surfaces_error_and_cancels_the_rest() {
        let hooks = Arc::new(AtomicUsize::new(0));
        let sources = vec![
            RaceSource::new(delayed(0, 100)).with_cancel_hook(counting_hook(&hooks)),
            RaceSource::new(failing("fatal")).with_cancel_hook(counting_hook(&hooks)),
            RaceSource::new(delayed(2, 100)).with_cancel_hook(counting_hook(&hooks)),
        ];
        let throw_on_second = |index: usize, _: &String| {
            if index == 1 {
                ErrorPolicy::Throw
            } else {
                ErrorPolicy::Continue
            }
        };
        let mut race = RaceMultiplexer::new(sources, CancellationToken::new(), throw_on_second);

        let first = race.next().await.unwrap();
        assert_eq!(first.unwrap_err(), "fatal");
        assert!(race.next().await.is_none());
        assert_eq!(hooks.load(Ordering::SeqCst), 2);
        assert_eq!(race.live_sources(), 0);
    }

    #[tokio::test]
    async fn test_cancellation_before_any_yield_returns_nothing() {
        let hooks = Arc::new(AtomicUsize::new(0));
        let token = CancellationToken::new();
        let sources = vec![
            RaceSource::new(delayed(0, 0)).with_cancel_hook(counting_hook(&hooks)),
            RaceSource::new(delayed(1, 0)).with_cancel_hook(counting_hook(&hooks)),
        ];
        let mut race = RaceMultiplexer::new(sources, token.clone(), throw_all);

        token.cancel();
        assert!(race.next().await.is_none());
        assert_eq!(hooks.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_while_waiting_stops_promptly() {
        let token = CancellationToken::new();
        let sources = vec![RaceSource::new(delayed(0, 10_000))];
        let mut race = RaceMultiplexer::new(sources, token.clone(), keep_going);

        let canceller = token.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(10)).await;
            canceller.cancel();
        });

        let started = Instant::now();
        assert!(race.next().await.is_none());
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_failing_cancel_hook_is_swallowed() {
        let token = CancellationToken::new();
        let sources = vec![
            RaceSource::new(delayed(0, 0)).with_cancel_hook(|| Err(anyhow::anyhow!("cleanup failed"))),
        ];
        let mut race = RaceMultiplexer::new(sources, token.clone(), throw_all);

        token.cancel();
        assert!(race.next().await.is_none());
    }

    #[tokio::test]
    async fn test_shutdown_twice_runs_hooks_once() {
        let hooks = Arc::new(AtomicUsize::new(0));
        let sources = vec![
            RaceSource::new(delayed(0, 0)).with_cancel_hook(counting_hook(&hooks)),
        ];
        let mut race = RaceMultiplexer::new(sources, CancellationToken::new(), keep_going);

        race.shutdown();
        race.shutdown();
        drop(race);
        assert_eq!(hooks.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exhausted_sources_do_not_run_hooks() {
        let hooks = Arc::new(AtomicUsize::new(0));
        let sources = vec![
            RaceSource::new(delayed(0, 0)).with_cancel_hook(counting_hook(&hooks)),
        ];
        let mut race = RaceMultiplexer::new(sources, CancellationToken::new(), keep_going);

        assert_eq!(collect_items(&mut race).await.len(), 1);
        race.shutdown();
        assert_eq!(hooks.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_multi_item_source_keeps_its_own_order() {
        let many = stream::iter(vec![Ok::<usize, String>(10), Ok(11), Ok(12)]).boxed();
        let sources = vec![RaceSource::new(many), RaceSource::new(delayed(99, 0))];
        let race = RaceMultiplexer::new(sources, CancellationToken::new(), keep_going);

        let items: Vec<Raced<usize>> = race
            .into_stream()
            .map(Result::unwrap)
            .collect()
            .await;
        let from_first: Vec<usize> = items
            .iter()
            .filter(|raced| raced.source_index == 0)
            .map(|raced| raced.item)
            .collect();
        assert_eq!(from_first, vec![10, 11, 12]);
        assert_eq!(items.len(), 4);
    }
}
