//! Parallel job dispatcher: hands jobs to a fixed pool of clients, each
//! capped at one job in flight, and yields results in completion order
//! rather than submission order.
//!
//! REDESIGN: a manual poll-with-timeout scheduler over N file descriptors
//! is replaced by `futures::stream::FuturesUnordered`, which is the
//! idiomatic async-Rust equivalent of the same readiness-poll loop. No
//! manual `tokio::select!` branch per client is needed since
//! `FuturesUnordered` already multiplexes an arbitrary number of pending
//! futures and resolves them as they become ready.

use std::future::Future;
use std::pin::Pin;

use anyhow::Result;
use futures::stream::{FuturesUnordered, StreamExt};

type JobFuture<C, K, R> = Pin<Box<dyn Future<Output = Finished<C, K, R>> + Send>>;

struct Finished<C, K, R> {
    client_idx: usize,
    key: K,
    client: C,
    outcome: Result<R>,
}

/// One completed job, as handed back by `Dispatcher::result`.
pub struct JobResult<K, R> {
    pub key: K,
    pub client_idx: usize,
    pub outcome: Result<R>,
}

/// Drives up to `clients.len()` jobs concurrently, one per client.
///
/// Usage: call `process` to top up idle clients from a job source,
/// then `result` repeatedly; interleave the two until `done()`.
pub struct Dispatcher<C, K, J, R> {
    clients: Vec<Option<C>>,
    in_flight: FuturesUnordered<JobFuture<C, K, R>>,
    exhausted: Vec<bool>,
    _job: std::marker::PhantomData<fn() -> J>,
}

impl<C, K, J, R> Dispatcher<C, K, J, R>
where
    C: Send + 'static,
    K: Send + 'static,
    J: Send + 'static,
    R: Send + 'static,
{
    pub fn new(clients: Vec<C>) -> Self {
        let exhausted = vec![false; clients.len()];
        Self {
            clients: clients.into_iter().map(Some).collect(),
            in_flight: FuturesUnordered::new(),
            exhausted,
            _job: std::marker::PhantomData,
        }
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Offer each idle, non-exhausted client a job from `source`. A
    /// client for which `source` returns `None` is marked exhausted and
    /// won't be offered again. Exhaustion is per-client, not global, so
    /// a slow client can still finish its own tail of work.
    pub fn process<Src, Run, Fut>(&mut self, mut source: Src, run: Run)
    where
        Src: FnMut(usize) -> Option<(K, J)>,
        Run: Fn(usize, C, J) -> Fut + Clone + Send + 'static,
        Fut: Future<Output = (C, Result<R>)> + Send + 'static,
    {
        for idx in 0..self.clients.len() {
            if self.exhausted[idx] || self.clients[idx].is_none() {
                continue;
            }
            match source(idx) {
                Some((key, job)) => {
                    let client = self.clients[idx].take().expect("checked Some above");
                    let run = run.clone();
                    self.in_flight.push(Box::pin(async move {
                        let (client, outcome) = run(idx, client, job).await;
                        Finished { client_idx: idx, key, client, outcome }
                    }));
                }
                None => self.exhausted[idx] = true,
            }
        }
    }

    /// Wait for the next job to finish, in readiness order. Returns
    /// `None` once nothing is in flight and every client is exhausted;
    /// an error on one job never stops the others.
    pub async fn result(&mut self) -> Option<JobResult<K, R>> {
        let finished = self.in_flight.next().await?;
        self.clients[finished.client_idx] = Some(finished.client);
        Some(JobResult { key: finished.key, client_idx: finished.client_idx, outcome: finished.outcome })
    }

    /// No jobs in flight and every client's source is exhausted.
    pub fn done(&self) -> bool {
        self.in_flight.is_empty() && self.exhausted.iter().all(|&e| e)
    }

    /// Drop every in-flight job and client handle immediately, without
    /// waiting for completions: freeing the dispatcher cancels all
    /// in-flight sessions. Dropping a
    /// `protocol::Session` client handle here relies on its own `Drop`
    /// (or an explicit prior `close`/`cancel`) to notify the remote peer;
    /// this method only discards the dispatcher's side of the bookkeeping.
    pub fn cancel(&mut self) {
        self.in_flight.clear();
        for slot in &mut self.clients {
            *slot = None;
        }
        for exhausted in &mut self.exhausted {
            *exhausted = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    struct FakeClient(u32);

    async fn run_job(idx: usize, client: FakeClient, job: (u64, Duration)) -> (FakeClient, Result<u64>) {
        let (value, delay) = job;
        let _ = idx;
        tokio::time::sleep(delay).await;
        (client, Ok(value))
    }

    #[tokio::test]
    async fn jobs_complete_in_readiness_order_not_submission_order() {
        let clients = vec![FakeClient(0), FakeClient(1)];
        let mut dispatcher: Dispatcher<FakeClient, u64, (u64, Duration), u64> = Dispatcher::new(clients);

        let mut jobs = vec![
            (1u64, Duration::from_millis(30)),
            (2u64, Duration::from_millis(10)),
            (3u64, Duration::from_millis(20)),
        ]
        .into_iter();

        dispatcher.process(
            |_idx| jobs.next().map(|(v, d)| (v, (v, d))),
            |idx, client, job| run_job(idx, client, job),
        );

        let mut order = Vec::new();
        while !dispatcher.done() {
            if let Some(result) = dispatcher.result().await {
                order.push(result.key);
                dispatcher.process(
                    |_idx| jobs.next().map(|(v, d)| (v, (v, d))),
                    |idx, client, job| run_job(idx, client, job),
                );
            }
        }

        // job 2 (10ms) finishes before job 1 (30ms) even though job 1 was
        // submitted first, because they run on different clients.
        assert_eq!(order[0], 2);
        assert_eq!(order.len(), 3);
        let mut sorted = order.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, vec![1, 2, 3]);
    }

    async fn fail_on_two(_idx: usize, client: FakeClient, job: u64) -> (FakeClient, Result<u64>) {
        if job == 2 {
            (client, Err(anyhow::anyhow!("job 2 failed")))
        } else {
            (client, Ok(job))
        }
    }

    #[tokio::test]
    async fn errors_on_one_job_do_not_halt_the_dispatcher() {
        let clients = vec![FakeClient(0)];
        let mut dispatcher: Dispatcher<FakeClient, u64, u64, u64> = Dispatcher::new(clients);

        let mut jobs = vec![1u64, 2u64, 3u64].into_iter();
        dispatcher.process(|_idx| jobs.next().map(|v| (v, v)), fail_on_two);

        let mut ok_count = 0;
        let mut err_count = 0;
        while !dispatcher.done() {
            if let Some(result) = dispatcher.result().await {
                match result.outcome {
                    Ok(_) => ok_count += 1,
                    Err(_) => err_count += 1,
                }
                dispatcher.process(|_idx| jobs.next().map(|v| (v, v)), fail_on_two);
            }
        }

        assert_eq!(ok_count, 2);
        assert_eq!(err_count, 1);
    }

    #[tokio::test]
    async fn done_only_after_all_clients_exhausted_and_idle() {
        let clients = vec![FakeClient(0), FakeClient(1)];
        let mut dispatcher: Dispatcher<FakeClient, u64, u64, u64> = Dispatcher::new(clients);
        assert!(!dispatcher.done(), "fresh dispatcher has clients that haven't been asked yet");

        dispatcher.process(|_idx| None, |_idx, client: FakeClient, job: u64| async move { (client, Ok(job)) });
        assert!(dispatcher.done());
    }
}
