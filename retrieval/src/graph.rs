//! A small typed task graph.
//!
//! Pipelines are built from [`Step`]s. Steps compose sequentially with
//! [`StepExt::then`] and run over many inputs with [`FanOut`], which bounds
//! concurrency with a semaphore and returns results in input order.
//!
//! ```text
//! input ──► Step A ──► Step B ──► output          (Chain)
//!
//! inputs ─┬─► step ─┐
//!         ├─► step ─┼─► outputs, input order      (FanOut, `workers` at once)
//!         └─► step ─┘
//! ```
//!
//! Steps report `anyhow` errors so heterogeneous steps can share one chain.

use std::sync::Arc;

use anyhow::{Context, anyhow};
use async_trait::async_trait;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

/// One named, typed, asynchronous unit of work.
#[async_trait]
pub trait Step: Send + Sync {
    type Input: Send + 'static;
    type Output: Send + 'static;

    fn name(&self) -> &str;

    async fn run(&self, input: Self::Input) -> anyhow::Result<Self::Output>;
}

/// Two steps run back to back.
pub struct Chain<A, B> {
    first: A,
    second: B,
    name: String,
}

impl<A: Step, B: Step<Input = A::Output>> Chain<A, B> {
    pub fn new(first: A, second: B) -> Self {
        let name = format!("{} -> {}", first.name(), second.name());
        Self {
            first,
            second,
            name,
        }
    }
}

#[async_trait]
impl<A, B> Step for Chain<A, B>
where
    A: Step,
    B: Step<Input = A::Output>,
{
    type Input = A::Input;
    type Output = B::Output;

    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, input: Self::Input) -> anyhow::Result<Self::Output> {
        let intermediate = self
            .first
            .run(input)
            .await
            .with_context(|| format!("step {} failed", self.first.name()))?;
        self.second
            .run(intermediate)
            .await
            .with_context(|| format!("step {} failed", self.second.name()))
    }
}

/// Sequential composition for every step.
pub trait StepExt: Step + Sized {
    fn then<B>(self, next: B) -> Chain<Self, B>
    where
        B: Step<Input = Self::Output>,
    {
        Chain::new(self, next)
    }
}

impl<S: Step> StepExt for S {}

/// Runs one step over many inputs on a bounded worker pool.
pub struct FanOut<S> {
    step: Arc<S>,
    workers: usize,
}

impl<S: Step + 'static> FanOut<S> {
    pub fn new(step: S, workers: usize) -> Self {
        Self::from_arc(Arc::new(step), workers)
    }

    pub fn from_arc(step: Arc<S>, workers: usize) -> Self {
        Self {
            step,
            workers: workers.max(1),
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Run the step once per input. The i-th result belongs to the i-th
    /// input; a failed or panicked run only fills its own slot.
    ///
    /// Dropping the returned future aborts every spawned run.
    pub async fn run_all(&self, inputs: Vec<S::Input>) -> Vec<anyhow::Result<S::Output>> {
        let total = inputs.len();
        let semaphore = Arc::new(Semaphore::new(self.workers));
        let mut set = JoinSet::new();

        for (slot, input) in inputs.into_iter().enumerate() {
            let step = Arc::clone(&self.step);
            let semaphore = Arc::clone(&semaphore);
            set.spawn(async move {
                let result = match semaphore.acquire_owned().await {
                    Ok(_permit) => step.run(input).await,
                    Err(err) => Err(err.into()),
                };
                (slot, result)
            });
        }

        let mut results: Vec<Option<anyhow::Result<S::Output>>> =
            (0..total).map(|_| None).collect();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((slot, result)) => results[slot] = Some(result),
                // The slot stays empty and is reported below.
                Err(err) => warn!("{} task did not complete: {err}", self.step.name()),
            }
        }

        debug!(
            "Ran {} over {total} inputs with {} workers",
            self.step.name(),
            self.workers
        );

        let name = self.step.name();
        results
            .into_iter()
            .map(|result| result.unwrap_or_else(|| Err(anyhow!("{name} task did not complete"))))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct AddOne;

    #[async_trait]
    impl Step for AddOne {
        type Input = u64;
        type Output = u64;

        fn name(&self) -> &str {
            "add_one"
        }

        async fn run(&self, input: u64) -> anyhow::Result<u64> {
            Ok(input + 1)
        }
    }

    struct Render;

    #[async_trait]
    impl Step for Render {
        type Input = u64;
        type Output = String;

        fn name(&self) -> &str {
            "render"
        }

        async fn run(&self, input: u64) -> anyhow::Result<String> {
            if input == 13 {
                anyhow::bail!("unlucky input");
            }
            Ok(format!("#{input}"))
        }
    }

    /// Sleeps longer for smaller inputs and tracks peak concurrency.
    struct Slow {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl Step for Slow {
        type Input = u64;
        type Output = u64;

        fn name(&self) -> &str {
            "slow"
        }

        async fn run(&self, input: u64) -> anyhow::Result<u64> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5 * (10 - input))).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            if input == 7 {
                panic!("boom");
            }
            Ok(input * 10)
        }
    }

    #[tokio::test]
    async fn test_chain_runs_in_order() {
        let pipeline = AddOne.then(AddOne).then(Render);
        assert_eq!(pipeline.name(), "add_one -> add_one -> render");
        assert_eq!(pipeline.run(1).await.unwrap(), "#3");
    }

    #[tokio::test]
    async fn test_chain_error_names_the_step() {
        let err = AddOne.then(Render).run(12).await.unwrap_err();
        let message = format!("{err:#}");
        assert!(message.contains("step render failed"));
        assert!(message.contains("unlucky input"));
    }

    #[tokio::test]
    async fn test_fan_out_preserves_input_order() {
        let fan_out = FanOut::new(AddOne.then(Render), 3);
        let results = fan_out.run_all(vec![1, 12, 5]).await;
        let rendered: Vec<String> = results
            .into_iter()
            .map(|r| r.unwrap_or_else(|e| format!("error: {}", e.root_cause())))
            .collect();
        assert_eq!(rendered, vec!["#2", "error: unlucky input", "#6"]);
    }

    #[tokio::test]
    async fn test_fan_out_bounds_concurrency_and_isolates_panics() {
        let step = Arc::new(Slow {
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let fan_out = FanOut::from_arc(Arc::clone(&step), 2);

        let results = fan_out.run_all((0..8).collect()).await;

        assert_eq!(results.len(), 8);
        assert!(results[7].is_err());
        let values: Vec<u64> = results[..7].iter().map(|r| *r.as_ref().unwrap()).collect();
        assert_eq!(values, vec![0, 10, 20, 30, 40, 50, 60]);
        assert!(step.peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_fan_out_over_nothing() {
        let results = FanOut::new(AddOne, 0).run_all(Vec::new()).await;
        assert!(results.is_empty());
    }
}
