use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use coalescer::{Coalesced, Method, Options, Registry};
use futures::future::BoxFuture;
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Deserialize, Serialize)]
pub struct WorkloadsConfig {
    pub workloads: Vec<Workload>,
}

impl WorkloadsConfig {
    pub fn get(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path).context("failed to open workloads file")?;
        serde_yaml::from_reader(file).context("failed to parse workloads YAML")
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct Workload {
    /// The number of concurrently outstanding calls.
    pub concurrency: usize,
    /// Calls pick their argument uniformly from `0..keys`.
    pub keys: u64,
    /// How long every invocation of the backend takes.
    #[serde(with = "humantime_serde")]
    pub latency: Duration,
    /// The probability of an invocation to fail.
    #[serde(default)]
    pub failure_rate: f64,
    #[serde(default)]
    pub memoize: bool,
    /// Clears the operation periodically while the workload is running.
    #[serde(default, with = "humantime_serde")]
    pub clear_every: Option<Duration>,
}

#[derive(Clone, Debug, Error)]
#[error("backend failed for key {0}")]
pub struct BackendError(u64);

/// A synthetic backend that counts how often it was actually invoked.
#[derive(Debug)]
pub struct Backend {
    latency: Duration,
    failure_rate: f64,
    invocations: AtomicUsize,
}

impl Backend {
    async fn fetch(self: Arc<Self>, key: u64) -> Result<u64, BackendError> {
        self.invocations.fetch_add(1, Ordering::Relaxed);
        let fail = rand::rng().random_bool(self.failure_rate);

        tokio::time::sleep(self.latency).await;
        match fail {
            true => Err(BackendError(key)),
            false => Ok(key.wrapping_mul(2)),
        }
    }

    pub fn invocations(&self) -> usize {
        self.invocations.load(Ordering::Relaxed)
    }
}

type FetchFn = fn(Arc<Backend>, u64) -> BoxFuture<'static, Result<u64, BackendError>>;

pub type Fetch = Coalesced<u64, Method<Backend, FetchFn>>;

pub struct PreparedWorkload {
    pub concurrency: usize,
    pub clear_every: Option<Duration>,
    keys: u64,
    backend: Arc<Backend>,
    fetch: Fetch,
}

impl PreparedWorkload {
    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    pub fn fetch(&self) -> &Fetch {
        &self.fetch
    }

    /// Calls the coalesced backend with a random key.
    pub async fn run_once(&self) -> Result<u64> {
        let key = rand::rng().random_range(0..self.keys);
        let handle = self.fetch.call(key)?;
        Ok(handle.await?)
    }
}

pub fn prepare_workload(
    index: usize,
    workload: Workload,
    registry: Arc<Registry>,
) -> Result<PreparedWorkload> {
    if workload.concurrency == 0 {
        anyhow::bail!("workload {index}: concurrency must be positive");
    }
    if workload.keys == 0 {
        anyhow::bail!("workload {index}: keys must be positive");
    }
    if !(0.0..=1.0).contains(&workload.failure_rate) {
        anyhow::bail!("workload {index}: failure_rate must be within 0 and 1");
    }

    let backend = Arc::new(Backend {
        latency: workload.latency,
        failure_rate: workload.failure_rate,
        invocations: AtomicUsize::new(0),
    });

    let fetch: FetchFn = |backend, key| Box::pin(backend.fetch(key));
    let options = Options {
        memoize: workload.memoize,
        name: Some(format!("workload-{index}")),
    };
    let fetch = coalescer::builder(Method::new(Arc::clone(&backend), fetch))
        .options(options)
        .registry(registry)
        .build();

    Ok(PreparedWorkload {
        concurrency: workload.concurrency,
        clear_every: workload.clear_every,
        keys: workload.keys,
        backend,
        fetch,
    })
}
