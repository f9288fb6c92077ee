use crate::worker::{Worker, WorkerResult};
use pgrelay_client::{ClientError, ClientRegistry};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::info;

pub const DEFAULT_QUERY: &str = "select current_user";

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("invalid load test: {0}")]
    Config(String),
    #[error(transparent)]
    Client(#[from] ClientError),
    #[error("worker {worker} gave up after {errors} errors, last: {last}")]
    TooManyErrors {
        worker: usize,
        errors: u64,
        last: String,
    },
    #[error("worker {0} stopped unexpectedly")]
    WorkerLost(usize),
}

#[derive(Debug, Clone)]
pub struct LoadTest {
    pub address: String,
    pub query: String,
    pub params: Vec<Value>,
    /// Successful queries to run across all workers.
    pub total: u64,
    pub concurrency: usize,
    /// Errors one worker tolerates before giving up. `None` retries forever.
    pub max_errors: Option<u64>,
}

impl LoadTest {
    pub fn new(address: impl Into<String>, total: u64, concurrency: usize) -> Self {
        Self {
            address: address.into(),
            query: DEFAULT_QUERY.to_string(),
            params: Vec::new(),
            total,
            concurrency,
            max_errors: None,
        }
    }

    pub fn validate(&self) -> Result<(), LoadError> {
        if self.concurrency == 0 {
            return Err(LoadError::Config("concurrency must be at least 1".into()));
        }
        if self.total % self.concurrency as u64 != 0 {
            return Err(LoadError::Config(format!(
                "{} queries cannot be split evenly across {} workers",
                self.total, self.concurrency
            )));
        }
        Ok(())
    }
}

/// Per-worker results, in worker order, plus wall-clock time.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadReport {
    pub workers: Vec<WorkerResult>,
    pub elapsed: Duration,
}

impl LoadReport {
    /// Completed queries per worker.
    pub fn completed(&self) -> Vec<u64> {
        self.workers.iter().map(|w| w.completed).collect()
    }

    pub fn total_completed(&self) -> u64 {
        self.workers.iter().map(|w| w.completed).sum()
    }

    pub fn total_errors(&self) -> u64 {
        self.workers.iter().map(|w| w.errors).sum()
    }

    /// Completed queries per second.
    pub fn throughput(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs == 0.0 {
            return 0.0;
        }
        self.total_completed() as f64 / secs
    }
}

impl fmt::Display for LoadReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} queries ({} errors) in {:.3}s, {:.1} queries/s, per worker {:?}",
            self.total_completed(),
            self.total_errors(),
            self.elapsed.as_secs_f64(),
            self.throughput(),
            self.completed()
        )
    }
}

/// Runs a fixed number of workers against one address.
#[derive(Debug, Clone)]
pub struct LoadGenerator {
    test: LoadTest,
}

impl LoadGenerator {
    pub fn new(test: LoadTest) -> Result<Self, LoadError> {
        test.validate()?;
        Ok(Self { test })
    }

    pub fn test(&self) -> &LoadTest {
        &self.test
    }

    pub async fn run(&self, registry: &ClientRegistry) -> Result<LoadReport, LoadError> {
        let test = &self.test;
        let client = registry.client(&test.address)?;
        let target = test.total / test.concurrency as u64;
        let query: Arc<str> = Arc::from(test.query.as_str());
        let params: Arc<[Value]> = Arc::from(test.params.as_slice());
        info!(
            address = %test.address,
            total = test.total,
            concurrency = test.concurrency,
            "starting load test"
        );

        let started = Instant::now();
        let handles: Vec<_> = (0..test.concurrency)
            .map(|index| {
                let worker = Worker {
                    index,
                    client: client.clone(),
                    query: query.clone(),
                    params: params.clone(),
                    target,
                    max_errors: test.max_errors,
                };
                tokio::spawn(worker.run())
            })
            .collect();

        let mut workers = Vec::with_capacity(handles.len());
        let mut failure = None;
        for (index, handle) in handles.into_iter().enumerate() {
            if failure.is_some() {
                handle.abort();
                continue;
            }
            match handle.await {
                Ok(Ok(result)) => workers.push(result),
                Ok(Err(err)) => failure = Some(err),
                Err(_) => failure = Some(LoadError::WorkerLost(index)),
            }
        }
        if let Some(err) = failure {
            return Err(err);
        }

        let report = LoadReport {
            workers,
            elapsed: started.elapsed(),
        };
        info!(address = %test.address, "load test finished: {report}");
        Ok(report)
    }
}
