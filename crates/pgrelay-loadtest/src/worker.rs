use crate::generator::LoadError;
use pgrelay_client::Client;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};

/// What one worker did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerResult {
    pub completed: u64,
    pub errors: u64,
}

/// Issues one query at a time until `target` of them have succeeded.
pub struct Worker {
    pub(crate) index: usize,
    pub(crate) client: Client,
    pub(crate) query: Arc<str>,
    pub(crate) params: Arc<[Value]>,
    pub(crate) target: u64,
    pub(crate) max_errors: Option<u64>,
}

impl Worker {
    pub async fn run(self) -> Result<WorkerResult, LoadError> {
        let mut result = WorkerResult::default();
        while result.completed < self.target {
            match self.client.query(&self.query, &self.params).await {
                Ok(_) => result.completed += 1,
                Err(err) => {
                    result.errors += 1;
                    debug!(worker = self.index, errors = result.errors, "query failed: {err}");
                    if let Some(max) = self.max_errors {
                        if result.errors > max {
                            return Err(LoadError::TooManyErrors {
                                worker: self.index,
                                errors: result.errors,
                                last: err.to_string(),
                            });
                        }
                    }
                }
            }
        }
        info!(
            worker = self.index,
            completed = result.completed,
            errors = result.errors,
            "worker finished"
        );
        Ok(result)
    }
}
