pub mod generator;
pub mod worker;

pub use generator::{LoadError, LoadGenerator, LoadReport, LoadTest, DEFAULT_QUERY};
pub use worker::{Worker, WorkerResult};

#[cfg(test)]
mod tests;
