use crate::driver::{BackendConnection, BackendDriver, DriverError};
use async_trait::async_trait;
use pgrelay_core::{QueryResult, Row};
use serde_json::Value;

/// In-process driver for `stub://` addresses. Every query succeeds with a
/// single `{"current_user": "test"}` row.
#[derive(Debug, Default, Clone, Copy)]
pub struct StubDriver;

#[async_trait]
impl BackendDriver for StubDriver {
    fn name(&self) -> &'static str {
        "stub"
    }

    async fn connect(&self, _url: &str) -> Result<Box<dyn BackendConnection>, DriverError> {
        Ok(Box::new(StubConnection))
    }
}

#[derive(Debug)]
struct StubConnection;

#[async_trait]
impl BackendConnection for StubConnection {
    async fn query(&mut self, _text: &str, _params: &[Value]) -> Result<QueryResult, DriverError> {
        let mut row = Row::new();
        row.insert("current_user".into(), Value::String("test".into()));
        Ok(QueryResult::from_rows(vec![row]))
    }

    async fn close(self: Box<Self>) {}
}
