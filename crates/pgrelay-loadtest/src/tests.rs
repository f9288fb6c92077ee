#[cfg(test)]
mod tests {
    use crate::generator::{LoadError, LoadGenerator, LoadReport, LoadTest};
    use crate::worker::WorkerResult;
    use async_trait::async_trait;
    use pgrelay_client::{
        BackendConnection, BackendDriver, ClientRegistry, ClientSettings, DriverError,
    };
    use pgrelay_core::{DriverKind, QueryResult, Row};
    use pgrelay_server::{ConnectionSettings, ProxyServer, ServerSettings};
    use serde_json::{json, Value};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    /// Fails every `every`-th query across all connections.
    struct FlakyDriver {
        every: u64,
        calls: Arc<AtomicU64>,
    }

    struct FlakyConnection {
        every: u64,
        calls: Arc<AtomicU64>,
    }

    #[async_trait]
    impl BackendDriver for FlakyDriver {
        fn name(&self) -> &'static str {
            "flaky"
        }

        async fn connect(&self, _url: &str) -> Result<Box<dyn BackendConnection>, DriverError> {
            Ok(Box::new(FlakyConnection {
                every: self.every,
                calls: self.calls.clone(),
            }))
        }
    }

    #[async_trait]
    impl BackendConnection for FlakyConnection {
        async fn query(
            &mut self,
            _text: &str,
            _params: &[Value],
        ) -> Result<QueryResult, DriverError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call % self.every == 0 {
                return Err(DriverError::query("deadlock detected"));
            }
            let mut row = Row::new();
            row.insert("call".into(), json!(call));
            Ok(QueryResult::from_rows(vec![row]))
        }

        async fn close(self: Box<Self>) {}
    }

    fn flaky_registry(every: u64) -> (ClientRegistry, Arc<AtomicU64>) {
        let calls = Arc::new(AtomicU64::new(0));
        let driver: Arc<dyn BackendDriver> = Arc::new(FlakyDriver {
            every,
            calls: calls.clone(),
        });
        let mut drivers = HashMap::new();
        drivers.insert(DriverKind::Stub, driver);
        (ClientRegistry::with_drivers(ClientSettings::default(), drivers), calls)
    }

    async fn run(test: LoadTest, registry: &ClientRegistry) -> Result<LoadReport, LoadError> {
        let generator = LoadGenerator::new(test)?;
        tokio::time::timeout(Duration::from_secs(10), generator.run(registry))
            .await
            .expect("load test finished in time")
    }

    #[tokio::test]
    async fn workers_split_the_total_evenly() {
        let registry = ClientRegistry::new(ClientSettings::default());
        let report = run(LoadTest::new("stub://test", 50, 5), &registry)
            .await
            .expect("run");
        assert_eq!(report.completed(), vec![10, 10, 10, 10, 10]);
        assert_eq!(report.total_completed(), 50);
        assert_eq!(report.total_errors(), 0);
    }

    #[tokio::test]
    async fn single_worker_runs_every_query() {
        let registry = ClientRegistry::new(ClientSettings::default());
        let report = run(LoadTest::new("stub://test", 10, 1), &registry)
            .await
            .expect("run");
        assert_eq!(report.completed(), vec![10]);
    }

    #[tokio::test]
    async fn uneven_or_empty_splits_are_rejected() {
        assert!(matches!(
            LoadGenerator::new(LoadTest::new("stub://test", 10, 3)),
            Err(LoadError::Config(_))
        ));
        assert!(matches!(
            LoadGenerator::new(LoadTest::new("stub://test", 10, 0)),
            Err(LoadError::Config(_))
        ));
        let registry = ClientRegistry::new(ClientSettings::default());
        let empty = run(LoadTest::new("stub://test", 0, 4), &registry)
            .await
            .expect("run");
        assert_eq!(empty.completed(), vec![0, 0, 0, 0]);
    }

    #[tokio::test]
    async fn unknown_address_fails_before_any_worker_starts() {
        let registry = ClientRegistry::new(ClientSettings::default());
        let err = run(LoadTest::new("mysql://db", 4, 2), &registry)
            .await
            .expect_err("bad address");
        assert!(matches!(err, LoadError::Client(_)));
    }

    #[tokio::test]
    async fn errors_are_counted_but_not_completed() {
        let (registry, calls) = flaky_registry(3);
        let report = run(LoadTest::new("stub://flaky", 60, 4), &registry)
            .await
            .expect("run");
        assert_eq!(report.completed(), vec![15, 15, 15, 15]);
        assert!(report.total_errors() > 0);
        assert_eq!(
            report.total_completed() + report.total_errors(),
            calls.load(Ordering::SeqCst)
        );
    }

    #[tokio::test]
    async fn max_errors_stops_a_failing_run() {
        let (registry, _) = flaky_registry(1);
        let test = LoadTest {
            max_errors: Some(5),
            ..LoadTest::new("stub://down", 10, 2)
        };
        match run(test, &registry).await {
            Err(LoadError::TooManyErrors { errors, last, .. }) => {
                assert_eq!(errors, 6);
                assert!(last.contains("deadlock"), "{last}");
            }
            other => panic!("expected the run to give up, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn drives_a_proxy_over_tcp() {
        let backends = ClientRegistry::new(ClientSettings::default());
        let handle = ProxyServer::start(
            ServerSettings {
                listen_addr: "127.0.0.1:0".into(),
                max_connections: 16,
                connection: ConnectionSettings {
                    default_address: Some("stub://test".into()),
                    ..ConnectionSettings::default()
                },
            },
            backends.clone(),
        )
        .await
        .expect("start proxy");
        let address = format!("remote://127.0.0.1:{}", handle.local_addr().port());

        let callers = ClientRegistry::new(ClientSettings::default());
        let report = run(LoadTest::new(address, 40, 4), &callers).await.expect("run");
        assert_eq!(report.completed(), vec![10, 10, 10, 10]);
        assert!(callers.statuses()[0].1.total <= 4);

        callers.end().await;
        handle.close().await;
        backends.end().await;
    }

    #[test]
    fn report_summarises_workers() {
        let report = LoadReport {
            workers: vec![
                WorkerResult {
                    completed: 10,
                    errors: 1,
                },
                WorkerResult {
                    completed: 10,
                    errors: 0,
                },
            ],
            elapsed: Duration::from_secs(2),
        };
        assert_eq!(report.total_completed(), 20);
        assert_eq!(report.total_errors(), 1);
        assert_eq!(report.throughput(), 10.0);
        let text = report.to_string();
        assert!(text.starts_with("20 queries (1 errors)"), "{text}");
        assert!(text.ends_with("[10, 10]"), "{text}");
    }
}
