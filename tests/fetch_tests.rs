#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};
    use wiremock::matchers::{method, path, path_regex};
    use wiremock::{Mock, MockServer, ResponseTemplate};
    use workpool::{
        errors::{FetchError, UnitError},
        BarrierState, Config, HttpTransport, Orchestrator, Transport, UnitId, WorkUnit,
    };

    fn transport(request_timeout: Duration) -> HttpTransport {
        let config = Config {
            request_timeout,
            ..Config::default()
        };
        HttpTransport::new(&config).unwrap()
    }

    #[tokio::test]
    async fn test_get_returns_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/hello"))
            .respond_with(ResponseTemplate::new(200).set_body_string("world"))
            .expect(1)
            .mount(&server)
            .await;

        let body = transport(Duration::from_secs(5))
            .get(&format!("{}/hello", server.uri()))
            .await
            .unwrap();
        assert_eq!(body, "world");
    }

    #[tokio::test]
    async fn test_non_success_status_is_distinguished() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/missing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let url = format!("{}/missing", server.uri());
        let err = transport(Duration::from_secs(5)).get(&url).await.unwrap_err();
        assert_eq!(err, FetchError::Status { url, status: 404 });
        assert!(err.is_status());
    }

    #[tokio::test]
    async fn test_connection_refused_is_transport_error() {
        // порт 1 на loopback никто не слушает
        let err = transport(Duration::from_secs(5))
            .get("http://127.0.0.1:1/")
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Transport { .. }), "got {err:?}");
    }

    #[tokio::test]
    async fn test_slow_response_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/slow"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
            .mount(&server)
            .await;

        let err = transport(Duration::from_millis(100))
            .get(&format!("{}/slow", server.uri()))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Timeout { .. }), "got {err:?}");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_scenario_b_over_http() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path_regex(r"^/ok/\d+$"))
            .respond_with(ResponseTemplate::new(200).set_body_string("payload"))
            .expect(8)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path_regex(r"^/fail/\d+$"))
            .respond_with(ResponseTemplate::new(503))
            .expect(2)
            .mount(&server)
            .await;

        let mut urls: Vec<String> = (0..8).map(|i| format!("{}/ok/{i}", server.uri())).collect();
        urls.push(format!("{}/fail/0", server.uri()));
        urls.push(format!("{}/fail/1", server.uri()));

        let config = Config::default().with_concurrency(5);
        let shared = HttpTransport::shared(&config).unwrap();
        let orch = Orchestrator::new(config).unwrap().with_transport(shared);
        let report = orch
            .run(urls.into_iter().map(WorkUnit::fetch).collect())
            .await
            .unwrap();

        assert_eq!(report.len(), 8);
        assert!(report.items.iter().all(|b| b == "payload"));
        assert_eq!(report.failures.len(), 2);
        for failure in &report.failures {
            assert!(matches!(&failure.unit, UnitId::Url(u) if u.contains("/fail/")));
            assert!(matches!(
                failure.error,
                UnitError::Fetch(FetchError::Status { status: 503, .. })
            ));
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_one_client_serves_many_units() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("x"))
            .expect(64)
            .mount(&server)
            .await;

        let shared: Arc<dyn Transport> = Arc::new(transport(Duration::from_secs(5)));
        let orch = Orchestrator::new(Config::io_bound()).unwrap().with_transport(shared);
        let units = (0..64)
            .map(|i| WorkUnit::fetch(format!("{}/n/{i}", server.uri())))
            .collect();

        let report = orch.run(units).await.unwrap();
        assert_eq!(report.len(), 64);
        assert!(report.is_clean());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_every_fetch_failing_over_http() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .expect(6)
            .mount(&server)
            .await;

        let config = Config::default().with_concurrency(3);
        let shared = HttpTransport::shared(&config).unwrap();
        let orch = Orchestrator::new(config).unwrap().with_transport(shared);
        let run = orch.submit(
            (0..6)
                .map(|i| WorkUnit::fetch(format!("{}/down/{i}", server.uri())))
                .collect(),
        );

        let mut state = run.state();
        for _ in 0..500 {
            if state == BarrierState::Closed {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
            state = run.state();
        }
        assert_eq!(state, BarrierState::Closed);

        let report = run.wait().await;
        assert!(report.is_empty());
        assert_eq!(report.succeeded, 0);
        assert_eq!(report.failures.len(), 6);
        assert!(report
            .failures
            .iter()
            .all(|f| matches!(f.error, UnitError::Fetch(FetchError::Status { status: 503, .. }))));
    }
}
