//! Integration tests for the HTTP transport, pagination and operation
//! polling against mocked endpoints using wiremock

use armrt::operation::{FinalState, OperationPoller, OperationStatus, PollerOptions};
use armrt::paging::{FieldPredicate, ListIterator};
use armrt::transport::{HttpTransport, Method, Request, Transport};
use armrt::RuntimeError;
use serde_json::{json, Value};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{bearer_token, body_json, method, path, query_param, query_param_is_missing};
use wiremock::{Mock, MockServer, ResponseTemplate};

const API_VERSION: &str = "2024-07-01";

fn transport() -> HttpTransport {
    HttpTransport::new("armrt-tests").unwrap()
}

fn fast_options() -> PollerOptions {
    PollerOptions {
        default_interval: Duration::from_millis(10),
        min_interval: Duration::ZERO,
        ..PollerOptions::default()
    }
}

/// Cancel `token` after a short delay, while a request is in flight
fn cancel_soon(token: &CancellationToken) {
    let token = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        token.cancel();
    });
}

mod transport_tests {
    use super::*;

    /// Successful GET hands back status, headers and body untouched
    #[tokio::test]
    async fn test_get_sends_bearer_token_and_query() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/subscriptions/sub-1/resourceGroups"))
            .and(query_param("api-version", API_VERSION))
            .and(bearer_token("test-token"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("x-ms-request-id", "req-1")
                    .set_body_json(json!({"value": [{"name": "rg-1"}]})),
            )
            .mount(&server)
            .await;

        let transport = transport().with_bearer_token("test-token");
        let request = Request::get(format!("{}/subscriptions/sub-1/resourceGroups", server.uri()))
            .with_query("api-version", API_VERSION);

        let response = transport.send(request).await.unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.header("X-MS-Request-Id"), Some("req-1"));
        assert_eq!(response.json().unwrap().unwrap()["value"][0]["name"], "rg-1");
    }

    /// Non-2xx statuses are responses, not transport failures
    #[tokio::test]
    async fn test_403_is_a_response_with_user_message() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/subscriptions/restricted"))
            .respond_with(ResponseTemplate::new(403).set_body_json(json!({
                "error": {"code": "AuthorizationFailed", "message": "no access"}
            })))
            .mount(&server)
            .await;

        let response = transport()
            .send(Request::get(format!("{}/subscriptions/restricted", server.uri())))
            .await
            .unwrap();
        assert_eq!(response.status, 403);

        let err = response.error_for_status().unwrap_err();
        assert_eq!(err.status(), Some(403));
        assert_eq!(err.user_message(), "Permission denied. Check your role assignments.");
    }

    /// PUT bodies are sent as JSON
    #[tokio::test]
    async fn test_put_sends_json_body() {
        let server = MockServer::start().await;
        let body = json!({"location": "westeurope", "tags": {"env": "test"}});

        Mock::given(method("PUT"))
            .and(path("/resourceGroups/rg-1"))
            .and(body_json(&body))
            .respond_with(ResponseTemplate::new(200).set_body_json(&body))
            .expect(1)
            .mount(&server)
            .await;

        let request = Request::new(Method::Put, format!("{}/resourceGroups/rg-1", server.uri())).with_body(body);
        let response = transport().send(request).await.unwrap();
        assert!(response.is_success());
    }

    /// A refused connection is a dropped connection
    #[tokio::test]
    async fn test_connection_refused_is_network_error() {
        let server = MockServer::start().await;
        let uri = server.uri();
        drop(server);

        let err = transport().send(Request::get(format!("{}/x", uri))).await.unwrap_err();
        assert!(err.is_dropped_connection());
    }
}

mod paging_tests {
    use super::*;

    async fn mount_three_pages(server: &MockServer, second_page: ResponseTemplate) {
        let next = |token: &str| {
            format!(
                "{}/subscriptions/s/virtualMachines?api-version={}&%24skiptoken={}",
                server.uri(),
                API_VERSION,
                token
            )
        };

        Mock::given(method("GET"))
            .and(path("/subscriptions/s/virtualMachines"))
            .and(query_param_is_missing("$skiptoken"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "value": [{"name": "foo", "id": 1}, {"name": "bar", "id": 2}],
                "nextLink": next("page2")
            })))
            .mount(server)
            .await;

        Mock::given(method("GET"))
            .and(path("/subscriptions/s/virtualMachines"))
            .and(query_param("$skiptoken", "page2"))
            .and(query_param("api-version", API_VERSION))
            .respond_with(second_page)
            .mount(server)
            .await;

        Mock::given(method("GET"))
            .and(path("/subscriptions/s/virtualMachines"))
            .and(query_param("$skiptoken", "page3"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "value": [{"name": "foo", "id": 5}]
            })))
            .mount(server)
            .await;
    }

    fn second_page(server: &MockServer) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(json!({
            "value": [{"name": "baz", "id": 3}, {"name": "foo", "id": 4}],
            "nextLink": format!(
                "{}/subscriptions/s/virtualMachines?api-version={}&%24skiptoken=page3",
                server.uri(),
                API_VERSION
            )
        }))
    }

    fn list_request(server: &MockServer) -> Request {
        Request::get(format!("{}/subscriptions/s/virtualMachines", server.uri())).with_query("api-version", API_VERSION)
    }

    #[tokio::test]
    async fn test_complete_collects_every_page_in_order() {
        let server = MockServer::start().await;
        mount_three_pages(&server, second_page(&server)).await;

        let transport = transport();
        let items: Vec<Value> = ListIterator::new(&transport, list_request(&server))
            .complete(FieldPredicate::new())
            .await
            .unwrap();

        let ids: Vec<i64> = items.iter().filter_map(|i| i["id"].as_i64()).collect();
        assert_eq!(ids, vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn test_predicate_keeps_only_matching_items() {
        let server = MockServer::start().await;
        mount_three_pages(&server, second_page(&server)).await;

        let transport = transport();
        let items: Vec<Value> = ListIterator::new(&transport, list_request(&server))
            .complete(FieldPredicate::new().field("name", "foo"))
            .await
            .unwrap();

        assert_eq!(items.len(), 3);
        assert!(items.iter().all(|item| item["name"] == "foo"));
    }

    #[tokio::test]
    async fn test_failure_on_second_page_returns_no_items() {
        let server = MockServer::start().await;
        mount_three_pages(&server, ResponseTemplate::new(500).set_body_string("boom")).await;

        let transport = transport();
        let err = ListIterator::<Value>::new(&transport, list_request(&server))
            .complete(FieldPredicate::new())
            .await
            .unwrap_err();

        assert_eq!(err.transport_error().and_then(|e| e.status()), Some(500));
        // the third page is never requested
        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 2);
    }

    #[tokio::test]
    async fn test_cancel_during_slow_page_fetch() {
        let server = MockServer::start().await;
        mount_three_pages(&server, second_page(&server).set_delay(Duration::from_secs(60))).await;

        let transport = transport();
        let cancel = CancellationToken::new();
        let iter = ListIterator::<Value>::new(&transport, list_request(&server)).with_cancellation(cancel.clone());
        cancel_soon(&cancel);

        let outcome = tokio::time::timeout(Duration::from_secs(5), iter.complete(FieldPredicate::new()))
            .await
            .expect("cancellation should abort the in-flight page fetch");

        assert!(matches!(
            outcome,
            Err(RuntimeError::Cancelled { during: "fetching a page" })
        ));
    }
}

mod operation_tests {
    use super::*;

    async fn start<'t>(
        transport: &'t HttpTransport,
        request: &Request,
        options: PollerOptions,
    ) -> Result<OperationPoller<'t>, RuntimeError> {
        let response = transport.send(request.clone()).await.unwrap();
        OperationPoller::from_response(transport, "test operation", request, response, options)
    }

    #[tokio::test]
    async fn test_async_operation_header_then_final_get() {
        let server = MockServer::start().await;
        let op_url = format!("{}/operations/op-1?api-version={}", server.uri(), API_VERSION);

        Mock::given(method("PUT"))
            .and(path("/vms/vm-1"))
            .respond_with(
                ResponseTemplate::new(201)
                    .insert_header("Azure-AsyncOperation", op_url.as_str())
                    .insert_header("Retry-After", "0")
                    .set_body_json(json!({"name": "vm-1", "properties": {"provisioningState": "Creating"}})),
            )
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/operations/op-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "InProgress"})))
            .up_to_n_times(1)
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/operations/op-1"))
            .and(query_param("api-version", API_VERSION))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "Succeeded"})))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/vms/vm-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "name": "vm-1",
                "properties": {"provisioningState": "Succeeded"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let transport = transport();
        let request = Request::new(Method::Put, format!("{}/vms/vm-1", server.uri()))
            .with_query("api-version", API_VERSION)
            .with_body(json!({"location": "westeurope"}));

        let mut poller = start(&transport, &request, fast_options()).await.unwrap();
        assert_eq!(poller.status(), OperationStatus::Accepted);

        let result = poller.poll_until_done(&CancellationToken::new()).await.unwrap().unwrap();
        assert_eq!(result["properties"]["provisioningState"], "Succeeded");
        assert_eq!(poller.operation().polls(), 2);
    }

    #[tokio::test]
    async fn test_location_header_delete_with_discard() {
        let server = MockServer::start().await;

        Mock::given(method("DELETE"))
            .and(path("/vms/vm-1"))
            .respond_with(
                ResponseTemplate::new(202)
                    .insert_header("Location", "/operationResults/r-1")
                    .insert_header("Retry-After", "0"),
            )
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/operationResults/r-1"))
            .respond_with(ResponseTemplate::new(202).insert_header("Retry-After", "0"))
            .up_to_n_times(1)
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/operationResults/r-1"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let transport = transport();
        let request = Request::new(Method::Delete, format!("{}/vms/vm-1", server.uri()));
        let options = fast_options().with_final_state(FinalState::Discard);

        let mut poller = start(&transport, &request, options).await.unwrap();
        let result = poller.poll_until_done(&CancellationToken::new()).await.unwrap();

        assert_eq!(result, None);
        assert_eq!(poller.status(), OperationStatus::Succeeded);
        assert_eq!(poller.operation().polls(), 2);
    }

    #[tokio::test]
    async fn test_failed_operation_surfaces_cloud_error() {
        let server = MockServer::start().await;
        let op_url = format!("{}/operations/op-2", server.uri());

        Mock::given(method("POST"))
            .and(path("/vms/vm-1/start"))
            .respond_with(ResponseTemplate::new(202).insert_header("Azure-AsyncOperation", op_url.as_str()))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/operations/op-2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "Failed",
                "error": {
                    "code": "OperationNotAllowed",
                    "message": "VM is deallocating",
                    "details": [{"code": "Conflict", "message": "busy"}]
                }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let transport = transport();
        let request = Request::new(Method::Post, format!("{}/vms/vm-1/start", server.uri()));

        let mut poller = start(&transport, &request, fast_options()).await.unwrap();
        let err = poller.poll_until_done(&CancellationToken::new()).await.unwrap_err();

        match err {
            RuntimeError::OperationFailed(failure) => {
                assert_eq!(failure.status, OperationStatus::Failed);
                assert_eq!(failure.code(), Some("OperationNotAllowed"));
                assert_eq!(failure.error.as_ref().map(|e| e.details.len()), Some(1));
            }
            other => panic!("expected an operation failure, got {}", other),
        }
    }

    #[tokio::test]
    async fn test_cancel_interrupts_long_wait() {
        let server = MockServer::start().await;
        let op_url = format!("{}/operations/op-3", server.uri());

        Mock::given(method("PUT"))
            .and(path("/vms/vm-2"))
            .respond_with(
                ResponseTemplate::new(201)
                    .insert_header("Azure-AsyncOperation", op_url.as_str())
                    .insert_header("Retry-After", "3600"),
            )
            .mount(&server)
            .await;

        let transport = transport();
        let request = Request::new(Method::Put, format!("{}/vms/vm-2", server.uri()));
        let mut poller = start(&transport, &request, PollerOptions::default()).await.unwrap();

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let outcome = tokio::time::timeout(Duration::from_secs(5), poller.poll_until_done(&cancel))
            .await
            .expect("cancellation should end the wait promptly");
        assert!(outcome.unwrap_err().is_cancelled());
    }

    #[tokio::test]
    async fn test_cancel_during_slow_poll_request() {
        let server = MockServer::start().await;
        let op_url = format!("{}/operations/op-4", server.uri());

        Mock::given(method("PUT"))
            .and(path("/vms/vm-3"))
            .respond_with(
                ResponseTemplate::new(201)
                    .insert_header("Azure-AsyncOperation", op_url.as_str())
                    .insert_header("Retry-After", "0"),
            )
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/operations/op-4"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"status": "Succeeded"}))
                    .set_delay(Duration::from_secs(60)),
            )
            .mount(&server)
            .await;

        let transport = transport();
        let request = Request::new(Method::Put, format!("{}/vms/vm-3", server.uri()));
        let mut poller = start(&transport, &request, fast_options()).await.unwrap();

        let cancel = CancellationToken::new();
        cancel_soon(&cancel);

        let outcome = tokio::time::timeout(Duration::from_secs(5), poller.poll_until_done(&cancel))
            .await
            .expect("cancellation should abort the in-flight poll");

        assert!(matches!(outcome, Err(RuntimeError::Cancelled { during: "polling" })));
        assert_eq!(poller.status(), OperationStatus::Accepted);
    }

    #[tokio::test]
    async fn test_cancel_during_slow_final_fetch() {
        let server = MockServer::start().await;
        let op_url = format!("{}/operations/op-5", server.uri());

        Mock::given(method("PUT"))
            .and(path("/vms/vm-4"))
            .respond_with(
                ResponseTemplate::new(201)
                    .insert_header("Azure-AsyncOperation", op_url.as_str())
                    .insert_header("Retry-After", "0"),
            )
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/operations/op-5"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "Succeeded"})))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/vms/vm-4"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"name": "vm-4"}))
                    .set_delay(Duration::from_secs(60)),
            )
            .mount(&server)
            .await;

        let transport = transport();
        let request = Request::new(Method::Put, format!("{}/vms/vm-4", server.uri()));
        let mut poller = start(&transport, &request, fast_options()).await.unwrap();

        let cancel = CancellationToken::new();
        let status = poller.poll_once(&cancel).await.unwrap();
        assert_eq!(status, OperationStatus::Succeeded);

        cancel_soon(&cancel);
        let outcome = tokio::time::timeout(Duration::from_secs(5), poller.poll_until_done(&cancel))
            .await
            .expect("cancellation should abort the in-flight final read");

        assert!(matches!(
            outcome,
            Err(RuntimeError::Cancelled { during: "fetching the final result" })
        ));
    }

    #[tokio::test]
    async fn test_delete_with_default_options_does_not_read_back() {
        let server = MockServer::start().await;

        Mock::given(method("DELETE"))
            .and(path("/vms/vm-5"))
            .respond_with(
                ResponseTemplate::new(202)
                    .insert_header("Location", "/operationResults/r-5")
                    .insert_header("Retry-After", "0")
                    .set_body_string("Accepted"),
            )
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/operationResults/r-5"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/vms/vm-5"))
            .respond_with(ResponseTemplate::new(404))
            .expect(0)
            .mount(&server)
            .await;

        let transport = transport();
        let request = Request::new(Method::Delete, format!("{}/vms/vm-5", server.uri()));
        let mut poller = start(&transport, &request, fast_options()).await.unwrap();

        let result = poller.poll_until_done(&CancellationToken::new()).await.unwrap();
        assert_eq!(result, None);
        assert_eq!(poller.status(), OperationStatus::Succeeded);
    }
}
