// std
use std::collections::VecDeque;
// crates.io
use httpmock::prelude::*;
use serde_json::json;
// self
use api_cache::{
	_preludet::*,
	auth::TokenSecret,
	cache::{Filter, Window},
	gateway::{ApiCall, GatewayConfig, RequestGateway},
	governor::RateGovernor,
	http::{ApiRequest, ApiResponse, ApiTransport, TransportFuture},
};

/// Replays canned responses and remembers every request it saw.
struct ScriptedTransport {
	responses: Mutex<VecDeque<ApiResponse>>,
	seen: Mutex<Vec<ApiRequest>>,
}
impl ScriptedTransport {
	fn new(responses: impl IntoIterator<Item = (u16, &'static str)>) -> Self {
		let responses = responses
			.into_iter()
			.map(|(status, body)| ApiResponse {
				status,
				headers: BTreeMap::new(),
				body: body.as_bytes().to_vec(),
			})
			.collect();

		Self { responses: Mutex::new(responses), seen: Default::default() }
	}
}
impl ApiTransport for ScriptedTransport {
	fn send(&self, request: ApiRequest) -> TransportFuture<'_> {
		self.seen.lock().push(request);

		let next = self.responses.lock().pop_front();

		Box::pin(async move { Ok(next.expect("Scripted transport ran out of responses.")) })
	}
}

fn scripted_gateway(
	transport: Arc<ScriptedTransport>,
	config: GatewayConfig,
) -> RequestGateway<ScriptedTransport> {
	RequestGateway::new(
		Url::parse("https://www.example.com/api/v3").expect("Base URL fixture should parse."),
		test_request_store(),
		RateGovernor::from_limits([(100, 900), (1_000, 86_400)]),
		transport,
		config,
	)
}

#[tokio::test]
async fn fresh_cache_hit_skips_the_network() {
	let server = MockServer::start_async().await;
	let mock = server
		.mock_async(|when, then| {
			when.method(GET).path("/api/v3/athlete").query_param("per_page", "30");
			then.status(200)
				.header("content-type", "application/json")
				.json_body(json!({ "id": 7, "firstname": "Ada" }));
		})
		.await;
	let (gateway, store) = build_test_gateway(&server.url("/api/v3"), RateGovernor::default());
	let first = gateway
		.get("/athlete", [("per_page", json!(30))])
		.await
		.expect("First call should reach the mock API.");
	let second = gateway
		.execute(ApiCall::get("athlete").param("per_page", 30).max_age(Duration::hours(1)))
		.await
		.expect("Second call should be served from the cache.");

	assert_eq!(first, json!({ "id": 7, "firstname": "Ada" }));
	assert_eq!(second, first);
	assert_eq!(gateway.metrics().cache_hits(), 1);
	assert_eq!(store.count(&Filter::new()).expect("Count should run."), 1);

	mock.assert_calls_async(1).await;
}

#[tokio::test]
async fn bypassing_the_cache_records_another_exchange() {
	let server = MockServer::start_async().await;
	let mock = server
		.mock_async(|when, then| {
			when.method(GET).path("/api/v3/athlete");
			then.status(200).json_body(json!({ "id": 7 }));
		})
		.await;
	let (gateway, store) = build_test_gateway(&server.url("/api/v3"), RateGovernor::default());

	for _ in 0..2 {
		gateway
			.execute(ApiCall::get("/athlete").bypass_cache())
			.await
			.expect("Call should reach the mock API.");
	}

	assert_eq!(store.count(&Filter::new()).expect("Count should run."), 2);
	assert_eq!(
		gateway.cached_responses("/athlete", None).expect("History should load."),
		vec![json!({ "id": 7 }), json!({ "id": 7 })]
	);

	mock.assert_calls_async(2).await;
}

#[tokio::test]
async fn bearer_token_and_route_parameters_reach_the_api() {
	let server = MockServer::start_async().await;
	let mock = server
		.mock_async(|when, then| {
			when.method(GET)
				.path("/api/v3/activities/42/streams")
				.query_param("keys", "time,heartrate")
				.header("authorization", "Bearer access-gateway");
			then.status(200).json_body(json!({ "time": [0, 1, 2] }));
		})
		.await;
	let (gateway, _) = build_test_gateway(&server.url("/api/v3"), RateGovernor::default());

	gateway.set_bearer(Some(TokenSecret::new("access-gateway")));

	let call =
		ApiCall::get("/activities/{id}/streams").param("id", 42).param("keys", "time,heartrate");
	let streams = gateway.execute(call).await.expect("Authenticated call should succeed.");

	assert_eq!(streams["time"], json!([0, 1, 2]));

	mock.assert_calls_async(1).await;
}

#[tokio::test]
async fn failed_status_surfaces_body_and_is_recorded() {
	let server = MockServer::start_async().await;
	let mock = server
		.mock_async(|when, then| {
			when.method(GET).path("/api/v3/activities/1");
			then.status(404).body("{\"message\":\"Record Not Found\"}");
		})
		.await;
	let (gateway, store) = build_test_gateway(&server.url("/api/v3"), RateGovernor::default());
	let err = gateway
		.get("/activities/1", Vec::<(String, JsonValue)>::new())
		.await
		.expect_err("404 should fail the call.");

	assert!(matches!(
		&err,
		Error::RequestFailed { status: 404, body } if body.contains("Record Not Found")
	));

	let recorded =
		store.exchanges(&Filter::new(), &Window::default()).expect("Exchanges should load.");

	assert_eq!(recorded.len(), 1);
	assert_eq!(recorded[0].status_code, 404);
	assert!(gateway.cached_responses("/activities/1", None).expect("History.").is_empty());

	mock.assert_calls_async(1).await;
}

#[tokio::test]
async fn bounded_retries_give_up_with_rate_limit_exceeded() {
	let server = MockServer::start_async().await;
	let mock = server
		.mock_async(|when, then| {
			when.method(GET).path("/api/v3/athlete");
			then.status(429).header("retry-after", "0").body("{\"message\":\"Rate Limit\"}");
		})
		.await;
	let store = test_request_store();
	let gateway = RequestGateway::new(
		Url::parse(&server.url("/api/v3")).expect("Mock base URL should parse."),
		store.clone(),
		RateGovernor::default(),
		api_cache::http::ReqwestHttpClient::default(),
		GatewayConfig { max_rate_limit_retries: Some(2), ..Default::default() },
	);
	let err = gateway
		.execute(ApiCall::get("/athlete").rate_limit_delay(Duration::ZERO))
		.await
		.expect_err("Persistent 429s should exhaust the retry budget.");

	assert!(matches!(err, Error::RateLimitExceeded { attempts: 3 }));
	assert_eq!(gateway.metrics().rate_limit_retries(), 2);
	assert_eq!(store.count(&Filter::new()).expect("Count should run."), 3);

	mock.assert_calls_async(3).await;
}

#[tokio::test]
async fn disabled_retries_fail_on_the_first_rate_limit() {
	let transport = Arc::new(ScriptedTransport::new([(429, "{}")]));
	let gateway = scripted_gateway(transport.clone(), GatewayConfig::default());
	let err = gateway
		.execute(ApiCall::get("/athlete").retry_on_rate_limit(false))
		.await
		.expect_err("A 429 without retries should fail.");

	assert!(matches!(err, Error::RateLimitExceeded { attempts: 1 }));
	assert_eq!(transport.seen.lock().len(), 1);
}

#[tokio::test]
async fn rate_limited_call_is_retried_until_it_succeeds() {
	let transport =
		Arc::new(ScriptedTransport::new([(429, "{}"), (429, "{}"), (200, "{\"id\":7}")]));
	let gateway = scripted_gateway(transport.clone(), GatewayConfig::default());
	let payload = gateway
		.execute(ApiCall::get("/athlete").rate_limit_delay(Duration::ZERO))
		.await
		.expect("Third attempt should succeed.");

	assert_eq!(payload, json!({ "id": 7 }));
	assert_eq!(gateway.metrics().rate_limit_retries(), 2);
	assert_eq!(transport.seen.lock().len(), 3);
	assert_eq!(gateway.store().count(&Filter::new()).expect("Count should run."), 3);
}

#[tokio::test]
async fn wait_budget_stops_retries_before_sleeping() {
	let transport = Arc::new(ScriptedTransport::new([(429, "{}")]));
	let gateway = scripted_gateway(
		transport.clone(),
		GatewayConfig { max_rate_limit_wait: Some(Duration::seconds(5)), ..Default::default() },
	);
	// Without an override the governor backs off for a whole window, far beyond the budget.
	let err = gateway
		.execute(ApiCall::get("/athlete"))
		.await
		.expect_err("The wait budget should be exceeded.");

	assert!(matches!(err, Error::RateLimitExceeded { attempts: 1 }));
	assert_eq!(gateway.metrics().rate_limit_retries(), 0);
}

#[tokio::test]
async fn calls_without_caching_leave_the_store_empty() {
	let transport = Arc::new(ScriptedTransport::new([(200, "[1,2]"), (200, "[3]")]));
	let gateway = scripted_gateway(transport.clone(), GatewayConfig::default());

	for _ in 0..2 {
		gateway
			.execute(ApiCall::get("/athlete/activities").use_cache(false))
			.await
			.expect("Uncached call should succeed.");
	}

	assert_eq!(gateway.store().count(&Filter::new()).expect("Count should run."), 0);
	assert_eq!(transport.seen.lock().len(), 2);
}
