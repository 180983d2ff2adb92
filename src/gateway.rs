//! Request gateway: cache lookup, authenticated network call, persistence, rate-limit retries.
//!
//! Every call goes through the same sequence. A fresh successful cached exchange short-cuts
//! the network entirely. Otherwise the call is sent with the current bearer token, recorded in
//! the [`RequestStore`], and judged by status: 200 decodes the payload, 429 waits and retries,
//! anything else fails with the status and body.

// std
use std::sync::atomic::{AtomicU64, Ordering};
// crates.io
use reqwest::Method;
// self
use crate::{
	_prelude::*,
	auth::TokenSecret,
	cache::{CacheLookup, NewExchange, OrderBy, RequestStore},
	error::ConfigError,
	flows::CredentialManager,
	governor::{RateDelay, RateGovernor},
	http::{ApiRequest, ApiResponse, ApiTransport, ReqwestHttpClient, query_value},
	obs::{self, FlowKind, FlowOutcome, FlowSpan},
};

/// Shared slot holding the bearer token attached to outgoing calls.
pub type BearerSlot = Arc<RwLock<Option<TokenSecret>>>;

/// Gateway-wide retry policy.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GatewayConfig {
	/// Retry after a 429 unless a call overrides it.
	pub retry_on_rate_limit: bool,
	/// Maximum number of retries per call; unbounded when `None`.
	pub max_rate_limit_retries: Option<u32>,
	/// Maximum total time spent waiting on rate limits per call; unbounded when `None`.
	pub max_rate_limit_wait: Option<Duration>,
}
impl Default for GatewayConfig {
	fn default() -> Self {
		Self { retry_on_rate_limit: true, max_rate_limit_retries: None, max_rate_limit_wait: None }
	}
}

/// One API call, described relative to the gateway's base URL.
#[derive(Clone, Debug)]
pub struct ApiCall {
	/// HTTP method.
	pub method: Method,
	/// Route appended to the base URL; `{name}` placeholders are filled from `params`.
	pub route: String,
	/// Query parameters.
	pub params: BTreeMap<String, JsonValue>,
	/// Extra request headers. These are part of the cache key; the bearer token is not.
	pub headers: BTreeMap<String, String>,
	/// Freshness bound for cache hits. `None` accepts any age; zero bypasses the cache.
	pub max_age: Option<Duration>,
	/// Persist the exchange after the call.
	pub use_cache: bool,
	/// Overrides [`GatewayConfig::retry_on_rate_limit`].
	pub retry_on_rate_limit: Option<bool>,
	/// Fixed wait after a 429 instead of the governor's backoff.
	pub rate_limit_delay: Option<Duration>,
}
impl ApiCall {
	/// Describes a call with default caching and retry behavior.
	pub fn new(method: Method, route: impl Into<String>) -> Self {
		Self {
			method,
			route: route.into(),
			params: BTreeMap::new(),
			headers: BTreeMap::new(),
			max_age: None,
			use_cache: true,
			retry_on_rate_limit: None,
			rate_limit_delay: None,
		}
	}

	/// Shorthand for a `GET` call.
	pub fn get(route: impl Into<String>) -> Self {
		Self::new(Method::GET, route)
	}

	/// Adds one query (or route) parameter.
	pub fn param(mut self, key: impl Into<String>, value: impl Into<JsonValue>) -> Self {
		self.params.insert(key.into(), value.into());

		self
	}

	/// Adds several parameters.
	pub fn params<I, K>(mut self, params: I) -> Self
	where
		I: IntoIterator<Item = (K, JsonValue)>,
		K: Into<String>,
	{
		self.params.extend(params.into_iter().map(|(key, value)| (key.into(), value)));

		self
	}

	/// Adds a request header.
	pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
		self.headers.insert(name.into(), value.into());

		self
	}

	/// Sets the freshness bound for cache hits.
	pub fn max_age(mut self, max_age: Duration) -> Self {
		self.max_age = Some(max_age);

		self
	}

	/// Skips the cache lookup; the response is still recorded unless caching is disabled.
	pub fn bypass_cache(self) -> Self {
		self.max_age(Duration::ZERO)
	}

	/// Enables or disables persisting the exchange.
	pub fn use_cache(mut self, use_cache: bool) -> Self {
		self.use_cache = use_cache;

		self
	}

	/// Enables or disables 429 retries for this call.
	pub fn retry_on_rate_limit(mut self, retry: bool) -> Self {
		self.retry_on_rate_limit = Some(retry);

		self
	}

	/// Waits `delay` after a 429 instead of asking the governor.
	pub fn rate_limit_delay(mut self, delay: Duration) -> Self {
		self.rate_limit_delay = Some(delay.max(Duration::ZERO));

		self
	}

	/// Fills route placeholders and joins the route onto `base`.
	///
	/// Parameters consumed by a placeholder are removed from the query.
	pub fn resolve(&self, base: &Url) -> Result<(Url, BTreeMap<String, JsonValue>)> {
		let mut route = self.route.clone();
		let mut params = self.params.clone();

		params.retain(|key, value| {
			let placeholder = format!("{{{key}}}");

			if route.contains(&placeholder) {
				route = route.replace(&placeholder, &query_value(value));

				false
			} else {
				true
			}
		});

		if route.contains('{') && route.contains('}') {
			return Err(ConfigError::UnresolvedRoute { route }.into());
		}

		let joined =
			format!("{}/{}", base.as_str().trim_end_matches('/'), route.trim_start_matches('/'));
		let url = Url::parse(&joined)
			.map_err(|source| ConfigError::InvalidRoute { route: route.clone(), source })?;

		Ok((url, params))
	}
}

/// Counters describing how calls were served.
#[derive(Debug, Default)]
pub struct GatewayMetrics {
	cache_hits: AtomicU64,
	cache_misses: AtomicU64,
	rate_limit_retries: AtomicU64,
}
impl GatewayMetrics {
	/// Calls answered from the cache.
	pub fn cache_hits(&self) -> u64 {
		self.cache_hits.load(Ordering::Relaxed)
	}

	/// Cache lookups that found nothing fresh.
	pub fn cache_misses(&self) -> u64 {
		self.cache_misses.load(Ordering::Relaxed)
	}

	/// Retries issued after a 429.
	pub fn rate_limit_retries(&self) -> u64 {
		self.rate_limit_retries.load(Ordering::Relaxed)
	}

	fn record(counter: &AtomicU64) {
		counter.fetch_add(1, Ordering::Relaxed);
	}
}

/// Façade over the request cache, the rate governor, and the HTTP transport.
///
/// Calls on one gateway are issued and recorded strictly in call order.
pub struct RequestGateway<T = ReqwestHttpClient>
where
	T: ?Sized + ApiTransport,
{
	base_url: Url,
	store: Arc<RequestStore>,
	governor: RateGovernor,
	transport: Arc<T>,
	config: GatewayConfig,
	bearer: BearerSlot,
	ordering: AsyncMutex<()>,
	metrics: GatewayMetrics,
}
impl<T> RequestGateway<T>
where
	T: ?Sized + ApiTransport,
{
	/// Creates a gateway over `base_url`.
	pub fn new(
		base_url: Url,
		store: Arc<RequestStore>,
		governor: RateGovernor,
		transport: impl Into<Arc<T>>,
		config: GatewayConfig,
	) -> Self {
		Self {
			base_url,
			store,
			governor,
			transport: transport.into(),
			config,
			bearer: Default::default(),
			ordering: AsyncMutex::new(()),
			metrics: Default::default(),
		}
	}

	/// API base URL.
	pub fn base_url(&self) -> &Url {
		&self.base_url
	}

	/// Request store backing the cache.
	pub fn store(&self) -> &Arc<RequestStore> {
		&self.store
	}

	/// Rate governor consulted after a 429.
	pub fn governor(&self) -> &RateGovernor {
		&self.governor
	}

	/// Retry policy.
	pub fn config(&self) -> &GatewayConfig {
		&self.config
	}

	/// Call counters.
	pub fn metrics(&self) -> &GatewayMetrics {
		&self.metrics
	}

	/// Replaces the bearer token attached to subsequent calls.
	pub fn set_bearer(&self, token: Option<TokenSecret>) {
		*self.bearer.write() = token;
	}

	/// Shares the bearer slot, e.g. with a custom token source.
	pub fn bearer_slot(&self) -> BearerSlot {
		Arc::clone(&self.bearer)
	}

	/// Seeds the bearer slot from `manager` and keeps it in sync with future tokens.
	pub fn bind_credentials(&self, manager: &CredentialManager) {
		self.set_bearer(manager.access_token());

		let slot = self.bearer_slot();

		manager.on_token_change(move |credential| {
			*slot.write() = Some(credential.access_token.clone());
		});
	}

	/// Proactive delay the governor recommends before the next call.
	pub fn rate_delay(&self) -> Result<RateDelay> {
		self.governor.delay(&self.store).map_err(Error::from)
	}

	/// `GET route` with the given parameters and default caching.
	pub async fn get<I, K>(&self, route: &str, params: I) -> Result<JsonValue>
	where
		I: IntoIterator<Item = (K, JsonValue)>,
		K: Into<String>,
	{
		self.execute(ApiCall::get(route).params(params)).await
	}

	/// Every successful cached `GET` payload for `route`, oldest first, regardless of params.
	pub fn cached_responses(
		&self,
		route: &str,
		max_age: Option<Duration>,
	) -> Result<Vec<JsonValue>> {
		let (url, _) = ApiCall::get(route).resolve(&self.base_url)?;
		let lookup = CacheLookup::get(url.as_str())
			.max_age(max_age)
			.successful_only()
			.limit(None)
			.order(OrderBy::OLDEST_FIRST);

		Ok(self.store.retrieve(&lookup)?.map(|retrieved| retrieved.into_vec()).unwrap_or_default())
	}

	/// Runs one call: cache lookup, network call, persistence, and rate-limit retries.
	pub async fn execute(&self, call: ApiCall) -> Result<JsonValue> {
		const KIND: FlowKind = FlowKind::Request;

		let _ordered = self.ordering.lock().await;
		let span = FlowSpan::new(KIND, "execute");

		obs::record_flow_outcome(KIND, FlowOutcome::Attempt);

		let result = span.instrument(self.execute_ordered(call)).await;

		obs::record_flow_outcome(KIND, FlowOutcome::of(&result));

		result
	}

	async fn execute_ordered(&self, call: ApiCall) -> Result<JsonValue> {
		let (url, params) = call.resolve(&self.base_url)?;
		let retry = call.retry_on_rate_limit.unwrap_or(self.config.retry_on_rate_limit);
		let mut attempts = 0_u32;
		let mut waited = Duration::ZERO;

		loop {
			if let Some(payload) = self.cached(&call, &url, &params)? {
				return Ok(payload);
			}

			attempts += 1;

			let issued_at = OffsetDateTime::now_utc();
			let response = self.send(&call, &url, &params).await?;

			if call.use_cache {
				self.record(&call, &url, &params, &response, issued_at)?;
			}

			match response.status {
				200 => return response.json(),
				429 => {
					if !retry {
						return Err(Error::RateLimitExceeded { attempts });
					}
					if self.config.max_rate_limit_retries.is_some_and(|max| attempts > max) {
						tracing::warn!(%url, attempts, "Rate-limit retries exhausted.");

						return Err(Error::RateLimitExceeded { attempts });
					}

					let delay = match call.rate_limit_delay {
						Some(delay) => delay,
						None => self.governor.backoff(&self.store)?.delay,
					};

					if self.config.max_rate_limit_wait.is_some_and(|max| waited + delay > max) {
						tracing::warn!(
							%url,
							attempts,
							waited_secs = waited.as_seconds_f64(),
							"Rate-limit wait budget exhausted."
						);

						return Err(Error::RateLimitExceeded { attempts });
					}

					tracing::warn!(
						%url,
						attempts,
						delay_secs = delay.as_seconds_f64(),
						retry_after = ?response.retry_after(),
						"Rate limit exceeded; waiting before retrying."
					);
					GatewayMetrics::record(&self.metrics.rate_limit_retries);
					tokio::time::sleep(delay.unsigned_abs()).await;

					waited += delay;
				},
				status => return Err(Error::RequestFailed { status, body: response.text() }),
			}
		}
	}

	fn cached(
		&self,
		call: &ApiCall,
		url: &Url,
		params: &BTreeMap<String, JsonValue>,
	) -> Result<Option<JsonValue>> {
		if call.max_age == Some(Duration::ZERO) {
			return Ok(None);
		}

		let lookup = CacheLookup::new(call.method.as_str(), url.as_str())
			.params(params)?
			.headers(&call.headers)?
			.max_age(call.max_age)
			.successful_only();

		match self.store.retrieve(&lookup)?.and_then(|retrieved| retrieved.into_first()) {
			Some(payload) => {
				tracing::info!(method = %call.method, %url, "Retrieved cached response.");
				GatewayMetrics::record(&self.metrics.cache_hits);

				Ok(Some(payload))
			},
			None => {
				GatewayMetrics::record(&self.metrics.cache_misses);

				Ok(None)
			},
		}
	}

	async fn send(
		&self,
		call: &ApiCall,
		url: &Url,
		params: &BTreeMap<String, JsonValue>,
	) -> Result<ApiResponse> {
		let request = ApiRequest {
			method: call.method.clone(),
			url: url.clone(),
			params: params.clone(),
			headers: call.headers.clone(),
			bearer: self.bearer.read().clone(),
		};

		tracing::info!(method = %call.method, %url, "Sending request.");

		let response = self.transport.send(request).await?;

		tracing::debug!(
			status = response.status,
			bytes = response.body.len(),
			"Received response."
		);

		Ok(response)
	}

	fn record(
		&self,
		call: &ApiCall,
		url: &Url,
		params: &BTreeMap<String, JsonValue>,
		response: &ApiResponse,
		issued_at: OffsetDateTime,
	) -> Result<()> {
		let exchange = NewExchange::new(call.method.as_str(), url.as_str(), response.status)
			.with_params(params)?
			.with_headers(&call.headers)?
			.body(response.text())
			.response_headers(response.headers_json())
			.issued_at(issued_at);
		let id = self.store.insert(&exchange)?;

		tracing::debug!(?id, status = response.status, "Recorded exchange.");

		Ok(())
	}
}
impl<T> Debug for RequestGateway<T>
where
	T: ?Sized + ApiTransport,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("RequestGateway")
			.field("base_url", &self.base_url.as_str())
			.field("store", &self.store)
			.field("governor", &self.governor)
			.field("config", &self.config)
			.field("bearer_set", &self.bearer.read().is_some())
			.finish()
	}
}
