//! Transport primitives for API calls and token exchanges.
//!
//! [`ApiTransport`] is the gateway's only dependency on an HTTP stack: it takes an
//! [`ApiRequest`] and yields the raw status, headers, and body of the response. The default
//! [`ReqwestHttpClient`] also hands out [`InstrumentedHandle`]s implementing `oauth2`'s
//! [`AsyncHttpClient`] so token exchanges can record the HTTP status they saw before the
//! `oauth2` crate turns the response into an error.

// std
use std::ops::Deref;
// crates.io
use oauth2::{AsyncHttpClient, HttpClientError, HttpRequest, HttpResponse};
use reqwest::{
	Method,
	header::{HeaderMap, RETRY_AFTER},
};
use time::format_description::well_known::Rfc2822;
// self
use crate::{_prelude::*, auth::TokenSecret, error::TransportError};

/// Boxed future returned by [`ApiTransport::send`].
pub type TransportFuture<'a> = Pin<Box<dyn Future<Output = Result<ApiResponse>> + 'a + Send>>;

/// HTTP transport used by the request gateway.
pub trait ApiTransport
where
	Self: 'static + Send + Sync,
{
	/// Performs one HTTP exchange. Non-2xx statuses are responses, not errors.
	fn send(&self, request: ApiRequest) -> TransportFuture<'_>;
}

/// One outgoing API call.
#[derive(Clone, Debug)]
pub struct ApiRequest {
	/// HTTP method.
	pub method: Method,
	/// Absolute URL without query parameters.
	pub url: Url,
	/// Query parameters.
	pub params: BTreeMap<String, JsonValue>,
	/// Extra request headers.
	pub headers: BTreeMap<String, String>,
	/// Bearer token attached as `Authorization`.
	pub bearer: Option<TokenSecret>,
}
impl ApiRequest {
	/// Builds a request with no parameters, headers, or bearer token.
	pub fn new(method: Method, url: Url) -> Self {
		Self { method, url, params: BTreeMap::new(), headers: BTreeMap::new(), bearer: None }
	}

	/// Query parameters rendered as strings.
	pub fn query_pairs(&self) -> Vec<(String, String)> {
		self.params.iter().map(|(key, value)| (key.clone(), query_value(value))).collect()
	}
}

/// Raw response returned by an [`ApiTransport`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ApiResponse {
	/// HTTP status code.
	pub status: u16,
	/// Response headers; repeated headers are joined with `, `.
	pub headers: BTreeMap<String, String>,
	/// Response body.
	pub body: Vec<u8>,
}
impl ApiResponse {
	/// Body decoded as UTF-8, replacing invalid sequences.
	pub fn text(&self) -> String {
		String::from_utf8_lossy(&self.body).into_owned()
	}

	/// Body decoded as JSON.
	pub fn json(&self) -> Result<JsonValue> {
		serde_json::from_slice(&self.body).map_err(Error::Decode)
	}

	/// Headers as a JSON object.
	pub fn headers_json(&self) -> JsonValue {
		JsonValue::Object(
			self.headers
				.iter()
				.map(|(name, value)| (name.clone(), JsonValue::String(value.clone())))
				.collect(),
		)
	}

	/// `Retry-After` hint, when the server sent one.
	pub fn retry_after(&self) -> Option<Duration> {
		self.headers.get(RETRY_AFTER.as_str()).map(String::as_str).and_then(parse_retry_after)
	}
}

/// Thin wrapper around [`ReqwestClient`] so shared HTTP behavior lives in one place.
/// Token requests should not follow redirects; configure any custom client accordingly.
#[derive(Clone, Debug, Default)]
pub struct ReqwestHttpClient(pub ReqwestClient);
impl ReqwestHttpClient {
	/// Wraps an existing reqwest [`ReqwestClient`].
	pub fn with_client(client: ReqwestClient) -> Self {
		Self(client)
	}

	/// Builds a token-exchange handle that records response metadata in `slot`.
	pub(crate) fn instrumented(&self, slot: ResponseMetadataSlot) -> InstrumentedHandle {
		InstrumentedHandle(Arc::new(InstrumentedHttpClient { client: self.0.clone(), slot }))
	}
}
impl AsRef<ReqwestClient> for ReqwestHttpClient {
	fn as_ref(&self) -> &ReqwestClient {
		&self.0
	}
}
impl Deref for ReqwestHttpClient {
	type Target = ReqwestClient;

	fn deref(&self) -> &Self::Target {
		&self.0
	}
}
impl ApiTransport for ReqwestHttpClient {
	fn send(&self, request: ApiRequest) -> TransportFuture<'_> {
		Box::pin(async move {
			let target = request.url.to_string();
			let mut builder = self
				.0
				.request(request.method.clone(), request.url.clone())
				.query(&request.query_pairs());

			for (name, value) in &request.headers {
				builder = builder.header(name.as_str(), value.as_str());
			}
			if let Some(bearer) = &request.bearer {
				builder = builder.bearer_auth(bearer.expose());
			}

			let response = builder.send().await.map_err(|e| map_reqwest_error(&target, e))?;
			let status = response.status().as_u16();
			let headers = flatten_headers(response.headers());
			let body =
				response.bytes().await.map_err(|e| map_reqwest_error(&target, e))?.to_vec();

			Ok(ApiResponse { status, headers, body })
		})
	}
}

/// Metadata captured from the most recent token-endpoint response.
#[derive(Clone, Debug, Default)]
pub struct ResponseMetadata {
	/// HTTP status code, if a response arrived.
	pub status: Option<u16>,
	/// Retry-After hint expressed as a relative duration.
	pub retry_after: Option<Duration>,
}

/// Shared slot the instrumented handle writes into and the token client reads back.
#[derive(Clone, Debug, Default)]
pub struct ResponseMetadataSlot(Arc<Mutex<Option<ResponseMetadata>>>);
impl ResponseMetadataSlot {
	/// Stores new metadata for the current request.
	pub fn store(&self, meta: ResponseMetadata) {
		*self.0.lock() = Some(meta);
	}

	/// Returns the captured metadata, consuming it from the slot.
	pub fn take(&self) -> Option<ResponseMetadata> {
		self.0.lock().take()
	}
}

pub(crate) struct InstrumentedHttpClient {
	client: ReqwestClient,
	slot: ResponseMetadataSlot,
}

/// [`AsyncHttpClient`] adapter for token exchanges over reqwest.
#[derive(Clone)]
pub struct InstrumentedHandle(Arc<InstrumentedHttpClient>);
impl<'c> AsyncHttpClient<'c> for InstrumentedHandle {
	type Error = HttpClientError<ReqwestError>;
	type Future =
		Pin<Box<dyn Future<Output = Result<HttpResponse, Self::Error>> + 'c + Send + Sync>>;

	fn call(&'c self, request: HttpRequest) -> Self::Future {
		let client = Arc::clone(&self.0);

		Box::pin(async move {
			client.slot.take();

			let response = client
				.client
				.execute(request.try_into().map_err(Box::new)?)
				.await
				.map_err(Box::new)?;
			let status = response.status();
			let headers = response.headers().to_owned();
			let retry_after = headers
				.get(RETRY_AFTER)
				.and_then(|value| value.to_str().ok())
				.and_then(parse_retry_after);

			client.slot.store(ResponseMetadata { status: Some(status.as_u16()), retry_after });

			let mut converted =
				HttpResponse::new(response.bytes().await.map_err(Box::new)?.to_vec());

			*converted.status_mut() = status;
			*converted.headers_mut() = headers;

			Ok(converted)
		})
	}
}

fn map_reqwest_error(target: &str, err: ReqwestError) -> Error {
	if err.is_builder() {
		return crate::error::ConfigError::from(err).into();
	}

	TransportError::network(target, err).into()
}

fn flatten_headers(headers: &HeaderMap) -> BTreeMap<String, String> {
	let mut flat = BTreeMap::<String, String>::new();

	for (name, value) in headers {
		let value = String::from_utf8_lossy(value.as_bytes()).into_owned();

		flat.entry(name.as_str().to_owned())
			.and_modify(|existing| {
				existing.push_str(", ");
				existing.push_str(&value);
			})
			.or_insert(value);
	}

	flat
}

pub(crate) fn query_value(value: &JsonValue) -> String {
	match value {
		JsonValue::String(text) => text.clone(),
		JsonValue::Null => String::new(),
		other => other.to_string(),
	}
}

fn parse_retry_after(raw: &str) -> Option<Duration> {
	let raw = raw.trim();

	if let Ok(secs) = raw.parse::<u32>() {
		return Some(Duration::seconds(i64::from(secs)));
	}
	if let Ok(moment) = OffsetDateTime::parse(raw, &Rfc2822) {
		let delta = moment - OffsetDateTime::now_utc();

		if delta.is_positive() {
			return Some(delta);
		}
	}

	None
}
