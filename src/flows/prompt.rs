//! How the user is sent to the authorize URL and how the redirect comes back.

// std
use std::process::{Command, Stdio};
// crates.io
use tokio::{
	io::{AsyncReadExt, AsyncWriteExt},
	net::{TcpListener, TcpStream},
};
// self
use crate::{
	_prelude::*,
	error::{ConfigError, TransportError},
	flows::AuthorizationSession,
};

const MAX_REQUEST_BYTES: usize = 16 * 1024;
const SUCCESS_PAGE: &str = "<!DOCTYPE html><html><head><title>Authorization Complete</title></head>\
	<body><h1>Authorization complete</h1><p>You can close this window.</p></body></html>";
const FAILURE_PAGE: &str = "<!DOCTYPE html><html><head><title>Authorization Failed</title></head>\
	<body><h1>Authorization failed</h1><p>Return to the application for details.</p></body></html>";

/// Boxed future returned by [`AuthorizationPrompt::authorize`].
pub type PromptFuture<'a> = Pin<Box<dyn Future<Output = Result<AuthorizationGrant>> + 'a + Send>>;

/// Parameters the provider hands back on the redirect.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthorizationGrant {
	/// Authorization code to exchange.
	pub code: String,
	/// Returned `state`.
	pub state: String,
	/// Scope the user actually granted, if the provider reports it.
	pub scope: Option<String>,
}
impl AuthorizationGrant {
	/// Extracts the grant from a redirect URL.
	///
	/// A provider-reported `error` (for example `access_denied`) or a missing `code` means the
	/// user has to authorize again.
	pub fn from_redirect(url: &Url) -> Result<Self> {
		let params = url.query_pairs().into_owned().collect::<HashMap<_, _>>();

		if let Some(error) = params.get("error") {
			return Err(Error::AuthorizationRequired {
				reason: format!("the provider reported `{error}`"),
			});
		}

		let code = params.get("code").filter(|code| !code.is_empty()).ok_or_else(|| {
			Error::AuthorizationRequired { reason: "the redirect carried no code".into() }
		})?;

		Ok(Self {
			code: code.clone(),
			state: params.get("state").cloned().unwrap_or_default(),
			scope: params.get("scope").cloned(),
		})
	}
}
impl Debug for AuthorizationGrant {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("AuthorizationGrant")
			.field("code", &"<redacted>")
			.field("state", &self.state)
			.field("scope", &self.scope)
			.finish()
	}
}

/// Obtains user consent for an [`AuthorizationSession`].
pub trait AuthorizationPrompt
where
	Self: Send + Sync,
{
	/// Sends the user to `session.authorize_url` and waits for the redirect.
	fn authorize<'a>(&'a self, session: &'a AuthorizationSession) -> PromptFuture<'a>;
}

/// Prompt for headless contexts: authorization always fails with
/// [`Error::AuthorizationRequired`] naming the URL to visit.
#[derive(Clone, Copy, Debug, Default)]
pub struct NonInteractivePrompt;
impl AuthorizationPrompt for NonInteractivePrompt {
	fn authorize<'a>(&'a self, session: &'a AuthorizationSession) -> PromptFuture<'a> {
		Box::pin(async move {
			Err(Error::AuthorizationRequired {
				reason: format!("visit {} to grant access", session.authorize_url),
			})
		})
	}
}

/// Opens the authorize URL in a browser and serves the redirect URI on a short-lived local
/// listener. The listener answers one redirect and is dropped.
#[derive(Clone, Debug)]
pub struct LoopbackPrompt {
	open_browser: bool,
	timeout: Option<Duration>,
}
impl LoopbackPrompt {
	/// Disables (or re-enables) launching the system browser.
	pub fn open_browser(mut self, open: bool) -> Self {
		self.open_browser = open;

		self
	}

	/// Gives up waiting for the redirect after `timeout`.
	pub fn timeout(mut self, timeout: Duration) -> Self {
		self.timeout = Some(timeout);

		self
	}
}
impl Default for LoopbackPrompt {
	fn default() -> Self {
		Self { open_browser: true, timeout: None }
	}
}
impl AuthorizationPrompt for LoopbackPrompt {
	fn authorize<'a>(&'a self, session: &'a AuthorizationSession) -> PromptFuture<'a> {
		Box::pin(async move {
			let address = bind_address(&session.redirect_uri)?;
			let listener = TcpListener::bind(address.as_str()).await.map_err(TransportError::Io)?;

			tracing::info!(%address, "Waiting for the authorization redirect.");

			if self.open_browser {
				open_in_browser(&session.authorize_url);
			}

			let redirect = accept_redirect(&listener, &session.redirect_uri);

			match self.timeout {
				Some(limit) => tokio::time::timeout(limit.unsigned_abs(), redirect)
					.await
					.map_err(|_| Error::AuthorizationRequired {
						reason: "timed out waiting for the authorization redirect".into(),
					})?,
				None => redirect.await,
			}
		})
	}
}

fn bind_address(redirect: &Url) -> Result<String> {
	let host = redirect.host_str().ok_or_else(|| ConfigError::InvalidRedirect {
		reason: format!("{redirect} has no host"),
	})?;
	let port = redirect.port_or_known_default().ok_or_else(|| ConfigError::InvalidRedirect {
		reason: format!("{redirect} has no port"),
	})?;

	Ok(format!("{host}:{port}"))
}

async fn accept_redirect(listener: &TcpListener, redirect: &Url) -> Result<AuthorizationGrant> {
	loop {
		let (mut stream, peer) = listener.accept().await.map_err(TransportError::Io)?;
		let target = match read_request_target(&mut stream).await {
			Ok(Some(target)) => target,
			Ok(None) => {
				respond(&mut stream, "400 Bad Request", FAILURE_PAGE).await;

				continue;
			},
			Err(e) => {
				tracing::debug!(%peer, error = %e, "Dropped a malformed redirect connection.");

				continue;
			},
		};
		let url = match redirect.join(&target) {
			Ok(url) if url.path() == redirect.path() => url,
			_ => {
				respond(&mut stream, "404 Not Found", FAILURE_PAGE).await;

				continue;
			},
		};
		let grant = AuthorizationGrant::from_redirect(&url);
		let page = if grant.is_ok() { SUCCESS_PAGE } else { FAILURE_PAGE };

		respond(&mut stream, "200 OK", page).await;

		return grant;
	}
}

async fn read_request_target(stream: &mut TcpStream) -> std::io::Result<Option<String>> {
	let mut buf = Vec::with_capacity(1024);
	let mut chunk = [0_u8; 1024];

	while !buf.windows(4).any(|window| window == b"\r\n\r\n") && buf.len() < MAX_REQUEST_BYTES {
		let read = stream.read(&mut chunk).await?;

		if read == 0 {
			break;
		}

		buf.extend_from_slice(&chunk[..read]);
	}

	let head = String::from_utf8_lossy(&buf);
	let mut request_line = head.lines().next().unwrap_or_default().split_whitespace();

	match (request_line.next(), request_line.next()) {
		(Some("GET"), Some(target)) => Ok(Some(target.to_owned())),
		_ => Ok(None),
	}
}

async fn respond(stream: &mut TcpStream, status: &str, body: &str) {
	let response = format!(
		"HTTP/1.1 {status}\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\n\
		 Connection: close\r\n\r\n{body}",
		body.len()
	);

	if let Err(e) = stream.write_all(response.as_bytes()).await {
		tracing::debug!(error = %e, "Failed to answer the redirect.");
	}

	let _ = stream.shutdown().await;
}

fn open_in_browser(url: &Url) {
	let mut command = if cfg!(target_os = "macos") {
		Command::new("open")
	} else if cfg!(target_os = "windows") {
		let mut command = Command::new("cmd");

		command.args(["/C", "start", ""]);

		command
	} else {
		Command::new("xdg-open")
	};

	command.arg(url.as_str()).stdin(Stdio::null()).stdout(Stdio::null()).stderr(Stdio::null());

	tokio::task::spawn_blocking(move || {
		if let Err(e) = command.status() {
			tracing::warn!(
				error = %e,
				"Could not launch a browser; open the authorize URL manually."
			);
		}
	});
}
