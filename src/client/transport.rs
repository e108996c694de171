//! HTTP transport seam.

use std::time::Duration;

use futures::future::{self, BoxFuture};
use reqwest::Method;
use tokio_util::task::AbortOnDropHandle;
use url::Url;

use super::{HttpResponse, RequestBody};
use crate::{Error, Result};

pub type ResponseFuture = BoxFuture<'static, Result<HttpResponse>>;

/// A request with URL, headers and timeout fully resolved.
#[derive(Clone, Debug)]
pub struct TransportRequest {
    pub method: Method,
    pub url: Url,
    pub headers: Vec<(String, String)>,
    pub body: Option<RequestBody>,
    pub timeout: Duration,
}

impl TransportRequest {
    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .rev()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn bearer_token(&self) -> Option<&str> {
        self.header("authorization")?.strip_prefix("Bearer ")
    }
}

/// Sends requests on behalf of [`Client`](super::Client).
///
/// Calling `send` dispatches the request before it returns, so requests go out
/// in call order even when their futures are first polled later. The returned
/// future resolves with the response whatever its status, and dropping it
/// aborts the request. Status handling, cancellation and timeouts are enforced
/// by the client.
pub trait Transport: Send + Sync {
    fn send(&self, request: TransportRequest) -> ResponseFuture;
}

/// `reqwest`-backed transport.
#[derive(Clone, Debug)]
pub struct ReqwestTransport {
    http: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { http })
    }

    pub fn with_client(http: reqwest::Client) -> Self {
        Self { http }
    }

    fn build(&self, request: TransportRequest) -> Result<reqwest::Request> {
        let mut builder = self
            .http
            .request(request.method, request.url)
            .timeout(request.timeout);

        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        builder = match request.body {
            Some(RequestBody::Json(value)) => builder.json(&value),
            Some(RequestBody::Multipart(form)) => builder.multipart(form.to_reqwest()?),
            None => builder,
        };

        builder
            .build()
            .map_err(|e| Error::InvalidRequest(format!("failed to build request: {e}")))
    }
}

fn map_reqwest_error(error: reqwest::Error, timeout: Duration) -> Error {
    if error.is_timeout() {
        Error::Timeout(timeout)
    } else {
        Error::Network(error)
    }
}

async fn execute(
    http: reqwest::Client,
    request: reqwest::Request,
    timeout: Duration,
) -> Result<HttpResponse> {
    let response = http
        .execute(request)
        .await
        .map_err(|e| map_reqwest_error(e, timeout))?;

    let status = response.status();
    let headers = response.headers().clone();
    let body = response
        .bytes()
        .await
        .map_err(|e| map_reqwest_error(e, timeout))?;

    Ok(HttpResponse::new(status, headers, body))
}

impl Transport for ReqwestTransport {
    /// Spawns the exchange onto the runtime. Must be called from within a
    /// Tokio runtime.
    fn send(&self, request: TransportRequest) -> ResponseFuture {
        let timeout = request.timeout;
        let built = match self.build(request) {
            Ok(built) => built,
            Err(e) => return Box::pin(future::ready(Err(e))),
        };

        let handle = AbortOnDropHandle::new(tokio::spawn(execute(
            self.http.clone(),
            built,
            timeout,
        )));

        Box::pin(async move {
            match handle.await {
                Ok(result) => result,
                Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
                Err(_) => Err(Error::Cancelled),
            }
        })
    }
}
