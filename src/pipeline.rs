//! The single request/response path every provider client goes through.
//!
//! One call serializes its body once, then per attempt builds a fresh
//! request, executes it on the [`Transport`], classifies the outcome and
//! either retries, fails, or hands the body to the [`Provider`] for
//! unwrapping.

use std::{
    fmt,
    sync::Arc,
    time::{Duration, SystemTime},
};

use bytes::Bytes;
use reqwest::{
    header::{HeaderMap, HeaderValue, CONTENT_TYPE, RETRY_AFTER},
    Method, Url,
};
use serde::{de::DeserializeOwned, Serialize};
use tokio_util::sync::CancellationToken;

use crate::{
    envelope::ResultInfo,
    error::is_retryable_status_code,
    retry::{JitterSource, Retrier, Sleeper},
    transport::{HttpRequest, HttpResponse, ReqwestTransport, Transport},
    ClientOptions, PlatformError, Result,
};

/// Unwrapped success body: the result payload plus optional pagination data.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Payload {
    /// `None` when the provider returned no result or an explicit `null`.
    pub result: Option<serde_json::Value>,
    pub result_info: Option<ResultInfo>,
}

/// Provider-specific capabilities plugged into a [`Pipeline`].
pub trait Provider: Send + Sync {
    /// Short name used in error messages and log events.
    fn name(&self) -> &'static str;

    /// Adds authentication headers to an outgoing request.
    fn authorize(&self, headers: &mut HeaderMap);

    /// Turns a 2xx response body into a [`Payload`], failing on
    /// provider-level logical errors.
    fn unwrap_payload(&self, body: &[u8]) -> Result<Payload>;
}

/// Per-call knobs.
#[derive(Clone, Debug, Default)]
pub struct RequestOptions {
    retry_unsafe_methods: bool,
    cancel: CancellationToken,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allows retrying non-idempotent methods (POST, PUT, PATCH, DELETE).
    ///
    /// Applies to both transport failures and retryable status codes.
    pub fn retry_unsafe_methods(mut self) -> Self {
        self.retry_unsafe_methods = true;
        self
    }

    /// Ties the call to `cancel`; firing it aborts the in-flight request or
    /// backoff wait with [`PlatformError::Cancelled`].
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn retries_unsafe_methods(&self) -> bool {
        self.retry_unsafe_methods
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }
}

/// Retry-aware request executor shared by all provider clients.
#[derive(Clone)]
pub struct Pipeline<P> {
    provider: P,
    base_url: Url,
    timeout: Duration,
    transport: Arc<dyn Transport>,
    retrier: Retrier,
}

impl<P: Provider> fmt::Debug for Pipeline<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("provider", &self.provider.name())
            .field("base_url", &self.base_url.as_str())
            .field("timeout", &self.timeout)
            .field("retrier", &self.retrier)
            .finish_non_exhaustive()
    }
}

impl<P: Provider> Pipeline<P> {
    /// Creates a pipeline with the default `reqwest` transport.
    pub fn new(provider: P, base_url: &str, options: &ClientOptions) -> Result<Self> {
        let base_url = parse_base_url(base_url)?;
        let timeout = options.timeout();
        Ok(Self {
            provider,
            base_url,
            timeout,
            transport: Arc::new(ReqwestTransport::new(timeout)?),
            retrier: Retrier::new(options.retry_policy()),
        })
    }

    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = transport;
        self
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.retrier = self.retrier.with_sleeper(sleeper);
        self
    }

    pub fn with_jitter_source(mut self, jitter: Arc<dyn JitterSource>) -> Self {
        self.retrier = self.retrier.with_jitter_source(jitter);
        self
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn retrier(&self) -> &Retrier {
        &self.retrier
    }

    /// Joins `path` onto the base URL and appends `query`.
    pub fn url(&self, path: &str, query: &[(&str, &str)]) -> Url {
        let mut url = self.base_url.clone();
        let joined = format!(
            "{}/{}",
            self.base_url.path().trim_end_matches('/'),
            path.trim_start_matches('/')
        );
        url.set_path(&joined);
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }
        url
    }

    /// Executes one logical call and decodes its result into `T`.
    ///
    /// Returns `Ok(None)` when the call succeeded without a result payload.
    pub async fn execute<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<Bytes>,
        opts: &RequestOptions,
    ) -> Result<Option<T>> {
        let payload = self.fetch(method, path, query, body, opts).await?;
        payload
            .result
            .map(|result| self.decode_result(result))
            .transpose()
    }

    /// Fetches every page of a list endpoint, in page order.
    ///
    /// The first request carries the caller's query unchanged. While
    /// `result_info` reports more pages, the next page is requested with its
    /// `page` query parameter replaced. A response without pagination
    /// metadata ends the walk.
    pub async fn execute_paginated<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
        opts: &RequestOptions,
    ) -> Result<Vec<T>> {
        let mut items = Vec::new();
        let mut requested = query
            .iter()
            .find(|(key, _)| *key == "page")
            .and_then(|(_, value)| value.trim().parse::<u32>().ok())
            .unwrap_or(1);
        let mut next_page: Option<String> = None;

        loop {
            let payload = {
                let params: Vec<(&str, &str)> = match next_page.as_deref() {
                    None => query.to_vec(),
                    Some(page) => query
                        .iter()
                        .copied()
                        .filter(|(key, _)| *key != "page")
                        .chain(std::iter::once(("page", page)))
                        .collect(),
                };
                self.fetch(Method::GET, path, &params, None, opts).await?
            };
            if let Some(result) = payload.result {
                let batch: Vec<T> = self.decode_result(result)?;
                items.extend(batch);
            }

            let Some(info) = payload.result_info else {
                return Ok(items);
            };
            // A server that does not advance `page` must not stall the walk.
            let current = info.page.max(requested);
            if info.total_pages <= current {
                return Ok(items);
            }

            #[cfg(feature = "tracing")]
            tracing::debug!(
                provider = self.provider.name(),
                path,
                page = current + 1,
                total_pages = info.total_pages,
                "fetching next page"
            );
            requested = current + 1;
            next_page = Some(requested.to_string());
        }
    }

    /// Executes one logical call and returns the unwrapped payload without
    /// decoding the result.
    pub async fn fetch(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<Bytes>,
        opts: &RequestOptions,
    ) -> Result<Payload> {
        let response = self.send(method, path, query, body, opts).await?;
        self.provider.unwrap_payload(&response.body)
    }

    /// Runs the attempt loop and returns the first 2xx response.
    ///
    /// The same body bytes are reused for every attempt. Transport failures
    /// and 408/429/5xx responses are retried when the method is idempotent or
    /// `opts` opted into unsafe retries; any other non-2xx status fails
    /// immediately with [`PlatformError::Status`].
    pub async fn send(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<Bytes>,
        opts: &RequestOptions,
    ) -> Result<HttpResponse> {
        let url = self.url(path, query);
        let cancel = opts.cancellation();
        let retry_allowed = opts.retries_unsafe_methods() || is_idempotent(&method);
        let max_retries = self.retrier.max_retries();
        let mut attempt = 0u32;

        loop {
            if cancel.is_cancelled() {
                return Err(PlatformError::Cancelled);
            }

            let request = self.build_request(&method, &url, body.as_ref());
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(PlatformError::Cancelled),
                outcome = self.transport.send(request) => outcome,
            };
            let can_retry = retry_allowed && attempt < max_retries;

            let delay = match outcome {
                Err(source) => {
                    if !can_retry {
                        #[cfg(feature = "tracing")]
                        if retry_allowed {
                            tracing::warn!(
                                provider = self.provider.name(),
                                %method,
                                attempts = attempt + 1,
                                error = %source,
                                "retry budget exhausted"
                            );
                        }
                        return Err(PlatformError::Transport {
                            provider: self.provider.name(),
                            source,
                        });
                    }

                    let delay = self.retrier.backoff(attempt);
                    #[cfg(feature = "tracing")]
                    tracing::debug!(
                        provider = self.provider.name(),
                        %method,
                        attempt,
                        ?delay,
                        error = %source,
                        "transport failure, retrying"
                    );
                    delay
                }
                Ok(response) if response.status.is_success() => return Ok(response),
                Ok(response) => {
                    let status = response.status.as_u16();
                    if !(can_retry && is_retryable_status_code(status)) {
                        #[cfg(feature = "tracing")]
                        if retry_allowed && is_retryable_status_code(status) {
                            tracing::warn!(
                                provider = self.provider.name(),
                                %method,
                                attempts = attempt + 1,
                                status,
                                "retry budget exhausted"
                            );
                        }
                        return Err(PlatformError::Status {
                            provider: self.provider.name(),
                            status,
                            body: response.text(),
                        });
                    }

                    let delay = retry_after(&response.headers, SystemTime::now())
                        .unwrap_or_else(|| self.retrier.backoff(attempt));
                    #[cfg(feature = "tracing")]
                    tracing::debug!(
                        provider = self.provider.name(),
                        %method,
                        attempt,
                        status,
                        ?delay,
                        "retryable status, retrying"
                    );
                    delay
                }
            };

            self.retrier.sleep(cancel, delay).await?;
            attempt += 1;
        }
    }

    fn build_request(&self, method: &Method, url: &Url, body: Option<&Bytes>) -> HttpRequest {
        let mut headers = HeaderMap::new();
        self.provider.authorize(&mut headers);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        HttpRequest {
            method: method.clone(),
            url: url.clone(),
            headers,
            body: body.cloned(),
            timeout: self.timeout,
        }
    }

    fn decode_result<T: DeserializeOwned>(&self, result: serde_json::Value) -> Result<T> {
        serde_json::from_value(result).map_err(|err| {
            PlatformError::Decode(format!("decode {} result: {err}", self.provider.name()))
        })
    }
}

/// Serializes a request body once so every attempt sends identical bytes.
pub fn encode_json<B: Serialize + ?Sized>(body: &B) -> Result<Bytes> {
    serde_json::to_vec(body)
        .map(Bytes::from)
        .map_err(|err| PlatformError::Encode(format!("marshal request body: {err}")))
}

/// Methods whose retry is safe without an explicit opt-in.
pub fn is_idempotent(method: &Method) -> bool {
    matches!(
        *method,
        Method::GET | Method::HEAD | Method::OPTIONS | Method::TRACE
    )
}

/// Parses a `Retry-After` value given as delta-seconds or an HTTP date.
///
/// Non-positive seconds and dates in the past mean "retry now"; an
/// unparseable value yields `None`.
pub fn parse_retry_after(value: &str, now: SystemTime) -> Option<Duration> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(seconds) = trimmed.parse::<i64>() {
        return Some(if seconds <= 0 {
            Duration::ZERO
        } else {
            Duration::from_secs(seconds.unsigned_abs())
        });
    }

    let at = httpdate::parse_http_date(trimmed).ok()?;
    Some(at.duration_since(now).unwrap_or(Duration::ZERO))
}

fn retry_after(headers: &HeaderMap, now: SystemTime) -> Option<Duration> {
    let value = headers.get(RETRY_AFTER)?.to_str().ok()?;
    parse_retry_after(value, now)
}

fn parse_base_url(base_url: &str) -> Result<Url> {
    let trimmed = base_url.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(PlatformError::Config("base URL must not be empty".to_owned()));
    }

    let url = Url::parse(trimmed)
        .map_err(|err| PlatformError::Config(format!("invalid base URL {trimmed:?}: {err}")))?;
    if url.cannot_be_a_base() {
        return Err(PlatformError::Config(format!(
            "invalid base URL {trimmed:?}: not a hierarchical URL"
        )));
    }
    Ok(url)
}
