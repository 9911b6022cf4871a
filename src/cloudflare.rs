use std::{fmt, sync::Arc};

use reqwest::{
    header::{HeaderMap, HeaderValue, AUTHORIZATION},
    Method,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::{
    access::AccessService,
    envelope::{format_api_errors, Envelope},
    pipeline::{encode_json, Payload, Pipeline, Provider, RequestOptions},
    retry::{JitterSource, Sleeper},
    transport::Transport,
    ClientOptions, PlatformError, Result,
};

/// Public Cloudflare API v4 endpoint.
pub const DEFAULT_BASE_URL: &str = "https://api.cloudflare.com/client/v4";

const TOKEN_ENV: &str = "CLOUDFLARE_API_TOKEN";
const OPTIONS_ENV_PREFIX: &str = "CLOUDFLARE";
const PROVIDER: &str = "cloudflare";

/// A Cloudflare DNS zone.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Zone {
    pub id: String,
    pub name: String,
}

/// Bearer-token auth and envelope unwrapping for the Cloudflare API.
#[derive(Clone)]
pub struct CloudflareApi {
    authorization: HeaderValue,
}

impl fmt::Debug for CloudflareApi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CloudflareApi")
            .field("authorization", &"<redacted>")
            .finish()
    }
}

impl CloudflareApi {
    fn new(token: &str) -> Result<Self> {
        let token = token.trim();
        if token.is_empty() {
            return Err(PlatformError::Config(
                "cloudflare API token must be provided".to_owned(),
            ));
        }

        let mut authorization = HeaderValue::from_str(&format!("Bearer {token}")).map_err(|_| {
            PlatformError::Config("cloudflare API token contains invalid characters".to_owned())
        })?;
        authorization.set_sensitive(true);
        Ok(Self { authorization })
    }
}

impl Provider for CloudflareApi {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    fn authorize(&self, headers: &mut HeaderMap) {
        headers.insert(AUTHORIZATION, self.authorization.clone());
    }

    fn unwrap_payload(&self, body: &[u8]) -> Result<Payload> {
        let envelope: Envelope = serde_json::from_slice(body)
            .map_err(|err| PlatformError::Decode(format!("decode cloudflare envelope: {err}")))?;

        if !envelope.success {
            return Err(PlatformError::Api {
                provider: PROVIDER,
                message: format_api_errors(&envelope.errors),
                errors: envelope.errors,
            });
        }

        Ok(Payload {
            result: envelope.result,
            result_info: envelope.result_info,
        })
    }
}

/// Retry-aware Cloudflare API client.
///
/// Cheap to clone; clones share the underlying connection pool.
#[derive(Clone, Debug)]
pub struct CloudflareClient {
    pipeline: Pipeline<CloudflareApi>,
}

impl CloudflareClient {
    /// Creates a client against the public API endpoint.
    pub fn new(token: impl AsRef<str>, options: ClientOptions) -> Result<Self> {
        Self::with_base_url(DEFAULT_BASE_URL, token, options)
    }

    /// Creates a client against a custom API base URL.
    pub fn with_base_url(
        base_url: impl AsRef<str>,
        token: impl AsRef<str>,
        options: ClientOptions,
    ) -> Result<Self> {
        let api = CloudflareApi::new(token.as_ref())?;
        let pipeline = Pipeline::new(api, base_url.as_ref(), &options)?;
        Ok(Self { pipeline })
    }

    /// Creates a client from environment variables.
    ///
    /// Reads `CLOUDFLARE_API_TOKEN` (required) and the `CLOUDFLARE_HTTP_*`
    /// options described in [`ClientOptions::from_lookup`].
    pub fn from_env() -> Result<Self> {
        let token = std::env::var(TOKEN_ENV).unwrap_or_default();
        if token.trim().is_empty() {
            return Err(PlatformError::Config(format!("{TOKEN_ENV} is required")));
        }
        Self::new(token, ClientOptions::from_env(OPTIONS_ENV_PREFIX))
    }

    /// Replaces the HTTP transport.
    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.pipeline = self.pipeline.with_transport(transport);
        self
    }

    /// Replaces the backoff sleep primitive.
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.pipeline = self.pipeline.with_sleeper(sleeper);
        self
    }

    /// Replaces the jitter sample source.
    pub fn with_jitter_source(mut self, jitter: Arc<dyn JitterSource>) -> Self {
        self.pipeline = self.pipeline.with_jitter_source(jitter);
        self
    }

    pub fn pipeline(&self) -> &Pipeline<CloudflareApi> {
        &self.pipeline
    }

    /// Access / Zero Trust operations.
    pub fn access(&self) -> AccessService<'_> {
        AccessService::new(self)
    }

    /// Executes an API request and decodes the envelope `result` into `T`.
    ///
    /// `Ok(None)` means the envelope carried a null or missing result.
    pub async fn request<B, T>(
        &self,
        method: Method,
        endpoint: &str,
        query: &[(&str, &str)],
        body: Option<&B>,
        opts: &RequestOptions,
    ) -> Result<Option<T>>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let body = body.map(encode_json).transpose()?;
        self.pipeline
            .execute(method, endpoint, query, body, opts)
            .await
    }

    /// Executes a GET request.
    pub async fn get<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        query: &[(&str, &str)],
        opts: &RequestOptions,
    ) -> Result<Option<T>> {
        self.pipeline
            .execute(Method::GET, endpoint, query, None, opts)
            .await
    }

    /// Collects every page of a list endpoint.
    pub async fn list<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        query: &[(&str, &str)],
        opts: &RequestOptions,
    ) -> Result<Vec<T>> {
        self.pipeline.execute_paginated(endpoint, query, opts).await
    }

    /// Lists zones visible to the token, following pagination.
    pub async fn list_zones(&self) -> Result<Vec<Zone>> {
        self.list("/zones", &[], &RequestOptions::default()).await
    }

    /// Resolves a zone name to its zone ID.
    ///
    /// Fails with [`PlatformError::NotFound`] when no zone matches.
    pub async fn zone_id_by_name(&self, zone_name: &str) -> Result<String> {
        let zone_name = zone_name.trim();
        if zone_name.is_empty() {
            return Err(PlatformError::Validation(
                "zone name must not be empty".to_owned(),
            ));
        }

        let zones: Vec<Zone> = self
            .get("/zones", &[("name", zone_name)], &RequestOptions::default())
            .await?
            .unwrap_or_default();

        zones
            .into_iter()
            .next()
            .map(|zone| zone.id)
            .ok_or_else(|| PlatformError::NotFound {
                resource: "cloudflare zone",
                name: zone_name.to_owned(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::{CloudflareApi, CloudflareClient};
    use crate::{pipeline::Provider, ClientOptions, PlatformError};

    #[test]
    fn empty_token_fails_at_construction() {
        let err = CloudflareClient::new("  ", ClientOptions::default()).expect_err("must fail");
        assert!(matches!(err, PlatformError::Config(_)));
    }

    #[test]
    fn invalid_base_url_fails_at_construction() {
        let err = CloudflareClient::with_base_url("::", "token", ClientOptions::default())
            .expect_err("must fail");
        assert!(matches!(err, PlatformError::Config(_)));
    }

    #[test]
    fn debug_redacts_token() {
        let client = CloudflareClient::new("secret-token", ClientOptions::default())
            .expect("client must build");
        let debug = format!("{client:?}");
        assert!(!debug.contains("secret-token"));
    }

    #[test]
    fn unsuccessful_envelope_becomes_api_error() {
        let api = CloudflareApi::new("token").expect("valid token");
        let err = api
            .unwrap_payload(br#"{"success":false,"errors":[{"code":1003,"message":"bad zone"}]}"#)
            .expect_err("must fail");
        match err {
            PlatformError::Api {
                message, errors, ..
            } => {
                assert_eq!(message, "1003:bad zone");
                assert_eq!(errors.len(), 1);
            }
            other => panic!("expected api error, got {other:?}"),
        }

        let err = api
            .unwrap_payload(br#"{"success":false,"errors":[]}"#)
            .expect_err("must fail");
        assert!(err.to_string().contains("unknown API error"));
    }

    #[test]
    fn malformed_envelope_is_decode_error() {
        let api = CloudflareApi::new("token").expect("valid token");
        let err = api.unwrap_payload(b"<html>").expect_err("must fail");
        assert!(matches!(err, PlatformError::Decode(_)));
    }
}
