use std::{fmt, sync::Arc};

use reqwest::{
    header::{HeaderMap, HeaderName, HeaderValue},
    Method,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{
    pipeline::{encode_json, Payload, Pipeline, Provider, RequestOptions},
    retry::{JitterSource, Sleeper},
    transport::Transport,
    ClientOptions, PlatformError, Result,
};

const ADDR_ENV: &str = "VAULT_ADDR";
const TOKEN_ENV: &str = "VAULT_TOKEN";
const OPTIONS_ENV_PREFIX: &str = "VAULT";
const PROVIDER: &str = "vault";

const VAULT_TOKEN_HEADER: HeaderName = HeaderName::from_static("x-vault-token");

/// Secret fields stored under one KV v2 path.
pub type SecretData = Map<String, Value>;

#[derive(Serialize)]
struct WriteRequest<'a, B: ?Sized> {
    data: &'a B,
}

#[derive(Deserialize)]
struct ReadResponse {
    #[serde(default)]
    data: Option<ReadData>,
}

#[derive(Deserialize)]
struct ReadData {
    #[serde(default)]
    data: Option<SecretData>,
}

/// `X-Vault-Token` auth over raw JSON bodies.
#[derive(Clone)]
pub struct VaultApi {
    token: HeaderValue,
}

impl fmt::Debug for VaultApi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VaultApi")
            .field("token", &"<redacted>")
            .finish()
    }
}

impl Provider for VaultApi {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    fn authorize(&self, headers: &mut HeaderMap) {
        headers.insert(VAULT_TOKEN_HEADER, self.token.clone());
    }

    fn unwrap_payload(&self, body: &[u8]) -> Result<Payload> {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Payload::default());
        }

        let value: Value = serde_json::from_slice(body)
            .map_err(|err| PlatformError::Decode(format!("decode vault response: {err}")))?;
        Ok(Payload {
            result: (!value.is_null()).then_some(value),
            result_info: None,
        })
    }
}

/// Vault KV v2 client.
#[derive(Clone, Debug)]
pub struct VaultClient {
    pipeline: Pipeline<VaultApi>,
}

impl VaultClient {
    pub fn new(
        address: impl AsRef<str>,
        token: impl AsRef<str>,
        options: ClientOptions,
    ) -> Result<Self> {
        let address = address.as_ref().trim();
        if address.is_empty() {
            return Err(PlatformError::Config(format!("{ADDR_ENV} is required")));
        }
        let token = token.as_ref().trim();
        if token.is_empty() {
            return Err(PlatformError::Config(format!("{TOKEN_ENV} is required")));
        }

        let mut token = HeaderValue::from_str(token).map_err(|_| {
            PlatformError::Config(format!("{TOKEN_ENV} contains invalid characters"))
        })?;
        token.set_sensitive(true);

        let pipeline = Pipeline::new(VaultApi { token }, address, &options)?;
        Ok(Self { pipeline })
    }

    /// Creates a client from `VAULT_ADDR`, `VAULT_TOKEN` and the
    /// `VAULT_HTTP_*` options.
    pub fn from_env() -> Result<Self> {
        let address = std::env::var(ADDR_ENV).unwrap_or_default();
        let token = std::env::var(TOKEN_ENV).unwrap_or_default();
        Self::new(address, token, ClientOptions::from_env(OPTIONS_ENV_PREFIX))
    }

    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.pipeline = self.pipeline.with_transport(transport);
        self
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.pipeline = self.pipeline.with_sleeper(sleeper);
        self
    }

    pub fn with_jitter_source(mut self, jitter: Arc<dyn JitterSource>) -> Self {
        self.pipeline = self.pipeline.with_jitter_source(jitter);
        self
    }

    pub fn pipeline(&self) -> &Pipeline<VaultApi> {
        &self.pipeline
    }

    /// Writes `data` to `{mount}/data/{path}`.
    pub async fn write_kv2<B>(
        &self,
        mount: &str,
        path: &str,
        data: &B,
        opts: &RequestOptions,
    ) -> Result<()>
    where
        B: Serialize + ?Sized,
    {
        let endpoint = kv2_endpoint(mount, path)?;
        let body = encode_json(&WriteRequest { data })?;
        self.pipeline
            .send(Method::POST, &endpoint, &[], Some(body), opts)
            .await?;
        Ok(())
    }

    /// Reads the latest version of the secret at `{mount}/data/{path}`.
    ///
    /// Fails with [`PlatformError::NotFound`] when the path holds no secret.
    pub async fn read_kv2(
        &self,
        mount: &str,
        path: &str,
        opts: &RequestOptions,
    ) -> Result<SecretData> {
        let endpoint = kv2_endpoint(mount, path)?;
        let secret_path = clean_segment(path);

        let response: Option<ReadResponse> = self
            .pipeline
            .execute(Method::GET, &endpoint, &[], None, opts)
            .await
            .map_err(|err| match err.status() {
                Some(404) => PlatformError::NotFound {
                    resource: "vault secret",
                    name: secret_path.to_owned(),
                },
                _ => err,
            })?;

        response
            .and_then(|response| response.data)
            .and_then(|data| data.data)
            .ok_or_else(|| {
                PlatformError::Decode(format!(
                    "vault response missing secret data at path: {secret_path}"
                ))
            })
    }
}

fn clean_segment(value: &str) -> &str {
    value.trim().trim_matches('/')
}

fn kv2_endpoint(mount: &str, path: &str) -> Result<String> {
    let mount = clean_segment(mount);
    let path = clean_segment(path);
    if mount.is_empty() {
        return Err(PlatformError::Validation(
            "secrets engine must not be empty".to_owned(),
        ));
    }
    if path.is_empty() {
        return Err(PlatformError::Validation(
            "secret path must not be empty".to_owned(),
        ));
    }
    Ok(format!("/v1/{mount}/data/{path}"))
}
