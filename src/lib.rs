//! `platform-core` provides retry-aware async HTTP clients for platform
//! control-plane APIs and a secret store.
//!
//! Every client funnels through one [`Pipeline`]:
//! - [`CloudflareClient`] (bearer auth, `success`/`errors`/`result` envelope, pagination)
//! - [`VaultClient`] (KV v2 secrets, `X-Vault-Token` auth)
//!
//! The retry building blocks ([`backoff::delay`], [`Retrier`]) are usable on
//! their own; [`aws::CredentialFactory`] wraps an STS-style credential source
//! with them.

mod access;
pub mod aws;
pub mod backoff;
mod cloudflare;
mod envelope;
mod error;
mod options;
mod pipeline;
pub mod retry;
mod scope;
mod transport;
mod vault;

pub use access::AccessService;
pub use cloudflare::{CloudflareApi, CloudflareClient, Zone, DEFAULT_BASE_URL};
pub use envelope::{format_api_errors, ApiErrorItem, ResultInfo};
pub use error::{Cancelled, PlatformError, TransportError};
pub use options::ClientOptions;
pub use pipeline::{
    encode_json, is_idempotent, parse_retry_after, Payload, Pipeline, Provider, RequestOptions,
};
pub use retry::{JitterSource, Retrier, RetryPolicy, Sleeper, ThreadRngJitter, TokioSleeper};
pub use scope::{Scope, ScopeKind};
pub use transport::{HttpRequest, HttpResponse, ReqwestTransport, Transport};
pub use vault::{SecretData, VaultApi, VaultClient};

pub use tokio_util::sync::CancellationToken;

pub type Result<T> = std::result::Result<T, PlatformError>;
