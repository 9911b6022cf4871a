use reqwest::Method;
use serde::{de::DeserializeOwned, Serialize};

use crate::{
    pipeline::RequestOptions,
    scope::{escape_path_segment, Scope},
    CloudflareClient, PlatformError, Result,
};

/// Cloudflare Access and Zero Trust operations.
///
/// Create calls are POSTs and therefore only retried when `opts` enables
/// [`RequestOptions::retry_unsafe_methods`].
#[derive(Clone, Copy, Debug)]
pub struct AccessService<'a> {
    client: &'a CloudflareClient,
}

impl<'a> AccessService<'a> {
    pub(crate) fn new(client: &'a CloudflareClient) -> Self {
        Self { client }
    }

    /// Performs a request under `scope`, e.g. `/accounts/{id}/{endpoint}`.
    pub async fn request<B, T>(
        &self,
        scope: &Scope,
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
        let prefix = scope.path_prefix()?;
        let endpoint = endpoint.trim().trim_start_matches('/');
        if endpoint.is_empty() {
            return Err(PlatformError::Validation(
                "access endpoint must not be empty".to_owned(),
            ));
        }

        self.client
            .request(method, &format!("/{prefix}/{endpoint}"), query, body, opts)
            .await
    }

    /// Creates an identity provider (login method) for an account.
    pub async fn create_identity_provider<B, T>(
        &self,
        account_id: &str,
        body: &B,
        opts: &RequestOptions,
    ) -> Result<Option<T>>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.request(
            &Scope::account(account_id),
            Method::POST,
            "/access/identity_providers",
            &[],
            Some(body),
            opts,
        )
        .await
    }

    /// Creates an Access application at account or zone scope.
    pub async fn create_application<B, T>(
        &self,
        scope: &Scope,
        body: &B,
        opts: &RequestOptions,
    ) -> Result<Option<T>>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.request(scope, Method::POST, "/access/apps", &[], Some(body), opts)
            .await
    }

    /// Creates a reusable policy for an account.
    pub async fn create_reusable_policy<B, T>(
        &self,
        account_id: &str,
        body: &B,
        opts: &RequestOptions,
    ) -> Result<Option<T>>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.request(
            &Scope::account(account_id),
            Method::POST,
            "/access/policies",
            &[],
            Some(body),
            opts,
        )
        .await
    }

    /// Creates a policy attached to one application.
    pub async fn create_application_policy<B, T>(
        &self,
        scope: &Scope,
        app_id: &str,
        body: &B,
        opts: &RequestOptions,
    ) -> Result<Option<T>>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let app_id = app_id.trim();
        if app_id.is_empty() {
            return Err(PlatformError::Validation(
                "app ID must not be empty".to_owned(),
            ));
        }

        let endpoint = format!("/access/apps/{}/policies", escape_path_segment(app_id));
        self.request(scope, Method::POST, &endpoint, &[], Some(body), opts)
            .await
    }
}
