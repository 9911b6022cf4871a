//! AWS credential helpers.
//!
//! The STS calls themselves live behind [`CredentialSource`]. The factory
//! checks regions against a fixed allowlist and retries transient failures
//! of the source.

use std::{fmt, time::Duration, time::SystemTime};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::{
    retry::{Retrier, RetryPolicy},
    PlatformError, Result,
};

/// Regions the platform is allowed to operate in.
pub const ALLOWED_REGIONS: &[&str] = &[
    "us-east-1",
    "us-east-2",
    "us-west-2",
    "ca-central-1",
    "eu-west-1",
    "eu-west-2",
    "eu-central-1",
    "eu-north-1",
    "ap-southeast-1",
    "ap-southeast-2",
];

/// Retries after the first call, matching the SDK's standard mode of five
/// total attempts.
const SOURCE_MAX_RETRIES: u32 = 4;

pub fn validate_region(region: &str) -> Result<()> {
    if ALLOWED_REGIONS.contains(&region) {
        Ok(())
    } else {
        Err(PlatformError::InvalidRegion(region.to_owned()))
    }
}

/// Parameters for an STS assume-role call.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AssumeRoleRequest {
    pub role_arn: String,
    pub session_name: String,
    /// `None` leaves the session length to the role's default.
    pub duration: Option<Duration>,
}

impl AssumeRoleRequest {
    pub fn new(role_arn: impl Into<String>, session_name: impl Into<String>) -> Self {
        Self {
            role_arn: role_arn.into(),
            session_name: session_name.into(),
            duration: None,
        }
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = (!duration.is_zero()).then_some(duration);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.role_arn.trim().is_empty() {
            return Err(PlatformError::Validation(
                "role ARN must not be empty".to_owned(),
            ));
        }
        if self.session_name.trim().is_empty() {
            return Err(PlatformError::Validation(
                "role session name must not be empty".to_owned(),
            ));
        }
        Ok(())
    }
}

/// Temporary credentials returned by an assume-role call.
#[derive(Clone, Eq, PartialEq)]
pub struct TemporaryCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: String,
    pub expiration: Option<SystemTime>,
}

impl TemporaryCredentials {
    fn is_empty(&self) -> bool {
        self.access_key_id.trim().is_empty() || self.secret_access_key.trim().is_empty()
    }
}

impl fmt::Debug for TemporaryCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TemporaryCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("session_token", &"<redacted>")
            .field("expiration", &self.expiration)
            .finish()
    }
}

/// STS-style identity collaborator.
#[async_trait]
pub trait CredentialSource: Send + Sync {
    /// Account ID of the configured caller identity.
    async fn caller_account_id(&self) -> Result<String>;

    async fn assume_role(&self, request: &AssumeRoleRequest) -> Result<TemporaryCredentials>;
}

/// Region-validated front end for a [`CredentialSource`].
pub struct CredentialFactory<S> {
    region: String,
    source: S,
    retrier: Retrier,
}

impl<S> fmt::Debug for CredentialFactory<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialFactory")
            .field("region", &self.region)
            .field("retrier", &self.retrier)
            .finish_non_exhaustive()
    }
}

impl<S: CredentialSource> CredentialFactory<S> {
    /// Fails with [`PlatformError::InvalidRegion`] outside [`ALLOWED_REGIONS`].
    pub fn new(region: impl Into<String>, source: S) -> Result<Self> {
        let region = region.into();
        validate_region(&region)?;
        Ok(Self {
            region,
            source,
            retrier: Retrier::new(
                RetryPolicy::new(SOURCE_MAX_RETRIES, Duration::ZERO, Duration::ZERO)
                    .with_jitter(true),
            ),
        })
    }

    pub fn with_retrier(mut self, retrier: Retrier) -> Self {
        self.retrier = retrier;
        self
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    /// Returns the trimmed caller account ID.
    pub async fn account_id(&self, cancel: &CancellationToken) -> Result<String> {
        let account = self
            .retrier
            .run(cancel, PlatformError::is_transient, |_| {
                self.source.caller_account_id()
            })
            .await?;

        let account = account.trim();
        if account.is_empty() {
            return Err(PlatformError::Decode(
                "get caller identity returned empty account ID".to_owned(),
            ));
        }
        Ok(account.to_owned())
    }

    /// Assumes a role and returns its temporary credentials.
    pub async fn assume_role(
        &self,
        cancel: &CancellationToken,
        request: &AssumeRoleRequest,
    ) -> Result<TemporaryCredentials> {
        request.validate()?;

        let credentials = self
            .retrier
            .run(cancel, PlatformError::is_transient, |_| {
                self.source.assume_role(request)
            })
            .await?;

        if credentials.is_empty() {
            return Err(PlatformError::Decode(
                "assume role returned empty credentials".to_owned(),
            ));
        }
        Ok(credentials)
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            atomic::{AtomicU32, Ordering},
            Arc,
        },
        time::Duration,
    };

    use async_trait::async_trait;
    use tokio_util::sync::CancellationToken;

    use super::{
        validate_region, AssumeRoleRequest, CredentialFactory, CredentialSource,
        TemporaryCredentials,
    };
    use crate::{
        error::Cancelled,
        retry::{Retrier, RetryPolicy, Sleeper},
        PlatformError, Result,
    };

    struct NoSleep;

    #[async_trait]
    impl Sleeper for NoSleep {
        async fn sleep(
            &self,
            _cancel: &CancellationToken,
            _delay: Duration,
        ) -> std::result::Result<(), Cancelled> {
            Ok(())
        }
    }

    /// Fails with a 503 for the first `failures` calls.
    struct FlakySource {
        failures: u32,
        calls: AtomicU32,
        account: &'static str,
    }

    impl FlakySource {
        fn new(failures: u32, account: &'static str) -> Self {
            Self {
                failures,
                calls: AtomicU32::new(0),
                account,
            }
        }

        fn fail_if_due(&self) -> Result<()> {
            if self.calls.fetch_add(1, Ordering::SeqCst) < self.failures {
                return Err(PlatformError::Status {
                    provider: "sts",
                    status: 503,
                    body: "throttled".to_owned(),
                });
            }
            Ok(())
        }
    }

    #[async_trait]
    impl CredentialSource for FlakySource {
        async fn caller_account_id(&self) -> Result<String> {
            self.fail_if_due()?;
            Ok(self.account.to_owned())
        }

        async fn assume_role(&self, _request: &AssumeRoleRequest) -> Result<TemporaryCredentials> {
            self.fail_if_due()?;
            Ok(TemporaryCredentials {
                access_key_id: "AKIAEXAMPLE".to_owned(),
                secret_access_key: "very-secret".to_owned(),
                session_token: "session-token".to_owned(),
                expiration: None,
            })
        }
    }

    /// Never answers.
    struct StalledSource;

    #[async_trait]
    impl CredentialSource for StalledSource {
        async fn caller_account_id(&self) -> Result<String> {
            std::future::pending().await
        }

        async fn assume_role(&self, _request: &AssumeRoleRequest) -> Result<TemporaryCredentials> {
            std::future::pending().await
        }
    }

    fn factory(source: FlakySource) -> CredentialFactory<FlakySource> {
        CredentialFactory::new("us-east-1", source)
            .expect("allowed region")
            .with_retrier(
                Retrier::new(RetryPolicy::new(
                    4,
                    Duration::from_millis(1),
                    Duration::from_millis(2),
                ))
                .with_sleeper(Arc::new(NoSleep)),
            )
    }

    #[test]
    fn validates_region_allowlist() {
        assert!(validate_region("us-east-1").is_ok());
        assert!(matches!(
            validate_region("moon-1"),
            Err(PlatformError::InvalidRegion(_))
        ));
        assert!(matches!(
            CredentialFactory::new("invalid-1", FlakySource::new(0, "1")),
            Err(PlatformError::InvalidRegion(_))
        ));
    }

    #[tokio::test]
    async fn account_id_retries_transient_failures() {
        let factory = factory(FlakySource::new(2, " 123456789012 "));
        let account = factory
            .account_id(&CancellationToken::new())
            .await
            .expect("account id must resolve");
        assert_eq!(account, "123456789012");
        assert_eq!(factory.source.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn cancellation_interrupts_stalled_source() {
        let factory = CredentialFactory::new("eu-west-1", StalledSource).expect("allowed region");
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });

        let err = tokio::time::timeout(Duration::from_secs(5), factory.account_id(&cancel))
            .await
            .expect("cancelled lookup must return promptly")
            .expect_err("lookup must be cancelled");
        assert!(err.is_cancelled());

        let request = AssumeRoleRequest::new("arn:aws:iam::123456789012:role/deploy", "ci");
        let err = tokio::time::timeout(
            Duration::from_secs(5),
            factory.assume_role(&cancel, &request),
        )
        .await
        .expect("cancelled assume role must return promptly")
        .expect_err("assume role must be cancelled");
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn empty_account_id_is_an_error() {
        let factory = factory(FlakySource::new(0, "  "));
        let err = factory
            .account_id(&CancellationToken::new())
            .await
            .expect_err("empty account must fail");
        assert!(matches!(err, PlatformError::Decode(_)));
    }

    #[tokio::test]
    async fn assume_role_validates_before_calling_source() {
        let factory = factory(FlakySource::new(0, "1"));
        let err = factory
            .assume_role(&CancellationToken::new(), &AssumeRoleRequest::new(" ", "session"))
            .await
            .expect_err("empty role must fail");
        assert!(matches!(err, PlatformError::Validation(_)));
        assert_eq!(factory.source.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn assume_role_returns_credentials_with_redacted_debug() {
        let factory = factory(FlakySource::new(1, "1"));
        let request = AssumeRoleRequest::new("arn:aws:iam::123456789012:role/deploy", "ci")
            .with_duration(Duration::from_secs(900));
        let credentials = factory
            .assume_role(&CancellationToken::new(), &request)
            .await
            .expect("assume role must succeed");

        assert_eq!(credentials.access_key_id, "AKIAEXAMPLE");
        let debug = format!("{credentials:?}");
        assert!(!debug.contains("very-secret"));
        assert!(!debug.contains("session-token"));
    }
}
