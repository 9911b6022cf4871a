use std::{fmt, str::FromStr};

use reqwest::Url;

use crate::{PlatformError, Result};

/// Resource hierarchy an API call targets.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ScopeKind {
    /// `/accounts/{account_id}/...`
    Accounts,
    /// `/zones/{zone_id}/...`
    Zones,
}

impl ScopeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Accounts => "accounts",
            Self::Zones => "zones",
        }
    }
}

impl fmt::Display for ScopeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScopeKind {
    type Err = PlatformError;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim() {
            "accounts" => Ok(Self::Accounts),
            "zones" => Ok(Self::Zones),
            other => Err(PlatformError::Validation(format!(
                "unsupported scope kind: {other:?}"
            ))),
        }
    }
}

/// Account- or zone-scoped path segment.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct Scope {
    pub kind: ScopeKind,
    pub id: String,
}

impl Scope {
    pub fn new(kind: ScopeKind, id: impl AsRef<str>) -> Self {
        Self {
            kind,
            id: id.as_ref().trim().to_owned(),
        }
    }

    pub fn account(account_id: impl AsRef<str>) -> Self {
        Self::new(ScopeKind::Accounts, account_id)
    }

    pub fn zone(zone_id: impl AsRef<str>) -> Self {
        Self::new(ScopeKind::Zones, zone_id)
    }

    /// Builds a scope from a textual kind, e.g. one read from configuration.
    pub fn parse(kind: &str, id: impl AsRef<str>) -> Result<Self> {
        Ok(Self::new(kind.parse()?, id))
    }

    /// Returns `"{kind}/{escaped id}"`, e.g. `"accounts/acc-1"`.
    pub fn path_prefix(&self) -> Result<String> {
        let id = self.id.trim();
        if id.is_empty() {
            return Err(PlatformError::Validation(format!(
                "scope ID must not be empty for {:?}",
                self.kind.as_str()
            )));
        }
        Ok(format!("{}/{}", self.kind, escape_path_segment(id)))
    }
}

/// Percent-encodes `segment` so it stays a single URL path segment.
pub(crate) fn escape_path_segment(segment: &str) -> String {
    let Ok(mut url) = Url::parse("http://segment.invalid/") else {
        return segment.to_owned();
    };
    if let Ok(mut segments) = url.path_segments_mut() {
        segments.clear().push(segment);
    }
    url.path().trim_start_matches('/').to_owned()
}
