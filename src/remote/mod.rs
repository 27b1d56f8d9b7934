//! Artifact store client and published-version ordering.
//!
//! The binary store (an Artifactory instance) exposes the published versions
//! of a package as storage folders: `storage/{remote}/{namespace}/{package}`
//! lists children named `1.2.8-0`, `1.2.8-1`, and so on. [`ArtifactStore`]
//! wraps the handful of read-only calls depforge needs; [`RemoteVersion`]
//! is the canonical ordering for those folder names (versions compare as
//! text, revision suffixes as integers).
//!
//! Failure policy: a 404 means the package was simply never published on
//! that remote and yields an empty listing. Any other status, or a
//! transport error, is a per-remote failure - the caller treats it as "this
//! remote contributed nothing" and carries on with the others.

pub mod revisions;

use anyhow::Result;
use serde::Deserialize;
use std::cmp::Ordering;

use crate::config::{ArtifactorySettings, Credentials};
use crate::core::DepforgeError;

pub use revisions::{next_revision, next_revisions};

/// One published version folder name, ordered the way revisions demand:
/// split on the *last* `-`, compare versions lexicographically and
/// revisions numerically. `1.2.8-2` sorts below `1.2.8-10`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteVersion {
    raw: String,
    version: String,
    revision: Option<u32>,
}

impl RemoteVersion {
    pub fn parse(raw: &str) -> Self {
        let (version, revision) = match raw.rsplit_once('-') {
            Some((version, suffix)) => match suffix.parse::<u32>() {
                Ok(revision) => (version.to_string(), Some(revision)),
                // no numeric suffix: the whole token is the version
                // (git-hash versions like "1.0-abc123")
                Err(_) => (raw.to_string(), None),
            },
            None => (raw.to_string(), None),
        };
        Self { raw: raw.to_string(), version, revision }
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn revision(&self) -> Option<u32> {
        self.revision
    }
}

impl Ord for RemoteVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.version.cmp(&other.version) {
            Ordering::Equal => self.revision.cmp(&other.revision),
            ordering => ordering,
        }
    }
}

impl PartialOrd for RemoteVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Deserialize)]
struct StorageListing {
    #[serde(default)]
    children: Vec<StorageChild>,
}

#[derive(Debug, Deserialize)]
struct StorageChild {
    #[serde(default)]
    folder: bool,
    uri: String,
}

/// Read-only client for the artifact store's storage API.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    client: reqwest::Client,
    url: String,
    namespace: String,
    credentials: Credentials,
}

impl ArtifactStore {
    pub fn new(settings: &ArtifactorySettings, credentials: Credentials) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: settings.url.trim_end_matches('/').to_string(),
            namespace: settings.namespace.clone(),
            credentials,
        }
    }

    /// Published version folder names for `package` on one remote.
    ///
    /// A 404 is an empty listing; other failures surface as
    /// [`DepforgeError::RemoteQueryFailed`].
    pub async fn list_versions(&self, remote: &str, package: &str) -> Result<Vec<String>> {
        let url = format!(
            "{}/api/storage/{remote}/{}/{package}",
            self.url, self.namespace
        );
        tracing::debug!(target: "remote", "GET {url}");

        let soft_fail = |reason: String| DepforgeError::RemoteQueryFailed {
            remote: remote.to_string(),
            package: package.to_string(),
            reason,
        };

        let response = self
            .client
            .get(&url)
            .basic_auth(&self.credentials.user, Some(&self.credentials.token))
            .send()
            .await
            .map_err(|e| soft_fail(e.to_string()))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        if !response.status().is_success() {
            return Err(soft_fail(format!("HTTP {}", response.status())).into());
        }

        let listing: StorageListing =
            response.json().await.map_err(|e| soft_fail(e.to_string()))?;
        Ok(listing
            .children
            .into_iter()
            .filter(|child| child.folder)
            .map(|child| child.uri.trim_start_matches('/').to_string())
            .collect())
    }
}
