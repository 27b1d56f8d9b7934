//! Next-revision computation against the artifact store.
//!
//! The next safe revision for a package/version is one past the highest
//! revision already published for that version on *any* configured remote.
//! Each remote is queried once, concurrently; the listings are unioned.
//!
//! When every remote hard-fails the answer is *unknown* ([`None`]), never
//! zero - a guessed zero could collide with an artifact the store does have
//! and republish it.

use anyhow::Result;
use futures::stream::{self, StreamExt};
use std::collections::BTreeSet;

use super::{ArtifactStore, RemoteVersion};

/// Compute the next revision from a set of published folder names.
///
/// The `version` may carry a revision suffix; it is stripped before
/// matching. Returns `highest matching revision + 1`, or `0` when nothing
/// for this version was ever published.
pub fn next_from_published<I, S>(published: I, version: &str) -> u32
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let version_no_rev = match version.rsplit_once('-') {
        Some((prefix, suffix)) if suffix.parse::<u32>().is_ok() => prefix,
        _ => version,
    };

    published
        .into_iter()
        .filter(|raw| raw.as_ref().starts_with(version_no_rev))
        .map(|raw| RemoteVersion::parse(raw.as_ref()))
        .max()
        .map_or(0, |highest| highest.revision().map_or(0, |rev| rev + 1))
}

/// Query every remote for `package` and compute the next revision for
/// `version`. `Ok(None)` means every remote hard-failed.
pub async fn next_revision(
    store: &ArtifactStore,
    remotes: &[String],
    package: &str,
    version: &str,
) -> Result<Option<u32>> {
    let listings = stream::iter(remotes)
        .map(|remote| async move {
            match store.list_versions(remote, package).await {
                Ok(versions) => Some(versions),
                Err(err) => {
                    tracing::warn!("{err:#}");
                    None
                }
            }
        })
        .buffer_unordered(remotes.len().max(1))
        .collect::<Vec<Option<Vec<String>>>>()
        .await;

    if listings.iter().all(Option::is_none) {
        return Ok(None);
    }

    let published: BTreeSet<String> = listings.into_iter().flatten().flatten().collect();
    Ok(Some(next_from_published(&published, version)))
}

/// Outcome of a batched next-revision lookup.
#[derive(Debug, Default)]
pub struct NextRevisions {
    /// Package name to next revision.
    pub revisions: std::collections::BTreeMap<String, u32>,
    /// Packages for which every remote hard-failed.
    pub unknown: Vec<String>,
}

/// Run [`next_revision`] for every `(package, version)` pair with at most
/// `workers` queries in flight. Individual failures never abort the batch.
pub async fn next_revisions(
    store: &ArtifactStore,
    remotes: &[String],
    packages: &[(String, String)],
    workers: usize,
) -> NextRevisions {
    let results = stream::iter(packages)
        .map(|(package, version)| async move {
            let next = next_revision(store, remotes, package, version).await;
            (package.clone(), next)
        })
        .buffer_unordered(workers.max(1))
        .collect::<Vec<(String, Result<Option<u32>>)>>()
        .await;

    let mut outcome = NextRevisions::default();
    for (package, next) in results {
        match next {
            Ok(Some(revision)) => {
                outcome.revisions.insert(package, revision);
            }
            Ok(None) => outcome.unknown.push(package),
            Err(err) => {
                tracing::warn!("next revision for {package} failed: {err:#}");
                outcome.unknown.push(package);
            }
        }
    }
    outcome.unknown.sort_unstable();
    outcome
}
