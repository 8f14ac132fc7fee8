// In-memory registry used by tests.

use std::collections::{BTreeMap, HashMap, HashSet};

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::Mutex;

use super::{Manifest, RegistryApi, DOCKER_MANIFEST_V2};
use crate::errors::{Result, SyncError};
use crate::models::RepositoryPage;

#[derive(Default)]
struct State {
    /// repository -> tag -> digest
    repos: BTreeMap<String, BTreeMap<String, String>>,
    /// digest -> manifest
    manifests: HashMap<String, Manifest>,
    /// digest -> JSON blob
    blobs: HashMap<String, Value>,
    deleted: Vec<(String, String)>,
    fail_repos: HashSet<String>,
}

impl State {
    /// Digest a tag or digest reference points at.
    fn resolve(&self, repository: &str, reference: &str) -> Option<String> {
        let tags = self.repos.get(repository)?;
        tags.get(reference)
            .or_else(|| tags.values().find(|d| d.as_str() == reference))
            .cloned()
    }
}

fn not_found(what: String) -> SyncError {
    SyncError::registry(Some(404), format!("Registry API error 404: {} unknown", what))
}

/// Registry double. Every tag gets a distinct digest `sha256:<repo>-<tag>`
/// and a Docker v2 manifest of one 1000-byte layer plus a 100-byte config
/// whose blob is absent.
#[derive(Default)]
pub struct MemoryRegistry {
    state: Mutex<State>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_tag(&self, repository: &str, tag: &str) {
        let digest = format!("sha256:{}-{}", repository.replace('/', "_"), tag);
        let manifest = Manifest {
            media_type: DOCKER_MANIFEST_V2.to_string(),
            body: json!({
                "schemaVersion": 2,
                "mediaType": DOCKER_MANIFEST_V2,
                "config": {"digest": format!("{}-config", digest), "size": 100},
                "layers": [{"size": 1000}],
            }),
        };
        let mut state = self.state.lock().await;
        state.manifests.entry(digest.clone()).or_insert(manifest);
        state
            .repos
            .entry(repository.to_string())
            .or_default()
            .insert(tag.to_string(), digest);
    }

    /// Replace the manifest served for an existing tag.
    pub async fn set_manifest(&self, repository: &str, tag: &str, manifest: Manifest) {
        let mut state = self.state.lock().await;
        if let Some(digest) = state.resolve(repository, tag) {
            state.manifests.insert(digest, manifest);
        }
    }

    /// Drop the manifest of a tag while keeping the tag listed.
    pub async fn remove_manifest(&self, repository: &str, tag: &str) {
        let mut state = self.state.lock().await;
        if let Some(digest) = state.resolve(repository, tag) {
            state.manifests.remove(&digest);
        }
    }

    pub async fn add_blob(&self, digest: &str, blob: Value) {
        self.state
            .lock()
            .await
            .blobs
            .insert(digest.to_string(), blob);
    }

    /// Make every call touching `repository` fail with a 500.
    pub async fn fail_repository(&self, repository: &str) {
        self.state
            .lock()
            .await
            .fail_repos
            .insert(repository.to_string());
    }

    /// `(repository, digest)` pairs deleted so far, in call order.
    pub async fn deleted(&self) -> Vec<(String, String)> {
        self.state.lock().await.deleted.clone()
    }

    pub async fn tags(&self, repository: &str) -> Vec<String> {
        self.state
            .lock()
            .await
            .repos
            .get(repository)
            .map(|tags| tags.keys().cloned().collect())
            .unwrap_or_default()
    }
}

fn check_failure(state: &State, repository: &str) -> Result<()> {
    if state.fail_repos.contains(repository) {
        return Err(SyncError::registry(
            Some(500),
            format!("Registry API error 500: injected failure for {}", repository),
        ));
    }
    Ok(())
}

#[async_trait]
impl RegistryApi for MemoryRegistry {
    async fn list_tags(&self, repository: &str) -> Result<Vec<String>> {
        let state = self.state.lock().await;
        check_failure(&state, repository)?;
        Ok(state
            .repos
            .get(repository)
            .map(|tags| tags.keys().cloned().collect())
            .unwrap_or_default())
    }

    async fn resolve_digest(&self, repository: &str, reference: &str) -> Result<String> {
        let state = self.state.lock().await;
        check_failure(&state, repository)?;
        state
            .repos
            .get(repository)
            .and_then(|tags| tags.get(reference))
            .cloned()
            .ok_or_else(|| not_found(format!("{}:{}", repository, reference)))
    }

    async fn get_manifest(&self, repository: &str, reference: &str) -> Result<Manifest> {
        let state = self.state.lock().await;
        check_failure(&state, repository)?;
        state
            .resolve(repository, reference)
            .and_then(|digest| state.manifests.get(&digest))
            .cloned()
            .ok_or_else(|| not_found(format!("manifest {}:{}", repository, reference)))
    }

    async fn get_blob(&self, repository: &str, digest: &str) -> Result<Value> {
        let state = self.state.lock().await;
        check_failure(&state, repository)?;
        state
            .blobs
            .get(digest)
            .cloned()
            .ok_or_else(|| not_found(format!("blob {}", digest)))
    }

    async fn delete_manifest(&self, repository: &str, digest: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        check_failure(&state, repository)?;
        let tags = state.repos.get_mut(repository).ok_or_else(|| {
            SyncError::registry(Some(404), format!("Registry API error 404: {}", repository))
        })?;
        let before = tags.len();
        tags.retain(|_, d| d != digest);
        if tags.len() == before {
            return Err(SyncError::registry(
                Some(404),
                format!("Registry API error 404: manifest {} unknown", digest),
            ));
        }
        if tags.is_empty() {
            state.repos.remove(repository);
        }
        state
            .deleted
            .push((repository.to_string(), digest.to_string()));
        Ok(())
    }

    async fn list_repositories(&self, n: usize, last: Option<&str>) -> Result<RepositoryPage> {
        let state = self.state.lock().await;
        let remaining: Vec<String> = state
            .repos
            .keys()
            .filter(|name| last.map_or(true, |l| name.as_str() > l))
            .cloned()
            .collect();
        let repositories: Vec<String> = remaining.iter().take(n).cloned().collect();
        let next = if remaining.len() > n {
            repositories.last().cloned()
        } else {
            None
        };
        Ok(RepositoryPage { repositories, next })
    }

    async fn ping(&self) -> bool {
        true
    }
}
