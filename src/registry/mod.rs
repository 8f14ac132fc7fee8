//! Docker Registry HTTP API v2 client.

pub mod memory;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE};
use reqwest::{Client, Method, Response, StatusCode, Url};
use serde::Deserialize;
use serde_json::Value;

use crate::errors::{Result, SyncError};
use crate::models::{RepositoryPage, TagDetails};

pub use memory::MemoryRegistry;

/// Accept header covering Docker v2 and OCI manifests and indexes.
pub const MANIFEST_ACCEPT: &str = "application/vnd.docker.distribution.manifest.v2+json, \
application/vnd.oci.image.manifest.v1+json, \
application/vnd.docker.distribution.manifest.list.v2+json, \
application/vnd.oci.image.index.v1+json";

pub const DOCKER_MANIFEST_V2: &str = "application/vnd.docker.distribution.manifest.v2+json";
pub const OCI_MANIFEST_V1: &str = "application/vnd.oci.image.manifest.v1+json";
pub const DOCKER_MANIFEST_LIST_V2: &str =
    "application/vnd.docker.distribution.manifest.list.v2+json";
pub const OCI_INDEX_V1: &str = "application/vnd.oci.image.index.v1+json";

const DIGEST_HEADER: &str = "Docker-Content-Digest";

/// A manifest body with the media type the registry served it as.
#[derive(Debug, Clone, PartialEq)]
pub struct Manifest {
    pub media_type: String,
    pub body: Value,
}

impl Manifest {
    /// Media type without parameters, lowercased.
    fn normalized_type(&self) -> String {
        self.media_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase()
    }

    fn is_image(&self) -> bool {
        matches!(
            self.normalized_type().as_str(),
            DOCKER_MANIFEST_V2 | OCI_MANIFEST_V1
        )
    }

    fn is_index(&self) -> bool {
        matches!(
            self.normalized_type().as_str(),
            DOCKER_MANIFEST_LIST_V2 | OCI_INDEX_V1
        )
    }

    /// Config plus layer sizes for an image manifest, the sum of child
    /// manifest sizes for an index. `None` for any other media type, or an
    /// index without a `manifests` array.
    pub fn size_bytes(&self) -> Option<u64> {
        let size_of = |item: &Value| item.get("size").and_then(Value::as_u64).unwrap_or(0);
        if self.is_image() {
            let config = self.body.get("config").map(size_of).unwrap_or(0);
            let layers: u64 = self
                .body
                .get("layers")
                .and_then(Value::as_array)
                .map(|layers| layers.iter().map(size_of).sum())
                .unwrap_or(0);
            return Some(config + layers);
        }
        if self.is_index() {
            let manifests = self.body.get("manifests")?.as_array()?;
            return Some(manifests.iter().map(size_of).sum());
        }
        None
    }

    /// Digest of the image config blob. Indexes have none.
    pub fn config_digest(&self) -> Option<&str> {
        if !self.is_image() {
            return None;
        }
        self.body
            .get("config")?
            .get("digest")?
            .as_str()
            .filter(|d| !d.is_empty())
    }
}

/// Registry operations consumed by the job manager.
#[async_trait]
pub trait RegistryApi: Send + Sync {
    /// Tags of a repository; empty when the repository does not exist.
    async fn list_tags(&self, repository: &str) -> Result<Vec<String>>;
    /// Manifest digest for a tag or digest reference.
    async fn resolve_digest(&self, repository: &str, reference: &str) -> Result<String>;
    /// Manifest for a tag or digest reference.
    async fn get_manifest(&self, repository: &str, reference: &str) -> Result<Manifest>;
    /// A JSON blob such as an image config.
    async fn get_blob(&self, repository: &str, digest: &str) -> Result<Value>;
    async fn delete_manifest(&self, repository: &str, digest: &str) -> Result<()>;
    async fn list_repositories(&self, n: usize, last: Option<&str>) -> Result<RepositoryPage>;
    /// True when `/v2/` answers 200 or 401.
    async fn ping(&self) -> bool;
}

#[derive(Debug, Deserialize)]
struct CatalogResponse {
    #[serde(default)]
    repositories: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    tags: Option<Vec<String>>,
}

pub struct HttpRegistryClient {
    base_url: Url,
    client: Client,
}

impl HttpRegistryClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let parsed = Url::parse(base_url)
            .map_err(|e| SyncError::invalid(format!("Invalid registry URL {}: {}", base_url, e)))?;
        if parsed.cannot_be_a_base() {
            return Err(SyncError::invalid(format!(
                "Invalid registry URL {}: not a base URL",
                base_url
            )));
        }
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: parsed,
            client,
        })
    }

    /// `{base}/v2/` followed by `segments`, each percent-encoded on its own.
    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().push("v2").extend(segments);
        }
        url
    }

    /// `{base}/v2/<repository>/<tail>`. The repository keeps its `/`
    /// separators; each `tail` item is encoded as a single segment.
    fn repository_url(&self, repository: &str, tail: &[&str]) -> Url {
        let segments: Vec<&str> = repository
            .split('/')
            .chain(tail.iter().copied())
            .collect();
        self.url(&segments)
    }

    fn manifest_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static(MANIFEST_ACCEPT));
        headers
    }

    /// Send a request and map transport failures and 4xx/5xx answers to
    /// [`SyncError::Registry`].
    async fn request(
        &self,
        method: Method,
        url: Url,
        headers: HeaderMap,
        query: &[(&str, String)],
    ) -> Result<Response> {
        let response = self
            .client
            .request(method.clone(), url)
            .headers(headers)
            .query(query)
            .send()
            .await
            .map_err(|e| SyncError::registry(None, format!("Registry request failed: {}", e)))?;

        let status = response.status();
        if status.is_client_error() || status.is_server_error() {
            if method == Method::DELETE && status == StatusCode::METHOD_NOT_ALLOWED {
                return Err(SyncError::registry(
                    Some(405),
                    "Registry denied manifest delete (405). \
                     Enable REGISTRY_STORAGE_DELETE_ENABLED=true on registry and restart it.",
                ));
            }
            let body = response.text().await.unwrap_or_default();
            let preview: String = body.chars().take(300).collect();
            return Err(SyncError::registry(
                Some(status.as_u16()),
                format!("Registry API error {}: {}", status.as_u16(), preview),
            ));
        }
        Ok(response)
    }
}

fn digest_header(response: &Response) -> Option<String> {
    response
        .headers()
        .get(DIGEST_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[async_trait]
impl RegistryApi for HttpRegistryClient {
    async fn list_tags(&self, repository: &str) -> Result<Vec<String>> {
        let url = self.repository_url(repository, &["tags", "list"]);
        let response = match self.request(Method::GET, url, HeaderMap::new(), &[]).await {
            Ok(r) => r,
            Err(e) if e.is_not_found() => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let payload: TagsResponse = serde_json::from_str(&response.text().await?)?;
        Ok(payload.tags.unwrap_or_default())
    }

    async fn resolve_digest(&self, repository: &str, reference: &str) -> Result<String> {
        let url = self.repository_url(repository, &["manifests", reference]);
        let head = self
            .request(Method::HEAD, url.clone(), Self::manifest_headers(), &[])
            .await?;
        if let Some(digest) = digest_header(&head) {
            return Ok(digest);
        }

        let get = self
            .request(Method::GET, url, Self::manifest_headers(), &[])
            .await?;
        digest_header(&get).ok_or_else(|| {
            SyncError::registry(
                Some(502),
                format!("Digest not found for {}:{}.", repository, reference),
            )
        })
    }

    async fn get_manifest(&self, repository: &str, reference: &str) -> Result<Manifest> {
        let url = self.repository_url(repository, &["manifests", reference]);
        let response = self
            .request(Method::GET, url, Self::manifest_headers(), &[])
            .await?;
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string);
        let body: Value = serde_json::from_str(&response.text().await?)?;
        let media_type = content_type
            .or_else(|| {
                body.get("mediaType")
                    .and_then(Value::as_str)
                    .map(str::to_string)
            })
            .unwrap_or_else(|| DOCKER_MANIFEST_V2.to_string());
        Ok(Manifest { media_type, body })
    }

    async fn get_blob(&self, repository: &str, digest: &str) -> Result<Value> {
        let url = self.repository_url(repository, &["blobs", digest]);
        let response = self
            .request(Method::GET, url, HeaderMap::new(), &[])
            .await?;
        Ok(serde_json::from_str(&response.text().await?)?)
    }

    async fn delete_manifest(&self, repository: &str, digest: &str) -> Result<()> {
        let url = self.repository_url(repository, &["manifests", digest]);
        self.request(Method::DELETE, url, HeaderMap::new(), &[])
            .await?;
        Ok(())
    }

    async fn list_repositories(&self, n: usize, last: Option<&str>) -> Result<RepositoryPage> {
        let mut query = vec![("n", n.to_string())];
        if let Some(last) = last.filter(|l| !l.is_empty()) {
            query.push(("last", last.to_string()));
        }
        let response = self
            .request(Method::GET, self.url(&["_catalog"]), HeaderMap::new(), &query)
            .await?;
        let next = response
            .headers()
            .get(reqwest::header::LINK)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_next_from_link);
        let payload: CatalogResponse = serde_json::from_str(&response.text().await?)?;
        Ok(RepositoryPage {
            repositories: payload.repositories.unwrap_or_default(),
            next,
        })
    }

    async fn ping(&self) -> bool {
        match self.client.get(self.url(&[""])).send().await {
            Ok(response) => matches!(
                response.status(),
                StatusCode::OK | StatusCode::UNAUTHORIZED
            ),
            Err(e) => {
                tracing::debug!("Registry ping failed: {}", e);
                false
            }
        }
    }
}

/// Delete a tag by resolving its digest first. Returns the deleted digest.
pub async fn delete_tag(registry: &dyn RegistryApi, repository: &str, tag: &str) -> Result<String> {
    let digest = registry.resolve_digest(repository, tag).await?;
    registry.delete_manifest(repository, &digest).await?;
    Ok(digest)
}

/// Digest, media type, size and creation time of one tag.
///
/// The creation time comes from the image config blob; a missing or
/// unreadable config only leaves `created_at` empty.
pub async fn tag_details(
    registry: &dyn RegistryApi,
    repository: &str,
    tag: &str,
) -> Result<TagDetails> {
    let digest = registry.resolve_digest(repository, tag).await?;
    let manifest = registry.get_manifest(repository, &digest).await?;
    let created_at = match manifest.config_digest() {
        Some(config) => match registry.get_blob(repository, config).await {
            Ok(blob) => blob
                .get("created")
                .and_then(Value::as_str)
                .map(normalize_created),
            Err(e) => {
                tracing::debug!("No config blob for {}:{}: {}", repository, tag, e);
                None
            }
        },
        None => None,
    };
    Ok(TagDetails {
        tag: tag.to_string(),
        digest: Some(digest),
        size_bytes: manifest.size_bytes(),
        media_type: Some(manifest.media_type),
        created_at,
        error: None,
    })
}

/// RFC 3339 timestamps are converted to UTC; anything else is kept as is.
fn normalize_created(raw: &str) -> String {
    match DateTime::parse_from_rfc3339(raw) {
        Ok(t) => t.with_timezone(&Utc).to_rfc3339(),
        Err(_) => raw.to_string(),
    }
}

/// Extract the `last` cursor from a `Link: <...?last=x&n=y>; rel="next"` header.
pub fn parse_next_from_link(link: &str) -> Option<String> {
    link.split(',')
        .map(str::trim)
        .filter(|part| part.contains("rel=\"next\""))
        .find_map(|part| {
            let url = part.strip_prefix('<')?.split_once('>')?.0;
            let query = url.split_once('?')?.1;
            query
                .split('&')
                .filter_map(|pair| pair.split_once('='))
                .find(|(key, _)| *key == "last")
                .map(|(_, value)| value.to_string())
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::Path;
    use axum::http::header;
    use axum::response::IntoResponse;
    use axum::routing::get;
    use axum::{Json, Router};
    use serde_json::json;

    fn client(base: &str) -> HttpRegistryClient {
        HttpRegistryClient::new(base, Duration::from_secs(5)).unwrap()
    }

    fn manifest(media_type: &str, body: Value) -> Manifest {
        Manifest {
            media_type: media_type.to_string(),
            body,
        }
    }

    #[test]
    fn test_parse_next_from_link() {
        let link = r#"</v2/_catalog?last=nginx&n=100>; rel="next""#;
        assert_eq!(parse_next_from_link(link), Some("nginx".to_string()));
    }

    #[test]
    fn test_parse_next_from_link_ignores_other_rels() {
        let link = r#"</v2/_catalog?last=a&n=1>; rel="prev", </v2/_catalog?n=1&last=b>; rel="next""#;
        assert_eq!(parse_next_from_link(link), Some("b".to_string()));
    }

    #[test]
    fn test_parse_next_from_link_malformed() {
        assert_eq!(parse_next_from_link(""), None);
        assert_eq!(parse_next_from_link(r#"/v2/_catalog?last=a; rel="next""#), None);
        assert_eq!(parse_next_from_link(r#"</v2/_catalog?n=1>; rel="next""#), None);
    }

    #[test]
    fn test_manifest_accept_covers_docker_and_oci() {
        for media_type in [
            DOCKER_MANIFEST_V2,
            OCI_MANIFEST_V1,
            DOCKER_MANIFEST_LIST_V2,
            OCI_INDEX_V1,
        ] {
            assert!(MANIFEST_ACCEPT.contains(media_type));
        }
    }

    #[test]
    fn test_urls_encode_each_segment() {
        let registry = client("http://registry.local:5000");
        assert_eq!(
            registry
                .repository_url("team/app", &["manifests", "v1 beta#2"])
                .as_str(),
            "http://registry.local:5000/v2/team/app/manifests/v1%20beta%232"
        );
        // A slash inside a reference must not become a path separator
        assert_eq!(
            registry.repository_url("app", &["manifests", "a/b"]).as_str(),
            "http://registry.local:5000/v2/app/manifests/a%2Fb"
        );
        assert_eq!(
            registry.url(&["_catalog"]).as_str(),
            "http://registry.local:5000/v2/_catalog"
        );
        assert_eq!(registry.url(&[""]).as_str(), "http://registry.local:5000/v2/");
    }

    #[test]
    fn test_urls_keep_base_path() {
        let registry = client("https://proxy.local/registry/");
        assert_eq!(
            registry.repository_url("app", &["tags", "list"]).as_str(),
            "https://proxy.local/registry/v2/app/tags/list"
        );
    }

    #[test]
    fn test_invalid_base_url_is_rejected() {
        assert!(HttpRegistryClient::new("not a url", Duration::from_secs(1)).is_err());
    }

    #[test]
    fn test_image_manifest_size_and_config() {
        let m = manifest(
            "application/vnd.oci.image.manifest.v1+json; charset=utf-8",
            json!({
                "config": {"digest": "sha256:cfg", "size": 1500},
                "layers": [{"size": 1000}, {"size": 2500}, {"digest": "no-size"}],
            }),
        );
        assert_eq!(m.size_bytes(), Some(5000));
        assert_eq!(m.config_digest(), Some("sha256:cfg"));
    }

    #[test]
    fn test_index_manifest_size_has_no_config() {
        let m = manifest(
            OCI_INDEX_V1,
            json!({"manifests": [{"size": 500}, {"size": 700}], "config": {"digest": "x"}}),
        );
        assert_eq!(m.size_bytes(), Some(1200));
        assert_eq!(m.config_digest(), None);

        let no_children = manifest(DOCKER_MANIFEST_LIST_V2, json!({}));
        assert_eq!(no_children.size_bytes(), None);
    }

    #[test]
    fn test_unknown_media_type_has_no_size() {
        let m = manifest(
            "application/vnd.docker.distribution.manifest.v1+prettyjws",
            json!({"layers": [{"size": 1}]}),
        );
        assert_eq!(m.size_bytes(), None);
        assert_eq!(m.config_digest(), None);
    }

    #[test]
    fn test_normalize_created() {
        assert_eq!(
            normalize_created("2024-05-01T10:00:00+02:00"),
            "2024-05-01T08:00:00+00:00"
        );
        assert_eq!(
            normalize_created("2024-05-01T08:00:00Z"),
            "2024-05-01T08:00:00+00:00"
        );
        assert_eq!(normalize_created("yesterday"), "yesterday");
    }

    #[tokio::test]
    async fn test_ping_unreachable_registry_is_false() {
        let client =
            HttpRegistryClient::new("http://127.0.0.1:1", Duration::from_millis(500)).unwrap();
        assert!(!client.ping().await);
    }

    #[tokio::test]
    async fn test_list_tags_unreachable_registry_is_registry_error() {
        let client =
            HttpRegistryClient::new("http://127.0.0.1:1", Duration::from_millis(500)).unwrap();
        match client.list_tags("nginx").await {
            Err(SyncError::Registry { status: None, .. }) => {}
            other => panic!("Expected Registry error, got: {:?}", other),
        }
    }

    // -----------------------------------------------------------------------
    // Against a stub registry served by axum
    // -----------------------------------------------------------------------

    async fn stub_manifest(Path(reference): Path<String>) -> axum::response::Response {
        if reference != "1.0" && reference != "sha256:app10" {
            return (axum::http::StatusCode::NOT_FOUND, "manifest unknown").into_response();
        }
        let body = json!({
            "schemaVersion": 2,
            "config": {"digest": "sha256:cfg10", "size": 100},
            "layers": [{"size": 900}],
        });
        (
            [
                (header::CONTENT_TYPE, DOCKER_MANIFEST_V2),
                (header::HeaderName::from_static("docker-content-digest"), "sha256:app10"),
            ],
            body.to_string(),
        )
            .into_response()
    }

    async fn stub_blob(Path(digest): Path<String>) -> axum::response::Response {
        if digest != "sha256:cfg10" {
            return (axum::http::StatusCode::NOT_FOUND, "blob unknown").into_response();
        }
        Json(json!({"created": "2024-05-01T10:00:00+02:00"})).into_response()
    }

    async fn spawn_stub_registry() -> String {
        let router = Router::new()
            .route("/v2/team/app/manifests/{reference}", get(stub_manifest))
            .route("/v2/team/app/blobs/{digest}", get(stub_blob));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind to random port");
        let addr = listener.local_addr().expect("get local addr");
        tokio::spawn(async move {
            axum::serve(listener, router).await.ok();
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_tag_details_over_http() {
        let registry = client(&spawn_stub_registry().await);

        let details = tag_details(&registry, "team/app", "1.0").await.unwrap();
        assert_eq!(details.tag, "1.0");
        assert_eq!(details.digest.as_deref(), Some("sha256:app10"));
        assert_eq!(details.media_type.as_deref(), Some(DOCKER_MANIFEST_V2));
        assert_eq!(details.size_bytes, Some(1000));
        assert_eq!(details.created_at.as_deref(), Some("2024-05-01T08:00:00+00:00"));
        assert!(details.error.is_none());
    }

    #[tokio::test]
    async fn test_tag_details_unknown_tag_is_not_found() {
        let registry = client(&spawn_stub_registry().await);
        let err = tag_details(&registry, "team/app", "9.9").await.unwrap_err();
        assert!(err.is_not_found(), "Got: {:?}", err);
    }
}
