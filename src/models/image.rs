use serde::{Deserialize, Serialize};

/// An image known to the local container daemon.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LocalImage {
    pub reference: String,
    pub repository: String,
    pub tag: String,
    pub image_id: String,
    pub size: String,
    pub architecture: Option<String>,
    pub os: Option<String>,
}

/// One page of the registry catalog.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct RepositoryPage {
    pub repositories: Vec<String>,
    /// Cursor for the next page (`last` query parameter), if any.
    pub next: Option<String>,
}

/// A registry tag, optionally with what its manifest says about it.
///
/// Only `tag` is set when details were not requested. A failed lookup keeps
/// the tag and records `error` instead of the manifest fields.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct TagDetails {
    pub tag: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    /// Config plus layers for an image manifest, or the sum of the child
    /// manifest sizes for an index.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
    /// `created` from the image config, normalized to UTC when parseable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TagDetails {
    pub fn bare(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            ..Default::default()
        }
    }

    pub fn failed(tag: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            error: Some(error.into()),
            ..Default::default()
        }
    }
}
