//! Local image inventory via the container CLI.

use std::collections::HashMap;

use serde::Deserialize;

use crate::errors::{Result, SyncError};
use crate::models::LocalImage;

const IMAGE_LS_FORMAT: &str = "{{.Repository}}|{{.Tag}}|{{.ID}}|{{.Size}}";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectEntry {
    architecture: Option<String>,
    os: Option<String>,
    #[serde(default)]
    repo_tags: Option<Vec<String>>,
}

/// List tagged local images (at most `limit`), annotated with architecture and
/// OS from `image inspect` when available.
pub async fn list_local_images(docker_bin: &str, limit: usize) -> Result<Vec<LocalImage>> {
    let ls = tokio::process::Command::new(docker_bin)
        .args(["image", "ls", "--format", IMAGE_LS_FORMAT])
        .output()
        .await?;
    if !ls.status.success() {
        let stderr = String::from_utf8_lossy(&ls.stderr).trim().to_string();
        let message = if stderr.is_empty() {
            format!("{} image ls failed", docker_bin)
        } else {
            stderr
        };
        return Err(SyncError::Command(message));
    }

    let mut images = parse_image_ls(&String::from_utf8_lossy(&ls.stdout), limit);
    if images.is_empty() {
        return Ok(images);
    }

    let inspect = tokio::process::Command::new(docker_bin)
        .args(["image", "inspect"])
        .args(images.iter().map(|i| i.reference.as_str()))
        .output()
        .await?;
    if inspect.status.success() {
        let arch_map = parse_inspect_platforms(&String::from_utf8_lossy(&inspect.stdout));
        for image in &mut images {
            if let Some((arch, os)) = arch_map.get(&image.reference) {
                image.architecture = arch.clone();
                image.os = os.clone();
            }
        }
    } else {
        tracing::debug!("image inspect failed, returning images without platform info");
    }
    Ok(images)
}

/// Parse `image ls` output in `IMAGE_LS_FORMAT`, skipping untagged rows.
pub fn parse_image_ls(stdout: &str, limit: usize) -> Vec<LocalImage> {
    stdout
        .lines()
        .filter_map(|line| {
            let parts: Vec<&str> = line.trim().split('|').map(str::trim).collect();
            let &[repository, tag, image_id, size] = parts.as_slice() else {
                return None;
            };
            let untagged = |v: &str| v.is_empty() || v == "<none>";
            if untagged(repository) || untagged(tag) {
                return None;
            }
            Some(LocalImage {
                reference: format!("{}:{}", repository, tag),
                repository: repository.to_string(),
                tag: tag.to_string(),
                image_id: image_id.to_string(),
                size: size.to_string(),
                architecture: None,
                os: None,
            })
        })
        .take(limit)
        .collect()
}

/// Map each repo tag in `image inspect` JSON to its `(architecture, os)`.
/// Malformed JSON yields an empty map.
pub fn parse_inspect_platforms(
    stdout: &str,
) -> HashMap<String, (Option<String>, Option<String>)> {
    let entries: Vec<InspectEntry> = match serde_json::from_str(stdout) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::debug!("Unparsable image inspect output: {}", e);
            return HashMap::new();
        }
    };
    let mut map = HashMap::new();
    for entry in entries {
        for tag in entry.repo_tags.unwrap_or_default() {
            map.insert(tag, (entry.architecture.clone(), entry.os.clone()));
        }
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_image_ls_skips_untagged_and_malformed() {
        let out = "nginx|1.27|abc123|187MB\n\
                   <none>|<none>|def456|1GB\n\
                   broken line\n\
                   team/app|1.0|0a1b2c|12.5MB\n";
        let images = parse_image_ls(out, 300);
        assert_eq!(images.len(), 2);
        assert_eq!(images[0].reference, "nginx:1.27");
        assert_eq!(images[0].image_id, "abc123");
        assert_eq!(images[1].repository, "team/app");
        assert_eq!(images[1].size, "12.5MB");
        assert!(images[1].architecture.is_none());
    }

    #[test]
    fn test_parse_image_ls_respects_limit() {
        let out = "a|1|x|1MB\nb|1|y|1MB\nc|1|z|1MB\n";
        assert_eq!(parse_image_ls(out, 2).len(), 2);
    }

    #[test]
    fn test_parse_inspect_platforms() {
        let out = r#"[
            {"Architecture": "amd64", "Os": "linux", "RepoTags": ["nginx:1.27", "nginx:latest"]},
            {"Architecture": "arm64", "Os": "linux", "RepoTags": null}
        ]"#;
        let map = parse_inspect_platforms(out);
        assert_eq!(map.len(), 2);
        assert_eq!(
            map.get("nginx:latest"),
            Some(&(Some("amd64".to_string()), Some("linux".to_string())))
        );
    }

    #[test]
    fn test_parse_inspect_platforms_invalid_json() {
        assert!(parse_inspect_platforms("not json").is_empty());
    }
}
