//! Image reference parsing and repository name transforms.

use crate::errors::{Result, SyncError};

/// Tag used when a reference carries neither a tag nor a digest.
const DEFAULT_TAG: &str = "latest";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrefixMode {
    None,
    Add,
    Remove,
}

impl PrefixMode {
    /// Parse a mode string case-insensitively. A blank value yields `default`.
    pub fn parse(value: &str, default: PrefixMode) -> Result<Self> {
        match value.trim().to_lowercase().as_str() {
            "" => Ok(default),
            "none" => Ok(PrefixMode::None),
            "add" => Ok(PrefixMode::Add),
            "remove" => Ok(PrefixMode::Remove),
            _ => Err(SyncError::invalid(
                "prefix_mode must be one of: add, remove, none.",
            )),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PrefixMode::None => "none",
            PrefixMode::Add => "add",
            PrefixMode::Remove => "remove",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchMode {
    Auto,
    Custom,
    None,
}

impl ArchMode {
    pub fn parse(value: &str) -> Result<Self> {
        match value.trim().to_lowercase().as_str() {
            "" | "auto" => Ok(ArchMode::Auto),
            "custom" => Ok(ArchMode::Custom),
            "none" => Ok(ArchMode::None),
            _ => Err(SyncError::invalid(
                "arch_mode must be one of: auto, custom, none.",
            )),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ArchMode::Auto => "auto",
            ArchMode::Custom => "custom",
            ArchMode::None => "none",
        }
    }
}

fn is_registry_component(value: &str) -> bool {
    value.contains('.') || value.contains(':') || value == "localhost"
}

/// Split an image reference into `(repository, tag)`.
///
/// - `nginx` -> `("nginx", "latest")`
/// - `registry.local:5000/team/app:1.0` -> `("team/app", "1.0")`
/// - `app@sha256:abc` -> `("app", "sha256-abc")`
pub fn split_image_reference(reference: &str) -> Result<(String, String)> {
    let value = reference.trim();
    if value.is_empty() {
        return Err(SyncError::invalid("source_image cannot be empty."));
    }

    let (base_name, tag) = match value.rsplit_once('@') {
        Some((name, digest)) => (name, digest.replace(':', "-")),
        None => {
            let slash = value.rfind('/');
            match value.rfind(':') {
                // The colon only separates a tag when it follows the last slash;
                // otherwise it belongs to a `host:port` prefix.
                Some(colon) if slash.map_or(true, |s| colon > s) => {
                    (&value[..colon], value[colon + 1..].to_string())
                }
                _ => (value, DEFAULT_TAG.to_string()),
            }
        }
    };

    let repository = match base_name.split_once('/') {
        Some((first, rest)) if is_registry_component(first) => rest,
        _ => base_name,
    };

    if repository.is_empty() {
        return Err(SyncError::invalid(format!(
            "Cannot derive target repository from '{}'.",
            reference
        )));
    }
    Ok((repository.to_string(), tag))
}

/// Add or strip a namespace prefix on a repository name.
///
/// Adding is idempotent. Removing a prefix equal to the whole repository
/// yields an empty string, which callers must reject.
pub fn apply_prefix(repository: &str, mode: PrefixMode, prefix: &str) -> String {
    let base = repository.trim_matches('/');
    let prefix = prefix.trim_matches('/');
    if prefix.is_empty() {
        return base.to_string();
    }
    let scoped = format!("{}/", prefix);
    match mode {
        PrefixMode::None => base.to_string(),
        PrefixMode::Add => {
            if base == prefix || base.starts_with(&scoped) {
                base.to_string()
            } else {
                format!("{}{}", scoped, base)
            }
        }
        PrefixMode::Remove => {
            if base == prefix {
                String::new()
            } else {
                base.strip_prefix(&scoped).unwrap_or(base).to_string()
            }
        }
    }
}

/// Normalize a raw machine architecture to `x86`, `arm`, or the lowercased input.
pub fn normalize_arch_label(raw: &str) -> String {
    let machine = raw.trim().to_lowercase();
    match machine.as_str() {
        "x86_64" | "amd64" | "x64" => "x86".to_string(),
        "aarch64" | "arm64" => "arm".to_string(),
        "" => "unknown".to_string(),
        m if m.starts_with("arm") => "arm".to_string(),
        _ => machine,
    }
}

/// Architecture label of the machine this process runs on.
pub fn detect_arch_label() -> String {
    normalize_arch_label(std::env::consts::ARCH)
}

/// Guess a `--platform` value from architecture hints in a tag or repository.
///
/// The tag is checked first; the repository only when the tag has no hint.
pub fn infer_platform(repository: &str, tag: &str) -> Option<&'static str> {
    platform_hint(tag).or_else(|| platform_hint(repository))
}

fn platform_hint(text: &str) -> Option<&'static str> {
    let text = text.to_lowercase();
    if text.contains("arm64") || text.contains("aarch64") {
        Some("linux/arm64")
    } else if text.contains("amd64") || text.contains("x86") {
        Some("linux/amd64")
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn split(r: &str) -> (String, String) {
        split_image_reference(r).expect("split")
    }

    #[test]
    fn test_split_plain_name_defaults_to_latest() {
        assert_eq!(split("nginx"), ("nginx".into(), "latest".into()));
    }

    #[test]
    fn test_split_name_and_tag() {
        assert_eq!(split("nginx:1.27"), ("nginx".into(), "1.27".into()));
        assert_eq!(
            split("library/nginx:1.27-alpine"),
            ("library/nginx".into(), "1.27-alpine".into())
        );
    }

    #[test]
    fn test_split_strips_registry_host_with_port() {
        assert_eq!(
            split("registry.local:5000/team/app"),
            ("team/app".into(), "latest".into())
        );
        assert_eq!(
            split("registry.local:5000/team/app:2.0"),
            ("team/app".into(), "2.0".into())
        );
    }

    #[test]
    fn test_split_strips_localhost_and_dotted_hosts() {
        assert_eq!(split("localhost/app:1"), ("app".into(), "1".into()));
        assert_eq!(
            split("ghcr.io/org/tool:v3"),
            ("org/tool".into(), "v3".into())
        );
    }

    #[test]
    fn test_split_keeps_plain_namespace() {
        assert_eq!(split("team/app:1"), ("team/app".into(), "1".into()));
    }

    #[test]
    fn test_split_digest_becomes_tag() {
        assert_eq!(
            split("nginx@sha256:abcdef"),
            ("nginx".into(), "sha256-abcdef".into())
        );
        assert_eq!(
            split("ghcr.io/org/tool@sha256:0123"),
            ("org/tool".into(), "sha256-0123".into())
        );
    }

    #[test]
    fn test_split_trims_whitespace() {
        assert_eq!(split("  nginx:1.27 \n"), ("nginx".into(), "1.27".into()));
    }

    #[test]
    fn test_split_empty_is_invalid() {
        for input in ["", "   "] {
            match split_image_reference(input) {
                Err(SyncError::InvalidArgument(_)) => {}
                other => panic!("Expected InvalidArgument, got: {:?}", other),
            }
        }
    }

    #[test]
    fn test_split_empty_repository_is_invalid() {
        assert!(split_image_reference(":1.0").is_err());
        assert!(split_image_reference("registry.local:5000/").is_err());
    }

    #[test]
    fn test_split_then_reassemble_round_trips() {
        for reference in ["nginx:1.27", "team/app:2.0", "a/b/c:latest", "redis:7-alpine"] {
            let (repo, tag) = split(reference);
            assert_eq!(format!("{}:{}", repo, tag), reference);
        }
    }

    #[test]
    fn test_apply_prefix_add() {
        assert_eq!(apply_prefix("nginx", PrefixMode::Add, "team"), "team/nginx");
        assert_eq!(apply_prefix("/nginx/", PrefixMode::Add, "/team/"), "team/nginx");
    }

    #[test]
    fn test_apply_prefix_add_is_idempotent() {
        for repo in ["nginx", "team/nginx", "team", "other/app"] {
            let once = apply_prefix(repo, PrefixMode::Add, "team");
            let twice = apply_prefix(&once, PrefixMode::Add, "team");
            assert_eq!(once, twice, "repo {}", repo);
        }
    }

    #[test]
    fn test_apply_prefix_remove_inverts_add() {
        for repo in ["nginx", "other/app", "teamster/app"] {
            let added = apply_prefix(repo, PrefixMode::Add, "team");
            assert_eq!(apply_prefix(&added, PrefixMode::Remove, "team"), repo);
        }
    }

    #[test]
    fn test_apply_prefix_remove() {
        assert_eq!(apply_prefix("team/nginx", PrefixMode::Remove, "team"), "nginx");
        assert_eq!(apply_prefix("nginx", PrefixMode::Remove, "team"), "nginx");
        assert_eq!(apply_prefix("team", PrefixMode::Remove, "team"), "");
    }

    #[test]
    fn test_apply_prefix_none_or_empty_prefix_is_identity() {
        assert_eq!(apply_prefix("nginx", PrefixMode::None, "team"), "nginx");
        assert_eq!(apply_prefix("nginx", PrefixMode::Add, ""), "nginx");
        assert_eq!(apply_prefix("team/nginx", PrefixMode::Remove, "/"), "team/nginx");
    }

    #[test]
    fn test_prefix_mode_parse() {
        assert_eq!(PrefixMode::parse("ADD", PrefixMode::None).unwrap(), PrefixMode::Add);
        assert_eq!(PrefixMode::parse(" remove ", PrefixMode::None).unwrap(), PrefixMode::Remove);
        assert_eq!(PrefixMode::parse("", PrefixMode::Add).unwrap(), PrefixMode::Add);
        assert!(matches!(
            PrefixMode::parse("swap", PrefixMode::None),
            Err(SyncError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_arch_mode_parse() {
        assert_eq!(ArchMode::parse("").unwrap(), ArchMode::Auto);
        assert_eq!(ArchMode::parse("Custom").unwrap(), ArchMode::Custom);
        assert_eq!(ArchMode::parse("none").unwrap(), ArchMode::None);
        assert!(ArchMode::parse("riscv").is_err());
    }

    #[test]
    fn test_normalize_arch_label() {
        assert_eq!(normalize_arch_label("x86_64"), "x86");
        assert_eq!(normalize_arch_label("AMD64"), "x86");
        assert_eq!(normalize_arch_label("aarch64"), "arm");
        assert_eq!(normalize_arch_label("armv7l"), "arm");
        assert_eq!(normalize_arch_label("riscv64"), "riscv64");
        assert_eq!(normalize_arch_label(""), "unknown");
    }

    #[test]
    fn test_detect_arch_label_is_normalized() {
        let label = detect_arch_label();
        assert!(!label.is_empty());
        assert_eq!(label, label.to_lowercase());
    }

    #[test]
    fn test_infer_platform() {
        assert_eq!(infer_platform("app", "1.0-x86"), Some("linux/amd64"));
        assert_eq!(infer_platform("app", "1.0-amd64"), Some("linux/amd64"));
        assert_eq!(infer_platform("app", "1.0-arm64"), Some("linux/arm64"));
        assert_eq!(infer_platform("aarch64/app", "1.0"), Some("linux/arm64"));
        assert_eq!(infer_platform("x86/app", "1.0-arm64"), Some("linux/arm64"));
        assert_eq!(infer_platform("app", "1.0"), None);
    }
}
