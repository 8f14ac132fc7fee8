//! Expansion of job requests into ordered plans.
//!
//! Builders validate their input and fail with `InvalidArgument` before any
//! job exists. Only the remote prefix builder talks to the registry.

use crate::errors::{Result, SyncError};
use crate::models::{LocalPushRequest, RemotePrefixRequest};
use crate::reference::{
    apply_prefix, infer_platform, split_image_reference, ArchMode, PrefixMode,
};
use crate::registry::RegistryApi;

/// Number of mapping lines written to a job log before truncation.
pub const MAX_MAPPING_LOG_LINES: usize = 120;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanStep {
    /// A container CLI invocation; `argv[0]` is the binary.
    Command(Vec<String>),
    /// Delete every tag of a repository through the registry API.
    DeleteRepository(String),
}

impl PlanStep {
    pub fn describe(&self) -> String {
        match self {
            PlanStep::Command(argv) => argv.join(" "),
            PlanStep::DeleteRepository(repository) => format!("delete repository {}", repository),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Plan {
    pub source_label: String,
    pub target_label: String,
    pub steps: Vec<PlanStep>,
    /// `src => dst` lines for the job log.
    pub mappings: Vec<String>,
    /// Extra lines logged before execution, e.g. skipped repositories.
    pub notes: Vec<String>,
    /// Parameter summary logged as `[plan] ...`.
    pub summary: Option<String>,
    /// Registry `(repository, tag)` pairs to delete once the job succeeds.
    pub cleanup_targets: Vec<(String, String)>,
    pub total_items: usize,
}

impl Plan {
    /// Mapping lines as they should appear in the job log, truncated to
    /// [`MAX_MAPPING_LOG_LINES`] plus a trailing count line.
    pub fn mapping_log_lines(&self) -> Vec<String> {
        let mut lines: Vec<String> = self
            .mappings
            .iter()
            .take(MAX_MAPPING_LOG_LINES)
            .map(|m| format!("[map] {}", m))
            .collect();
        if self.mappings.len() > MAX_MAPPING_LOG_LINES {
            lines.push(format!(
                "[map] ... ({} more)",
                self.mappings.len() - MAX_MAPPING_LOG_LINES
            ));
        }
        lines
    }
}

/// Values shared by every builder.
#[derive(Debug, Clone)]
pub struct PlanContext {
    pub docker_bin: String,
    /// Default `host[:port]` used in pushed references.
    pub push_host: String,
    pub api_url: String,
}

impl PlanContext {
    fn docker(&self, args: &[&str]) -> PlanStep {
        let mut argv = Vec::with_capacity(args.len() + 1);
        argv.push(self.docker_bin.clone());
        argv.extend(args.iter().map(|a| a.to_string()));
        PlanStep::Command(argv)
    }

    fn target_host(&self, explicit: Option<&str>) -> Result<String> {
        let host = explicit
            .map(str::trim)
            .filter(|h| !h.is_empty())
            .unwrap_or(self.push_host.trim())
            .trim_end_matches('/')
            .to_string();
        if host.is_empty() {
            return Err(SyncError::invalid("target_registry_host cannot be empty."));
        }
        Ok(host)
    }
}

/// Trim, drop blanks and duplicates, keep first-seen order.
fn clean_names(items: &[String]) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    items
        .iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty() && seen.insert(s.clone()))
        .collect()
}

fn require_prefix(mode: PrefixMode, prefix: &str) -> Result<()> {
    if mode != PrefixMode::None && prefix.trim().trim_matches('/').is_empty() {
        return Err(SyncError::invalid(format!(
            "prefix_value is required when prefix_mode={}.",
            mode.as_str()
        )));
    }
    Ok(())
}

/// pull, tag and push one image into the registry.
pub fn build_mirror_plan(
    ctx: &PlanContext,
    source_image: &str,
    target_repository: Option<&str>,
    target_tag: Option<&str>,
) -> Result<Plan> {
    let source = source_image.trim();
    let (default_repo, default_tag) = split_image_reference(source)?;
    let repository = target_repository
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .map(str::to_string)
        .unwrap_or(default_repo);
    let tag = target_tag
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .unwrap_or(default_tag);
    let host = ctx.target_host(None)?;
    let target = format!("{}/{}:{}", host, repository, tag);

    Ok(Plan {
        source_label: source.to_string(),
        target_label: target.clone(),
        steps: vec![
            ctx.docker(&["pull", source]),
            ctx.docker(&["tag", source, &target]),
            ctx.docker(&["push", &target]),
        ],
        mappings: vec![format!("{} => {}", source, target)],
        total_items: 1,
        ..Default::default()
    })
}

/// Retag local images for the registry and push them.
///
/// `detected_arch` is the label used when `arch_mode` is `auto`.
pub fn build_local_push_plan(
    ctx: &PlanContext,
    request: &LocalPushRequest,
    detected_arch: &str,
) -> Result<Plan> {
    let refs: Vec<&str> = request
        .image_refs
        .iter()
        .map(|r| r.trim())
        .filter(|r| !r.is_empty())
        .collect();
    if refs.is_empty() {
        return Err(SyncError::invalid("At least one local image is required."));
    }

    let arch_mode = ArchMode::parse(&request.arch_mode)?;
    let prefix_mode = PrefixMode::parse(&request.prefix_mode, PrefixMode::None)?;
    let host = ctx.target_host(request.target_registry_host.as_deref())?;

    let arch_label = match arch_mode {
        ArchMode::Auto => detected_arch.trim().to_lowercase(),
        ArchMode::Custom => {
            let label = request.arch_value.trim().to_lowercase();
            if label.is_empty() {
                return Err(SyncError::invalid(
                    "arch_value is required when arch_mode=custom.",
                ));
            }
            label
        }
        ArchMode::None => String::new(),
    };
    require_prefix(prefix_mode, &request.prefix_value)?;

    let mut plan = Plan {
        source_label: format!("{} local images", refs.len()),
        target_label: host.clone(),
        total_items: refs.len(),
        summary: Some(format!(
            "arch_mode={} arch={} prefix_mode={} prefix={}",
            arch_mode.as_str(),
            if arch_label.is_empty() { "-" } else { arch_label.as_str() },
            prefix_mode.as_str(),
            if request.prefix_value.trim().is_empty() {
                "-"
            } else {
                request.prefix_value.trim()
            },
        )),
        ..Default::default()
    };

    for source in refs {
        let (repository, tag) = split_image_reference(source)?;
        let renamed = apply_prefix(&repository, prefix_mode, &request.prefix_value);
        if renamed.is_empty() {
            return Err(SyncError::invalid(format!(
                "Prefix operation removed repository name entirely for {}.",
                source
            )));
        }

        let mut target_tag = tag.clone();
        if !arch_label.is_empty() {
            let suffix = format!("-{}", arch_label);
            if !target_tag.ends_with(&suffix) {
                target_tag.push_str(&suffix);
            }
        }

        let target = format!("{}/{}:{}", host, renamed, target_tag);
        plan.mappings.push(format!("{} => {}", source, target));
        plan.steps.push(ctx.docker(&["tag", source, &target]));
        plan.steps.push(ctx.docker(&["push", &target]));
        if request.cleanup_local_tag {
            plan.steps.push(ctx.docker(&["image", "rm", source]));
        }
        if request.cleanup_registry_source_tag {
            plan.cleanup_targets.push((repository, tag));
        }
    }
    Ok(plan)
}

/// Copy every tag of each repository to a prefixed or unprefixed name.
pub async fn build_remote_prefix_plan(
    ctx: &PlanContext,
    registry: &dyn RegistryApi,
    request: &RemotePrefixRequest,
) -> Result<Plan> {
    let mode = PrefixMode::parse(&request.prefix_mode, PrefixMode::Add)?;
    if mode == PrefixMode::None {
        return Err(SyncError::invalid("prefix_mode must be one of: add, remove."));
    }
    let prefix = request.prefix_value.trim().trim_matches('/').to_string();
    if prefix.is_empty() {
        return Err(SyncError::invalid("prefix_value cannot be empty."));
    }
    let host = ctx.target_host(request.target_registry_host.as_deref())?;
    let repositories = clean_names(&request.repositories);
    if repositories.is_empty() {
        return Err(SyncError::invalid("At least one repository is required."));
    }

    let mut plan = Plan {
        source_label: format!("{} repositories", repositories.len()),
        target_label: format!("{} ({} {})", host, mode.as_str(), prefix),
        ..Default::default()
    };

    for repository in &repositories {
        let renamed = apply_prefix(repository, mode, &prefix);
        if renamed.is_empty() {
            return Err(SyncError::invalid(format!(
                "Prefix operation removed repository name entirely for {}.",
                repository
            )));
        }
        if renamed == *repository {
            plan.notes
                .push(format!("[skip] {} is unchanged by the prefix", repository));
            continue;
        }

        let tags = registry.list_tags(repository).await?;
        if tags.is_empty() {
            plan.notes.push(format!("[skip] {} has no tags", repository));
            continue;
        }

        for tag in tags {
            let source = format!("{}/{}:{}", host, repository, tag);
            let target = format!("{}/{}:{}", host, renamed, tag);
            let pull = match infer_platform(repository, &tag) {
                Some(platform) => ctx.docker(&["pull", "--platform", platform, &source]),
                None => ctx.docker(&["pull", &source]),
            };
            plan.mappings.push(format!("{} => {}", source, target));
            plan.steps.push(pull);
            plan.steps.push(ctx.docker(&["tag", &source, &target]));
            plan.steps.push(ctx.docker(&["push", &target]));
            if request.cleanup_source_tag {
                plan.cleanup_targets.push((repository.clone(), tag));
            }
            plan.total_items += 1;
        }
    }

    if plan.total_items == 0 {
        return Err(SyncError::invalid(
            "No tags found to rename in the selected repositories.",
        ));
    }
    plan.summary = Some(format!(
        "prefix_mode={} prefix={} repositories={} tags={}",
        mode.as_str(),
        prefix,
        repositories.len(),
        plan.total_items
    ));
    Ok(plan)
}

/// One registry-side delete step per repository.
pub fn build_repository_delete_plan(ctx: &PlanContext, repositories: &[String]) -> Result<Plan> {
    let repositories = clean_names(repositories);
    if repositories.is_empty() {
        return Err(SyncError::invalid("At least one repository is required."));
    }
    Ok(Plan {
        source_label: format!("{} repositories", repositories.len()),
        target_label: ctx.api_url.clone(),
        total_items: repositories.len(),
        summary: Some(format!("repositories={}", repositories.len())),
        steps: repositories
            .iter()
            .cloned()
            .map(PlanStep::DeleteRepository)
            .collect(),
        mappings: repositories.iter().map(|r| format!("{} => (deleted)", r)).collect(),
        ..Default::default()
    })
}
