// CLI job commands: mirror, push-local, rename, delete-repos, jobs, job

use std::time::Duration;

use reqwest::Client;
use serde_json::Value;

use super::{base_url, handle_request_error, read_json};
use crate::models::{Job, LocalPushRequest, RemotePrefixRequest};

const FOLLOW_POLL_INTERVAL: Duration = Duration::from_millis(700);

fn decode_job(body: Value) -> anyhow::Result<Job> {
    serde_json::from_value(body).map_err(|e| anyhow::anyhow!("Unexpected job payload: {}", e))
}

async fn post_job(
    host: &str,
    port: u16,
    path: &str,
    payload: &impl serde::Serialize,
) -> anyhow::Result<Job> {
    let client = Client::new();
    let url = format!("{}{}", base_url(host, port), path);

    let response = client
        .post(&url)
        .json(payload)
        .send()
        .await
        .map_err(|e| handle_request_error(e, host, port))?;
    decode_job(read_json(response).await?)
}

fn print_created(job: &Job) {
    println!("Job {} started ({}).", job.id, job.kind.as_str());
    println!("  Source: {}", job.source_label);
    println!("  Target: {}", job.target_label);
    println!("  Items:  {}", job.total_items);
    println!("Use 'regsync job {} --follow' to watch it.", job.id);
}

/// regsync mirror
pub async fn cmd_mirror(
    host: &str,
    port: u16,
    source: &str,
    repository: Option<&str>,
    tag: Option<&str>,
) -> anyhow::Result<()> {
    let payload = crate::models::MirrorRequest {
        source_image: source.to_string(),
        target_repository: repository.map(|s| s.to_string()),
        target_tag: tag.map(|s| s.to_string()),
    };
    let job = post_job(host, port, "/api/sync-jobs", &payload).await?;
    print_created(&job);
    Ok(())
}

/// regsync push-local
pub async fn cmd_push_local(
    host: &str,
    port: u16,
    request: &LocalPushRequest,
) -> anyhow::Result<()> {
    let job = post_job(host, port, "/api/local-push-jobs", request).await?;
    print_created(&job);
    Ok(())
}

/// regsync rename
pub async fn cmd_rename(host: &str, port: u16, request: &RemotePrefixRequest) -> anyhow::Result<()> {
    let job = post_job(host, port, "/api/remote-prefix-jobs", request).await?;
    print_created(&job);
    Ok(())
}

/// regsync delete-repos
pub async fn cmd_delete_repos(host: &str, port: u16, repositories: &[String]) -> anyhow::Result<()> {
    let payload = crate::models::RepositoryDeleteRequest {
        repositories: repositories.to_vec(),
    };
    let job = post_job(host, port, "/api/repository-delete-jobs", &payload).await?;
    print_created(&job);
    Ok(())
}

/// Shorten `s` to at most `width` characters, marking the cut with "...".
fn truncate(s: &str, width: usize) -> String {
    if s.chars().count() <= width {
        return s.to_string();
    }
    let keep = width.saturating_sub(3);
    format!("{}...", s.chars().take(keep).collect::<String>())
}

fn format_job_row(job: &Job) -> String {
    format!(
        "{:<14}{:<20}{:<9}{:<7}{:<26}{:<26}{}",
        job.id,
        job.kind.as_str(),
        job.status.to_string(),
        job.total_items,
        truncate(&job.source_label, 25),
        truncate(&job.target_label, 25),
        job.created_at.format("%Y-%m-%d %H:%M:%S"),
    )
}

/// regsync jobs
pub async fn cmd_jobs(host: &str, port: u16, limit: usize, json: bool) -> anyhow::Result<()> {
    let client = Client::new();
    let url = format!("{}/api/sync-jobs?limit={}", base_url(host, port), limit);

    let response = client
        .get(&url)
        .send()
        .await
        .map_err(|e| handle_request_error(e, host, port))?;
    let body = read_json(response).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&body)?);
        return Ok(());
    }

    let jobs: Vec<Job> = serde_json::from_value(body["jobs"].clone())
        .map_err(|e| anyhow::anyhow!("Unexpected job list payload: {}", e))?;

    if jobs.is_empty() {
        println!("No jobs found.");
        return Ok(());
    }

    println!(
        "{:<14}{:<20}{:<9}{:<7}{:<26}{:<26}{}",
        "ID", "KIND", "STATUS", "ITEMS", "SOURCE", "TARGET", "CREATED"
    );
    for job in &jobs {
        println!("{}", format_job_row(job));
    }

    Ok(())
}

/// Lines of `logs` that come after `last_seen`. When `last_seen` is gone
/// (never printed, or rotated out of the capped log), everything is new.
fn unseen_lines<'a>(logs: &'a [String], last_seen: Option<&str>) -> &'a [String] {
    match last_seen.and_then(|seen| logs.iter().rposition(|line| line == seen)) {
        Some(pos) => &logs[pos + 1..],
        None => logs,
    }
}

async fn fetch_job(client: &Client, host: &str, port: u16, id: &str) -> anyhow::Result<Job> {
    let url = format!("{}/api/sync-jobs/{}", base_url(host, port), id);
    let response = client
        .get(&url)
        .send()
        .await
        .map_err(|e| handle_request_error(e, host, port))?;
    decode_job(read_json(response).await?)
}

fn print_job_header(job: &Job) {
    println!("Job {} ({})", job.id, job.kind.as_str());
    println!("  Status:  {}", job.status);
    println!("  Source:  {}", job.source_label);
    println!("  Target:  {}", job.target_label);
    println!("  Items:   {}", job.total_items);
    println!("  Created: {}", job.created_at.to_rfc3339());
    println!("  Updated: {}", job.updated_at.to_rfc3339());
    if let Some(error) = &job.error {
        println!("  Error:   {}", error);
    }
}

/// regsync job
pub async fn cmd_job(
    host: &str,
    port: u16,
    id: &str,
    follow: bool,
    json: bool,
) -> anyhow::Result<()> {
    let client = Client::new();
    let mut job = fetch_job(&client, host, port, id).await?;

    if json && !follow {
        println!("{}", serde_json::to_string_pretty(&job)?);
        return Ok(());
    }

    if !follow {
        print_job_header(&job);
        println!();
        for line in &job.logs {
            println!("{}", line);
        }
        return Ok(());
    }

    let mut last_seen: Option<String> = None;
    loop {
        let logs: Vec<String> = job.logs.iter().cloned().collect();
        for line in unseen_lines(&logs, last_seen.as_deref()) {
            println!("{}", line);
        }
        if let Some(last) = logs.last() {
            last_seen = Some(last.clone());
        }

        // Registry cleanup keeps writing (and may flip success to failed)
        // after the plan itself finished.
        if job.status.is_terminal() && !job.cleanup_pending() {
            break;
        }
        tokio::time::sleep(FOLLOW_POLL_INTERVAL).await;
        job = fetch_job(&client, host, port, id).await?;
    }

    match &job.error {
        Some(error) => eprintln!("\n--- Job failed: {} ---", error),
        None => println!("\n--- Job finished ({}) ---", job.status),
    }
    if json {
        println!("{}", serde_json::to_string_pretty(&job)?);
    }

    Ok(())
}

// ===========================================================================
// Tests
// ===========================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::JobKind;

    fn lines(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("exactly-10", 10), "exactly-10");
        assert_eq!(
            truncate("registry.local:5000/team/app", 12),
            "registry....".to_string()
        );
        // Multi-byte input must not be split mid-character
        assert_eq!(truncate("ééééééé", 5), "éé...");
    }

    #[test]
    fn test_unseen_lines_first_poll_prints_everything() {
        let logs = lines(&["a", "b"]);
        assert_eq!(unseen_lines(&logs, None), &logs[..]);
    }

    #[test]
    fn test_unseen_lines_after_last_seen() {
        let logs = lines(&["a", "b", "c", "d"]);
        assert_eq!(unseen_lines(&logs, Some("b")), &logs[2..]);
        assert!(unseen_lines(&logs, Some("d")).is_empty());
    }

    #[test]
    fn test_unseen_lines_rotated_out() {
        let logs = lines(&["x", "y"]);
        assert_eq!(unseen_lines(&logs, Some("gone")), &logs[..]);
    }

    #[test]
    fn test_format_job_row() {
        let job = Job::new(JobKind::Mirror, "nginx:1.27", "registry.local:5000/nginx:1.27", 1);
        let row = format_job_row(&job);
        assert!(row.starts_with(&job.id), "Got: {}", row);
        assert!(row.contains("mirror"), "Got: {}", row);
        assert!(row.contains("running"), "Got: {}", row);
        assert!(row.contains("nginx:1.27"), "Got: {}", row);
        assert!(row.contains("registry.local:5000/ng..."), "Got: {}", row);
    }

    #[tokio::test]
    async fn test_cmd_jobs_connection_error() {
        let result = cmd_jobs("127.0.0.1", 1, 20, false).await;
        assert!(result.is_err());
        let err = result.unwrap_err().to_string();
        assert!(
            err.contains("Could not connect") || err.contains("Request failed"),
            "Got: {}",
            err
        );
    }
}
