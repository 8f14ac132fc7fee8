// CLI server commands: serve, status

use reqwest::Client;

use super::{base_url, handle_request_error, read_json};

/// regsync serve
pub async fn cmd_serve(
    config: Option<&str>,
    host_override: Option<&str>,
    port_override: Option<u16>,
    verbose: bool,
) -> anyhow::Result<()> {
    let config_path = config.map(std::path::Path::new);
    crate::daemon::start_server(config_path, host_override, port_override, verbose).await
}

/// regsync status
pub async fn cmd_status(host: &str, port: u16, verbose: bool) -> anyhow::Result<()> {
    let client = Client::new();
    let url = format!("{}/health", base_url(host, port));

    let response = client
        .get(&url)
        .send()
        .await
        .map_err(|e| handle_request_error(e, host, port))?;
    let body = read_json(response).await?;

    let server_status = body["status"].as_str().unwrap_or("unknown");
    let version = body["version"].as_str().unwrap_or("unknown");
    let uptime = body["uptime_seconds"].as_u64().unwrap_or(0);
    let total_jobs = body["total_jobs"].as_u64().unwrap_or(0);
    let api_url = body["registry_api_url"].as_str().unwrap_or("unknown");
    let push_host = body["registry_push_host"].as_str().unwrap_or("unknown");
    let registry_healthy = body["registry_healthy"].as_bool().unwrap_or(false);
    let arch = body["detected_arch"].as_str().unwrap_or("unknown");

    println!("Server Status: {}", server_status);
    println!("  API:         http://{}:{}", host, port);
    println!(
        "  Registry:    {} ({})",
        api_url,
        if registry_healthy { "reachable" } else { "unreachable" }
    );
    println!("  Push Host:   {}", push_host);
    println!("  Arch:        {}", arch);
    println!("  Jobs:        {} retained", total_jobs);
    println!("  Uptime:      {}", format_uptime(uptime));
    println!("  Version:     {}", version);

    if verbose {
        println!("\nRaw response:");
        println!("{}", serde_json::to_string_pretty(&body)?);
    }

    Ok(())
}

/// Format uptime seconds into a human-readable string.
fn format_uptime(seconds: u64) -> String {
    let days = seconds / 86400;
    let hours = (seconds % 86400) / 3600;
    let mins = (seconds % 3600) / 60;
    let secs = seconds % 60;

    if days > 0 {
        format!("{}d {}h {}m {}s", days, hours, mins, secs)
    } else if hours > 0 {
        format!("{}h {}m {}s", hours, mins, secs)
    } else if mins > 0 {
        format!("{}m {}s", mins, secs)
    } else {
        format!("{}s", secs)
    }
}
