pub mod jobs;
pub mod server;

use clap::{Parser, Subcommand};
use serde_json::Value;

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 8390;

/// regsync - container registry sync service and client
#[derive(Parser, Debug)]
#[command(
    name = "regsync",
    version,
    about = "regsync - mirror, push, rename and delete images in a container registry"
)]
pub struct Cli {
    /// Server host (bind address for `serve`, target for client commands)
    #[arg(long, global = true)]
    pub host: Option<String>,

    /// Server port (listen port for `serve`, target for client commands)
    #[arg(long, global = true)]
    pub port: Option<u16>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

impl Cli {
    pub fn client_host(&self) -> &str {
        self.host.as_deref().unwrap_or(DEFAULT_HOST)
    }

    pub fn client_port(&self) -> u16 {
        self.port.unwrap_or(DEFAULT_PORT)
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the HTTP server in the foreground
    Serve {
        /// Path to configuration file
        #[arg(short = 'c', long = "config")]
        config: Option<String>,
    },

    /// Show server and registry status
    Status,

    /// Mirror a remote image into the registry (pull, tag, push)
    Mirror {
        /// Source image reference, e.g. nginx:1.27
        source: String,

        /// Target repository (defaults to the source repository)
        #[arg(long)]
        repository: Option<String>,

        /// Target tag (defaults to the source tag)
        #[arg(long)]
        tag: Option<String>,
    },

    /// Retag local images for the registry and push them
    PushLocal {
        /// Local image references
        #[arg(required = true)]
        refs: Vec<String>,

        /// Repository prefix mode: none, add or remove
        #[arg(long = "prefix-mode", default_value = "none")]
        prefix_mode: String,

        /// Prefix to add or remove
        #[arg(long, default_value = "")]
        prefix: String,

        /// Architecture suffix mode: auto, custom or none
        #[arg(long = "arch-mode", default_value = "auto")]
        arch_mode: String,

        /// Architecture label when --arch-mode=custom
        #[arg(long, default_value = "")]
        arch: String,

        /// Registry host override
        #[arg(long = "registry-host")]
        registry_host: Option<String>,

        /// Remove the local source tag after pushing
        #[arg(long = "rm-local")]
        rm_local: bool,

        /// Delete the source tag from the registry after a successful push
        #[arg(long = "rm-source")]
        rm_source: bool,
    },

    /// Copy registry repositories under a prefixed or unprefixed name
    Rename {
        /// Repositories to rename
        #[arg(required = true)]
        repositories: Vec<String>,

        /// Prefix to add or remove
        #[arg(long)]
        prefix: String,

        /// Prefix mode: add or remove
        #[arg(long = "prefix-mode", default_value = "add")]
        prefix_mode: String,

        /// Delete the source tags after a successful rename
        #[arg(long = "rm-source")]
        rm_source: bool,

        /// Registry host override
        #[arg(long = "registry-host")]
        registry_host: Option<String>,
    },

    /// Delete every tag of the given repositories
    DeleteRepos {
        /// Repositories to delete
        #[arg(required = true)]
        repositories: Vec<String>,
    },

    /// List recent jobs
    Jobs {
        /// Maximum number of jobs
        #[arg(long, default_value_t = 20)]
        limit: usize,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show one job and its log
    Job {
        /// Job id
        id: String,

        /// Poll until the job finishes, printing new log lines
        #[arg(long)]
        follow: bool,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

/// Build the base URL for the server HTTP API.
pub fn base_url(host: &str, port: u16) -> String {
    format!("http://{}:{}", host, port)
}

/// Format a connection error message for when the server is not reachable.
pub fn connection_error_message(host: &str, port: u16) -> String {
    format!(
        "Could not connect to regsync at {}:{}. Is it running? (try: regsync serve)",
        host, port
    )
}

/// Helper to handle reqwest errors and produce a user-friendly connection error.
pub(crate) fn handle_request_error(err: reqwest::Error, host: &str, port: u16) -> anyhow::Error {
    if err.is_connect() || err.is_timeout() {
        anyhow::anyhow!("{}", connection_error_message(host, port))
    } else {
        anyhow::anyhow!("Request failed: {}", err)
    }
}

/// Decode a JSON response body, turning non-2xx answers into errors that
/// carry the server's `message`.
pub(crate) async fn read_json(response: reqwest::Response) -> anyhow::Result<Value> {
    let status = response.status();
    let body: Value = response
        .json()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to parse response: {}", e))?;
    if !status.is_success() {
        let message = body["message"].as_str().unwrap_or("Unknown error");
        anyhow::bail!("{}", message);
    }
    Ok(body)
}

/// Dispatch the CLI command to the appropriate handler.
pub async fn dispatch(cli: &Cli) -> anyhow::Result<()> {
    let host = cli.client_host();
    let port = cli.client_port();
    match &cli.command {
        Some(Commands::Serve { config }) => {
            server::cmd_serve(config.as_deref(), cli.host.as_deref(), cli.port, cli.verbose).await
        }
        Some(Commands::Status) => server::cmd_status(host, port, cli.verbose).await,
        Some(Commands::Mirror {
            source,
            repository,
            tag,
        }) => jobs::cmd_mirror(host, port, source, repository.as_deref(), tag.as_deref()).await,
        Some(Commands::PushLocal {
            refs,
            prefix_mode,
            prefix,
            arch_mode,
            arch,
            registry_host,
            rm_local,
            rm_source,
        }) => {
            let request = crate::models::LocalPushRequest {
                image_refs: refs.clone(),
                prefix_mode: prefix_mode.clone(),
                prefix_value: prefix.clone(),
                arch_mode: arch_mode.clone(),
                arch_value: arch.clone(),
                target_registry_host: registry_host.clone(),
                cleanup_local_tag: *rm_local,
                cleanup_registry_source_tag: *rm_source,
            };
            jobs::cmd_push_local(host, port, &request).await
        }
        Some(Commands::Rename {
            repositories,
            prefix,
            prefix_mode,
            rm_source,
            registry_host,
        }) => {
            let request = crate::models::RemotePrefixRequest {
                repositories: repositories.clone(),
                prefix_mode: prefix_mode.clone(),
                prefix_value: prefix.clone(),
                cleanup_source_tag: *rm_source,
                target_registry_host: registry_host.clone(),
            };
            jobs::cmd_rename(host, port, &request).await
        }
        Some(Commands::DeleteRepos { repositories }) => {
            jobs::cmd_delete_repos(host, port, repositories).await
        }
        Some(Commands::Jobs { limit, json }) => jobs::cmd_jobs(host, port, *limit, *json).await,
        Some(Commands::Job { id, follow, json }) => {
            jobs::cmd_job(host, port, id, *follow, *json).await
        }
        None => {
            // No subcommand provided -- print help
            use clap::CommandFactory;
            Cli::command().print_help()?;
            println!();
            Ok(())
        }
    }
}
