use clap::{Parser, ValueEnum};
use serde::Serialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use mtland::adapter::{bing, google, moses, LanguagePair};
use mtland::broker::{Fetched, WorkerProxy};
use mtland::config::{AdapterConfig, BusyPolicy, IsolationMode, WorkerConfig};
use mtland::message::TranslationJobMessage;
use mtland::node::WorkerNode;
use mtland::shutdown::install_shutdown_handler;
use mtland::worker::runner::run_job;

#[derive(Parser, Debug)]
#[command(name = "mtland")]
#[command(version)]
#[command(about = "Translation job broker and worker")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Start a translation worker
    Worker(WorkerArgs),

    /// Run one translation job in isolation (spawned by the worker)
    #[command(hide = true)]
    RunJob {
        #[arg(long)]
        message_dir: PathBuf,

        #[arg(long)]
        request_id: String,

        /// JSON adapter description
        #[arg(long)]
        adapter_spec: String,
    },

    /// Job management commands against a worker
    Job {
        #[command(flatten)]
        client: ClientArgs,

        #[command(subcommand)]
        command: JobCommands,
    },

    /// Worker management commands
    Remote {
        #[command(flatten)]
        client: ClientArgs,

        #[command(subcommand)]
        command: RemoteCommands,
    },
}

// =============================================================================
// Worker Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct WorkerArgs {
    /// Address to listen on
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Port to listen on
    #[arg(long, default_value = "8100")]
    port: u16,

    /// Directory holding persisted job messages
    #[arg(long)]
    message_dir: Option<PathBuf>,

    /// How each job is isolated from the worker
    #[arg(long, value_enum, default_value = "process")]
    isolation: IsolationArg,

    /// Refuse new jobs once this many are running (multi-pair Moses
    /// defaults to 1)
    #[arg(long)]
    max_running: Option<usize>,

    #[command(subcommand)]
    adapter: AdapterCommand,
}

#[derive(Debug, Clone, ValueEnum)]
enum IsolationArg {
    Process,
    Task,
}

#[derive(clap::Subcommand, Debug)]
enum AdapterCommand {
    /// Uppercasing test backend
    Dummy {
        /// Delay before each translation
        #[arg(long, default_value = "0")]
        delay_ms: u64,
    },
    /// Local decoder process
    Moses {
        /// Decoder binary
        #[arg(long, default_value = "moses")]
        command: PathBuf,

        /// Decoder configuration file, passed as `-f`
        #[arg(long)]
        config: PathBuf,

        #[arg(long, short = 's')]
        source_language: String,

        #[arg(long, short = 't')]
        target_language: String,
    },
    /// Local decoder serving many pairs, one config per pair
    MosesMulti {
        /// Decoder binary
        #[arg(long, default_value = "moses")]
        command: PathBuf,

        /// Config path; `{source}` and `{target}` become the pair's engine codes
        #[arg(long)]
        config_template: String,
    },
    /// Decoder behind an XML-RPC server
    MosesServer {
        #[arg(long)]
        url: String,

        #[arg(long, short = 's')]
        source_language: String,

        #[arg(long, short = 't')]
        target_language: String,
    },
    /// Rule-based engine behind an XML-RPC server
    Lucy {
        #[arg(long)]
        url: String,
    },
    /// Web translation form
    Google {
        #[arg(long, default_value = google::DEFAULT_URL)]
        url: String,

        #[arg(long, default_value_t = google::DEFAULT_MAX_LINES)]
        max_lines: usize,

        #[arg(long, default_value_t = google::DEFAULT_MAX_CHARS)]
        max_chars: usize,
    },
    /// Translation HTTP API
    Bing {
        #[arg(long)]
        app_id: String,

        #[arg(long, default_value = bing::DEFAULT_URL)]
        url: String,

        #[arg(long, default_value_t = bing::DEFAULT_MAX_LINES)]
        max_lines: usize,
    },
}

impl From<AdapterCommand> for AdapterConfig {
    fn from(command: AdapterCommand) -> Self {
        match command {
            AdapterCommand::Dummy { delay_ms } => AdapterConfig::Dummy { delay_ms },
            AdapterCommand::Moses {
                command,
                config,
                source_language,
                target_language,
            } => AdapterConfig::Moses {
                command,
                config,
                source_language,
                target_language,
            },
            AdapterCommand::MosesMulti {
                command,
                config_template,
            } => AdapterConfig::MosesMulti {
                command,
                config_template,
                pairs: moses::default_multi_pairs(),
                codes: moses::default_multi_codes(),
            },
            AdapterCommand::MosesServer {
                url,
                source_language,
                target_language,
            } => AdapterConfig::MosesServer {
                url,
                source_language,
                target_language,
            },
            AdapterCommand::Lucy { url } => AdapterConfig::Lucy { url },
            AdapterCommand::Google {
                url,
                max_lines,
                max_chars,
            } => AdapterConfig::Google {
                url,
                max_lines,
                max_chars,
            },
            AdapterCommand::Bing {
                app_id,
                url,
                max_lines,
            } => AdapterConfig::Bing {
                url,
                app_id,
                max_lines,
            },
        }
    }
}

// =============================================================================
// Client Arguments (shared by job and remote commands)
// =============================================================================

#[derive(Parser, Debug)]
struct ClientArgs {
    /// Worker address
    #[arg(long, short = 'a', default_value = "http://127.0.0.1:8100")]
    addr: String,

    /// Per-call timeout in seconds
    #[arg(long, default_value = "10")]
    timeout: u64,

    /// Output format
    #[arg(long, short = 'o', default_value = "table")]
    output: OutputFormat,
}

impl ClientArgs {
    fn proxy(&self) -> Result<WorkerProxy, Box<dyn std::error::Error>> {
        Ok(WorkerProxy::new(
            self.addr.clone(),
            &self.addr,
            Duration::from_secs(self.timeout),
        )?)
    }
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

// =============================================================================
// Job Commands
// =============================================================================

#[derive(clap::Subcommand, Debug)]
enum JobCommands {
    /// Submit a translation job
    Submit {
        /// Source language (3-letter code)
        #[arg(long, short = 's')]
        source: String,

        /// Target language (3-letter code)
        #[arg(long, short = 't')]
        target: String,

        /// Text to translate; read from --file when omitted
        text: Option<String>,

        /// Read the source text from a file
        #[arg(long, conflicts_with = "text")]
        file: Option<PathBuf>,
    },
    /// Get status of a job
    Status { request_id: String },
    /// Fetch the translation of a finished job
    Fetch { request_id: String },
    /// Delete a job, killing it if still running
    Delete { request_id: String },
    /// List jobs registered on the worker
    List,
}

// =============================================================================
// Remote Commands
// =============================================================================

#[derive(clap::Subcommand, Debug)]
enum RemoteCommands {
    /// Liveness, load and language pairs
    Status,
    /// Kill all running jobs and stop the worker
    Stop,
}

// =============================================================================
// JSON Output Types
// =============================================================================

#[derive(Serialize)]
struct SubmitOutput {
    request_id: String,
    accepted: bool,
}

#[derive(Serialize)]
struct StatusOutput {
    request_id: String,
    valid: bool,
    ready: bool,
}

#[derive(Serialize)]
struct PacketOutput {
    key: String,
    value: String,
}

#[derive(Serialize)]
struct FetchOutput {
    request_id: String,
    status: &'static str,
    source_language: Option<String>,
    target_language: Option<String>,
    target_text: Option<String>,
    packet_data: Vec<PacketOutput>,
}

#[derive(Serialize)]
struct DeleteOutput {
    request_id: String,
    deleted: bool,
}

#[derive(Serialize)]
struct ListOutput {
    requests: Vec<String>,
}

#[derive(Serialize)]
struct RemoteStatusOutput {
    address: String,
    alive: bool,
    busy: bool,
    language_pairs: Vec<LanguagePair>,
}

// =============================================================================
// Worker Implementation
// =============================================================================

fn init_tracing() {
    // Logs go to stderr: job processes run with stdout discarded.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
}

async fn run_worker(args: WorkerArgs) -> Result<(), Box<dyn std::error::Error>> {
    let listen_addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;

    let isolation = match args.isolation {
        IsolationArg::Process => IsolationMode::Process,
        IsolationArg::Task => IsolationMode::Task,
    };
    let mut config = WorkerConfig::new(listen_addr, args.adapter.into()).with_isolation(isolation);
    if let Some(max_running) = args.max_running {
        config = config.with_busy_policy(BusyPolicy::CapacityLimited { max_running });
    }
    if let Some(dir) = args.message_dir {
        config = config.with_message_dir(dir);
    }

    let shutdown = install_shutdown_handler();
    WorkerNode::new(config)?.run(shutdown).await?;
    Ok(())
}

// =============================================================================
// Client Command Handlers
// =============================================================================

async fn handle_job_submit(
    proxy: &WorkerProxy,
    source: String,
    target: String,
    text: Option<String>,
    file: Option<PathBuf>,
    output_format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let text = match (text, file) {
        (Some(text), _) => text,
        (None, Some(path)) => tokio::fs::read_to_string(path).await?,
        (None, None) => return Err("Provide the text to translate or --file".into()),
    };

    let message = TranslationJobMessage::new(source, target, text);
    message.validate_languages()?;
    let accepted = proxy.start_translation(&message).await;

    match output_format {
        OutputFormat::Json => {
            let output = SubmitOutput {
                request_id: message.request_id.clone(),
                accepted,
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Table => {
            if accepted {
                println!("Job submitted successfully!");
                println!("Request ID: {}", message.request_id);
            }
        }
    }
    if !accepted {
        eprintln!("Error: Worker at {} refused the job", proxy.name());
        std::process::exit(1);
    }
    Ok(())
}

async fn handle_job_status(
    proxy: &WorkerProxy,
    request_id: String,
    output_format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let valid = proxy.is_valid(&request_id).await;
    let ready = valid && proxy.is_ready(&request_id).await;

    match output_format {
        OutputFormat::Json => {
            let output = StatusOutput {
                request_id,
                valid,
                ready,
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Table => {
            let status = match (valid, ready) {
                (false, _) => "UNKNOWN",
                (true, false) => "RUNNING",
                (true, true) => "READY",
            };
            println!("Request ID: {}", request_id);
            println!("Status:     {}", status);
        }
    }
    Ok(())
}

async fn handle_job_fetch(
    proxy: &WorkerProxy,
    request_id: String,
    output_format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let fetched = proxy.fetch_translation(&request_id).await;

    match output_format {
        OutputFormat::Json => {
            let output = match &fetched {
                Fetched::Message(message) => FetchOutput {
                    request_id,
                    status: "READY",
                    source_language: Some(message.source_language.clone()),
                    target_language: Some(message.target_language.clone()),
                    target_text: message.target_text.clone(),
                    packet_data: message
                        .packet_data
                        .iter()
                        .map(|kv| PacketOutput {
                            key: kv.key.clone(),
                            value: kv.value.clone(),
                        })
                        .collect(),
                },
                Fetched::NotReady | Fetched::Error => FetchOutput {
                    request_id,
                    status: if fetched == Fetched::NotReady {
                        "NOT_READY"
                    } else {
                        "ERROR"
                    },
                    source_language: None,
                    target_language: None,
                    target_text: None,
                    packet_data: Vec::new(),
                },
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Table => match &fetched {
            Fetched::Message(message) => {
                println!("Request ID: {}", message.request_id);
                println!(
                    "Languages:  {} -> {}",
                    message.source_language, message.target_language
                );
                println!("Translation:");
                for line in message.target_text.as_deref().unwrap_or_default().lines() {
                    println!("  {}", line);
                }
                if !message.packet_data.is_empty() {
                    println!("Packets:");
                    for kv in &message.packet_data {
                        println!("  {} ({} bytes)", kv.key, kv.value.len());
                    }
                }
            }
            Fetched::NotReady => println!("Request {} is not ready yet", request_id),
            Fetched::Error => {
                eprintln!("Error: No translation available for {}", request_id);
                std::process::exit(1);
            }
        },
    }
    Ok(())
}

async fn handle_job_delete(
    proxy: &WorkerProxy,
    request_id: String,
    output_format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let deleted = proxy.delete_translation(&request_id).await;

    match output_format {
        OutputFormat::Json => {
            let output = DeleteOutput {
                request_id,
                deleted,
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Table => {
            if deleted {
                println!("Request {} deleted", request_id);
            } else {
                eprintln!("Error: Worker did not delete {}", request_id);
                std::process::exit(1);
            }
        }
    }
    Ok(())
}

async fn handle_job_list(
    proxy: &WorkerProxy,
    output_format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let requests = proxy.list_requests().await;

    match output_format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string_pretty(&ListOutput { requests })?
            );
        }
        OutputFormat::Table => {
            if requests.is_empty() {
                println!("No jobs found.");
            } else {
                println!("REQUEST ID");
                println!("{}", "-".repeat(34));
                for id in &requests {
                    println!("{}", id);
                }
                println!();
                println!("{} jobs", requests.len());
            }
        }
    }
    Ok(())
}

async fn handle_remote_status(
    proxy: &WorkerProxy,
    output_format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let alive = proxy.is_alive().await;
    let output = RemoteStatusOutput {
        address: proxy.name().to_string(),
        alive,
        busy: alive && proxy.is_busy().await,
        language_pairs: if alive {
            proxy.language_pairs().await
        } else {
            Vec::new()
        },
    };

    match output_format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Table => {
            let status_icon = if output.alive { "[+] alive" } else { "[-] dead" };
            println!("Worker Status");
            println!("{}", "=".repeat(40));
            println!("Address: {}", output.address);
            println!("Status:  {}", status_icon);
            println!("Busy:    {}", output.busy);
            println!("Language pairs: {}", output.language_pairs.len());
            for (source, target) in &output.language_pairs {
                println!("  {} -> {}", source, target);
            }
        }
    }
    Ok(())
}

async fn handle_remote_stop(proxy: &WorkerProxy) -> Result<(), Box<dyn std::error::Error>> {
    if proxy.stop_worker().await {
        println!("Worker at {} is stopping", proxy.name());
        Ok(())
    } else {
        Err(format!("Worker at {} did not acknowledge stop", proxy.name()).into())
    }
}

// =============================================================================
// Main Entry Point
// =============================================================================

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    init_tracing();

    match args.command {
        Commands::Worker(worker_args) => {
            run_worker(worker_args).await?;
        }
        Commands::RunJob {
            message_dir,
            request_id,
            adapter_spec,
        } => {
            run_job(&message_dir, &request_id, &adapter_spec).await?;
        }
        Commands::Job { client, command } => {
            let proxy = client.proxy()?;

            match command {
                JobCommands::Submit {
                    source,
                    target,
                    text,
                    file,
                } => {
                    handle_job_submit(&proxy, source, target, text, file, &client.output).await?;
                }
                JobCommands::Status { request_id } => {
                    handle_job_status(&proxy, request_id, &client.output).await?;
                }
                JobCommands::Fetch { request_id } => {
                    handle_job_fetch(&proxy, request_id, &client.output).await?;
                }
                JobCommands::Delete { request_id } => {
                    handle_job_delete(&proxy, request_id, &client.output).await?;
                }
                JobCommands::List => {
                    handle_job_list(&proxy, &client.output).await?;
                }
            }
        }
        Commands::Remote { client, command } => {
            let proxy = client.proxy()?;

            match command {
                RemoteCommands::Status => {
                    handle_remote_status(&proxy, &client.output).await?;
                }
                RemoteCommands::Stop => {
                    handle_remote_stop(&proxy).await?;
                }
            }
        }
    }

    Ok(())
}
