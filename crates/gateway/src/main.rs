//! fsgate
//!
//! Command-line front end for mount-confined file operations on managed
//! machines.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use bytes::Bytes;
use clap::{Parser, Subcommand, ValueEnum};
use gateway::config::Config;
use gateway::files::{FileGateway, OpOutcome};
use gateway::mounts::{JsonMountStore, MountService};
use gateway::protocol::{
    DirectoryEntry, EntryType, FileMount, GatewayError, MachineInfo, MountField, MountFilter,
    MountId, MountKind, NewMount, PageParam, DEFAULT_PAGE_SIZE,
};
use gateway::remote::{RemoteFile, SshMachineRegistry};
use tokio::io::AsyncReadExt;
use tracing_subscriber::EnvFilter;

/// fsgate - file operations on managed machines, confined to mounts.
#[derive(Parser, Debug)]
#[command(name = "fsgate")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Write logs to this file instead of stderr
    #[arg(long, global = true, value_name = "FILE")]
    pub log_file: Option<PathBuf>,

    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Manage file mounts
    #[command(subcommand)]
    Mounts(MountsCommands),

    /// Inspect configured machines
    #[command(subcommand)]
    Machines(MachinesCommands),

    /// List a directory
    Ls {
        /// Mount id
        mount: MountId,
        /// Directory path
        path: String,
    },

    /// Show disk usage of a path
    Du {
        /// Mount id
        mount: MountId,
        /// Path to measure
        path: String,
    },

    /// Show file status
    Stat {
        /// Mount id
        mount: MountId,
        /// Path to inspect
        path: String,
    },

    /// Create a directory and any missing parents
    Mkdir {
        /// Mount id
        mount: MountId,
        /// Directory path
        path: String,
    },

    /// Create an empty file
    Touch {
        /// Mount id
        mount: MountId,
        /// File path
        path: String,
    },

    /// Print a file's content
    Cat {
        /// Mount id
        mount: MountId,
        /// File path
        path: String,
    },

    /// Replace a file's content
    Write {
        /// Mount id
        mount: MountId,
        /// File path
        path: String,
        /// Content to write (reads stdin when neither this nor --from is given)
        content: Option<String>,
        /// Read content from a local file
        #[arg(long, value_name = "FILE", conflicts_with = "content")]
        from: Option<PathBuf>,
    },

    /// Upload a local file into a remote directory
    Upload {
        /// Mount id
        mount: MountId,
        /// Remote directory
        dir: String,
        /// Local file to send
        file: PathBuf,
        /// Remote file name (defaults to the local name)
        #[arg(long)]
        name: Option<String>,
    },

    /// Remove files or directories
    Rm {
        /// Mount id
        mount: MountId,
        /// Paths to remove
        #[arg(required = true)]
        paths: Vec<String>,
    },

    /// Copy files or directories
    Cp {
        /// Mount id
        mount: MountId,
        /// Destination path
        #[arg(long, short)]
        to: String,
        /// Source paths
        #[arg(required = true)]
        paths: Vec<String>,
    },

    /// Move files or directories
    Mv {
        /// Mount id
        mount: MountId,
        /// Destination path
        #[arg(long, short)]
        to: String,
        /// Source paths
        #[arg(required = true)]
        paths: Vec<String>,
    },

    /// Rename a file or directory
    Rename {
        /// Mount id
        mount: MountId,
        /// Current path
        old: String,
        /// New path
        new: String,
    },
}

/// Subcommands for mount management.
#[derive(Subcommand, Debug, Clone)]
pub enum MountsCommands {
    /// List mounts
    List {
        /// Only mounts on this machine
        #[arg(long)]
        machine: Option<u64>,
        /// Only mounts whose name contains this text
        #[arg(long)]
        name: Option<String>,
        /// Only mounts of this kind
        #[arg(long, value_enum)]
        kind: Option<KindArg>,
        /// Page number, starting at 1
        #[arg(long, default_value = "1")]
        page: usize,
        /// Records per page
        #[arg(long, default_value_t = DEFAULT_PAGE_SIZE)]
        page_size: usize,
        /// Comma-separated columns to include in JSON output
        #[arg(long, value_delimiter = ',', value_parser = parse_field)]
        fields: Vec<MountField>,
    },

    /// Show one mount
    Show {
        /// Mount id
        id: MountId,
        /// Comma-separated columns to include
        #[arg(long, value_delimiter = ',', value_parser = parse_field)]
        fields: Vec<MountField>,
    },

    /// Add a mount
    Add {
        #[command(flatten)]
        mount: MountArgs,
    },

    /// Update a mount
    Update {
        /// Mount id
        id: MountId,
        #[command(flatten)]
        mount: MountArgs,
    },

    /// Remove a mount
    Remove {
        /// Mount id
        id: MountId,
    },
}

/// Fields accepted when adding or updating a mount.
#[derive(clap::Args, Debug, Clone)]
pub struct MountArgs {
    /// Owning machine id
    #[arg(long)]
    pub machine: u64,
    /// Display name
    #[arg(long)]
    pub name: String,
    /// Root path on the machine
    #[arg(long)]
    pub path: String,
    /// What the root points at
    #[arg(long, value_enum)]
    pub kind: Option<KindArg>,
    /// Operator recorded in the audit fields
    #[arg(long)]
    pub operator: Option<String>,
    /// Operator id recorded in the audit fields
    #[arg(long)]
    pub operator_id: Option<u64>,
}

impl From<MountArgs> for NewMount {
    fn from(args: MountArgs) -> Self {
        NewMount {
            machine_id: args.machine,
            name: args.name,
            path: args.path,
            kind: args.kind.map(Into::into),
            operator: args.operator,
            operator_id: args.operator_id,
        }
    }
}

/// Subcommands for machine inspection.
#[derive(Subcommand, Debug, Clone)]
pub enum MachinesCommands {
    /// List configured machines
    List,
}

/// Mount kind as given on the command line.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum KindArg {
    /// The root is a directory
    Directory,
    /// The root is a single file
    File,
}

impl From<KindArg> for MountKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Directory => MountKind::Directory,
            KindArg::File => MountKind::File,
        }
    }
}

fn parse_field(s: &str) -> Result<MountField, String> {
    s.parse()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = if let Some(config_path) = &cli.config {
        Config::load(config_path)?
    } else {
        Config::load_default()?
    };

    // Apply environment variable overrides
    config.apply_env_overrides();

    // Logging must be up before validation so config problems are logged too
    let _log_guard = init_tracing(&cli, &config)?;
    if let Some(config_path) = &cli.config {
        tracing::debug!("Using config file: {:?}", config_path);
    }

    config.validate()?;

    let store = Arc::new(JsonMountStore::open(config.gateway.mount_store_path())?);
    let machines = Arc::new(SshMachineRegistry::new(config.machines.clone()));
    let json = cli.json;

    match cli.command {
        Commands::Mounts(cmd) => {
            let service = MountService::new(store, machines);
            run_mounts_command(&service, cmd, json)?;
        }
        Commands::Machines(MachinesCommands::List) => {
            print_machines(&machines.list(), json)?;
        }
        command => {
            let gateway = FileGateway::from_config(&config, store, machines);

            let token = gateway.cancellation_token();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::info!("Received interrupt, cancelling");
                    token.cancel();
                }
            });

            run_file_command(&gateway, command, json).await?;
        }
    }

    Ok(())
}

/// Initialize tracing. Returns the file writer guard, which must outlive
/// every log call.
fn init_tracing(
    cli: &Cli,
    config: &Config,
) -> anyhow::Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    let level = if cli.verbose {
        "debug"
    } else {
        config.gateway.log_level.as_str()
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match &cli.log_file {
        Some(path) => {
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            let file_name = path
                .file_name()
                .with_context(|| format!("Invalid log file path: {}", path.display()))?;
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory: {}", dir.display()))?;

            let appender = tracing_appender::rolling::never(dir, file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(writer)
                .init();
            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
            Ok(None)
        }
    }
}

fn run_mounts_command(
    service: &MountService<JsonMountStore, SshMachineRegistry>,
    cmd: MountsCommands,
    json: bool,
) -> anyhow::Result<()> {
    match cmd {
        MountsCommands::List {
            machine,
            name,
            kind,
            page,
            page_size,
            fields,
        } => {
            let filter = MountFilter {
                machine_id: machine,
                name,
                kind: kind.map(Into::into),
            };
            let page = PageParam {
                page_num: page,
                page_size,
            };
            let result = service.page_list(&filter, &page)?;

            if json || !fields.is_empty() {
                let list: Vec<_> = result.list.iter().map(|m| m.project(&fields)).collect();
                let out = serde_json::json!({ "total": result.total, "list": list });
                println!("{}", serde_json::to_string_pretty(&out)?);
            } else {
                print_mounts_table(&result.list);
                println!();
                println!(
                    "Page {} ({} of {} mount(s))",
                    page.page_num.max(1),
                    result.list.len(),
                    result.total
                );
            }
        }
        MountsCommands::Show { id, fields } => {
            let mount = service
                .get(id)?
                .with_context(|| format!("file mount {id} not found"))?;
            println!("{}", serde_json::to_string_pretty(&mount.project(&fields))?);
        }
        MountsCommands::Add { mount } => {
            let created = service.save(None, mount.into())?;
            if json {
                println!("{}", serde_json::to_string_pretty(&created)?);
            } else {
                println!("Created mount {} ({})", created.id, created.path);
            }
        }
        MountsCommands::Update { id, mount } => {
            let updated = service.save(Some(id), mount.into())?;
            if json {
                println!("{}", serde_json::to_string_pretty(&updated)?);
            } else {
                println!("Updated mount {} ({})", updated.id, updated.path);
            }
        }
        MountsCommands::Remove { id } => match service.delete(id)? {
            Some(removed) => println!("Removed mount {} ({})", removed.id, removed.path),
            None => anyhow::bail!("file mount {id} not found"),
        },
    }
    Ok(())
}

async fn run_file_command(
    gateway: &FileGateway<JsonMountStore, SshMachineRegistry>,
    command: Commands,
    json: bool,
) -> anyhow::Result<()> {
    match command {
        Commands::Ls { mount, path } => {
            let entries = finish(gateway.list_directory(mount, &path).await, json)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&entries)?);
            } else {
                print_entries_table(&entries);
            }
        }
        Commands::Du { mount, path } => {
            let size = finish(gateway.directory_size(mount, &path).await, json)?;
            if json {
                println!("{}", serde_json::json!({ "path": path, "size": size }));
            } else {
                println!("{size}\t{path}");
            }
        }
        Commands::Stat { mount, path } => {
            let output = finish(gateway.stat(mount, &path).await, json)?;
            if json {
                println!("{}", serde_json::json!({ "path": path, "stat": output }));
            } else {
                print!("{output}");
            }
        }
        Commands::Mkdir { mount, path } => {
            finish(gateway.mkdir(mount, &path).await, json)?;
            println!("Created directory {path}");
        }
        Commands::Touch { mount, path } => {
            finish(gateway.create_file(mount, &path).await, json)?;
            println!("Created file {path}");
        }
        Commands::Cat { mount, path } => {
            let mut file = finish(gateway.read_file(mount, &path).await, json)?;
            let read = file.read_to_end().await;
            let closed = file.close().await;
            let content = read
                .and_then(|c| closed.map(|_| c))
                .with_context(|| format!("Failed to read {path}"))?;

            let mut stdout = std::io::stdout().lock();
            stdout.write_all(&content)?;
            stdout.flush()?;
        }
        Commands::Write {
            mount,
            path,
            content,
            from,
        } => {
            let content = match (content, from) {
                (Some(text), _) => Bytes::from(text),
                (None, Some(file)) => Bytes::from(
                    tokio::fs::read(&file)
                        .await
                        .with_context(|| format!("Failed to read {}", file.display()))?,
                ),
                (None, None) => {
                    let mut buf = Vec::new();
                    tokio::io::stdin().read_to_end(&mut buf).await?;
                    Bytes::from(buf)
                }
            };
            let len = content.len();
            finish(gateway.write_file_content(mount, &path, content).await, json)?;
            println!("Wrote {len} byte(s) to {path}");
        }
        Commands::Upload {
            mount,
            dir,
            file,
            name,
        } => {
            let filename = match name {
                Some(name) => name,
                None => file
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .with_context(|| format!("Cannot derive a file name from {}", file.display()))?,
            };
            let reader = tokio::fs::File::open(&file)
                .await
                .with_context(|| format!("Failed to open {}", file.display()))?;

            let outcome = gateway.upload_file(mount, &dir, &filename, reader).await;
            let bytes = finish(outcome, json)?;
            println!("Uploaded {bytes} byte(s) to {dir}/{filename}");
        }
        Commands::Rm { mount, paths } => {
            finish(gateway.remove_file(mount, &paths).await, json)?;
            println!("Removed {} path(s)", paths.len());
        }
        Commands::Cp { mount, to, paths } => {
            finish(gateway.copy(mount, &to, &paths).await, json)?;
            println!("Copied {} path(s) to {to}", paths.len());
        }
        Commands::Mv { mount, to, paths } => {
            finish(gateway.move_files(mount, &to, &paths).await, json)?;
            println!("Moved {} path(s) to {to}", paths.len());
        }
        Commands::Rename { mount, old, new } => {
            finish(gateway.rename(mount, &old, &new).await, json)?;
            println!("Renamed {old} to {new}");
        }
        Commands::Mounts(_) | Commands::Machines(_) => {
            anyhow::bail!("not a file operation")
        }
    }
    Ok(())
}

/// Convert an outcome into a result, naming the machine on failure.
///
/// With `--json` a failure is also printed to stdout, carrying its stable
/// error code.
fn finish<T>(outcome: OpOutcome<T>, json: bool) -> anyhow::Result<T> {
    let OpOutcome { machine, result } = outcome;
    let error = match result {
        Ok(value) => return Ok(value),
        Err(error) => error,
    };

    if json {
        println!("{}", failure_json(machine.as_ref(), &error));
    }
    match machine {
        Some(machine) => Err(anyhow::Error::new(error).context(format!("on {machine}"))),
        None => Err(error.into()),
    }
}

fn failure_json(machine: Option<&MachineInfo>, error: &GatewayError) -> serde_json::Value {
    serde_json::json!({
        "error": {
            "code": error.code(),
            "message": error.to_string(),
            "recoverable": error.is_recoverable(),
        },
        "machine": machine,
    })
}

fn print_machines(machines: &[MachineInfo], json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(machines)?);
        return Ok(());
    }
    if machines.is_empty() {
        println!("No machines configured.");
        return Ok(());
    }

    let name_width = machines.iter().map(|m| m.name.len()).max().unwrap_or(4).max(4);
    println!("{:>6}  {:<name_width$}  ADDRESS", "ID", "NAME");
    println!("{}", "-".repeat(name_width + 30));
    for m in machines {
        println!(
            "{:>6}  {:<name_width$}  {}@{}:{}",
            m.id, m.name, m.username, m.host, m.port
        );
    }
    Ok(())
}

/// Print mounts in a formatted ASCII table.
fn print_mounts_table(mounts: &[FileMount]) {
    if mounts.is_empty() {
        println!("No mounts found.");
        return;
    }

    let name_width = mounts.iter().map(|m| m.name.len()).max().unwrap_or(4).max(4);

    println!(
        "{:>6}  {:>8}  {:<name_width$}  {:<9}  PATH",
        "ID", "MACHINE", "NAME", "KIND"
    );
    println!("{}", "-".repeat(name_width + 40));

    for m in mounts {
        let kind = match m.kind {
            Some(MountKind::Directory) => "directory",
            Some(MountKind::File) => "file",
            None => "-",
        };
        println!(
            "{:>6}  {:>8}  {:<name_width$}  {:<9}  {}",
            m.id, m.machine_id, m.name, kind, m.path
        );
    }
}

/// Print directory entries in listing order.
fn print_entries_table(entries: &[DirectoryEntry]) {
    for entry in entries {
        let marker = match entry.entry_type {
            EntryType::Directory => 'd',
            EntryType::File => '-',
            EntryType::Other => '?',
        };
        println!("{marker} {:>12}  {}", entry.size, entry.name);
    }
}
