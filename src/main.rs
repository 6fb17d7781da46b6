use clap::{Args, Parser, Subcommand};
use objsync_lib::config::{default_config_dir, AppConfig};
use objsync_lib::core::FD_LIMIT_WARNING;
use objsync_lib::logging::init_logging;
use objsync_lib::{SyncEngine, SyncError, SyncOptions};
use std::path::PathBuf;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;

/// 普通失败
const EXIT_FAILURE: u8 = 1;
/// 文件描述符耗尽
const EXIT_FATAL: u8 = 3;

#[derive(Parser)]
#[command(name = "objsync")]
#[command(about = "Sync local folders and S3 buckets")]
#[command(version)]
struct Cli {
    /// Log level: error, warn, info, debug, trace
    #[arg(long, global = true)]
    log: Option<String>,

    /// Maximum number of concurrent operations
    #[arg(long, global = true)]
    numworkers: Option<usize>,

    /// Custom S3 endpoint (MinIO, R2, ...)
    #[arg(long, global = true, env = "S3_ENDPOINT_URL")]
    endpoint_url: Option<String>,

    /// Print the planned operations without running them
    #[arg(long, global = true)]
    dry_run: bool,

    /// Directory holding config.json and the log file
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sync objects from source to destination
    Sync(SyncArgs),
}

#[derive(Args)]
struct SyncArgs {
    /// Source: local path, s3://bucket/prefix/ or a wildcard expression
    source: String,
    /// Destination: local path, bucket or prefix
    destination: String,

    /// Delete objects in destination but not in source
    #[arg(long)]
    delete: bool,

    /// Make size of object the only criteria to decide whether an object should be synced
    #[arg(long)]
    size_only: bool,

    /// Exclude objects matching the pattern (repeatable)
    #[arg(long)]
    exclude: Vec<String>,

    /// Server side encryption mode, e.g. aws:kms
    #[arg(long)]
    sse: Option<String>,

    /// KMS key id for server side encryption
    #[arg(long)]
    sse_kms_key_id: Option<String>,

    /// Storage class for uploaded objects
    #[arg(long)]
    storage_class: Option<String>,

    /// Disable wildcard expansion
    #[arg(long)]
    raw: bool,

    #[arg(long)]
    source_region: Option<String>,

    #[arg(long)]
    destination_region: Option<String>,

    /// Do not follow symbolic links
    #[arg(long)]
    no_follow_symlinks: bool,
}

fn sync_options(cli: &Cli, args: &SyncArgs, config: &AppConfig) -> SyncOptions {
    SyncOptions {
        delete: args.delete,
        size_only: args.size_only,
        exclude: args.exclude.clone(),
        raw: args.raw,
        follow_symlinks: !args.no_follow_symlinks,
        sse: args.sse.clone(),
        sse_kms_key_id: args.sse_kms_key_id.clone(),
        storage_class: args.storage_class.clone(),
        source_region: args.source_region.clone().or_else(|| config.s3.region.clone()),
        destination_region: args
            .destination_region
            .clone()
            .or_else(|| config.s3.region.clone()),
        endpoint: cli.endpoint_url.clone().or_else(|| config.s3.endpoint.clone()),
        access_key_id: config.s3.access_key_id.clone(),
        secret_access_key: config.s3.secret_access_key.clone(),
        workers: cli.numworkers.unwrap_or(config.sync.workers),
        plan_buffer: config.sync.plan_buffer,
        dry_run: cli.dry_run,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config_dir = cli.config_dir.clone().unwrap_or_else(default_config_dir);
    let config = AppConfig::load(&config_dir);
    init_logging(&config.log, &config_dir, cli.log.as_deref());

    let Commands::Sync(args) = &cli.command;
    let options = sync_options(&cli, args, &config);
    let full_command = std::env::args().collect::<Vec<_>>().join(" ");
    let engine = SyncEngine::new(&args.source, &args.destination, options).with_command(full_command);

    // Ctrl-C 取消本次运行
    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("收到中断信号，正在取消...");
            signal_cancel.cancel();
        }
    });

    match engine.run(cancel).await {
        Ok(report) if report.is_success() => ExitCode::SUCCESS,
        Ok(report) => {
            eprintln!("ERROR \"{}\": {}", engine_command(args), report.errors);
            ExitCode::from(EXIT_FAILURE)
        }
        Err(SyncError::TooManyOpenFiles(err)) => {
            println!("{}", FD_LIMIT_WARNING);
            println!("ERROR {}", err);
            ExitCode::from(EXIT_FATAL)
        }
        Err(err) => {
            eprintln!("ERROR \"{}\": {}", engine_command(args), err);
            ExitCode::from(EXIT_FAILURE)
        }
    }
}

fn engine_command(args: &SyncArgs) -> String {
    format!("sync {} {}", args.source, args.destination)
}
