use anyhow::Result;
use clap::{Arg, Command};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use movie_clip_bot::config::Config;
use movie_clip_bot::handlers::{ClipWorkflow, WorkflowSettings};
use movie_clip_bot::metadata::TmdbClient;
use movie_clip_bot::transport::TelegramTransport;
use movie_clip_bot::{Dispatcher, FfmpegTrimmer, MediaStorage, YtDlpFetcher};

#[tokio::main]
async fn main() -> Result<()> {
    let matches = Command::new("Movie Clip Bot")
        .version(env!("CARGO_PKG_VERSION"))
        .author("TigreRoll")
        .about("Chat bot for movie lookup, trailers and server-side clip trimming")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file (default: search standard locations)")
        )
        .arg(
            Arg::new("tmp-dir")
                .short('t')
                .long("tmp-dir")
                .value_name("DIR")
                .help("Directory for ephemeral uploads and cuts")
        )
        .arg(
            Arg::new("no-trailers")
                .long("no-trailers")
                .help("Do not download trailers after a selection")
                .action(clap::ArgAction::SetTrue)
        )
        .arg(
            Arg::new("check-config")
                .long("check-config")
                .help("Validate the configuration, print a summary and exit")
                .action(clap::ArgAction::SetTrue)
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Enable verbose logging")
                .action(clap::ArgAction::SetTrue)
        )
        .get_matches();

    let mut config = match matches.get_one::<String>("config") {
        Some(path) => Config::load_from(&PathBuf::from(path))?,
        None => Config::load()?,
    };

    if let Some(dir) = matches.get_one::<String>("tmp-dir") {
        config.storage.base_dir = PathBuf::from(dir);
    }
    if matches.get_flag("no-trailers") {
        config.trailer.enabled = false;
    }

    // Initialize logging
    if matches.get_flag("verbose") {
        tracing_subscriber::fmt()
            .with_target(true)
            .with_thread_ids(true)
            .with_env_filter("debug")
            .init();
    } else {
        let filter = EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(&config.logging.log_level))
            .unwrap_or_else(|_| EnvFilter::new("info"));
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    config.validate()?;
    info!("{}", config.summary());

    if matches.get_flag("check-config") {
        return Ok(());
    }

    info!("🚀 Movie Clip Bot starting...");

    let storage = MediaStorage::new(&config.storage);
    storage.ensure_dirs().await?;
    if config.storage.sweep_on_start {
        storage.sweep().await?;
    }

    let transport = Arc::new(TelegramTransport::new(&config.telegram)?);
    let metadata = Arc::new(TmdbClient::new(config.metadata.clone())?);
    let trimmer = Arc::new(FfmpegTrimmer::from_config(&config.trim));

    let mut workflow = ClipWorkflow::new(
        transport,
        metadata,
        trimmer,
        storage,
        WorkflowSettings::from_config(&config),
    );
    if config.trailer.enabled {
        info!("🎞️ Trailer delivery enabled ({})", config.trailer.ytdlp_path.display());
        workflow = workflow.with_trailers(Arc::new(YtDlpFetcher::new(&config.trailer)));
    }

    let dispatcher = Dispatcher::new(Arc::new(workflow), &config.dispatch);
    dispatcher
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await;

    Ok(())
}
