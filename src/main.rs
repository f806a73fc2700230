use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use color_eyre::eyre::{Result, eyre};
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use clipthumb::domain::entities::{DisplayScale, ImageRequest, PointSize};
use clipthumb::infrastructure::{
    AppConfig, CliArgs, Command, FileByteProvider, ImageProcessingQueue, RoutingByteProvider,
    StorageManager,
};

fn init_logging(config: &AppConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::default().add_directive(config.log_level.to_tracing_level().into())
    });

    if let Some(log_path) = &config.log_path {
        if let Some(parent) = log_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_path)?;

        let file_layer = fmt::layer()
            .with_writer(file)
            .with_ansi(false)
            .with_target(true)
            .with_thread_ids(false);

        tracing_subscriber::registry()
            .with(filter)
            .with(file_layer)
            .init();

        info!(path = %log_path.display(), "Logging initialized");
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr))
            .init();
    }

    Ok(())
}

async fn run_load(
    config: &AppConfig,
    sources: Vec<String>,
    point_size: PointSize,
    scale: DisplayScale,
    root: PathBuf,
) -> Result<()> {
    let provider = RoutingByteProvider::standard(root, config.cache.http_timeout_secs)?;
    let queue = ImageProcessingQueue::new(config.cache.queue_config(), Arc::new(provider)).await?;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let expected = sources.len();
    for source in sources {
        let tx = tx.clone();
        queue.load(ImageRequest::new(source, point_size, scale), move |event| {
            let _ = tx.send(event);
        });
    }
    drop(tx);

    let mut failures = 0usize;
    for _ in 0..expected {
        let event = rx
            .recv()
            .await
            .ok_or_else(|| eyre!("processing queue stopped before all loads finished"))?;
        match event.rendition {
            Some(record) => println!("{}\t{}\t{}", event.request.source, record.source, record.size),
            None => {
                failures += 1;
                println!("{}\tfailed", event.request.source);
            }
        }
    }

    info!(loaded = expected - failures, failures, "Load finished");
    if failures > 0 {
        return Err(eyre!("{failures} of {expected} sources could not be loaded"));
    }
    Ok(())
}

async fn open_queue(config: &AppConfig) -> Result<ImageProcessingQueue> {
    let provider = Arc::new(FileByteProvider::default());
    Ok(ImageProcessingQueue::new(config.cache.queue_config(), provider).await?)
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = CliArgs::parse();
    let storage = StorageManager::new()?;
    let mut config = storage.load_config(args.config.as_deref())?;
    config.merge_with_args(&args);

    init_logging(&config)?;

    info!(version = clipthumb::VERSION, "Starting {}", clipthumb::NAME);

    match args.command {
        Command::Load {
            sources,
            width,
            height,
            scale,
            root,
        } => {
            run_load(
                &config,
                sources,
                PointSize::new(width, height),
                DisplayScale::new(scale),
                root,
            )
            .await
        }
        Command::ClearDisk => {
            let queue = open_queue(&config).await?;
            queue.clear_disk_cache().await?;
            println!("Cleared {}", queue.disk_cache().dir().display());
            Ok(())
        }
        Command::Stats => {
            let queue = open_queue(&config).await?;
            println!("{}", serde_json::to_string_pretty(&queue.stats())?);
            Ok(())
        }
    }
}
