use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use dicom_ingest::{
    CompressionPool, Config, OrientationResolver, SeriesIngestor, parser,
    store::{DirectoryFileRepository, MemorySeriesStore},
};

#[derive(Parser, Debug)]
#[command(name = "dicom-ingest")]
#[command(about = "Parse, import and orient DICOM series")]
#[command(version)]
struct Args {
    /// Configuration file (TOML)
    #[arg(short, long, global = true, env = "DICOM_INGEST_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the decoded tags of each file as JSON
    Inspect { files: Vec<PathBuf> },

    /// Import files into a series directory
    ///
    /// Series records are rebuilt on every run. The printed image ranges
    /// include instances stored in the directory by earlier runs.
    Import {
        #[arg(long)]
        store: PathBuf,
        #[arg(long)]
        domain: String,
        files: Vec<PathBuf>,
    },

    /// Resolve the traversal order of a stored series
    Orientation {
        #[arg(long)]
        store: PathBuf,
        #[arg(long)]
        series: String,
        #[arg(long)]
        start: u32,
        #[arg(long)]
        end: u32,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // logs go to stderr so stdout stays valid JSON
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => Config::default(),
    };

    match args.command {
        Command::Inspect { files } => inspect(&config, &files),
        Command::Import {
            store,
            domain,
            files,
        } => import(&config, store, &domain, &files).await,
        Command::Orientation {
            store,
            series,
            start,
            end,
        } => {
            let files = Arc::new(DirectoryFileRepository::new(store));
            let resolver = OrientationResolver::new(files, config.parse_options());
            let volume = resolver.resolve(&series, start, end).await?;
            println!("{}", serde_json::to_string_pretty(&volume)?);
            Ok(())
        }
    }
}

fn inspect(config: &Config, files: &[PathBuf]) -> Result<()> {
    let buffers = files
        .iter()
        .map(|path| {
            std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))
        })
        .collect::<Result<Vec<_>>>()?;

    let parsed = parser::parse_all(&buffers, &config.parse_options());
    for (path, result) in files.iter().zip(parsed) {
        match result {
            Ok(tags) => println!("{}", serde_json::to_string_pretty(&tags)?),
            Err(err) => warn!(file = %path.display(), error = %err, "cannot parse file"),
        }
    }
    Ok(())
}

async fn import(config: &Config, store: PathBuf, domain: &str, files: &[PathBuf]) -> Result<()> {
    let repository = Arc::new(DirectoryFileRepository::new(store));
    let series = Arc::new(MemorySeriesStore::new());
    let mut ingestor = SeriesIngestor::new(repository, series.clone(), config.parse_options());

    let pool = config
        .compress
        .then(|| Arc::new(CompressionPool::new(config.pool_config())));
    if let Some(pool) = &pool {
        ingestor = ingestor.with_compressor(pool.clone());
    }

    let mut failed = 0;
    for path in files {
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        match ingestor.import_dicom(bytes, domain).await {
            Ok(outcome) => info!(file = %path.display(), ?outcome, "imported"),
            Err(err) => {
                failed += 1;
                warn!(file = %path.display(), error = %err, "import failed");
            }
        }
    }

    if let Some(pool) = pool {
        info!(stats = ?pool.stats(), "compression pool statistics");
        pool.dispose().await;
    }

    let mut records = Vec::new();
    for record in series.records().await {
        match ingestor.sync_images(&record.series_uid).await {
            Ok(synced) => records.push(synced),
            Err(err) => {
                warn!(series_uid = %record.series_uid, error = %err, "cannot sync series");
                records.push(record);
            }
        }
    }
    println!("{}", serde_json::to_string_pretty(&records)?);
    if failed > 0 {
        anyhow::bail!("{failed} of {} files could not be imported", files.len());
    }
    Ok(())
}
