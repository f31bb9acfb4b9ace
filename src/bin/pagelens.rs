use clap::{Parser, Subcommand};
use pagelens::{
    catalog::{Catalog, TextFilter},
    config::LensConfig,
    extractor::{self, ColorHistogramExtractor, SharedExtractor},
    loader::HttpImageLoader,
    search::SearchOrchestrator,
    Error, LensResult, SearchRequest,
};
use reqwest::Url;
use std::{path::PathBuf, sync::Arc};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "pagelens.json")]
    config: PathBuf,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Rank catalog cards by visual similarity to an image
    Search {
        /// Path to the gallery's cards.json
        #[arg(long, default_value = "cards.json")]
        catalog: PathBuf,

        /// Query image URL (relative paths resolve against the catalog directory)
        query: String,

        #[arg(long, default_value = "")]
        title: String,

        #[arg(long, default_value = "")]
        workflow: String,

        #[arg(short, long)]
        limit: Option<usize>,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// List catalog cards matching title/workflow terms
    Filter {
        #[arg(long, default_value = "cards.json")]
        catalog: PathBuf,

        #[arg(long, default_value = "")]
        title: String,

        #[arg(long, default_value = "")]
        workflow: String,
    },
}

fn load_config(cli: &Cli) -> LensResult<LensConfig> {
    let config = if cli.config.exists() {
        LensConfig::from_file(&cli.config)?
    } else {
        LensConfig::default()
    };
    info!("config loaded.");
    debug!("config: {:?}", config);
    Ok(config)
}

/// `file://` URL of the directory holding the catalog
fn catalog_base(catalog: &std::path::Path) -> LensResult<String> {
    let dir = std::fs::canonicalize(catalog)
        .map_err(|e| Error::Internal(format!("Failed to resolve catalog path: {}", e)))?;
    let dir = dir.parent().unwrap_or(&dir).to_path_buf();
    Url::from_directory_path(&dir)
        .map(|url| url.to_string())
        .map_err(|_| Error::Internal(format!("Invalid catalog directory: {}", dir.display())))
}

async fn run(cli: &Cli) -> LensResult<()> {
    let mut config = load_config(cli)?;

    match &cli.command {
        Command::Filter {
            catalog,
            title,
            workflow,
        } => {
            let catalog = Catalog::from_file(catalog)?;
            let filter = TextFilter::new(title, workflow);
            for card in filter.apply(catalog.cards()) {
                println!("{}\t{}\t{}", card.id, card.title, card.image_url);
            }
        }
        Command::Search {
            catalog: catalog_path,
            query,
            title,
            workflow,
            limit,
            json,
        } => {
            let catalog = Catalog::from_file(catalog_path)?;
            if config.loader.base_url.is_none() {
                config.loader.base_url = Some(catalog_base(catalog_path)?);
            }
            // truncate after the text filter, not inside the ranker
            let limit = (*limit).or(config.search.max_results.take());

            let extractor_config = config.extractor.clone();
            let model = extractor::init_model(|| async move {
                Ok(Arc::new(ColorHistogramExtractor::from_config(&extractor_config))
                    as SharedExtractor)
            })
            .await?;
            let loader = Arc::new(HttpImageLoader::try_new(config.loader.clone())?);
            let orchestrator = SearchOrchestrator::new(loader, model, &config);

            let request = SearchRequest::new(
                query.clone(),
                catalog.cards().to_vec(),
                orchestrator.next_request_id(),
            );
            let mut report = orchestrator.search(request).await?;
            report.results = TextFilter::new(title, workflow).retain_top(report.results, limit);

            if *json {
                let out = serde_json::to_string_pretty(&report)
                    .map_err(|e| Error::Internal(format!("Failed to encode report: {}", e)))?;
                println!("{}", out);
            } else {
                for (rank, result) in report.results.iter().enumerate() {
                    println!(
                        "{:>3}. {:.4}  {}  {}",
                        rank + 1,
                        result.distance,
                        result.card.title,
                        result.card.image_url
                    );
                }
                for omitted in &report.omitted {
                    eprintln!("skipped {}: {}", omitted.image_url, omitted.reason);
                }
            }
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(&cli).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
