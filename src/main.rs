//! Catalog Harvester command line

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use dialoguer::{theme::ColorfulTheme, MultiSelect, Select};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use catalog_harvester::crawling::{PipelineOrchestrator, PipelineSettings};
use catalog_harvester::domain::{CrawlStage, StageSelection};
use catalog_harvester::infrastructure::config::defaults;
use catalog_harvester::infrastructure::{
    init_logging, site_profile, AppConfig, ClaimSpec, ConfigManager, DatabaseConnection, DocumentStore,
    HttpRenderer, JobStore, JobTable, Renderer,
};

#[derive(Parser)]
#[command(name = "catalog-harvester")]
#[command(about = "Incremental, resumable product catalog crawler")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true, default_value = defaults::CONFIG_FILE, env = "HARVESTER_CONFIG")]
    config: PathBuf,

    /// Site profile to crawl
    #[arg(long, global = true)]
    site: Option<String>,

    /// Number of listing pages to seed
    #[arg(long, global = true)]
    pages: Option<u32>,

    /// Data directory for the store, documents and logs
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the crawl pipeline
    Run(RunArgs),

    /// Show job counts per status
    Status,

    /// Move a stage's failed jobs back to pending
    Requeue {
        /// Stage whose failures should be retried
        #[arg(long)]
        stage: CrawlStage,

        /// Also requeue jobs that had no usable URL
        #[arg(long)]
        include_unfetchable: bool,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Stage to leave out of this run (repeatable)
    #[arg(long, value_name = "STAGE")]
    skip: Vec<CrawlStage>,

    /// Run only these stages (repeatable)
    #[arg(long, value_name = "STAGE", conflicts_with = "skip")]
    only: Vec<CrawlStage>,

    /// Choose stages from a prompt
    #[arg(short, long, conflicts_with_all = ["skip", "only"])]
    interactive: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match load_config(&cli).await {
        Ok(config) => config,
        Err(e) => {
            eprintln!("❌ {e:#}");
            return ExitCode::FAILURE;
        }
    };

    let _logging = match init_logging(&config.logging, &config.log_path()) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("❌ Failed to initialize logging: {e:#}");
            return ExitCode::FAILURE;
        }
    };

    let outcome = match cli.command {
        Commands::Run(args) => run_pipeline(&config, &args).await,
        Commands::Status => show_status(&config).await,
        Commands::Requeue {
            stage,
            include_unfetchable,
        } => requeue(&config, stage, include_unfetchable).await,
    };

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %format!("{e:#}"), "Run ended with an error");
            eprintln!("❌ {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn load_config(cli: &Cli) -> Result<AppConfig> {
    let mut config = ConfigManager::new(&cli.config).load_or_init().await?;

    if let Some(site) = &cli.site {
        config.site.clone_from(site);
    }
    if let Some(pages) = cli.pages {
        config.pages_to_crawl = pages;
    }
    if let Some(data_dir) = &cli.data_dir {
        config.data_dir.clone_from(data_dir);
    }

    config.validate()?;
    Ok(config)
}

async fn open_store(config: &AppConfig) -> Result<(DatabaseConnection, JobStore)> {
    let db = DatabaseConnection::open_file(&config.database_path()).await?;
    db.migrate().await?;
    let store = JobStore::new(db.pool().clone());
    Ok((db, store))
}

async fn run_pipeline(config: &AppConfig, args: &RunArgs) -> Result<()> {
    let Some(selection) = stage_selection(args)? else {
        println!("👋 Nothing to run");
        return Ok(());
    };
    if selection.is_empty() {
        warn!("No stages selected");
        return Ok(());
    }

    let site = site_profile(&config.site, config.seed_url.as_deref())?;
    let renderer: Arc<dyn Renderer> = Arc::new(HttpRenderer::new(&config.renderer)?);
    let listing_documents = DocumentStore::open(config.listing_path(), "listing")?;
    let detail_documents = DocumentStore::open(config.detail_path(), "product")?;
    let (db, store) = open_store(config).await?;

    let cancel = CancellationToken::new();
    let orchestrator = PipelineOrchestrator::new(
        store,
        site,
        renderer,
        listing_documents,
        detail_documents,
        PipelineSettings::from(config),
        cancel.clone(),
    );

    let signal_task = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, finishing the current job");
            cancel.cancel();
        }
    });

    let result = orchestrator.run(&selection).await;
    signal_task.abort();
    db.close().await;

    let report = result?;
    let totals = report.totals();
    info!(%totals, "All requested stages exhausted");
    println!("✅ Done: {totals}");
    Ok(())
}

/// `None` when the operator chose to exit from the prompt
fn stage_selection(args: &RunArgs) -> Result<Option<StageSelection>> {
    if args.interactive {
        return prompt_stage_selection();
    }
    if !args.only.is_empty() {
        return Ok(Some(StageSelection::only(&args.only)));
    }

    let mut selection = StageSelection::all();
    for stage in &args.skip {
        selection.skip(*stage);
    }
    Ok(Some(selection))
}

fn prompt_stage_selection() -> Result<Option<StageSelection>> {
    let theme = ColorfulTheme::default();
    let choice = Select::with_theme(&theme)
        .with_prompt("What do you want to do?")
        .items(&["Run all stages", "Select stages", "Exit"])
        .default(0)
        .interact()?;

    match choice {
        0 => Ok(Some(StageSelection::all())),
        1 => {
            let names: Vec<_> = CrawlStage::ALL.iter().map(|stage| stage.as_str()).collect();
            let picked = MultiSelect::with_theme(&theme)
                .with_prompt("Stages to run (space toggles, enter confirms)")
                .items(&names)
                .defaults(&[true; 5])
                .interact()?;
            let stages: Vec<_> = picked.into_iter().map(|index| CrawlStage::ALL[index]).collect();
            Ok(Some(StageSelection::only(&stages)))
        }
        _ => Ok(None),
    }
}

async fn show_status(config: &AppConfig) -> Result<()> {
    let (db, store) = open_store(config).await?;

    for table in [JobTable::ListingPages, JobTable::ProductRecords] {
        println!("{}", table.table_name());
        let counts = store.status_counts(table).await?;
        if counts.is_empty() {
            println!("  (empty)");
        }
        for count in counts {
            let parse = count.parse_status.map_or("-", |status| status.as_str());
            println!("  {:<20} {:<16} {:>6}", count.fetch_status.as_str(), parse, count.count);
        }
    }

    db.close().await;
    Ok(())
}

async fn requeue(config: &AppConfig, stage: CrawlStage, include_unfetchable: bool) -> Result<()> {
    let Some(spec) = ClaimSpec::for_stage(stage) else {
        bail!("Stage {stage} has no job statuses to requeue");
    };

    let (db, store) = open_store(config).await?;
    let moved = store
        .requeue_failed(spec, include_unfetchable)
        .await
        .with_context(|| format!("Failed to requeue {stage} jobs"))?;
    db.close().await;

    info!(stage = %stage, moved, "Requeued failed jobs");
    println!("🔁 Requeued {moved} {stage} job(s)");
    Ok(())
}
