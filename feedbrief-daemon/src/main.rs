use std::error::Error;
use std::sync::Arc;

use feedbrief_core::{
    assemble, AppConfig, FeedIngestor, FeedScope, HttpFetcher, JsonStore, LogNotifier,
    ScheduleConfig, Scheduler, Store,
};
use reqwest::{redirect, Client, ClientBuilder};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const USAGE: &str = "usage: feedbrief [run|cleanup|briefing]";
const DEFAULT_SCHEDULE: &str = "global";

enum Command {
    Run,
    Cleanup,
    Briefing,
}

fn parse_command() -> Option<Command> {
    match std::env::args().nth(1).as_deref() {
        None | Some("run") => Some(Command::Run),
        Some("cleanup") => Some(Command::Cleanup),
        Some("briefing") => Some(Command::Briefing),
        Some(_) => None,
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let Some(command) = parse_command() else {
        eprintln!("{USAGE}");
        std::process::exit(2);
    };

    let (config, fallback) = AppConfig::load();
    init_tracing(&config.logging.level);
    if let Some(err) = fallback {
        warn!(error = %err, "could not load configuration, using defaults");
        if let Err(save_err) = config.save() {
            warn!(error = %save_err, "could not write default configuration");
        }
    }

    let store_path = AppConfig::store_file_path()?;
    let store: Arc<dyn Store> = Arc::new(JsonStore::load_from(&store_path).await);
    info!(path = %store_path.display(), "store opened");

    let client = build_client(&config)?;
    let fetcher = Arc::new(HttpFetcher::new(client.clone(), config.fetch.request_timeout()));
    let ingestor = Arc::new(
        FeedIngestor::new(store.clone(), fetcher, config.dedup.settings())
            .with_cleanup_scan_limit(config.cleanup.scan_limit),
    );

    match command {
        Command::Run => run(ingestor, client, &config).await?,
        Command::Cleanup => {
            let report = ingestor.cleanup_duplicates(config.cleanup.days_back).await;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Briefing => {
            let briefing = assemble(store.as_ref(), &config.briefing.request()).await?;
            println!("{}", serde_json::to_string_pretty(&briefing)?);
        }
    }
    Ok(())
}

async fn run(
    ingestor: Arc<FeedIngestor>,
    client: Client,
    config: &AppConfig,
) -> Result<(), Box<dyn Error>> {
    let scheduler = Scheduler::new(ingestor, client, config.scheduler.settings());
    scheduler.register_notifier("log", Arc::new(LogNotifier));

    scheduler.restore_schedules().await?;
    if scheduler.list_schedules().is_empty() {
        let default = ScheduleConfig::new(
            DEFAULT_SCHEDULE,
            FeedScope::All,
            config.scheduler.default_interval_minutes,
            config.scheduler.default_max_articles,
        );
        scheduler.add_schedule(default).await?;
    }

    scheduler.start();
    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    if let Err(err) = scheduler.stop().await {
        warn!(error = %err, "scheduler did not stop cleanly");
    }
    Ok(())
}

fn build_client(config: &AppConfig) -> Result<Client, reqwest::Error> {
    ClientBuilder::new()
        .redirect(redirect::Policy::limited(config.fetch.max_redirects))
        .user_agent(config.fetch.user_agent.clone())
        .build()
}

fn init_tracing(default_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
