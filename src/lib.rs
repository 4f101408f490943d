pub mod cli;
pub mod compare;
pub mod core;
pub mod providers;
pub mod screening;
pub mod search;
pub mod server;
pub mod store;
pub mod watchlist;

use crate::compare::CompareService;
use crate::core::FundDataProvider;
use crate::core::config::AppConfig;
use crate::providers::eastmoney::EastmoneyProvider;
use crate::screening::{ScreeningController, ScreeningDataset};
use crate::search::FundSearchIndex;
use crate::store::KeyValueStore;
use crate::watchlist::WatchlistService;
use anyhow::Result;
use std::sync::Arc;
use tracing::{debug, info};

/// Commands that need a fully wired [`AppState`].
pub enum AppCommand {
    Serve,
    Watchlist,
    Search { keyword: String, limit: usize },
    Screen(cli::screen::ScreenArgs),
}

/// Services shared by the HTTP handlers and the CLI commands.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub watchlist: Arc<WatchlistService>,
    pub search: Arc<FundSearchIndex>,
    pub screening: ScreeningController,
    pub compare: Arc<CompareService>,
}

impl AppState {
    pub async fn new(config: AppConfig) -> Result<Self> {
        let provider = EastmoneyProvider::new(&config.providers.eastmoney)?;
        let store = KeyValueStore::new(&config)?;
        Self::with_parts(config, Arc::new(provider), &store).await
    }

    /// Wires the services over an explicit provider and store.
    pub async fn with_parts(
        config: AppConfig,
        provider: Arc<dyn FundDataProvider>,
        store: &KeyValueStore,
    ) -> Result<Self> {
        let persist = config.persist;
        let search = Arc::new(
            FundSearchIndex::load(Arc::clone(&provider), store.collection("fund_search", persist)?)
                .await?,
        );
        let watchlist = Arc::new(
            WatchlistService::load(store.collection("watchlist", persist)?, Arc::clone(&provider))
                .await?,
        );
        let dataset = ScreeningDataset::load(store.collection("screening", persist)?).await?;
        let screening = ScreeningController::new(
            Arc::clone(&provider),
            Arc::clone(&search),
            dataset,
            config.screening.concurrency,
        );
        let compare = Arc::new(CompareService::new(
            provider,
            store.collection("compare_cache", persist)?,
            &config.cache,
        ));
        debug!("Application state ready (persist: {})", persist);

        Ok(Self {
            config: Arc::new(config),
            watchlist,
            search,
            screening,
            compare,
        })
    }
}

fn load_config(config_path: Option<&str>) -> Result<AppConfig> {
    let config = match config_path {
        Some(path) => AppConfig::load_from_path(path)?,
        None => AppConfig::load()?,
    };
    debug!("Loaded config: {config:#?}");
    Ok(config)
}

pub async fn run_command(command: AppCommand, config_path: Option<&str>) -> Result<()> {
    let config = load_config(config_path)?;
    let state = AppState::new(config).await?;

    match command {
        AppCommand::Serve => {
            info!("fundwatch starting...");
            server::serve(state).await
        }
        AppCommand::Watchlist => cli::watchlist::run(&state).await,
        AppCommand::Search { keyword, limit } => cli::search::run(&state, &keyword, limit).await,
        AppCommand::Screen(args) => cli::screen::run(&state, args).await,
    }
}
