//! Core application

use std::sync::Arc;

use anyhow::{Context, Result};

use crate::api::ApiServer;
use crate::core::cli::{self, CliConfig, Commands, SystemCommands};
use crate::core::config::AppConfig;
use crate::core::constants::{APP_NAME_LOWER, ENV_LOG};
use crate::core::shutdown::ShutdownService;
use crate::core::storage::AppStorage;
use crate::data::{GraphRepository, StoreService};
use crate::domain::graph::{AggregationJob, QueryRouter};
use crate::domain::pricing::CostModel;

pub struct CoreApp {
    pub shutdown: ShutdownService,
    pub config: AppConfig,
    pub storage: AppStorage,
    pub store: Arc<StoreService>,
    pub costs: Arc<CostModel>,
    pub repo: Arc<dyn GraphRepository>,
    pub query: Arc<QueryRouter>,
    pub job: Arc<AggregationJob>,
}

impl CoreApp {
    /// Run the application with CLI argument parsing
    pub async fn run() -> Result<()> {
        dotenvy::dotenv().ok();
        Self::init_logging();

        tracing::debug!("Application starting");

        let (cli_config, command) = cli::parse();
        tracing::trace!(command = ?command, "Parsed command");

        match command {
            Some(Commands::System {
                command: system_cmd,
            }) => {
                return Self::handle_system_command(system_cmd);
            }
            Some(Commands::Start) | None => {}
        }

        let app = Self::init(&cli_config).await?;
        Self::start_server(app).await
    }

    async fn init(cli: &CliConfig) -> Result<Self> {
        let config = AppConfig::load(cli)?;
        let storage = AppStorage::init().await?;

        let store = Arc::new(
            StoreService::init(config.store.backend, &storage)
                .await
                .with_context(|| {
                    format!("Failed to initialize {} store", config.store.backend)
                })?,
        );
        tracing::debug!(backend = %store.backend(), "Store initialized");

        let costs = Arc::new(
            CostModel::load(config.pricing.table_path.as_deref())
                .context("Failed to load pricing table")?,
        );

        let repo: Arc<dyn GraphRepository> = Arc::from(store.repository());
        let query = Arc::new(QueryRouter::new(
            store.repository(),
            Arc::clone(&costs),
            config.router_config(),
        ));
        let job = Arc::new(AggregationJob::new(
            store.repository(),
            Arc::clone(&costs),
            config.job_config(),
        ));

        let shutdown = ShutdownService::new(Arc::clone(&store));

        Ok(Self {
            shutdown,
            config,
            storage,
            store,
            costs,
            repo,
            query,
            job,
        })
    }

    fn handle_system_command(cmd: SystemCommands) -> Result<()> {
        match cmd {
            SystemCommands::Prune { yes } => Self::prune_data(yes),
        }
    }

    fn prune_data(skip_confirm: bool) -> Result<()> {
        let data_dir = AppStorage::resolve_data_dir();

        if !data_dir.exists() {
            println!(
                "Nothing to prune. Data directory does not exist: {}",
                data_dir.display()
            );
            return Ok(());
        }

        let data_dir = data_dir.canonicalize().unwrap_or(data_dir);

        println!("This will permanently delete the local data directory:");
        println!("  {}", data_dir.display());
        println!();
        println!(
            "Make sure the server is not running. \
             Deleting data while the server is running will cause data corruption."
        );

        if !skip_confirm {
            print!("\nContinue? [y/N] ");
            std::io::Write::flush(&mut std::io::stdout())?;

            let mut input = String::new();
            std::io::stdin().read_line(&mut input)?;

            if !matches!(input.trim().to_lowercase().as_str(), "y" | "yes") {
                println!("Aborted.");
                return Ok(());
            }
        }

        std::fs::remove_dir_all(&data_dir)
            .with_context(|| format!("Failed to delete data directory: {}", data_dir.display()))?;
        println!("Pruned: {}", data_dir.display());
        Ok(())
    }

    fn init_logging() {
        let default_filter = format!("info,{}=info", APP_NAME_LOWER);

        let filter = std::env::var(ENV_LOG)
            .or_else(|_| std::env::var("RUST_LOG"))
            .unwrap_or(default_filter);

        tracing_subscriber::fmt()
            .with_target(false)
            .with_thread_ids(false)
            .with_level(true)
            .with_ansi(true)
            .compact()
            .with_env_filter(filter)
            .init();
    }

    async fn start_server(app: Self) -> Result<()> {
        // Install signal handlers FIRST (before any blocking calls)
        app.shutdown.install_signal_handlers();

        app.start_background_tasks().await;

        tracing::info!(
            backend = %app.store.backend(),
            bucket_width_secs = app.config.aggregation.bucket_width_secs,
            live_threshold_secs = app.config.query.live_threshold_secs,
            "AgentGraph starting"
        );

        let server = ApiServer::new(app);
        let app = server.start().await?;
        app.shutdown.shutdown().await;

        Ok(())
    }

    pub async fn start_background_tasks(&self) {
        if let Some(handle) = self.store.start_checkpoint_task(self.shutdown.subscribe()) {
            self.shutdown.register(handle).await;
        }

        if self.config.aggregation.enabled {
            self.shutdown
                .register(self.job.start(self.shutdown.subscribe()))
                .await;
        } else {
            tracing::debug!("Scheduled aggregation disabled by config");
        }

        tracing::debug!("Background tasks started");
    }
}
