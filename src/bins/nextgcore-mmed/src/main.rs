//! NextGCore MME (Mobility Management Entity)
//!
//! EMM daemon: EMM workers, timer service, and the S1AP/S6a/ESM queues
//! they feed.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use nextgcore_mmed::{
    spawn_workers, EmmDispatcher, MmeConfig, MmeEmmHandler, MmeEvent, MmeStore, OutboundRequest,
    SharedContext,
};

/// NextGCore MME - Mobility Management Entity
#[derive(Parser, Debug)]
#[command(name = "nextgcore-mmed")]
#[command(author = "NextGCore")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "EPC Mobility Management Entity")]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "/etc/nextgcore/mme.yaml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Disable color output
    #[arg(long)]
    no_color: bool,

    /// Number of EMM workers (overrides the configuration file)
    #[arg(short, long)]
    workers: Option<usize>,
}

/// MME application state
pub struct MmeApp {
    /// Running flag
    running: Arc<AtomicBool>,
    config: MmeConfig,
    context: SharedContext,
    dispatcher: Option<EmmDispatcher>,
    tasks: Vec<JoinHandle<()>>,
}

impl MmeApp {
    pub fn new(config: MmeConfig) -> Self {
        let context = Arc::new(MmeStore::new(config.max.ue, config.worker.count));
        Self {
            running: Arc::new(AtomicBool::new(true)),
            config,
            context,
            dispatcher: None,
            tasks: Vec::new(),
        }
    }

    /// Starts the EMM workers and the queue drains. Needs a tokio runtime.
    pub fn init(&mut self) -> Result<()> {
        log::info!("Initializing MME...");

        let (esm_tx, esm_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

        let (dispatcher, receivers) = EmmDispatcher::new(self.context.clone(), esm_tx);
        let timer_configs = self.config.timer_configs();

        self.tasks = spawn_workers(&dispatcher, receivers, &timer_configs, &outbound_tx, || {
            Box::new(MmeEmmHandler)
        });
        log::debug!("{} EMM workers started", dispatcher.worker_count());

        self.tasks.push(tokio::spawn(outbound_drain(outbound_rx)));
        self.tasks.push(tokio::spawn(esm_drain(esm_rx)));
        self.dispatcher = Some(dispatcher);

        log::info!("MME initialized successfully");
        Ok(())
    }

    /// Entry point for decoded events from the protocol paths
    pub fn dispatcher(&self) -> Option<&EmmDispatcher> {
        self.dispatcher.as_ref()
    }

    pub fn context(&self) -> &SharedContext {
        &self.context
    }

    /// Run the MME main loop
    pub async fn run(&self) -> Result<()> {
        log::info!("MME running...");

        while self.running.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        log::info!("MME main loop exited");
        Ok(())
    }

    /// Shutdown the MME application
    pub fn shutdown(&mut self) {
        log::info!("Shutting down MME...");

        self.dispatcher = None;
        for task in self.tasks.drain(..) {
            task.abort();
        }
        log::debug!("EMM workers stopped");

        log::info!("MME shutdown complete");
    }

    /// Signal the application to stop
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Get the running flag for signal handlers
    pub fn running_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }
}

/// Hands paging and Update-Location requests to the S1AP and S6a paths
async fn outbound_drain(mut rx: mpsc::UnboundedReceiver<OutboundRequest>) {
    while let Some(request) = rx.recv().await {
        match request {
            OutboundRequest::S1apPaging { mme_ue, imsi_bcd } => {
                log::info!("[S1AP] Paging : MME --> eNB [{}] UE[{}]", imsi_bcd, mme_ue);
            }
            OutboundRequest::S6aUpdateLocation { mme_ue, imsi_bcd } => {
                log::info!(
                    "[S6A] Update-Location-Request : MME --> HSS [{}] UE[{}]",
                    imsi_bcd,
                    mme_ue
                );
            }
        }
    }
}

/// Receives the events addressed to the bearers' ESM state machines
async fn esm_drain(mut rx: mpsc::UnboundedReceiver<MmeEvent>) {
    while let Some(event) = rx.recv().await {
        if let MmeEvent::EsmBearerFromS6a { bearer, command } = &event {
            log::debug!("[ESM] {:?} : Bearer[{}]", command, bearer);
        } else {
            log::error!("Unexpected ESM event {}", event.name());
        }
    }
}

fn init_logging(args: &Args) {
    let log_level = match args.log_level.to_lowercase().as_str() {
        "trace" => log::LevelFilter::Trace,
        "debug" => log::LevelFilter::Debug,
        "info" => log::LevelFilter::Info,
        "warn" => log::LevelFilter::Warn,
        "error" => log::LevelFilter::Error,
        _ => log::LevelFilter::Info,
    };

    let mut builder = env_logger::Builder::new();
    builder.filter_level(log_level).format_timestamp_millis();
    if args.no_color {
        builder.write_style(env_logger::WriteStyle::Never);
    }
    builder.init();
}

fn load_config(args: &Args) -> Result<MmeConfig> {
    let mut config = MmeConfig::load(&args.config)
        .with_context(|| format!("Failed to load {}", args.config.display()))?;
    if let Some(workers) = args.workers {
        config.worker.count = workers;
        config.validate().context("Invalid --workers")?;
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    init_logging(&args);

    log::info!("NextGCore MME v{}", env!("CARGO_PKG_VERSION"));
    log::info!("Configuration: {}", args.config.display());

    let config = load_config(&args)?;
    log::debug!("{:?}", config);

    let mut app = MmeApp::new(config);

    // Setup signal handlers
    let running = app.running_flag();
    ctrlc::set_handler(move || {
        log::info!("Received shutdown signal");
        running.store(false, Ordering::SeqCst);
    })?;

    app.init()?;
    app.run().await?;
    app.shutdown();

    log::info!("NextGCore MME terminated");
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================
