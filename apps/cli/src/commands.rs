//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use catalogsync_core::{CategorySync, RateLimiter, SyncObserver, SyncReport, bulk_body};
use catalogsync_shared::{
    AppConfig, CategoryId, CategoryNode, SyncOptions, expand_home, init_config, load_config,
    validate_config,
};
use catalogsync_source::{
    ClientOptions, HttpInvalidator, MagentoClient, NoopNotifier, NotificationSink,
};
use catalogsync_storage::{CATEGORY_KEY_PREFIX, CategoryCache, MemoryCache, Storage};
use clap::{Args, Parser, Subcommand};
use color_eyre::eyre::{Result, WrapErr, bail};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, info, warn};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// catalogsync: catalog categories in, storefront index documents out.
#[derive(Parser)]
#[command(
    name = "catalogsync",
    version,
    about = "Sync the category tree of a Magento-style catalog into storefront index documents.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Run one category sync and write the bulk index body.
    Sync(SyncArgs),

    /// Inspect the local category cache.
    Cache {
        /// Cache subcommand.
        #[command(subcommand)]
        action: CacheAction,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Flags for `catalogsync sync`. Each one overrides the config file.
#[derive(Args, Debug, Default)]
pub(crate) struct SyncArgs {
    /// Fetch every category's full record and enrich the whole tree.
    #[arg(long)]
    pub extended: bool,

    /// Keep source url keys instead of regenerating `<slug>-<id>`.
    #[arg(long)]
    pub no_unique_url_keys: bool,

    /// Catalog REST base URL.
    #[arg(long, env = "MAGENTO_URL")]
    pub url: Option<String>,

    /// Write the bulk NDJSON here instead of stdout.
    #[arg(short, long)]
    pub out: Option<PathBuf>,

    /// Use an in-memory cache and skip invalidation.
    #[arg(long)]
    pub dry_run: bool,

    /// Maximum catalog requests started per second.
    #[arg(long)]
    pub rps: Option<u32>,
}

impl SyncArgs {
    fn apply(&self, config: &mut AppConfig) {
        if self.extended {
            config.sync.extended_categories = true;
        }
        if self.no_unique_url_keys {
            config.sync.generate_unique_url_keys = false;
        }
        if let Some(url) = &self.url {
            config.source.url = url.clone();
        }
        if let Some(rps) = self.rps {
            config.rate_limit.requests_per_second = rps;
        }
    }
}

/// Cache subcommands.
#[derive(Subcommand)]
pub(crate) enum CacheAction {
    /// List the cached category keys.
    List,
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags. Logs go to stderr so stdout stays
/// clean for the bulk body.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "catalogsync=info",
        1 => "catalogsync=debug",
        _ => "catalogsync=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .with_target(false)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Sync(args) => cmd_sync(args).await,
        Command::Cache { action } => match action {
            CacheAction::List => cmd_cache_list().await,
        },
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show().await,
        },
    }
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_sync(args: SyncArgs) -> Result<()> {
    let mut config = load_config()?;
    args.apply(&mut config);
    validate_config(&config)?;
    let options = SyncOptions::from(&config);

    let client = MagentoClient::new(&ClientOptions::from_config(&config)?)?;

    let cache: Arc<dyn CategoryCache> = if args.dry_run {
        Arc::new(MemoryCache::new())
    } else {
        let path = expand_home(&config.cache.path)?;
        Arc::new(
            Storage::open(&path)
                .await
                .wrap_err_with(|| format!("cannot open cache at {}", path.display()))?,
        )
    };

    let notifier: Arc<dyn NotificationSink> = if config.invalidation.enabled && !args.dry_run {
        Arc::new(HttpInvalidator::from_config(&config)?)
    } else {
        Arc::new(NoopNotifier)
    };

    let limiter = Arc::new(RateLimiter::per_second(
        config.rate_limit.requests_per_second,
    ));
    let sync = CategorySync::new(Arc::new(client), cache, notifier).with_rate_limiter(limiter);

    info!(
        url = %config.source.url,
        extended = options.extended_categories,
        unique_url_keys = options.generate_unique_url_keys,
        rps = config.rate_limit.requests_per_second,
        dry_run = args.dry_run,
        "resolved sync settings"
    );

    let progress = CliProgress::new();
    let report = sync.sync(&options, &progress).await;
    progress.finish();

    let pending = sync.drain_notifications().await;
    debug!(pending, "awaited in-flight invalidations");

    if let Some(err) = &report.listing_error {
        bail!("category listing failed: {err}");
    }

    let body = bulk_body(&config.index.name, &report.categories)?;
    match &args.out {
        Some(path) => std::fs::write(path, &body)
            .wrap_err_with(|| format!("cannot write {}", path.display()))?,
        None => print!("{body}"),
    }

    print_summary(&report, args.out.as_deref());
    Ok(())
}

fn print_summary(report: &SyncReport, out: Option<&Path>) {
    eprintln!();
    eprintln!("  Category sync finished");
    eprintln!("  Run:        {}", report.run_id);
    eprintln!("  Roots:      {}", report.categories.len());
    eprintln!(
        "  Enriched:   {}/{} ({} failed)",
        report.enrichment.succeeded, report.enrichment.scheduled, report.enrichment.failed
    );
    if let Some(path) = out {
        eprintln!("  Output:     {}", path.display());
    }
    eprintln!("  Time:       {:.1}s", report.duration.as_secs_f64());
    for failure in &report.failures {
        warn!(category_id = %failure.id, error = %failure.error, "root category skipped");
    }
    eprintln!();
}

async fn cmd_cache_list() -> Result<()> {
    let config = load_config()?;
    let path = expand_home(&config.cache.path)?;
    let storage = Storage::open(&path)
        .await
        .wrap_err_with(|| format!("cannot open cache at {}", path.display()))?;

    let keys = storage
        .keys_with_prefix(&format!("{CATEGORY_KEY_PREFIX}:"))
        .await?;
    for key in &keys {
        println!("{key}");
    }
    info!(count = keys.len(), path = %path.display(), "listed cached categories");
    Ok(())
}

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show() -> Result<()> {
    let config: AppConfig = load_config()?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// Spinner fed by the sync observer callbacks.
struct CliProgress {
    spinner: ProgressBar,
    enriched: AtomicUsize,
    failed: AtomicUsize,
}

impl CliProgress {
    fn new() -> Self {
        let style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(style);
        spinner.enable_steady_tick(Duration::from_millis(80));
        spinner.set_message("Listing categories");
        Self {
            spinner,
            enriched: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
        }
    }

    fn finish(&self) {
        self.spinner.finish_and_clear();
    }
}

impl SyncObserver for CliProgress {
    fn listed(&self, roots: usize) {
        self.spinner
            .set_message(format!("Processing {roots} root categories"));
    }

    fn node_enriched(&self, root_id: &CategoryId, id: &CategoryId, ok: bool) {
        if !ok {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
        let done = self.enriched.fetch_add(1, Ordering::Relaxed) + 1;
        let failed = self.failed.load(Ordering::Relaxed);
        self.spinner.set_message(format!(
            "Enriching root {root_id}: {done} done, {failed} failed (last {id})"
        ));
    }

    fn emitted(&self, node: &CategoryNode) {
        self.spinner
            .set_message(format!("Emitted {}", node.label()));
    }
}
