//! Trawler main entry point
//!
//! The CLI drives every mode: crawling (foreground, single, or daemon),
//! queue management, signaling a running agent, and the search tooling.

use anyhow::Context as _;
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use trawler::agent::runner::Agent;
use trawler::agent::build_http_client;
use trawler::config::{self, AgentConfig, SharedConfig, StopSignal};
use trawler::control::{self, AppState};
use trawler::plugins::{PluginCtx, Registry};
use trawler::runfiles::{self, RunState};
use trawler::{Context, Store};

const DEFAULT_CONFIG_FILE: &str = "/etc/trawler/trawler.toml";
const DAEMON_MARKER: &str = "TRAWLER_DAEMON_CHILD";

/// Trawler: a distributed web-crawling agent
///
/// Multiple agents share one queue and one content store; each agent
/// exposes a control plane for live reconfiguration.
#[derive(Parser, Debug)]
#[command(name = "trawler")]
#[command(version)]
#[command(about = "A distributed web-crawling agent", long_about = None)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, value_name = "PATH")]
    config_file: Option<PathBuf>,

    /// Location for the pid file, stop file, and metadata file
    #[arg(long, value_name = "DIR")]
    run_dir: Option<PathBuf>,

    /// The ID of the agent to run or control
    #[arg(long)]
    id: Option<String>,

    /// Path to the shared SQLite database
    #[arg(long, value_name = "PATH")]
    db_path: Option<PathBuf>,

    /// Host address of the control plane API
    #[arg(long)]
    api_addr: Option<String>,

    /// Host port of the control plane API
    #[arg(long)]
    api_port: Option<u16>,

    /// Start as a background service
    #[arg(long)]
    daemon: bool,

    /// Process a single URL, then exit
    #[arg(short, long)]
    single: bool,

    /// Stop a running agent after its current download
    #[arg(long)]
    stop: bool,

    /// Stop, delete and re-queue the current download, then exit
    #[arg(long, conflicts_with = "stop")]
    hard_stop: bool,

    /// Stop, delete the current download, then exit
    #[arg(long, conflicts_with_all = ["stop", "hard_stop"])]
    abort: bool,

    /// Add the URLs to the download queue and exit
    #[arg(long)]
    queue: bool,

    /// List the remaining URLs in the download queue
    #[arg(short = 'l', long)]
    list_queue: bool,

    /// Pause the named queued URLs
    #[arg(long, num_args = 1.., value_name = "URL")]
    pause: Vec<String>,

    /// Unpause the named queued URLs
    #[arg(long, num_args = 1.., value_name = "URL")]
    unpause: Vec<String>,

    /// A file containing links to enqueue; `-` reads stdin
    #[arg(short, long, value_name = "PATH")]
    input_file: Option<String>,

    /// Reprocess cached URLs matching these patterns
    #[arg(short = 'p', long, num_args = 1.., value_name = "REGEX")]
    reprocess: Vec<String>,

    /// Force re-download of already-retrieved URLs
    #[arg(short, long)]
    force: bool,

    /// Don't cache fetched content in the database
    #[arg(long)]
    no_cache: bool,

    /// Seconds to wait between requests
    #[arg(short, long)]
    wait: Option<u64>,

    /// Random wait (1 to --wait seconds) before first-seen URLs
    #[arg(long)]
    random_wait: bool,

    /// Per-domain cooldown between requests, in seconds
    #[arg(long)]
    domain_wait: Option<i64>,

    /// Maximum recursion depth when following links
    #[arg(long)]
    level: Option<u32>,

    /// Follow links onto other hosts
    #[arg(long)]
    span_hosts: bool,

    /// Also follow src= attributes (images, scripts, media)
    #[arg(long)]
    search_src: bool,

    /// Enqueue the absolute URLs found on each page
    #[arg(long)]
    queue_links: bool,

    /// Enqueue only discovered URLs matching this pattern
    #[arg(long, value_name = "REGEX")]
    queue_re: Option<String>,

    /// A header line to include with each request
    #[arg(short = 'H', long = "header", value_name = "NAME: VALUE")]
    headers: Vec<String>,

    /// Data to POST with the request
    #[arg(short, long)]
    data: Option<String>,

    /// User agent to report to servers
    #[arg(long)]
    user_agent: Option<String>,

    /// Download root for saved files
    #[arg(long, value_name = "DIR")]
    save_path: Option<PathBuf>,

    /// Mirror the URL's path as a directory structure when saving
    #[arg(short = 'x', long)]
    force_directories: bool,

    /// Don't save HTML files to disk (binary files only)
    #[arg(long)]
    no_save_html: bool,

    /// Log response headers for each request
    #[arg(short = 'S', long)]
    include_headers: bool,

    /// Set to False to ignore TLS certificate errors
    #[arg(long, value_name = "BOOL")]
    verify: Option<String>,

    /// Re-crawl interval in seconds for newly queued URLs
    #[arg(long)]
    refresh_interval: Option<i64>,

    /// Perform a search: engine name followed by the query
    #[arg(long, num_args = 2.., value_name = "ENGINE QUERY")]
    search: Vec<String>,

    /// Maximum number of search results
    #[arg(long, default_value_t = 30)]
    search_limit: usize,

    /// Send search results to this organizer
    #[arg(long, value_name = "ENGINE")]
    search_organize: Option<String>,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// URLs to process
    #[arg(value_name = "URL")]
    urls: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose, cli.daemon);

    let config = build_config(&cli)?;

    // Signaling modes only drop the stop marker and exit
    if cli.stop || cli.hard_stop || cli.abort {
        let signal = if cli.abort {
            StopSignal::Abort
        } else if cli.hard_stop {
            StopSignal::HardStop
        } else {
            StopSignal::Stop
        };
        runfiles::create_stop_file(&config, signal)?;
        return Ok(());
    }

    if cli.list_queue {
        let store = Store::open(&config.db_path)?;
        let listing = store.list_queue()?;
        println!("{}", serde_json::to_string_pretty(&listing)?);
        return Ok(());
    }

    if !cli.pause.is_empty() || !cli.unpause.is_empty() {
        let mut store = Store::open(&config.db_path)?;
        if !cli.pause.is_empty() {
            let summary = store.pause_urls(&cli.pause)?;
            println!("Paused {} item(s)", summary.count);
        }
        if !cli.unpause.is_empty() {
            let summary = store.unpause_urls(&cli.unpause)?;
            println!("Unpaused {} item(s)", summary.count);
        }
        return Ok(());
    }

    let mut urls = cli.urls.clone();

    if let Some(input_file) = &cli.input_file {
        let links = read_input_links(input_file)?;
        let mut store = Store::open(&config.db_path)?;
        let count = store.enqueue_urls(&links, config.force, None, config.refresh_interval)?;
        tracing::info!("queued input file links, {} items now queued", count);
    }

    if cli.queue {
        let mut store = Store::open(&config.db_path)?;
        let count = store.enqueue_urls(&urls, config.force, None, config.refresh_interval)?;
        println!("Added item(s) to the queue, {} items now queued", count);
        return Ok(());
    }

    if !cli.search.is_empty() {
        return run_search(&cli, &config);
    }

    if !cli.reprocess.is_empty() {
        let store = Store::open(&config.db_path)?;
        let mut reprocess = store.reprocess_urls(&cli.reprocess)?;
        tracing::info!("reprocessing {} cached URL(s)", reprocess.len());
        urls.append(&mut reprocess);
    }

    // A second agent for the same identity never starts a second loop
    if !cli.single {
        match runfiles::check_running(&config)? {
            RunState::Running(pid) => {
                if config.daemon {
                    anyhow::bail!("trawler already running for id {} (pid {})", config.id, pid);
                }
                tracing::info!("trawler already running, adding item(s) to the queue");
                let mut store = Store::open(&config.db_path)?;
                store.enqueue_urls(&urls, config.force, None, config.refresh_interval)?;
                return Ok(());
            }
            RunState::Stale(pid) => {
                tracing::warn!(
                    "stale pid file for id {} (pid {} not found), taking over",
                    config.id,
                    pid
                );
                runfiles::remove_run_files(&config);
            }
            RunState::NotRunning => {}
        }
    }

    if config.daemon && std::env::var(DAEMON_MARKER).is_err() {
        return daemonize();
    }

    run_agent(config, urls).await
}

/// Runs the crawl loop with the control plane alongside it
async fn run_agent(config: AgentConfig, urls: Vec<String>) -> anyhow::Result<()> {
    let single = config.single;
    if !single {
        runfiles::write_run_files(&config)?;
    }

    let shared = SharedConfig::new(config.clone());
    let context = Context::new();
    let registry = Registry::load(&config);
    let client = build_http_client(&config)?;
    let store = Store::open(&config.db_path)?;

    if !single {
        let state = AppState {
            shared: shared.clone(),
            context: context.clone(),
            db_path: config.db_path.clone(),
        };
        let api_config = config.clone();
        tokio::spawn(async move {
            if let Err(e) = control::serve(state, &api_config).await {
                tracing::error!("control plane failed: {}", e);
            }
        });
    }

    let mut agent = Agent::new(client, store, context, shared, registry);
    let result = agent.run(urls).await;

    if !single {
        runfiles::remove_run_files(&config);
    }
    result.context("crawl failed")?;
    Ok(())
}

/// Re-executes the current binary as a detached background child
fn daemonize() -> anyhow::Result<()> {
    use std::process::{Command, Stdio};

    let exe = std::env::current_exe()?;
    let args: Vec<String> = std::env::args().skip(1).collect();
    let child = Command::new(exe)
        .args(args)
        .env(DAEMON_MARKER, "1")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .context("failed to spawn background agent")?;
    tracing::info!("agent started in the background (pid {})", child.id());
    Ok(())
}

/// Layers configuration: file, then environment, then CLI flags
fn build_config(cli: &Cli) -> anyhow::Result<AgentConfig> {
    let mut config = match &cli.config_file {
        Some(path) => config::load_config(path)
            .with_context(|| format!("could not load {}", path.display()))?,
        None => {
            let default = PathBuf::from(DEFAULT_CONFIG_FILE);
            if default.exists() {
                config::load_config(&default)
                    .with_context(|| format!("could not load {}", default.display()))?
            } else {
                AgentConfig::default()
            }
        }
    };

    config::apply_env(&mut config)?;

    if let Some(id) = &cli.id {
        config.id = id.clone();
    }
    if let Some(run_dir) = &cli.run_dir {
        config.run_dir = Some(run_dir.clone());
    }
    if let Some(db_path) = &cli.db_path {
        config.db_path = db_path.clone();
    }
    if let Some(api_addr) = &cli.api_addr {
        config.api_addr = api_addr.clone();
    }
    if let Some(api_port) = cli.api_port {
        config.api_port = api_port;
    }
    if cli.daemon {
        config.daemon = true;
    }
    if cli.single {
        config.single = true;
    }
    if cli.force {
        config.force = true;
    }
    if cli.no_cache {
        config.no_cache = true;
    }
    if let Some(wait) = cli.wait {
        config.wait = wait;
    }
    if cli.random_wait {
        config.random_wait = true;
    }
    if let Some(domain_wait) = cli.domain_wait {
        config.domain_wait = domain_wait;
    }
    if let Some(level) = cli.level {
        config.level = level;
    }
    if cli.span_hosts {
        config.span_hosts = true;
    }
    if cli.search_src {
        config.search_src = true;
    }
    if cli.queue_links {
        config.queue_links = true;
    }
    if let Some(queue_re) = &cli.queue_re {
        config.queue_re = Some(queue_re.clone());
    }
    for line in &cli.headers {
        let (name, value) = config::parse_header_line(line)?;
        config.headers.insert(name, value);
    }
    if let Some(data) = &cli.data {
        config.data = Some(data.clone());
    }
    if let Some(user_agent) = &cli.user_agent {
        config.user_agent = Some(user_agent.clone());
    }
    if let Some(save_path) = &cli.save_path {
        config.save_path = Some(save_path.clone());
    }
    if cli.force_directories {
        config.force_directories = true;
    }
    if cli.no_save_html {
        config.save_html = false;
    }
    if cli.include_headers {
        config.include_headers = true;
    }
    if let Some(verify) = &cli.verify {
        config.verify = config::coerce_bool(verify);
    }
    if let Some(refresh_interval) = cli.refresh_interval {
        config.refresh_interval = Some(refresh_interval);
    }

    config::finalize(&mut config);
    Ok(config)
}

/// Runs a search engine plugin and prints or organizes the results
fn run_search(cli: &Cli, config: &AgentConfig) -> anyhow::Result<()> {
    let engine = &cli.search[0];
    let query = cli.search[1..].join(" ");

    let registry = Registry::load(config);
    let mut store = Store::open(&config.db_path)?;
    let context = Context::new();
    let mut plugin_ctx = PluginCtx {
        config,
        store: &mut store,
        context: &context,
    };

    let results = registry.run_search(engine, &query, cli.search_limit, &mut plugin_ctx)?;
    match &cli.search_organize {
        Some(organizer) => {
            registry.run_organizer(organizer, &results, &mut plugin_ctx)?;
        }
        None => {
            for url in &results {
                println!("{url}");
            }
        }
    }
    Ok(())
}

fn read_input_links(input_file: &str) -> anyhow::Result<Vec<String>> {
    let raw = if input_file == "-" {
        use std::io::Read;
        let mut buffer = String::new();
        std::io::stdin().read_to_string(&mut buffer)?;
        buffer
    } else {
        std::fs::read_to_string(input_file)
            .with_context(|| format!("there was an error reading {input_file}"))?
    };
    Ok(raw.lines().map(|l| l.to_string()).collect())
}

/// Sets up the tracing subscriber from verbosity and daemon mode
///
/// Daemons keep quiet below warn so per-URL chatter stays out of the
/// system log, unless verbosity is raised explicitly.
fn setup_logging(verbose: u8, daemon: bool) {
    let filter = if daemon && verbose == 0 {
        EnvFilter::new("trawler=warn,error")
    } else {
        match verbose {
            0 => EnvFilter::new("trawler=info,warn"),
            1 => EnvFilter::new("trawler=debug,info"),
            2 => EnvFilter::new("trawler=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}
