//! rootwalk - a dig-like resolver that walks the DNS tree from the root

use anyhow::Result;
use chrono::Local;
use clap::Parser;
use rolling_file::{RollingConditionBasic, RollingFileAppender};
use rootwalk::config::{parse_duration, ResolverConfig};
use rootwalk::repl::Repl;
use rootwalk::resolver::{AnswerCache, Resolver};
use rootwalk::transport::UdpTransport;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncBufReadExt;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_CONFIG: &str = "rootwalk.conf";

/// Local-time log stamps. The file keeps the full date; the terminal only
/// needs the time of day next to the REPL output.
#[derive(Clone, Copy)]
struct LocalClock {
    pattern: &'static str,
}

impl LocalClock {
    const FILE: Self = Self { pattern: "%Y-%m-%dT%H:%M:%S%.3f%:z" };
    const TERMINAL: Self = Self { pattern: "%H:%M:%S%.3f" };
}

impl fmt::time::FormatTime for LocalClock {
    fn format_time(&self, w: &mut fmt::format::Writer<'_>) -> std::fmt::Result {
        write!(w, "{}", Local::now().format(self.pattern))
    }
}

#[derive(Parser, Debug)]
#[command(name = "rootwalk")]
#[command(about = "Resolve names by walking DNS referrals from the root servers", long_about = None)]
struct Args {
    /// Resolver configuration file (defaults to ./rootwalk.conf when present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[arg(long, default_value = "logs")]
    log_dir: PathBuf,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, default_value = "warn")]
    log_level: String,

    /// Serve prometheus metrics on this address, e.g. 127.0.0.1:9153
    #[arg(long)]
    metrics: Option<String>,

    /// Per-query timeout, overrides the config file (e.g. 2s, 500ms)
    #[arg(long, value_parser = parse_duration)]
    timeout: Option<Duration>,

    /// Overall limit for one resolution, overrides the config file
    #[arg(long, value_parser = parse_duration)]
    deadline: Option<Duration>,

    /// Run this one command (e.g. `dig @8.8.8.8 example.com`) instead of the prompt
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    command: Vec<String>,
}

fn main() -> Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .thread_name("rootwalk-worker")
        .enable_all()
        .build()?;

    runtime.block_on(async_main())
}

async fn async_main() -> Result<()> {
    let args = Args::parse();

    std::fs::create_dir_all(&args.log_dir)
        .map_err(|e| anyhow::anyhow!("Failed to create log directory '{}': {}", args.log_dir.display(), e))?;
    let file_appender = RollingFileAppender::new(
        args.log_dir.join("rootwalk.log"),
        RollingConditionBasic::new().daily(),
        30,
    )?;
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level)))
        .with(fmt::layer().with_writer(non_blocking).with_ansi(false).with_timer(LocalClock::FILE))
        .with(fmt::layer().with_writer(std::io::stderr).with_timer(LocalClock::TERMINAL))
        .init();

    info!("Starting rootwalk version {}", env!("CARGO_PKG_VERSION"));

    let mut config = load_config(args.config.as_deref())?;
    if let Some(timeout) = args.timeout { config.timeout = timeout; }
    if args.deadline.is_some() { config.deadline = args.deadline; }
    info!(
        "Resolver ready: {} root hint(s), timeout {:?}, max depth {}",
        config.roots.len(), config.timeout, config.max_depth
    );

    let _metrics = args.metrics.clone().map(|addr| {
        tokio::spawn(async move {
            if let Err(e) = rootwalk::metrics::serve(addr).await {
                tracing::error!("[metrics] Listener stopped: {}", e);
            }
        })
    });

    // One cache for the whole process, shared by every command
    let cache = Arc::new(AnswerCache::new(config.cache_capacity));
    let resolver = Resolver::new(config, cache, Arc::new(UdpTransport));
    let repl = Repl::new(resolver);
    let mut stdout = std::io::stdout();

    if !args.command.is_empty() {
        repl.run_line(&args.command.join(" "), &mut stdout).await?;
        return Ok(());
    }

    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    loop {
        write!(stdout, "> ")?;
        stdout.flush()?;
        let Some(line) = lines.next_line().await? else { break };
        if !repl.run_line(&line, &mut stdout).await? {
            writeln!(stdout, "Exiting")?;
            break;
        }
    }

    Ok(())
}

fn load_config(path: Option<&std::path::Path>) -> Result<ResolverConfig> {
    match path {
        Some(path) => {
            let config = ResolverConfig::load(path)?;
            info!(">>> Loaded configuration from {}", path.display());
            Ok(config)
        }
        None if std::path::Path::new(DEFAULT_CONFIG).exists() => ResolverConfig::load(DEFAULT_CONFIG),
        None => Ok(ResolverConfig::default()),
    }
}
