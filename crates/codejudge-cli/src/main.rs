//! Codejudge CLI
//!
//! Serves the judging engine over HTTP, or judges a local file once.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use codejudge::judge::{DEFAULT_MEMORY_LIMIT_MB, DEFAULT_TIME_LIMIT_SECS};
use codejudge::{
    Config, EXAMPLE_CONFIG, Engine, ExecuteResponse, JudgeRequest, TestCase, prepare_cgroup,
};
use tokio_util::sync::CancellationToken;
use tracing::{Level, debug, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "codejudge")]
#[command(about = "A sandboxed code judging engine")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a new configuration file
    Init {
        /// Output path (default: codejudge.toml)
        #[arg(short, long, default_value = "codejudge.toml")]
        output: PathBuf,

        /// Overwrite existing file
        #[arg(short, long)]
        force: bool,
    },

    /// Serve the judging engine over HTTP
    Serve {
        /// Address to listen on (overrides the configuration)
        #[arg(short, long)]
        bind: Option<SocketAddr>,
    },

    /// Judge a source file against a set of test cases
    Judge {
        /// Source file to judge
        #[arg(value_name = "FILE")]
        source: PathBuf,

        /// Language ID (e.g., cpp17, python3)
        #[arg(short, long)]
        language: String,

        /// JSON file holding an array of {input, expectedOutput} test cases
        #[arg(short, long)]
        tests: PathBuf,

        /// Time limit in seconds
        #[arg(long, default_value_t = DEFAULT_TIME_LIMIT_SECS)]
        time_limit: f64,

        /// Memory limit in MB
        #[arg(long, default_value_t = DEFAULT_MEMORY_LIMIT_MB)]
        memory_limit: u64,
    },

    /// List available languages
    Languages,

    /// Show the effective configuration
    ShowConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::from_default_env().add_directive(Level::DEBUG.into())
    } else {
        EnvFilter::from_default_env().add_directive(Level::INFO.into())
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let mut config = if let Some(ref path) = cli.config {
        info!(?path, "loading configuration");
        Config::from_file(path).context("failed to load configuration")?
    } else {
        debug!("using default configuration");
        Config::default()
    };

    if config.cgroup {
        match prepare_cgroup(&config.cg_root) {
            Ok(true) => debug!("cgroup hierarchy ready"),
            Ok(false) => {
                warn!(
                    "cgroup support unavailable (memory controller not found), falling back to RLIMIT_AS"
                );
                config.cgroup = false;
            }
            Err(e) => {
                warn!("cgroup setup failed: {e}, falling back to RLIMIT_AS memory limiting");
                config.cgroup = false;
            }
        }

        for (id, lang) in config.languages.iter_sorted() {
            if !config.can_run(lang) {
                warn!(language = id, "language needs cgroup memory limiting, disabled");
            }
        }
    }

    match cli.command {
        Commands::Init { output, force } => init_config(&output, force).await,
        Commands::Serve { bind } => {
            if let Some(bind) = bind {
                config.server.bind = bind;
            }
            serve(config).await
        }
        Commands::Judge {
            source,
            language,
            tests,
            time_limit,
            memory_limit,
        } => {
            let request = JudgeRequest {
                code: read_to_string(&source, "source file").await?,
                language,
                test_cases: read_test_cases(&tests).await?,
                time_limit,
                memory_limit,
            };
            judge_file(config, request).await
        }
        Commands::Languages => {
            list_languages(&config);
            Ok(())
        }
        Commands::ShowConfig => {
            show_config(&config);
            Ok(())
        }
    }
}

async fn serve(config: Config) -> Result<()> {
    let engine = Engine::new(config);
    if !engine.health().healthy {
        warn!(
            isolate = %engine.config().isolate_binary().display(),
            "isolate binary not found; /health will report unhealthy"
        );
    }

    codejudge::server::serve(engine, shutdown_signal())
        .await
        .context("HTTP server failed")
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for ctrl-c: {e}");
        std::future::pending::<()>().await;
    }
}

async fn judge_file(config: Config, request: JudgeRequest) -> Result<()> {
    let engine = Engine::new(config);

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        }
    });

    let result = engine.judge(request, cancel).await?;
    let passed = result.is_passed();

    let report = ExecuteResponse::from(result);
    println!(
        "{}",
        serde_json::to_string_pretty(&report).context("failed to serialize report")?
    );

    if !passed {
        std::process::exit(1);
    }
    Ok(())
}

async fn read_to_string(path: &Path, what: &str) -> Result<String> {
    tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read {what} '{}'", path.display()))
}

async fn read_test_cases(path: &Path) -> Result<Vec<TestCase>> {
    let content = read_to_string(path, "test file").await?;
    serde_json::from_str(&content)
        .with_context(|| format!("invalid test cases in '{}'", path.display()))
}

fn list_languages(config: &Config) {
    println!("Available languages:\n");

    for (id, lang) in config.languages.iter_sorted() {
        let lang_type = if lang.is_compiled() {
            "compiled"
        } else {
            "interpreted"
        };
        let note = if config.can_run(lang) {
            ""
        } else {
            " [disabled: needs cgroup]"
        };
        println!("  {:<15} {} ({}){}", id, lang.name, lang_type, note);
    }
}

fn show_config(config: &Config) {
    println!("Default resource limits:");
    println!("  Time limit: {:?}", config.default_limits.time_limit);
    println!(
        "  Wall time limit: {:?}",
        config.default_limits.wall_time_limit
    );
    println!(
        "  Memory limit: {:?} KB",
        config.default_limits.memory_limit
    );
    println!("  Stack limit: {:?} KB", config.default_limits.stack_limit);
    println!("  Max processes: {:?}", config.default_limits.max_processes);
    println!();

    let judge = &config.judge;
    println!("Request bounds:");
    println!(
        "  Time limit: {} - {} s",
        judge.min_time_limit, judge.max_time_limit
    );
    println!(
        "  Memory limit: {} - {} MB",
        judge.min_memory_limit, judge.max_memory_limit
    );
    println!("  Max code size: {} bytes", judge.max_code_bytes);
    println!("  Max test cases: {}", judge.max_test_cases);
    println!("  Fail-fast policy: {:?}", judge.fail_fast);
    println!();
    println!(
        "Worker pool: {} slots of {} MB, queue of {}",
        config.pool_capacity(),
        config.slot_memory_mb(),
        config.pool.queue_length
    );
    println!("HTTP bind: {}", config.server.bind);
    println!("Isolate binary: {}", config.isolate_binary().display());
    println!("cgroup mode: {}", config.cgroup);
    println!();
    println!("Languages configured: {}", config.languages.len());
}

async fn init_config(output: &Path, force: bool) -> Result<()> {
    if output.exists() && !force {
        anyhow::bail!(
            "Configuration file already exists at '{}'. Use --force to overwrite.",
            output.display()
        );
    }

    tokio::fs::write(output, EXAMPLE_CONFIG)
        .await
        .context("failed to write configuration file")?;

    println!("Created configuration file at '{}'", output.display());
    Ok(())
}
