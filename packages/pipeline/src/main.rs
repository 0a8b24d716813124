// packages/pipeline/src/main.rs
//! Aspect Logger
//!
//! Reads newline-delimited JSON event descriptions from stdin and persists
//! each one through the configured writers until EOF or Ctrl-C.

use anyhow::{Context, Result};
use aspect_logger::model::{Event, ObjectRef, PageContext, ParamMap, StackFrame};
use aspect_logger::observability::{init_metrics, init_tracing};
use aspect_logger::{AspectLogger, LoggerConfig};
use chrono::Utc;
use clap::Parser;
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};

#[derive(Debug, Parser)]
#[command(name = "aspect-logger", version, about = "Persist intercepted calls to configured writers")]
struct Args {
    /// Configuration file (YAML, TOML or JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// URI recorded for the page every event belongs to
    #[arg(long, default_value = "/")]
    uri: String,

    /// User identifier recorded for the page
    #[arg(long)]
    user: Option<String>,

    /// Print the effective configuration and exit
    #[arg(long)]
    print_config: bool,
}

/// One event description as read from stdin
#[derive(Debug, Deserialize)]
struct EventLine {
    class: String,
    action: String,
    #[serde(default)]
    params: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    object: Option<ObjectLine>,
    #[serde(default)]
    stack: Vec<StackFrame>,
}

#[derive(Debug, Deserialize)]
struct ObjectLine {
    class: String,
    #[serde(default)]
    state: serde_json::Value,
}

impl EventLine {
    fn into_event(self, page: Arc<PageContext>) -> Event {
        let params: ParamMap = self.params.into_iter().collect();
        let mut event = Event::new(page, self.class, self.action)
            .with_params(params)
            .with_stack_trace(self.stack);

        if let Some(object) = self.object {
            event = event.with_object(ObjectRef::from_serialize(object.class, object.state));
        }

        event
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = LoggerConfig::load(args.config.as_deref()).context("Failed to load configuration")?;

    if args.print_config {
        print!("{}", config.to_yaml()?);
        return Ok(());
    }

    // Initialize observability (tracing, metrics)
    init_tracing(&config.observability);
    init_metrics(&config.observability)?;

    info!("Starting aspect logger v{}", aspect_logger::VERSION);

    for problem in config.validate() {
        warn!("Configuration problem: {}", problem);
    }

    let mut page = PageContext::new(args.uri, Utc::now());
    if let Some(user) = args.user {
        page = page.with_user(user);
    }

    let logger = AspectLogger::init(&config, page).context("Failed to start logger")?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut written = 0usize;

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(e) => {
                        error!("Failed to read stdin: {}", e);
                        break;
                    }
                };

                if line.trim().is_empty() {
                    continue;
                }

                match serde_json::from_str::<EventLine>(&line) {
                    Ok(description) => {
                        let summary = logger.write(&description.into_event(logger.page()));
                        if summary.delivered > 0 {
                            written += 1;
                        }
                    }
                    Err(e) => warn!("Skipping malformed event line: {}", e),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal, cleaning up...");
                break;
            }
        }
    }

    logger.stop();
    info!("Logged {} events", written);

    Ok(())
}
