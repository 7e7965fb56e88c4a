//! Optic Pulse CLI
//!
//! Runs the insight operations against a SQLite source:
//! - `vibe-report`, `brand-voice`, `smart-receipt`: one operation each
//! - `process`: classify a free-form JSON request and dispatch it
//! - `check-schema`: resolve the source schema without calling a model
//!
//! Configuration comes from the environment (`OPENAI_API_KEY`,
//! `ANTHROPIC_API_KEY`, `LOCAL_LLM_URL`, `PULSE_*`); flags override it.
//! Results print as pretty JSON on stdout. Failures print the stable error
//! code on stderr and exit non-zero.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use pulse_ingest::resolve;
use pulse_insight::{CancelToken, PulseConfig, PulseRuntime, UnifiedClient};
use pulse_model::{BasketItem, PulseError, SmartReceiptRequest, VibeReportRequest};
use pulse_storage::discover_schema;
use serde::Serialize;
use serde_json::{json, Value};
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "pulse")]
#[command(
    author,
    version,
    about = "Optic Pulse: behavioral summaries and generative retail insights"
)]
struct Cli {
    #[command(flatten)]
    overrides: Overrides,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    /// Print the call trace alongside the result
    #[arg(long, global = true)]
    with_trace: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct Overrides {
    /// SQLite database holding customers, transactions and campaigns
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Read the source schema from a DDL file instead of the catalog
    #[arg(long, global = true)]
    ddl: Option<PathBuf>,

    /// Base image for vibe cards; a JSON manifest is written beside it
    #[arg(long, global = true)]
    card_template: Option<PathBuf>,

    /// Default behavior window in months
    #[arg(long, global = true)]
    window_months: Option<u32>,

    /// Model call attempts before giving up
    #[arg(long, global = true)]
    max_attempts: Option<u32>,
}

#[derive(Subcommand)]
enum Commands {
    /// Loyalty "vibe" profile for a customer
    VibeReport {
        customer_id: String,

        /// Window end (RFC 3339); defaults to now
        #[arg(long)]
        as_of: Option<String>,
    },

    /// New campaign text in a brand's cloned voice
    BrandVoice {
        brand_id: String,

        /// JSON array of past campaign texts (strings or campaign objects);
        /// loaded from the source when omitted
        #[arg(long)]
        texts: Option<PathBuf>,
    },

    /// Next-best-item recommendation for a receipt
    SmartReceipt {
        customer_id: String,

        /// Basket item name (repeatable)
        #[arg(long = "item")]
        items: Vec<String>,

        /// JSON array of basket items
        #[arg(long)]
        basket: Option<PathBuf>,

        /// Window end (RFC 3339); defaults to now
        #[arg(long)]
        as_of: Option<String>,
    },

    /// Classify a JSON request and run the matching operation
    Process {
        /// Request file (reads stdin when omitted)
        #[arg(short, long)]
        input: Option<PathBuf>,
    },

    /// Resolve the source schema against the canonical fields
    CheckSchema,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            match err.downcast_ref::<PulseError>() {
                Some(pulse) => eprintln!("{} [{}] {}", "error".red().bold(), pulse.code(), pulse),
                None => eprintln!("{} {:#}", "error".red().bold(), err),
            }
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config(overrides: &Overrides) -> Result<PulseConfig> {
    let mut config = PulseConfig::from_env()?;
    if let Some(db) = &overrides.db {
        config.source.database_path = db.clone();
    }
    if let Some(ddl) = &overrides.ddl {
        config.source.ddl_path = Some(ddl.clone());
    }
    if let Some(template) = &overrides.card_template {
        config.card_template = Some(template.clone());
    }
    if let Some(months) = overrides.window_months {
        config.window_months = months;
    }
    if let Some(attempts) = overrides.max_attempts {
        config.model.retry.max_attempts = attempts;
    }
    Ok(config)
}

async fn run(cli: Cli) -> Result<()> {
    let config = load_config(&cli.overrides)?;

    if let Commands::CheckSchema = cli.command {
        return cmd_check_schema(&config);
    }

    let client = UnifiedClient::from_config(&config.model).map_err(PulseError::from)?;
    let runtime = PulseRuntime::start(config, Arc::new(client))?;

    let cancel = CancelToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            trigger.cancel();
        }
    });

    let result = dispatch(&runtime, cli.command, cli.with_trace, &cancel).await;
    runtime.shutdown();
    result
}

async fn dispatch(
    runtime: &PulseRuntime,
    command: Commands,
    with_trace: bool,
    cancel: &CancelToken,
) -> Result<()> {
    match command {
        Commands::VibeReport { customer_id, as_of } => {
            let mut request = VibeReportRequest::new(customer_id);
            if let Some(as_of) = as_of {
                request = request.as_of(parse_instant(&as_of)?);
            }
            let insight = runtime.vibe_report(&request, cancel).await?;
            print_json(&insight.value, &insight.trace, with_trace)
        }
        Commands::BrandVoice { brand_id, texts } => {
            let texts = match texts {
                Some(path) => read_json(&path)?,
                None => Value::Null,
            };
            let params = json!({ "brand_id": brand_id, "campaign_texts": texts });
            let request = runtime.parse_brand_voice(params.as_object().cloned().unwrap_or_default())?;
            let insight = runtime.brand_voice(&request, cancel).await?;
            print_json(&insight.value, &insight.trace, with_trace)
        }
        Commands::SmartReceipt {
            customer_id,
            items,
            basket,
            as_of,
        } => {
            let mut basket_items: Vec<BasketItem> = match basket {
                Some(path) => serde_json::from_value(read_json(&path)?)
                    .with_context(|| format!("{} is not a basket item array", path.display()))?,
                None => Vec::new(),
            };
            basket_items.extend(items.into_iter().map(BasketItem::named));
            let mut request = SmartReceiptRequest::new(customer_id, basket_items);
            if let Some(as_of) = as_of {
                request = request.as_of(parse_instant(&as_of)?);
            }
            let insight = runtime.smart_receipt(&request, cancel).await?;
            print_json(&insight.value, &insight.trace, with_trace)
        }
        Commands::Process { input } => {
            let request: Value = match input {
                Some(path) => read_json(&path)?,
                None => {
                    let mut buf = String::new();
                    io::stdin().read_to_string(&mut buf)?;
                    serde_json::from_str(&buf).context("stdin is not valid JSON")?
                }
            };
            let processed = runtime.process(&request, cancel).await?;
            if with_trace {
                println!("{}", serde_json::to_string_pretty(&processed)?);
            } else {
                println!("{}", serde_json::to_string_pretty(&processed.result)?);
            }
            Ok(())
        }
        Commands::CheckSchema => cmd_check_schema(runtime.config()),
    }
}

fn cmd_check_schema(config: &PulseConfig) -> Result<()> {
    let schema = discover_schema(&config.source).map_err(PulseError::from)?;
    let resolved = resolve(&schema).map_err(PulseError::from)?;
    println!("{}", serde_json::to_string_pretty(&resolved)?);
    match resolved.campaigns {
        Some(_) => eprintln!("{} schema resolved", "ok".green().bold()),
        None => eprintln!(
            "{} schema resolved without a campaign table; brand-voice needs supplied texts",
            "ok".yellow().bold()
        ),
    }
    Ok(())
}

fn print_json<T: Serialize, U: Serialize>(value: &T, trace: &U, with_trace: bool) -> Result<()> {
    let out = if with_trace {
        serde_json::to_string_pretty(&json!({ "result": value, "trace": trace }))?
    } else {
        serde_json::to_string_pretty(value)?
    };
    println!("{out}");
    Ok(())
}

fn read_json(path: &Path) -> Result<Value> {
    let raw = fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("{} is not valid JSON", path.display()))
}

fn parse_instant(raw: &str) -> Result<DateTime<Utc>> {
    let parsed = DateTime::parse_from_rfc3339(raw)
        .map_err(|e| PulseError::InvalidRequest(format!("--as-of {raw:?}: {e}")))?;
    Ok(parsed.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_receipt_items() {
        let cli = Cli::try_parse_from([
            "pulse",
            "--db",
            "retail.db",
            "smart-receipt",
            "c1",
            "--item",
            "Milk",
            "--item",
            "Bread",
        ])
        .unwrap();
        assert_eq!(cli.overrides.db, Some(PathBuf::from("retail.db")));
        match cli.command {
            Commands::SmartReceipt { customer_id, items, .. } => {
                assert_eq!(customer_id, "c1");
                assert_eq!(items, vec!["Milk", "Bread"]);
            }
            _ => panic!("expected smart-receipt"),
        }
    }

    #[test]
    fn test_overrides_apply() {
        let overrides = Overrides {
            db: Some(PathBuf::from("/tmp/x.db")),
            ddl: None,
            card_template: None,
            window_months: Some(6),
            max_attempts: Some(5),
        };
        let config = load_config(&overrides).unwrap();
        assert_eq!(config.window_months, 6);
        assert_eq!(config.model.retry.max_attempts, 5);
        assert_eq!(config.source.database_path, PathBuf::from("/tmp/x.db"));
    }

    #[test]
    fn test_as_of_must_be_rfc3339() {
        assert!(parse_instant("2025-06-01T00:00:00Z").is_ok());
        let err = parse_instant("yesterday").unwrap_err();
        assert!(err.downcast_ref::<PulseError>().is_some());
    }
}
