use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use winscrape_flow::config::{AppConfig, ConfigOverrides};
use winscrape_flow::dsl::{SchemaParser, SchemaValidator};
use winscrape_flow::export::{ExportFormat, ExportManager};
use winscrape_flow::extract::{ClickNextAdvancer, ExtractionEngine};
use winscrape_flow::flow::{Condition, ControlFlowExpander};
use winscrape_flow::logging::init_logging;
use winscrape_flow::page::HtmlPage;
use winscrape_flow::EvaluationContext;

#[derive(Parser)]
#[command(name = "wsf-cli")]
#[command(about = "WinScrape Flow command line interface")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(short, long, help = "Enable verbose logging")]
    verbose: bool,

    #[arg(short, long, help = "Configuration file path")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an extraction schema against a saved or downloaded page
    Extract {
        #[arg(short, long, help = "Schema file (JSON or YAML)")]
        schema: PathBuf,

        #[arg(long, help = "HTML file of the start page", conflicts_with = "fetch", required_unless_present = "fetch")]
        html: Option<PathBuf>,

        #[arg(long, help = "URL of the --html page", default_value = "http://localhost/")]
        url: String,

        #[arg(long, help = "Download the start page from this URL")]
        fetch: Option<String>,

        #[arg(long = "page", help = "Further page of the site as URL=FILE", value_parser = parse_page_arg)]
        pages: Vec<(String, PathBuf)>,

        #[arg(short, long, help = "Output format (csv, json, jsonl)")]
        format: Option<String>,

        #[arg(short, long, help = "Output file path; prints to stdout when absent")]
        output: Option<PathBuf>,
    },

    /// Validate an extraction schema
    Validate {
        #[arg(help = "Path to schema file")]
        schema: PathBuf,
    },

    /// Expand a control-flow step into the steps it would run
    Expand {
        #[arg(help = "Path to step file (JSON or YAML)")]
        step_file: PathBuf,

        #[arg(long, help = "Initial variables as a JSON object")]
        vars: Option<String>,
    },

    /// Evaluate a condition
    Eval {
        #[arg(help = "Path to condition file (JSON or YAML)")]
        condition_file: PathBuf,

        #[arg(long, help = "Variables as a JSON object")]
        vars: Option<String>,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => AppConfig::load_from_file(path).await?,
        None => AppConfig::load().await?,
    };
    ConfigOverrides::apply(&mut config);
    if cli.verbose {
        config.logging.level = "debug".to_string();
    }
    config.validate()?;
    init_logging(&config.logging)?;

    info!("WinScrape Flow CLI v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Commands::Extract { schema, html, url, fetch, pages, format, output } => {
            run_extract(&config, &schema, html, url, fetch, pages, format, output).await?;
        }
        Commands::Validate { schema } => {
            validate_schema(&config, &schema).await?;
        }
        Commands::Expand { step_file, vars } => {
            expand_step(&config, &step_file, vars).await?;
        }
        Commands::Eval { condition_file, vars } => {
            eval_condition(&condition_file, vars).await?;
        }
    }

    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn run_extract(
    config: &AppConfig,
    schema_path: &Path,
    html: Option<PathBuf>,
    url: String,
    fetch: Option<String>,
    pages: Vec<(String, PathBuf)>,
    format: Option<String>,
    output: Option<PathBuf>,
) -> Result<()> {
    let schema = SchemaParser::load_schema(schema_path).await?;
    let report = SchemaValidator::new(config.extraction.max_rule_depth).validate(&schema)?;
    for warning in &report.warnings {
        eprintln!("warning: {}", warning);
    }

    let (start_url, start_html) = match (fetch, html) {
        (Some(fetch_url), _) => {
            let body = fetch_page(&fetch_url).await?;
            (fetch_url, body)
        }
        (None, Some(path)) => {
            let body = tokio::fs::read_to_string(&path)
                .await
                .with_context(|| format!("Failed to read {}", path.display()))?;
            (url, body)
        }
        (None, None) => anyhow::bail!("Either --html or --fetch is required"),
    };

    let mut documents = vec![(start_url.clone(), start_html)];
    for (page_url, path) in pages {
        let body = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        documents.push((page_url, body));
    }
    let page = HtmlPage::with_pages(&start_url, documents)?;

    let mut engine = ExtractionEngine::new(config.extraction.clone());
    let advancer = ClickNextAdvancer::new(Duration::from_millis(config.extraction.default_wait_between_pages_ms));
    let results = engine.extract(&schema, &page, &advancer).await?;

    let error_count: usize = results.iter().map(|r| r.errors.len()).sum();
    if error_count > 0 {
        warn!("{} rule error(s) across {} page(s)", error_count, results.len());
    }

    let manager = ExportManager::new(&config.export);
    let format = match format {
        Some(format) => format.parse::<ExportFormat>()?,
        None => manager.default_format()?,
    };

    match output {
        Some(path) => {
            let stats = manager.export(engine.results(), &path, format).await?;
            println!(
                "Extracted {} page(s); {} written to {} ({} bytes)",
                stats.record_count, stats.format, stats.file_path, stats.file_size_bytes
            );
        }
        None => print!("{}", manager.render(engine.results(), format)?),
    }

    Ok(())
}

async fn fetch_page(url: &str) -> Result<String> {
    info!("Fetching {}", url);
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .connect_timeout(Duration::from_secs(10))
        .user_agent(concat!("wsf-cli/", env!("CARGO_PKG_VERSION")))
        .gzip(true)
        .build()?;

    let response = client.get(url).send().await?.error_for_status()?;
    Ok(response.text().await?)
}

async fn validate_schema(config: &AppConfig, path: &Path) -> Result<()> {
    let schema = SchemaParser::load_schema(path).await?;
    let report = SchemaValidator::new(config.extraction.max_rule_depth).validate(&schema)?;

    println!("Schema '{}' is valid ({} rules)", schema.id, schema.rules.len());
    for warning in &report.warnings {
        println!("  warning: {}", warning);
    }

    Ok(())
}

async fn expand_step(config: &AppConfig, path: &Path, vars: Option<String>) -> Result<()> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let step = SchemaParser::parse_step(&content)?;
    let mut context = context_from_vars(vars)?;

    let expander = ControlFlowExpander::with_config(config.engine.clone());
    let expansion = expander.expand(&step, &mut context);

    let output = json!({
        "kind": step.kind(),
        "steps": expansion.steps,
        "iterations": expansion.iterations,
        "truncated": expansion.truncated,
        "variables": context.variables,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);

    Ok(())
}

async fn eval_condition(path: &Path, vars: Option<String>) -> Result<()> {
    let condition: Condition = SchemaParser::load_document(path).await?;
    let context = context_from_vars(vars)?;

    let evaluator = winscrape_flow::ConditionEvaluator::default();
    println!("{}", evaluator.evaluate(&condition, &context));

    Ok(())
}

fn context_from_vars(vars: Option<String>) -> Result<EvaluationContext> {
    let variables: HashMap<String, Value> = match vars {
        Some(raw) => serde_json::from_str(&raw).context("--vars must be a JSON object")?,
        None => HashMap::new(),
    };
    Ok(EvaluationContext::with_variables(variables))
}

fn parse_page_arg(raw: &str) -> std::result::Result<(String, PathBuf), String> {
    match raw.rsplit_once('=') {
        Some((url, file)) if !url.is_empty() && !file.is_empty() => Ok((url.to_string(), PathBuf::from(file))),
        _ => Err(format!("expected URL=FILE, got '{}'", raw)),
    }
}
