//! AMAQL CLI
//!
//! - `parse`: show the input and query descriptors of a pattern
//! - `derive`: run derivation rules over a graph snapshot
//! - `query`: run a pattern against a graph snapshot

use std::path::{Path, PathBuf};
use std::sync::Arc;

use amaql_dsl::{mount_input_descriptor, DerivationRule};
use amaql_graphdb::derivation::DEFAULT_MAX_PASSES;
use amaql_graphdb::{
    DerivationEngine, DerivationReport, GraphDB, GraphSnapshot, Logger, OutputMode, QueryEngine,
    QueryEngineConfig, TracingLogger,
};
use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use tracing::debug;
use tracing_subscriber::EnvFilter;

mod render;
mod rules_file;

use rules_file::RuleFile;

#[derive(Parser)]
#[command(name = "amaql")]
#[command(author, version, about = "AMAQL: pattern queries over labeled graphs")]
struct Cli {
    /// Debug-level logging (overrides AMAQL_LOG)
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the input descriptor and compiled query descriptor as JSON.
    Parse {
        /// Pattern, e.g. `?(node)-[realization]->(*)`
        query: String,
    },

    /// Derive edges from rules and report graph statistics.
    Derive(DeriveArgs),

    /// Run a pattern against a graph snapshot.
    Query(QueryArgs),
}

#[derive(Args)]
struct DeriveArgs {
    /// Graph snapshot (JSON)
    #[arg(long)]
    graph: PathBuf,

    /// Rule file (JSON)
    #[arg(long)]
    rules: PathBuf,

    /// Maximum derivation passes
    #[arg(long, default_value_t = DEFAULT_MAX_PASSES)]
    passes: usize,

    /// Write the derived graph here
    #[arg(long)]
    out: Option<PathBuf>,
}

#[derive(Args)]
struct QueryArgs {
    /// Graph snapshot (JSON)
    #[arg(long)]
    graph: PathBuf,

    /// Derive edges from these rules before querying
    #[arg(long)]
    rules: Option<PathBuf>,

    #[arg(long, default_value_t = DEFAULT_MAX_PASSES, requires = "rules")]
    passes: usize,

    /// Return unique vertices instead of paths
    #[arg(long)]
    scope_list: bool,

    /// Keep at most N results
    #[arg(long)]
    limit: Option<usize>,

    /// Bind the first stage to these vertex ids (repeatable)
    #[arg(long = "start", value_name = "ID")]
    start: Vec<String>,

    /// Print results as JSON
    #[arg(long)]
    json: bool,

    query: String,
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_env("AMAQL_LOG").unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_graph(path: &Path) -> Result<GraphDB> {
    let snapshot = GraphSnapshot::load_json(path)
        .with_context(|| format!("failed to load graph {}", path.display()))?;
    snapshot
        .into_graph()
        .with_context(|| format!("invalid graph {}", path.display()))
}

fn load_rules(path: &Path) -> Result<Vec<DerivationRule>> {
    RuleFile::load(path)?.compile()
}

async fn derive(
    graph: &mut GraphDB,
    rules: Vec<DerivationRule>,
    passes: usize,
) -> Result<DerivationReport> {
    let logger: Arc<dyn Logger> = Arc::new(TracingLogger);
    let mut engine = DerivationEngine::new(graph, rules, None, Some(logger))?;
    Ok(engine.derive_edges(passes).await)
}

fn cmd_parse(query: &str) -> Result<()> {
    let input = mount_input_descriptor(query)?;
    let descriptor = input.generate_query_descriptor();
    let json = serde_json::json!({
        "input": input,
        "query": descriptor,
    });
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}

async fn cmd_derive(args: DeriveArgs) -> Result<()> {
    let mut graph = load_graph(&args.graph)?;
    let rules = load_rules(&args.rules)?;
    let rule_count = rules.len();
    let report = derive(&mut graph, rules, args.passes).await?;

    eprintln!(
        "{} {} rule(s), {} pass(es): {} edge(s) added, {} skipped",
        "derived".green().bold(),
        rule_count,
        report.passes,
        report.edges_added,
        report.skipped
    );
    println!(
        "vertices: {}  edges: {}  derived: {}",
        graph.vertex_count(),
        graph.edge_count(),
        graph.derived_edge_count()
    );

    if let Some(out) = args.out {
        GraphSnapshot::from_graph(&graph)
            .save_json(&out)
            .with_context(|| format!("failed to write {}", out.display()))?;
        eprintln!("{} {}", "wrote".green().bold(), out.display().to_string().bold());
    }
    Ok(())
}

async fn cmd_query(args: QueryArgs) -> Result<()> {
    let mut graph = load_graph(&args.graph)?;
    if let Some(rules) = &args.rules {
        let report = derive(&mut graph, load_rules(rules)?, args.passes).await?;
        debug!(added = report.edges_added, passes = report.passes, "derivation before query");
    }

    let config = QueryEngineConfig {
        output: if args.scope_list {
            OutputMode::ScopeList
        } else {
            OutputMode::Paths
        },
    };
    let engine = QueryEngine::new(&graph)
        .with_config(config)
        .with_logger(Arc::new(TracingLogger));
    let start = (!args.start.is_empty()).then_some(args.start.as_slice());
    let mut output = engine.run(args.query.as_str(), start).await?;
    if let Some(limit) = args.limit {
        output.truncate(limit);
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        render::print_output(&output);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = match cli.command {
        Commands::Parse { query } => cmd_parse(&query),
        Commands::Derive(args) => cmd_derive(args).await,
        Commands::Query(args) => cmd_query(args).await,
    };

    if let Err(err) = result {
        eprintln!("{} {err:#}", "error:".red().bold());
        std::process::exit(1);
    }
    Ok(())
}
