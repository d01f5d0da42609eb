//! dw-migrate: warehouse migration planner
//!
//! # Usage
//!
//! ```bash
//! # Analyze every ETL script in a directory
//! dw-migrate analyze ./etl_scripts -o analysis_results.json
//!
//! # Explain one script
//! dw-migrate explain ./etl_scripts/dwd_01_order_fact_etl.sql
//!
//! # Migrate one business domain
//! dw-migrate migrate sales --target-db postgres
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use dw_migrate::orchestrator::GateOutcome;
use dw_migrate::prelude::*;
use dw_migrate::runners::{ConsistencyBackend, ProcessRunner, StateBackend};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "dw-migrate")]
#[command(version)]
#[command(about = "Plan and run a legacy warehouse migration", long_about = None)]
#[command(after_help = "EXAMPLES:
    dw-migrate analyze ./etl_scripts
    dw-migrate explain ./etl_scripts/dws_02_order_daily.sql
    dw-migrate migrate production --target-db postgres")]
struct Cli {
    /// Config file (default: ./dw-migrate.toml, then the user config dir)
    #[arg(long, global = true, env = "DW_MIGRATE_CONFIG")]
    config: Option<PathBuf>,

    /// Verbose logging on stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze all *.sql scripts in a directory
    Analyze {
        /// Directory containing the scripts
        dir: PathBuf,

        /// Where to write the JSON report
        #[arg(short, long, default_value = "analysis_results.json")]
        output: PathBuf,
    },
    /// Analyze a single script and print every facet
    Explain {
        file: PathBuf,
    },
    /// Migrate one business domain
    Migrate {
        /// Domain name, e.g. sales
        domain: String,

        /// dbt target database
        #[arg(short, long, default_value = "postgres")]
        target_db: String,
    },
    /// Show the domain graph in migration order
    Domains,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let code = match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {:#}", "Error:".red().bold(), e);
            1
        }
    };
    std::process::exit(code);
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli) -> Result<i32> {
    let config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Analyze { dir, output } => analyze(&config, &dir, &output),
        Commands::Explain { file } => explain(&config, &file),
        Commands::Migrate { domain, target_db } => migrate(&config, &domain, &target_db).await,
        Commands::Domains => show_domains(&config),
    }
}

fn analyze(config: &Config, dir: &Path, output: &Path) -> Result<i32> {
    println!("{}", "🔍 SQL Script Analysis".cyan().bold());
    println!();

    let analyzer = SqlAnalyzer::new(config.tools.clone());
    let report = analyze_corpus(&analyzer, dir)?;
    let summary = &report.summary;

    println!("  Files analyzed: {}", summary.total_files.to_string().yellow());
    if summary.unreadable_files > 0 {
        println!(
            "  Unreadable:     {}",
            summary.unreadable_files.to_string().red()
        );
    }
    println!();

    println!("{}", "Recommendations:".cyan());
    for outcome in Outcome::ALL {
        let count = summary.outcomes.get(&outcome).copied().unwrap_or(0);
        if count > 0 {
            println!("  {:<40} {}", outcome.render(&config.tools), count);
        }
    }
    println!();

    println!("{}", "By tool:".cyan());
    for (tool, count) in &summary.tools {
        println!("  {:<40} {}", tool, count);
    }
    println!();

    println!("{}", "By layer:".cyan());
    for (layer, count) in &summary.layers {
        println!("  {:<40} {}", layer, count);
    }
    println!();

    println!("{}", "By domain:".cyan());
    for (domain, count) in &summary.domains {
        println!("  {:<40} {}", domain, count);
    }
    println!();

    report
        .write_json(output)
        .with_context(|| format!("writing {}", output.display()))?;
    println!("{} {}", "✓ Report written to".green(), output.display());
    Ok(0)
}

fn explain(config: &Config, file: &Path) -> Result<i32> {
    let analyzer = SqlAnalyzer::new(config.tools.clone());
    let a = analyzer.analyze_file(file);
    if let Some(err) = &a.error {
        anyhow::bail!("cannot read {}: {}", file.display(), err);
    }

    println!("{} {}", "📄".cyan(), a.file.bold());
    println!();
    println!("  Layer:          {}", a.layer.to_string().yellow());
    println!("  Domain:         {}", a.domain.to_string().yellow());

    let tables: Vec<&str> = a.tables.iter().map(String::as_str).collect();
    println!("  Tables:         {}", tables.join(", "));
    for (target, sources) in &a.dependencies {
        let sources: Vec<&str> = sources.iter().map(String::as_str).collect();
        println!("  Lineage:        {} ← {}", target.green(), sources.join(", "));
    }

    match (&a.incremental.kind, &a.incremental.recommendation) {
        (Some(kind), Some(advice)) => println!("  Incremental:    {} ({})", kind, advice),
        (Some(kind), None) => println!("  Incremental:    {}", kind),
        _ => println!("  Incremental:    {}", "no".dimmed()),
    }
    match &a.time_range {
        Some(range) => println!(
            "  Time range:     {} {} ({})",
            range.interval, range.unit, range.recommendation
        ),
        None => println!("  Time range:     {}", "none".dimmed()),
    }

    let c = &a.complexity;
    println!(
        "  Complexity:     {} (score {}: {} subqueries, {} joins, {} aggregations, {} CASE, {} lines)",
        c.level.to_string().yellow(),
        c.score,
        c.subqueries,
        c.joins,
        c.aggregations,
        c.case_statements,
        c.lines
    );

    if a.dialect.generic {
        println!("  Dialect:        {}", "generic".dimmed());
    } else {
        if !a.dialect.mysql.is_empty() {
            println!("  MySQL:          {}", a.dialect.mysql.join(", "));
        }
        if !a.dialect.postgres.is_empty() {
            println!("  PostgreSQL:     {}", a.dialect.postgres.join(", "));
        }
    }
    println!();
    println!("  {} {}", "Recommendation:".green().bold(), a.recommendation);
    Ok(0)
}

async fn migrate(config: &Config, domain: &str, target_db: &str) -> Result<i32> {
    let graph = config.domain_graph()?;
    // Fail on an unknown domain before touching any database.
    let spec = graph.lookup(domain)?;

    println!(
        "{} {} (target: {})",
        "🚚 Migrating domain".cyan().bold(),
        spec.name.to_string().yellow(),
        target_db.yellow()
    );
    println!();

    let state = StateBackend::from_config(&config.state, &graph).await?;
    let consistency = ConsistencyBackend::from_config(&config.verify).await?;
    let runner = ProcessRunner::new(config.runner.clone(), target_db);

    let cancel = CancelFlag::default();
    let flag = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("{}", "Interrupted, stopping after the current step...".yellow());
            flag.cancel();
        }
    });

    let orchestrator =
        Orchestrator::new(&graph, &state, &runner, &runner, &consistency).with_cancel(cancel);
    let run = orchestrator.migrate_with(domain, print_progress).await?;

    println!();
    if run.is_success() {
        state.mark_migrated(run.domain())?;
        println!(
            "{} {}",
            "✅ Domain migrated:".green().bold(),
            run.domain().to_string().green()
        );
        Ok(0)
    } else {
        println!(
            "{} {}",
            "❌ Migration aborted:".red().bold(),
            run.reason().unwrap_or_default()
        );
        Ok(1)
    }
}

fn print_progress(progress: Progress<'_>) {
    match progress {
        Progress::CheckingDependency(prerequisite) => {
            println!("  {} prerequisite {}", "→".dimmed(), prerequisite)
        }
        Progress::MigratingModel(model) => println!("  {} {}", "→".dimmed(), model),
        Progress::RunningTests => println!("  {} running domain tests", "→".dimmed()),
        Progress::VerifyingConsistency => {
            println!("  {} verifying row counts", "→".dimmed())
        }
        Progress::GateFinished(gate) => print_gate(gate),
    }
}

fn print_gate(gate: &GateOutcome) {
    let detail = gate
        .detail
        .as_deref()
        .map(|d| format!(": {}", d))
        .unwrap_or_default();
    let at = gate.timestamp();
    if gate.passed {
        println!("{} {} {}{}", at.dimmed(), "✓".green(), gate.gate, detail.dimmed());
    } else if gate.gate.can_abort() {
        println!("{} {} {}{}", at.dimmed(), "✗".red(), gate.gate, detail.red());
    } else {
        println!(
            "{} {} {} failed, continuing{}",
            at.dimmed(),
            "⚠".yellow(),
            gate.gate,
            detail.yellow()
        );
    }
}

fn show_domains(config: &Config) -> Result<i32> {
    let graph = config.domain_graph()?;
    println!("{}", "📋 Domains (migration order)".cyan().bold());
    println!();

    for (i, domain) in graph.migration_order().into_iter().enumerate() {
        let Some(spec) = graph.get(domain) else {
            continue;
        };
        let deps: Vec<&str> = spec.depends_on.iter().map(|d| d.as_str()).collect();
        let deps = if deps.is_empty() {
            "-".to_string()
        } else {
            deps.join(", ")
        };
        println!(
            "  {}. {:<12} {} {}",
            i + 1,
            spec.name.to_string().yellow(),
            "after:".dimmed(),
            deps
        );
        for model in spec.models() {
            println!("       {}", model.to_string().dimmed());
        }
    }
    Ok(0)
}
