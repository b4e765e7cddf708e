//! crossplan CLI: validate and explain cross-platform job files.

use clap::{Parser, Subcommand};
use crossplan_core::config::OptimizerConfig;
use crossplan_estimate::CardinalityEstimator;
use crossplan_exec::lower;
use crossplan_planner::{parse_job, PlanEnumerator};
use std::collections::BTreeSet;
use std::fs;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "crossplan")]
#[command(about = "Cost-based optimizer for jobs spanning several execution platforms", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse a job file and check that the plan is well formed
    Validate {
        /// Path to the job YAML file
        #[arg(short, long)]
        job: PathBuf,
    },

    /// Optimize a job and print the chosen implementation and stages
    Explain {
        /// Path to the job YAML file
        #[arg(short, long)]
        job: PathBuf,

        /// Keep only the k cheapest implementations per scope (overrides config)
        #[arg(long)]
        top_k: Option<usize>,

        /// Prune mixed-platform alternatives when a single-platform one exists
        #[arg(long)]
        single_platform: bool,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("crossplan=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Validate { job } => {
            if let Err(e) = validate_job(&job) {
                eprintln!("Validation failed: {}", e);
                std::process::exit(1);
            }
            println!("✓ Job is valid");
        }
        Commands::Explain {
            job,
            top_k,
            single_platform,
        } => {
            if let Err(e) = explain_job(&job, top_k, single_platform) {
                eprintln!("Error: {}", e);
                std::process::exit(1);
            }
        }
    }
}

fn validate_job(path: &PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let yaml = fs::read_to_string(path)?;
    let job = parse_job(&yaml)?;
    println!(
        "  {} operators, {} loops, {} platforms",
        job.plan.len(),
        job.plan.loops().len(),
        job.context.platforms.len()
    );
    Ok(())
}

fn explain_job(
    path: &PathBuf,
    top_k: Option<usize>,
    single_platform: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let yaml = fs::read_to_string(path)?;
    let job = parse_job(&yaml)?;
    let mut config = job.config.clone();
    apply_overrides(&mut config, top_k, single_platform);
    config.validate()?;

    let estimates = CardinalityEstimator::new(&job.plan, &config).estimate_or_fallback();
    let enumerator = PlanEnumerator::new(&job.plan, &job.context, &estimates, &config);
    let enumeration = enumerator.enumerate()?;
    let best = enumeration
        .best()
        .ok_or("no feasible implementation")?;
    let stages = lower(&job.plan, best, &BTreeSet::new(), &job.context.conversions)?;

    println!("Job Execution Plan");
    println!("==================");
    println!();
    println!("Cardinalities:");
    for op in job.plan.topological_order() {
        let operator = job.plan.op(*op);
        for i in 0..operator.outputs.len() {
            if let Some(est) = estimates.output(operator.output(i)) {
                println!("  {}.{}: {}", operator.name, i, est);
            }
        }
    }
    println!();
    println!(
        "Chosen implementation (cost {}, {} alternatives kept):",
        best.cost(),
        enumeration.len()
    );
    println!("  {}", best.describe(&job.plan));
    for junction in best.junctions() {
        let steps: Vec<String> = junction
            .conversions()
            .map(|c| format!("{} -> {}", c.source, c.target))
            .collect();
        if !steps.is_empty() {
            println!("  {}: {}", junction.output, steps.join(", "));
        }
    }
    println!();
    println!("Stages:");
    for line in stages.describe().lines() {
        println!("  {}", line);
    }

    Ok(())
}

fn apply_overrides(config: &mut OptimizerConfig, top_k: Option<usize>, single_platform: bool) {
    if let Some(k) = top_k {
        config.top_k = Some(k);
    }
    if single_platform {
        config.single_platform_pruning = true;
    }
}
