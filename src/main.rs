// SPDX-License-Identifier: MIT

use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use dotenv::dotenv;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use weft_rs::adk::reasoner::openai::OpenAIReasoner;
use weft_rs::adk::reasoner::{EchoReasoner, Reasoner, ReasonerSelector};
use weft_rs::weft::config::Settings;
use weft_rs::weft::workflow::condition::ConditionSelector;
use weft_rs::weft::workflow::driver::Runner;
use weft_rs::weft::workflow::graph::{
    Collaborators, ExecutionEngine, FragmentMerger, RunSnapshot, StepValidator, WorkflowGraph,
};
use weft_rs::weft::workflow::loader::WorkflowLoader;
use weft_rs::weft::workflow::registry::ToolCatalog;
use weft_rs::weft::workflow::report::ValidationReport;
use weft_rs::weft::workflow::types::{document_schema, DocumentKind};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Tool catalog (YAML); overrides WEFT_TOOL_CATALOG
    #[arg(short, long, global = true)]
    catalog: Option<PathBuf>,

    /// Treat Minor findings as blocking; overrides WEFT_STRICT
    #[arg(long, global = true)]
    strict: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Validate a graph or fragment document
    Validate {
        /// Path to the document
        file: PathBuf,

        /// Read the document as a fragment
        #[arg(long)]
        fragment: bool,
    },
    /// Merge a plan of fragments into one graph
    Merge {
        /// Path to the plan document
        plan: PathBuf,

        /// Write the merged graph here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Emit JSON instead of YAML
        #[arg(long)]
        json: bool,
    },
    /// Execute a graph
    Run {
        /// Path to the graph document
        graph: PathBuf,

        /// Continue from a saved run snapshot
        #[arg(short, long)]
        resume: Option<PathBuf>,

        /// Echo prompts instead of calling the model
        #[arg(long)]
        offline: bool,

        /// Fork at every branch point and run each branch
        #[arg(long)]
        all_branches: bool,

        /// Snapshot directory; overrides WEFT_EXECUTIONS_DIR
        #[arg(long)]
        save_dir: Option<PathBuf>,
    },
    /// Print the JSON Schema of a document kind
    Schema {
        #[arg(value_enum, default_value_t = SchemaKind::Graph)]
        kind: SchemaKind,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum SchemaKind {
    Graph,
    Fragment,
    Plan,
}

impl From<SchemaKind> for DocumentKind {
    fn from(kind: SchemaKind) -> Self {
        match kind {
            SchemaKind::Graph => DocumentKind::Graph,
            SchemaKind::Fragment => DocumentKind::Fragment,
            SchemaKind::Plan => DocumentKind::Plan,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    env_logger::init();

    let args = Args::parse();
    let settings = Settings::from_env()?;
    let strict = args.strict || settings.strict;

    match args.command {
        Commands::Validate { file, fragment } => {
            let catalog = load_catalog(args.catalog.as_deref(), &settings)?;
            let validator = StepValidator::new(&catalog);
            let report = if fragment {
                let fragment = WorkflowLoader::load_fragment(&file)
                    .with_context(|| format!("failed to load fragment {}", file.display()))?;
                validator.validate_fragment(&fragment)
            } else {
                let graph = WorkflowLoader::load_graph(&file)
                    .with_context(|| format!("failed to load graph {}", file.display()))?;
                validator.validate(&graph)
            };
            check(&report, strict)?;
            println!("{} is valid", file.display());
        }
        Commands::Merge { plan, output, json } => {
            let catalog = load_catalog(args.catalog.as_deref(), &settings)?;
            let loaded = WorkflowLoader::load_plan(&plan)
                .with_context(|| format!("failed to load plan {}", plan.display()))?;

            let graph = match FragmentMerger::new(&catalog)
                .merge(&loaded.fragments, loaded.dependencies.as_deref())
            {
                Ok(graph) => graph,
                Err(report) => {
                    print_report(&report);
                    bail!("merge rejected");
                }
            };
            if strict {
                check(&StepValidator::new(&catalog).validate(&graph), strict)?;
            }

            let text = if json {
                WorkflowLoader::to_json(&graph)?
            } else {
                WorkflowLoader::to_yaml(&graph)?
            };
            match output {
                Some(path) => {
                    fs::write(&path, text)
                        .with_context(|| format!("failed to write {}", path.display()))?;
                    println!("Merged graph written to {}", path.display());
                }
                None => print!("{}", text),
            }
        }
        Commands::Run {
            graph,
            resume,
            offline,
            all_branches,
            save_dir,
        } => {
            let catalog = Arc::new(load_catalog(args.catalog.as_deref(), &settings)?);
            let graph: Arc<WorkflowGraph> = Arc::new(
                WorkflowLoader::load_graph(&graph)
                    .with_context(|| format!("failed to load graph {}", graph.display()))?,
            );
            if strict {
                check(
                    &StepValidator::new(catalog.as_ref()).validate(&graph),
                    strict,
                )?;
            }

            let reasoner: Arc<dyn Reasoner> = if offline {
                log::info!("Offline mode: prompts are echoed back");
                Arc::new(EchoReasoner)
            } else {
                Arc::new(OpenAIReasoner::from_settings(&settings)?)
            };
            let selector = ConditionSelector::with_fallback(Arc::new(ReasonerSelector::new(
                Arc::clone(&reasoner),
            )));
            let collaborators = Collaborators::new(reasoner)
                .with_selector(Arc::new(selector));

            let engine = match resume {
                Some(path) => {
                    let snapshot = RunSnapshot::load(&path)
                        .with_context(|| format!("failed to load snapshot {}", path.display()))?;
                    ExecutionEngine::restore(graph, catalog.clone(), snapshot)?
                }
                None => ExecutionEngine::new(graph, catalog.clone())?,
            };

            let dir = save_dir.unwrap_or_else(|| settings.executions_dir.clone());
            let runner = Runner::new(collaborators, catalog).with_snapshot_dir(dir);
            let snapshots = if all_branches {
                runner.run_all_branches(engine).await?
            } else {
                vec![runner.run(engine).await?]
            };

            for snapshot in &snapshots {
                println!(
                    "Run {}: {} after [{}]",
                    snapshot.run_id,
                    snapshot.status,
                    snapshot.trail.join(" -> ")
                );
            }
            if snapshots.len() == 1 {
                println!("{}", serde_json::to_string_pretty(&snapshots[0].state)?);
            }
        }
        Commands::Schema { kind } => {
            let schema = document_schema(kind.into());
            println!("{}", serde_json::to_string_pretty(&schema)?);
        }
    }

    Ok(())
}

fn load_catalog(path: Option<&Path>, settings: &Settings) -> anyhow::Result<ToolCatalog> {
    match path.or(settings.tool_catalog.as_deref()) {
        Some(path) => ToolCatalog::load(path)
            .with_context(|| format!("failed to load tool catalog {}", path.display())),
        None => {
            log::warn!("No tool catalog given; every tool call will be unknown");
            Ok(ToolCatalog::new())
        }
    }
}

fn print_report(report: &ValidationReport) {
    for violation in &report.violations {
        println!("{}", violation);
    }
}

fn check(report: &ValidationReport, strict: bool) -> anyhow::Result<()> {
    print_report(report);
    if !report.is_accepted_with(strict) {
        bail!("{} finding(s) block acceptance", report.len());
    }
    Ok(())
}
