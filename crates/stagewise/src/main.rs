use std::{
    io::{self, Write},
    path::PathBuf,
    process::ExitCode,
    sync::Arc,
};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::{LevelFilter, error};
use stagewise::{
    BuildContext, BuildMode, CancellationToken, Config, PipelineBuilder,
    hooks::ProgressHook,
    rules::{RuleMatch, RuleTarget},
};

#[derive(Parser, Debug)]
#[command(name = "stagewise")]
#[command(version, about = "Rule-driven asset pipeline and bundler", long_about = None)]
struct Cli {
    /// Configuration file; defaults to the nearest stagewise.toml
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Increase verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Build every entry into the output directory
    Build {
        /// Overrides `mode` from the config and the mode environment variable
        #[arg(short, long, value_enum)]
        mode: Option<BuildMode>,

        /// Overrides `output.path`
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Validate the configuration and print the rule table
    Check,
    /// Print the stage chain a request would get, e.g. `src/button.scss?module`
    Explain { request: String },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    env_logger::Builder::new()
        .filter_level(level)
        .format_timestamp(None)
        .parse_default_env()
        .init();
}

fn run(cli: Cli) -> Result<()> {
    let cwd = std::env::current_dir().context("Failed to determine the working directory")?;
    let (config, root) = Config::load(cli.config.as_deref(), &cwd)?;

    match cli.command {
        Command::Build { mode, output } => {
            let mut builder =
                PipelineBuilder::from_config(&config, &root).hook(Arc::new(ProgressHook));
            if let Some(output) = output {
                builder = builder.output_path(cwd.join(output));
            }
            let pipeline = builder.finish()?;
            let cx = BuildContext::resolve(&config, std::env::vars(), mode);
            let report = pipeline.build(&cx, &CancellationToken::new())?;
            write!(io::stdout().lock(), "{report}")?;
        }
        Command::Check => {
            let pipeline = PipelineBuilder::from_config(&config, &root).finish()?;
            let mut out = io::stdout().lock();
            writeln!(out, "Configuration OK ({} rule(s))", pipeline.rules().len())?;
            for (index, rule) in pipeline.rules().rules().iter().enumerate() {
                let exclude = rule
                    .exclude()
                    .map(|pattern| format!(" (exclude {})", pattern.as_str()))
                    .unwrap_or_default();
                writeln!(out, "#{index} {}{exclude}", rule.test().as_str())?;
                match rule.target() {
                    RuleTarget::Direct(stages) => writeln!(out, "    use {:?}", stages.names())?,
                    RuleTarget::Branching(branches) => {
                        for branch in branches {
                            writeln!(
                                out,
                                "    {} -> {:?}",
                                branch.predicate,
                                branch.stages.names()
                            )?;
                        }
                    }
                }
            }
        }
        Command::Explain { request } => {
            let pipeline = PipelineBuilder::from_config(&config, &root).finish()?;
            let mut out = io::stdout().lock();
            match pipeline.explain(&request)? {
                RuleMatch::Chain {
                    rule_index,
                    branch_index,
                    stages,
                } => {
                    let branch = branch_index
                        .map(|index| format!(", branch {index}"))
                        .unwrap_or_default();
                    writeln!(out, "{request}: rule #{rule_index}{branch}")?;
                    let applied: Vec<&str> = stages.iter().rev().map(|stage| stage.name()).collect();
                    writeln!(out, "applied in order: {}", applied.join(" -> "))?;
                }
                RuleMatch::PassThrough => {
                    writeln!(out, "{request}: no rule matches, passed through unchanged")?;
                }
            }
        }
    }
    Ok(())
}
