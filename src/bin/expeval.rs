use std::{path::PathBuf, process::exit};

use anyhow::Result;
use clap::Parser;
use mimalloc::MiMalloc;

use expeval::{
    config::EvalConfig,
    config_file::{save_config_file, LoadConfigFile},
    context::EvalContext,
    error::PipelineError,
    get_terminal_width::get_terminal_width,
    info,
    process::{process_experiment_path, ProcessOutcome},
    utillib::logging::{LogLevel, LogLevelOpt},
};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

const PROGRAM_NAME: &str = "expeval";
const EXPEVAL_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(clap::Parser, Debug)]
#[clap(next_line_help = true)]
#[clap(term_width = get_terminal_width(4))]
/// Evaluate the metrics of scaling experiments: per-run and
/// per-group summaries and plots.
struct Opts {
    #[clap(flatten)]
    log_level: LogLevelOpt,

    /// Override the path to the config file (default: the paths
    /// `~/.expeval.*` where a single one exists where the `*` is the
    /// suffix for one of the supported config file formats, and if
    /// those are missing, use compiled-in default config values)
    #[clap(long)]
    config: Option<PathBuf>,

    /// The subcommand to run. Use `--help` after the sub-command to
    /// get a list of the allowed options there.
    #[clap(subcommand)]
    command: Command,
}

#[derive(clap::Subcommand, Debug)]
enum Command {
    /// Print version
    Version,

    /// Process an experiment directory: a single run (with
    /// `exp_log.json` or `final_df.csv`) or a group of runs or
    /// configurations. Writes the summaries and plots into it.
    Process {
        /// Relative paths are resolved against the
        /// `experiments_base_dir` config setting, if given
        path: PathBuf,
    },

    /// Write the default configuration to a file, as a starting
    /// point (the format is chosen by the file suffix: .json5, .json,
    /// .yml, .yaml)
    ConfigTemplate { path: PathBuf },
}

fn run(opts: Opts) -> Result<()> {
    let Opts {
        log_level,
        config,
        command,
    } = opts;
    let log_level = LogLevel::try_from(log_level)?;

    match command {
        Command::Version => println!("{PROGRAM_NAME} version {EXPEVAL_VERSION}"),
        Command::ConfigTemplate { path } => {
            save_config_file(&path, &EvalConfig::default())?;
            info!(log_level, "wrote {path:?}");
        }
        Command::Process { path } => {
            let config = EvalConfig::load_config(config)?;
            let ctx = EvalContext::new(log_level, config);
            let outcome = process_experiment_path(&ctx, &path)?;
            match &outcome {
                ProcessOutcome::Single(o) => {
                    println!("run {:?}: {} parallelism levels", o.run_dir, o.summary.len());
                    for e in &o.insufficient {
                        println!("  insufficient data: {e}");
                    }
                }
                ProcessOutcome::Grouped(o) => {
                    println!(
                        "group {:?} ({}): {} rows, {} runs included, {} excluded",
                        o.group_dir,
                        o.strategy.tag(),
                        o.summary.len(),
                        o.included.len(),
                        o.exclusions.len()
                    );
                    for x in &o.exclusions {
                        println!("  excluded {:?}: {:#}", x.run, x.reason);
                    }
                }
            }
            for path in outcome.artifacts() {
                println!("  wrote {path:?}");
            }
        }
    }
    Ok(())
}

fn main() {
    let opts = Opts::parse();
    if let Err(e) = run(opts) {
        eprintln!("{PROGRAM_NAME}: {e:#}");
        if let Some(kind) = PipelineError::find(&e) {
            eprintln!("error kind: {}", kind.kind_name());
        }
        if let Some(path) = PipelineError::report_path(&e) {
            eprintln!("path: {path:?}");
        }
        exit(1);
    }
}
