//! Command-line entry point: parses the intermediate format, runs the
//! grounding procedure and writes the selected output encoding.

use anyhow::{bail, Context, Result};
use clap::Parser;
use grounder::given_plan;
use grounder::grounding::{run_grounding, GroundingConfig, GroundingOutcome, OutputFormat, SasDeleteMode};
use grounder::input;
use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "grounder", about = "Grounds lifted hierarchical planning problems")]
struct Opt {
    /// Input file; "-" or absent reads from standard input
    input: Option<PathBuf>,
    /// Output file; "-" or absent writes to standard output
    output: Option<PathBuf>,
    /// Second output file (the HDDL problem stream)
    output2: Option<PathBuf>,

    /// Print the parsed domain and problem, then exit
    #[arg(long)]
    print_domain: bool,

    /// Compute lifted FAM mutex groups
    #[arg(short = 'i', long)]
    invariants: bool,
    /// Run h2 mutex analysis
    #[arg(long = "h2")]
    h2_mutexes: bool,

    /// Disable hierarchy typing
    #[arg(long)]
    no_hierarchy_typing: bool,
    /// Prune hierarchy typing along static preconditions
    #[arg(long)]
    static_precondition_checking: bool,
    /// Partition the future-satisfiability cache by the initially matched
    /// precondition
    #[arg(long = "future-caching-by-initially-matched-precondition")]
    future_caching_by_precondition: bool,

    /// Keep useless literals
    #[arg(long)]
    no_literal_pruning: bool,
    /// Keep abstract tasks with a single method
    #[arg(long)]
    no_abstract_expansion: bool,
    /// Keep empty method precondition actions
    #[arg(long)]
    no_method_precondition_pruning: bool,
    /// Suppress inlining that would break two-regularized methods
    #[arg(long)]
    keep_two_regularisation: bool,
    /// Split methods to at most two subtasks
    #[arg(long)]
    two_tasks_per_method: bool,
    /// Compact runs of primitives in totally ordered methods
    #[arg(long)]
    compact_consecutive_primitives: bool,
    /// Fuse duplicate synthetic actions
    #[arg(short = 'D', long)]
    remove_duplicates: bool,
    /// Add a zero-cost no-op to empty methods
    #[arg(short = 'E', long)]
    noop_for_empty_methods: bool,
    /// Compile facts eliminable through binary mutexes into SAS+ values
    #[arg(short = 'N', long)]
    compile_negative_sas: bool,

    /// Give every uncovered fact its own SAS+ variable
    #[arg(short = 'S', long)]
    force_sas_only: bool,
    /// Drop all deletes of SAS+-covered facts
    #[arg(short = 'n', long)]
    no_sas_deletes: bool,
    /// Delete all other values of a SAS+ variable on every add
    #[arg(short = 'a', long)]
    all_sas_deletes: bool,

    /// Only ground; do not write planner output
    #[arg(short = 'g', long)]
    only_ground: bool,
    /// Write grounded HDDL (two output files)
    #[arg(short = 'H', long)]
    output_hddl: bool,
    /// Write Fast Downward SAS (no hierarchy)
    #[arg(short = 's', long)]
    sasplus: bool,

    /// Restrict the grounding to the actions of a known plan
    #[arg(long, value_name = "FILE")]
    restrict_to_plan: Option<PathBuf>,

    #[arg(short = 'q', long)]
    quiet: bool,
    #[arg(short = 't', long)]
    print_timings: bool,
}

impl Opt {
    fn config(&self) -> Result<GroundingConfig> {
        if self.no_literal_pruning && self.h2_mutexes {
            bail!("h2 mutexes require useless-literal pruning");
        }
        let output = if self.sasplus {
            OutputFormat::SasPlus
        } else if self.output_hddl {
            OutputFormat::Hddl
        } else if self.only_ground {
            OutputFormat::None
        } else {
            OutputFormat::Planner
        };
        let sas_mode = if self.no_sas_deletes {
            SasDeleteMode::None
        } else if self.all_sas_deletes {
            SasDeleteMode::All
        } else {
            SasDeleteMode::AsInput
        };
        Ok(GroundingConfig {
            enable_hierarchy_typing: !self.no_hierarchy_typing,
            with_static_precondition_checking: self.static_precondition_checking,
            future_caching_by_precondition: self.future_caching_by_precondition,
            compute_invariants: self.invariants,
            h2_mutexes: self.h2_mutexes,
            remove_useless_predicates: !self.no_literal_pruning,
            expand_choiceless_abstract_tasks: !self.no_abstract_expansion,
            prune_empty_method_preconditions: !self.no_method_precondition_pruning,
            keep_two_regularisation: self.keep_two_regularisation,
            at_most_two_tasks_per_method: self.two_tasks_per_method,
            compact_consecutive_primitives: self.compact_consecutive_primitives,
            remove_duplicate_actions: self.remove_duplicates,
            noop_for_empty_methods: self.noop_for_empty_methods,
            compile_negative_sas_variables: self.compile_negative_sas,
            output_sas_variables_only: self.force_sas_only,
            sas_mode,
            output,
            quiet: self.quiet,
            print_timings: self.print_timings,
        })
    }
}

fn open_output(path: &Option<PathBuf>) -> Result<Box<dyn Write>> {
    match path {
        Some(path) if path.as_os_str() != "-" => {
            let file = File::create(path).with_context(|| format!("cannot open output file {}", path.display()))?;
            Ok(Box::new(BufWriter::new(file)))
        }
        _ => Ok(Box::new(BufWriter::new(std::io::stdout()))),
    }
}

fn main() -> Result<()> {
    let opt = Opt::parse();

    let filter = if opt.quiet { "error" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
        .with_writer(std::io::stderr)
        .init();

    let config = opt.config()?;

    let mut text = String::new();
    match &opt.input {
        Some(path) if path.as_os_str() != "-" => {
            File::open(path)
                .with_context(|| format!("cannot open input file {}", path.display()))?
                .read_to_string(&mut text)?;
        }
        _ => {
            info!("reading input from standard input");
            std::io::stdin().read_to_string(&mut text)?;
        }
    }

    let (mut domain, mut problem) = input::parse(&text).context("failed to read input data")?;
    info!(
        constants = domain.constants.len(),
        sorts = domain.sorts.len(),
        predicates = domain.predicates.len(),
        primitive_tasks = domain.n_primitive,
        abstract_tasks = domain.tasks.len() - domain.n_primitive,
        methods = domain.methods.len(),
        "parsing done"
    );

    if opt.print_domain {
        let mut out = open_output(&opt.output)?;
        for (i, task) in domain.tasks.iter().enumerate() {
            let kind = if i < domain.n_primitive { "primitive" } else { "abstract" };
            writeln!(out, "{kind} task {} ({} variables)", task.name, task.variable_sorts.len())?;
        }
        for method in &domain.methods {
            writeln!(
                out,
                "method {} decomposing {} into {} subtasks",
                method.name,
                domain.tasks[usize::from(method.task)].name,
                method.subtasks.len()
            )?;
        }
        return Ok(());
    }

    let given = match &opt.restrict_to_plan {
        Some(path) => {
            let plan_text = std::fs::read_to_string(path)
                .with_context(|| format!("cannot open plan file {}", path.display()))?;
            Some(given_plan::parse_plan(&domain, &plan_text)?)
        }
        None => None,
    };

    let mut dout = open_output(&opt.output)?;
    let mut pout = open_output(&opt.output2)?;

    let start = std::time::Instant::now();
    let outcome = run_grounding(&mut domain, &mut problem, &config, given, &mut dout, &mut pout)?;
    dout.flush()?;
    pout.flush()?;
    if config.print_timings {
        info!(elapsed_ms = start.elapsed().as_millis() as u64, "grounding finished");
    }

    match outcome {
        GroundingOutcome::Written => Ok(()),
        GroundingOutcome::GoalUnreachable(diagnostic) => {
            // an unsolvable instance is a valid result, not a failure
            eprintln!("{diagnostic}");
            std::process::exit(0);
        }
    }
}
