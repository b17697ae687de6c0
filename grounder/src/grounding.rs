//! Driver: sequences inference, reachability, simplification and output.

use crate::conditional_effects::expand_conditional_effects;
use crate::duplicate::unify_duplicates;
use crate::fam;
use crate::given_plan::GivenPlanTyping;
use crate::grounded::run_grounded_loop;
use crate::h2;
use crate::invariants::{compute_sas_groups, ground_invariant_analysis, SasGroups};
use crate::lifted::run_lifted_grounding;
use crate::model::*;
use crate::output;
use crate::postprocessing::postprocess_grounding;
use anyhow::Result;
use std::collections::{BTreeSet, HashSet};
use std::io::Write;
use thiserror::Error;
use tracing::{debug, info};

/// Raised by any component that proves the instance unsolvable; the process
/// reports the diagnostic and exits cleanly with status 0.
#[derive(Debug, Error)]
#[error("goal is unreachable: {0}")]
pub struct GoalUnreachable(pub String);

/// How delete effects on SAS+-covered facts are written out.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum SasDeleteMode {
    /// Keep exactly the deletes present in the input.
    #[default]
    AsInput,
    /// Delete every other value of the touched SAS+ variable.
    All,
    /// Drop all deletes of SAS+-covered facts.
    None,
}

/// Which writer produces the final output.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// The grounded-planner text format.
    #[default]
    Planner,
    /// Grounded HDDL (domain + problem).
    Hddl,
    /// Fast Downward SAS, without the hierarchy.
    SasPlus,
    /// Run the analyses but write nothing.
    None,
}

/// All recognized options of the grounding procedure.
#[derive(Clone, Debug)]
pub struct GroundingConfig {
    // runtime optimisations
    pub enable_hierarchy_typing: bool,
    pub with_static_precondition_checking: bool,
    pub future_caching_by_precondition: bool,
    // inference
    pub compute_invariants: bool,
    pub h2_mutexes: bool,
    // transformations
    pub remove_useless_predicates: bool,
    pub expand_choiceless_abstract_tasks: bool,
    pub prune_empty_method_preconditions: bool,
    pub keep_two_regularisation: bool,
    pub at_most_two_tasks_per_method: bool,
    pub compact_consecutive_primitives: bool,
    pub remove_duplicate_actions: bool,
    pub noop_for_empty_methods: bool,
    pub compile_negative_sas_variables: bool,
    // output formatting
    pub output_sas_variables_only: bool,
    pub sas_mode: SasDeleteMode,
    pub output: OutputFormat,
    // diagnostics
    pub quiet: bool,
    pub print_timings: bool,
}

impl Default for GroundingConfig {
    fn default() -> Self {
        GroundingConfig {
            enable_hierarchy_typing: true,
            with_static_precondition_checking: false,
            future_caching_by_precondition: false,
            compute_invariants: false,
            h2_mutexes: false,
            remove_useless_predicates: true,
            expand_choiceless_abstract_tasks: true,
            prune_empty_method_preconditions: true,
            keep_two_regularisation: false,
            at_most_two_tasks_per_method: false,
            compact_consecutive_primitives: false,
            remove_duplicate_actions: false,
            noop_for_empty_methods: false,
            compile_negative_sas_variables: false,
            output_sas_variables_only: false,
            sas_mode: SasDeleteMode::AsInput,
            output: OutputFormat::Planner,
            quiet: false,
            print_timings: false,
        }
    }
}

/// Outcome of a run: either a fully written grounding, or the detection that
/// the goal cannot be reached (reported, and the process exits cleanly).
#[derive(Debug, PartialEq, Eq)]
pub enum GroundingOutcome {
    Written,
    GoalUnreachable(String),
}

fn live_init_facts(problem: &Problem, model: &GroundModel) -> HashSet<FactId> {
    problem
        .init
        .iter()
        .filter_map(|f| model.fact_id(f))
        .filter(|&f| !model.pruned_facts[f])
        .collect()
}

fn check_model_integrity(model: &GroundModel) {
    if !cfg!(debug_assertions) {
        return;
    }
    for method_id in model.method_ids() {
        if model.pruned_methods[method_id] {
            continue;
        }
        let decomposes = model.methods[method_id].decomposes;
        debug_assert!(!model.pruned_tasks[decomposes]);
        debug_assert!(
            model.tasks[decomposes].methods.contains(&method_id),
            "method not registered with its decomposed task"
        );
    }
    for task_id in model.task_ids() {
        if model.pruned_tasks[task_id] {
            continue;
        }
        for &method_id in &model.tasks[task_id].methods {
            if !model.pruned_methods[method_id] {
                debug_assert!(model.methods[method_id].decomposes == task_id);
            }
        }
    }
}

fn run_grounding_inner(
    domain: &mut Domain,
    problem: &mut Problem,
    config: &GroundingConfig,
    given: Option<GivenPlanTyping>,
    dout: &mut dyn Write,
    pout: &mut dyn Write,
) -> Result<()> {
    let fam_groups = if config.compute_invariants {
        fam::compute_fam_groups(domain, problem, config)?
    } else {
        Vec::new()
    };

    expand_conditional_effects(domain, problem);
    debug!("conditional effects expanded");

    let mut model = run_lifted_grounding(domain, problem, config, given);

    // do this early: the priorities influence every later analysis
    crate::postprocessing::apply_effect_priority(domain, &mut model)?;

    run_grounded_loop(domain, problem, &mut model, config, false);

    // ---- h² mutexes ----
    let mut h2_mutexes: Vec<BTreeSet<FactId>> = Vec::new();
    let mut h2_invariants: Vec<Vec<h2::InvariantLiteral>> = Vec::new();
    if config.h2_mutexes {
        // h² needs the richest encoding available, but must not run the
        // structural rewritings; force a SAS-only cover on a throwaway
        // configuration
        let temp_config = GroundingConfig {
            expand_choiceless_abstract_tasks: false,
            prune_empty_method_preconditions: false,
            at_most_two_tasks_per_method: false,
            compact_consecutive_primitives: false,
            output_sas_variables_only: true,
            ..config.clone()
        };
        postprocess_grounding(domain, problem, &mut model, &temp_config)?;

        let init_facts = live_init_facts(problem, &model);
        let groups = compute_sas_groups(domain, problem, &fam_groups, &[], &model, &init_facts, &temp_config);
        let analysis = ground_invariant_analysis(domain, &mut model, &init_facts, &groups);

        let result = h2::compute_h2_mutexes(domain, problem, &mut model, &groups, &analysis.sas_needs_none_of_them);
        if !result.goal_reachable {
            return Err(GoalUnreachable("h2 analysis proved the goal unreachable".to_string()).into());
        }
        h2_mutexes = result.mutexes;
        h2_invariants = result.invariants;

        if result.changed_pruning || analysis.changed_pruning {
            run_grounded_loop(domain, problem, &mut model, config, false);
        }
    }

    let reachability_necessary = postprocess_grounding(domain, problem, &mut model, config)?;
    check_model_integrity(&model);

    match config.output {
        OutputFormat::None => Ok(()),
        OutputFormat::SasPlus => output::sas::write_sas_plus(dout, domain, problem, &model),
        OutputFormat::Hddl => output::hddl::write_grounded_hddl(dout, pout, domain, problem, &model),
        OutputFormat::Planner => {
            // the SAS+ cover, the invariant analysis and grounded
            // reachability feed each other; iterate until nothing is pruned
            let mut first = reachability_necessary;
            let (groups, analysis) = loop {
                let init_facts = live_init_facts(problem, &model);
                let groups: SasGroups =
                    compute_sas_groups(domain, problem, &fam_groups, &h2_mutexes, &model, &init_facts, config);
                let analysis = ground_invariant_analysis(domain, &mut model, &init_facts, &groups);

                if analysis.changed_pruning || first {
                    run_grounded_loop(domain, problem, &mut model, config, first);
                    first = false;
                } else {
                    break (groups, analysis);
                }
            };

            if config.remove_duplicate_actions {
                unify_duplicates(domain, &mut model);
            }

            let mut strict_mutexes: Vec<BTreeSet<FactId>> = Vec::new();
            let mut non_strict_mutexes: Vec<BTreeSet<FactId>> = Vec::new();
            for (group, needs_none) in groups
                .further_mutex_groups
                .iter()
                .zip(&analysis.mutex_needs_none_of_them)
            {
                if *needs_none {
                    non_strict_mutexes.push(group.clone());
                } else {
                    strict_mutexes.push(group.clone());
                }
            }
            if !config.quiet {
                info!(
                    strict = strict_mutexes.len(),
                    non_strict = non_strict_mutexes.len(),
                    "further mutex groups"
                );
            }

            let writer_input = output::planner::PlannerOutput {
                domain,
                problem,
                sas_groups: &groups.sas_groups,
                strict_mutexes: &strict_mutexes,
                non_strict_mutexes: &non_strict_mutexes,
                invariants: &h2_invariants,
                sas_needs_none_of_them: &analysis.sas_needs_none_of_them,
                config,
            };
            output::planner::write_grounded_htn(dout, &writer_input, &model)
        }
    }
}

/// Runs the complete grounding procedure and writes the result. An
/// unsolvable instance is reported as an outcome, not an error.
pub fn run_grounding(
    domain: &mut Domain,
    problem: &mut Problem,
    config: &GroundingConfig,
    given: Option<GivenPlanTyping>,
    dout: &mut dyn Write,
    pout: &mut dyn Write,
) -> Result<GroundingOutcome> {
    match run_grounding_inner(domain, problem, config, given, dout, pout) {
        Ok(()) => Ok(GroundingOutcome::Written),
        Err(err) => match err.downcast_ref::<GoalUnreachable>() {
            Some(unreachable) => Ok(GroundingOutcome::GoalUnreachable(unreachable.0.clone())),
            None => Err(err),
        },
    }
}
