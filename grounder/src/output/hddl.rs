//! Writer for grounded HDDL: a parameterless domain/problem pair in which
//! every ground fact is a nullary predicate and every ground task a nullary
//! task. Compiled conditional effects are folded back into `(when ...)`
//! clauses.

use super::{initial_state_facts, resolve_goal_facts, to_hddl_name};
use crate::model::*;
use crate::postprocessing::conditional_effect_actions;
use anyhow::Result;
use itertools::Itertools;
use std::collections::BTreeSet;
use std::io::Write;

fn hddl_fact_name(domain: &Domain, model: &GroundModel, fact: FactId) -> String {
    let f = &model.facts[fact];
    let mut name = to_hddl_name(&domain.predicates[f.predicate].name);
    for &arg in &f.args {
        name.push('_');
        name.push_str(&to_hddl_name(&domain.constants[arg]));
    }
    name
}

fn hddl_task_name(domain: &Domain, model: &GroundModel, task: GroundTaskId) -> String {
    let t = &model.tasks[task];
    let lifted = &domain.tasks[usize::from(t.task)];
    let mut name = to_hddl_name(&lifted.name);
    for &arg in t.args.iter().take(lifted.original_variable_count) {
        name.push('_');
        name.push_str(&to_hddl_name(&domain.constants[arg]));
    }
    name
}

pub fn write_grounded_hddl(
    dout: &mut dyn Write,
    pout: &mut dyn Write,
    domain: &Domain,
    problem: &Problem,
    model: &GroundModel,
) -> Result<()> {
    let ce_actions = conditional_effect_actions(domain, model)?;

    let live_fact = |fact: FactId| {
        !model.pruned_facts[fact] && !domain.predicates[model.facts[fact].predicate].guard_for_conditional_effect
    };

    let domain_has_costs = model
        .live_primitives(domain)
        .filter(|&t| !domain.tasks[usize::from(model.tasks[t].task)].compiled_conditional_effect)
        .any(|t| ground_cost(domain, problem, &model.tasks[t]) != 1);

    writeln!(dout, "(define (domain d)")?;
    writeln!(dout, "  (:requirements :typing)")?;
    writeln!(dout)?;

    writeln!(dout, "  (:predicates")?;
    let mut some_predicate = false;
    for fact in model.fact_ids() {
        if live_fact(fact) {
            writeln!(dout, "    ({})", hddl_fact_name(domain, model, fact))?;
            some_predicate = true;
        }
    }
    if !some_predicate {
        writeln!(dout, "    (DUMMY)")?;
    }
    writeln!(dout, "  )")?;
    writeln!(dout)?;

    if domain_has_costs {
        writeln!(dout, "  (:functions")?;
        writeln!(dout, "    (total-cost) - number")?;
        writeln!(dout, "  )")?;
        writeln!(dout)?;
    }

    for task in model.task_ids() {
        if model.pruned_tasks[task] || domain.is_primitive(model.tasks[task].task) {
            continue;
        }
        writeln!(dout, "  (:task {} :parameters ())", hddl_task_name(domain, model, task))?;
    }
    writeln!(dout)?;

    for method_id in model.method_ids() {
        if model.pruned_methods[method_id] {
            continue;
        }
        let method = &model.methods[method_id];
        writeln!(dout, "  (:method {}", to_hddl_name(&domain.methods[usize::from(method.method)].name))?;
        writeln!(dout, "   :parameters ()")?;
        writeln!(dout, "    :task ({})", hddl_task_name(domain, model, method.decomposes))?;

        let mut output_index_of_subtask = std::collections::HashMap::new();
        if !method.subtask_ordering.is_empty() {
            writeln!(dout, "    :subtasks (and")?;
            for (output_index, &subtask_index) in method.subtask_ordering.iter().enumerate() {
                output_index_of_subtask.insert(subtask_index, output_index);
                let subtask = method.subtasks[subtask_index];
                writeln!(dout, "      (t{output_index} ({}))", hddl_task_name(domain, model, subtask))?;
            }
            writeln!(dout, "    )")?;
        }

        let orderings: BTreeSet<(usize, usize)> = domain.methods[usize::from(method.method)]
            .orderings
            .iter()
            .map(|&(a, b)| (output_index_of_subtask[&a], output_index_of_subtask[&b]))
            .collect();
        if !orderings.is_empty() {
            writeln!(dout, "    :ordering (and")?;
            for (a, b) in orderings {
                writeln!(dout, "      (t{a} < t{b})")?;
            }
            writeln!(dout, "    )")?;
        }
        writeln!(dout, "  )")?;
        writeln!(dout)?;
    }

    for task_id in model.live_primitives(domain) {
        if domain.tasks[usize::from(model.tasks[task_id].task)].compiled_conditional_effect {
            continue;
        }
        writeln!(dout, "  (:action {}", hddl_task_name(domain, model, task_id))?;
        writeln!(dout, "   :parameters ()")?;

        let task = &model.tasks[task_id];
        let preconditions: Vec<String> = task
            .preconditions
            .iter()
            .filter(|&&p| !model.pruned_facts[p])
            .map(|&p| hddl_fact_name(domain, model, p))
            .collect();

        let mut adds: Vec<String> = Vec::new();
        let mut dels: Vec<String> = Vec::new();
        let mut conditional: Vec<(bool, Vec<String>, String)> = Vec::new();

        for &add in &task.add_effects {
            if domain.predicates[model.facts[add].predicate].guard_for_conditional_effect {
                let Some(&ce_task) = ce_actions.get(&add) else { continue };
                let ce = &model.tasks[ce_task];
                let (effect, is_add) = match (ce.add_effects.first(), ce.del_effects.first()) {
                    (Some(&e), _) => (e, true),
                    (None, Some(&e)) => (e, false),
                    (None, None) => continue,
                };
                if model.pruned_facts[effect] {
                    continue;
                }
                let condition: Vec<String> = ce
                    .preconditions
                    .iter()
                    .filter(|&&p| {
                        !domain.predicates[model.facts[p].predicate].guard_for_conditional_effect
                            && !model.pruned_facts[p]
                    })
                    .map(|&p| hddl_fact_name(domain, model, p))
                    .collect();
                let effect_name = hddl_fact_name(domain, model, effect);
                if condition.is_empty() {
                    if is_add {
                        adds.push(effect_name);
                    } else {
                        dels.push(effect_name);
                    }
                } else {
                    conditional.push((is_add, condition, effect_name));
                }
            } else if !model.pruned_facts[add] {
                adds.push(hddl_fact_name(domain, model, add));
            }
        }
        for &del in &task.del_effects {
            if !model.pruned_facts[del] {
                dels.push(hddl_fact_name(domain, model, del));
            }
        }

        if !preconditions.is_empty() {
            writeln!(dout, "    :precondition (and")?;
            for p in &preconditions {
                writeln!(dout, "      ({p})")?;
            }
            writeln!(dout, "    )")?;
        }

        let cost = ground_cost(domain, problem, task);
        if !adds.is_empty() || !dels.is_empty() || !conditional.is_empty() || (domain_has_costs && cost != 0) {
            writeln!(dout, "    :effect (and")?;
            if domain_has_costs && cost != 0 {
                writeln!(dout, "      (increase (total-cost) {cost})")?;
            }
            for a in &adds {
                writeln!(dout, "      ({a})")?;
            }
            for (_, condition, effect) in conditional.iter().filter(|(is_add, _, _)| *is_add) {
                writeln!(dout, "      (when (and{}) ({effect}))", condition.iter().map(|c| format!(" ({c})")).join(""))?;
            }
            for d in &dels {
                writeln!(dout, "      (not ({d}))")?;
            }
            for (_, condition, effect) in conditional.iter().filter(|(is_add, _, _)| !*is_add) {
                writeln!(
                    dout,
                    "      (when (and{}) (not ({effect})))",
                    condition.iter().map(|c| format!(" ({c})")).join("")
                )?;
            }
            writeln!(dout, "    )")?;
        }
        writeln!(dout, "  )")?;
        writeln!(dout)?;
    }
    writeln!(dout, ")")?;

    // problem file
    writeln!(pout, "(define")?;
    writeln!(pout, "  (problem p)")?;
    writeln!(pout, "  (:domain d)")?;
    writeln!(pout, "  (:htn")?;
    writeln!(pout, "    :parameters ()")?;
    writeln!(pout, "    :subtasks (and ({}))", to_hddl_name("__top"))?;
    writeln!(pout, "  )")?;

    let (init_facts, init_facts_pruned) = initial_state_facts(problem, model);
    writeln!(pout, "  (:init")?;
    for &fact in init_facts.iter().sorted() {
        writeln!(pout, "    ({})", hddl_fact_name(domain, model, fact))?;
    }
    writeln!(pout, "  )")?;

    let goal = resolve_goal_facts(domain, problem, model, &init_facts_pruned)?;
    if !goal.is_empty() {
        writeln!(pout, "  (:goal (and")?;
        for &fact in &goal {
            writeln!(pout, "    ({})", hddl_fact_name(domain, model, fact))?;
        }
        writeln!(pout, "  ))")?;
    }
    writeln!(pout, ")")?;
    Ok(())
}
