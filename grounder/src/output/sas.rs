//! Writer for the Fast Downward SAS format (version 3): one two-valued
//! variable per surviving fact, operators with prevail and pre-post lists.
//! For hierarchical instances a fake-goal variable is added that every
//! operator achieves, so the classical relaxation stays solvable exactly
//! when some action is applicable.

use crate::model::*;
use anyhow::Result;
use grounder_collections::ref_store::RefMap;
use std::collections::{BTreeSet, HashSet};
use std::io::Write;

pub fn write_sas_plus(w: &mut dyn Write, domain: &Domain, problem: &Problem, model: &GroundModel) -> Result<()> {
    writeln!(w, "begin_version")?;
    writeln!(w, "3")?;
    writeln!(w, "end_version")?;
    writeln!(w, "begin_metric")?;
    writeln!(w, "1")?;
    writeln!(w, "end_metric")?;

    let hierarchical = problem.initial_abstract_task.is_some();

    let mut variable_of_fact: RefMap<FactId, usize> = RefMap::default();
    let mut fact_of_variable: Vec<FactId> = Vec::new();
    for fact in model.fact_ids() {
        if model.pruned_facts[fact] {
            continue;
        }
        variable_of_fact.insert(fact, fact_of_variable.len());
        fact_of_variable.push(fact);
    }
    let n_variables = fact_of_variable.len();

    writeln!(w, "{}", n_variables + usize::from(hierarchical))?;
    for (variable, &fact) in fact_of_variable.iter().enumerate() {
        writeln!(w, "begin_variable")?;
        writeln!(w, "var{variable}")?;
        writeln!(w, "-1")?;
        writeln!(w, "2")?;
        let name = model.fact_name(domain, fact);
        writeln!(w, "Atom {name}")?;
        writeln!(w, "NotAtom {name}")?;
        writeln!(w, "end_variable")?;
    }
    if hierarchical {
        writeln!(w, "begin_variable")?;
        writeln!(w, "fakeGoal")?;
        writeln!(w, "-1")?;
        writeln!(w, "2")?;
        writeln!(w, "GOAL")?;
        writeln!(w, "NOT GOAL")?;
        writeln!(w, "end_variable")?;
    }

    writeln!(w, "0")?; // no mutex section in the two-valued encoding

    let init_facts: HashSet<FactId> = problem.init.iter().filter_map(|f| model.fact_id(f)).collect();
    writeln!(w, "begin_state")?;
    for &fact in &fact_of_variable {
        writeln!(w, "{}", if init_facts.contains(&fact) { 0 } else { 1 })?;
    }
    if hierarchical {
        writeln!(w, "1")?;
    }
    writeln!(w, "end_state")?;

    let mut goal_pairs: Vec<(usize, usize)> = Vec::new();
    for fact in &problem.goal {
        // unsolvability is detected elsewhere; unreachable goals are skipped
        let Some(id) = model.fact_id(fact) else { continue };
        let Some(&variable) = variable_of_fact.get(id) else {
            continue;
        };
        goal_pairs.push((variable, 0));
    }
    if hierarchical {
        goal_pairs.push((n_variables, 0));
    }
    writeln!(w, "begin_goal")?;
    writeln!(w, "{}", goal_pairs.len())?;
    for (variable, value) in goal_pairs {
        writeln!(w, "{variable} {value}")?;
    }
    writeln!(w, "end_goal")?;

    let operators: Vec<GroundTaskId> = model.live_primitives(domain).collect();
    writeln!(w, "{}", operators.len())?;
    for task_id in operators {
        let task = &model.tasks[task_id];
        writeln!(w, "begin_operator")?;
        writeln!(w, "{}", model.task_name(domain, task_id))?;

        let live_vars = |facts: &[FactId]| -> BTreeSet<usize> {
            facts
                .iter()
                .filter_map(|&f| variable_of_fact.get(f).copied())
                .collect()
        };
        let pre = live_vars(&task.preconditions);
        let add = live_vars(&task.add_effects);
        let del = live_vars(&task.del_effects);

        let prevail: Vec<usize> = pre.iter().filter(|v| !del.contains(v)).copied().collect();
        writeln!(w, "{}", prevail.len())?;
        for variable in prevail {
            writeln!(w, "{variable} 0")?;
        }

        writeln!(w, "{}", add.len() + del.len() + usize::from(hierarchical))?;
        for &variable in &add {
            writeln!(w, "0 {variable} -1 0")?;
        }
        for &variable in &del {
            let required = if pre.contains(&variable) { 0 } else { -1 };
            writeln!(w, "0 {variable} {required} 1")?;
        }
        if hierarchical {
            writeln!(w, "0 {n_variables} -1 0")?;
        }

        writeln!(w, "{}", ground_cost(domain, problem, task))?;
        writeln!(w, "end_operator")?;
    }
    writeln!(w, "0")?; // no axioms
    Ok(())
}
