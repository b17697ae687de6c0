//! Writers for the final grounded representation.

pub mod hddl;
pub mod planner;
pub mod sas;

use crate::grounding::GoalUnreachable;
use crate::model::*;
use anyhow::Result;
use itertools::Itertools;
use std::collections::HashSet;

/// Classifies the initial state against the pruning state: facts that
/// survive, and facts that were pruned but are initially true (and thus
/// trivially satisfied).
pub fn initial_state_facts(problem: &Problem, model: &GroundModel) -> (HashSet<FactId>, HashSet<FactId>) {
    let mut live = HashSet::new();
    let mut pruned = HashSet::new();
    for fact in &problem.init {
        if let Some(id) = model.fact_id(fact) {
            if model.pruned_facts[id] {
                pruned.insert(id);
            } else {
                live.insert(id);
            }
        }
    }
    (live, pruned)
}

/// Resolves the goal facts that must appear in the output. A goal fact that
/// was pruned but holds initially is dropped; one that was pruned (or never
/// produced) and does not hold initially makes the instance unsolvable.
pub fn resolve_goal_facts(
    domain: &Domain,
    problem: &Problem,
    model: &GroundModel,
    init_facts_pruned: &HashSet<FactId>,
) -> Result<Vec<FactId>> {
    let mut goal = Vec::new();
    for fact in &problem.goal {
        let name = || {
            format!(
                "{}[{}]",
                domain.predicates[fact.predicate].name,
                fact.args.iter().map(|&c| domain.constants[c].as_str()).join(",")
            )
        };
        match model.fact_id(fact) {
            None => {
                return Err(GoalUnreachable(format!("goal fact {} was never produced", name())).into());
            }
            Some(id) if model.pruned_facts[id] => {
                if !init_facts_pruned.contains(&id) {
                    return Err(GoalUnreachable(format!(
                        "goal fact {} was pruned and does not hold initially",
                        name()
                    ))
                    .into());
                }
                // pruned but initially true: trivially satisfied
            }
            Some(id) => goal.push(id),
        }
    }
    Ok(goal)
}

/// Sanitizes a name for HDDL output.
pub fn to_hddl_name(name: &str) -> String {
    let mut result = String::new();
    for (i, c) in name.chars().enumerate() {
        if c == '_' && i == 0 {
            result.push_str("US");
        }
        match c {
            '<' => result.push_str("LA_"),
            '>' => result.push_str("RA_"),
            '[' => result.push_str("LB_"),
            ']' => result.push_str("RB_"),
            '|' => result.push_str("BAR_"),
            ';' => result.push_str("SEM_"),
            ',' => result.push_str("COM_"),
            '+' => result.push_str("PLUS_"),
            '-' => result.push_str("MINUS_"),
            other => result.push(other),
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hddl_names_are_sanitized() {
        assert_eq!(to_hddl_name("<a;b>"), "LA_aSEM_bRA_");
        assert_eq!(to_hddl_name("_x"), "US_x");
        assert_eq!(to_hddl_name("at[t1,l2]"), "atLB_t1COM_l2RB_");
        assert_eq!(to_hddl_name("a+b-c"), "aPLUS_bMINUS_c");
    }
}
