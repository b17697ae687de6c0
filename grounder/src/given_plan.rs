//! Typing information extracted from an already known plan.
//!
//! When a ground plan for the instance is available (e.g. for plan
//! verification), the hierarchy typing of every primitive that occurs in it
//! can be restricted to exactly the argument tuples the plan uses. Technical
//! actions (names starting with `__`) are exempt since the plan does not
//! mention them.

use crate::model::{ConstId, Domain, TaskId};
use anyhow::{bail, Result};
use std::collections::{HashMap, HashSet};

#[derive(Clone, Debug, Default)]
pub struct GivenPlanTyping {
    /// Allowed argument tuples per primitive task.
    pub allowed: HashMap<TaskId, HashSet<Vec<ConstId>>>,
    /// Tasks exempt from the restriction.
    pub artificial_tasks: HashSet<TaskId>,
}

impl GivenPlanTyping {
    /// `true` iff the partial `assignment` (indexed by variable, `None` for
    /// unassigned) is consistent with some plan step of `task`.
    pub fn compatible(&self, task: TaskId, assignment: &[Option<ConstId>]) -> bool {
        if self.artificial_tasks.contains(&task) {
            return true;
        }
        let Some(tuples) = self.allowed.get(&task) else {
            // task never occurs in the plan
            return false;
        };
        tuples.iter().any(|tuple| {
            assignment
                .iter()
                .zip(tuple)
                .all(|(slot, &value)| slot.map(|v| v == value).unwrap_or(true))
        })
    }
}

fn canonical(name: &str) -> String {
    name.chars()
        .map(|c| if c == '-' { '_' } else { c.to_ascii_lowercase() })
        .collect()
}

/// Parses a plan file: one `(name[arg,...])` step per line (several steps on
/// one line are accepted); `;`-prefixed lines are comments. Name lookup
/// falls back to a case-insensitive comparison, as some planners lower-case
/// their output.
pub fn parse_plan(domain: &Domain, text: &str) -> Result<GivenPlanTyping> {
    let mut typing = GivenPlanTyping::default();

    let mut task_names: HashMap<&str, TaskId> = HashMap::new();
    for id in domain.primitive_ids() {
        task_names.insert(domain.tasks[usize::from(id)].name.as_str(), id);
        if domain.tasks[usize::from(id)].name.starts_with("__") {
            typing.artificial_tasks.insert(id);
        }
    }
    let mut object_names: HashMap<&str, ConstId> = HashMap::new();
    for (id, name) in domain.constants.entries() {
        object_names.insert(name.as_str(), id);
    }
    // built on demand when a mixed-case lookup fails
    let mut canonical_tasks: Option<HashMap<String, TaskId>> = None;
    let mut canonical_objects: Option<HashMap<String, ConstId>> = None;

    let steps = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with(';'))
        .flat_map(|line| line.split_inclusive(")(").map(|part| part.trim_end_matches('(')));

    for step in steps {
        let step = step.trim_start_matches('(').trim_end_matches(')');
        let (task_name, rest) = match step.split_once('[') {
            Some((name, rest)) => (name, rest.trim_end_matches(']')),
            None => (step, ""),
        };

        let task = match task_names.get(task_name) {
            Some(&t) => t,
            None => {
                let map = canonical_tasks.get_or_insert_with(|| {
                    domain
                        .primitive_ids()
                        .map(|id| (canonical(&domain.tasks[usize::from(id)].name), id))
                        .collect()
                });
                match map.get(&canonical(task_name)) {
                    Some(&t) => t,
                    None => bail!("plan mentions unknown action \"{task_name}\""),
                }
            }
        };

        let mut args = Vec::new();
        for arg in rest.split(',').filter(|a| !a.is_empty()) {
            let value = match object_names.get(arg) {
                Some(&c) => c,
                None => {
                    let map = canonical_objects.get_or_insert_with(|| {
                        domain
                            .constants
                            .entries()
                            .map(|(id, name)| (canonical(name), id))
                            .collect()
                    });
                    match map.get(&canonical(arg)) {
                        Some(&c) => c,
                        None => bail!("plan mentions unknown object \"{arg}\""),
                    }
                }
            };
            args.push(value);
        }

        typing.allowed.entry(task).or_default().insert(args);
    }

    Ok(typing)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input;

    #[test]
    fn restricts_to_plan_tuples() {
        let (domain, _) = input::parse(input::tests::CLASSICAL).unwrap();
        let typing = parse_plan(&domain, "(move[a])\n; comment\n").unwrap();
        let task = TaskId::from_u32(0);
        assert!(typing.compatible(task, &[Some(ConstId::from_u32(0))]));
        assert!(!typing.compatible(task, &[Some(ConstId::from_u32(1))]));
        assert!(typing.compatible(task, &[None]));
    }

    #[test]
    fn unknown_action_is_an_error() {
        let (domain, _) = input::parse(input::tests::CLASSICAL).unwrap();
        assert!(parse_plan(&domain, "(teleport[a])").is_err());
    }
}
