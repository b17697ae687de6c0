//! Unification of duplicate synthetic actions.
//!
//! Only synthetic primitives are eligible: pure artificial actions (names
//! starting with `_`) are fused when their unpruned preconditions and
//! effects coincide; compaction results (names starting with `%`) must in
//! addition agree on name and argument list. Occurrences in methods are
//! redirected to the surviving representative.

use crate::model::*;
use std::collections::HashMap;
use tracing::debug;

type EffectSignature = (Vec<FactId>, Vec<FactId>, Vec<FactId>);

fn signature(model: &GroundModel, task: GroundTaskId) -> EffectSignature {
    let live = |facts: &[FactId]| {
        let mut facts: Vec<FactId> = facts
            .iter()
            .filter(|&&f| !model.pruned_facts[f])
            .copied()
            .collect();
        facts.sort_unstable();
        facts
    };
    let t = &model.tasks[task];
    (live(&t.preconditions), live(&t.add_effects), live(&t.del_effects))
}

/// Fuses duplicate synthetic actions and redirects method subtasks to the
/// representatives. Running the pass twice is a no-op.
pub fn unify_duplicates(domain: &Domain, model: &mut GroundModel) {
    let mut artificial: HashMap<EffectSignature, Vec<GroundTaskId>> = HashMap::new();
    let mut concatenated: HashMap<(EffectSignature, String, Vec<ConstId>), Vec<GroundTaskId>> = HashMap::new();

    for task_id in model.task_ids() {
        if model.pruned_tasks[task_id] || !domain.is_primitive(model.tasks[task_id].task) {
            continue;
        }
        let name = &domain.tasks[usize::from(model.tasks[task_id].task)].name;
        if name.starts_with('_') {
            artificial.entry(signature(model, task_id)).or_default().push(task_id);
        } else if name.starts_with('%') {
            concatenated
                .entry((signature(model, task_id), name.clone(), model.tasks[task_id].args.clone()))
                .or_default()
                .push(task_id);
        }
    }

    let mut replacement: HashMap<GroundTaskId, GroundTaskId> = HashMap::new();
    for mut duplicates in artificial.into_values().chain(concatenated.into_values()) {
        if duplicates.len() < 2 {
            continue;
        }
        duplicates.sort_unstable();
        let representative = duplicates[0];
        for &other in &duplicates[1..] {
            replacement.insert(other, representative);
            model.pruned_tasks[usize::from(other)] = true;
        }
    }
    if replacement.is_empty() {
        return;
    }
    debug!(duplicates = replacement.len(), "duplicate actions unified");

    for method_id in model.method_ids() {
        if model.pruned_methods[method_id] {
            continue;
        }
        for subtask in &mut model.methods[usize::from(method_id)].subtasks {
            if let Some(&representative) = replacement.get(subtask) {
                *subtask = representative;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model_with_twins() -> (Domain, GroundModel) {
        let mut domain = Domain::default();
        domain.n_primitive = 2;
        domain.tasks.push(Task {
            name: "_aux".to_string(),
            ..Task::default()
        });
        domain.tasks.push(Task {
            name: "_aux2".to_string(),
            ..Task::default()
        });
        domain.tasks.push(Task {
            name: "top".to_string(),
            ..Task::default()
        });

        let ground = |task: u32| GroundTask {
            task: TaskId::from_u32(task),
            args: vec![],
            preconditions: vec![FactId::from_u32(0)],
            add_effects: vec![FactId::from_u32(1)],
            del_effects: vec![],
            none_of_those_effects: vec![],
            methods: vec![],
        };
        let model = GroundModel {
            facts: Default::default(),
            tasks: vec![ground(0), ground(1), ground(2)],
            methods: vec![GroundMethod {
                method: MethodId::from_u32(0),
                args: vec![],
                decomposes: GroundTaskId::from_u32(2),
                subtasks: vec![GroundTaskId::from_u32(1)],
                subtask_ordering: vec![0],
            }],
            pruned_facts: vec![false, false],
            pruned_tasks: vec![false, false, false],
            pruned_methods: vec![false],
        };
        (domain, model)
    }

    #[test]
    fn artificial_twins_are_fused() {
        let (mut domain, mut model) = model_with_twins();
        domain.methods.push(Method {
            name: "m".to_string(),
            task: TaskId::from_u32(2),
            variable_sorts: vec![],
            task_parameters: vec![],
            subtasks: vec![],
            orderings: vec![],
            constraints: vec![],
        });

        unify_duplicates(&domain, &mut model);
        // the second twin is pruned and the method now uses the first
        assert!(!model.pruned_tasks[0]);
        assert!(model.pruned_tasks[1]);
        assert_eq!(model.methods[0].subtasks, vec![GroundTaskId::from_u32(0)]);
    }

    #[test]
    fn unification_is_idempotent() {
        let (domain, mut model) = model_with_twins();
        unify_duplicates(&domain, &mut model);
        let snapshot = (model.pruned_tasks.clone(), model.methods[0].subtasks.clone());
        unify_duplicates(&domain, &mut model);
        assert_eq!(snapshot.0, model.pruned_tasks);
        assert_eq!(snapshot.1, model.methods[0].subtasks);
    }
}
