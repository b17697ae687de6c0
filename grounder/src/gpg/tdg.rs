//! Task-decomposition-graph instantiation of the generic fixpoint:
//! decomposition methods are the operators, ground tasks the state elements.
//! Matching a subtask means finding an already-reachable ground task of the
//! right lifted task whose arguments fit the method's variable sorts.

use super::planning_graph::PgOutput;
use super::*;
use crate::grounding::GroundingConfig;
use crate::hierarchy_typing::HierarchyTyping;
use crate::model::*;
use grounder_collections::ref_store::{RefPool, RefVec};
use tracing::info;

/// Ground tasks (primitive and abstract) and ground methods produced by the
/// decomposition-graph fixpoint. Ground task ids are fresh; primitive
/// entries carry the fact lists recovered from the planning graph.
pub struct TdgOutput {
    pub tasks: Vec<GroundTask>,
    pub methods: Vec<GroundMethod>,
}

/// Reorders every method's subtasks by decreasing arity, so that the most
/// constraining subtasks are matched first, and remaps the ordering
/// constraints accordingly.
pub fn reorder_subtasks_by_arity(domain: &mut Domain) {
    for method in &mut domain.methods {
        let mut by_arity: Vec<(usize, usize)> = method
            .subtasks
            .iter()
            .enumerate()
            .map(|(idx, subtask)| (domain.tasks[usize::from(subtask.task)].variable_sorts.len(), idx))
            .collect();
        by_arity.sort_by(|a, b| b.cmp(a));

        let mut old_to_new = vec![0; method.subtasks.len()];
        let reordered: Vec<Subtask> = by_arity
            .iter()
            .enumerate()
            .map(|(new_idx, &(_, old_idx))| {
                old_to_new[old_idx] = new_idx;
                method.subtasks[old_idx].clone()
            })
            .collect();
        method.subtasks = reordered;
        for ordering in &mut method.orderings {
            *ordering = (old_to_new[ordering.0], old_to_new[ordering.1]);
        }
    }
}

/// Runs the decomposition-graph fixpoint on top of the planning graph's
/// ground primitives.
pub fn run_tdg(
    domain: &Domain,
    problem: &Problem,
    ht: Option<&HierarchyTyping>,
    pg: &PgOutput,
    config: &GroundingConfig,
) -> TdgOutput {
    let operators = domain
        .methods
        .iter()
        .map(|method| GpgOperator {
            name: method.name.clone(),
            variable_sorts: method.variable_sorts.clone(),
            antecedents: method
                .subtasks
                .iter()
                .map(|subtask| GpgAtom {
                    head: usize::from(subtask.task),
                    args: subtask.args.clone(),
                })
                .collect(),
            add_effects: vec![GpgAtom {
                head: usize::from(method.task),
                args: method.task_parameters.iter().copied().collect(),
            }],
            constraints: method.constraints.clone(),
        })
        .collect();

    // the PG's ground primitives are the initial "state", ordered by task
    let mut initial: Vec<(usize, &GroundTask)> = pg.tasks.iter().enumerate().map(|(i, t)| (i, t)).collect();
    initial.sort_by_key(|(_, t)| t.task);

    // intern the seed atoms so the fact lists of primitives can be recovered
    // after the run; the parallel vector maps each seed back to its PG task
    let mut seed_atoms: RefPool<GroundTaskId, GroundAtom> = RefPool::default();
    let mut pg_task_of_seed: RefVec<GroundTaskId, usize> = RefVec::new();
    let mut initial_state: Vec<GroundAtom> = Vec::with_capacity(initial.len());
    for (pg_idx, task) in &initial {
        let atom = GroundAtom {
            head: usize::from(task.task),
            args: task.args.iter().copied().collect(),
        };
        let (_, fresh) = seed_atoms.intern(atom.clone());
        if fresh {
            pg_task_of_seed.push(*pg_idx);
        }
        initial_state.push(atom);
    }

    let instance = GpgInstance {
        operators,
        n_heads: domain.tasks.len(),
        sorts: &domain.sorts,
        initial_state,
        ht,
        ht_scope: HtScope::Methods,
        domain,
    };

    let result = run_gpg(&instance, config);

    let tasks: Vec<GroundTask> = result
        .state
        .iter()
        .map(|atom| match seed_atoms.key_of(atom) {
            Some(seed) => {
                let pg_task = &pg.tasks[pg_task_of_seed[seed]];
                GroundTask {
                    task: pg_task.task,
                    args: pg_task.args.clone(),
                    preconditions: pg_task.preconditions.clone(),
                    add_effects: pg_task.add_effects.clone(),
                    del_effects: pg_task.del_effects.clone(),
                    none_of_those_effects: vec![],
                    methods: vec![],
                }
            }
            None => GroundTask {
                task: TaskId::from(atom.head),
                args: atom.args.to_vec(),
                preconditions: vec![],
                add_effects: vec![],
                del_effects: vec![],
                none_of_those_effects: vec![],
                methods: vec![],
            },
        })
        .collect();

    let methods: Vec<GroundMethod> = result
        .groundings
        .into_iter()
        .map(|grounding| GroundMethod {
            method: MethodId::from(grounding.operator),
            args: grounding.args,
            decomposes: GroundTaskId::from(grounding.add_effects[0]),
            subtasks: grounding
                .matched_antecedents
                .iter()
                .map(|&id| GroundTaskId::from(id))
                .collect(),
            subtask_ordering: vec![],
        })
        .collect();

    let mut tasks = tasks;
    for (method_id, method) in methods.iter().enumerate() {
        tasks[method.decomposes].methods.push(GroundMethodId::from(method_id));
    }

    if !config.quiet {
        info!(
            ground_tasks = tasks.len(),
            ground_methods = methods.len(),
            "task decomposition graph done"
        );
    }

    TdgOutput { tasks, methods }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smallvec::smallvec;

    #[test]
    fn subtasks_reordered_by_decreasing_arity() {
        let mut domain = Domain::default();
        let t = domain.sorts.push(Sort {
            name: "T".to_string(),
            members: Default::default(),
        });
        domain.n_primitive = 2;
        domain.tasks.push(Task {
            name: "small".to_string(),
            variable_sorts: vec![],
            ..Task::default()
        });
        domain.tasks.push(Task {
            name: "big".to_string(),
            variable_sorts: vec![t, t],
            ..Task::default()
        });
        domain.tasks.push(Task {
            name: "abstract".to_string(),
            ..Task::default()
        });
        domain.methods.push(Method {
            name: "m".to_string(),
            task: TaskId::from_u32(2),
            variable_sorts: vec![t, t],
            task_parameters: vec![],
            subtasks: vec![
                Subtask {
                    task: TaskId::from_u32(0),
                    args: smallvec![],
                },
                Subtask {
                    task: TaskId::from_u32(1),
                    args: smallvec![0, 1],
                },
            ],
            orderings: vec![(0, 1)],
            constraints: vec![],
        });

        reorder_subtasks_by_arity(&mut domain);
        let method = &domain.methods[0];
        assert_eq!(method.subtasks[0].task, TaskId::from_u32(1));
        assert_eq!(method.subtasks[1].task, TaskId::from_u32(0));
        // "small" before "big" still holds under the new indices
        assert_eq!(method.orderings, vec![(1, 0)]);
    }
}
