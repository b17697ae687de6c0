//! Compilation of conditional effects into artificial primitive actions.
//!
//! Each conditional effect of an action `a` becomes a fresh primitive
//! `a_ce_i` whose precondition is the effect's condition plus a fresh guard
//! atom, and whose single effect is the conditional effect itself; `a` gains
//! the guard as an unconditional add effect. The artificial primitive takes
//! part in the planning graph like any other action; the writers later fold
//! it back into a conditional effect of `a`.

use crate::model::*;
use smallvec::SmallVec;
use std::collections::HashMap;

/// Renames the variables of `atom` into the compact scope of the compiled
/// action, extending the mapping for variables seen for the first time.
fn convert_to_new_variables(main_to_ce: &mut HashMap<usize, usize>, atom: &Atom) -> Atom {
    let mut args = SmallVec::with_capacity(atom.args.len());
    for &arg in &atom.args {
        let next = main_to_ce.len();
        args.push(*main_to_ce.entry(arg).or_insert(next));
    }
    Atom {
        predicate: atom.predicate,
        args,
    }
}

/// Expands every conditional effect in the domain. New primitives are
/// inserted behind the existing ones, so all abstract task indices shift.
pub fn expand_conditional_effects(domain: &mut Domain, problem: &mut Problem) {
    let mut ce_tasks: Vec<Task> = Vec::new();

    for task_no in 0..domain.n_primitive {
        let n_ces = domain.tasks[task_no].conditional_add.len() + domain.tasks[task_no].conditional_del.len();
        if n_ces == 0 {
            continue;
        }

        let all_ces: Vec<(bool, ConditionalEffect)> = {
            let task = &domain.tasks[task_no];
            task.conditional_add
                .iter()
                .map(|ce| (true, ce.clone()))
                .chain(task.conditional_del.iter().map(|ce| (false, ce.clone())))
                .collect()
        };

        for (instance, (is_add, ce)) in all_ces.into_iter().enumerate() {
            let mut main_to_ce: HashMap<usize, usize> = HashMap::new();

            let mut ce_task = Task {
                name: format!("{}_ce_{}", domain.tasks[task_no].name, instance),
                compiled_conditional_effect: true,
                ..Task::default()
            };
            for pre in &ce.condition {
                ce_task.preconditions.push(convert_to_new_variables(&mut main_to_ce, pre));
            }
            let effect = convert_to_new_variables(&mut main_to_ce, &ce.effect);
            if is_add {
                ce_task.add_effects.push(effect);
            } else {
                ce_task.del_effects.push(effect);
            }

            // variables of the compiled action, in the order they were mapped
            let mut ce_vars_to_main = vec![0usize; main_to_ce.len()];
            for (&main, &ce_var) in &main_to_ce {
                ce_vars_to_main[ce_var] = main;
            }

            let guard = Predicate {
                name: format!("{}_guard#", ce_task.name),
                guard_for_conditional_effect: true,
                argument_sorts: ce_vars_to_main
                    .iter()
                    .map(|&main| domain.tasks[task_no].variable_sorts[main])
                    .collect(),
            };
            let guard_predicate = domain.predicates.push(guard);

            ce_task.variable_sorts = ce_vars_to_main
                .iter()
                .map(|&main| domain.tasks[task_no].variable_sorts[main])
                .collect();

            // the guard closes the compiled action's precondition ...
            ce_task.preconditions.push(Atom {
                predicate: guard_predicate,
                args: (0..ce_vars_to_main.len()).collect(),
            });
            // ... and is produced unconditionally by the main action
            domain.tasks[task_no].add_effects.push(Atom {
                predicate: guard_predicate,
                args: ce_vars_to_main.iter().copied().collect(),
            });

            ce_tasks.push(ce_task);
        }
    }

    let added = ce_tasks.len();
    if added == 0 {
        return;
    }

    // insert the compiled actions between the primitives and the abstracts
    let abstracts = domain.tasks.split_off(domain.n_primitive);
    domain.tasks.extend(ce_tasks);
    domain.tasks.extend(abstracts);
    domain.n_primitive += added;

    // all abstract task indices moved up
    for method in &mut domain.methods {
        method.task = TaskId::from(usize::from(method.task) + added);
        for subtask in &mut method.subtasks {
            if usize::from(subtask.task) >= domain.n_primitive - added {
                subtask.task = TaskId::from(usize::from(subtask.task) + added);
            }
        }
    }
    if let Some(top) = problem.initial_abstract_task {
        problem.initial_abstract_task = Some(TaskId::from(usize::from(top) + added));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smallvec::smallvec;

    /// t(x: T) with precondition p(x) and conditional add "q(x) if r(x)".
    fn domain_with_ce() -> (Domain, Problem) {
        let mut domain = Domain::default();
        let a = domain.constants.push("a".to_string());
        let t = domain.sorts.push(Sort {
            name: "T".to_string(),
            members: [a].into_iter().collect(),
        });
        let p = domain.predicates.push(Predicate {
            name: "p".to_string(),
            argument_sorts: vec![t],
            guard_for_conditional_effect: false,
        });
        let q = domain.predicates.push(Predicate {
            name: "q".to_string(),
            argument_sorts: vec![t],
            guard_for_conditional_effect: false,
        });
        let r = domain.predicates.push(Predicate {
            name: "r".to_string(),
            argument_sorts: vec![t],
            guard_for_conditional_effect: false,
        });
        domain.n_primitive = 1;
        domain.tasks.push(Task {
            name: "t".to_string(),
            variable_sorts: vec![t],
            original_variable_count: 1,
            preconditions: vec![Atom {
                predicate: p,
                args: smallvec![0],
            }],
            conditional_add: vec![ConditionalEffect {
                condition: vec![Atom {
                    predicate: r,
                    args: smallvec![0],
                }],
                effect: Atom {
                    predicate: q,
                    args: smallvec![0],
                },
            }],
            ..Task::default()
        });
        domain.tasks.push(Task {
            name: "top".to_string(),
            ..Task::default()
        });
        (domain, Problem {
            initial_abstract_task: Some(TaskId::from_u32(1)),
            ..Problem::default()
        })
    }

    #[test]
    fn conditional_effect_becomes_guarded_action() {
        let (mut domain, mut problem) = domain_with_ce();
        expand_conditional_effects(&mut domain, &mut problem);

        assert_eq!(domain.n_primitive, 2);
        let ce_task = &domain.tasks[1];
        assert_eq!(ce_task.name, "t_ce_0");
        assert!(ce_task.compiled_conditional_effect);
        // condition r plus the guard
        assert_eq!(ce_task.preconditions.len(), 2);
        let guard = ce_task.preconditions.last().unwrap().predicate;
        assert!(domain.predicates[guard].guard_for_conditional_effect);
        assert_eq!(ce_task.add_effects.len(), 1);

        // the base action now adds the guard
        let base = &domain.tasks[0];
        assert!(base.add_effects.iter().any(|a| a.predicate == guard));

        // the abstract task index moved past the compiled action
        assert_eq!(problem.initial_abstract_task, Some(TaskId::from_u32(2)));
        assert_eq!(domain.tasks[2].name, "top");
    }
}
