//! Grounded reachability: once the lifted fixpoints have produced a finite
//! ground model, a cheaper propositional analysis is iterated to
//! convergence. Each round runs a grounded planning graph (forward fact
//! reachability), a grounded decomposition graph (bottom-up method
//! reachability) and a top-down DFS from the initial abstract task; anything
//! not reached is pruned, which may enable further pruning in the next
//! round.

use crate::grounding::GroundingConfig;
use crate::model::*;
use fixedbitset::FixedBitSet;
use std::collections::VecDeque;
use tracing::debug;

/// Forward fact reachability over unpruned primitives. Primitives left with
/// unfulfilled preconditions and facts never reached are pruned.
fn grounded_pg(domain: &Domain, problem: &Problem, model: &mut GroundModel) -> (usize, usize) {
    let mut fact_reached = FixedBitSet::with_capacity(model.facts.len());
    let mut unfulfilled: Vec<usize> = vec![0; model.tasks.len()];

    let mut reached_tasks = 0usize;
    let mut reached_facts = 0usize;
    let mut queue: VecDeque<FactId> = VecDeque::new();

    let reach_fact = |fact: FactId,
                          fact_reached: &mut FixedBitSet,
                          queue: &mut VecDeque<FactId>,
                          reached_facts: &mut usize| {
        if !fact_reached.contains(usize::from(fact)) {
            fact_reached.insert(usize::from(fact));
            queue.push_back(fact);
            *reached_facts += 1;
        }
    };

    for task_id in model.task_ids() {
        let task = &model.tasks[task_id];
        if !domain.is_primitive(task.task) || model.pruned_tasks[task_id] {
            continue;
        }
        unfulfilled[usize::from(task_id)] = task.preconditions.len();
        if task.preconditions.is_empty() {
            reached_tasks += 1;
            for &add in &task.add_effects {
                reach_fact(add, &mut fact_reached, &mut queue, &mut reached_facts);
            }
        }
    }

    let mut tasks_by_precondition: Vec<Vec<GroundTaskId>> = vec![Vec::new(); model.facts.len()];
    for task_id in model.task_ids() {
        let task = &model.tasks[task_id];
        if !domain.is_primitive(task.task) || model.pruned_tasks[task_id] {
            continue;
        }
        for &pre in &task.preconditions {
            tasks_by_precondition[usize::from(pre)].push(task_id);
        }
    }

    for fact in &problem.init {
        if let Some(id) = model.fact_id(fact) {
            reach_fact(id, &mut fact_reached, &mut queue, &mut reached_facts);
        }
    }

    while let Some(fact) = queue.pop_front() {
        for &task_id in &tasks_by_precondition[usize::from(fact)] {
            unfulfilled[usize::from(task_id)] -= 1;
            if unfulfilled[usize::from(task_id)] == 0 {
                reached_tasks += 1;
                for &add in &model.tasks[task_id].add_effects {
                    reach_fact(add, &mut fact_reached, &mut queue, &mut reached_facts);
                }
            }
        }
    }

    for task_id in model.task_ids() {
        if unfulfilled[usize::from(task_id)] > 0 {
            model.pruned_tasks[usize::from(task_id)] = true;
        }
    }
    for fact_id in model.fact_ids() {
        if !fact_reached.contains(usize::from(fact_id)) {
            model.pruned_facts[usize::from(fact_id)] = true;
        }
    }

    (reached_tasks, reached_facts)
}

/// Bottom-up method reachability: a method is reached when all its subtasks
/// are, an abstract task when one of its methods is. Seeds are the unpruned
/// primitives.
fn grounded_tdg(domain: &Domain, model: &mut GroundModel) -> (usize, usize) {
    let mut task_reached = FixedBitSet::with_capacity(model.tasks.len());
    let mut unfulfilled: Vec<usize> = vec![0; model.methods.len()];

    let mut reached_methods = 0usize;
    let mut queue: VecDeque<GroundTaskId> = VecDeque::new();

    let mut methods_by_subtask: Vec<Vec<GroundMethodId>> = vec![Vec::new(); model.tasks.len()];
    for method_id in model.method_ids() {
        if model.pruned_methods[method_id] {
            continue;
        }
        let method = &model.methods[method_id];
        unfulfilled[usize::from(method_id)] = method.subtasks.len();
        for &subtask in &method.subtasks {
            methods_by_subtask[usize::from(subtask)].push(method_id);
        }
        if method.subtasks.is_empty() {
            reached_methods += 1;
            if !task_reached.contains(usize::from(method.decomposes)) {
                task_reached.insert(usize::from(method.decomposes));
                queue.push_back(method.decomposes);
            }
        }
    }

    for task_id in model.task_ids() {
        if !model.pruned_tasks[task_id] && domain.is_primitive(model.tasks[task_id].task) {
            task_reached.insert(usize::from(task_id));
            queue.push_back(task_id);
        }
    }

    while let Some(task_id) = queue.pop_front() {
        for &method_id in &methods_by_subtask[usize::from(task_id)] {
            unfulfilled[usize::from(method_id)] -= 1;
            if unfulfilled[usize::from(method_id)] == 0 {
                reached_methods += 1;
                let decomposed = model.methods[method_id].decomposes;
                if !task_reached.contains(usize::from(decomposed)) {
                    task_reached.insert(usize::from(decomposed));
                    queue.push_back(decomposed);
                }
            }
        }
    }

    let mut reached_primitives = 0usize;
    for method_id in model.method_ids() {
        if unfulfilled[usize::from(method_id)] > 0 {
            model.pruned_methods[usize::from(method_id)] = true;
        }
    }
    for task_id in model.task_ids() {
        if task_reached.contains(usize::from(task_id)) {
            if domain.is_primitive(model.tasks[task_id].task) {
                reached_primitives += 1;
            }
        } else {
            model.pruned_tasks[usize::from(task_id)] = true;
        }
    }

    (reached_methods, reached_primitives)
}

/// Top-down DFS restricted to unpruned tasks and methods. Unvisited items
/// are pruned, except compiled conditional-effect actions, which stay as
/// long as they are unpruned.
fn grounded_top_down_dfs(domain: &Domain, problem: &Problem, model: &mut GroundModel) -> (usize, usize) {
    let mut visited_tasks = FixedBitSet::with_capacity(model.tasks.len());
    let mut visited_methods = FixedBitSet::with_capacity(model.methods.len());

    let top = problem.initial_abstract_task.expect("hierarchical instance");
    let mut stack: Vec<GroundTaskId> = model
        .task_ids()
        .filter(|&t| model.tasks[t].task == top && !model.pruned_tasks[t])
        .collect();

    while let Some(task_id) = stack.pop() {
        if visited_tasks.contains(usize::from(task_id)) {
            continue;
        }
        visited_tasks.insert(usize::from(task_id));
        for &method_id in &model.tasks[task_id].methods {
            if model.pruned_methods[method_id] || visited_methods.contains(usize::from(method_id)) {
                continue;
            }
            visited_methods.insert(usize::from(method_id));
            stack.extend(model.methods[method_id].subtasks.iter().copied());
        }
    }

    let mut reached_primitives = 0usize;
    let mut reached_methods = 0usize;
    for task_id in model.task_ids() {
        if visited_tasks.contains(usize::from(task_id)) {
            if domain.is_primitive(model.tasks[task_id].task) {
                reached_primitives += 1;
            }
        } else if !model.pruned_tasks[task_id]
            && domain.tasks[usize::from(model.tasks[task_id].task)].compiled_conditional_effect
        {
            reached_primitives += 1;
        } else {
            model.pruned_tasks[usize::from(task_id)] = true;
        }
    }
    for method_id in model.method_ids() {
        if visited_methods.contains(usize::from(method_id)) {
            reached_methods += 1;
        } else {
            model.pruned_methods[usize::from(method_id)] = true;
        }
    }

    (reached_primitives, reached_methods)
}

/// Iterates grounded PG, grounded TDG and the top-down DFS until the set of
/// reachable primitives stabilizes. A no-op for classical instances.
pub fn run_grounded_loop(
    domain: &Domain,
    problem: &Problem,
    model: &mut GroundModel,
    _config: &GroundingConfig,
    mut always_run_dfs: bool,
) {
    if problem.initial_abstract_task.is_none() {
        return;
    }

    let mut remaining_primitives = model
        .tasks
        .iter()
        .filter(|t| domain.is_primitive(t.task))
        .count();

    loop {
        let (reached_tasks, reached_facts) = grounded_pg(domain, problem, model);
        debug!(reached_tasks, reached_facts, "grounded planning graph");

        if reached_tasks == remaining_primitives && !always_run_dfs {
            break;
        }
        always_run_dfs = false;
        remaining_primitives = reached_tasks;

        let (reached_methods, reached_primitives) = grounded_tdg(domain, model);
        debug!(reached_methods, reached_primitives, "grounded decomposition graph");

        let (dfs_primitives, dfs_methods) = grounded_top_down_dfs(domain, problem, model);
        debug!(dfs_primitives, dfs_methods, "top-down DFS");

        if dfs_primitives == remaining_primitives {
            break;
        }
        remaining_primitives = dfs_primitives;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifted::run_lifted_grounding;
    use smallvec::smallvec;

    /// top decomposes into either move(a) or jump(b). The only producer of
    /// jump's precondition q(b) is `maker`, which appears in no method: the
    /// lifted planning graph reaches jump[b] through it, but the top-down
    /// restriction removes `maker`, so the grounded loop must prune the jump
    /// branch.
    fn instance_with_dead_branch() -> (Domain, Problem) {
        let mut domain = Domain::default();
        let a = domain.constants.push("a".to_string());
        let b = domain.constants.push("b".to_string());
        let t = domain.sorts.push(Sort {
            name: "T".to_string(),
            members: [a, b].into_iter().collect(),
        });
        let bs = domain.sorts.push(Sort {
            name: "B".to_string(),
            members: [b].into_iter().collect(),
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
        domain.n_primitive = 3;
        domain.tasks.push(Task {
            name: "move".to_string(),
            variable_sorts: vec![t],
            original_variable_count: 1,
            preconditions: vec![Atom {
                predicate: p,
                args: smallvec![0],
            }],
            ..Task::default()
        });
        domain.tasks.push(Task {
            name: "jump".to_string(),
            variable_sorts: vec![t],
            original_variable_count: 1,
            preconditions: vec![Atom {
                predicate: q,
                args: smallvec![0],
            }],
            ..Task::default()
        });
        domain.tasks.push(Task {
            name: "maker".to_string(),
            variable_sorts: vec![bs],
            original_variable_count: 1,
            add_effects: vec![Atom {
                predicate: q,
                args: smallvec![0],
            }],
            ..Task::default()
        });
        domain.tasks.push(Task {
            name: "top".to_string(),
            methods: vec![MethodId::from_u32(0), MethodId::from_u32(1)],
            ..Task::default()
        });
        domain.methods.push(Method {
            name: "m_move".to_string(),
            task: TaskId::from_u32(3),
            variable_sorts: vec![t],
            task_parameters: vec![],
            subtasks: vec![Subtask {
                task: TaskId::from_u32(0),
                args: smallvec![0],
            }],
            orderings: vec![],
            constraints: vec![],
        });
        domain.methods.push(Method {
            name: "m_jump".to_string(),
            task: TaskId::from_u32(3),
            variable_sorts: vec![t],
            task_parameters: vec![],
            subtasks: vec![Subtask {
                task: TaskId::from_u32(1),
                args: smallvec![0],
            }],
            orderings: vec![],
            constraints: vec![],
        });

        let mut problem = Problem::default();
        problem.init.push(Fact {
            predicate: p,
            args: smallvec![a],
        });
        problem.initial_abstract_task = Some(TaskId::from_u32(3));
        (domain, problem)
    }

    #[test]
    fn dead_branches_are_pruned() {
        let (mut domain, problem) = instance_with_dead_branch();
        // hierarchy typing would already refuse to ground `maker`; disable
        // it so the grounded loop does the pruning
        let config = GroundingConfig {
            enable_hierarchy_typing: false,
            ..GroundingConfig::default()
        };
        let mut model = run_lifted_grounding(&mut domain, &problem, &config, None);
        run_grounded_loop(&domain, &problem, &mut model, &config, false);

        // jump never fires: its ground instances and the method using them
        // must be pruned
        for task_id in model.task_ids() {
            let lifted = model.tasks[task_id].task;
            if domain.tasks[usize::from(lifted)].name == "jump" {
                assert!(model.pruned_tasks[task_id]);
            }
            if domain.tasks[usize::from(lifted)].name == "move" {
                assert!(!model.pruned_tasks[task_id]);
            }
        }
        for method_id in model.method_ids() {
            let name = &domain.methods[usize::from(model.methods[method_id].method)].name;
            assert_eq!(model.pruned_methods[usize::from(method_id)], name == "m_jump");
        }
    }

    #[test]
    fn grounded_loop_is_idempotent() {
        let (mut domain, problem) = instance_with_dead_branch();
        let config = GroundingConfig {
            enable_hierarchy_typing: false,
            ..GroundingConfig::default()
        };
        let mut model = run_lifted_grounding(&mut domain, &problem, &config, None);
        run_grounded_loop(&domain, &problem, &mut model, &config, false);
        let snapshot = (
            model.pruned_facts.clone(),
            model.pruned_tasks.clone(),
            model.pruned_methods.clone(),
        );
        run_grounded_loop(&domain, &problem, &mut model, &config, false);
        assert_eq!(snapshot.0, model.pruned_facts);
        assert_eq!(snapshot.1, model.pruned_tasks);
        assert_eq!(snapshot.2, model.pruned_methods);
    }
}
