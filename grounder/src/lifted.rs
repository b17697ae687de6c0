//! Lifted grounding: planning graph, then decomposition graph, then a
//! top-down restriction to what the initial abstract task can actually
//! reach.

use crate::given_plan::GivenPlanTyping;
use crate::gpg::planning_graph::{run_planning_graph, PgOutput};
use crate::gpg::tdg::{reorder_subtasks_by_arity, run_tdg, TdgOutput};
use crate::grounding::GroundingConfig;
use crate::hierarchy_typing::HierarchyTyping;
use crate::model::*;
use grounder_collections::ref_store::{RefMap, RefPool};
use std::collections::HashSet;
use tracing::info;

fn classical_model(pg: PgOutput) -> GroundModel {
    let n_tasks = pg.tasks.len();
    GroundModel {
        pruned_facts: vec![false; pg.facts.len()],
        pruned_tasks: vec![false; n_tasks],
        pruned_methods: vec![],
        facts: pg.facts,
        tasks: pg.tasks,
        methods: vec![],
    }
}

/// Top-down DFS over the ground decomposition graph. Only tasks and methods
/// in the decomposition tree of the initial abstract task survive, in
/// discovery order; compiled conditional-effect actions additionally survive
/// when their guard fact is added by a surviving task.
fn top_down_restriction(
    domain: &Domain,
    problem: &Problem,
    pg_facts: &RefPool<FactId, Fact>,
    tdg: TdgOutput,
) -> (Vec<GroundTask>, Vec<GroundMethod>) {
    let top = problem.initial_abstract_task.expect("hierarchical instance");

    let mut task_order: Vec<GroundTaskId> = Vec::new();
    let mut new_task_id: RefMap<GroundTaskId, usize> = RefMap::default();
    let mut method_order: Vec<GroundMethodId> = Vec::new();
    let mut visited_methods = vec![false; tdg.methods.len()];

    let mut stack: Vec<GroundTaskId> = tdg
        .tasks
        .iter()
        .enumerate()
        .filter(|(_, t)| t.task == top)
        .map(|(i, _)| GroundTaskId::from(i))
        .collect();

    while let Some(task_id) = stack.pop() {
        if new_task_id.contains(task_id) {
            continue;
        }
        new_task_id.insert(task_id, task_order.len());
        task_order.push(task_id);

        for &method_id in &tdg.tasks[task_id].methods {
            if !visited_methods[usize::from(method_id)] {
                visited_methods[usize::from(method_id)] = true;
                method_order.push(method_id);
                stack.extend(tdg.methods[method_id].subtasks.iter().copied());
            }
        }
    }

    // guard facts added by anything reachable top-down
    let mut reachable_guards: HashSet<FactId> = HashSet::new();
    for &task_id in &task_order {
        for &add in &tdg.tasks[task_id].add_effects {
            if domain.predicates[pg_facts[add].predicate].guard_for_conditional_effect {
                reachable_guards.insert(add);
            }
        }
    }
    for (idx, task) in tdg.tasks.iter().enumerate() {
        let task_id = GroundTaskId::from(idx);
        if new_task_id.contains(task_id) || !domain.tasks[usize::from(task.task)].compiled_conditional_effect {
            continue;
        }
        if task.preconditions.iter().any(|pre| reachable_guards.contains(pre)) {
            new_task_id.insert(task_id, task_order.len());
            task_order.push(task_id);
        }
    }

    let mut new_method_id: RefMap<GroundMethodId, usize> = RefMap::default();
    for (new_id, &method_id) in method_order.iter().enumerate() {
        new_method_id.insert(method_id, new_id);
    }

    let tasks: Vec<GroundTask> = task_order
        .iter()
        .map(|&old_id| {
            let task = &tdg.tasks[old_id];
            GroundTask {
                methods: task
                    .methods
                    .iter()
                    .filter_map(|&m| new_method_id.get(m).map(|&id| GroundMethodId::from(id)))
                    .collect(),
                ..task.clone()
            }
        })
        .collect();
    let methods: Vec<GroundMethod> = method_order
        .iter()
        .map(|&old_id| {
            let method = &tdg.methods[old_id];
            GroundMethod {
                method: method.method,
                args: method.args.clone(),
                decomposes: GroundTaskId::from(*new_task_id.get(method.decomposes).expect("decomposed task visited")),
                subtasks: method
                    .subtasks
                    .iter()
                    .map(|&s| GroundTaskId::from(*new_task_id.get(s).expect("subtask visited")))
                    .collect(),
                subtask_ordering: vec![],
            }
        })
        .collect();

    (tasks, methods)
}

/// Runs the complete lifted grounding. For classical instances only the
/// planning graph is used.
pub fn run_lifted_grounding(
    domain: &mut Domain,
    problem: &Problem,
    config: &GroundingConfig,
    given: Option<GivenPlanTyping>,
) -> GroundModel {
    let ht = match problem.initial_abstract_task {
        Some(_) if config.enable_hierarchy_typing => Some(HierarchyTyping::new(
            domain,
            problem,
            config.with_static_precondition_checking,
            true,
            given,
        )),
        _ => None,
    };

    let pg = run_planning_graph(domain, problem, ht.as_ref(), config);

    if problem.initial_abstract_task.is_none() {
        return classical_model(pg);
    }

    reorder_subtasks_by_arity(domain);
    let tdg = run_tdg(domain, problem, ht.as_ref(), &pg, config);
    let (tasks, methods) = top_down_restriction(domain, problem, &pg.facts, tdg);

    if !config.quiet {
        info!(tasks = tasks.len(), methods = methods.len(), "top-down restriction done");
    }

    GroundModel {
        pruned_facts: vec![false; pg.facts.len()],
        pruned_tasks: vec![false; tasks.len()],
        pruned_methods: vec![false; methods.len()],
        facts: pg.facts,
        tasks,
        methods,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smallvec::smallvec;

    /// top -> m -> move(x) over T={a,b}, init p(a), move(x) pre p(x) add p(x).
    fn hierarchical_instance() -> (Domain, Problem) {
        let mut domain = Domain::default();
        let a = domain.constants.push("a".to_string());
        let b = domain.constants.push("b".to_string());
        let t = domain.sorts.push(Sort {
            name: "T".to_string(),
            members: [a, b].into_iter().collect(),
        });
        let p = domain.predicates.push(Predicate {
            name: "p".to_string(),
            argument_sorts: vec![t],
            guard_for_conditional_effect: false,
        });
        domain.n_primitive = 1;
        domain.tasks.push(Task {
            name: "move".to_string(),
            variable_sorts: vec![t],
            original_variable_count: 1,
            preconditions: vec![Atom {
                predicate: p,
                args: smallvec![0],
            }],
            add_effects: vec![Atom {
                predicate: p,
                args: smallvec![0],
            }],
            ..Task::default()
        });
        domain.tasks.push(Task {
            name: "top".to_string(),
            methods: vec![MethodId::from_u32(0)],
            ..Task::default()
        });
        domain.methods.push(Method {
            name: "m".to_string(),
            task: TaskId::from_u32(1),
            variable_sorts: vec![t],
            task_parameters: vec![],
            subtasks: vec![Subtask {
                task: TaskId::from_u32(0),
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
        problem.initial_abstract_task = Some(TaskId::from_u32(1));
        (domain, problem)
    }

    #[test]
    fn hierarchical_grounding_links_methods_and_tasks() {
        let (mut domain, problem) = hierarchical_instance();
        let config = GroundingConfig::default();
        let model = run_lifted_grounding(&mut domain, &problem, &config, None);

        // move[a] and top[], linked by one ground method
        assert_eq!(model.tasks.len(), 2);
        assert_eq!(model.methods.len(), 1);
        let method = &model.methods[0];
        assert_eq!(model.tasks[method.decomposes].task, TaskId::from_u32(1));
        assert_eq!(method.subtasks.len(), 1);
        assert_eq!(model.tasks[method.subtasks[0]].task, TaskId::from_u32(0));
        assert!(model.tasks[method.decomposes].methods.contains(&GroundMethodId::from_u32(0)));
    }

    #[test]
    fn unreachable_groundings_are_restricted_away() {
        let (mut domain, problem) = hierarchical_instance();
        let config = GroundingConfig::default();
        let model = run_lifted_grounding(&mut domain, &problem, &config, None);
        // move[b] has no reachable precondition, so only move[a] survives
        assert!(model
            .tasks
            .iter()
            .all(|t| t.args.is_empty() || t.args == vec![ConstId::from_u32(0)]));
    }
}
