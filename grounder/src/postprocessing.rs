//! Model simplification passes.
//!
//! The passes run after grounded reachability and mutate the ground model
//! (and, where methods are rewritten, the lifted domain: rewritten methods
//! are appended as fresh lifted methods so that the encoding of the applied
//! rewriting survives in the method name for plan reconstruction).

use crate::grounding::{GoalUnreachable, GroundingConfig};
use crate::model::*;
use anyhow::{bail, Result};
use itertools::Itertools;
use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::debug;

/// Prefix of compiled method-precondition actions.
const METHOD_PRECONDITION_PREFIX: &str = "__method_precondition_";

/// Kahn topological sort; vertices without order among themselves come out
/// in index order, which keeps the output deterministic.
fn topological_order(n: usize, edges: &[(usize, usize)]) -> Vec<usize> {
    let mut successors: Vec<Vec<usize>> = vec![Vec::new(); n];
    let mut indegree = vec![0usize; n];
    for &(a, b) in edges {
        successors[a].push(b);
        indegree[b] += 1;
    }
    let mut ready: BTreeSet<usize> = (0..n).filter(|&v| indegree[v] == 0).collect();
    let mut order = Vec::with_capacity(n);
    while let Some(&v) = ready.iter().next() {
        ready.remove(&v);
        order.push(v);
        for &w in &successors[v] {
            indegree[w] -= 1;
            if indegree[w] == 0 {
                ready.insert(w);
            }
        }
    }
    order
}

/// Fills every unpruned method's `subtask_ordering` with a topological
/// ordering of its subtasks consistent with the lifted ordering constraints.
pub fn sort_subtasks_topologically(domain: &Domain, model: &mut GroundModel) {
    for method_id in 0..model.methods.len() {
        if model.pruned_methods[method_id] {
            continue;
        }
        let n = model.methods[method_id].subtasks.len();
        let orderings = &domain.methods[usize::from(model.methods[method_id].method)].orderings;
        model.methods[method_id].subtask_ordering = topological_order(n, orderings);
    }
}

/// Index of the guard precondition of a compiled conditional-effect action.
fn guard_of(domain: &Domain, model: &GroundModel, task: GroundTaskId) -> Option<FactId> {
    model.tasks[task]
        .preconditions
        .iter()
        .find(|&&pre| domain.predicates[model.facts[pre].predicate].guard_for_conditional_effect)
        .copied()
}

/// Maps each reachable guard fact to the compiled conditional-effect action
/// it triggers. Two groundings on the same guard indicate a bug.
pub fn conditional_effect_actions(
    domain: &Domain,
    model: &GroundModel,
) -> Result<HashMap<FactId, GroundTaskId>> {
    let mut ce_actions = HashMap::new();
    for task_id in model.live_primitives(domain) {
        if !domain.tasks[usize::from(model.tasks[task_id].task)].compiled_conditional_effect {
            continue;
        }
        let Some(guard) = guard_of(domain, model, task_id) else {
            continue;
        };
        if ce_actions.insert(guard, task_id).is_some() {
            bail!("two conditional-effect groundings share guard fact {guard:?}; this is a bug");
        }
    }
    Ok(ce_actions)
}

/// Effect priority: where an action both adds and deletes a fact, the add
/// wins, except for compiled negated predicates (name starting with `-`),
/// where the delete wins. Conditional effects conflicting with the fixed
/// effects of their base action are resolved the same way, by pruning the
/// losing conditional-effect action; an unresolvable combination is a hard
/// error.
pub fn apply_effect_priority(domain: &Domain, model: &mut GroundModel) -> Result<()> {
    let ce_actions = conditional_effect_actions(domain, model)?;

    for task_id in model.task_ids() {
        if model.pruned_tasks[task_id] || !domain.is_primitive(model.tasks[task_id].task) {
            continue;
        }

        let negated = |model: &GroundModel, fact: FactId| {
            domain.predicates[model.facts[fact].predicate].name.starts_with('-')
        };

        // unconditional add/delete overlap
        let add_set: HashSet<FactId> = model.tasks[task_id].add_effects.iter().copied().collect();
        let overlap: Vec<FactId> = model.tasks[task_id]
            .del_effects
            .iter()
            .filter(|d| add_set.contains(d))
            .copied()
            .collect();
        if !overlap.is_empty() {
            let (del_wins, add_wins): (Vec<FactId>, Vec<FactId>) =
                overlap.into_iter().partition(|&f| negated(model, f));
            let task = &mut model.tasks[usize::from(task_id)];
            task.add_effects.retain(|f| !del_wins.contains(f));
            task.del_effects.retain(|f| !add_wins.contains(f));
        }

        let add_set: HashSet<FactId> = model.tasks[task_id].add_effects.iter().copied().collect();
        let del_set: HashSet<FactId> = model.tasks[task_id].del_effects.iter().copied().collect();

        // conditional effects attached to this action, keyed by their fact
        let mut ces: HashMap<FactId, (Vec<GroundTaskId>, Vec<GroundTaskId>)> = HashMap::new();
        let guards: Vec<FactId> = model.tasks[task_id]
            .add_effects
            .iter()
            .filter(|&&add| domain.predicates[model.facts[add].predicate].guard_for_conditional_effect)
            .copied()
            .collect();
        for guard in guards {
            let Some(&ce_task) = ce_actions.get(&guard) else {
                continue; // condition unreachable
            };
            if model.pruned_tasks[ce_task] {
                continue;
            }
            let ce = &model.tasks[ce_task];
            if let Some(&effect) = ce.add_effects.first() {
                if !model.pruned_facts[effect] {
                    ces.entry(effect).or_default().0.push(ce_task);
                }
            } else if let Some(&effect) = ce.del_effects.first() {
                if !model.pruned_facts[effect] {
                    ces.entry(effect).or_default().1.push(ce_task);
                }
            }
        }

        for (&fact, (adds, dels)) in ces.iter().sorted_by_key(|&(&f, _)| f) {
            if add_set.contains(&fact) {
                // conditional adds are redundant
                for &add in adds {
                    model.pruned_tasks[usize::from(add)] = true;
                }
                if !negated(model, fact) {
                    for &del in dels {
                        model.pruned_tasks[usize::from(del)] = true;
                    }
                } else if dels.iter().any(|&del| !model.pruned_tasks[del]) {
                    bail!(
                        "conditional delete on fact {} which is negated but unconditionally added; \
                         rewrite the domain or disable negation compilation in the front end",
                        model.fact_name(domain, fact)
                    );
                }
            }
            if del_set.contains(&fact) {
                for &del in dels {
                    model.pruned_tasks[usize::from(del)] = true;
                }
                if negated(model, fact) {
                    for &add in adds {
                        model.pruned_tasks[usize::from(add)] = true;
                    }
                } else if adds.iter().any(|&add| !model.pruned_tasks[add]) {
                    bail!(
                        "conditional add on fact {} which is positive but unconditionally deleted; \
                         rewrite the domain or disable negation compilation in the front end",
                        model.fact_name(domain, fact)
                    );
                }
            }

            // conditional add and delete of the same fact under the same
            // condition: keep one according to the priority rule
            for &add in adds {
                if model.pruned_tasks[add] {
                    continue;
                }
                for &del in dels {
                    if model.pruned_tasks[del] {
                        continue;
                    }
                    let strip = |t: GroundTaskId| -> Vec<FactId> {
                        model.tasks[t]
                            .preconditions
                            .iter()
                            .filter(|&&p| !domain.predicates[model.facts[p].predicate].guard_for_conditional_effect)
                            .copied()
                            .sorted()
                            .collect()
                    };
                    if strip(add) != strip(del) {
                        continue;
                    }
                    if negated(model, fact) {
                        model.pruned_tasks[usize::from(add)] = true;
                    } else {
                        model.pruned_tasks[usize::from(del)] = true;
                    }
                }
            }
        }
    }
    Ok(())
}

/// Prunes facts whose truth value never changes (static) and facts that
/// appear in no precondition or goal.
pub fn remove_useless_facts(domain: &Domain, problem: &Problem, model: &mut GroundModel) -> Result<()> {
    let mut initially_true = vec![false; model.facts.len()];
    for fact in &problem.init {
        if let Some(id) = model.fact_id(fact) {
            initially_true[usize::from(id)] = true;
        }
    }

    let mut truth_changes = vec![false; model.facts.len()];
    for task_id in model.live_primitives(domain) {
        for &add in &model.tasks[task_id].add_effects {
            if !initially_true[usize::from(add)] {
                truth_changes[usize::from(add)] = true;
            }
        }
        for &del in &model.tasks[task_id].del_effects {
            if initially_true[usize::from(del)] {
                truth_changes[usize::from(del)] = true;
            }
        }
    }
    for fact_id in model.fact_ids() {
        if !truth_changes[usize::from(fact_id)] {
            model.pruned_facts[usize::from(fact_id)] = true;
        }
    }

    let mut in_precondition = vec![false; model.facts.len()];
    for task in &model.tasks {
        for &pre in &task.preconditions {
            in_precondition[usize::from(pre)] = true;
        }
    }
    for fact in &problem.goal {
        match model.fact_id(fact) {
            Some(id) => in_precondition[usize::from(id)] = true,
            None => {
                let name = format!(
                    "{}[{}]",
                    domain.predicates[fact.predicate].name,
                    fact.args.iter().map(|&c| domain.constants[c].as_str()).join(",")
                );
                return Err(GoalUnreachable(format!("goal fact {name} was never produced")).into());
            }
        }
    }
    for fact_id in model.fact_ids() {
        if !in_precondition[usize::from(fact_id)] {
            model.pruned_facts[usize::from(fact_id)] = true;
        }
    }
    Ok(())
}

/// Methods (unpruned) containing each ground task as a subtask.
fn methods_containing(model: &GroundModel) -> Vec<BTreeSet<GroundMethodId>> {
    let mut containing: Vec<BTreeSet<GroundMethodId>> = vec![BTreeSet::new(); model.tasks.len()];
    for method_id in model.method_ids() {
        if model.pruned_methods[method_id] {
            continue;
        }
        for &subtask in &model.methods[method_id].subtasks {
            containing[usize::from(subtask)].insert(method_id);
        }
    }
    containing
}

/// Removes subtask `position` from a method (ground and lifted view),
/// keeping transitively implied orderings.
fn remove_subtask(lifted: &mut Method, ground: &mut GroundMethod, position: usize) {
    ground.subtasks.remove(position);
    lifted.subtasks.remove(position);

    let (pertaining, mut rest): (Vec<(usize, usize)>, Vec<(usize, usize)>) = lifted
        .orderings
        .drain(..)
        .partition(|&(a, b)| a == position || b == position);
    for &(a, _) in pertaining.iter().filter(|&&(_, b)| b == position) {
        for &(_, b) in pertaining.iter().filter(|&&(a2, _)| a2 == position) {
            rest.push((a, b));
        }
    }
    let shift = |idx: usize| if idx > position { idx - 1 } else { idx };
    lifted.orderings = rest.into_iter().map(|(a, b)| (shift(a), shift(b))).collect();

    ground.subtask_ordering = ground
        .subtask_ordering
        .iter()
        .filter(|&&entry| entry != position)
        .map(|&entry| shift(entry))
        .collect();
}

/// Removes compiled method-precondition actions whose preconditions and
/// effects have all been pruned, deleting them from every containing
/// method.
pub fn remove_empty_method_preconditions(domain: &mut Domain, model: &mut GroundModel) {
    let containing = methods_containing(model);

    for task_id in model.task_ids() {
        if model.pruned_tasks[task_id] || !domain.is_primitive(model.tasks[task_id].task) {
            continue;
        }
        if !domain.tasks[usize::from(model.tasks[task_id].task)]
            .name
            .starts_with(METHOD_PRECONDITION_PREFIX)
        {
            continue;
        }
        let task = &model.tasks[task_id];
        let live = |f: &FactId| !model.pruned_facts[usize::from(*f)];
        if task.preconditions.iter().any(live)
            || task.add_effects.iter().any(live)
            || task.del_effects.iter().any(live)
        {
            continue;
        }

        model.pruned_tasks[usize::from(task_id)] = true;

        for &method_id in &containing[usize::from(task_id)] {
            if model.pruned_methods[method_id] {
                continue;
            }
            let mut lifted = domain.methods[usize::from(model.methods[method_id].method)].clone();
            while let Some(position) = model.methods[method_id].subtasks.iter().position(|&s| s == task_id) {
                let ground = &mut model.methods[usize::from(method_id)];
                remove_subtask(&mut lifted, ground, position);
            }
            // record the rewritten lifted method
            model.methods[usize::from(method_id)].method = MethodId::from(domain.methods.len());
            domain.methods.push(lifted);
        }
    }
}

/// Splices the subtasks of `unit` (the only method of `expanded_task`) into
/// `method` wherever `expanded_task` occurs. The rewriting is encoded into
/// the lifted method name (`<outer;task;inner;position;idmap>`) so that plan
/// reconstruction can undo it.
fn splice_unit_method(
    lifted: &mut Method,
    ground: &mut GroundMethod,
    unit_lifted: &Method,
    unit_ground: &GroundMethod,
    expanded_task: GroundTaskId,
    expanded_task_name: &str,
) -> bool {
    let mut expanded_empty = false;
    while let Some(position) = ground.subtasks.iter().position(|&s| s == expanded_task) {
        let mut idmapping: Vec<i64> = Vec::new();
        let mut position_of_expanded: i64 = -1;

        if unit_ground.subtasks.is_empty() {
            expanded_empty = true;
            let ordering_position = ground.subtask_ordering.iter().position(|&e| e == position);
            remove_subtask(lifted, ground, position);
            if let Some(p) = ordering_position {
                position_of_expanded = p as i64;
            }
            for (i, _) in ground.subtask_ordering.iter().enumerate() {
                // surviving ordering slots keep their original position
                idmapping.push(if (i as i64) < position_of_expanded { i as i64 } else { i as i64 + 1 });
            }
        } else {
            let original_size = ground.subtasks.len();
            ground.subtasks[position] = unit_ground.subtasks[0];

            let pertaining: Vec<(usize, usize)> = lifted
                .orderings
                .iter()
                .filter(|&&(a, b)| a == position || b == position)
                .copied()
                .collect();
            for j in 1..unit_ground.subtasks.len() {
                let new_index = ground.subtasks.len();
                for &(a, b) in &pertaining {
                    if a == position {
                        lifted.orderings.push((new_index, b));
                    } else {
                        lifted.orderings.push((a, new_index));
                    }
                }
                ground.subtasks.push(unit_ground.subtasks[j]);
                let copied = lifted.subtasks[position].clone();
                lifted.subtasks.push(copied);
            }

            // splice the unit's ordering into the topological ordering
            let mut new_ordering: Vec<usize> = Vec::new();
            for (i, &entry) in ground.subtask_ordering.iter().enumerate() {
                if entry == position {
                    position_of_expanded = i as i64;
                    for (j, &unit_entry) in unit_ground.subtask_ordering.iter().enumerate() {
                        if unit_entry == 0 {
                            new_ordering.push(position);
                        } else {
                            new_ordering.push(original_size + unit_entry - 1);
                        }
                        idmapping.push(-(j as i64) - 1);
                    }
                } else {
                    new_ordering.push(entry);
                    idmapping.push(i as i64);
                }
            }
            ground.subtask_ordering = new_ordering;

            for &(a, b) in &unit_lifted.orderings {
                let map = |idx: usize| if idx == 0 { position } else { original_size + idx - 1 };
                lifted.orderings.push((map(a), map(b)));
            }
        }

        lifted.name = format!(
            "<{};{};{};{};{}>",
            lifted.name,
            expanded_task_name,
            unit_lifted.name,
            position_of_expanded,
            idmapping.iter().join(",")
        );

        if unit_ground.subtasks.is_empty() {
            continue; // indices shifted, rescan
        }
    }
    expanded_empty
}

/// Inlines abstract tasks that have exactly one applicable method into
/// every method containing them. With `keep_two_regularisation`, a unit
/// method with two or more subtasks is not inlined where it would blow up a
/// previously small method.
pub fn expand_choiceless_abstract_tasks(
    domain: &mut Domain,
    problem: &Problem,
    model: &mut GroundModel,
    keep_two_regularisation: bool,
) {
    let mut containing = methods_containing(model);

    let mut expanded_empty = true;
    while expanded_empty {
        expanded_empty = false;
        for task_id in model.task_ids() {
            if model.pruned_tasks[task_id] || domain.is_primitive(model.tasks[task_id].task) {
                continue;
            }
            if Some(model.tasks[task_id].task) == problem.initial_abstract_task {
                continue;
            }

            let applicable: Vec<GroundMethodId> = model.tasks[task_id]
                .methods
                .iter()
                .filter(|&&m| !model.pruned_methods[m])
                .copied()
                .collect();
            let [unit_id] = applicable[..] else { continue };

            let max_containing_size = containing[usize::from(task_id)]
                .iter()
                .filter(|&&m| !model.pruned_methods[m])
                .map(|&m| model.methods[m].subtasks.len())
                .max()
                .unwrap_or(0);
            if keep_two_regularisation && model.methods[unit_id].subtasks.len() >= 2 && max_containing_size > 1 {
                continue;
            }

            model.pruned_methods[usize::from(unit_id)] = true;
            model.pruned_tasks[usize::from(task_id)] = true;

            let expanded_task_name = {
                let t = &model.tasks[task_id];
                format!(
                    "{}[{}]",
                    domain.tasks[usize::from(t.task)].name,
                    t.args.iter().map(|&c| domain.constants[c].as_str()).join(",")
                )
            };
            let unit_ground = model.methods[unit_id].clone();
            let unit_lifted = domain.methods[usize::from(unit_ground.method)].clone();

            for &method_id in &containing[usize::from(task_id)].clone() {
                if model.pruned_methods[method_id] {
                    continue;
                }
                let mut lifted = domain.methods[usize::from(model.methods[method_id].method)].clone();
                let mut ground = model.methods[method_id].clone();
                expanded_empty |= splice_unit_method(
                    &mut lifted,
                    &mut ground,
                    &unit_lifted,
                    &unit_ground,
                    task_id,
                    &expanded_task_name,
                );
                ground.method = MethodId::from(domain.methods.len());
                domain.methods.push(lifted);
                model.methods[usize::from(method_id)] = ground;

                for &subtask in &unit_ground.subtasks {
                    containing[usize::from(subtask)].insert(method_id);
                }
            }
        }
    }
}

/// Replaces maximal runs of primitives in totally ordered methods by one
/// synthesized primitive (precondition = regression of the run, effects =
/// net effect). A run that is internally inconsistent makes the whole
/// method unexecutable, which prunes it.
pub fn compact_consecutive_primitives(domain: &mut Domain, problem: &mut Problem, model: &mut GroundModel) {
    let mut new_lifted_tasks: Vec<Task> = Vec::new();
    let mut new_ground_tasks: Vec<GroundTask> = Vec::new();
    // lifted counterparts of the chain methods are derived after the splice,
    // once all task ids are final
    let mut pending_methods: Vec<(Method, GroundMethod)> = Vec::new();

    // new ground tasks are appended after the current ones
    let next_ground_id = |new_ground_tasks: &Vec<GroundTask>, model: &GroundModel| {
        GroundTaskId::from(model.tasks.len() + new_ground_tasks.len())
    };

    for method_id in model.method_ids() {
        if model.pruned_methods[method_id] || model.methods[method_id].subtasks.len() < 2 {
            continue;
        }

        // cut the ordered subtask list into blocks of consecutive primitives
        let mut segmentation: Vec<Vec<GroundTaskId>> = Vec::new();
        let mut current_block: Vec<GroundTaskId> = Vec::new();
        for &ordering_entry in &model.methods[method_id].subtask_ordering {
            let subtask = model.methods[method_id].subtasks[ordering_entry];
            if domain.is_primitive(model.tasks[subtask].task) {
                current_block.push(subtask);
            } else {
                if !current_block.is_empty() {
                    segmentation.push(std::mem::take(&mut current_block));
                }
                segmentation.push(vec![subtask]);
            }
        }
        if !current_block.is_empty() {
            segmentation.push(current_block);
        }
        if !segmentation.iter().any(|block| block.len() > 1) {
            continue;
        }

        let mut method_subtasks: Vec<GroundTaskId> = Vec::new();
        let mut executable = true;
        for segment in &segmentation {
            if segment.len() == 1 {
                method_subtasks.push(segment[0]);
                continue;
            }

            // regression of the sequence
            let mut pre: BTreeSet<FactId> = BTreeSet::new();
            let mut add: BTreeSet<FactId> = BTreeSet::new();
            let mut del: BTreeSet<FactId> = BTreeSet::new();
            for &action in segment {
                let task = &model.tasks[action];
                for &p in &task.preconditions {
                    if del.contains(&p) {
                        executable = false;
                    }
                    if !add.contains(&p) {
                        pre.insert(p);
                    }
                }
                for &d in &task.del_effects {
                    del.insert(d);
                    add.remove(&d);
                }
                for &a in &task.add_effects {
                    add.insert(a);
                    del.remove(&a);
                }
            }
            if !executable {
                break;
            }

            let ground_id = next_ground_id(&new_ground_tasks, model);
            let lifted_id = domain.n_primitive + new_lifted_tasks.len();
            let mut args: Vec<ConstId> = Vec::new();
            let mut name = "%aggregate".to_string();
            for &action in segment {
                let task = &model.tasks[action];
                name += &format!("#{}#{}", domain.tasks[usize::from(task.task)].name, task.args.len());
                args.extend(task.args.iter().copied());
            }
            name.push('$');

            new_ground_tasks.push(GroundTask {
                task: TaskId::from(lifted_id),
                preconditions: pre.into_iter().collect(),
                add_effects: add.into_iter().collect(),
                del_effects: del.into_iter().collect(),
                none_of_those_effects: vec![],
                methods: vec![],
                args: args.clone(),
            });
            new_lifted_tasks.push(Task {
                name,
                original_variable_count: args.len(),
                ..Task::default()
            });
            method_subtasks.push(ground_id);
        }

        model.pruned_methods[usize::from(method_id)] = true;
        if !executable {
            debug!(method = usize::from(method_id), "method contains an unexecutable primitive run");
            continue;
        }

        let main_lifted = domain.methods[usize::from(model.methods[method_id].method)].clone();
        let lifted_method = Method {
            name: main_lifted.name.clone(),
            task: main_lifted.task,
            variable_sorts: main_lifted.variable_sorts.clone(),
            task_parameters: main_lifted.task_parameters.clone(),
            subtasks: vec![], // filled after the splice
            orderings: (1..method_subtasks.len()).map(|i| (i - 1, i)).collect(),
            constraints: vec![],
        };

        let ground = &model.methods[method_id];
        pending_methods.push((
            lifted_method,
            GroundMethod {
                method: MethodId::from(0), // assigned below
                args: ground.args.clone(),
                decomposes: ground.decomposes,
                subtask_ordering: (0..method_subtasks.len()).collect(),
                subtasks: method_subtasks,
            },
        ));
    }

    if new_lifted_tasks.is_empty() && pending_methods.is_empty() {
        return;
    }

    // splice the synthesized primitives between the existing primitives and
    // the abstract tasks; every abstract index shifts up
    let added = new_lifted_tasks.len();
    let abstracts = domain.tasks.split_off(domain.n_primitive);
    domain.tasks.extend(new_lifted_tasks);
    domain.tasks.extend(abstracts);
    domain.n_primitive += added;

    for method in &mut domain.methods {
        method.task = TaskId::from(usize::from(method.task) + added);
        for subtask in &mut method.subtasks {
            if usize::from(subtask.task) >= domain.n_primitive - added {
                subtask.task = TaskId::from(usize::from(subtask.task) + added);
            }
        }
    }

    for task in &mut model.tasks {
        if usize::from(task.task) >= domain.n_primitive - added {
            task.task = TaskId::from(usize::from(task.task) + added);
        }
    }
    for task in new_ground_tasks {
        model.tasks.push(task);
        model.pruned_tasks.push(false);
    }
    if let Some(top) = problem.initial_abstract_task {
        problem.initial_abstract_task = Some(TaskId::from(usize::from(top) + added));
    }

    for (mut lifted, mut ground) in pending_methods {
        lifted.task = TaskId::from(usize::from(lifted.task) + added);
        lifted.subtasks = ground
            .subtasks
            .iter()
            .map(|&s| Subtask {
                task: model.tasks[s].task,
                args: Default::default(),
            })
            .collect();
        ground.method = MethodId::from(domain.methods.len());
        domain.methods.push(lifted);

        let id = GroundMethodId::from(model.methods.len());
        model.tasks[ground.decomposes].methods.push(id);
        model.methods.push(ground);
        model.pruned_methods.push(false);
    }
}

/// Splits methods with three or more (totally ordered) subtasks into a
/// chain of fresh abstract intermediates with two subtasks each.
pub fn regularize_to_two_subtasks(domain: &mut Domain, model: &mut GroundModel) {
    for method_id in model.method_ids() {
        if model.pruned_methods[method_id] || model.methods[method_id].subtasks.len() <= 2 {
            continue;
        }

        model.pruned_methods[usize::from(method_id)] = true;
        let main = model.methods[method_id].clone();
        let main_lifted = domain.methods[usize::from(main.method)].clone();
        let n = main.subtasks.len();

        let mut current_at = main.decomposes;
        for step in 0..n - 2 {
            // fresh intermediate abstract task
            let lifted_task_id = TaskId::from(domain.tasks.len());
            domain.tasks.push(Task {
                name: format!("_!_intermediate_task_method_{}_{}", usize::from(method_id), step),
                ..Task::default()
            });
            let intermediate = GroundTaskId::from(model.tasks.len());
            model.tasks.push(GroundTask {
                task: lifted_task_id,
                args: vec![],
                preconditions: vec![],
                add_effects: vec![],
                del_effects: vec![],
                none_of_those_effects: vec![],
                methods: vec![],
            });
            model.pruned_tasks.push(false);

            let subtask = main.subtasks[main.subtask_ordering[step]];
            let lifted_method_id = MethodId::from(domain.methods.len());
            domain.methods.push(Method {
                name: if step == 0 {
                    main_lifted.name.clone()
                } else {
                    format!("{}_{}", main_lifted.name, step)
                },
                task: model.tasks[current_at].task,
                variable_sorts: main_lifted.variable_sorts.clone(),
                task_parameters: if step == 0 {
                    main_lifted.task_parameters.clone()
                } else {
                    vec![]
                },
                subtasks: vec![
                    Subtask {
                        task: model.tasks[subtask].task,
                        args: Default::default(),
                    },
                    Subtask {
                        task: lifted_task_id,
                        args: Default::default(),
                    },
                ],
                orderings: vec![(0, 1)],
                constraints: vec![],
            });

            let ground_method_id = GroundMethodId::from(model.methods.len());
            model.methods.push(GroundMethod {
                method: lifted_method_id,
                args: main.args.clone(),
                decomposes: current_at,
                subtasks: vec![subtask, intermediate],
                subtask_ordering: vec![0, 1],
            });
            model.pruned_methods.push(false);
            model.tasks[current_at].methods.push(ground_method_id);

            current_at = intermediate;
        }

        // the final link holds the last two subtasks
        let s1 = main.subtasks[main.subtask_ordering[n - 2]];
        let s2 = main.subtasks[main.subtask_ordering[n - 1]];
        let lifted_method_id = MethodId::from(domain.methods.len());
        domain.methods.push(Method {
            name: format!("{}_{}", main_lifted.name, n - 2),
            task: model.tasks[current_at].task,
            variable_sorts: main_lifted.variable_sorts.clone(),
            task_parameters: vec![],
            subtasks: vec![
                Subtask {
                    task: model.tasks[s1].task,
                    args: Default::default(),
                },
                Subtask {
                    task: model.tasks[s2].task,
                    args: Default::default(),
                },
            ],
            orderings: vec![(0, 1)],
            constraints: vec![],
        });
        let ground_method_id = GroundMethodId::from(model.methods.len());
        model.methods.push(GroundMethod {
            method: lifted_method_id,
            args: main.args.clone(),
            decomposes: current_at,
            subtasks: vec![s1, s2],
            subtask_ordering: vec![0, 1],
        });
        model.pruned_methods.push(false);
        model.tasks[current_at].methods.push(ground_method_id);
    }

    // the fresh intermediates are abstract tasks appended at the very end
    // of the task list, so no renumbering is needed
}

/// Runs the enabled simplification passes in their fixed order. Returns
/// whether a pass changed reachability (compaction does), in which case the
/// caller must re-run grounded reachability.
pub fn postprocess_grounding(
    domain: &mut Domain,
    problem: &mut Problem,
    model: &mut GroundModel,
    config: &GroundingConfig,
) -> Result<bool> {
    sort_subtasks_topologically(domain, model);

    let mut reachability_necessary = false;
    if config.remove_useless_predicates {
        debug!("removing useless facts");
        remove_useless_facts(domain, problem, model)?;
    }
    if config.prune_empty_method_preconditions {
        debug!("removing empty method precondition actions");
        remove_empty_method_preconditions(domain, model);
    }
    // must run late: it rewrites the names that encode plan reconstruction
    if config.expand_choiceless_abstract_tasks {
        debug!("expanding abstract tasks with a single method");
        expand_choiceless_abstract_tasks(domain, problem, model, config.keep_two_regularisation);
    }
    if config.compact_consecutive_primitives {
        debug!("compacting consecutive primitives");
        compact_consecutive_primitives(domain, problem, model);
        reachability_necessary = true;
    }
    if config.at_most_two_tasks_per_method {
        debug!("regularizing methods to at most two subtasks");
        regularize_to_two_subtasks(domain, model);
    }
    Ok(reachability_necessary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use grounder_collections::ref_store::RefPool;
    use smallvec::smallvec;

    #[test]
    fn topological_order_respects_constraints() {
        assert_eq!(topological_order(3, &[(2, 1), (1, 0)]), vec![2, 1, 0]);
        // unordered vertices come out in index order
        assert_eq!(topological_order(3, &[(2, 0)]), vec![1, 2, 0]);
    }

    fn two_fact_model() -> (Domain, GroundModel) {
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
        let minus_q = domain.predicates.push(Predicate {
            name: "-q".to_string(),
            argument_sorts: vec![t],
            guard_for_conditional_effect: false,
        });
        domain.n_primitive = 1;
        domain.tasks.push(Task {
            name: "act".to_string(),
            variable_sorts: vec![t],
            original_variable_count: 1,
            ..Task::default()
        });

        let mut facts: RefPool<FactId, Fact> = RefPool::default();
        facts.intern(Fact {
            predicate: p,
            args: smallvec![a],
        });
        facts.intern(Fact {
            predicate: minus_q,
            args: smallvec![a],
        });
        let model = GroundModel {
            facts,
            tasks: vec![GroundTask {
                task: TaskId::from_u32(0),
                args: vec![a],
                // both facts added and deleted at once
                preconditions: vec![],
                add_effects: vec![FactId::from_u32(0), FactId::from_u32(1)],
                del_effects: vec![FactId::from_u32(0), FactId::from_u32(1)],
                none_of_those_effects: vec![],
                methods: vec![],
            }],
            methods: vec![],
            pruned_facts: vec![false, false],
            pruned_tasks: vec![false],
            pruned_methods: vec![],
        };
        (domain, model)
    }

    #[test]
    fn effect_priority_keeps_add_except_for_negated_predicates() {
        let (domain, mut model) = two_fact_model();
        apply_effect_priority(&domain, &mut model).unwrap();
        let task = &model.tasks[0];
        // p: add wins; -q: delete wins
        assert_eq!(task.add_effects, vec![FactId::from_u32(0)]);
        assert_eq!(task.del_effects, vec![FactId::from_u32(1)]);
    }

    #[test]
    fn effect_priority_is_idempotent() {
        let (domain, mut model) = two_fact_model();
        apply_effect_priority(&domain, &mut model).unwrap();
        let snapshot = model.tasks.clone();
        apply_effect_priority(&domain, &mut model).unwrap();
        for (before, after) in snapshot.iter().zip(&model.tasks) {
            assert_eq!(before.add_effects, after.add_effects);
            assert_eq!(before.del_effects, after.del_effects);
        }
    }

    /// Abstract A with a single method A -> [B, C]; a parent method contains
    /// A; after inlining the parent contains B and C directly and the new
    /// name encodes the substitution.
    #[test]
    fn choiceless_abstract_task_is_inlined() {
        let mut domain = Domain::default();
        domain.n_primitive = 2;
        domain.tasks.push(Task {
            name: "B".to_string(),
            ..Task::default()
        });
        domain.tasks.push(Task {
            name: "C".to_string(),
            ..Task::default()
        });
        domain.tasks.push(Task {
            name: "A".to_string(),
            ..Task::default()
        }); // task 2, abstract
        domain.tasks.push(Task {
            name: "top".to_string(),
            ..Task::default()
        }); // task 3, abstract, initial
        domain.methods.push(Method {
            name: "m_A".to_string(),
            task: TaskId::from_u32(2),
            variable_sorts: vec![],
            task_parameters: vec![],
            subtasks: vec![
                Subtask {
                    task: TaskId::from_u32(0),
                    args: smallvec![],
                },
                Subtask {
                    task: TaskId::from_u32(1),
                    args: smallvec![],
                },
            ],
            orderings: vec![(0, 1)],
            constraints: vec![],
        });
        domain.methods.push(Method {
            name: "m_top".to_string(),
            task: TaskId::from_u32(3),
            variable_sorts: vec![],
            task_parameters: vec![],
            subtasks: vec![Subtask {
                task: TaskId::from_u32(2),
                args: smallvec![],
            }],
            orderings: vec![],
            constraints: vec![],
        });

        let ground_task = |task: u32| GroundTask {
            task: TaskId::from_u32(task),
            args: vec![],
            preconditions: vec![],
            add_effects: vec![],
            del_effects: vec![],
            none_of_those_effects: vec![],
            methods: vec![],
        };
        let mut model = GroundModel {
            facts: RefPool::default(),
            tasks: vec![ground_task(0), ground_task(1), ground_task(2), ground_task(3)],
            methods: vec![
                GroundMethod {
                    method: MethodId::from_u32(0),
                    args: vec![],
                    decomposes: GroundTaskId::from_u32(2),
                    subtasks: vec![GroundTaskId::from_u32(0), GroundTaskId::from_u32(1)],
                    subtask_ordering: vec![],
                },
                GroundMethod {
                    method: MethodId::from_u32(1),
                    args: vec![],
                    decomposes: GroundTaskId::from_u32(3),
                    subtasks: vec![GroundTaskId::from_u32(2)],
                    subtask_ordering: vec![],
                },
            ],
            pruned_facts: vec![],
            pruned_tasks: vec![false; 4],
            pruned_methods: vec![false; 2],
        };
        model.tasks[2].methods.push(GroundMethodId::from_u32(0));
        model.tasks[3].methods.push(GroundMethodId::from_u32(1));

        let problem = Problem {
            initial_abstract_task: Some(TaskId::from_u32(3)),
            ..Problem::default()
        };

        sort_subtasks_topologically(&domain, &mut model);
        expand_choiceless_abstract_tasks(&mut domain, &problem, &mut model, false);

        // A and its unit method are gone
        assert!(model.pruned_tasks[2]);
        assert!(model.pruned_methods[0]);
        // the parent method now decomposes top into [B, C] in order
        let parent = &model.methods[1];
        assert_eq!(
            parent.subtasks,
            vec![GroundTaskId::from_u32(0), GroundTaskId::from_u32(1)]
        );
        let ordered: Vec<GroundTaskId> = parent
            .subtask_ordering
            .iter()
            .map(|&i| parent.subtasks[i])
            .collect();
        assert_eq!(ordered, vec![GroundTaskId::from_u32(0), GroundTaskId::from_u32(1)]);
        // the rewritten name records outer method, task and inner method
        let name = &domain.methods[usize::from(parent.method)].name;
        assert!(name.starts_with("<m_top;A[];m_A;"), "unexpected name {name}");
    }

    /// Static facts and facts in no precondition disappear from the model.
    #[test]
    fn useless_facts_are_pruned() {
        let (domain, mut model) = two_fact_model();
        // rebuild: fact 0 is a static precondition, fact 1 an unused effect
        model.tasks[0].preconditions = vec![FactId::from_u32(0)];
        model.tasks[0].add_effects = vec![FactId::from_u32(1)];
        model.tasks[0].del_effects = vec![];
        let mut problem = Problem::default();
        problem.init.push(model.facts[FactId::from_u32(0)].clone());

        remove_useless_facts(&domain, &problem, &mut model).unwrap();
        assert!(model.pruned_facts[0], "static fact must be pruned");
        assert!(model.pruned_facts[1], "fact used in no precondition must be pruned");
    }
}
