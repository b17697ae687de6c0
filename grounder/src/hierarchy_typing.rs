//! Hierarchy typing: propagation of possible constants down the task
//! hierarchy.
//!
//! Starting from the initial abstract task, a depth-first search follows
//! every decomposition method, intersecting the constants allowed by each
//! variable's sort with the constants propagated from the parent task and
//! with the variable constraints. The resulting per-variable sets soundly
//! over-approximate the argument vectors that can appear anywhere in the
//! decomposition tree, and are used by the planning graph to discard
//! groundings early.

use crate::given_plan::GivenPlanTyping;
use crate::model::*;
use std::collections::{BTreeSet, HashMap};
use tracing::debug;

/// One possible-constants tuple: a set of allowed constants per variable.
pub type PossibleConstants = Vec<BTreeSet<ConstId>>;

/// Partial assignment of an operator's variables, as built up by the
/// precondition matcher.
#[derive(Clone, Debug)]
pub struct VariableAssignment {
    slots: Vec<Option<ConstId>>,
    assigned: usize,
}

impl VariableAssignment {
    pub fn new(n_variables: usize) -> Self {
        VariableAssignment {
            slots: vec![None; n_variables],
            assigned: 0,
        }
    }

    pub fn get(&self, var: usize) -> Option<ConstId> {
        self.slots[var]
    }

    pub fn is_assigned(&self, var: usize) -> bool {
        self.slots[var].is_some()
    }

    pub fn assign(&mut self, var: usize, value: ConstId) {
        if self.slots[var].replace(value).is_none() {
            self.assigned += 1;
        }
    }

    pub fn unassign(&mut self, var: usize) {
        if self.slots[var].take().is_some() {
            self.assigned -= 1;
        }
    }

    /// Number of variables holding a value.
    pub fn assigned_count(&self) -> usize {
        self.assigned
    }

    /// Total number of variables.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn slots(&self) -> &[Option<ConstId>] {
        &self.slots
    }

    /// The completed assignment; panics if a variable is still open.
    pub fn unwrap_all(&self) -> Vec<ConstId> {
        self.slots.iter().map(|s| s.expect("unassigned variable")).collect()
    }
}

/// Applies variable constraints to a tuple until a fixpoint is reached.
///
/// Equality constraints intersect both variables' sets. An inequality
/// removes the single allowed value of one variable from the other's set.
fn apply_constraints(possible: &mut PossibleConstants, constraints: &[VariableConstraint]) {
    let mut changed = true;
    while changed {
        changed = false;
        for constraint in constraints {
            match constraint.kind {
                ConstraintKind::Equal => {
                    let intersection: BTreeSet<ConstId> = possible[constraint.var1]
                        .intersection(&possible[constraint.var2])
                        .copied()
                        .collect();
                    if intersection.len() < possible[constraint.var1].len()
                        || intersection.len() < possible[constraint.var2].len()
                    {
                        changed = true;
                    }
                    possible[constraint.var1] = intersection.clone();
                    possible[constraint.var2] = intersection;
                }
                ConstraintKind::NotEqual => {
                    for (a, b) in [
                        (constraint.var1, constraint.var2),
                        (constraint.var2, constraint.var1),
                    ] {
                        if possible[a].len() == 1 {
                            let only = *possible[a].iter().next().unwrap();
                            if possible[b].remove(&only) {
                                changed = true;
                            }
                        }
                    }
                }
            }
        }
    }
}

/// Index from (variable, value) to the tuples containing the value, per
/// entity. Buckets are used to pick the cheapest variable when answering
/// compatibility queries.
type SplitIndex = Vec<Vec<HashMap<ConstId, Vec<usize>>>>;

pub struct HierarchyTyping {
    possible_per_task: Vec<Vec<PossibleConstants>>,
    possible_per_method: Vec<Vec<PossibleConstants>>,
    task_index: SplitIndex,
    method_index: SplitIndex,
    /// Accept an incoming tuple as visited when it is included in a stored
    /// one (instead of requiring equality).
    prune_if_included: bool,
    given: Option<GivenPlanTyping>,
}

struct StaticFilter {
    /// Predicates never added or deleted by any primitive.
    static_predicates: Vec<bool>,
    /// predicate -> argument position -> value -> indices into problem.init
    facts_by_argument: Vec<Vec<HashMap<ConstId, Vec<usize>>>>,
}

impl StaticFilter {
    fn new(domain: &Domain, problem: &Problem) -> Self {
        let mut static_predicates = vec![true; domain.predicates.len()];
        for task in &domain.tasks[..domain.n_primitive] {
            for eff in task.add_effects.iter().chain(&task.del_effects) {
                static_predicates[usize::from(eff.predicate)] = false;
            }
            for ce in task.conditional_add.iter().chain(&task.conditional_del) {
                static_predicates[usize::from(ce.effect.predicate)] = false;
            }
        }

        let mut facts_by_argument: Vec<Vec<HashMap<ConstId, Vec<usize>>>> = domain
            .predicates
            .values()
            .map(|p| vec![HashMap::new(); p.argument_sorts.len()])
            .collect();
        for (fact_idx, fact) in problem.init.iter().enumerate() {
            if !static_predicates[usize::from(fact.predicate)] {
                continue;
            }
            for (pos, &value) in fact.args.iter().enumerate() {
                facts_by_argument[usize::from(fact.predicate)][pos]
                    .entry(value)
                    .or_default()
                    .push(fact_idx);
            }
        }
        StaticFilter {
            static_predicates,
            facts_by_argument,
        }
    }

    /// Tightens the method constants along a static precondition of
    /// `subtask`: only init facts consistent with the current sets can
    /// support it, so each involved variable shrinks to the values those
    /// facts actually use.
    fn tighten(
        &self,
        problem: &Problem,
        method_constants: &mut PossibleConstants,
        subtask: &Subtask,
        precondition: &Atom,
    ) {
        let arguments = &precondition.args;
        if arguments.is_empty() {
            return;
        }
        let method_var = |pos: usize| subtask.args[arguments[pos]];

        // branch over the argument position with the fewest candidates
        let seed = (0..arguments.len())
            .min_by_key(|&pos| method_constants[method_var(pos)].len())
            .unwrap();

        let mut supported: PossibleConstants = vec![BTreeSet::new(); arguments.len()];
        for value in &method_constants[method_var(seed)] {
            let Some(facts) = self.facts_by_argument[usize::from(precondition.predicate)][seed].get(value) else {
                continue;
            };
            for &fact_idx in facts {
                let fact = &problem.init[fact_idx];
                let possible = (0..arguments.len())
                    .all(|pos| method_constants[method_var(pos)].contains(&fact.args[pos]));
                if possible {
                    for pos in 0..arguments.len() {
                        supported[pos].insert(fact.args[pos]);
                    }
                }
            }
        }

        for pos in 0..arguments.len() {
            let var = method_var(pos);
            if method_constants[var].len() == supported[pos].len() {
                continue; // nothing to prune at this position
            }
            method_constants[var] = method_constants[var]
                .intersection(&supported[pos])
                .copied()
                .collect();
        }
    }
}

impl HierarchyTyping {
    /// Computes the hierarchy typing by DFS from the initial abstract task.
    ///
    /// An empty tuple list for the initial task means the instance has no
    /// decomposition at all and is unsolvable.
    pub fn new(
        domain: &Domain,
        problem: &Problem,
        with_static_precondition_checking: bool,
        prune_if_included: bool,
        given: Option<GivenPlanTyping>,
    ) -> Self {
        let top = problem
            .initial_abstract_task
            .expect("hierarchy typing requires an initial abstract task");

        let mut ht = HierarchyTyping {
            possible_per_task: vec![Vec::new(); domain.tasks.len()],
            possible_per_method: vec![Vec::new(); domain.methods.len()],
            task_index: Vec::new(),
            method_index: Vec::new(),
            prune_if_included,
            given,
        };
        let filter = with_static_precondition_checking.then(|| StaticFilter::new(domain, problem));

        let top_task = &domain.tasks[usize::from(top)];
        let mut possible: PossibleConstants = top_task
            .variable_sorts
            .iter()
            .map(|&s| domain.sorts[s].members.clone())
            .collect();
        apply_constraints(&mut possible, &top_task.constraints);
        ht.task_dfs(domain, problem, filter.as_ref(), top, possible);

        ht.task_index = Self::build_index(&ht.possible_per_task, |t| domain.tasks[t].variable_sorts.len());
        ht.method_index =
            Self::build_index(&ht.possible_per_method, |m| domain.methods[m].variable_sorts.len());

        debug!(
            task_tuples = ht.possible_per_task.iter().map(Vec::len).sum::<usize>(),
            method_tuples = ht.possible_per_method.iter().map(Vec::len).sum::<usize>(),
            "hierarchy typing computed"
        );
        ht
    }

    fn build_index(per_entity: &[Vec<PossibleConstants>], arity: impl Fn(usize) -> usize) -> SplitIndex {
        per_entity
            .iter()
            .enumerate()
            .map(|(entity, tuples)| {
                let mut index = vec![HashMap::<ConstId, Vec<usize>>::new(); arity(entity)];
                for (tuple_id, tuple) in tuples.iter().enumerate() {
                    for (var, values) in tuple.iter().enumerate() {
                        for &value in values {
                            index[var].entry(value).or_default().push(tuple_id);
                        }
                    }
                }
                index
            })
            .collect()
    }

    fn already_visited(&self, task: TaskId, possible: &PossibleConstants) -> bool {
        self.possible_per_task[usize::from(task)].iter().any(|stored| {
            stored.iter().zip(possible).all(|(stored_vals, new_vals)| {
                if self.prune_if_included {
                    new_vals.is_subset(stored_vals)
                } else {
                    stored_vals == new_vals
                }
            })
        })
    }

    fn task_dfs(
        &mut self,
        domain: &Domain,
        problem: &Problem,
        filter: Option<&StaticFilter>,
        task_id: TaskId,
        possible: PossibleConstants,
    ) {
        if self.already_visited(task_id, &possible) {
            return;
        }
        self.possible_per_task[usize::from(task_id)].push(possible.clone());

        let task = &domain.tasks[usize::from(task_id)];
        for &method_id in &task.methods {
            let method = &domain.methods[usize::from(method_id)];

            // start from the full sorts, restricted by the parent's parameters
            let mut method_constants: PossibleConstants = method
                .variable_sorts
                .iter()
                .map(|&s| domain.sorts[s].members.clone())
                .collect();
            for (task_var, &method_var) in method.task_parameters.iter().enumerate() {
                method_constants[method_var] = method_constants[method_var]
                    .intersection(&possible[task_var])
                    .copied()
                    .collect();
            }

            if let Some(filter) = filter {
                for subtask in &method.subtasks {
                    if !domain.is_primitive(subtask.task) {
                        continue;
                    }
                    for precondition in &domain.tasks[usize::from(subtask.task)].preconditions {
                        if filter.static_predicates[usize::from(precondition.predicate)] {
                            filter.tighten(problem, &mut method_constants, subtask, precondition);
                        }
                    }
                }
            }

            apply_constraints(&mut method_constants, &method.constraints);

            if method_constants.iter().any(BTreeSet::is_empty) {
                continue; // method cannot be instantiated under this tuple
            }
            self.possible_per_method[usize::from(method_id)].push(method_constants.clone());

            for subtask in &method.subtasks {
                let mut subtask_constants: PossibleConstants = subtask
                    .args
                    .iter()
                    .map(|&method_var| method_constants[method_var].clone())
                    .collect();
                apply_constraints(
                    &mut subtask_constants,
                    &domain.tasks[usize::from(subtask.task)].constraints,
                );
                self.task_dfs(domain, problem, filter, subtask.task, subtask_constants);
            }
        }
    }

    /// `true` iff the initial abstract task admits no tuple at all.
    pub fn initial_task_impossible(&self, problem: &Problem) -> bool {
        problem
            .initial_abstract_task
            .map(|top| self.possible_per_task[usize::from(top)].is_empty())
            .unwrap_or(false)
    }

    fn compatible(
        tuples: &[PossibleConstants],
        index: &[HashMap<ConstId, Vec<usize>>],
        assignment: &VariableAssignment,
    ) -> bool {
        // pick the assigned variable with the smallest bucket
        let mut best: Option<&Vec<usize>> = None;
        for var in 0..assignment.len() {
            let Some(value) = assignment.get(var) else { continue };
            let Some(bucket) = index[var].get(&value) else {
                return false; // value appears in no tuple at all
            };
            if best.map(|b| b.len() > bucket.len()).unwrap_or(true) {
                best = Some(bucket);
            }
        }
        match best {
            Some(bucket) => bucket.iter().any(|&tuple_id| {
                tuples[tuple_id]
                    .iter()
                    .enumerate()
                    .all(|(var, values)| match assignment.get(var) {
                        Some(value) => values.contains(&value),
                        None => true,
                    })
            }),
            // nothing constrained yet
            None if assignment.len() > 0 => true,
            None => !tuples.is_empty(),
        }
    }

    /// Whether a (partial) assignment of a task's variables is compatible
    /// with at least one stored tuple.
    pub fn task_compatible(&self, domain: &Domain, task: TaskId, assignment: &VariableAssignment) -> bool {
        if domain.tasks[usize::from(task)].compiled_conditional_effect {
            // conditional-effect actions are kept whenever their base action
            // passed the check
            return true;
        }
        if let Some(given) = &self.given {
            if !given.compatible(task, assignment.slots()) {
                return false;
            }
        }
        Self::compatible(
            &self.possible_per_task[usize::from(task)],
            &self.task_index[usize::from(task)],
            assignment,
        )
    }

    /// Whether a (partial) assignment of a method's variables is compatible
    /// with at least one stored tuple.
    pub fn method_compatible(&self, method: MethodId, assignment: &VariableAssignment) -> bool {
        Self::compatible(
            &self.possible_per_method[usize::from(method)],
            &self.method_index[usize::from(method)],
            assignment,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smallvec::smallvec;

    /// Domain: sorts T={a,b}, primitive `move(x,y: T)` with x != y, abstract
    /// `top` with one method decomposing into `move(m0, m1)` where m0 is
    /// bound to the task parameter.
    fn hierarchical_domain() -> (Domain, Problem) {
        let mut domain = Domain::default();
        let a = domain.constants.push("a".to_string());
        let b = domain.constants.push("b".to_string());
        let t = domain.sorts.push(Sort {
            name: "T".to_string(),
            members: [a, b].into_iter().collect(),
        });
        domain.predicates.push(Predicate {
            name: "p".to_string(),
            argument_sorts: vec![t],
            guard_for_conditional_effect: false,
        });
        domain.n_primitive = 1;
        domain.tasks.push(Task {
            name: "move".to_string(),
            variable_sorts: vec![t, t],
            original_variable_count: 2,
            constraints: vec![VariableConstraint {
                kind: ConstraintKind::NotEqual,
                var1: 0,
                var2: 1,
            }],
            ..Task::default()
        });
        domain.tasks.push(Task {
            name: "top".to_string(),
            variable_sorts: vec![t],
            original_variable_count: 1,
            methods: vec![MethodId::from_u32(0)],
            ..Task::default()
        });
        domain.methods.push(Method {
            name: "m".to_string(),
            task: TaskId::from_u32(1),
            variable_sorts: vec![t, t],
            task_parameters: vec![0],
            subtasks: vec![Subtask {
                task: TaskId::from_u32(0),
                args: smallvec![0, 1],
            }],
            orderings: vec![],
            constraints: vec![],
        });

        let mut problem = Problem::default();
        problem.initial_abstract_task = Some(TaskId::from_u32(1));
        (domain, problem)
    }

    #[test]
    fn reachable_values_are_compatible() {
        let (mut domain, problem) = hierarchical_domain();
        // a constant outside T never shows up in any tuple
        let stray = domain.constants.push("stray".to_string());

        let ht = HierarchyTyping::new(&domain, &problem, false, true, None);
        assert!(!ht.initial_task_impossible(&problem));

        let move_task = TaskId::from_u32(0);
        let mut assignment = VariableAssignment::new(2);
        assert!(ht.task_compatible(&domain, move_task, &assignment));
        assignment.assign(0, ConstId::from_u32(0));
        assert!(ht.task_compatible(&domain, move_task, &assignment));
        assignment.unassign(0);
        assignment.assign(0, stray);
        assert!(!ht.task_compatible(&domain, move_task, &assignment));
    }

    #[test]
    fn static_preconditions_restrict_methods() {
        let (mut domain, mut problem) = hierarchical_domain();
        // give `move` a static precondition p(x) and only p(a) in init
        domain.tasks[0].preconditions.push(Atom {
            predicate: PredId::from_u32(0),
            args: smallvec![0],
        });
        problem.init.push(Fact {
            predicate: PredId::from_u32(0),
            args: smallvec![ConstId::from_u32(0)],
        });

        let ht = HierarchyTyping::new(&domain, &problem, true, true, None);
        let move_task = TaskId::from_u32(0);
        let mut assignment = VariableAssignment::new(2);
        assignment.assign(0, ConstId::from_u32(1)); // b: no init fact supports it
        assert!(!ht.task_compatible(&domain, move_task, &assignment));
        assignment.unassign(0);
        assignment.assign(0, ConstId::from_u32(0));
        assert!(ht.task_compatible(&domain, move_task, &assignment));
    }
}
