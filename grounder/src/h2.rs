//! Embedded h² mutex analysis.
//!
//! The ground model is re-encoded as a temporary SAS+ task (one multi-valued
//! variable per SAS+ group, including its "none-of-them" value where
//! needed, plus a fake-goal variable for hierarchical instances whose
//! operators all achieve it). Forward h² reachability then computes which
//! single facts and fact pairs are reachable; unreachable pairs of reachable
//! facts are mutexes, unreachable facts and inapplicable operators are
//! pruned. Pairs involving a "none-of-them" value are returned as
//! disjunctive invariants instead.
//!
//! The computation is capped by a wall-clock limit; on timeout no
//! information is reported, which is always sound.

use crate::invariants::SasGroups;
use crate::model::*;
use env_param::EnvParam;
use fixedbitset::FixedBitSet;
use grounder_collections::ref_store::RefMap;
use std::collections::{BTreeSet, HashSet};
use std::time::Instant;
use tracing::{debug, info};

/// Wall-clock cap on the h² fixpoint, in seconds.
static H2_TIME_LIMIT: EnvParam<u64> = EnvParam::new("GROUNDER_H2_TIME_LIMIT_SECONDS", "10");

/// A literal of a disjunctive invariant: one of the listed facts holds
/// (positive) or a fact does not hold (negative).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum InvariantLiteral {
    Pos(FactId),
    Neg(FactId),
}

pub struct H2Result {
    pub goal_reachable: bool,
    /// Binary mutexes between real facts.
    pub mutexes: Vec<BTreeSet<FactId>>,
    /// Disjunctive invariants from mutexes involving a "none-of-them" value.
    pub invariants: Vec<Vec<InvariantLiteral>>,
    /// Whether any fact or operator was pruned.
    pub changed_pruning: bool,
}

/// One value of the temporary encoding.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Value {
    Fact(FactId),
    /// "none-of-them" of the given SAS+ group.
    NoneOfThem(usize),
    Goal,
    NotGoal,
}

struct Encoding {
    /// Global value index -> semantic value.
    values: Vec<Value>,
    /// Global value index -> variable index.
    var_of: Vec<usize>,
    /// Per fact, its global value index.
    value_of_fact: RefMap<FactId, usize>,
    /// Per variable, its value range in global indexing.
    var_ranges: Vec<(usize, usize)>,
    init: Vec<usize>,
    goals: Vec<usize>,
}

struct Operator {
    task: GroundTaskId,
    /// Required but untouched values.
    prevail: Vec<usize>,
    /// (variable, required value if any, produced value).
    pre_post: Vec<(usize, Option<usize>, usize)>,
}

fn build_encoding(
    problem: &Problem,
    model: &GroundModel,
    groups: &SasGroups,
    sas_needs_none_of_them: &[bool],
) -> Option<Encoding> {
    let mut values = Vec::new();
    let mut var_of = Vec::new();
    let mut value_of_fact: RefMap<FactId, usize> = RefMap::default();
    let mut var_ranges = Vec::new();
    let mut init = Vec::new();
    let mut goals = Vec::new();

    let init_facts: HashSet<FactId> = problem.init.iter().filter_map(|f| model.fact_id(f)).collect();
    let goal_facts: HashSet<FactId> = problem.goal.iter().filter_map(|f| model.fact_id(f)).collect();

    for (group_idx, group) in groups.sas_groups.iter().enumerate() {
        let var = var_ranges.len();
        let start = values.len();
        let mut init_value = None;
        for &fact in group {
            debug_assert!(!model.pruned_facts[fact]);
            value_of_fact.insert(fact, values.len());
            if init_facts.contains(&fact) {
                init_value = Some(values.len());
            }
            if goal_facts.contains(&fact) {
                goals.push(values.len());
            }
            values.push(Value::Fact(fact));
            var_of.push(var);
        }
        if sas_needs_none_of_them[group_idx] {
            if init_value.is_none() {
                init_value = Some(values.len());
            }
            values.push(Value::NoneOfThem(group_idx));
            var_of.push(var);
        }
        // each group holds exactly one value initially
        init.push(init_value?);
        var_ranges.push((start, values.len()));
    }

    if problem.initial_abstract_task.is_some() {
        let var = var_ranges.len();
        let start = values.len();
        values.push(Value::Goal);
        values.push(Value::NotGoal);
        var_of.push(var);
        var_of.push(var);
        goals.push(start);
        init.push(start + 1);
        var_ranges.push((start, start + 2));
    }

    Some(Encoding {
        values,
        var_of,
        value_of_fact,
        var_ranges,
        init,
        goals,
    })
}

fn build_operators(domain: &Domain, problem: &Problem, model: &GroundModel, encoding: &Encoding) -> Vec<Operator> {
    let mut operators = Vec::new();
    for task_id in model.live_primitives(domain) {
        let task = &model.tasks[task_id];

        let mut pre: Vec<(usize, usize)> = Vec::new();
        for &fact in &task.preconditions {
            if model.pruned_facts[fact] {
                continue;
            }
            if let Some(&value) = encoding.value_of_fact.get(fact) {
                pre.push((encoding.var_of[value], value));
            }
        }
        let mut add: Vec<(usize, usize)> = Vec::new();
        for &fact in &task.add_effects {
            if model.pruned_facts[fact] {
                continue;
            }
            if let Some(&value) = encoding.value_of_fact.get(fact) {
                add.push((encoding.var_of[value], value));
            }
        }
        for &group in &task.none_of_those_effects {
            let (_, end) = encoding.var_ranges[group];
            // the group's last value is its "none-of-them"
            add.push((group, end - 1));
        }

        let written: HashSet<usize> = add.iter().map(|&(var, _)| var).collect();
        let mut prevail = Vec::new();
        let mut pre_post: Vec<(usize, Option<usize>, usize)> = Vec::new();
        for &(var, value) in &pre {
            if !written.contains(&var) {
                prevail.push(value);
            }
        }
        for &(var, value) in &add {
            let required = pre.iter().find(|&&(v, _)| v == var).map(|&(_, p)| p);
            pre_post.push((var, required, value));
        }
        if problem.initial_abstract_task.is_some() {
            let goal_var = encoding.var_ranges.len() - 1;
            let (start, _) = encoding.var_ranges[goal_var];
            pre_post.push((goal_var, None, start));
        }

        operators.push(Operator {
            task: task_id,
            prevail,
            pre_post,
        });
    }
    operators
}

struct PairReachability {
    n: usize,
    single: FixedBitSet,
    pairs: FixedBitSet,
}

impl PairReachability {
    fn new(n: usize) -> Self {
        PairReachability {
            n,
            single: FixedBitSet::with_capacity(n),
            pairs: FixedBitSet::with_capacity(n * n),
        }
    }

    fn mark_single(&mut self, f: usize) -> bool {
        let fresh = !self.single.contains(f);
        self.single.insert(f);
        fresh
    }

    fn mark_pair(&mut self, f: usize, g: usize) -> bool {
        if f == g {
            return self.mark_single(f);
        }
        let (a, b) = (f.min(g), f.max(g));
        let idx = a * self.n + b;
        let fresh = !self.pairs.contains(idx);
        self.pairs.insert(idx);
        fresh
    }

    fn single(&self, f: usize) -> bool {
        self.single.contains(f)
    }

    fn pair(&self, f: usize, g: usize) -> bool {
        if f == g {
            return self.single(f);
        }
        let (a, b) = (f.min(g), f.max(g));
        self.pairs.contains(a * self.n + b)
    }

    fn set_reachable(&self, set: &[usize]) -> bool {
        set.iter().all(|&f| self.single(f))
            && set
                .iter()
                .enumerate()
                .all(|(i, &f)| set[i + 1..].iter().all(|&g| self.pair(f, g)))
    }
}

/// Runs h² mutex analysis on the current ground model. Prunes facts and
/// primitives found unreachable; the caller must re-run grounded
/// reachability when `changed_pruning` is set.
pub fn compute_h2_mutexes(
    domain: &Domain,
    problem: &Problem,
    model: &mut GroundModel,
    groups: &SasGroups,
    sas_needs_none_of_them: &[bool],
) -> H2Result {
    let no_information = H2Result {
        goal_reachable: true,
        mutexes: Vec::new(),
        invariants: Vec::new(),
        changed_pruning: false,
    };

    let Some(encoding) = build_encoding(problem, model, groups, sas_needs_none_of_them) else {
        // a group without an initial value means the invariant analysis has
        // not run; nothing to do
        return no_information;
    };
    let operators = build_operators(domain, problem, model, &encoding);
    let n = encoding.values.len();
    debug!(values = n, operators = operators.len(), "h2 encoding built");

    let deadline = Instant::now() + std::time::Duration::from_secs(H2_TIME_LIMIT.get());
    let mut reach = PairReachability::new(n);
    for (i, &f) in encoding.init.iter().enumerate() {
        reach.mark_single(f);
        for &g in &encoding.init[i + 1..] {
            reach.mark_pair(f, g);
        }
    }

    let mut applicable = vec![false; operators.len()];
    let mut changed = true;
    while changed {
        changed = false;
        if Instant::now() > deadline {
            info!("h2 time limit hit, discarding partial information");
            return no_information;
        }
        for (op_idx, op) in operators.iter().enumerate() {
            let mut pre_set: Vec<usize> = op.prevail.clone();
            pre_set.extend(op.pre_post.iter().filter_map(|&(_, required, _)| required));
            if !reach.set_reachable(&pre_set) {
                continue;
            }
            applicable[op_idx] = true;

            let effects: Vec<usize> = op.pre_post.iter().map(|&(_, _, post)| post).collect();
            let touched: HashSet<usize> = op.pre_post.iter().map(|&(var, _, _)| var).collect();

            for (i, &e) in effects.iter().enumerate() {
                changed |= reach.mark_single(e);
                for &e2 in &effects[i + 1..] {
                    if encoding.var_of[e] != encoding.var_of[e2] {
                        changed |= reach.mark_pair(e, e2);
                    }
                }
                for &p in &op.prevail {
                    changed |= reach.mark_pair(e, p);
                }
            }

            // side facts: values of untouched variables consistent with the
            // whole precondition
            for (var, &(start, end)) in encoding.var_ranges.iter().enumerate() {
                if touched.contains(&var) || op.prevail.iter().any(|&p| encoding.var_of[p] == var) {
                    continue;
                }
                for q in start..end {
                    if !reach.single(q) || !pre_set.iter().all(|&p| reach.pair(p, q)) {
                        continue;
                    }
                    for &e in &effects {
                        changed |= reach.mark_pair(e, q);
                    }
                }
            }
        }
    }

    // goal reachability (the fake goal for hierarchical instances is part of
    // the goal set; goal facts outside the encoding are checked by the
    // writer against the initial state)
    let goal_reachable = reach.set_reachable(&encoding.goals);
    if !goal_reachable {
        return H2Result {
            goal_reachable: false,
            mutexes: Vec::new(),
            invariants: Vec::new(),
            changed_pruning: false,
        };
    }

    // prune unreachable facts and inapplicable operators
    let mut changed_pruning = false;
    for (value, &semantic) in encoding.values.iter().enumerate() {
        if let Value::Fact(fact) = semantic {
            if !reach.single(value) && !model.pruned_facts[fact] {
                model.pruned_facts[usize::from(fact)] = true;
                changed_pruning = true;
            }
        }
    }
    let survivors: HashSet<GroundTaskId> = operators
        .iter()
        .zip(&applicable)
        .filter(|(_, &a)| a)
        .map(|(op, _)| op.task)
        .collect();
    for task_id in model.task_ids() {
        if !model.pruned_tasks[task_id]
            && domain.is_primitive(model.tasks[task_id].task)
            && !survivors.contains(&task_id)
        {
            model.pruned_tasks[usize::from(task_id)] = true;
            changed_pruning = true;
        }
    }

    // unreachable pairs of reachable values on distinct variables
    let mut mutexes = Vec::new();
    let mut invariants = Vec::new();
    for f in 0..n {
        if !reach.single(f) {
            continue;
        }
        for g in (f + 1)..n {
            if !reach.single(g) || encoding.var_of[f] == encoding.var_of[g] || reach.pair(f, g) {
                continue;
            }
            match (encoding.values[f], encoding.values[g]) {
                (Value::Goal | Value::NotGoal, _) | (_, Value::Goal | Value::NotGoal) => {}
                (Value::Fact(a), Value::Fact(b)) => {
                    mutexes.push([a, b].into_iter().collect());
                }
                (Value::Fact(a), Value::NoneOfThem(group)) | (Value::NoneOfThem(group), Value::Fact(a)) => {
                    let mut invariant = vec![InvariantLiteral::Neg(a)];
                    invariant.extend(groups.sas_groups[group].iter().map(|&m| InvariantLiteral::Pos(m)));
                    invariants.push(invariant);
                }
                (Value::NoneOfThem(g1), Value::NoneOfThem(g2)) => {
                    let mut invariant: Vec<InvariantLiteral> =
                        groups.sas_groups[g1].iter().map(|&m| InvariantLiteral::Pos(m)).collect();
                    invariant.extend(groups.sas_groups[g2].iter().map(|&m| InvariantLiteral::Pos(m)));
                    invariants.push(invariant);
                }
            }
        }
    }

    info!(
        mutexes = mutexes.len(),
        invariants = invariants.len(),
        changed_pruning,
        "h2 analysis done"
    );

    H2Result {
        goal_reachable: true,
        mutexes,
        invariants,
        changed_pruning,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpg::planning_graph::run_planning_graph;
    use crate::grounding::GroundingConfig;
    use crate::invariants::{compute_sas_groups, ground_invariant_analysis};
    use smallvec::smallvec;

    /// key-in(K, R1) initially; pickup moves the key into the hand. A state
    /// with both key-held(K) and key-in(K, R2) is impossible.
    fn lock_and_key() -> (Domain, Problem) {
        let mut domain = Domain::default();
        let k = domain.constants.push("k".to_string());
        let r1 = domain.constants.push("r1".to_string());
        let r2 = domain.constants.push("r2".to_string());
        let key = domain.sorts.push(Sort {
            name: "key".to_string(),
            members: [k].into_iter().collect(),
        });
        let room = domain.sorts.push(Sort {
            name: "room".to_string(),
            members: [r1, r2].into_iter().collect(),
        });
        let key_held = domain.predicates.push(Predicate {
            name: "key-held".to_string(),
            argument_sorts: vec![key],
            guard_for_conditional_effect: false,
        });
        let key_in = domain.predicates.push(Predicate {
            name: "key-in".to_string(),
            argument_sorts: vec![key, room],
            guard_for_conditional_effect: false,
        });
        domain.n_primitive = 2;
        domain.tasks.push(Task {
            name: "pickup".to_string(),
            variable_sorts: vec![key, room],
            original_variable_count: 2,
            preconditions: vec![Atom {
                predicate: key_in,
                args: smallvec![0, 1],
            }],
            add_effects: vec![Atom {
                predicate: key_held,
                args: smallvec![0],
            }],
            del_effects: vec![Atom {
                predicate: key_in,
                args: smallvec![0, 1],
            }],
            ..Task::default()
        });
        domain.tasks.push(Task {
            name: "putdown".to_string(),
            variable_sorts: vec![key, room],
            original_variable_count: 2,
            preconditions: vec![Atom {
                predicate: key_held,
                args: smallvec![0],
            }],
            add_effects: vec![Atom {
                predicate: key_in,
                args: smallvec![0, 1],
            }],
            del_effects: vec![Atom {
                predicate: key_held,
                args: smallvec![0],
            }],
            ..Task::default()
        });

        let mut problem = Problem::default();
        problem.init.push(Fact {
            predicate: key_in,
            args: smallvec![k, r1],
        });
        (domain, problem)
    }

    #[test]
    fn h2_finds_held_and_in_mutex() {
        let (domain, problem) = lock_and_key();
        let config = GroundingConfig {
            output_sas_variables_only: true,
            ..GroundingConfig::default()
        };
        let pg = run_planning_graph(&domain, &problem, None, &config);
        let n_tasks = pg.tasks.len();
        let mut model = GroundModel {
            pruned_facts: vec![false; pg.facts.len()],
            pruned_tasks: vec![false; n_tasks],
            pruned_methods: vec![],
            facts: pg.facts,
            tasks: pg.tasks,
            methods: vec![],
        };
        let init_facts: std::collections::HashSet<FactId> =
            problem.init.iter().filter_map(|f| model.fact_id(f)).collect();
        // without FAM groups every fact becomes its own SAS variable
        let groups = compute_sas_groups(&domain, &problem, &[], &[], &model, &init_facts, &config);
        let analysis = ground_invariant_analysis(&domain, &mut model, &init_facts, &groups);

        let result = compute_h2_mutexes(
            &domain,
            &problem,
            &mut model,
            &groups,
            &analysis.sas_needs_none_of_them,
        );
        assert!(result.goal_reachable);

        // key-held(k) is mutex with every key-in(k, r)
        let held = model
            .fact_id(&Fact {
                predicate: PredId::from_u32(0),
                args: smallvec![ConstId::from_u32(0)],
            })
            .unwrap();
        let mutexes_with_held: Vec<_> = result.mutexes.iter().filter(|m| m.contains(&held)).collect();
        assert!(
            !mutexes_with_held.is_empty(),
            "expected mutexes with key-held in {:?}",
            result.mutexes
        );
    }
}
