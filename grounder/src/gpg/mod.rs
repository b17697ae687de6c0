//! Generic lifted reachability fixpoint.
//!
//! The same machinery grounds primitive actions against facts (planning
//! graph) and decomposition methods against ground tasks (task decomposition
//! graph). An instance provides *operators* whose *antecedents* (atoms over
//! some head space) are matched against reached *state elements*; a fully
//! matched operator emits its add effects as new state elements, which are
//! integrated FIFO so that completeness is kept under bounded memory.
//!
//! Matching starts from a newly reached state element and one antecedent it
//! fulfills, then extends the partial variable assignment over the remaining
//! antecedents, consulting three pruning oracles:
//!
//! - the *state map*, an index of reached elements by the values of the
//!   variables already assigned when an antecedent is matched;
//! - the *future-satisfiability cache*, which records for each antecedent
//!   the value tuples that can still be completed, and is disabled per
//!   operator when its reject rate drops, or globally when it outgrows its
//!   memory budget;
//! - the hierarchy typing.

pub mod planning_graph;
pub mod tdg;

use crate::grounding::GroundingConfig;
use crate::hierarchy_typing::{HierarchyTyping, VariableAssignment};
use crate::model::*;
use env_param::EnvParam;
use grounder_collections::ref_store::RefVec;
use smallvec::SmallVec;
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use tracing::{debug, trace};

/// Byte budget for the future-satisfiability cache; the cache is dropped
/// (and the pruning disabled) when its estimated footprint exceeds this.
static FUTURE_CACHE_BYTES: EnvParam<usize> = EnvParam::new("GROUNDER_FUTURE_CACHE_BYTES", "3221225472");

/// Every how many future-satisfiability tests of one operator the reject
/// rate is re-evaluated.
const FUTURE_SAMPLING_PERIOD: usize = 100;

/// An atom over the instance's head space (predicates for the planning
/// graph, tasks for the decomposition graph), with variable arguments.
#[derive(Clone, Debug)]
pub struct GpgAtom {
    pub head: usize,
    pub args: SmallVec<[usize; 4]>,
}

/// A lifted operator of the fixpoint: a primitive action or a decomposition
/// method.
#[derive(Clone, Debug)]
pub struct GpgOperator {
    pub name: String,
    pub variable_sorts: Vec<SortId>,
    pub antecedents: Vec<GpgAtom>,
    pub add_effects: Vec<GpgAtom>,
    pub constraints: Vec<VariableConstraint>,
}

/// A ground state element: a fact or a ground task.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct GroundAtom {
    pub head: usize,
    pub args: SmallVec<[ConstId; 4]>,
}

/// Which hierarchy-typing table the instance consults.
#[derive(Copy, Clone)]
pub enum HtScope {
    Tasks,
    Methods,
}

/// A fully matched operator instance.
#[derive(Clone, Debug)]
pub struct GpgGrounding {
    pub operator: usize,
    pub args: Vec<ConstId>,
    /// State-element id matched against each antecedent.
    pub matched_antecedents: Vec<usize>,
    /// State-element ids of the add effects, in effect order.
    pub add_effects: Vec<usize>,
}

/// Result of a fixpoint run: the reached state elements (dense ids in
/// insertion order) and all emitted groundings.
pub struct GpgResult {
    pub state: Vec<GroundAtom>,
    pub groundings: Vec<GpgGrounding>,
}

/// Input of a fixpoint run.
pub struct GpgInstance<'a> {
    pub operators: Vec<GpgOperator>,
    pub n_heads: usize,
    pub sorts: &'a RefVec<SortId, Sort>,
    pub initial_state: Vec<GroundAtom>,
    pub ht: Option<&'a HierarchyTyping>,
    pub ht_scope: HtScope,
    pub domain: &'a Domain,
}

impl GpgInstance<'_> {
    fn ht_compatible(&self, operator: usize, assignment: &VariableAssignment) -> bool {
        match self.ht {
            None => true,
            Some(ht) => match self.ht_scope {
                HtScope::Tasks => ht.task_compatible(self.domain, TaskId::from(operator), assignment),
                HtScope::Methods => ht.method_compatible(MethodId::from(operator), assignment),
            },
        }
    }
}

/// Variable sets known to be assigned at each antecedent, canonicalized and
/// shared between the state map and the matcher.
struct PreprocessedDomain {
    /// `[operator][antecedent]`: distinct assigned-variable sets.
    assigned_sets: Vec<Vec<Vec<BTreeSet<usize>>>>,
    /// `[operator][antecedent]`: initially-matched antecedent (None = base)
    /// to an index into `assigned_sets`.
    assigned_set_ids: Vec<Vec<HashMap<Option<usize>, usize>>>,
    /// `[operator][antecedent]`: argument positions that share a variable.
    identical_arguments: Vec<Vec<Vec<Vec<usize>>>>,
    /// For each head, the (operator, antecedent) pairs using it.
    antecedents_by_head: Vec<Vec<(usize, usize)>>,
    /// Antecedents usable as the initially matched one for the split
    /// future-satisfiability cache.
    eligible_initial: Vec<BTreeSet<usize>>,
}

impl PreprocessedDomain {
    fn new(instance: &GpgInstance) -> Self {
        let n_ops = instance.operators.len();
        let mut assigned_sets = Vec::with_capacity(n_ops);
        let mut assigned_set_ids = Vec::with_capacity(n_ops);
        let mut identical_arguments = Vec::with_capacity(n_ops);
        let mut antecedents_by_head = vec![Vec::new(); instance.n_heads];
        let mut eligible_initial = Vec::with_capacity(n_ops);

        for (op_idx, op) in instance.operators.iter().enumerate() {
            let mut op_identical = Vec::with_capacity(op.antecedents.len());
            for antecedent in &op.antecedents {
                let mut positions_of_var: HashMap<usize, Vec<usize>> = HashMap::new();
                for (pos, &var) in antecedent.args.iter().enumerate() {
                    positions_of_var.entry(var).or_default().push(pos);
                }
                let mut groups: Vec<Vec<usize>> =
                    positions_of_var.into_values().filter(|g| g.len() > 1).collect();
                groups.sort();
                op_identical.push(groups);
            }
            identical_arguments.push(op_identical);

            // an antecedent whose variables all have singleton sorts gains
            // nothing as a cache partition
            let eligible: BTreeSet<usize> = op
                .antecedents
                .iter()
                .enumerate()
                .filter(|(_, a)| {
                    a.args
                        .iter()
                        .any(|&var| instance.sorts[op.variable_sorts[var]].members.len() != 1)
                })
                .map(|(idx, _)| idx)
                .collect();

            let mut op_sets: Vec<Vec<BTreeSet<usize>>> = Vec::with_capacity(op.antecedents.len());
            let mut op_set_ids: Vec<HashMap<Option<usize>, usize>> = Vec::with_capacity(op.antecedents.len());
            let mut already_assigned: BTreeSet<usize> = BTreeSet::new();
            for (ant_idx, antecedent) in op.antecedents.iter().enumerate() {
                let mut sets: Vec<BTreeSet<usize>> = Vec::new();
                let mut ids: HashMap<Option<usize>, usize> = HashMap::new();
                let mut intern = |set: BTreeSet<usize>, sets: &mut Vec<BTreeSet<usize>>| -> usize {
                    match sets.iter().position(|s| *s == set) {
                        Some(i) => i,
                        None => {
                            sets.push(set);
                            sets.len() - 1
                        }
                    }
                };
                let base = intern(already_assigned.clone(), &mut sets);
                ids.insert(None, base);
                for &initial in &eligible {
                    let mut with_initial = already_assigned.clone();
                    with_initial.extend(op.antecedents[initial].args.iter().copied());
                    let id = intern(with_initial, &mut sets);
                    ids.insert(Some(initial), id);
                }
                already_assigned.extend(antecedent.args.iter().copied());
                antecedents_by_head[antecedent.head].push((op_idx, ant_idx));
                op_sets.push(sets);
                op_set_ids.push(ids);
            }
            // the set assigned after the last antecedent, for future checks
            // performed before any antecedent was matched
            assigned_sets.push(op_sets);
            assigned_set_ids.push(op_set_ids);
            eligible_initial.push(eligible);
        }

        PreprocessedDomain {
            assigned_sets,
            assigned_set_ids,
            identical_arguments,
            antecedents_by_head,
            eligible_initial,
        }
    }

    fn has_variable(&self, op: usize, ant: usize, initial: Option<usize>, var: usize) -> bool {
        let Some(&set_id) = self.assigned_set_ids[op][ant].get(&initial) else {
            return false;
        };
        self.assigned_sets[op][ant][set_id].contains(&var)
    }
}

/// Index of reached state elements by (operator, antecedent, values of the
/// assigned variables), plus the future-satisfiability cache.
struct StateMap {
    /// `[op][ant][assigned_set_id]`: values of assigned variables (in
    /// argument order) to matching state-element ids.
    fact_map: Vec<Vec<Vec<HashMap<Vec<ConstId>, Vec<usize>>>>>,
    /// Number of antecedents of each operator without any matching element.
    antecedents_without_fact: Vec<usize>,
    has_fact: Vec<Vec<bool>>,
    /// `[op][ant_idx + 1][future_ant]`: per initially-matched antecedent
    /// (None = shared), the value tuples some reached element provides.
    consistency: Vec<Vec<Vec<HashMap<Option<usize>, HashSet<Vec<ConstId>>>>>>,
    /// Estimated footprint of `consistency`.
    cache_bytes: usize,
}

impl StateMap {
    fn new(instance: &GpgInstance, preprocessed: &PreprocessedDomain) -> Self {
        let fact_map = instance
            .operators
            .iter()
            .enumerate()
            .map(|(op_idx, op)| {
                (0..op.antecedents.len())
                    .map(|ant| vec![HashMap::new(); preprocessed.assigned_sets[op_idx][ant].len()])
                    .collect()
            })
            .collect();
        let consistency = instance
            .operators
            .iter()
            .map(|op| {
                (0..op.antecedents.len() + 1)
                    .map(|_| vec![HashMap::new(); op.antecedents.len()])
                    .collect()
            })
            .collect();
        StateMap {
            fact_map,
            antecedents_without_fact: instance.operators.iter().map(|op| op.antecedents.len()).collect(),
            has_fact: instance
                .operators
                .iter()
                .map(|op| vec![false; op.antecedents.len()])
                .collect(),
            consistency,
            cache_bytes: 0,
        }
    }

    fn drop_consistency(&mut self) {
        self.consistency.clear();
        self.cache_bytes = 0;
    }

    /// Indexes a newly processed state element under every antecedent with a
    /// matching head.
    #[allow(clippy::too_many_arguments)]
    fn insert_state(
        &mut self,
        instance: &GpgInstance,
        preprocessed: &PreprocessedDomain,
        future_enabled: &[bool],
        future_caching_by_precondition: bool,
        element: &GroundAtom,
        element_id: usize,
    ) {
        'antecedents: for &(op_idx, ant_idx) in &preprocessed.antecedents_by_head[element.head] {
            let op = &instance.operators[op_idx];
            let antecedent = &op.antecedents[ant_idx];
            debug_assert_eq!(antecedent.args.len(), element.args.len());

            for group in &preprocessed.identical_arguments[op_idx][ant_idx] {
                let value = element.args[group[0]];
                if group[1..].iter().any(|&pos| element.args[pos] != value) {
                    continue 'antecedents;
                }
            }
            for (pos, &var) in antecedent.args.iter().enumerate() {
                let sort = op.variable_sorts[var];
                if !instance.sorts[sort].members.contains(&element.args[pos]) {
                    continue 'antecedents;
                }
            }

            if !self.has_fact[op_idx][ant_idx] {
                self.has_fact[op_idx][ant_idx] = true;
                self.antecedents_without_fact[op_idx] -= 1;
            }

            for (set_id, assigned) in preprocessed.assigned_sets[op_idx][ant_idx].iter().enumerate() {
                let values: Vec<ConstId> = antecedent
                    .args
                    .iter()
                    .enumerate()
                    .filter(|(_, &var)| assigned.contains(&var))
                    .map(|(pos, _)| element.args[pos])
                    .collect();
                self.fact_map[op_idx][ant_idx][set_id]
                    .entry(values)
                    .or_default()
                    .push(element_id);
            }

            if !future_enabled[op_idx] || self.consistency.is_empty() {
                continue;
            }

            // record the element as a witness that this antecedent can still
            // be fulfilled after any earlier antecedent was matched
            for past in 0..=ant_idx {
                let keys: Vec<Option<usize>> = if future_caching_by_precondition {
                    std::iter::once(None)
                        .chain(preprocessed.eligible_initial[op_idx].iter().map(|&i| Some(i)))
                        .collect()
                } else {
                    vec![None]
                };
                for key in keys {
                    let values: Vec<ConstId> = antecedent
                        .args
                        .iter()
                        .enumerate()
                        .filter(|(_, &var)| preprocessed.has_variable(op_idx, past, key, var))
                        .map(|(pos, _)| element.args[pos])
                        .collect();
                    let bytes = values.len() * std::mem::size_of::<ConstId>() + 32;
                    if self.consistency[op_idx][past][ant_idx]
                        .entry(key)
                        .or_default()
                        .insert(values)
                    {
                        self.cache_bytes += bytes;
                    }
                }
            }
        }
    }

    /// State elements that can match `ant_idx` under the current assignment.
    fn get_facts(
        &self,
        instance: &GpgInstance,
        preprocessed: &PreprocessedDomain,
        op_idx: usize,
        ant_idx: usize,
        assignment: &VariableAssignment,
        initially_matched: usize,
    ) -> Vec<usize> {
        let initial = if preprocessed.eligible_initial[op_idx].contains(&initially_matched) {
            Some(initially_matched)
        } else {
            None
        };
        let set_id = preprocessed.assigned_set_ids[op_idx][ant_idx][&initial];
        let assigned = &preprocessed.assigned_sets[op_idx][ant_idx][set_id];
        let antecedent = &instance.operators[op_idx].antecedents[ant_idx];
        let values: Vec<ConstId> = antecedent
            .args
            .iter()
            .filter(|&&var| assigned.contains(&var))
            .map(|&var| assignment.get(var).expect("variable not assigned"))
            .collect();
        self.fact_map[op_idx][ant_idx][set_id]
            .get(&values)
            .cloned()
            .unwrap_or_default()
    }

    /// Quick check whether every antecedent of the operator has at least one
    /// candidate, allowing only `initially_matched` to be the missing one.
    fn has_instance_for_all_antecedents(&self, op_idx: usize, initially_matched: usize) -> bool {
        match self.antecedents_without_fact[op_idx] {
            0 => true,
            1 => !self.has_fact[op_idx][initially_matched],
            _ => false,
        }
    }

    /// Whether, given the assignment after matching antecedents up to
    /// `ant_idx` (`None` = only the initially matched one), every future
    /// antecedent still has a potentially consistent candidate.
    fn has_potentially_consistent_extension(
        &self,
        instance: &GpgInstance,
        preprocessed: &PreprocessedDomain,
        future_caching_by_precondition: bool,
        op_idx: usize,
        ant_idx: Option<usize>,
        assignment: &VariableAssignment,
        initially_matched: usize,
    ) -> bool {
        if self.consistency.is_empty() {
            return true;
        }
        let key = if future_caching_by_precondition
            && preprocessed.eligible_initial[op_idx].contains(&initially_matched)
        {
            Some(initially_matched)
        } else {
            None
        };
        let past = ant_idx.map(|i| i + 1).unwrap_or(0);
        let n_antecedents = instance.operators[op_idx].antecedents.len();
        for future in past..n_antecedents {
            let antecedent = &instance.operators[op_idx].antecedents[future];
            let values: Vec<ConstId> = antecedent
                .args
                .iter()
                .filter(|&&var| preprocessed.has_variable(op_idx, past, key, var))
                .map(|&var| assignment.get(var).expect("variable not assigned"))
                .collect();
            let known = self.consistency[op_idx][past][future]
                .get(&key)
                .map(|set| set.contains(&values))
                .unwrap_or(false);
            if !known {
                return false;
            }
        }
        true
    }
}

/// Matching statistics; also drives the adaptive disabling.
#[derive(Default)]
pub struct GpgStatistics {
    pub total_fact_tests: usize,
    pub total_fact_hits: usize,
    pub future_tests: Vec<usize>,
    pub future_rejects: Vec<usize>,
    pub ht_tests: Vec<usize>,
    pub ht_rejects: Vec<usize>,
}

struct Engine<'a, 'i> {
    instance: &'a GpgInstance<'i>,
    preprocessed: PreprocessedDomain,
    state_map: StateMap,
    config: &'a GroundingConfig,
    /// Per-operator pruning switches.
    future_enabled: Vec<bool>,
    ht_enabled: Vec<bool>,
    all_future_disabled: bool,
    stats: GpgStatistics,

    // state interning: dense ids in insertion order
    state: Vec<GroundAtom>,
    state_ids: HashMap<GroundAtom, usize>,
    queue: VecDeque<usize>,

    output: Vec<GpgGrounding>,
}

impl<'a, 'i> Engine<'a, 'i> {
    fn new(instance: &'a GpgInstance<'i>, config: &'a GroundingConfig) -> Self {
        let preprocessed = PreprocessedDomain::new(instance);
        let state_map = StateMap::new(instance, &preprocessed);
        let n_ops = instance.operators.len();
        Engine {
            instance,
            preprocessed,
            state_map,
            config,
            future_enabled: vec![true; n_ops],
            ht_enabled: vec![true; n_ops],
            all_future_disabled: false,
            stats: GpgStatistics {
                future_tests: vec![0; n_ops],
                future_rejects: vec![0; n_ops],
                ht_tests: vec![0; n_ops],
                ht_rejects: vec![0; n_ops],
                ..GpgStatistics::default()
            },
            state: Vec::new(),
            state_ids: HashMap::new(),
            queue: VecDeque::new(),
            output: Vec::new(),
        }
    }

    /// Interns a state element; new elements are queued for processing.
    fn intern(&mut self, element: GroundAtom) -> usize {
        if let Some(&id) = self.state_ids.get(&element) {
            return id;
        }
        let id = self.state.len();
        self.state_ids.insert(element.clone(), id);
        self.state.push(element);
        self.queue.push_back(id);
        id
    }

    fn disable_all_future_satisfiability(&mut self) {
        self.all_future_disabled = true;
        self.future_enabled.iter_mut().for_each(|f| *f = false);
        self.state_map.drop_consistency();
        debug!("future-satisfiability cache dropped (memory budget exceeded)");
    }

    /// Re-evaluates the reject rate of one operator on a sampling schedule.
    fn sample_future_rate(&mut self, op_idx: usize) {
        let tests = self.stats.future_tests[op_idx];
        if tests == 0 || tests % FUTURE_SAMPLING_PERIOD != 0 {
            return;
        }
        if self.future_enabled[op_idx] && self.stats.future_rejects[op_idx] < tests / 10 {
            self.future_enabled[op_idx] = false;
            trace!(
                operator = %self.instance.operators[op_idx].name,
                "future-satisfiability checking disabled (low reject rate)"
            );
        }
    }

    fn constraints_hold(&self, op_idx: usize, assignment: &VariableAssignment, only_determined: bool) -> bool {
        self.instance.operators[op_idx].constraints.iter().all(|constraint| {
            match (assignment.get(constraint.var1), assignment.get(constraint.var2)) {
                (Some(v1), Some(v2)) => constraint.satisfied(v1, v2),
                _ => only_determined,
            }
        })
    }

    /// Enumerates the still-unassigned variables over their sorts and emits
    /// a grounding for each complete, constraint- and typing-consistent
    /// assignment.
    fn assign_variables(
        &mut self,
        op_idx: usize,
        assignment: &mut VariableAssignment,
        matched: &[usize],
        var_idx: usize,
    ) {
        let op = &self.instance.operators[op_idx];
        if assignment.assigned_count() == op.variable_sorts.len() {
            if !self.constraints_hold(op_idx, assignment, false) {
                return;
            }
            if !self.instance.ht_compatible(op_idx, assignment) {
                return;
            }

            let args = assignment.unwrap_all();
            let mut add_effects = Vec::with_capacity(op.add_effects.len());
            for effect in &op.add_effects {
                let element = GroundAtom {
                    head: effect.head,
                    args: effect.args.iter().map(|&v| args[v]).collect(),
                };
                add_effects.push(self.intern(element));
            }
            self.output.push(GpgGrounding {
                operator: op_idx,
                args,
                matched_antecedents: matched.to_vec(),
                add_effects,
            });
            return;
        }

        if assignment.is_assigned(var_idx) {
            self.assign_variables(op_idx, assignment, matched, var_idx + 1);
            return;
        }
        let members: Vec<ConstId> = self.instance.sorts[op.variable_sorts[var_idx]]
            .members
            .iter()
            .copied()
            .collect();
        for value in members {
            assignment.assign(var_idx, value);
            self.assign_variables(op_idx, assignment, matched, var_idx + 1);
        }
        assignment.unassign(var_idx);
    }

    /// Extends the assignment along antecedent `ant_idx`, recursing towards
    /// a full grounding.
    #[allow(clippy::too_many_arguments)]
    fn match_antecedent(
        &mut self,
        op_idx: usize,
        assignment: &mut VariableAssignment,
        initially_matched: usize,
        initially_matched_element: Option<usize>,
        matched: &mut Vec<usize>,
        ant_idx: usize,
    ) {
        let n_antecedents = self.instance.operators[op_idx].antecedents.len();

        if ant_idx == 0
            && self.future_enabled[op_idx]
            && !self.state_map.has_potentially_consistent_extension(
                self.instance,
                &self.preprocessed,
                self.config.future_caching_by_precondition,
                op_idx,
                None,
                assignment,
                initially_matched,
            )
        {
            self.stats.future_rejects[op_idx] += 1;
            return;
        }

        if ant_idx >= n_antecedents {
            self.assign_variables(op_idx, assignment, matched, 0);
            return;
        }
        if ant_idx == initially_matched {
            self.match_antecedent(
                op_idx,
                assignment,
                initially_matched,
                initially_matched_element,
                matched,
                ant_idx + 1,
            );
            return;
        }

        let candidates = self.state_map.get_facts(
            self.instance,
            &self.preprocessed,
            op_idx,
            ant_idx,
            assignment,
            initially_matched,
        );
        for element_id in candidates {
            // The triggering element may complete earlier groundings, but
            // using it beyond the antecedent it seeded would produce the
            // same grounding from several seeds.
            if ant_idx < initially_matched && Some(element_id) == initially_matched_element {
                continue;
            }

            self.stats.total_fact_tests += 1;
            let element = self.state[element_id].clone();
            let antecedent = &self.instance.operators[op_idx].antecedents[ant_idx];
            debug_assert_eq!(element.head, antecedent.head);

            let mut newly_assigned: SmallVec<[usize; 4]> = SmallVec::new();
            let mut matches = true;
            for (pos, &var) in antecedent.args.iter().enumerate() {
                let value = element.args[pos];
                match assignment.get(var) {
                    None => {
                        let sort = self.instance.operators[op_idx].variable_sorts[var];
                        if !self.instance.sorts[sort].members.contains(&value) {
                            matches = false;
                            break;
                        }
                        newly_assigned.push(var);
                        assignment.assign(var, value);
                    }
                    Some(existing) if existing == value => {}
                    Some(_) => {
                        matches = false;
                        break;
                    }
                }
            }

            if matches {
                self.stats.total_fact_hits += 1;
            }

            if matches && self.future_enabled[op_idx] && ant_idx != n_antecedents - 1 {
                self.stats.future_tests[op_idx] += 1;
                if !self.state_map.has_potentially_consistent_extension(
                    self.instance,
                    &self.preprocessed,
                    self.config.future_caching_by_precondition,
                    op_idx,
                    Some(ant_idx),
                    assignment,
                    initially_matched,
                ) {
                    self.stats.future_rejects[op_idx] += 1;
                    matches = false;
                }
                self.sample_future_rate(op_idx);
            }

            if matches && self.ht_enabled[op_idx] {
                self.stats.ht_tests[op_idx] += 1;
                if !self.instance.ht_compatible(op_idx, assignment) {
                    self.stats.ht_rejects[op_idx] += 1;
                    matches = false;
                }
            }

            if matches && !self.constraints_hold(op_idx, assignment, true) {
                matches = false;
            }

            if !self.all_future_disabled && self.state_map.cache_bytes > FUTURE_CACHE_BYTES.get() {
                self.disable_all_future_satisfiability();
            }

            if matches {
                matched[ant_idx] = element_id;
                self.match_antecedent(
                    op_idx,
                    assignment,
                    initially_matched,
                    initially_matched_element,
                    matched,
                    ant_idx + 1,
                );
            }

            for var in newly_assigned {
                assignment.unassign(var);
            }
        }
    }

    fn run(&mut self) {
        // seed with the initial state elements, dropping duplicates
        for element in self.instance.initial_state.clone() {
            self.intern(element);
        }

        // operators without antecedents are grounded right away
        for op_idx in 0..self.instance.operators.len() {
            if self.instance.operators[op_idx].antecedents.is_empty() {
                let mut assignment = VariableAssignment::new(self.instance.operators[op_idx].variable_sorts.len());
                self.assign_variables(op_idx, &mut assignment, &[], 0);
            }
        }

        while let Some(element_id) = self.queue.pop_front() {
            let element = self.state[element_id].clone();
            self.state_map.insert_state(
                self.instance,
                &self.preprocessed,
                &self.future_enabled,
                self.config.future_caching_by_precondition,
                &element,
                element_id,
            );

            let watchers = self.preprocessed.antecedents_by_head[element.head].clone();
            for (op_idx, ant_idx) in watchers {
                if !self.state_map.has_instance_for_all_antecedents(op_idx, ant_idx) {
                    continue;
                }
                let op = &self.instance.operators[op_idx];
                let antecedent = &op.antecedents[ant_idx];

                // seed the assignment from this element
                let mut assignment = VariableAssignment::new(op.variable_sorts.len());
                let mut consistent = true;
                for (pos, &var) in antecedent.args.iter().enumerate() {
                    let value = element.args[pos];
                    if !self.instance.sorts[op.variable_sorts[var]].members.contains(&value) {
                        consistent = false;
                        break;
                    }
                    match assignment.get(var) {
                        None => assignment.assign(var, value),
                        Some(existing) if existing == value => {}
                        Some(_) => {
                            consistent = false;
                            break;
                        }
                    }
                }
                if !consistent {
                    continue;
                }

                if self.future_enabled[op_idx]
                    && op.antecedents.len() != 1
                    && !self.state_map.has_potentially_consistent_extension(
                        self.instance,
                        &self.preprocessed,
                        self.config.future_caching_by_precondition,
                        op_idx,
                        None,
                        &assignment,
                        ant_idx,
                    )
                {
                    continue;
                }
                if self.ht_enabled[op_idx] && !self.instance.ht_compatible(op_idx, &assignment) {
                    continue;
                }

                let mut matched = vec![usize::MAX; op.antecedents.len()];
                matched[ant_idx] = element_id;
                self.match_antecedent(op_idx, &mut assignment, ant_idx, Some(element_id), &mut matched, 0);
            }
        }

        debug!(
            state_elements = self.state.len(),
            groundings = self.output.len(),
            fact_tests = self.stats.total_fact_tests,
            fact_hits = self.stats.total_fact_hits,
            "fixpoint finished"
        );
    }
}

/// Runs the lifted fixpoint to completion.
pub fn run_gpg(instance: &GpgInstance, config: &GroundingConfig) -> GpgResult {
    let mut engine = Engine::new(instance, config);
    engine.run();
    GpgResult {
        state: std::mem::take(&mut engine.state),
        groundings: std::mem::take(&mut engine.output),
    }
}
