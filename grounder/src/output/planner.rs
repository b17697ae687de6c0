//! Writer for the grounded-planner text format.
//!
//! Line-oriented, `;;`-comment sections: state features, SAS+ variable
//! ranges, further strict/non-strict mutex groups, known invariants,
//! actions (with conditional effects), initial state, goal, task names, the
//! initial abstract task and the methods.
//!
//! Strict binary mutexes may additionally be used to eliminate a fact that
//! is the "negation" of a fact in a larger SAS+ variable: the eliminated
//! fact is replaced by the other values of that variable, and actions whose
//! preconditions mention it are emitted once per replacement value, grouped
//! under a synthesized abstract task.

use super::{initial_state_facts, resolve_goal_facts};
use crate::grounding::{GroundingConfig, SasDeleteMode};
use crate::h2::InvariantLiteral;
use crate::model::*;
use crate::postprocessing::conditional_effect_actions;
use anyhow::Result;
use grounder_collections::ref_store::RefMap;
use itertools::Itertools;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::io::Write;
use tracing::info;

/// A replacement value of a cover-pruned fact: either another fact of the
/// covering SAS+ variable or its "none-of-them" value.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum CoverValue {
    Fact(FactId),
    NoneOf(usize),
}

/// An output slot in the state-feature numbering.
#[derive(Copy, Clone, Debug)]
enum Slot {
    Fact(FactId),
    NoneOf(usize),
}

pub struct PlannerOutput<'a> {
    pub domain: &'a Domain,
    pub problem: &'a Problem,
    pub sas_groups: &'a [BTreeSet<FactId>],
    pub strict_mutexes: &'a [BTreeSet<FactId>],
    pub non_strict_mutexes: &'a [BTreeSet<FactId>],
    pub invariants: &'a [Vec<InvariantLiteral>],
    pub sas_needs_none_of_them: &'a [bool],
    pub config: &'a GroundingConfig,
}

/// Finds facts eliminable through a strict binary mutex: the fact must not
/// occur in the goal, its partner must sit in a SAS+ variable with more than
/// two values, and either only one replacement value exists or the negative
/// compilation was requested.
#[allow(clippy::type_complexity)]
fn find_cover_pruned(
    out: &PlannerOutput,
    model: &GroundModel,
    goal_facts: &HashSet<FactId>,
) -> (BTreeMap<FactId, Vec<CoverValue>>, HashSet<usize>) {
    let mut cover_pruned: BTreeMap<FactId, Vec<CoverValue>> = BTreeMap::new();
    let mut pruned_sas_groups: HashSet<usize> = HashSet::new();

    for mutex in out.strict_mutexes {
        if mutex.len() != 2 {
            continue;
        }
        if mutex.iter().any(|f| goal_facts.contains(f)) {
            continue;
        }

        let mut fact_in_large_group: Option<(FactId, usize)> = None;
        let mut other_fact: Option<FactId> = None;
        let mut small_group: Option<(usize, Option<FactId>)> = None;
        let mut two_large = false;
        for &elem in mutex {
            let mut found = false;
            for (group_idx, group) in out.sas_groups.iter().enumerate() {
                if !group.contains(&elem) {
                    continue;
                }
                found = true;
                let effective_size = group.len() + usize::from(out.sas_needs_none_of_them[group_idx]);
                if effective_size <= 2 {
                    other_fact = Some(elem);
                    let second = group.iter().find(|&&g| g != elem).copied();
                    small_group = Some((group_idx, second));
                    continue;
                }
                if fact_in_large_group.is_some() {
                    two_large = true;
                    break;
                }
                fact_in_large_group = Some((elem, group_idx));
            }
            if two_large {
                break;
            }
            if !found {
                other_fact = Some(elem);
            }
        }
        if two_large {
            continue;
        }
        let Some((large_fact, large_group)) = fact_in_large_group else {
            continue;
        };
        let Some(other) = other_fact else { continue };
        if cover_pruned.contains_key(&other) || model.pruned_facts[other] {
            continue;
        }

        let mut other_values: Vec<CoverValue> = out.sas_groups[large_group]
            .iter()
            .filter(|&&v| v != large_fact)
            .map(|&v| CoverValue::Fact(v))
            .collect();
        if out.sas_needs_none_of_them[large_group] {
            other_values.push(CoverValue::NoneOf(large_group));
        }
        // implications are always applied; the general case only on request
        if other_values.len() != 1 && !out.config.compile_negative_sas_variables {
            continue;
        }

        cover_pruned.insert(other, other_values);
        if let Some((small_idx, second)) = small_group {
            pruned_sas_groups.insert(small_idx);
            if let Some(second) = second {
                cover_pruned.entry(second).or_insert_with(|| vec![CoverValue::Fact(large_fact)]);
            }
        }
    }

    (cover_pruned, pruned_sas_groups)
}

/// All assignments of the cover-pruned preconditions to their replacement
/// values (cartesian product, one action instance each).
fn instantiate_cover_pruned(
    order: &BTreeMap<FactId, usize>,
    cover_pruned: &BTreeMap<FactId, Vec<CoverValue>>,
) -> Vec<Vec<CoverValue>> {
    let mut assignments: Vec<Vec<CoverValue>> = vec![vec![CoverValue::NoneOf(usize::MAX); order.len()]];
    for (&fact, &slot) in order {
        let values = &cover_pruned[&fact];
        assignments = assignments
            .into_iter()
            .cartesian_product(values.iter().copied())
            .map(|(mut assignment, value)| {
                assignment[slot] = value;
                assignment
            })
            .collect();
    }
    assignments
}

/// An output effect: the (possibly empty) condition and the affected slot.
/// Negative marker indices (from cover pruning) are resolved per instance.
type Marked = i64; // >= 0: output fact number, < 0: cover-pruned marker -i-1

struct ActionOutput {
    task: GroundTaskId,
    cost: i64,
    preconditions: Vec<Marked>,
    adds: Vec<(Vec<Marked>, usize)>,
    dels: Vec<(Vec<Marked>, usize)>,
    instances: Vec<Vec<CoverValue>>,
}

pub fn write_grounded_htn(w: &mut dyn Write, out: &PlannerOutput, model: &GroundModel) -> Result<()> {
    let domain = out.domain;
    let config = out.config;

    let (init_facts, init_facts_pruned) = initial_state_facts(out.problem, model);
    let goal = resolve_goal_facts(domain, out.problem, model, &init_facts_pruned)?;
    let goal_facts: HashSet<FactId> = goal.iter().copied().collect();

    // a no-op is needed when empty methods must be avoided
    let contains_empty_method = config.noop_for_empty_methods
        && model
            .method_ids()
            .any(|m| !model.pruned_methods[m] && model.methods[m].subtask_ordering.is_empty());

    let (cover_pruned, pruned_sas_groups) = find_cover_pruned(out, model, &goal_facts);

    // ---- state feature numbering ----
    let mut output_no: RefMap<FactId, usize> = RefMap::default();
    let mut slots: Vec<Slot> = Vec::new();
    let mut sas_group_of_slot: Vec<usize> = Vec::new();
    let mut slot_range: Vec<(usize, usize)> = Vec::new();
    let mut none_of_them_slot: Vec<Option<usize>> = vec![None; out.sas_groups.len()];
    let mut number_of_sas_groups = 0usize;

    for (group_idx, group) in out.sas_groups.iter().enumerate() {
        if pruned_sas_groups.contains(&group_idx) {
            continue;
        }
        number_of_sas_groups += 1;
        let from = slots.len();
        for &fact in group {
            assert!(!model.pruned_facts[fact], "SAS+ group member was pruned");
            output_no.insert(fact, slots.len());
            slots.push(Slot::Fact(fact));
            sas_group_of_slot.push(group_idx);
        }
        if out.sas_needs_none_of_them[group_idx] {
            none_of_them_slot[group_idx] = Some(slots.len());
            slots.push(Slot::NoneOf(group_idx));
            sas_group_of_slot.push(group_idx);
        }
        let to = slots.len() - 1;
        for _ in from..=to {
            slot_range.push((from, to));
        }
    }
    let number_of_sas_covered_facts = slots.len();

    // facts outside the SAS+ cover become singleton variables
    for fact_id in model.fact_ids() {
        if output_no.contains(fact_id)
            || model.pruned_facts[fact_id]
            || domain.predicates[model.facts[fact_id].predicate].guard_for_conditional_effect
            || cover_pruned.contains_key(&fact_id)
        {
            continue;
        }
        output_no.insert(fact_id, slots.len());
        slots.push(Slot::Fact(fact_id));
        number_of_sas_groups += 1;
    }

    let slot_of = |fact: FactId| *output_no.get(fact).expect("fact has an output number");
    let cover_value_slot = |value: CoverValue| match value {
        CoverValue::Fact(f) => slot_of(f),
        CoverValue::NoneOf(g) => none_of_them_slot[g].expect("group has a none-of-them slot"),
    };

    writeln!(w, ";; #state features")?;
    writeln!(w, "{}", slots.len())?;
    for slot in &slots {
        match slot {
            Slot::NoneOf(_) => writeln!(w, "none-of-them")?,
            Slot::Fact(fact) => writeln!(w, "{}", model.fact_name(domain, *fact))?,
        }
    }
    writeln!(w)?;

    // ---- SAS+ variables ----
    writeln!(w, ";; Mutex Groups")?;
    writeln!(w, "{number_of_sas_groups}")?;
    let mut variable_number = 0usize;
    let mut position = 0usize;
    for (group_idx, group) in out.sas_groups.iter().enumerate() {
        if pruned_sas_groups.contains(&group_idx) {
            continue;
        }
        let size = group.len() + usize::from(out.sas_needs_none_of_them[group_idx]);
        variable_number += 1;
        writeln!(w, "{} {} var{}", position, position + size - 1, variable_number)?;
        position += size;
    }
    for slot_idx in number_of_sas_covered_facts..slots.len() {
        let Slot::Fact(fact) = slots[slot_idx] else {
            unreachable!("uncovered slots are facts")
        };
        writeln!(w, "{slot_idx} {slot_idx} {}", model.fact_name(domain, fact))?;
    }
    writeln!(w)?;

    // ---- additional mutex groups ----
    let translate_mutex = |mutex: &BTreeSet<FactId>| -> Option<BTreeSet<usize>> {
        let mut translated = BTreeSet::new();
        for &fact in mutex {
            if model.pruned_facts[fact]
                || domain.predicates[model.facts[fact].predicate].guard_for_conditional_effect
            {
                continue;
            }
            match cover_pruned.get(&fact) {
                Some(values) => translated.extend(values.iter().map(|&v| cover_value_slot(v))),
                None => {
                    translated.insert(slot_of(fact));
                }
            }
        }
        if translated.len() < 2 {
            return None; // mutexes may degenerate through pruning
        }
        // a subset of one SAS+ variable is redundant
        let redundant = translated.iter().all(|&s| s < number_of_sas_covered_facts)
            && translated
                .iter()
                .map(|&s| sas_group_of_slot[s])
                .all_equal_value()
                .ok()
                .map(|g| translated.len() == out.sas_groups[g].len() + usize::from(out.sas_needs_none_of_them[g]))
                .unwrap_or(false);
        if redundant {
            return None;
        }
        Some(translated)
    };

    for (header, mutexes) in [
        (";; further strict Mutex Groups", out.strict_mutexes),
        (";; further non strict Mutex Groups", out.non_strict_mutexes),
    ] {
        let translated: Vec<BTreeSet<usize>> = mutexes.iter().filter_map(translate_mutex).collect();
        writeln!(w, "{header}")?;
        writeln!(w, "{}", translated.len())?;
        for mutex in translated {
            for slot in mutex {
                write!(w, "{slot} ")?;
            }
            writeln!(w, "-1")?;
        }
        writeln!(w)?;
    }

    // ---- invariants ----
    writeln!(w, ";; known invariants")?;
    let mut out_invariants: Vec<BTreeSet<i64>> = Vec::new();
    'invariants: for invariant in out.invariants {
        let mut translated: BTreeSet<i64> = BTreeSet::new();
        for literal in invariant {
            match *literal {
                InvariantLiteral::Neg(fact) => {
                    if cover_pruned.contains_key(&fact) || model.pruned_facts[fact] {
                        continue 'invariants;
                    }
                    translated.insert(-(slot_of(fact) as i64) - 2);
                }
                InvariantLiteral::Pos(fact) => {
                    if model.pruned_facts[fact] {
                        continue 'invariants;
                    }
                    match cover_pruned.get(&fact) {
                        Some(values) => {
                            translated.extend(values.iter().map(|&v| cover_value_slot(v) as i64));
                        }
                        None => {
                            translated.insert(slot_of(fact) as i64);
                        }
                    }
                }
            }
        }
        // trivial: contains a literal and its negation
        if translated.iter().any(|&l| translated.contains(&(-l - 2))) {
            continue;
        }
        // redundant: exactly the value set of one SAS+ variable
        let all_sas = translated
            .iter()
            .all(|&l| l >= 0 && (l as usize) < number_of_sas_covered_facts);
        if all_sas && !translated.is_empty() {
            let groups: Vec<usize> = translated.iter().map(|&l| sas_group_of_slot[l as usize]).collect();
            if groups.iter().all_equal() {
                let g = groups[0];
                if translated.len() == out.sas_groups[g].len() + usize::from(out.sas_needs_none_of_them[g]) {
                    continue;
                }
            }
        }
        out_invariants.push(translated);
    }
    writeln!(w, "{}", out_invariants.len())?;
    for invariant in &out_invariants {
        for literal in invariant {
            write!(w, "{literal} ")?;
        }
        writeln!(w, "-1")?;
    }
    writeln!(w)?;

    // ---- actions ----
    let ce_actions = conditional_effect_actions(domain, model)?;
    let mut actions: Vec<ActionOutput> = Vec::new();
    let mut number_of_actions_in_output = 0usize;

    for task_id in model.task_ids() {
        if model.pruned_tasks[task_id]
            || !domain.is_primitive(model.tasks[task_id].task)
            || domain.tasks[usize::from(model.tasks[task_id].task)].compiled_conditional_effect
        {
            continue;
        }
        let cost = ground_cost(domain, out.problem, &model.tasks[task_id]);

        // positions of cover-pruned preconditions in the instance vector
        let mut marker_of: BTreeMap<FactId, usize> = BTreeMap::new();
        for &pre in &model.tasks[task_id].preconditions {
            if cover_pruned.contains_key(&pre) && !marker_of.contains_key(&pre) {
                let next = marker_of.len();
                marker_of.insert(pre, next);
            }
        }

        let mut preconditions: Vec<Marked> = Vec::new();
        for &pre in &model.tasks[task_id].preconditions {
            if model.pruned_facts[pre] {
                continue;
            }
            match marker_of.get(&pre) {
                Some(&slot) => preconditions.push(-(slot as i64) - 1),
                None => preconditions.push(slot_of(pre) as i64),
            }
        }

        let mut adds: Vec<(Vec<Marked>, usize)> = Vec::new();
        let mut dels: Vec<(Vec<Marked>, usize)> = Vec::new();
        let mut ce_guards: Vec<FactId> = Vec::new();

        for &add in &model.tasks[task_id].add_effects {
            if domain.predicates[model.facts[add].predicate].guard_for_conditional_effect {
                ce_guards.push(add);
                continue;
            }
            if model.pruned_facts[add] || cover_pruned.contains_key(&add) {
                continue;
            }
            let slot = slot_of(add);
            adds.push((vec![], slot));
            if slot < number_of_sas_covered_facts {
                let group = sas_group_of_slot[slot];
                if let Some(none_slot) = none_of_them_slot[group] {
                    dels.push((vec![], none_slot));
                }
            }
        }
        for &group in &model.tasks[task_id].none_of_those_effects {
            // a cover-pruned group has no slots of its own any more
            if let Some(none_slot) = none_of_them_slot[group] {
                adds.push((vec![], none_slot));
            }
        }
        for &del in &model.tasks[task_id].del_effects {
            if model.pruned_facts[del] || cover_pruned.contains_key(&del) {
                continue;
            }
            let slot = slot_of(del);
            if config.sas_mode != SasDeleteMode::AsInput && slot < number_of_sas_covered_facts {
                continue;
            }
            dels.push((vec![], slot));
        }

        // fold the compiled conditional effects back in
        for guard in ce_guards {
            let Some(&ce_task) = ce_actions.get(&guard) else {
                continue; // condition unreachable
            };
            let ce = &model.tasks[ce_task];
            let (effect, is_add) = match (ce.add_effects.first(), ce.del_effects.first()) {
                (Some(&e), _) => (e, true),
                (None, Some(&e)) => (e, false),
                (None, None) => continue,
            };
            if model.pruned_facts[effect] || cover_pruned.contains_key(&effect) {
                continue;
            }
            let slot = slot_of(effect);
            if config.sas_mode != SasDeleteMode::AsInput && slot < number_of_sas_covered_facts {
                continue;
            }

            let mut condition: Vec<Marked> = Vec::new();
            for &pre in &ce.preconditions {
                if domain.predicates[model.facts[pre].predicate].guard_for_conditional_effect
                    || model.pruned_facts[pre]
                {
                    continue;
                }
                if cover_pruned.contains_key(&pre) {
                    let next = marker_of.len();
                    let slot = *marker_of.entry(pre).or_insert(next);
                    condition.push(-(slot as i64) - 1);
                } else {
                    condition.push(slot_of(pre) as i64);
                }
            }

            if is_add {
                adds.push((condition.clone(), slot));
                if slot < number_of_sas_covered_facts {
                    let group = sas_group_of_slot[slot];
                    if let Some(none_slot) = none_of_them_slot[group] {
                        dels.push((condition, none_slot));
                    }
                }
            } else {
                dels.push((condition, slot));
            }
        }

        if config.sas_mode == SasDeleteMode::All {
            let mut extra: Vec<(Vec<Marked>, usize)> = Vec::new();
            for (condition, slot) in &adds {
                if *slot >= number_of_sas_covered_facts {
                    continue;
                }
                let (from, to) = slot_range[*slot];
                for other in from..=to {
                    if other != *slot {
                        extra.push((condition.clone(), other));
                    }
                }
            }
            dels.extend(extra);
        }

        let instances = instantiate_cover_pruned(&marker_of, &cover_pruned);
        number_of_actions_in_output += instances.len();
        actions.push(ActionOutput {
            task: task_id,
            cost,
            preconditions,
            adds,
            dels,
            instances,
        });
    }

    writeln!(w, ";; Actions")?;
    writeln!(w, "{}", number_of_actions_in_output + usize::from(contains_empty_method))?;

    let mut action_counter = 0usize;
    if contains_empty_method {
        // the no-op for otherwise empty methods
        writeln!(w, "0")?;
        writeln!(w, "-1")?;
        writeln!(w, "-1")?;
        writeln!(w, "-1")?;
        action_counter += 1;
    }

    // output numbers of ground tasks; multi-instance tasks get one number
    // per cover assignment, grouped later under a synthesized abstract task
    let mut task_output_no: RefMap<GroundTaskId, usize> = RefMap::default();
    let mut cover_instances: HashMap<GroundTaskId, Vec<usize>> = HashMap::new();
    let mut number_of_additional_abstracts = 0usize;

    for action in &actions {
        if action.instances.len() == 1 {
            task_output_no.insert(action.task, action_counter);
        } else {
            number_of_additional_abstracts += 1;
        }
        for assignment in &action.instances {
            cover_instances.entry(action.task).or_default().push(action_counter);
            action_counter += 1;

            let resolve = |marked: Marked| -> usize {
                if marked >= 0 {
                    marked as usize
                } else {
                    cover_value_slot(assignment[(-marked - 1) as usize])
                }
            };

            writeln!(w, "{}", action.cost)?;
            let preconditions: BTreeSet<usize> = action.preconditions.iter().map(|&p| resolve(p)).collect();
            for p in &preconditions {
                write!(w, "{p} ")?;
            }
            writeln!(w, "-1")?;

            let write_effects = |w: &mut dyn Write, effects: &[(Vec<Marked>, usize)]| -> Result<()> {
                let resolved: BTreeSet<(BTreeSet<usize>, usize)> = effects
                    .iter()
                    .map(|(condition, slot)| (condition.iter().map(|&c| resolve(c)).collect(), *slot))
                    .collect();
                for (condition, slot) in resolved {
                    write!(w, "{} ", condition.len())?;
                    for c in condition {
                        write!(w, "{c} ")?;
                    }
                    write!(w, "{slot}  ")?;
                }
                writeln!(w, "-1")?;
                Ok(())
            };
            write_effects(w, &action.adds)?;
            write_effects(w, &action.dels)?;
        }
    }

    // ---- initial state ----
    writeln!(w)?;
    writeln!(w, ";; initial state")?;
    for (group_idx, group) in out.sas_groups.iter().enumerate() {
        if pruned_sas_groups.contains(&group_idx) {
            continue;
        }
        let mut wrote = false;
        for &fact in group {
            if init_facts.contains(&fact) {
                write!(w, "{} ", slot_of(fact))?;
                wrote = true;
            }
        }
        if !wrote {
            let none_slot = none_of_them_slot[group_idx].expect("initially empty group has none-of-them");
            write!(w, "{none_slot} ")?;
        }
    }
    for &fact in init_facts.iter().sorted() {
        if cover_pruned.contains_key(&fact) {
            continue;
        }
        let Some(&slot) = output_no.get(fact) else { continue };
        if slot < number_of_sas_covered_facts {
            continue; // written with its SAS+ variable above
        }
        write!(w, "{slot} ")?;
    }
    writeln!(w, "-1")?;

    writeln!(w)?;
    writeln!(w, ";; goal")?;
    for &fact in &goal {
        write!(w, "{} ", slot_of(fact))?;
    }
    writeln!(w, "-1")?;

    // ---- tasks ----
    let abstract_tasks: Vec<GroundTaskId> = model
        .task_ids()
        .filter(|&t| !model.pruned_tasks[t] && !domain.is_primitive(model.tasks[t].task))
        .collect();

    writeln!(w)?;
    writeln!(w, ";; tasks (primitive and abstract)")?;
    writeln!(
        w,
        "{}",
        number_of_actions_in_output
            + abstract_tasks.len()
            + number_of_additional_abstracts
            + usize::from(contains_empty_method)
    )?;
    if contains_empty_method {
        writeln!(w, "0 __noop")?;
    }
    for action in &actions {
        for _ in &action.instances {
            writeln!(w, "0 {}", model.task_name(domain, action.task))?;
        }
    }

    let mut initial_abstract: Option<usize> = None;
    for &task_id in &abstract_tasks {
        task_output_no.insert(task_id, action_counter);
        if Some(model.tasks[task_id].task) == out.problem.initial_abstract_task {
            initial_abstract = Some(action_counter);
        }
        writeln!(w, "1 {}", model.task_name(domain, task_id))?;
        action_counter += 1;
    }

    // synthesized abstract tasks grouping the cover instances
    let mut number_of_additional_methods = 0usize;
    let multi_instance: Vec<GroundTaskId> = actions
        .iter()
        .filter(|a| a.instances.len() > 1)
        .map(|a| a.task)
        .collect();
    for &task_id in &multi_instance {
        writeln!(w, "1 __sas{}", model.task_name(domain, task_id))?;
        task_output_no.insert(task_id, action_counter);
        action_counter += 1;
        number_of_additional_methods += cover_instances[&task_id].len();
    }

    writeln!(w)?;
    writeln!(w, ";; initial abstract task")?;
    match (out.problem.initial_abstract_task, initial_abstract) {
        (None, _) => writeln!(w, "-1")?,
        (Some(_), Some(number)) => writeln!(w, "{number}")?,
        (Some(_), None) => {
            return Err(crate::grounding::GoalUnreachable(
                "no ground instance of the initial abstract task survives".to_string(),
            )
            .into());
        }
    }

    // ---- methods ----
    let live_methods: Vec<GroundMethodId> = model
        .method_ids()
        .filter(|&m| !model.pruned_methods[m])
        .collect();
    writeln!(w)?;
    writeln!(w, ";; methods")?;
    writeln!(w, "{}", live_methods.len() + number_of_additional_methods)?;
    for &method_id in &live_methods {
        let method = &model.methods[method_id];
        writeln!(w, "{}", domain.methods[usize::from(method.method)].name)?;
        writeln!(
            w,
            "{}",
            task_output_no.get(method.decomposes).expect("decomposed task has a number")
        )?;

        let mut output_index_of_subtask: HashMap<usize, usize> = HashMap::new();
        for (output_index, &subtask_index) in method.subtask_ordering.iter().enumerate() {
            output_index_of_subtask.insert(subtask_index, output_index);
            let subtask = method.subtasks[subtask_index];
            assert!(!model.pruned_tasks[subtask], "pruned subtask in unpruned method");
            let number = *task_output_no.get(subtask).expect("subtask has a number");
            write!(w, "{number} ")?;
        }
        if contains_empty_method && method.subtask_ordering.is_empty() {
            write!(w, "0 ")?;
        }
        writeln!(w, "-1")?;

        let orderings: BTreeSet<(usize, usize)> = domain.methods[usize::from(method.method)]
            .orderings
            .iter()
            .map(|&(a, b)| (output_index_of_subtask[&a], output_index_of_subtask[&b]))
            .collect();
        for (a, b) in orderings {
            write!(w, "{a} {b} ")?;
        }
        writeln!(w, "-1")?;
    }

    // one unit method per cover instance of a multi-instance action
    for &task_id in &multi_instance {
        let abstract_number = *task_output_no.get(task_id).expect("synthesized task number");
        for &instance_number in &cover_instances[&task_id] {
            writeln!(w, "sas_method_{}", model.task_name(domain, task_id))?;
            writeln!(w, "{abstract_number}")?;
            writeln!(w, "{instance_number} -1")?;
            writeln!(w, "-1")?;
        }
    }

    if !config.quiet {
        info!(
            state_features = slots.len(),
            actions = number_of_actions_in_output,
            abstract_tasks = abstract_tasks.len(),
            methods = live_methods.len() + number_of_additional_methods,
            "grounded instance written"
        );
    }
    Ok(())
}
