//! Ground SAS+ group synthesis and invariant analysis.
//!
//! The lifted FAM groups are instantiated over the reachable facts; together
//! with declared predicate mutexes and h² results they form candidate ground
//! mutex groups. A greedy cover (largest group first) selects disjoint
//! groups as SAS+ variables; overlapping groups are kept as additional mutex
//! groups for the output. A second analysis decides which groups need a
//! "none-of-them" value and prunes actions whose preconditions violate a
//! mutex.

use crate::fam::{FamArg, FamGroup};
use crate::grounding::GroundingConfig;
use crate::model::*;
use grounder_collections::enumerate::{enumerate, StreamingIterator};
use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::debug;

/// Result of the greedy cover: disjoint groups usable as SAS+ variables and
/// the remaining (overlapping) mutex groups.
pub struct SasGroups {
    pub sas_groups: Vec<BTreeSet<FactId>>,
    pub further_mutex_groups: Vec<BTreeSet<FactId>>,
}

/// Enumerates the still-open free variables of `group` over their sorts and
/// files `fact` under every complete assignment.
fn add_fact_to_instance(
    domain: &Domain,
    instances: &mut HashMap<Vec<ConstId>, BTreeSet<FactId>>,
    fact: FactId,
    group: &FamGroup,
    assignment: &[Option<ConstId>],
) {
    let generators: Vec<std::vec::IntoIter<ConstId>> = assignment
        .iter()
        .enumerate()
        .map(|(slot, bound)| match bound {
            Some(value) => vec![*value].into_iter(),
            None => {
                let sort = group.vars[group.free_vars[slot]].sort;
                domain.sorts[sort].members.iter().copied().collect::<Vec<_>>().into_iter()
            }
        })
        .collect();
    let mut assignments = enumerate(generators);
    while let Some(complete) = assignments.next() {
        instances.entry(complete.to_vec()).or_default().insert(fact);
    }
}

/// Instantiates the lifted groups over the unpruned reachable facts,
/// augments with declared predicate mutexes and h² groups, and greedily
/// selects the SAS+ cover.
pub fn compute_sas_groups(
    domain: &Domain,
    _problem: &Problem,
    fam_groups: &[FamGroup],
    known_mutex_groups: &[BTreeSet<FactId>],
    model: &GroundModel,
    init_facts: &HashSet<FactId>,
    config: &GroundingConfig,
) -> SasGroups {
    // (group id, free assignment) -> facts
    let mut instances: Vec<HashMap<Vec<ConstId>, BTreeSet<FactId>>> =
        vec![HashMap::new(); fam_groups.len()];

    for fact_id in model.fact_ids() {
        if model.pruned_facts[fact_id] {
            continue;
        }
        let fact = &model.facts[fact_id];
        for (group_id, group) in fam_groups.iter().enumerate() {
            for literal in &group.literals {
                if literal.predicate != fact.predicate {
                    continue;
                }
                let mut matches = true;
                let mut free_assignment: Vec<Option<ConstId>> = vec![None; group.free_vars.len()];
                for (arg, &value) in literal.args.iter().zip(&fact.args) {
                    match arg {
                        FamArg::Constant(c) => {
                            if *c != value {
                                matches = false;
                                break;
                            }
                        }
                        FamArg::Variable(v) => {
                            if !domain.sorts[group.vars[*v].sort].members.contains(&value) {
                                matches = false;
                                break;
                            }
                            if !group.vars[*v].counted {
                                let slot = &mut free_assignment[group.var_position[*v]];
                                if slot.is_some() && *slot != Some(value) {
                                    matches = false;
                                    break;
                                }
                                *slot = Some(value);
                            }
                        }
                    }
                }
                if !matches {
                    continue;
                }
                add_fact_to_instance(domain, &mut instances[group_id], fact_id, group, &free_assignment);
            }
        }
    }

    let mut candidate_set: HashSet<BTreeSet<FactId>> = HashSet::new();
    for group_instances in instances {
        for (_, facts) in group_instances {
            candidate_set.insert(facts);
        }
    }

    // declared predicate mutexes contribute binary groups
    let mutex_partner: HashMap<PredId, PredId> = domain.predicate_mutexes.iter().copied().collect();
    for fact_id in model.fact_ids() {
        if model.pruned_facts[fact_id] {
            continue;
        }
        let fact = &model.facts[fact_id];
        let Some(&partner_predicate) = mutex_partner.get(&fact.predicate) else {
            continue;
        };
        let partner = Fact {
            predicate: partner_predicate,
            args: fact.args.clone(),
        };
        let Some(partner_id) = model.fact_id(&partner) else {
            continue;
        };
        if model.pruned_facts[partner_id] {
            continue;
        }
        candidate_set.insert([fact_id, partner_id].into_iter().collect());
    }

    // h² mutex groups, restricted to unpruned facts
    for group in known_mutex_groups {
        let unpruned: BTreeSet<FactId> = group
            .iter()
            .filter(|&&f| !model.pruned_facts[f])
            .copied()
            .collect();
        if unpruned.len() >= 2 {
            candidate_set.insert(unpruned);
        }
    }

    let mut by_size: Vec<BTreeSet<FactId>> = candidate_set.into_iter().collect();
    by_size.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));

    let mut fact_covered = vec![false; model.facts.len()];
    let mut sas_groups: Vec<BTreeSet<FactId>> = Vec::new();
    let mut further_mutex_groups: Vec<BTreeSet<FactId>> = Vec::new();

    for candidate in by_size {
        if candidate.len() < 2 {
            continue;
        }
        // a group with two initially true members is no SAS+ variable
        let in_init = candidate.iter().filter(|f| init_facts.contains(f)).count();
        if in_init > 1 {
            continue;
        }
        if candidate.iter().any(|&f| fact_covered[f]) {
            further_mutex_groups.push(candidate);
            continue;
        }
        for &f in &candidate {
            fact_covered[usize::from(f)] = true;
        }
        sas_groups.push(candidate);
    }

    if config.output_sas_variables_only {
        for fact_id in model.fact_ids() {
            if !model.pruned_facts[fact_id] && !fact_covered[usize::from(fact_id)] {
                sas_groups.push([fact_id].into_iter().collect());
            }
        }
    }

    debug!(
        sas_groups = sas_groups.len(),
        further_mutex_groups = further_mutex_groups.len(),
        "SAS+ cover computed"
    );

    SasGroups {
        sas_groups,
        further_mutex_groups,
    }
}

/// Result of the ground invariant analysis.
pub struct InvariantAnalysis {
    /// Per SAS+ group: does some action empty the group, or is it initially
    /// empty? Then the variable needs a "none-of-them" value.
    pub sas_needs_none_of_them: Vec<bool>,
    /// Same for the additional mutex groups (they become non-strict).
    pub mutex_needs_none_of_them: Vec<bool>,
    /// Whether any action was pruned; reachability must be re-run then.
    pub changed_pruning: bool,
}

/// Checks every unpruned ground primitive against the mutex groups: an
/// action requiring two facts of one group is unexecutable and pruned; an
/// action deleting from a group without adding to it produces the group's
/// "none-of-them" value.
pub fn ground_invariant_analysis(
    domain: &Domain,
    model: &mut GroundModel,
    init_facts: &HashSet<FactId>,
    groups: &SasGroups,
) -> InvariantAnalysis {
    let mut sas_needs = vec![false; groups.sas_groups.len()];
    let mut mutex_needs = vec![false; groups.further_mutex_groups.len()];

    // per fact, the groups containing it (SAS+ and additional ones)
    let mut sas_per_fact: Vec<Vec<usize>> = vec![Vec::new(); model.facts.len()];
    let mut mutex_per_fact: Vec<Vec<usize>> = vec![Vec::new(); model.facts.len()];
    for (idx, group) in groups.sas_groups.iter().enumerate() {
        let mut init_contains_one = false;
        for &f in group {
            sas_per_fact[usize::from(f)].push(idx);
            init_contains_one |= init_facts.contains(&f);
        }
        if !init_contains_one {
            sas_needs[idx] = true;
        }
    }
    for (idx, group) in groups.further_mutex_groups.iter().enumerate() {
        let mut init_contains_one = false;
        for &f in group {
            mutex_per_fact[usize::from(f)].push(idx);
            init_contains_one |= init_facts.contains(&f);
        }
        if !init_contains_one {
            mutex_needs[idx] = true;
        }
    }

    let mut changed_pruning = false;
    for task_id in model.task_ids() {
        if model.pruned_tasks[task_id] || !domain.is_primitive(model.tasks[task_id].task) {
            continue;
        }
        model.tasks[task_id].none_of_those_effects.clear();

        // two distinct preconditions in one mutex group: unexecutable
        let mut required: HashMap<(bool, usize), usize> = HashMap::new();
        let mut handled: HashSet<FactId> = HashSet::new();
        for &pre in &model.tasks[task_id].preconditions {
            if !handled.insert(pre) {
                continue;
            }
            for &g in &sas_per_fact[usize::from(pre)] {
                *required.entry((true, g)).or_default() += 1;
            }
            for &g in &mutex_per_fact[usize::from(pre)] {
                *required.entry((false, g)).or_default() += 1;
            }
        }
        if required.values().any(|&count| count > 1) {
            debug!(task = %model.task_name(domain, task_id), "pruned: preconditions violate a mutex");
            model.pruned_tasks[usize::from(task_id)] = true;
            changed_pruning = true;
            continue;
        }

        // groups deleted from but not added to
        let mut added: HashSet<(bool, usize)> = HashSet::new();
        let mut deleted: HashSet<(bool, usize)> = HashSet::new();
        for &add in &model.tasks[task_id].add_effects {
            added.extend(sas_per_fact[usize::from(add)].iter().map(|&g| (true, g)));
            added.extend(mutex_per_fact[usize::from(add)].iter().map(|&g| (false, g)));
        }
        for &del in &model.tasks[task_id].del_effects {
            deleted.extend(sas_per_fact[usize::from(del)].iter().map(|&g| (true, g)));
            deleted.extend(mutex_per_fact[usize::from(del)].iter().map(|&g| (false, g)));
        }
        let mut none_effects: Vec<usize> = Vec::new();
        for &(is_sas, g) in deleted.difference(&added) {
            if is_sas {
                sas_needs[g] = true;
                none_effects.push(g);
            } else {
                mutex_needs[g] = true;
            }
        }
        none_effects.sort_unstable();
        model.tasks[usize::from(task_id)].none_of_those_effects = none_effects;
    }

    InvariantAnalysis {
        sas_needs_none_of_them: sas_needs,
        mutex_needs_none_of_them: mutex_needs,
        changed_pruning,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fam::compute_fam_groups;
    use crate::gpg::planning_graph::run_planning_graph;
    use smallvec::smallvec;

    /// Two trucks moving between two locations.
    fn logistics() -> (Domain, Problem) {
        let mut domain = Domain::default();
        let t1 = domain.constants.push("t1".to_string());
        let t2 = domain.constants.push("t2".to_string());
        let l1 = domain.constants.push("l1".to_string());
        let l2 = domain.constants.push("l2".to_string());
        let truck = domain.sorts.push(Sort {
            name: "truck".to_string(),
            members: [t1, t2].into_iter().collect(),
        });
        let loc = domain.sorts.push(Sort {
            name: "loc".to_string(),
            members: [l1, l2].into_iter().collect(),
        });
        let at = domain.predicates.push(Predicate {
            name: "at".to_string(),
            argument_sorts: vec![truck, loc],
            guard_for_conditional_effect: false,
        });
        domain.n_primitive = 1;
        domain.tasks.push(Task {
            name: "drive".to_string(),
            variable_sorts: vec![truck, loc, loc],
            original_variable_count: 3,
            preconditions: vec![Atom {
                predicate: at,
                args: smallvec![0, 1],
            }],
            add_effects: vec![Atom {
                predicate: at,
                args: smallvec![0, 2],
            }],
            del_effects: vec![Atom {
                predicate: at,
                args: smallvec![0, 1],
            }],
            ..Task::default()
        });

        let mut problem = Problem::default();
        problem.init.push(Fact {
            predicate: at,
            args: smallvec![t1, l1],
        });
        problem.init.push(Fact {
            predicate: at,
            args: smallvec![t2, l2],
        });
        (domain, problem)
    }

    fn ground(domain: &Domain, problem: &Problem, config: &GroundingConfig) -> GroundModel {
        let pg = run_planning_graph(domain, problem, None, config);
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

    #[test]
    fn one_sas_variable_per_truck_without_none_of_them() {
        let (mut domain, problem) = logistics();
        let config = GroundingConfig::default();
        let fam = compute_fam_groups(&mut domain, &problem, &config).unwrap();
        let mut model = ground(&domain, &problem, &config);
        let init_facts: HashSet<FactId> =
            problem.init.iter().filter_map(|f| model.fact_id(f)).collect();

        let groups = compute_sas_groups(&domain, &problem, &fam, &[], &model, &init_facts, &config);
        // one variable per truck, each holding both locations
        assert_eq!(groups.sas_groups.len(), 2);
        assert!(groups.sas_groups.iter().all(|g| g.len() == 2));

        let analysis = ground_invariant_analysis(&domain, &mut model, &init_facts, &groups);
        assert!(analysis.sas_needs_none_of_them.iter().all(|&b| !b));
        assert!(!analysis.changed_pruning);
        assert!(model.tasks.iter().all(|t| t.none_of_those_effects.is_empty()));
    }

    #[test]
    fn action_with_mutex_preconditions_is_pruned() {
        let (mut domain, problem) = logistics();
        // a bogus action requiring a truck at two different places
        let at = PredId::from_u32(0);
        let truck = SortId::from_u32(0);
        let loc = SortId::from_u32(1);
        domain.tasks.push(Task {
            name: "tear".to_string(),
            variable_sorts: vec![truck, loc, loc],
            original_variable_count: 3,
            preconditions: vec![
                Atom {
                    predicate: at,
                    args: smallvec![0, 1],
                },
                Atom {
                    predicate: at,
                    args: smallvec![0, 2],
                },
            ],
            constraints: vec![VariableConstraint {
                kind: ConstraintKind::NotEqual,
                var1: 1,
                var2: 2,
            }],
            ..Task::default()
        });
        domain.n_primitive = 2;

        let config = GroundingConfig::default();
        let fam = compute_fam_groups(&mut domain, &problem, &config).unwrap();
        let mut model = ground(&domain, &problem, &config);
        let init_facts: HashSet<FactId> =
            problem.init.iter().filter_map(|f| model.fact_id(f)).collect();
        let groups = compute_sas_groups(&domain, &problem, &fam, &[], &model, &init_facts, &config);
        let analysis = ground_invariant_analysis(&domain, &mut model, &init_facts, &groups);

        assert!(analysis.changed_pruning);
        for task_id in model.task_ids() {
            let name = &domain.tasks[usize::from(model.tasks[task_id].task)].name;
            if name == "tear" {
                assert!(model.pruned_tasks[task_id]);
            }
        }
    }
}
