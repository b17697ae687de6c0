//! Inference of lifted fact-alternating mutex (FAM) groups.
//!
//! A FAM group is a set of literals over *free* variables (fixed within one
//! ground instance of the group) and *counted* variables (existentially
//! quantified): in every reachable state, at most one ground atom of the
//! group is true per assignment of the free variables. Following the
//! fact-alternating criterion, a candidate is accepted when
//!
//! 1. the initial state contains at most one matching fact per free-variable
//!    assignment, and
//! 2. every action that adds a matching atom also deletes a matching atom
//!    with the same free variables, and requires that deleted atom as a
//!    precondition (so the delete is never vacuous).
//!
//! Candidates are drawn from every free/counted split of every predicate's
//! argument positions, plus pairwise merges of candidates with compatible
//! free-variable signatures. The sort lattice is normalized into a tree
//! first; candidate variables use the normalized sorts.

use crate::grounding::GroundingConfig;
use crate::model::*;
use crate::sorts::{self, SortTree};
use env_param::EnvParam;
use itertools::Itertools;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info};

/// Upper bounds of the inference, as in the reference implementation.
static MAX_CANDIDATES: EnvParam<usize> = EnvParam::new("GROUNDER_FAM_MAX_CANDIDATES", "10000");
static MAX_MGROUPS: EnvParam<usize> = EnvParam::new("GROUNDER_FAM_MAX_MGROUPS", "10000");

/// Predicates wider than this produce too many free/counted splits and are
/// skipped as candidate seeds.
const MAX_CANDIDATE_ARITY: usize = 8;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FamVariable {
    pub sort: SortId,
    pub counted: bool,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FamArg {
    /// Index into [`FamGroup::vars`].
    Variable(usize),
    Constant(ConstId),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FamLiteral {
    pub predicate: PredId,
    pub args: Vec<FamArg>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FamGroup {
    pub vars: Vec<FamVariable>,
    /// Indices into `vars`, in signature order.
    pub free_vars: Vec<usize>,
    pub counted_vars: Vec<usize>,
    /// Position of each var in its respective free/counted list.
    pub var_position: Vec<usize>,
    pub literals: Vec<FamLiteral>,
}

impl FamGroup {
    fn new(vars: Vec<FamVariable>, literals: Vec<FamLiteral>) -> Self {
        let mut free_vars = Vec::new();
        let mut counted_vars = Vec::new();
        let mut var_position = Vec::with_capacity(vars.len());
        for (idx, var) in vars.iter().enumerate() {
            if var.counted {
                var_position.push(counted_vars.len());
                counted_vars.push(idx);
            } else {
                var_position.push(free_vars.len());
                free_vars.push(idx);
            }
        }
        FamGroup {
            vars,
            free_vars,
            counted_vars,
            var_position,
            literals,
        }
    }

    /// Sorts of the free variables, in signature order.
    fn free_signature(&self) -> Vec<SortId> {
        self.free_vars.iter().map(|&v| self.vars[v].sort).collect()
    }
}

/// `true` iff an atom of `predicate` can instantiate `literal`: same
/// predicate, and no argument position where the action variable's sort is
/// disjoint from the group variable's sort.
fn literal_matches_atom(domain: &Domain, group: &FamGroup, literal: &FamLiteral, task: &Task, atom: &Atom) -> bool {
    if literal.predicate != atom.predicate {
        return false;
    }
    literal.args.iter().zip(&atom.args).all(|(arg, &action_var)| {
        let action_sort = &domain.sorts[task.variable_sorts[action_var]].members;
        match arg {
            FamArg::Constant(c) => action_sort.contains(c),
            FamArg::Variable(v) => {
                let group_sort = &domain.sorts[group.vars[*v].sort].members;
                !action_sort.is_disjoint(group_sort)
            }
        }
    })
}

/// Action variables at the free positions of `literal` when instantiating it
/// with `atom`, keyed by free-variable index.
fn free_binding(group: &FamGroup, literal: &FamLiteral, atom: &Atom) -> HashMap<usize, usize> {
    let mut binding = HashMap::new();
    for (arg, &action_var) in literal.args.iter().zip(&atom.args) {
        if let FamArg::Variable(v) = arg {
            if !group.vars[*v].counted {
                binding.insert(*v, action_var);
            }
        }
    }
    binding
}

/// The fact-alternating balance check over all primitive actions.
fn balanced(domain: &Domain, group: &FamGroup) -> bool {
    for task in &domain.tasks[..domain.n_primitive] {
        // conservative: a conditional add may or may not fire, so it can
        // never be provably balanced
        let conditional_add_matches = task.conditional_add.iter().any(|ce| {
            group
                .literals
                .iter()
                .any(|l| literal_matches_atom(domain, group, l, task, &ce.effect))
        });
        if conditional_add_matches {
            return false;
        }

        let matching_adds: Vec<(&FamLiteral, &Atom)> = task
            .add_effects
            .iter()
            .flat_map(|add| {
                group
                    .literals
                    .iter()
                    .filter(|l| literal_matches_atom(domain, group, l, task, add))
                    .map(move |l| (l, add))
            })
            .collect();

        if matching_adds.is_empty() {
            continue;
        }
        // two adds per action could make two atoms of one instance true
        if matching_adds.len() > 1 {
            return false;
        }

        let (add_literal, add_atom) = matching_adds[0];
        let add_free = free_binding(group, add_literal, add_atom);

        let balanced_by_delete = task.del_effects.iter().any(|del| {
            group.literals.iter().any(|del_literal| {
                if !literal_matches_atom(domain, group, del_literal, task, del) {
                    return false;
                }
                // the delete must bind the same action variables to the
                // free positions
                if free_binding(group, del_literal, del) != add_free {
                    return false;
                }
                // and must be supported by a precondition, so it never
                // fires vacuously
                task.preconditions.iter().any(|pre| pre == del)
            })
        });
        if !balanced_by_delete {
            return false;
        }
    }
    true
}

/// At most one matching initial fact per free-variable assignment.
fn init_consistent(domain: &Domain, problem: &Problem, group: &FamGroup) -> bool {
    let mut seen: HashSet<Vec<ConstId>> = HashSet::new();
    for fact in &problem.init {
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
            let key: Vec<ConstId> = free_assignment.into_iter().map(|v| v.expect("free var bound")).collect();
            if !seen.insert(key) {
                return false; // two initial facts in one group instance
            }
        }
    }
    true
}

/// Candidates over a single predicate: every split of the argument
/// positions into free and counted variables.
fn single_predicate_candidates(domain: &Domain, tree: &SortTree, predicate: PredId) -> Vec<FamGroup> {
    let arity = domain.predicates[predicate].argument_sorts.len();
    if arity > MAX_CANDIDATE_ARITY {
        return Vec::new();
    }
    let mut candidates = Vec::new();
    for counted_mask in 0..(1usize << arity) {
        let vars: Vec<FamVariable> = domain.predicates[predicate]
            .argument_sorts
            .iter()
            .enumerate()
            .map(|(pos, &sort)| FamVariable {
                sort: tree.resolve(sort),
                counted: counted_mask & (1 << pos) != 0,
            })
            .collect();
        let literal = FamLiteral {
            predicate,
            args: (0..arity).map(FamArg::Variable).collect(),
        };
        candidates.push(FamGroup::new(vars, vec![literal]));
    }
    candidates
}

/// Merges two single-predicate candidates that agree on their free-variable
/// signature, unifying the free variables in order.
fn merge_candidates(g1: &FamGroup, g2: &FamGroup) -> Option<FamGroup> {
    if g1.free_signature() != g2.free_signature() {
        return None;
    }
    // variables: shared free vars, then the counted vars of both sides
    let mut vars: Vec<FamVariable> = g1.free_vars.iter().map(|&v| g1.vars[v].clone()).collect();
    let mut map_side = |group: &FamGroup, vars: &mut Vec<FamVariable>| -> Vec<usize> {
        let mut var_map = vec![0usize; group.vars.len()];
        for (signature_pos, &v) in group.free_vars.iter().enumerate() {
            var_map[v] = signature_pos;
        }
        for &v in &group.counted_vars {
            var_map[v] = vars.len();
            vars.push(group.vars[v].clone());
        }
        var_map
    };
    let map1 = map_side(g1, &mut vars);
    let map2 = map_side(g2, &mut vars);

    let remap = |literals: &[FamLiteral], map: &[usize]| -> Vec<FamLiteral> {
        literals
            .iter()
            .map(|l| FamLiteral {
                predicate: l.predicate,
                args: l
                    .args
                    .iter()
                    .map(|arg| match arg {
                        FamArg::Variable(v) => FamArg::Variable(map[*v]),
                        FamArg::Constant(c) => FamArg::Constant(*c),
                    })
                    .collect(),
            })
            .collect()
    };
    let mut literals = remap(&g1.literals, &map1);
    literals.extend(remap(&g2.literals, &map2));
    Some(FamGroup::new(vars, literals))
}

/// Tries to extend a partial injection of `g1`'s variables into `g2`'s
/// variables such that every literal of `g1` has a counterpart in `g2`.
fn contained_with_assignment(
    domain: &Domain,
    tree: &SortTree,
    g1: &FamGroup,
    g2: &FamGroup,
    var_map: &mut Vec<Option<usize>>,
    used: &mut Vec<bool>,
    pos: usize,
) -> bool {
    if pos == g1.vars.len() {
        return g1.literals.iter().all(|l1| {
            g2.literals.iter().any(|l2| {
                l1.predicate == l2.predicate
                    && l1.args.iter().zip(&l2.args).all(|(a1, a2)| match (a1, a2) {
                        (FamArg::Constant(c1), FamArg::Constant(c2)) => c1 == c2,
                        (FamArg::Constant(c1), FamArg::Variable(v2)) => {
                            domain.sorts[g2.vars[*v2].sort].members.contains(c1)
                        }
                        (FamArg::Variable(_), FamArg::Constant(_)) => false,
                        (FamArg::Variable(v1), FamArg::Variable(v2)) => var_map[*v1] == Some(*v2),
                    })
            })
        });
    }
    for target in 0..g2.vars.len() {
        if used[target] {
            continue;
        }
        let v1 = &g1.vars[pos];
        let v2 = &g2.vars[target];
        // a counted variable cannot be mapped to a free one
        if v1.counted && !v2.counted {
            continue;
        }
        if !sorts::is_subsort(tree, v1.sort, v2.sort) {
            continue;
        }
        var_map[pos] = Some(target);
        used[target] = true;
        if contained_with_assignment(domain, tree, g1, g2, var_map, used, pos + 1) {
            return true;
        }
        var_map[pos] = None;
        used[target] = false;
    }
    false
}

/// `true` iff every instance of `g1` is covered by an instance of `g2`.
fn is_contained_in(domain: &Domain, tree: &SortTree, g1: &FamGroup, g2: &FamGroup) -> bool {
    if g1.vars.len() > g2.vars.len() {
        return false;
    }
    let mut var_map = vec![None; g1.vars.len()];
    let mut used = vec![false; g2.vars.len()];
    contained_with_assignment(domain, tree, g1, g2, &mut var_map, &mut used, 0)
}

/// Infers FAM groups for the domain. The sort lattice is normalized as a
/// side effect (an artificial universal sort may be appended); a lattice
/// that cannot be normalized is a structural error.
pub fn compute_fam_groups(
    domain: &mut Domain,
    problem: &Problem,
    config: &GroundingConfig,
) -> anyhow::Result<Vec<FamGroup>> {
    let tree = sorts::normalize(domain)?;

    let max_candidates = MAX_CANDIDATES.get();
    let mut singles: Vec<FamGroup> = Vec::new();
    for predicate in (0..domain.predicates.len()).map(PredId::from) {
        singles.extend(single_predicate_candidates(domain, &tree, predicate));
        if singles.len() > max_candidates {
            singles.truncate(max_candidates);
            break;
        }
    }

    let mut candidates = singles.clone();
    for (i, g1) in singles.iter().enumerate() {
        for g2 in &singles[i + 1..] {
            if candidates.len() >= max_candidates {
                break;
            }
            if g1.literals[0].predicate == g2.literals[0].predicate {
                continue;
            }
            if let Some(merged) = merge_candidates(g1, g2) {
                candidates.push(merged);
            }
        }
    }
    debug!(candidates = candidates.len(), "FAM candidates generated");

    let max_groups = MAX_MGROUPS.get();
    let mut accepted: Vec<FamGroup> = Vec::new();
    for candidate in candidates {
        if accepted.len() >= max_groups {
            break;
        }
        if init_consistent(domain, problem, &candidate) && balanced(domain, &candidate) {
            accepted.push(candidate);
        }
    }

    // discard groups contained in an accepted stronger group
    let mut pruned = vec![false; accepted.len()];
    for (i, j) in (0..accepted.len()).tuple_combinations() {
        if !pruned[i] && !pruned[j] && is_contained_in(domain, &tree, &accepted[i], &accepted[j]) {
            pruned[i] = true;
        } else if !pruned[i] && !pruned[j] && is_contained_in(domain, &tree, &accepted[j], &accepted[i]) {
            pruned[j] = true;
        }
    }
    let groups: Vec<FamGroup> = accepted
        .into_iter()
        .zip(pruned)
        .filter(|(_, p)| !p)
        .map(|(g, _)| g)
        .collect();

    if !config.quiet {
        info!(groups = groups.len(), "lifted FAM groups inferred");
    }
    Ok(groups)
}

#[cfg(test)]
mod tests {
    use super::*;
    use smallvec::smallvec;

    /// Logistics-style fragment: at(truck, loc) with drive moving trucks.
    fn logistics() -> (Domain, Problem) {
        let mut domain = Domain::default();
        let t1 = domain.constants.push("t1".to_string());
        let l1 = domain.constants.push("l1".to_string());
        let l2 = domain.constants.push("l2".to_string());
        let truck = domain.sorts.push(Sort {
            name: "truck".to_string(),
            members: [t1].into_iter().collect(),
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
        (domain, problem)
    }

    #[test]
    fn infers_at_truck_counted_location() {
        let (mut domain, problem) = logistics();
        let groups = compute_fam_groups(&mut domain, &problem, &GroundingConfig::default()).unwrap();

        // expect a group at(truck, ?loc) with the truck free and the
        // location counted
        let wanted = groups.iter().any(|g| {
            g.literals.len() == 1
                && g.free_vars.len() == 1
                && g.counted_vars.len() == 1
                && !g.vars[g.free_vars[0]].counted
                && g.literals[0].args[0] == FamArg::Variable(g.free_vars[0])
        });
        assert!(wanted, "missing at(truck, ?) group in {groups:?}");
    }

    #[test]
    fn unbalanced_add_is_rejected(){
        let (mut domain, problem) = logistics();
        // a second action that adds `at` without deleting anything
        let at = PredId::from_u32(0);
        domain.tasks.insert(1, Task {
            name: "beam".to_string(),
            variable_sorts: domain.tasks[0].variable_sorts.clone(),
            original_variable_count: 3,
            add_effects: vec![Atom {
                predicate: at,
                args: smallvec![0, 2],
            }],
            ..Task::default()
        });
        domain.n_primitive = 2;
        let groups = compute_fam_groups(&mut domain, &problem, &GroundingConfig::default()).unwrap();
        assert!(
            groups.iter().all(|g| g.literals.iter().all(|l| l.predicate != at)),
            "no group over `at` may survive an unbalanced add: {groups:?}"
        );
    }

    /// The key-held / key-in merge from a lock-and-key domain.
    #[test]
    fn merges_two_predicates_over_shared_key() {
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
        domain.n_primitive = 1;
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
        let mut problem = Problem::default();
        problem.init.push(Fact {
            predicate: key_in,
            args: smallvec![k, r1],
        });

        let groups = compute_fam_groups(&mut domain, &problem, &GroundingConfig::default()).unwrap();
        let merged = groups
            .iter()
            .any(|g| g.literals.len() == 2 && g.free_vars.len() == 1 && g.counted_vars.len() == 1);
        assert!(merged, "missing merged key group in {groups:?}");
    }
}
