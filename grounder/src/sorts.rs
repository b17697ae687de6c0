//! Normalization of the sort lattice into a tree.
//!
//! The sort-subset relation derived from member inclusion is in general a
//! DAG. The fact-alternating mutex inference requires a strict tree: every
//! sort has at most one parent and every constant a unique most-specific
//! sort. This pass computes the subset relation, transitively reduces it,
//! replaces sorts with multiple parents by their cheapest common ancestor,
//! and assigns each constant its direct sort.

use crate::model::{ConstId, Domain, Sort, SortId};
use anyhow::{bail, Result};
use std::collections::{BTreeSet, HashMap};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SortParent {
    /// Top of the tree.
    Root,
    /// The sort was merged into another one; see the replacement map.
    Replaced,
    Of(SortId),
}

/// Result of the normalization.
#[derive(Clone, Debug)]
pub struct SortTree {
    /// Parent of each sort, indexed by sort.
    pub parent: Vec<SortParent>,
    /// Sorts that had multiple parents, mapped to their replacement.
    pub replaced: HashMap<SortId, SortId>,
    /// The most specific sort of each constant, indexed by constant.
    pub constant_sort: Vec<SortId>,
}

impl SortTree {
    /// Resolves a sort through the replacement map.
    pub fn resolve(&self, sort: SortId) -> SortId {
        self.replaced.get(&sort).copied().unwrap_or(sort)
    }
}

/// Ensures the domain has a sort containing every constant. Returns the id
/// of that sort; an artificial root is appended only when none exists.
pub fn ensure_universal_sort(domain: &mut Domain) -> SortId {
    let n_constants = domain.constants.len();
    for (id, sort) in domain.sorts.entries() {
        if sort.members.len() == n_constants {
            return id;
        }
    }
    let members: BTreeSet<ConstId> = (0..n_constants).map(ConstId::from).collect();
    domain.sorts.push(Sort {
        name: "__object".to_string(),
        members,
    })
}

/// `true` iff every upward path from `from` (following `parents`) passes
/// through `target`; the traversed sorts are accumulated in `visited`.
fn dominated_by(
    from: usize,
    target: usize,
    parents: &[BTreeSet<usize>],
    visited: &mut BTreeSet<usize>,
) -> bool {
    if from == target {
        return true;
    }
    if parents[from].is_empty() {
        return false;
    }
    if !visited.insert(from) {
        return true;
    }
    parents[from].iter().all(|&p| dominated_by(p, target, parents, visited))
}

/// Finds the replacement for a sort with multiple parents: the ancestor
/// dominating all upward paths that forces the fewest sorts to be replaced
/// along with it.
fn replacement_sort(sort: usize, parents: &[BTreeSet<usize>]) -> Option<(usize, BTreeSet<usize>)> {
    let mut best: Option<(usize, BTreeSet<usize>)> = None;
    for candidate in 0..parents.len() {
        if candidate == sort {
            continue;
        }
        let mut visited = BTreeSet::new();
        if dominated_by(sort, candidate, parents, &mut visited)
            && best.as_ref().map_or(true, |(_, v)| v.len() > visited.len())
        {
            best = Some((candidate, visited));
        }
    }
    best
}

/// Normalizes the sort lattice of `domain` into a tree. A universal sort is
/// added beforehand if the domain lacks one, so a replacement always exists.
pub fn normalize(domain: &mut Domain) -> Result<SortTree> {
    ensure_universal_sort(domain);
    let n = domain.sorts.len();
    let sorts: Vec<&Sort> = domain.sorts.values().collect();

    // subset[s1][s2]: s2 is a proper subset of s1 (empty sorts excluded)
    let mut subset = vec![vec![false; n]; n];
    for s1 in 0..n {
        if sorts[s1].members.is_empty() {
            continue;
        }
        for s2 in 0..n {
            subset[s1][s2] = s1 != s2
                && !sorts[s2].members.is_empty()
                && sorts[s2].members.is_subset(&sorts[s1].members)
                && sorts[s2].members.len() < sorts[s1].members.len();
        }
    }

    // transitive reduction
    for s1 in 0..n {
        for s2 in 0..n {
            for s3 in 0..n {
                if subset[s2][s1] && subset[s1][s3] {
                    subset[s2][s3] = false;
                }
            }
        }
    }

    let mut parents: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); n];
    let mut parent = vec![SortParent::Root; n];
    for s1 in 0..n {
        for s2 in 0..n {
            if subset[s1][s2] {
                parents[s2].insert(s1);
                parent[s2] = match parent[s2] {
                    SortParent::Root => SortParent::Of(SortId::from(s1)),
                    _ => SortParent::Replaced,
                };
            }
        }
    }

    // sorts with multiple parents are merged into an ancestor
    let mut replaced: HashMap<SortId, SortId> = HashMap::new();
    for s in 0..n {
        if parent[s] != SortParent::Replaced || replaced.contains_key(&SortId::from(s)) {
            continue;
        }
        let Some((replacement, all_covered)) = replacement_sort(s, &parents) else {
            bail!(
                "sort {} has multiple parents and no possible replacement; the sort lattice cannot be normalized",
                domain.sorts[SortId::from(s)].name
            );
        };
        for covered in all_covered {
            replaced.insert(SortId::from(covered), SortId::from(replacement));
            parent[covered] = SortParent::Replaced;
        }
    }
    for s in 0..n {
        if let SortParent::Of(p) = parent[s] {
            if let Some(&r) = replaced.get(&p) {
                parent[s] = SortParent::Of(r);
            }
        }
    }

    // direct subsets, with replaced sorts redirected to their replacement
    let mut direct_subsets: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); n];
    for s1 in 0..n {
        for s2 in 0..n {
            if subset[s1][s2] && matches!(parent[s2], SortParent::Of(_) | SortParent::Root) {
                let holder = replaced.get(&SortId::from(s1)).map(|r| usize::from(*r)).unwrap_or(s1);
                direct_subsets[holder].insert(s2);
            }
        }
    }

    // a constant belongs directly to a sort if no direct subsort contains it
    let mut constant_sort = vec![None; domain.constants.len()];
    for s1 in 0..n {
        if parent[s1] == SortParent::Replaced {
            continue;
        }
        for &elem in &sorts[s1].members {
            let in_subsort = direct_subsets[s1]
                .iter()
                .any(|&s2| sorts[s2].members.contains(&elem));
            if in_subsort {
                continue;
            }
            let slot = &mut constant_sort[usize::from(elem)];
            if slot.is_some() {
                bail!(
                    "constant {} has two direct sorts after normalization",
                    domain.constants[elem]
                );
            }
            *slot = Some(SortId::from(s1));
        }
    }
    let constant_sort = constant_sort
        .into_iter()
        .enumerate()
        .map(|(c, s)| match s {
            Some(s) => Ok(s),
            None => bail!("constant {} belongs to no sort", domain.constants[ConstId::from(c)]),
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(SortTree {
        parent,
        replaced,
        constant_sort,
    })
}

/// `true` iff `sub` equals `sup` or lies below it in the normalized tree.
pub fn is_subsort(tree: &SortTree, sub: SortId, sup: SortId) -> bool {
    let sup = tree.resolve(sup);
    let mut cur = tree.resolve(sub);
    loop {
        if cur == sup {
            return true;
        }
        match tree.parent[usize::from(cur)] {
            SortParent::Of(p) => cur = p,
            _ => return false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sort(name: &str, members: &[u32]) -> Sort {
        Sort {
            name: name.to_string(),
            members: members.iter().map(|&c| ConstId::from_u32(c)).collect(),
        }
    }

    fn domain_with_sorts(n_constants: u32, sorts: Vec<Sort>) -> Domain {
        let mut domain = Domain::default();
        for c in 0..n_constants {
            domain.constants.push(format!("c{c}"));
        }
        for s in sorts {
            domain.sorts.push(s);
        }
        domain
    }

    #[test]
    fn universal_sort_is_recognized() {
        let mut domain = domain_with_sorts(2, vec![sort("object", &[0, 1]), sort("sub", &[0])]);
        ensure_universal_sort(&mut domain);
        assert_eq!(domain.sorts.len(), 2, "no artificial root expected");
    }

    #[test]
    fn artificial_root_added_when_needed() {
        let mut domain = domain_with_sorts(2, vec![sort("left", &[0]), sort("right", &[1])]);
        let root = ensure_universal_sort(&mut domain);
        assert_eq!(domain.sorts.len(), 3);
        assert_eq!(domain.sorts[root].members.len(), 2);
    }

    #[test]
    fn simple_chain_becomes_tree() {
        let mut domain =
            domain_with_sorts(3, vec![sort("object", &[0, 1, 2]), sort("vehicle", &[0, 1]), sort("truck", &[0])]);
        let tree = normalize(&mut domain).unwrap();
        assert_eq!(tree.parent[1], SortParent::Of(SortId::from_u32(0)));
        assert_eq!(tree.parent[2], SortParent::Of(SortId::from_u32(1)));
        assert_eq!(tree.constant_sort[0], SortId::from_u32(2));
        assert_eq!(tree.constant_sort[2], SortId::from_u32(0));
        assert!(is_subsort(&tree, SortId::from_u32(2), SortId::from_u32(0)));
        assert!(!is_subsort(&tree, SortId::from_u32(0), SortId::from_u32(2)));
    }

    #[test]
    fn diamond_is_merged() {
        // both "ab" and "ac" contain constant 0; sort "a" has two parents
        let mut domain = domain_with_sorts(
            3,
            vec![sort("all", &[0, 1, 2]), sort("ab", &[0, 1]), sort("ac", &[0, 2]), sort("a", &[0])],
        );
        let tree = normalize(&mut domain).unwrap();
        let a = SortId::from_u32(3);
        assert!(tree.replaced.contains_key(&a), "diamond bottom must be replaced");
        // every constant still gets exactly one direct sort
        assert_eq!(tree.constant_sort.len(), 3);
    }
}
