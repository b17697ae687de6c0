//! Planning-graph instantiation of the generic fixpoint: primitive actions
//! are the operators, facts the state elements.

use super::*;
use crate::grounding::GroundingConfig;
use crate::hierarchy_typing::HierarchyTyping;
use crate::model::*;
use grounder_collections::ref_store::RefPool;
use tracing::info;

/// Ground facts and ground primitive actions reachable from the initial
/// state. Fact keys follow the planning graph's insertion order.
pub struct PgOutput {
    pub facts: RefPool<FactId, Fact>,
    pub tasks: Vec<GroundTask>,
}

fn fact_to_atom(fact: &Fact) -> GroundAtom {
    GroundAtom {
        head: usize::from(fact.predicate),
        args: fact.args.clone(),
    }
}

fn atom_to_fact(atom: &GroundAtom) -> Fact {
    Fact {
        predicate: PredId::from(atom.head),
        args: atom.args.clone(),
    }
}

/// Runs the lifted planning graph and resolves delete effects against the
/// final fact set (a delete of an unreachable fact can never fire and is
/// dropped).
pub fn run_planning_graph(
    domain: &Domain,
    problem: &Problem,
    ht: Option<&HierarchyTyping>,
    config: &GroundingConfig,
) -> PgOutput {
    let operators = domain.tasks[..domain.n_primitive]
        .iter()
        .map(|task| GpgOperator {
            name: task.name.clone(),
            variable_sorts: task.variable_sorts.clone(),
            antecedents: task
                .preconditions
                .iter()
                .map(|pre| GpgAtom {
                    head: usize::from(pre.predicate),
                    args: pre.args.clone(),
                })
                .collect(),
            add_effects: task
                .add_effects
                .iter()
                .map(|add| GpgAtom {
                    head: usize::from(add.predicate),
                    args: add.args.clone(),
                })
                .collect(),
            constraints: task.constraints.clone(),
        })
        .collect();

    let instance = GpgInstance {
        operators,
        n_heads: domain.predicates.len(),
        sorts: &domain.sorts,
        initial_state: problem.init.iter().map(fact_to_atom).collect(),
        ht,
        ht_scope: HtScope::Tasks,
        domain,
    };

    let result = run_gpg(&instance, config);

    // intern the reached facts in state order, so keys equal the engine's ids
    let mut facts: RefPool<FactId, Fact> = RefPool::default();
    for atom in &result.state {
        facts.intern(atom_to_fact(atom));
    }

    let tasks = result
        .groundings
        .into_iter()
        .map(|grounding| {
            let lifted = &domain.tasks[grounding.operator];
            // delete effects are resolved only now, against the final fact set
            let del_effects = lifted
                .del_effects
                .iter()
                .filter_map(|del| {
                    let fact = Fact {
                        predicate: del.predicate,
                        args: del.args.iter().map(|&v| grounding.args[v]).collect(),
                    };
                    facts.key_of(&fact)
                })
                .collect();
            GroundTask {
                task: TaskId::from(grounding.operator),
                args: grounding.args,
                preconditions: grounding.matched_antecedents.iter().map(|&id| FactId::from(id)).collect(),
                add_effects: grounding.add_effects.iter().map(|&id| FactId::from(id)).collect(),
                del_effects,
                none_of_those_effects: vec![],
                methods: vec![],
            }
        })
        .collect::<Vec<_>>();

    if !config.quiet {
        info!(
            ground_actions = tasks.len(),
            reachable_facts = facts.len(),
            "planning graph done"
        );
    }

    PgOutput { facts, tasks }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input;

    #[test]
    fn classical_pg_reaches_only_supported_groundings() {
        // constants {a,b}, sort T, predicate p(T), move(x) pre p(x) add p(x),
        // init {p(a)}: only p(a) and move[a] are reachable
        let (domain, problem) = input::parse(input::tests::CLASSICAL).unwrap();
        let config = GroundingConfig::default();
        let pg = run_planning_graph(&domain, &problem, None, &config);

        assert_eq!(pg.facts.len(), 1);
        assert_eq!(pg.facts[FactId::from_u32(0)], problem.init[0]);
        assert_eq!(pg.tasks.len(), 1);
        let task = &pg.tasks[0];
        assert_eq!(task.args, vec![ConstId::from_u32(0)]);
        assert_eq!(task.preconditions, vec![FactId::from_u32(0)]);
        assert_eq!(task.add_effects, vec![FactId::from_u32(0)]);
        assert!(task.del_effects.is_empty());
    }

    #[test]
    fn variable_constraints_restrict_groundings() {
        // swap(x, y) with x != y over a two-element sort: exactly the two
        // mixed groundings survive
        let mut domain = Domain::default();
        let a = domain.constants.push("a".to_string());
        let b = domain.constants.push("b".to_string());
        let t = domain.sorts.push(Sort {
            name: "T".to_string(),
            members: [a, b].into_iter().collect(),
        });
        domain.n_primitive = 1;
        domain.tasks.push(Task {
            name: "swap".to_string(),
            variable_sorts: vec![t, t],
            original_variable_count: 2,
            constraints: vec![VariableConstraint {
                kind: ConstraintKind::NotEqual,
                var1: 0,
                var2: 1,
            }],
            ..Task::default()
        });
        let problem = Problem::default();

        let config = GroundingConfig::default();
        let pg = run_planning_graph(&domain, &problem, None, &config);
        let mut groundings: Vec<Vec<ConstId>> = pg.tasks.iter().map(|t| t.args.clone()).collect();
        groundings.sort();
        assert_eq!(groundings, vec![vec![a, b], vec![b, a]]);
    }
}
