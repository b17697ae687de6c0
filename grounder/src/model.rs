//! Data model for lifted domains and their ground instantiations.
//!
//! All entities are identified by dense typed indices into the owning
//! collection. Lifted tasks are stored primitives-first, so a task is
//! primitive iff its index is below [`Domain::n_primitive`]. Ground entities
//! carry no identity of their own: their position in the respective vector
//! of the [`GroundModel`] is their grounded number, and pruning is a
//! parallel boolean vector per collection.

use grounder_collections::create_ref_type;
use grounder_collections::ref_store::{RefPool, RefVec};
use smallvec::SmallVec;
use std::collections::{BTreeSet, HashMap};

create_ref_type!(ConstId);
create_ref_type!(SortId);
create_ref_type!(PredId);
create_ref_type!(FunId);
create_ref_type!(TaskId);
create_ref_type!(MethodId);
create_ref_type!(FactId);
create_ref_type!(GroundTaskId);
create_ref_type!(GroundMethodId);

/// A sort (type): a named set of constants.
#[derive(Clone, Debug)]
pub struct Sort {
    pub name: String,
    pub members: BTreeSet<ConstId>,
}

/// A predicate with its argument sorts.
#[derive(Clone, Debug)]
pub struct Predicate {
    pub name: String,
    pub argument_sorts: Vec<SortId>,
    /// Set for predicates synthesized to guard a compiled conditional effect.
    pub guard_for_conditional_effect: bool,
}

/// A fluent function usable in cost expressions.
#[derive(Clone, Debug)]
pub struct Function {
    pub name: String,
    pub argument_sorts: Vec<SortId>,
}

/// A predicate applied to variables of the enclosing task or method scope.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Atom {
    pub predicate: PredId,
    /// Indices of variables in the enclosing scope.
    pub args: SmallVec<[usize; 4]>,
}

/// A task applied to variables of the enclosing method scope.
#[derive(Clone, Debug)]
pub struct Subtask {
    pub task: TaskId,
    pub args: SmallVec<[usize; 4]>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ConstraintKind {
    Equal,
    NotEqual,
}

/// A binary constraint on two variables of a task or method.
#[derive(Copy, Clone, Debug)]
pub struct VariableConstraint {
    pub kind: ConstraintKind,
    pub var1: usize,
    pub var2: usize,
}

impl VariableConstraint {
    /// Whether the assignment `(val1, val2)` satisfies this constraint.
    pub fn satisfied(&self, val1: ConstId, val2: ConstId) -> bool {
        match self.kind {
            ConstraintKind::Equal => val1 == val2,
            ConstraintKind::NotEqual => val1 != val2,
        }
    }
}

/// One term of a cost expression.
#[derive(Clone, Debug)]
pub enum CostTerm {
    Constant(i64),
    /// Value of a ground fluent, looked up in the problem's init functions.
    Fluent(FunId, SmallVec<[usize; 4]>),
}

/// A conditional effect: conjunctive condition plus a single effect atom.
#[derive(Clone, Debug)]
pub struct ConditionalEffect {
    pub condition: Vec<Atom>,
    pub effect: Atom,
}

/// A task, either primitive (with preconditions and effects) or abstract
/// (with decomposition methods).
#[derive(Clone, Debug, Default)]
pub struct Task {
    pub name: String,
    pub cost: Vec<CostTerm>,
    pub variable_sorts: Vec<SortId>,
    pub preconditions: Vec<Atom>,
    pub add_effects: Vec<Atom>,
    pub del_effects: Vec<Atom>,
    pub conditional_add: Vec<ConditionalEffect>,
    pub conditional_del: Vec<ConditionalEffect>,
    pub constraints: Vec<VariableConstraint>,
    /// Methods decomposing this task (abstract tasks only).
    pub methods: Vec<MethodId>,
    /// True for primitives synthesized from a conditional effect.
    pub compiled_conditional_effect: bool,
    /// Number of variables before any compilation extended the scope; only
    /// these are printed in ground names.
    pub original_variable_count: usize,
}

/// A decomposition method for an abstract task.
#[derive(Clone, Debug)]
pub struct Method {
    pub name: String,
    /// The decomposed abstract task.
    pub task: TaskId,
    pub variable_sorts: Vec<SortId>,
    /// For each parameter of the decomposed task, the method variable bound
    /// to it.
    pub task_parameters: Vec<usize>,
    pub subtasks: Vec<Subtask>,
    /// Ordering constraints between subtask indices.
    pub orderings: Vec<(usize, usize)>,
    pub constraints: Vec<VariableConstraint>,
}

/// A lifted planning domain. Immutable after parsing, except where
/// compilation passes (conditional effects, method rewriting) extend it.
#[derive(Clone, Debug, Default)]
pub struct Domain {
    pub constants: RefVec<ConstId, String>,
    pub sorts: RefVec<SortId, Sort>,
    pub predicates: RefVec<PredId, Predicate>,
    pub functions: RefVec<FunId, Function>,
    /// Tasks with indices in `[0, n_primitive)` are primitive, the rest are
    /// abstract.
    pub n_primitive: usize,
    pub tasks: Vec<Task>,
    pub methods: Vec<Method>,
    /// Pairs of predicates declared mutually exclusive by the front end.
    pub predicate_mutexes: Vec<(PredId, PredId)>,
}

impl Domain {
    pub fn is_primitive(&self, task: TaskId) -> bool {
        usize::from(task) < self.n_primitive
    }

    pub fn task_ids(&self) -> impl Iterator<Item = TaskId> {
        (0..self.tasks.len()).map(TaskId::from)
    }

    pub fn primitive_ids(&self) -> impl Iterator<Item = TaskId> {
        (0..self.n_primitive).map(TaskId::from)
    }

    pub fn method_ids(&self) -> impl Iterator<Item = MethodId> {
        (0..self.methods.len()).map(MethodId::from)
    }
}

/// A ground fluent applied to constants, as used in init function
/// assignments.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct GroundFluent {
    pub function: FunId,
    pub args: SmallVec<[ConstId; 4]>,
}

/// A problem instance over a [`Domain`].
#[derive(Clone, Debug, Default)]
pub struct Problem {
    pub init: Vec<Fact>,
    pub goal: Vec<Fact>,
    /// `None` for classical (non-hierarchical) problems.
    pub initial_abstract_task: Option<TaskId>,
    /// Initial fluent values, consulted when grounding cost expressions.
    pub init_functions: HashMap<GroundFluent, i64>,
}

/// A ground fact: a predicate applied to constants. Identity is structural;
/// the grounded number is the fact's index in [`GroundModel::facts`].
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Fact {
    pub predicate: PredId,
    pub args: SmallVec<[ConstId; 4]>,
}

/// A ground instance of a task. For primitives the precondition/effect
/// vectors hold fact ids; for abstract tasks only `methods` is meaningful.
#[derive(Clone, Debug)]
pub struct GroundTask {
    pub task: TaskId,
    pub args: Vec<ConstId>,
    pub preconditions: Vec<FactId>,
    pub add_effects: Vec<FactId>,
    pub del_effects: Vec<FactId>,
    /// SAS+ variable indices for which this action produces a
    /// "none-of-them" effect (deletes from the group without adding).
    pub none_of_those_effects: Vec<usize>,
    /// Ground methods decomposing this task (abstract tasks only).
    pub methods: Vec<GroundMethodId>,
}

/// A ground instance of a decomposition method.
#[derive(Clone, Debug)]
pub struct GroundMethod {
    pub method: MethodId,
    pub args: Vec<ConstId>,
    /// The single ground abstract task this method decomposes.
    pub decomposes: GroundTaskId,
    /// Ground subtasks, in the order of the lifted method's subtask list.
    pub subtasks: Vec<GroundTaskId>,
    /// A topological ordering of `subtasks` indices consistent with the
    /// lifted method's ordering constraints.
    pub subtask_ordering: Vec<usize>,
}

/// The ground representation produced by the reachability analyses, together
/// with the pruning state maintained by the simplification passes.
#[derive(Clone, Debug, Default)]
pub struct GroundModel {
    /// Interned ground facts; the key doubles as the fact's grounded number
    /// and as the reverse index for init/goal lookups.
    pub facts: RefPool<FactId, Fact>,
    pub tasks: Vec<GroundTask>,
    pub methods: Vec<GroundMethod>,
    pub pruned_facts: Vec<bool>,
    pub pruned_tasks: Vec<bool>,
    pub pruned_methods: Vec<bool>,
}

impl GroundModel {
    pub fn fact_id(&self, fact: &Fact) -> Option<FactId> {
        self.facts.key_of(fact)
    }

    pub fn fact_ids(&self) -> impl Iterator<Item = FactId> {
        (0..self.facts.len()).map(FactId::from)
    }

    pub fn task_ids(&self) -> impl Iterator<Item = GroundTaskId> {
        (0..self.tasks.len()).map(GroundTaskId::from)
    }

    pub fn method_ids(&self) -> impl Iterator<Item = GroundMethodId> {
        (0..self.methods.len()).map(GroundMethodId::from)
    }

    /// Unpruned ground primitives.
    pub fn live_primitives<'a>(&'a self, domain: &'a Domain) -> impl Iterator<Item = GroundTaskId> + 'a {
        self.task_ids()
            .filter(move |&t| !self.pruned_tasks[t] && domain.is_primitive(self.tasks[t].task))
    }

    /// Human-readable name of a ground fact, e.g. `at[truck0,depot]`.
    pub fn fact_name(&self, domain: &Domain, fact: FactId) -> String {
        let f = &self.facts[fact];
        let args = f.args.iter().map(|&c| domain.constants[c].as_str());
        format!("{}[{}]", domain.predicates[f.predicate].name, itertools::join(args, ","))
    }

    /// Human-readable name of a ground task. Only the original variables are
    /// printed; variables introduced by compilation are omitted.
    pub fn task_name(&self, domain: &Domain, task: GroundTaskId) -> String {
        let t = &self.tasks[task];
        let lifted = &domain.tasks[t.task];
        let shown = t.args.iter().take(lifted.original_variable_count);
        let args = shown.map(|&c| domain.constants[c].as_str());
        format!("{}[{}]", lifted.name, itertools::join(args, ","))
    }
}

/// Ground cost of a primitive: constant terms plus the initial value of each
/// fluent term (0 for unassigned fluents).
pub fn ground_cost(domain: &Domain, problem: &Problem, task: &GroundTask) -> i64 {
    domain.tasks[task.task]
        .cost
        .iter()
        .map(|term| match term {
            CostTerm::Constant(c) => *c,
            CostTerm::Fluent(f, vars) => {
                let fluent = GroundFluent {
                    function: *f,
                    args: vars.iter().map(|&v| task.args[v]).collect(),
                };
                problem.init_functions.get(&fluent).copied().unwrap_or(0)
            }
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use smallvec::smallvec;

    #[test]
    fn ground_cost_sums_constants_and_fluents() {
        let mut domain = Domain::default();
        domain.constants.push("a".to_string());
        domain.sorts.push(Sort {
            name: "T".to_string(),
            members: [ConstId::from_u32(0)].into_iter().collect(),
        });
        domain.functions.push(Function {
            name: "weight".to_string(),
            argument_sorts: vec![SortId::from_u32(0)],
        });
        domain.n_primitive = 1;
        domain.tasks.push(Task {
            name: "move".to_string(),
            cost: vec![CostTerm::Constant(2), CostTerm::Fluent(FunId::from_u32(0), smallvec![0])],
            variable_sorts: vec![SortId::from_u32(0)],
            original_variable_count: 1,
            ..Task::default()
        });

        let mut problem = Problem::default();
        problem.init_functions.insert(
            GroundFluent {
                function: FunId::from_u32(0),
                args: smallvec![ConstId::from_u32(0)],
            },
            5,
        );

        let ground = GroundTask {
            task: TaskId::from_u32(0),
            args: vec![ConstId::from_u32(0)],
            preconditions: vec![],
            add_effects: vec![],
            del_effects: vec![],
            none_of_those_effects: vec![],
            methods: vec![],
        };
        assert_eq!(ground_cost(&domain, &problem, &ground), 7);
    }
}
