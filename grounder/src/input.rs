//! Parser for the intermediate text format produced by the lifted front end.
//!
//! The format is whitespace-separated and line-oriented; lines starting with
//! `#` are comments. See the repository documentation for the section
//! layout. Every index read from the input is bounds-checked against the
//! entities declared before it.

use crate::model::*;
use smallvec::SmallVec;
use std::collections::BTreeSet;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("unexpected end of input while reading {0}")]
    UnexpectedEof(&'static str),
    #[error("expected an integer while reading {context}, got \"{token}\"")]
    ExpectedInt { context: &'static str, token: String },
    #[error("{kind} index {index} out of range (only {count} declared)")]
    IndexOutOfRange {
        kind: &'static str,
        index: i64,
        count: usize,
    },
    #[error("constraint type must be \"=\" or \"!=\", got \"{0}\"")]
    BadConstraint(String),
    #[error("cost term must be \"const\" or \"fun\", got \"{0}\"")]
    BadCostTerm(String),
}

type Result<T> = std::result::Result<T, ParseError>;

/// Sequential token reader over the comment-stripped input.
struct Tokens {
    tokens: Vec<String>,
    pos: usize,
}

impl Tokens {
    fn new(text: &str) -> Self {
        let tokens = text
            .lines()
            .filter(|line| !line.trim_start().starts_with('#'))
            .flat_map(|line| line.split_ascii_whitespace())
            .map(|t| t.to_string())
            .collect();
        Tokens { tokens, pos: 0 }
    }

    fn next(&mut self, context: &'static str) -> Result<&str> {
        let tok = self.tokens.get(self.pos).ok_or(ParseError::UnexpectedEof(context))?;
        self.pos += 1;
        Ok(tok)
    }

    fn string(&mut self, context: &'static str) -> Result<String> {
        Ok(self.next(context)?.to_string())
    }

    fn int(&mut self, context: &'static str) -> Result<i64> {
        let tok = self.next(context)?;
        tok.parse().map_err(|_| ParseError::ExpectedInt {
            context,
            token: tok.to_string(),
        })
    }

    fn count(&mut self, context: &'static str) -> Result<usize> {
        let n = self.int(context)?;
        if n < 0 {
            return Err(ParseError::IndexOutOfRange {
                kind: context,
                index: n,
                count: 0,
            });
        }
        Ok(n as usize)
    }

    /// Reads an index and checks it against the number of declared entities.
    fn index(&mut self, kind: &'static str, count: usize) -> Result<usize> {
        let raw = self.int(kind)?;
        if raw < 0 || raw as usize >= count {
            return Err(ParseError::IndexOutOfRange {
                kind,
                index: raw,
                count,
            });
        }
        Ok(raw as usize)
    }
}

fn read_atom(t: &mut Tokens, domain: &Domain, n_vars: usize) -> Result<Atom> {
    let predicate = PredId::from(t.index("predicate", domain.predicates.len())?);
    let arity = domain.predicates[predicate].argument_sorts.len();
    let mut args = SmallVec::with_capacity(arity);
    for _ in 0..arity {
        args.push(t.index("variable", n_vars)?);
    }
    Ok(Atom { predicate, args })
}

fn read_fact(t: &mut Tokens, domain: &Domain) -> Result<Fact> {
    let predicate = PredId::from(t.index("predicate", domain.predicates.len())?);
    let arity = domain.predicates[predicate].argument_sorts.len();
    let mut args = SmallVec::with_capacity(arity);
    for _ in 0..arity {
        args.push(ConstId::from(t.index("constant", domain.constants.len())?));
    }
    Ok(Fact { predicate, args })
}

fn read_constraint(t: &mut Tokens) -> Result<VariableConstraint> {
    let kind = match t.next("constraint")? {
        "=" => ConstraintKind::Equal,
        "!=" => ConstraintKind::NotEqual,
        other => return Err(ParseError::BadConstraint(other.to_string())),
    };
    let var1 = t.count("constraint variable")?;
    let var2 = t.count("constraint variable")?;
    Ok(VariableConstraint { kind, var1, var2 })
}

fn read_conditional_effect(t: &mut Tokens, domain: &Domain, n_vars: usize) -> Result<ConditionalEffect> {
    let n_cond = t.count("conditional effect condition count")?;
    let mut condition = Vec::with_capacity(n_cond);
    for _ in 0..n_cond {
        condition.push(read_atom(t, domain, n_vars)?);
    }
    let effect = read_atom(t, domain, n_vars)?;
    Ok(ConditionalEffect { condition, effect })
}

fn read_cost(t: &mut Tokens, domain: &Domain, n_vars: usize) -> Result<Vec<CostTerm>> {
    let n = t.count("cost term count")?;
    let mut cost = Vec::with_capacity(n);
    for _ in 0..n {
        match t.next("cost term")? {
            "const" => cost.push(CostTerm::Constant(t.int("cost constant")?)),
            "fun" => {
                let f = FunId::from(t.index("function", domain.functions.len())?);
                let arity = domain.functions[f].argument_sorts.len();
                let mut args = SmallVec::with_capacity(arity);
                for _ in 0..arity {
                    args.push(t.index("function argument", n_vars)?);
                }
                cost.push(CostTerm::Fluent(f, args));
            }
            other => return Err(ParseError::BadCostTerm(other.to_string())),
        }
    }
    Ok(cost)
}

fn read_primitive(t: &mut Tokens, domain: &Domain) -> Result<Task> {
    let name = t.string("task name")?;

    let n_vars = t.count("variable count")?;
    let mut variable_sorts = Vec::with_capacity(n_vars);
    for _ in 0..n_vars {
        variable_sorts.push(SortId::from(t.index("sort", domain.sorts.len())?));
    }

    let cost = read_cost(t, domain, n_vars)?;

    let mut read_atoms = |t: &mut Tokens, what: &'static str| -> Result<Vec<Atom>> {
        let n = t.count(what)?;
        (0..n).map(|_| read_atom(t, domain, n_vars)).collect()
    };
    let preconditions = read_atoms(t, "precondition count")?;
    let add_effects = read_atoms(t, "add effect count")?;
    let del_effects = read_atoms(t, "delete effect count")?;

    let n_cond_add = t.count("conditional add count")?;
    let conditional_add = (0..n_cond_add)
        .map(|_| read_conditional_effect(t, domain, n_vars))
        .collect::<Result<_>>()?;
    let n_cond_del = t.count("conditional delete count")?;
    let conditional_del = (0..n_cond_del)
        .map(|_| read_conditional_effect(t, domain, n_vars))
        .collect::<Result<_>>()?;

    let n_constraints = t.count("constraint count")?;
    let constraints = (0..n_constraints).map(|_| read_constraint(t)).collect::<Result<_>>()?;

    Ok(Task {
        name,
        cost,
        original_variable_count: variable_sorts.len(),
        variable_sorts,
        preconditions,
        add_effects,
        del_effects,
        conditional_add,
        conditional_del,
        constraints,
        methods: vec![],
        compiled_conditional_effect: false,
    })
}

fn read_abstract(t: &mut Tokens, domain: &Domain) -> Result<Task> {
    let name = t.string("task name")?;
    let n_vars = t.count("variable count")?;
    let mut variable_sorts = Vec::with_capacity(n_vars);
    for _ in 0..n_vars {
        variable_sorts.push(SortId::from(t.index("sort", domain.sorts.len())?));
    }
    Ok(Task {
        name,
        original_variable_count: variable_sorts.len(),
        variable_sorts,
        ..Task::default()
    })
}

fn read_method(t: &mut Tokens, domain: &Domain) -> Result<Method> {
    let name = t.string("method name")?;
    let task = TaskId::from(t.index("task", domain.tasks.len())?);

    let n_vars = t.count("method variable count")?;
    let mut variable_sorts = Vec::with_capacity(n_vars);
    for _ in 0..n_vars {
        variable_sorts.push(SortId::from(t.index("sort", domain.sorts.len())?));
    }

    let task_arity = domain.tasks[task].variable_sorts.len();
    let mut task_parameters = Vec::with_capacity(task_arity);
    for _ in 0..task_arity {
        task_parameters.push(t.index("task parameter", n_vars)?);
    }

    let n_subtasks = t.count("subtask count")?;
    let mut subtasks = Vec::with_capacity(n_subtasks);
    for _ in 0..n_subtasks {
        let sub = TaskId::from(t.index("subtask task", domain.tasks.len())?);
        let arity = domain.tasks[sub].variable_sorts.len();
        let mut args = SmallVec::with_capacity(arity);
        for _ in 0..arity {
            args.push(t.index("subtask argument", n_vars)?);
        }
        subtasks.push(Subtask { task: sub, args });
    }

    let n_orderings = t.count("ordering count")?;
    let mut orderings = Vec::with_capacity(n_orderings);
    for _ in 0..n_orderings {
        let a = t.index("ordering subtask", n_subtasks)?;
        let b = t.index("ordering subtask", n_subtasks)?;
        orderings.push((a, b));
    }

    let n_constraints = t.count("constraint count")?;
    let constraints = (0..n_constraints).map(|_| read_constraint(t)).collect::<Result<_>>()?;

    Ok(Method {
        name,
        task,
        variable_sorts,
        task_parameters,
        subtasks,
        orderings,
        constraints,
    })
}

/// Parses a full domain/problem pair from the textual intermediate format.
pub fn parse(text: &str) -> Result<(Domain, Problem)> {
    let mut t = Tokens::new(text);
    let mut domain = Domain::default();

    let n_constants = t.count("constant count")?;
    let n_sorts = t.count("sort count")?;
    for _ in 0..n_constants {
        let name = t.string("constant name")?;
        domain.constants.push(name);
    }
    for _ in 0..n_sorts {
        let name = t.string("sort name")?;
        let n_members = t.count("sort member count")?;
        let mut members = BTreeSet::new();
        for _ in 0..n_members {
            members.insert(ConstId::from(t.index("constant", n_constants)?));
        }
        domain.sorts.push(Sort { name, members });
    }

    let n_predicates = t.count("predicate count")?;
    for _ in 0..n_predicates {
        let name = t.string("predicate name")?;
        let n_args = t.count("predicate arity")?;
        let mut argument_sorts = Vec::with_capacity(n_args);
        for _ in 0..n_args {
            argument_sorts.push(SortId::from(t.index("sort", n_sorts)?));
        }
        domain.predicates.push(Predicate {
            name,
            argument_sorts,
            guard_for_conditional_effect: false,
        });
    }

    let n_functions = t.count("function count")?;
    for _ in 0..n_functions {
        let name = t.string("function name")?;
        let n_args = t.count("function arity")?;
        let mut argument_sorts = Vec::with_capacity(n_args);
        for _ in 0..n_args {
            argument_sorts.push(SortId::from(t.index("sort", n_sorts)?));
        }
        domain.functions.push(Function { name, argument_sorts });
    }

    let n_primitive = t.count("primitive task count")?;
    let n_abstract = t.count("abstract task count")?;
    domain.n_primitive = n_primitive;
    for _ in 0..n_primitive {
        let task = read_primitive(&mut t, &domain)?;
        domain.tasks.push(task);
    }
    for _ in 0..n_abstract {
        let task = read_abstract(&mut t, &domain)?;
        domain.tasks.push(task);
    }

    let n_methods = t.count("method count")?;
    for _ in 0..n_methods {
        let method = read_method(&mut t, &domain)?;
        let id = MethodId::from(domain.methods.len());
        domain.tasks[method.task].methods.push(id);
        domain.methods.push(method);
    }

    let n_mutexes = t.count("predicate mutex count")?;
    for _ in 0..n_mutexes {
        let p1 = PredId::from(t.index("predicate", n_predicates)?);
        let p2 = PredId::from(t.index("predicate", n_predicates)?);
        domain.predicate_mutexes.push((p1, p2));
    }

    let mut problem = Problem::default();
    let n_init = t.count("init fact count")?;
    let n_goal = t.count("goal fact count")?;
    for _ in 0..n_init {
        problem.init.push(read_fact(&mut t, &domain)?);
    }
    for _ in 0..n_goal {
        problem.goal.push(read_fact(&mut t, &domain)?);
    }

    let top = t.int("initial abstract task")?;
    problem.initial_abstract_task = if top < 0 {
        None
    } else {
        if top as usize >= domain.tasks.len() {
            return Err(ParseError::IndexOutOfRange {
                kind: "initial abstract task",
                index: top,
                count: domain.tasks.len(),
            });
        }
        Some(TaskId::from(top as usize))
    };

    let n_init_functions = t.count("init function count")?;
    for _ in 0..n_init_functions {
        let function = FunId::from(t.index("function", domain.functions.len())?);
        let arity = domain.functions[function].argument_sorts.len();
        let mut args = SmallVec::with_capacity(arity);
        for _ in 0..arity {
            args.push(ConstId::from(t.index("constant", n_constants)?));
        }
        let value = t.int("function value")?;
        problem.init_functions.insert(GroundFluent { function, args }, value);
    }

    Ok((domain, problem))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Two constants of one sort, a unary predicate `p`, an action `move`
    /// requiring and re-adding `p(x)`, no hierarchy.
    pub(crate) const CLASSICAL: &str = "\
# tiny classical instance
2 1
a b
T 2 0 1
1
p 1 0
0
1 0
move
1 0
1 const 1
1 0 0
1 0 0
0
0
0
0
0
0
1 0
0 0
-1
0
";

    #[test]
    fn parses_classical_instance() {
        let (domain, problem) = parse(CLASSICAL).unwrap();
        assert_eq!(domain.constants.len(), 2);
        assert_eq!(domain.sorts.len(), 1);
        assert_eq!(domain.sorts[SortId::from_u32(0)].members.len(), 2);
        assert_eq!(domain.predicates.len(), 1);
        assert_eq!(domain.n_primitive, 1);
        assert_eq!(domain.tasks.len(), 1);
        let task = &domain.tasks[0];
        assert_eq!(task.name, "move");
        assert_eq!(task.preconditions.len(), 1);
        assert_eq!(task.add_effects.len(), 1);
        assert!(task.del_effects.is_empty());
        assert_eq!(problem.init.len(), 1);
        assert!(problem.goal.is_empty());
        assert!(problem.initial_abstract_task.is_none());
    }

    #[test]
    fn rejects_out_of_range_predicate() {
        let broken = CLASSICAL.replace("1 0 0\n1 0 0", "1 7 0\n1 0 0");
        match parse(&broken) {
            Err(ParseError::IndexOutOfRange { kind, index, .. }) => {
                assert_eq!(kind, "predicate");
                assert_eq!(index, 7);
            }
            other => panic!("expected out-of-range error, got {other:?}"),
        }
    }

    #[test]
    fn rejects_truncated_input() {
        let truncated = &CLASSICAL[..CLASSICAL.len() - 10];
        assert!(parse(truncated).is_err());
    }
}
