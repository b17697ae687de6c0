//! Grounding engine for hierarchical (HTN) planning problems.
//!
//! The input is a lifted domain (sorted constants, predicates, parametric
//! primitive actions, abstract tasks with decomposition methods) and a
//! problem instance (initial state, goal, initial abstract task). The output
//! is a finite propositional representation: ground facts, ground actions,
//! ground decomposition methods, a multi-valued (SAS+) encoding of fact
//! groups and known mutex/invariant groups, written in one of three formats.
//!
//! The core is a lifted planning-graph / task-decomposition-graph fixpoint
//! ([`gpg`], [`lifted`]) surrounded by pruning and propagation machinery:
//! hierarchy typing ([`hierarchy_typing`]), fact-alternating mutex inference
//! ([`fam`]), h² mutex analysis ([`h2`]), SAS+ variable synthesis
//! ([`invariants`]) and a set of model simplification passes
//! ([`postprocessing`]). The [`grounding`] module sequences everything.

pub mod conditional_effects;
pub mod duplicate;
pub mod fam;
pub mod given_plan;
pub mod gpg;
pub mod grounded;
pub mod grounding;
pub mod h2;
pub mod hierarchy_typing;
pub mod input;
pub mod invariants;
pub mod lifted;
pub mod model;
pub mod output;
pub mod postprocessing;
pub mod sorts;
