//! End-to-end tests: textual input through the full grounding procedure to
//! the written output.

use grounder::grounding::{run_grounding, GroundingConfig, GroundingOutcome, OutputFormat};
use grounder::input;

fn ground_to_string(text: &str, config: &GroundingConfig) -> (GroundingOutcome, String, String) {
    let (mut domain, mut problem) = input::parse(text).expect("fixture parses");
    let mut dout = Vec::new();
    let mut pout = Vec::new();
    let outcome = run_grounding(&mut domain, &mut problem, config, None, &mut dout, &mut pout)
        .expect("grounding runs");
    (
        outcome,
        String::from_utf8(dout).unwrap(),
        String::from_utf8(pout).unwrap(),
    )
}

/// One truck driving between two locations, one abstract top task.
const TRANSPORT: &str = "\
3 2
t l1 l2
truck 1 0
loc 2 1 2
1
at 2 0 1
0
1 1
drive
3 0 1 1
1 const 1
1 0 0 1
1 0 0 2
1 0 0 1
0
0
0
top 0
1
m_top 1
3 0 1 1
1 0 0 1 2
0
0
0
1 1
0 0 1
0 0 2
1
0
";

#[test]
fn transport_grounds_to_planner_format() {
    let config = GroundingConfig {
        quiet: true,
        ..GroundingConfig::default()
    };
    let (outcome, out, _) = ground_to_string(TRANSPORT, &config);
    assert_eq!(outcome, GroundingOutcome::Written);

    // both at-facts survive as state features
    assert!(out.contains(";; #state features\n2\n"), "unexpected output:\n{out}");
    assert!(out.contains("at[t,l1]"));
    assert!(out.contains("at[t,l2]"));
    // four drive groundings (from l1/l2 to l1/l2)
    assert!(out.contains(";; Actions\n4\n"), "unexpected output:\n{out}");
    assert!(out.contains("drive[t,l1,l2]"));
    // one method per drive grounding
    assert!(out.contains(";; methods\n4\n"), "unexpected output:\n{out}");
    assert!(out.contains(";; initial abstract task"));
    // every section terminator in place
    for header in [
        ";; Mutex Groups",
        ";; further strict Mutex Groups",
        ";; further non strict Mutex Groups",
        ";; known invariants",
        ";; initial state",
        ";; goal",
        ";; tasks (primitive and abstract)",
    ] {
        assert!(out.contains(header), "missing section {header} in:\n{out}");
    }
}

#[test]
fn transport_with_all_analyses_still_writes() {
    let config = GroundingConfig {
        quiet: true,
        compute_invariants: true,
        h2_mutexes: true,
        ..GroundingConfig::default()
    };
    let (outcome, out, _) = ground_to_string(TRANSPORT, &config);
    assert_eq!(outcome, GroundingOutcome::Written);
    // the at-facts of the single truck form one SAS+ variable
    assert!(out.contains("0 1 var1"), "expected a two-valued SAS+ variable:\n{out}");
}

#[test]
fn transport_to_hddl() {
    let config = GroundingConfig {
        quiet: true,
        output: OutputFormat::Hddl,
        ..GroundingConfig::default()
    };
    let (outcome, dout, pout) = ground_to_string(TRANSPORT, &config);
    assert_eq!(outcome, GroundingOutcome::Written);
    assert!(dout.contains("(define (domain d)"));
    assert!(dout.contains("(:action driveLB_tCOM_l1COM_l2RB_"));
    assert!(pout.contains("(:htn"));
    assert!(pout.contains("(:goal"));
}

/// A conditional effect `q(x) if r(x)` on action t(x) with precondition
/// p(x); the goal asks for q(a).
fn conditional_effect_instance(r_initially: bool) -> String {
    let (n_init, extra) = if r_initially { (2, "2 0\n") } else { (1, "") };
    format!(
        "\
1 1
a
T 1 0
3
p 1 0
q 1 0
r 1 0
0
1 0
t
1 0
1 const 1
1 0 0
0
0
1 1 2 0 1 0
0
0
0
0
{n_init} 1
0 0
{extra}1 0
-1
0
"
    )
}

#[test]
fn conditional_effect_fires_when_condition_is_reachable() {
    let config = GroundingConfig {
        quiet: true,
        ..GroundingConfig::default()
    };
    let (outcome, out, _) = ground_to_string(&conditional_effect_instance(true), &config);
    assert_eq!(outcome, GroundingOutcome::Written);
    // q[a] is reachable through the compiled conditional effect and stays a
    // state feature (it is the goal); the guard predicate is internal
    assert!(out.contains("q[a]"), "q[a] missing from:\n{out}");
    assert!(!out.contains("guard"), "guard predicates must not be written:\n{out}");
}

#[test]
fn conditional_effect_blocked_condition_makes_goal_unreachable() {
    let config = GroundingConfig {
        quiet: true,
        ..GroundingConfig::default()
    };
    let (outcome, _, _) = ground_to_string(&conditional_effect_instance(false), &config);
    assert!(
        matches!(outcome, GroundingOutcome::GoalUnreachable(_)),
        "expected unreachable goal, got {outcome:?}"
    );
}

/// Same instance, but the goal is the static fact p(a): pruned, yet true
/// initially, so it is dropped from the goal and the run succeeds.
#[test]
fn static_goal_fact_is_dropped() {
    let text = "\
1 1
a
T 1 0
3
p 1 0
q 1 0
r 1 0
0
1 0
t
1 0
1 const 1
1 0 0
0
0
1 1 2 0 1 0
0
0
0
0
2 1
0 0
2 0
0 0
-1
0
";
    let config = GroundingConfig {
        quiet: true,
        ..GroundingConfig::default()
    };
    let (outcome, out, _) = ground_to_string(text, &config);
    assert_eq!(outcome, GroundingOutcome::Written);
    let goal_section = out.split(";; goal").nth(1).expect("goal section");
    assert!(
        goal_section.trim_start().starts_with("-1"),
        "goal must be empty in:\n{out}"
    );
}

/// An abstract task whose only method has no subtasks: with the no-op
/// compilation the writer synthesizes a `__noop` primitive.
const EMPTY_METHOD: &str = "\
1 1
a
T 1 0
1
p 1 0
0
0 1
top 0
1
m_empty 0
0
0
0
0
0 0
0
0
0
";

#[test]
fn empty_methods_get_a_noop() {
    let config = GroundingConfig {
        quiet: true,
        noop_for_empty_methods: true,
        ..GroundingConfig::default()
    };
    let (outcome, out, _) = ground_to_string(EMPTY_METHOD, &config);
    assert_eq!(outcome, GroundingOutcome::Written);
    assert!(out.contains(";; Actions\n1\n"), "the no-op must be the only action:\n{out}");
    assert!(out.contains("0 __noop"), "missing no-op task in:\n{out}");
}

#[test]
fn empty_methods_stay_empty_without_the_noop() {
    let config = GroundingConfig {
        quiet: true,
        noop_for_empty_methods: false,
        ..GroundingConfig::default()
    };
    let (outcome, out, _) = ground_to_string(EMPTY_METHOD, &config);
    assert_eq!(outcome, GroundingOutcome::Written);
    assert!(out.contains(";; Actions\n0\n"), "no actions expected:\n{out}");
    assert!(!out.contains("__noop"));
}

/// Classical instance written as Fast Downward SAS.
const CLASSICAL: &str = "\
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
1 1
0 0
0 0
-1
0
";

#[test]
fn classical_instance_to_sas() {
    let config = GroundingConfig {
        quiet: true,
        output: OutputFormat::SasPlus,
        // p(a) is static; keep it so the encoding is visible in the output
        remove_useless_predicates: false,
        ..GroundingConfig::default()
    };
    let (outcome, out, _) = ground_to_string(CLASSICAL, &config);
    assert_eq!(outcome, GroundingOutcome::Written);
    assert!(out.starts_with("begin_version\n3\nend_version\n"));
    assert!(out.contains("begin_variable"));
    assert!(out.contains("Atom p[a]"));
    assert!(out.contains("begin_operator"));
    assert!(out.contains("move[a]"));
}
