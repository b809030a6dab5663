//! End-to-end stepping of small programs through the pipeline, parsers,
//! controls, tables and exceptions.

mod common;

use std::rc::Rc;

use common::{statement, FiniteDomainSolver, TestTarget};
use p4_small_step::{
    constant::TABLE_ACTION_RUN_FIELD,
    evaluator::Config,
    ir::{
        Action,
        Block,
        Control,
        Declaration,
        Expression,
        Keyset,
        MethodCall,
        Node,
        Parser,
        ParserState,
        Program,
        SelectCase,
        Statement,
        SwitchCase,
        SwitchLabel,
        Table,
        Transition,
        Type,
    },
    program::{input_packet_size, table_apply_result_type},
    state::{
        continuation::{Body, Command, ExceptionKind},
        env::StateVariable,
        trace::TraceEvent,
        ExecutionState,
    },
    stepper::Stepper,
};
use test_log::test;

fn bit8() -> Type {
    Type::bits(8)
}

fn var(name: &str) -> Expression {
    Expression::path(name, bit8())
}

fn cell(name: &str) -> StateVariable {
    StateVariable::new(name, bit8())
}

fn assign(name: &str, value: u128) -> Statement {
    Statement::Assign {
        left:  var(name),
        right: Expression::bits(value, 8),
    }
}

fn program(declarations: Vec<Declaration>) -> Rc<Program> {
    Rc::new(Program {
        name: "main".into(),
        declarations,
    })
}

fn control(name: &str, statements: Vec<Statement>) -> Rc<Control> {
    Rc::new(Control {
        name:   name.into(),
        params: vec![],
        locals: vec![],
        body:   Block::of(statements),
    })
}

#[test]
fn minimum_packet_sizes_constrain_the_input_size() -> anyhow::Result<()> {
    let target = TestTarget::default();
    let mut solver = FiniteDomainSolver::default();
    let config = Config::default().with_min_pkt_size(64);
    let mut stepper = Stepper::new(&target, &mut solver, &config);

    let entry = Rc::new(ExecutionState::at_entry(program(vec![])));
    let branches = stepper.step(&entry)?;

    assert_eq!(branches.len(), 1);
    let pinned = Expression::eq(input_packet_size(), Expression::constant(64u64, Type::bits(32)));
    assert!(branches[0].next_state.path_constraints().contains(&pinned));
    Ok(())
}

#[test]
fn symbolic_if_conditions_fork_into_both_arms() -> anyhow::Result<()> {
    let condition = Expression::eq(Expression::symbolic("s", bit8()), Expression::bits(1, 8));
    let state = Rc::new(ExecutionState::new(Body::from(vec![statement(Statement::If {
        condition: condition.clone(),
        if_true:   Box::new(assign("x", 1)),
        if_false:  None,
    })])));

    let target = TestTarget::default();
    let mut solver = FiniteDomainSolver::default();
    let config = Config::default();
    let mut stepper = Stepper::new(&target, &mut solver, &config);
    let branches = stepper.step(&state)?;

    assert_eq!(branches.len(), 2);
    assert_eq!(branches[0].constraint, Some(condition.clone()));
    assert_eq!(branches[1].constraint, Some(Expression::not(condition)));
    assert_eq!(branches[0].next_state.next_command()?, &statement(assign("x", 1)));
    assert_eq!(
        branches[1].next_state.next_command()?,
        &statement(Statement::Block(Block::default()))
    );
    Ok(())
}

#[test]
fn switching_on_an_applied_action_runs_its_case() -> anyhow::Result<()> {
    let action = |name: &str| {
        Rc::new(Action {
            name:   name.into(),
            params: vec![],
            body:   Block::default(),
        })
    };
    let table = Rc::new(Table {
        name:           "t".into(),
        keys:           vec![],
        actions:        vec!["A".into(), "B".into()],
        default_action: "B".into(),
    });
    let apply = MethodCall::new(
        Some(Expression::path("t", Type::Void)),
        "apply",
        vec![],
        table_apply_result_type(),
    );
    let discriminant = Expression::member(Expression::MethodCall(apply), TABLE_ACTION_RUN_FIELD, Type::bits(32));
    let label = |name: &str| SwitchLabel::Expr(Expression::path(name, Type::bits(32)));
    let switch = Statement::Switch {
        expr:  discriminant,
        cases: vec![
            SwitchCase::new(label("A"), Some(assign("x", 1))),
            SwitchCase::new(label("B"), Some(assign("x", 2))),
            SwitchCase::new(SwitchLabel::Default, Some(assign("x", 3))),
        ],
    };

    let mut initial = ExecutionState::new(Body::from(vec![statement(switch)]));
    initial.push_namespace(vec![
        Declaration::Table(table),
        Declaration::Action(action("A")),
        Declaration::Action(action("B")),
        Declaration::variable("x", bit8()),
    ]);
    initial.set(cell("x"), Expression::bits(0, 8));

    // Follow the first action until the switch is resumed with a literal
    // discriminant.
    let target = TestTarget::default();
    {
        let mut solver = FiniteDomainSolver::default();
        let config = Config::default();
        let mut stepper = Stepper::new(&target, &mut solver, &config);
        let mut state = Rc::new(initial.clone());
        for _ in 0..32 {
            if let Command::Statement(Node::Statement(Statement::Switch {
                expr: Expression::Constant { .. },
                ..
            })) = state.next_command()?
            {
                break;
            }
            let branch = stepper.step(&state)?.into_iter().next().ok_or_else(|| anyhow::anyhow!("path ended"))?;
            state = Rc::new(branch.next_state);
        }

        let branches = stepper.step(&state)?;
        assert_eq!(branches.len(), 1);
        assert_eq!(branches[0].next_state.body(), &Body::from(vec![statement(assign("x", 1))]));
    }

    // Every action leads to its own case.
    let result = common::evaluate(&target, Config::default(), initial)?;
    let outcomes = result
        .terminal_states
        .iter()
        .map(|s| s.get(&cell("x")).cloned())
        .collect::<Result<Vec<_>, _>>()?;
    assert_eq!(outcomes, vec![Expression::bits(1, 8), Expression::bits(2, 8)]);
    Ok(())
}

#[test]
fn exit_in_a_control_resumes_the_pipeline_after_it() -> anyhow::Result<()> {
    let first = control("first", vec![assign("x", 1), Statement::Exit, assign("x", 2)]);
    let second = control("second", vec![assign("y", 3)]);
    let target = TestTarget::new(vec![
        Command::Statement(Node::Control(first)),
        Command::Statement(Node::Control(second)),
    ]);
    let entry = ExecutionState::at_entry(program(vec![
        Declaration::variable("x", bit8()),
        Declaration::variable("y", bit8()),
    ]));

    let result = common::evaluate(&target, Config::default(), entry)?;

    assert_eq!(result.terminal_states.len(), 1);
    let state = &result.terminal_states[0];
    assert_eq!(state.get(&cell("x"))?, &Expression::bits(1, 8));
    assert_eq!(state.get(&cell("y"))?, &Expression::bits(3, 8));
    assert_eq!(state.uncaught_exception(), None);
    assert!(state.trace().contains(&TraceEvent::Exception {
        kind:   ExceptionKind::Exit,
        caught: true,
    }));
    Ok(())
}

#[test]
fn exit_outside_a_control_ends_the_run() -> anyhow::Result<()> {
    let second = control("second", vec![assign("y", 3)]);
    let target = TestTarget::new(vec![statement(Statement::Exit), Command::Statement(Node::Control(second))]);
    let entry = ExecutionState::at_entry(program(vec![Declaration::Variable {
        name:        "y".into(),
        ty:          bit8(),
        initializer: Some(Expression::bits(9, 8)),
    }]));

    let result = common::evaluate(&target, Config::default(), entry)?;

    assert_eq!(result.terminal_states.len(), 1);
    let state = &result.terminal_states[0];
    assert_eq!(state.get(&cell("y"))?, &Expression::bits(9, 8));
    assert_eq!(state.uncaught_exception(), None);
    Ok(())
}

fn ethernet_parser() -> Rc<Parser> {
    let case = |value: u128, next: &str| SelectCase {
        keyset: Keyset::Values(vec![Expression::bits(value, 16)]),
        next:   next.into(),
    };
    Rc::new(Parser {
        name:   "parse".into(),
        params: vec![],
        locals: vec![],
        states: vec![
            ParserState {
                name:       "start".into(),
                components: vec![],
                transition: Transition::Select {
                    keys:  vec![Expression::symbolic("etherType", Type::bits(16))],
                    cases: vec![case(0x0800, "parse_ipv4"), case(0x86dd, "reject")],
                },
            },
            ParserState {
                name:       "parse_ipv4".into(),
                components: vec![p4_small_step::ir::BlockComponent::Statement(assign("seen", 1))],
                transition: Transition::Direct("accept".into()),
            },
        ],
    })
}

fn parse_then_ingress() -> (TestTarget, ExecutionState) {
    let target = TestTarget::new(vec![
        Command::Statement(Node::Parser(ethernet_parser())),
        Command::Statement(Node::Control(control("ingress", vec![assign("x", 1)]))),
    ]);
    let entry = ExecutionState::at_entry(program(vec![
        Declaration::variable("x", bit8()),
        Declaration::variable("seen", bit8()),
    ]));
    (target, entry)
}

#[test]
fn parsers_accept_reject_or_fail_to_match() -> anyhow::Result<()> {
    let (target, entry) = parse_then_ingress();
    let result = common::evaluate(&target, Config::default(), entry)?;

    let endings = result.terminal_states.iter().map(|s| s.uncaught_exception()).collect::<Vec<_>>();
    assert_eq!(endings, vec![None, Some(ExceptionKind::Reject), Some(ExceptionKind::NoMatch)]);

    let accepted = &result.terminal_states[0];
    assert_eq!(accepted.get(&cell("seen"))?, &Expression::bits(1, 8));
    assert_eq!(accepted.get(&cell("x"))?, &Expression::bits(1, 8));
    assert!(accepted.trace().contains(&TraceEvent::ParserState {
        parser: "parse".into(),
        state:  "parse_ipv4".into(),
    }));
    assert!(result.errors.is_empty());
    Ok(())
}

#[test]
fn input_packet_only_stops_after_the_parser() -> anyhow::Result<()> {
    let (target, entry) = parse_then_ingress();
    let config = Config::default().with_input_packet_only(true);
    let result = common::evaluate(&target, config, entry)?;

    let accepted = &result.terminal_states[0];
    assert_eq!(accepted.uncaught_exception(), None);
    assert_eq!(accepted.get(&cell("seen"))?, &Expression::bits(1, 8));
    assert_eq!(accepted.get(&cell("x"))?, &Expression::bits(0, 8));
    Ok(())
}
