// tests/display.rs

use std::error::Error;

use action_queue::display::{display_info, program_display_info, DisplayStatus};
use action_queue::errors::EffectError;
use action_queue::program::{ActionEffect, ActionProgram};
use action_queue_test_utils::builders::{
    broadcast_tx, loan_borrow, loan_deposit, loan_repay, par, seq, swap,
};

type TestResult = Result<(), Box<dyn Error>>;

fn statuses(info: &action_queue::display::DisplayInfo) -> Vec<DisplayStatus> {
    info.steps.iter().map(|step| step.status.clone()).collect()
}

fn tx_confs(tx_id: &str) -> ActionEffect {
    ActionEffect::TxConfs {
        tx_id: tx_id.to_string(),
        wallet_id: "w1".to_string(),
        confirmations: 1,
    }
}

#[test]
fn unstarted_program_is_all_pending() {
    let op = seq(vec![
        loan_deposit("w1", None, "100"),
        par(vec![loan_borrow("w1", Some("USDC"), "50"), swap("w1", "w2", "10")]),
    ]);

    let info = display_info(&op, None);
    assert_eq!(info.status, DisplayStatus::Pending);
    assert_eq!(info.title, "Sequence");
    assert_eq!(statuses(&info), vec![DisplayStatus::Pending; 2]);
    assert_eq!(statuses(&info.steps[1]), vec![DisplayStatus::Pending; 2]);
}

#[test]
fn running_seq_shows_done_active_pending() {
    let op = seq(vec![
        loan_deposit("w1", None, "100"),
        broadcast_tx("w1", "t2", "00"),
        loan_borrow("w1", None, "50"),
    ]);
    let effect = ActionEffect::Seq {
        op_index: 1,
        child_effects: vec![Some(tx_confs("t1")), Some(tx_confs("t2"))],
    };

    let info = display_info(&op, Some(&effect));
    assert_eq!(info.status, DisplayStatus::Active);
    assert_eq!(
        statuses(&info),
        vec![DisplayStatus::Done, DisplayStatus::Active, DisplayStatus::Pending]
    );
    assert_eq!(info.steps[1].message, "Broadcasting t2 from wallet w1");
}

#[test]
fn failed_step_is_shown_on_that_step() {
    let op = seq(vec![loan_deposit("w1", None, "100"), loan_borrow("w1", None, "50")]);
    let failure = EffectError::new("insufficient collateral");
    let effect = ActionEffect::Seq {
        op_index: 1,
        child_effects: vec![Some(ActionEffect::done()), Some(ActionEffect::failed(failure.clone()))],
    };

    let info = display_info(&op, Some(&effect));
    assert_eq!(info.status, DisplayStatus::Error(failure.clone()));
    assert_eq!(
        statuses(&info),
        vec![DisplayStatus::Done, DisplayStatus::Error(failure)]
    );
}

#[test]
fn failure_lands_on_the_step_being_waited_on() {
    let op = seq(vec![
        loan_deposit("w1", None, "100"),
        seq(vec![broadcast_tx("w1", "t2", "00"), broadcast_tx("w1", "t3", "00")]),
    ]);
    let effect = ActionEffect::Seq {
        op_index: 1,
        child_effects: vec![
            Some(tx_confs("t1")),
            Some(ActionEffect::Seq {
                op_index: 1,
                child_effects: vec![Some(tx_confs("t2")), Some(tx_confs("t3"))],
            }),
        ],
    };
    let failure = EffectError::new("Transaction was dropped");

    let failed = effect.with_failure(failure.clone());

    assert_eq!(
        failed,
        ActionEffect::Seq {
            op_index: 1,
            child_effects: vec![
                Some(tx_confs("t1")),
                Some(ActionEffect::Seq {
                    op_index: 1,
                    child_effects: vec![
                        Some(tx_confs("t2")),
                        Some(ActionEffect::failed(failure.clone())),
                    ],
                }),
            ],
        }
    );
    let info = display_info(&op, Some(&failed));
    assert_eq!(info.status, DisplayStatus::Error(failure.clone()));
    assert_eq!(
        statuses(&info),
        vec![DisplayStatus::Done, DisplayStatus::Error(failure.clone())]
    );
    assert_eq!(
        statuses(&info.steps[1]),
        vec![DisplayStatus::Done, DisplayStatus::Error(failure)]
    );
}

#[test]
fn par_failure_keeps_finished_children_done() {
    let op = par(vec![loan_deposit("w1", None, "1"), broadcast_tx("w1", "t2", "00")]);
    let effect = ActionEffect::Par {
        child_effects: vec![Some(ActionEffect::done()), Some(tx_confs("t2"))],
    };
    let failure = EffectError::new("Transaction was dropped");

    let failed = effect.with_failure(failure.clone());

    assert_eq!(
        failed,
        ActionEffect::Par {
            child_effects: vec![
                Some(ActionEffect::done()),
                Some(ActionEffect::failed(failure.clone())),
            ],
        }
    );
    let info = display_info(&op, Some(&failed));
    assert_eq!(
        statuses(&info),
        vec![DisplayStatus::Done, DisplayStatus::Error(failure)]
    );
}

#[test]
fn failure_without_a_position_covers_the_program() {
    let failure = EffectError::new("boom");

    let finished = ActionEffect::Par {
        child_effects: vec![Some(ActionEffect::done())],
    };
    assert_eq!(
        finished.with_failure(failure.clone()),
        ActionEffect::failed(failure.clone())
    );

    let out_of_range = ActionEffect::Seq {
        op_index: 3,
        child_effects: vec![Some(tx_confs("t1"))],
    };
    assert_eq!(
        out_of_range.with_failure(failure.clone()),
        ActionEffect::failed(failure)
    );
}

#[test]
fn root_failure_leaves_steps_untouched() {
    let op = seq(vec![loan_deposit("w1", None, "100"), loan_borrow("w1", None, "50")]);
    let effect = ActionEffect::failed(EffectError::new("Program Interrupted"));

    let info = display_info(&op, Some(&effect));
    assert!(matches!(info.status, DisplayStatus::Error(ref e) if e.message == "Program Interrupted"));
    assert_eq!(statuses(&info), vec![DisplayStatus::Pending; 2]);
}

#[test]
fn finished_and_cancelled_programs_show_every_step_done() {
    let op = par(vec![
        loan_deposit("w1", None, "100"),
        seq(vec![loan_borrow("w2", None, "5"), loan_repay("w2", None, "5")]),
    ]);

    for effect in [ActionEffect::done(), ActionEffect::cancelled()] {
        let info = display_info(&op, Some(&effect));
        assert_eq!(info.status, DisplayStatus::Done);
        assert_eq!(statuses(&info), vec![DisplayStatus::Done; 2]);
        assert_eq!(statuses(&info.steps[1]), vec![DisplayStatus::Done; 2]);
    }
}

#[test]
fn par_children_follow_their_own_effects() {
    let op = par(vec![
        loan_deposit("w1", None, "100"),
        loan_borrow("w2", None, "5"),
        swap("w1", "w3", "7"),
    ]);
    let effect = ActionEffect::Par {
        child_effects: vec![Some(ActionEffect::done()), Some(tx_confs("b")), None],
    };

    let info = display_info(&op, Some(&effect));
    assert_eq!(info.status, DisplayStatus::Active);
    assert_eq!(
        statuses(&info),
        vec![DisplayStatus::Done, DisplayStatus::Active, DisplayStatus::Pending]
    );
}

#[test]
fn chained_push_effect_shows_the_current_link() {
    let op = seq(vec![loan_deposit("w1", None, "100"), loan_borrow("w1", None, "50")]);
    let push_event = |id: &str| ActionEffect::PushEvent {
        event_id: id.to_string(),
        effect: None,
    };
    let effect = ActionEffect::Seq {
        op_index: 0,
        child_effects: vec![Some(push_event("p:seq_1")), Some(push_event("p:seq_2"))],
    };

    let info = display_info(&op, Some(&effect));
    assert_eq!(
        statuses(&info),
        vec![DisplayStatus::Active, DisplayStatus::Pending]
    );
}

#[test]
fn program_info_carries_complete_message() -> TestResult {
    let program = ActionProgram::new(seq(vec![loan_repay("w1", Some("USDC"), "10")]))
        .with_complete_message("Loan repaid", "Your loan is closed.");

    let info = program_display_info(&program, None);
    let complete = info.complete_message.as_ref().ok_or("missing complete message")?;
    assert_eq!(complete.title, "Loan repaid");
    assert!(info.to_string().contains("on completion: Loan repaid: Your loan is closed."));

    let json = serde_json::to_value(&info)?;
    assert_eq!(json["status"], "pending");
    assert_eq!(json["completeMessage"]["message"], "Your loan is closed.");
    assert_eq!(json["steps"][0]["title"], "Repay");
    Ok(())
}

#[test]
fn error_status_serializes_with_its_message() -> TestResult {
    let status = DisplayStatus::Error(EffectError::new("boom"));
    assert_eq!(serde_json::to_value(&status)?["error"]["message"], "boom");
    assert_eq!(status.to_string(), "error: boom");
    assert_eq!(serde_json::to_value(DisplayStatus::Done)?, "done");
    Ok(())
}

#[test]
fn tree_rendering_indents_steps() {
    let op = seq(vec![loan_deposit("w1", Some("WBTC"), "1")]);
    let rendered = display_info(&op, None).to_string();
    let lines: Vec<&str> = rendered.lines().collect();
    assert_eq!(lines[0], "[pending] Sequence: Running 1 steps in order");
    assert_eq!(lines[1], "  [pending] Deposit WBTC: Depositing WBTC as collateral on aave");
}
