// tests/push_offload.rs

mod common;
use crate::common::{context, init_tracing, local_options, with_timeout, Harness};

use std::error::Error;

use action_queue::engine::{offload_program, Clock, ExecutionOutput};
use action_queue::errors::ActionQueueError;
use action_queue::program::{ActionEffect, ActionProgram, ProgramState, NEVER};
use action_queue::push::mock::MockPushServer;
use action_queue::push::{
    effect_to_trigger, prepare_new_push_events, PushBroadcastTx, PushEventUpdate, PushMessage,
    PushTrigger,
};
use action_queue::wallet::mock::MockWallet;
use action_queue::wallet::{BroadcastTx, Confirmations, NetworkFee, SignedTransaction};
use action_queue_test_utils::builders::{
    broadcast_tx, loan_borrow, loan_deposit, loan_repay, par, seq, swap,
};

type TestResult = Result<(), Box<dyn Error>>;

fn tx_confs(tx_id: &str) -> ActionEffect {
    ActionEffect::TxConfs {
        tx_id: tx_id.to_string(),
        wallet_id: "w1".to_string(),
        confirmations: 1,
    }
}

fn tx_confirm(txid: &str) -> PushTrigger {
    PushTrigger::TxConfirm {
        plugin_id: "ethereum".to_string(),
        confirmations: 1,
        txid: txid.to_string(),
    }
}

fn push_event(event_id: &str, watched: ActionEffect) -> Option<ActionEffect> {
    Some(ActionEffect::PushEvent {
        event_id: event_id.to_string(),
        effect: Some(Box::new(watched)),
    })
}

/// Tick with every push event fired, until the program finishes.
async fn run_with_push_triggered(h: &Harness, program_id: &str, max_ticks: usize) -> ProgramState {
    for _ in 0..max_ticks {
        h.push.trigger_all();
        let state = h.state(program_id);
        if state.is_finished() {
            return state;
        }
        if state.next_execution_time > h.clock.now_ms() {
            h.clock.set(state.next_execution_time);
        }
        h.scheduler.run_once().await;
    }
    panic!("program {program_id} did not finish within {max_ticks} ticks");
}

#[tokio::test]
async fn loan_chain_is_offloaded_as_linked_events() -> TestResult {
    init_tracing();
    let h = Harness::with_dryrun();
    let program = h.schedule(seq(vec![
        loan_deposit("w1", None, "100"),
        loan_borrow("w1", None, "50"),
        loan_repay("w1", None, "50"),
    ]));
    let pid = program.program_id.clone();

    h.scheduler.run_once().await; // deposit runs locally
    h.scheduler.run_once().await; // the rest is simulated and uploaded

    let updates = h.push.updates();
    assert_eq!(updates.len(), 1);
    let events = &updates[0].create_events;
    assert!(updates[0].remove_events.is_empty());

    let ids: Vec<&str> = events.iter().map(|e| e.event_id.as_str()).collect();
    assert_eq!(
        ids,
        vec![
            format!("{pid}:seq_1"),
            format!("{pid}:seq_2"),
            format!("{pid}:seq_2_done"),
        ]
    );

    assert_eq!(events[0].trigger, tx_confirm("deposit-w1-100-1"));
    assert_eq!(events[1].trigger, tx_confirm("borrow-w1-50-dry-0"));
    assert_eq!(events[2].trigger, tx_confirm("repay-w1-50-dry-1"));

    let raw = |i: usize| -> Vec<PushBroadcastTx> { events[i].broadcast_txs.clone() };
    assert_eq!(
        raw(0),
        vec![PushBroadcastTx {
            plugin_id: "ethereum".to_string(),
            raw_tx: "0000".to_string(),
        }]
    );
    assert_eq!(raw(1)[0].raw_tx, "0001");
    assert!(raw(2).is_empty());

    assert!(events[0].push_message.is_none());
    assert!(events[1].push_message.is_none());
    assert_eq!(
        events[2].push_message,
        Some(PushMessage {
            title: "Actions complete".to_string(),
            body: "Your queued actions have finished.".to_string(),
        })
    );

    // Each simulated step saw the txs simulated before it.
    assert_eq!(
        h.wallet.dryruns(),
        vec![("borrow-w1-50".to_string(), 0), ("repay-w1-50".to_string(), 1)]
    );

    let state = h.state(&pid);
    assert!(!state.effective);
    assert_eq!(
        state.effect,
        Some(ActionEffect::Seq {
            op_index: 0,
            child_effects: vec![
                push_event(&format!("{pid}:seq_1"), tx_confs("deposit-w1-100-1")),
                push_event(&format!("{pid}:seq_2"), tx_confs("borrow-w1-50-dry-0")),
                push_event(&format!("{pid}:seq_2_done"), tx_confs("repay-w1-50-dry-1")),
            ],
        })
    );

    // Nothing fired yet: the program waits on the first event.
    let before = h.clock.now_ms();
    h.scheduler.run_once().await;
    let waiting = h.state(&pid);
    assert!(!waiting.effective);
    assert_eq!(waiting.next_execution_time, before + 15_000);
    assert_eq!(h.push.updates().len(), 1);

    let done = with_timeout(run_with_push_triggered(&h, &pid, 20)).await;
    match done.effect {
        Some(ActionEffect::Seq {
            op_index,
            ref child_effects,
        }) => {
            assert_eq!(op_index, 2);
            assert_eq!(child_effects[2], Some(ActionEffect::done()));
        }
        ref other => panic!("expected a seq effect, got {other:?}"),
    }
    assert_eq!(done.next_execution_time, NEVER);

    // Only the first leaf was approved on this device.
    assert_eq!(h.wallet.approved(), vec!["deposit-w1-100-1".to_string()]);
    assert_eq!(h.push.updates().len(), 1);
    Ok(())
}

#[tokio::test]
async fn chain_stops_at_swap_and_polls_last_step_locally() -> TestResult {
    init_tracing();
    let h = Harness::with_dryrun();
    // The server broadcasts the borrow; the local wallet sees it confirm.
    h.wallet
        .set_transaction("borrow-w1-50-dry-0", Confirmations::Count(1));
    let program = h.schedule(seq(vec![
        loan_deposit("w1", None, "100"),
        loan_borrow("w1", None, "50"),
        swap("w1", "w2", "1000"),
    ]));
    let pid = program.program_id.clone();

    h.scheduler.run_once().await;
    h.scheduler.run_once().await;

    let first = &h.push.updates()[0].create_events;
    assert_eq!(first.len(), 1);
    assert_eq!(first[0].event_id, format!("{pid}:seq_1"));
    assert!(first[0].push_message.is_some());
    assert_eq!(
        h.state(&pid).effect,
        Some(ActionEffect::Seq {
            op_index: 0,
            child_effects: vec![
                push_event(&format!("{pid}:seq_1"), tx_confs("deposit-w1-100-1")),
                Some(tx_confs("borrow-w1-50-dry-0")),
            ],
        })
    );

    let done = with_timeout(run_with_push_triggered(&h, &pid, 30)).await;

    assert_eq!(
        h.wallet.approved(),
        vec!["deposit-w1-100-1".to_string(), "swap-2".to_string()]
    );
    match &done.effect {
        Some(ActionEffect::Seq {
            op_index: 2,
            child_effects,
        }) => assert_eq!(child_effects[2], Some(ActionEffect::done())),
        other => panic!("unexpected final effect {other:?}"),
    }

    // The swap's balance threshold was handed over as a final event.
    let updates = h.push.updates();
    assert_eq!(updates.len(), 2);
    let last = &updates[1].create_events[0];
    assert_eq!(last.event_id, format!("{pid}:seq_2_done"));
    assert!(last.broadcast_txs.is_empty());
    assert_eq!(
        last.trigger,
        PushTrigger::AddressBalance {
            plugin_id: "ethereum".to_string(),
            token_id: None,
            address: "addr-w2".to_string(),
            above_amount: Some("900".to_string()),
            below_amount: None,
        }
    );
    Ok(())
}

#[tokio::test]
async fn failed_upload_falls_back_to_local_polling() -> TestResult {
    init_tracing();
    let h = Harness::with_dryrun();
    h.push.fail_uploads(true);
    let program = h.schedule(seq(vec![
        loan_deposit("w1", None, "100"),
        loan_borrow("w1", None, "50"),
    ]));

    let done = with_timeout(h.run_to_completion(&program.program_id, 10)).await;

    assert!(h.push.updates().is_empty());
    assert_eq!(
        h.wallet.approved(),
        vec!["deposit-w1-100-1".to_string(), "borrow-w1-50-2".to_string()]
    );
    assert!(matches!(
        done.effect,
        Some(ActionEffect::Seq { op_index: 1, .. })
    ));
    Ok(())
}

#[tokio::test]
async fn par_root_is_never_offloaded() -> TestResult {
    let h = Harness::with_dryrun();
    let program = h.schedule(par(vec![
        loan_deposit("w1", None, "1"),
        loan_borrow("w1", None, "2"),
    ]));

    with_timeout(h.run_to_completion(&program.program_id, 10)).await;

    assert!(h.push.updates().is_empty());
    assert!(h.wallet.dryruns().is_empty());
    Ok(())
}

#[tokio::test]
async fn broadcast_error_on_server_ends_program() -> TestResult {
    init_tracing();
    let h = Harness::with_dryrun();
    let program = h.schedule(seq(vec![
        loan_deposit("w1", None, "100"),
        loan_borrow("w1", None, "50"),
    ]));
    let pid = program.program_id.clone();
    h.scheduler.run_once().await;
    h.scheduler.run_once().await;

    let event_id = format!("{pid}:seq_1");
    h.push.set_event_state(&event_id, action_queue::push::PushEventState::Triggered);
    h.push
        .set_broadcast_errors(&event_id, vec![None, Some("nonce too low".to_string())]);
    h.scheduler.run_once().await;

    let state = h.state(&pid);
    assert_eq!(state.next_execution_time, NEVER);
    let effect = state.effect.ok_or("program has no effect")?;
    // The failure sits on the link being watched, not on the whole program.
    assert!(matches!(effect, ActionEffect::Seq { op_index: 0, .. }), "{effect:?}");
    let errors = effect.errors();
    assert_eq!(errors.len(), 1, "{effect:?}");
    assert!(errors[0].message.contains(&event_id), "{}", errors[0]);
    assert!(errors[0].message.contains("nonce too low"), "{}", errors[0]);
    Ok(())
}

#[tokio::test]
async fn missing_event_status_is_retried() -> TestResult {
    init_tracing();
    let h = Harness::with_dryrun();
    let program = h.schedule(seq(vec![
        loan_deposit("w1", None, "100"),
        loan_borrow("w1", None, "50"),
    ]));
    let pid = program.program_id.clone();
    h.scheduler.run_once().await;
    h.scheduler.run_once().await;
    let offloaded = h.state(&pid);

    h.ctx
        .push
        .update_events(PushEventUpdate {
            create_events: vec![],
            remove_events: vec![format!("{pid}:seq_1"), format!("{pid}:seq_1_done")],
        })
        .await?;
    h.scheduler.run_once().await;

    let state = h.state(&pid);
    assert_eq!(state.effect, offloaded.effect);
    assert!(!state.effective);
    assert_eq!(state.next_execution_time, state.last_execution_time + 2_000);
    Ok(())
}

#[tokio::test]
async fn presigned_tx_is_uploaded_as_bare_lowercase_hex() -> TestResult {
    let h = Harness::with_dryrun();
    let program = h.schedule(seq(vec![
        loan_deposit("w1", None, "100"),
        broadcast_tx("w1", "tx-pre", "0xABCD"),
    ]));
    h.scheduler.run_once().await;
    h.scheduler.run_once().await;

    let events = &h.push.updates()[0].create_events;
    assert_eq!(events[0].broadcast_txs[0].raw_tx, "abcd");
    assert_eq!(events[1].trigger, tx_confirm("tx-pre"));
    // Simulating the broadcast did not broadcast it.
    assert_eq!(h.wallet.broadcasts().len(), 1);
    Ok(())
}

#[tokio::test]
async fn offload_skips_effects_that_cannot_be_watched() -> TestResult {
    let wallet = MockWallet::new();
    let push = MockPushServer::new();
    let ctx = context(&wallet, &push, local_options());
    let program = ActionProgram::new(seq(vec![
        loan_deposit("w1", None, "1"),
        loan_borrow("w1", None, "2"),
    ]));

    let waiting_on_event = ProgramState {
        effect: Some(ActionEffect::Seq {
            op_index: 0,
            child_effects: vec![push_event("x:seq_1", tx_confs("a"))],
        }),
        ..ProgramState::initial("c", &program.program_id, 0)
    };
    assert_eq!(offload_program(&ctx, &program, &waiting_on_event).await?, None);

    let not_started = ProgramState::initial("c", &program.program_id, 0);
    assert_eq!(offload_program(&ctx, &program, &not_started).await?, None);
    assert!(push.updates().is_empty());
    Ok(())
}

#[tokio::test]
async fn triggers_follow_effect_shape() -> TestResult {
    let wallet = MockWallet::new();
    wallet.set_plugin_id("btc", "bitcoin");

    let par_effect = ActionEffect::Par {
        child_effects: vec![
            Some(ActionEffect::TxConfs {
                tx_id: "t1".to_string(),
                wallet_id: "btc".to_string(),
                confirmations: 2,
            }),
            Some(ActionEffect::PriceLevel {
                currency_pair: "BTC_USD".to_string(),
                above_rate: Some(70_000.0),
                below_rate: None,
            }),
        ],
    };
    assert_eq!(
        effect_to_trigger(&wallet, &par_effect).await?,
        Some(PushTrigger::All {
            triggers: vec![
                PushTrigger::TxConfirm {
                    plugin_id: "bitcoin".to_string(),
                    confirmations: 2,
                    txid: "t1".to_string(),
                },
                PushTrigger::PriceLevel {
                    currency_pair: "BTC_USD".to_string(),
                    above_rate: Some(70_000.0),
                    below_rate: None,
                },
            ],
        })
    );

    let par_with_done = ActionEffect::Par {
        child_effects: vec![Some(tx_confs("t1")), Some(ActionEffect::done())],
    };
    assert_eq!(effect_to_trigger(&wallet, &par_with_done).await?, None);

    let seq_with_null = ActionEffect::Seq {
        op_index: 0,
        child_effects: vec![None],
    };
    assert!(matches!(
        effect_to_trigger(&wallet, &seq_with_null).await,
        Err(ActionQueueError::NullEffect(_))
    ));
    Ok(())
}

#[tokio::test]
async fn each_event_waits_on_the_previous_output() -> TestResult {
    let wallet = MockWallet::new();
    let fee = NetworkFee {
        currency_code: "ETH".to_string(),
        native_amount: "1".to_string(),
    };
    let output = |op_index: usize, tx: &str| ExecutionOutput {
        effect: ActionEffect::Seq {
            op_index,
            child_effects: vec![Some(tx_confs(tx)); op_index + 1],
        },
        broadcast_txs: vec![BroadcastTx {
            wallet_id: "w1".to_string(),
            network_fee: fee.clone(),
            tx: SignedTransaction {
                txid: tx.to_string(),
                signed_tx: "0x0A".to_string(),
            },
        }],
    };
    let init = ActionEffect::Seq {
        op_index: 0,
        child_effects: vec![Some(tx_confs("t0"))],
    };
    let message = PushMessage {
        title: "t".to_string(),
        body: "b".to_string(),
    };

    let infos = prepare_new_push_events(
        &wallet,
        "p",
        &init,
        &[output(1, "t1"), output(2, "t2")],
        &message,
    )
    .await?;

    assert_eq!(infos.len(), 2);
    assert_eq!(infos[0].new_push_event.event_id, "p:seq_1");
    assert_eq!(infos[0].new_push_event.trigger, tx_confirm("t0"));
    assert_eq!(infos[1].new_push_event.event_id, "p:seq_2");
    assert_eq!(infos[1].new_push_event.trigger, tx_confirm("t1"));
    assert_eq!(infos[1].new_push_event.broadcast_txs[0].raw_tx, "0a");
    assert_eq!(infos[1].new_push_event.push_message, Some(message));
    assert_eq!(
        infos[1].push_event_effect,
        ActionEffect::PushEvent {
            event_id: "p:seq_2".to_string(),
            effect: Some(Box::new(tx_confs("t1"))),
        }
    );
    Ok(())
}
