// tests/config.rs

use std::error::Error;
use std::fs;
use std::time::Duration;

use action_queue::cli::{CliArgs, Command, LogLevel};
use action_queue::config::{
    default_config_path, load_and_validate, load_from_str, load_or_default, validate_config,
    ConfigFile, RawConfigFile,
};
use action_queue::errors::{ActionQueueError, EffectError};
use action_queue::logging::resolve_level;
use action_queue::program::{ActionEffect, ActionOp, ActionProgram, ProgramState, NEVER};
use action_queue::{parse_and_validate_op, render_program_list};
use action_queue_test_utils::builders::{loan_deposit, seq};
use clap::Parser;
use tempfile::TempDir;
use tracing::Level;

type TestResult = Result<(), Box<dyn Error>>;

fn config_error(raw: RawConfigFile) -> String {
    match ConfigFile::try_from(raw) {
        Err(ActionQueueError::Config(msg)) => msg,
        other => panic!("expected a config error, got {other:?}"),
    }
}

#[test]
fn empty_file_yields_defaults() -> TestResult {
    let cfg = ConfigFile::try_from(load_from_str("")?)?;
    assert_eq!(cfg.engine.client_id, "default");
    assert_eq!(cfg.engine.tick_interval_ms, 1_000);
    assert!(cfg.engine.enable_dryrun);
    assert_eq!((cfg.backoff.min_ms, cfg.backoff.max_ms), (2_000, 600_000));
    assert_eq!(cfg.store.root, ".action-queue");
    assert_eq!(cfg.push.notification_title, "Actions complete");
    Ok(())
}

#[test]
fn full_file_is_parsed() -> TestResult {
    let raw = load_from_str(
        r#"
        [engine]
        client_id = "device-a"
        tick_interval_ms = 250
        enable_dryrun = false

        [backoff]
        min_ms = 500
        max_ms = 5000
        factor = 2.0

        [store]
        root = "data/programs"

        [push]
        notification_title = "Queue"
        notification_body = "All set."
        "#,
    )?;
    let cfg = ConfigFile::try_from(raw)?;

    let options = cfg.engine_options();
    assert_eq!(options.tick_interval, Duration::from_millis(250));
    assert!(!options.enable_dryrun);
    assert_eq!(options.backoff.min_ms, 500);
    assert_eq!(options.backoff.max_ms, 5_000);
    assert_eq!(options.backoff.factor, 2.0);
    assert_eq!(options.push_message.title, "Queue");
    assert_eq!(options.push_message.body, "All set.");
    assert_eq!(cfg.store.root, "data/programs");
    Ok(())
}

#[test]
fn unknown_fields_are_rejected() {
    assert!(matches!(
        load_from_str("[engine]\nclient = \"x\"\n"),
        Err(ActionQueueError::Toml(_))
    ));
    assert!(matches!(
        load_from_str("[metrics]\nenabled = true\n"),
        Err(ActionQueueError::Toml(_))
    ));
}

#[test]
fn semantic_rules_are_enforced() {
    let mut raw = RawConfigFile::default();
    raw.engine.client_id = "  ".to_string();
    assert_eq!(config_error(raw), "[engine].client_id must not be empty");

    let mut raw = RawConfigFile::default();
    raw.engine.tick_interval_ms = 0;
    assert_eq!(config_error(raw), "[engine].tick_interval_ms must be >= 1 (got 0)");

    let mut raw = RawConfigFile::default();
    raw.backoff.min_ms = 0;
    assert_eq!(config_error(raw), "[backoff].min_ms must be >= 1 (got 0)");

    let mut raw = RawConfigFile::default();
    raw.backoff.min_ms = 10;
    raw.backoff.max_ms = 5;
    assert_eq!(config_error(raw), "[backoff].min_ms (10) must not exceed max_ms (5)");

    let mut raw = RawConfigFile::default();
    raw.backoff.factor = 0.5;
    assert_eq!(config_error(raw), "[backoff].factor must be >= 1.0 (got 0.5)");

    let mut raw = RawConfigFile::default();
    raw.backoff.factor = f64::NAN;
    assert!(validate_config(&raw).is_err());

    let mut raw = RawConfigFile::default();
    raw.store.root = String::new();
    assert_eq!(config_error(raw), "[store].root must not be empty");
}

#[test]
fn loads_from_disk() -> TestResult {
    let tmp = TempDir::new()?;
    let path = tmp.path().join("ActionQueue.toml");
    fs::write(&path, "[engine]\nclient_id = \"disk\"\n")?;
    assert_eq!(load_and_validate(&path)?.engine.client_id, "disk");

    fs::write(&path, "[backoff]\nfactor = 0.1\n")?;
    assert!(matches!(load_and_validate(&path), Err(ActionQueueError::Config(_))));

    let missing = tmp.path().join("absent.toml");
    assert!(matches!(load_and_validate(&missing), Err(ActionQueueError::Io(_))));
    assert_eq!(load_or_default(&missing)?, ConfigFile::try_from(RawConfigFile::default())?);
    assert_eq!(default_config_path().to_str(), Some("ActionQueue.toml"));
    Ok(())
}

#[test]
fn log_level_resolution() {
    assert_eq!(resolve_level(Some(LogLevel::Debug), Some("error")), Level::DEBUG);
    assert_eq!(resolve_level(None, Some(" Warning ")), Level::WARN);
    assert_eq!(resolve_level(None, Some("TRACE")), Level::TRACE);
    assert_eq!(resolve_level(None, Some("loud")), Level::INFO);
    assert_eq!(resolve_level(None, None), Level::INFO);
}

#[test]
fn cli_parses_subcommands() -> TestResult {
    let args = CliArgs::try_parse_from(["action-queue", "list"])?;
    assert_eq!(args.config, "ActionQueue.toml");
    assert!(args.log_level.is_none());
    assert!(matches!(args.command, Command::List));

    let args = CliArgs::try_parse_from([
        "action-queue",
        "--config",
        "cfg/queue.toml",
        "show",
        "abc123",
        "--log-level",
        "trace",
    ])?;
    assert_eq!(args.config, "cfg/queue.toml");
    assert!(matches!(args.log_level, Some(LogLevel::Trace)));
    assert!(matches!(args.command, Command::Show { ref program_id } if program_id == "abc123"));

    assert!(CliArgs::try_parse_from(["action-queue"]).is_err());
    assert!(CliArgs::try_parse_from(["action-queue", "show"]).is_err());
    Ok(())
}

#[test]
fn operation_json_is_validated() -> TestResult {
    let op = parse_and_validate_op(
        r#"{
            "type": "seq",
            "actions": [
                {"type": "loan-deposit", "borrowPluginId": "aave", "walletId": "w1", "nativeAmount": "100"},
                {"type": "broadcast-tx", "walletId": "w1", "tx": {"txid": "t", "signedTx": "0xABCD"}}
            ]
        }"#,
    )?;
    assert!(matches!(op, ActionOp::Seq { ref actions } if actions.len() == 2));

    let empty = parse_and_validate_op(r#"{"type": "par", "actions": []}"#).unwrap_err();
    assert!(empty.to_string().contains("root: 'par' has no actions"), "{empty}");

    let bad_amount = parse_and_validate_op(
        r#"{"type": "seq", "actions": [
            {"type": "loan-borrow", "borrowPluginId": "aave", "walletId": "w1", "nativeAmount": "1.5"}
        ]}"#,
    )
    .unwrap_err();
    assert!(bad_amount.to_string().contains("root[0]"), "{bad_amount}");

    let bad_hex = parse_and_validate_op(
        r#"{"type": "broadcast-tx", "walletId": "w1", "tx": {"txid": "t", "signedTx": "xyz"}}"#,
    )
    .unwrap_err();
    assert!(matches!(bad_hex, ActionQueueError::InvalidOperation(_)));

    assert!(matches!(
        parse_and_validate_op(r#"{"type": "teleport"}"#),
        Err(ActionQueueError::Json(_))
    ));
    Ok(())
}

#[test]
fn program_list_rendering() {
    assert_eq!(render_program_list(&[]), "no programs\n");

    let running = ActionProgram {
        program_id: "aaa".to_string(),
        action_op: seq(vec![loan_deposit("w1", None, "1")]),
        complete_message: None,
    };
    let running_state = ProgramState::initial("dev", "aaa", 1_000);

    let failed = ActionProgram {
        program_id: "bbb".to_string(),
        ..running.clone()
    };
    let failed_state = ProgramState {
        effect: Some(ActionEffect::failed(EffectError::new("boom"))),
        effective: true,
        next_execution_time: NEVER,
        ..ProgramState::initial("dev", "bbb", 0)
    };

    let rendered = render_program_list(&[(running, running_state), (failed, failed_state)]);
    assert_eq!(
        rendered,
        "aaa  client=dev  status=pending  next=1000\n\
         bbb  client=dev  status=error: boom  next=never\n"
    );
}
