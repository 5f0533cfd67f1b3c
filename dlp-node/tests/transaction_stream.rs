//! End-to-end transaction stream tests
//!
//! Drives the node the way the binary does: a TOML config file plus JSON
//! transactions, one receipt per transaction.

use dlp_node::{Config, DlpApp, Receipt};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use std::io::Write;

const CONFIG: &str = r#"
node_id = "test-node"

[engine]
eligible_dlps_limit = 100
epoch_dlps_limit = 4
min_stake_amount = "1"
min_dlp_registration_stake = "50"
min_dlp_stakers_percentage = "50"
max_dlp_stakers_percentage = "100"
dlp_eligibility_threshold = "1000"
dlp_sub_eligibility_threshold = "300"
stake_withdrawal_delay = 10
reward_claim_delay = 5
epoch_size = 100
epoch_reward_amount = "1000"
start_block = 100
day_size = 10

[roles]
admin = "admin"
maintainers = ["maintainer"]
managers = ["oracle"]

[genesis]
reward_reserve = "100000"

[genesis.balances]
owner = "5000"
staker = "5000"
"#;

fn create_test_app() -> DlpApp {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(CONFIG.as_bytes()).unwrap();
    let config = Config::from_file(file.path()).unwrap();
    DlpApp::new(&config).unwrap()
}

fn send(app: &DlpApp, caller: &str, block: u64, command: Value) -> Receipt {
    let tx = json!({ "caller": caller, "block_number": block, "command": command });
    app.deliver_bytes(tx.to_string().as_bytes())
}

fn amount(receipt: &Receipt) -> Decimal {
    receipt.output["amount"].as_str().unwrap().parse().unwrap()
}

fn register(app: &DlpApp, block: u64) -> Receipt {
    send(
        app,
        "owner",
        block,
        json!({
            "type": "register_dlp",
            "info": {
                "dlp_address": "dlp-1",
                "owner_address": "owner",
                "treasury_address": "treasury",
                "stakers_percentage": "80",
                "name": "first",
                "icon_url": "",
                "website": "",
                "metadata": ""
            },
            "stake": "1000"
        }),
    )
}

#[test]
fn test_stake_epoch_score_claim_flow() {
    let app = create_test_app();

    let receipt = register(&app, 1);
    assert!(receipt.ok, "{:?}", receipt.error);
    assert_eq!(receipt.output["dlp_id"], 1);

    let receipt = send(&app, "staker", 1, json!({ "type": "create_stake", "dlp_id": 1, "amount": "500" }));
    assert!(receipt.ok, "{:?}", receipt.error);
    let stake_id = receipt.output["stake_id"].as_u64().unwrap();

    let receipt = send(&app, "anyone", 210, json!({ "type": "create_epochs" }));
    assert!(receipt.ok, "{:?}", receipt.error);
    assert_eq!(receipt.output["epoch_ids"], json!([1]));
    assert!(receipt
        .events
        .iter()
        .any(|record| serde_json::to_value(&record.event).unwrap()["type"] == "epoch_finalized"));

    let epoch = send(&app, "anyone", 210, json!({ "type": "epoch", "epoch_id": 1 }));
    assert_eq!(epoch.output["dlp_ids"], json!([1]));

    // Nothing to claim before the oracle reports
    let claimable = send(&app, "staker", 210, json!({ "type": "stake_claimable", "stake_id": stake_id }));
    assert_eq!(amount(&claimable), Decimal::ZERO);

    let receipt = send(
        &app,
        "oracle",
        210,
        json!({
            "type": "save_epoch_dlps_total_stakes_score",
            "entries": [{ "epoch_id": 1, "dlp_id": 1, "total_stakes_score": "10000" }]
        }),
    );
    assert!(receipt.ok, "{:?}", receipt.error);

    let claimable = amount(&send(
        &app,
        "staker",
        210,
        json!({ "type": "stake_claimable", "stake_id": stake_id }),
    ));
    assert!(claimable > Decimal::ZERO);

    let claim = send(&app, "staker", 210, json!({ "type": "claim_stakes_reward", "stake_ids": [stake_id] }));
    assert!(claim.ok, "{:?}", claim.error);
    assert_eq!(amount(&claim), claimable);

    let again = send(&app, "staker", 211, json!({ "type": "claim_stakes_reward", "stake_ids": [stake_id] }));
    assert!(again.ok);
    assert_eq!(amount(&again), Decimal::ZERO);
}

#[test]
fn test_score_submission_requires_manager() {
    let app = create_test_app();
    assert!(register(&app, 1).ok);
    assert!(send(&app, "anyone", 210, json!({ "type": "create_epochs" })).ok);

    let entries = json!({
        "type": "save_epoch_dlps_total_stakes_score",
        "entries": [{ "epoch_id": 1, "dlp_id": 1, "total_stakes_score": "10" }]
    });
    let receipt = send(&app, "staker", 210, entries.clone());
    assert!(!receipt.ok);
    assert!(receipt.events.is_empty());

    assert!(send(&app, "oracle", 210, entries.clone()).ok);
    // write-once
    assert!(!send(&app, "oracle", 210, entries).ok);
}

#[test]
fn test_block_regression_rejected() {
    let app = create_test_app();
    assert!(register(&app, 50).ok);

    let receipt = send(&app, "staker", 10, json!({ "type": "create_stake", "dlp_id": 1, "amount": "5" }));
    assert!(!receipt.ok);
    assert!(receipt.error.is_some());
}

#[test]
fn test_receipt_json_omits_empty_fields() {
    let app = create_test_app();
    let receipt = send(&app, "anyone", 1, json!({ "type": "top_dlp_ids", "limit": 3 }));
    let encoded = serde_json::to_value(&receipt).unwrap();
    assert_eq!(encoded, json!({ "ok": true, "output": [] }));
}
