//! End-to-end engine scenarios
//!
//! Epoch layout used throughout: epochs of 100 blocks starting at block
//! 100, so epoch 1 = [100, 199], epoch 2 = [200, 299], epoch 3 = [300, 399].

use dlp_core::{
    Address, BlockNumber, CallContext, Config, DlpInfo, DlpStatus, Engine, EngineEvent, Error,
    InMemoryVault, Role, ScoreEntry, StaticRoles,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

fn config() -> Config {
    Config {
        eligible_dlps_limit: 10,
        epoch_dlps_limit: 3,
        min_stake_amount: dec!(1),
        min_dlp_registration_stake: dec!(50),
        min_dlp_stakers_percentage: dec!(50),
        max_dlp_stakers_percentage: dec!(100),
        dlp_eligibility_threshold: dec!(100),
        dlp_sub_eligibility_threshold: dec!(50),
        stake_withdrawal_delay: 10,
        reward_claim_delay: 5,
        epoch_size: 100,
        epoch_reward_amount: dec!(1000),
        start_block: 100,
        day_size: 10,
    }
}

fn engine() -> Engine {
    let mut vault = InMemoryVault::new();
    for account in ["owner", "owner-2", "alice", "bob"] {
        vault.deposit(account, dec!(100000));
    }
    vault.fund_reserve(dec!(100000));
    let roles = StaticRoles::new("admin")
        .with_role(Role::Maintainer, "maintainer")
        .with_role(Role::Manager, "manager");
    Engine::new(config(), roles, vault).unwrap()
}

fn ctx(caller: &str, block_number: BlockNumber) -> CallContext {
    CallContext::new(caller, block_number)
}

fn info(dlp_address: &str, owner: &str) -> DlpInfo {
    DlpInfo {
        dlp_address: Address::new(dlp_address),
        owner_address: Address::new(owner),
        treasury_address: Address::new("treasury"),
        stakers_percentage: dec!(80),
        name: dlp_address.to_string(),
        icon_url: String::new(),
        website: String::new(),
        metadata: String::new(),
    }
}

fn score(epoch_id: u64, dlp_id: u64, total: Decimal) -> ScoreEntry {
    ScoreEntry {
        epoch_id,
        dlp_id,
        total_stakes_score: total,
    }
}

#[test]
fn test_register_at_eligibility_threshold() {
    let mut engine = engine();
    let dlp_id = engine
        .register_dlp(&ctx("owner", 1), info("dlp-1", "owner"), dec!(100))
        .unwrap();

    assert_eq!(engine.dlp(dlp_id).unwrap().status, DlpStatus::Eligible);
    assert_eq!(engine.top_dlp_ids(3), vec![dlp_id]);

    let events: Vec<EngineEvent> = engine.drain_events().into_iter().map(|r| r.event).collect();
    assert!(matches!(events[0], EngineEvent::DlpRegistered { dlp_id: 1, .. }));
    assert!(matches!(
        events[1],
        EngineEvent::DlpStatusUpdated {
            dlp_id: 1,
            status: DlpStatus::Eligible
        }
    ));
    assert!(matches!(events[2], EngineEvent::StakeCreated { stake_id: 1, .. }));
}

#[test]
fn test_top_three_of_five() {
    let mut engine = engine();
    for i in 1..=5u64 {
        engine
            .register_dlp(
                &ctx("owner", i),
                info(&format!("dlp-{}", i), "owner"),
                Decimal::from(i * 100),
            )
            .unwrap();
    }

    assert_eq!(engine.top_dlp_ids(3), vec![5, 4, 3]);

    // epoch 1 stays empty until epoch 2 exists
    engine.create_epochs(&ctx("anyone", 150)).unwrap();
    assert!(engine.epoch(1).unwrap().dlp_ids.is_empty());
    assert_eq!(engine.epoch_dlp(1, 5).unwrap().stake_amount, Decimal::ZERO);

    let finalized = engine.create_epochs(&ctx("anyone", 200)).unwrap();
    assert_eq!(finalized, vec![1]);
    assert_eq!(engine.epoch(1).unwrap().dlp_ids, vec![5, 4, 3]);
    assert_eq!(engine.dlp(5).unwrap().epoch_ids, vec![1]);
    assert!(engine.dlp(1).unwrap().epoch_ids.is_empty());

    let record = engine.epoch_dlp(1, 4).unwrap();
    assert!(record.is_top_dlp);
    assert_eq!(record.stake_amount, dec!(400));
    assert_eq!(record.reward_amount, dec!(1000));
    assert!(!engine.epoch_dlp(1, 2).unwrap().is_top_dlp);
}

#[test]
fn test_close_drops_to_sub_eligible() {
    let mut engine = engine();
    let dlp_id = engine
        .register_dlp(&ctx("owner", 1), info("dlp-1", "owner"), dec!(60))
        .unwrap();
    let stake_id = engine.create_stake(&ctx("alice", 2), dlp_id, dec!(50)).unwrap();
    assert_eq!(engine.dlp(dlp_id).unwrap().stake_amount, dec!(110));
    assert_eq!(engine.dlp(dlp_id).unwrap().status, DlpStatus::Eligible);

    engine.close_stakes(&ctx("alice", 3), &[stake_id]).unwrap();

    let dlp = engine.dlp(dlp_id).unwrap();
    assert_eq!(dlp.stake_amount, dec!(60));
    assert_eq!(dlp.status, DlpStatus::SubEligible);
    assert_eq!(engine.eligible_dlp_ids(), vec![dlp_id]);
    assert_eq!(engine.top_dlp_ids(3), vec![dlp_id]);
}

#[test]
fn test_withdraw_after_delay_exactly_once() {
    let mut engine = engine();
    let alice = Address::new("alice");
    engine
        .register_dlp(&ctx("owner", 1), info("dlp-1", "owner"), dec!(100))
        .unwrap();
    let stake_id = engine.create_stake(&ctx("alice", 2), 1, dec!(40)).unwrap();

    let result = engine.withdraw_stakes(&ctx("alice", 3), &[stake_id]);
    assert!(matches!(result, Err(Error::StakeNotClosed(_))));

    engine.close_stakes(&ctx("alice", 20), &[stake_id]).unwrap();
    let result = engine.withdraw_stakes(&ctx("alice", 29), &[stake_id]);
    assert!(matches!(
        result,
        Err(Error::StakeWithdrawalTooEarly {
            available_at: 30,
            ..
        })
    ));
    assert_eq!(engine.vault().balance_of(&alice), dec!(99960));

    assert_eq!(engine.withdraw_stakes(&ctx("alice", 30), &[stake_id]).unwrap(), dec!(40));
    assert_eq!(engine.vault().balance_of(&alice), dec!(100000));
    assert_eq!(engine.escrow_balance(), dec!(100));

    let result = engine.withdraw_stakes(&ctx("alice", 31), &[stake_id]);
    assert!(matches!(result, Err(Error::StakeAlreadyWithdrawn(_))));
    assert_eq!(engine.vault().balance_of(&alice), dec!(100000));
}

#[test]
fn test_withdraw_checks_owner() {
    let mut engine = engine();
    engine
        .register_dlp(&ctx("owner", 1), info("dlp-1", "owner"), dec!(100))
        .unwrap();
    let stake_id = engine.create_stake(&ctx("alice", 2), 1, dec!(40)).unwrap();
    engine.close_stakes(&ctx("alice", 3), &[stake_id]).unwrap();

    let result = engine.withdraw_stakes(&ctx("bob", 50), &[stake_id]);
    assert!(matches!(result, Err(Error::NotStakeOwner(_))));
    let result = engine.close_stakes(&ctx("alice", 50), &[stake_id]);
    assert!(matches!(result, Err(Error::AlreadyClosed(_))));
}

#[test]
fn test_reward_claim_flow() {
    let mut engine = engine();
    let alice = Address::new("alice");
    engine
        .register_dlp(&ctx("owner", 1), info("dlp-1", "owner"), dec!(100))
        .unwrap();
    let stake_id = engine.create_stake(&ctx("alice", 50), 1, dec!(100)).unwrap();
    engine.create_epochs(&ctx("anyone", 200)).unwrap();

    // alice held from 50 to 199: 14 days, multiplier 178
    assert_eq!(engine.calculate_stake_score(dec!(100), 50, 199).unwrap(), dec!(178));
    engine
        .save_epoch_dlps_total_stakes_score(&ctx("manager", 200), &[score(1, 1, dec!(356))])
        .unwrap();

    // claim delay not yet over
    assert_eq!(engine.calculate_stake_claimable_amount(stake_id, 203).unwrap(), Decimal::ZERO);
    assert_eq!(
        engine.claim_stakes_reward(&ctx("alice", 203), &[stake_id]).unwrap(),
        Decimal::ZERO
    );
    assert_eq!(engine.stake(stake_id).unwrap().last_claimed_epoch_id, 0);

    // 1000 * 80% * 178 / 356
    assert_eq!(engine.calculate_stake_claimable_amount(stake_id, 204).unwrap(), dec!(400));
    let before = engine.vault().balance_of(&alice);
    assert_eq!(
        engine.claim_stakes_reward(&ctx("alice", 204), &[stake_id, stake_id]).unwrap(),
        dec!(400)
    );
    assert_eq!(engine.vault().balance_of(&alice), before + dec!(400));
    assert_eq!(engine.stake(stake_id).unwrap().last_claimed_epoch_id, 1);

    // second claim pays nothing
    assert_eq!(
        engine.claim_stakes_reward(&ctx("alice", 250), &[stake_id]).unwrap(),
        Decimal::ZERO
    );
    assert_eq!(engine.vault().balance_of(&alice), before + dec!(400));
    assert_eq!(engine.stake(stake_id).unwrap().last_claimed_epoch_id, 1);

    // owner share of epoch 1: 1000 * 20%
    assert_eq!(engine.owner_share_of(1), Some(dec!(200)));
}

#[test]
fn test_claim_waits_for_pending_score() {
    let mut engine = engine();
    engine
        .register_dlp(&ctx("owner", 1), info("dlp-1", "owner"), dec!(100))
        .unwrap();
    let stake_id = engine.create_stake(&ctx("alice", 50), 1, dec!(100)).unwrap();
    engine.create_epochs(&ctx("anyone", 200)).unwrap();

    assert_eq!(
        engine.claim_stakes_reward(&ctx("alice", 210), &[stake_id]).unwrap(),
        Decimal::ZERO
    );
    assert_eq!(engine.stake(stake_id).unwrap().last_claimed_epoch_id, 0);

    engine
        .save_epoch_dlps_total_stakes_score(&ctx("manager", 220), &[score(1, 1, dec!(356))])
        .unwrap();
    assert_eq!(
        engine.claim_stakes_reward(&ctx("alice", 230), &[stake_id]).unwrap(),
        dec!(400)
    );
}

#[test]
fn test_claim_rejects_foreign_stake() {
    let mut engine = engine();
    engine
        .register_dlp(&ctx("owner", 1), info("dlp-1", "owner"), dec!(100))
        .unwrap();
    let stake_id = engine.create_stake(&ctx("alice", 50), 1, dec!(100)).unwrap();

    let result = engine.claim_stakes_reward(&ctx("bob", 60), &[stake_id]);
    assert!(matches!(result, Err(Error::NotStakeOwner(_))));
}

#[test]
fn test_closed_stake_stops_earning() {
    let mut engine = engine();
    engine
        .register_dlp(&ctx("owner", 1), info("dlp-1", "owner"), dec!(100))
        .unwrap();
    let stake_id = engine.create_stake(&ctx("alice", 50), 1, dec!(100)).unwrap();

    // closed at 150, scored up to its end: 10 days, multiplier 158
    engine.close_stakes(&ctx("alice", 150), &[stake_id]).unwrap();
    engine.create_epochs(&ctx("anyone", 300)).unwrap();
    engine
        .save_epoch_dlps_total_stakes_score(
            &ctx("manager", 300),
            &[score(1, 1, dec!(316)), score(2, 1, dec!(500))],
        )
        .unwrap();

    // epoch 1: 800 * 158 / 316; epoch 2 started after the close
    assert_eq!(
        engine.claim_stakes_reward(&ctx("alice", 305), &[stake_id]).unwrap(),
        dec!(400)
    );
    assert_eq!(engine.stake(stake_id).unwrap().last_claimed_epoch_id, 2);
}

#[test]
fn test_score_submission_rules() {
    let mut engine = engine();
    engine
        .register_dlp(&ctx("owner", 1), info("dlp-1", "owner"), dec!(100))
        .unwrap();
    engine.create_epochs(&ctx("anyone", 250)).unwrap();

    let result = engine.save_epoch_dlps_total_stakes_score(&ctx("alice", 250), &[score(1, 1, dec!(5))]);
    assert!(matches!(result, Err(Error::Unauthorized(Role::Manager))));

    let result = engine.save_epoch_dlps_total_stakes_score(&ctx("manager", 250), &[score(2, 1, dec!(5))]);
    assert!(matches!(result, Err(Error::EpochNotEnded(2))));

    let result = engine.save_epoch_dlps_total_stakes_score(&ctx("manager", 250), &[score(9, 1, dec!(5))]);
    assert!(matches!(result, Err(Error::EpochNotEnded(9))));

    let result = engine.save_epoch_dlps_total_stakes_score(
        &ctx("manager", 250),
        &[score(1, 1, dec!(5)), score(1, 7, dec!(5))],
    );
    assert!(matches!(result, Err(Error::InvalidDlpId(7))));
    assert_eq!(engine.epoch_dlp(1, 1).unwrap().total_stakes_score, Decimal::ZERO);

    let result = engine.save_epoch_dlps_total_stakes_score(
        &ctx("manager", 250),
        &[score(1, 1, dec!(5)), score(1, 1, dec!(6))],
    );
    assert!(matches!(
        result,
        Err(Error::EpochDlpScoreAlreadySaved { epoch_id: 1, dlp_id: 1 })
    ));

    engine
        .save_epoch_dlps_total_stakes_score(&ctx("manager", 250), &[score(1, 1, dec!(5))])
        .unwrap();
    let result = engine.save_epoch_dlps_total_stakes_score(&ctx("manager", 251), &[score(1, 1, dec!(7))]);
    assert!(matches!(result, Err(Error::EpochDlpScoreAlreadySaved { .. })));

    let result = engine.override_epoch_dlps_total_stakes_score(&ctx("manager", 252), &score(1, 1, dec!(7)));
    assert!(matches!(result, Err(Error::Unauthorized(Role::Maintainer))));

    engine
        .override_epoch_dlps_total_stakes_score(&ctx("maintainer", 252), &score(1, 1, Decimal::ZERO))
        .unwrap();
    assert_eq!(engine.epoch_dlp(1, 1).unwrap().total_stakes_score, Decimal::ZERO);

    let saved = engine
        .drain_events()
        .into_iter()
        .filter(|record| matches!(record.event, EngineEvent::EpochDlpScoreSaved { overridden: true, .. }))
        .count();
    assert_eq!(saved, 1);
}

#[test]
fn test_finalized_snapshot_never_changes() {
    let mut engine = engine();
    engine
        .register_dlp(&ctx("owner", 1), info("dlp-1", "owner"), dec!(100))
        .unwrap();
    engine
        .register_dlp(&ctx("owner-2", 2), info("dlp-2", "owner-2"), dec!(200))
        .unwrap();
    engine.create_epochs(&ctx("anyone", 200)).unwrap();
    let frozen = engine.epoch(1).unwrap().clone();
    let record = engine.epoch_dlp(1, 1).unwrap();

    engine.create_stake(&ctx("alice", 210), 1, dec!(500)).unwrap();
    engine.create_epochs(&ctx("anyone", 300)).unwrap();

    assert_eq!(engine.epoch(1).unwrap(), &frozen);
    assert_eq!(engine.epoch_dlp(1, 1).unwrap(), record);
    assert_eq!(frozen.dlp_ids, vec![2, 1]);
    assert_eq!(engine.epoch(2).unwrap().dlp_ids, vec![1, 2]);
}

#[test]
fn test_deregistered_dlp_leaves_ranking() {
    let mut engine = engine();
    engine
        .register_dlp(&ctx("owner", 1), info("dlp-1", "owner"), dec!(300))
        .unwrap();
    engine
        .register_dlp(&ctx("owner-2", 2), info("dlp-2", "owner-2"), dec!(200))
        .unwrap();

    engine.deregister_dlp(&ctx("owner", 3), 1).unwrap();

    assert_eq!(engine.top_dlp_ids(3), vec![2]);
    assert_eq!(engine.eligible_dlp_ids(), vec![2]);
    let result = engine.create_stake(&ctx("alice", 4), 1, dec!(10));
    assert!(matches!(result, Err(Error::InvalidDlpStatus(DlpStatus::Deregistered))));

    // the address can never be registered again
    let result = engine.register_dlp(&ctx("owner", 5), info("dlp-1", "owner"), dec!(300));
    assert!(matches!(result, Err(Error::InvalidDlpStatus(DlpStatus::Deregistered))));
}

#[test]
fn test_epoch_keeps_values_captured_at_creation() {
    let mut engine = engine();
    engine
        .update_epoch_reward_amount(&ctx("maintainer", 150), dec!(5000))
        .unwrap();
    engine.update_epoch_size(&ctx("maintainer", 160), 50).unwrap();
    engine.create_epochs(&ctx("anyone", 260)).unwrap();

    let first = engine.epoch(1).unwrap();
    assert_eq!((first.start_block, first.end_block), (100, 199));
    assert_eq!(first.reward_amount, dec!(1000));

    let second = engine.epoch(2).unwrap();
    assert_eq!((second.start_block, second.end_block), (200, 249));
    assert_eq!(second.reward_amount, dec!(5000));

    let third = engine.epoch(3).unwrap();
    assert_eq!((third.start_block, third.end_block), (250, 299));
}

#[test]
fn test_catch_up_can_be_bounded() {
    let mut engine = engine();
    let finalized = engine
        .create_epochs_until_block_number(&ctx("anyone", 1_000), 250)
        .unwrap();
    assert_eq!(finalized, vec![1]);
    assert_eq!(engine.epochs_count(), 2);

    let finalized = engine.create_epochs(&ctx("anyone", 1_000)).unwrap();
    assert_eq!(finalized, vec![2, 3, 4, 5, 6, 7, 8, 9]);
    assert_eq!(engine.epochs_count(), 10);
    assert_eq!(engine.current_epoch_id(), 10);
}

#[test]
fn test_stake_opened_mid_epoch_claims_that_epoch() {
    let mut engine = engine();
    engine
        .register_dlp(&ctx("owner", 1), info("dlp-1", "owner"), dec!(100))
        .unwrap();
    let stake_id = engine.create_stake(&ctx("alice", 220), 1, dec!(100)).unwrap();
    assert_eq!(engine.current_epoch_id(), 2);
    assert_eq!(engine.stake(stake_id).unwrap().last_claimed_epoch_id, 1);

    engine.create_epochs(&ctx("anyone", 300)).unwrap();
    engine
        .save_epoch_dlps_total_stakes_score(&ctx("manager", 300), &[score(2, 1, dec!(200))])
        .unwrap();

    // 220 -> 299: 7 days, multiplier 141; 800 * 141 / 200
    assert_eq!(
        engine.claim_stakes_reward(&ctx("alice", 310), &[stake_id]).unwrap(),
        dec!(564)
    );
}

#[test]
fn test_zero_override_does_not_block_later_epochs() {
    let mut engine = engine();
    engine
        .register_dlp(&ctx("owner", 1), info("dlp-1", "owner"), dec!(100))
        .unwrap();
    let stake_id = engine.create_stake(&ctx("alice", 50), 1, dec!(100)).unwrap();
    engine.create_epochs(&ctx("anyone", 300)).unwrap();

    engine
        .save_epoch_dlps_total_stakes_score(&ctx("manager", 300), &[score(1, 1, dec!(999))])
        .unwrap();
    engine
        .override_epoch_dlps_total_stakes_score(&ctx("maintainer", 300), &score(1, 1, Decimal::ZERO))
        .unwrap();
    assert!(engine.epoch_dlp(1, 1).unwrap().score_saved);

    // a zeroed score is still a saved score
    let result = engine.save_epoch_dlps_total_stakes_score(&ctx("manager", 300), &[score(1, 1, dec!(5))]);
    assert!(matches!(
        result,
        Err(Error::EpochDlpScoreAlreadySaved { epoch_id: 1, dlp_id: 1 })
    ));

    // alice holds half of epoch 2's total score
    let stake_score = engine.calculate_stake_score(dec!(100), 50, 299).unwrap();
    engine
        .save_epoch_dlps_total_stakes_score(
            &ctx("manager", 300),
            &[score(2, 1, stake_score * dec!(2))],
        )
        .unwrap();

    // epoch 1 pays nothing, epoch 2 pays 800 / 2
    assert_eq!(engine.calculate_stake_claimable_amount(stake_id, 500).unwrap(), dec!(400));
    assert_eq!(
        engine.claim_stakes_reward(&ctx("alice", 500), &[stake_id]).unwrap(),
        dec!(400)
    );
    assert_eq!(engine.stake(stake_id).unwrap().last_claimed_epoch_id, 2);
}

#[test]
fn test_score_and_claim_calls_catch_up_epochs() {
    let mut engine = engine();
    engine
        .register_dlp(&ctx("owner", 1), info("dlp-1", "owner"), dec!(100))
        .unwrap();
    let stake_id = engine.create_stake(&ctx("alice", 50), 1, dec!(100)).unwrap();
    engine.create_epochs(&ctx("anyone", 150)).unwrap();
    assert_eq!(engine.epochs_count(), 1);

    engine
        .save_epoch_dlps_total_stakes_score(&ctx("manager", 250), &[score(1, 1, dec!(356))])
        .unwrap();
    assert_eq!(engine.epochs_count(), 2);
    assert!(engine.epoch(1).unwrap().finalized);
    assert_eq!(engine.last_block(), 250);

    // 1000 * 80% * 178 / 356
    assert_eq!(
        engine.claim_stakes_reward(&ctx("alice", 420), &[stake_id]).unwrap(),
        dec!(400)
    );
    assert_eq!(engine.epochs_count(), 4);
    assert_eq!(engine.stake(stake_id).unwrap().last_claimed_epoch_id, 1);
}
