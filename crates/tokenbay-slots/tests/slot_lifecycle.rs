//! Integration tests for card detection and removal.
//!
//! These run the full manager against mock readers and recording
//! frameworks, checking both the resulting slot state and the order in
//! which callbacks were made.

mod common;

use common::{AtrFramework, CallLog, FlakyFramework, KNOWN_ATR, RecordingSessions, UNKNOWN_ATR};
use rstest::rstest;
use tokenbay_core::{ReaderId, SlotConfig, SlotId, SlotInfo, UserType};
use tokenbay_slots::{CardState, Exhaustion, SlotError};

const READER: ReaderId = ReaderId::new(0);

#[test]
fn test_insert_card_creates_tokens() {
    let log = CallLog::default();
    let (builder, handle) = common::builder(1, &log);
    let manager = builder
        .framework(AtrFramework::new("pkcs15", &KNOWN_ATR[..1], 2, &log))
        .build()
        .unwrap();

    handle.insert_card(READER, KNOWN_ATR.to_vec());
    manager.detect_one(READER).unwrap();

    assert_eq!(manager.card_state(READER).unwrap(), CardState::Ready);
    assert_eq!(
        manager.reader_slots(READER).unwrap(),
        vec![SlotId::new(0), SlotId::new(1)]
    );
    assert_eq!(manager.with_card(READER, |c| c.num_slots()).unwrap(), 2);
    assert_eq!(log.entries(), vec!["bind:pkcs15", "create_tokens:pkcs15"]);

    let token = manager.get_token(SlotId::new(1)).unwrap();
    assert_eq!(token.reader, Some(READER));
    assert_eq!(token.info.description(), "Mock Reader 0");
    assert!(token.info.is_token_present());
    assert_eq!(token.object_count, 1);

    assert_eq!(manager.slot_list(true).unwrap().len(), 2);
    assert_eq!(
        manager.slot_list(false).unwrap().len(),
        SlotConfig::default().max_virtual_slots
    );
}

#[test]
fn test_detect_is_idempotent() {
    let log = CallLog::default();
    let (builder, handle) = common::builder(1, &log);
    let manager = builder
        .framework(AtrFramework::new("pkcs15", &KNOWN_ATR, 2, &log))
        .build()
        .unwrap();

    handle.insert_card(READER, KNOWN_ATR.to_vec());
    manager.detect_one(READER).unwrap();
    manager.detect_one(READER).unwrap();
    manager.detect_all().unwrap();

    let stats = handle.stats(READER);
    assert_eq!(stats.connect_calls, 1);
    assert_eq!(log.count("bind:"), 1);
    assert_eq!(log.count("create_tokens:"), 1);
    assert_eq!(manager.reader_slots(READER).unwrap().len(), 2);
}

#[test]
fn test_card_removal_order() {
    let log = CallLog::default();
    let (builder, handle) = common::builder(1, &log);
    let manager = builder
        .framework(AtrFramework::new("pkcs15", &KNOWN_ATR, 2, &log))
        .build()
        .unwrap();

    handle.insert_card(READER, KNOWN_ATR.to_vec());
    manager.detect_one(READER).unwrap();
    manager
        .with_token(SlotId::new(0), |slot| slot.set_login_user(Some(UserType::User)))
        .unwrap();
    log.clear();

    manager.card_removed(READER).unwrap();

    assert_eq!(
        log.entries(),
        vec![
            "close_sessions:0",
            "release_object:0",
            "release_token:pkcs15:0",
            "close_sessions:1",
            "release_object:1",
            "release_token:pkcs15:1",
            "unbind:pkcs15:pkcs15-card:slots=0",
        ]
    );

    let stats = handle.stats(READER);
    assert_eq!(stats.disconnect_calls, 1);
    assert!(!stats.connected);

    assert_eq!(manager.card_state(READER).unwrap(), CardState::Empty);
    assert!(manager.reader_slots(READER).unwrap().is_empty());
    assert_eq!(manager.with_card(READER, |c| c.num_slots()).unwrap(), 0);

    let slot = manager.get_slot(SlotId::new(0)).unwrap();
    assert_eq!(slot.reader, None);
    assert_eq!(slot.info, SlotInfo::default());
    assert_eq!(slot.login_user, None);
    assert_eq!(slot.object_count, 0);
}

#[test]
fn test_card_removed_is_idempotent() {
    let log = CallLog::default();
    let (builder, handle) = common::builder(1, &log);
    let manager = builder
        .framework(AtrFramework::new("pkcs15", &KNOWN_ATR, 1, &log))
        .build()
        .unwrap();

    // Empty reader: nothing to do
    manager.card_removed(READER).unwrap();
    assert_eq!(handle.stats(READER).disconnect_calls, 0);

    handle.insert_card(READER, KNOWN_ATR.to_vec());
    manager.detect_one(READER).unwrap();
    manager.card_removed(READER).unwrap();
    manager.card_removed(READER).unwrap();

    assert_eq!(handle.stats(READER).disconnect_calls, 1);
    assert_eq!(log.count("unbind:"), 1);
    assert_eq!(log.count("release_token:"), 1);
}

#[test]
fn test_absent_card_is_removed_on_detect() {
    let log = CallLog::default();
    let (builder, handle) = common::builder(1, &log);
    let manager = builder
        .framework(AtrFramework::new("pkcs15", &KNOWN_ATR, 1, &log))
        .build()
        .unwrap();

    assert!(matches!(
        manager.detect_one(READER),
        Err(SlotError::TokenNotPresent)
    ));

    handle.insert_card(READER, KNOWN_ATR.to_vec());
    manager.detect_one(READER).unwrap();
    handle.remove_card(READER);

    assert!(matches!(
        manager.detect_one(READER),
        Err(SlotError::TokenNotPresent)
    ));
    assert_eq!(manager.card_state(READER).unwrap(), CardState::Empty);
    assert!(manager.slot_list(true).unwrap().is_empty());
    assert_eq!(handle.stats(READER).disconnect_calls, 1);
}

#[test]
fn test_swap_to_unrecognized_card() {
    let log = CallLog::default();
    let (builder, handle) = common::builder(1, &log);
    let manager = builder
        .framework(AtrFramework::new("pkcs15", &KNOWN_ATR, 1, &log))
        .build()
        .unwrap();

    handle.insert_card(READER, KNOWN_ATR.to_vec());
    manager.detect_one(READER).unwrap();

    handle.swap_card(READER, UNKNOWN_ATR.to_vec());
    assert!(matches!(
        manager.detect_one(READER),
        Err(SlotError::TokenNotRecognized)
    ));

    // Old card fully released, new one connected but unbound
    assert_eq!(log.count("release_token:"), 1);
    assert_eq!(log.count("unbind:"), 1);
    assert_eq!(manager.card_state(READER).unwrap(), CardState::Connected);
    assert!(manager.reader_slots(READER).unwrap().is_empty());

    let stats = handle.stats(READER);
    assert_eq!(stats.connect_calls, 2);
    assert_eq!(stats.disconnect_calls, 1);
    assert_eq!(stats.presence_calls, 3);
    assert!(stats.connected);

    let atr = manager
        .with_card(READER, |c| c.card().map(|card| card.atr().to_vec()))
        .unwrap();
    assert_eq!(atr, Some(UNKNOWN_ATR.to_vec()));
}

#[test]
fn test_swap_to_recognized_card() {
    let log = CallLog::default();
    let (builder, handle) = common::builder(1, &log);
    let manager = builder
        .framework(AtrFramework::new("pkcs15", &KNOWN_ATR[..1], 1, &log))
        .build()
        .unwrap();

    handle.insert_card(READER, KNOWN_ATR.to_vec());
    manager.detect_one(READER).unwrap();
    handle.swap_card(READER, vec![0x3B, 0x00]);
    manager.detect_one(READER).unwrap();

    assert_eq!(log.count("bind:"), 2);
    assert_eq!(log.count("unbind:"), 1);
    assert_eq!(manager.card_state(READER).unwrap(), CardState::Ready);
    assert_eq!(manager.reader_slots(READER).unwrap().len(), 1);
}

#[test]
fn test_changed_retry_is_bounded() {
    let log = CallLog::default();
    let (builder, handle) = common::builder(1, &log);
    let manager = builder
        .framework(AtrFramework::new("pkcs15", &KNOWN_ATR, 1, &log))
        .build()
        .unwrap();

    handle.insert_card(READER, KNOWN_ATR.to_vec());
    manager.detect_one(READER).unwrap();
    handle.set_always_changed(true);

    let before = handle.stats(READER).presence_calls;
    assert!(matches!(
        manager.detect_one(READER),
        Err(SlotError::TokenNotPresent)
    ));
    let after = handle.stats(READER).presence_calls;

    assert_eq!(after - before, 2);
    assert_eq!(manager.card_state(READER).unwrap(), CardState::Empty);
    assert!(manager.reader_slots(READER).unwrap().is_empty());
    assert_eq!(handle.stats(READER).disconnect_calls, 1);

    // Stays bounded on a reader that never settles
    assert!(manager.detect_one(READER).is_err());
    assert_eq!(handle.stats(READER).presence_calls - after, 2);
    assert_eq!(handle.stats(READER).connect_calls, 1);
}

#[rstest]
#[case::first_wins(&[0x3B], &[0x3B, 0x8F], 0, "bind:first")]
#[case::falls_through(&[0x3B, 0x00], &[0x3B], 1, "bind:second")]
fn test_framework_priority(
    #[case] first: &[u8],
    #[case] second: &[u8],
    #[case] expected: usize,
    #[case] entry: &str,
) {
    let log = CallLog::default();
    let (builder, handle) = common::builder(1, &log);
    let manager = builder
        .framework(AtrFramework::new("first", first, 1, &log))
        .framework_boxed(Box::new(AtrFramework::new("second", second, 1, &log)))
        .build()
        .unwrap();

    handle.insert_card(READER, KNOWN_ATR.to_vec());
    manager.detect_one(READER).unwrap();

    let bound = manager
        .with_card(READER, |c| c.framework().map(|id| id.index()))
        .unwrap();
    assert_eq!(bound, Some(expected));
    assert_eq!(log.count("bind:"), 1);
    assert_eq!(log.entries()[0], entry);
}

#[test]
fn test_unrecognized_card_stays_connected() {
    let log = CallLog::default();
    let (builder, handle) = common::builder(1, &log);
    let manager = builder
        .framework(AtrFramework::new("pkcs15", &KNOWN_ATR, 1, &log))
        .build()
        .unwrap();

    handle.insert_card(READER, UNKNOWN_ATR.to_vec());
    for _ in 0..2 {
        assert!(matches!(
            manager.detect_one(READER),
            Err(SlotError::TokenNotRecognized)
        ));
    }

    assert_eq!(manager.card_state(READER).unwrap(), CardState::Connected);
    assert_eq!(handle.stats(READER).connect_calls, 1);

    manager.card_removed(READER).unwrap();
    assert_eq!(handle.stats(READER).disconnect_calls, 1);
    assert_eq!(log.count("unbind:"), 0);
}

#[test]
fn test_no_frameworks_registered() {
    let log = CallLog::default();
    let (builder, handle) = common::builder(1, &log);
    let manager = builder.build().unwrap();

    handle.insert_card(READER, KNOWN_ATR.to_vec());
    assert!(matches!(
        manager.detect_one(READER),
        Err(SlotError::TokenNotRecognized)
    ));
}

#[test]
fn test_card_budget_rolls_back_tokens() {
    let log = CallLog::default();
    let (builder, handle) = common::builder(1, &log);
    let config = SlotConfig::from_json_str(r#"{"slots_per_card": 2, "max_virtual_slots": 8}"#)
        .unwrap();
    let manager = builder
        .config(config)
        .framework(AtrFramework::new("pkcs15", &KNOWN_ATR, 3, &log))
        .build()
        .unwrap();

    handle.insert_card(READER, KNOWN_ATR.to_vec());
    let result = manager.detect_one(READER);
    assert!(matches!(
        result,
        Err(SlotError::ResourceExhausted(Exhaustion::CardBudget { max_slots: 2, .. }))
    ));

    // Both allocated slots were torn down, the framework stays bound
    assert_eq!(log.count("release_token:"), 2);
    assert_eq!(log.count("unbind:"), 0);
    assert_eq!(manager.card_state(READER).unwrap(), CardState::Bound);
    assert!(manager.reader_slots(READER).unwrap().is_empty());
    assert_eq!(manager.with_card(READER, |c| c.max_slots()).unwrap(), 2);
    assert!(handle.stats(READER).connected);
}

#[test]
fn test_token_creation_retried_without_rebinding() {
    let log = CallLog::default();
    let (builder, handle) = common::builder(1, &log);
    let manager = builder
        .framework(FlakyFramework::new(1, &log))
        .build()
        .unwrap();

    handle.insert_card(READER, KNOWN_ATR.to_vec());
    assert!(matches!(
        manager.detect_one(READER),
        Err(SlotError::Framework { .. })
    ));
    assert_eq!(manager.card_state(READER).unwrap(), CardState::Bound);
    assert!(manager.reader_slots(READER).unwrap().is_empty());

    manager.detect_one(READER).unwrap();
    assert_eq!(manager.card_state(READER).unwrap(), CardState::Ready);
    assert_eq!(manager.reader_slots(READER).unwrap().len(), 1);
    assert_eq!(log.count("bind:"), 1);
    assert_eq!(log.count("create_tokens:"), 2);
    assert_eq!(handle.stats(READER).connect_calls, 1);
}

#[test]
fn test_pool_full_across_readers() {
    let log = CallLog::default();
    let (builder, handle) = common::builder(2, &log);
    let manager = builder
        .config(common::config(4, 2))
        .framework(AtrFramework::new("pkcs15", &KNOWN_ATR, 2, &log))
        .build()
        .unwrap();

    let (first, second) = (ReaderId::new(0), ReaderId::new(1));
    handle.insert_card(first, KNOWN_ATR.to_vec());
    handle.insert_card(second, KNOWN_ATR.to_vec());

    manager.detect_one(first).unwrap();
    assert!(matches!(
        manager.detect_one(second),
        Err(SlotError::ResourceExhausted(Exhaustion::PoolFull { capacity: 2 }))
    ));
    assert_eq!(manager.reader_slots(first).unwrap().len(), 2);
    assert_eq!(manager.card_state(second).unwrap(), CardState::Bound);

    manager.card_removed(first).unwrap();
    manager.detect_one(second).unwrap();
    assert_eq!(
        manager.reader_slots(second).unwrap(),
        vec![SlotId::new(0), SlotId::new(1)]
    );
}

#[test]
fn test_backend_failure_leaves_state_untouched() {
    let log = CallLog::default();
    let (builder, handle) = common::builder(1, &log);
    let manager = builder
        .framework(AtrFramework::new("pkcs15", &KNOWN_ATR, 2, &log))
        .build()
        .unwrap();

    handle.insert_card(READER, KNOWN_ATR.to_vec());
    handle.fail_next_connect(READER, "card mute");
    assert!(matches!(
        manager.detect_one(READER),
        Err(SlotError::Backend(_))
    ));
    assert_eq!(manager.card_state(READER).unwrap(), CardState::Empty);

    manager.detect_one(READER).unwrap();
    handle.fail_next_presence(READER, "reader unplugged");
    assert!(matches!(
        manager.detect_one(READER),
        Err(SlotError::Backend(_))
    ));
    assert_eq!(manager.card_state(READER).unwrap(), CardState::Ready);
    assert_eq!(manager.reader_slots(READER).unwrap().len(), 2);
    assert_eq!(handle.stats(READER).disconnect_calls, 0);
}

#[test]
fn test_object_release_failure_does_not_stop_teardown() {
    let log = CallLog::default();
    let (builder, handle) = common::builder(1, &log);
    let mut framework = AtrFramework::new("pkcs15", &KNOWN_ATR, 2, &log);
    framework.failing_objects = true;
    let manager = builder.framework(framework).build().unwrap();

    handle.insert_card(READER, KNOWN_ATR.to_vec());
    manager.detect_one(READER).unwrap();
    manager.card_removed(READER).unwrap();

    assert_eq!(log.count("release_object:"), 2);
    assert_eq!(log.count("release_token:"), 2);
    assert_eq!(log.count("unbind:"), 1);
    assert_eq!(handle.stats(READER).disconnect_calls, 1);
    assert!(manager.slot_list(true).unwrap().is_empty());
}

#[test]
fn test_teardown_continues_past_every_failure() {
    let log = CallLog::default();
    let (builder, handle) = common::builder(1, &log);
    let mut framework = AtrFramework::new("pkcs15", &KNOWN_ATR, 2, &log);
    framework.failing_objects = true;
    framework.failing_release = true;
    framework.failing_unbind = true;
    let manager = builder
        .sessions(RecordingSessions::failing(&log))
        .framework(framework)
        .build()
        .unwrap();

    handle.insert_card(READER, KNOWN_ATR.to_vec());
    manager.detect_one(READER).unwrap();
    log.clear();

    handle.fail_next_disconnect(READER, "reader gone");
    manager.card_removed(READER).unwrap();

    assert_eq!(
        log.entries(),
        vec![
            "close_sessions:0",
            "release_object:0",
            "release_token:pkcs15:0",
            "close_sessions:1",
            "release_object:1",
            "release_token:pkcs15:1",
            "unbind:pkcs15:pkcs15-card:slots=0",
        ]
    );
    assert_eq!(handle.stats(READER).disconnect_calls, 1);
    assert!(!handle.stats(READER).connected);
    assert_eq!(manager.card_state(READER).unwrap(), CardState::Empty);
    assert_eq!(manager.with_card(READER, |c| c.num_slots()).unwrap(), 0);
    assert!(manager.reader_slots(READER).unwrap().is_empty());

    for id in [SlotId::new(0), SlotId::new(1)] {
        let snapshot = manager.get_slot(id).unwrap();
        assert_eq!(snapshot.reader, None);
        assert_eq!(snapshot.object_count, 0);
        assert!(!snapshot.info.is_token_present());
    }

    // The reader is usable again
    manager.detect_one(READER).unwrap();
    assert_eq!(manager.card_state(READER).unwrap(), CardState::Ready);
    assert_eq!(manager.reader_slots(READER).unwrap().len(), 2);
}

#[test]
fn test_single_slot_removal() {
    let log = CallLog::default();
    let (builder, handle) = common::builder(1, &log);
    let manager = builder
        .framework(AtrFramework::new("pkcs15", &KNOWN_ATR, 2, &log))
        .build()
        .unwrap();

    handle.insert_card(READER, KNOWN_ATR.to_vec());
    manager.detect_one(READER).unwrap();
    log.clear();

    manager.slot_removed(SlotId::new(1)).unwrap();
    assert_eq!(
        log.entries(),
        vec!["close_sessions:1", "release_object:1", "release_token:pkcs15:1"]
    );
    assert_eq!(manager.with_card(READER, |c| c.num_slots()).unwrap(), 1);
    assert!(matches!(
        manager.get_token(SlotId::new(1)),
        Err(SlotError::TokenNotPresent)
    ));
    assert!(manager.get_token(SlotId::new(0)).is_ok());

    // Free slots can be torn down again
    manager.slot_removed(SlotId::new(1)).unwrap();
    assert_eq!(manager.with_card(READER, |c| c.num_slots()).unwrap(), 1);

    manager.card_removed(READER).unwrap();
    assert!(
        log.entries()
            .contains(&"unbind:pkcs15:pkcs15-card:slots=0".to_string())
    );
}

#[test]
fn test_detect_all_continues_past_failures() {
    let log = CallLog::default();
    let (builder, handle) = common::builder(3, &log);
    let manager = builder
        .framework(AtrFramework::new("pkcs15", &KNOWN_ATR, 1, &log))
        .build()
        .unwrap();

    handle.insert_card(ReaderId::new(0), KNOWN_ATR.to_vec());
    handle.insert_card(ReaderId::new(2), KNOWN_ATR.to_vec());
    handle.fail_next_presence(ReaderId::new(0), "reader unplugged");

    manager.detect_all().unwrap();

    assert_eq!(manager.card_state(ReaderId::new(0)).unwrap(), CardState::Empty);
    assert_eq!(manager.card_state(ReaderId::new(1)).unwrap(), CardState::Empty);
    assert_eq!(manager.card_state(ReaderId::new(2)).unwrap(), CardState::Ready);
    assert_eq!(manager.slot_list(true).unwrap(), vec![SlotId::new(0)]);
}

#[test]
fn test_finalize_releases_every_card() {
    let log = CallLog::default();
    let (builder, handle) = common::builder(2, &log);
    let manager = builder
        .framework(AtrFramework::new("pkcs15", &KNOWN_ATR, 1, &log))
        .build()
        .unwrap();

    handle.insert_card(ReaderId::new(0), KNOWN_ATR.to_vec());
    handle.insert_card(ReaderId::new(1), KNOWN_ATR.to_vec());
    manager.detect_all().unwrap();
    assert_eq!(manager.slot_list(true).unwrap().len(), 2);

    manager.finalize().unwrap();

    assert_eq!(log.count("unbind:"), 2);
    assert_eq!(handle.stats(ReaderId::new(0)).disconnect_calls, 1);
    assert_eq!(handle.stats(ReaderId::new(1)).disconnect_calls, 1);
    assert!(matches!(
        manager.detect_one(READER),
        Err(SlotError::NotInitialized)
    ));
    assert!(matches!(
        manager.card_removed(READER),
        Err(SlotError::NotInitialized)
    ));
    assert!(matches!(
        manager.slot_list(false),
        Err(SlotError::NotInitialized)
    ));
}
