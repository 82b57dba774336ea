//! Address engine: deterministic derivation, gap limit, scan.

mod common;

use common::{CopayerKeys, TestEnvironment};
use wallet_service::derivation;
use wallet_service::model::ScanStatus;

#[tokio::test]
async fn derivation_is_deterministic() {
    let env = TestEnvironment::new();
    let (wallet_id, _) = env.setup_complete_wallet(2, 3, false).await;
    let wallet = env.service.get_wallet(&wallet_id).unwrap();

    let a = derivation::derive_address(&wallet, false, 0).unwrap();
    let b = derivation::derive_address(&wallet, false, 0).unwrap();
    assert_eq!(a.address, b.address);
    assert_eq!(a.definition, b.definition);
    assert_eq!(a.signing_paths, b.signing_paths);
    assert_eq!(a.signing_paths.len(), 3);
    assert!(derivation::is_valid_address(&a.address));

    let other_path = derivation::derive_address(&wallet, false, 1).unwrap();
    assert_ne!(a.address, other_path.address);
}

#[tokio::test]
async fn shared_wallet_definition_is_r_of_set() {
    let env = TestEnvironment::new();
    let (wallet_id, _) = env.setup_complete_wallet(2, 3, false).await;
    let wallet = env.service.get_wallet(&wallet_id).unwrap();

    let derived = derivation::derive_address(&wallet, false, 0).unwrap();
    assert_eq!(derived.definition[0], "r of set");
    assert_eq!(derived.definition[1]["required"], 2);
    assert_eq!(derived.definition[1]["set"].as_array().unwrap().len(), 3);
    assert!(derived.signing_paths.values().all(|p| p.starts_with("r.")));
}

#[tokio::test]
async fn addresses_advance_along_the_receive_branch() {
    let env = TestEnvironment::new();
    let (wallet_id, _) = env.setup_complete_wallet(1, 1, false).await;

    let first = env.service.create_address(&wallet_id, false).await.unwrap();
    // Mark activity so the gap policy never intervenes here.
    env.explorer.set_activity(&first.address, true);
    env.service.storage.mark_address_activity(&wallet_id, &first.address);

    let second = env.service.create_address(&wallet_id, false).await.unwrap();
    assert_eq!(first.path, "m/0/0");
    assert_eq!(second.path, "m/0/1");
    assert_ne!(first.address, second.address);
}

#[tokio::test]
async fn single_address_wallet_reuses_first() {
    let env = TestEnvironment::new();
    let (wallet_id, _) = env.setup_complete_wallet(1, 1, true).await;

    let first = env.service.create_address(&wallet_id, false).await.unwrap();
    let again = env.service.create_address(&wallet_id, false).await.unwrap();
    assert_eq!(first.address, again.address);
    assert_eq!(again.path, "m/0/0");
}

#[tokio::test]
async fn gap_limit_blocks_and_ignore_overrides() {
    let env = TestEnvironment::with_config(|c| c.max_main_address_gap = 2);
    let (wallet_id, _) = env.setup_complete_wallet(1, 1, false).await;

    env.service.create_address(&wallet_id, false).await.unwrap();
    env.service.create_address(&wallet_id, false).await.unwrap();

    let err = env.service.create_address(&wallet_id, false).await.unwrap_err();
    assert_eq!(err.code(), "MAIN_ADDRESS_GAP_REACHED");

    let third = env.service.create_address(&wallet_id, true).await.unwrap();
    assert_eq!(third.path, "m/0/2");
}

#[tokio::test]
async fn observed_activity_unblocks_the_gap() {
    let env = TestEnvironment::with_config(|c| c.max_main_address_gap = 2);
    let (wallet_id, _) = env.setup_complete_wallet(1, 1, false).await;

    let a0 = env.service.create_address(&wallet_id, false).await.unwrap();
    env.service.create_address(&wallet_id, false).await.unwrap();

    // The tail probe sees fresh on-chain activity and lets progress happen.
    env.explorer.set_activity(&a0.address, true);
    let third = env.service.create_address(&wallet_id, false).await.unwrap();
    assert_eq!(third.path, "m/0/2");

    let stored = env.service.storage.fetch_address(&wallet_id, &a0.address).unwrap();
    assert!(stored.has_activity);
}

#[tokio::test]
async fn scan_discovers_used_addresses() {
    let env = TestEnvironment::new();
    let (wallet_id, _) = env.setup_complete_wallet(1, 1, false).await;
    let wallet = env.service.get_wallet(&wallet_id).unwrap();

    // Fabricate on-chain activity at m/0/0..2 and m/1/0.
    for i in 0..3 {
        let derived = derivation::derive_address(&wallet, false, i).unwrap();
        env.explorer.set_activity(&derived.address, true);
    }
    let change = derivation::derive_address(&wallet, true, 0).unwrap();
    env.explorer.set_activity(&change.address, true);

    let result = env.service.scan_addresses(&wallet_id, 1).await.unwrap();
    assert_eq!(result.found_main, 3);
    assert_eq!(result.found_change, 1);

    let wallet = env.service.get_wallet(&wallet_id).unwrap();
    assert_eq!(wallet.scan_status, ScanStatus::Success);

    let addresses = env.service.storage.fetch_addresses(&wallet_id);
    assert_eq!(addresses.iter().filter(|a| !a.is_change).count(), 3);
    assert!(addresses.iter().all(|a| a.has_activity));
}

#[tokio::test]
async fn power_scan_backfills_skipped_paths() {
    let env = TestEnvironment::new();
    let (wallet_id, _) = env.setup_complete_wallet(1, 1, false).await;
    let wallet = env.service.get_wallet(&wallet_id).unwrap();

    // Activity only at m/0/10; a stride of 5 lands on it.
    let hit = derivation::derive_address(&wallet, false, 10).unwrap();
    env.explorer.set_activity(&hit.address, true);

    env.service.scan_addresses(&wallet_id, 5).await.unwrap();

    let addresses = env.service.storage.fetch_addresses(&wallet_id);
    let main: Vec<_> = addresses.iter().filter(|a| !a.is_change).collect();
    // Indices 0..=10 are all persisted; only the hit carries activity.
    assert_eq!(main.len(), 11);
    assert_eq!(main.iter().filter(|a| a.has_activity).count(), 1);
}

#[tokio::test]
async fn power_scan_without_activity_persists_nothing() {
    let env = TestEnvironment::new();
    let (wallet_id, _) = env.setup_complete_wallet(1, 1, false).await;

    env.service.scan_addresses(&wallet_id, 1000).await.unwrap();
    assert!(env.service.storage.fetch_addresses(&wallet_id).is_empty());
}

#[tokio::test]
async fn failed_scan_pins_wallet_until_rescan() {
    let env = TestEnvironment::new();
    let (wallet_id, _) = env.setup_complete_wallet(1, 1, false).await;

    env.explorer.set_fail_activity(true);
    let err = env.service.scan_addresses(&wallet_id, 1).await.unwrap_err();
    assert_eq!(err.code(), "EXPLORER_ERROR");

    let wallet = env.service.get_wallet(&wallet_id).unwrap();
    assert_eq!(wallet.scan_status, ScanStatus::Error);

    let err = env.service.create_address(&wallet_id, false).await.unwrap_err();
    assert_eq!(err.code(), "WALLET_NEED_SCAN");

    // A successful rescan clears the pin.
    env.explorer.set_fail_activity(false);
    env.service.scan_addresses(&wallet_id, 1).await.unwrap();
    assert!(env.service.create_address(&wallet_id, false).await.is_ok());
}

#[tokio::test]
async fn incomplete_wallet_cannot_derive() {
    let env = TestEnvironment::new();
    let wallet_id = env.create_wallet(2, 3, false).await;
    let keys = CopayerKeys::new(0);
    env.service
        .join_wallet(env.join_request(&wallet_id, &keys))
        .await
        .unwrap();

    let err = env.service.create_address(&wallet_id, false).await.unwrap_err();
    assert_eq!(err.code(), "WALLET_NOT_COMPLETE");
}
