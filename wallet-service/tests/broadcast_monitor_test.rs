//! Broadcast paths and the blockchain-event pipeline.

mod common;

use std::collections::BTreeMap;

use common::{CopayerKeys, TestEnvironment};
use wallet_service::ledger::types::{Author, Joint, LedgerEvent, Message, Unit, UNIT_ALT, UNIT_VERSION};
use wallet_service::model::{Output, ProposalStatus, TxProposal};
use wallet_service::monitor::BlockchainMonitor;

const GB: u64 = 1_000_000_000;

async fn accepted_proposal(
    env: &TestEnvironment,
    wallet_id: &str,
    copayers: &[CopayerKeys],
    tag: &str,
) -> TxProposal {
    let funding = env.service.create_address(wallet_id, false).await.unwrap();
    env.explorer.seed_utxo(&funding.address, GB);

    let tx = env
        .published_payment(
            wallet_id,
            &copayers[0],
            vec![Output { address: env.external_address(tag), amount: 10_000_000 }],
        )
        .await;
    for keys in copayers.iter().take(tx.required_signatures) {
        env.service
            .sign_tx(&keys.copayer_id(), wallet_id, &tx.id, keys.sign_proposal(&tx))
            .await
            .unwrap();
    }
    let tx = env.service.get_tx(wallet_id, &tx.id).unwrap();
    assert_eq!(tx.status, ProposalStatus::Accepted);
    tx
}

fn incoming_joint(unit_hash: &str, from: &str, to: &str, amount: u64) -> Joint {
    Joint {
        unit: Unit {
            version: UNIT_VERSION.to_string(),
            alt: UNIT_ALT.to_string(),
            authors: vec![Author {
                address: from.to_string(),
                authentifiers: BTreeMap::new(),
                definition: None,
            }],
            messages: vec![Message {
                app: "payment".to_string(),
                payload_location: "inline".to_string(),
                payload_hash: "hash".to_string(),
                payload: Some(serde_json::json!({
                    "inputs": [],
                    "outputs": [{ "address": to, "amount": amount }],
                })),
            }],
            parent_units: vec![],
            last_ball: None,
            last_ball_unit: None,
            headers_commission: 0,
            payload_commission: 0,
            timestamp: None,
            unit: Some(unit_hash.to_string()),
        },
    }
}

#[tokio::test]
async fn broadcast_success_path() {
    let env = TestEnvironment::new();
    let (wallet_id, copayers) = env.setup_complete_wallet(2, 3, false).await;
    let tx = accepted_proposal(&env, &wallet_id, &copayers, "bc-ok").await;

    let broadcasted = env
        .service
        .broadcast_tx(&copayers[0].copayer_id(), &wallet_id, &tx.id)
        .await
        .unwrap();
    assert_eq!(broadcasted.status, ProposalStatus::Broadcasted);
    assert!(broadcasted.broadcasted_on.is_some());
    assert_eq!(env.notifications_of_kind(&wallet_id, "NewOutgoingTx"), 1);
    assert_eq!(env.hub.broadcasts.lock().unwrap().len(), 1);

    // The broadcast log now treats the inputs as spent.
    let recent = env
        .service
        .storage
        .fetch_recent_broadcasts(&wallet_id, 24 * 3600, 100);
    assert_eq!(recent.len(), 1);
    assert_eq!(recent[0].inputs, broadcasted.inputs);

    let err = env
        .service
        .broadcast_tx(&copayers[0].copayer_id(), &wallet_id, &tx.id)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "TX_ALREADY_BROADCASTED");
}

#[tokio::test]
async fn broadcast_by_third_party_detected_via_explorer() {
    let env = TestEnvironment::new();
    let (wallet_id, copayers) = env.setup_complete_wallet(2, 3, false).await;
    let tx = accepted_proposal(&env, &wallet_id, &copayers, "bc-3p").await;

    env.hub.set_fail(true);
    env.explorer.set_transaction(tx.txid.as_ref().unwrap());

    let broadcasted = env
        .service
        .broadcast_tx(&copayers[0].copayer_id(), &wallet_id, &tx.id)
        .await
        .unwrap();
    assert_eq!(broadcasted.status, ProposalStatus::Broadcasted);
    assert_eq!(env.notifications_of_kind(&wallet_id, "NewOutgoingTxByThirdParty"), 1);
    assert_eq!(env.notifications_of_kind(&wallet_id, "NewOutgoingTx"), 0);
}

#[tokio::test]
async fn genuine_broadcast_failure_keeps_accepted() {
    let env = TestEnvironment::new();
    let (wallet_id, copayers) = env.setup_complete_wallet(2, 3, false).await;
    let tx = accepted_proposal(&env, &wallet_id, &copayers, "bc-fail").await;

    env.hub.set_fail(true);
    let err = env
        .service
        .broadcast_tx(&copayers[0].copayer_id(), &wallet_id, &tx.id)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "HUB_ERROR");

    let stored = env.service.get_tx(&wallet_id, &tx.id).unwrap();
    assert_eq!(stored.status, ProposalStatus::Accepted);
    assert!(stored.txid.is_some());
}

#[tokio::test]
async fn monitor_reconciles_accepted_proposal_seen_on_dag() {
    let env = TestEnvironment::new();
    let (wallet_id, copayers) = env.setup_complete_wallet(2, 3, false).await;
    let tx = accepted_proposal(&env, &wallet_id, &copayers, "mon-out").await;

    let monitor = BlockchainMonitor::new(env.service.clone());
    monitor
        .handle_event(LedgerEvent::NewJoint(tx.joint.clone()))
        .await
        .unwrap();

    let stored = env.service.get_tx(&wallet_id, &tx.id).unwrap();
    assert_eq!(stored.status, ProposalStatus::Broadcasted);
    assert_eq!(env.notifications_of_kind(&wallet_id, "NewOutgoingTxByThirdParty"), 1);

    // Redelivery of the same joint does not duplicate the notification.
    monitor
        .handle_event(LedgerEvent::NewJoint(tx.joint.clone()))
        .await
        .unwrap();
    assert_eq!(env.notifications_of_kind(&wallet_id, "NewOutgoingTxByThirdParty"), 1);
}

#[tokio::test]
async fn monitor_skips_outgoing_notification_after_own_broadcast() {
    let env = TestEnvironment::new();
    let (wallet_id, copayers) = env.setup_complete_wallet(2, 3, false).await;
    let tx = accepted_proposal(&env, &wallet_id, &copayers, "mon-dedupe").await;

    env.service
        .broadcast_tx(&copayers[0].copayer_id(), &wallet_id, &tx.id)
        .await
        .unwrap();

    // The node echoes our own unit back; only the original notification
    // remains.
    let monitor = BlockchainMonitor::new(env.service.clone());
    let stored = env.service.get_tx(&wallet_id, &tx.id).unwrap();
    monitor
        .handle_event(LedgerEvent::NewJoint(stored.joint.clone()))
        .await
        .unwrap();

    assert_eq!(env.notifications_of_kind(&wallet_id, "NewOutgoingTx"), 1);
    assert_eq!(env.notifications_of_kind(&wallet_id, "NewOutgoingTxByThirdParty"), 0);
}

#[tokio::test]
async fn monitor_raises_incoming_and_marks_activity() {
    let env = TestEnvironment::new();
    let (wallet_id, _) = env.setup_complete_wallet(1, 1, false).await;
    let receive = env.service.create_address(&wallet_id, false).await.unwrap();
    assert!(!receive.has_activity);

    let monitor = BlockchainMonitor::new(env.service.clone());
    let joint = incoming_joint("incoming-unit-1", "SENDERADDRESS", &receive.address, 42_000);
    monitor.handle_event(LedgerEvent::NewJoint(joint.clone())).await.unwrap();

    assert_eq!(env.notifications_of_kind(&wallet_id, "NewIncomingTx"), 1);
    let stored = env.service.storage.fetch_address(&wallet_id, &receive.address).unwrap();
    assert!(stored.has_activity);

    // Same (txid, address, amount) within the window is deduped.
    monitor.handle_event(LedgerEvent::NewJoint(joint)).await.unwrap();
    assert_eq!(env.notifications_of_kind(&wallet_id, "NewIncomingTx"), 1);
}

#[tokio::test]
async fn monitor_ignores_change_outputs() {
    let env = TestEnvironment::new();
    let (wallet_id, copayers) = env.setup_complete_wallet(1, 1, false).await;
    let creator = &copayers[0];

    let funding = env.service.create_address(&wallet_id, false).await.unwrap();
    env.explorer.seed_utxo(&funding.address, GB);
    let tx = env
        .published_payment(
            &wallet_id,
            creator,
            vec![Output { address: env.external_address("chg"), amount: 1_000_000 }],
        )
        .await;
    let change = tx.change_address.clone().unwrap();

    let monitor = BlockchainMonitor::new(env.service.clone());
    let joint = incoming_joint("incoming-unit-2", "SENDERADDRESS", &change.address, 5_000);
    monitor.handle_event(LedgerEvent::NewJoint(joint)).await.unwrap();

    assert_eq!(env.notifications_of_kind(&wallet_id, "NewIncomingTx"), 0);
    // Activity is still recorded on the change address.
    let stored = env.service.storage.fetch_address(&wallet_id, &change.address).unwrap();
    assert!(stored.has_activity);
}

#[tokio::test]
async fn stability_flips_proposals_and_fires_subscriptions_once() {
    let env = TestEnvironment::new();
    let (wallet_id, copayers) = env.setup_complete_wallet(2, 3, false).await;
    let tx = accepted_proposal(&env, &wallet_id, &copayers, "stable").await;
    let txid = tx.txid.clone().unwrap();

    env.service
        .broadcast_tx(&copayers[0].copayer_id(), &wallet_id, &tx.id)
        .await
        .unwrap();
    env.service
        .subscribe_tx_confirmation(&wallet_id, &copayers[1].copayer_id(), txid.clone())
        .unwrap();

    let monitor = BlockchainMonitor::new(env.service.clone());
    monitor
        .handle_event(LedgerEvent::TransactionsBecameStable { units: vec![txid.clone()] })
        .await
        .unwrap();

    let stored = env.service.get_tx(&wallet_id, &tx.id).unwrap();
    assert!(stored.is_stable);
    assert!(stored.stabilized_on.is_some());
    assert_eq!(env.notifications_of_kind(&wallet_id, "TxConfirmation"), 1);

    // The confirmation carries the wallet's coin and network.
    let confirmation = env
        .service
        .storage
        .fetch_notifications(&wallet_id, None, None)
        .into_iter()
        .find(|n| n.kind == "TxConfirmation")
        .unwrap();
    assert_eq!(confirmation.data["coin"], "obyte");
    assert_eq!(confirmation.data["network"], "test");

    // A second stabilisation event is a no-op: the subscription fired once.
    monitor
        .handle_event(LedgerEvent::MciBecameStable { mci: 7, units: vec![txid] })
        .await
        .unwrap();
    assert_eq!(env.notifications_of_kind(&wallet_id, "TxConfirmation"), 1);
}

#[tokio::test]
async fn asset_metadata_scan_upserts_and_suffixes_conflicts() {
    let env = TestEnvironment::new();
    let registry = "REGISTRYADDRESSONE".to_string();
    env.explorer.assets.lock().unwrap().extend([
        wallet_service::ledger::types::AssetMetadataRecord {
            asset: "asset-one".to_string(),
            ticker: "GOLD".to_string(),
            name: "gold token".to_string(),
            decimals: 2,
            registry_address: registry.clone(),
        },
        wallet_service::ledger::types::AssetMetadataRecord {
            asset: "asset-two".to_string(),
            ticker: "GOLD".to_string(),
            name: "other gold".to_string(),
            decimals: 0,
            registry_address: registry.clone(),
        },
    ]);

    let monitor = BlockchainMonitor::new(env.service.clone());
    let upserted = monitor.sync_asset_metadata(&[registry]).await.unwrap();
    assert_eq!(upserted, 2);

    let assets = env.service.get_assets();
    assert_eq!(assets.len(), 2);
    let tickers: Vec<&str> = assets.iter().map(|a| a.ticker.as_str()).collect();
    assert!(tickers.contains(&"GOLD"));
    assert!(tickers.iter().any(|t| t.starts_with("GOLD@")));
}
