//! Wallet formation: joins to completion, uniqueness rules, access keys,
//! sessions.

mod common;

use common::{sign_message, CopayerKeys, TestEnvironment};
use wallet_service::auth::Credentials;
use wallet_service::derivation;
use wallet_service::model::WalletStatus;
use wallet_service::service::CreateWalletRequest;

#[tokio::test]
async fn join_to_complete_two_of_three() {
    let env = TestEnvironment::new();
    let wallet_id = env.create_wallet(2, 3, false).await;

    for (i, keys) in (0u8..3).map(CopayerKeys::new).enumerate() {
        let wallet = env
            .service
            .join_wallet(env.join_request(&wallet_id, &keys))
            .await
            .unwrap();
        if i < 2 {
            assert_eq!(wallet.status, WalletStatus::Pending);
            assert_eq!(env.notifications_of_kind(&wallet_id, "WalletComplete"), 0);
        } else {
            assert_eq!(wallet.status, WalletStatus::Complete);
        }
    }

    let wallet = env.service.get_wallet(&wallet_id).unwrap();
    assert_eq!(wallet.copayers.len(), 3);
    assert_eq!(wallet.public_key_ring().len(), 3);
    assert_eq!(env.notifications_of_kind(&wallet_id, "WalletComplete"), 1);
}

#[tokio::test]
async fn one_of_one_completes_without_notification() {
    let env = TestEnvironment::new();
    let wallet_id = env.create_wallet(1, 1, false).await;
    let keys = CopayerKeys::new(0);

    let wallet = env
        .service
        .join_wallet(env.join_request(&wallet_id, &keys))
        .await
        .unwrap();
    assert_eq!(wallet.status, WalletStatus::Complete);
    assert_eq!(env.notifications_of_kind(&wallet_id, "WalletComplete"), 0);
}

#[tokio::test]
async fn join_rules_enforce_uniqueness() {
    let env = TestEnvironment::new();
    let wallet_id = env.create_wallet(2, 3, false).await;
    let keys = CopayerKeys::new(0);

    env.service
        .join_wallet(env.join_request(&wallet_id, &keys))
        .await
        .unwrap();

    // Same xpub in the same wallet.
    let err = env
        .service
        .join_wallet(env.join_request(&wallet_id, &keys))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "COPAYER_IN_WALLET");

    // Same xpub registered to a different wallet.
    let other_wallet = env.create_wallet(1, 1, false).await;
    let err = env
        .service
        .join_wallet(env.join_request(&other_wallet, &keys))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "COPAYER_REGISTERED");
}

#[tokio::test]
async fn join_requires_valid_creation_signature() {
    let env = TestEnvironment::new();
    let wallet_id = env.create_wallet(2, 3, false).await;
    let keys = CopayerKeys::new(0);

    let mut req = env.join_request(&wallet_id, &keys);
    req.name = "tampered".to_string();
    let err = env.service.join_wallet(req).await.unwrap_err();
    assert_eq!(err.code(), "NOT_AUTHORIZED");
}

#[tokio::test]
async fn join_refused_once_complete() {
    let env = TestEnvironment::new();
    let (wallet_id, _) = env.setup_complete_wallet(1, 2, false).await;

    let late = CopayerKeys::new(9);
    let err = env
        .service
        .join_wallet(env.join_request(&wallet_id, &late))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "WALLET_FULL");
}

#[tokio::test]
async fn dry_run_join_does_not_mutate() {
    let env = TestEnvironment::new();
    let wallet_id = env.create_wallet(2, 3, false).await;
    let keys = CopayerKeys::new(0);

    let mut req = env.join_request(&wallet_id, &keys);
    req.dry_run = true;
    let preview = env.service.join_wallet(req).await.unwrap();
    assert_eq!(preview.copayers.len(), 1);

    let stored = env.service.get_wallet(&wallet_id).unwrap();
    assert!(stored.copayers.is_empty());
    assert!(env.service.storage.fetch_copayer_lookup(&keys.copayer_id()).is_none());
}

#[tokio::test]
async fn explicit_wallet_id_collision() {
    let env = TestEnvironment::new();
    let first = env.create_wallet(1, 1, false).await;

    let err = env
        .service
        .create_wallet(CreateWalletRequest {
            id: Some(first),
            name: "again".to_string(),
            m: 1,
            n: 1,
            pub_key: env.creation_pub_key.clone(),
            coin: None,
            network: wallet_service::model::Network::Test,
            single_address: false,
            support_bip44: true,
        })
        .await
        .unwrap_err();
    assert_eq!(err.code(), "WALLET_ALREADY_EXISTS");
}

#[tokio::test]
async fn add_access_rotates_request_keys() {
    let env = TestEnvironment::new();
    let (wallet_id, copayers) = env.setup_complete_wallet(1, 1, false).await;
    let keys = &copayers[0];

    // New request key, authorised by the request-key-auth derivation.
    let secp = bitcoin::secp256k1::Secp256k1::new();
    let new_sk = bitcoin::secp256k1::SecretKey::from_slice(&[77u8; 32]).unwrap();
    let new_pub = hex::encode(
        bitcoin::secp256k1::PublicKey::from_secret_key(&secp, &new_sk).serialize(),
    );
    let (change, index) = derivation::REQUEST_KEY_AUTH_PATH;
    let auth_sk = keys.child_sk(change, index);
    let signature = sign_message(&auth_sk, &new_pub);

    env.service
        .add_access(&keys.copayer_id(), new_pub.clone(), signature)
        .await
        .unwrap();

    // Both the old and the new key authenticate requests.
    for sk in [&keys.request_sk, &new_sk] {
        let message = "get|/wallets|{}".to_string();
        let auth = env
            .service
            .authenticate(&Credentials {
                copayer_id: keys.copayer_id(),
                message: message.clone(),
                signature: Some(sign_message(sk, &message)),
                session: None,
                client_version: None,
                wallet_id_override: None,
            })
            .unwrap();
        assert_eq!(auth.wallet_id, wallet_id);
    }
}

#[tokio::test]
async fn add_access_caps_key_history() {
    let env = TestEnvironment::with_config(|c| c.max_keys = 2);
    let (_, copayers) = env.setup_complete_wallet(1, 1, false).await;
    let keys = &copayers[0];
    let (change, index) = derivation::REQUEST_KEY_AUTH_PATH;
    let auth_sk = keys.child_sk(change, index);

    let secp = bitcoin::secp256k1::Secp256k1::new();
    let second = bitcoin::secp256k1::SecretKey::from_slice(&[78u8; 32]).unwrap();
    let second_pub = hex::encode(
        bitcoin::secp256k1::PublicKey::from_secret_key(&secp, &second).serialize(),
    );
    env.service
        .add_access(&keys.copayer_id(), second_pub.clone(), sign_message(&auth_sk, &second_pub))
        .await
        .unwrap();

    let third = bitcoin::secp256k1::SecretKey::from_slice(&[79u8; 32]).unwrap();
    let third_pub = hex::encode(
        bitcoin::secp256k1::PublicKey::from_secret_key(&secp, &third).serialize(),
    );
    let err = env
        .service
        .add_access(&keys.copayer_id(), third_pub.clone(), sign_message(&auth_sk, &third_pub))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "TOO_MANY_KEYS");
}

#[tokio::test]
async fn sessions_are_sliding_and_idempotent() {
    let env = TestEnvironment::new();
    let (_, copayers) = env.setup_complete_wallet(1, 1, false).await;
    let copayer_id = copayers[0].copayer_id();

    let token1 = env.service.login(&copayer_id).unwrap();
    let token2 = env.service.login(&copayer_id).unwrap();
    assert_eq!(token1, token2);

    let auth = env.service.authenticate(&Credentials {
        copayer_id: copayer_id.clone(),
        message: "get|/wallets|{}".to_string(),
        signature: None,
        session: Some(token1.clone()),
        client_version: None,
        wallet_id_override: None,
    });
    assert!(auth.is_ok());

    env.service.logout(&copayer_id);
    let err = env
        .service
        .authenticate(&Credentials {
            copayer_id,
            message: "get|/wallets|{}".to_string(),
            signature: None,
            session: Some(token1),
            client_version: None,
            wallet_id_override: None,
        })
        .unwrap_err();
    assert_eq!(err.to_string(), "Session expired");
}

#[tokio::test]
async fn support_staff_override_and_identifier_lookups() {
    // Provisioned through configuration before the copayer ever joins.
    let staff = CopayerKeys::new(5);
    let staff_id = staff.copayer_id();
    let env = TestEnvironment::with_config(|c| c.support_staff.push(staff_id.clone()));

    let staff_wallet = env.create_wallet(1, 1, false).await;
    env.service
        .join_wallet(env.join_request(&staff_wallet, &staff))
        .await
        .unwrap();
    let (other_wallet, _) = env.setup_complete_wallet(1, 1, false).await;
    let other_address = env.service.create_address(&other_wallet, false).await.unwrap();

    // The explicit wallet id is honored for staff.
    let message = "get|/wallets|{}".to_string();
    let auth = env
        .service
        .authenticate(&Credentials {
            copayer_id: staff_id.clone(),
            message: message.clone(),
            signature: Some(sign_message(&staff.request_sk, &message)),
            session: None,
            client_version: None,
            wallet_id_override: Some(other_wallet.clone()),
        })
        .unwrap();
    assert!(auth.is_support_staff);
    assert_eq!(auth.wallet_id, other_wallet);

    // Staff may resolve foreign wallets by id and by address.
    let own_binding = env
        .service
        .authenticate(&Credentials {
            copayer_id: staff_id,
            message: message.clone(),
            signature: Some(sign_message(&staff.request_sk, &message)),
            session: None,
            client_version: None,
            wallet_id_override: None,
        })
        .unwrap();
    assert_eq!(own_binding.wallet_id, staff_wallet);
    let by_id = env
        .service
        .get_wallet_from_identifier_for(&own_binding, &other_wallet)
        .unwrap();
    assert_eq!(by_id.id, other_wallet);
    let by_address = env
        .service
        .get_wallet_from_identifier_for(&own_binding, &other_address.address)
        .unwrap();
    assert_eq!(by_address.id, other_wallet);
}

#[tokio::test]
async fn regular_copayers_are_bound_to_their_wallet() {
    let env = TestEnvironment::new();
    let (own_wallet, copayers) = env.setup_complete_wallet(1, 1, false).await;
    let keys = &copayers[0];

    let foreign = CopayerKeys::new(7);
    let foreign_wallet = env.create_wallet(1, 1, false).await;
    env.service
        .join_wallet(env.join_request(&foreign_wallet, &foreign))
        .await
        .unwrap();

    // The wallet override is ignored without the support-staff flag.
    let message = "get|/wallets|{}".to_string();
    let auth = env
        .service
        .authenticate(&Credentials {
            copayer_id: keys.copayer_id(),
            message: message.clone(),
            signature: Some(sign_message(&keys.request_sk, &message)),
            session: None,
            client_version: None,
            wallet_id_override: Some(foreign_wallet.clone()),
        })
        .unwrap();
    assert!(!auth.is_support_staff);
    assert_eq!(auth.wallet_id, own_wallet);

    // Identifier lookups are bound to the caller's own wallet id.
    let err = env
        .service
        .get_wallet_from_identifier_for(&auth, &foreign_wallet)
        .unwrap_err();
    assert_eq!(err.code(), "NOT_AUTHORIZED");

    let own = env
        .service
        .get_wallet_from_identifier_for(&auth, &own_wallet)
        .unwrap();
    assert_eq!(own.id, own_wallet);
}

#[tokio::test]
async fn client_version_floor() {
    let env = TestEnvironment::new();
    let (_, copayers) = env.setup_complete_wallet(1, 1, false).await;
    let keys = &copayers[0];

    let message = "get|/wallets|{}".to_string();
    let err = env
        .service
        .authenticate(&Credentials {
            copayer_id: keys.copayer_id(),
            message: message.clone(),
            signature: Some(sign_message(&keys.request_sk, &message)),
            session: None,
            client_version: Some("owc-0.9.0".to_string()),
            wallet_id_override: None,
        })
        .unwrap_err();
    assert_eq!(err.code(), "UPGRADE_NEEDED");
}
