//! Shared test infrastructure: stub explorer/hub, deterministic copayer
//! key material, and helpers to stand up complete wallets.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use base64::Engine;
use bitcoin::bip32::{ChildNumber, Xpriv, Xpub};
use bitcoin::secp256k1::{Message, PublicKey, Secp256k1, SecretKey};
use chrono::Utc;

use wallet_service::compose;
use wallet_service::config::Config;
use wallet_service::error::ServiceError;
use wallet_service::ledger::types::{
    AssetMetadataRecord, BalanceEntry, HistoryItem, HistoryOptions, Joint, TxRecord, UtxoRecord,
};
use wallet_service::ledger::{Explorer, Hub};
use wallet_service::model::{Network, Output, TxApp, TxProposal};
use wallet_service::service::{CreateTxRequest, CreateWalletRequest, JoinWalletRequest, WalletService};
use wallet_service::sigs;
use wallet_service::storage::Storage;

// --- stub explorer ---------------------------------------------------------

#[derive(Default)]
pub struct StubExplorer {
    pub activity: Mutex<HashMap<String, bool>>,
    pub utxos: Mutex<Vec<UtxoRecord>>,
    pub transactions: Mutex<HashMap<String, TxRecord>>,
    pub assets: Mutex<Vec<AssetMetadataRecord>>,
    pub fail_activity: AtomicBool,
    seed_counter: Mutex<u32>,
}

impl StubExplorer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn seed_utxo(&self, address: &str, amount: u64) -> UtxoRecord {
        let mut counter = self.seed_counter.lock().unwrap();
        *counter += 1;
        let utxo = UtxoRecord {
            unit: format!("seed-unit-{}", counter),
            message_index: 0,
            output_index: 0,
            address: address.to_string(),
            amount,
            asset: None,
            denomination: 1,
            stable: true,
            time: Some(Utc::now()),
        };
        self.utxos.lock().unwrap().push(utxo.clone());
        self.activity.lock().unwrap().insert(address.to_string(), true);
        utxo
    }

    pub fn set_activity(&self, address: &str, active: bool) {
        self.activity.lock().unwrap().insert(address.to_string(), active);
    }

    pub fn set_transaction(&self, unit: &str) {
        self.transactions.lock().unwrap().insert(
            unit.to_string(),
            TxRecord { unit: unit.to_string(), joint: None, stable: false, mci: None, time: None },
        );
    }

    pub fn set_fail_activity(&self, fail: bool) {
        self.fail_activity.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl Explorer for StubExplorer {
    async fn get_utxos(
        &self,
        addresses: &[String],
        asset: Option<&str>,
    ) -> Result<Vec<UtxoRecord>, ServiceError> {
        Ok(self
            .utxos
            .lock()
            .unwrap()
            .iter()
            .filter(|u| addresses.contains(&u.address))
            .filter(|u| u.asset.as_deref() == asset)
            .cloned()
            .collect())
    }

    async fn get_balance(
        &self,
        addresses: &[String],
        asset: Option<&str>,
    ) -> Result<BTreeMap<String, BalanceEntry>, ServiceError> {
        let mut balances: BTreeMap<String, BalanceEntry> = BTreeMap::new();
        for utxo in self.get_utxos(addresses, asset).await? {
            let entry = balances
                .entry(utxo.asset.clone().unwrap_or_else(|| "base".to_string()))
                .or_default();
            if utxo.stable {
                entry.stable += utxo.amount;
                entry.stable_outputs_count += 1;
            } else {
                entry.pending += utxo.amount;
                entry.pending_outputs_count += 1;
            }
        }
        Ok(balances)
    }

    async fn get_tx_history(
        &self,
        _addresses: &[String],
        _opts: &HistoryOptions,
    ) -> Result<Vec<HistoryItem>, ServiceError> {
        Ok(Vec::new())
    }

    async fn get_address_activity(&self, address: &str) -> Result<bool, ServiceError> {
        if self.fail_activity.load(Ordering::SeqCst) {
            return Err(ServiceError::Explorer("stub explorer down".to_string()));
        }
        Ok(*self.activity.lock().unwrap().get(address).unwrap_or(&false))
    }

    async fn get_transaction(&self, unit: &str) -> Result<Option<TxRecord>, ServiceError> {
        Ok(self.transactions.lock().unwrap().get(unit).cloned())
    }

    async fn get_asset_metadata(
        &self,
        registries: &[String],
    ) -> Result<Vec<AssetMetadataRecord>, ServiceError> {
        Ok(self
            .assets
            .lock()
            .unwrap()
            .iter()
            .filter(|a| registries.contains(&a.registry_address))
            .cloned()
            .collect())
    }
}

// --- stub hub --------------------------------------------------------------

#[derive(Default)]
pub struct StubHub {
    pub fail: AtomicBool,
    pub broadcasts: Mutex<Vec<String>>,
}

impl StubHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl Hub for StubHub {
    async fn broadcast_joint(&self, joint: &Joint) -> Result<String, ServiceError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(ServiceError::Hub("stub hub refuses".to_string()));
        }
        let unit = joint
            .unit
            .unit
            .clone()
            .ok_or_else(|| ServiceError::Hub("joint lacks unit hash".to_string()))?;
        self.broadcasts.lock().unwrap().push(unit.clone());
        Ok(unit)
    }
}

// --- copayer key material --------------------------------------------------

pub struct CopayerKeys {
    pub master: Xpriv,
    pub xpub: String,
    pub request_sk: SecretKey,
    pub request_pub_key: String,
    pub device_id: String,
    pub name: String,
}

impl CopayerKeys {
    pub fn new(index: u8) -> Self {
        let secp = Secp256k1::new();
        let seed = [index + 1; 32];
        let master = Xpriv::new_master(bitcoin::Network::Bitcoin, &seed).unwrap();
        let xpub = Xpub::from_priv(&secp, &master).to_string();

        let request_sk = SecretKey::from_slice(&[index + 101; 32]).unwrap();
        let request_pub_key =
            hex::encode(PublicKey::from_secret_key(&secp, &request_sk).serialize());

        Self {
            master,
            xpub,
            request_sk,
            request_pub_key,
            device_id: format!("device-{}", index),
            name: format!("copayer-{}", index),
        }
    }

    pub fn copayer_id(&self) -> String {
        sigs::copayer_id_from_xpub(&self.xpub)
    }

    /// Child private key at the non-hardened path `m/{change}/{index}`.
    pub fn child_sk(&self, change: u32, index: u32) -> SecretKey {
        let secp = Secp256k1::new();
        let path = [
            ChildNumber::from_normal_idx(change).unwrap(),
            ChildNumber::from_normal_idx(index).unwrap(),
        ];
        self.master.derive_priv(&secp, &path).unwrap().private_key
    }

    /// Accept-action signatures: one per author address of the draft.
    pub fn sign_proposal(&self, tx: &TxProposal) -> BTreeMap<String, String> {
        let digest = compose::unit_digest(&tx.joint.unit).unwrap();
        let secp = Secp256k1::new();
        let mut signatures = BTreeMap::new();
        for (author, info) in &tx.signing_info {
            let (change, index) = parse_path(&info.path);
            let sk = self.child_sk(change, index);
            let sig = secp.sign_ecdsa(&Message::from_digest(digest), &sk);
            let encoded =
                base64::engine::general_purpose::STANDARD.encode(sig.serialize_compact());
            signatures.insert(author.clone(), encoded);
        }
        signatures
    }

    /// The publish signature over the draft-joint hash, under the request key.
    pub fn sign_publish(&self, tx: &TxProposal) -> String {
        let draft_hash = compose::unit_hash(&tx.joint.unit).unwrap();
        sign_message(&self.request_sk, &draft_hash)
    }
}

fn parse_path(path: &str) -> (u32, u32) {
    let mut parts = path.strip_prefix("m/").unwrap().split('/');
    (
        parts.next().unwrap().parse().unwrap(),
        parts.next().unwrap().parse().unwrap(),
    )
}

pub fn sign_message(sk: &SecretKey, message: &str) -> String {
    let secp = Secp256k1::new();
    let digest = Message::from_digest(sigs::sha256_digest(message.as_bytes()));
    hex::encode(secp.sign_ecdsa(&digest, sk).serialize_der())
}

// --- environment -----------------------------------------------------------

pub struct TestEnvironment {
    pub service: Arc<WalletService>,
    pub explorer: Arc<StubExplorer>,
    pub hub: Arc<StubHub>,
    pub creation_sk: SecretKey,
    pub creation_pub_key: String,
}

impl TestEnvironment {
    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    pub fn with_config(tweak: impl FnOnce(&mut Config)) -> Self {
        init_logging();
        let mut config = Config::default();
        tweak(&mut config);

        let explorer = StubExplorer::new();
        let hub = StubHub::new();
        let service = WalletService::new(config, Storage::new(), explorer.clone(), hub.clone());

        let secp = Secp256k1::new();
        let creation_sk = SecretKey::from_slice(&[42u8; 32]).unwrap();
        let creation_pub_key =
            hex::encode(PublicKey::from_secret_key(&secp, &creation_sk).serialize());

        Self { service, explorer, hub, creation_sk, creation_pub_key }
    }

    pub async fn create_wallet(&self, m: usize, n: usize, single_address: bool) -> String {
        self.service
            .create_wallet(CreateWalletRequest {
                id: None,
                name: format!("{}-of-{}", m, n),
                m,
                n,
                pub_key: self.creation_pub_key.clone(),
                coin: None,
                network: Network::Test,
                single_address,
                support_bip44: true,
            })
            .await
            .expect("create wallet")
    }

    pub fn join_request(&self, wallet_id: &str, keys: &CopayerKeys) -> JoinWalletRequest {
        let message = format!("{}|{}|{}", keys.name, keys.xpub, keys.request_pub_key);
        JoinWalletRequest {
            wallet_id: wallet_id.to_string(),
            name: keys.name.clone(),
            xpub: keys.xpub.clone(),
            request_pub_key: keys.request_pub_key.clone(),
            copayer_signature: sign_message(&self.creation_sk, &message),
            device_id: keys.device_id.clone(),
            account: 0,
            coin: None,
            network: Some(Network::Test),
            custom_data: None,
            dry_run: false,
            support_bip44: true,
        }
    }

    /// Create a wallet and join `n` fresh copayers.
    pub async fn setup_complete_wallet(
        &self,
        m: usize,
        n: usize,
        single_address: bool,
    ) -> (String, Vec<CopayerKeys>) {
        let wallet_id = self.create_wallet(m, n, single_address).await;
        let mut copayers = Vec::new();
        for i in 0..n {
            let keys = CopayerKeys::new(i as u8);
            self.service
                .join_wallet(self.join_request(&wallet_id, &keys))
                .await
                .expect("join wallet");
            copayers.push(keys);
        }
        (wallet_id, copayers)
    }

    /// Create, publish and return a payment proposal by `creator`.
    pub async fn published_payment(
        &self,
        wallet_id: &str,
        creator: &CopayerKeys,
        outputs: Vec<Output>,
    ) -> TxProposal {
        let tx = self
            .service
            .create_tx(
                &creator.copayer_id(),
                wallet_id,
                CreateTxRequest {
                    tx_proposal_id: None,
                    app: TxApp::Payment,
                    params: serde_json::Value::Null,
                    outputs,
                    dry_run: false,
                },
            )
            .await
            .expect("create proposal");
        self.service
            .publish_tx(&creator.copayer_id(), wallet_id, &tx.id, &creator.sign_publish(&tx))
            .await
            .expect("publish proposal")
    }

    pub fn notifications_of_kind(&self, wallet_id: &str, kind: &str) -> usize {
        self.service
            .storage
            .fetch_notifications(wallet_id, None, None)
            .iter()
            .filter(|n| n.kind == kind)
            .count()
    }

    /// An address nobody in the test wallets owns, for payment outputs.
    pub fn external_address(&self, tag: &str) -> String {
        wallet_service::derivation::chash160(&format!("external-{}", tag))
    }
}

fn init_logging() {
    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .is_test(true)
        .try_init()
        .ok();
}
