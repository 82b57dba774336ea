//! Deterministic address derivation
//!
//! An address is the chash of a multisig definition in which each copayer's
//! placeholder has been replaced by the child pubkey derived from its xpub
//! along `m/{change}/{index}`. Given the same public-key ring and path, any
//! implementation produces the identical `(address, definition, signing
//! paths)` tuple.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use bitcoin::bip32::{ChildNumber, Xpub};
use bitcoin::hashes::{ripemd160, sha256, Hash};
use bitcoin::secp256k1::Secp256k1;
use std::str::FromStr;

use crate::error::ServiceError;
use crate::model::{Copayer, Wallet};

/// Path used to authorise request-key rotation (`addAccess`).
pub const REQUEST_KEY_AUTH_PATH: (u32, u32) = (1, 0);

const PLACEHOLDER_PREFIX: &str = "$pubkey@";

#[derive(Debug, Clone)]
pub struct DerivedAddress {
    pub address: String,
    pub definition: serde_json::Value,
    /// Derived pubkey (hex) to signing path within the definition.
    pub signing_paths: BTreeMap<String, String>,
}

/// Derive the compressed child pubkey (hex) of `xpub` at the non-hardened
/// path `m/{change}/{index}`.
pub fn derive_pubkey(xpub: &str, change: u32, index: u32) -> Result<String, ServiceError> {
    let xpub = Xpub::from_str(xpub)
        .map_err(|e| ServiceError::BadRequest(format!("invalid xpub: {}", e)))?;
    let secp = Secp256k1::verification_only();

    let change_child = ChildNumber::from_normal_idx(change)
        .map_err(|e| ServiceError::Internal(e.to_string()))?;
    let index_child = ChildNumber::from_normal_idx(index)
        .map_err(|e| ServiceError::Internal(e.to_string()))?;

    let derived = xpub
        .derive_pub(&secp, &[change_child, index_child])
        .map_err(|e| ServiceError::Internal(e.to_string()))?;

    Ok(hex::encode(derived.public_key.serialize()))
}

/// Build the definition template pinned at wallet creation. Placeholders are
/// positional until the roster is complete; see [`rekey_template`].
pub fn initial_template(m: usize, n: usize) -> serde_json::Value {
    if n == 1 {
        serde_json::json!(["sig", { "pubkey": format!("{}0", PLACEHOLDER_PREFIX) }])
    } else {
        let set: Vec<serde_json::Value> = (0..n)
            .map(|i| serde_json::json!(["sig", { "pubkey": format!("{}{}", PLACEHOLDER_PREFIX, i) }]))
            .collect();
        serde_json::json!(["r of set", { "required": m, "set": set }])
    }
}

/// Re-key positional placeholders to copayer device ids once the wallet is
/// complete, freezing the template.
pub fn rekey_template(template: &serde_json::Value, copayers: &[Copayer]) -> serde_json::Value {
    let mut rekeyed = template.clone();
    rewrite_placeholders(&mut rekeyed, &|marker| {
        marker
            .parse::<usize>()
            .ok()
            .and_then(|i| copayers.get(i))
            .map(|c| format!("{}{}", PLACEHOLDER_PREFIX, c.device_id))
    });
    rekeyed
}

/// Derive the address tuple for `wallet` at `m/{change}/{index}`.
///
/// The wallet must be complete: the public-key ring is the frozen copayer
/// roster.
pub fn derive_address(
    wallet: &Wallet,
    is_change: bool,
    index: u32,
) -> Result<DerivedAddress, ServiceError> {
    let change = if is_change { 1 } else { 0 };

    let mut by_device: BTreeMap<&str, String> = BTreeMap::new();
    for copayer in &wallet.copayers {
        let pubkey = derive_pubkey(&copayer.xpub, change, index)?;
        by_device.insert(copayer.device_id.as_str(), pubkey);
    }

    let mut definition = wallet.definition_template.clone();
    rewrite_placeholders(&mut definition, &|marker| by_device.get(marker).cloned());

    let signing_paths = collect_signing_paths(&definition);
    let canonical = serde_json::to_string(&definition)
        .map_err(|e| ServiceError::Internal(e.to_string()))?;
    let address = chash160(&canonical);

    Ok(DerivedAddress { address, definition, signing_paths })
}

/// Walk a definition and rewrite `$pubkey@<marker>` strings.
fn rewrite_placeholders(value: &mut serde_json::Value, f: &dyn Fn(&str) -> Option<String>) {
    match value {
        serde_json::Value::String(s) => {
            if let Some(marker) = s.strip_prefix(PLACEHOLDER_PREFIX) {
                if let Some(replacement) = f(marker) {
                    *s = replacement;
                }
            }
        }
        serde_json::Value::Array(items) => {
            for item in items {
                rewrite_placeholders(item, f);
            }
        }
        serde_json::Value::Object(map) => {
            for (_, item) in map.iter_mut() {
                rewrite_placeholders(item, f);
            }
        }
        _ => {}
    }
}

/// Map each pubkey in a substituted definition to its signing path:
/// `r` for a bare sig clause, `r.{i}` for member `i` of an `r of set`.
fn collect_signing_paths(definition: &serde_json::Value) -> BTreeMap<String, String> {
    let mut paths = BTreeMap::new();
    collect_paths_inner(definition, "r", &mut paths);
    paths
}

fn collect_paths_inner(
    value: &serde_json::Value,
    path: &str,
    out: &mut BTreeMap<String, String>,
) {
    let Some(items) = value.as_array() else { return };
    match items.first().and_then(|v| v.as_str()) {
        Some("sig") => {
            if let Some(pubkey) = items.get(1).and_then(|o| o.get("pubkey")).and_then(|p| p.as_str()) {
                out.insert(pubkey.to_string(), path.to_string());
            }
        }
        Some("r of set") => {
            if let Some(set) = items.get(1).and_then(|o| o.get("set")).and_then(|s| s.as_array()) {
                for (i, member) in set.iter().enumerate() {
                    collect_paths_inner(member, &format!("{}.{}", path, i), out);
                }
            }
        }
        _ => {}
    }
}

// --- chash address encoding ------------------------------------------------
//
// 160-bit address chash: ripemd160 of the canonical definition truncated to
// 128 data bits, a 32-bit checksum interleaved at offsets derived from the
// digits of PI, base32-encoded to a 32-character string.

const PI_DIGITS: &str = "14159265358979323846264338327950288419716939937510582097494459230781640628620899862803482534211706798214";
const CHASH_BITS: usize = 160;
const CHECKSUM_BITS: usize = 32;

fn checksum_offsets() -> &'static Vec<usize> {
    static OFFSETS: OnceLock<Vec<usize>> = OnceLock::new();
    OFFSETS.get_or_init(|| {
        let mut offsets = Vec::with_capacity(CHECKSUM_BITS);
        let mut offset = 0usize;
        for ch in PI_DIGITS.chars() {
            let digit = ch.to_digit(10).unwrap() as usize;
            if digit == 0 {
                continue;
            }
            offset += digit;
            if offset >= CHASH_BITS {
                break;
            }
            offsets.push(offset);
        }
        assert_eq!(offsets.len(), CHECKSUM_BITS, "wrong number of checksum offsets");
        offsets
    })
}

fn bytes_to_bits(bytes: &[u8]) -> Vec<bool> {
    let mut bits = Vec::with_capacity(bytes.len() * 8);
    for byte in bytes {
        for i in (0..8).rev() {
            bits.push(byte & (1 << i) != 0);
        }
    }
    bits
}

fn bits_to_bytes(bits: &[bool]) -> Vec<u8> {
    bits.chunks(8)
        .map(|chunk| chunk.iter().fold(0u8, |acc, &b| (acc << 1) | b as u8))
        .collect()
}

fn checksum_of(clean_data: &[u8]) -> [u8; 4] {
    let full = sha256::Hash::hash(clean_data).to_byte_array();
    [full[5], full[13], full[21], full[29]]
}

/// Compute the 32-character address chash of a canonical definition string.
pub fn chash160(data: &str) -> String {
    let hash = ripemd160::Hash::hash(data.as_bytes()).to_byte_array();
    let clean_data = &hash[4..];

    let clean_bits = bytes_to_bits(clean_data);
    let checksum_bits = bytes_to_bits(&checksum_of(clean_data));

    let mut mixed = Vec::with_capacity(CHASH_BITS);
    let mut start = 0usize;
    for (i, &offset) in checksum_offsets().iter().enumerate() {
        let end = offset - i;
        mixed.extend_from_slice(&clean_bits[start..end]);
        mixed.push(checksum_bits[i]);
        start = end;
    }
    mixed.extend_from_slice(&clean_bits[start..]);

    base32::encode(base32::Alphabet::Rfc4648 { padding: false }, &bits_to_bytes(&mixed))
}

/// Validate a chash-encoded address string by re-deriving its checksum.
pub fn is_valid_address(address: &str) -> bool {
    if address.len() != 32 {
        return false;
    }
    let Some(bytes) = base32::decode(base32::Alphabet::Rfc4648 { padding: false }, address) else {
        return false;
    };
    if bytes.len() != CHASH_BITS / 8 {
        return false;
    }

    let bits = bytes_to_bits(&bytes);
    let offsets = checksum_offsets();
    let mut checksum_bits = Vec::with_capacity(CHECKSUM_BITS);
    let mut clean_bits = Vec::with_capacity(CHASH_BITS - CHECKSUM_BITS);
    let mut start = 0usize;
    for &offset in offsets.iter() {
        clean_bits.extend_from_slice(&bits[start..offset]);
        checksum_bits.push(bits[offset]);
        start = offset + 1;
    }
    clean_bits.extend_from_slice(&bits[start..]);

    let clean_data = bits_to_bytes(&clean_bits);
    bits_to_bytes(&checksum_bits) == checksum_of(&clean_data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offsets_are_stable() {
        let offsets = checksum_offsets();
        assert_eq!(offsets.len(), 32);
        assert_eq!(offsets[0], 1);
        assert_eq!(*offsets.last().unwrap(), 154);
        assert!(offsets.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn chash_is_deterministic_and_valid() {
        let a1 = chash160("[\"sig\",{\"pubkey\":\"aa\"}]");
        let a2 = chash160("[\"sig\",{\"pubkey\":\"aa\"}]");
        assert_eq!(a1, a2);
        assert_eq!(a1.len(), 32);
        assert!(is_valid_address(&a1));
    }

    #[test]
    fn chash_differs_on_input() {
        assert_ne!(chash160("a"), chash160("b"));
    }

    #[test]
    fn corrupted_address_fails_validation() {
        let addr = chash160("some definition");
        let mut corrupted: Vec<char> = addr.chars().collect();
        corrupted[3] = if corrupted[3] == 'A' { 'B' } else { 'A' };
        let corrupted: String = corrupted.into_iter().collect();
        assert!(!is_valid_address(&corrupted));
    }

    #[test]
    fn template_shape() {
        let single = initial_template(1, 1);
        assert_eq!(single[0], "sig");

        let multi = initial_template(2, 3);
        assert_eq!(multi[0], "r of set");
        assert_eq!(multi[1]["required"], 2);
        assert_eq!(multi[1]["set"].as_array().unwrap().len(), 3);
    }

    #[test]
    fn signing_paths_for_set() {
        let definition = serde_json::json!(["r of set", {
            "required": 2,
            "set": [
                ["sig", {"pubkey": "k0"}],
                ["sig", {"pubkey": "k1"}],
                ["sig", {"pubkey": "k2"}],
            ]
        }]);
        let paths = collect_signing_paths(&definition);
        assert_eq!(paths["k0"], "r.0");
        assert_eq!(paths["k2"], "r.2");
    }

    #[test]
    fn signing_path_for_single_sig() {
        let definition = serde_json::json!(["sig", {"pubkey": "k"}]);
        let paths = collect_signing_paths(&definition);
        assert_eq!(paths["k"], "r");
    }
}
