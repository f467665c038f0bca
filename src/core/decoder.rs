//! Contract-notification decoding.
//!
//! Turns the heterogeneous `states` vectors found in block events into
//! uniform [`TransferRecord`]s. Three encoding conventions exist:
//!
//! - native coin/gas contracts push plain values: a literal `"transfer"`
//!   name, base58-check addresses and a JSON integer amount;
//! - generic token contracts push hex: a hex-encoded ASCII name, hex
//!   addresses used verbatim and a hex little-endian big-int amount;
//! - one specific token deployment additionally emits `increasePAX` /
//!   `decreasePAX` pseudo-events for mints and burns.
//!
//! Malformed notifications are dropped, never propagated as errors: one
//! unknown event shape must not stall block synchronisation.

use crate::chain::TxEvent;
use crate::config::{ContractKind, IndexerConfig, ZERO_ADDRESS};
use num_bigint::BigUint;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::debug;

/// Event name shared by all three conventions.
pub const TRANSFER_EVENT: &str = "transfer";
/// Mint pseudo-event of the quirk contract.
pub const INCREASE_PAX_EVENT: &str = "increasePAX";
/// Burn pseudo-event of the quirk contract.
pub const DECREASE_PAX_EVENT: &str = "decreasePAX";

/// The one generic-token deployment that emits the PAX pseudo-events.
pub const PAX_CONTRACT: &str = "6bbc07bae862db0d7867e4e5b1a13c663e2b4bc8";

/// Version byte of base58-check account addresses.
const ADDRESS_VERSION: u8 = 0x17;

/// Uniform transfer produced by the decoder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRecord {
    pub tx_hash: String,
    pub contract: String,
    /// Source-encoded event name (`transfer`, `increasePAX`, `decreasePAX`).
    pub name: String,
    /// Sender address, 40-char hex; [`ZERO_ADDRESS`] for mints.
    pub from: String,
    /// Receiver address, 40-char hex; [`ZERO_ADDRESS`] for burns.
    pub to: String,
    pub amount: u64,
}

/// Decoder over the configured monitored-contract set.
pub struct EventDecoder {
    config: Arc<IndexerConfig>,
}

impl EventDecoder {
    pub fn new(config: Arc<IndexerConfig>) -> Self {
        Self { config }
    }

    /// Extracts every decodable transfer from one transaction's
    /// notifications, in source order.
    pub fn transfers_from_tx(&self, evt: &TxEvent) -> Vec<TransferRecord> {
        let mut transfers = Vec::new();
        for notification in &evt.notify {
            if !self.config.is_monitored(&notification.contract) {
                continue;
            }
            let Some(states) = notification.states.as_array() else {
                continue;
            };
            if states.len() != 4 {
                continue;
            }
            let decoded = match self.config.kind_of(&notification.contract) {
                ContractKind::NativeCoin | ContractKind::NativeGas => decode_native(states),
                ContractKind::Token => decode_token(&notification.contract, states),
                ContractKind::Unknown => None,
            };
            match decoded {
                Some((name, from, to, amount)) => transfers.push(TransferRecord {
                    tx_hash: evt.tx_hash.clone(),
                    contract: notification.contract.clone(),
                    name,
                    from,
                    to,
                    amount,
                }),
                None => {
                    debug!(
                        tx_hash = %evt.tx_hash,
                        contract = %notification.contract,
                        "dropped undecodable notification"
                    );
                }
            }
        }
        transfers
    }
}

/// Native convention: `["transfer", base58(from), base58(to), amount]`.
fn decode_native(states: &[Value]) -> Option<(String, String, String, u64)> {
    if states[0].as_str()? != TRANSFER_EVENT {
        return None;
    }
    let from = address_from_base58(states[1].as_str()?)?;
    let to = address_from_base58(states[2].as_str()?)?;
    let amount = states[3].as_u64()?;
    Some((TRANSFER_EVENT.to_string(), from, to, amount))
}

/// Generic-token convention: every state is a hex string. The quirk
/// contract additionally understands its mint/burn pseudo-events.
fn decode_token(contract: &str, states: &[Value]) -> Option<(String, String, String, u64)> {
    let name = ascii_from_hex(states[0].as_str()?)?;
    if contract != PAX_CONTRACT {
        if name != TRANSFER_EVENT {
            return None;
        }
        let from = states[1].as_str()?.to_string();
        let to = states[2].as_str()?.to_string();
        let amount = u64_from_le_hex(states[3].as_str()?)?;
        return Some((name, from, to, amount));
    }
    match name.as_str() {
        TRANSFER_EVENT => {
            let from = states[1].as_str()?.to_string();
            let to = states[2].as_str()?.to_string();
            let amount = u64_from_le_hex(states[3].as_str()?)?;
            Some((name, from, to, amount))
        }
        INCREASE_PAX_EVENT => {
            let to = states[1].as_str()?.to_string();
            let amount = u64_from_le_hex(states[2].as_str()?)?;
            Some((name, ZERO_ADDRESS.to_string(), to, amount))
        }
        DECREASE_PAX_EVENT => {
            let from = states[1].as_str()?.to_string();
            let amount = u64_from_le_hex(states[3].as_str()?)?;
            Some((name, from, ZERO_ADDRESS.to_string(), amount))
        }
        _ => None,
    }
}

/// Converts a base58-check address (1 version byte, 20 payload bytes,
/// 4 checksum bytes of double-SHA256) to canonical 40-char hex. The hex
/// form shows the payload in reversed byte order.
pub fn address_from_base58(encoded: &str) -> Option<String> {
    let bytes = bs58::decode(encoded).into_vec().ok()?;
    if bytes.len() != 25 {
        return None;
    }
    let (body, checksum) = bytes.split_at(21);
    let digest = Sha256::digest(Sha256::digest(body));
    if digest[..4] != *checksum {
        return None;
    }
    let mut payload = body[1..].to_vec();
    payload.reverse();
    Some(hex::encode(payload))
}

/// Inverse of [`address_from_base58`]; `hex_addr` must be 40 hex chars.
pub fn address_to_base58(hex_addr: &str) -> Option<String> {
    let mut payload = hex::decode(hex_addr).ok()?;
    if payload.len() != 20 {
        return None;
    }
    payload.reverse();
    let mut data = Vec::with_capacity(25);
    data.push(ADDRESS_VERSION);
    data.extend_from_slice(&payload);
    let digest = Sha256::digest(Sha256::digest(&data));
    data.extend_from_slice(&digest[..4]);
    Some(bs58::encode(data).into_string())
}

/// Decodes a hex string whose bytes are ASCII text (event names, symbols).
pub fn ascii_from_hex(encoded: &str) -> Option<String> {
    let bytes = hex::decode(encoded).ok()?;
    String::from_utf8(bytes).ok()
}

/// Decodes a hex-encoded little-endian big-int, keeping the low 64 bits
/// the way the contract VM narrows integers.
pub fn u64_from_le_hex(encoded: &str) -> Option<u64> {
    let bytes = hex::decode(encoded).ok()?;
    let big = BigUint::from_bytes_le(&bytes);
    Some(big.to_u64_digits().first().copied().unwrap_or(0))
}

/// Renders transfers as the persisted notify JSON: an array of
/// `[name, from, to, amount]` tuples.
pub fn notify_json(transfers: &[TransferRecord]) -> String {
    let tuples: Vec<Value> = transfers
        .iter()
        .map(|t| serde_json::json!([t.name, t.from, t.to, t.amount]))
        .collect();
    Value::Array(tuples).to_string()
}
