//! The ledger service seam.
//!
//! Transaction construction, fee computation, and signing belong to an
//! external wallet. This module defines what the token layer needs from it
//! and ships an in-memory chain for tests and local development.
//!
//! Spending is two-phase: `create_action` with inputs returns a signable
//! reference, and `sign_action` completes it. A wallet that does not control
//! an input fails at the signing step.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use cinder_core::{now_millis, Outpoint, PublicKey, Txid};

use crate::error::{Result, TokenError};

/// Locking script of an output, reduced to what the token layer inspects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LockingScript {
    /// Spendable by `owner`, carrying a token payload.
    Capability { owner: PublicKey, payload: Vec<u8> },
    /// Provably unspendable (zero-value burn marker).
    Unspendable { data: Vec<u8> },
}

impl LockingScript {
    pub fn owner(&self) -> Option<&PublicKey> {
        match self {
            LockingScript::Capability { owner, .. } => Some(owner),
            LockingScript::Unspendable { .. } => None,
        }
    }

    pub fn payload(&self) -> &[u8] {
        match self {
            LockingScript::Capability { payload, .. } => payload,
            LockingScript::Unspendable { data } => data,
        }
    }
}

/// One output to create.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutput {
    pub script: LockingScript,
    pub satoshis: u64,
}

impl TxOutput {
    /// A 1-sat capability output.
    pub fn capability(owner: PublicKey, payload: Vec<u8>) -> Self {
        Self {
            script: LockingScript::Capability { owner, payload },
            satoshis: 1,
        }
    }

    /// A zero-value unspendable output.
    pub fn burn(data: Vec<u8>) -> Self {
        Self {
            script: LockingScript::Unspendable { data },
            satoshis: 0,
        }
    }
}

/// Arguments to `create_action`.
#[derive(Debug, Clone, Default)]
pub struct CreateAction {
    pub description: String,
    pub inputs: Vec<Outpoint>,
    pub outputs: Vec<TxOutput>,
}

/// Broadcast metadata returned by the ledger service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcastMeta {
    pub accepted_at: i64,
    pub output_count: usize,
}

/// Result of `create_action`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionResult {
    /// No inputs to sign; already broadcast.
    Broadcast { txid: Txid, meta: BroadcastMeta },
    /// Inputs must be signed via `sign_action(reference, ..)`.
    Signable { reference: String },
}

/// A signed and broadcast transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTx {
    pub txid: Txid,
    pub meta: BroadcastMeta,
}

/// Options for `get_public_key`.
#[derive(Debug, Clone, Default)]
pub struct KeyOptions {
    /// Request the long-lived identity key rather than a derived one.
    pub identity: bool,
    pub protocol: Option<String>,
}

/// An output as seen on the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerOutput {
    pub outpoint: Outpoint,
    pub script: LockingScript,
    pub satoshis: u64,
    /// The transaction that spent this output, if any.
    pub spent_by: Option<Txid>,
}

impl LedgerOutput {
    pub fn is_spent(&self) -> bool {
        self.spent_by.is_some()
    }
}

/// External ledger/wallet service.
#[async_trait]
pub trait Ledger: Send + Sync {
    async fn create_action(&self, action: CreateAction) -> Result<ActionResult>;

    async fn sign_action(&self, reference: &str, spends: &[Outpoint]) -> Result<SignedTx>;

    async fn get_public_key(&self, options: KeyOptions) -> Result<PublicKey>;

    /// Look up an output and its spend status. `None` if it never existed.
    async fn fetch_output(&self, outpoint: Outpoint) -> Result<Option<LedgerOutput>>;
}

// ────────────────────────────────────────────────────────────────────────────
// In-memory chain
// ────────────────────────────────────────────────────────────────────────────

struct StoredTx {
    outputs: Vec<TxOutput>,
}

#[derive(Default)]
struct ChainInner {
    txs: HashMap<Txid, StoredTx>,
    spent: HashMap<Outpoint, Txid>,
    pending: HashMap<String, CreateAction>,
    counter: u64,
    offline: bool,
}

/// A shared in-memory ledger.
///
/// Several [`MemoryWallet`]s can share one chain so multi-party flows see
/// the same outputs and spend status.
#[derive(Default)]
pub struct MemoryChain {
    inner: RwLock<ChainInner>,
}

impl MemoryChain {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make every call fail with a network error.
    pub fn set_offline(&self, offline: bool) {
        if let Ok(mut inner) = self.inner.write() {
            inner.offline = offline;
        }
    }

    /// Number of transactions broadcast so far.
    pub fn tx_count(&self) -> usize {
        self.inner.read().map(|i| i.txs.len()).unwrap_or(0)
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, ChainInner>> {
        let inner = self
            .inner
            .write()
            .map_err(|e| TokenError::Network(format!("chain lock poisoned: {}", e)))?;
        if inner.offline {
            return Err(TokenError::Network("ledger unreachable".into()));
        }
        Ok(inner)
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, ChainInner>> {
        let inner = self
            .inner
            .read()
            .map_err(|e| TokenError::Network(format!("chain lock poisoned: {}", e)))?;
        if inner.offline {
            return Err(TokenError::Network("ledger unreachable".into()));
        }
        Ok(inner)
    }

    fn broadcast(inner: &mut ChainInner, action: CreateAction) -> SignedTx {
        inner.counter += 1;
        let mut hasher = blake3::Hasher::new();
        hasher.update(&inner.counter.to_be_bytes());
        hasher.update(action.description.as_bytes());
        for input in &action.inputs {
            hasher.update(input.txid.as_bytes());
            hasher.update(&input.vout.to_be_bytes());
        }
        let txid = Txid::from_bytes(*hasher.finalize().as_bytes());

        for input in &action.inputs {
            inner.spent.insert(*input, txid);
        }
        let output_count = action.outputs.len();
        inner.txs.insert(
            txid,
            StoredTx {
                outputs: action.outputs,
            },
        );

        SignedTx {
            txid,
            meta: BroadcastMeta {
                accepted_at: now_millis(),
                output_count,
            },
        }
    }
}

/// A wallet bound to one identity key on a [`MemoryChain`].
pub struct MemoryWallet {
    chain: Arc<MemoryChain>,
    identity: PublicKey,
}

impl MemoryWallet {
    pub fn new(chain: Arc<MemoryChain>, identity: PublicKey) -> Self {
        Self { chain, identity }
    }

    pub fn chain(&self) -> &Arc<MemoryChain> {
        &self.chain
    }
}

#[async_trait]
impl Ledger for MemoryWallet {
    async fn create_action(&self, action: CreateAction) -> Result<ActionResult> {
        let mut inner = self.chain.write()?;

        for input in &action.inputs {
            let exists = inner
                .txs
                .get(&input.txid)
                .is_some_and(|tx| (input.vout as usize) < tx.outputs.len());
            if !exists {
                return Err(TokenError::OutputNotFound(*input));
            }
        }

        if action.inputs.is_empty() {
            let signed = MemoryChain::broadcast(&mut inner, action);
            debug!(txid = %signed.txid, "broadcast action");
            return Ok(ActionResult::Broadcast {
                txid: signed.txid,
                meta: signed.meta,
            });
        }

        inner.counter += 1;
        let reference = format!("ref-{}", inner.counter);
        inner.pending.insert(reference.clone(), action);
        Ok(ActionResult::Signable { reference })
    }

    async fn sign_action(&self, reference: &str, spends: &[Outpoint]) -> Result<SignedTx> {
        let mut inner = self.chain.write()?;

        let action = inner
            .pending
            .get(reference)
            .cloned()
            .ok_or_else(|| TokenError::SigningFailed(format!("unknown reference {}", reference)))?;

        for spend in spends {
            if !action.inputs.contains(spend) {
                return Err(TokenError::SigningFailed(format!("{} is not an input", spend)));
            }
            let script = inner
                .txs
                .get(&spend.txid)
                .and_then(|tx| tx.outputs.get(spend.vout as usize))
                .map(|o| o.script.clone())
                .ok_or(TokenError::OutputNotFound(*spend))?;
            if script.owner() != Some(&self.identity) {
                return Err(TokenError::SigningFailed(format!(
                    "wallet does not control {}",
                    spend
                )));
            }
            if inner.spent.contains_key(spend) {
                return Err(TokenError::TokenBurned(*spend));
            }
        }

        inner.pending.remove(reference);
        let signed = MemoryChain::broadcast(&mut inner, action);
        debug!(txid = %signed.txid, "signed and broadcast action");
        Ok(signed)
    }

    async fn get_public_key(&self, _options: KeyOptions) -> Result<PublicKey> {
        drop(self.chain.read()?);
        Ok(self.identity)
    }

    async fn fetch_output(&self, outpoint: Outpoint) -> Result<Option<LedgerOutput>> {
        let inner = self.chain.read()?;
        let output = inner
            .txs
            .get(&outpoint.txid)
            .and_then(|tx| tx.outputs.get(outpoint.vout as usize));
        Ok(output.map(|o| LedgerOutput {
            outpoint,
            script: o.script.clone(),
            satoshis: o.satoshis,
            spent_by: inner.spent.get(&outpoint).copied(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(b: u8) -> PublicKey {
        PublicKey::from_bytes([b; 32])
    }

    async fn mint(wallet: &MemoryWallet, owner: PublicKey) -> Outpoint {
        let result = wallet
            .create_action(CreateAction {
                description: "mint".into(),
                inputs: vec![],
                outputs: vec![TxOutput::capability(owner, b"{}".to_vec())],
            })
            .await
            .unwrap();
        match result {
            ActionResult::Broadcast { txid, .. } => Outpoint::new(txid, 0),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_spend_requires_ownership() {
        let chain = MemoryChain::new();
        let alice = MemoryWallet::new(chain.clone(), key(1));
        let bob = MemoryWallet::new(chain.clone(), key(2));

        let op = mint(&alice, key(1)).await;

        let action = CreateAction {
            description: "burn".into(),
            inputs: vec![op],
            outputs: vec![TxOutput::burn(vec![])],
        };
        let ActionResult::Signable { reference } = bob.create_action(action).await.unwrap() else {
            panic!("expected signable");
        };
        let err = bob.sign_action(&reference, &[op]).await.unwrap_err();
        assert!(matches!(err, TokenError::SigningFailed(_)));
        assert!(!alice.fetch_output(op).await.unwrap().unwrap().is_spent());

        let signed = alice.sign_action(&reference, &[op]).await.unwrap();
        let out = alice.fetch_output(op).await.unwrap().unwrap();
        assert_eq!(out.spent_by, Some(signed.txid));
    }

    #[tokio::test]
    async fn test_fetch_unknown_output() {
        let chain = MemoryChain::new();
        let wallet = MemoryWallet::new(chain, key(1));
        let op = Outpoint::new(Txid::from_bytes([9; 32]), 0);
        assert!(wallet.fetch_output(op).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_offline_chain_is_network_error() {
        let chain = MemoryChain::new();
        let wallet = MemoryWallet::new(chain.clone(), key(1));
        chain.set_offline(true);
        let err = wallet.get_public_key(KeyOptions::default()).await.unwrap_err();
        assert!(matches!(err, TokenError::Network(_)));

        chain.set_offline(false);
        assert_eq!(wallet.get_public_key(KeyOptions::default()).await.unwrap(), key(1));
    }

    #[tokio::test]
    async fn test_double_spend_rejected() {
        let chain = MemoryChain::new();
        let alice = MemoryWallet::new(chain.clone(), key(1));
        let op = mint(&alice, key(1)).await;

        for expect_ok in [true, false] {
            let action = CreateAction {
                description: "burn".into(),
                inputs: vec![op],
                outputs: vec![TxOutput::burn(vec![])],
            };
            let ActionResult::Signable { reference } = alice.create_action(action).await.unwrap() else {
                panic!("expected signable");
            };
            let result = alice.sign_action(&reference, &[op]).await;
            assert_eq!(result.is_ok(), expect_ok);
        }
    }
}
