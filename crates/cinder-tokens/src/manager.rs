//! The capability token manager.
//!
//! Mints and burns control tokens, mints and redeems data tokens, and keeps
//! the per-CT content key cache. Every failure here is fatal to the caller:
//! nothing is retried or swallowed, because spend status is what enforces
//! revocation.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::json;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use cinder_core::{
    now_millis, require_non_empty, ContentHash, DataTokenPermissions, Outpoint, PublicKey,
    ThreadPolicy, Txid, ValidationError,
};

use crate::content::ContentStore;
use crate::crypto::{ContentKey, IdentitySecret};
use crate::envelope::EncryptedContent;
use crate::error::{Result, TokenError};
use crate::ledger::{
    ActionResult, BroadcastMeta, CreateAction, KeyOptions, Ledger, LedgerOutput, TxOutput,
};
use crate::payload::{ControlTokenPayload, DataTokenPayload, TokenPayload};
use crate::wrap::{unwrap_key, wrap_key, WrapContext, WrappedKey};

/// Notified after a control token is successfully burned.
///
/// Failures are logged by the manager and never undo the burn.
#[async_trait]
pub trait BurnListener: Send + Sync {
    async fn on_burn(&self, control_token: Outpoint) -> anyhow::Result<()>;
}

/// Content sealed under a fresh key and published.
pub struct SealedContent {
    pub key: ContentKey,
    pub hash: ContentHash,
    pub hint_url: String,
}

/// A freshly minted control token.
#[derive(Debug, Clone)]
pub struct MintedControlToken {
    pub outpoint: Outpoint,
    pub broadcast: BroadcastMeta,
    pub payload: ControlTokenPayload,
}

/// One data token output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedDataToken {
    pub outpoint: Outpoint,
    pub recipient: PublicKey,
    pub permissions: DataTokenPermissions,
    pub wrapped_key: Vec<u8>,
}

/// Result of `mint_data_tokens`. Outputs are in recipient order.
#[derive(Debug, Clone)]
pub struct MintedDataTokens {
    pub txid: Txid,
    pub outputs: Vec<IssuedDataToken>,
}

/// Result of a burn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BurnReceipt {
    pub control_token: Outpoint,
    pub burn_txid: Txid,
}

/// Spend status of a control token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenStatus {
    Active,
    Burned,
}

/// Result of `verify_control_token`.
#[derive(Debug, Clone)]
pub struct ControlTokenStatus {
    pub status: TokenStatus,
    pub owner: Option<PublicKey>,
    pub payload: ControlTokenPayload,
}

/// What a successful redemption yields.
///
/// The hash check is exposed, not enforced.
pub struct RedeemedContent {
    pub control_token: Outpoint,
    pub data_token: Outpoint,
    pub content_key: ContentKey,
    pub plaintext: Bytes,
    pub permissions: DataTokenPermissions,
    pub hint_url: Option<String>,
    pub declared_hash: ContentHash,
    pub computed_hash: ContentHash,
}

impl RedeemedContent {
    pub fn hash_matches(&self) -> bool {
        self.declared_hash == self.computed_hash
    }
}

impl fmt::Debug for RedeemedContent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedeemedContent")
            .field("control_token", &self.control_token)
            .field("data_token", &self.data_token)
            .field("permissions", &self.permissions)
            .field("len", &self.plaintext.len())
            .field("hash_matches", &self.hash_matches())
            .finish()
    }
}

/// Capability token manager.
pub struct TokenManager {
    ledger: Arc<dyn Ledger>,
    content: Arc<dyn ContentStore>,
    keys: RwLock<HashMap<Outpoint, ContentKey>>,
    listeners: RwLock<Vec<Arc<dyn BurnListener>>>,
}

impl TokenManager {
    pub fn new(ledger: Arc<dyn Ledger>, content: Arc<dyn ContentStore>) -> Self {
        Self {
            ledger,
            content,
            keys: RwLock::new(HashMap::new()),
            listeners: RwLock::new(Vec::new()),
        }
    }

    pub fn ledger(&self) -> &Arc<dyn Ledger> {
        &self.ledger
    }

    /// Register a listener for successful burns.
    pub async fn add_burn_listener(&self, listener: Arc<dyn BurnListener>) {
        self.listeners.write().await.push(listener);
    }

    // ────────────────────────────────────────────────────────────────────────
    // Key cache
    // ────────────────────────────────────────────────────────────────────────

    pub async fn remember_key(&self, control_token: Outpoint, key: ContentKey) {
        self.keys.write().await.insert(control_token, key);
    }

    pub async fn cached_key(&self, control_token: Outpoint) -> Option<ContentKey> {
        self.keys.read().await.get(&control_token).cloned()
    }

    /// Drop (and thereby zeroize) the cached key.
    pub async fn forget_key(&self, control_token: Outpoint) -> bool {
        self.keys.write().await.remove(&control_token).is_some()
    }

    // ────────────────────────────────────────────────────────────────────────
    // Content
    // ────────────────────────────────────────────────────────────────────────

    /// Seal content under a fresh key and publish it.
    pub async fn seal_content(&self, plaintext: &[u8]) -> Result<SealedContent> {
        let key = ContentKey::generate();
        let sealed = EncryptedContent::seal(plaintext, &key)?;
        let hint_url = self.content.publish(Bytes::from(sealed.to_bytes()?)).await?;
        Ok(SealedContent {
            key,
            hash: ContentHash::compute(plaintext),
            hint_url,
        })
    }

    // ────────────────────────────────────────────────────────────────────────
    // Control tokens
    // ────────────────────────────────────────────────────────────────────────

    /// Mint a control token owned by the wallet's identity key.
    ///
    /// `content_hash` must be a 64-hex digest and `wrapped_key` non-empty.
    pub async fn mint_control_token(
        &self,
        content_hash: &str,
        wrapped_key: &[u8],
        hint_url: Option<&str>,
        policy: &ThreadPolicy,
    ) -> Result<MintedControlToken> {
        let hash = ContentHash::from_hex(content_hash)?;
        require_non_empty("wrapped key", wrapped_key)?;

        let owner = self
            .ledger
            .get_public_key(KeyOptions {
                identity: true,
                protocol: None,
            })
            .await?;

        let payload = ControlTokenPayload {
            hash,
            wrapped_key: wrapped_key.to_vec(),
            hint_url: hint_url.map(str::to_string),
            metadata: json!({
                "p": policy.permissions.as_str(),
                "relay": policy.allow_offline_relay,
            }),
            ts: now_millis(),
        };
        let script_payload = TokenPayload::Control(payload.clone()).to_json()?;

        let result = self
            .ledger
            .create_action(CreateAction {
                description: "mint control token".into(),
                inputs: vec![],
                outputs: vec![TxOutput::capability(owner, script_payload)],
            })
            .await?;

        let (txid, broadcast) = match result {
            ActionResult::Broadcast { txid, meta } => (txid, meta),
            ActionResult::Signable { reference } => {
                let signed = self.ledger.sign_action(&reference, &[]).await?;
                (signed.txid, signed.meta)
            }
        };

        let outpoint = Outpoint::new(txid, 0);
        info!(ct = %outpoint, hash = %hash, "minted control token");
        Ok(MintedControlToken {
            outpoint,
            broadcast,
            payload,
        })
    }

    /// Spend the control token to an unspendable output.
    ///
    /// Fails with `AccessDenied` if this wallet does not control it. On
    /// success the cached key is zeroized and burn listeners run.
    pub async fn burn_control_token(&self, control_token: Outpoint) -> Result<BurnReceipt> {
        let output = self.fetch_required(control_token).await?;
        if output.is_spent() {
            return Err(TokenError::TokenBurned(control_token));
        }

        let result = self
            .ledger
            .create_action(CreateAction {
                description: "burn control token".into(),
                inputs: vec![control_token],
                outputs: vec![TxOutput::burn(format!("burn:{}", control_token).into_bytes())],
            })
            .await?;

        let burn_txid = match result {
            ActionResult::Broadcast { txid, .. } => txid,
            ActionResult::Signable { reference } => self
                .ledger
                .sign_action(&reference, &[control_token])
                .await
                .map_err(|e| match e {
                    TokenError::SigningFailed(reason) => TokenError::AccessDenied(format!(
                        "cannot burn {}: {}",
                        control_token, reason
                    )),
                    other => other,
                })?
                .txid,
        };

        info!(ct = %control_token, burn_txid = %burn_txid, "burned control token");

        self.forget_key(control_token).await;

        let listeners = self.listeners.read().await.clone();
        for listener in listeners {
            if let Err(e) = listener.on_burn(control_token).await {
                warn!(ct = %control_token, error = %e, "burn listener failed");
            }
        }

        Ok(BurnReceipt {
            control_token,
            burn_txid,
        })
    }

    /// Report spend status and the decoded payload.
    pub async fn verify_control_token(&self, control_token: Outpoint) -> Result<ControlTokenStatus> {
        let output = self.fetch_required(control_token).await?;
        let payload = TokenPayload::from_json(output.script.payload())?.into_control()?;
        Ok(ControlTokenStatus {
            status: if output.is_spent() {
                TokenStatus::Burned
            } else {
                TokenStatus::Active
            },
            owner: output.script.owner().copied(),
            payload,
        })
    }

    /// Recover the content key from the CT's self-wrapped key.
    pub async fn recover_content_key(
        &self,
        control_token: Outpoint,
        secret: &IdentitySecret,
    ) -> Result<ContentKey> {
        let ct = self.fetch_active_control(control_token).await?;
        let wrapped = WrappedKey::from_bytes(&ct.wrapped_key)?;
        let key = unwrap_key(&wrapped, secret, WrapContext::ControlToken(ct.hash))?;
        self.remember_key(control_token, key.clone()).await;
        Ok(key)
    }

    // ────────────────────────────────────────────────────────────────────────
    // Data tokens
    // ────────────────────────────────────────────────────────────────────────

    /// Issue one data token per recipient in a single transaction.
    ///
    /// Fails before creating anything if the CT is missing or spent.
    pub async fn mint_data_tokens(
        &self,
        control_token: Outpoint,
        recipients: &[PublicKey],
        key: &ContentKey,
        permissions: DataTokenPermissions,
    ) -> Result<MintedDataTokens> {
        if recipients.is_empty() {
            return Err(ValidationError::Empty("recipients").into());
        }
        self.fetch_active_control(control_token).await?;

        let ts = now_millis();
        let mut wrapped_keys = Vec::with_capacity(recipients.len());
        let mut outputs = Vec::with_capacity(recipients.len());
        for recipient in recipients {
            let wrapped = wrap_key(key, recipient, WrapContext::DataToken(control_token))?.to_bytes();
            let payload = DataTokenPayload::for_outpoint(
                control_token,
                *recipient,
                permissions,
                wrapped.clone(),
                ts,
            );
            outputs.push(TxOutput::capability(
                *recipient,
                TokenPayload::Data(payload).to_json()?,
            ));
            wrapped_keys.push(wrapped);
        }

        let result = self
            .ledger
            .create_action(CreateAction {
                description: "mint data tokens".into(),
                inputs: vec![],
                outputs,
            })
            .await?;
        let txid = match result {
            ActionResult::Broadcast { txid, .. } => txid,
            ActionResult::Signable { reference } => self.ledger.sign_action(&reference, &[]).await?.txid,
        };

        let outputs = recipients
            .iter()
            .zip(wrapped_keys)
            .enumerate()
            .map(|(i, (recipient, wrapped_key))| IssuedDataToken {
                outpoint: Outpoint::new(txid, i as u32),
                recipient: *recipient,
                permissions,
                wrapped_key,
            })
            .collect::<Vec<_>>();

        info!(ct = %control_token, count = outputs.len(), "minted data tokens");
        Ok(MintedDataTokens { txid, outputs })
    }

    /// Redeem a data token and decrypt the content it grants.
    pub async fn redeem_data_token(
        &self,
        control_token: Outpoint,
        data_token: Outpoint,
        secret: &IdentitySecret,
    ) -> Result<RedeemedContent> {
        // (1) + (2): CT must exist, be unspent, and decode
        let ct = self.fetch_active_control(control_token).await?;

        // (3): DT must point back at this CT
        let dt_output = self.fetch_required(data_token).await?;
        let dt = TokenPayload::from_json(dt_output.script.payload())?.into_data()?;
        let referenced = dt.control_token_ref(data_token.txid)?;
        if referenced != control_token {
            return Err(TokenError::AccessDenied(format!(
                "data token {} references {}, not {}",
                data_token, referenced, control_token
            )));
        }

        // (4)
        let wrapped = WrappedKey::from_bytes(&dt.wrapped_key)?;
        let content_key = unwrap_key(&wrapped, secret, WrapContext::DataToken(control_token))?;
        debug!(ct = %control_token, dt = %data_token, "unwrapped content key");

        // (5)
        let hint_url = ct.hint_url.clone().ok_or_else(|| {
            ValidationError::MalformedPayload("control token carries no content hint".into())
        })?;
        let sealed = EncryptedContent::from_bytes(&self.content.fetch(&hint_url).await?)?;
        let plaintext = sealed.open(&content_key)?;
        let computed_hash = ContentHash::compute(&plaintext);

        if computed_hash != ct.hash {
            warn!(ct = %control_token, "redeemed content does not match declared hash");
        }

        self.remember_key(control_token, content_key.clone()).await;

        Ok(RedeemedContent {
            control_token,
            data_token,
            content_key,
            plaintext: Bytes::from(plaintext),
            permissions: dt.permissions,
            hint_url: Some(hint_url),
            declared_hash: ct.hash,
            computed_hash,
        })
    }

    // ────────────────────────────────────────────────────────────────────────
    // Helpers
    // ────────────────────────────────────────────────────────────────────────

    async fn fetch_required(&self, outpoint: Outpoint) -> Result<LedgerOutput> {
        self.ledger
            .fetch_output(outpoint)
            .await?
            .ok_or(TokenError::OutputNotFound(outpoint))
    }

    async fn fetch_active_control(&self, control_token: Outpoint) -> Result<ControlTokenPayload> {
        let output = self.fetch_required(control_token).await?;
        if output.is_spent() {
            return Err(TokenError::TokenBurned(control_token));
        }
        TokenPayload::from_json(output.script.payload())?.into_control()
    }
}
