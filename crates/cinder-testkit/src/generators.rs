//! Proptest generators for property-based testing.

use proptest::prelude::*;

use cinder::{ControlEvent, Origin};
use cinder_core::{
    ContentHash, DataTokenPermissions, IdentityKind, Outpoint, PublicKey, Thread, ThreadId,
    ThreadPolicy, ThreadStatus, Txid,
};

/// Generate a random Txid.
pub fn txid() -> impl Strategy<Value = Txid> {
    any::<[u8; 32]>().prop_map(Txid::from_bytes)
}

/// Generate a random Outpoint with a small vout.
pub fn outpoint() -> impl Strategy<Value = Outpoint> {
    (txid(), 0u32..8).prop_map(|(txid, vout)| Outpoint::new(txid, vout))
}

/// Generate a random PublicKey.
pub fn public_key() -> impl Strategy<Value = PublicKey> {
    any::<[u8; 32]>().prop_map(PublicKey::from_bytes)
}

/// Generate a content hash.
pub fn content_hash() -> impl Strategy<Value = ContentHash> {
    prop::collection::vec(any::<u8>(), 0..64).prop_map(|bytes| ContentHash::compute(&bytes))
}

/// Generate a thread id from the URL-safe alphabet.
pub fn thread_id() -> impl Strategy<Value = ThreadId> {
    "[a-z0-9-]{1,24}".prop_map(|s| ThreadId::new(s).expect("pattern yields valid ids"))
}

/// Generate a reasonable timestamp.
pub fn timestamp() -> impl Strategy<Value = i64> {
    0i64..=4_000_000_000_000
}

pub fn thread_status() -> impl Strategy<Value = ThreadStatus> {
    prop_oneof![
        Just(ThreadStatus::Pending),
        Just(ThreadStatus::Active),
        Just(ThreadStatus::Blocked),
        Just(ThreadStatus::Burned),
        Just(ThreadStatus::Left),
    ]
}

pub fn identity_kind() -> impl Strategy<Value = IdentityKind> {
    prop_oneof![Just(IdentityKind::Holder), Just(IdentityKind::Guest)]
}

pub fn permissions() -> impl Strategy<Value = DataTokenPermissions> {
    prop_oneof![
        Just(DataTokenPermissions::Read),
        Just(DataTokenPermissions::ReadWrite),
    ]
}

pub fn origin() -> impl Strategy<Value = Origin> {
    prop_oneof![Just(Origin::Local), Just(Origin::Peer)]
}

/// Hex text that is sometimes not a valid wrapped key.
fn wrapped_key() -> impl Strategy<Value = Option<String>> {
    prop_oneof![
        Just(None),
        prop::collection::vec(any::<u8>(), 1..96).prop_map(|b| Some(hex::encode(b))),
        Just(Some("zz".to_string())),
    ]
}

/// Generate any control event.
pub fn control_event() -> impl Strategy<Value = ControlEvent> {
    let label = prop::option::of("[a-zA-Z ]{0,16}");
    prop_oneof![
        timestamp().prop_map(|at| ControlEvent::Leave { at }),
        (timestamp(), prop::option::of(txid()))
            .prop_map(|(at, burn_txid)| ControlEvent::Burn { at, burn_txid }),
        (timestamp(), label.clone()).prop_map(|(at, reason)| ControlEvent::Block { at, reason }),
        timestamp().prop_map(|at| ControlEvent::Unblock { at }),
        (timestamp(), public_key(), public_key(), label.clone()).prop_map(
            |(at, accepter, inviter, label)| ControlEvent::Link {
                at,
                accepter,
                inviter,
                label,
            }
        ),
        (
            timestamp(),
            outpoint(),
            content_hash(),
            public_key(),
            identity_kind(),
            wrapped_key()
        )
            .prop_map(
                |(at, control_token, content_hash, minter, identity_kind, wrapped_key)| {
                    ControlEvent::MintCt {
                        at,
                        control_token,
                        content_hash,
                        hint_url: Some("mem://hint".into()),
                        minter,
                        identity_kind,
                        wrapped_key,
                    }
                }
            ),
        (
            timestamp(),
            outpoint(),
            outpoint(),
            public_key(),
            permissions(),
            wrapped_key()
        )
            .prop_map(
                |(at, data_token, control_token, recipient, permissions, wrapped_key)| {
                    ControlEvent::MintDt {
                        at,
                        data_token,
                        control_token,
                        recipient,
                        permissions,
                        wrapped_key,
                    }
                }
            ),
        (timestamp(), label).prop_map(|(at, label)| ControlEvent::ProfileUpdate { at, label }),
    ]
}

/// Generate a thread record in any status, with or without a control token.
pub fn thread() -> impl Strategy<Value = Thread> {
    (
        thread_id(),
        identity_kind(),
        public_key(),
        prop::option::of(public_key()),
        thread_status(),
        prop::option::of(outpoint()),
        timestamp(),
        0u64..16,
    )
        .prop_map(
            |(thread_id, kind, local_key, peer_key, status, control_token, at, revision)| {
                let mut thread = Thread::new(thread_id, kind, local_key, ThreadPolicy::default(), at);
                thread.peer_key = peer_key;
                thread.control_token = control_token;
                thread.metadata_revision = revision;
                match status {
                    ThreadStatus::Burned => thread.mark_burned(at),
                    ThreadStatus::Left => {
                        thread.status = status;
                        thread.left_at = Some(at);
                    }
                    _ => thread.status = status,
                }
                thread
            },
        )
}
