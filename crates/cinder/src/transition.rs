//! The thread state machine.
//!
//! [`apply`] is the only way a thread record changes in response to a
//! control event. It is total: every `(status, event)` pair yields either a
//! new record or an `InvalidTransition` error, never a panic. Re-applying an
//! event that is already reflected returns the record unchanged (same
//! metadata revision), so duplicate deliveries are harmless.
//!
//! ```text
//! pending ──link──▶ active ◀──unblock── blocked
//!    │                │ └──────block──────▶ │
//!    │                ▼                     ▼
//!    └───────────▶ burned / left ◀──────────┘
//! ```

use cinder_core::{
    DataTokenRecord, IdentityKind, Thread, ThreadStatus, ValidationError,
};

use crate::error::{EngineError, Result};
use crate::event::{ControlEvent, Origin};

fn invalid(thread: &Thread, event: &ControlEvent) -> EngineError {
    EngineError::InvalidTransition {
        from: thread.status,
        event: event.tag(),
    }
}

fn decode_wrapped(hex_key: &Option<String>) -> Result<Option<Vec<u8>>> {
    match hex_key {
        Some(h) => hex::decode(h)
            .map(Some)
            .map_err(|_| ValidationError::NonHex { field: "wrapped_key" }.into()),
        None => Ok(None),
    }
}

/// Compute the record that results from applying `event` to `thread`.
pub fn apply(thread: &Thread, event: &ControlEvent, origin: Origin) -> Result<Thread> {
    use ThreadStatus::*;

    let mut next = thread.clone();
    match event {
        ControlEvent::Leave { at } => match thread.status {
            Left => return Ok(next),
            Burned => return Err(invalid(thread, event)),
            Pending | Active | Blocked => {
                next.erase_key_material();
                next.status = Left;
                next.left_at = Some(*at);
            }
        },

        ControlEvent::Burn { at, .. } => match thread.status {
            Burned => return Ok(next),
            _ => next.mark_burned(*at),
        },

        ControlEvent::Block { reason, .. } => match thread.status {
            Blocked => return Ok(next),
            Active => {
                next.status = Blocked;
                next.blocked_reason = reason.clone();
            }
            _ => return Err(invalid(thread, event)),
        },

        ControlEvent::Unblock { .. } => match thread.status {
            Active => return Ok(next),
            Blocked => {
                next.status = Active;
                next.blocked_reason = None;
            }
            _ => return Err(invalid(thread, event)),
        },

        ControlEvent::Link {
            at,
            accepter,
            inviter,
            label,
        } => {
            let peer = match origin {
                Origin::Local => *inviter,
                Origin::Peer => *accepter,
            };
            match thread.status {
                Active if thread.peer_key == Some(peer) => return Ok(next),
                Pending => {
                    next.status = Active;
                    next.peer_key = Some(peer);
                    next.accepted_at = Some(*at);
                    if origin == Origin::Peer && label.is_some() {
                        next.peer_label = label.clone();
                    }
                }
                _ => return Err(invalid(thread, event)),
            }
        }

        ControlEvent::MintCt {
            control_token,
            content_hash,
            hint_url,
            minter,
            identity_kind,
            wrapped_key,
            ..
        } => {
            if thread.is_terminal() {
                return Err(invalid(thread, event));
            }
            match origin {
                Origin::Local => {
                    if thread.identity_kind == IdentityKind::Holder
                        && *identity_kind == IdentityKind::Guest
                    {
                        return Err(invalid(thread, event));
                    }
                    next.identity_kind = *identity_kind;
                    next.local_key = *minter;
                    if let Some(wrapped) = decode_wrapped(wrapped_key)? {
                        next.wrapped_key = Some(wrapped);
                    }
                }
                Origin::Peer => {
                    next.peer_key = Some(*minter);
                }
            }
            if thread.control_token != Some(*control_token) {
                next.data_tokens.clear();
            }
            next.control_token = Some(*control_token);
            next.content_hash = Some(*content_hash);
            next.hint_url = hint_url.clone();
        }

        ControlEvent::MintDt {
            at,
            data_token,
            control_token,
            recipient,
            permissions,
            wrapped_key,
        } => {
            if thread.is_terminal() || thread.control_token != Some(*control_token) {
                return Err(invalid(thread, event));
            }
            if !thread.data_tokens.iter().any(|dt| dt.outpoint == *data_token) {
                next.data_tokens.push(DataTokenRecord {
                    outpoint: *data_token,
                    recipient: *recipient,
                    permissions: *permissions,
                    wrapped_key: decode_wrapped(wrapped_key)?,
                    issued_at: *at,
                });
            }
            if *recipient == thread.local_key {
                next.policy.permissions = *permissions;
            }
        }

        ControlEvent::ProfileUpdate { label, .. } => {
            if thread.status == Burned {
                return Err(invalid(thread, event));
            }
            if origin == Origin::Peer {
                next.peer_label = label.clone();
            }
        }
    }

    if next != *thread {
        next.bump_metadata(event.at().max(thread.updated_at));
    }
    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cinder_core::{
        ContentHash, DataTokenPermissions, ErrorKind, Outpoint, PublicKey, ThreadId, ThreadPolicy,
        Txid,
    };

    fn key(b: u8) -> PublicKey {
        PublicKey::from_bytes([b; 32])
    }

    fn ct(b: u8) -> Outpoint {
        Outpoint::new(Txid::from_bytes([b; 32]), 0)
    }

    fn pending() -> Thread {
        Thread::new(
            ThreadId::new("t1").unwrap(),
            IdentityKind::Guest,
            key(1),
            ThreadPolicy::default(),
            100,
        )
    }

    fn minted(thread: &Thread, token: Outpoint, kind: IdentityKind, minter: PublicKey) -> Thread {
        apply(
            thread,
            &ControlEvent::MintCt {
                at: 110,
                control_token: token,
                content_hash: ContentHash::compute(b"seed"),
                hint_url: Some("mem://seed".into()),
                minter,
                identity_kind: kind,
                wrapped_key: Some(hex::encode([7u8; 92])),
            },
            Origin::Local,
        )
        .unwrap()
    }

    fn active() -> Thread {
        let t = minted(&pending(), ct(2), IdentityKind::Guest, key(1));
        apply(
            &t,
            &ControlEvent::Link {
                at: 120,
                accepter: key(9),
                inviter: key(1),
                label: None,
            },
            Origin::Peer,
        )
        .unwrap()
    }

    #[test]
    fn test_link_activates_pending() {
        let t = active();
        assert_eq!(t.status, ThreadStatus::Active);
        assert_eq!(t.peer_key, Some(key(9)));
        assert_eq!(t.accepted_at, Some(120));
        assert_eq!(t.metadata_revision, 2);
    }

    #[test]
    fn test_duplicate_event_is_noop() {
        let t = active();
        let again = apply(
            &t,
            &ControlEvent::Link {
                at: 130,
                accepter: key(9),
                inviter: key(1),
                label: None,
            },
            Origin::Peer,
        )
        .unwrap();
        assert_eq!(again, t);
    }

    #[test]
    fn test_block_unblock_cycle() {
        let t = active();
        let blocked = apply(
            &t,
            &ControlEvent::Block {
                at: 200,
                reason: Some("spam".into()),
            },
            Origin::Local,
        )
        .unwrap();
        assert_eq!(blocked.status, ThreadStatus::Blocked);
        assert_eq!(blocked.blocked_reason.as_deref(), Some("spam"));
        assert!(!blocked.can_send());

        let unblocked = apply(&blocked, &ControlEvent::Unblock { at: 210 }, Origin::Local).unwrap();
        assert_eq!(unblocked.status, ThreadStatus::Active);
        assert!(unblocked.blocked_reason.is_none());
        assert!(unblocked.metadata_revision > blocked.metadata_revision);
    }

    #[test]
    fn test_block_requires_active() {
        let err = apply(&pending(), &ControlEvent::Block { at: 1, reason: None }, Origin::Local)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidTransition);
    }

    #[test]
    fn test_burn_is_terminal_and_erases() {
        let t = active();
        assert!(t.holds_key_material());
        let burned = apply(&t, &ControlEvent::Burn { at: 300, burn_txid: None }, Origin::Peer)
            .unwrap();
        assert_eq!(burned.status, ThreadStatus::Burned);
        assert!(!burned.holds_key_material());
        assert!(burned.control_token.is_none());

        for event in [
            ControlEvent::Unblock { at: 301 },
            ControlEvent::Leave { at: 301 },
            ControlEvent::ProfileUpdate { at: 301, label: None },
        ] {
            assert!(apply(&burned, &event, Origin::Peer).is_err());
        }
        let again = apply(&burned, &ControlEvent::Burn { at: 400, burn_txid: None }, Origin::Local)
            .unwrap();
        assert_eq!(again, burned);
    }

    #[test]
    fn test_leave_keeps_token_but_erases_keys() {
        let left = apply(&active(), &ControlEvent::Leave { at: 250 }, Origin::Local).unwrap();
        assert_eq!(left.status, ThreadStatus::Left);
        assert_eq!(left.left_at, Some(250));
        assert!(left.control_token.is_some());
        assert!(!left.holds_key_material());

        let burned = apply(&left, &ControlEvent::Burn { at: 260, burn_txid: None }, Origin::Peer)
            .unwrap();
        assert_eq!(burned.status, ThreadStatus::Burned);
    }

    #[test]
    fn test_upgrade_is_one_way() {
        let t = active();
        let upgraded = minted(&t, ct(3), IdentityKind::Holder, key(5));
        assert_eq!(upgraded.identity_kind, IdentityKind::Holder);
        assert_eq!(upgraded.local_key, key(5));
        assert_eq!(upgraded.control_token, Some(ct(3)));

        let err = apply(
            &upgraded,
            &ControlEvent::MintCt {
                at: 500,
                control_token: ct(4),
                content_hash: ContentHash::compute(b"x"),
                hint_url: None,
                minter: key(1),
                identity_kind: IdentityKind::Guest,
                wrapped_key: None,
            },
            Origin::Local,
        )
        .unwrap_err();
        assert!(matches!(err, EngineError::InvalidTransition { event: "mint-ct", .. }));
    }

    #[test]
    fn test_new_control_token_clears_data_tokens() {
        let mut t = active();
        t = apply(
            &t,
            &ControlEvent::MintDt {
                at: 130,
                data_token: ct(8),
                control_token: ct(2),
                recipient: key(9),
                permissions: DataTokenPermissions::ReadWrite,
                wrapped_key: Some(hex::encode([1u8; 92])),
            },
            Origin::Local,
        )
        .unwrap();
        assert_eq!(t.data_tokens.len(), 1);

        let remint = minted(&t, ct(3), IdentityKind::Holder, key(5));
        assert!(remint.data_tokens.is_empty());
    }

    #[test]
    fn test_mint_dt_for_local_sets_permissions() {
        let t = active();
        let read_only = apply(
            &t,
            &ControlEvent::MintDt {
                at: 130,
                data_token: ct(8),
                control_token: ct(2),
                recipient: key(1),
                permissions: DataTokenPermissions::Read,
                wrapped_key: None,
            },
            Origin::Peer,
        )
        .unwrap();
        assert_eq!(read_only.policy.permissions, DataTokenPermissions::Read);
        assert!(!read_only.can_send());
    }

    #[test]
    fn test_mint_dt_for_other_token_rejected() {
        let err = apply(
            &active(),
            &ControlEvent::MintDt {
                at: 130,
                data_token: ct(8),
                control_token: ct(6),
                recipient: key(9),
                permissions: DataTokenPermissions::Read,
                wrapped_key: None,
            },
            Origin::Peer,
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidTransition);
    }

    #[test]
    fn test_profile_update_only_moves_peer_label() {
        let t = active();
        let local = apply(
            &t,
            &ControlEvent::ProfileUpdate { at: 140, label: Some("me".into()) },
            Origin::Local,
        )
        .unwrap();
        assert_eq!(local, t);

        let remote = apply(
            &t,
            &ControlEvent::ProfileUpdate { at: 140, label: Some("bob".into()) },
            Origin::Peer,
        )
        .unwrap();
        assert_eq!(remote.peer_label.as_deref(), Some("bob"));
    }

    #[test]
    fn test_bad_wrapped_key_hex_is_validation_error() {
        let err = apply(
            &pending(),
            &ControlEvent::MintCt {
                at: 1,
                control_token: ct(2),
                content_hash: ContentHash::compute(b"x"),
                hint_url: None,
                minter: key(1),
                identity_kind: IdentityKind::Guest,
                wrapped_key: Some("zz".into()),
            },
            Origin::Local,
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }
}
