//! End-to-end thread lifecycles across several parties and devices.

use std::sync::Arc;

use cinder::relay::HelperCache;
use cinder::store::ThreadStore;
use cinder::tokens::{ContentKey, EncryptedContent};
use cinder::{
    DataTokenPermissions, ErrorKind, EventChannel, Frame, Invite, MessageId, SealedMessage,
    SubscriptionManager, ThreadId, ThreadPolicy, ThreadStatus,
};
use cinder_core::{IdentityKind, ValidationError};
use cinder_testkit::{wait_until, FlakyThreadStore, Party, TestNet};

/// Create a thread on `inviter`, invite `invitee`, and wait until both sides
/// are active.
async fn linked(inviter: &Party, invitee: &Party) -> (ThreadId, Invite) {
    linked_with(inviter, invitee, DataTokenPermissions::ReadWrite).await
}

async fn linked_with(
    inviter: &Party,
    invitee: &Party,
    permissions: DataTokenPermissions,
) -> (ThreadId, Invite) {
    let thread = inviter
        .engine
        .create_thread(ThreadPolicy::default())
        .await
        .unwrap();
    assert_eq!(thread.status, ThreadStatus::Pending);

    let invite = inviter
        .engine
        .issue_data_tokens(&thread.thread_id, &[invitee.key()], permissions)
        .await
        .unwrap()
        .remove(0);
    let accepted = invitee.engine.accept_invite(&invite).await.unwrap();
    assert_eq!(accepted.status, ThreadStatus::Active);
    assert_eq!(accepted.peer_key, Some(inviter.key()));

    inviter
        .wait_for_thread(&thread.thread_id, |t| t.status == ThreadStatus::Active)
        .await
        .expect("inviter should see the link");
    (thread.thread_id, invite)
}

async fn store_is_empty(party: &Party) -> bool {
    let store = Arc::clone(&party.store);
    wait_until(move || {
        let store = Arc::clone(&store);
        async move { store.message_count() == 0 }
    })
    .await
}

#[tokio::test]
async fn test_invite_and_exchange_messages() {
    let net = TestNet::new();
    let alice = net.holder().await;
    let bob = net.holder().await;
    let (id, _) = linked(&alice, &bob).await;

    let alice_view = alice.engine.thread(&id).await.unwrap();
    assert_eq!(alice_view.peer_key, Some(bob.key()));
    assert_eq!(alice_view.data_tokens.len(), 1);

    bob.engine.send_message(&id, "hi alice").await.unwrap();
    let received = alice.wait_for_messages(&id, 1).await;
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].text, "hi alice");
    assert_eq!(received[0].message.author, bob.key());

    alice.engine.send_message(&id, "hi bob").await.unwrap();
    let at_bob = bob.wait_for_messages(&id, 2).await;
    let texts: Vec<_> = at_bob.iter().map(|m| m.text.as_str()).collect();
    assert_eq!(texts, vec!["hi alice", "hi bob"]);

    let conversations = alice.engine.conversations().await;
    assert_eq!(conversations.len(), 1);
    assert!(conversations[0].can_send);
}

#[tokio::test]
async fn test_empty_message_rejected() {
    let net = TestNet::new();
    let alice = net.holder().await;
    let bob = net.holder().await;
    let (id, _) = linked(&alice, &bob).await;

    let err = alice.engine.send_message(&id, "").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
}

#[tokio::test]
async fn test_pending_thread_cannot_send() {
    let net = TestNet::new();
    let alice = net.holder().await;
    let thread = alice
        .engine
        .create_thread(ThreadPolicy::default())
        .await
        .unwrap();

    let err = alice
        .engine
        .send_message(&thread.thread_id, "anyone?")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AccessDenied);
}

#[tokio::test]
async fn test_read_only_invite_cannot_send() {
    let net = TestNet::new();
    let alice = net.holder().await;
    let bob = net.holder().await;
    let (id, _) = linked_with(&alice, &bob, DataTokenPermissions::Read).await;

    let err = bob.engine.send_message(&id, "let me in").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AccessDenied);
    assert!(alice.engine.send_message(&id, "broadcast").await.is_ok());
}

#[tokio::test]
async fn test_burn_revokes_everyone() {
    let net = TestNet::new();
    let alice = net.holder().await;
    let bob = net.holder().await;
    let (id, invite) = linked(&alice, &bob).await;

    bob.engine.send_message(&id, "before the fire").await.unwrap();
    alice.wait_for_messages(&id, 1).await;
    alice.engine.settle().await;
    bob.engine.settle().await;

    let cache_id = HelperCache::cache_id(&invite.control_token);
    assert!(net.cache.contains(&cache_id).await);

    let receipt = alice.engine.burn_thread(&id).await.unwrap();
    assert_eq!(receipt.control_token, invite.control_token);

    let burned = alice.engine.thread(&id).await.unwrap();
    assert_eq!(burned.status, ThreadStatus::Burned);
    assert!(burned.control_token.is_none());
    assert!(!burned.holds_key_material());
    assert!(!net.cache.contains(&cache_id).await);
    assert!(!net.cache.contains(&HelperCache::messages_key(&cache_id)).await);
    assert!(store_is_empty(&alice).await);

    let at_bob = bob
        .wait_for_thread(&id, |t| t.status == ThreadStatus::Burned)
        .await
        .expect("peer should see the burn");
    assert!(!at_bob.holds_key_material());
    assert!(store_is_empty(&bob).await);

    // The invite is dead for any device.
    let bob_phone = net.device_of(&bob).await;
    let err = bob_phone.engine.accept_invite(&invite).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TokenBurned);

    let err = alice.engine.send_message(&id, "hello?").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AccessDenied);
    let err = alice.engine.burn_thread(&id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidTransition);
}

#[tokio::test]
async fn test_burn_right_after_create_leaves_no_enrollment() {
    let net = TestNet::new();
    let alice = net.holder().await;
    let thread = alice
        .engine
        .create_thread(ThreadPolicy::default())
        .await
        .unwrap();
    let ct = thread.control_token.unwrap();

    // No settle: the enrollment may still be queued.
    alice.engine.burn_thread(&thread.thread_id).await.unwrap();
    alice.engine.settle().await;

    assert!(!net.cache.contains(&HelperCache::cache_id(&ct)).await);
}

#[tokio::test]
async fn test_burn_drops_queued_relay_writes() {
    let net = TestNet::new();
    let alice = net.holder().await;
    let bob = net.holder().await;
    let (id, invite) = linked(&alice, &bob).await;
    let cache_id = HelperCache::cache_id(&invite.control_token);

    for i in 0..8 {
        alice.engine.send_message(&id, &format!("last words {i}")).await.unwrap();
        bob.engine.send_message(&id, &format!("reply {i}")).await.unwrap();
    }
    alice.engine.burn_thread(&id).await.unwrap();
    bob.wait_for_thread(&id, |t| t.status == ThreadStatus::Burned)
        .await
        .expect("peer should see the burn");
    alice.engine.settle().await;
    bob.engine.settle().await;

    assert!(!net.cache.contains(&cache_id).await);
    assert!(!net.cache.contains(&HelperCache::messages_key(&cache_id)).await);
}

#[tokio::test]
async fn test_only_owner_can_burn() {
    let net = TestNet::new();
    let alice = net.holder().await;
    let bob = net.holder().await;
    let (id, _) = linked(&alice, &bob).await;

    let err = bob.engine.burn_thread(&id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AccessDenied);
    assert_eq!(
        bob.engine.thread(&id).await.unwrap().status,
        ThreadStatus::Active
    );
}

#[tokio::test]
async fn test_send_after_remote_burn_tears_down() {
    let net = TestNet::new();
    let alice = net.holder().await;
    let bob = net.holder().await;
    let (id, _) = linked(&alice, &bob).await;

    // Bob misses the live burn event.
    net.hub.set_offline(true);
    alice.engine.burn_thread(&id).await.unwrap();
    net.hub.set_offline(false);

    assert_eq!(
        bob.engine.thread(&id).await.unwrap().status,
        ThreadStatus::Active
    );
    let err = bob.engine.send_message(&id, "still there?").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TokenBurned);
    assert_eq!(
        bob.engine.thread(&id).await.unwrap().status,
        ThreadStatus::Burned
    );
}

#[tokio::test]
async fn test_leave_then_burn() {
    let net = TestNet::new();
    let alice = net.holder().await;
    let bob = net.holder().await;
    let (id, _) = linked(&alice, &bob).await;

    let left = bob.engine.leave_thread(&id).await.unwrap();
    assert_eq!(left.status, ThreadStatus::Left);
    assert!(left.left_at.is_some());

    alice
        .wait_for_thread(&id, |t| t.status == ThreadStatus::Left)
        .await
        .expect("inviter should see the leave");
    assert!(store_is_empty(&alice).await);

    // Leaving never spends the control token.
    alice.engine.burn_thread(&id).await.unwrap();
    assert_eq!(
        alice.engine.thread(&id).await.unwrap().status,
        ThreadStatus::Burned
    );

    let again = bob.engine.leave_thread(&id).await.unwrap();
    assert_eq!(again.metadata_revision, left.metadata_revision);
}

#[tokio::test]
async fn test_block_and_unblock() {
    let net = TestNet::new();
    let alice = net.holder().await;
    let bob = net.holder().await;
    let (id, _) = linked(&alice, &bob).await;

    let blocked = alice
        .engine
        .block_thread(&id, Some("spam".into()))
        .await
        .unwrap();
    assert_eq!(blocked.status, ThreadStatus::Blocked);
    assert_eq!(blocked.blocked_reason.as_deref(), Some("spam"));
    bob.wait_for_thread(&id, |t| t.status == ThreadStatus::Blocked)
        .await
        .expect("peer should see the block");

    let err = alice.engine.send_message(&id, "muted").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AccessDenied);
    let err = bob.engine.send_message(&id, "muted").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AccessDenied);

    let unblocked = alice.engine.unblock_thread(&id).await.unwrap();
    assert_eq!(unblocked.status, ThreadStatus::Active);
    assert!(unblocked.blocked_reason.is_none());
    bob.wait_for_thread(&id, |t| t.status == ThreadStatus::Active)
        .await
        .expect("peer should see the unblock");

    bob.engine.send_message(&id, "back again").await.unwrap();
    assert_eq!(alice.wait_for_messages(&id, 1).await.len(), 1);
}

#[tokio::test]
async fn test_block_inviter_removes_their_threads() {
    let net = TestNet::new();
    let alice = net.holder().await;
    let bob = net.holder().await;
    let carol = net.holder().await;
    let (from_alice, invite) = linked(&alice, &bob).await;
    let (from_carol, _) = linked(&carol, &bob).await;

    let removed = bob
        .engine
        .block_inviter(&invite.inviter_id, Some("unwanted".into()))
        .await
        .unwrap();
    assert_eq!(removed, 1);
    assert!(bob.engine.thread(&from_alice).await.is_none());
    assert!(bob.engine.thread(&from_carol).await.is_some());
    assert!(bob.store.get_thread(&from_alice).await.unwrap().is_none());
    assert_eq!(bob.engine.conversations().await.len(), 1);
    assert_eq!(bob.engine.blocked_inviters().await.len(), 1);

    let second = alice
        .engine
        .create_thread(ThreadPolicy::default())
        .await
        .unwrap();
    let invite = alice
        .engine
        .issue_data_tokens(&second.thread_id, &[bob.key()], DataTokenPermissions::ReadWrite)
        .await
        .unwrap()
        .remove(0);
    let err = bob.engine.accept_invite(&invite).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AccessDenied);

    assert!(bob.engine.unblock_inviter(&invite.inviter_id).await.unwrap());
    assert!(!bob.engine.unblock_inviter(&invite.inviter_id).await.unwrap());
    bob.engine.accept_invite(&invite).await.unwrap();
}

#[tokio::test]
async fn test_upgrade_guest_to_holder() {
    let net = TestNet::new();
    let gina = net.guest().await;
    let bob = net.holder().await;
    let (id, old_invite) = linked(&gina, &bob).await;
    let holder_key = gina.holder_key().unwrap();

    let upgraded = gina.engine.upgrade_identity(&id).await.unwrap();
    assert_eq!(upgraded.identity_kind, IdentityKind::Holder);
    assert_eq!(upgraded.local_key, holder_key);
    assert_eq!(upgraded.status, ThreadStatus::Active);
    let new_ct = upgraded.control_token.unwrap();
    assert_ne!(new_ct, old_invite.control_token);
    assert_eq!(upgraded.data_tokens.len(), 1);
    assert_eq!(upgraded.data_tokens[0].recipient, bob.key());

    bob.wait_for_thread(&id, |t| {
        t.control_token == Some(new_ct)
            && t.peer_key == Some(holder_key)
            && t.data_tokens.iter().any(|dt| dt.recipient == bob.key())
    })
    .await
    .expect("peer should follow the new control token");

    // The superseded token is spent.
    let bob_phone = net.device_of(&bob).await;
    let err = bob_phone.engine.accept_invite(&old_invite).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TokenBurned);

    bob.engine.send_message(&id, "congrats").await.unwrap();
    let at_gina = gina.wait_for_messages(&id, 1).await;
    assert_eq!(at_gina[0].text, "congrats");

    let err = gina.engine.upgrade_identity(&id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidTransition);
}

#[tokio::test]
async fn test_upgrade_requires_holder_identity() {
    let net = TestNet::new();
    let alice = net.holder().await;
    let thread = alice
        .engine
        .create_thread(ThreadPolicy::default())
        .await
        .unwrap();

    let err = alice
        .engine
        .upgrade_identity(&thread.thread_id)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AccessDenied);
}

#[tokio::test]
async fn test_offline_peer_imports_pending() {
    let net = TestNet::new();
    let alice = net.holder().await;
    let bob = net.holder().await;
    let (id, _) = linked(&alice, &bob).await;

    net.hub.set_offline(true);
    alice
        .engine
        .send_message(&id, "while you were away")
        .await
        .unwrap();
    alice.engine.settle().await;
    net.hub.set_offline(false);

    assert!(bob.engine.read_messages(&id).await.unwrap().is_empty());
    assert_eq!(bob.engine.import_pending(&id).await.unwrap(), 1);
    let messages = bob.engine.read_messages(&id).await.unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].text, "while you were away");

    // The list was cleared after the import.
    assert_eq!(bob.engine.import_pending(&id).await.unwrap(), 0);
}

#[tokio::test]
async fn test_profile_update_reaches_peers() {
    let net = TestNet::new();
    let alice = net.holder().await;
    let bob = net.holder().await;
    let (id, _) = linked(&alice, &bob).await;

    let sent = alice
        .engine
        .update_profile(Some("Alice".into()))
        .await
        .unwrap();
    assert_eq!(sent, 1);

    let at_bob = bob
        .wait_for_thread(&id, |t| t.peer_label.as_deref() == Some("Alice"))
        .await
        .expect("peer should see the new label");
    assert_eq!(at_bob.status, ThreadStatus::Active);
    assert!(alice.engine.thread(&id).await.unwrap().peer_label.is_none());
}

#[tokio::test]
async fn test_unknown_control_tag_is_ignored() {
    let net = TestNet::new();
    let alice = net.holder().await;
    let bob = net.holder().await;
    let (id, _) = linked(&alice, &bob).await;

    let raw = format!(
        r#"{{"kind":"control","thread_id":"{}","from":"{}","event":{{"type":"self-destruct","at":1}}}}"#,
        id,
        alice.key().to_hex()
    );
    let err = Frame::decode(raw.as_bytes()).unwrap_err();
    assert!(matches!(err, ValidationError::UnknownEvent(_)));

    let intruder = net.hub.connect();
    intruder
        .publish(&SubscriptionManager::topic(&id), raw.into_bytes())
        .await
        .unwrap();

    alice
        .engine
        .update_profile(Some("after".into()))
        .await
        .unwrap();
    let at_bob = bob
        .wait_for_thread(&id, |t| t.peer_label.as_deref() == Some("after"))
        .await
        .expect("valid frames still flow");
    assert_eq!(at_bob.status, ThreadStatus::Active);
}

#[tokio::test]
async fn test_tampered_message_rejected() {
    let net = TestNet::new();
    let alice = net.holder().await;
    let bob = net.holder().await;
    let (id, _) = linked(&alice, &bob).await;

    let forged = EncryptedContent::seal(b"forged", &ContentKey::generate())
        .unwrap()
        .to_bytes()
        .unwrap();
    let err = alice
        .engine
        .receive_message(&SealedMessage {
            thread_id: id.clone(),
            id: MessageId::new("forged-1").unwrap(),
            author: bob.key(),
            sealed: forged,
            timestamp: 1,
        })
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Decryption);
    assert!(alice.engine.read_messages(&id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_second_device_reconciles() {
    let net = TestNet::new();
    let phone = net.holder().await;
    let laptop = net.device_of(&phone).await;
    let bob = net.holder().await;
    let (id, _) = linked(&phone, &bob).await;

    bob.engine.send_message(&id, "to all your devices").await.unwrap();
    phone.wait_for_messages(&id, 1).await;

    phone.engine.reconcile_now().await.unwrap();
    let (pulled, _) = laptop.engine.reconcile_now().await.unwrap();
    assert_eq!(pulled.threads_discovered, 1);

    let on_laptop = laptop.engine.thread(&id).await.unwrap();
    assert_eq!(on_laptop.status, ThreadStatus::Active);
    assert_eq!(on_laptop.metadata_revision, 3);
    assert_eq!(on_laptop.peer_key, Some(bob.key()));

    let messages = laptop.engine.read_messages(&id).await.unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].text, "to all your devices");

    phone.engine.burn_thread(&id).await.unwrap();
    phone.engine.reconcile_now().await.unwrap();
    laptop.engine.reconcile_now().await.unwrap();

    let on_laptop = laptop.engine.thread(&id).await.unwrap();
    assert_eq!(on_laptop.status, ThreadStatus::Burned);
    assert!(store_is_empty(&laptop).await);
}

#[tokio::test]
async fn test_persistence_failure_keeps_thread_in_memory() {
    let net = TestNet::new();
    let flaky = FlakyThreadStore::new();
    let alice = net.party().with_thread_store(flaky.clone()).start().await;

    flaky.set_failing(true);
    let thread = alice
        .engine
        .create_thread(ThreadPolicy::default())
        .await
        .unwrap();
    assert!(flaky.list_threads().await.unwrap().is_empty());
    assert!(alice.engine.thread(&thread.thread_id).await.is_some());

    flaky.set_failing(false);
    alice.engine.reconcile_now().await.unwrap();
    let stored = flaky.list_threads().await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].thread_id, thread.thread_id);
}

#[tokio::test]
async fn test_restart_restores_threads() {
    let net = TestNet::new();
    let store = FlakyThreadStore::new();
    let seed = [7u8; 32];

    let first = net
        .party()
        .with_seed(seed)
        .with_thread_store(store.clone())
        .start()
        .await;
    let thread = first
        .engine
        .create_thread(ThreadPolicy::default())
        .await
        .unwrap();
    first.engine.shutdown().await;

    let second = net
        .party()
        .with_seed(seed)
        .with_thread_store(store.clone())
        .start()
        .await;
    let restored = second.engine.thread(&thread.thread_id).await.unwrap();
    assert_eq!(restored, thread);
    assert_eq!(second.engine.conversations().await.len(), 1);
}
