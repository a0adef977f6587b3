//! End-to-end rotation scenarios over the in-memory store, with a frozen
//! clock and a deterministic stub provider.

mod support;

use std::sync::Arc;

use chrono::Duration;
use tokio::sync::Barrier;

use medscribe_backend::repositories::session_store::SessionStore;
use medscribe_backend::services::session::SessionError;
use medscribe_backend::types::UserId;
use medscribe_backend::utils::clock::Clock;

use support::{credentials, harness, harness_at, ExchangeMode, StubProvider};

#[tokio::test]
async fn sign_in_then_rotate_replaces_the_session() {
    let h = harness();
    let issued = h.manager.sign_in(&credentials()).await.expect("sign in");
    let (old_id, wrapper) = issued.session.expect("session issued");

    h.clock.advance(Duration::seconds(1));
    let rotated = h.manager.rotate(&wrapper).await.expect("rotate");

    assert_ne!(rotated.session_id, old_id);
    assert_eq!(rotated.access_token, "access-1");
    assert!(h.store.find(old_id).await.unwrap().revoked);
    assert!(!h.store.find(rotated.session_id).await.unwrap().revoked);
}

#[tokio::test]
async fn replaying_a_rotated_wrapper_is_rejected_as_revoked() {
    let h = harness();
    let issued = h.manager.sign_in(&credentials()).await.unwrap();
    let (_, wrapper) = issued.session.unwrap();

    h.clock.advance(Duration::seconds(1));
    h.manager.rotate(&wrapper).await.expect("first rotation");

    assert!(matches!(
        h.manager.rotate(&wrapper).await,
        Err(SessionError::TokenRevoked)
    ));
}

#[tokio::test]
async fn wrapper_signed_under_a_foreign_secret_is_rejected() {
    let h = harness();
    let issued = h.manager.sign_in(&credentials()).await.unwrap();
    let (old_id, _) = issued.session.unwrap();

    let foreign = medscribe_backend::utils::wrapper::WrapperCodec::new("foreign-secret")
        .create(&UserId::new(support::USER_ID), old_id, h.clock.now(), Duration::days(30))
        .unwrap();

    assert!(matches!(
        h.manager.rotate(&foreign).await,
        Err(SessionError::InvalidSignature)
    ));
    // The session itself is untouched by the forged attempt.
    assert!(!h.store.find(old_id).await.unwrap().revoked);
}

#[tokio::test]
async fn concurrent_rotations_produce_exactly_one_winner() {
    let barrier = Arc::new(Barrier::new(2));
    let h = harness_at(
        chrono::Utc::now(),
        StubProvider::with_exchange_barrier(barrier),
    );

    let issued = h.manager.sign_in(&credentials()).await.unwrap();
    let (old_id, wrapper) = issued.session.unwrap();
    h.clock.advance(Duration::seconds(1));

    // Both calls pass verification and reach the exchange before either one
    // attempts the conditional revoke of the old session.
    let first = {
        let manager = h.manager.clone();
        let wrapper = wrapper.clone();
        tokio::spawn(async move { manager.rotate(&wrapper).await })
    };
    let second = {
        let manager = h.manager.clone();
        let wrapper = wrapper.clone();
        tokio::spawn(async move { manager.rotate(&wrapper).await })
    };

    let outcomes = [
        first.await.expect("join"),
        second.await.expect("join"),
    ];

    let winners: Vec<_> = outcomes.iter().filter(|r| r.is_ok()).collect();
    let losers: Vec<_> = outcomes.iter().filter(|r| r.is_err()).collect();
    assert_eq!(winners.len(), 1, "exactly one rotation must succeed");
    assert_eq!(losers.len(), 1);
    assert!(matches!(
        losers[0],
        Err(SessionError::RotationConflict)
    ));

    // No two sessions derived from the old one remain simultaneously active.
    let active = h
        .store
        .list_active_for_user(&UserId::new(support::USER_ID), h.clock.now())
        .await
        .unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(
        active[0].id,
        winners[0].as_ref().unwrap().session_id
    );
    assert!(h.store.find(old_id).await.unwrap().revoked);
}

#[tokio::test]
async fn absolute_expiry_rejects_without_flipping_revoked() {
    let h = harness();
    let issued = h.manager.sign_in(&credentials()).await.unwrap();
    let (old_id, wrapper) = issued.session.unwrap();

    // Keep the sliding window satisfied while the absolute expiry passes.
    for _ in 0..6 {
        h.clock.advance(Duration::days(5));
        if h.clock.now() < h.store.find(old_id).await.unwrap().expires_at {
            h.store.touch(old_id, h.clock.now()).await.unwrap();
        }
    }
    assert!(h.clock.now() >= h.store.find(old_id).await.unwrap().expires_at);

    assert!(matches!(
        h.manager.rotate(&wrapper).await,
        Err(SessionError::AbsoluteExpiry)
    ));
    // Already inert by clock alone: no write was needed.
    assert!(!h.store.find(old_id).await.unwrap().revoked);
}

#[tokio::test]
async fn inactivity_rejects_and_revokes_as_a_side_effect() {
    let h = harness();
    let issued = h.manager.sign_in(&credentials()).await.unwrap();
    let (old_id, wrapper) = issued.session.unwrap();

    h.clock.advance(Duration::days(8));
    assert!(matches!(
        h.manager.rotate(&wrapper).await,
        Err(SessionError::SessionInactive)
    ));
    assert!(h.store.find(old_id).await.unwrap().revoked);

    // The side-effect revocation is observable on the next attempt.
    assert!(matches!(
        h.manager.rotate(&wrapper).await,
        Err(SessionError::TokenRevoked)
    ));
}

#[tokio::test]
async fn unavailable_exchange_is_retryable_with_the_same_wrapper() {
    let h = harness();
    let issued = h.manager.sign_in(&credentials()).await.unwrap();
    let (old_id, wrapper) = issued.session.unwrap();

    h.clock.advance(Duration::hours(1));
    h.provider.set_exchange_mode(ExchangeMode::Unavailable);
    assert!(matches!(
        h.manager.rotate(&wrapper).await,
        Err(SessionError::ExchangeUnavailable)
    ));
    assert!(!h.store.find(old_id).await.unwrap().revoked);

    h.provider.set_exchange_mode(ExchangeMode::Succeed);
    let rotated = h.manager.rotate(&wrapper).await.expect("retry succeeds");
    assert!(h.store.find(old_id).await.unwrap().revoked);
    assert!(!h.store.find(rotated.session_id).await.unwrap().revoked);
}

#[tokio::test]
async fn rejected_exchange_revokes_the_session() {
    let h = harness();
    let issued = h.manager.sign_in(&credentials()).await.unwrap();
    let (old_id, wrapper) = issued.session.unwrap();

    h.provider.set_exchange_mode(ExchangeMode::Rejected);
    assert!(matches!(
        h.manager.rotate(&wrapper).await,
        Err(SessionError::ExchangeRejected)
    ));
    assert!(h.store.find(old_id).await.unwrap().revoked);
}

#[tokio::test]
async fn check_active_probes_without_consuming_the_session() {
    let h = harness();
    let issued = h.manager.sign_in(&credentials()).await.unwrap();
    let (_, wrapper) = issued.session.unwrap();

    assert!(h.manager.check_active(&wrapper).await);
    assert!(h.manager.check_active(&wrapper).await);
    assert_eq!(h.provider.exchanges_performed(), 0);

    // The probe leaves the session rotatable.
    h.manager.rotate(&wrapper).await.expect("rotate after probes");
}

#[tokio::test]
async fn check_active_reports_false_after_sign_out() {
    let h = harness();
    let issued = h.manager.sign_in(&credentials()).await.unwrap();
    let (_, wrapper) = issued.session.unwrap();

    h.manager.sign_out(&wrapper).await.unwrap();
    assert!(!h.manager.check_active(&wrapper).await);
}

#[tokio::test]
async fn sign_out_all_revokes_every_session_for_the_user() {
    let h = harness();
    let first = h.manager.sign_in(&credentials()).await.unwrap();
    let second = h.manager.sign_in(&credentials()).await.unwrap();
    let (first_id, first_wrapper) = first.session.unwrap();
    let (second_id, _) = second.session.unwrap();

    h.manager.sign_out_all(&first_wrapper).await.unwrap();

    assert!(h.store.find(first_id).await.unwrap().revoked);
    assert!(h.store.find(second_id).await.unwrap().revoked);
}

#[tokio::test]
async fn revoke_is_idempotent() {
    let h = harness();
    let issued = h.manager.sign_in(&credentials()).await.unwrap();
    let (old_id, _) = issued.session.unwrap();

    h.manager.revoke(old_id).await.unwrap();
    h.manager.revoke(old_id).await.unwrap();
    assert!(h.store.find(old_id).await.unwrap().revoked);
}
