#![cfg(feature = "reconciliation")]

mod common;

use chrono::Utc;
use rust_decimal_macros::dec;
use showtime_booking::cache::SeatLockStore;
use showtime_booking::models::{Payment, PaymentStatus};
use showtime_booking::repository::PaymentLedger;
use showtime_booking::services::payment::ProviderPaymentStatus;
use showtime_booking::services::CallbackAck;

use common::{spawn_app, TestApp, SHOWING, USER};

async fn pending_checkout(app: &TestApp, session: &str, seats: &[i64]) -> Payment {
    app.state.carts.create_cart(session, SHOWING, seats).await.unwrap();
    let redirect = app.state.checkout.initiate_checkout(session, USER).await.unwrap();
    app.store
        .backdate_payment(redirect.payment_id, Utc::now() - chrono::Duration::hours(1));
    app.store.get_payment(redirect.payment_id).await.unwrap().unwrap()
}

#[tokio::test]
async fn confirmed_at_provider_is_completed() {
    let app = spawn_app();
    let payment = pending_checkout(&app, "A", &[1, 2]).await;
    app.provider
        .set_status(payment.checkout_reference.as_deref().unwrap(), ProviderPaymentStatus::Confirmed);

    let stats = app.state.reconciliation().run_once().await.unwrap();
    assert_eq!(stats.examined, 1);
    assert_eq!(stats.completed, 1);

    let payment = app.store.get_payment(payment.id).await.unwrap().unwrap();
    assert_eq!(payment.status, PaymentStatus::Completed);
    assert_eq!(app.store.reservations().len(), 1);
}

#[tokio::test]
async fn confirmed_after_hold_lapsed_is_refunded() {
    let app = spawn_app();
    let payment = pending_checkout(&app, "A", &[2]).await;
    app.locks.release_all(SHOWING, &[2]).await.unwrap();
    app.provider
        .set_status(payment.checkout_reference.as_deref().unwrap(), ProviderPaymentStatus::Confirmed);

    let stats = app.state.reconciliation().run_once().await.unwrap();
    assert_eq!(stats.refunded, 1);
    assert_eq!(app.provider.refunds(), vec![("gw-1".to_string(), dec!(65))]);
}

#[tokio::test]
async fn failed_or_abandoned_payments_are_canceled() {
    let app = spawn_app();
    let expired = pending_checkout(&app, "A", &[1]).await;
    app.provider
        .set_status(expired.checkout_reference.as_deref().unwrap(), ProviderPaymentStatus::Failed);

    // checkout так и не дошёл до провайдера
    let orphan = Payment::new_pending(USER, dec!(50), "USD");
    app.store.create_payment(&orphan).await.unwrap();
    app.store
        .backdate_payment(orphan.id, Utc::now() - chrono::Duration::hours(3));

    let stats = app.state.reconciliation().run_once().await.unwrap();
    assert_eq!(stats.examined, 2);
    assert_eq!(stats.canceled, 2);
    for id in [expired.id, orphan.id] {
        let payment = app.store.get_payment(id).await.unwrap().unwrap();
        assert_eq!(payment.status, PaymentStatus::Canceled);
    }
}

#[tokio::test]
async fn in_progress_and_fresh_payments_are_left_alone() {
    let app = spawn_app();
    let in_progress = pending_checkout(&app, "A", &[1]).await;

    app.state.carts.create_cart("B", SHOWING, &[4]).await.unwrap();
    app.state.checkout.initiate_checkout("B", USER).await.unwrap();

    let stats = app.state.reconciliation().run_once().await.unwrap();
    assert_eq!(stats.examined, 1);
    assert_eq!(stats.skipped, 1);
    let payment = app.store.get_payment(in_progress.id).await.unwrap().unwrap();
    assert_eq!(payment.status, PaymentStatus::Pending);
}

#[tokio::test]
async fn payment_without_stored_reference_waits_for_its_confirmation() {
    let app = spawn_app();
    app.state.carts.create_cart("A", SHOWING, &[1, 2]).await.unwrap();
    app.store.fail_reference_updates(true);
    assert!(app.state.checkout.initiate_checkout("A", USER).await.is_err());
    app.store.fail_reference_updates(false);

    let payment = app.store.payments().pop().unwrap();
    assert_eq!(payment.status, PaymentStatus::Pending);
    assert!(payment.checkout_reference.is_none());
    app.store
        .backdate_payment(payment.id, Utc::now() - chrono::Duration::hours(1));

    let stats = app.state.reconciliation().run_once().await.unwrap();
    assert_eq!(stats.examined, 1);
    assert_eq!(stats.skipped, 1);
    assert_eq!(stats.canceled, 0);

    // сессия у провайдера всё-таки открылась и оплачена
    let ack = app
        .state
        .checkout
        .handle_provider_callback(app.provider.last_event(ProviderPaymentStatus::Confirmed))
        .await
        .unwrap();
    assert!(matches!(ack, CallbackAck::Completed { .. }));
    assert_eq!(app.store.reservations().len(), 1);
    assert!(app.provider.refunds().is_empty());
}

#[tokio::test]
async fn confirmation_after_orphan_cancel_is_refunded() {
    let app = spawn_app();
    app.state.carts.create_cart("A", SHOWING, &[3]).await.unwrap();
    app.store.fail_reference_updates(true);
    assert!(app.state.checkout.initiate_checkout("A", USER).await.is_err());
    app.store.fail_reference_updates(false);

    let payment = app.store.payments().pop().unwrap();
    app.store
        .backdate_payment(payment.id, Utc::now() - chrono::Duration::hours(3));
    let stats = app.state.reconciliation().run_once().await.unwrap();
    assert_eq!(stats.canceled, 1);

    let ack = app
        .state
        .checkout
        .handle_provider_callback(app.provider.last_event(ProviderPaymentStatus::Confirmed))
        .await
        .unwrap();
    assert_eq!(ack, CallbackAck::Refunded);
    assert_eq!(app.provider.refunds(), vec![("gw-1".to_string(), dec!(60))]);
    assert_eq!(
        app.store.get_payment(payment.id).await.unwrap().unwrap().status,
        PaymentStatus::Refunded
    );
    assert!(app.store.reservations().is_empty());
}
