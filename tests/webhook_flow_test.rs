mod common;

#[cfg(test)]
mod webhook_flow_tests {
    use super::common::*;
    use bigdecimal::BigDecimal;
    use futures::future::join_all;
    use uuid::Uuid;

    use studio_booking_backend::database::models::{
        BookingPaymentStatus, BookingStatus, LedgerStatus, PaymentStatus,
    };
    use studio_booking_backend::database::store::BookingStore;
    use studio_booking_backend::services::booking_state::TransitionOutcome;
    use studio_booking_backend::services::notification::OperatorAlert;
    use studio_booking_backend::services::webhook_processor::{
        Acceptance, ProcessOutcome, WebhookProcessorError,
    };

    async fn pending_booking(harness: &Harness) -> Uuid {
        harness
            .store
            .seed_pending_booking(Uuid::new_v4(), &[window(3, 600, 720)], BigDecimal::from(1000))
            .await
            .id
    }

    async fn deliver(harness: &Harness, body: &[u8], event_id: Option<&str>) -> Option<ProcessOutcome> {
        let signature = sign(body);
        match harness
            .processor
            .accept(body, Some(&signature), event_id)
            .await
            .unwrap()
        {
            Acceptance::Queued(job) => {
                harness.processor.mark_processing(&job).await.unwrap();
                Some(harness.processor.process(&job).await.unwrap())
            }
            Acceptance::Duplicate | Acceptance::Ignored(_) => None,
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_replayed_capture_confirms_exactly_once() {
        let harness = Harness::new();
        let booking_id = pending_booking(&harness).await;
        let body = captured_event("order_replay", "pay_replay", Some(booking_id));
        let signature = sign(&body);

        let deliveries = (0..10).map(|_| {
            let processor = harness.processor.clone();
            let body = body.clone();
            let signature = signature.clone();
            tokio::spawn(async move {
                processor
                    .accept(&body, Some(&signature), Some("evt_replay_1"))
                    .await
                    .unwrap()
            })
        });
        let acceptances: Vec<Acceptance> = join_all(deliveries)
            .await
            .into_iter()
            .map(|r| r.unwrap())
            .collect();

        let jobs: Vec<_> = acceptances
            .into_iter()
            .filter_map(|a| match a {
                Acceptance::Queued(job) => Some(job),
                _ => None,
            })
            .collect();
        assert_eq!(jobs.len(), 1);

        let outcome = harness.processor.process(&jobs[0]).await.unwrap();
        assert_eq!(outcome, ProcessOutcome::Applied(TransitionOutcome::Confirmed));

        let booking = harness.store.find_booking(booking_id).await.unwrap().unwrap();
        assert_eq!(booking.status, BookingStatus::Confirmed);
        assert_eq!(booking.payment_status, BookingPaymentStatus::Paid);

        let payments = harness.store.payments_for_booking(booking_id).await;
        assert_eq!(payments.len(), 1);
        assert_eq!(payments[0].status, PaymentStatus::Captured);
        assert_eq!(harness.store.ledger_records().await.len(), 1);
    }

    #[tokio::test]
    async fn test_capture_without_event_id_is_deduplicated_by_payment() {
        let harness = Harness::new();
        let booking_id = pending_booking(&harness).await;
        let body = captured_event("order_noid", "pay_noid", Some(booking_id));

        assert!(deliver(&harness, &body, None).await.is_some());
        assert!(deliver(&harness, &body, None).await.is_none());

        let records = harness.store.ledger_records().await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].idempotency_key, "pay_noid:captured");
    }

    #[tokio::test]
    async fn test_tampered_body_is_rejected_without_mutation() {
        let harness = Harness::new();
        let booking_id = pending_booking(&harness).await;
        let body = captured_event("order_tamper", "pay_tamper", Some(booking_id));
        let signature = sign(&body);

        let mut tampered = body.clone();
        let position = tampered.iter().position(|b| *b == b'1').unwrap();
        tampered[position] = b'9';

        let err = harness
            .processor
            .accept(&tampered, Some(&signature), Some("evt_tamper"))
            .await
            .unwrap_err();
        assert!(matches!(err, WebhookProcessorError::InvalidSignature(_)));

        let missing = harness
            .processor
            .accept(&body, None, Some("evt_tamper"))
            .await
            .unwrap_err();
        assert!(matches!(missing, WebhookProcessorError::InvalidSignature(_)));

        assert!(harness.store.ledger_records().await.is_empty());
        let booking = harness.store.find_booking(booking_id).await.unwrap().unwrap();
        assert_eq!(booking.status, BookingStatus::Pending);
        assert!(harness.store.payments_for_booking(booking_id).await.is_empty());
    }

    #[tokio::test]
    async fn test_late_failure_never_downgrades_a_paid_booking() {
        let harness = Harness::new();
        let booking_id = pending_booking(&harness).await;

        let captured = captured_event("order_order", "pay_a", Some(booking_id));
        deliver(&harness, &captured, Some("evt_cap")).await.unwrap();

        let failed = failed_event("order_order", "pay_b", Some(booking_id));
        let outcome = deliver(&harness, &failed, Some("evt_fail")).await.unwrap();
        assert!(matches!(
            outcome,
            ProcessOutcome::Applied(TransitionOutcome::Stale { .. })
        ));

        let booking = harness.store.find_booking(booking_id).await.unwrap().unwrap();
        assert_eq!(booking.status, BookingStatus::Confirmed);
        assert_eq!(booking.payment_status, BookingPaymentStatus::Paid);
    }

    #[tokio::test]
    async fn test_failure_then_capture_still_confirms() {
        let harness = Harness::new();
        let booking_id = pending_booking(&harness).await;

        let failed = failed_event("order_retry", "pay_first", Some(booking_id));
        let outcome = deliver(&harness, &failed, Some("evt_f1")).await.unwrap();
        assert_eq!(outcome, ProcessOutcome::Applied(TransitionOutcome::PaymentFailed));

        let captured = captured_event("order_retry", "pay_second", Some(booking_id));
        let outcome = deliver(&harness, &captured, Some("evt_c1")).await.unwrap();
        assert_eq!(outcome, ProcessOutcome::Applied(TransitionOutcome::Confirmed));
    }

    #[tokio::test]
    async fn test_unresolvable_event_is_recorded_and_alerted() {
        let harness = Harness::new();
        let body = captured_event("order_orphan", "pay_orphan", None);

        let outcome = deliver(&harness, &body, Some("evt_orphan")).await.unwrap();
        assert!(matches!(outcome, ProcessOutcome::Unresolved(_)));

        let records = harness.store.ledger_records().await;
        assert_eq!(records[0].status, LedgerStatus::Unresolved);
        assert!(records[0].last_error.is_some());
        assert!(harness
            .notifier
            .recent()
            .iter()
            .any(|a| matches!(a, OperatorAlert::UnresolvableEvent { .. })));
    }

    #[tokio::test]
    async fn test_capture_on_cancelled_booking_is_recorded_but_not_reopened() {
        let harness = Harness::new();
        let booking_id = pending_booking(&harness).await;
        let mut booking = harness.store.find_booking(booking_id).await.unwrap().unwrap();
        booking.status = BookingStatus::Cancelled;
        harness.store.insert_booking(booking, &[window(3, 600, 720)]).await;

        let body = captured_event("order_cancelled", "pay_cancelled", Some(booking_id));
        let outcome = deliver(&harness, &body, Some("evt_cancelled")).await.unwrap();
        assert_eq!(
            outcome,
            ProcessOutcome::Applied(TransitionOutcome::PaidWhileCancelled)
        );

        let booking = harness.store.find_booking(booking_id).await.unwrap().unwrap();
        assert_eq!(booking.status, BookingStatus::Cancelled);
        assert_eq!(booking.payment_status, BookingPaymentStatus::Paid);
        assert!(harness
            .notifier
            .recent()
            .iter()
            .any(|a| matches!(a, OperatorAlert::PaidWhileCancelled { .. })));
    }
}
