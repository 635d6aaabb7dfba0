mod common;

#[cfg(test)]
mod race_tests {
    use super::common::*;
    use bigdecimal::BigDecimal;
    use std::sync::Arc;
    use uuid::Uuid;

    use studio_booking_backend::database::models::{BookingPaymentStatus, BookingStatus};
    use studio_booking_backend::database::store::BookingStore;
    use studio_booking_backend::services::booking_state::{PaymentEvidence, TransitionOutcome};
    use studio_booking_backend::services::notification::OperatorAlert;

    fn evidence(order_id: &str, payment_id: &str) -> PaymentEvidence {
        PaymentEvidence {
            order_id: Some(order_id.to_string()),
            payment_id: Some(payment_id.to_string()),
            amount: Some(100_000),
            currency: Some("INR".to_string()),
            receipt: None,
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_confirms_for_overlapping_slots_admit_one() {
        for round in 0..20 {
            let harness = Harness::new();
            let service_id = Uuid::new_v4();
            let first = harness
                .store
                .seed_pending_booking(service_id, &[window(10, 600, 720)], BigDecimal::from(1000))
                .await;
            let second = harness
                .store
                .seed_pending_booking(service_id, &[window(10, 660, 780)], BigDecimal::from(1000))
                .await;

            let machine_a = harness.state_machine.clone();
            let machine_b = harness.state_machine.clone();
            let a = tokio::spawn(async move {
                machine_a
                    .confirm(first.id, &evidence(&format!("order_a{}", round), "pay_a"))
                    .await
            });
            let b = tokio::spawn(async move {
                machine_b
                    .confirm(second.id, &evidence(&format!("order_b{}", round), "pay_b"))
                    .await
            });

            let outcomes = [
                a.await.unwrap().unwrap().outcome,
                b.await.unwrap().unwrap().outcome,
            ];
            let confirmed = outcomes
                .iter()
                .filter(|o| **o == TransitionOutcome::Confirmed)
                .count();
            let conflicted = outcomes
                .iter()
                .filter(|o| matches!(o, TransitionOutcome::CapturedConflict { .. }))
                .count();
            assert_eq!((confirmed, conflicted), (1, 1), "round {}", round);

            let mut statuses = Vec::new();
            for id in [first.id, second.id] {
                let booking = harness.store.find_booking(id).await.unwrap().unwrap();
                assert_eq!(booking.payment_status, BookingPaymentStatus::Paid);
                statuses.push(booking.status);
            }
            assert!(statuses.contains(&BookingStatus::Confirmed));
            assert!(statuses.contains(&BookingStatus::CapturedConflict));

            assert!(harness
                .notifier
                .recent()
                .iter()
                .any(|a| matches!(a, OperatorAlert::CapturedConflict { .. })));
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_adjacent_slots_both_confirm() {
        let harness = Harness::new();
        let service_id = Uuid::new_v4();
        let morning = harness
            .store
            .seed_pending_booking(service_id, &[window(11, 600, 660)], BigDecimal::from(500))
            .await;
        let next = harness
            .store
            .seed_pending_booking(service_id, &[window(11, 660, 720)], BigDecimal::from(500))
            .await;

        let machine = Arc::clone(&harness.state_machine);
        let evidence_m = evidence("order_m", "pay_m");
        let evidence_n = evidence("order_n", "pay_n");
        let (a, b) = tokio::join!(
            machine.confirm(morning.id, &evidence_m),
            machine.confirm(next.id, &evidence_n),
        );
        assert_eq!(a.unwrap().outcome, TransitionOutcome::Confirmed);
        assert_eq!(b.unwrap().outcome, TransitionOutcome::Confirmed);
    }

    #[tokio::test]
    async fn test_other_services_do_not_conflict() {
        let harness = Harness::new();
        let studio_a = harness
            .store
            .seed_pending_booking(Uuid::new_v4(), &[window(12, 600, 720)], BigDecimal::from(500))
            .await;
        let studio_b = harness
            .store
            .seed_pending_booking(Uuid::new_v4(), &[window(12, 600, 720)], BigDecimal::from(500))
            .await;

        let a = harness
            .state_machine
            .confirm(studio_a.id, &evidence("order_sa", "pay_sa"))
            .await
            .unwrap();
        let b = harness
            .state_machine
            .confirm(studio_b.id, &evidence("order_sb", "pay_sb"))
            .await
            .unwrap();
        assert_eq!(a.outcome, TransitionOutcome::Confirmed);
        assert_eq!(b.outcome, TransitionOutcome::Confirmed);
    }

    #[tokio::test]
    async fn test_blocked_slot_turns_capture_into_conflict() {
        let harness = Harness::new();
        let booking = harness
            .store
            .seed_pending_booking(Uuid::new_v4(), &[window(13, 600, 720)], BigDecimal::from(500))
            .await;
        harness
            .store
            .insert_blocked_slot(window(13, 700, 760), Some("Maintenance"))
            .await;

        let stored = harness
            .state_machine
            .confirm(booking.id, &evidence("order_blk", "pay_blk"))
            .await
            .unwrap();
        match stored.outcome {
            TransitionOutcome::CapturedConflict { reasons } => {
                assert_eq!(reasons.len(), 1);
                assert!(reasons[0].contains("Maintenance"));
            }
            other => panic!("expected captured conflict, got {:?}", other),
        }

        let again = harness
            .state_machine
            .confirm(booking.id, &evidence("order_blk", "pay_blk"))
            .await
            .unwrap();
        assert_eq!(again.outcome, TransitionOutcome::AlreadyConflicted);
        assert!(!again.written);
    }
}
