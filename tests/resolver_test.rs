mod common;

#[cfg(test)]
mod resolver_tests {
    use super::common::*;
    use bigdecimal::BigDecimal;
    use futures::future::join_all;
    use std::sync::atomic::Ordering;
    use std::sync::Arc;
    use uuid::Uuid;

    use studio_booking_backend::database::models::{NewPayment, PaymentStatus};
    use studio_booking_backend::payments::types::{EventDetails, GatewayEvent};
    use studio_booking_backend::services::order_resolver::{
        OrderResolver, ResolutionPath, ResolveError,
    };

    fn details(order_id: &str) -> EventDetails {
        EventDetails {
            event: GatewayEvent::PaymentCaptured,
            order_id: Some(order_id.to_string()),
            payment_id: Some("pay_lookup".to_string()),
            amount: Some(100_000),
            currency: Some("INR".to_string()),
            receipt: None,
            booking_hint: None,
            refund_partial: false,
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_recovery_creates_one_payment_row() {
        let seed = Harness::new();
        let booking = seed
            .store
            .seed_pending_booking(Uuid::new_v4(), &[window(5, 600, 660)], BigDecimal::from(1000))
            .await;
        let gateway = Arc::new(StubGateway::default().with_order("order_lost", booking.id));
        let resolver = Arc::new(OrderResolver::new(seed.store.clone(), gateway.clone()));

        let attempts = (0..8).map(|_| {
            let resolver = resolver.clone();
            tokio::spawn(async move { resolver.resolve(&details("order_lost")).await })
        });
        let results: Vec<_> = join_all(attempts)
            .await
            .into_iter()
            .map(|r| r.unwrap().unwrap())
            .collect();

        assert!(results.iter().all(|r| r.booking_id == booking.id));
        let payments = seed.store.payments_for_booking(booking.id).await;
        assert_eq!(payments.len(), 1);
        assert_eq!(payments[0].gateway_order_id, "order_lost");
        assert!(gateway.lookups.load(Ordering::SeqCst) >= 1);

        let local = resolver.resolve(&details("order_lost")).await.unwrap();
        assert_eq!(local.path, ResolutionPath::LocalOrder);
    }

    #[tokio::test]
    async fn test_order_without_booking_reference_is_unresolvable() {
        let harness = Harness::new();
        let mut gateway = StubGateway::default().with_order("order_bare", Uuid::new_v4());
        if let Some(order) = gateway.orders.get_mut("order_bare") {
            order.notes = serde_json::json!({});
            order.receipt = Some("walk-in".to_string());
        }
        let resolver = OrderResolver::new(harness.store.clone(), Arc::new(gateway));

        let err = resolver.resolve(&details("order_bare")).await.unwrap_err();
        assert!(matches!(err, ResolveError::Unresolvable(_)));
    }

    #[tokio::test]
    async fn test_second_order_for_captured_booking_is_refused() {
        let harness = Harness::new();
        let booking = harness
            .store
            .seed_pending_booking(Uuid::new_v4(), &[window(6, 600, 660)], BigDecimal::from(1000))
            .await;
        harness
            .store
            .insert_payment(&NewPayment {
                booking_id: booking.id,
                gateway_order_id: "order_original".to_string(),
                gateway_payment_id: Some("pay_original".to_string()),
                amount: 100_000,
                currency: "INR".to_string(),
                receipt: None,
                status: PaymentStatus::Captured,
            })
            .await
            .unwrap();

        let gateway = StubGateway::default().with_order("order_second", booking.id);
        let resolver = OrderResolver::new(harness.store.clone(), Arc::new(gateway));

        let err = resolver.resolve(&details("order_second")).await.unwrap_err();
        assert!(matches!(err, ResolveError::Unresolvable(_)));
        let payments = harness.store.payments_for_booking(booking.id).await;
        assert_eq!(payments.len(), 1);
        assert_eq!(payments[0].gateway_order_id, "order_original");
    }

    #[tokio::test]
    async fn test_receipt_is_enough_to_recover_the_booking() {
        let harness = Harness::new();
        let booking = harness
            .store
            .seed_pending_booking(Uuid::new_v4(), &[window(7, 600, 660)], BigDecimal::from(1000))
            .await;
        let mut gateway = StubGateway::default().with_order("order_receipt", booking.id);
        if let Some(order) = gateway.orders.get_mut("order_receipt") {
            order.notes = serde_json::json!({});
        }
        let resolver = OrderResolver::new(harness.store.clone(), Arc::new(gateway));

        let resolved = resolver.resolve(&details("order_receipt")).await.unwrap();
        assert_eq!(resolved.booking_id, booking.id);
        assert_eq!(resolved.path, ResolutionPath::GatewayLookup);
    }
}
