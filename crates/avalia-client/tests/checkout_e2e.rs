//! Checkout flow against a real server on a local port

use std::sync::Arc;
use std::time::Duration;

use avalia_client::{ApiClient, CheckoutApi, CheckoutFlow, CheckoutState, ClientError, SettlementPoller};
use avalia_core::{PaymentStatus, UserId};
use avalia_payments::{PaymentGateway, SandboxGateway};
use avalia_server::{AppState, ServerConfig, app};

async fn spawn_server(config: ServerConfig) -> (String, Arc<SandboxGateway>) {
    let gateway = Arc::new(SandboxGateway::new());
    let provider: Arc<dyn PaymentGateway> = gateway.clone();
    let state = AppState::with_gateway(&config, Some(provider));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app(state)).await.unwrap();
    });

    (format!("http://{addr}"), gateway)
}

fn fast_poller(api: Arc<ApiClient>) -> SettlementPoller {
    SettlementPoller::new(api)
        .with_interval(Duration::from_millis(50))
        .with_deadline(Duration::from_secs(5))
}

#[tokio::test]
async fn test_credits_run_out_then_purchase_unlocks() {
    let (base, gateway) = spawn_server(ServerConfig {
        reconcile_stale_after: Duration::ZERO,
        ..ServerConfig::default()
    })
    .await;
    let api = Arc::new(ApiClient::new(&base, UserId::new("alice")).unwrap());

    assert_eq!(api.consume_analysis().await.unwrap().credits_remaining, Some(1));
    assert_eq!(api.consume_analysis().await.unwrap().credits_remaining, Some(0));
    assert!(matches!(
        api.consume_analysis().await,
        Err(ClientError::UpgradeRequired)
    ));

    let mut flow = CheckoutFlow::new(api.clone()).with_poller(fast_poller(api.clone()));
    let charge = flow.begin("alice@example.com").await.unwrap();
    assert_eq!(charge.status, PaymentStatus::Created);

    // No webhook: the status poll makes the server verify with the provider
    gateway
        .settle(&charge.transaction_id, PaymentStatus::Approved)
        .await
        .unwrap();

    let state = flow.wait().await.unwrap();
    assert!(matches!(state, CheckoutState::Reconciled { .. }));

    let grant = api.consume_analysis().await.unwrap();
    assert!(grant.allowed && grant.unlimited);
    assert!(api.entitlement().await.unwrap().is_entitled);
}

#[tokio::test]
async fn test_rejected_purchase_can_be_retried() {
    let (base, gateway) = spawn_server(ServerConfig {
        reconcile_stale_after: Duration::ZERO,
        ..ServerConfig::default()
    })
    .await;
    let api = Arc::new(ApiClient::new(&base, UserId::new("bob")).unwrap());
    let mut flow = CheckoutFlow::new(api.clone()).with_poller(fast_poller(api.clone()));

    let first = flow.begin("bob@example.com").await.unwrap();
    gateway
        .settle(&first.transaction_id, PaymentStatus::Rejected)
        .await
        .unwrap();
    assert!(matches!(
        flow.wait().await.unwrap(),
        CheckoutState::Expired { .. }
    ));
    assert!(!api.entitlement().await.unwrap().is_entitled);

    let second = flow.begin("bob@example.com").await.unwrap();
    assert_ne!(second.transaction_id, first.transaction_id);
}

#[tokio::test]
async fn test_server_errors_are_typed() {
    let (base, _) = spawn_server(ServerConfig::default()).await;
    let api = ApiClient::new(&base, UserId::new("carol")).unwrap();

    let err = api
        .create_pix_charge("not-an-email", &avalia_core::IdempotencyKey::generate())
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Api { status: 400, .. }));

    let err = api
        .payment_status(&avalia_core::TransactionId::new("missing"))
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Api { status: 404, .. }));
}
