//! AvalIA HTTP Server

use anyhow::Context;
use avalia_server::{AppState, PaymentsMode, ServerConfig, app};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load environment
    dotenvy::dotenv().ok();

    let config = ServerConfig::from_env().context("invalid configuration")?;

    match &config.payments {
        PaymentsMode::Disabled => {
            tracing::warn!("⚠ Mercado Pago not configured - payments disabled");
            tracing::warn!("  Set MP_ACCESS_TOKEN in .env, or PIX_SANDBOX=true for local demos");
        }
        PaymentsMode::Sandbox { auto_approve_after } => {
            tracing::warn!(
                approve_after = ?auto_approve_after,
                "⚠ PIX sandbox enabled - charges approve themselves"
            );
        }
        PaymentsMode::MercadoPago(mp) => {
            tracing::info!(api_base = %mp.api_base, "✓ Mercado Pago configured");
        }
    }
    if config.webhook_verifier.is_none() {
        tracing::warn!("⚠ MP_WEBHOOK_SECRET not set - webhook signatures are not checked");
    }

    let state = AppState::from_config(&config).context("failed to initialize payments")?;

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;

    tracing::info!("══════════════════════════════════════════════════");
    tracing::info!("🚀 AvalIA server running on http://{}", config.bind_addr);
    tracing::info!("══════════════════════════════════════════════════");
    tracing::info!("Endpoints:");
    tracing::info!("  GET  /health                  - Health check");
    tracing::info!("  GET  /api/entitlement         - Credits and PRO status");
    tracing::info!("  POST /api/analyses            - Run a pricing analysis");
    tracing::info!("  POST /api/payments/pix        - Create PIX charge");
    tracing::info!("  GET  /api/payments/{{id}}       - Charge status");
    tracing::info!("  POST /webhook/mercadopago     - Provider notifications");

    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("failed to listen for Ctrl+C: {e}");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
