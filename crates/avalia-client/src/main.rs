//! avalia-checkout
//!
//! Terminal front end for the PRO checkout: shows credits, runs a billable
//! analysis, or walks through a PIX purchase until it settles or expires.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use avalia_client::{ApiClient, CheckoutApi, CheckoutFlow, CheckoutState, ClientError, SettlementPoller};
use avalia_core::UserId;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "avalia-checkout", version, about = "AvalIA PRO checkout client")]
struct Args {
    /// AvalIA server base URL
    #[arg(long, env = "AVALIA_SERVER", default_value = "http://localhost:3000")]
    server: String,

    /// Signed-in user id
    #[arg(short, long, env = "AVALIA_USER")]
    user: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show credits and PRO status
    Status,

    /// Run one billable pricing analysis
    Analyze,

    /// Buy lifetime PRO access with PIX
    Buy {
        /// Payer email sent to the provider
        #[arg(short, long)]
        email: String,

        /// Seconds between status checks
        #[arg(long, default_value_t = 5)]
        poll_interval: u64,

        /// Seconds before the PIX code is considered expired
        #[arg(long, default_value_t = 600)]
        deadline: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "warn".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let api = Arc::new(
        ApiClient::new(&args.server, UserId::new(args.user.clone()))
            .context("failed to build API client")?,
    );

    match args.command {
        Command::Status => {
            let entitlement = api.entitlement().await?;
            if entitlement.is_entitled {
                println!("PRO access: unlimited analyses");
            } else {
                println!("Free analyses left: {}", entitlement.credits);
            }
        }
        Command::Analyze => match api.consume_analysis().await {
            Ok(grant) if grant.unlimited => println!("Analysis allowed (PRO)"),
            Ok(grant) => println!(
                "Analysis allowed, {} free analyses left",
                grant.credits_remaining.unwrap_or_default()
            ),
            Err(ClientError::UpgradeRequired) => {
                println!("{}", ClientError::UpgradeRequired.user_message());
                println!("Run `avalia-checkout buy --email <you@example.com>` to unlock PRO.");
            }
            Err(e) => return Err(e.into()),
        },
        Command::Buy {
            email,
            poll_interval,
            deadline,
        } => {
            let poller = SettlementPoller::new(api.clone())
                .with_interval(Duration::from_secs(poll_interval.max(1)))
                .with_deadline(Duration::from_secs(deadline));
            let mut flow = CheckoutFlow::new(api).with_poller(poller);
            buy(&mut flow, &email).await?;
        }
    }

    Ok(())
}

async fn buy(flow: &mut CheckoutFlow, email: &str) -> anyhow::Result<()> {
    let charge = match flow.begin(email).await {
        Ok(charge) => charge,
        Err(e) => anyhow::bail!(e.user_message()),
    };

    println!("Pay R$ {} with PIX copy-and-paste:\n", charge.amount);
    println!("{}\n", charge.qr_code);
    if let Some(url) = &charge.ticket_url {
        println!("Or open: {url}\n");
    }
    println!("Waiting for confirmation (Ctrl+C to cancel)...");

    let state = tokio::select! {
        state = flow.wait() => state?.clone(),
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupted by user");
            CheckoutState::Offer { last_error: None }
        }
    };

    match state {
        CheckoutState::Reconciled { .. } => {
            println!("Payment confirmed. PRO access unlocked.");
            flow.acknowledge()?;
        }
        CheckoutState::Expired { reason, .. } => {
            println!("{reason} Run `buy` again for a new code.");
        }
        CheckoutState::Offer { .. } => {
            if matches!(flow.state(), CheckoutState::AwaitingSettlement { .. }) {
                flow.cancel()?;
            }
            println!("Checkout cancelled.");
        }
        CheckoutState::Requesting { .. } | CheckoutState::AwaitingSettlement { .. } => {}
    }

    Ok(())
}
