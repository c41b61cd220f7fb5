//! `adminbridge-mailer`: operator entry point for the credential notifier.
//!
//! Sends one ad-hoc notification through the delivery queue and prints the
//! immediate outcome as a JSON line on stdout. Logs go to stderr.

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

use adminbridge_common::config::AppConfig;
use adminbridge_common::types::CredentialRecipient;
use adminbridge_notifier::{
    CredentialNotificationBuilder, DeliveryEvent, DeliveryQueue, Identity, ImmediateOutcome,
    Notification, RetryPolicy, RetryScheduler, transport,
};

#[derive(Debug, Parser)]
#[command(
    name = "adminbridge-mailer",
    version,
    about = "Send AdminBridge credential emails through the delivery queue"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// If the immediate attempt fails, keep retrying until the message is
    /// delivered or discarded
    #[arg(long, global = true)]
    wait: bool,

    /// Override RETRY_INTERVAL_MINUTES for the waiting scheduler
    #[arg(long, global = true, value_name = "SECS")]
    interval_secs: Option<u64>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Validate the configured mail transport without sending anything
    CheckConfig,
    /// Send the test message to --to or TEST_RECIPIENT
    SendTest {
        #[arg(long)]
        to: Option<String>,
    },
    /// Send login credentials for one employee/student record given as JSON,
    /// e.g. '{"email":"a@x.com","firstName":"Asha","lastName":"Rai","role":"Accountant"}'
    SendCredentials { record: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    let config = AppConfig::from_env()?;
    let queue = Arc::new(DeliveryQueue::new(
        transport::from_config(&config),
        RetryPolicy::from_config(&config),
    ));
    let builder = CredentialNotificationBuilder::from_config(&config);

    let notification = match &cli.command {
        Command::CheckConfig => return Ok(check_config(&queue)),
        Command::SendTest { to } => {
            let recipient = to
                .clone()
                .or_else(|| config.test_recipient.clone())
                .ok_or_else(|| anyhow::anyhow!("pass --to or set TEST_RECIPIENT"))?;
            builder.build_test(&recipient)?
        }
        Command::SendCredentials { record } => {
            let recipient: CredentialRecipient = serde_json::from_str(record)
                .map_err(|e| anyhow::anyhow!("invalid employee record: {}", e))?;
            tracing::debug!(kind = %recipient.kind, "Building credential email");
            builder.build(&recipient)?
        }
    };

    let interval = cli
        .interval_secs
        .map(Duration::from_secs)
        .unwrap_or_else(|| config.retry_interval());

    send(queue, notification, cli.wait, interval).await
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("adminbridge_mailer=info,adminbridge_notifier=info")
    });

    if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
}

fn check_config(queue: &DeliveryQueue) -> ExitCode {
    match queue.check_transport() {
        Ok(()) => {
            println!(
                "{}",
                serde_json::json!({ "transport": queue.transport_name(), "status": "ok" })
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            println!(
                "{}",
                serde_json::json!({
                    "transport": queue.transport_name(),
                    "status": "error",
                    "error": e.to_string(),
                })
            );
            ExitCode::FAILURE
        }
    }
}

async fn send(
    queue: Arc<DeliveryQueue>,
    notification: Notification,
    wait: bool,
    interval: Duration,
) -> anyhow::Result<ExitCode> {
    let identity = notification.identity().clone();
    tracing::info!(
        identity = %identity,
        subject = notification.subject(),
        "Sending notification"
    );

    // Subscribe before enqueueing so no event for this identity is missed.
    let events = queue.subscribe();

    let outcome = match queue.enqueue(notification).await {
        Ok(outcome) => outcome,
        Err(e) if e.is_config() => {
            tracing::error!(error = %e, "Email subsystem unavailable");
            println!("{}", serde_json::json!({ "outcome": "error", "error": e.to_string() }));
            return Ok(ExitCode::FAILURE);
        }
        Err(e) => return Err(e.into()),
    };
    tracing::info!(identity = %identity, outcome = %outcome, "Immediate attempt finished");
    println!("{}", serde_json::to_string(&outcome)?);

    let ImmediateOutcome::Queued { .. } = outcome else {
        return Ok(ExitCode::SUCCESS);
    };
    if !wait {
        tracing::warn!(
            identity = %identity,
            "Message queued, but this process exits now; rerun with --wait to keep retrying"
        );
        return Ok(ExitCode::SUCCESS);
    }

    let (handle, task) = RetryScheduler::new(queue.clone(), interval).spawn();
    tracing::info!(
        identity = %identity,
        interval_secs = interval.as_secs(),
        "Waiting for retries (Ctrl+C to stop)"
    );

    let delivered = tokio::select! {
        result = wait_for_settlement(&queue, events, &identity) => result?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received shutdown signal, pending message dropped");
            false
        }
    };

    handle.shutdown();
    task.await?;

    let final_outcome = if delivered { "delivered" } else { "failed" };
    println!("{}", serde_json::json!({ "outcome": final_outcome }));
    Ok(if delivered {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// Block until `identity` is delivered (`true`) or permanently discarded (`false`).
async fn wait_for_settlement(
    queue: &DeliveryQueue,
    mut events: tokio::sync::broadcast::Receiver<DeliveryEvent>,
    identity: &Identity,
) -> anyhow::Result<bool> {
    loop {
        match events.recv().await {
            Ok(DeliveryEvent::Delivered { identity: id, .. }) if &id == identity => {
                return Ok(true);
            }
            Ok(DeliveryEvent::PermanentFailure(failure)) if &failure.identity == identity => {
                return Ok(false);
            }
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => {
                tracing::debug!(skipped, "Event stream lagged, checking queue directly");
                if queue.is_delivered(identity) {
                    return Ok(true);
                }
                if !queue.is_pending(identity) {
                    return Ok(false);
                }
            }
            Err(RecvError::Closed) => anyhow::bail!("delivery queue closed"),
        }
    }
}
