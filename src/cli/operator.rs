//! Operator commands: pending, approve, deny, stats

use anyhow::{Context, Result};
use paygate_core::model::format_minor;
use paygate_core::{ApprovalConsole, UserId};

use crate::app::App;

async fn print_pending(console: &ApprovalConsole) {
    let pending = console.pending().await;
    if pending.is_empty() {
        println!("No pending requests.");
        return;
    }

    println!(
        "{:<38} {:<20} {:<28} {:<11} {:>14} {:<14} {}",
        "REQUEST", "USER", "EMAIL", "PLAN", "AMOUNT", "REFERENCE", "SUBMITTED"
    );
    for request in pending {
        println!(
            "{:<38} {:<20} {:<28} {:<11} {:>14} {:<14} {}",
            request.request_id,
            request.user_id,
            request.user_email,
            request.plan_id,
            request.display_amount(),
            request.transaction_ref,
            request.created_at.format("%Y-%m-%d %H:%M:%S")
        );
    }
}

pub async fn pending(app: &App, follow: bool) -> Result<()> {
    let console = app.console().await?;
    print_pending(&console).await;

    if follow {
        let mut changes = console.changes();
        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => break,
                changed = changes.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }

            if let Some(e) = console.feed_error().await {
                console.close().await;
                return Err(anyhow::Error::new(e).context("Payments subscription failed"));
            }
            println!();
            print_pending(&console).await;
        }
    }

    console.close().await;
    Ok(())
}

pub async fn approve(app: &App, request_id: &str, user: &str) -> Result<()> {
    let user_id = UserId::parse(user).context("Invalid user id")?;
    let console = app.console().await?;

    let result = console.approve(request_id, &user_id).await;
    console.close().await;
    let grant = result.with_context(|| format!("Failed to approve {}", request_id))?;

    println!("Approved {} for {} ({})", request_id, grant.user_id, grant.plan);
    Ok(())
}

pub async fn deny(app: &App, request_id: &str) -> Result<()> {
    let console = app.console().await?;

    let result = console.deny(request_id).await;
    console.close().await;
    result.with_context(|| format!("Failed to deny {}", request_id))?;

    println!("Denied {}", request_id);
    Ok(())
}

pub async fn stats(app: &App) -> Result<()> {
    let console = app.console().await?;
    let stats = console.stats().await;
    console.close().await;

    let currency = app
        .catalog
        .plans()
        .first()
        .map(|plan| plan.currency.clone())
        .unwrap_or_else(|| "INR".to_string());

    println!("Pending:   {}", stats.pending);
    println!("Approved:  {}", stats.approved);
    println!("Denied:    {}", stats.denied);
    println!(
        "Revenue:   {}",
        format_minor(stats.approved_revenue_minor, &currency)
    );
    if stats.malformed > 0 {
        println!("Skipped:   {} malformed record(s)", stats.malformed);
    }
    Ok(())
}
