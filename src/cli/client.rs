//! Client-side commands: submit, wait, check

use anyhow::{anyhow, bail, Context, Result};
use paygate_core::model::format_minor;
use paygate_core::{GuardState, IdentityCell, ListenerEvent, UserId, WaitState};

use crate::app::App;

fn identity_for(user: &str) -> Result<IdentityCell> {
    let identity = IdentityCell::new();
    identity.resolve(UserId::parse(user).context("Invalid user id")?);
    Ok(identity)
}

pub async fn submit(app: &App, user: &str, email: &str, plan: &str) -> Result<()> {
    let identity = identity_for(user)?;
    let request = app
        .writer()
        .submit_as(&identity, email, plan)
        .await
        .context("Failed to submit payment request")?;

    println!("Payment request submitted");
    println!("  request:     {}", request.request_id);
    println!("  plan:        {} ({})", request.plan_id, request.display_amount());
    println!("  reference:   {}", request.transaction_ref);
    println!();
    println!("Run `paygate wait --user {}` to wait for approval.", request.user_id);
    Ok(())
}

pub async fn wait(app: &App, user: &str) -> Result<()> {
    let identity = identity_for(user)?;
    let mut handle = app
        .listener()
        .arm_for(&identity)
        .await
        .context("Failed to start listening for a decision")?;

    println!("Waiting for the operator to verify your payment (Ctrl-C to stop)...");

    let outcome = loop {
        let event = tokio::select! {
            _ = tokio::signal::ctrl_c() => break Ok(()),
            event = handle.next_event() => event,
        };

        match event {
            Some(ListenerEvent::StateChanged(WaitState::Approved)) => {
                println!("Payment verified. Preparing your download...");
            }
            Some(ListenerEvent::StateChanged(WaitState::Denied)) => {
                break Err(anyhow!(
                    "payment request was denied; submit a new request to try again"
                ));
            }
            Some(ListenerEvent::StateChanged(WaitState::Waiting)) => {}
            Some(ListenerEvent::HandOff) => {
                println!("Access granted. Run `paygate check --user {}`.", user);
                break Ok(());
            }
            Some(ListenerEvent::StreamError(e)) => {
                break Err(anyhow::Error::new(e).context("Lost the connection to the access store"));
            }
            None => break Err(anyhow!("listener stopped unexpectedly")),
        }
    };

    handle.release().await;
    outcome
}

pub async fn check(app: &App, user: &str) -> Result<()> {
    let guard = app.guard(identity_for(user)?);

    match guard.check().await {
        GuardState::Granted(grant) => {
            let plan = if grant.plan.is_empty() {
                "unknown plan".to_string()
            } else {
                grant.plan
            };
            println!("Access granted ({})", plan);
            Ok(())
        }
        GuardState::Denied(reason) => bail!("Access denied: {}", reason),
        GuardState::Loading => bail!("Access check did not complete"),
    }
}

pub fn plans(app: &App) {
    for plan in app.catalog.plans() {
        println!("{:<12} {}", plan.id, format_minor(plan.amount_minor, &plan.currency));
    }
}
