//! CLI module for Paygate
//!
//! Client commands (`submit`, `wait`, `check`) act for one user id; operator
//! commands (`pending`, `approve`, `deny`, `stats`) work on the whole
//! payments collection. All of them talk to the configured store only.

use clap::{Parser, Subcommand};

use crate::app::{load_config, App};

pub mod client;
pub mod operator;

/// Paygate CLI
#[derive(Parser, Debug)]
#[command(name = "paygate")]
#[command(about = "Manual payment approval for downloadable products")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Record a payment claim for a user
    Submit {
        /// User id
        #[arg(long)]
        user: String,
        /// Contact email
        #[arg(long)]
        email: String,
        /// Plan id (Launch, Scale, Enterprise)
        #[arg(long)]
        plan: String,
    },
    /// List requests awaiting a decision
    Pending {
        /// Keep running and redraw on every change
        #[arg(long)]
        follow: bool,
    },
    /// Approve a request and grant access
    Approve {
        /// Request id
        #[arg(long)]
        request: String,
        /// Owner of the request
        #[arg(long)]
        user: String,
    },
    /// Deny a request
    Deny {
        /// Request id
        #[arg(long)]
        request: String,
    },
    /// Wait for the operator's decision
    Wait {
        /// User id
        #[arg(long)]
        user: String,
    },
    /// Check whether a user may download
    Check {
        /// User id
        #[arg(long)]
        user: String,
    },
    /// Show request counters and approved revenue
    Stats,
    /// List the plan catalog
    Plans,
}

/// Run the CLI command
pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let Some(command) = cli.command else {
        let mut cmd = <Cli as clap::CommandFactory>::command();
        cmd.print_help()?;
        println!();
        return Ok(());
    };

    let app = App::init(load_config()?).await?;

    match command {
        Commands::Submit { user, email, plan } => client::submit(&app, &user, &email, &plan).await,
        Commands::Pending { follow } => operator::pending(&app, follow).await,
        Commands::Approve { request, user } => operator::approve(&app, &request, &user).await,
        Commands::Deny { request } => operator::deny(&app, &request).await,
        Commands::Wait { user } => client::wait(&app, &user).await,
        Commands::Check { user } => client::check(&app, &user).await,
        Commands::Stats => operator::stats(&app).await,
        Commands::Plans => {
            client::plans(&app);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_approve() {
        let cli = Cli::try_parse_from(["paygate", "approve", "--request", "r1", "--user", "u1"])
            .unwrap();
        match cli.command {
            Some(Commands::Approve { request, user }) => {
                assert_eq!(request, "r1");
                assert_eq!(user, "u1");
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_pending_follow() {
        let cli = Cli::try_parse_from(["paygate", "pending", "--follow"]).unwrap();
        assert!(matches!(cli.command, Some(Commands::Pending { follow: true })));
    }

    #[test]
    fn test_submit_requires_plan() {
        assert!(Cli::try_parse_from(["paygate", "submit", "--user", "u1", "--email", "a@b.c"]).is_err());
    }
}
