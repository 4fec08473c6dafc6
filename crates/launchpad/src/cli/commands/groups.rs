//! Groups command - edit distribution group membership

use clap::{Args, Subcommand};
use console::style;
use serde_json::json;
use tracing::info;

use launchpad_distribute::members::{sync_members, TrackedMembers};

use crate::cli::{output, AppArgs, Cli, OutputFormat, Session};

/// Distribution group management
#[derive(Debug, Args)]
pub struct GroupsCommand {
    #[command(subcommand)]
    pub subcommand: GroupsSubcommand,
}

#[derive(Debug, Subcommand)]
pub enum GroupsSubcommand {
    /// Add or remove testers of a group
    Members(MembersArgs),
}

/// Members arguments
#[derive(Debug, Args)]
pub struct MembersArgs {
    /// Group name
    #[arg(long)]
    pub group: String,

    #[command(flatten)]
    pub app: AppArgs,

    /// Tester emails to add (comma-separated, repeatable)
    #[arg(long, value_delimiter = ',')]
    pub add: Vec<String>,

    /// Tester emails to remove (comma-separated, repeatable)
    #[arg(long, value_delimiter = ',')]
    pub remove: Vec<String>,
}

impl MembersArgs {
    /// Stage the requested edits; removals refer to existing members
    fn tracked(&self) -> TrackedMembers {
        let mut members = TrackedMembers::committed(
            self.remove
                .iter()
                .map(|e| e.trim())
                .filter(|e| !e.is_empty()),
        );
        for email in &self.remove {
            members.remove(email);
        }
        for email in &self.add {
            members.add(email.as_str());
        }
        members
    }
}

impl GroupsCommand {
    pub fn execute(&self, cli: &Cli) -> anyhow::Result<()> {
        let GroupsSubcommand::Members(args) = &self.subcommand;
        info!(group = %args.group, "executing groups members command");

        let session = Session::open(&args.app, cli)?;
        let runtime = tokio::runtime::Runtime::new()?;
        runtime.block_on(update_members(args, &session, cli))
    }
}

async fn update_members(args: &MembersArgs, session: &Session, cli: &Cli) -> anyhow::Result<()> {
    let mut members = args.tracked();
    let added = members.pending_adds();
    let removed = members.pending_removes();
    if added.is_empty() && removed.is_empty() {
        anyhow::bail!("Nothing to change: pass --add or --remove");
    }

    let ctx = &session.ctx;
    sync_members(ctx.groups.as_ref(), &ctx.app, &args.group, &mut members).await?;

    if cli.format == OutputFormat::Json {
        println!(
            "{}",
            serde_json::to_string_pretty(&json!({
                "group": args.group,
                "added": added,
                "removed": removed,
            }))?
        );
    } else if !cli.quiet {
        output::success(&format!(
            "Updated {}: {} added, {} removed",
            style(&args.group).cyan(),
            added.len(),
            removed.len()
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn parse(args: &[&str]) -> MembersArgs {
        let mut argv = vec!["launchpad", "groups", "members", "--group", "Beta"];
        argv.extend_from_slice(args);
        match Cli::try_parse_from(argv).unwrap().command {
            crate::cli::Commands::Groups(GroupsCommand {
                subcommand: GroupsSubcommand::Members(args),
            }) => args,
            _ => panic!("expected groups members"),
        }
    }

    #[test]
    fn test_edits_are_staged() {
        let args = parse(&[
            "--add",
            "ann@example.com,bob@example.com",
            "--remove",
            "cy@example.com",
        ]);
        let members = args.tracked();
        assert_eq!(
            members.pending_adds(),
            vec!["ann@example.com", "bob@example.com"]
        );
        assert_eq!(members.pending_removes(), vec!["cy@example.com"]);
    }

    #[test]
    fn test_adding_and_removing_same_member_cancels_out() {
        let args = parse(&["--add", "ann@example.com", "--remove", "ANN@example.com"]);
        assert!(!args.tracked().has_pending());
    }
}
