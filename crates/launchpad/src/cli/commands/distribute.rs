//! Distribute command - the full upload, registration and distribution flow

use std::path::PathBuf;
use std::sync::Arc;

use clap::Args;
use console::style;
use serde_json::json;
use tracing::{info, warn};

use launchpad_distribute::wizard::{
    AddDestinationsOutcome, DistributionWizard, EntryContext, FinishProgress, Page, Route,
    Source,
};
use launchpad_distribute::traits::UploadService;
use launchpad_distribute::{Destination, ReleaseId};

use super::devices::{connect, register_devices, PortalArgs};
use crate::cli::output::{self, UploadProgressBar};
use crate::cli::{AppArgs, Cli, OutputFormat, Session};

/// Upload (or pick) a release and distribute it
#[derive(Debug, Args)]
pub struct DistributeCommand {
    /// Binary to upload
    #[arg(conflicts_with_all = ["release", "build_url"])]
    pub file: Option<PathBuf>,

    /// Redistribute an existing release instead of uploading
    #[arg(long, conflicts_with = "build_url")]
    pub release: Option<ReleaseId>,

    /// Register an externally hosted build by URL
    #[arg(long, requires_all = ["build_version", "short_version"])]
    pub build_url: Option<String>,

    /// Build version of the external build
    #[arg(long)]
    pub build_version: Option<String>,

    /// Display version of the external build
    #[arg(long)]
    pub short_version: Option<String>,

    #[command(flatten)]
    pub app: AppArgs,

    /// Distribution group as id=name (repeatable)
    #[arg(long = "group")]
    pub groups: Vec<String>,

    /// Tester emails (comma-separated, repeatable)
    #[arg(long = "tester", value_delimiter = ',')]
    pub testers: Vec<String>,

    /// Store connection as id=name (repeatable)
    #[arg(long = "store")]
    pub stores: Vec<String>,

    /// Create a new group with this name and distribute to it
    #[arg(long)]
    pub create_group: Option<String>,

    /// Members of the new group (comma-separated)
    #[arg(long, value_delimiter = ',', requires = "create_group")]
    pub members: Vec<String>,

    /// Make the new group public
    #[arg(long, requires = "create_group")]
    pub public_group: bool,

    /// Release notes
    #[arg(long)]
    pub notes: Option<String>,

    /// Path to file containing release notes
    #[arg(long, conflicts_with = "notes")]
    pub notes_file: Option<PathBuf>,

    /// Mark the release as a mandatory update
    #[arg(long)]
    pub mandatory: bool,

    /// Turn off auto-provisioning for the group so devices are registered here
    #[arg(long)]
    pub no_auto_provisioning: bool,

    #[command(flatten)]
    pub portal: PortalArgs,

    /// Skip confirmations
    #[arg(long, short = 'y')]
    pub yes: bool,
}

impl DistributeCommand {
    pub fn execute(&self, cli: &Cli) -> anyhow::Result<()> {
        info!("executing distribute command");
        if self.file.is_none() && self.release.is_none() && self.build_url.is_none() {
            anyhow::bail!("Nothing to distribute: pass a binary, --release or --build-url");
        }

        let session = Session::open(&self.app, cli)?;
        let runtime = tokio::runtime::Runtime::new()?;
        runtime.block_on(self.run(&session, cli))
    }

    async fn run(&self, session: &Session, cli: &Cli) -> anyhow::Result<()> {
        let ctx = &session.ctx;
        let os = session.os()?;

        let entry = match self.release {
            Some(id) => {
                EntryContext::ReleaseDetails(ctx.uploads.get_release(&ctx.app, id).await?)
            }
            None => EntryContext::ReleaseList,
        };
        let observer = Arc::new(UploadProgressBar::new(cli.is_interactive_text()));
        let mut wizard = DistributionWizard::new(ctx, os, entry).with_upload_observer(observer);

        let result = self.drive(&mut wizard, session, cli).await;
        if result.is_err() {
            wizard.close();
        }
        let route = result?;

        let release = wizard.release();
        if cli.format == OutputFormat::Json {
            println!(
                "{}",
                serde_json::to_string_pretty(&json!({
                    "release": release,
                    "route": route_json(&route),
                }))?
            );
        } else if !cli.quiet {
            if let Some(release) = release {
                output::success(&format!(
                    "Release {} ({}) distributed",
                    style(&release.short_version).cyan(),
                    release.version
                ));
            }
            match &route {
                Route::GroupReleases { group_id } => {
                    println!("{}", output::key_value("Group", group_id))
                }
                Route::ReleaseList => {}
            }
        }

        // Follow auto-provisioning kicked off by the release update
        if wizard.auto_provisioning_poller().is_polling() && cli.is_interactive_text() {
            output::info(
                "Devices are being provisioned in the background; use `launchpad status` to follow",
            );
        }
        wizard.close();
        Ok(())
    }

    async fn drive(
        &self,
        wizard: &mut DistributionWizard,
        session: &Session,
        cli: &Cli,
    ) -> anyhow::Result<Route> {
        // Store destinations narrow the accepted binaries, so select them first
        let outcome = wizard.add_destinations(self.destinations()?);
        report_skipped(&outcome);

        if let Some(url) = &self.build_url {
            wizard.set_source(Source::ExternalBuild { url: url.clone() });
            wizard
                .register_external_build(
                    self.build_version.as_deref().unwrap_or_default(),
                    self.short_version.as_deref().unwrap_or_default(),
                )
                .await?;
        } else if let Some(file) = &self.file {
            if cli.is_interactive_text() {
                output::info(&format!("Uploading {}", style(file.display()).cyan()));
            }
            let cancel = wizard.upload_cancel_handle();
            tokio::select! {
                result = wizard.upload(file) => { result?; }
                _ = tokio::signal::ctrl_c() => {
                    cancel.cancel();
                    return Err(launchpad_distribute::DistributeError::Cancelled.into());
                }
            }
        }

        if let Some(notes) = self.release_notes()? {
            wizard.set_release_notes(notes);
        }
        wizard.set_mandatory_update(self.mandatory || session.config.distribution.mandatory_update);

        if let Some(name) = &self.create_group {
            wizard.begin_create_group();
            let group = wizard.create_group(name, &self.members, self.public_group).await?;
            if let Some(message) = wizard.state().error_message {
                output::warning(&message);
            }
            if !cli.quiet {
                output::success(&format!("Created group {}", style(&group.name).cyan()));
            }
        }

        if wizard.destinations().is_empty() {
            anyhow::bail!("Select at least one destination with --group, --tester or --store");
        }

        if self.no_auto_provisioning && wizard.disable_auto_provisioning().await? && !cli.quiet {
            output::info("Auto-provisioning disabled for this group");
        }
        wizard.refresh_auto_provisioning().await?;
        self.advance_to_summary(wizard, cli).await?;

        match wizard.begin_finish().await? {
            FinishProgress::Done(route) => Ok(route),
            FinishProgress::Publishing => {
                if cli.is_interactive_text() {
                    output::info("Registering devices and resigning the release...");
                }
                Ok(wizard.wait_for_publish().await?)
            }
        }
    }

    /// Walk the page list, handling device registration on the way
    async fn advance_to_summary(
        &self,
        wizard: &mut DistributionWizard,
        cli: &Cli,
    ) -> anyhow::Result<()> {
        for _ in 0..wizard.pages().len() {
            if wizard.page() == Page::DeviceRegistration {
                self.register(wizard, cli).await?;
            }
            if wizard.page() == Page::Summary {
                break;
            }
            wizard.next();
        }
        Ok(())
    }

    async fn register(&self, wizard: &mut DistributionWizard, cli: &Cli) -> anyhow::Result<()> {
        if !self.portal.is_configured() {
            warn!("Device registration skipped: no developer portal credentials");
            if !cli.quiet {
                output::warning(
                    "New devices will not be registered; pass --apple-id or --account-connection",
                );
            }
            return Ok(());
        }

        let group = wizard
            .destinations()
            .groups()
            .next()
            .map(|g| g.to_string())
            .ok_or_else(|| anyhow::anyhow!("Device registration needs a group destination"))?;

        let provisioning = wizard.provisioning_mut();
        connect(provisioning, &self.portal, cli).await?;
        if provisioning.is_ready_to_resign() {
            // The server registers devices and resigns when the wizard finishes
            provisioning.load_unprovisioned_devices(&group).await?;
            return Ok(());
        }

        register_devices(provisioning, &group, &self.portal, !self.yes, cli).await?;
        Ok(())
    }

    fn release_notes(&self) -> anyhow::Result<Option<String>> {
        match &self.notes_file {
            Some(path) => Ok(Some(std::fs::read_to_string(path).map_err(|e| {
                anyhow::anyhow!("Failed to read notes file {}: {}", path.display(), e)
            })?)),
            None => Ok(self.notes.clone()),
        }
    }

    fn destinations(&self) -> anyhow::Result<Vec<Destination>> {
        let mut destinations = Vec::new();
        for group in &self.groups {
            let (id, name) = split_pair(group, "--group")?;
            destinations.push(Destination::group(id, name));
        }
        for store in &self.stores {
            let (id, name) = split_pair(store, "--store")?;
            destinations.push(Destination::store(id, name));
        }
        destinations.extend(
            self.testers
                .iter()
                .filter(|t| !t.trim().is_empty())
                .map(|t| Destination::tester(t.trim())),
        );
        Ok(destinations)
    }
}

fn split_pair<'a>(value: &'a str, flag: &str) -> anyhow::Result<(&'a str, &'a str)> {
    match value.split_once('=') {
        Some((id, name)) if !id.trim().is_empty() && !name.trim().is_empty() => {
            Ok((id.trim(), name.trim()))
        }
        _ => anyhow::bail!("{} expects id=name, got '{}'", flag, value),
    }
}

fn report_skipped(outcome: &AddDestinationsOutcome) {
    if let Some(message) = &outcome.duplicate_message {
        output::warning(message);
    }
    if !outcome.rejected_testers.is_empty() {
        output::warning(&format!(
            "Tester limit reached, skipped: {}",
            outcome.rejected_testers.join(", ")
        ));
    }
}

fn route_json(route: &Route) -> serde_json::Value {
    match route {
        Route::GroupReleases { group_id } => json!({ "group_releases": group_id }),
        Route::ReleaseList => json!("release_list"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn parse(args: &[&str]) -> DistributeCommand {
        let mut argv = vec!["launchpad", "distribute"];
        argv.extend_from_slice(args);
        match Cli::try_parse_from(argv).unwrap().command {
            crate::cli::Commands::Distribute(cmd) => cmd,
            _ => panic!("expected distribute"),
        }
    }

    #[test]
    fn test_destinations_from_flags() {
        let cmd = parse(&[
            "app.ipa",
            "--group",
            "g-1=Beta",
            "--store",
            "s-1=App Store",
            "--tester",
            "ann@example.com, bob@example.com",
        ]);

        let destinations = cmd.destinations().unwrap();
        assert_eq!(
            destinations,
            vec![
                Destination::group("g-1", "Beta"),
                Destination::store("s-1", "App Store"),
                Destination::tester("ann@example.com"),
                Destination::tester("bob@example.com"),
            ]
        );
    }

    #[test]
    fn test_group_without_name_rejected() {
        let cmd = parse(&["app.ipa", "--group", "g-1"]);
        assert!(cmd.destinations().is_err());
    }

    #[test]
    fn test_external_build_requires_versions() {
        let argv = ["launchpad", "distribute", "--build-url", "https://cdn.example.com/a.ipa"];
        assert!(Cli::try_parse_from(argv).is_err());

        let cmd = parse(&[
            "--build-url",
            "https://cdn.example.com/a.ipa",
            "--build-version",
            "42",
            "--short-version",
            "1.2.0",
        ]);
        assert!(cmd.file.is_none());
    }

    #[test]
    fn test_route_json() {
        assert_eq!(route_json(&Route::ReleaseList), json!("release_list"));
        assert_eq!(
            route_json(&Route::GroupReleases {
                group_id: "g-1".to_string()
            }),
            json!({ "group_releases": "g-1" })
        );
    }
}
