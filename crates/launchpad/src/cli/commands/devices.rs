//! Devices command - developer portal device registration

use std::path::{Path, PathBuf};

use clap::{Args, Subcommand};
use console::style;
use dialoguer::{Confirm, Password};
use tracing::info;

use launchpad_distribute::provisioning::{
    DeviceProvisioningSession, DevicesToBeRegistered, RegistrationCapacity,
};
use launchpad_distribute::{
    AvailabilityOfDevices, DeviceClass, DeviceRegistration, PollOutcome, PortalAuth,
};

use crate::cli::{output, AppArgs, Cli, OutputFormat, Session};

/// Developer portal device registration
#[derive(Debug, Args)]
pub struct DevicesCommand {
    #[command(subcommand)]
    pub subcommand: DevicesSubcommand,
}

#[derive(Debug, Subcommand)]
pub enum DevicesSubcommand {
    /// Show how many devices of each class can still be registered
    Availability {
        #[command(flatten)]
        app: AppArgs,

        #[command(flatten)]
        portal: PortalArgs,
    },

    /// Register the unprovisioned devices of a group
    Register(RegisterArgs),
}

/// Register arguments
#[derive(Debug, Args)]
pub struct RegisterArgs {
    /// Distribution group whose testers' devices are registered
    #[arg(long)]
    pub group: String,

    #[command(flatten)]
    pub app: AppArgs,

    #[command(flatten)]
    pub portal: PortalArgs,

    /// Skip confirmation
    #[arg(long, short = 'y')]
    pub yes: bool,
}

/// Developer portal credentials
#[derive(Debug, Clone, Default, Args)]
pub struct PortalArgs {
    /// Apple ID used to sign in to the developer portal
    #[arg(long, env = "LAUNCHPAD_APPLE_ID")]
    pub apple_id: Option<String>,

    /// Stored developer account connection (instead of an Apple ID)
    #[arg(long, conflicts_with = "apple_id")]
    pub account_connection: Option<String>,

    /// Stored distribution certificate connection, enables resigning
    #[arg(long, requires = "account_connection")]
    pub certificate_connection: Option<String>,

    /// Register every device even when some classes are already full
    #[arg(long)]
    pub all_devices: bool,

    /// Where to write the updated provisioning profiles (zip)
    #[arg(long, default_value = "profiles.zip")]
    pub profiles_out: PathBuf,
}

impl PortalArgs {
    /// Whether any way to reach the portal was given
    pub fn is_configured(&self) -> bool {
        self.apple_id.is_some() || self.account_connection.is_some()
    }

    /// Build the portal authentication, prompting for the password
    pub fn auth(&self, cli: &Cli) -> anyhow::Result<PortalAuth> {
        if let Some(id) = &self.account_connection {
            return Ok(PortalAuth::ServiceConnection { id: id.clone() });
        }

        let Some(username) = &self.apple_id else {
            anyhow::bail!("Pass --apple-id or --account-connection to reach the developer portal");
        };

        let password = match std::env::var("LAUNCHPAD_APPLE_PASSWORD") {
            Ok(password) if !password.is_empty() => password,
            _ if cli.format == OutputFormat::Text => Password::new()
                .with_prompt(format!("Password for {}", username))
                .interact()?,
            _ => anyhow::bail!("Set LAUNCHPAD_APPLE_PASSWORD when not running interactively"),
        };

        Ok(PortalAuth::Credentials {
            username: username.clone(),
            password,
        })
    }
}

impl DevicesCommand {
    pub fn execute(&self, cli: &Cli) -> anyhow::Result<()> {
        let subcommand_name = match &self.subcommand {
            DevicesSubcommand::Availability { .. } => "availability",
            DevicesSubcommand::Register(_) => "register",
        };
        info!(subcommand = subcommand_name, "executing devices command");
        let runtime = tokio::runtime::Runtime::new()?;
        runtime.block_on(self.execute_async(cli))
    }

    async fn execute_async(&self, cli: &Cli) -> anyhow::Result<()> {
        match &self.subcommand {
            DevicesSubcommand::Availability { app, portal } => {
                let session = Session::open(app, cli)?;
                let mut provisioning = DeviceProvisioningSession::new(&session.ctx);
                let availability = connect(&mut provisioning, portal, cli).await?;

                if cli.format == OutputFormat::Json {
                    println!("{}", serde_json::to_string_pretty(&availability)?);
                } else if !cli.quiet {
                    print_availability(&availability);
                }
                Ok(())
            }
            DevicesSubcommand::Register(args) => {
                let session = Session::open(&args.app, cli)?;
                let mut provisioning = DeviceProvisioningSession::new(&session.ctx);
                connect(&mut provisioning, &args.portal, cli).await?;

                let registered = register_devices(
                    &mut provisioning,
                    &args.group,
                    &args.portal,
                    !args.yes,
                    cli,
                )
                .await?;
                if !registered {
                    return Ok(());
                }

                if provisioning.poller().is_polling() {
                    match provisioning.wait_for_resign().await? {
                        PollOutcome::Succeeded | PollOutcome::Idle => {}
                        PollOutcome::Failed { message } => {
                            anyhow::bail!("Device registration failed: {}", message)
                        }
                        PollOutcome::Stalled => {
                            anyhow::bail!("Device registration did not finish in time")
                        }
                        PollOutcome::Stopped => {
                            return Err(launchpad_distribute::DistributeError::Cancelled.into())
                        }
                    }
                }
                Ok(())
            }
        }
    }
}

/// Sign in to the portal, reporting a classified failure
pub(super) async fn connect(
    provisioning: &mut DeviceProvisioningSession,
    portal: &PortalArgs,
    cli: &Cli,
) -> anyhow::Result<AvailabilityOfDevices> {
    provisioning.start_login();
    let auth = portal.auth(cli)?;

    match provisioning.connect(auth).await {
        Ok(availability) => {
            if let Some(cert) = &portal.certificate_connection {
                provisioning.set_certificate_connection(cert.clone());
            }
            Ok(availability)
        }
        Err(e) => {
            if let Some(page) = provisioning.error_page() {
                if !cli.quiet {
                    output::error(page.description());
                }
            }
            Err(e.into())
        }
    }
}

/// Register the group's unprovisioned devices.
///
/// Returns `false` when there was nothing to do or the user declined.
pub(super) async fn register_devices(
    provisioning: &mut DeviceProvisioningSession,
    group: &str,
    portal: &PortalArgs,
    confirm: bool,
    cli: &Cli,
) -> anyhow::Result<bool> {
    let devices = provisioning.load_unprovisioned_devices(group).await?;
    if devices.total_requested() == 0 {
        if !cli.quiet {
            output::info(&format!("All devices in {} are already registered", group));
        }
        return Ok(false);
    }

    if cli.is_interactive_text() {
        print_devices(devices);
    }
    if let RegistrationCapacity::AllAtLimit = devices.capacity() {
        anyhow::bail!("Every device class in {} has reached its registration limit", group);
    }

    if confirm && cli.format == OutputFormat::Text {
        let count = if portal.all_devices {
            devices.all_devices().len()
        } else {
            devices.registrable().len()
        };
        let confirmed = Confirm::new()
            .with_prompt(format!("Register {} device(s) for {}?", count, group))
            .default(true)
            .interact()?;
        if !confirmed {
            println!("Cancelled");
            return Ok(false);
        }
    }

    let registration = provisioning.publish_devices(group, portal.all_devices).await?;
    save_profiles(&registration, &portal.profiles_out, cli)?;
    if !cli.quiet {
        output::success(&format!("Devices registered for {}", group));
    }
    Ok(true)
}

fn save_profiles(registration: &DeviceRegistration, path: &Path, cli: &Cli) -> anyhow::Result<()> {
    let Some(bundle) = registration.decode_profiles()? else {
        return Ok(());
    };

    std::fs::write(path, bundle)?;
    if !cli.quiet {
        println!(
            "  Provisioning profiles: {}",
            style(path.display()).cyan()
        );
    }
    Ok(())
}

fn class_label(class: DeviceClass) -> &'static str {
    match class {
        DeviceClass::Iphones => "iPhone",
        DeviceClass::Ipads => "iPad",
        DeviceClass::Ipods => "iPod",
        DeviceClass::Watches => "Apple Watch",
    }
}

fn print_availability(availability: &AvailabilityOfDevices) {
    println!("{}", output::header("Device registration capacity"));
    println!();
    for class in DeviceClass::ALL {
        let capacity = availability.get(class);
        println!(
            "{}",
            output::key_value(
                class_label(class),
                &format!(
                    "{} available ({} of {} registered)",
                    capacity.available, capacity.registered, capacity.maximum
                ),
            )
        );
    }
}

fn print_devices(devices: &DevicesToBeRegistered) {
    println!("{}", output::header("Devices to register"));
    for class in DeviceClass::ALL {
        let list = devices.devices(class);
        if list.is_empty() {
            continue;
        }
        let suffix = if devices.is_at_limit(class) {
            style(" (limit reached)").yellow().to_string()
        } else {
            String::new()
        };
        println!("  {}{}", style(class_label(class)).bold(), suffix);
        for device in list {
            println!("    {} {}", device.device_name, style(&device.udid).dim());
        }
    }
    println!();
}
