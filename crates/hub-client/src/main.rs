//! `hubctl`: command-line front end for a control hub.
//!
//! # Usage
//!
//! ```text
//! hubctl [OPTIONS] <COMMAND>
//!
//! Commands:
//!   discover        Broadcast probes and list hubs that answer
//!   sync            Fetch the configuration, list activities and devices
//!   state           Print the state digest
//!   start-activity  Start an activity by label or id
//!   end-activity    End the running activity
//!   change-channel  Tune to a channel (optionally by keying digits)
//!   press           Press one function of a device
//!   hold            Hold one function of a device for a while
//!
//! Options:
//!   --host      <HOST>  Hub address
//!   --remote-id <ID>    Hub remote id
//!   --config    <PATH>  Config file [default: platform config dir]
//! ```
//!
//! # Environment variable overrides
//!
//! | Variable        | Flag          |
//! |-----------------|---------------|
//! | `HUB_HOST`      | `--host`      |
//! | `HUB_REMOTE_ID` | `--remote-id` |
//! | `HUB_CONFIG`    | `--config`    |
//!
//! The connection target comes from the flags, else the config file, else
//! the first hub that answers discovery.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use hub_client::application::HubSession;
use hub_client::domain::config::{default_config_path, load_config, save_config};
use hub_client::domain::{ClientConfig, HubEndpoint};
use hub_client::infrastructure::DiscoveryService;
use hub_core::domain::hub::{Controllable, Function, HubConfiguration};
use hub_core::{DeviceIdentity, DiscoveredPeer};

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Control a home-entertainment hub from the command line.
#[derive(Debug, Parser)]
#[command(name = "hubctl", about = "Discover and control a home-entertainment hub", version)]
struct Cli {
    /// Hub hostname or IP address.  Overrides the config file.
    #[arg(long, global = true, env = "HUB_HOST")]
    host: Option<String>,

    /// Hub remote id, sent as `hubId` when connecting.
    #[arg(long, global = true, env = "HUB_REMOTE_ID")]
    remote_id: Option<String>,

    /// Path to the TOML config file.
    #[arg(long, global = true, env = "HUB_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Broadcast discovery probes and print every hub that answers.
    Discover {
        /// How long to listen, in seconds.
        #[arg(long, default_value_t = 10)]
        timeout_secs: u64,

        /// Store the first hub found in the config file.
        #[arg(long)]
        save: bool,
    },
    /// Sync the configuration and list activities and devices.
    Sync {
        /// Also write the configuration as JSON to this file.
        #[arg(long)]
        save: Option<PathBuf>,
    },
    /// Print the current state digest.
    State,
    /// Start an activity and wait for it to finish.
    StartActivity {
        /// Activity label (case-insensitive) or id.
        activity: String,
    },
    /// End the running activity.
    EndActivity,
    /// Tune to a channel.
    ChangeChannel {
        channel: String,

        /// Key the digits in on this device's number pad instead of sending
        /// one channel command.
        #[arg(long)]
        keypad: Option<String>,
    },
    /// Press one function of a device.
    Press { device: String, function: String },
    /// Hold one function of a device down.
    Hold {
        device: String,
        function: String,

        /// How long to hold, in milliseconds.
        #[arg(long, default_value_t = 1000)]
        millis: u64,
    },
}

impl Cli {
    fn config_path(&self) -> anyhow::Result<PathBuf> {
        match &self.config {
            Some(path) => Ok(path.clone()),
            None => default_config_path().context("cannot locate the config directory"),
        }
    }

    /// Flags and environment variables win over the config file.
    fn apply_overrides(&self, config: &mut ClientConfig) {
        if let Some(host) = &self.host {
            config.hub.host = Some(host.clone());
        }
        if let Some(remote_id) = &self.remote_id {
            config.hub.remote_id = Some(remote_id.clone());
        }
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // `RUST_LOG` controls verbosity; `info` when unset or invalid.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config_path = cli.config_path()?;
    let mut config = load_config(&config_path)
        .with_context(|| format!("failed to load {}", config_path.display()))?;
    cli.apply_overrides(&mut config);

    if let Command::Discover { timeout_secs, save } = &cli.command {
        return discover(&config, Duration::from_secs(*timeout_secs), save.then_some(&config_path))
            .await;
    }

    let endpoint = resolve_endpoint(&config).await?;
    info!("connecting to {}", endpoint.url());
    let session = HubSession::connect(&endpoint, DeviceIdentity::local_default(), config.session)
        .await
        .with_context(|| format!("failed to connect to hub at {}", endpoint.host))?;

    let outcome = run(&session, cli.command).await;
    session.disconnect().await;
    outcome
}

async fn run(session: &HubSession, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Discover { .. } => Ok(()),
        Command::Sync { save } => {
            let hub = session.sync_configuration().await?;
            print_configuration(&hub);
            if let Some(path) = save {
                std::fs::write(&path, hub.to_json()?)
                    .with_context(|| format!("failed to write {}", path.display()))?;
                info!("configuration saved to {}", path.display());
            }
            Ok(())
        }
        Command::State => {
            let digest = session.update_state().await?;
            println!(
                "activity: {}",
                digest.running_activity_id().unwrap_or("none")
            );
            if let Some(version) = &digest.hub_sw_version {
                println!("hub software: {version}");
            }
            Ok(())
        }
        Command::StartActivity { activity } => {
            session.sync_configuration().await?;
            let activity = session.find_activity(&activity)?;
            println!("starting {}", activity.label);
            session
                .start_activity(&activity, |p| println!("{:>3.0}%", p.fraction() * 100.0))
                .await?;
            println!("done");
            Ok(())
        }
        Command::EndActivity => {
            session.sync_configuration().await?;
            session
                .end_activity(|p| println!("{:>3.0}%", p.fraction() * 100.0))
                .await?;
            println!("done");
            Ok(())
        }
        Command::ChangeChannel {
            channel,
            keypad: None,
        } => {
            session.change_channel(&channel).await?;
            Ok(())
        }
        Command::ChangeChannel {
            channel,
            keypad: Some(device),
        } => {
            let hub = session.sync_configuration().await?;
            let digits = keypad_functions(&hub, &device, &channel)?;
            session.press_buttons(Duration::ZERO, &digits).await?;
            Ok(())
        }
        Command::Press { device, function } => {
            let hub = session.sync_configuration().await?;
            let function = lookup_function(&hub, &device, &function)?;
            session.press_button(&function).await?;
            Ok(())
        }
        Command::Hold {
            device,
            function,
            millis,
        } => {
            let hub = session.sync_configuration().await?;
            let function = lookup_function(&hub, &device, &function)?;
            session.start_holding(&function)?;
            tokio::time::sleep(Duration::from_millis(millis)).await;
            session.stop_holding();
            Ok(())
        }
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn lookup_function(hub: &HubConfiguration, device: &str, function: &str) -> anyhow::Result<Function> {
    let device = hub
        .find_device(device)
        .ok_or_else(|| anyhow!("unknown device: {device}"))?;
    device
        .function(function)
        .cloned()
        .ok_or_else(|| anyhow!("device {} has no function {function}", device.label))
}

fn keypad_functions(hub: &HubConfiguration, device: &str, channel: &str) -> anyhow::Result<Vec<Function>> {
    let device = hub
        .find_device(device)
        .ok_or_else(|| anyhow!("unknown device: {device}"))?;
    device
        .digit_functions(channel)
        .ok_or_else(|| anyhow!("device {} cannot key in {channel:?}", device.label))
}

fn print_configuration(hub: &HubConfiguration) {
    println!("activities:");
    for activity in &hub.activities {
        println!("  {:>10}  {}", activity.id, activity.label);
    }
    println!("devices:");
    for device in &hub.devices {
        println!("  {:>10}  {} ({} {})", device.id, device.label, device.manufacturer, device.model);
    }
}

fn print_peer(peer: &DiscoveredPeer) {
    println!(
        "{}  {}  remoteId={}",
        peer.display_name(),
        peer.address,
        peer.remote_id.as_deref().unwrap_or("?")
    );
}

fn endpoint_for(config: &ClientConfig, peer: &DiscoveredPeer) -> Option<HubEndpoint> {
    Some(HubEndpoint {
        host: peer.address.to_string(),
        port: config.hub.port,
        domain: config.hub.domain.clone(),
        remote_id: peer.remote_id.clone()?,
    })
}

/// The configured endpoint, else the first hub that answers discovery.
async fn resolve_endpoint(config: &ClientConfig) -> anyhow::Result<HubEndpoint> {
    if let Some(endpoint) = config.hub.endpoint() {
        return Ok(endpoint);
    }
    info!("no hub configured, discovering");

    let discovery = DiscoveryService::new(config.discovery.clone());
    let mut found = discovery.subscribe();
    discovery.start().await.context("failed to start discovery")?;

    let wait = async {
        loop {
            match found.recv().await {
                Ok(peer) => match endpoint_for(config, &peer) {
                    Some(endpoint) => return Some(endpoint),
                    None => warn!("{} announced no remote id", peer.display_name()),
                },
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => return None,
            }
        }
    };
    let endpoint = tokio::time::timeout(Duration::from_secs(30), wait).await;
    discovery.stop().await;

    endpoint
        .ok()
        .flatten()
        .ok_or_else(|| anyhow!("no hub found; pass --host and --remote-id"))
}

async fn discover(
    config: &ClientConfig,
    timeout: Duration,
    save_to: Option<&PathBuf>,
) -> anyhow::Result<()> {
    let discovery = DiscoveryService::new(config.discovery.clone());
    let mut found = discovery.subscribe();
    let listening = discovery.start().await.context("failed to start discovery")?;
    info!("listening for hubs on {listening}");

    let deadline = tokio::time::sleep(timeout);
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            _ = &mut deadline => break,
            next = found.recv() => match next {
                Ok(peer) => print_peer(&peer),
                Err(RecvError::Lagged(n)) => warn!("missed {n} announcements"),
                Err(RecvError::Closed) => break,
            },
        }
    }
    discovery.stop().await;

    let peers = discovery.peers();
    if peers.is_empty() {
        println!("no hubs found");
        return Ok(());
    }

    if let Some(path) = save_to {
        let endpoint = peers
            .iter()
            .find_map(|peer| endpoint_for(config, peer))
            .ok_or_else(|| anyhow!("no discovered hub announced a remote id"))?;
        let mut saved = config.clone();
        saved.hub.host = Some(endpoint.host);
        saved.hub.remote_id = Some(endpoint.remote_id);
        save_config(path, &saved).with_context(|| format!("failed to save {}", path.display()))?;
        println!("saved to {}", path.display());
    }
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
