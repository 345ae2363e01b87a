//! CLI entry point (C8): thin `clap` wiring over the core library.
//!
//! Subcommands, flags, and the index → id → name receiver-selector
//! resolution order are grounded on
//! `original_source/opendrop/cli.py::AirDropCli`. Replaces the teacher's
//! `eframe`/`iced` GUI entry point entirely (SPEC_FULL §1 scope is a
//! headless protocol core, not a desktop app).

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use opendrop_rs::client::{AirDropClient, TransferRequest};
use opendrop_rs::discovery::{self, Advertiser, ServiceRecord};
use opendrop_rs::identity::{Identity, IdentityOverrides};
use opendrop_rs::report::{self, DiscoveryReportEntry};
use opendrop_rs::server::Server;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::{error, info, warn};

const DEFAULT_PORT: u16 = 8770;
const RESOLUTION_WORKERS: usize = 8;

#[derive(Parser)]
#[command(name = "opendrop", about = "An interoperable AirDrop peer")]
struct Cli {
    #[command(subcommand)]
    action: Action,

    /// Computer name (displayed in the sharing pane).
    #[arg(short = 'n', long, global = true)]
    name: Option<String>,

    /// Computer model (displayed in the sharing pane).
    #[arg(short = 'm', long, global = true)]
    model: Option<String>,

    /// Which peer-to-peer interface to use.
    #[arg(short = 'i', long, global = true, default_value = "awdl0")]
    interface: String,
}

#[derive(Subcommand)]
enum Action {
    /// Advertise this host and accept incoming transfers.
    Receive,
    /// Browse for nearby receivers and write a discovery report.
    Find,
    /// Send a file or URL to a previously discovered receiver.
    Send {
        /// File to send, or a URL when `--url` is set.
        #[arg(short = 'f', long)]
        file: String,
        /// Treat `--file` as a URL rather than a local path.
        #[arg(short = 'u', long)]
        url: bool,
        /// Receiver selector: list index, 12-hex id, or computer name.
        #[arg(short = 'r', long)]
        receiver: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    opendrop_rs::logging::setup_logging();

    let cli = Cli::parse();
    let identity = Identity::load_or_create(IdentityOverrides {
        computer_name: cli.name,
        computer_model: cli.model,
        interface_name: Some(cli.interface),
        service_id: None,
    })
    .context("failed to establish identity")?;

    match cli.action {
        Action::Receive => run_receive(identity).await,
        Action::Find => run_find(identity).await,
        Action::Send { file, url, receiver } => run_send(identity, file, url, receiver).await,
    }
}

async fn run_receive(identity: Identity) -> Result<()> {
    let interface_address = opendrop_rs::net::ipv6_address_of(&identity.interface_name)
        .context("interface has no usable IPv6 address")?;

    let identity = Arc::new(identity);
    let server = Server::bind(identity.clone(), DEFAULT_PORT)
        .await
        .context("failed to bind HTTPS server")?;
    let port = server.port();

    let advertiser = Advertiser::start(&identity, interface_address, port)
        .context("failed to advertise mDNS service")?;

    info!(
        "receiving as {} ({}) on [{}]:{}",
        identity.computer_name, identity.service_id, interface_address, port
    );

    let result = tokio::select! {
        res = server.serve() => res.map_err(Into::into),
        _ = tokio::signal::ctrl_c() => {
            info!("shutting down");
            Ok(())
        }
    };

    if let Err(e) = advertiser.stop() {
        warn!("error while unregistering mDNS service: {}", e);
    }
    result
}

async fn run_find(identity: Identity) -> Result<()> {
    opendrop_rs::net::ipv6_address_of(&identity.interface_name)
        .context("interface has no usable IPv6 address")?;

    let discovered: Arc<Mutex<Vec<ServiceRecord>>> = Arc::new(Mutex::new(Vec::new()));
    let identity = Arc::new(identity);

    info!("looking for receivers. Press Ctrl+C to stop ...");

    let handle = {
        let discovered = discovered.clone();
        let identity = identity.clone();
        discovery::browse(RESOLUTION_WORKERS, move |mut record: ServiceRecord| {
            let discovered = discovered.clone();
            let identity = identity.clone();
            async move {
                record.name = resolve_name(&identity, &record).await;
                let index = {
                    let mut table = discovered.lock().unwrap();
                    table.push(record.clone());
                    table.len() - 1
                };
                if record.discoverable() {
                    info!(
                        "found index {} id {} name {:?} hostname {} address {} port {}",
                        index, record.service_id, record.name, record.hostname, record.address, record.port
                    );
                } else {
                    info!("receiver id {} is not discoverable", record.service_id);
                }
            }
        })
        .await
        .context("failed to start mDNS browse")?
    };

    tokio::signal::ctrl_c().await.ok();
    handle.stop().await.ok();

    let entries: Vec<DiscoveryReportEntry> = discovered
        .lock()
        .unwrap()
        .iter()
        .map(DiscoveryReportEntry::from)
        .collect();
    let report_path = identity.discovery_report_path();
    report::write(&report_path, &entries).context("failed to write discovery report")?;
    info!("saved {} receiver(s) to {:?}", entries.len(), report_path);

    Ok(())
}

async fn resolve_name(identity: &Identity, record: &ServiceRecord) -> Option<String> {
    if record.flags & opendrop_rs::flags::SUPPORTS_DISCOVER_MAYBE == 0 {
        return None;
    }
    let mut client = AirDropClient::connect(identity, record.address, record.port)
        .await
        .ok()?;
    client.send_discover(identity).await
}

async fn run_send(identity: Identity, file: String, is_url: bool, receiver: String) -> Result<()> {
    let report_path = identity.discovery_report_path();
    if !report_path.exists() {
        bail!("no discovery report exists, please run `find` first");
    }
    report::warn_if_stale(&report_path);

    let entries = report::read(&report_path).context("failed to read discovery report")?;
    let target = report::resolve_selector(&entries, &receiver)
        .with_context(|| format!("receiver {receiver:?} not found (check -r/--receiver or run `find` again)"))?
        .clone();

    let mut client = AirDropClient::connect(&identity, target.address, target.port)
        .await
        .context("failed to connect to receiver")?;

    let request = if is_url {
        TransferRequest::Urls(vec![file.clone()])
    } else {
        let path = PathBuf::from(&file);
        if !path.is_file() {
            bail!("file {:?} not found", path);
        }
        TransferRequest::Files {
            paths: vec![path],
            icon: None,
        }
    };

    info!("asking receiver to accept ...");
    if !client.send_ask(&identity, &request).await? {
        warn!("receiver declined");
        return Ok(());
    }
    info!("receiver accepted");

    if is_url {
        info!("URL sent, nothing to upload");
        return Ok(());
    }

    info!("uploading file ...");
    let paths = match &request {
        TransferRequest::Files { paths, .. } => paths.clone(),
        TransferRequest::Urls(_) => unreachable!(),
    };
    match client.send_upload(&paths).await {
        Ok(true) => info!("upload successful"),
        Ok(false) | Err(_) => error!("upload failed"),
    }

    Ok(())
}
