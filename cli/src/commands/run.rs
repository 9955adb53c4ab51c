//! Run command implementation.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clipmesh_core::auth::{AcceptAll, FileTrustStore, JoinApprover};
use clipmesh_core::clipboard::{self, ClipboardManager};
use clipmesh_core::config::DiscoveryBackend;
use clipmesh_core::discovery;
use clipmesh_core::protocol::constants::CLIPBOARD_POLL_INTERVAL_MS;
use clipmesh_core::transport::TcpTransport;
use clipmesh_core::{
    Collaborators, Config, Coordinator, Device, Error, GroupEvent, LocalIdentity, UpdateOrigin,
};
use tokio::sync::broadcast::error::RecvError;

use crate::prompt::PromptApprover;
use crate::ui::{format_preview, print_banner};

#[derive(Debug, Default)]
pub struct RunOptions {
    pub peers: Vec<SocketAddr>,
    pub accept_unknown: bool,
    pub no_discovery: bool,
}

/// Run a clipmesh node until Ctrl+C.
pub async fn run_service(device_name: String, mut config: Config, options: RunOptions) -> anyhow::Result<()> {
    print_banner();

    if options.no_discovery {
        config.discovery = DiscoveryBackend::None;
    }

    let identity = LocalIdentity::new(device_name);
    let trust = Arc::new(FileTrustStore::open(&config.data_dir)?);
    let approver: Arc<dyn JoinApprover> = if options.accept_unknown {
        Arc::new(AcceptAll)
    } else {
        Arc::new(PromptApprover::new())
    };
    let discovery = match discovery::from_config(&config, &identity) {
        Ok(provider) => provider,
        Err(e) => {
            eprintln!("\x1b[1;33m!\x1b[0m Discovery unavailable ({}), manual peers only", e);
            None
        }
    };

    let coordinator = Coordinator::start(
        config,
        identity,
        Collaborators {
            transport: Arc::new(TcpTransport::new()),
            discovery,
            trust,
            approver,
        },
    )
    .await?;
    let mut events = coordinator.subscribe();

    println!("\x1b[1mDevice:\x1b[0m {}", coordinator.identity().display_name);
    println!("\x1b[1mPort:\x1b[0m   {}", coordinator.local_port());
    for ip in discovery::get_local_ips() {
        println!("        {}:{}", ip, coordinator.local_port());
    }
    if let Some(e) = coordinator.discovery_degraded() {
        eprintln!("\x1b[1;33m!\x1b[0m {}", e);
    }

    for peer in options.peers {
        let device = Device::new(peer.ip(), peer.port(), peer.to_string());
        match coordinator.connect(device).await {
            Ok(()) => println!("\x1b[1;32m→\x1b[0m Connecting to {}", peer),
            Err(e) => eprintln!("\x1b[1;31m✗\x1b[0m Could not connect to {}: {}", peer, e),
        }
    }

    let (mut changes, monitor) =
        clipboard::start_monitor(Duration::from_millis(CLIPBOARD_POLL_INTERVAL_MS));
    let system_clipboard = ClipboardManager::new();

    println!("\n\x1b[1;32m✓\x1b[0m Sharing the clipboard...");
    println!("\x1b[2mPress Ctrl+C to stop.\x1b[0m\n");

    // Handle Ctrl+C gracefully
    let (tx, mut rx) = tokio::sync::mpsc::channel::<()>(1);
    ctrlc::set_handler(move || {
        let _ = tx.blocking_send(());
    })?;

    loop {
        tokio::select! {
            Some(change) = changes.recv() => {
                let preview = format_preview(&change.mime_type, &change.data);
                match coordinator.publish(change.mime_type, change.data).await {
                    Ok(Some(_)) => println!("\x1b[1;34m📤\x1b[0m Shared: \"{}\"", preview),
                    Ok(None) => {}
                    Err(e @ Error::PayloadTooLarge { .. }) => {
                        eprintln!("\x1b[1;33m!\x1b[0m Not shared: {}", e);
                    }
                    Err(e) => {
                        eprintln!("\x1b[1;31m✗\x1b[0m Error: {}", e);
                        break;
                    }
                }
            }
            event = events.recv() => match event {
                Ok(event) => handle_event(event, &system_clipboard),
                Err(RecvError::Lagged(missed)) => {
                    tracing::warn!("missed {} group events", missed);
                }
                Err(RecvError::Closed) => break,
            },
            _ = rx.recv() => {
                println!("\n\x1b[1;33mShutting down...\x1b[0m");
                break;
            }
        }
    }

    monitor.abort();
    coordinator.shutdown().await?;
    Ok(())
}

/// Handle a group event and print appropriate output.
fn handle_event(event: GroupEvent, system_clipboard: &ClipboardManager) {
    match event {
        GroupEvent::DeviceDiscovered(device) => {
            println!("\x1b[1;32m⬤\x1b[0m Found: \x1b[1m{}\x1b[0m", device);
        }
        GroupEvent::DeviceLost(device) => {
            println!("\x1b[1;31m⬤\x1b[0m Lost: {}", device);
        }
        GroupEvent::DeviceJoined(device) => {
            println!("\x1b[1;32m+\x1b[0m Joined: \x1b[1m{}\x1b[0m", device);
        }
        GroupEvent::DeviceLeft(device) => {
            println!("\x1b[1;31m-\x1b[0m Left: {}", device);
        }
        GroupEvent::ClipboardUpdated {
            mime_type,
            data,
            origin: UpdateOrigin::Remote(from),
            ..
        } => {
            println!(
                "\x1b[1;34m📋\x1b[0m Received from {}: \"{}\"",
                from.display_name,
                format_preview(&mime_type, &data)
            );
            // The monitor sees this write too; the group drops it as an echo
            if let Err(e) = system_clipboard.write(&mime_type, &data) {
                eprintln!("\x1b[1;31m✗\x1b[0m Could not set clipboard: {}", e);
            }
        }
        GroupEvent::ClipboardUpdated { .. } => {}
        GroupEvent::AuthenticationFailed { device, cause } => {
            eprintln!("\x1b[1;31m✗\x1b[0m {} was not admitted: {}", device, cause);
        }
        GroupEvent::DiscoveryDegraded(e) => {
            eprintln!("\x1b[1;33m!\x1b[0m {}", e);
        }
    }
}
