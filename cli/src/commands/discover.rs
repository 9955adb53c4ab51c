//! Discover command implementation.

use std::collections::HashSet;
use std::time::Duration;

use clipmesh_core::discovery::{DiscoveryEvent, DiscoveryProvider, MdnsDiscovery};
use clipmesh_core::Config;

/// Browse for devices and print them as they appear.
pub async fn discover(config: &Config, seconds: u64) -> anyhow::Result<()> {
    let provider = MdnsDiscovery::new(&config.service_type, None)?;
    let mut events = provider.browse()?;

    println!("\x1b[2mBrowsing {} for {}s...\x1b[0m\n", config.service_type, seconds);

    let deadline = tokio::time::sleep(Duration::from_secs(seconds));
    tokio::pin!(deadline);
    let mut seen = HashSet::new();

    loop {
        tokio::select! {
            _ = &mut deadline => break,
            event = events.recv() => match event {
                Some(DiscoveryEvent::DeviceAdded(device)) => {
                    if seen.insert(device.clone()) {
                        println!("\x1b[1;32m⬤\x1b[0m \x1b[1m{}\x1b[0m {}", device.display_name, device.socket_addr());
                        if let Some(fp) = &device.fingerprint {
                            println!("    fingerprint {}", fp);
                        }
                    }
                }
                Some(DiscoveryEvent::DeviceRemoved(device)) => {
                    if seen.remove(&device) {
                        println!("\x1b[1;31m⬤\x1b[0m {} went away", device.display_name);
                    }
                }
                None => break,
            },
        }
    }

    if let Err(e) = provider.stop_browsing() {
        tracing::debug!("stop browsing: {}", e);
    }
    println!("\n{} device(s) found", seen.len());
    Ok(())
}
