//! Info command implementation.

use clipmesh_core::auth::{FileTrustStore, TrustStore};
use clipmesh_core::config::DiscoveryBackend;
use clipmesh_core::Config;

/// Display device information.
pub fn show_info(device_name: String, config: &Config) -> anyhow::Result<()> {
    let trust = FileTrustStore::open(&config.data_dir)?;

    println!("\n\x1b[1mClipmesh Device Info\x1b[0m");
    println!("═══════════════════════════════════════");
    println!("\x1b[1mName:\x1b[0m        {}", device_name);
    println!("\x1b[1mPort:\x1b[0m        {}", config.port);
    println!("\x1b[1mFingerprint:\x1b[0m none (plain TCP transport)");
    println!("\x1b[1mData dir:\x1b[0m    {}", config.data_dir.display());
    let discovery = match config.discovery {
        DiscoveryBackend::Mdns => config.service_type.as_str(),
        DiscoveryBackend::None => "disabled",
    };
    println!("\x1b[1mDiscovery:\x1b[0m   {}", discovery);

    println!("\n\x1b[1mLocal IPs:\x1b[0m");
    for ip in clipmesh_core::discovery::get_local_ips() {
        println!("  • {}", ip);
    }

    let trusted = trust.trusted();
    println!("\n\x1b[1mTrusted devices:\x1b[0m {}", trusted.len());
    for fingerprint in trusted {
        println!("  • {}", fingerprint);
    }
    println!();
    Ok(())
}
