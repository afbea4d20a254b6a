//! Boot an IOS XR router and keep it running until Enter is pressed.
//!
//! The VM configuration is read from a JSON file; every field is optional.
//!
//! # Usage
//!
//! ```bash
//! RUST_LOG=debug cargo run --example boot_router -- xrv9k router.json
//! ```
//!
//! with `router.json`:
//!
//! ```json
//! { "disk_image": "/xrv9k.qcow2", "ram": 16384, "hostname": "xr1",
//!   "username": "admin", "password": "admin" }
//! ```

use std::env;
use std::fs;
use std::io;

use vrboot::vm::vendors::{Xrv, Xrv9k};
use vrboot::vm::{SystemRunner, VirtualRouter, VmConfig, VmVariant};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging (set RUST_LOG=debug for verbose output)
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = env::args().skip(1).collect();
    let [model, path] = args.as_slice() else {
        eprintln!("Usage: boot_router <xrv|xrv9k> <config.json>");
        std::process::exit(1);
    };

    let config: VmConfig = serde_json::from_str(&fs::read_to_string(path)?)?;

    match model.as_str() {
        "xrv" => run(Xrv::new(), config),
        "xrv9k" => run(Xrv9k::new(), config),
        other => {
            eprintln!("Unknown router model: {}", other);
            std::process::exit(1);
        }
    }
}

fn run<V: VmVariant>(variant: V, config: VmConfig) -> Result<(), Box<dyn std::error::Error>> {
    let mut router = VirtualRouter::new(variant, config, SystemRunner);
    router.start()?;

    println!("Router is up, press Enter to stop it");
    let mut line = String::new();
    io::stdin().read_line(&mut line)?;

    router.stop()?;
    Ok(())
}
