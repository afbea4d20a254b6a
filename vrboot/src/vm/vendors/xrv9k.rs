//! Cisco IOS XRv 9000.
//!
//! The router boots unconfigured. Once it is up, the console asks for a
//! root-system user; after that the router is logged into and configured
//! over the console.

use std::time::Duration;

use log::{debug, info};
use secrecy::ExposeSecret;

use crate::console::{CliPrompt, ConsoleSession, XRV9K_PREFIX};
use crate::error::Result;
use crate::telnet::TelnetConnection;
use crate::vm::config::VmConfig;
use crate::vm::qemu;
use crate::vm::readiness::ReadyMarker;
use crate::vm::router::{VmContext, VmVariant};

/// Timeout of each step of the root-system user dialog.
const ROOT_DIALOG_TIMEOUT: Duration = Duration::from_secs(30);

/// IOS XRv 9000 router model.
#[derive(Debug, Default)]
pub struct Xrv9k {
    ready: ReadyMarker,
    console: Option<TelnetConnection>,
}

impl Xrv9k {
    /// Create the model with the default boot marker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the line that marks the end of the boot.
    pub fn with_ready_marker(mut self, ready: ReadyMarker) -> Self {
        self.ready = ready;
        self
    }
}

/// Day-0 configuration: hostname, management address, XML, NETCONF and SSH.
pub fn day0_config(config: &VmConfig) -> Vec<String> {
    vec![
        format!("hostname {}", config.hostname),
        "interface MgmtEth0/RP0/CPU0/0".into(),
        format!("ipv4 address {}", config.mgmt_cidr()),
        "no shutdown".into(),
        "exit".into(),
        "xml agent tty".into(),
        "iteration off".into(),
        "exit".into(),
        "netconf agent tty".into(),
        "exit".into(),
        "netconf-yang agent".into(),
        "ssh".into(),
        "exit".into(),
        "ssh server v2".into(),
        "ssh server netconf port 830".into(),
        "ssh server vrf default".into(),
    ]
}

/// Answer the first-boot dialog creating the root-system user.
fn create_root_user(console: &mut TelnetConnection, config: &VmConfig) -> Result<()> {
    let password = format!("{}\r", config.password.expose_secret());

    console.write("\r")?;
    console.read_until("Enter root-system username:", ROOT_DIALOG_TIMEOUT)?;
    debug!("Sending root-system username {:?}", config.username);
    console.write(&format!("{}\r", config.username))?;

    console.read_until("Enter secret:", ROOT_DIALOG_TIMEOUT)?;
    debug!("Sending ******");
    console.write(&password)?;

    console.read_until("Enter secret again:", ROOT_DIALOG_TIMEOUT)?;
    debug!("Sending ******");
    console.write(&password)?;
    Ok(())
}

impl VmVariant for Xrv9k {
    fn name(&self) -> &str {
        "xrv9k"
    }

    fn serial_consoles(&self) -> usize {
        4
    }

    fn boot_args(&self, ctx: &VmContext<'_>) -> Vec<String> {
        let mut args = qemu::base_args(ctx.config(), "virtio-net-pci", qemu::kvm_available());

        for dummy in ["ctrl-dummy", "dev-dummy"] {
            args.push("-device".into());
            args.push(format!(
                "virtio-net-pci,netdev={},id={},mac={}",
                dummy,
                dummy,
                qemu::gen_mac(0)
            ));
            args.push("-netdev".into());
            args.push(format!(
                "tap,ifname={},id={},script=no,downscript=no",
                dummy, dummy
            ));
        }

        args.extend(
            [
                "-smbios",
                "type=1,manufacturer=cisco,product=Cisco IOS XRv 9000,uuid=97fc351b-431d-4cf2-9c01-43c283faf2a3",
                "-machine",
                "smm=off",
                "-boot",
                "once=d",
            ]
            .map(String::from),
        );
        args
    }

    fn post_start(&mut self, ctx: &VmContext<'_>) -> Result<()> {
        let config = ctx.config();
        let console = match self.console.take() {
            Some(console) => console,
            None => ctx.serial_console(0)?,
        };
        let console = self.console.insert(console);

        self.ready.wait(console, config.boot_timeout)?;
        info!(
            "Router {} has finished booting, it is ready to be configured",
            config.hostname
        );

        create_root_user(console, config)?;

        let lines = day0_config(config);
        let lines: Vec<&str> = lines.iter().map(String::as_str).collect();

        let mut session =
            ConsoleSession::new(console, config.credentials(), CliPrompt::new(XRV9K_PREFIX)?);
        session.connect()?;
        session.generate_rsa_key()?;
        session.configure(&lines)?;
        session.disconnect()?;

        info!("Router {} is configured", config.hostname);
        Ok(())
    }

    fn pre_stop(&mut self, _ctx: &VmContext<'_>) -> Result<()> {
        if let Some(mut console) = self.console.take() {
            debug!("Closing connection to xr console");
            console.close()?;
        }
        Ok(())
    }
}
