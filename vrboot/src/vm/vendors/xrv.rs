//! Cisco IOS XRv.
//!
//! The day-0 configuration is handed to the router on a CD-ROM built
//! before boot; the router applies it on its own (cvac) and reports each
//! file on the console.

use std::fs;
use std::path::PathBuf;
use std::time::Instant;

use log::{debug, info, warn};
use secrecy::ExposeSecret;

use crate::console::{CliPrompt, ConsoleSession, XRV_PREFIX};
use crate::error::{Result, VmError};
use crate::telnet::TelnetConnection;
use crate::vm::config::VmConfig;
use crate::vm::qemu;
use crate::vm::readiness::{CvacWatcher, ReadyMarker};
use crate::vm::router::{VmContext, VmVariant};

/// Name of the router configuration file on the CD-ROM.
pub const ROUTER_CONFIG: &str = "iosxr_config.txt";

/// Name of the admin configuration file on the CD-ROM.
pub const ROUTER_CONFIG_ADMIN: &str = "iosxr_config_admin.txt";

/// Where the day-0 files are staged and where the startup configuration
/// is looked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XrvPaths {
    /// Folder holding the day-0 files.
    pub config_dir: PathBuf,

    /// ISO image built from `config_dir`.
    pub iso: PathBuf,

    /// Optional configuration applied once the router is up.
    pub startup_config: PathBuf,
}

impl Default for XrvPaths {
    fn default() -> Self {
        Self {
            config_dir: PathBuf::from("/router-config"),
            iso: PathBuf::from("/router-config.iso"),
            startup_config: PathBuf::from("/config/startup-config.cfg"),
        }
    }
}

/// IOS XRv router model.
#[derive(Debug, Default)]
pub struct Xrv {
    paths: XrvPaths,
    ready: ReadyMarker,
    console: Option<TelnetConnection>,
}

impl Xrv {
    /// Create the model with the default paths and boot marker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the file locations.
    pub fn with_paths(mut self, paths: XrvPaths) -> Self {
        self.paths = paths;
        self
    }

    /// Replace the line that marks the end of the boot.
    pub fn with_ready_marker(mut self, ready: ReadyMarker) -> Self {
        self.ready = ready;
        self
    }

    /// Get the file locations.
    pub fn paths(&self) -> &XrvPaths {
        &self.paths
    }
}

/// Day-0 router configuration.
pub fn router_config(config: &VmConfig) -> String {
    [
        format!("hostname {}", config.hostname),
        "interface MgmtEth0/0/CPU0/0".into(),
        format!("    ipv4 address {}", config.mgmt_cidr()),
        "    no shutdown".into(),
        "!".into(),
        "!".into(),
        "xml agent tty".into(),
        "    iteration off".into(),
        "!".into(),
        "netconf agent tty".into(),
        "!".into(),
        "netconf-yang agent".into(),
        "    ssh".into(),
        "!".into(),
        "ssh server v2".into(),
        "ssh server netconf port 830".into(),
        "ssh server vrf default".into(),
        "end".into(),
    ]
    .join("\n")
}

/// Day-0 admin configuration: the root-system user.
pub fn admin_config(config: &VmConfig) -> String {
    [
        "!! IOS XR Admin Configuration".to_string(),
        format!("username {}", config.username),
        "    group root-system".into(),
        format!("    secret 0 {}", config.password.expose_secret()),
        "!".into(),
        "end".into(),
    ]
    .join("\n")
}

impl VmVariant for Xrv {
    fn name(&self) -> &str {
        "xrv"
    }

    fn boot_args(&self, ctx: &VmContext<'_>) -> Vec<String> {
        let mut args = qemu::base_args(ctx.config(), qemu::DEFAULT_NIC, qemu::kvm_available());
        args.push("-drive".into());
        args.push(format!(
            "file={},media=cdrom,index=2",
            self.paths.iso.display()
        ));
        args
    }

    fn pre_start(&mut self, ctx: &VmContext<'_>) -> Result<()> {
        let config = ctx.config();
        let dir = &self.paths.config_dir;

        fs::create_dir_all(dir).map_err(VmError::Io)?;
        fs::write(dir.join(ROUTER_CONFIG), router_config(config)).map_err(VmError::Io)?;
        fs::write(dir.join(ROUTER_CONFIG_ADMIN), admin_config(config)).map_err(VmError::Io)?;
        debug!("Day-0 configuration written to {}", dir.display());

        let args = vec![
            "-l".to_string(),
            "-o".to_string(),
            self.paths.iso.display().to_string(),
            dir.display().to_string(),
        ];
        let output = ctx.runner().run("mkisofs", &args)?;
        if !output.stderr.trim().is_empty() {
            warn!("Got some error while running mkisofs: {}", output.stderr.trim());
        }
        Ok(())
    }

    fn post_start(&mut self, ctx: &VmContext<'_>) -> Result<()> {
        let config = ctx.config();
        let start = Instant::now();
        let console = match self.console.take() {
            Some(console) => console,
            None => ctx.serial_console(0)?,
        };
        let console = self.console.insert(console);

        self.ready.wait(console, config.boot_timeout)?;
        info!(
            "Router {} has finished booting, waiting for the configuration to be applied",
            config.hostname
        );

        let remaining = config
            .boot_timeout
            .map(|timeout| timeout.saturating_sub(start.elapsed()));
        CvacWatcher::new(XRV_PREFIX, [ROUTER_CONFIG, ROUTER_CONFIG_ADMIN])?
            .wait(console, remaining)?;

        let mut session =
            ConsoleSession::new(console, config.credentials(), CliPrompt::new(XRV_PREFIX)?);
        session.connect()?;
        session.generate_rsa_key()?;

        let startup = &self.paths.startup_config;
        if startup.is_file() {
            info!("Applying startup config {}", startup.display());
            let text = fs::read_to_string(startup).map_err(VmError::Io)?;
            let lines: Vec<&str> = text.lines().collect();
            session.configure_exclusive(&lines)?;
        } else {
            info!("No startup config found at {}", startup.display());
        }

        session.disconnect()?;
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
