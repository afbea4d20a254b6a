//! QEMU command line shared by every router.

use std::path::Path;

use rand::Rng;

use super::config::VmConfig;

/// QEMU binary.
pub const QEMU_BINARY: &str = "qemu-system-x86_64";

/// NIC model of the management interface, unless a vendor overrides it.
pub const DEFAULT_NIC: &str = "e1000";

/// Folder served over TFTP on the management network.
pub const TFTP_FOLDER: &str = "/tftpboot";

/// Whether hardware acceleration is usable.
pub fn kvm_available() -> bool {
    Path::new("/dev/kvm").exists()
}

/// A MAC address in the QEMU OUI with random middle octets.
pub fn gen_mac(last_octet: u8) -> String {
    let mut rng = rand::thread_rng();
    format!(
        "52:54:00:{:02x}:{:02x}:{:02x}",
        rng.r#gen::<u8>(),
        rng.r#gen::<u8>(),
        last_octet
    )
}

/// Base command line, program first: memory, CPUs, monitor, disk,
/// management NIC with its host forwards, and the serial consoles.
pub fn base_args(config: &VmConfig, mgmt_nic: &str, kvm: bool) -> Vec<String> {
    let mut args: Vec<String> = vec![QEMU_BINARY.into()];
    if kvm {
        args.push("-enable-kvm".into());
    }

    let mut push = |flag: &str, value: String| {
        args.push(flag.into());
        args.push(value);
    };

    push("-display", "none".into());
    push("-machine", "pc".into());
    push("-m", config.ram.to_string());
    push("-cpu", "host".into());
    push("-smp", format!("cores={},threads=1,sockets=1", config.vcpus));
    push(
        "-monitor",
        format!("tcp:0.0.0.0:{},server,nowait", config.monitor_port),
    );
    push("-drive", format!("if=ide,file={}", config.disk_image.display()));

    push(
        "-device",
        format!("{},netdev=mgmt,mac={}", mgmt_nic, gen_mac(0)),
    );
    let forwards: String = config
        .forwarded_ports
        .iter()
        .map(|f| {
            format!(
                ",hostfwd={}::{}-{}:{}",
                f.protocol.as_str(),
                f.host_port,
                config.mgmt_address,
                f.guest_port
            )
        })
        .collect();
    push(
        "-netdev",
        format!(
            "user,id=mgmt,net={},tftp={}{}",
            config.mgmt_network(),
            TFTP_FOLDER,
            forwards
        ),
    );

    for i in 0..config.serial_console_count {
        let port = usize::from(config.serial_base_port) + i;
        push("-serial", format!("telnet:0.0.0.0:{},server,nowait", port));
    }

    args
}
