//! VM lifecycle.
//!
//! A [`VirtualRouter`] owns the QEMU process of one emulated router and
//! runs the fixed sequence `pre_start → spawn → post_start` on start and
//! `pre_stop → kill → post_stop` on stop. Everything specific to a router
//! model lives behind the [`VmVariant`] trait; the models shipped with the
//! crate are in [`vendors`].
//!
//! # Example
//!
//! ```rust,no_run
//! use vrboot::vm::{SystemRunner, VirtualRouter, VmConfig};
//! use vrboot::vm::vendors::Xrv9k;
//!
//! fn main() -> vrboot::Result<()> {
//!     let config = VmConfig {
//!         disk_image: "/xrv9k.qcow2".into(),
//!         ram: 16384,
//!         vcpus: 2,
//!         ..VmConfig::default()
//!     };
//!
//!     let mut router = VirtualRouter::new(Xrv9k::new(), config, SystemRunner);
//!     router.start()?;
//!     // ...
//!     router.stop()?;
//!     Ok(())
//! }
//! ```

pub(crate) mod config;
pub(crate) mod process;
pub mod qemu;
pub(crate) mod readiness;
pub(crate) mod router;
pub mod vendors;

pub use config::{HostForward, Protocol, VmConfig};
pub use process::{CommandOutput, CommandRunner, RunningProcess, SystemRunner, VmProcess};
pub use readiness::{CISCO_EXPORT_NOTICE, CvacEvent, CvacWatcher, ReadyMarker};
pub use router::{VirtualRouter, VmContext, VmVariant};
