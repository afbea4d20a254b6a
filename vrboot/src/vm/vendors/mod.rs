//! Router models.

mod xrv;
mod xrv9k;

pub use xrv::{Xrv, XrvPaths};
pub use xrv9k::Xrv9k;
