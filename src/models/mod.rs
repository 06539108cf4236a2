mod action;
mod cluster;
mod device;
mod fabric;
mod ledger;
mod responses;
mod switch_config;

pub use action::*;
pub use cluster::*;
pub use device::*;
pub use fabric::*;
pub use ledger::*;
pub use responses::*;
pub use switch_config::*;
