pub mod cli;
pub mod config;
pub mod dns;
pub mod manager;
pub mod network;
pub mod probe;
pub mod utils;
pub mod version;

pub use config::*;
pub use dns::*;
pub use manager::*;
pub use network::*;
pub use probe::*;
pub use utils::*;
pub use version::*;
