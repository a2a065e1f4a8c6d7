pub mod bus;
pub mod config;
pub mod logging;

pub use bus::{EventBus, Subscription};
pub use config::{AppPaths, ConfigWatcher, ConnectionConfig};
