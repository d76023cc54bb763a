pub mod pools;
pub mod resolver;
pub mod system;
pub mod user;
pub mod watcher;

pub use pools::{StockPoolRegistry, SymbolSource};
pub use resolver::{ConfigResolver, EffectiveUserConfig};
pub use system::{SystemConfig, SystemDefaults};
pub use user::{UserConfig, UsersConfig};
