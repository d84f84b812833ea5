//! 命令定义和实现

pub mod config;
pub mod r#move;
pub mod parameter;
pub mod status;

pub use config::{CliConfig, ConfigCommand, ConfigOverrides};
pub use r#move::MoveCommand;
pub use parameter::{DumpCommand, PersistCommand, ProvisionCommand, ReadCommand, WriteCommand};
pub use status::{FeedbackCommand, StatusCommand};
