//! 运行模式
//!
//! - One-shot：每条命令独立完成 连接 → 操作 → 断开
//! - REPL：交互式 Shell，连接在命令之间保持，心跳与保活持续运行

pub mod oneshot;
pub mod repl;
