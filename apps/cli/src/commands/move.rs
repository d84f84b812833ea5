//! 移动命令
//!
//! 发送 RPDO1 运动指令；可选保持连接，让保活线程持续重发。

use anyhow::Result;
use clap::Args;
use electrak_driver::ActuatorSession;
use electrak_protocol::Direction;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use crate::utils::{self, spaced_hex};

/// 移动命令参数
#[derive(Args, Debug, Clone)]
pub struct MoveCommand {
    /// 方向：raise（伸出）或 lower（缩回到 0 mm）
    pub direction: Direction,

    /// 目标位置（mm），lower 时忽略
    #[arg(short, long, default_value_t = 0)]
    pub position: u32,

    /// 速度（0..=1000）
    #[arg(short, long, default_value_t = 200)]
    pub speed: u16,

    /// 加速度（超过 255 时按配置的溢出策略处理）
    #[arg(short, long, default_value_t = 100)]
    pub accel: u32,

    /// 发送后保持连接的时间（毫秒），期间保活线程重发指令；Ctrl+C 提前停止
    #[arg(long, default_value_t = 0)]
    pub hold_ms: u64,
}

impl MoveCommand {
    /// 执行移动
    pub fn execute(&self, session: &ActuatorSession, interrupted: &AtomicBool) -> Result<()> {
        let summary = session.move_to(self.direction, self.position, self.speed, self.accel)?;
        println!(
            "📡 {} → {} mm (speed {}, accel {})",
            summary.command.direction,
            summary.command.position_mm,
            summary.command.speed,
            summary.command.acceleration
        );
        println!("   RPDO1: {}", spaced_hex(summary.frame.bytes()));

        if self.hold_ms > 0 {
            println!("⏳ 保持 {} ms（Ctrl+C 停止）...", self.hold_ms);
            if !utils::wait_unless_interrupted(Duration::from_millis(self.hold_ms), interrupted) {
                let frame = session.stop()?;
                println!("🛑 已停止: {}", spaced_hex(frame.bytes()));
            }
        }

        Ok(())
    }
}
