//! 状态与反馈命令

use anyhow::Result;
use clap::Args;
use electrak_driver::{ActuatorSession, SleepModeOutcome};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::utils::{format_frame, spaced_hex};

/// 会话状态
#[derive(Args, Debug, Clone, Default)]
pub struct StatusCommand {
    /// 检查睡眠模式，开启时关闭它
    #[arg(long)]
    pub disable_sleep: bool,
}

impl StatusCommand {
    pub fn execute(&self, session: &ActuatorSession) -> Result<()> {
        let stats = session.liveness_stats();
        println!("节点:       {}", session.node_id());
        println!("总线:       {}", session.bus_status());
        println!("NMT:        {}", session.nmt_state());
        match session.last_command() {
            Some(frame) => println!("最后指令:   {}", spaced_hex(frame.bytes())),
            None => println!("最后指令:   (无)"),
        }
        println!(
            "心跳/保活:  {} / {}（失败 {}）",
            stats.heartbeats_sent, stats.keep_alives_sent, stats.failures
        );
        println!("待读帧:     {}", session.pending_frames());

        if self.disable_sleep {
            match session.ensure_sleep_disabled()? {
                SleepModeOutcome::AlreadyDisabled => println!("✅ 睡眠模式已关闭"),
                SleepModeOutcome::Disabled => println!("✅ 已关闭睡眠模式并重启通信"),
                SleepModeOutcome::NotPersisted => anyhow::bail!("睡眠模式关闭未生效"),
            }
        }
        Ok(())
    }
}

/// 打印执行器发出的帧
#[derive(Args, Debug, Clone)]
pub struct FeedbackCommand {
    /// 收到这么多帧后退出（0 = 不限）
    #[arg(short = 'n', long, default_value_t = 0)]
    pub count: usize,

    /// 总等待时间（毫秒）
    #[arg(short, long, default_value_t = 5000)]
    pub timeout_ms: u64,
}

impl FeedbackCommand {
    pub fn execute(&self, session: &ActuatorSession, interrupted: &AtomicBool) -> Result<()> {
        let deadline = Instant::now() + Duration::from_millis(self.timeout_ms);
        let mut received = 0usize;

        while !interrupted.load(Ordering::SeqCst) {
            let now = Instant::now();
            if now >= deadline || (self.count > 0 && received >= self.count) {
                break;
            }
            let slice = (deadline - now).min(Duration::from_millis(100));
            if let Some(frame) = session.poll_feedback(slice)? {
                received += 1;
                println!("{}", format_frame(&frame));
            }
        }

        println!("共收到 {} 帧", received);
        Ok(())
    }
}
