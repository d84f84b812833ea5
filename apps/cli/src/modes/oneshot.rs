//! One-shot 模式
//!
//! 每个命令独立执行：
//! 1. 读取配置
//! 2. 连接执行器（NMT 启动流程）
//! 3. 执行操作
//! 4. 断开连接（停止心跳与保活，关闭适配器）
//!
//! Ctrl+C 设置中断标志；长时间运行的命令据此提前结束，会话随后正常断开。

use anyhow::{Context, Result};
use electrak_driver::{ActuatorBuilder, ActuatorSession};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::info;

use crate::commands::{
    CliConfig, DumpCommand, FeedbackCommand, MoveCommand, PersistCommand, ProvisionCommand,
    ReadCommand, StatusCommand, WriteCommand,
};
use crate::utils::spaced_hex;

/// 连接执行器
///
/// 未配置通道时直接报错，不尝试打开任何设备。
pub fn connect(config: &CliConfig) -> Result<ActuatorSession> {
    let interface = config.interface.as_deref().ok_or_else(|| {
        anyhow::anyhow!(
            "未指定 CAN 通道：使用 --interface 或 `electrak-cli config set --interface <CHANNEL>`"
        )
    })?;

    println!(
        "⏳ 连接到执行器（{}，{}，节点 {}）...",
        interface, config.driver_type, config.driver.node_id
    );
    let session = ActuatorBuilder::new()
        .interface(interface)
        .driver_type(config.driver_type)
        .config(config.driver.clone())
        .build()
        .with_context(|| format!("连接 {} 失败", interface))?;
    println!("✅ 已连接");
    Ok(session)
}

/// One-shot 模式
pub struct OneShotMode {
    config: CliConfig,
    interrupted: Arc<AtomicBool>,
}

impl OneShotMode {
    /// 创建实例并安装 Ctrl+C 处理
    pub fn new(config: CliConfig) -> Result<Self> {
        let interrupted = Arc::new(AtomicBool::new(false));
        let flag = interrupted.clone();
        ctrlc::set_handler(move || {
            eprintln!("\n🛑 收到 Ctrl+C，正在断开...");
            flag.store(true, Ordering::SeqCst);
        })
        .context("安装 Ctrl+C 处理失败")?;

        Ok(Self {
            config,
            interrupted,
        })
    }

    /// 连接、执行、断开
    fn with_session<F>(&self, action: F) -> Result<()>
    where
        F: FnOnce(&ActuatorSession, &AtomicBool) -> Result<()>,
    {
        let session = connect(&self.config)?;
        let result = if self.interrupted.load(Ordering::SeqCst) {
            Err(anyhow::anyhow!("已中断"))
        } else {
            action(&session, &self.interrupted)
        };

        session.disconnect();
        info!("Session closed");
        println!("✅ 已断开");
        result
    }

    /// 移动
    pub fn move_to(&self, args: MoveCommand) -> Result<()> {
        self.with_session(|session, interrupted| args.execute(session, interrupted))
    }

    /// 停止
    pub fn stop(&self) -> Result<()> {
        self.with_session(|session, _| {
            let frame = session.stop()?;
            println!("🛑 停止帧: {}", spaced_hex(frame.bytes()));
            Ok(())
        })
    }

    pub fn read(&self, args: ReadCommand) -> Result<()> {
        self.with_session(|session, _| args.execute(session))
    }

    pub fn write(&self, args: WriteCommand) -> Result<()> {
        self.with_session(|session, _| args.execute(session))
    }

    /// 保存参数（连接前确认）
    pub fn persist(&self, args: PersistCommand) -> Result<()> {
        if !args.confirmed()? {
            println!("❌ 操作已取消");
            return Ok(());
        }
        self.with_session(|session, _| args.execute(session))
    }

    /// 出厂配置（连接前确认）
    pub fn provision(&self, args: ProvisionCommand) -> Result<()> {
        if !args.confirmed()? {
            println!("❌ 操作已取消");
            return Ok(());
        }
        self.with_session(|session, _| args.execute(session))
    }

    pub fn dump(&self, args: DumpCommand) -> Result<()> {
        self.with_session(|session, _| args.execute(session))
    }

    pub fn status(&self, args: StatusCommand) -> Result<()> {
        self.with_session(|session, _| args.execute(session))
    }

    /// 打印反馈帧，直到数量、超时或 Ctrl+C
    pub fn feedback(&self, args: FeedbackCommand) -> Result<()> {
        self.with_session(|session, interrupted| args.execute(session, interrupted))
    }
}
