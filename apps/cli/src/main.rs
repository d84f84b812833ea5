//! # Electrak CLI
//!
//! Command-line interface for Electrak HD actuator setup and control.
//!
//! ## 双模式架构
//!
//! ### One-shot 模式（推荐用于产线脚本）
//!
//! ```bash
//! # 配置默认通道
//! electrak-cli config set --interface can0
//!
//! # 执行操作（内部：连接 -> 操作 -> 断开）
//! electrak-cli move raise --position 100 --speed 800 --accel 200 --hold-ms 5000
//! electrak-cli provision --force
//! ```
//!
//! ### REPL 模式（推荐用于调试）
//!
//! ```bash
//! $ electrak-cli shell
//! electrak> connect can0
//! electrak> read 0x2102
//! electrak> move raise 100 800 200
//! electrak> stop
//! electrak> exit
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};
use electrak_driver::DriverType;
use std::path::PathBuf;

mod commands;
mod modes;
mod utils;
mod validation;

use commands::{
    CliConfig, ConfigCommand, ConfigOverrides, DumpCommand, FeedbackCommand, MoveCommand,
    PersistCommand, ProvisionCommand, ReadCommand, StatusCommand, WriteCommand,
};
use modes::oneshot::OneShotMode;
use modes::repl::run_repl;

/// Electrak CLI - 直线执行器命令行工具
#[derive(Parser, Debug)]
#[command(name = "electrak-cli")]
#[command(about = "Command-line interface for Electrak HD actuator setup and control", long_about = None)]
#[command(version)]
struct Cli {
    /// 配置文件路径（默认 <config_dir>/electrak/config.toml）
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// CAN 通道（覆盖配置），如 can0、/dev/ttyACM0、COM3
    #[arg(short, long, global = true)]
    interface: Option<String>,

    /// CAN 后端（覆盖配置）：auto、socketcan、slcan
    #[arg(long, global = true)]
    driver: Option<DriverType>,

    /// 执行器节点 ID（覆盖配置）
    #[arg(long, global = true)]
    node: Option<u8>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// 配置管理
    #[command(subcommand)]
    Config(ConfigCommand),

    /// 发送运动指令
    Move {
        #[command(flatten)]
        args: MoveCommand,
    },

    /// 停止（清除使能位）
    Stop,

    /// 读取参数
    Read {
        #[command(flatten)]
        args: ReadCommand,
    },

    /// 写入参数并回读确认
    Write {
        #[command(flatten)]
        args: WriteCommand,
    },

    /// 保存参数到非易失存储
    Persist {
        #[command(flatten)]
        args: PersistCommand,
    },

    /// 写入出厂默认值并保存
    Provision {
        #[command(flatten)]
        args: ProvisionCommand,
    },

    /// 读取所有已知参数
    Dump {
        #[command(flatten)]
        args: DumpCommand,
    },

    /// 查询会话状态
    Status {
        #[command(flatten)]
        args: StatusCommand,
    },

    /// 打印执行器发出的帧
    Feedback {
        #[command(flatten)]
        args: FeedbackCommand,
    },

    /// 启动交互式 Shell（REPL 模式）
    Shell,
}

fn main() -> Result<()> {
    // 初始化日志
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("electrak_cli=info".parse()?),
        )
        .init();

    let Cli {
        config: config_path,
        interface,
        driver,
        node,
        command,
    } = Cli::parse();
    let overrides = ConfigOverrides {
        interface,
        driver_type: driver,
        node_id: node,
    };

    // 配置命令直接读写文件，其余命令使用叠加了全局参数的配置
    if let Commands::Config(cmd) = command {
        return cmd.execute(config_path.as_deref(), overrides);
    }
    let mut config = CliConfig::load(config_path.as_deref())?;
    overrides.apply(&mut config);

    match command {
        Commands::Config(_) => Ok(()),

        Commands::Move { args } => OneShotMode::new(config)?.move_to(args),

        Commands::Stop => OneShotMode::new(config)?.stop(),

        Commands::Read { args } => OneShotMode::new(config)?.read(args),

        Commands::Write { args } => OneShotMode::new(config)?.write(args),

        Commands::Persist { args } => OneShotMode::new(config)?.persist(args),

        Commands::Provision { args } => OneShotMode::new(config)?.provision(args),

        Commands::Dump { args } => OneShotMode::new(config)?.dump(args),

        Commands::Status { args } => OneShotMode::new(config)?.status(args),

        Commands::Feedback { args } => OneShotMode::new(config)?.feedback(args),

        Commands::Shell => run_repl(config),
    }
}
