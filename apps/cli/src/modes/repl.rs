//! REPL 模式（交互式 Shell）
//!
//! 专用输入线程 + crossbeam 通道：
//! - 输入线程持有 rustyline `Editor`（保留历史），每读到一行就等待主线程处理完毕
//!   再显示下一个提示符，避免与 inquire 确认框争用终端
//! - 主线程用 `select!` 同时等待输入和 Ctrl+C，Ctrl+C 时发送停止帧

use anyhow::Result;
use clap::Parser;
use crossbeam_channel::{Receiver, Sender, bounded, select};
use electrak_driver::{Actuator, ActuatorSession};
use electrak_protocol::NmtCommand;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use std::panic;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use crate::commands::{
    CliConfig, DumpCommand, FeedbackCommand, MoveCommand, PersistCommand, ProvisionCommand,
    ReadCommand, StatusCommand, WriteCommand,
};
use crate::utils::spaced_hex;
use crate::validation::parse_nmt;

const HISTORY_FILE: &str = ".electrak_history";

/// Ctrl+C 在输入线程中的表示
const SIGINT: &str = "\u{3}SIGINT";

/// Shell 命令（每行按空白切分后交给 clap 解析）
#[derive(Parser, Debug)]
#[command(name = "electrak", no_binary_name = true, disable_version_flag = true)]
enum ReplCommand {
    /// 连接（默认使用配置中的通道）
    Connect { channel: Option<String> },

    /// 断开
    Disconnect,

    /// 会话状态
    Status(StatusCommand),

    /// 发送运动指令
    Move(MoveCommand),

    /// 停止
    Stop,

    /// 读取参数
    Read(ReadCommand),

    /// 写入参数并回读
    Write(WriteCommand),

    /// 保存参数
    Persist(PersistCommand),

    /// 出厂配置
    Provision(ProvisionCommand),

    /// 读取所有已知参数
    Dump(DumpCommand),

    /// 打印执行器发出的帧
    Feedback(FeedbackCommand),

    /// 发送 NMT 命令：start、stop、preop、reset-node、reset-comm
    Nmt {
        #[arg(value_parser = parse_nmt)]
        command: NmtCommand,
    },

    /// 退出
    #[command(alias = "quit")]
    Exit,
}

/// REPL 会话（保持执行器连接）
pub struct ReplSession {
    actuator: Actuator,
    config: CliConfig,
    interrupted: Arc<AtomicBool>,
}

impl ReplSession {
    /// 创建新会话
    pub fn new(config: CliConfig, interrupted: Arc<AtomicBool>) -> Self {
        let actuator =
            Actuator::new(config.driver.clone()).with_driver_type(config.driver_type);
        Self {
            actuator,
            config,
            interrupted,
        }
    }

    /// 提示符上显示的状态
    fn prompt(&self) -> String {
        if self.actuator.is_connected() {
            format!("electrak[{}]> ", self.actuator.bus_status())
        } else {
            "electrak> ".to_string()
        }
    }

    fn session(&self) -> Result<&ActuatorSession> {
        self.actuator
            .session()
            .map_err(|_| anyhow::anyhow!("未连接，请先使用 connect 命令"))
    }

    /// 连接到执行器
    pub fn connect(&mut self, channel: Option<&str>) -> Result<()> {
        let channel = channel
            .or(self.config.interface.as_deref())
            .ok_or_else(|| anyhow::anyhow!("未指定通道：connect <CHANNEL>"))?
            .to_string();

        println!("⏳ 连接到执行器（{}）...", channel);
        self.actuator.connect(&channel)?;
        println!("✅ 已连接");
        Ok(())
    }

    /// 断开连接
    pub fn disconnect(&mut self) {
        if !self.actuator.is_connected() {
            println!("⚠️  未连接");
            return;
        }
        self.actuator.disconnect();
        println!("✅ 已断开");
    }

    /// Ctrl+C：已连接时发送停止帧
    fn emergency_stop(&self) {
        let Ok(session) = self.actuator.session() else {
            return;
        };
        match session.stop() {
            Ok(frame) => eprintln!("🛑 已停止: {}", spaced_hex(frame.bytes())),
            Err(e) => eprintln!("❌ 停止失败: {}", e),
        }
    }

    /// 执行一条命令，返回 `false` 表示退出
    fn handle(&mut self, command: ReplCommand) -> Result<bool> {
        self.interrupted.store(false, Ordering::SeqCst);

        match command {
            ReplCommand::Connect { channel } => self.connect(channel.as_deref())?,
            ReplCommand::Disconnect => self.disconnect(),
            ReplCommand::Status(args) => {
                if self.actuator.is_connected() {
                    args.execute(self.session()?)?;
                } else {
                    println!("📊 未连接（总线 {}）", self.actuator.bus_status());
                }
            },
            ReplCommand::Move(args) => args.execute(self.session()?, &self.interrupted)?,
            ReplCommand::Stop => {
                let frame = self.session()?.stop()?;
                println!("🛑 停止帧: {}", spaced_hex(frame.bytes()));
            },
            ReplCommand::Read(args) => args.execute(self.session()?)?,
            ReplCommand::Write(args) => args.execute(self.session()?)?,
            ReplCommand::Persist(args) => {
                let session = self.session()?;
                if args.confirmed()? {
                    args.execute(session)?;
                } else {
                    println!("❌ 操作已取消");
                }
            },
            ReplCommand::Provision(args) => {
                let session = self.session()?;
                if args.confirmed()? {
                    args.execute(session)?;
                } else {
                    println!("❌ 操作已取消");
                }
            },
            ReplCommand::Dump(args) => args.execute(self.session()?)?,
            ReplCommand::Feedback(args) => args.execute(self.session()?, &self.interrupted)?,
            ReplCommand::Nmt { command } => {
                let session = self.session()?;
                session.set_nmt_state(command)?;
                println!("✅ NMT {:?} → {}", command, session.nmt_state());
            },
            ReplCommand::Exit => return Ok(false),
        }
        Ok(true)
    }
}

/// REPL 输入（专用输入线程）
pub struct ReplInput {
    command_rx: Receiver<String>,
    prompt_tx: Sender<String>,
    input_thread: thread::JoinHandle<()>,
}

impl ReplInput {
    /// 创建专用输入线程（保留历史记录）
    ///
    /// 输入线程每次先从 `prompt_tx` 取得提示符再读一行，因此主线程处理命令时
    /// 终端不会出现新的提示符。
    pub fn new() -> Result<Self> {
        let (command_tx, command_rx) = bounded::<String>(10);
        let (prompt_tx, prompt_rx) = bounded::<String>(1);

        let input_thread = thread::Builder::new()
            .name("electrak-repl-input".into())
            .spawn(move || {
                // Editor 在输入线程内创建，生命周期 = REPL 会话
                let mut rl = match DefaultEditor::new() {
                    Ok(rl) => rl,
                    Err(e) => {
                        eprintln!("Failed to initialize readline: {}", e);
                        return; // 丢弃 command_tx，主线程随之退出
                    },
                };
                rl.load_history(HISTORY_FILE).ok(); // 首次运行没有历史文件

                while let Ok(prompt) = prompt_rx.recv() {
                    let line = match rl.readline(&prompt) {
                        Ok(line) => {
                            let line = line.trim().to_string();
                            if !line.is_empty() {
                                let _ = rl.add_history_entry(line.as_str());
                            }
                            line
                        },
                        Err(ReadlineError::Interrupted) => {
                            println!("^C");
                            SIGINT.to_string()
                        },
                        Err(ReadlineError::Eof) => "exit".to_string(),
                        Err(err) => {
                            eprintln!("Error: {:?}", err);
                            "exit".to_string()
                        },
                    };

                    if command_tx.send(line).is_err() {
                        break; // 主线程已退出
                    }
                }

                rl.save_history(HISTORY_FILE).ok();
            })?;

        Ok(Self {
            command_rx,
            prompt_tx,
            input_thread,
        })
    }

    /// 请求读取下一行
    fn request_line(&self, prompt: String) {
        let _ = self.prompt_tx.send(prompt);
    }

    /// 结束输入线程并等待它保存历史
    fn finish(self) {
        drop(self.prompt_tx);
        let _ = self.input_thread.join();
    }
}

/// 运行 REPL 模式
pub fn run_repl(config: CliConfig) -> Result<()> {
    let interrupted = Arc::new(AtomicBool::new(false));
    let (sigint_tx, sigint_rx) = bounded::<()>(1);
    let flag = interrupted.clone();
    ctrlc::set_handler(move || {
        flag.store(true, Ordering::SeqCst);
        let _ = sigint_tx.try_send(());
    })?;

    let mut session = ReplSession::new(config, interrupted);
    let input = ReplInput::new()?;

    println!("Electrak CLI v{} - 交互式 Shell", env!("CARGO_PKG_VERSION"));
    println!("输入 'help' 查看帮助，'exit' 退出");
    println!("💡 提示: 使用 'connect [CHANNEL]' 连接执行器");
    println!();

    input.request_line(session.prompt());
    let mut running = true;
    while running {
        select! {
            // 用户输入（输入线程结束时通道关闭）
            recv(input.command_rx) -> line => match line {
                Ok(line) => {
                    if line == SIGINT {
                        session.emergency_stop();
                    } else if !line.is_empty() {
                        running = dispatch(&mut session, &line);
                    }
                    if running {
                        input.request_line(session.prompt());
                    }
                },
                Err(_) => running = false,
            },

            // 命令执行期间的 Ctrl+C
            recv(sigint_rx) -> _ => session.emergency_stop(),
        }
    }

    session.actuator.disconnect();
    input.finish();
    println!("👋 再见！");
    Ok(())
}

/// 解析并执行一行，返回 `false` 表示退出
fn dispatch(session: &mut ReplSession, line: &str) -> bool {
    let command = match ReplCommand::try_parse_from(line.split_whitespace()) {
        Ok(command) => command,
        Err(err) => {
            // help 与参数错误都由 clap 渲染
            let _ = err.print();
            return true;
        },
    };

    // 错误隔离：命令 panic 不结束 Shell
    match panic::catch_unwind(panic::AssertUnwindSafe(|| session.handle(command))) {
        Ok(Ok(keep_going)) => keep_going,
        Ok(Err(err)) => {
            eprintln!("❌ Error: {:#}", err);
            true
        },
        Err(panic_err) => {
            eprintln!("❌ Command panicked: {:?}", panic_err);
            true
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(line: &str) -> Result<ReplCommand, clap::Error> {
        ReplCommand::try_parse_from(line.split_whitespace())
    }

    #[test]
    fn test_parse_connect() {
        match parse("connect can0").unwrap() {
            ReplCommand::Connect { channel } => assert_eq!(channel.as_deref(), Some("can0")),
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(parse("connect").unwrap(), ReplCommand::Connect { channel: None }));
    }

    #[test]
    fn test_parse_move_and_nmt() {
        assert!(matches!(parse("move raise -p 100 -s 800").unwrap(), ReplCommand::Move(_)));
        assert!(matches!(
            parse("nmt reset-comm").unwrap(),
            ReplCommand::Nmt {
                command: NmtCommand::ResetCommunication
            }
        ));
        assert!(parse("nmt sideways").is_err());
    }

    #[test]
    fn test_quit_alias() {
        assert!(matches!(parse("quit").unwrap(), ReplCommand::Exit));
    }

    #[test]
    fn test_commands_require_connection() {
        let mut session = ReplSession::new(CliConfig::default(), Arc::new(AtomicBool::new(false)));
        assert!(session.handle(parse("stop").unwrap()).is_err());
        assert!(session.handle(parse("read 0x2102").unwrap()).is_err());
        assert!(session.handle(parse("connect").unwrap()).is_err());
        assert!(!session.handle(parse("exit").unwrap()).unwrap());
    }
}
