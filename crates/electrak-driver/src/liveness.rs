//! 心跳与保活线程
//!
//! 两个线程各自按周期发送：
//! - 心跳：`[0x05]` → `0x700 + 节点`
//! - 保活：原样重发最后一条运动指令
//!
//! 线程阻塞在停止通道的 `recv_timeout(周期)` 上；发送端被丢弃
//! （`Disconnected`）即退出。发送失败只记录并计数，不会终止循环。

use crate::gate::BusGate;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded};
use electrak_protocol::{HeartbeatFrame, NmtState, NodeId};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, trace, warn};

/// 停止线程时等待 join 的上限
const JOIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Extension trait for timeout-capable thread joins
trait JoinTimeout {
    fn join_timeout(self, timeout: Duration) -> thread::Result<()>;
}

impl<T: Send + 'static> JoinTimeout for JoinHandle<T> {
    fn join_timeout(self, timeout: Duration) -> thread::Result<()> {
        let (tx, rx) = bounded(1);

        // 看门狗线程代为 join，超时后任其自行结束
        thread::spawn(move || {
            let _ = tx.send(self.join());
        });

        match rx.recv_timeout(timeout) {
            Ok(join_result) => join_result.map(|_| ()),
            Err(RecvTimeoutError::Timeout) => Err(Box::new(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "Thread join timeout",
            ))),
            Err(RecvTimeoutError::Disconnected) => Err(Box::new(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "Thread panicked during join",
            ))),
        }
    }
}

/// 线程计数器
#[derive(Debug, Default)]
pub struct LivenessStats {
    pub heartbeats_sent: AtomicU64,
    pub keep_alives_sent: AtomicU64,
    pub failures: AtomicU64,
}

impl LivenessStats {
    pub fn snapshot(&self) -> LivenessSnapshot {
        LivenessSnapshot {
            heartbeats_sent: self.heartbeats_sent.load(Ordering::Relaxed),
            keep_alives_sent: self.keep_alives_sent.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }
}

/// 计数器快照
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LivenessSnapshot {
    pub heartbeats_sent: u64,
    pub keep_alives_sent: u64,
    pub failures: u64,
}

/// 运行中的心跳与保活线程
pub(crate) struct LivenessLoops {
    /// 丢弃即通知两个线程退出
    stop_tx: Option<Sender<()>>,
    threads: Vec<JoinHandle<()>>,
}

impl LivenessLoops {
    pub fn spawn(
        gate: Arc<BusGate>,
        node: NodeId,
        heartbeat_interval: Duration,
        keep_alive_interval: Duration,
        stats: Arc<LivenessStats>,
    ) -> std::io::Result<Self> {
        let (stop_tx, stop_rx) = bounded::<()>(0);
        let mut loops = Self {
            stop_tx: Some(stop_tx),
            threads: Vec::with_capacity(2),
        };

        let heartbeat = {
            let gate = gate.clone();
            let stats = stats.clone();
            let stop_rx = stop_rx.clone();
            thread::Builder::new()
                .name("electrak-heartbeat".into())
                .spawn(move || heartbeat_loop(&gate, node, heartbeat_interval, &stop_rx, &stats))?
        };
        loops.threads.push(heartbeat);

        // 第二个线程创建失败时，`loops` 被丢弃，已启动的心跳线程随之停止
        let keep_alive = thread::Builder::new()
            .name("electrak-keepalive".into())
            .spawn(move || keep_alive_loop(&gate, node, keep_alive_interval, &stop_rx, &stats))?;
        loops.threads.push(keep_alive);

        debug!(
            "Liveness loops started (heartbeat {:?}, keep-alive {:?})",
            heartbeat_interval, keep_alive_interval
        );
        Ok(loops)
    }

    /// 通知退出并等待线程结束；可重复调用
    pub fn shutdown(&mut self) {
        drop(self.stop_tx.take());
        for handle in self.threads.drain(..) {
            let name = handle.thread().name().unwrap_or("liveness").to_string();
            if handle.join_timeout(JOIN_TIMEOUT).is_err() {
                error!(
                    "{} thread panicked or failed to shut down within {:?}",
                    name, JOIN_TIMEOUT
                );
            }
        }
    }
}

impl Drop for LivenessLoops {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// 等待一个周期；收到停止信号返回 `false`
fn wait_tick(stop_rx: &Receiver<()>, interval: Duration) -> bool {
    match stop_rx.recv_timeout(interval) {
        Err(RecvTimeoutError::Timeout) => true,
        Ok(()) | Err(RecvTimeoutError::Disconnected) => false,
    }
}

/// 进入运行状态后立即发送第一次心跳，之后每个周期一次
fn heartbeat_loop(
    gate: &BusGate,
    node: NodeId,
    interval: Duration,
    stop_rx: &Receiver<()>,
    stats: &LivenessStats,
) {
    let frame = HeartbeatFrame::new(node, NmtState::Operational).to_frame();
    loop {
        match gate.send(frame) {
            Ok(()) => {
                stats.heartbeats_sent.fetch_add(1, Ordering::Relaxed);
                trace!("Heartbeat sent");
            },
            Err(e) => {
                stats.failures.fetch_add(1, Ordering::Relaxed);
                warn!("Heartbeat send failed: {}", e);
            },
        }
        if !wait_tick(stop_rx, interval) {
            break;
        }
    }
    debug!("Heartbeat loop exited");
}

fn keep_alive_loop(
    gate: &BusGate,
    node: NodeId,
    interval: Duration,
    stop_rx: &Receiver<()>,
    stats: &LivenessStats,
) {
    while wait_tick(stop_rx, interval) {
        match gate.replay_last_command(node) {
            Ok(true) => {
                stats.keep_alives_sent.fetch_add(1, Ordering::Relaxed);
            },
            Ok(false) => {},
            Err(e) => {
                stats.failures.fetch_add(1, Ordering::Relaxed);
                warn!("Keep-alive send failed: {}", e);
            },
        }
    }
    debug!("Keep-alive loop exited");
}
