//! NMT 状态跟踪与启动流程
//!
//! NMT 没有应答帧，驱动只能记录“最后一次成功发出的命令”对应的状态，
//! 并用固定等待时间保证节点完成切换。

use crate::config::DriverConfig;
use crate::error::DriverError;
use crate::gate::BusGate;
use electrak_protocol::{NmtCommand, NmtCommandFrame, NmtState, NodeId};
use std::sync::atomic::{AtomicU8, Ordering};
use tracing::{debug, info};

fn state_to_u8(state: NmtState) -> u8 {
    match state {
        NmtState::PreOperational => 0,
        NmtState::ResetCommunication => 1,
        NmtState::Operational => 2,
        NmtState::Stopped => 3,
    }
}

fn state_from_u8(value: u8) -> NmtState {
    match value {
        1 => NmtState::ResetCommunication,
        2 => NmtState::Operational,
        3 => NmtState::Stopped,
        _ => NmtState::PreOperational,
    }
}

/// NMT 状态（原子版本，用于线程间共享）
///
/// # 示例
///
/// ```rust
/// use electrak_driver::nmt::AtomicNmtState;
/// use electrak_protocol::NmtState;
/// use std::sync::atomic::Ordering;
///
/// let state = AtomicNmtState::new(NmtState::PreOperational);
/// state.set(NmtState::Operational, Ordering::Release);
/// assert_eq!(state.get(Ordering::Acquire), NmtState::Operational);
/// ```
#[derive(Debug)]
pub struct AtomicNmtState {
    inner: AtomicU8,
}

impl AtomicNmtState {
    pub fn new(state: NmtState) -> Self {
        Self {
            inner: AtomicU8::new(state_to_u8(state)),
        }
    }

    pub fn get(&self, ordering: Ordering) -> NmtState {
        state_from_u8(self.inner.load(ordering))
    }

    pub fn set(&self, state: NmtState, ordering: Ordering) {
        self.inner.store(state_to_u8(state), ordering);
    }
}

impl Default for AtomicNmtState {
    fn default() -> Self {
        Self::new(NmtState::default())
    }
}

/// 发送一条 NMT 命令；成功后更新记录的状态
pub(crate) fn send_command(
    gate: &BusGate,
    node: NodeId,
    state: &AtomicNmtState,
    command: NmtCommand,
) -> Result<(), DriverError> {
    gate.send(NmtCommandFrame::new(command, node).to_frame())?;
    let target = command.target_state();
    state.set(target, Ordering::Release);
    debug!("NMT {:?} sent to node {}, now {}", command, node, target);
    Ok(())
}

/// 复位通信 → 等待 → 启动 → 等待
///
/// 两次等待都是下限；任一发送失败立即返回，状态保持失败前的值。
pub(crate) fn bring_up(
    gate: &BusGate,
    node: NodeId,
    state: &AtomicNmtState,
    config: &DriverConfig,
) -> Result<(), DriverError> {
    info!("Resetting communication on node {}", node);
    send_command(gate, node, state, NmtCommand::ResetCommunication)?;
    std::thread::sleep(config.reset_settle());

    info!("Setting node {} to OPERATIONAL", node);
    send_command(gate, node, state, NmtCommand::Start)?;
    std::thread::sleep(config.operational_settle());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use electrak_can::MockCanAdapter;
    use std::time::Duration;

    #[test]
    fn test_atomic_state_roundtrip() {
        let state = AtomicNmtState::default();
        assert_eq!(state.get(Ordering::Relaxed), NmtState::PreOperational);
        for s in [
            NmtState::ResetCommunication,
            NmtState::Operational,
            NmtState::Stopped,
            NmtState::PreOperational,
        ] {
            state.set(s, Ordering::Relaxed);
            assert_eq!(state.get(Ordering::Relaxed), s);
        }
    }

    #[test]
    fn test_bring_up_order_and_delays() {
        let (adapter, handle) = MockCanAdapter::pair();
        let gate = BusGate::new(Box::new(adapter));
        let state = AtomicNmtState::default();
        let config = DriverConfig {
            reset_settle_ms: 30,
            operational_settle_ms: 20,
            ..DriverConfig::default()
        };

        let started = std::time::Instant::now();
        bring_up(&gate, NodeId::default(), &state, &config).unwrap();
        assert!(started.elapsed() >= Duration::from_millis(50));
        assert_eq!(state.get(Ordering::Acquire), NmtState::Operational);

        let sent = handle.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].frame.id, 0x000);
        assert_eq!(sent[0].frame.data_slice(), &[0x82, 19]);
        assert_eq!(sent[1].frame.data_slice(), &[0x01, 19]);
        assert!(sent[1].at - sent[0].at >= Duration::from_millis(30));
    }

    #[test]
    fn test_failed_send_keeps_state() {
        let (adapter, handle) = MockCanAdapter::pair();
        let gate = BusGate::new(Box::new(adapter));
        let state = AtomicNmtState::new(NmtState::Operational);

        handle.fail_next_sends(1);
        assert!(send_command(&gate, NodeId::default(), &state, NmtCommand::Stop).is_err());
        assert_eq!(state.get(Ordering::Acquire), NmtState::Operational);
    }
}
