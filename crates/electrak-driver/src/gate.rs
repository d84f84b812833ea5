//! 总线互斥门
//!
//! 适配器、最后一条运动指令和接收积压队列放在同一把锁里。
//! 每次持锁只收发一帧：发送立即返回，接收最多等待一个时间片，
//! 因此心跳、保活和 SDO 事务可以交错使用同一条总线。

use crate::error::DriverError;
use electrak_can::{BusState, CanAdapter, CanError, ElectrakFrame};
use electrak_protocol::{MotionFrame, NodeId};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::Duration;
use tracing::{debug, trace, warn};

/// 积压队列上限，超出时丢弃最旧的帧
pub const BACKLOG_CAPACITY: usize = 64;

/// 锁内数据
struct BusSlot {
    adapter: Option<Box<dyn CanAdapter + Send>>,
    /// 最近一次成功发送的运动帧（保活重发的内容）
    last_command: Option<MotionFrame>,
    /// SDO 等待期间收到的其他帧
    backlog: VecDeque<ElectrakFrame>,
}

impl BusSlot {
    fn adapter(&mut self) -> Result<&mut Box<dyn CanAdapter + Send>, DriverError> {
        self.adapter.as_mut().ok_or(DriverError::NotConnected)
    }
}

/// 总线互斥门
pub struct BusGate {
    slot: Mutex<BusSlot>,
}

impl BusGate {
    pub fn new(adapter: Box<dyn CanAdapter + Send>) -> Self {
        Self {
            slot: Mutex::new(BusSlot {
                adapter: Some(adapter),
                last_command: None,
                backlog: VecDeque::with_capacity(BACKLOG_CAPACITY),
            }),
        }
    }

    /// 发送一帧
    pub fn send(&self, frame: ElectrakFrame) -> Result<(), DriverError> {
        let mut slot = self.slot.lock();
        slot.adapter()?.send(frame)?;
        trace!("TX 0x{:03X} {:02X?}", frame.id, frame.data_slice());
        Ok(())
    }

    /// 发送运动帧，成功后在同一临界区内更新最后指令
    pub fn send_motion(&self, motion: MotionFrame, node: NodeId) -> Result<(), DriverError> {
        let frame = motion.to_frame(node);
        let mut slot = self.slot.lock();
        slot.adapter()?.send(frame)?;
        slot.last_command = Some(motion);
        trace!("TX motion 0x{:03X} [{}]", frame.id, motion);
        Ok(())
    }

    /// 原样重发最后指令；没有指令时返回 `Ok(false)`
    pub fn replay_last_command(&self, node: NodeId) -> Result<bool, DriverError> {
        let mut slot = self.slot.lock();
        let Some(motion) = slot.last_command else {
            return Ok(false);
        };
        slot.adapter()?.send(motion.to_frame(node))?;
        trace!("TX keep-alive [{}]", motion);
        Ok(true)
    }

    /// 最多等待一个时间片接收一帧，超时返回 `None`
    pub fn receive(&self, slice: Duration) -> Result<Option<ElectrakFrame>, DriverError> {
        let mut slot = self.slot.lock();
        match slot.adapter()?.receive_timeout(slice) {
            Ok(frame) => {
                trace!("RX 0x{:03X} {:02X?}", frame.id, frame.data_slice());
                Ok(Some(frame))
            },
            Err(CanError::Timeout) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// 暂存不属于当前事务的帧
    pub fn stash(&self, frame: ElectrakFrame) {
        let mut slot = self.slot.lock();
        if slot.backlog.len() >= BACKLOG_CAPACITY {
            slot.backlog.pop_front();
            debug!("Receive backlog full, dropping oldest frame");
        }
        slot.backlog.push_back(frame);
    }

    /// 取出最早的暂存帧
    pub fn pop_backlog(&self) -> Option<ElectrakFrame> {
        self.slot.lock().backlog.pop_front()
    }

    pub fn backlog_len(&self) -> usize {
        self.slot.lock().backlog.len()
    }

    /// 当前总线状态；适配器已关闭时为 `Closed`
    pub fn bus_state(&self) -> BusState {
        let slot = self.slot.lock();
        match slot.adapter.as_ref() {
            Some(adapter) => adapter.state(),
            None => BusState::Closed,
        }
    }

    pub fn last_command(&self) -> Option<MotionFrame> {
        self.slot.lock().last_command
    }

    pub fn is_open(&self) -> bool {
        self.slot.lock().adapter.is_some()
    }

    /// 关闭适配器并清空最后指令与积压队列
    ///
    /// 只有第一次调用真正关闭，返回 `true`；之后返回 `false`。
    pub fn close(&self) -> bool {
        let mut slot = self.slot.lock();
        slot.last_command = None;
        slot.backlog.clear();
        match slot.adapter.take() {
            Some(mut adapter) => {
                if let Err(e) = adapter.close() {
                    warn!("Failed to close CAN adapter cleanly: {}", e);
                }
                true
            },
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use electrak_can::MockCanAdapter;
    use electrak_protocol::{AccelerationOverflow, Direction, MotionCommand};

    fn open_gate() -> (BusGate, electrak_can::MockBusHandle) {
        let (adapter, handle) = MockCanAdapter::pair();
        (BusGate::new(Box::new(adapter)), handle)
    }

    #[test]
    fn test_send_motion_records_last_command() {
        let (gate, handle) = open_gate();
        let node = NodeId::default();
        let motion = MotionCommand::new(Direction::Raise, 50, 400, 100)
            .encode(AccelerationOverflow::Reject)
            .unwrap();

        assert_eq!(gate.last_command(), None);
        assert!(!gate.replay_last_command(node).unwrap());

        gate.send_motion(motion, node).unwrap();
        assert_eq!(gate.last_command(), Some(motion));
        assert!(gate.replay_last_command(node).unwrap());

        let sent = handle.sent_with_id(0x213);
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].frame, sent[1].frame);
        assert_eq!(sent[1].frame.data, motion.0);
    }

    #[test]
    fn test_failed_motion_send_keeps_previous_command() {
        let (gate, handle) = open_gate();
        let node = NodeId::default();
        let first = MotionCommand::new(Direction::Raise, 10, 100, 10)
            .encode(AccelerationOverflow::Reject)
            .unwrap();
        let second = MotionCommand::new(Direction::Raise, 20, 100, 10)
            .encode(AccelerationOverflow::Reject)
            .unwrap();

        gate.send_motion(first, node).unwrap();
        handle.fail_next_sends(1);
        assert!(gate.send_motion(second, node).is_err());
        assert_eq!(gate.last_command(), Some(first));
    }

    #[test]
    fn test_backlog_drops_oldest() {
        let (gate, _handle) = open_gate();
        for i in 0..(BACKLOG_CAPACITY + 3) {
            gate.stash(ElectrakFrame::new_standard(0x193, &[i as u8]));
        }
        assert_eq!(gate.backlog_len(), BACKLOG_CAPACITY);
        assert_eq!(gate.pop_backlog().unwrap().data[0], 3);
    }

    #[test]
    fn test_receive_timeout_is_none() {
        let (gate, handle) = open_gate();
        assert_eq!(gate.receive(Duration::from_millis(1)).unwrap(), None);
        handle.push_rx(ElectrakFrame::new_standard(0x193, &[1]));
        let frame = gate.receive(Duration::from_millis(10)).unwrap().unwrap();
        assert_eq!(frame.id, 0x193);
    }

    #[test]
    fn test_close_once() {
        let (gate, handle) = open_gate();
        let node = NodeId::default();
        gate.send_motion(MotionFrame::IDLE, node).unwrap();
        assert_eq!(gate.bus_state(), BusState::Active);

        assert!(gate.close());
        assert!(!gate.close());
        assert_eq!(handle.close_count(), 1);
        assert_eq!(gate.bus_state(), BusState::Closed);
        assert_eq!(gate.last_command(), None);
        assert!(matches!(
            gate.send(ElectrakFrame::new_standard(0x713, &[5])),
            Err(DriverError::NotConnected)
        ));
    }
}
