//! 内存 Mock 适配器
//!
//! `MockCanAdapter` 交给驱动使用，`MockBusHandle` 留在测试侧：
//! 检查已发送帧、注入接收帧、模拟设备应答、注入故障。

use crate::{BusState, CanAdapter, CanError, ElectrakFrame};
use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::trace;

/// 模拟设备：对每个发送帧返回要注入的应答帧（调用时持有总线锁，不能再访问句柄）
pub type Responder = Box<dyn FnMut(&ElectrakFrame) -> Vec<ElectrakFrame> + Send>;

/// 带时间戳的已发送帧
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SentFrame {
    pub frame: ElectrakFrame,
    pub at: Instant,
}

struct MockBus {
    sent: Vec<SentFrame>,
    rx: VecDeque<ElectrakFrame>,
    responder: Option<Responder>,
    /// 剩余需要失败的发送次数
    fail_sends: usize,
    /// 永久发送失败
    fail_all_sends: bool,
    state: BusState,
    close_count: usize,
}

#[derive(Clone)]
struct Shared {
    bus: Arc<Mutex<MockBus>>,
    rx_ready: Arc<Condvar>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, MockBus> {
        // 锁中毒时继续使用内部数据
        self.bus.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// 测试侧句柄
#[derive(Clone)]
pub struct MockBusHandle {
    shared: Shared,
}

/// 驱动侧适配器
pub struct MockCanAdapter {
    shared: Shared,
    read_timeout: Duration,
    closed: bool,
}

impl MockCanAdapter {
    /// 创建一对适配器与句柄，初始状态 `Active`
    pub fn pair() -> (Self, MockBusHandle) {
        let shared = Shared {
            bus: Arc::new(Mutex::new(MockBus {
                sent: Vec::new(),
                rx: VecDeque::new(),
                responder: None,
                fail_sends: 0,
                fail_all_sends: false,
                state: BusState::Active,
                close_count: 0,
            })),
            rx_ready: Arc::new(Condvar::new()),
        };
        let adapter = Self {
            shared: shared.clone(),
            read_timeout: Duration::from_millis(5),
            closed: false,
        };
        (adapter, MockBusHandle { shared })
    }
}

impl MockBusHandle {
    /// 注入一帧到接收队列
    pub fn push_rx(&self, frame: ElectrakFrame) {
        self.shared.lock().rx.push_back(frame);
        self.shared.rx_ready.notify_all();
    }

    /// 设置模拟设备
    pub fn set_responder<F>(&self, responder: F)
    where
        F: FnMut(&ElectrakFrame) -> Vec<ElectrakFrame> + Send + 'static,
    {
        self.shared.lock().responder = Some(Box::new(responder));
    }

    pub fn clear_responder(&self) {
        self.shared.lock().responder = None;
    }

    /// 接下来 `count` 次发送返回 IO 错误
    pub fn fail_next_sends(&self, count: usize) {
        self.shared.lock().fail_sends = count;
    }

    /// 所有发送都返回 IO 错误（`false` 恢复）
    pub fn fail_all_sends(&self, fail: bool) {
        self.shared.lock().fail_all_sends = fail;
    }

    /// 注入总线状态（例如 `BusOff`）
    pub fn set_state(&self, state: BusState) {
        self.shared.lock().state = state;
    }

    /// 所有已发送帧
    pub fn sent(&self) -> Vec<SentFrame> {
        self.shared.lock().sent.clone()
    }

    /// 已发送帧（不含时间戳）
    pub fn sent_frames(&self) -> Vec<ElectrakFrame> {
        self.shared.lock().sent.iter().map(|s| s.frame).collect()
    }

    /// 指定 COB-ID 的已发送帧
    pub fn sent_with_id(&self, id: u32) -> Vec<SentFrame> {
        self.shared
            .lock()
            .sent
            .iter()
            .filter(|s| s.frame.id == id)
            .copied()
            .collect()
    }

    pub fn clear_sent(&self) {
        self.shared.lock().sent.clear();
    }

    /// 适配器被关闭的次数
    pub fn close_count(&self) -> usize {
        self.shared.lock().close_count
    }

    /// 等待直到 `predicate` 对已发送帧成立，或超时
    pub fn wait_for<F>(&self, timeout: Duration, mut predicate: F) -> bool
    where
        F: FnMut(&[SentFrame]) -> bool,
    {
        let deadline = Instant::now() + timeout;
        loop {
            if predicate(&self.shared.lock().sent) {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
    }
}

impl CanAdapter for MockCanAdapter {
    fn send(&mut self, frame: ElectrakFrame) -> Result<(), CanError> {
        if self.closed {
            return Err(CanError::NotStarted);
        }
        let mut bus = self.shared.lock();
        if bus.state == BusState::BusOff {
            return Err(CanError::BusOff);
        }
        if bus.fail_all_sends || bus.fail_sends > 0 {
            bus.fail_sends = bus.fail_sends.saturating_sub(1);
            return Err(CanError::Io(std::io::Error::other("mock send failure")));
        }

        bus.sent.push(SentFrame {
            frame,
            at: Instant::now(),
        });
        trace!("Mock sent frame: ID=0x{:X}, len={}", frame.id, frame.len);

        let replies = match bus.responder.as_mut() {
            Some(responder) => responder(&frame),
            None => Vec::new(),
        };
        if !replies.is_empty() {
            bus.rx.extend(replies);
            self.shared.rx_ready.notify_all();
        }
        Ok(())
    }

    fn receive(&mut self) -> Result<ElectrakFrame, CanError> {
        if self.closed {
            return Err(CanError::NotStarted);
        }
        let deadline = Instant::now() + self.read_timeout;
        let mut bus = self.shared.lock();
        loop {
            if let Some(frame) = bus.rx.pop_front() {
                return Ok(frame);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(CanError::Timeout);
            }
            bus = self
                .shared
                .rx_ready
                .wait_timeout(bus, remaining)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|e| e.into_inner().0);
        }
    }

    fn set_receive_timeout(&mut self, timeout: Duration) {
        self.read_timeout = timeout;
    }

    fn receive_timeout(&mut self, timeout: Duration) -> Result<ElectrakFrame, CanError> {
        let old_timeout = self.read_timeout;
        self.read_timeout = timeout;
        let result = self.receive();
        self.read_timeout = old_timeout;
        result
    }

    fn state(&self) -> BusState {
        if self.closed {
            BusState::Closed
        } else {
            self.shared.lock().state
        }
    }

    fn close(&mut self) -> Result<(), CanError> {
        if !self.closed {
            self.closed = true;
            let mut bus = self.shared.lock();
            bus.close_count += 1;
            bus.state = BusState::Closed;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_records_and_responder_replies() {
        let (mut adapter, handle) = MockCanAdapter::pair();
        handle.set_responder(|frame| {
            if frame.id == 0x613 {
                vec![ElectrakFrame::new_standard(0x593, &[0x60, 0, 0, 0, 0, 0, 0, 0])]
            } else {
                Vec::new()
            }
        });

        adapter.send(ElectrakFrame::new_standard(0x613, &[0x40; 8])).unwrap();
        adapter.send(ElectrakFrame::new_standard(0x713, &[0x05])).unwrap();

        assert_eq!(handle.sent().len(), 2);
        assert_eq!(handle.sent_with_id(0x713).len(), 1);
        let reply = adapter.receive_timeout(Duration::from_millis(10)).unwrap();
        assert_eq!(reply.id, 0x593);
        assert!(matches!(
            adapter.receive_timeout(Duration::ZERO),
            Err(CanError::Timeout)
        ));
    }

    #[test]
    fn test_fail_injection() {
        let (mut adapter, handle) = MockCanAdapter::pair();
        handle.fail_next_sends(1);
        assert!(adapter.send(ElectrakFrame::new_standard(0x1, &[])).is_err());
        assert!(adapter.send(ElectrakFrame::new_standard(0x1, &[])).is_ok());

        handle.set_state(BusState::BusOff);
        assert!(matches!(
            adapter.send(ElectrakFrame::new_standard(0x1, &[])),
            Err(CanError::BusOff)
        ));
        assert_eq!(adapter.state(), BusState::BusOff);
    }

    #[test]
    fn test_close_is_idempotent() {
        let (mut adapter, handle) = MockCanAdapter::pair();
        assert_eq!(adapter.state(), BusState::Active);
        adapter.close().unwrap();
        adapter.close().unwrap();
        assert_eq!(adapter.state(), BusState::Closed);
        assert_eq!(handle.close_count(), 1);
        assert!(matches!(
            adapter.send(ElectrakFrame::new_standard(0x1, &[])),
            Err(CanError::NotStarted)
        ));
    }

    #[test]
    fn test_receive_wakes_on_push() {
        let (mut adapter, handle) = MockCanAdapter::pair();
        let pusher = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            handle.push_rx(ElectrakFrame::new_standard(0x193, &[1, 2]));
        });
        let frame = adapter.receive_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(frame.id, 0x193);
        pusher.join().unwrap();
    }
}
