//! # Electrak CAN Adapter Layer
//!
//! CAN 硬件抽象层，为执行器驱动提供统一的总线接口。
//!
//! ## 后端
//!
//! - `socketcan`（仅 Linux）：内核 SocketCAN 接口（`can0`、`vcan0`、`slcan0`）
//! - `slcan`（feature `slcan`）：串口 CAN 适配器（CANable、USBtin 等，`COM3`、`/dev/ttyACM0`）
//! - `mock`（feature `mock`）：内存总线，用于无硬件测试

use std::time::Duration;
use thiserror::Error;

// 重新导出 electrak-protocol 中的 ElectrakFrame
pub use electrak_protocol::ElectrakFrame;

#[cfg(target_os = "linux")]
pub mod socketcan;

#[cfg(target_os = "linux")]
pub use socketcan::SocketCanAdapter;

#[cfg(feature = "slcan")]
pub mod slcan;

#[cfg(feature = "slcan")]
pub use slcan::SlcanAdapter;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

#[cfg(any(test, feature = "mock"))]
pub use mock::{MockBusHandle, MockCanAdapter};

/// 支持的总线速率（bit/s）
pub const SUPPORTED_BITRATES: [u32; 9] = [
    10_000, 20_000, 50_000, 100_000, 125_000, 250_000, 500_000, 800_000, 1_000_000,
];

/// 校验总线速率
pub fn validate_bitrate(bitrate: u32) -> Result<(), CanError> {
    if SUPPORTED_BITRATES.contains(&bitrate) {
        Ok(())
    } else {
        Err(CanError::Device(CanDeviceError::new(
            CanDeviceErrorKind::UnsupportedConfig,
            format!("Unsupported bitrate {} bit/s", bitrate),
        )))
    }
}

/// CAN 适配层统一错误类型
#[derive(Error, Debug)]
pub enum CanError {
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Device Error: {0}")]
    Device(#[from] CanDeviceError),
    #[error("Read timeout")]
    Timeout,
    #[error("Bus off")]
    BusOff,
    #[error("Device not started")]
    NotStarted,
    #[error("Adapter closed")]
    Closed,
}

impl CanError {
    /// 总线已不可用（需要重新连接）
    pub fn is_fatal(&self) -> bool {
        match self {
            CanError::BusOff | CanError::Closed | CanError::NotStarted => true,
            CanError::Device(e) => e.is_fatal(),
            CanError::Io(_) | CanError::Timeout => false,
        }
    }
}

/// 设备/后端错误的结构化分类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CanDeviceErrorKind {
    Unknown,
    NotFound,
    NoDevice,
    AccessDenied,
    Busy,
    UnsupportedConfig,
    InvalidResponse,
    InvalidFrame,
    Backend,
}

/// 结构化设备错误
#[derive(Error, Debug, Clone)]
#[error("{kind:?}: {message}")]
pub struct CanDeviceError {
    pub kind: CanDeviceErrorKind,
    pub message: String,
}

impl CanDeviceError {
    pub fn new(kind: CanDeviceErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(
            self.kind,
            CanDeviceErrorKind::NoDevice
                | CanDeviceErrorKind::AccessDenied
                | CanDeviceErrorKind::NotFound
        )
    }
}

impl From<String> for CanDeviceError {
    fn from(message: String) -> Self {
        Self::new(CanDeviceErrorKind::Unknown, message)
    }
}

impl From<&str> for CanDeviceError {
    fn from(message: &str) -> Self {
        Self::new(CanDeviceErrorKind::Unknown, message)
    }
}

/// 总线状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum BusState {
    /// 错误主动（正常收发）
    Active,
    /// 错误被动（错误计数偏高，仍可收发）
    Passive,
    /// 检测到错误（控制器告警、串口适配器报错）
    Error,
    /// 总线关闭，需要重新打开
    BusOff,
    /// 未打开或已关闭
    #[default]
    Closed,
}

impl BusState {
    /// 是否可以收发
    pub fn is_open(self) -> bool {
        !matches!(self, BusState::Closed | BusState::BusOff)
    }
}

impl std::fmt::Display for BusState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            BusState::Active => "ACTIVE",
            BusState::Passive => "PASSIVE",
            BusState::Error => "ERROR",
            BusState::BusOff => "BUS-OFF",
            BusState::Closed => "CLOSED",
        };
        f.write_str(name)
    }
}

/// CAN 适配器
///
/// 所有后端都是同步阻塞接口；驱动层负责在外部加锁与切片等待。
pub trait CanAdapter {
    /// 发送帧（Fire-and-Forget）
    fn send(&mut self, frame: ElectrakFrame) -> Result<(), CanError>;

    /// 接收帧（阻塞直到收到有效数据帧或超时）
    fn receive(&mut self) -> Result<ElectrakFrame, CanError>;

    fn set_receive_timeout(&mut self, _timeout: Duration) {}

    fn receive_timeout(&mut self, timeout: Duration) -> Result<ElectrakFrame, CanError> {
        self.set_receive_timeout(timeout);
        self.receive()
    }

    fn try_receive(&mut self) -> Result<Option<ElectrakFrame>, CanError> {
        match self.receive_timeout(Duration::ZERO) {
            Ok(frame) => Ok(Some(frame)),
            Err(CanError::Timeout) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// 当前总线状态
    fn state(&self) -> BusState;

    /// 关闭适配器；重复调用无副作用
    fn close(&mut self) -> Result<(), CanError>;
}

impl<A: CanAdapter + ?Sized> CanAdapter for Box<A> {
    fn send(&mut self, frame: ElectrakFrame) -> Result<(), CanError> {
        (**self).send(frame)
    }

    fn receive(&mut self) -> Result<ElectrakFrame, CanError> {
        (**self).receive()
    }

    fn set_receive_timeout(&mut self, timeout: Duration) {
        (**self).set_receive_timeout(timeout)
    }

    fn receive_timeout(&mut self, timeout: Duration) -> Result<ElectrakFrame, CanError> {
        (**self).receive_timeout(timeout)
    }

    fn try_receive(&mut self) -> Result<Option<ElectrakFrame>, CanError> {
        (**self).try_receive()
    }

    fn state(&self) -> BusState {
        (**self).state()
    }

    fn close(&mut self) -> Result<(), CanError> {
        (**self).close()
    }
}
