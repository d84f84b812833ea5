//! Builder 模式实现
//!
//! 根据通道名选择 CAN 后端，打开适配器并建立 `ActuatorSession`。

use crate::config::DriverConfig;
use crate::error::DriverError;
use crate::session::ActuatorSession;
use electrak_can::{CanAdapter, CanDeviceError, CanDeviceErrorKind, CanError};
use electrak_protocol::AccelerationOverflow;

/// 驱动类型选择
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum DriverType {
    /// 自动选择（默认）
    /// - Linux: 通道名形如 "can0"/"vcan0"/"slcan0" 时使用 SocketCAN；否则视为串口
    /// - 其他平台: SLCAN 串口
    #[default]
    Auto,
    /// 强制使用 SocketCAN（仅 Linux）
    SocketCan,
    /// 强制使用 SLCAN 串口适配器（所有平台）
    Slcan,
}

impl DriverType {
    /// 把 `Auto` 解析为具体后端
    pub fn resolve(self, channel: &str) -> DriverType {
        match self {
            DriverType::Auto => {
                if cfg!(target_os = "linux") && looks_like_netdev(channel) {
                    DriverType::SocketCan
                } else {
                    DriverType::Slcan
                }
            },
            other => other,
        }
    }
}

impl std::str::FromStr for DriverType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(DriverType::Auto),
            "socketcan" => Ok(DriverType::SocketCan),
            "slcan" | "serial" => Ok(DriverType::Slcan),
            other => Err(format!(
                "unknown driver '{}' (expected auto, socketcan or slcan)",
                other
            )),
        }
    }
}

impl std::fmt::Display for DriverType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            DriverType::Auto => "auto",
            DriverType::SocketCan => "socketcan",
            DriverType::Slcan => "slcan",
        })
    }
}

fn looks_like_netdev(channel: &str) -> bool {
    ["can", "vcan", "slcan"].iter().any(|prefix| {
        channel
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.chars().all(|c| c.is_ascii_digit()))
    })
}

/// 会话 Builder（链式构造）
///
/// # Example
///
/// ```no_run
/// use electrak_driver::{ActuatorBuilder, DriverType};
///
/// // Linux SocketCAN
/// let session = ActuatorBuilder::new().interface("can0").build().unwrap();
///
/// // Windows 串口适配器，节点 20
/// let session = ActuatorBuilder::new()
///     .interface("COM3")
///     .driver_type(DriverType::Slcan)
///     .node_id(20)
///     .build()
///     .unwrap();
/// ```
#[derive(Debug, Clone, Default)]
pub struct ActuatorBuilder {
    /// 通道：SocketCAN 接口名或串口路径
    interface: Option<String>,
    driver_type: DriverType,
    config: DriverConfig,
}

impl ActuatorBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn interface(mut self, interface: impl Into<String>) -> Self {
        self.interface = Some(interface.into());
        self
    }

    pub fn driver_type(mut self, driver_type: DriverType) -> Self {
        self.driver_type = driver_type;
        self
    }

    /// 替换完整配置
    pub fn config(mut self, config: DriverConfig) -> Self {
        self.config = config;
        self
    }

    pub fn node_id(mut self, node_id: u8) -> Self {
        self.config.node_id = node_id;
        self
    }

    pub fn bitrate(mut self, bitrate: u32) -> Self {
        self.config.bitrate = bitrate;
        self
    }

    pub fn acceleration_overflow(mut self, policy: AccelerationOverflow) -> Self {
        self.config.acceleration_overflow = policy;
        self
    }

    /// 打开适配器并完成 NMT 启动
    ///
    /// 打开失败返回 `Connection`，此时总线上没有任何流量。
    pub fn build(self) -> Result<ActuatorSession, DriverError> {
        self.config.validate()?;
        let adapter = self.open_adapter()?;
        ActuatorSession::connect_with(adapter, self.config)
    }

    /// 只打开适配器，不发送任何帧
    pub fn open_adapter(&self) -> Result<Box<dyn CanAdapter + Send>, DriverError> {
        let channel = self
            .interface
            .as_deref()
            .ok_or_else(|| DriverError::InvalidInput("no CAN channel configured".to_string()))?;

        let backend = self.driver_type.resolve(channel);
        tracing::info!(
            "Opening {} channel '{}' at {} bit/s",
            backend,
            channel,
            self.config.bitrate
        );
        match backend {
            DriverType::SocketCan => self.open_socketcan(channel),
            DriverType::Slcan | DriverType::Auto => self.open_slcan(channel),
        }
    }

    #[cfg(target_os = "linux")]
    fn open_socketcan(&self, interface: &str) -> Result<Box<dyn CanAdapter + Send>, DriverError> {
        let adapter = electrak_can::SocketCanAdapter::open(interface, self.config.bitrate)
            .map_err(DriverError::Connection)?;
        Ok(Box::new(adapter))
    }

    #[cfg(not(target_os = "linux"))]
    fn open_socketcan(&self, _interface: &str) -> Result<Box<dyn CanAdapter + Send>, DriverError> {
        Err(unsupported("SocketCAN is only available on Linux"))
    }

    #[cfg(feature = "slcan")]
    fn open_slcan(&self, path: &str) -> Result<Box<dyn CanAdapter + Send>, DriverError> {
        let adapter = electrak_can::SlcanAdapter::open(
            path,
            self.config.bitrate,
            self.config.slcan_serial_baud,
        )
        .map_err(DriverError::Connection)?;
        Ok(Box::new(adapter))
    }

    #[cfg(not(feature = "slcan"))]
    fn open_slcan(&self, _path: &str) -> Result<Box<dyn CanAdapter + Send>, DriverError> {
        Err(unsupported("SLCAN support not compiled in (enable the `slcan` feature)"))
    }
}

#[allow(dead_code)]
fn unsupported(message: &str) -> DriverError {
    DriverError::Connection(CanError::Device(CanDeviceError::new(
        CanDeviceErrorKind::UnsupportedConfig,
        message,
    )))
}
