//! 会话配置
//!
//! 所有等待时间都以毫秒存储，便于 TOML/JSON 序列化；
//! 访问器返回 `Duration`。

use electrak_protocol::{AccelerationOverflow, DEFAULT_BITRATE, DEFAULT_NODE_ID};
use std::time::Duration;

/// 会话配置
///
/// # Example
///
/// ```
/// use electrak_driver::DriverConfig;
///
/// // 默认配置（节点 19，500 kbit/s，2s 复位/启动等待）
/// let config = DriverConfig::default();
/// assert_eq!(config.node_id, 19);
///
/// // 测试时缩短等待时间
/// let fast = DriverConfig {
///     reset_settle_ms: 10,
///     operational_settle_ms: 10,
///     ..DriverConfig::default()
/// };
/// assert_eq!(fast.reset_settle().as_millis(), 10);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct DriverConfig {
    /// 执行器节点 ID
    pub node_id: u8,
    /// 总线速率（bit/s）
    pub bitrate: u32,
    /// 发送 NMT 复位通信后的等待（毫秒）
    pub reset_settle_ms: u64,
    /// 发送 NMT 启动后的等待（毫秒）
    pub operational_settle_ms: u64,
    /// 参数写入后、回读前的等待（毫秒）
    pub write_settle_ms: u64,
    /// 保存参数后、回读前的等待（毫秒）
    pub persist_settle_ms: u64,
    /// 单个 SDO 应答的等待上限（毫秒）
    pub sdo_timeout_ms: u64,
    /// 心跳周期（毫秒）
    pub heartbeat_interval_ms: u64,
    /// 保活重发周期（毫秒）
    pub keep_alive_interval_ms: u64,
    /// 每次持有总线锁等待接收的时间片（毫秒）
    pub receive_slice_ms: u64,
    /// 加速度超过一个字节时的处理策略
    pub acceleration_overflow: AccelerationOverflow,
    /// SLCAN 串口波特率
    pub slcan_serial_baud: u32,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            node_id: DEFAULT_NODE_ID,
            bitrate: DEFAULT_BITRATE,
            reset_settle_ms: 2000,
            operational_settle_ms: 2000,
            write_settle_ms: 500,
            persist_settle_ms: 1000,
            sdo_timeout_ms: 500,
            heartbeat_interval_ms: 2000,
            keep_alive_interval_ms: 2000,
            receive_slice_ms: 5,
            acceleration_overflow: AccelerationOverflow::Reject,
            slcan_serial_baud: 115_200,
        }
    }
}

impl DriverConfig {
    pub fn reset_settle(&self) -> Duration {
        Duration::from_millis(self.reset_settle_ms)
    }

    pub fn operational_settle(&self) -> Duration {
        Duration::from_millis(self.operational_settle_ms)
    }

    pub fn write_settle(&self) -> Duration {
        Duration::from_millis(self.write_settle_ms)
    }

    pub fn persist_settle(&self) -> Duration {
        Duration::from_millis(self.persist_settle_ms)
    }

    pub fn sdo_timeout(&self) -> Duration {
        Duration::from_millis(self.sdo_timeout_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn keep_alive_interval(&self) -> Duration {
        Duration::from_millis(self.keep_alive_interval_ms)
    }

    /// 接收时间片，至少 1ms
    pub fn receive_slice(&self) -> Duration {
        Duration::from_millis(self.receive_slice_ms.max(1))
    }

    /// 校验配置
    ///
    /// 节点 ID 必须在 1..=127；速率必须是适配层支持的值；
    /// 心跳与保活周期不能为 0。
    pub fn validate(&self) -> Result<(), crate::DriverError> {
        electrak_protocol::NodeId::new(self.node_id)?;
        if !electrak_can::SUPPORTED_BITRATES.contains(&self.bitrate) {
            return Err(crate::DriverError::InvalidInput(format!(
                "unsupported bitrate {} bit/s",
                self.bitrate
            )));
        }
        if self.heartbeat_interval_ms == 0 || self.keep_alive_interval_ms == 0 {
            return Err(crate::DriverError::InvalidInput(
                "liveness intervals must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}
