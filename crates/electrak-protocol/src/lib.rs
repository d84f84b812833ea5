//! # Electrak Protocol
//!
//! Electrak HD 直线执行器的 CANopen 协议定义（无硬件依赖）
//!
//! ## 模块
//!
//! - `ids`: COB-ID 常量与节点地址计算
//! - `nmt`: 网络管理（NMT）命令与心跳帧
//! - `sdo`: 服务数据对象（SDO）请求构建与响应解析
//! - `motion`: 运动指令 RPDO 帧编码
//! - `objects`: 对象字典地址、参数值与已知参数表
//!
//! ## 字节序
//!
//! CANopen 使用 Intel（LSB）低位在前（小端字节序）。
//! 本模块提供了字节序转换工具函数。

pub mod ids;
pub mod motion;
pub mod nmt;
pub mod objects;
pub mod sdo;

// 重新导出常用类型
pub use ids::*;
pub use motion::*;
pub use nmt::*;
pub use objects::*;
pub use sdo::*;

/// CAN 2.0 标准帧的统一抽象
///
/// `ElectrakFrame` 是协议层和硬件层之间的中间抽象：
/// - 协议层通过 `TryFrom<ElectrakFrame>` 解析、`to_frame()` 构建
/// - CAN 层（SocketCAN / SLCAN / Mock）负责与具体后端的帧类型互转
///
/// 固定 8 字节数据，`Copy` 语义，无堆分配。
///
/// ```rust
/// use electrak_protocol::ElectrakFrame;
///
/// let frame = ElectrakFrame::new_standard(0x213, &[0xE8, 0x03]);
/// assert_eq!(frame.id(), 0x213);
/// assert_eq!(frame.data_slice(), &[0xE8, 0x03]);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ElectrakFrame {
    /// CAN ID（标准帧或扩展帧）
    pub id: u32,

    /// 帧数据（固定 8 字节，未使用部分为 0）
    pub data: [u8; 8],

    /// 有效数据长度 (0-8)
    pub len: u8,

    /// 是否为扩展帧（29-bit ID）
    pub is_extended: bool,
}

impl ElectrakFrame {
    /// 创建标准帧
    pub fn new_standard(id: u16, data: &[u8]) -> Self {
        Self::new(id as u32, data, false)
    }

    /// 创建扩展帧
    pub fn new_extended(id: u32, data: &[u8]) -> Self {
        Self::new(id, data, true)
    }

    fn new(id: u32, data: &[u8], is_extended: bool) -> Self {
        let mut fixed_data = [0u8; 8];
        let len = data.len().min(8);
        fixed_data[..len].copy_from_slice(&data[..len]);

        Self {
            id,
            data: fixed_data,
            len: len as u8,
            is_extended,
        }
    }

    /// 获取数据切片（只包含有效数据）
    pub fn data_slice(&self) -> &[u8] {
        &self.data[..self.len as usize]
    }

    /// 获取 CAN ID
    pub fn id(&self) -> u32 {
        self.id
    }

    /// 获取完整数据（8字节固定数组）
    pub fn data(&self) -> &[u8; 8] {
        &self.data
    }
}

use thiserror::Error;

/// 协议解析错误类型
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Invalid frame length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("Invalid CAN ID: 0x{id:X}")]
    InvalidCanId { id: u32 },

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Invalid value for field {field}: {value}")]
    InvalidValue { field: String, value: u8 },

    #[error("Value {value} out of range for {field} (max {max})")]
    OutOfRange { field: String, value: u32, max: u32 },
}

/// 小端字节序转 u16
pub fn bytes_to_u16_le(bytes: [u8; 2]) -> u16 {
    u16::from_le_bytes(bytes)
}

/// 小端字节序转 u32
pub fn bytes_to_u32_le(bytes: [u8; 4]) -> u32 {
    u32::from_le_bytes(bytes)
}

/// u16 转小端字节序
pub fn u16_to_bytes_le(value: u16) -> [u8; 2] {
    value.to_le_bytes()
}

/// u32 转小端字节序
pub fn u32_to_bytes_le(value: u32) -> [u8; 4] {
    value.to_le_bytes()
}
