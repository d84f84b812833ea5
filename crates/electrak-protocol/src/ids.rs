//! COB-ID 常量定义和枚举
//!
//! CANopen 预定义连接集（Predefined Connection Set）：
//! COB-ID = 功能码基址 + 节点 ID（1~127）。

use crate::ProtocolError;

/// Electrak HD 出厂默认节点 ID
pub const DEFAULT_NODE_ID: u8 = 19;

/// 默认总线速率（500 kbit/s）
pub const DEFAULT_BITRATE: u32 = 500_000;

// ============================================================================
// 功能码基址
// ============================================================================

/// NMT 节点控制（广播，固定 0x000）
pub const COB_NMT: u32 = 0x000;

/// SYNC（固定 0x080）
pub const COB_SYNC: u32 = 0x080;

/// EMCY 紧急报文基址
pub const COB_EMCY_BASE: u32 = 0x080;

/// TPDO1 基址（执行器 → 主站，反馈）
pub const COB_TPDO1_BASE: u32 = 0x180;

/// RPDO1 基址（主站 → 执行器，运动指令）
pub const COB_RPDO1_BASE: u32 = 0x200;

/// TPDO2 基址
pub const COB_TPDO2_BASE: u32 = 0x280;

/// SDO 服务端应答基址（执行器 → 主站）
pub const COB_SDO_TX_BASE: u32 = 0x580;

/// SDO 客户端请求基址（主站 → 执行器）
pub const COB_SDO_RX_BASE: u32 = 0x600;

/// NMT 错误控制 / 心跳基址
pub const COB_HEARTBEAT_BASE: u32 = 0x700;

/// CANopen 节点 ID（1~127）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "u8", into = "u8"))]
pub struct NodeId(u8);

impl NodeId {
    /// 创建节点 ID，超出 1~127 返回错误
    pub fn new(id: u8) -> Result<Self, ProtocolError> {
        if (1..=127).contains(&id) {
            Ok(Self(id))
        } else {
            Err(ProtocolError::InvalidValue {
                field: "NodeId".to_string(),
                value: id,
            })
        }
    }

    /// 原始值
    pub fn raw(self) -> u8 {
        self.0
    }

    /// RPDO1 COB-ID（运动指令目标）
    pub fn rpdo1(self) -> u32 {
        COB_RPDO1_BASE + self.0 as u32
    }

    /// TPDO1 COB-ID（执行器反馈）
    pub fn tpdo1(self) -> u32 {
        COB_TPDO1_BASE + self.0 as u32
    }

    /// SDO 请求 COB-ID
    pub fn sdo_rx(self) -> u32 {
        COB_SDO_RX_BASE + self.0 as u32
    }

    /// SDO 应答 COB-ID
    pub fn sdo_tx(self) -> u32 {
        COB_SDO_TX_BASE + self.0 as u32
    }

    /// 心跳 COB-ID
    pub fn heartbeat(self) -> u32 {
        COB_HEARTBEAT_BASE + self.0 as u32
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self(DEFAULT_NODE_ID)
    }
}

impl TryFrom<u8> for NodeId {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<NodeId> for u8 {
    fn from(id: NodeId) -> u8 {
        id.0
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// ID 分类枚举
// ============================================================================

/// CANopen 通信对象分类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    /// NMT 节点控制
    Nmt,
    /// SYNC
    Sync,
    /// 紧急报文（节点 ID）
    Emergency(u8),
    /// TPDO（编号 1~4，节点 ID）
    Tpdo(u8, u8),
    /// RPDO（编号 1~4，节点 ID）
    Rpdo(u8, u8),
    /// SDO 应答（节点 ID）
    SdoResponse(u8),
    /// SDO 请求（节点 ID）
    SdoRequest(u8),
    /// 心跳（节点 ID）
    Heartbeat(u8),
    /// 未知类型
    Unknown,
}

impl FrameType {
    /// 根据 COB-ID 判断通信对象类型
    pub fn from_id(id: u32) -> Self {
        if id > 0x7FF {
            return FrameType::Unknown;
        }
        let function = id & 0x780;
        let node = (id & 0x7F) as u8;

        match (function, node) {
            (0x000, 0) => FrameType::Nmt,
            (0x080, 0) => FrameType::Sync,
            (0x080, n) => FrameType::Emergency(n),
            (_, 0) => FrameType::Unknown,
            (0x180, n) => FrameType::Tpdo(1, n),
            (0x200, n) => FrameType::Rpdo(1, n),
            (0x280, n) => FrameType::Tpdo(2, n),
            (0x300, n) => FrameType::Rpdo(2, n),
            (0x380, n) => FrameType::Tpdo(3, n),
            (0x400, n) => FrameType::Rpdo(3, n),
            (0x480, n) => FrameType::Tpdo(4, n),
            (0x500, n) => FrameType::Rpdo(4, n),
            (0x580, n) => FrameType::SdoResponse(n),
            (0x600, n) => FrameType::SdoRequest(n),
            (0x700, n) => FrameType::Heartbeat(n),
            _ => FrameType::Unknown,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_id_range() {
        assert!(NodeId::new(0).is_err());
        assert!(NodeId::new(128).is_err());
        assert_eq!(NodeId::new(127).unwrap().raw(), 127);
        assert_eq!(NodeId::default().raw(), 19);
    }

    #[test]
    fn test_node_cob_ids() {
        let node = NodeId::new(19).unwrap();
        assert_eq!(node.rpdo1(), 0x213);
        assert_eq!(node.tpdo1(), 0x193);
        assert_eq!(node.sdo_rx(), 0x613);
        assert_eq!(node.sdo_tx(), 0x593);
        assert_eq!(node.heartbeat(), 0x713);
    }

    #[test]
    fn test_frame_type_classification() {
        assert_eq!(FrameType::from_id(0x000), FrameType::Nmt);
        assert_eq!(FrameType::from_id(0x080), FrameType::Sync);
        assert_eq!(FrameType::from_id(0x093), FrameType::Emergency(19));
        assert_eq!(FrameType::from_id(0x193), FrameType::Tpdo(1, 19));
        assert_eq!(FrameType::from_id(0x213), FrameType::Rpdo(1, 19));
        assert_eq!(FrameType::from_id(0x593), FrameType::SdoResponse(19));
        assert_eq!(FrameType::from_id(0x613), FrameType::SdoRequest(19));
        assert_eq!(FrameType::from_id(0x713), FrameType::Heartbeat(19));
    }

    #[test]
    fn test_frame_type_unknown() {
        assert_eq!(FrameType::from_id(0x180), FrameType::Unknown);
        assert_eq!(FrameType::from_id(0x800), FrameType::Unknown);
        assert_eq!(FrameType::from_id(0x1234_5678), FrameType::Unknown);
    }
}
