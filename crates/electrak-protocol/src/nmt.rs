//! NMT（网络管理）帧
//!
//! NMT 节点控制帧固定发往 COB-ID 0x000，2 字节：`[命令字, 节点 ID]`。
//! 节点 ID 为 0 表示广播给所有节点。NMT 没有应答帧，
//! 状态切换只能依靠发送后的等待时间保证。

use crate::ids::{COB_NMT, NodeId};
use crate::{ElectrakFrame, ProtocolError};
use num_enum::{IntoPrimitive, TryFromPrimitive};

/// NMT 节点控制命令字
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum NmtCommand {
    /// 进入 OPERATIONAL
    Start = 0x01,
    /// 进入 STOPPED
    Stop = 0x02,
    /// 进入 PRE-OPERATIONAL
    EnterPreOperational = 0x80,
    /// 复位应用（整个节点）
    ResetNode = 0x81,
    /// 复位通信参数
    ResetCommunication = 0x82,
}

impl NmtCommand {
    /// 命令执行后节点所处的状态
    ///
    /// 两种复位命令执行后节点会经历启动过程，此处统一记为 `ResetCommunication`，
    /// 随后由 `Start` 显式拉回 `Operational`。
    pub fn target_state(self) -> NmtState {
        match self {
            NmtCommand::Start => NmtState::Operational,
            NmtCommand::Stop => NmtState::Stopped,
            NmtCommand::EnterPreOperational => NmtState::PreOperational,
            NmtCommand::ResetNode | NmtCommand::ResetCommunication => {
                NmtState::ResetCommunication
            },
        }
    }
}

/// 节点 NMT 状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum NmtState {
    /// 预运行（上电后的初始状态，默认）
    #[default]
    PreOperational,
    /// 通信复位中（瞬态）
    ResetCommunication,
    /// 运行
    Operational,
    /// 停止
    Stopped,
}

impl NmtState {
    /// 心跳报文中的状态字节
    ///
    /// 复位是瞬态，复位结束时节点发送的是启动报文（0x00）。
    pub fn heartbeat_code(self) -> u8 {
        match self {
            NmtState::ResetCommunication => 0x00,
            NmtState::Stopped => 0x04,
            NmtState::Operational => 0x05,
            NmtState::PreOperational => 0x7F,
        }
    }

    /// 从心跳状态字节解析（高位 toggle 位被忽略）
    pub fn from_heartbeat_code(code: u8) -> Result<Self, ProtocolError> {
        match code & 0x7F {
            0x00 => Ok(NmtState::ResetCommunication),
            0x04 => Ok(NmtState::Stopped),
            0x05 => Ok(NmtState::Operational),
            0x7F => Ok(NmtState::PreOperational),
            _ => Err(ProtocolError::InvalidValue {
                field: "NmtState".to_string(),
                value: code,
            }),
        }
    }
}

impl std::fmt::Display for NmtState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            NmtState::PreOperational => "PRE-OPERATIONAL",
            NmtState::ResetCommunication => "RESET COMMUNICATION",
            NmtState::Operational => "OPERATIONAL",
            NmtState::Stopped => "STOPPED",
        };
        f.write_str(name)
    }
}

/// NMT 节点控制帧 (0x000)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NmtCommandFrame {
    pub command: NmtCommand,
    /// 目标节点；`None` 表示广播
    pub node: Option<NodeId>,
}

impl NmtCommandFrame {
    /// 发给单个节点的命令
    pub fn new(command: NmtCommand, node: NodeId) -> Self {
        Self {
            command,
            node: Some(node),
        }
    }

    /// 广播命令
    pub fn broadcast(command: NmtCommand) -> Self {
        Self {
            command,
            node: None,
        }
    }

    /// 转换为 CAN 帧
    pub fn to_frame(self) -> ElectrakFrame {
        let node = self.node.map(NodeId::raw).unwrap_or(0);
        ElectrakFrame::new_standard(COB_NMT as u16, &[self.command.into(), node])
    }
}

impl TryFrom<ElectrakFrame> for NmtCommandFrame {
    type Error = ProtocolError;

    fn try_from(frame: ElectrakFrame) -> Result<Self, Self::Error> {
        if frame.id != COB_NMT {
            return Err(ProtocolError::InvalidCanId { id: frame.id });
        }
        if frame.len < 2 {
            return Err(ProtocolError::InvalidLength {
                expected: 2,
                actual: frame.len as usize,
            });
        }

        let command =
            NmtCommand::try_from(frame.data[0]).map_err(|_| ProtocolError::InvalidValue {
                field: "NmtCommand".to_string(),
                value: frame.data[0],
            })?;
        let node = match frame.data[1] {
            0 => None,
            id => Some(NodeId::new(id)?),
        };

        Ok(Self { command, node })
    }
}

/// 心跳帧 (0x700 + 节点 ID)，1 字节状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatFrame {
    pub node: NodeId,
    pub state: NmtState,
}

impl HeartbeatFrame {
    pub fn new(node: NodeId, state: NmtState) -> Self {
        Self { node, state }
    }

    /// 转换为 CAN 帧
    pub fn to_frame(self) -> ElectrakFrame {
        ElectrakFrame::new_standard(self.node.heartbeat() as u16, &[self.state.heartbeat_code()])
    }
}

impl TryFrom<ElectrakFrame> for HeartbeatFrame {
    type Error = ProtocolError;

    fn try_from(frame: ElectrakFrame) -> Result<Self, Self::Error> {
        if frame.id & 0x780 != 0x700 || frame.id & 0x7F == 0 || frame.id > 0x7FF {
            return Err(ProtocolError::InvalidCanId { id: frame.id });
        }
        if frame.len != 1 {
            return Err(ProtocolError::InvalidLength {
                expected: 1,
                actual: frame.len as usize,
            });
        }

        Ok(Self {
            node: NodeId::new((frame.id & 0x7F) as u8)?,
            state: NmtState::from_heartbeat_code(frame.data[0])?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node19() -> NodeId {
        NodeId::new(19).unwrap()
    }

    #[test]
    fn test_reset_communication_frame() {
        let frame = NmtCommandFrame::new(NmtCommand::ResetCommunication, node19()).to_frame();
        assert_eq!(frame.id, 0x000);
        assert_eq!(frame.data_slice(), &[0x82, 19]);
    }

    #[test]
    fn test_start_frame() {
        let frame = NmtCommandFrame::new(NmtCommand::Start, node19()).to_frame();
        assert_eq!(frame.data_slice(), &[0x01, 0x13]);
    }

    #[test]
    fn test_broadcast_frame() {
        let frame = NmtCommandFrame::broadcast(NmtCommand::Stop).to_frame();
        assert_eq!(frame.data_slice(), &[0x02, 0x00]);
    }

    #[test]
    fn test_parse_nmt_frame() {
        let frame = ElectrakFrame::new_standard(0x000, &[0x80, 19]);
        let parsed = NmtCommandFrame::try_from(frame).unwrap();
        assert_eq!(parsed.command, NmtCommand::EnterPreOperational);
        assert_eq!(parsed.node, Some(node19()));

        let bad = ElectrakFrame::new_standard(0x000, &[0x42, 19]);
        assert!(NmtCommandFrame::try_from(bad).is_err());
    }

    #[test]
    fn test_target_state() {
        assert_eq!(NmtCommand::Start.target_state(), NmtState::Operational);
        assert_eq!(NmtCommand::Stop.target_state(), NmtState::Stopped);
        assert_eq!(
            NmtCommand::ResetCommunication.target_state(),
            NmtState::ResetCommunication
        );
    }

    #[test]
    fn test_heartbeat_frame_operational() {
        let frame = HeartbeatFrame::new(node19(), NmtState::Operational).to_frame();
        assert_eq!(frame.id, 0x713);
        assert_eq!(frame.data_slice(), &[0x05]);
    }

    #[test]
    fn test_parse_heartbeat_ignores_toggle_bit() {
        let frame = ElectrakFrame::new_standard(0x713, &[0x85]);
        let hb = HeartbeatFrame::try_from(frame).unwrap();
        assert_eq!(hb.state, NmtState::Operational);
        assert_eq!(hb.node.raw(), 19);
    }

    #[test]
    fn test_parse_heartbeat_rejects_other_ids() {
        let frame = ElectrakFrame::new_standard(0x593, &[0x05]);
        assert!(HeartbeatFrame::try_from(frame).is_err());
    }

    #[test]
    fn test_state_display() {
        assert_eq!(NmtState::Operational.to_string(), "OPERATIONAL");
        assert_eq!(NmtState::default(), NmtState::PreOperational);
    }
}
