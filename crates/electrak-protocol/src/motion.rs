//! 运动指令 RPDO 帧
//!
//! 发往 RPDO1（0x200 + 节点 ID），8 字节，小端字节序：
//!
//! ```text
//! Byte 0-1   目标位置（0.1 mm/单位）
//! Byte 2-3   电流上限（固定 125 = 12.5 A）
//! Byte 4-5   目标速度（0~1000）
//! Byte 6     加速度/曲线
//! Byte 7     控制位（Bit 0 = 运动使能）
//! ```

use crate::ids::NodeId;
use crate::{ElectrakFrame, ProtocolError, bytes_to_u16_le, u16_to_bytes_le};
use bilge::prelude::*;

/// 电流上限（设备单位 0.1 A）
pub const CURRENT_LIMIT: u16 = 125;

/// 目标速度上限
pub const MAX_SPEED: u16 = 1000;

/// 目标位置上限（mm），位置 ×10 必须能放进 u16
pub const MAX_POSITION_MM: u32 = u16::MAX as u32 / 10;

/// 加速度字节上限
pub const MAX_ACCELERATION: u32 = u8::MAX as u32;

/// 运动方向
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Direction {
    /// 伸出到目标位置
    Raise,
    /// 缩回到 0 mm
    Lower,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Raise => f.write_str("raise"),
            Direction::Lower => f.write_str("lower"),
        }
    }
}

impl std::str::FromStr for Direction {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "raise" | "up" | "extend" => Ok(Direction::Raise),
            "lower" | "down" | "retract" => Ok(Direction::Lower),
            other => Err(ProtocolError::ParseError(format!(
                "unknown direction '{}'",
                other
            ))),
        }
    }
}

/// 加速度超过 255 时的处理方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum AccelerationOverflow {
    /// 返回错误（默认）
    #[default]
    Reject,
    /// 截断为 255
    Clamp,
    /// 只保留低字节（旧工具的行为）
    Truncate,
}

impl AccelerationOverflow {
    /// 按策略把加速度压到一个字节
    pub fn apply(self, acceleration: u32) -> Result<u8, ProtocolError> {
        if acceleration <= MAX_ACCELERATION {
            return Ok(acceleration as u8);
        }
        match self {
            AccelerationOverflow::Reject => Err(ProtocolError::OutOfRange {
                field: "acceleration".to_string(),
                value: acceleration,
                max: MAX_ACCELERATION,
            }),
            AccelerationOverflow::Clamp => Ok(u8::MAX),
            AccelerationOverflow::Truncate => Ok((acceleration & 0xFF) as u8),
        }
    }
}

/// 控制位（Byte 7）
///
/// 只有 Bit 0 有定义，其余位保持 0。
#[bitsize(8)]
#[derive(FromBits, DebugBits, Clone, Copy, Default)]
pub struct MotionControlFlags {
    pub motion_enable: bool,
    pub reserved: u7,
}

impl MotionControlFlags {
    pub fn enabled(enable: bool) -> Self {
        let mut flags = MotionControlFlags::from(u8::new(0));
        flags.set_motion_enable(enable);
        flags
    }
}

/// 运动请求
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MotionCommand {
    pub direction: Direction,
    /// 目标位置（mm）
    pub position_mm: u32,
    /// 目标速度（0~1000）
    pub speed: u16,
    /// 加速度/曲线（超过 255 由 `AccelerationOverflow` 决定）
    pub acceleration: u32,
    pub enable: bool,
}

impl MotionCommand {
    /// 创建使能的运动请求
    pub fn new(direction: Direction, position_mm: u32, speed: u16, acceleration: u32) -> Self {
        Self {
            direction,
            position_mm,
            speed,
            acceleration,
            enable: true,
        }
    }

    /// 校验并归一化
    ///
    /// `Lower` 的目标位置恒为 0；加速度按策略处理后一定 ≤ 255。
    pub fn normalize(self, policy: AccelerationOverflow) -> Result<Self, ProtocolError> {
        let position_mm = match self.direction {
            Direction::Lower => 0,
            Direction::Raise => self.position_mm,
        };
        if position_mm > MAX_POSITION_MM {
            return Err(ProtocolError::OutOfRange {
                field: "position_mm".to_string(),
                value: position_mm,
                max: MAX_POSITION_MM,
            });
        }
        if self.speed > MAX_SPEED {
            return Err(ProtocolError::OutOfRange {
                field: "speed".to_string(),
                value: self.speed as u32,
                max: MAX_SPEED as u32,
            });
        }
        let acceleration = policy.apply(self.acceleration)?;

        Ok(Self {
            position_mm,
            acceleration: acceleration as u32,
            ..self
        })
    }

    /// 归一化并编码
    pub fn encode(self, policy: AccelerationOverflow) -> Result<MotionFrame, ProtocolError> {
        let cmd = self.normalize(policy)?;
        Ok(MotionFrame::from_parts(
            (cmd.position_mm * 10) as u16,
            cmd.speed,
            cmd.acceleration as u8,
            MotionControlFlags::enabled(cmd.enable),
        ))
    }
}

/// 编码后的 8 字节运动帧
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MotionFrame(pub [u8; 8]);

impl MotionFrame {
    /// 全零帧（无运动、未使能）
    pub const IDLE: MotionFrame = MotionFrame([0; 8]);

    fn from_parts(position_raw: u16, speed: u16, acceleration: u8, flags: MotionControlFlags) -> Self {
        let mut data = [0u8; 8];
        data[0..2].copy_from_slice(&u16_to_bytes_le(position_raw));
        data[2..4].copy_from_slice(&u16_to_bytes_le(CURRENT_LIMIT));
        data[4..6].copy_from_slice(&u16_to_bytes_le(speed));
        data[6] = acceleration;
        data[7] = u8::from(flags).value();
        Self(data)
    }

    pub fn bytes(&self) -> &[u8; 8] {
        &self.0
    }

    /// 目标位置原始值（0.1 mm）
    pub fn position_raw(&self) -> u16 {
        bytes_to_u16_le([self.0[0], self.0[1]])
    }

    /// 目标位置（mm，向下取整）
    pub fn position_mm(&self) -> u32 {
        self.position_raw() as u32 / 10
    }

    pub fn current_limit(&self) -> u16 {
        bytes_to_u16_le([self.0[2], self.0[3]])
    }

    pub fn speed(&self) -> u16 {
        bytes_to_u16_le([self.0[4], self.0[5]])
    }

    pub fn acceleration(&self) -> u8 {
        self.0[6]
    }

    pub fn flags(&self) -> MotionControlFlags {
        MotionControlFlags::from(u8::new(self.0[7]))
    }

    pub fn motion_enabled(&self) -> bool {
        self.flags().motion_enable()
    }

    /// 清除运动使能位，其余字段不变
    pub fn disabled(self) -> Self {
        let mut flags = self.flags();
        flags.set_motion_enable(false);
        let mut data = self.0;
        data[7] = u8::from(flags).value();
        Self(data)
    }

    /// 转换为发往指定节点 RPDO1 的 CAN 帧
    pub fn to_frame(self, node: NodeId) -> ElectrakFrame {
        ElectrakFrame::new_standard(node.rpdo1() as u16, &self.0)
    }
}

impl std::fmt::Display for MotionFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, b) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{:02X}", b)?;
        }
        Ok(())
    }
}

impl TryFrom<ElectrakFrame> for MotionFrame {
    type Error = ProtocolError;

    fn try_from(frame: ElectrakFrame) -> Result<Self, Self::Error> {
        if frame.id & 0x780 != 0x200 || frame.id & 0x7F == 0 || frame.id > 0x7FF {
            return Err(ProtocolError::InvalidCanId { id: frame.id });
        }
        if frame.len != 8 {
            return Err(ProtocolError::InvalidLength {
                expected: 8,
                actual: frame.len as usize,
            });
        }
        Ok(Self(frame.data))
    }
}
