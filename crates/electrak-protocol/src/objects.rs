//! 对象字典地址与参数值
//!
//! 只覆盖 Electrak HD 工具链实际访问的固定索引，不解析 EDS 文件。

use crate::ProtocolError;

// ============================================================================
// 对象索引常量
// ============================================================================

/// 设备类型
pub const OD_DEVICE_TYPE: u16 = 0x1000;
/// 设备名称（VISIBLE_STRING）
pub const OD_DEVICE_NAME: u16 = 0x1008;
/// 硬件版本（VISIBLE_STRING）
pub const OD_HARDWARE_VERSION: u16 = 0x1009;
/// 软件版本（VISIBLE_STRING）
pub const OD_SOFTWARE_VERSION: u16 = 0x100A;
/// 参数保存（子索引 1 = 保存全部参数）
pub const OD_STORE_PARAMETERS: u16 = 0x1010;
/// 生产者心跳时间（ms）
pub const OD_PRODUCER_HEARTBEAT_TIME: u16 = 0x1017;
/// 身份对象（子索引 1~4）
pub const OD_IDENTITY: u16 = 0x1018;
/// 睡眠模式使能（1 = 使能，0 = 禁用）
pub const OD_ENABLE_SLEEP: u16 = 0x2013;
/// 默认目标速度（0~1000）
pub const OD_DEFAULT_TARGET_SPEED: u16 = 0x2102;
/// 运动使能
pub const OD_ENABLE_MOTION: u16 = 0x2104;

/// 写入 0x1010 的保存签名（ASCII "save"，小端即 0x65766173）
pub const STORE_SIGNATURE: [u8; 4] = *b"save";

/// 对象字典地址（索引 + 子索引）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ParameterAddress {
    pub index: u16,
    pub sub_index: u8,
}

impl ParameterAddress {
    pub const fn new(index: u16, sub_index: u8) -> Self {
        Self { index, sub_index }
    }

    /// 子索引为 0 的简单变量
    pub const fn var(index: u16) -> Self {
        Self::new(index, 0)
    }

    /// "保存全部参数" 命令对象 (0x1010:01)
    pub const fn store_all() -> Self {
        Self::new(OD_STORE_PARAMETERS, 1)
    }

    /// SDO 帧中的多路复用字段（索引小端 + 子索引）
    pub fn mux_bytes(self) -> [u8; 3] {
        let [lo, hi] = self.index.to_le_bytes();
        [lo, hi, self.sub_index]
    }

    /// 从多路复用字段解析
    pub fn from_mux_bytes(bytes: [u8; 3]) -> Self {
        Self::new(u16::from_le_bytes([bytes[0], bytes[1]]), bytes[2])
    }
}

impl std::fmt::Display for ParameterAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{:04X}:{:02X}", self.index, self.sub_index)
    }
}

impl std::str::FromStr for ParameterAddress {
    type Err = ProtocolError;

    /// 接受 `0x2013`、`0x1010:1`、`8211:0` 等写法
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (index, sub) = match s.split_once(':') {
            Some((index, sub)) => (index, Some(sub)),
            None => (s, None),
        };

        let index = parse_int(index.trim())
            .and_then(|v| u16::try_from(v).ok())
            .ok_or_else(|| ProtocolError::ParseError(format!("invalid object index '{}'", s)))?;
        let sub_index = match sub {
            Some(sub) => parse_int(sub.trim())
                .and_then(|v| u8::try_from(v).ok())
                .ok_or_else(|| ProtocolError::ParseError(format!("invalid sub-index '{}'", s)))?,
            None => 0,
        };

        Ok(Self::new(index, sub_index))
    }
}

fn parse_int(s: &str) -> Option<u64> {
    match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => s.parse().ok(),
    }
}

/// 参数值类型（决定 SDO 传输的字节宽度）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ValueKind {
    U8,
    U16,
    U32,
    I8,
    I16,
    I32,
    /// 字节序列（字符串、域对象）
    Bytes,
}

impl ValueKind {
    /// 固定宽度，`Bytes` 为 `None`
    pub fn width(self) -> Option<usize> {
        match self {
            ValueKind::U8 | ValueKind::I8 => Some(1),
            ValueKind::U16 | ValueKind::I16 => Some(2),
            ValueKind::U32 | ValueKind::I32 => Some(4),
            ValueKind::Bytes => None,
        }
    }
}

/// 参数值
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ParameterValue {
    U8(u8),
    U16(u16),
    U32(u32),
    I8(i8),
    I16(i16),
    I32(i32),
    Bytes(Vec<u8>),
}

impl ParameterValue {
    pub fn kind(&self) -> ValueKind {
        match self {
            ParameterValue::U8(_) => ValueKind::U8,
            ParameterValue::U16(_) => ValueKind::U16,
            ParameterValue::U32(_) => ValueKind::U32,
            ParameterValue::I8(_) => ValueKind::I8,
            ParameterValue::I16(_) => ValueKind::I16,
            ParameterValue::I32(_) => ValueKind::I32,
            ParameterValue::Bytes(_) => ValueKind::Bytes,
        }
    }

    /// 编码为小端字节（SDO 下载数据）
    pub fn to_le_bytes(&self) -> Vec<u8> {
        match self {
            ParameterValue::U8(v) => v.to_le_bytes().to_vec(),
            ParameterValue::U16(v) => v.to_le_bytes().to_vec(),
            ParameterValue::U32(v) => v.to_le_bytes().to_vec(),
            ParameterValue::I8(v) => v.to_le_bytes().to_vec(),
            ParameterValue::I16(v) => v.to_le_bytes().to_vec(),
            ParameterValue::I32(v) => v.to_le_bytes().to_vec(),
            ParameterValue::Bytes(v) => v.clone(),
        }
    }

    /// 按指定类型解码
    ///
    /// 设备可能在未指示长度的加速上传中返回 4 字节，因此数值类型按宽度
    /// 截断或补零，不要求长度严格一致。
    pub fn decode(kind: ValueKind, bytes: &[u8]) -> Self {
        let mut buf = [0u8; 4];
        let n = bytes.len().min(4);
        buf[..n].copy_from_slice(&bytes[..n]);

        match kind {
            ValueKind::U8 => ParameterValue::U8(buf[0]),
            ValueKind::U16 => ParameterValue::U16(u16::from_le_bytes([buf[0], buf[1]])),
            ValueKind::U32 => ParameterValue::U32(u32::from_le_bytes(buf)),
            ValueKind::I8 => ParameterValue::I8(buf[0] as i8),
            ValueKind::I16 => ParameterValue::I16(i16::from_le_bytes([buf[0], buf[1]])),
            ValueKind::I32 => ParameterValue::I32(i32::from_le_bytes(buf)),
            ValueKind::Bytes => ParameterValue::Bytes(bytes.to_vec()),
        }
    }

    /// 按类型解码回读数据，不丢弃有效位
    ///
    /// 数据比类型宽且多出的字节不全为零时，按实际长度解码（见 `from_upload`），
    /// 与写入值比较时就不会因截断而误判为一致。
    pub fn decode_read_back(kind: ValueKind, bytes: &[u8]) -> Self {
        match kind.width() {
            Some(width) if bytes.len() > width && bytes[width..].iter().any(|&b| b != 0) => {
                Self::from_upload(bytes)
            },
            _ => Self::decode(kind, bytes),
        }
    }

    /// 由上传数据长度推断类型：1/2/4 字节视为无符号整数，其余为字节序列
    pub fn from_upload(bytes: &[u8]) -> Self {
        match bytes.len() {
            1 => Self::decode(ValueKind::U8, bytes),
            2 => Self::decode(ValueKind::U16, bytes),
            4 => Self::decode(ValueKind::U32, bytes),
            _ => ParameterValue::Bytes(bytes.to_vec()),
        }
    }

    /// 整数值（字节序列返回 `None`）
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ParameterValue::U8(v) => Some(*v as i64),
            ParameterValue::U16(v) => Some(*v as i64),
            ParameterValue::U32(v) => Some(*v as i64),
            ParameterValue::I8(v) => Some(*v as i64),
            ParameterValue::I16(v) => Some(*v as i64),
            ParameterValue::I32(v) => Some(*v as i64),
            ParameterValue::Bytes(_) => None,
        }
    }

    /// 从整数构造指定宽度的值，超出范围返回错误
    pub fn from_i64(kind: ValueKind, value: i64) -> Result<Self, ProtocolError> {
        let out_of_range = |max: u32| ProtocolError::OutOfRange {
            field: format!("{:?}", kind),
            value: value.clamp(0, u32::MAX as i64) as u32,
            max,
        };

        Ok(match kind {
            ValueKind::U8 => ParameterValue::U8(
                u8::try_from(value).map_err(|_| out_of_range(u8::MAX as u32))?,
            ),
            ValueKind::U16 => ParameterValue::U16(
                u16::try_from(value).map_err(|_| out_of_range(u16::MAX as u32))?,
            ),
            ValueKind::U32 => {
                ParameterValue::U32(u32::try_from(value).map_err(|_| out_of_range(u32::MAX))?)
            },
            ValueKind::I8 => ParameterValue::I8(
                i8::try_from(value).map_err(|_| out_of_range(i8::MAX as u32))?,
            ),
            ValueKind::I16 => ParameterValue::I16(
                i16::try_from(value).map_err(|_| out_of_range(i16::MAX as u32))?,
            ),
            ValueKind::I32 => ParameterValue::I32(
                i32::try_from(value).map_err(|_| out_of_range(i32::MAX as u32))?,
            ),
            ValueKind::Bytes => ParameterValue::Bytes(value.to_le_bytes().to_vec()),
        })
    }
}

impl std::fmt::Display for ParameterValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParameterValue::Bytes(bytes) => match std::str::from_utf8(bytes) {
                Ok(s) if !s.is_empty() && s.chars().all(|c| !c.is_control() || c == '\0') => {
                    write!(f, "\"{}\"", s.trim_end_matches('\0'))
                },
                _ => {
                    for (i, b) in bytes.iter().enumerate() {
                        if i > 0 {
                            f.write_str(" ")?;
                        }
                        write!(f, "{:02X}", b)?;
                    }
                    Ok(())
                },
            },
            other => match other.as_i64() {
                Some(v) => write!(f, "{}", v),
                None => Ok(()),
            },
        }
    }
}

/// 已知参数条目
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KnownParameter {
    pub address: ParameterAddress,
    pub name: &'static str,
    pub kind: ValueKind,
}

/// Electrak HD 工具链访问的参数表
pub const KNOWN_PARAMETERS: &[KnownParameter] = &[
    KnownParameter {
        address: ParameterAddress::var(OD_DEVICE_TYPE),
        name: "Device Type",
        kind: ValueKind::U32,
    },
    KnownParameter {
        address: ParameterAddress::var(OD_DEVICE_NAME),
        name: "Manufacturer Device Name",
        kind: ValueKind::Bytes,
    },
    KnownParameter {
        address: ParameterAddress::var(OD_HARDWARE_VERSION),
        name: "Manufacturer Hardware Version",
        kind: ValueKind::Bytes,
    },
    KnownParameter {
        address: ParameterAddress::var(OD_SOFTWARE_VERSION),
        name: "Manufacturer Software Version",
        kind: ValueKind::Bytes,
    },
    KnownParameter {
        address: ParameterAddress::var(OD_PRODUCER_HEARTBEAT_TIME),
        name: "Producer Heartbeat Time",
        kind: ValueKind::U16,
    },
    KnownParameter {
        address: ParameterAddress::new(OD_IDENTITY, 1),
        name: "Vendor-ID",
        kind: ValueKind::U32,
    },
    KnownParameter {
        address: ParameterAddress::new(OD_IDENTITY, 2),
        name: "Product Code",
        kind: ValueKind::U32,
    },
    KnownParameter {
        address: ParameterAddress::new(OD_IDENTITY, 3),
        name: "Revision Number",
        kind: ValueKind::U32,
    },
    KnownParameter {
        address: ParameterAddress::new(OD_IDENTITY, 4),
        name: "Serial Number",
        kind: ValueKind::U32,
    },
    KnownParameter {
        address: ParameterAddress::var(OD_ENABLE_SLEEP),
        name: "Enable Sleep",
        kind: ValueKind::U8,
    },
    KnownParameter {
        address: ParameterAddress::var(OD_DEFAULT_TARGET_SPEED),
        name: "Default Target Speed",
        kind: ValueKind::U16,
    },
    KnownParameter {
        address: ParameterAddress::var(OD_ENABLE_MOTION),
        name: "Enable Motion",
        kind: ValueKind::U8,
    },
];

/// 按地址查找已知参数
pub fn known_parameter(address: ParameterAddress) -> Option<&'static KnownParameter> {
    KNOWN_PARAMETERS.iter().find(|p| p.address == address)
}
