//! SDO（服务数据对象）帧结构
//!
//! 实现 CiA 301 的加速（expedited）与分段（segmented）上传/下载。
//! 所有 SDO 帧固定 8 字节：
//!
//! ```text
//! Byte 0     命令字（位域，见 InitiateCommand / SegmentCommand）
//! Byte 1-2   索引（小端）
//! Byte 3     子索引
//! Byte 4-7   数据 / 长度 / 中止码
//! ```
//!
//! 分段帧没有多路复用字段，Byte 1-7 全部是数据。

use crate::ids::NodeId;
use crate::objects::ParameterAddress;
use crate::{ElectrakFrame, ProtocolError, bytes_to_u32_le, u32_to_bytes_le};
use bilge::prelude::*;
use num_enum::TryFromPrimitive;

// ============================================================================
// 命令字位域
// ============================================================================

/// 客户端命令说明符（ccs）
pub const CCS_DOWNLOAD_SEGMENT: u8 = 0;
pub const CCS_INITIATE_DOWNLOAD: u8 = 1;
pub const CCS_INITIATE_UPLOAD: u8 = 2;
pub const CCS_UPLOAD_SEGMENT: u8 = 3;

/// 服务端命令说明符（scs）
pub const SCS_UPLOAD_SEGMENT: u8 = 0;
pub const SCS_DOWNLOAD_SEGMENT: u8 = 1;
pub const SCS_INITIATE_UPLOAD: u8 = 2;
pub const SCS_INITIATE_DOWNLOAD: u8 = 3;

/// 中止传输（双向通用）
pub const CS_ABORT: u8 = 4;

/// 初始化帧命令字（Byte 0）
///
/// - Bit 0: s，数据长度已指示
/// - Bit 1: e，加速传输
/// - Bit 2-3: n，加速传输中未使用的字节数
/// - Bit 4: 保留
/// - Bit 5-7: 命令说明符
#[bitsize(8)]
#[derive(FromBits, DebugBits, Clone, Copy, Default)]
pub struct InitiateCommand {
    pub size_indicated: bool,
    pub expedited: bool,
    pub unused_bytes: u2,
    pub reserved: u1,
    pub specifier: u3,
}

/// 分段帧命令字（Byte 0）
///
/// - Bit 0: c，最后一段
/// - Bit 1-3: n，本段未使用的字节数
/// - Bit 4: t，翻转位
/// - Bit 5-7: 命令说明符
#[bitsize(8)]
#[derive(FromBits, DebugBits, Clone, Copy, Default)]
pub struct SegmentCommand {
    pub last: bool,
    pub unused_bytes: u3,
    pub toggle: bool,
    pub specifier: u3,
}

fn specifier_of(byte: u8) -> u8 {
    byte >> 5
}

fn initiate_byte(specifier: u8, expedited: bool, unused: u8, size_indicated: bool) -> u8 {
    let mut cmd = InitiateCommand::from(u8::new(0));
    cmd.set_specifier(u3::new(specifier));
    cmd.set_expedited(expedited);
    cmd.set_unused_bytes(u2::new(unused));
    cmd.set_size_indicated(size_indicated);
    u8::from(cmd).value()
}

fn segment_byte(specifier: u8, toggle: bool, unused: u8, last: bool) -> u8 {
    let mut cmd = SegmentCommand::from(u8::new(0));
    cmd.set_specifier(u3::new(specifier));
    cmd.set_toggle(toggle);
    cmd.set_unused_bytes(u3::new(unused));
    cmd.set_last(last);
    u8::from(cmd).value()
}

fn mux_frame(first: u8, address: ParameterAddress, payload: [u8; 4]) -> [u8; 8] {
    let [lo, hi, sub] = address.mux_bytes();
    [first, lo, hi, sub, payload[0], payload[1], payload[2], payload[3]]
}

fn mux_of(data: &[u8; 8]) -> ParameterAddress {
    ParameterAddress::from_mux_bytes([data[1], data[2], data[3]])
}

fn checked_data(frame: &ElectrakFrame) -> Result<[u8; 8], ProtocolError> {
    if frame.len != 8 {
        return Err(ProtocolError::InvalidLength {
            expected: 8,
            actual: frame.len as usize,
        });
    }
    Ok(frame.data)
}

// ============================================================================
// 中止码
// ============================================================================

/// SDO 中止码（CiA 301 表 22）
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u32)]
pub enum SdoAbortCode {
    ToggleBitNotAlternated = 0x0503_0000,
    ProtocolTimedOut = 0x0504_0000,
    CommandSpecifierInvalid = 0x0504_0001,
    OutOfMemory = 0x0504_0005,
    UnsupportedAccess = 0x0601_0000,
    WriteOnly = 0x0601_0001,
    ReadOnly = 0x0601_0002,
    ObjectDoesNotExist = 0x0602_0000,
    ParameterIncompatibility = 0x0604_0043,
    HardwareError = 0x0606_0000,
    LengthMismatch = 0x0607_0010,
    LengthTooHigh = 0x0607_0012,
    LengthTooLow = 0x0607_0013,
    SubIndexDoesNotExist = 0x0609_0011,
    InvalidValue = 0x0609_0030,
    ValueTooHigh = 0x0609_0031,
    ValueTooLow = 0x0609_0032,
    GeneralError = 0x0800_0000,
    StorageError = 0x0800_0020,
    LocalControl = 0x0800_0021,
    DeviceState = 0x0800_0022,
    NoDataAvailable = 0x0800_0024,
}

impl SdoAbortCode {
    /// 中止码说明
    pub fn description(self) -> &'static str {
        match self {
            SdoAbortCode::ToggleBitNotAlternated => "toggle bit not alternated",
            SdoAbortCode::ProtocolTimedOut => "SDO protocol timed out",
            SdoAbortCode::CommandSpecifierInvalid => "command specifier not valid or unknown",
            SdoAbortCode::OutOfMemory => "out of memory",
            SdoAbortCode::UnsupportedAccess => "unsupported access to an object",
            SdoAbortCode::WriteOnly => "attempt to read a write only object",
            SdoAbortCode::ReadOnly => "attempt to write a read only object",
            SdoAbortCode::ObjectDoesNotExist => "object does not exist in the object dictionary",
            SdoAbortCode::ParameterIncompatibility => "general parameter incompatibility",
            SdoAbortCode::HardwareError => "access failed due to a hardware error",
            SdoAbortCode::LengthMismatch => "data type does not match, length does not match",
            SdoAbortCode::LengthTooHigh => "data type does not match, length too high",
            SdoAbortCode::LengthTooLow => "data type does not match, length too low",
            SdoAbortCode::SubIndexDoesNotExist => "sub-index does not exist",
            SdoAbortCode::InvalidValue => "invalid value for parameter",
            SdoAbortCode::ValueTooHigh => "value of parameter written too high",
            SdoAbortCode::ValueTooLow => "value of parameter written too low",
            SdoAbortCode::GeneralError => "general error",
            SdoAbortCode::StorageError => "data cannot be transferred or stored",
            SdoAbortCode::LocalControl => "data cannot be stored because of local control",
            SdoAbortCode::DeviceState => "data cannot be stored because of the device state",
            SdoAbortCode::NoDataAvailable => "no data available",
        }
    }

    /// 任意原始中止码的说明（未知码返回 "unknown abort code"）
    pub fn describe(raw: u32) -> &'static str {
        SdoAbortCode::try_from(raw)
            .map(SdoAbortCode::description)
            .unwrap_or("unknown abort code")
    }
}

// ============================================================================
// 客户端请求
// ============================================================================

/// SDO 客户端请求（主站 → 执行器，COB-ID 0x600 + 节点）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdoRequest {
    /// 初始化上传
    InitiateUpload { address: ParameterAddress },
    /// 请求下一个上传分段
    UploadSegment { toggle: bool },
    /// 加速下载（1~4 字节）
    ExpeditedDownload {
        address: ParameterAddress,
        data: [u8; 4],
        len: u8,
    },
    /// 初始化分段下载（指示总长度）
    InitiateSegmentedDownload { address: ParameterAddress, size: u32 },
    /// 下载分段（1~7 字节）
    DownloadSegment {
        toggle: bool,
        data: [u8; 7],
        len: u8,
        last: bool,
    },
    /// 客户端中止
    Abort { address: ParameterAddress, code: u32 },
}

impl SdoRequest {
    /// 构建加速下载请求，`bytes` 长度必须为 1~4
    pub fn expedited_download(
        address: ParameterAddress,
        bytes: &[u8],
    ) -> Result<Self, ProtocolError> {
        if bytes.is_empty() || bytes.len() > 4 {
            return Err(ProtocolError::InvalidLength {
                expected: 4,
                actual: bytes.len(),
            });
        }
        let mut data = [0u8; 4];
        data[..bytes.len()].copy_from_slice(bytes);
        Ok(SdoRequest::ExpeditedDownload {
            address,
            data,
            len: bytes.len() as u8,
        })
    }

    /// 构建下载分段，`bytes` 长度必须为 1~7
    pub fn download_segment(toggle: bool, bytes: &[u8], last: bool) -> Result<Self, ProtocolError> {
        if bytes.is_empty() || bytes.len() > 7 {
            return Err(ProtocolError::InvalidLength {
                expected: 7,
                actual: bytes.len(),
            });
        }
        let mut data = [0u8; 7];
        data[..bytes.len()].copy_from_slice(bytes);
        Ok(SdoRequest::DownloadSegment {
            toggle,
            data,
            len: bytes.len() as u8,
            last,
        })
    }

    /// 编码 8 字节负载
    pub fn to_bytes(self) -> [u8; 8] {
        match self {
            SdoRequest::InitiateUpload { address } => {
                mux_frame(initiate_byte(CCS_INITIATE_UPLOAD, false, 0, false), address, [0; 4])
            },
            SdoRequest::UploadSegment { toggle } => {
                let mut out = [0u8; 8];
                out[0] = segment_byte(CCS_UPLOAD_SEGMENT, toggle, 0, false);
                out
            },
            SdoRequest::ExpeditedDownload { address, data, len } => mux_frame(
                initiate_byte(CCS_INITIATE_DOWNLOAD, true, 4 - len, true),
                address,
                data,
            ),
            SdoRequest::InitiateSegmentedDownload { address, size } => mux_frame(
                initiate_byte(CCS_INITIATE_DOWNLOAD, false, 0, true),
                address,
                u32_to_bytes_le(size),
            ),
            SdoRequest::DownloadSegment {
                toggle,
                data,
                len,
                last,
            } => {
                let mut out = [0u8; 8];
                out[0] = segment_byte(CCS_DOWNLOAD_SEGMENT, toggle, 7 - len, last);
                out[1..].copy_from_slice(&data);
                out
            },
            SdoRequest::Abort { address, code } => {
                mux_frame(CS_ABORT << 5, address, u32_to_bytes_le(code))
            },
        }
    }

    /// 转换为发往指定节点的 CAN 帧
    pub fn to_frame(self, node: NodeId) -> ElectrakFrame {
        ElectrakFrame::new_standard(node.sdo_rx() as u16, &self.to_bytes())
    }

    /// 解析请求帧数据（用于模拟服务端与总线监听）
    pub fn parse(frame: &ElectrakFrame) -> Result<Self, ProtocolError> {
        let data = checked_data(frame)?;
        let address = mux_of(&data);

        match specifier_of(data[0]) {
            CCS_INITIATE_UPLOAD => Ok(SdoRequest::InitiateUpload { address }),
            CCS_UPLOAD_SEGMENT => {
                let cmd = SegmentCommand::from(u8::new(data[0]));
                Ok(SdoRequest::UploadSegment {
                    toggle: cmd.toggle(),
                })
            },
            CCS_INITIATE_DOWNLOAD => {
                let cmd = InitiateCommand::from(u8::new(data[0]));
                if cmd.expedited() {
                    let len = if cmd.size_indicated() {
                        4 - cmd.unused_bytes().value()
                    } else {
                        4
                    };
                    Ok(SdoRequest::ExpeditedDownload {
                        address,
                        data: [data[4], data[5], data[6], data[7]],
                        len,
                    })
                } else {
                    Ok(SdoRequest::InitiateSegmentedDownload {
                        address,
                        size: bytes_to_u32_le([data[4], data[5], data[6], data[7]]),
                    })
                }
            },
            CCS_DOWNLOAD_SEGMENT => {
                let cmd = SegmentCommand::from(u8::new(data[0]));
                let mut payload = [0u8; 7];
                payload.copy_from_slice(&data[1..]);
                Ok(SdoRequest::DownloadSegment {
                    toggle: cmd.toggle(),
                    data: payload,
                    len: 7 - cmd.unused_bytes().value(),
                    last: cmd.last(),
                })
            },
            CS_ABORT => Ok(SdoRequest::Abort {
                address,
                code: bytes_to_u32_le([data[4], data[5], data[6], data[7]]),
            }),
            _ => Err(ProtocolError::InvalidValue {
                field: "SdoRequest command specifier".to_string(),
                value: data[0],
            }),
        }
    }
}

// ============================================================================
// 服务端应答
// ============================================================================

/// SDO 服务端应答（执行器 → 主站，COB-ID 0x580 + 节点）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdoResponse {
    /// 加速上传应答，`len` 为 `None` 表示设备未指示长度（按 4 字节处理）
    ExpeditedUpload {
        address: ParameterAddress,
        data: [u8; 4],
        len: Option<u8>,
    },
    /// 分段上传初始化应答
    SegmentedUpload {
        address: ParameterAddress,
        size: Option<u32>,
    },
    /// 上传分段
    UploadSegment {
        toggle: bool,
        data: [u8; 7],
        len: u8,
        last: bool,
    },
    /// 下载初始化确认
    DownloadAck { address: ParameterAddress },
    /// 下载分段确认
    DownloadSegmentAck { toggle: bool },
    /// 服务端中止
    Abort { address: ParameterAddress, code: u32 },
}

impl SdoResponse {
    /// 加速上传应答的有效数据
    pub fn expedited_bytes(data: &[u8; 4], len: Option<u8>) -> &[u8] {
        &data[..len.unwrap_or(4).min(4) as usize]
    }

    /// 构建加速上传应答，`bytes` 长度必须为 1~4
    pub fn expedited_upload(
        address: ParameterAddress,
        bytes: &[u8],
    ) -> Result<Self, ProtocolError> {
        if bytes.is_empty() || bytes.len() > 4 {
            return Err(ProtocolError::InvalidLength {
                expected: 4,
                actual: bytes.len(),
            });
        }
        let mut data = [0u8; 4];
        data[..bytes.len()].copy_from_slice(bytes);
        Ok(SdoResponse::ExpeditedUpload {
            address,
            data,
            len: Some(bytes.len() as u8),
        })
    }

    /// 编码 8 字节负载
    pub fn to_bytes(self) -> [u8; 8] {
        match self {
            SdoResponse::ExpeditedUpload { address, data, len } => {
                let first = match len {
                    Some(len) => initiate_byte(SCS_INITIATE_UPLOAD, true, 4 - len.min(4), true),
                    None => initiate_byte(SCS_INITIATE_UPLOAD, true, 0, false),
                };
                mux_frame(first, address, data)
            },
            SdoResponse::SegmentedUpload { address, size } => mux_frame(
                initiate_byte(SCS_INITIATE_UPLOAD, false, 0, size.is_some()),
                address,
                u32_to_bytes_le(size.unwrap_or(0)),
            ),
            SdoResponse::UploadSegment {
                toggle,
                data,
                len,
                last,
            } => {
                let mut out = [0u8; 8];
                out[0] = segment_byte(SCS_UPLOAD_SEGMENT, toggle, 7 - len.min(7), last);
                out[1..].copy_from_slice(&data);
                out
            },
            SdoResponse::DownloadAck { address } => {
                mux_frame(SCS_INITIATE_DOWNLOAD << 5, address, [0; 4])
            },
            SdoResponse::DownloadSegmentAck { toggle } => {
                let mut out = [0u8; 8];
                out[0] = segment_byte(SCS_DOWNLOAD_SEGMENT, toggle, 0, false);
                out
            },
            SdoResponse::Abort { address, code } => {
                mux_frame(CS_ABORT << 5, address, u32_to_bytes_le(code))
            },
        }
    }

    /// 转换为从指定节点发出的 CAN 帧
    pub fn to_frame(self, node: NodeId) -> ElectrakFrame {
        ElectrakFrame::new_standard(node.sdo_tx() as u16, &self.to_bytes())
    }

    /// 解析应答帧数据
    ///
    /// 分段帧与初始化帧的命令字布局不同，只能由命令说明符区分；
    /// 调用方需要结合当前传输阶段判断应答是否符合预期。
    pub fn parse(frame: &ElectrakFrame) -> Result<Self, ProtocolError> {
        let data = checked_data(frame)?;
        let address = mux_of(&data);

        match specifier_of(data[0]) {
            SCS_INITIATE_UPLOAD => {
                let cmd = InitiateCommand::from(u8::new(data[0]));
                let payload = [data[4], data[5], data[6], data[7]];
                if cmd.expedited() {
                    let len = cmd
                        .size_indicated()
                        .then(|| 4 - cmd.unused_bytes().value());
                    Ok(SdoResponse::ExpeditedUpload {
                        address,
                        data: payload,
                        len,
                    })
                } else {
                    Ok(SdoResponse::SegmentedUpload {
                        address,
                        size: cmd.size_indicated().then(|| bytes_to_u32_le(payload)),
                    })
                }
            },
            SCS_UPLOAD_SEGMENT => {
                let cmd = SegmentCommand::from(u8::new(data[0]));
                let mut payload = [0u8; 7];
                payload.copy_from_slice(&data[1..]);
                Ok(SdoResponse::UploadSegment {
                    toggle: cmd.toggle(),
                    data: payload,
                    len: 7 - cmd.unused_bytes().value(),
                    last: cmd.last(),
                })
            },
            SCS_INITIATE_DOWNLOAD => Ok(SdoResponse::DownloadAck { address }),
            SCS_DOWNLOAD_SEGMENT => {
                let cmd = SegmentCommand::from(u8::new(data[0]));
                Ok(SdoResponse::DownloadSegmentAck {
                    toggle: cmd.toggle(),
                })
            },
            CS_ABORT => Ok(SdoResponse::Abort {
                address,
                code: bytes_to_u32_le([data[4], data[5], data[6], data[7]]),
            }),
            _ => Err(ProtocolError::InvalidValue {
                field: "SdoResponse command specifier".to_string(),
                value: data[0],
            }),
        }
    }
}
