//! 驱动层错误类型定义

use electrak_can::CanError;
use electrak_protocol::{ParameterAddress, ProtocolError, SdoAbortCode};
use thiserror::Error;

fn describe_code(code: &u32) -> &'static str {
    SdoAbortCode::describe(*code)
}

/// 驱动层错误类型
///
/// 区分三类失败：设备拒绝（`SdoAbort`/`Persist`）、总线不可用
/// （`Connection`/`Transport`/`NotConnected`）、设备无响应（`Timeout`）。
#[derive(Error, Debug)]
pub enum DriverError {
    /// 打开总线失败
    #[error("Failed to open CAN bus: {0}")]
    Connection(#[source] CanError),

    /// 发送/接收失败
    #[error("CAN transport error: {0}")]
    Transport(#[from] CanError),

    /// 设备中止 SDO 传输
    #[error("SDO transfer for {address} aborted: 0x{code:08X} ({})", describe_code(.code))]
    SdoAbort { address: ParameterAddress, code: u32 },

    /// 保存参数（0x1010:01）被拒绝或失败
    #[error("Failed to store parameters: {source}")]
    Persist {
        #[source]
        source: Box<DriverError>,
    },

    /// 设备未在超时内应答
    #[error("No SDO response for {address}")]
    Timeout { address: ParameterAddress },

    /// 协议解析错误
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// 无效输入（如超出范围的运动参数）
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// 尚未连接或已断开
    #[error("Not connected")]
    NotConnected,

    /// 后台线程错误
    #[error("IO thread error: {0}")]
    IoThread(String),
}

impl DriverError {
    /// 设备中止码（仅 `SdoAbort`，以及包裹它的 `Persist`）
    pub fn abort_code(&self) -> Option<u32> {
        match self {
            DriverError::SdoAbort { code, .. } => Some(*code),
            DriverError::Persist { source } => source.abort_code(),
            _ => None,
        }
    }

    /// 总线已不可用，需要重新连接
    pub fn is_bus_down(&self) -> bool {
        match self {
            DriverError::Connection(_) | DriverError::NotConnected => true,
            DriverError::Transport(e) => e.is_fatal(),
            _ => false,
        }
    }
}
