//! SocketCAN CAN 适配器实现
//!
//! 支持 Linux 平台下的 SocketCAN，使用内核级的 CAN 通讯接口。
//!
//! ## 限制
//!
//! - **仅限 Linux 平台**：SocketCAN 是 Linux 内核特性
//! - **接口配置**：波特率由系统工具（`ip link`）配置，这里只做校验
//! - **权限要求**：打开 socket 不需要特殊权限，配置接口需要 `sudo`

use crate::{BusState, CanAdapter, CanDeviceError, CanDeviceErrorKind, CanError, ElectrakFrame};
use socketcan::{
    BlockingCan, CanError as SocketCanError, CanErrorFrame, CanFrame, CanSocket, EmbeddedFrame,
    ExtendedId, Frame, Socket, SocketOptions, StandardId,
};
use std::convert::TryFrom;
use std::io::ErrorKind;
use std::time::Duration;
use tracing::{error, info, trace, warn};

mod interface_check;

pub use interface_check::check_interface_status;

/// 默认读超时
const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(5);

/// SocketCAN 适配器
///
/// # 示例
///
/// ```no_run
/// use electrak_can::{CanAdapter, ElectrakFrame, SocketCanAdapter};
///
/// let mut adapter = SocketCanAdapter::open("can0", 500_000).unwrap();
/// adapter.send(ElectrakFrame::new_standard(0x000, &[0x01, 19])).unwrap();
/// ```
#[derive(Debug)]
pub struct SocketCanAdapter {
    /// `None` 表示已关闭
    socket: Option<CanSocket>,
    interface: String,
    bitrate: u32,
    read_timeout: Duration,
    state: BusState,
}

impl SocketCanAdapter {
    /// 打开 SocketCAN 接口
    ///
    /// 在打开 socket 之前检查接口是否存在且已启动（UP 状态），
    /// 失败时返回带修复提示的错误。
    ///
    /// # 错误
    /// - `CanError::Device(UnsupportedConfig)`: 波特率不受支持
    /// - `CanError::Device(NotFound)`: 接口不存在
    /// - `CanError::Device(NoDevice)`: 接口存在但未启动
    /// - `CanError::Device(AccessDenied | Busy | Backend)`: 无法打开 socket
    ///
    /// 打开后订阅全部错误帧，`state()` 据此跟踪 Bus Off / Error Passive。
    pub fn open(interface: impl Into<String>, bitrate: u32) -> Result<Self, CanError> {
        let interface = interface.into();
        crate::validate_bitrate(bitrate)?;

        if !check_interface_status(&interface)? {
            return Err(CanError::Device(CanDeviceError::new(
                CanDeviceErrorKind::NoDevice,
                format!(
                    "CAN interface '{}' exists but is not UP. Please start it first:\n  sudo ip link set {} up type can bitrate {}",
                    interface, interface, bitrate
                ),
            )));
        }

        let socket = CanSocket::open(&interface).map_err(|e| {
            let kind = match e.kind() {
                ErrorKind::PermissionDenied => CanDeviceErrorKind::AccessDenied,
                ErrorKind::AddrInUse | ErrorKind::ResourceBusy => CanDeviceErrorKind::Busy,
                ErrorKind::NotFound => CanDeviceErrorKind::NotFound,
                _ => CanDeviceErrorKind::Backend,
            };
            CanError::Device(CanDeviceError::new(
                kind,
                format!("Failed to open CAN interface '{}': {}", interface, e),
            ))
        })?;

        socket.set_read_timeout(DEFAULT_READ_TIMEOUT).map_err(CanError::Io)?;
        // 内核只向设置了错误过滤器的 socket 投递错误帧
        socket.set_error_filter_accept_all().map_err(CanError::Io)?;

        // 波特率由 `ip link` 设置，这里无法读取，只做记录
        info!(
            "SocketCAN interface '{}' opened (bitrate {} bit/s is configured externally)",
            interface, bitrate
        );

        Ok(Self {
            socket: Some(socket),
            interface,
            bitrate,
            read_timeout: DEFAULT_READ_TIMEOUT,
            state: BusState::Active,
        })
    }

    /// 获取接口名称
    pub fn interface(&self) -> &str {
        &self.interface
    }

    pub fn bitrate(&self) -> u32 {
        self.bitrate
    }

    /// 获取读超时时间
    pub fn read_timeout(&self) -> Duration {
        self.read_timeout
    }

    fn socket(&self) -> Result<&CanSocket, CanError> {
        self.socket.as_ref().ok_or(CanError::NotStarted)
    }

    /// 设置读超时
    pub fn set_read_timeout(&mut self, timeout: Duration) -> Result<(), CanError> {
        // SO_RCVTIMEO 为 0 表示无限阻塞，零超时用 1us 近似
        let effective = if timeout.is_zero() {
            Duration::from_micros(1)
        } else {
            timeout
        };
        self.socket()?.set_read_timeout(effective).map_err(CanError::Io)?;
        self.read_timeout = timeout;
        Ok(())
    }

    /// 处理错误帧，更新总线状态
    ///
    /// 返回 `Err` 表示调用方应放弃本次接收。
    fn handle_error_frame(&mut self, can_frame: CanFrame) -> Result<(), CanError> {
        let Ok(error_frame) = CanErrorFrame::try_from(can_frame) else {
            warn!("Received CAN error frame but failed to parse, ignoring");
            return Ok(());
        };

        let socketcan_error = SocketCanError::from(error_frame);
        match &socketcan_error {
            SocketCanError::BusOff => {
                error!("CAN Bus Off error detected on '{}'", self.interface);
                self.state = BusState::BusOff;
                Err(CanError::BusOff)
            },
            SocketCanError::Restarted => {
                info!("CAN controller on '{}' restarted", self.interface);
                self.state = BusState::Active;
                Ok(())
            },
            SocketCanError::ControllerProblem(problem) => {
                let problem_str = format!("{:?}", problem);
                if problem_str.contains("Passive") {
                    warn!("CAN controller entered error passive: {}", problem);
                    self.state = BusState::Passive;
                } else if problem_str.contains("Active") {
                    self.state = BusState::Active;
                } else {
                    warn!("CAN Controller Problem: {}", problem);
                    self.state = BusState::Error;
                }
                Ok(())
            },
            _ => {
                warn!("CAN Error Frame received: {}, ignoring", socketcan_error);
                Ok(())
            },
        }
    }
}

impl Drop for SocketCanAdapter {
    fn drop(&mut self) {
        if self.socket.take().is_some() {
            trace!("[Auto-Drop] SocketCAN interface '{}' closed", self.interface);
        }
    }
}

impl CanAdapter for SocketCanAdapter {
    fn send(&mut self, frame: ElectrakFrame) -> Result<(), CanError> {
        if self.state == BusState::BusOff {
            return Err(CanError::BusOff);
        }

        let can_frame = if frame.is_extended {
            ExtendedId::new(frame.id).and_then(|id| CanFrame::new(id, frame.data_slice()))
        } else {
            StandardId::new(frame.id as u16).and_then(|id| CanFrame::new(id, frame.data_slice()))
        }
        .ok_or_else(|| {
            CanError::Device(CanDeviceError::new(
                CanDeviceErrorKind::InvalidFrame,
                format!("Failed to create frame with ID 0x{:X}", frame.id),
            ))
        })?;

        let socket = self.socket.as_mut().ok_or(CanError::NotStarted)?;
        socket.transmit(&can_frame).map_err(|e| {
            CanError::Io(std::io::Error::other(format!(
                "SocketCAN transmit error: {}",
                e
            )))
        })?;

        trace!("Sent CAN frame: ID=0x{:X}, len={}", frame.id, frame.len);
        Ok(())
    }

    /// 接收帧（阻塞直到收到有效数据帧或超时）
    ///
    /// 错误帧不返回给调用方，只更新 `state()`；Bus Off 除外。
    fn receive(&mut self) -> Result<ElectrakFrame, CanError> {
        loop {
            let can_frame = match self.socket()?.read_frame() {
                Ok(frame) => frame,
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    return Err(CanError::Timeout);
                },
                Err(e) => return Err(CanError::Io(e)),
            };

            if can_frame.is_error_frame() {
                self.handle_error_frame(can_frame)?;
                continue;
            }

            let mut data = [0u8; 8];
            let frame_data = can_frame.data();
            let len = frame_data.len().min(8);
            data[..len].copy_from_slice(&frame_data[..len]);

            let frame = ElectrakFrame {
                id: can_frame.raw_id(),
                data,
                len: len as u8,
                is_extended: can_frame.is_extended(),
            };
            trace!("Received CAN frame: ID=0x{:X}, len={}", frame.id, frame.len);
            return Ok(frame);
        }
    }

    fn set_receive_timeout(&mut self, timeout: Duration) {
        if let Err(e) = self.set_read_timeout(timeout) {
            warn!("Failed to set receive timeout: {}", e);
        }
    }

    fn receive_timeout(&mut self, timeout: Duration) -> Result<ElectrakFrame, CanError> {
        let old_timeout = self.read_timeout;
        self.set_read_timeout(timeout)?;
        let result = self.receive();
        let _ = self.set_read_timeout(old_timeout);
        result
    }

    fn state(&self) -> BusState {
        if self.socket.is_none() {
            BusState::Closed
        } else {
            self.state
        }
    }

    fn close(&mut self) -> Result<(), CanError> {
        if self.socket.take().is_some() {
            info!("SocketCAN interface '{}' closed", self.interface);
        }
        self.state = BusState::Closed;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;

    /// 检查 CAN 接口是否存在
    fn can_interface_exists(interface: &str) -> bool {
        Command::new("ip")
            .args(["link", "show", interface])
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    /// 宏：要求 vcan0 接口存在，如果不存在则跳过测试
    macro_rules! require_vcan0 {
        () => {{
            if !can_interface_exists("vcan0") {
                eprintln!("Skipping test: vcan0 interface not available");
                return;
            }
            "vcan0"
        }};
    }

    #[test]
    fn test_open_rejects_unsupported_bitrate() {
        match SocketCanAdapter::open("vcan0", 42) {
            Err(CanError::Device(e)) => assert_eq!(e.kind, CanDeviceErrorKind::UnsupportedConfig),
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_open_missing_interface() {
        match SocketCanAdapter::open("can987", 500_000) {
            Err(CanError::Device(e)) => {
                assert_eq!(e.kind, CanDeviceErrorKind::NotFound);
                assert!(e.message.contains("ip link add"));
            },
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_open_and_close_vcan0() {
        let interface = require_vcan0!();
        let Ok(mut adapter) = SocketCanAdapter::open(interface, 500_000) else {
            eprintln!("Skipping test: vcan0 is not UP");
            return;
        };
        assert_eq!(adapter.state(), BusState::Active);
        assert_eq!(adapter.interface(), "vcan0");

        adapter.close().unwrap();
        assert_eq!(adapter.state(), BusState::Closed);
        adapter.close().unwrap();
        assert!(matches!(
            adapter.send(ElectrakFrame::new_standard(0x123, &[1])),
            Err(CanError::NotStarted)
        ));
    }

    #[test]
    fn test_send_and_receive_timeout_vcan0() {
        let interface = require_vcan0!();
        let Ok(mut adapter) = SocketCanAdapter::open(interface, 500_000) else {
            eprintln!("Skipping test: vcan0 is not UP");
            return;
        };
        adapter
            .send(ElectrakFrame::new_standard(0x213, &[0xE8, 0x03, 0x7D, 0, 0x20, 0x03, 0xF4, 1]))
            .unwrap();
        // vcan0 没有其他节点时只会超时
        match adapter.receive_timeout(Duration::from_millis(10)) {
            Ok(_) | Err(CanError::Timeout) => {},
            Err(e) => panic!("unexpected error: {}", e),
        }
    }

    #[test]
    fn test_open_subscribes_to_error_frames_vcan0() {
        use std::os::fd::AsRawFd;

        const SOL_CAN_RAW: libc::c_int = 101;
        const CAN_RAW_ERR_FILTER: libc::c_int = 2;
        const CAN_ERR_MASK: u32 = 0x1FFF_FFFF;

        let interface = require_vcan0!();
        let Ok(adapter) = SocketCanAdapter::open(interface, 500_000) else {
            eprintln!("Skipping test: vcan0 is not UP");
            return;
        };

        let fd = adapter.socket().unwrap().as_raw_fd();
        let mut mask: u32 = 0;
        let mut len = std::mem::size_of::<u32>() as libc::socklen_t;
        let rc = unsafe {
            libc::getsockopt(
                fd,
                SOL_CAN_RAW,
                CAN_RAW_ERR_FILTER,
                &mut mask as *mut u32 as *mut libc::c_void,
                &mut len,
            )
        };
        assert_eq!(rc, 0, "getsockopt failed: {}", std::io::Error::last_os_error());
        assert_eq!(mask, CAN_ERR_MASK);
    }
}
