//! SLCAN 串口 CAN 适配器
//!
//! 适用于 CANable、USBtin 等 Lawicel 协议的 USB 串口适配器。
//! Windows 上的 `COM3`、Linux 上的 `/dev/ttyACM0` 都走这个后端。
//!
//! 打开流程：`C`（关闭残留通道）→ `S<n>`（波特率）→ `O`（打开通道），每步等待应答。

pub mod codec;

use crate::{BusState, CanAdapter, CanDeviceError, CanDeviceErrorKind, CanError, ElectrakFrame};
use codec::{SlcanDecoder, SlcanEvent};
use serialport::SerialPort;
use std::io::{ErrorKind, Read, Write};
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

/// 串口默认波特率（USB CDC 适配器实际忽略此值）
pub const DEFAULT_SERIAL_BAUD: u32 = 115_200;

const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(5);

/// 最短串口读超时（serialport 不接受 0）
const MIN_PORT_TIMEOUT: Duration = Duration::from_millis(1);

/// 初始化命令等待应答的时间
const SETUP_REPLY_TIMEOUT: Duration = Duration::from_millis(100);

fn map_serial_error(path: &str, e: serialport::Error) -> CanError {
    let kind = match e.kind() {
        serialport::ErrorKind::NoDevice => CanDeviceErrorKind::NoDevice,
        serialport::ErrorKind::InvalidInput => CanDeviceErrorKind::UnsupportedConfig,
        serialport::ErrorKind::Io(ErrorKind::NotFound) => CanDeviceErrorKind::NotFound,
        serialport::ErrorKind::Io(ErrorKind::PermissionDenied) => CanDeviceErrorKind::AccessDenied,
        serialport::ErrorKind::Io(ErrorKind::ResourceBusy) => CanDeviceErrorKind::Busy,
        _ => CanDeviceErrorKind::Backend,
    };
    CanError::Device(CanDeviceError::new(
        kind,
        format!("Failed to open serial port '{}': {}", path, e),
    ))
}

/// SLCAN 适配器
pub struct SlcanAdapter {
    /// `None` 表示已关闭
    port: Option<Box<dyn SerialPort>>,
    path: String,
    bitrate: u32,
    decoder: SlcanDecoder,
    read_timeout: Duration,
    state: BusState,
    /// 适配器返回 BEL 的次数
    error_count: u32,
}

impl std::fmt::Debug for SlcanAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlcanAdapter")
            .field("path", &self.path)
            .field("bitrate", &self.bitrate)
            .field("state", &self.state)
            .field("error_count", &self.error_count)
            .finish()
    }
}

/// 初始化命令的应答
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SetupReply {
    Ok,
    Bell,
    Silent,
}

fn unsupported_bitrate(bitrate: u32) -> CanError {
    CanError::Device(CanDeviceError::new(
        CanDeviceErrorKind::UnsupportedConfig,
        format!("Unsupported bitrate {} bit/s", bitrate),
    ))
}

impl SlcanAdapter {
    /// 打开串口并启动 CAN 通道
    ///
    /// # 错误
    /// - `CanError::Device(UnsupportedConfig)`: 波特率不受支持
    /// - `CanError::Device(NotFound | AccessDenied | Busy | NoDevice)`: 串口无法打开
    /// - `CanError::Device(Backend)`: 适配器拒绝 `S<n>` 或 `O`
    /// - `CanError::Io`: 初始化命令写入失败
    pub fn open(path: impl Into<String>, bitrate: u32, serial_baud: u32) -> Result<Self, CanError> {
        let path = path.into();
        if codec::bitrate_code(bitrate).is_none() {
            return Err(unsupported_bitrate(bitrate));
        }

        let port = serialport::new(&path, serial_baud)
            .timeout(DEFAULT_READ_TIMEOUT)
            .open()
            .map_err(|e| map_serial_error(&path, e))?;
        Self::with_port(port, path, bitrate)
    }

    /// 在已打开的串口上启动 CAN 通道
    ///
    /// 每条初始化命令都等待应答：`C` 的 BEL 表示通道本来就是关闭的，直接丢弃；
    /// `S<n>`、`O` 的 BEL 视为打开失败。
    pub fn with_port(
        port: Box<dyn SerialPort>,
        path: impl Into<String>,
        bitrate: u32,
    ) -> Result<Self, CanError> {
        let code = codec::bitrate_code(bitrate).ok_or_else(|| unsupported_bitrate(bitrate))?;

        let mut adapter = Self {
            port: Some(port),
            path: path.into(),
            bitrate,
            decoder: SlcanDecoder::new(),
            read_timeout: DEFAULT_READ_TIMEOUT,
            state: BusState::Closed,
            error_count: 0,
        };

        // 上次异常退出时通道可能仍处于打开状态
        let reply = adapter.setup_command(b"C\r")?;
        debug!("SLCAN adapter '{}' close reply: {:?}", adapter.path, reply);

        let bitrate_command = [b'S', code, b'\r'];
        let commands: [&[u8]; 2] = [&bitrate_command, b"O\r"];
        for command in commands {
            let label = String::from_utf8_lossy(&command[..command.len() - 1]).into_owned();
            match adapter.setup_command(command)? {
                SetupReply::Ok => {},
                SetupReply::Silent => {
                    warn!("SLCAN adapter '{}' did not answer '{}'", adapter.path, label)
                },
                // Drop 会再发送一次 `C`
                SetupReply::Bell => {
                    return Err(CanError::Device(CanDeviceError::new(
                        CanDeviceErrorKind::Backend,
                        format!("SLCAN adapter '{}' rejected '{}'", adapter.path, label),
                    )));
                },
            }
        }
        adapter.state = BusState::Active;

        info!(
            "SLCAN adapter '{}' opened at {} bit/s",
            adapter.path, adapter.bitrate
        );
        Ok(adapter)
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn bitrate(&self) -> u32 {
        self.bitrate
    }

    /// 适配器返回的命令失败次数
    pub fn error_count(&self) -> u32 {
        self.error_count
    }

    fn write_raw(&mut self, bytes: &[u8]) -> Result<(), CanError> {
        let port = self.port.as_mut().ok_or(CanError::NotStarted)?;
        port.write_all(bytes)?;
        port.flush()?;
        Ok(())
    }

    /// 从串口读取一次（最多等待 `timeout`）并交给解码器
    fn fill(&mut self, timeout: Duration) -> Result<(), CanError> {
        let mut buf = [0u8; 64];
        let port = self.port.as_mut().ok_or(CanError::NotStarted)?;
        port.set_timeout(timeout.max(MIN_PORT_TIMEOUT))
            .map_err(|e| CanError::Io(std::io::Error::other(e.to_string())))?;

        match port.read(&mut buf) {
            Ok(n) => self.decoder.push(&buf[..n]),
            Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => {},
            Err(e) => return Err(CanError::Io(e)),
        }
        Ok(())
    }

    /// 发送初始化命令并等待 `\r` 或 BEL
    fn setup_command(&mut self, command: &[u8]) -> Result<SetupReply, CanError> {
        self.write_raw(command)?;
        let deadline = Instant::now() + SETUP_REPLY_TIMEOUT;

        loop {
            while let Some(event) = self.decoder.next_event() {
                match event {
                    Ok(SlcanEvent::Ack) => return Ok(SetupReply::Ok),
                    Ok(SlcanEvent::Error) => return Ok(SetupReply::Bell),
                    other => debug!("SLCAN adapter '{}' setup noise: {:?}", self.path, other),
                }
            }
            self.decoder.discard_overflow();

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(SetupReply::Silent);
            }
            self.fill(remaining)?;
        }
    }

    /// 处理一条解码后的消息；收到数据帧时返回
    ///
    /// BEL 把状态置为 `Error`；之后的发送确认或数据帧说明总线恢复，状态回到 `Active`。
    fn handle_event(
        &mut self,
        event: Result<SlcanEvent, CanDeviceError>,
    ) -> Option<ElectrakFrame> {
        match event {
            Ok(SlcanEvent::Frame(frame)) => {
                trace!("Received CAN frame: ID=0x{:X}, len={}", frame.id, frame.len);
                self.recover();
                Some(frame)
            },
            Ok(SlcanEvent::Ack) => {
                self.recover();
                None
            },
            Ok(SlcanEvent::Error) => {
                self.error_count = self.error_count.saturating_add(1);
                self.state = BusState::Error;
                warn!(
                    "SLCAN adapter '{}' reported an error (total {})",
                    self.path, self.error_count
                );
                None
            },
            Ok(SlcanEvent::Other(line)) => {
                debug!("SLCAN adapter '{}' response ignored: {}", self.path, line);
                None
            },
            Err(e) => {
                warn!("SLCAN adapter '{}': {}", self.path, e);
                None
            },
        }
    }

    fn recover(&mut self) {
        if self.state == BusState::Error {
            info!("SLCAN adapter '{}' recovered", self.path);
            self.state = BusState::Active;
        }
    }
}

impl Drop for SlcanAdapter {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

impl CanAdapter for SlcanAdapter {
    fn send(&mut self, frame: ElectrakFrame) -> Result<(), CanError> {
        if self.port.is_none() {
            return Err(CanError::NotStarted);
        }
        self.write_raw(&codec::encode_frame(&frame))?;
        trace!("Sent CAN frame: ID=0x{:X}, len={}", frame.id, frame.len);
        Ok(())
    }

    fn receive(&mut self) -> Result<ElectrakFrame, CanError> {
        let deadline = Instant::now() + self.read_timeout;
        // 零超时也至少读一次串口
        let mut attempted = false;

        loop {
            while let Some(event) = self.decoder.next_event() {
                if let Some(frame) = self.handle_event(event) {
                    return Ok(frame);
                }
            }
            self.decoder.discard_overflow();

            let remaining = deadline.saturating_duration_since(Instant::now());
            if attempted && remaining.is_zero() {
                return Err(CanError::Timeout);
            }
            attempted = true;
            self.fill(remaining)?;
        }
    }

    fn set_receive_timeout(&mut self, timeout: Duration) {
        self.read_timeout = timeout;
    }

    fn receive_timeout(&mut self, timeout: Duration) -> Result<ElectrakFrame, CanError> {
        let old_timeout = self.read_timeout;
        self.read_timeout = timeout;
        let result = self.receive();
        self.read_timeout = old_timeout;
        result
    }

    fn state(&self) -> BusState {
        if self.port.is_none() {
            BusState::Closed
        } else {
            self.state
        }
    }

    fn close(&mut self) -> Result<(), CanError> {
        if self.port.is_none() {
            return Ok(());
        }
        let result = self.write_raw(b"C\r");
        self.port = None;
        self.state = BusState::Closed;
        info!("SLCAN adapter '{}' closed", self.path);
        result
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use serialport::TTYPort;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;

    /// 在伪终端另一端运行的 Lawicel 适配器：按 `\r` 切分命令，`reply` 给出每条命令的应答
    struct FakeAdapter {
        handle: thread::JoinHandle<Vec<String>>,
        done: Arc<AtomicBool>,
    }

    impl FakeAdapter {
        fn spawn<F>(mut port: TTYPort, mut reply: F) -> Self
        where
            F: FnMut(&str) -> Vec<u8> + Send + 'static,
        {
            let done = Arc::new(AtomicBool::new(false));
            let flag = done.clone();
            let handle = thread::spawn(move || {
                port.set_timeout(Duration::from_millis(5)).unwrap();
                let mut commands = Vec::new();
                let mut pending = Vec::new();
                let mut buf = [0u8; 64];

                while !flag.load(Ordering::SeqCst) {
                    match port.read(&mut buf) {
                        Ok(n) => pending.extend_from_slice(&buf[..n]),
                        Err(e) if e.kind() == ErrorKind::TimedOut => continue,
                        Err(_) => break,
                    }
                    while let Some(pos) = pending.iter().position(|&b| b == b'\r') {
                        let line: Vec<u8> = pending.drain(..=pos).take(pos).collect();
                        let line = String::from_utf8_lossy(&line).into_owned();
                        if port.write_all(&reply(&line)).is_err() {
                            return commands;
                        }
                        commands.push(line);
                    }
                }
                commands
            });
            Self { handle, done }
        }

        fn finish(self) -> Vec<String> {
            self.done.store(true, Ordering::SeqCst);
            self.handle.join().unwrap()
        }
    }

    fn open_with<F>(reply: F) -> (Result<SlcanAdapter, CanError>, FakeAdapter)
    where
        F: FnMut(&str) -> Vec<u8> + Send + 'static,
    {
        let (remote, local) = TTYPort::pair().unwrap();
        let fake = FakeAdapter::spawn(remote, reply);
        let adapter = SlcanAdapter::with_port(Box::new(local), "pty", 500_000);
        (adapter, fake)
    }

    /// 只对第一次 `C` 回 BEL（通道本来就是关闭的），其余命令回 `\r`
    fn lawicel(
        mut transmit: impl FnMut() -> Vec<u8> + Send + 'static,
    ) -> impl FnMut(&str) -> Vec<u8> + Send + 'static {
        let mut closed_once = false;
        move |line: &str| match line.as_bytes().first() {
            Some(b'C') if !closed_once => {
                closed_once = true;
                vec![codec::BEL]
            },
            Some(b't') | Some(b'T') => transmit(),
            _ => b"\r".to_vec(),
        }
    }

    fn heartbeat() -> ElectrakFrame {
        ElectrakFrame::new_standard(0x713, &[0x05])
    }

    #[test]
    fn test_open_discards_close_bel() {
        let (adapter, fake) = open_with(lawicel(|| b"z\r".to_vec()));
        let mut adapter = adapter.unwrap();

        assert_eq!(adapter.state(), BusState::Active);
        assert_eq!(adapter.error_count(), 0);

        assert!(matches!(
            adapter.receive_timeout(Duration::from_millis(30)),
            Err(CanError::Timeout)
        ));
        assert_eq!(adapter.state(), BusState::Active);
        assert_eq!(adapter.error_count(), 0);

        drop(adapter);
        let commands = fake.finish();
        assert_eq!(&commands[..3], ["C", "S6", "O"]);
    }

    #[test]
    fn test_open_fails_when_channel_rejected() {
        let (adapter, fake) = open_with(|line: &str| {
            if line == "O" { vec![codec::BEL] } else { b"\r".to_vec() }
        });

        match adapter {
            Err(CanError::Device(e)) => assert_eq!(e.kind, CanDeviceErrorKind::Backend),
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
        fake.finish();
    }

    #[test]
    fn test_error_state_recovers_on_transmit_ack() {
        let mut sent = 0;
        let (adapter, fake) = open_with(lawicel(move || {
            sent += 1;
            if sent == 1 { vec![codec::BEL] } else { b"z\r".to_vec() }
        }));
        let mut adapter = adapter.unwrap();

        adapter.send(heartbeat()).unwrap();
        assert!(matches!(
            adapter.receive_timeout(Duration::from_millis(50)),
            Err(CanError::Timeout)
        ));
        assert_eq!(adapter.state(), BusState::Error);
        assert_eq!(adapter.error_count(), 1);

        adapter.send(heartbeat()).unwrap();
        assert!(matches!(
            adapter.receive_timeout(Duration::from_millis(50)),
            Err(CanError::Timeout)
        ));
        assert_eq!(adapter.state(), BusState::Active);
        assert_eq!(adapter.error_count(), 1);

        drop(adapter);
        fake.finish();
    }

    #[test]
    fn test_error_state_recovers_on_received_frame() {
        let mut sent = 0;
        let (adapter, fake) = open_with(lawicel(move || {
            sent += 1;
            if sent == 1 { vec![codec::BEL] } else { b"t713105\r".to_vec() }
        }));
        let mut adapter = adapter.unwrap();

        adapter.send(heartbeat()).unwrap();
        let _ = adapter.receive_timeout(Duration::from_millis(50));
        assert_eq!(adapter.state(), BusState::Error);

        adapter.send(heartbeat()).unwrap();
        let frame = adapter.receive_timeout(Duration::from_millis(200)).unwrap();
        assert_eq!(frame.id, 0x713);
        assert_eq!(frame.data_slice(), &[0x05]);
        assert_eq!(adapter.state(), BusState::Active);

        adapter.close().unwrap();
        assert_eq!(adapter.state(), BusState::Closed);
        fake.finish();
    }
}
