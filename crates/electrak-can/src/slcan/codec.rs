//! SLCAN (Lawicel) ASCII 协议编解码
//!
//! 每条消息以 `\r` 结尾：
//!
//! ```text
//! tIIILDD..   标准帧：3 位十六进制 ID，1 位长度，2*L 位数据
//! TIIIIIIIILDD..  扩展帧：8 位十六进制 ID
//! z / Z       发送确认
//! \r          命令确认
//! \x07        命令失败（BEL，无 \r）
//! ```

use crate::{CanDeviceError, CanDeviceErrorKind, ElectrakFrame};

/// 命令失败响应
pub const BEL: u8 = 0x07;

/// 波特率对应的 `S<n>` 命令码
pub fn bitrate_code(bitrate: u32) -> Option<u8> {
    let code = match bitrate {
        10_000 => b'0',
        20_000 => b'1',
        50_000 => b'2',
        100_000 => b'3',
        125_000 => b'4',
        250_000 => b'5',
        500_000 => b'6',
        800_000 => b'7',
        1_000_000 => b'8',
        _ => return None,
    };
    Some(code)
}

/// 编码数据帧
pub fn encode_frame(frame: &ElectrakFrame) -> Vec<u8> {
    let mut out = if frame.is_extended {
        format!("T{:08X}{}", frame.id & 0x1FFF_FFFF, frame.len)
    } else {
        format!("t{:03X}{}", frame.id & 0x7FF, frame.len)
    }
    .into_bytes();
    out.extend_from_slice(hex::encode_upper(frame.data_slice()).as_bytes());
    out.push(b'\r');
    out
}

/// 解码后的一条消息
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlcanEvent {
    /// 收到数据帧
    Frame(ElectrakFrame),
    /// 发送确认（`z`/`Z`）或命令确认（空行）
    Ack,
    /// 适配器报告命令失败（BEL）
    Error,
    /// 其他响应（版本号、状态标志、远程帧等）
    Other(String),
}

fn invalid(message: impl Into<String>) -> CanDeviceError {
    CanDeviceError::new(CanDeviceErrorKind::InvalidResponse, message)
}

fn parse_hex_u32(text: &str) -> Result<u32, CanDeviceError> {
    u32::from_str_radix(text, 16).map_err(|_| invalid(format!("Invalid hex field '{}'", text)))
}

/// 解析一行（不含结尾 `\r`）
pub fn parse_line(line: &str) -> Result<SlcanEvent, CanDeviceError> {
    let Some(kind) = line.chars().next() else {
        return Ok(SlcanEvent::Ack);
    };

    let id_len = match kind {
        't' => 3,
        'T' => 8,
        'z' | 'Z' => return Ok(SlcanEvent::Ack),
        _ => return Ok(SlcanEvent::Other(line.to_string())),
    };

    let body = &line[1..];
    if body.len() < id_len + 1 || !body.is_ascii() {
        return Err(invalid(format!("Truncated SLCAN frame '{}'", line)));
    }
    let id = parse_hex_u32(&body[..id_len])?;
    let len = body.as_bytes()[id_len].wrapping_sub(b'0');
    if len > 8 {
        return Err(invalid(format!("Invalid SLCAN length in '{}'", line)));
    }

    let data_hex = &body[id_len + 1..];
    if data_hex.len() != len as usize * 2 {
        return Err(invalid(format!(
            "SLCAN frame '{}' declares {} bytes but carries {} hex digits",
            line,
            len,
            data_hex.len()
        )));
    }
    let data = hex::decode(data_hex).map_err(|e| invalid(format!("Invalid SLCAN data: {}", e)))?;

    let frame = if kind == 'T' {
        ElectrakFrame::new_extended(id, &data)
    } else {
        ElectrakFrame::new_standard(id as u16, &data)
    };
    Ok(SlcanEvent::Frame(frame))
}

/// 字节流解码器
///
/// 串口读取的数据可能在任意位置截断，解码器缓存不完整的行。
#[derive(Debug, Default)]
pub struct SlcanDecoder {
    buf: Vec<u8>,
}

/// 单行上限，超过视为垃圾数据并丢弃
const MAX_LINE: usize = 64;

impl SlcanDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加收到的字节
    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// 取出下一条完整消息
    pub fn next_event(&mut self) -> Option<Result<SlcanEvent, CanDeviceError>> {
        let pos = self.buf.iter().position(|&b| b == b'\r' || b == BEL)?;
        let terminator = self.buf[pos];
        let line: Vec<u8> = self.buf.drain(..=pos).take(pos).collect();

        if terminator == BEL {
            return Some(Ok(SlcanEvent::Error));
        }
        if line.len() > MAX_LINE {
            return Some(Err(invalid("SLCAN line too long")));
        }
        Some(match std::str::from_utf8(&line) {
            Ok(text) => parse_line(text.trim_start_matches('\n')),
            Err(_) => Err(invalid("SLCAN line is not ASCII")),
        })
    }

    /// 丢弃超长的未完成数据
    pub fn discard_overflow(&mut self) {
        if self.buf.len() > MAX_LINE * 4 {
            self.buf.clear();
        }
    }
}
