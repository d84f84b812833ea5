//! 用户交互工具
//!
//! 确认提示、帧格式化与可中断等待

use anyhow::Result;
use electrak_driver::{Confirmation, ElectrakFrame};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// 确认提示（inquire）
pub fn prompt_confirmation(message: &str, default: bool) -> Result<bool> {
    let answer = inquire::Confirm::new(message).with_default(default).prompt()?;
    Ok(answer)
}

/// 帧格式：`0x193  [8]  10 27 7D 00 20 03 F4 01`
pub fn format_frame(frame: &ElectrakFrame) -> String {
    format!(
        "0x{:03X}  [{}]  {}",
        frame.id,
        frame.len,
        spaced_hex(frame.data_slice())
    )
}

/// 大写十六进制，字节间以空格分隔
pub fn spaced_hex(bytes: &[u8]) -> String {
    let encoded = hex::encode_upper(bytes);
    encoded
        .as_bytes()
        .chunks(2)
        .filter_map(|pair| std::str::from_utf8(pair).ok())
        .collect::<Vec<_>>()
        .join(" ")
}

/// 回读确认的一行描述
pub fn format_confirmation(confirmation: &Confirmation) -> String {
    let mark = if confirmation.matched { "✅" } else { "❌" };
    format!("{} {}", mark, confirmation)
}

/// 等待 `duration`，期间每 50ms 检查一次中断标志
///
/// 返回 `false` 表示被中断。
pub fn wait_unless_interrupted(duration: Duration, interrupted: &AtomicBool) -> bool {
    let deadline = Instant::now() + duration;
    loop {
        if interrupted.load(Ordering::SeqCst) {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        std::thread::sleep((deadline - now).min(Duration::from_millis(50)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_frame() {
        let frame = ElectrakFrame::new_standard(0x213, &[0xE8, 0x03, 0x7D, 0x00]);
        assert_eq!(format_frame(&frame), "0x213  [4]  E8 03 7D 00");
    }

    #[test]
    fn test_spaced_hex_empty() {
        assert_eq!(spaced_hex(&[]), "");
    }

    #[test]
    fn test_wait_interrupted() {
        let flag = AtomicBool::new(true);
        assert!(!wait_unless_interrupted(Duration::from_secs(5), &flag));

        let flag = AtomicBool::new(false);
        assert!(wait_unless_interrupted(Duration::from_millis(10), &flag));
    }
}
