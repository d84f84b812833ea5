//! 输入验证模块
//!
//! 参数地址、值类型、参数值与溢出策略的解析（供 clap 的 `value_parser` 使用）

use anyhow::{Context, Result};
use electrak_protocol::{
    AccelerationOverflow, NmtCommand, ParameterAddress, ParameterValue, ValueKind,
    known_parameter,
};

/// 值类型：u8/u16/u32/i8/i16/i32/bytes
pub fn parse_kind(s: &str) -> Result<ValueKind, String> {
    match s.to_ascii_lowercase().as_str() {
        "u8" => Ok(ValueKind::U8),
        "u16" => Ok(ValueKind::U16),
        "u32" => Ok(ValueKind::U32),
        "i8" => Ok(ValueKind::I8),
        "i16" => Ok(ValueKind::I16),
        "i32" => Ok(ValueKind::I32),
        "bytes" | "str" | "string" => Ok(ValueKind::Bytes),
        other => Err(format!(
            "unknown value kind '{}' (expected u8, u16, u32, i8, i16, i32 or bytes)",
            other
        )),
    }
}

/// 加速度溢出策略：reject/clamp/truncate
pub fn parse_overflow(s: &str) -> Result<AccelerationOverflow, String> {
    match s.to_ascii_lowercase().as_str() {
        "reject" => Ok(AccelerationOverflow::Reject),
        "clamp" => Ok(AccelerationOverflow::Clamp),
        "truncate" => Ok(AccelerationOverflow::Truncate),
        other => Err(format!(
            "unknown overflow policy '{}' (expected reject, clamp or truncate)",
            other
        )),
    }
}

/// NMT 命令：start/stop/preop/reset-node/reset-comm
pub fn parse_nmt(s: &str) -> Result<NmtCommand, String> {
    match s.to_ascii_lowercase().as_str() {
        "start" => Ok(NmtCommand::Start),
        "stop" => Ok(NmtCommand::Stop),
        "preop" | "pre-operational" => Ok(NmtCommand::EnterPreOperational),
        "reset-node" => Ok(NmtCommand::ResetNode),
        "reset-comm" | "reset-communication" => Ok(NmtCommand::ResetCommunication),
        other => Err(format!(
            "unknown NMT command '{}' (expected start, stop, preop, reset-node or reset-comm)",
            other
        )),
    }
}

/// 确定参数类型：显式指定优先，其次查已知参数表
pub fn resolve_kind(address: ParameterAddress, explicit: Option<ValueKind>) -> Option<ValueKind> {
    explicit.or_else(|| known_parameter(address).map(|p| p.kind))
}

/// 按类型解析参数值
///
/// 整数接受十进制与 `0x` 十六进制；`bytes` 接受 `0x` 开头的十六进制串，
/// 否则按原样取文本字节。
pub fn parse_value(kind: ValueKind, text: &str) -> Result<ParameterValue> {
    if kind == ValueKind::Bytes {
        return match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
            Some(hex_text) => Ok(ParameterValue::Bytes(
                hex::decode(hex_text).with_context(|| format!("无效的十六进制数据: {}", text))?,
            )),
            None => Ok(ParameterValue::Bytes(text.as_bytes().to_vec())),
        };
    }

    let number = parse_integer(text).with_context(|| format!("无效的整数: {}", text))?;
    Ok(ParameterValue::from_i64(kind, number)?)
}

fn parse_integer(text: &str) -> Result<i64> {
    let (negative, digits) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text),
    };
    let magnitude = match digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X")) {
        Some(hex_digits) => i64::from_str_radix(hex_digits, 16)?,
        None => digits.parse::<i64>()?,
    };
    Ok(if negative { -magnitude } else { magnitude })
}

/// 保存后的期望值：`ADDRESS=VALUE[:KIND]`，如 `0x2102=200` 或 `0x3000:1=5:u16`
///
/// 未写类型时按已知参数表确定；地址本身可能含 `:`，因此类型后缀从值部分解析。
pub fn parse_expectation(s: &str) -> Result<(ParameterAddress, ParameterValue), String> {
    let (address, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected ADDRESS=VALUE[:KIND], got '{}'", s))?;
    let address: ParameterAddress = address.trim().parse().map_err(|e| format!("{}", e))?;

    let (value, explicit) = match value.rsplit_once(':') {
        Some((value, kind)) => (value, Some(parse_kind(kind.trim())?)),
        None => (value, None),
    };
    let kind = resolve_kind(address, explicit)
        .ok_or_else(|| format!("unknown parameter {}, append :KIND to the value", address))?;
    let value = parse_value(kind, value.trim()).map_err(|e| format!("{:#}", e))?;
    Ok((address, value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_kind() {
        assert_eq!(parse_kind("U16"), Ok(ValueKind::U16));
        assert_eq!(parse_kind("string"), Ok(ValueKind::Bytes));
        assert!(parse_kind("f32").is_err());
    }

    #[test]
    fn test_parse_overflow() {
        assert_eq!(parse_overflow("truncate"), Ok(AccelerationOverflow::Truncate));
        assert!(parse_overflow("wrap").is_err());
    }

    #[test]
    fn test_parse_nmt() {
        assert_eq!(parse_nmt("preop"), Ok(NmtCommand::EnterPreOperational));
        assert_eq!(parse_nmt("RESET-COMM"), Ok(NmtCommand::ResetCommunication));
        assert!(parse_nmt("halt").is_err());
    }

    #[test]
    fn test_parse_value_integers() {
        assert_eq!(parse_value(ValueKind::U16, "200").unwrap(), ParameterValue::U16(200));
        assert_eq!(parse_value(ValueKind::U8, "0x01").unwrap(), ParameterValue::U8(1));
        assert_eq!(parse_value(ValueKind::I16, "-5").unwrap(), ParameterValue::I16(-5));
        assert!(parse_value(ValueKind::U8, "256").is_err());
        assert!(parse_value(ValueKind::U8, "abc").is_err());
    }

    #[test]
    fn test_parse_value_bytes() {
        assert_eq!(
            parse_value(ValueKind::Bytes, "0x4C41").unwrap(),
            ParameterValue::Bytes(vec![0x4C, 0x41])
        );
        assert_eq!(
            parse_value(ValueKind::Bytes, "save").unwrap(),
            ParameterValue::Bytes(b"save".to_vec())
        );
        assert!(parse_value(ValueKind::Bytes, "0xZZ").is_err());
    }

    #[test]
    fn test_parse_expectation_known_parameter() {
        let (address, value) = parse_expectation("0x2102=200").unwrap();
        assert_eq!(address, ParameterAddress::var(0x2102));
        assert_eq!(value, ParameterValue::U16(200));
    }

    #[test]
    fn test_parse_expectation_explicit_kind() {
        let (address, value) = parse_expectation("0x3000:1=7:u32").unwrap();
        assert_eq!(address, ParameterAddress::new(0x3000, 1));
        assert_eq!(value, ParameterValue::U32(7));
    }

    #[test]
    fn test_parse_expectation_unknown_without_kind() {
        assert!(parse_expectation("0x3000=7").is_err());
        assert!(parse_expectation("0x2102").is_err());
    }
}
