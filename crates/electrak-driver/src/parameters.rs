//! 参数写入确认、保存与出厂配置的结果类型

use electrak_protocol::{
    OD_DEFAULT_TARGET_SPEED, OD_ENABLE_MOTION, OD_ENABLE_SLEEP, ParameterAddress, ParameterValue,
};

/// 写入后回读的确认结果
///
/// 回读值与写入值不一致不是错误：设备可能截断或忽略了写入。
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Confirmation {
    pub address: ParameterAddress,
    pub written: ParameterValue,
    pub read_back: ParameterValue,
    pub matched: bool,
}

impl Confirmation {
    pub fn new(address: ParameterAddress, written: ParameterValue, read_back: ParameterValue) -> Self {
        let matched = written == read_back;
        Self {
            address,
            written,
            read_back,
            matched,
        }
    }
}

impl std::fmt::Display for Confirmation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}: wrote {}, read back {} ({})",
            self.address,
            self.written,
            self.read_back,
            if self.matched { "ok" } else { "MISMATCH" }
        )
    }
}

/// 保存参数后逐项回读的结果
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PersistResult {
    pub entries: Vec<Confirmation>,
}

impl PersistResult {
    pub fn all_matched(&self) -> bool {
        self.entries.iter().all(|c| c.matched)
    }

    /// 回读不一致的条目
    pub fn mismatches(&self) -> impl Iterator<Item = &Confirmation> {
        self.entries.iter().filter(|c| !c.matched)
    }
}

/// `ensure_sleep_disabled` 的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SleepModeOutcome {
    /// 睡眠模式本来就是关闭的，未做任何写入
    AlreadyDisabled,
    /// 已写入 0 并确认，通信已重启
    Disabled,
    /// 写入后回读仍不是 0
    NotPersisted,
}

/// 出厂配置的默认值
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ProvisionDefaults {
    /// 0x2013，0 = 关闭睡眠
    pub enable_sleep: u8,
    /// 0x2104，1 = 允许运动
    pub enable_motion: u8,
    /// 0x2102，默认目标速度
    pub default_speed: u16,
}

impl Default for ProvisionDefaults {
    fn default() -> Self {
        Self {
            enable_sleep: 0,
            enable_motion: 1,
            default_speed: 200,
        }
    }
}

impl ProvisionDefaults {
    /// 按写入顺序展开为 (地址, 值)
    pub fn entries(&self) -> Vec<(ParameterAddress, ParameterValue)> {
        vec![
            (
                ParameterAddress::var(OD_ENABLE_SLEEP),
                ParameterValue::U8(self.enable_sleep),
            ),
            (
                ParameterAddress::var(OD_ENABLE_MOTION),
                ParameterValue::U8(self.enable_motion),
            ),
            (
                ParameterAddress::var(OD_DEFAULT_TARGET_SPEED),
                ParameterValue::U16(self.default_speed),
            ),
        ]
    }
}

/// 出厂配置报告：每项写入的确认，以及保存后的回读
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ProvisionReport {
    pub writes: Vec<Confirmation>,
    pub persisted: PersistResult,
}

impl ProvisionReport {
    pub fn is_complete(&self) -> bool {
        self.writes.iter().all(|c| c.matched) && self.persisted.all_matched()
    }
}
