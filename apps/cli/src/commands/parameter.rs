//! 参数命令：读取、写入、保存、出厂配置、全部导出

use anyhow::Result;
use clap::Args;
use electrak_driver::{ActuatorSession, ProvisionDefaults};
use electrak_protocol::{ParameterAddress, ParameterValue, ValueKind, known_parameter};

use crate::utils::{format_confirmation, prompt_confirmation};
use crate::validation::{parse_expectation, parse_kind, parse_value, resolve_kind};

fn describe(address: ParameterAddress) -> String {
    match known_parameter(address) {
        Some(known) => format!("{} {}", address, known.name),
        None => address.to_string(),
    }
}

/// 读取参数
#[derive(Args, Debug, Clone)]
pub struct ReadCommand {
    /// 对象地址，如 0x2102 或 0x1018:4
    pub address: ParameterAddress,

    /// 值类型（默认查已知参数表，未知参数按返回长度推断）
    #[arg(short, long, value_parser = parse_kind)]
    pub kind: Option<ValueKind>,
}

impl ReadCommand {
    pub fn execute(&self, session: &ActuatorSession) -> Result<()> {
        let value = match resolve_kind(self.address, self.kind) {
            Some(kind) => session.read_parameter_as(self.address, kind)?,
            None => session.read_parameter(self.address)?,
        };
        println!("{} = {}", describe(self.address), value);
        Ok(())
    }
}

/// 写入参数并回读
#[derive(Args, Debug, Clone)]
pub struct WriteCommand {
    /// 对象地址
    pub address: ParameterAddress,

    /// 值（整数支持 0x 前缀；bytes 类型支持 0x 十六进制串或文本）
    pub value: String,

    /// 值类型（未知参数必须指定）
    #[arg(short, long, value_parser = parse_kind)]
    pub kind: Option<ValueKind>,
}

impl WriteCommand {
    pub fn execute(&self, session: &ActuatorSession) -> Result<()> {
        let kind = resolve_kind(self.address, self.kind).ok_or_else(|| {
            anyhow::anyhow!("未知参数 {}，请使用 --kind 指定类型", self.address)
        })?;
        let value = parse_value(kind, &self.value)?;

        let confirmation = session.write_parameter(self.address, value)?;
        println!("{}", format_confirmation(&confirmation));
        if !confirmation.matched {
            anyhow::bail!("回读值与写入值不一致");
        }
        Ok(())
    }
}

/// 保存参数
#[derive(Args, Debug, Clone)]
pub struct PersistCommand {
    /// 保存后需要回读确认的项：ADDRESS=VALUE[:KIND]
    #[arg(value_parser = parse_expectation)]
    pub expect: Vec<(ParameterAddress, ParameterValue)>,

    /// 跳过确认提示
    #[arg(long)]
    pub force: bool,
}

impl PersistCommand {
    /// 连接前确认（`--force` 跳过）
    pub fn confirmed(&self) -> Result<bool> {
        if self.force {
            return Ok(true);
        }
        prompt_confirmation("保存当前参数到非易失存储？", false)
    }

    pub fn execute(&self, session: &ActuatorSession) -> Result<()> {
        let result = session.persist(&self.expect)?;
        println!("✅ 参数已保存");
        for entry in &result.entries {
            println!("  {}", format_confirmation(entry));
        }
        if !result.all_matched() {
            anyhow::bail!("保存后回读不一致");
        }
        Ok(())
    }
}

/// 出厂配置
#[derive(Args, Debug, Clone)]
pub struct ProvisionCommand {
    /// 默认目标速度（0x2102）
    #[arg(long, default_value_t = ProvisionDefaults::default().default_speed)]
    pub default_speed: u16,

    /// 睡眠模式（0x2013），0 = 关闭
    #[arg(long, default_value_t = ProvisionDefaults::default().enable_sleep)]
    pub enable_sleep: u8,

    /// 允许运动（0x2104），1 = 允许
    #[arg(long, default_value_t = ProvisionDefaults::default().enable_motion)]
    pub enable_motion: u8,

    /// 跳过确认提示
    #[arg(long)]
    pub force: bool,
}

impl ProvisionCommand {
    fn defaults(&self) -> ProvisionDefaults {
        ProvisionDefaults {
            enable_sleep: self.enable_sleep,
            enable_motion: self.enable_motion,
            default_speed: self.default_speed,
        }
    }

    /// 连接前确认（`--force` 跳过）
    pub fn confirmed(&self) -> Result<bool> {
        if self.force {
            return Ok(true);
        }
        let defaults = self.defaults();
        let message = format!(
            "写入出厂配置（sleep={}, motion={}, speed={}）并保存？",
            defaults.enable_sleep, defaults.enable_motion, defaults.default_speed
        );
        prompt_confirmation(&message, false)
    }

    pub fn execute(&self, session: &ActuatorSession) -> Result<()> {
        let report = session.provision(&self.defaults())?;
        println!("写入:");
        for write in &report.writes {
            println!("  {}", format_confirmation(write));
        }
        println!("保存后回读:");
        for entry in &report.persisted.entries {
            println!("  {}", format_confirmation(entry));
        }

        if !report.is_complete() {
            anyhow::bail!("出厂配置未完全生效");
        }
        println!("✅ 出厂配置完成");
        Ok(())
    }
}

/// 导出所有已知参数
#[derive(Args, Debug, Clone)]
pub struct DumpCommand {
    /// 以 JSON 输出
    #[arg(long)]
    pub json: bool,
}

impl DumpCommand {
    pub fn execute(&self, session: &ActuatorSession) -> Result<()> {
        let entries = session.dump_parameters();

        if self.json {
            let rows: Vec<serde_json::Value> = entries
                .iter()
                .map(|(known, result)| match result {
                    Ok(value) => serde_json::json!({
                        "address": known.address.to_string(),
                        "name": known.name,
                        "value": value.to_string(),
                    }),
                    Err(e) => serde_json::json!({
                        "address": known.address.to_string(),
                        "name": known.name,
                        "error": e.to_string(),
                    }),
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&rows)?);
            return Ok(());
        }

        for (known, result) in &entries {
            match result {
                Ok(value) => println!("{}  {:<32} {}", known.address, known.name, value),
                Err(e) => println!("{}  {:<32} ⚠️  {}", known.address, known.name, e),
            }
        }
        Ok(())
    }
}
