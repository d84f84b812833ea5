//! 配置管理命令
//!
//! CLI 配置以 TOML 保存：默认通道、后端类型，以及 `[driver]` 会话参数表。

use anyhow::{Context, Result};
use clap::Subcommand;
use electrak_driver::{DriverConfig, DriverType};
use electrak_protocol::AccelerationOverflow;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::validation::parse_overflow;

/// 默认配置文件路径
fn default_config_file() -> Result<PathBuf> {
    let mut path = dirs::config_dir().ok_or_else(|| anyhow::anyhow!("无法确定配置目录"))?;

    path.push("electrak");
    path.push("config.toml");
    Ok(path)
}

/// 解析配置文件路径（`--config` 优先）
pub fn config_file(explicit: Option<&Path>) -> Result<PathBuf> {
    match explicit {
        Some(path) => Ok(path.to_path_buf()),
        None => default_config_file(),
    }
}

/// CLI 配置
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// 默认 CAN 通道
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interface: Option<String>,

    /// CAN 后端
    pub driver_type: DriverType,

    /// 会话参数
    pub driver: DriverConfig,
}

impl CliConfig {
    /// 加载配置，文件不存在时返回默认值
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = config_file(explicit)?;

        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&path)
            .with_context(|| format!("读取配置文件失败: {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("解析配置文件失败: {}", path.display()))
    }

    /// 保存配置
    pub fn save(&self, explicit: Option<&Path>) -> Result<PathBuf> {
        let path = config_file(explicit)?;
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).context("创建配置目录失败")?;
        }

        let body = toml::to_string_pretty(self).context("序列化配置失败")?;
        let content = format!("# Electrak CLI Configuration\n\n{}", body);
        fs::write(&path, content).context("写入配置文件失败")?;

        Ok(path)
    }

    /// 读取单个配置项
    fn get(&self, key: &str) -> Option<String> {
        let value = match key {
            "interface" => self.interface.clone().unwrap_or_else(|| "(未设置)".to_string()),
            "driver_type" => self.driver_type.to_string(),
            "node_id" => self.driver.node_id.to_string(),
            "bitrate" => self.driver.bitrate.to_string(),
            "acceleration_overflow" => {
                format!("{:?}", self.driver.acceleration_overflow).to_lowercase()
            },
            "sdo_timeout_ms" => self.driver.sdo_timeout_ms.to_string(),
            "heartbeat_interval_ms" => self.driver.heartbeat_interval_ms.to_string(),
            "keep_alive_interval_ms" => self.driver.keep_alive_interval_ms.to_string(),
            _ => return None,
        };
        Some(value)
    }
}

/// 配置命令
#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// 设置配置项（通道、后端、节点使用全局参数 --interface/--driver/--node）
    Set {
        /// 总线速率（bit/s）
        #[arg(long)]
        bitrate: Option<u32>,

        /// 加速度溢出策略：reject、clamp、truncate
        #[arg(long, value_parser = parse_overflow)]
        acceleration_overflow: Option<AccelerationOverflow>,
    },

    /// 获取配置项
    Get {
        /// 配置项名称
        #[arg(default_value = "all")]
        key: String,
    },

    /// 检查配置
    Check,
}

/// 全局参数中可写入配置的部分
#[derive(Debug, Default)]
pub struct ConfigOverrides {
    pub interface: Option<String>,
    pub driver_type: Option<DriverType>,
    pub node_id: Option<u8>,
}

impl ConfigOverrides {
    /// 叠加到已加载的配置上
    pub fn apply(self, config: &mut CliConfig) {
        if let Some(interface) = self.interface {
            config.interface = Some(interface);
        }
        if let Some(driver_type) = self.driver_type {
            config.driver_type = driver_type;
        }
        if let Some(node_id) = self.node_id {
            config.driver.node_id = node_id;
        }
    }
}

impl ConfigCommand {
    pub fn execute(self, explicit: Option<&Path>, overrides: ConfigOverrides) -> Result<()> {
        match self {
            ConfigCommand::Set {
                bitrate,
                acceleration_overflow,
            } => {
                let mut config = CliConfig::load(explicit)?;
                let ConfigOverrides {
                    interface,
                    driver_type,
                    node_id,
                } = overrides;

                if let Some(iface) = interface {
                    println!("✅ 设置默认通道: {}", iface);
                    config.interface = Some(iface);
                }
                if let Some(driver_type) = driver_type {
                    println!("✅ 设置后端: {}", driver_type);
                    config.driver_type = driver_type;
                }
                if let Some(node_id) = node_id {
                    println!("✅ 设置节点 ID: {}", node_id);
                    config.driver.node_id = node_id;
                }
                if let Some(bitrate) = bitrate {
                    println!("✅ 设置总线速率: {}", bitrate);
                    config.driver.bitrate = bitrate;
                }
                if let Some(policy) = acceleration_overflow {
                    println!("✅ 设置加速度溢出策略: {:?}", policy);
                    config.driver.acceleration_overflow = policy;
                }

                config.driver.validate()?;
                config.save(explicit)?;
                Ok(())
            },

            ConfigCommand::Get { key } => {
                let config = CliConfig::load(explicit)?;
                if key == "all" {
                    print!("{}", toml::to_string_pretty(&config)?);
                    return Ok(());
                }
                match config.get(&key) {
                    Some(value) => println!("{}", value),
                    None => anyhow::bail!("未知配置项: {}", key),
                }
                Ok(())
            },

            ConfigCommand::Check => {
                let path = config_file(explicit)?;
                let config = CliConfig::load(explicit)?;

                println!("配置文件: {}", path.display());
                if !path.exists() {
                    println!("  (文件不存在，使用默认值)");
                }
                println!("  通道: {}", config.get("interface").unwrap_or_default());
                println!("  后端: {}", config.driver_type);
                println!("  节点: {}", config.driver.node_id);
                config.driver.validate()?;
                println!("✅ 配置有效");
                Ok(())
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_through_toml() {
        let mut config = CliConfig {
            interface: Some("can0".to_string()),
            driver_type: DriverType::SocketCan,
            ..CliConfig::default()
        };
        config.driver.node_id = 20;
        config.driver.acceleration_overflow = AccelerationOverflow::Clamp;

        let text = toml::to_string_pretty(&config).unwrap();
        assert!(text.contains("[driver]"));
        let parsed: CliConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let parsed: CliConfig = toml::from_str("interface = \"COM3\"\n[driver]\nnode_id = 5\n").unwrap();
        assert_eq!(parsed.interface.as_deref(), Some("COM3"));
        assert_eq!(parsed.driver_type, DriverType::Auto);
        assert_eq!(parsed.driver.node_id, 5);
        assert_eq!(parsed.driver.bitrate, DriverConfig::default().bitrate);
    }

    #[test]
    fn test_load_missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        assert_eq!(CliConfig::load(Some(&path)).unwrap(), CliConfig::default());
    }

    #[test]
    fn test_overrides_apply_only_given_fields() {
        let mut config = CliConfig {
            interface: Some("can0".to_string()),
            ..CliConfig::default()
        };
        ConfigOverrides {
            node_id: Some(7),
            ..ConfigOverrides::default()
        }
        .apply(&mut config);
        assert_eq!(config.interface.as_deref(), Some("can0"));
        assert_eq!(config.driver.node_id, 7);
        assert_eq!(config.driver_type, DriverType::Auto);
    }

    #[test]
    fn test_get_keys() {
        let config = CliConfig::default();
        assert_eq!(config.get("interface").as_deref(), Some("(未设置)"));
        assert_eq!(config.get("node_id").as_deref(), Some("19"));
        assert_eq!(config.get("acceleration_overflow").as_deref(), Some("reject"));
        assert!(config.get("nope").is_none());
    }
}
