//! 连接门面
//!
//! `Actuator` 持有可选的会话：未连接时 `bus_status()` 为 `Closed`，
//! 其他操作返回 `NotConnected`。

use crate::builder::{ActuatorBuilder, DriverType};
use crate::config::DriverConfig;
use crate::error::DriverError;
use crate::session::ActuatorSession;
use electrak_can::{BusState, CanAdapter};
use tracing::info;

#[derive(Default)]
pub struct Actuator {
    driver_type: DriverType,
    config: DriverConfig,
    session: Option<ActuatorSession>,
}

impl Actuator {
    pub fn new(config: DriverConfig) -> Self {
        Self {
            driver_type: DriverType::Auto,
            config,
            session: None,
        }
    }

    pub fn with_driver_type(mut self, driver_type: DriverType) -> Self {
        self.driver_type = driver_type;
        self
    }

    /// 打开通道并完成 NMT 启动；已有连接时先断开
    pub fn connect(&mut self, channel: &str) -> Result<(), DriverError> {
        self.disconnect();
        let session = ActuatorBuilder::new()
            .interface(channel)
            .driver_type(self.driver_type)
            .config(self.config.clone())
            .build()?;
        self.session = Some(session);
        Ok(())
    }

    /// 在外部提供的适配器上建立会话
    pub fn connect_with<A>(&mut self, adapter: A) -> Result<(), DriverError>
    where
        A: CanAdapter + Send + 'static,
    {
        self.disconnect();
        self.session = Some(ActuatorSession::connect_with(adapter, self.config.clone())?);
        Ok(())
    }

    /// 断开；重复调用无副作用
    pub fn disconnect(&mut self) {
        if let Some(session) = self.session.take() {
            session.disconnect();
            info!("Disconnected from actuator");
        }
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    pub fn bus_status(&self) -> BusState {
        self.session
            .as_ref()
            .map_or(BusState::Closed, ActuatorSession::bus_status)
    }

    /// 当前会话
    pub fn session(&self) -> Result<&ActuatorSession, DriverError> {
        self.session.as_ref().ok_or(DriverError::NotConnected)
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }
}
