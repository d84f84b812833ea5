//! 执行器会话
//!
//! `ActuatorSession` 拥有总线互斥门、SDO 客户端和心跳/保活线程。
//! 连接时完成 NMT 启动流程，之后所有公开方法都可以从多个线程并发调用：
//! 运动帧与保活重发在同一把锁内更新最后指令，SDO 事务由会话内的
//! SDO 锁串行化。

use crate::config::DriverConfig;
use crate::error::DriverError;
use crate::gate::BusGate;
use crate::liveness::{LivenessLoops, LivenessSnapshot, LivenessStats};
use crate::nmt::{self, AtomicNmtState};
use crate::parameters::{
    Confirmation, PersistResult, ProvisionDefaults, ProvisionReport, SleepModeOutcome,
};
use crate::sdo::SdoClient;
use electrak_can::{BusState, CanAdapter, ElectrakFrame};
use electrak_protocol::{
    Direction, KNOWN_PARAMETERS, KnownParameter, MotionCommand, MotionFrame, NmtCommand, NmtState,
    NodeId, OD_ENABLE_SLEEP, ParameterAddress, ParameterValue, ProtocolError, STORE_SIGNATURE,
    ValueKind,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// 一次运动指令的结果：归一化后的请求与实际发送的帧
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MotionSummary {
    pub command: MotionCommand,
    pub frame: MotionFrame,
}

/// 单个执行器节点的会话
pub struct ActuatorSession {
    gate: Arc<BusGate>,
    node: NodeId,
    config: DriverConfig,
    nmt_state: AtomicNmtState,
    sdo: SdoClient,
    stats: Arc<LivenessStats>,
    liveness: Mutex<Option<LivenessLoops>>,
    closed: AtomicBool,
}

impl ActuatorSession {
    /// 在已打开的适配器上建立会话
    ///
    /// 复位通信 → 等待 `reset_settle` → 启动 → 等待 `operational_settle` →
    /// 启动心跳与保活线程。任一步失败都会关闭适配器并返回错误。
    pub fn connect_with<A>(adapter: A, config: DriverConfig) -> Result<Self, DriverError>
    where
        A: CanAdapter + Send + 'static,
    {
        config.validate()?;
        let node = NodeId::new(config.node_id)?;

        let session = Self {
            gate: Arc::new(BusGate::new(Box::new(adapter))),
            node,
            sdo: SdoClient::new(node, config.sdo_timeout(), config.receive_slice()),
            nmt_state: AtomicNmtState::default(),
            stats: Arc::new(LivenessStats::default()),
            liveness: Mutex::new(None),
            closed: AtomicBool::new(false),
            config,
        };

        // 失败时 `session` 被丢弃，Drop 负责关闭适配器
        nmt::bring_up(&session.gate, node, &session.nmt_state, &session.config)?;

        let loops = LivenessLoops::spawn(
            session.gate.clone(),
            node,
            session.config.heartbeat_interval(),
            session.config.keep_alive_interval(),
            session.stats.clone(),
        )
        .map_err(|e| DriverError::IoThread(format!("failed to spawn liveness threads: {}", e)))?;
        *session.liveness.lock() = Some(loops);

        info!("Actuator session ready on node {}", node);
        Ok(session)
    }

    pub fn node_id(&self) -> NodeId {
        self.node
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    // ============================================================
    // 运动
    // ============================================================

    /// 发送运动指令（RPDO1），成功后成为保活重发的内容
    ///
    /// `Lower` 的目标位置恒为 0；位置、速度越界返回 `InvalidInput`；
    /// 加速度越界按 `acceleration_overflow` 策略处理。不重试。
    pub fn move_to(
        &self,
        direction: Direction,
        position_mm: u32,
        speed: u16,
        acceleration: u32,
    ) -> Result<MotionSummary, DriverError> {
        let policy = self.config.acceleration_overflow;
        let command = MotionCommand::new(direction, position_mm, speed, acceleration)
            .normalize(policy)
            .map_err(invalid_input)?;
        let frame = command.encode(policy).map_err(invalid_input)?;

        self.gate.send_motion(frame, self.node)?;
        info!(
            "Move {} to {} mm at speed {} (accel {}): [{}]",
            command.direction, command.position_mm, command.speed, command.acceleration, frame
        );
        Ok(MotionSummary { command, frame })
    }

    /// 停止：重发最后指令并清除使能位（没有指令时发送全零帧）
    ///
    /// 停止帧随后由保活线程继续重发。
    pub fn stop(&self) -> Result<MotionFrame, DriverError> {
        let frame = self
            .gate
            .last_command()
            .map(MotionFrame::disabled)
            .unwrap_or(MotionFrame::IDLE);
        self.gate.send_motion(frame, self.node)?;
        info!("Motion disabled: [{}]", frame);
        Ok(frame)
    }

    /// 最后一次成功发送的运动帧
    pub fn last_command(&self) -> Option<MotionFrame> {
        self.gate.last_command()
    }

    // ============================================================
    // 参数
    // ============================================================

    /// 读取参数
    ///
    /// 加速上传按指示长度映射为 `U8`/`U16`/`U32`，分段上传返回 `Bytes`。
    pub fn read_parameter(&self, address: ParameterAddress) -> Result<ParameterValue, DriverError> {
        let upload = self.sdo.upload(&self.gate, address)?;
        Ok(if upload.expedited {
            ParameterValue::from_upload(&upload.bytes)
        } else {
            ParameterValue::Bytes(upload.bytes)
        })
    }

    /// 按指定类型读取参数
    pub fn read_parameter_as(
        &self,
        address: ParameterAddress,
        kind: ValueKind,
    ) -> Result<ParameterValue, DriverError> {
        let upload = self.sdo.upload(&self.gate, address)?;
        Ok(ParameterValue::decode(kind, &upload.bytes))
    }

    /// 写入参数，等待 `write_settle` 后回读确认
    ///
    /// 回读值按写入值的类型解码，超出该宽度的非零字节会保留下来；
    /// 不一致时 `matched = false`，不是错误。
    pub fn write_parameter(
        &self,
        address: ParameterAddress,
        value: ParameterValue,
    ) -> Result<Confirmation, DriverError> {
        self.sdo.download(&self.gate, address, &value.to_le_bytes())?;
        std::thread::sleep(self.config.write_settle());

        let upload = self.sdo.upload(&self.gate, address)?;
        if value.kind().width().is_some_and(|width| upload.bytes.len() != width) {
            debug!(
                "Parameter {} read back {} bytes for a {:?} write",
                address,
                upload.bytes.len(),
                value.kind()
            );
        }
        let read_back = ParameterValue::decode_read_back(value.kind(), &upload.bytes);
        let confirmation = Confirmation::new(address, value, read_back);
        if confirmation.matched {
            info!("Parameter {} = {} confirmed", address, confirmation.read_back);
        } else {
            warn!(
                "Parameter {} wrote {} but read back {}",
                address, confirmation.written, confirmation.read_back
            );
        }
        Ok(confirmation)
    }

    /// 保存参数到非易失存储并逐项回读
    ///
    /// 向 `0x1010:01` 写入 `"save"`，等待 `persist_settle`，再读取 `subset`
    /// 中每个地址并与期望值比较。设备拒绝保存返回 `Persist`。
    pub fn persist(
        &self,
        subset: &[(ParameterAddress, ParameterValue)],
    ) -> Result<PersistResult, DriverError> {
        self.sdo
            .download(&self.gate, ParameterAddress::store_all(), &STORE_SIGNATURE)
            .map_err(|e| match e {
                DriverError::SdoAbort { .. } => DriverError::Persist {
                    source: Box::new(e),
                },
                other => other,
            })?;
        info!("Store parameters command accepted");
        std::thread::sleep(self.config.persist_settle());

        let mut entries = Vec::with_capacity(subset.len());
        for (address, expected) in subset {
            let read_back = self.read_parameter_as(*address, expected.kind())?;
            entries.push(Confirmation::new(*address, expected.clone(), read_back));
        }
        let result = PersistResult { entries };
        if !result.all_matched() {
            for mismatch in result.mismatches() {
                warn!("After store: {}", mismatch);
            }
        }
        Ok(result)
    }

    /// 确保睡眠模式关闭（0x2013 = 0）
    ///
    /// 当前值为 1 时写入 0 并回读；写入生效后重启通信。
    pub fn ensure_sleep_disabled(&self) -> Result<SleepModeOutcome, DriverError> {
        let address = ParameterAddress::var(OD_ENABLE_SLEEP);
        let current = self.read_parameter_as(address, ValueKind::U8)?;
        if current.as_i64() != Some(1) {
            info!("Sleep mode already disabled ({})", current);
            return Ok(SleepModeOutcome::AlreadyDisabled);
        }

        info!("Sleep mode enabled, disabling");
        let confirmation = self.write_parameter(address, ParameterValue::U8(0))?;
        if !confirmation.matched {
            return Ok(SleepModeOutcome::NotPersisted);
        }
        self.restart_communication()?;
        Ok(SleepModeOutcome::Disabled)
    }

    /// 写入出厂默认值，逐项确认后保存
    pub fn provision(&self, defaults: &ProvisionDefaults) -> Result<ProvisionReport, DriverError> {
        let entries = defaults.entries();
        let mut writes = Vec::with_capacity(entries.len());
        for (address, value) in &entries {
            writes.push(self.write_parameter(*address, value.clone())?);
        }
        let persisted = self.persist(&entries)?;
        Ok(ProvisionReport { writes, persisted })
    }

    /// 读取所有已知参数；单项失败不影响其余项
    pub fn dump_parameters(&self) -> Vec<(KnownParameter, Result<ParameterValue, DriverError>)> {
        KNOWN_PARAMETERS
            .iter()
            .map(|param| {
                let value = self.read_parameter_as(param.address, param.kind);
                if let Err(e) = &value {
                    warn!("Failed to read {} ({}): {}", param.name, param.address, e);
                }
                (*param, value)
            })
            .collect()
    }

    // ============================================================
    // NMT
    // ============================================================

    /// 重新执行复位通信与启动（不重启心跳/保活线程）
    pub fn restart_communication(&self) -> Result<(), DriverError> {
        nmt::bring_up(&self.gate, self.node, &self.nmt_state, &self.config)
    }

    /// 发送单条 NMT 命令
    pub fn set_nmt_state(&self, command: NmtCommand) -> Result<(), DriverError> {
        nmt::send_command(&self.gate, self.node, &self.nmt_state, command)
    }

    /// 最后一次成功发送的 NMT 命令对应的状态
    pub fn nmt_state(&self) -> NmtState {
        self.nmt_state.get(Ordering::Acquire)
    }

    // ============================================================
    // 状态
    // ============================================================

    pub fn bus_status(&self) -> BusState {
        self.gate.bus_state()
    }

    /// 等待下一帧（先取积压队列），超时返回 `None`
    ///
    /// 等待期间暂停 SDO 事务，避免截走其应答。
    pub fn poll_feedback(&self, timeout: Duration) -> Result<Option<ElectrakFrame>, DriverError> {
        if !self.gate.is_open() {
            return Err(DriverError::NotConnected);
        }
        let _exclusive = self.sdo.hold();
        if let Some(frame) = self.gate.pop_backlog() {
            return Ok(Some(frame));
        }

        let deadline = Instant::now() + timeout;
        let slice = self.config.receive_slice();
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if let Some(frame) = self.gate.receive(remaining.min(slice))? {
                return Ok(Some(frame));
            }
            if remaining.is_zero() {
                return Ok(None);
            }
        }
    }

    /// 积压队列中等待 `poll_feedback` 取走的帧数
    pub fn pending_frames(&self) -> usize {
        self.gate.backlog_len()
    }

    pub fn liveness_stats(&self) -> LivenessSnapshot {
        self.stats.snapshot()
    }

    pub fn is_connected(&self) -> bool {
        !self.closed.load(Ordering::Acquire)
    }

    // ============================================================
    // 关闭
    // ============================================================

    /// 停止心跳/保活线程并关闭适配器；重复调用无副作用
    pub fn disconnect(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(mut loops) = self.liveness.lock().take() {
            loops.shutdown();
        }
        if self.gate.close() {
            info!("Actuator session on node {} closed", self.node);
        }
    }
}

impl std::fmt::Debug for ActuatorSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActuatorSession")
            .field("node", &self.node)
            .field("nmt_state", &self.nmt_state())
            .field("bus_state", &self.bus_status())
            .field("connected", &self.is_connected())
            .finish()
    }
}

impl Drop for ActuatorSession {
    fn drop(&mut self) {
        self.disconnect();
    }
}

fn invalid_input(e: ProtocolError) -> DriverError {
    DriverError::InvalidInput(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use electrak_can::MockCanAdapter;

    fn fast_config() -> DriverConfig {
        DriverConfig {
            reset_settle_ms: 5,
            operational_settle_ms: 5,
            write_settle_ms: 1,
            persist_settle_ms: 1,
            sdo_timeout_ms: 30,
            heartbeat_interval_ms: 1000,
            keep_alive_interval_ms: 1000,
            ..DriverConfig::default()
        }
    }

    #[test]
    fn test_invalid_motion_is_input_error() {
        let (adapter, handle) = MockCanAdapter::pair();
        let session = ActuatorSession::connect_with(adapter, fast_config()).unwrap();
        handle.clear_sent();

        assert!(matches!(
            session.move_to(Direction::Raise, 7000, 100, 10),
            Err(DriverError::InvalidInput(_))
        ));
        assert!(matches!(
            session.move_to(Direction::Raise, 100, 1001, 10),
            Err(DriverError::InvalidInput(_))
        ));
        assert!(matches!(
            session.move_to(Direction::Raise, 100, 800, 500),
            Err(DriverError::InvalidInput(_))
        ));
        assert!(handle.sent_with_id(0x213).is_empty());
        assert_eq!(session.last_command(), None);
    }

    #[test]
    fn test_stop_without_command_sends_idle() {
        let (adapter, handle) = MockCanAdapter::pair();
        let session = ActuatorSession::connect_with(adapter, fast_config()).unwrap();

        assert_eq!(session.stop().unwrap(), MotionFrame::IDLE);
        assert_eq!(handle.sent_with_id(0x213)[0].frame.data, [0u8; 8]);

        session.move_to(Direction::Raise, 100, 800, 100).unwrap();
        let stopped = session.stop().unwrap();
        assert!(!stopped.motion_enabled());
        assert_eq!(stopped.position_mm(), 100);
        assert_eq!(session.last_command(), Some(stopped));
    }

    #[test]
    fn test_invalid_config_rejected_before_traffic() {
        let (adapter, handle) = MockCanAdapter::pair();
        let config = DriverConfig {
            node_id: 200,
            ..fast_config()
        };
        assert!(ActuatorSession::connect_with(adapter, config).is_err());
        assert!(handle.sent().is_empty());
    }
}
