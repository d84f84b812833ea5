//! 驱动层模块
//!
//! 本模块提供 Electrak HD 执行器的会话管理，包括：
//! - NMT 启动流程（复位通信 → 运行）
//! - SDO 参数读写、回读确认与保存
//! - RPDO1 运动指令
//! - 心跳与保活线程（与用户调用并发运行）
//!
//! # 示例
//!
//! ```no_run
//! use electrak_driver::ActuatorBuilder;
//! use electrak_protocol::{Direction, ParameterAddress, ParameterValue};
//!
//! let session = ActuatorBuilder::new().interface("can0").build()?;
//! session.move_to(Direction::Raise, 100, 800, 200)?;
//!
//! let confirmation =
//!     session.write_parameter(ParameterAddress::var(0x2102), ParameterValue::U16(200))?;
//! assert!(confirmation.matched);
//! session.disconnect();
//! # Ok::<(), electrak_driver::DriverError>(())
//! ```

mod actuator;
mod builder;
mod config;
mod error;
mod gate;
mod liveness;
pub mod nmt;
mod parameters;
mod sdo;
mod session;

pub use actuator::Actuator;
pub use builder::{ActuatorBuilder, DriverType};
pub use config::DriverConfig;
pub use error::DriverError;
pub use gate::BACKLOG_CAPACITY;
pub use liveness::{LivenessSnapshot, LivenessStats};
pub use nmt::AtomicNmtState;
pub use parameters::{
    Confirmation, PersistResult, ProvisionDefaults, ProvisionReport, SleepModeOutcome,
};
pub use sdo::MAX_UPLOAD_SIZE;
pub use session::{ActuatorSession, MotionSummary};

pub use electrak_can::{BusState, CanAdapter, CanError, ElectrakFrame};
