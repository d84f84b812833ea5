//! 模拟执行器
//!
//! 作为 `MockBusHandle` 的应答器运行：维护一个小型对象字典，
//! 按 CiA 301 应答加速/分段上传与下载，支持只读对象、写入截断、
//! 忽略写入、拒绝保存和完全静默。

#![allow(dead_code)]

use electrak_can::{MockBusHandle, MockCanAdapter};
use electrak_driver::{ActuatorSession, DriverConfig};
use electrak_protocol::{
    ElectrakFrame, NodeId, ParameterAddress, STORE_SIGNATURE, SdoRequest, SdoResponse,
};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

pub const NODE: u8 = 19;

/// 对象字典与行为开关
#[derive(Debug, Default)]
pub struct SimState {
    pub objects: HashMap<ParameterAddress, Vec<u8>>,
    pub read_only: HashSet<ParameterAddress>,
    /// 写入值大于上限时截断为上限
    pub clamp: HashMap<ParameterAddress, u32>,
    /// 应答写入但不修改值
    pub ignore_writes: HashSet<ParameterAddress>,
    pub reject_save: bool,
    /// 不应答任何 SDO 请求
    pub silent: bool,
    pub save_count: usize,
    /// 收到的客户端中止码
    pub aborts: Vec<u32>,
    upload: Option<Vec<u8>>,
    download: Option<(ParameterAddress, Vec<u8>)>,
}

/// 模拟执行器（可克隆，测试侧与应答器共享状态）
#[derive(Clone)]
pub struct SimulatedActuator {
    state: Arc<Mutex<SimState>>,
}

impl SimulatedActuator {
    /// 带出厂参数的执行器：睡眠开启、运动关闭、默认速度 100
    pub fn new() -> Self {
        let mut state = SimState::default();
        let var = ParameterAddress::var;
        state.objects.insert(var(0x1000), 0x0000_0192u32.to_le_bytes().to_vec());
        state.objects.insert(var(0x1008), b"Electrak HD".to_vec());
        state.objects.insert(var(0x1009), b"B".to_vec());
        state.objects.insert(var(0x100A), b"1.2.3.45".to_vec());
        state.objects.insert(var(0x1017), 0u16.to_le_bytes().to_vec());
        state.objects.insert(ParameterAddress::new(0x1018, 1), 0x0000_02A1u32.to_le_bytes().to_vec());
        state.objects.insert(ParameterAddress::new(0x1018, 2), 0x0001_0002u32.to_le_bytes().to_vec());
        state.objects.insert(ParameterAddress::new(0x1018, 3), 0x0000_0001u32.to_le_bytes().to_vec());
        state.objects.insert(ParameterAddress::new(0x1018, 4), 0x00BC_614Eu32.to_le_bytes().to_vec());
        state.objects.insert(var(0x2013), vec![1]);
        state.objects.insert(var(0x2102), 100u16.to_le_bytes().to_vec());
        state.objects.insert(var(0x2104), vec![0]);
        state.objects.insert(ParameterAddress::store_all(), vec![0; 4]);

        for address in [var(0x1000), var(0x1008), var(0x1009), var(0x100A)] {
            state.read_only.insert(address);
        }
        state.clamp.insert(var(0x2102), 1000);

        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    pub fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap()
    }

    pub fn value(&self, address: ParameterAddress) -> Option<Vec<u8>> {
        self.state().objects.get(&address).cloned()
    }

    /// 挂到 Mock 总线上
    pub fn attach(&self, handle: &MockBusHandle) {
        let sim = self.clone();
        handle.set_responder(move |frame| sim.respond(frame));
    }

    fn respond(&self, frame: &ElectrakFrame) -> Vec<ElectrakFrame> {
        let node = NodeId::new(NODE).unwrap();
        if frame.id != node.sdo_rx() {
            return Vec::new();
        }
        let Ok(request) = SdoRequest::parse(frame) else {
            return Vec::new();
        };
        let mut state = self.state();
        if let SdoRequest::Abort { code, .. } = request {
            state.aborts.push(code);
            state.upload = None;
            state.download = None;
            return Vec::new();
        }
        if state.silent {
            return Vec::new();
        }
        state
            .handle(request)
            .map(|response| vec![response.to_frame(node)])
            .unwrap_or_default()
    }
}

impl SimState {
    fn handle(&mut self, request: SdoRequest) -> Option<SdoResponse> {
        let response = match request {
            SdoRequest::InitiateUpload { address } => match self.objects.get(&address) {
                None => abort(address, 0x0602_0000),
                Some(bytes) if bytes.len() <= 4 => {
                    SdoResponse::expedited_upload(address, bytes).ok()?
                },
                Some(bytes) => {
                    let size = bytes.len() as u32;
                    self.upload = Some(bytes.clone());
                    SdoResponse::SegmentedUpload {
                        address,
                        size: Some(size),
                    }
                },
            },
            SdoRequest::UploadSegment { toggle } => {
                let remaining = self.upload.as_mut()?;
                let take = remaining.len().min(7);
                let chunk: Vec<u8> = remaining.drain(..take).collect();
                let last = remaining.is_empty();
                if last {
                    self.upload = None;
                }
                let mut data = [0u8; 7];
                data[..take].copy_from_slice(&chunk);
                SdoResponse::UploadSegment {
                    toggle,
                    data,
                    len: take as u8,
                    last,
                }
            },
            SdoRequest::ExpeditedDownload { address, data, len } => {
                match self.write(address, data[..len as usize].to_vec()) {
                    Ok(()) => SdoResponse::DownloadAck { address },
                    Err(code) => abort(address, code),
                }
            },
            SdoRequest::InitiateSegmentedDownload { address, .. } => {
                if self.read_only.contains(&address) {
                    abort(address, 0x0601_0002)
                } else {
                    self.download = Some((address, Vec::new()));
                    SdoResponse::DownloadAck { address }
                }
            },
            SdoRequest::DownloadSegment {
                toggle,
                data,
                len,
                last,
            } => {
                let (address, buffer) = self.download.as_mut()?;
                buffer.extend_from_slice(&data[..len as usize]);
                if last {
                    let (address, buffer) = (*address, std::mem::take(buffer));
                    self.download = None;
                    if let Err(code) = self.write(address, buffer) {
                        return Some(abort(address, code));
                    }
                }
                SdoResponse::DownloadSegmentAck { toggle }
            },
            SdoRequest::Abort { .. } => return None,
        };
        Some(response)
    }

    fn write(&mut self, address: ParameterAddress, bytes: Vec<u8>) -> Result<(), u32> {
        if address == ParameterAddress::store_all() {
            if self.reject_save || bytes != STORE_SIGNATURE {
                return Err(0x0800_0020);
            }
            self.save_count += 1;
            return Ok(());
        }
        if self.read_only.contains(&address) {
            return Err(0x0601_0002);
        }
        let Some(current) = self.objects.get(&address) else {
            return Err(0x0602_0000);
        };
        if self.ignore_writes.contains(&address) {
            return Ok(());
        }

        let width = current.len();
        let stored = match self.clamp.get(&address) {
            Some(&max) if width <= 4 => {
                let mut buf = [0u8; 4];
                buf[..bytes.len().min(4)].copy_from_slice(&bytes[..bytes.len().min(4)]);
                let value = u32::from_le_bytes(buf).min(max);
                value.to_le_bytes()[..width].to_vec()
            },
            _ => bytes,
        };
        self.objects.insert(address, stored);
        Ok(())
    }
}

fn abort(address: ParameterAddress, code: u32) -> SdoResponse {
    SdoResponse::Abort { address, code }
}

/// 缩短所有等待时间的配置
pub fn fast_config() -> DriverConfig {
    DriverConfig {
        reset_settle_ms: 20,
        operational_settle_ms: 20,
        write_settle_ms: 5,
        persist_settle_ms: 5,
        sdo_timeout_ms: 50,
        heartbeat_interval_ms: 20,
        keep_alive_interval_ms: 20,
        receive_slice_ms: 1,
        ..DriverConfig::default()
    }
}

/// 在 Mock 总线上连接模拟执行器
pub fn connect(sim: &SimulatedActuator, config: DriverConfig) -> (ActuatorSession, MockBusHandle) {
    let (adapter, handle) = MockCanAdapter::pair();
    sim.attach(&handle);
    let session = ActuatorSession::connect_with(adapter, config).unwrap();
    (session, handle)
}
