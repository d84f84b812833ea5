//! SDO 客户端
//!
//! 一次只进行一个事务（会话内的 SDO 锁保证）；每个请求/应答帧
//! 只在收发那一刻占用总线互斥门，等待期间心跳与保活照常发送。

use crate::error::DriverError;
use crate::gate::BusGate;
use electrak_protocol::{
    ElectrakFrame, NodeId, ParameterAddress, ProtocolError, SdoAbortCode, SdoRequest, SdoResponse,
};
use parking_lot::{Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// 分段上传的最大字节数
pub const MAX_UPLOAD_SIZE: usize = 4096;

/// 上传结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Upload {
    pub bytes: Vec<u8>,
    /// 是否为加速传输（决定如何推断数值类型）
    pub expedited: bool,
}

pub(crate) struct SdoClient {
    node: NodeId,
    timeout: Duration,
    slice: Duration,
    lock: Mutex<()>,
}

impl SdoClient {
    pub fn new(node: NodeId, timeout: Duration, slice: Duration) -> Self {
        Self {
            node,
            timeout,
            slice,
            lock: Mutex::new(()),
        }
    }

    /// 占用事务锁（期间不会有 SDO 请求发出）
    pub fn hold(&self) -> MutexGuard<'_, ()> {
        self.lock.lock()
    }

    /// 读取对象（加速或分段上传）
    pub fn upload(&self, gate: &BusGate, address: ParameterAddress) -> Result<Upload, DriverError> {
        let _transaction = self.lock.lock();

        match self.request(gate, address, SdoRequest::InitiateUpload { address })? {
            SdoResponse::ExpeditedUpload { data, len, .. } => {
                let bytes = SdoResponse::expedited_bytes(&data, len).to_vec();
                debug!("SDO upload {} (expedited): {:02X?}", address, bytes);
                Ok(Upload {
                    bytes,
                    expedited: true,
                })
            },
            SdoResponse::SegmentedUpload { size, .. } => {
                let bytes = self.upload_segments(gate, address, size)?;
                debug!("SDO upload {} (segmented): {} bytes", address, bytes.len());
                Ok(Upload {
                    bytes,
                    expedited: false,
                })
            },
            other => Err(self.unexpected(gate, address, other)),
        }
    }

    fn upload_segments(
        &self,
        gate: &BusGate,
        address: ParameterAddress,
        size: Option<u32>,
    ) -> Result<Vec<u8>, DriverError> {
        if let Some(size) = size
            && size as usize > MAX_UPLOAD_SIZE
        {
            self.send_abort(gate, address, SdoAbortCode::OutOfMemory as u32);
            return Err(ProtocolError::OutOfRange {
                field: "upload size".to_string(),
                value: size,
                max: MAX_UPLOAD_SIZE as u32,
            }
            .into());
        }

        let mut bytes = Vec::with_capacity(size.unwrap_or(0) as usize);
        let mut toggle = false;
        loop {
            match self.request(gate, address, SdoRequest::UploadSegment { toggle })? {
                SdoResponse::UploadSegment {
                    toggle: got,
                    data,
                    len,
                    last,
                } => {
                    if got != toggle {
                        self.send_abort(gate, address, SdoAbortCode::ToggleBitNotAlternated as u32);
                        return Err(ProtocolError::ParseError(format!(
                            "toggle bit not alternated during upload of {}",
                            address
                        ))
                        .into());
                    }
                    bytes.extend_from_slice(&data[..len as usize]);
                    if bytes.len() > MAX_UPLOAD_SIZE {
                        self.send_abort(gate, address, SdoAbortCode::OutOfMemory as u32);
                        return Err(ProtocolError::OutOfRange {
                            field: "upload size".to_string(),
                            value: bytes.len() as u32,
                            max: MAX_UPLOAD_SIZE as u32,
                        }
                        .into());
                    }
                    if last {
                        break;
                    }
                    toggle = !toggle;
                },
                other => return Err(self.unexpected(gate, address, other)),
            }
        }

        if let Some(size) = size
            && size as usize != bytes.len()
        {
            warn!(
                "SDO upload {} indicated {} bytes but delivered {}",
                address,
                size,
                bytes.len()
            );
        }
        Ok(bytes)
    }

    /// 写入对象：≤4 字节用加速下载，否则分段下载
    pub fn download(
        &self,
        gate: &BusGate,
        address: ParameterAddress,
        bytes: &[u8],
    ) -> Result<(), DriverError> {
        if bytes.is_empty() {
            return Err(DriverError::InvalidInput(format!(
                "empty value for {}",
                address
            )));
        }
        let _transaction = self.lock.lock();

        if bytes.len() <= 4 {
            let request = SdoRequest::expedited_download(address, bytes)?;
            return match self.request(gate, address, request)? {
                SdoResponse::DownloadAck { .. } => {
                    debug!("SDO download {} (expedited): {:02X?}", address, bytes);
                    Ok(())
                },
                other => Err(self.unexpected(gate, address, other)),
            };
        }

        let initiate = SdoRequest::InitiateSegmentedDownload {
            address,
            size: bytes.len() as u32,
        };
        match self.request(gate, address, initiate)? {
            SdoResponse::DownloadAck { .. } => {},
            other => return Err(self.unexpected(gate, address, other)),
        }

        let mut toggle = false;
        let mut chunks = bytes.chunks(7).peekable();
        while let Some(chunk) = chunks.next() {
            let last = chunks.peek().is_none();
            let request = SdoRequest::download_segment(toggle, chunk, last)?;
            match self.request(gate, address, request)? {
                SdoResponse::DownloadSegmentAck { toggle: got } if got == toggle => {},
                SdoResponse::DownloadSegmentAck { .. } => {
                    self.send_abort(gate, address, SdoAbortCode::ToggleBitNotAlternated as u32);
                    return Err(ProtocolError::ParseError(format!(
                        "toggle bit not alternated during download of {}",
                        address
                    ))
                    .into());
                },
                other => return Err(self.unexpected(gate, address, other)),
            }
            toggle = !toggle;
        }
        debug!("SDO download {} (segmented): {} bytes", address, bytes.len());
        Ok(())
    }

    /// 发送请求并等待应答
    fn request(
        &self,
        gate: &BusGate,
        address: ParameterAddress,
        request: SdoRequest,
    ) -> Result<SdoResponse, DriverError> {
        gate.send(request.to_frame(self.node))?;
        self.wait_response(gate, address)
    }

    /// 等待本节点的 SDO 应答
    ///
    /// 其他帧放入积压队列；多路复用地址不符的应答（之前超时事务的迟到应答）丢弃；
    /// 中止应答转换为 `SdoAbort`。超时后向设备发送中止。
    fn wait_response(
        &self,
        gate: &BusGate,
        address: ParameterAddress,
    ) -> Result<SdoResponse, DriverError> {
        let deadline = Instant::now() + self.timeout;
        let response_id = self.node.sdo_tx();

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                warn!("No SDO response for {} within {:?}", address, self.timeout);
                self.send_abort(gate, address, SdoAbortCode::ProtocolTimedOut as u32);
                return Err(DriverError::Timeout { address });
            }

            let Some(frame) = gate.receive(remaining.min(self.slice))? else {
                continue;
            };
            if frame.id != response_id {
                gate.stash(frame);
                continue;
            }

            let response = match SdoResponse::parse(&frame) {
                Ok(response) => response,
                Err(e) => {
                    warn!("Ignoring malformed SDO response {:02X?}: {}", frame.data_slice(), e);
                    continue;
                },
            };

            if let Some(got) = response_address(&response)
                && got != address
            {
                trace!("Discarding stale SDO response for {} (waiting for {})", got, address);
                continue;
            }

            if let SdoResponse::Abort { code, .. } = response {
                warn!(
                    "Device aborted SDO transfer for {}: 0x{:08X} ({})",
                    address,
                    code,
                    SdoAbortCode::describe(code)
                );
                return Err(DriverError::SdoAbort { address, code });
            }

            return Ok(response);
        }
    }

    /// 尽力发送客户端中止（失败只记录日志）
    fn send_abort(&self, gate: &BusGate, address: ParameterAddress, code: u32) {
        let frame: ElectrakFrame = SdoRequest::Abort { address, code }.to_frame(self.node);
        if let Err(e) = gate.send(frame) {
            warn!("Failed to send SDO abort for {}: {}", address, e);
        }
    }

    /// 应答类型不符：中止事务并返回协议错误
    fn unexpected(
        &self,
        gate: &BusGate,
        address: ParameterAddress,
        response: SdoResponse,
    ) -> DriverError {
        self.send_abort(gate, address, SdoAbortCode::CommandSpecifierInvalid as u32);
        ProtocolError::ParseError(format!(
            "unexpected SDO response for {}: {:?}",
            address, response
        ))
        .into()
    }
}

fn response_address(response: &SdoResponse) -> Option<ParameterAddress> {
    match response {
        SdoResponse::ExpeditedUpload { address, .. }
        | SdoResponse::SegmentedUpload { address, .. }
        | SdoResponse::DownloadAck { address }
        | SdoResponse::Abort { address, .. } => Some(*address),
        SdoResponse::UploadSegment { .. } | SdoResponse::DownloadSegmentAck { .. } => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use electrak_can::MockCanAdapter;

    fn client() -> SdoClient {
        SdoClient::new(
            NodeId::default(),
            Duration::from_millis(50),
            Duration::from_millis(2),
        )
    }

    #[test]
    fn test_expedited_upload() {
        let (adapter, handle) = MockCanAdapter::pair();
        let gate = BusGate::new(Box::new(adapter));
        let node = NodeId::default();
        handle.set_responder(move |frame| match SdoRequest::parse(frame) {
            Ok(SdoRequest::InitiateUpload { address }) => vec![
                SdoResponse::expedited_upload(address, &[0xC8, 0x00])
                    .unwrap()
                    .to_frame(node),
            ],
            _ => Vec::new(),
        });

        let upload = client()
            .upload(&gate, ParameterAddress::var(0x2102))
            .unwrap();
        assert!(upload.expedited);
        assert_eq!(upload.bytes, vec![0xC8, 0x00]);
    }

    #[test]
    fn test_timeout_sends_abort() {
        let (adapter, handle) = MockCanAdapter::pair();
        let gate = BusGate::new(Box::new(adapter));
        let address = ParameterAddress::var(0x2013);

        match client().upload(&gate, address) {
            Err(DriverError::Timeout { address: got }) => assert_eq!(got, address),
            other => panic!("expected timeout, got {:?}", other),
        }

        let sent = handle.sent_with_id(0x613);
        assert_eq!(sent.len(), 2);
        assert_eq!(
            SdoRequest::parse(&sent[1].frame).unwrap(),
            SdoRequest::Abort {
                address,
                code: 0x0504_0000
            }
        );
    }

    #[test]
    fn test_foreign_frames_are_stashed() {
        let (adapter, handle) = MockCanAdapter::pair();
        let gate = BusGate::new(Box::new(adapter));
        let node = NodeId::default();
        handle.set_responder(move |frame| match SdoRequest::parse(frame) {
            Ok(SdoRequest::ExpeditedDownload { address, .. }) => vec![
                ElectrakFrame::new_standard(0x193, &[1, 2, 3]),
                SdoResponse::DownloadAck { address }.to_frame(node),
            ],
            _ => Vec::new(),
        });

        client()
            .download(&gate, ParameterAddress::var(0x2104), &[1])
            .unwrap();
        assert_eq!(gate.pop_backlog().unwrap().id, 0x193);
    }

    #[test]
    fn test_abort_maps_to_sdo_abort() {
        let (adapter, handle) = MockCanAdapter::pair();
        let gate = BusGate::new(Box::new(adapter));
        let node = NodeId::default();
        handle.set_responder(move |frame| match SdoRequest::parse(frame) {
            Ok(SdoRequest::ExpeditedDownload { address, .. }) => vec![
                SdoResponse::Abort {
                    address,
                    code: 0x0601_0002,
                }
                .to_frame(node),
            ],
            _ => Vec::new(),
        });

        let err = client()
            .download(&gate, ParameterAddress::var(0x1000), &[1, 2, 3, 4])
            .unwrap_err();
        assert_eq!(err.abort_code(), Some(0x0601_0002));
    }

    #[test]
    fn test_empty_download_rejected() {
        let (adapter, _handle) = MockCanAdapter::pair();
        let gate = BusGate::new(Box::new(adapter));
        assert!(matches!(
            client().download(&gate, ParameterAddress::var(0x2013), &[]),
            Err(DriverError::InvalidInput(_))
        ));
    }
}
