use super::ProgressEvent;
use crate::utils::UploadId;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Error, Serialize, Deserialize)]
pub enum TransportError {
    #[error("upload stream failed: {0}")]
    Stream(String),
    #[error("finalize request failed: {0}")]
    Request(String),
}

/// 一次分块上传的启动参数
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub dataset: String,
    pub file_path: String,
    pub content: Bytes,
    /// 单块字节数
    pub chunk_size: usize,
    /// 单文件并行块数上限
    pub max_concurrent_chunks: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletedPart {
    pub part_number: u32,
    pub etag: String,
}

/// 结束一次分块上传，`abort` 为真时要求后端丢弃已上传的分块
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalizeRequest {
    pub dataset: String,
    pub file_path: String,
    pub upload_id: UploadId,
    pub parts: Vec<CompletedPart>,
    pub physical_address: String,
    pub abort: bool,
}

pub trait UploadTransport: Send + Sync + 'static {
    /// 启动分块上传，进度以事件流给出；流以 Err 结束表示传输失败，
    /// 正常关闭但没有终态负载时由调用方补记完成
    fn start_upload(&self, req: UploadRequest) -> mpsc::Receiver<Result<ProgressEvent, TransportError>>;

    fn finalize(&self, req: FinalizeRequest) -> impl Future<Output = Result<(), TransportError>> + Send;
}
