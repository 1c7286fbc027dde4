use crate::utils::UploadId;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadStatus {
    Initializing,
    Uploading,
    Finished,
    Aborted,
}

impl UploadStatus {
    /// 终态之后不再有进度事件
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished | Self::Aborted)
    }

    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }
}

/// 进度流中的单个事件，缺失的字段表示保持任务原值
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    pub status: UploadStatus,
    pub percentage: Option<f64>,
    pub upload_id: Option<UploadId>,
    pub physical_address: Option<String>,
    /// 只在 finished 时出现
    pub total_time: Option<Duration>,
}

impl ProgressEvent {
    pub fn status(status: UploadStatus) -> Self {
        Self {
            status,
            percentage: None,
            upload_id: None,
            physical_address: None,
            total_time: None,
        }
    }
}
