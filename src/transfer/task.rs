use crate::transport::{ProgressEvent, UploadStatus};
use crate::utils::UploadId;
use serde::Serialize;
use std::{collections::HashMap, time::Duration};

/// 可见列表中的一个上传任务，`file_path` 在列表内唯一
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadTask {
    pub file_path: String,
    pub status: UploadStatus,
    pub percentage: f64,
    pub upload_id: UploadId,
    pub physical_address: String,
    pub total_time: Option<Duration>,
}

impl UploadTask {
    pub(crate) fn initializing(file_path: String) -> Self {
        Self {
            file_path,
            status: UploadStatus::Initializing,
            percentage: 0.0,
            upload_id: UploadId::default(),
            physical_address: String::new(),
            total_time: None,
        }
    }

    /// 合并一个进度事件，事件里缺失的字段保持原值
    pub(crate) fn merge(&mut self, event: ProgressEvent) {
        self.status = event.status;
        if let Some(percentage) = event.percentage {
            self.percentage = percentage;
        }
        if let Some(upload_id) = event.upload_id {
            self.upload_id = upload_id;
        }
        if let Some(physical_address) = event.physical_address {
            self.physical_address = physical_address;
        }
        if let Some(total_time) = event.total_time {
            self.total_time = Some(total_time);
        }
    }
}

/// 控制器在每次状态变更后发布的完整可观测状态
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadSnapshot {
    /// 最新的任务排在最前
    pub tasks: Vec<UploadTask>,
    pub active_uploads: usize,
    /// 等待空位的文件名，先进先出
    pub queued_files: Vec<String>,
    /// 已完成上传的耗时，按文件基名记录
    pub upload_times: HashMap<String, Duration>,
}

impl UploadSnapshot {
    pub fn task(&self, file_path: &str) -> Option<&UploadTask> {
        self.tasks.iter().find(|t| t.file_path == file_path)
    }

    pub fn queued_count(&self) -> usize {
        self.queued_files.len()
    }
}
