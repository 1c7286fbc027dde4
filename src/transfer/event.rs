use crate::transport::{ProgressEvent, TransportError};
use bytes::Bytes;
use serde::Serialize;

/// 一个等待上传的文件，排队期间内容一直由控制器持有
#[derive(Debug, Clone)]
pub struct FileUpload {
    pub name: String,
    pub content: Bytes,
}

impl FileUpload {
    pub fn new(name: impl Into<String>, content: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
        }
    }
}

// 控制循环的输入分两类：句柄下发的命令，以及转发协程上报的流事件
pub(crate) enum UploadCtrl {
    Command(UploadCommand),
    Stream(StreamEvent),
}

pub(crate) enum UploadCommand {
    Submit(Vec<FileUpload>),
    Abort { file_path: String },
}

pub(crate) enum StreamEvent {
    Progress {
        file_path: String,
        event: ProgressEvent,
    },
    Error {
        file_path: String,
        error: TransportError,
    },
    /// 流关闭且没有终态负载
    Complete { file_path: String },
}

/// 面向用户的提示消息
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "level", content = "message", rename_all = "lowercase")]
pub enum Notification {
    Success(String),
    Error(String),
    Info(String),
}
