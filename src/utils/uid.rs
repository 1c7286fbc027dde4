use serde::{Deserialize, Serialize};
use std::{fmt::Display, ops::Deref};

/// 传输层返回的不透明句柄，任务收到第一个进度事件前为空
#[derive(Hash, Eq, PartialEq, Debug, Clone, Default, Serialize, Deserialize)]
pub struct UploadId(String);

impl UploadId {
    pub fn new() -> Self {
        Self(nanoid::nanoid!())
    }
}

impl From<String> for UploadId {
    fn from(s: String) -> Self {
        UploadId(s)
    }
}

impl From<&str> for UploadId {
    fn from(s: &str) -> Self {
        UploadId(s.to_string())
    }
}

impl Deref for UploadId {
    type Target = String;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Display for UploadId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
