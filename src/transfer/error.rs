use thiserror::Error;

#[derive(Debug, Error)]
pub enum UploadManagerError {
    /// 控制循环已经退出，句柄上的所有操作都会得到这个错误
    #[error("upload controller is not running")]
    Closed,
}
