use crate::config::{ConfigItem, ConfigManager};

const MIB: usize = 1024 * 1024;

/// 上传并发与尺寸限制，来源是设置存储，解析失败回退默认值
#[derive(Debug, Clone, Copy)]
pub struct UploadLimits {
    pub max_concurrent_files: usize,
    pub max_concurrent_chunks: usize,
    pub chunk_size_mib: usize,
    pub single_file_max_size_mib: usize,
}

impl Default for UploadLimits {
    fn default() -> Self {
        Self {
            max_concurrent_files: 3,
            max_concurrent_chunks: 10,
            chunk_size_mib: 50,
            single_file_max_size_mib: 20,
        }
    }
}

impl UploadLimits {
    pub async fn load(settings: &ConfigManager) -> Self {
        let defaults = Self::default();
        Self {
            max_concurrent_files: parse(
                settings.get(ConfigItem::MaxConcurrentFiles).await,
                defaults.max_concurrent_files,
            ),
            max_concurrent_chunks: parse(
                settings.get(ConfigItem::MaxConcurrentChunks).await,
                defaults.max_concurrent_chunks,
            ),
            chunk_size_mib: parse(
                settings.get(ConfigItem::ChunkSizeMib).await,
                defaults.chunk_size_mib,
            ),
            single_file_max_size_mib: parse(
                settings.get(ConfigItem::SingleFileMaxSizeMib).await,
                defaults.single_file_max_size_mib,
            ),
        }
    }

    pub fn chunk_size_bytes(&self) -> usize {
        self.chunk_size_mib * MIB
    }

    pub fn max_file_bytes(&self) -> usize {
        self.single_file_max_size_mib * MIB
    }
}

fn parse(value: String, fallback: usize) -> usize {
    value.trim().parse().unwrap_or(fallback)
}
