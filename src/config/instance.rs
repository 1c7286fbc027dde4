use directories::ProjectDirs;

use super::{ConfigManager, ConfigManagerError};
use std::sync::OnceLock;

pub fn config_manager() -> Result<&'static ConfigManager, ConfigManagerError> {
    static CONFIG_MANAGER: OnceLock<ConfigManager> = OnceLock::new();
    if let Some(manager) = CONFIG_MANAGER.get() {
        return Ok(manager);
    }
    let prj_dir = ProjectDirs::from("com", "uplink", "dataset_uplink")
        .ok_or(ConfigManagerError::ConfigDirNotFound)?;
    let cfg_dir = prj_dir.config_local_dir();
    if !cfg_dir.exists() {
        std::fs::create_dir_all(cfg_dir)?;
    }
    let path = cfg_dir.join("config.toml");
    let path = camino::Utf8PathBuf::from_path_buf(path)
        .map_err(|_| ConfigManagerError::ConfigDirNotFound)?;
    let manager = ConfigManager::create(&path)?;
    // 并发初始化时只保留先到的那个
    Ok(CONFIG_MANAGER.get_or_init(|| manager))
}
