//! 收集配置的持久化：以格式化 JSON 保存 `IngestConfig`。
//!
//! 文件不存在时返回默认配置；读取与保存前都会做取值校验。

use std::fs;
use std::path::Path;

use crate::error::AppError;
use crate::photo_intake::IngestConfig;

pub fn load_config(path: &Path) -> Result<IngestConfig, AppError> {
    if !path.exists() {
        log::debug!("配置文件不存在，使用默认配置: {}", path.display());
        return Ok(IngestConfig::default());
    }

    let content = fs::read_to_string(path)?;
    let config = serde_json::from_str::<IngestConfig>(&content)
        .map_err(|e| AppError::Settings(format!("解析设置文件失败: {}", e)))?;
    config.validate()?;

    Ok(config)
}

pub fn save_config(path: &Path, config: &IngestConfig) -> Result<(), AppError> {
    config.validate()?;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let content = serde_json::to_string_pretty(config)
        .map_err(|e| AppError::Settings(format!("序列化设置失败: {}", e)))?;
    fs::write(path, content)?;

    log::info!("💾 配置已保存: {}", path.display());
    Ok(())
}
