use directories::ProjectDirs;
use std::path::PathBuf;

pub const APP_QUALIFIER: &str = "com";
pub const APP_ORG: &str = "coffer";
pub const APP_NAME: &str = "coffer";

pub fn data_dir() -> anyhow::Result<PathBuf> {
    if let Ok(override_path) = std::env::var("COFFER_DATA_DIR") {
        return Ok(PathBuf::from(override_path));
    }
    let dirs = ProjectDirs::from(APP_QUALIFIER, APP_ORG, APP_NAME)
        .ok_or_else(|| anyhow::anyhow!("cannot determine data directory"))?;
    Ok(dirs.data_dir().to_path_buf())
}

pub fn slots_dir(data: &std::path::Path) -> PathBuf {
    data.join("slots")
}

pub fn sources_dir(data: &std::path::Path) -> PathBuf {
    data.join("sources")
}

pub fn settings_path(data: &std::path::Path) -> PathBuf {
    data.join("settings.json")
}
