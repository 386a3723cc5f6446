use std::path::PathBuf;

/// Per-user config directory (~/.graph_chat)
pub fn graph_chat_dir() -> PathBuf {
    std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(PathBuf::from)
        .unwrap_or_else(std::env::temp_dir)
        .join(".graph_chat")
}

/// config.json inside the per-user directory
pub fn config_json_path() -> PathBuf {
    graph_chat_dir().join("config.json")
}
