/// Non-empty, trimmed value of an environment variable.
pub fn env_string(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Parse an optional unsigned integer variable; present but unparseable is an error.
pub fn env_u64(name: &str) -> Result<Option<u64>, String> {
    match env_string(name) {
        None => Ok(None),
        Some(v) => v
            .parse::<u64>()
            .map(Some)
            .map_err(|_| format!("{} must be a non-negative integer, got {:?}", name, v)),
    }
}

pub fn env_bool(name: &str) -> Option<bool> {
    env_string(name).map(|s| parse_bool(&s))
}

pub fn parse_bool(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}
