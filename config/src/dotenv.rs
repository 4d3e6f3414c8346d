//! Parse `.env` into a key-value map (no overwrite of existing env here; applied in lib).

use std::collections::HashMap;
use std::path::Path;

/// Strips matching surrounding quotes. Double quotes support `\"` escapes;
/// single quotes are literal. Unquoted values pass through trimmed.
fn unquote(raw: &str) -> String {
    let bytes = raw.as_bytes();
    if bytes.len() >= 2 {
        match (bytes[0], bytes[bytes.len() - 1]) {
            (b'"', b'"') => return raw[1..raw.len() - 1].replace("\\\"", "\""),
            (b'\'', b'\'') => return raw[1..raw.len() - 1].to_string(),
            _ => {}
        }
    }
    raw.to_string()
}

/// Minimal .env parser: `KEY=VALUE` lines, `#` comment lines, no multiline
/// values or line continuations. `#` inside a value is kept.
fn parse_dotenv(content: &str) -> HashMap<String, String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_once('='))
        .filter_map(|(key, value)| {
            let key = key.trim();
            if key.is_empty() {
                return None;
            }
            Some((key.to_string(), unquote(value.trim())))
        })
        .collect()
}

/// Loads `.env` from `override_dir` or the current directory into a map.
/// A missing file is an empty map, not an error.
pub fn load_env_map(override_dir: Option<&Path>) -> std::io::Result<HashMap<String, String>> {
    let dir = match override_dir {
        Some(dir) => dir.to_path_buf(),
        None => match std::env::current_dir() {
            Ok(cwd) => cwd,
            Err(_) => return Ok(HashMap::new()),
        },
    };
    let path = dir.join(".env");
    if !path.is_file() {
        return Ok(HashMap::new());
    }
    Ok(parse_dotenv(&std::fs::read_to_string(&path)?))
}
