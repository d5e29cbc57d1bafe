use super::{ToolError, ToolSet};
use std::sync::Arc;

pub fn register(tools: &mut ToolSet) {
    tools
        .insert(
            "read_file",
            "Read the contents of a file at the given path",
            Arc::new(|args| {
                let path = args
                    .first()
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| {
                        ToolError::InvalidArguments("read_file(path) expects a path".to_string())
                    })?;

                if !is_path_safe(path) {
                    return Err(ToolError::PermissionDenied(format!(
                        "Access to '{}' is blocked for security",
                        path
                    )));
                }

                std::fs::read_to_string(path).map_err(|e| {
                    ToolError::ExecutionFailed(format!("Failed to read '{}': {}", path, e))
                })
            }),
        )
        .expect("read_file is not a reserved name");
}

/// Check if a path is safe to access (not a sensitive system path).
fn is_path_safe(path: &str) -> bool {
    let sensitive_paths = ["/etc/shadow", "/etc/gshadow", "/etc/sudoers"];
    let sensitive_prefixes = ["~/.ssh", "~/.gnupg", "~/.aws"];

    let expanded = if path.starts_with('~') {
        if let Some(home) = dirs::home_dir() {
            path.replacen('~', &home.display().to_string(), 1)
        } else {
            path.to_string()
        }
    } else {
        path.to_string()
    };

    for sensitive in &sensitive_paths {
        if expanded == *sensitive {
            return false;
        }
    }

    if let Some(home) = dirs::home_dir() {
        for prefix in &sensitive_prefixes {
            let expanded_prefix = prefix.replacen('~', &home.display().to_string(), 1);
            if expanded.starts_with(&expanded_prefix) {
                return false;
            }
        }
    }

    true
}
