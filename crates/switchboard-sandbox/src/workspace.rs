//! Per-tool workspaces under a single root, with path-escape rejection.

use std::path::{Component, Path, PathBuf};

use crate::error::{Result, SandboxError};

pub struct WorkspaceManager {
    root: PathBuf,
}

impl WorkspaceManager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// `./data/workspace/{sanitized_tool_name}` — created on demand.
    pub fn dir_for(&self, tool_name: &str) -> Result<PathBuf> {
        let dir = self.root.join(sanitize_tool_name(tool_name));
        std::fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    /// Resolve a path relative to a tool's workspace, rejecting anything
    /// that would escape it (absolute paths, `..` traversal).
    pub fn resolve(&self, tool_name: &str, relative: &str) -> Result<PathBuf> {
        let rel = Path::new(relative);
        if rel.is_absolute() {
            return Err(SandboxError::PathEscape(relative.to_string()));
        }
        for component in rel.components() {
            match component {
                Component::ParentDir => {
                    return Err(SandboxError::PathEscape(relative.to_string()))
                }
                Component::Prefix(_) | Component::RootDir => {
                    return Err(SandboxError::PathEscape(relative.to_string()))
                }
                _ => {}
            }
        }
        Ok(self.dir_for(tool_name)?.join(rel))
    }

    /// Read a workspace file's contents, capped to `max_chars` with a
    /// truncation note.
    pub fn read_file(&self, tool_name: &str, relative: &str, max_chars: usize) -> Result<String> {
        let path = self.resolve(tool_name, relative)?;
        let content = std::fs::read_to_string(path)?;
        Ok(truncate_output(&content, max_chars))
    }
}

/// Keep tool directory names boring: lowercase alphanumerics, `-`, `_`.
pub fn sanitize_tool_name(name: &str) -> String {
    let sanitized: String = name
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if sanitized.is_empty() {
        "tool".to_string()
    } else {
        sanitized
    }
}

/// Cap output size, appending an informational note when trimmed.
pub fn truncate_output(output: &str, max_chars: usize) -> String {
    if output.len() <= max_chars {
        return output.to_string();
    }
    let mut cut = max_chars;
    while cut > 0 && !output.is_char_boundary(cut) {
        cut -= 1;
    }
    format!(
        "{}\n\n[Output truncated: {} of {} characters shown]",
        &output[..cut],
        cut,
        output.len()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> (WorkspaceManager, std::path::PathBuf) {
        let root = std::env::temp_dir().join(format!("sb-ws-{}", uuid::Uuid::new_v4()));
        (WorkspaceManager::new(&root), root)
    }

    #[test]
    fn sanitizes_tool_names() {
        assert_eq!(sanitize_tool_name("Nmap Scanner!"), "nmap_scanner_");
        assert_eq!(sanitize_tool_name("httpx"), "httpx");
        assert_eq!(sanitize_tool_name(""), "tool");
    }

    #[test]
    fn rejects_escaping_paths() {
        let (ws, _root) = manager();
        assert!(matches!(
            ws.resolve("nmap", "../outside.txt"),
            Err(SandboxError::PathEscape(_))
        ));
        assert!(matches!(
            ws.resolve("nmap", "/etc/passwd"),
            Err(SandboxError::PathEscape(_))
        ));
        assert!(matches!(
            ws.resolve("nmap", "results/../../escape"),
            Err(SandboxError::PathEscape(_))
        ));
    }

    #[test]
    fn resolves_inside_workspace() {
        let (ws, root) = manager();
        let path = ws.resolve("nmap", "results/scan.txt").unwrap();
        assert!(path.starts_with(root.join("nmap")));
    }

    #[test]
    fn truncation_appends_note() {
        let long = "x".repeat(6_000);
        let out = truncate_output(&long, 5_000);
        assert!(out.contains("[Output truncated"));
        assert!(out.len() < 5_200);

        let short = "short output";
        assert_eq!(truncate_output(short, 5_000), short);
    }
}
