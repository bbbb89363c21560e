//! Worker source fetch.
//!
//! # Responsibilities
//! - Fetch source text from an http(s) URL or the local filesystem
//! - Append `.js` to extension-less local targets
//! - Enforce the fetch-listener registration marker
//!
//! # Design Decisions
//! - Local lookup order: working directory first, install directory second
//! - A fetched source without the registration marker is a contract error
//!   at fetch time, never a silent miss

use std::path::{Component, Path, PathBuf};

use crate::worker::error::{WorkerError, WorkerResult};

/// Marker every worker module must contain to be spawnable.
const LISTENER_MARKER: &str = "addEventListener";

/// Fetch worker source text for `path` under `root`.
///
/// `path` itself may be an absolute http(s) URL; otherwise a URL `root` is
/// joined with `path`, and a filesystem `root` is searched relative to the
/// working directory, then the executable's directory.
pub async fn fetch_source(path: &str, root: &str) -> WorkerResult<String> {
    let source = if is_url(path) {
        fetch_remote(path).await?
    } else if is_url(root) {
        let joined = format!(
            "{}/{}",
            root.trim_end_matches('/'),
            path.trim_start_matches('/')
        );
        fetch_remote(&joined).await?
    } else {
        fetch_local(path, root).await?
    };

    if !source.contains(LISTENER_MARKER) {
        return Err(WorkerError::ContractViolation(format!(
            "worker source '{}' does not register a fetch listener",
            path
        )));
    }
    Ok(source)
}

fn is_url(s: &str) -> bool {
    s.starts_with("http://") || s.starts_with("https://")
}

async fn fetch_remote(url: &str) -> WorkerResult<String> {
    let response = reqwest::get(url).await.map_err(|e| WorkerError::SourceFetch {
        path: url.to_string(),
        reason: e.to_string(),
    })?;
    if !response.status().is_success() {
        return Err(WorkerError::SourceFetch {
            path: url.to_string(),
            reason: format!("HTTP {}", response.status()),
        });
    }
    response.text().await.map_err(|e| WorkerError::SourceFetch {
        path: url.to_string(),
        reason: e.to_string(),
    })
}

async fn fetch_local(path: &str, root: &str) -> WorkerResult<String> {
    let relative = local_relative_path(path).ok_or_else(|| WorkerError::SourceFetch {
        path: path.to_string(),
        reason: "path escapes the worker root".to_string(),
    })?;

    let mut candidates = vec![Path::new(root).join(&relative)];
    if let Some(install_dir) = install_dir() {
        let installed = install_dir.join(root).join(&relative);
        if !candidates.contains(&installed) {
            candidates.push(installed);
        }
    }

    let mut last_error = None;
    for candidate in &candidates {
        match tokio::fs::read_to_string(candidate).await {
            Ok(source) => {
                tracing::debug!(path = %candidate.display(), "Worker source loaded");
                return Ok(source);
            }
            Err(e) => last_error = Some(e),
        }
    }

    Err(WorkerError::SourceFetch {
        path: path.to_string(),
        reason: last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "no candidate paths".to_string()),
    })
}

/// Strip the leading separator and append `.js` to the final segment when
/// it carries no extension. `None` when the path would climb out of the
/// worker root.
fn local_relative_path(path: &str) -> Option<PathBuf> {
    let trimmed = path.trim_start_matches('/');
    if Path::new(trimmed)
        .components()
        .any(|c| matches!(c, Component::ParentDir))
    {
        return None;
    }
    if trimmed.ends_with(".js") {
        Some(PathBuf::from(trimmed))
    } else {
        Some(PathBuf::from(format!("{}.js", trimmed)))
    }
}

fn install_dir() -> Option<PathBuf> {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_local_relative_path_appends_js() {
        assert_eq!(
            local_relative_path("/hello"),
            Some(PathBuf::from("hello.js"))
        );
        assert_eq!(
            local_relative_path("/hello.js"),
            Some(PathBuf::from("hello.js"))
        );
        assert_eq!(local_relative_path("a/b"), Some(PathBuf::from("a/b.js")));
    }

    #[test]
    fn test_local_relative_path_rejects_parent_segments() {
        assert_eq!(local_relative_path("/../outside"), None);
        assert_eq!(local_relative_path("a/../../b"), None);
    }

    #[tokio::test]
    async fn test_parent_segments_never_reach_the_filesystem() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("workers");
        std::fs::create_dir(&nested).unwrap();
        std::fs::write(
            dir.path().join("secret.js"),
            "addEventListener(\"fetch\", e => e.respondWith({}));",
        )
        .unwrap();

        let err = fetch_source("/../secret", nested.to_str().unwrap())
            .await
            .unwrap_err();
        match err {
            WorkerError::SourceFetch { reason, .. } => {
                assert!(reason.contains("escapes"), "unexpected reason: {reason}");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_fetch_local_source() {
        let dir = tempfile::tempdir().unwrap();
        let mut file = std::fs::File::create(dir.path().join("hello.js")).unwrap();
        write!(file, "addEventListener(\"fetch\", e => e.respondWith({{}}));").unwrap();

        let source = fetch_source("/hello", dir.path().to_str().unwrap())
            .await
            .unwrap();
        assert!(source.contains("respondWith"));
    }

    #[tokio::test]
    async fn test_missing_marker_is_contract_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("bad.js"), "const x = 1;").unwrap();

        let err = fetch_source("/bad", dir.path().to_str().unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, WorkerError::ContractViolation(_)));
    }

    #[tokio::test]
    async fn test_missing_source_is_fetch_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = fetch_source("/nope", dir.path().to_str().unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, WorkerError::SourceFetch { .. }));
    }
}
