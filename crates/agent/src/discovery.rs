use std::path::{Path, PathBuf};
use std::process::Command;

use serde_json::Map;

use agent_protocol::{AppInfo, DiscoveryReport};

/// Conventional deployment roots scanned for applications.
const DEFAULT_SEARCH_PATHS: &[&str] = &[
    "/home/forge",
    "/home/deploy",
    "/var/www",
    "/srv",
    "/app",
    "/opt/apps",
];

/// Collaborator interface the router queries on a `discover` frame.
pub trait AppCatalog: Send + Sync {
    fn discover(&self) -> DiscoveryReport;
}

/// Scans the host for deployed applications. Capistrano/Forge-style releases
/// are resolved through their `current` directory.
pub struct HostDiscovery {
    search_paths: Vec<PathBuf>,
}

impl Default for HostDiscovery {
    fn default() -> Self {
        Self::new()
    }
}

impl HostDiscovery {
    pub fn new() -> Self {
        Self {
            search_paths: DEFAULT_SEARCH_PATHS.iter().map(PathBuf::from).collect(),
        }
    }

    pub fn with_search_paths(search_paths: Vec<PathBuf>) -> Self {
        Self { search_paths }
    }
}

impl AppCatalog for HostDiscovery {
    fn discover(&self) -> DiscoveryReport {
        DiscoveryReport {
            hostname: sysinfo::System::host_name().unwrap_or_default(),
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
            apps: discover_apps(&self.search_paths),
            extra: Map::new(),
        }
    }
}

fn discover_apps(roots: &[PathBuf]) -> Vec<AppInfo> {
    let mut apps = Vec::new();

    for root in roots {
        let Ok(entries) = std::fs::read_dir(root) else {
            continue;
        };
        for entry in entries.flatten() {
            let project = entry.path();
            if !project.is_dir() {
                continue;
            }

            let current = project.join("current");
            let candidate = if current.is_dir() { current } else { project };
            if let Some(app) = analyze_app(&candidate) {
                apps.push(app);
            }
        }
    }

    apps
}

fn analyze_app(path: &Path) -> Option<AppInfo> {
    let framework = detect_framework(path)?;

    let mut app = AppInfo {
        path: path.to_string_lossy().into_owned(),
        framework: framework.to_string(),
        ..AppInfo::default()
    };

    if path.join(".git").exists() {
        app.git_remote = git_output(path, &["remote", "get-url", "origin"]).unwrap_or_default();
        app.git_branch =
            git_output(path, &["rev-parse", "--abbrev-ref", "HEAD"]).unwrap_or_default();
        app.git_commit = git_output(path, &["rev-parse", "--short", "HEAD"]).unwrap_or_default();
    }

    Some(app)
}

fn detect_framework(path: &Path) -> Option<&'static str> {
    if path.join("artisan").exists() {
        return Some("laravel");
    }
    if path.join("package.json").exists() {
        for marker in ["next.config.js", "next.config.mjs", "next.config.ts"] {
            if path.join(marker).exists() {
                return Some("nextjs");
            }
        }
        for marker in ["nuxt.config.js", "nuxt.config.ts"] {
            if path.join(marker).exists() {
                return Some("nuxt");
            }
        }
        return Some("node");
    }
    if path.join("Gemfile").exists() {
        return Some("rails");
    }
    if path.join("manage.py").exists() {
        return Some("django");
    }
    if path.join("go.mod").exists() {
        return Some("go");
    }
    if path.join("Cargo.toml").exists() {
        return Some("rust");
    }
    None
}

fn git_output(dir: &Path, args: &[&str]) -> Option<String> {
    let output = Command::new("git")
        .arg("-C")
        .arg(dir)
        .args(args)
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_frameworks_by_marker_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let app = dir.path().join("shop");
        std::fs::create_dir_all(&app).expect("mkdir");
        std::fs::write(app.join("artisan"), b"").expect("marker");

        let catalog = HostDiscovery::with_search_paths(vec![dir.path().to_path_buf()]);
        let report = catalog.discover();
        assert_eq!(report.apps.len(), 1);
        assert_eq!(report.apps[0].framework, "laravel");
        assert!(report.apps[0].path.ends_with("shop"));
    }

    #[test]
    fn prefers_the_current_release_directory() {
        let dir = tempfile::tempdir().expect("tempdir");
        let release = dir.path().join("shop").join("current");
        std::fs::create_dir_all(&release).expect("mkdir");
        std::fs::write(release.join("go.mod"), b"module shop\n").expect("marker");

        let catalog = HostDiscovery::with_search_paths(vec![dir.path().to_path_buf()]);
        let report = catalog.discover();
        assert_eq!(report.apps.len(), 1);
        assert_eq!(report.apps[0].framework, "go");
        assert!(report.apps[0].path.ends_with("current"));
    }

    #[test]
    fn skips_unrecognized_directories() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::create_dir_all(dir.path().join("random-files")).expect("mkdir");

        let catalog = HostDiscovery::with_search_paths(vec![dir.path().to_path_buf()]);
        assert!(catalog.discover().apps.is_empty());
    }

    #[test]
    fn missing_roots_are_ignored() {
        let catalog =
            HostDiscovery::with_search_paths(vec![PathBuf::from("/definitely/not/here")]);
        let report = catalog.discover();
        assert!(report.apps.is_empty());
        assert_eq!(report.os, std::env::consts::OS);
    }
}
