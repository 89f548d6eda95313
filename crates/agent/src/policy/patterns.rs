/// Built-in deny patterns enforced regardless of per-app configuration.
/// Patterns are anchored on shell boundary tokens (`^`, `;`, `|`, `&&`, `||`)
/// so that benign uses like `echo "rm -rf /"` or `grep 'rm' file` stay legal.
/// Checked per command line after comment stripping, against the original and
/// a lowercased copy.
pub const DEFAULT_DENY_PATTERNS: &[&str] = &[
    // rm
    r"(^|;|\||&&|\|\|)\s*rm\s+.*--no-preserve-root",
    r#"(^|;|\||&&|\|\|)\s*rm\s+(-[a-z]*\s+)*['"]*(/|~)['"]*\s*(&|;|$|\||&&)"#,
    r#"(^|;|\||&&|\|\|)\s*rm\s+.*['"]*(/\*|~)['"]*"#,
    r"(^|;|\||&&|\|\|)\s*rm\s+.*\$\{?HOME\}?",
    r"(^|;|\||&&|\|\|)\s*shred\s+",
    // filesystem destruction
    r"(^|;|\||&&|\|\|)\s*mkfs\.",
    r"(^|;|\||&&|\|\|)\s*dd\s+.*of=/dev/(sd|hd|nvme|vd)",
    r"(^|;|\||&&|\|\|)\s*dd\s+.*of=/boot/",
    r">\s*/dev/(sd|hd|nvme|vd)",
    r"(^|;|\||&&|\|\|)\s*hdparm\s+.*--security-erase",
    r"(^|;|\||&&|\|\|)\s*hdparm\s+.*--make-bad-sector",
    r"(^|;|\||&&|\|\|)\s*wipefs\s+",
    // permission attacks against /
    r#"(^|;|\||&&|\|\|)\s*chmod\s+(-[a-z]*\s+)*[0-7]{3,4}\s+['"]*(/)['"]*\s*(&|;|$)"#,
    r#"(^|;|\||&&|\|\|)\s*chown\s+(-[a-z]*\s+)*\S+\s+['"]*(/)['"]*\s*(&|;|$)"#,
    // fork bombs
    r":\(\)\s*\{\s*:\s*\|\s*:\s*&\s*\}\s*;\s*:",
    r"\.0\s*\(\)\s*\{\s*\.0",
    r"\w+\(\)\s*\{\s*\w+\s*\|\s*\w+\s*&\s*\}\s*;\s*\w+",
    // remote code execution
    r"curl.*\|\s*(sh|bash|zsh|ksh|dash)",
    r"wget.*\|\s*(sh|bash|zsh|ksh|dash)",
    r"base64.*-d.*\|\s*(sh|bash|zsh|ksh|dash)",
    r"\|\s*base64.*-d.*\|\s*(sh|bash|zsh|ksh|dash)",
    // interpreter one-liners invoking deletion
    r"(^|;|\||&&|\|\|)\s*python[23]?\s+-c\s+.*rm\s",
    r"(^|;|\||&&|\|\|)\s*python[23]?\s+-c\s+.*rmtree",
    r"(^|;|\||&&|\|\|)\s*python[23]?\s+-c\s+.*unlink",
    r"(^|;|\||&&|\|\|)\s*perl\s+-e\s+.*rm\s",
    r"(^|;|\||&&|\|\|)\s*perl\s+-e\s+.*unlink",
    r"(^|;|\||&&|\|\|)\s*ruby\s+-e\s+.*rm\s",
    r"(^|;|\||&&|\|\|)\s*ruby\s+-e\s+.*FileUtils",
    // command substitution / injection
    r"\$\([^)]*rm\s",
    r"\$\([^)]*mkfs",
    r"\$\([^)]*dd\s+.*of=/dev/",
    r"`[^`]*rm\s",
    r"`[^`]*mkfs",
    r"`[^`]*dd\s+.*of=/dev/",
    r"<\([^)]*rm\s",
    r"<\([^)]*dd\s+.*of=/dev/",
    // heredoc with rm -rf
    r#"<<\s*['"]?\w*['"]?\s*\n.*rm\s+-rf"#,
    // background execution of the above
    r"(^|;|\||&&|\|\|)\s*nohup\s+.*rm\s",
    r"(^|;|\||&&|\|\|)\s*nohup\s+.*mkfs",
    r"(^|;|\||&&|\|\|)\s*nohup\s+.*dd\s",
    // null device tricks
    r"/dev/null.*>.*&",
    // kernel and system manipulation
    r"(^|;|\||&&|\|\|)\s*sysctl\s+-w",
    r"(^|;|\||&&|\|\|)\s*modprobe\s+-r",
    r"(^|;|\||&&|\|\|)\s*rmmod\s+",
    r"(^|;|\||&&|\|\|)\s*insmod\s+",
    r"echo\s+.*>\s*/proc/",
    r"echo\s+.*>\s*/sys/",
    // network teardown
    r"(^|;|\||&&|\|\|)\s*iptables\s+-F",
    r"(^|;|\||&&|\|\|)\s*iptables\s+-X",
    r"(^|;|\||&&|\|\|)\s*ip\s+link\s+del",
    // shadow file access
    r"(^|;|\||&&|\|\|)\s*cat\s+/etc/shadow",
    r"cp\s+.*\s+/etc/shadow",
    r">\s*/etc/shadow",
];
