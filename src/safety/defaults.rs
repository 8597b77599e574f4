/// Default `(pattern, reason)` blocklist.
///
/// Catches the command shapes an agent must never run, while leaving normal
/// development traffic (package installs, builds, relative-path deletes)
/// alone. The workspace guard on writes remains the primary defense; this
/// list is the coarse first gate.
pub fn default_blocklist() -> Vec<(String, String)> {
    vec![
        // Privilege escalation
        (
            r"(?i)\bsudo\b".into(),
            "Privilege escalation via sudo is not allowed".into(),
        ),
        (
            r"(?i)\bsu\b\s".into(),
            "Privilege escalation via su is not allowed".into(),
        ),
        (
            r"(?i)\bdoas\b".into(),
            "Privilege escalation via doas is not allowed".into(),
        ),
        // Recursive deletion at the filesystem root
        (
            r"rm\s+(-[^\s]*)?(\s+-[^\s]*)?\s+/($|\s)".into(),
            "Deleting from the filesystem root is not allowed".into(),
        ),
        (
            r"rm\s+(-[^\s]*)?(\s+-[^\s]*)?\s+/\*".into(),
            "Deleting from the filesystem root is not allowed".into(),
        ),
        // Redirected writes into system directories
        (
            r">\s*/etc/".into(),
            "Writes into /etc are not allowed".into(),
        ),
        (
            r">\s*/usr/".into(),
            "Writes into /usr are not allowed".into(),
        ),
        (
            r">\s*/boot/".into(),
            "Writes into /boot are not allowed".into(),
        ),
        (
            r">\s*/sys/".into(),
            "Writes into /sys are not allowed".into(),
        ),
        (
            r">\s*/proc/".into(),
            "Writes into /proc are not allowed".into(),
        ),
        // Disk-level destruction
        (
            r"(?i)\bmkfs\b".into(),
            "Formatting filesystems is not allowed".into(),
        ),
        (
            r"(?i)\bdd\b\s.*of=/dev/".into(),
            "dd writes to raw devices are not allowed".into(),
        ),
        // Fork bomb
        (
            r":\(\)\s*\{.*\}".into(),
            "Fork bomb pattern detected".into(),
        ),
        // Machine state
        (
            r"(?i)\bshutdown\b".into(),
            "System shutdown is not allowed".into(),
        ),
        (
            r"(?i)\breboot\b".into(),
            "System reboot is not allowed".into(),
        ),
        (
            r"(?i)\bhalt\b".into(),
            "System halt is not allowed".into(),
        ),
        (
            r"(?i)\bpoweroff\b".into(),
            "System poweroff is not allowed".into(),
        ),
        // Permission and ownership changes outside the workspace
        (
            r"chmod\s.*\s/($|\s|[a-z])".into(),
            "Permission changes at the root level are not allowed".into(),
        ),
        (
            r"chown\s.*\s/($|\s|[a-z])".into(),
            "Ownership changes at the root level are not allowed".into(),
        ),
    ]
}
