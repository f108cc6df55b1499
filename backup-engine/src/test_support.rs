//! Fixtures shared by unit tests.

use std::path::{Path, PathBuf};

/// Write an executable `/bin/sh` script into `dir`.
#[cfg(unix)]
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// Helper stand-in that writes `ENC:` + the source bytes to
/// `<targetDir>/<file name>`, appends one line per call to `calls.log`, and
/// exits 7 if it ever observes a concurrent invocation.
#[cfg(unix)]
pub fn fake_crypto_helper(dir: &Path) -> PathBuf {
    let lock_dir = dir.join("helper.lock");
    let calls = dir.join("calls.log");
    write_script(
        dir,
        "crypto-helper.sh",
        &format!(
            r#"mkdir '{lock}' 2>/dev/null || exit 7
echo "$1 $2" >> '{calls}'
sleep 0.05
name=$(basename "$2")
{{ printf 'ENC:'; cat "$2"; }} > "$4/$name"
status=$?
rmdir '{lock}'
exit $status"#,
            lock = lock_dir.display(),
            calls = calls.display(),
        ),
    )
}

/// Lines recorded by [`fake_crypto_helper`].
pub fn helper_calls(dir: &Path) -> Vec<String> {
    std::fs::read_to_string(dir.join("calls.log"))
        .map(|s| s.lines().map(str::to_string).collect())
        .unwrap_or_default()
}
