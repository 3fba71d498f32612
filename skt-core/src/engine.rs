//! Adapter onto the host's OpenPGP engine.
//!
//! The OpenPGP engine is modeled as an external collaborator. This
//! workspace's host and ephemeral contexts
//! both shell out to the user's `gpg` binary — the same real engine the
//! original program drove via `gpgme` (itself a wrapper around
//! `gpg`/`gpg-agent`) — the same pattern this workspace's own `ipc`
//! crate test helper uses to drive `gpg --homedir ... --import` via
//! `std::process::Command`. `sequoia-openpgp` is used orthogonally to
//! validate and introspect the bytes that cross the wire, without
//! reimplementing OpenPGP parsing or export.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use sequoia_openpgp as openpgp;
use openpgp::parse::Parse;
use openpgp::Cert;

use crate::error::{Error, Result};

/// One entry in the Key Catalog: a stable fingerprint and the
/// primary user-id label the menu shows for it.
#[derive(Debug, Clone)]
pub struct KeyHandle {
    pub fingerprint: String,
    pub user_id: String,
}

/// Read-only access to the user's real keyring: `list_secret_keys` and
/// `export_secret`.
pub struct HostContext {
    gnupghome: Option<PathBuf>,
}

impl HostContext {
    pub fn new() -> Self {
        HostContext { gnupghome: std::env::var_os("GNUPGHOME").map(PathBuf::from) }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new("gpg");
        if let Some(home) = &self.gnupghome {
            cmd.arg("--homedir").arg(home);
        }
        cmd
    }

    /// Lists the host's secret keys in GnuPG's own reported order
    /// (matching the original's `gpgme_op_keylist_next` iteration
    /// order), populated once before the Key Catalog is advertised.
    pub fn list_secret_keys(&self) -> Result<Vec<KeyHandle>> {
        let output = self
            .command()
            .args(["--list-secret-keys", "--with-colons", "--fingerprint"])
            .stderr(Stdio::null())
            .output()
            .map_err(|e| Error::ExportFailed(format!("failed to run gpg: {e}")))?;
        if !output.status.success() {
            return Err(Error::ExportFailed(format!(
                "gpg --list-secret-keys exited with {}",
                output.status
            )));
        }
        Ok(parse_colon_catalog(&String::from_utf8_lossy(&output.stdout)))
    }

    /// Streams `gpg --export-secret-keys --export-options export-minimal`
    /// for `fingerprint` to `sink`, one process-buffer chunk at a time,
    /// matching the "minimal-form, streamed to a sink callback"
    /// contract. `export-minimal` is GnuPG's own flag for exactly the
    /// "strip third-party signatures and non-essential packets"
    /// contract wanted here. `fingerprint` is given the `0x` prefix GnuPG
    /// uses to disambiguate a bare hex fingerprint from a user-id lookup.
    pub fn export_secret<F>(&self, fingerprint: &str, mut sink: F) -> Result<()>
    where
        F: FnMut(&[u8]) -> std::io::Result<()>,
    {
        let mut child = self
            .command()
            .args(["--export-secret-keys", "--armor", "--export-options", "export-minimal"])
            .arg(format!("0x{fingerprint}"))
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| Error::ExportFailed(format!("failed to start gpg: {e}")))?;

        let mut stdout = child.stdout.take().expect("stdout was piped");
        let mut buf = [0u8; 8192];
        loop {
            let n = stdout
                .read(&mut buf)
                .map_err(|e| Error::ExportFailed(format!("reading gpg output: {e}")))?;
            if n == 0 {
                break;
            }
            sink(&buf[..n]).map_err(|e| Error::ExportFailed(format!("forwarding export chunk: {e}")))?;
        }

        let status = child
            .wait()
            .map_err(|e| Error::ExportFailed(format!("waiting for gpg: {e}")))?;
        if !status.success() {
            return Err(Error::ExportFailed(format!(
                "gpg --export-secret-keys exited with {status}"
            )));
        }
        Ok(())
    }
}

impl Default for HostContext {
    fn default() -> Self {
        Self::new()
    }
}

/// An isolated GnuPG keyring bound to a freshly-created private
/// directory (the Ephemeral Homedir), created lazily on the first
/// inbound record. `Drop` tears the homedir down: it asks any
/// `gpg-agent` the import may have spawned under that home to exit,
/// then recursively removes the directory (best-effort; see DESIGN.md
/// for why this goes further than the original's bare `rmdir`).
pub struct EphemeralContext {
    homedir: tempfile::TempDir,
}

impl EphemeralContext {
    /// Creates the homedir under `parent` with private (user-only)
    /// permissions.
    pub fn create(parent: &Path) -> Result<Self> {
        let homedir = tempfile::Builder::new()
            .prefix(".skt-server-")
            .rand_bytes(12)
            .tempdir_in(parent)
            .map_err(|e| Error::EphemeralHomedir { path: parent.to_path_buf(), source: e })?;
        restrict_permissions(homedir.path())?;
        log::debug!("created ephemeral homedir");
        Ok(EphemeralContext { homedir })
    }

    pub fn path(&self) -> &Path {
        self.homedir.path()
    }

    /// Validates `bytes` as an OpenPGP transferable secret key with
    /// `sequoia-openpgp` (confirming it actually carries secret
    /// material before shelling out at all), then imports it into the
    /// ephemeral keyring via `gpg --import`.
    pub fn import(&self, bytes: &[u8]) -> Result<()> {
        let cert = Cert::from_bytes(bytes)
            .map_err(|e| Error::ImportFailed(format!("not a valid OpenPGP certificate: {e}")))?;
        if !cert.is_tsk() {
            return Err(Error::ImportFailed(
                "block parsed but carries no secret key material".into(),
            ));
        }

        let mut child = Command::new("gpg")
            .arg("--homedir")
            .arg(self.path())
            .arg("--import")
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| Error::ImportFailed(format!("failed to start gpg: {e}")))?;
        child
            .stdin
            .take()
            .expect("stdin was piped")
            .write_all(bytes)
            .map_err(|e| Error::ImportFailed(format!("writing key material to gpg: {e}")))?;
        let status = child
            .wait()
            .map_err(|e| Error::ImportFailed(format!("waiting for gpg: {e}")))?;
        if !status.success() {
            return Err(Error::ImportFailed(format!("gpg --import exited with {status}")));
        }

        let label = cert
            .userids()
            .next()
            .map(|ua| String::from_utf8_lossy(ua.userid().value()).into_owned())
            .unwrap_or_default();
        log::info!("imported {} ({label})", cert.fingerprint());
        Ok(())
    }
}

impl Drop for EphemeralContext {
    fn drop(&mut self) {
        let _ = Command::new("gpg-connect-agent")
            .arg("--homedir")
            .arg(self.path())
            .arg("killagent")
            .arg("/bye")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> Result<()> {
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o700))
        .map_err(|e| Error::EphemeralHomedir { path: path.to_path_buf(), source: e })
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> Result<()> {
    Ok(())
}

/// Parses `gpg --list-secret-keys --with-colons --fingerprint` output
/// into the Key Catalog: each `sec` record starts a key, the `fpr`
/// record that follows it carries the fingerprint (field 10), and the
/// first `uid` record carries the primary user-id (field 10).
fn parse_colon_catalog(output: &str) -> Vec<KeyHandle> {
    let mut keys = Vec::new();
    let mut in_record = false;
    let mut fingerprint: Option<String> = None;
    let mut user_id: Option<String> = None;

    let flush = |keys: &mut Vec<KeyHandle>, fpr: &mut Option<String>, uid: &mut Option<String>| {
        if let Some(fingerprint) = fpr.take() {
            keys.push(KeyHandle { fingerprint, user_id: uid.take().unwrap_or_default() });
        }
    };

    for line in output.lines() {
        let fields: Vec<&str> = line.split(':').collect();
        match fields.first().copied() {
            Some("sec") => {
                if in_record {
                    flush(&mut keys, &mut fingerprint, &mut user_id);
                }
                in_record = true;
                fingerprint = None;
                user_id = None;
            }
            Some("fpr") if in_record && fingerprint.is_none() => {
                fingerprint = fields.get(9).map(|f| f.to_string());
            }
            Some("uid") if in_record && user_id.is_none() => {
                user_id = fields.get(9).map(|f| unescape_colon_field(f));
            }
            _ => {}
        }
    }
    flush(&mut keys, &mut fingerprint, &mut user_id);
    keys
}

/// GnuPG backslash-escapes a handful of bytes (`:` as `\x3a`, `\` as
/// `\\`) in `--with-colons` text fields; undo that for display.
fn unescape_colon_field(field: &str) -> String {
    field.replace("\\x3a", ":").replace("\\\\", "\\")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_key() {
        let out = "\
sec:u:4096:1:AAAABBBBCCCCDDDD:1600000000:::u:::scESC:::+::::
fpr:::::::::0123456789ABCDEF0123456789ABCDEF01234567:
uid:u::::1600000000::ABCDEF::Alice <alice\\x3aexample@example.org>::::::::::0:
";
        let keys = parse_colon_catalog(out);
        assert_eq!(keys.len(), 1);
        assert_eq!(keys[0].fingerprint, "0123456789ABCDEF0123456789ABCDEF01234567");
        assert_eq!(keys[0].user_id, "Alice <alice:example@example.org>");
    }

    #[test]
    fn parses_multiple_keys_in_order() {
        let out = "\
sec:u:4096:1:AAAA:1600000000:::u:::scESC:::+::::
fpr:::::::::AAAA000000000000000000000000000000000000:
uid:u:::::::::First Key::::::::::0:
sec:u:4096:1:BBBB:1600000000:::u:::scESC:::+::::
fpr:::::::::BBBB000000000000000000000000000000000000:
uid:u:::::::::Second Key::::::::::0:
";
        let keys = parse_colon_catalog(out);
        assert_eq!(keys.len(), 2);
        assert_eq!(keys[0].user_id, "First Key");
        assert_eq!(keys[1].user_id, "Second Key");
    }

    #[test]
    fn empty_keyring_yields_empty_catalog() {
        assert!(parse_colon_catalog("").is_empty());
    }
}
