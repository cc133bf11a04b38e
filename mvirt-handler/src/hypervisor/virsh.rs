//! libvirt backend driven through the `virsh` command line tool.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;
use uuid::Uuid;

use super::{Connection, Domain, DomainState, HypervisorError};

const VIRSH_BIN: &str = "virsh";

struct Virsh {
    binary: PathBuf,
    uri: Option<String>,
    definition_dir: PathBuf,
}

impl Virsh {
    /// Run a virsh subcommand and return its stdout.
    ///
    /// `name` is the domain the command targets and is used to classify
    /// "no such domain" failures.
    async fn run(&self, name: &str, args: &[&str]) -> Result<String, HypervisorError> {
        let mut cmd = Command::new(&self.binary);
        if let Some(uri) = &self.uri {
            cmd.args(["-c", uri]);
        }
        cmd.args(args);

        debug!(binary = %self.binary.display(), ?args, "Running virsh");
        let output = cmd.output().await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(classify_failure(name, args, &stderr));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// [`Connection`] backed by `virsh`.
pub struct VirshConnection {
    virsh: Arc<Virsh>,
}

impl VirshConnection {
    /// `uri` selects the libvirt connection (`qemu:///system` etc.), `None`
    /// uses the virsh default. Definition documents are staged in
    /// `definition_dir` while being defined.
    pub fn new(uri: Option<String>, definition_dir: impl Into<PathBuf>) -> Self {
        Self::with_binary(VIRSH_BIN, uri, definition_dir)
    }

    pub fn with_binary(
        binary: impl Into<PathBuf>,
        uri: Option<String>,
        definition_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            virsh: Arc::new(Virsh {
                binary: binary.into(),
                uri,
                definition_dir: definition_dir.into(),
            }),
        }
    }

    pub fn definition_dir(&self) -> &Path {
        &self.virsh.definition_dir
    }

    fn handle(&self, name: String) -> Box<dyn Domain> {
        Box::new(VirshDomain {
            name,
            virsh: Arc::clone(&self.virsh),
        })
    }
}

#[async_trait]
impl Connection for VirshConnection {
    async fn lookup(&self, name: &str) -> Result<Box<dyn Domain>, HypervisorError> {
        // domuuid succeeds for both running and merely defined domains
        self.virsh.run(name, &["domuuid", name]).await?;
        Ok(self.handle(name.to_string()))
    }

    async fn define(&self, document: &[u8]) -> Result<Box<dyn Domain>, HypervisorError> {
        tokio::fs::create_dir_all(&self.virsh.definition_dir).await?;
        let path = self
            .virsh
            .definition_dir
            .join(format!("{}.xml", Uuid::new_v4()));
        tokio::fs::write(&path, document).await?;

        let path_str = path.to_string_lossy().into_owned();
        let result = self.virsh.run("", &["define", &path_str]).await;
        let _ = tokio::fs::remove_file(&path).await;

        let stdout = result?;
        let name = parse_defined_name(&stdout).ok_or_else(|| {
            HypervisorError::Operation(format!("unexpected virsh define output: {}", stdout.trim()))
        })?;
        Ok(self.handle(name))
    }
}

struct VirshDomain {
    name: String,
    virsh: Arc<Virsh>,
}

impl VirshDomain {
    async fn lifecycle(&self, verb: &str) -> Result<(), HypervisorError> {
        self.virsh.run(&self.name, &[verb, &self.name]).await?;
        Ok(())
    }
}

#[async_trait]
impl Domain for VirshDomain {
    fn name(&self) -> &str {
        &self.name
    }

    async fn state(&self) -> Result<DomainState, HypervisorError> {
        let stdout = self.virsh.run(&self.name, &["domstate", &self.name]).await?;
        Ok(parse_domstate(&stdout))
    }

    async fn start(&self) -> Result<(), HypervisorError> {
        self.lifecycle("start").await
    }

    async fn resume(&self) -> Result<(), HypervisorError> {
        self.lifecycle("resume").await
    }

    async fn destroy(&self) -> Result<(), HypervisorError> {
        self.lifecycle("destroy").await
    }

    async fn undefine(&self) -> Result<(), HypervisorError> {
        self.lifecycle("undefine").await
    }
}

fn classify_failure(name: &str, args: &[&str], stderr: &str) -> HypervisorError {
    let stderr = stderr.trim();
    // virsh prefixes every lookup error with "failed to get domain", only the
    // libvirt error that follows tells a missing domain apart
    if stderr.contains("Domain not found") || stderr.contains("no domain with matching name") {
        return HypervisorError::NotFound(name.to_string());
    }
    let verb = args.first().copied().unwrap_or("virsh");
    HypervisorError::Operation(format!("virsh {} failed: {}", verb, stderr))
}

/// Domain name from `virsh define` output.
///
/// Newer virsh prints `Domain 'vm' defined from ...`, older releases omit the
/// quotes.
fn parse_defined_name(stdout: &str) -> Option<String> {
    let line = stdout.lines().map(str::trim).find(|l| l.starts_with("Domain "))?;
    let rest = &line["Domain ".len()..];
    let name = match rest.strip_prefix('\'') {
        Some(quoted) => &quoted[..quoted.find('\'')?],
        None => &rest[..rest.find(" defined")?],
    };
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

fn parse_domstate(stdout: &str) -> DomainState {
    let raw = stdout
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or("");
    match raw {
        "running" => DomainState::Running,
        "idle" | "blocked" => DomainState::Blocked,
        "paused" => DomainState::Paused,
        "in shutdown" => DomainState::Shutdown,
        "shut off" => DomainState::Shutoff,
        "crashed" => DomainState::Crashed,
        "pmsuspended" => DomainState::PmSuspended,
        "no state" | "nostate" => DomainState::NoState,
        other => DomainState::Unrecognized(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_domstate() {
        assert_eq!(parse_domstate("running\n\n"), DomainState::Running);
        assert_eq!(parse_domstate("idle\n"), DomainState::Blocked);
        assert_eq!(parse_domstate("paused\n"), DomainState::Paused);
        assert_eq!(parse_domstate("in shutdown\n"), DomainState::Shutdown);
        assert_eq!(parse_domstate("shut off\n"), DomainState::Shutoff);
        assert_eq!(parse_domstate("crashed\n"), DomainState::Crashed);
        assert_eq!(parse_domstate("pmsuspended\n"), DomainState::PmSuspended);
        assert_eq!(parse_domstate("no state\n"), DomainState::NoState);
        assert_eq!(
            parse_domstate("migrating\n"),
            DomainState::Unrecognized("migrating".into())
        );
    }

    #[test]
    fn test_parse_defined_name() {
        assert_eq!(
            parse_defined_name("Domain 'testvm' defined from /tmp/x.xml\n\n"),
            Some("testvm".into())
        );
        assert_eq!(
            parse_defined_name("Domain testvm defined from /tmp/x.xml\n"),
            Some("testvm".into())
        );
        assert_eq!(parse_defined_name("error: something\n"), None);
        assert_eq!(parse_defined_name("Domain '' defined from x\n"), None);
    }

    #[test]
    fn test_classify_failure() {
        let err = classify_failure(
            "testvm",
            &["domuuid", "testvm"],
            "error: failed to get domain 'testvm'\nerror: Domain not found: no domain with matching name 'testvm'\n",
        );
        assert!(matches!(err, HypervisorError::NotFound(ref n) if n == "testvm"));

        let err = classify_failure(
            "testvm",
            &["start", "testvm"],
            "error: Failed to connect socket to '/var/run/libvirt/libvirt-sock'\n",
        );
        assert!(!err.is_not_found());
        assert!(err.to_string().starts_with("virsh start failed"));
    }

    #[test]
    fn test_lookup_errors_other_than_missing_domain() {
        for cause in [
            "error: access denied: 'getattr' not allowed",
            "error: internal error: connection reset by peer",
        ] {
            let stderr = format!("error: failed to get domain 'testvm'\n{}\n", cause);
            let err = classify_failure("testvm", &["domuuid", "testvm"], &stderr);
            assert!(!err.is_not_found(), "{}", cause);
            assert!(err.to_string().contains(cause.trim_start_matches("error: ")));
        }
    }

    #[tokio::test]
    async fn test_missing_binary_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let conn = VirshConnection::with_binary(
            dir.path().join("no-such-virsh"),
            None,
            dir.path().join("defs"),
        );

        let err = conn.lookup("testvm").await.err().unwrap();
        assert!(matches!(err, HypervisorError::Io(_)));
    }

    #[tokio::test]
    async fn test_define_removes_staged_document() {
        let dir = tempfile::tempdir().unwrap();
        let defs = dir.path().join("defs");
        let conn = VirshConnection::with_binary(dir.path().join("no-such-virsh"), None, &defs);

        assert!(conn.define(b"<domain/>").await.is_err());
        let staged = std::fs::read_dir(&defs).unwrap().count();
        assert_eq!(staged, 0);
    }

    /// Install a fake virsh that fails every call with `stderr`.
    #[cfg(unix)]
    fn failing_virsh(dir: &Path, stderr: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join("virsh");
        let script = format!("#!/bin/sh\nprintf '%s\\n' \"{}\" >&2\nexit 1\n", stderr);
        std::fs::write(&path, script).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_terminate_fails_when_lookup_errors() {
        use crate::definition::LibvirtXml;
        use crate::error::DomainError;
        use crate::manager::{DomainManager, ManagerConfig};
        use crate::spec::VmSpec;
        use crate::test_util::RecordingSink;

        let dir = tempfile::tempdir().unwrap();
        let binary = failing_virsh(
            dir.path(),
            "error: failed to get domain 'testvm'\nerror: internal error: connection reset",
        );
        let conn = VirshConnection::with_binary(binary, None, dir.path().join("defs"));

        let err = conn.lookup("testvm").await.err().unwrap();
        assert!(!err.is_not_found());

        let sink = Arc::new(RecordingSink::default());
        let manager = DomainManager::new(
            Arc::new(conn),
            sink.clone(),
            Arc::new(LibvirtXml),
            ManagerConfig::default(),
        );
        let spec = VmSpec::new("testvm");

        let err = manager.terminate(&spec).await.unwrap_err();
        assert!(matches!(err, DomainError::LookupFailed { .. }));
        let err = manager.synchronize(&spec).await.unwrap_err();
        assert!(matches!(err, DomainError::LookupFailed { .. }));
        assert!(sink.events().await.is_empty());
        assert!(!dir.path().join("defs").exists());
    }
}
