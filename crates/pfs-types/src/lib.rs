#![forbid(unsafe_code)]
//! Plain-data vocabulary for the parityfs harness.
//!
//! Everything here is inert configuration and addressing: no I/O, no process
//! spawning. The harness engine (`pfs-harness`) consumes these types; keeping
//! them in a leaf crate keeps the engine testable against fakes.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

/// Placeholder token scenario scripts may use for "the currently active root".
///
/// Typed [`TestPath`] values are the real addressing mechanism; the token
/// survives only as an input convention accepted by
/// [`TestPath::parse_template`], so substitution happens at exactly one
/// tested point instead of ad-hoc string replacement.
pub const ROOT_PLACEHOLDER: &str = "__TESTDIR__";

/// Control-channel subdirectory inside the repository. The service watches
/// this location for deposited fault artifacts.
pub const ACTIONS_SUBDIR: &str = "actions";

/// Parse failures for locators and test paths.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("invalid remote locator `{input}`: {reason}")]
    InvalidLocator { input: String, reason: &'static str },
    #[error("invalid test path `{input}`: {reason}")]
    InvalidTestPath { input: String, reason: &'static str },
}

// ── Encryption and launch modes ─────────────────────────────────────────────

/// Repository encryption mode passed to the service init command.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EncryptionMode {
    #[default]
    None,
    Aes,
}

impl fmt::Display for EncryptionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Aes => write!(f, "aes"),
        }
    }
}

impl FromStr for EncryptionMode {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(Self::None),
            "aes" => Ok(Self::Aes),
            _ => Err(ParseError::InvalidLocator {
                input: s.to_owned(),
                reason: "encryption mode must be `none` or `aes`",
            }),
        }
    }
}

/// How the service mount process is launched.
///
/// A single tagged variant; the original harness conflated an independent
/// fail-fast flag with leak-check state shared through the process handle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LaunchMode {
    /// Spawn the mount process directly and poll for readiness.
    #[default]
    Direct,
    /// Print the exact command line and suspend until the operator confirms,
    /// so a debugger can be attached before the process starts.
    Debug,
    /// Wrap the mount command with a memory-correctness checker and retain
    /// the handle for exit-status collection at unmount.
    Checked,
}

// ── Repository locators ─────────────────────────────────────────────────────

/// A remote repository locator of the form `scheme://host[:port]/path`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteLocator {
    pub scheme: String,
    pub host: String,
    pub port: Option<u16>,
    /// Absolute path on the remote host, leading slash included.
    pub path: String,
}

impl fmt::Display for RemoteLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.port {
            Some(port) => write!(f, "{}://{}:{}{}", self.scheme, self.host, port, self.path),
            None => write!(f, "{}://{}{}", self.scheme, self.host, self.path),
        }
    }
}

/// Where the service's persistent backing store lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RepoLocator {
    Local(PathBuf),
    Remote(RemoteLocator),
}

impl RepoLocator {
    /// Derive a per-session repository location by appending `suffix` to the
    /// base location's path.
    #[must_use]
    pub fn join_run_suffix(&self, suffix: &str) -> Self {
        match self {
            Self::Local(base) => Self::Local(base.join(suffix)),
            Self::Remote(remote) => {
                let mut locator = remote.clone();
                if !locator.path.ends_with('/') {
                    locator.path.push('/');
                }
                locator.path.push_str(suffix);
                Self::Remote(locator)
            }
        }
    }

    /// The locator as passed to service commands on the command line.
    #[must_use]
    pub fn as_argument(&self) -> String {
        match self {
            Self::Local(path) => path.display().to_string(),
            Self::Remote(remote) => remote.to_string(),
        }
    }

    #[must_use]
    pub fn is_remote(&self) -> bool {
        matches!(self, Self::Remote(_))
    }

    /// Local filesystem path, if this locator is local.
    #[must_use]
    pub fn local_path(&self) -> Option<&Path> {
        match self {
            Self::Local(path) => Some(path),
            Self::Remote(_) => None,
        }
    }
}

impl fmt::Display for RepoLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local(path) => write!(f, "{}", path.display()),
            Self::Remote(remote) => write!(f, "{remote}"),
        }
    }
}

impl FromStr for RepoLocator {
    type Err = ParseError;

    /// Anything containing `://` is parsed as a remote locator; everything
    /// else is a local path.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let Some((scheme, rest)) = s.split_once("://") else {
            return Ok(Self::Local(PathBuf::from(s)));
        };
        if scheme.is_empty() {
            return Err(ParseError::InvalidLocator {
                input: s.to_owned(),
                reason: "empty scheme",
            });
        }
        let Some(slash) = rest.find('/') else {
            return Err(ParseError::InvalidLocator {
                input: s.to_owned(),
                reason: "missing path after host",
            });
        };
        let (authority, path) = rest.split_at(slash);
        if authority.is_empty() {
            return Err(ParseError::InvalidLocator {
                input: s.to_owned(),
                reason: "empty host",
            });
        }
        let (host, port) = match authority.rsplit_once(':') {
            Some((host, port_str)) => {
                let port = port_str.parse::<u16>().map_err(|_| ParseError::InvalidLocator {
                    input: s.to_owned(),
                    reason: "port is not a valid u16",
                })?;
                (host.to_owned(), Some(port))
            }
            None => (authority.to_owned(), None),
        };
        if host.is_empty() {
            return Err(ParseError::InvalidLocator {
                input: s.to_owned(),
                reason: "empty host",
            });
        }
        Ok(Self::Remote(RemoteLocator {
            scheme: scheme.to_owned(),
            host,
            port,
            path: path.to_owned(),
        }))
    }
}

// ── Logical test paths ──────────────────────────────────────────────────────

/// Which physical root a logical path targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Root {
    Live,
    Mirror,
}

/// A path relative to "the currently active root".
///
/// Scenario scripts stay agnostic of which side they ultimately drive;
/// resolution against a concrete root directory is a pure join.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TestPath {
    rel: PathBuf,
}

impl TestPath {
    /// The root itself.
    #[must_use]
    pub fn root() -> Self {
        Self {
            rel: PathBuf::new(),
        }
    }

    /// Build from a relative path. Rejects absolute paths and `..`
    /// components, which would escape the session roots.
    pub fn new(rel: impl Into<PathBuf>) -> Result<Self, ParseError> {
        let rel = rel.into();
        let ok = rel
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
        if !ok {
            return Err(ParseError::InvalidTestPath {
                input: rel.display().to_string(),
                reason: "must be relative with no `..` components",
            });
        }
        Ok(Self { rel })
    }

    /// Accept the legacy `__TESTDIR__/...` template convention.
    pub fn parse_template(template: &str) -> Result<Self, ParseError> {
        if template == ROOT_PLACEHOLDER {
            return Ok(Self::root());
        }
        let Some(rest) = template.strip_prefix(ROOT_PLACEHOLDER) else {
            return Err(ParseError::InvalidTestPath {
                input: template.to_owned(),
                reason: "missing __TESTDIR__ prefix",
            });
        };
        let Some(rel) = rest.strip_prefix('/') else {
            return Err(ParseError::InvalidTestPath {
                input: template.to_owned(),
                reason: "placeholder must be followed by `/`",
            });
        };
        Self::new(rel)
    }

    /// Compose a child path.
    pub fn join(&self, name: &str) -> Result<Self, ParseError> {
        Self::new(self.rel.join(name))
    }

    /// Resolve against a concrete root directory. Pure function.
    #[must_use]
    pub fn resolve(&self, root_dir: &Path) -> PathBuf {
        root_dir.join(&self.rel)
    }

    /// The relative path under the root.
    #[must_use]
    pub fn rel(&self) -> &Path {
        &self.rel
    }
}

impl fmt::Display for TestPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.rel.as_os_str().is_empty() {
            write!(f, "{ROOT_PLACEHOLDER}")
        } else {
            write!(f, "{ROOT_PLACEHOLDER}/{}", self.rel.display())
        }
    }
}

// ── File operations ─────────────────────────────────────────────────────────

/// One operation applied identically to a paired live/mirror descriptor.
///
/// Write payloads are generated once by the executor and applied to both
/// sides byte-for-byte; the operation record carries only shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FileOp {
    Read { offset: u64, len: usize },
    Write { offset: u64, len: usize },
    Flush,
    Truncate { len: u64 },
}

// ── Service command configuration ───────────────────────────────────────────

/// Command shapes for the service under test.
///
/// The service is an external collaborator: the harness knows only how to
/// invoke it and which exit conventions it follows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceCommands {
    /// Repository initialization command.
    pub init_program: String,
    /// Mount daemon command.
    pub mount_program: String,
    /// Unmount command applied to the mountpoint.
    pub unmount_program: String,
    /// Flag keeping the mount process in the foreground, if the service
    /// needs one to stay attached to the spawned child.
    pub foreground_flag: Option<String>,
    /// Verbosity flag forwarded to the mount command.
    pub verbosity_flag: Option<String>,
    /// Memory-correctness checker wrapping the mount command in
    /// [`LaunchMode::Checked`].
    pub checker_program: String,
    /// Extra checker arguments, e.g. `--error-exitcode=42`.
    pub checker_args: Vec<String>,
    /// Exit code the checker uses to signal a detected fault.
    pub checker_error_exit: i32,
    /// Exit code the service uses when it terminates deliberately in
    /// response to an injected fault condition.
    pub fault_exit_code: i32,
}

impl Default for ServiceCommands {
    fn default() -> Self {
        Self {
            init_program: "pfs-init".to_owned(),
            mount_program: "pfs-mount".to_owned(),
            unmount_program: "umount".to_owned(),
            foreground_flag: Some("-f".to_owned()),
            verbosity_flag: None,
            checker_program: "valgrind".to_owned(),
            checker_args: vec!["--error-exitcode=42".to_owned(), "--leak-check=full".to_owned()],
            checker_error_exit: 42,
            fault_exit_code: 3,
        }
    }
}
