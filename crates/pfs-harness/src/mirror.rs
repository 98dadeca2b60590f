//! Mirrored command execution: every root-bearing argument is resolved once
//! per root and the command runs twice, live first, then mirror.
//!
//! This executor only propagates hard failures. Divergence between the two
//! sides is the verifier's job; by running the live side first the mirror
//! keeps an independent reference state unless the live command already
//! diverged.

use pfs_error::{HarnessError, Result};
use pfs_types::{ParseError, Root, TestPath, ROOT_PLACEHOLDER};
use std::path::Path;

use crate::session::Session;
use crate::system::{CommandSpec, System};

/// One argument of a mirrored command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateArg {
    /// Passed through unchanged.
    Literal(String),
    /// Resolves to `<root>/<rel>`.
    InRoot(TestPath),
    /// Resolves to `<prefix><root>/<rel>`, for `key=__TESTDIR__/...` style
    /// arguments (`dd of=...`).
    Prefixed(String, TestPath),
}

impl TemplateArg {
    /// Literal argument helper.
    pub fn lit(arg: impl Into<String>) -> Self {
        Self::Literal(arg.into())
    }

    /// Root-relative argument helper.
    #[must_use]
    pub fn in_root(path: &TestPath) -> Self {
        Self::InRoot(path.clone())
    }

    /// Accept the legacy placeholder convention: any argument containing
    /// `__TESTDIR__` becomes a typed root-relative argument.
    pub fn parse(raw: &str) -> std::result::Result<Self, ParseError> {
        let Some(index) = raw.find(ROOT_PLACEHOLDER) else {
            return Ok(Self::Literal(raw.to_owned()));
        };
        let prefix = &raw[..index];
        let template = &raw[index..];
        let path = match template.strip_suffix('/') {
            // Trailing slash as in `cp file __TESTDIR__/` denotes the root
            // (or directory) itself.
            Some(trimmed) if trimmed == ROOT_PLACEHOLDER => TestPath::root(),
            Some(trimmed) => TestPath::parse_template(trimmed)?,
            None => TestPath::parse_template(template)?,
        };
        if prefix.is_empty() {
            Ok(Self::InRoot(path))
        } else {
            Ok(Self::Prefixed(prefix.to_owned(), path))
        }
    }

    fn resolve(&self, root_dir: &Path) -> String {
        match self {
            Self::Literal(arg) => arg.clone(),
            Self::InRoot(path) => path.resolve(root_dir).display().to_string(),
            Self::Prefixed(prefix, path) => {
                format!("{prefix}{}", path.resolve(root_dir).display())
            }
        }
    }
}

/// Run `program args...` against the live mount, then against the mirror.
/// A non-zero exit from either side aborts the scenario.
pub fn run_mirrored(
    session: &Session,
    system: &dyn System,
    program: &str,
    args: &[TemplateArg],
) -> Result<()> {
    for root in [Root::Live, Root::Mirror] {
        let root_dir = match root {
            Root::Live => session.mount_dir(),
            Root::Mirror => session.mirror_dir(),
        };
        let resolved: Vec<String> = args.iter().map(|arg| arg.resolve(root_dir)).collect();
        let spec = CommandSpec::new(program, resolved);
        tracing::debug!(?root, command = %spec, "mirrored command");
        let output = system.run(&spec)?;
        if !output.success() {
            return Err(HarnessError::Command {
                command: spec.to_string(),
                status: output.status,
            });
        }
    }
    Ok(())
}
