//! # Snippet executor
//!
//! Runs model-written code in a separate interpreter process. Imports are
//! checked against an allow-list before anything is spawned.

use forgent_core::{Error, ErrorKind, ExecutorSettings, Result};
use regex::Regex;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

/// Modules every snippet may import
pub const BASE_BUILTIN_MODULES: &[&str] = &[
    "collections",
    "datetime",
    "itertools",
    "math",
    "queue",
    "random",
    "re",
    "stat",
    "statistics",
    "time",
    "unicodedata",
];

/// Captured result of one snippet run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionOutput {
    pub stdout: String,
    pub stderr: String,
    /// Process exit code, -1 when killed by a signal
    pub exit_code: i32,
}

impl ExecutionOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

pub struct PythonExecutor {
    command: Vec<String>,
    timeout: Duration,
    authorized_imports: Vec<String>,
    // `import a, b as c`
    import_regex: Regex,
    // `from a.b import c`
    from_import_regex: Regex,
}

impl PythonExecutor {
    /// Build an executor allowing the base modules plus `additional_imports`
    pub fn new(settings: &ExecutorSettings, additional_imports: &[String]) -> Result<Self> {
        if settings.command.is_empty() {
            return Err(Error::config_invalid("executor command must name a program"));
        }

        let mut authorized_imports: Vec<String> = BASE_BUILTIN_MODULES
            .iter()
            .map(|m| m.to_string())
            .chain(additional_imports.iter().cloned())
            .collect();
        authorized_imports.sort();
        authorized_imports.dedup();

        let compile = |pattern: &str| {
            Regex::new(pattern).map_err(|e| Error::unexpected(e.to_string()).set_source(e))
        };

        Ok(Self {
            command: settings.command.clone(),
            timeout: Duration::from_secs(settings.timeout_secs),
            authorized_imports,
            import_regex: compile(r"(?m)^\s*import\s+([^#\n]+)")?,
            from_import_regex: compile(r"(?m)^\s*from\s+(\S+)\s+import\b")?,
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn authorized_imports(&self) -> &[String] {
        &self.authorized_imports
    }

    /// Modules named by the snippet's import statements, in order
    pub fn imported_modules(&self, code: &str) -> Vec<String> {
        let mut modules = Vec::new();
        for caps in self.import_regex.captures_iter(code) {
            for item in caps[1].split(',') {
                if let Some(module) = item.split_whitespace().next() {
                    modules.push(module.to_string());
                }
            }
        }
        for caps in self.from_import_regex.captures_iter(code) {
            modules.push(caps[1].to_string());
        }
        modules
    }

    /// Reject the snippet if it imports anything outside the allow-list
    pub fn check_imports(&self, code: &str) -> Result<()> {
        match self
            .imported_modules(code)
            .into_iter()
            .find(|module| !is_authorized(module, &self.authorized_imports))
        {
            Some(module) => Err(Error::import_not_authorized(module)
                .with_operation("executor::check_imports")
                .with_context("authorized", self.authorized_imports.join(", "))),
            None => Ok(()),
        }
    }

    /// Check imports, then run the snippet and capture its output.
    ///
    /// A non-zero exit is reported through [`ExecutionOutput::exit_code`],
    /// not as an error.
    pub async fn execute(&self, code: &str) -> Result<ExecutionOutput> {
        self.check_imports(code)?;

        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| Error::config_invalid("executor command must name a program"))?;
        debug!(program = %program, timeout_secs = self.timeout.as_secs(), "running snippet");

        let child = Command::new(program)
            .args(args)
            .arg(code)
            .env("TERM", "dumb")
            .env("NO_COLOR", "1")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                Error::execution_failed(format!("failed to start '{}'", program))
                    .with_operation("executor::execute")
                    .set_source(e)
            })?;

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result.map_err(|e| {
                Error::execution_failed(e.to_string())
                    .with_operation("executor::execute")
                    .set_source(e)
            })?,
            Err(_) => {
                return Err(Error::new(
                    ErrorKind::ExecutionTimeout,
                    format!("code execution timed out after {} seconds", self.timeout.as_secs()),
                )
                .with_operation("executor::execute"));
            }
        };

        let result = ExecutionOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code().unwrap_or(-1),
        };
        debug!(exit_code = result.exit_code, stdout_bytes = result.stdout.len(), "snippet finished");
        Ok(result)
    }
}

/// Whether `module` is covered by an allow-list entry.
///
/// `*` allows everything, `pkg.*` allows `pkg` and its submodules, and an
/// allowed module also allows its submodules.
fn is_authorized(module: &str, authorized: &[String]) -> bool {
    authorized.iter().any(|allowed| {
        if allowed == "*" {
            return true;
        }
        let base = allowed.strip_suffix(".*").unwrap_or(allowed);
        module == base
            || module
                .strip_prefix(base)
                .is_some_and(|rest| rest.starts_with('.'))
    })
}
