//! External commands as pool tasks.
//!
//! The CLI turns its trailing argv into a [`TaskCommand`]. Each worker runs
//! it with inherited stdio and fails if it exits non-zero. For parameterized
//! runs, `{name}` placeholders are filled from the record and every field
//! is exported as `FORKPOOL_PARAM_<NAME>`.

use crate::error::{PoolError, Result};
use crate::params::{ParamRecord, value_to_arg};
use anyhow::{Context, bail};
use std::process::Command;

/// Prefix for parameter fields exported to worker commands.
pub const PARAM_ENV_PREFIX: &str = "FORKPOOL_PARAM_";

/// A program plus arguments, possibly containing `{name}` placeholders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskCommand {
    argv: Vec<String>,
}

impl TaskCommand {
    /// Fails with [`PoolError::InvalidTask`] when there is no program to run.
    pub fn new(argv: Vec<String>) -> Result<Self> {
        match argv.first() {
            Some(program) if !program.trim().is_empty() => Ok(Self { argv }),
            Some(_) => Err(PoolError::InvalidTask("blank program name".to_string())),
            None => Err(PoolError::InvalidTask("no command given".to_string())),
        }
    }

    pub fn argv(&self) -> &[String] {
        &self.argv
    }

    /// Run the command as-is.
    pub fn run(&self) -> anyhow::Result<()> {
        self.execute(&self.argv, None)
    }

    /// Run the command with `record` substituted into placeholders and
    /// exported to the environment.
    pub fn run_with(&self, record: &ParamRecord) -> anyhow::Result<()> {
        self.execute(&self.render(record), Some(record))
    }

    /// The argv after placeholder substitution. Unknown placeholders stay
    /// untouched.
    pub fn render(&self, record: &ParamRecord) -> Vec<String> {
        self.argv
            .iter()
            .map(|arg| {
                record.iter().fold(arg.clone(), |acc, (name, value)| {
                    acc.replace(&format!("{{{}}}", name), &value_to_arg(value))
                })
            })
            .collect()
    }

    fn execute(&self, argv: &[String], record: Option<&ParamRecord>) -> anyhow::Result<()> {
        let (program, args) = argv
            .split_first()
            .context("command has no program")?;
        let mut cmd = Command::new(program);
        cmd.args(args);
        if let Some(record) = record {
            for (name, value) in record {
                cmd.env(param_env_name(name), value_to_arg(value));
            }
        }

        let status = cmd
            .status()
            .with_context(|| format!("failed to start `{}`", program))?;
        if !status.success() {
            bail!("`{}` exited with {}", argv.join(" "), status);
        }
        Ok(())
    }
}

/// A shell command run once after a pool finishes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellCallback {
    script: String,
}

impl ShellCallback {
    /// Fails with [`PoolError::InvalidCallback`] on a blank script.
    pub fn new(script: &str) -> Result<Self> {
        if script.trim().is_empty() {
            return Err(PoolError::InvalidCallback(format!("{:?}", script)));
        }
        Ok(Self {
            script: script.to_string(),
        })
    }

    /// Run via `sh -c`. Failures are logged, never propagated: the pool's
    /// work is already done by the time the callback runs.
    pub fn invoke(&self) {
        match Command::new("sh").arg("-c").arg(&self.script).status() {
            Ok(status) if status.success() => {}
            Ok(status) => {
                tracing::warn!(script = %self.script, %status, "Completion callback failed")
            }
            Err(e) => {
                tracing::warn!(script = %self.script, error = %e, "Completion callback could not start")
            }
        }
    }
}

/// Environment variable name for a parameter field.
pub fn param_env_name(name: &str) -> String {
    let suffix: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect();
    format!("{}{}", PARAM_ENV_PREFIX, suffix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    fn record(value: Value) -> ParamRecord {
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    fn argv(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_empty_command_is_invalid_task() {
        assert!(matches!(
            TaskCommand::new(Vec::new()),
            Err(PoolError::InvalidTask(_))
        ));
        assert!(matches!(
            TaskCommand::new(argv(&["  "])),
            Err(PoolError::InvalidTask(_))
        ));
    }

    #[test]
    fn test_blank_callback_is_invalid() {
        assert!(matches!(
            ShellCallback::new("   "),
            Err(PoolError::InvalidCallback(_))
        ));
        assert!(ShellCallback::new("echo done").is_ok());
    }

    #[test]
    fn test_render_placeholders() {
        let cmd = TaskCommand::new(argv(&["report", "--from={begin}", "{end}", "{missing}"])).unwrap();
        let rec = record(json!({"begin": "2018-01-01", "end": "2018-01-02"}));
        assert_eq!(
            cmd.render(&rec),
            argv(&["report", "--from=2018-01-01", "2018-01-02", "{missing}"])
        );
    }

    #[test]
    fn test_param_env_name() {
        assert_eq!(param_env_name("begin"), "FORKPOOL_PARAM_BEGIN");
        assert_eq!(param_env_name("end-date"), "FORKPOOL_PARAM_END_DATE");
    }

    #[test]
    fn test_run_reports_exit_status() {
        let ok = TaskCommand::new(argv(&["true"])).unwrap();
        assert!(ok.run().is_ok());

        let failing = TaskCommand::new(argv(&["false"])).unwrap();
        let err = failing.run().unwrap_err();
        assert!(err.to_string().contains("false"));
    }

    #[test]
    fn test_run_with_exports_params() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out.txt");
        let cmd = TaskCommand::new(argv(&[
            "sh",
            "-c",
            &format!("echo \"$FORKPOOL_PARAM_BEGIN {{end}}\" > {}", out.display()),
        ]))
        .unwrap();
        cmd.run_with(&record(json!({"begin": "a", "end": "b"})))
            .unwrap();
        assert_eq!(std::fs::read_to_string(&out).unwrap().trim(), "a b");
    }
}
