//! Shell-script address hook.

use std::net::IpAddr;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{info, warn};

use crate::core::constants::DEFAULT_SCRIPT_KEYWORD;
use crate::core::{AddressChangeSink, ConfigError, LivenessError};

/// Runs a script template through a shell whenever the address changes.
///
/// Every occurrence of the keyword in the template is replaced by the new
/// address before the script runs. The child inherits stdio.
#[derive(Debug, Clone)]
pub struct ScriptHook {
    script: String,
    keyword: String,
    shell: Vec<String>,
}

impl ScriptHook {
    /// Create a hook using the default keyword and platform shell.
    pub fn new(script: impl Into<String>) -> Result<Self, ConfigError> {
        Self::with_keyword(script, DEFAULT_SCRIPT_KEYWORD)
    }

    /// Create a hook with a custom placeholder keyword.
    pub fn with_keyword(
        script: impl Into<String>,
        keyword: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        let script = script.into();
        let keyword = keyword.into();
        if script.is_empty() {
            return Err(ConfigError::EmptyScript);
        }
        if keyword.is_empty() {
            return Err(ConfigError::EmptyKeyword);
        }
        Ok(Self {
            script,
            keyword,
            shell: Self::default_shell(),
        })
    }

    /// Replace the shell with a space-separated program and arguments,
    /// e.g. `"bash -c"`. A blank string keeps the current shell.
    pub fn with_shell(mut self, shell: &str) -> Self {
        let parts: Vec<String> = shell
            .split(' ')
            .filter(|part| !part.is_empty())
            .map(String::from)
            .collect();
        if !parts.is_empty() {
            self.shell = parts;
        }
        self
    }

    /// Shell used when none is configured.
    pub fn default_shell() -> Vec<String> {
        if cfg!(windows) {
            vec!["cmd".into(), "/C".into()]
        } else {
            vec!["sh".into(), "-c".into()]
        }
    }

    /// Shell program and arguments.
    pub fn shell(&self) -> &[String] {
        &self.shell
    }

    /// Script text for `addr`.
    pub fn render(&self, addr: IpAddr) -> String {
        self.script.replace(&self.keyword, &addr.to_string())
    }

    fn command(&self, addr: IpAddr) -> Command {
        let (program, args) = match self.shell.split_first() {
            Some((program, args)) => (program.as_str(), args),
            None => ("sh", &[][..]),
        };
        let mut cmd = Command::new(program);
        cmd.args(args)
            .arg(self.render(addr))
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());
        cmd
    }
}

#[async_trait]
impl AddressChangeSink for ScriptHook {
    async fn on_update(&self, addr: IpAddr) -> Result<(), LivenessError> {
        let status = self
            .command(addr)
            .status()
            .await
            .map_err(|err| LivenessError::Hook(format!("{}: {err}", self.shell.join(" "))))?;
        match status.code() {
            Some(0) => info!(address = %addr, code = 0, "Script finished"),
            Some(code) => warn!(address = %addr, code, "Script finished"),
            None => warn!(address = %addr, "Script terminated by signal"),
        }
        Ok(())
    }
}
