use super::Op;
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;

/// A shell command loaded from the commands config file. A `{}` placeholder
/// in the template is substituted with the message args; otherwise non-empty
/// args are appended.
#[derive(Debug, Clone, Deserialize)]
pub struct ShellOp {
    name: String,
    #[serde(default)]
    description: String,
    command: String,
    #[serde(default)]
    workdir: Option<String>,
}

impl ShellOp {
    pub fn new(name: &str, description: &str, command: &str, workdir: Option<&str>) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            command: command.to_string(),
            workdir: workdir.map(str::to_string),
        }
    }

    fn render_command(&self, args: &str) -> String {
        if self.command.contains("{}") {
            return self.command.replace("{}", args);
        }
        if args.is_empty() {
            return self.command.clone();
        }
        format!("{} {}", self.command, args)
    }
}

#[async_trait]
impl Op for ShellOp {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    async fn execute(&self, args: &str) -> Result<String> {
        let command = self.render_command(args);

        let mut cmd = Command::new("bash");
        cmd.arg("-l")
            .arg("-c")
            .arg(&command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.workdir {
            cmd.current_dir(dir);
        }

        let output = cmd
            .output()
            .await
            .with_context(|| format!("run {}", self.name))?;

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));
        let combined = combined.trim();

        if !output.status.success() {
            bail!("{}: {}\n{}", self.name, output.status, combined);
        }
        Ok(combined.to_string())
    }
}

/// Reads the commands config file and returns the shell ops it defines.
/// A missing file means no custom commands.
pub fn load_commands(path: &Path) -> Result<Vec<ShellOp>> {
    let data = match std::fs::read_to_string(path) {
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e).context("read commands config"),
        Ok(data) => data,
    };

    let cmds: Vec<ShellOp> = serde_json::from_str(&data).context("parse commands config")?;

    for (i, cmd) in cmds.iter().enumerate() {
        if cmd.name.is_empty() {
            bail!("command at index {i} missing name");
        }
        if cmd.command.is_empty() {
            bail!("command {:?} missing command field", cmd.name);
        }
    }
    Ok(cmds)
}
