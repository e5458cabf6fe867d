//! Subprocess driver: runs an external program per argument set.
//!
//! The argv is a template; `{name}` is replaced by the value bound to `name`
//! (strings unquoted, everything else as JSON). Stdout is parsed according to
//! [`OutputFormat`] and stored under one output field.
//!
//! Under a deadline the child is killed and reaped once the limit passes.
//! Only the direct child is killed: a program that forks (`sh -c "a; b"`)
//! can leave its own children running, so prefer `exec` in shell wrappers.

use std::io::Read;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use regex::Regex;
use serde_json::Value;

use crate::core::errors::{HarnessError, Result};
use crate::driver::{Driver, DriverData, DriverFailure, DriverSettings, DriverType};
use crate::params::ArgumentSet;

const PLACEHOLDER: &str = r"\{([A-Za-z_][A-Za-z0-9_]*)\}";
const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Where the program path comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandProgram {
    Fixed(String),
    /// Read from the named driver setting (e.g. `"CliCalc.cmd"` → `cmd`).
    Setting(String),
}

/// How stdout is turned into a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// Parse as JSON; fall back to the trimmed text.
    #[default]
    Json,
    /// Parse as a float.
    Number,
    /// Keep the trimmed text.
    Text,
}

/// Declarative description of a command driver.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    program: CommandProgram,
    args: Vec<String>,
    output: OutputFormat,
    field: String,
    placeholder: Regex,
}

impl CommandSpec {
    pub fn new<I, S>(program: CommandProgram, args: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let placeholder = Regex::new(PLACEHOLDER).map_err(|err| HarnessError::InvalidConfig {
            details: format!("argv placeholder pattern: {err}"),
        })?;
        Ok(Self {
            program,
            args: args.into_iter().map(Into::into).collect(),
            output: OutputFormat::default(),
            field: "result".to_string(),
            placeholder,
        })
    }

    #[must_use]
    pub fn output(mut self, output: OutputFormat) -> Self {
        self.output = output;
        self
    }

    /// Output field name (default `result`).
    #[must_use]
    pub fn field(mut self, field: impl Into<String>) -> Self {
        self.field = field.into();
        self
    }

    /// Argument names referenced by the argv template, in first-use order.
    #[must_use]
    pub fn referenced_args(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for template in &self.args {
            for caps in self.placeholder.captures_iter(template) {
                let name = caps[1].to_string();
                if !names.contains(&name) {
                    names.push(name);
                }
            }
        }
        names
    }

    fn render_argv(&self, args: &ArgumentSet) -> std::result::Result<Vec<String>, DriverFailure> {
        self.args
            .iter()
            .map(|template| {
                let mut missing = None;
                let rendered = self
                    .placeholder
                    .replace_all(template, |caps: &regex::Captures<'_>| {
                        args.render(&caps[1]).unwrap_or_else(|| {
                            missing.get_or_insert_with(|| caps[1].to_string());
                            String::new()
                        })
                    })
                    .into_owned();
                missing.map_or(Ok(rendered), |name| Err(DriverFailure::MissingArg { name }))
            })
            .collect()
    }

    fn program(&self, settings: &DriverSettings) -> std::result::Result<String, DriverFailure> {
        match &self.program {
            CommandProgram::Fixed(path) => Ok(path.clone()),
            CommandProgram::Setting(key) => settings
                .get_str(key)
                .ok_or_else(|| DriverFailure::MissingSetting { name: key.clone() }),
        }
    }
}

/// Driver spawning one process per extraction.
#[derive(Debug, Clone)]
pub struct CommandDriver {
    spec: Arc<CommandSpec>,
    deadline: Option<Duration>,
}

impl CommandDriver {
    #[must_use]
    pub fn new(spec: CommandSpec) -> Self {
        Self {
            spec: Arc::new(spec),
            deadline: None,
        }
    }

    /// Driver type with mandatory args taken from the argv template and, for
    /// [`CommandProgram::Setting`], the program setting marked mandatory.
    #[must_use]
    pub fn driver_type(name: impl Into<String>, spec: CommandSpec) -> DriverType {
        let mandatory_args = spec.referenced_args();
        let mandatory_settings: Vec<String> = match &spec.program {
            CommandProgram::Setting(key) => vec![key.clone()],
            CommandProgram::Fixed(_) => Vec::new(),
        };
        let driver = Self::new(spec);
        DriverType::new(name, move || driver.clone())
            .with_mandatory_args(mandatory_args)
            .with_mandatory_settings(mandatory_settings)
    }
}

impl Driver for CommandDriver {
    fn extract(
        &mut self,
        args: &ArgumentSet,
        settings: &DriverSettings,
    ) -> std::result::Result<DriverData, DriverFailure> {
        let program = self.spec.program(settings)?;
        let argv = self.spec.render_argv(args)?;
        let mut child = Command::new(&program)
            .args(&argv)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| DriverFailure::extraction(format!("spawn {program}: {err}")))?;
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        // On timeout the readers are left behind; they end when the pipes close.
        let status = match self.deadline {
            Some(limit) => wait_until(&mut child, limit)?,
            None => child.wait(),
        }
        .map_err(|err| DriverFailure::extraction(format!("wait for {program}: {err}")))?;
        let stdout = stdout.join().unwrap_or_default();
        let stderr = stderr.join().unwrap_or_default();

        if !status.success() {
            let stderr = String::from_utf8_lossy(&stderr);
            return Err(DriverFailure::extraction(format!(
                "{program} exited with {status}: {}",
                stderr.trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&stdout);
        let value = parse_output(stdout.trim(), self.spec.output)?;
        Ok(DriverData::from([(self.spec.field.clone(), value)]))
    }

    fn enforce_deadline(&mut self, limit: Duration) -> bool {
        self.deadline = Some(limit);
        true
    }
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> thread::JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf);
        }
        buf
    })
}

/// Wait for `child` until `limit` has passed, then kill and reap it.
fn wait_until(
    child: &mut Child,
    limit: Duration,
) -> std::result::Result<std::io::Result<ExitStatus>, DriverFailure> {
    let started = Instant::now();
    loop {
        match child.try_wait() {
            Ok(Some(status)) => return Ok(Ok(status)),
            Ok(None) => {}
            Err(err) => return Ok(Err(err)),
        }
        let waited = started.elapsed();
        if waited >= limit {
            let _ = child.kill();
            let _ = child.wait();
            return Err(DriverFailure::timed_out(limit));
        }
        thread::sleep(POLL_INTERVAL.min(limit - waited));
    }
}

fn parse_output(raw: &str, format: OutputFormat) -> std::result::Result<Value, DriverFailure> {
    match format {
        OutputFormat::Json => {
            Ok(serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string())))
        }
        OutputFormat::Number => raw
            .parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number)
            .ok_or_else(|| DriverFailure::Data {
                stage: "decode",
                message: format!("not a finite number: {raw:?}"),
            }),
        OutputFormat::Text => Ok(Value::String(raw.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn calc_args() -> ArgumentSet {
        [("op", json!("add")), ("a", json!(1)), ("b", json!(-3))]
            .into_iter()
            .collect()
    }

    #[test]
    fn referenced_args_follow_template_order() {
        let spec = CommandSpec::new(
            CommandProgram::Fixed("calc".to_string()),
            ["{op}", "--a={a}", "{b}", "{a}"],
        )
        .unwrap();
        assert_eq!(spec.referenced_args(), vec!["op", "a", "b"]);
    }

    #[test]
    fn argv_renders_values_without_quotes() {
        let spec = CommandSpec::new(
            CommandProgram::Fixed("calc".to_string()),
            ["{op}", "--a={a}", "{b}"],
        )
        .unwrap();
        assert_eq!(
            spec.render_argv(&calc_args()).unwrap(),
            vec!["add", "--a=1", "-3"]
        );
    }

    #[test]
    fn unknown_placeholder_is_missing_arg() {
        let spec =
            CommandSpec::new(CommandProgram::Fixed("calc".to_string()), ["{nope}"]).unwrap();
        assert_eq!(
            spec.render_argv(&calc_args()).unwrap_err(),
            DriverFailure::MissingArg {
                name: "nope".to_string()
            }
        );
    }

    #[test]
    fn output_parsing() {
        assert_eq!(parse_output("4", OutputFormat::Json).unwrap(), json!(4));
        assert_eq!(parse_output("oops", OutputFormat::Json).unwrap(), json!("oops"));
        assert_eq!(parse_output("2.5", OutputFormat::Number).unwrap(), json!(2.5));
        assert!(parse_output("NaN", OutputFormat::Number).is_err());
        assert_eq!(parse_output("7", OutputFormat::Text).unwrap(), json!("7"));
    }

    #[test]
    fn driver_type_declares_requirements() {
        let spec = CommandSpec::new(
            CommandProgram::Setting("cmd".to_string()),
            ["{op}", "{a}", "{b}"],
        )
        .unwrap();
        let driver_type = CommandDriver::driver_type("CliCalc", spec);
        assert_eq!(driver_type.mandatory_args(), ["op", "a", "b"]);
        assert_eq!(driver_type.mandatory_settings(), ["cmd"]);

        let mut instance = driver_type.instantiate(calc_args(), DriverSettings::new());
        assert_eq!(
            instance.extract().unwrap_err(),
            &DriverFailure::MissingSetting {
                name: "cmd".to_string()
            }
        );
    }

    #[cfg(unix)]
    #[test]
    fn runs_a_real_process() {
        let spec = CommandSpec::new(
            CommandProgram::Fixed("sh".to_string()),
            ["-c", "echo $(({a} + {b}))"],
        )
        .unwrap()
        .output(OutputFormat::Number);
        let driver_type = CommandDriver::driver_type("ShellAdd", spec);
        let mut instance = driver_type.instantiate(calc_args(), DriverSettings::new());
        assert_eq!(instance.extract().unwrap().get("result"), Some(&json!(-2.0)));
    }

    #[cfg(unix)]
    #[test]
    fn nonzero_exit_is_extraction_failure() {
        let spec = CommandSpec::new(
            CommandProgram::Fixed("sh".to_string()),
            ["-c", "echo bad input >&2; exit 3"],
        )
        .unwrap();
        let mut instance = CommandDriver::driver_type("Broken", spec)
            .instantiate(calc_args(), DriverSettings::new());
        let failure = instance.extract().unwrap_err();
        assert_eq!(failure.kind(), "extraction");
        assert!(failure.to_string().contains("bad input"));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn deadline_kills_the_child() {
        let spec =
            CommandSpec::new(CommandProgram::Fixed("sleep".to_string()), ["{secs}"]).unwrap();
        let driver_type = CommandDriver::driver_type("Sleeper", spec)
            .with_timeout(Duration::from_millis(100));
        let args: ArgumentSet = [("secs", json!("28.13"))].into_iter().collect();
        let mut instance = driver_type.instantiate(args, DriverSettings::new());
        assert_eq!(
            instance.extract().unwrap_err(),
            &DriverFailure::TimedOut { limit_ms: 100 }
        );
        assert!(instance.elapsed().unwrap() < Duration::from_secs(5));

        let alive = std::fs::read_dir("/proc")
            .unwrap()
            .filter_map(|entry| std::fs::read(entry.ok()?.path().join("cmdline")).ok())
            .filter(|cmdline| cmdline.split(|b| *b == 0).any(|part| part == b"28.13"))
            .count();
        assert_eq!(alive, 0);
    }

    #[cfg(unix)]
    #[test]
    fn deadline_leaves_fast_commands_alone() {
        let spec = CommandSpec::new(
            CommandProgram::Fixed("sh".to_string()),
            ["-c", "echo $(({a} * 2))"],
        )
        .unwrap()
        .output(OutputFormat::Number);
        let driver_type =
            CommandDriver::driver_type("ShellDouble", spec).with_timeout(Duration::from_secs(5));
        let mut instance = driver_type.instantiate(calc_args(), DriverSettings::new());
        assert_eq!(instance.extract().unwrap().get("result"), Some(&json!(2.0)));
    }
}
