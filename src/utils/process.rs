use std::{
    fmt,
    process::{Command, Output, Stdio},
};

use anyhow::{Context, Result, bail};

#[derive(Clone, Debug)]
pub struct CmdSpec {
    program: String,
    args: Vec<String>,
    /// Environment entries; values never appear in rendered command lines.
    secrets: Vec<(String, String)>,
}

impl CmdSpec {
    #[must_use]
    pub fn new<S: Into<String>>(program: S) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            secrets: Vec::new(),
        }
    }

    /// Builds a command from an argv vector as found in the configuration.
    pub fn from_argv(argv: &[String]) -> Result<Self> {
        let Some((program, args)) = argv.split_first() else {
            bail!("empty command");
        };
        Ok(Self::new(program.as_str()).args(args.iter().cloned()))
    }

    #[must_use]
    pub fn arg(mut self, a: impl Into<String>) -> Self {
        self.args.push(a.into());
        self
    }

    #[must_use]
    pub fn args<I, S>(mut self, it: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(it.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn secret_env(mut self, k: impl Into<String>, v: impl Into<String>) -> Self {
        self.secrets.push((k.into(), v.into()));
        self
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        for (k, _) in &self.secrets {
            out.push_str(&format!("{k}=<redacted> "));
        }
        out.push_str(&sh_quote(&self.program));
        for a in &self.args {
            out.push(' ');
            out.push_str(&sh_quote(a));
        }
        out
    }

    fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        for (k, v) in &self.secrets {
            cmd.env(k, v);
        }
        cmd.stdin(Stdio::null());
        cmd
    }
}

/// Captured result of one finished command.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CmdOutput {
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CmdOutput {
    #[inline]
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }
}

impl From<Output> for CmdOutput {
    fn from(out: Output) -> Self {
        Self {
            code: out.status.code(),
            stdout: String::from_utf8_lossy(&out.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&out.stderr).into_owned(),
        }
    }
}

impl fmt::Display for CmdOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(c) => write!(f, "exit status {c}"),
            None => write!(f, "terminated by signal"),
        }
    }
}

pub trait Runner: Send + Sync {
    /// Runs `cmd` to completion and captures its output. Only spawn and wait
    /// failures are errors; a non-zero exit is reported in [`CmdOutput`].
    fn output(&self, cmd: &CmdSpec) -> Result<CmdOutput>;

    /// Runs `cmd` and returns its stdout, failing on a non-zero exit.
    fn run_capture(&self, cmd: &CmdSpec) -> Result<String> {
        let out = self.output(cmd)?;
        if out.success() {
            Ok(out.stdout)
        } else {
            bail!(
                "command failed: {} ({out}): {}",
                cmd.render(),
                out.stderr.trim()
            );
        }
    }
}

#[derive(Default, Clone)]
pub struct ProcessRunner;

impl ProcessRunner {
    pub fn new() -> Self {
        Self
    }
}

impl Runner for ProcessRunner {
    fn output(&self, cmd: &CmdSpec) -> Result<CmdOutput> {
        tracing::debug!("exec: {}", cmd.render());
        let out = cmd
            .to_command()
            .output()
            .with_context(|| format!("run {}", cmd.render()))?;
        Ok(out.into())
    }
}

/// Replaces every `{key}` occurrence in each argument.
pub fn substitute(argv: &[String], key: &str, value: &str) -> Vec<String> {
    let token = format!("{{{key}}}");
    argv.iter().map(|a| a.replace(&token, value)).collect()
}

fn sh_quote(s: &str) -> String {
    if s.is_empty() {
        return "''".into();
    }
    if !s
        .bytes()
        .any(|b| b == b' ' || b == b'\'' || b == b'"' || b == b'\\')
    {
        return s.to_string();
    }
    let mut out = String::from("'");
    for c in s.chars() {
        if c == '\'' {
            out.push_str("'\\''");
        } else {
            out.push(c);
        }
    }
    out.push('\'');
    out
}

#[cfg(test)]
pub(crate) mod testing {
    use std::{collections::VecDeque, sync::Mutex};

    use super::*;

    /// Records every command and answers from a queue of canned outputs;
    /// once the queue is empty every command succeeds with empty output.
    #[derive(Default)]
    pub struct FakeRunner {
        pub calls: Mutex<Vec<CmdSpec>>,
        replies: Mutex<VecDeque<CmdOutput>>,
    }

    impl FakeRunner {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn reply(self, out: CmdOutput) -> Self {
            self.replies.lock().unwrap().push_back(out);
            self
        }

        pub fn rendered(&self) -> Vec<String> {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .map(CmdSpec::render)
                .collect()
        }
    }

    impl Runner for FakeRunner {
        fn output(&self, cmd: &CmdSpec) -> Result<CmdOutput> {
            self.calls.lock().unwrap().push(cmd.clone());
            Ok(self
                .replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| CmdOutput::ok("")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sh_quote_empty() {
        assert_eq!(sh_quote(""), "''");
    }

    #[test]
    fn sh_quote_with_single_quote() {
        assert_eq!(sh_quote("don't"), "'don'\\''t'");
    }

    #[test]
    fn render_redacts_secrets() {
        let cmd = CmdSpec::new("ontap-zapi")
            .secret_env("ONTAP_PASSWORD", "hunter2")
            .args(["lun-list", "--path", "/vol/*/a b"]);
        assert_eq!(
            cmd.render(),
            "ONTAP_PASSWORD=<redacted> ontap-zapi lun-list --path '/vol/*/a b'"
        );
    }

    #[test]
    fn from_argv_rejects_empty() {
        assert!(CmdSpec::from_argv(&[]).is_err());
        let cmd = CmdSpec::from_argv(&["iscsiadm".into(), "-m".into(), "session".into()]).unwrap();
        assert_eq!(cmd.render(), "iscsiadm -m session");
    }

    #[test]
    fn substitute_all_occurrences() {
        let argv = vec!["-n".to_string(), "{node}".to_string(), "x{node}y".to_string()];
        assert_eq!(substitute(&argv, "node", "n1"), ["-n", "n1", "xn1y"]);
    }

    #[cfg(unix)]
    #[test]
    fn process_runner_reports_exit_codes() {
        let r = ProcessRunner::new();
        let ok = r
            .output(&CmdSpec::new("sh").args(["-c", "echo hi; echo err >&2"]))
            .unwrap();
        assert!(ok.success());
        assert_eq!(ok.stdout, "hi\n");
        assert_eq!(ok.stderr, "err\n");

        let bad = r.output(&CmdSpec::new("sh").args(["-c", "exit 3"])).unwrap();
        assert_eq!(bad.code, Some(3));
        assert!(r.run_capture(&CmdSpec::new("false")).is_err());
    }
}
