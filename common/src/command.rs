use std::{
    fmt,
    future::Future,
    io::ErrorKind,
    process::{Output, Stdio},
    time::{Duration, Instant},
};

use console::{style, StyledObject};
use indicatif::{ProgressBar, ProgressStyle};
use tokio::{io::AsyncWriteExt, process::Command};

use crate::error::{Error, Result};

lazy_static::lazy_static! {
    static ref DOTS_STYLE: ProgressStyle = ProgressStyle::with_template("{spinner} {msg} {elapsed_precise}").unwrap().tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏");
    pub static ref GREEN_TICK: StyledObject<&'static str> = style("✔").green();
    static ref RED_CROSS: StyledObject<&'static str> = style("✗").red();
}

/// An external program invocation, optionally fed a document over stdin.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Cmd {
    program: String,
    args: Vec<String>,
    stdin: Option<String>,
    env: Vec<(String, String)>,
}

impl Cmd {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn get_args(&self) -> &[String] {
        &self.args
    }

    pub fn get_stdin(&self) -> Option<&str> {
        self.stdin.as_deref()
    }

    pub fn get_env(&self) -> &[(String, String)] {
        &self.env
    }
}

impl fmt::Display for Cmd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

pub fn progress(msg: &str) -> ProgressBar {
    let w = ProgressBar::new_spinner();
    w.set_style(DOTS_STYLE.clone());
    w.enable_steady_tick(Duration::from_millis(80));
    w.set_message(msg.to_owned());
    w
}

async fn spawn(cmd: &Cmd, capture: bool) -> Result<Output> {
    tracing::info!("{cmd}");
    let mut c = Command::new(&cmd.program);
    c.args(&cmd.args);
    for (k, v) in &cmd.env {
        c.env(k, v);
    }

    c.stdin(if cmd.stdin.is_some() {
        Stdio::piped()
    } else {
        Stdio::null()
    });
    if capture {
        c.stdout(Stdio::piped()).stderr(Stdio::piped());
    }

    let mut child = c.spawn().map_err(|err| Error::Command {
        command: cmd.to_string(),
        output: err.to_string(),
    })?;

    if let (Some(input), Some(mut stdin)) = (&cmd.stdin, child.stdin.take()) {
        match stdin.write_all(input.as_bytes()).await {
            Ok(()) => {}
            // exited without reading everything; the exit status tells the rest
            Err(err) if err.kind() == ErrorKind::BrokenPipe => {
                tracing::debug!("{} closed stdin early", cmd.program);
            }
            Err(err) => return Err(err.into()),
        }
    }

    Ok(child.wait_with_output().await?)
}

fn diagnostics(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let stdout = String::from_utf8_lossy(&output.stdout);
    let text = [stderr.trim(), stdout.trim()]
        .into_iter()
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("\n");

    match (text.is_empty(), output.status.code()) {
        (true, Some(code)) => format!("exited with status {code}"),
        (true, None) => "terminated by signal".to_owned(),
        (false, _) => text,
    }
}

/// Run a command as a user-visible step.
///
/// `msgs` is (ongoing, failure, success). Without `verbose` the child's output is captured and
/// only surfaced through the returned error; with it the output streams to the terminal.
pub async fn command(cmd: &Cmd, verbose: bool, msgs: [&str; 3], context: &str) -> Result<()> {
    step(verbose, msgs, context, async {
        let output = spawn(cmd, !verbose).await?;
        if !output.status.success() {
            return Err(Error::Command {
                command: cmd.to_string(),
                output: diagnostics(&output),
            });
        }
        Ok(())
    })
    .await
}

/// Run a command quietly and return its stdout.
pub async fn command_output(cmd: &Cmd) -> Result<String> {
    let output = spawn(cmd, true).await?;
    if !output.status.success() {
        return Err(Error::Command {
            command: cmd.to_string(),
            output: diagnostics(&output),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Run a command quietly and report whether it exited successfully.
pub async fn command_succeeds(cmd: &Cmd) -> Result<bool> {
    Ok(spawn(cmd, true).await?.status.success())
}

/// Wrap any fallible stage in the same spinner and tick reporting used for commands.
pub async fn step<T, F>(verbose: bool, msgs: [&str; 3], context: &str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    let pb = (!verbose).then(|| progress(msgs[0]));
    let start_time = Instant::now();
    match fut.await {
        Ok(value) => {
            finish_progress(msgs[2], context, start_time.elapsed(), pb);
            Ok(value)
        }
        Err(err) => {
            fail_progress(msgs[1], context, pb);
            Err(err)
        }
    }
}

fn elapsed_time_str(dur: &Duration) -> String {
    let seconds = dur.as_secs() % 60;
    let minutes = (dur.as_secs() / 60) % 60;
    let hours = (dur.as_secs() / 60) / 60;
    format!("{:0>2}:{:0>2}:{:0>2}", hours, minutes, seconds)
}

pub fn finish_progress(
    status_message: &str,
    context: &str,
    dur: Duration,
    pb: Option<ProgressBar>,
) {
    if let Some(pb) = pb {
        pb.finish_and_clear();
    }

    println!(
        "{} {} ({}) took, {}",
        *GREEN_TICK,
        status_message,
        context,
        elapsed_time_str(&dur)
    );
}

fn fail_progress(status_message: &str, context: &str, pb: Option<ProgressBar>) {
    if let Some(pb) = pb {
        pb.finish_and_clear();
    }
    eprintln!("{} {} ({})", *RED_CROSS, status_message, context);
}
