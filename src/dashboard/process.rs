use anyhow::{bail, Context, Result};
use std::collections::HashSet;
use std::process::{Child, Command, Stdio};
use sysinfo::{Pid, ProcessesToUpdate, Signal, System};

/// A command line split into program and arguments, with `{name}` placeholders
/// filled in per argument so substituted values never get re-split.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    args: Vec<String>,
}

/// Value of the placeholder `name`, if it is one of `vars`.
fn lookup<'a>(vars: &[(&str, &'a str)], name: &str) -> Option<&'a str> {
    vars.iter().find(|(n, _)| *n == name).map(|(_, v)| *v)
}

/// Fill the placeholders of one argument in a single left to right pass.
/// Substituted text is never scanned again and unknown placeholders stay as written.
fn substitute(arg: &str, vars: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(arg.len());
    let mut rest = arg;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let tail = &rest[open + 1..];
        let value = tail
            .find('}')
            .and_then(|close| lookup(vars, &tail[..close]).map(|v| (close, v)));
        match value {
            Some((close, value)) => {
                out.push_str(value);
                rest = &tail[close + 1..];
            }
            None => {
                out.push('{');
                rest = tail;
            }
        }
    }
    out.push_str(rest);
    out
}

impl CommandLine {
    pub fn parse(line: &str) -> Result<Self> {
        let args = shlex::split(line).with_context(|| format!("cannot parse command '{line}'"))?;
        if args.is_empty() {
            bail!("empty command");
        }
        Ok(Self { args })
    }

    pub fn program(&self) -> &str {
        &self.args[0]
    }

    /// Arguments after substitution. An argument that is exactly a placeholder
    /// with an empty value is dropped.
    pub fn render(&self, vars: &[(&str, &str)]) -> Result<Vec<String>> {
        let args: Vec<String> = self
            .args
            .iter()
            .filter(|arg| {
                let whole = arg.strip_prefix('{').and_then(|a| a.strip_suffix('}'));
                !whole.and_then(|name| lookup(vars, name)).is_some_and(str::is_empty)
            })
            .map(|arg| substitute(arg, vars))
            .collect();
        if args.first().map_or(true, String::is_empty) {
            bail!("command '{}' renders to no program", self.args.join(" "));
        }
        Ok(args)
    }

    pub fn command(&self, vars: &[(&str, &str)]) -> Result<Command> {
        let args = self.render(vars)?;
        let mut cmd = Command::new(&args[0]);
        cmd.args(&args[1..]);
        Ok(cmd)
    }

    /// Spawn detached from our stdin.
    pub fn spawn(&self, vars: &[(&str, &str)]) -> Result<Child> {
        self.command(vars)?
            .stdin(Stdio::null())
            .spawn()
            .with_context(|| format!("failed to start '{}'", self.program()))
    }
}

/// Start the command as the leader of its own process group so it and
/// everything it launches can be stopped together.
pub fn own_process_group(cmd: &mut Command) -> &mut Command {
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }
    cmd
}

/// Kill `child` and reap it. Already exited children are only reaped.
pub fn terminate(child: &mut Child) {
    match child.try_wait() {
        Ok(Some(_)) => return,
        Ok(None) => {}
        Err(e) => tracing::debug!(pid = child.id(), error = %e, "try_wait failed"),
    }
    if let Err(e) = child.kill() {
        tracing::debug!(pid = child.id(), error = %e, "kill failed");
    }
    if let Err(e) = child.wait() {
        tracing::debug!(pid = child.id(), error = %e, "wait failed");
    }
}

/// All live processes descending from `root`, not including it.
fn descendants(system: &System, root: Pid) -> Vec<Pid> {
    let mut found = Vec::new();
    let mut seen = HashSet::from([root]);
    let mut frontier = vec![root];
    while let Some(parent) = frontier.pop() {
        for (pid, process) in system.processes() {
            if process.parent() == Some(parent) && seen.insert(*pid) {
                found.push(*pid);
                frontier.push(*pid);
            }
        }
    }
    found
}

/// Like [`terminate`], but first signals every process started below `child`.
pub fn terminate_tree(child: &mut Child) {
    if !is_running(child) {
        terminate(child);
        return;
    }
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::All, true);
    for pid in descendants(&system, Pid::from_u32(child.id())) {
        if let Some(process) = system.process(pid) {
            let delivered = process.kill_with(Signal::Term).unwrap_or_else(|| process.kill());
            tracing::debug!(%pid, delivered, "stopping descendant process");
        }
    }
    terminate(child);
}

pub fn is_running(child: &mut Child) -> bool {
    matches!(child.try_wait(), Ok(None))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholders_fill_single_arguments() {
        let cmd = CommandLine::parse("mpv --title 'my player' {url}").unwrap();
        assert_eq!(
            cmd.render(&[("url", "http://x/a b")]).unwrap(),
            ["mpv", "--title", "my player", "http://x/a b"]
        );
    }

    #[test]
    fn empty_placeholder_argument_is_dropped() {
        let cmd = CommandLine::parse("pub {retain} -t {topic}").unwrap();
        assert_eq!(
            cmd.render(&[("retain", ""), ("topic", "a/b")]).unwrap(),
            ["pub", "-t", "a/b"]
        );
    }

    #[test]
    fn substituted_values_are_not_expanded_again() {
        let cmd = CommandLine::parse("pub -m {payload} {retain} x{topic}{unknown}").unwrap();
        let vars = [
            ("topic", "{retain}"),
            ("payload", "keep {retain} literal"),
            ("retain", "-r"),
        ];
        assert_eq!(
            cmd.render(&vars).unwrap(),
            ["pub", "-m", "keep {retain} literal", "-r", "x{retain}{unknown}"]
        );
    }

    #[test]
    fn command_that_renders_empty_is_an_error() {
        let cmd = CommandLine::parse("{cmd} {arg}").unwrap();
        assert!(cmd.render(&[("cmd", ""), ("arg", "x")]).is_err());
        assert!(cmd.command(&[("cmd", ""), ("arg", "")]).is_err());
        let quoted = CommandLine::parse("'' {arg}").unwrap();
        assert!(quoted.spawn(&[("arg", "x")]).is_err());
    }

    #[test]
    fn rejects_empty_and_unbalanced() {
        assert!(CommandLine::parse("").is_err());
        assert!(CommandLine::parse("echo 'oops").is_err());
    }

    #[cfg(unix)]
    #[test]
    fn tree_termination_reaches_grandchildren() {
        use std::io::{BufRead, BufReader};
        use std::time::{Duration, Instant};

        let mut cmd = Command::new("sh");
        cmd.args(["-c", "sleep 30 & echo $!; wait"]).stdout(Stdio::piped());
        let mut child = own_process_group(&mut cmd).spawn().unwrap();
        let mut line = String::new();
        BufReader::new(child.stdout.take().unwrap()).read_line(&mut line).unwrap();
        let grandchild = Pid::from_u32(line.trim().parse().unwrap());

        terminate_tree(&mut child);
        assert!(!is_running(&mut child));

        let deadline = Instant::now() + Duration::from_secs(5);
        let mut system = System::new();
        loop {
            system.refresh_processes(ProcessesToUpdate::Some(&[grandchild]), true);
            let alive = system
                .process(grandchild)
                .is_some_and(|p| p.status() != sysinfo::ProcessStatus::Zombie);
            if !alive {
                break;
            }
            assert!(Instant::now() < deadline, "grandchild {grandchild} still running");
            std::thread::sleep(Duration::from_millis(50));
        }
    }
}
