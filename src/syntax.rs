//! Line syntaxes other than the built-in verbs.
//!
//! Each type recognizes one shape of input line. They are tried in the order
//! given by [`crate::Interpreter::default_rules`].

use crate::command::Syntax;
use crate::console::Color;
use crate::interpreter::Interpreter;
use crate::lexer::{argument_map, quote_argument, split_arguments};
use crate::loops::{ForLoop, LOOP_USAGE, LoopError};
use crate::parser::{PIPE_MARKER, looks_like_loop};
use crate::pipeline::Pipeline;
use anyhow::{Result, bail};
use regex::Regex;
use std::sync::LazyLock;
use tracing::debug;

static MODULE_OVERRIDE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s*#mod=(\S+)").expect("module override regex"));

/// Path of the running interpreter, used to re-launch it in one-shot mode.
fn self_exe() -> String {
    std::env::current_exe()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|_| env!("CARGO_PKG_NAME").to_string())
}

/// `for <var> [in] <source> -> <template>`
pub struct LoopLine(String);

impl Syntax for LoopLine {
    fn name() -> &'static str {
        "loop"
    }

    fn parse(_shell: &Interpreter, line: &str) -> Option<Self> {
        looks_like_loop(line).then(|| LoopLine(line.to_string()))
    }

    fn execute(self, shell: &mut Interpreter) -> Result<()> {
        let looped = match ForLoop::parse(&self.0) {
            Ok(looped) => looped,
            Err(e @ LoopError::Syntax(_)) => {
                shell.console.error(&e);
                shell.console.line(LOOP_USAGE);
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };
        looped.run(shell)?;
        Ok(())
    }
}

/// `#sudo <cmd>` / `#proxychains <cmd>`, optionally with `#mod=<dir>`.
pub struct Privileged {
    prefix: &'static str,
    command: String,
}

impl Privileged {
    const PREFIXES: [(&'static str, &'static str); 2] =
        [("#sudo", "sudo"), ("#proxychains", "proxychains")];

    /// Builds the command line that re-runs `command` under the prefix.
    fn wrapper(&self, default_modules: &str) -> Result<String> {
        if self.command.is_empty() {
            bail!("Missing command after {}", self.prefix);
        }

        let (modules, command) = match MODULE_OVERRIDE.captures(&self.command) {
            Some(caps) => (
                caps[1].to_string(),
                MODULE_OVERRIDE.replace_all(&self.command, "").trim().to_string(),
            ),
            None => (default_modules.to_string(), self.command.clone()),
        };
        if command.is_empty() {
            bail!("Command is empty after removing #mod");
        }

        Ok(format!(
            "{} {} --modules {} --idle-exec --idle-cmd {}",
            self.prefix,
            self_exe(),
            quote_argument(&modules),
            quote_argument(&command)
        ))
    }
}

impl Syntax for Privileged {
    fn name() -> &'static str {
        "privileged"
    }

    fn parse(_shell: &Interpreter, line: &str) -> Option<Self> {
        let (first, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
        Self::PREFIXES
            .iter()
            .find(|(marker, _)| *marker == first)
            .map(|(_, prefix)| Privileged {
                prefix: *prefix,
                command: rest.trim().to_string(),
            })
    }

    fn execute(self, shell: &mut Interpreter) -> Result<()> {
        let modules = shell.env.modules_dir.display().to_string();
        let wrapper = self.wrapper(&modules)?;
        shell.console.info("Executing in background/idle mode:");
        shell.console.line(format!("  → {}", wrapper));
        shell.console.blank();
        shell.shell.run(&wrapper)?;
        Ok(())
    }
}

/// `<command> > <file>` / `<command> >> <file>`
pub struct Redirect {
    command: String,
    /// The operator and target, still unsplit (`>> out.txt`).
    redirection: String,
}

impl Redirect {
    fn applies(line: &str) -> bool {
        line.contains(" > ")
            || line.contains(" >> ")
            || (line.ends_with('>') && !line.ends_with("->"))
            || line.ends_with(">>")
    }
}

impl Syntax for Redirect {
    fn name() -> &'static str {
        "redirect"
    }

    fn parse(_shell: &Interpreter, line: &str) -> Option<Self> {
        if !Self::applies(line) {
            return None;
        }
        let pos = line.rfind(">>").or_else(|| line.rfind('>'))?;
        if pos == 0 {
            return None;
        }
        Some(Redirect {
            command: line[..pos].trim().to_string(),
            redirection: line[pos..].trim().to_string(),
        })
    }

    fn execute(self, shell: &mut Interpreter) -> Result<()> {
        let fields: Vec<&str> = self.redirection.split_whitespace().collect();
        let [op, target @ ..] = fields.as_slice() else {
            bail!("Redirection syntax: command > file  or  command >> file");
        };
        let target = target.join(" ");
        let target = target.trim_matches(|c| c == '"' || c == '\'');
        if target.is_empty() || self.command.is_empty() {
            bail!("Redirection syntax: command > file  or  command >> file");
        }

        let wrapper = format!(
            "{} --modules {} --idle-exec --idle-cmd {} {} {}",
            self_exe(),
            quote_argument(&shell.env.modules_dir.display().to_string()),
            quote_argument(&self.command),
            op,
            quote_argument(target)
        );
        shell.console.info("Redirecting output via idle/background executor...");
        shell.console.line(format!("  → {}", wrapper));
        shell.console.blank();
        shell.shell.run(&wrapper)?;
        Ok(())
    }
}

/// `stage |> stage |> ...`
pub struct PipelineLine(String);

impl Syntax for PipelineLine {
    fn name() -> &'static str {
        "pipeline"
    }

    fn parse(_shell: &Interpreter, line: &str) -> Option<Self> {
        line.contains(PIPE_MARKER)
            .then(|| PipelineLine(line.to_string()))
    }

    fn execute(self, shell: &mut Interpreter) -> Result<()> {
        Pipeline::new(&shell.env, shell.runtime.as_ref(), &mut shell.console).run(&self.0)?;
        Ok(())
    }
}

/// `echo <text>` / `print <text>`: prints the text verbatim.
pub struct PrintLine(String);

impl Syntax for PrintLine {
    fn name() -> &'static str {
        "print"
    }

    fn parse(_shell: &Interpreter, line: &str) -> Option<Self> {
        let (first, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
        matches!(first, "echo" | "print").then(|| PrintLine(rest.trim().to_string()))
    }

    fn execute(self, shell: &mut Interpreter) -> Result<()> {
        shell.console.line(self.0);
        Ok(())
    }
}

/// `KEY=value` sets an ambient variable; `KEY=?` shows it.
pub struct Assignment {
    key: String,
    value: String,
}

impl Syntax for Assignment {
    fn name() -> &'static str {
        "assignment"
    }

    fn parse(_shell: &Interpreter, line: &str) -> Option<Self> {
        if line.contains(char::is_whitespace) {
            return None;
        }
        let (key, value) = line.split_once('=')?;
        Some(Assignment {
            key: key.to_string(),
            value: value.to_string(),
        })
    }

    fn execute(self, shell: &mut Interpreter) -> Result<()> {
        if self.value == "?" {
            match shell.env.get(&self.key) {
                Some(value) => {
                    let line = format!(
                        "  {} = {}",
                        shell.console.paint(Color::Cyan, &self.key),
                        shell.console.paint(Color::Green, value)
                    );
                    shell.console.line(line);
                }
                None => shell
                    .console
                    .warning(format!("Variable '{}' not set", self.key)),
            }
            return Ok(());
        }

        shell.env.set_var(&self.key, &self.value)?;
        shell
            .console
            .success(format!("Set {} = {}", self.key, self.value));
        Ok(())
    }
}

/// `$<command>`: hands the rest of the line to the native shell.
pub struct ShellEscape(String);

impl Syntax for ShellEscape {
    fn name() -> &'static str {
        "shell"
    }

    fn parse(_shell: &Interpreter, line: &str) -> Option<Self> {
        line.strip_prefix('$')
            .map(|rest| ShellEscape(rest.trim().to_string()))
    }

    fn execute(self, shell: &mut Interpreter) -> Result<()> {
        if self.0.is_empty() {
            bail!("Usage: $<command>");
        }
        let code = shell.shell.run(&self.0)?;
        debug!(code, "shell command finished");
        Ok(())
    }
}

/// `@name`: prints a variable set with `set` for the selected module.
pub struct ModuleVariable(String);

impl Syntax for ModuleVariable {
    fn name() -> &'static str {
        "module-variable"
    }

    fn parse(_shell: &Interpreter, line: &str) -> Option<Self> {
        line.strip_prefix('@')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(|name| ModuleVariable(name.to_string()))
    }

    fn execute(self, shell: &mut Interpreter) -> Result<()> {
        if shell.session.current_module.is_none() {
            bail!("No module selected. Use 'use <module>' first.");
        }
        match shell.session.module_vars.get(&self.0) {
            Some(value) => {
                let value = value.clone();
                shell.console.line(value);
            }
            None => shell.console.warning(format!(
                "Variable '@{}' not set for current module.",
                self.0
            )),
        }
        Ok(())
    }
}

/// `!` shows the selected module; `name!` shows `name`.
pub struct InfoShortcut(Option<String>);

impl Syntax for InfoShortcut {
    fn name() -> &'static str {
        "info-shortcut"
    }

    fn parse(_shell: &Interpreter, line: &str) -> Option<Self> {
        let first = line.split_whitespace().next()?;
        if first == "!" {
            return Some(InfoShortcut(None));
        }
        first
            .strip_suffix('!')
            .filter(|name| !name.is_empty())
            .map(|name| InfoShortcut(Some(name.to_string())))
    }

    fn execute(self, shell: &mut Interpreter) -> Result<()> {
        let name = match self.0 {
            Some(name) => name,
            None => match &shell.session.current_module {
                Some(name) => name.clone(),
                None => bail!("No active module selected. Use 'use <module>' first."),
            },
        };
        shell.show_module_info(&name)
    }
}

/// Anything else: a module invocation if the first word names a module,
/// otherwise a native shell command.
pub struct Fallback(String);

impl Syntax for Fallback {
    fn name() -> &'static str {
        "fallback"
    }

    fn parse(_shell: &Interpreter, line: &str) -> Option<Self> {
        Some(Fallback(line.to_string()))
    }

    fn execute(self, shell: &mut Interpreter) -> Result<()> {
        let (name, rest) = self
            .0
            .split_once(char::is_whitespace)
            .unwrap_or((self.0.as_str(), ""));
        if shell.runtime.contains(name) {
            let args = argument_map(&split_arguments(rest, &shell.env));
            return shell.run_module(name, args);
        }
        let code = shell.shell.run(&self.0)?;
        debug!(code, line = self.0, "shell fallback finished");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::interpreter::tests::Harness;

    #[test]
    fn test_print_and_assignment() {
        let mut h = Harness::new(&[]);
        assert_eq!(h.run("echo   hello  world "), "hello  world\n");
        assert_eq!(h.run("print"), "\n");
        assert_eq!(h.run("TARGET=10.0.0.1"), "[+] Set TARGET = 10.0.0.1\n");
        assert_eq!(h.shell.env().get("TARGET"), Some("10.0.0.1"));
        assert_eq!(h.run("TARGET=?"), "  TARGET = 10.0.0.1\n");
        assert_eq!(h.run("OTHER=?"), "[~] Variable 'OTHER' not set\n");
        assert_eq!(h.run("1BAD=x"), "[!] invalid variable name '1BAD'\n");
    }

    #[test]
    fn test_shell_escape() {
        let mut h = Harness::new(&[]);
        h.run("$ ls -la | head");
        assert_eq!(*h.shell_lines.borrow(), vec!["ls -la | head"]);
        assert_eq!(h.run("$"), "[!] Usage: $<command>\n");
    }

    #[test]
    fn test_privileged_wrapper_strips_module_override() {
        let mut h = Harness::new(&[]);
        let out = h.run("#sudo scanner target=1 #mod=/srv/mods");

        let lines = h.shell_lines.borrow();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("sudo "));
        assert!(lines[0].ends_with(
            r#" --modules "/srv/mods" --idle-exec --idle-cmd "scanner target=1""#
        ));
        assert!(out.starts_with("[*] Executing in background/idle mode:\n  → sudo "));
    }

    #[test]
    fn test_privileged_wrapper_defaults_and_errors() {
        let mut h = Harness::new(&[]);
        h.run("#proxychains whois example.com");
        assert!(h.shell_lines.borrow()[0].ends_with(
            r#" --modules "/opt/lmv/modules" --idle-exec --idle-cmd "whois example.com""#
        ));

        assert_eq!(h.run("#sudo"), "[!] Missing command after sudo\n");
        assert_eq!(
            h.run("#sudo #mod=/x"),
            "[!] Command is empty after removing #mod\n"
        );
        assert_eq!(h.shell_lines.borrow().len(), 1);
    }

    #[test]
    fn test_redirect_wraps_command() {
        let mut h = Harness::new(&[]);
        h.run("scanner target=1 >> 'scan results.txt'");

        let lines = h.shell_lines.borrow();
        assert!(lines[0].ends_with(
            r#" --idle-exec --idle-cmd "scanner target=1" >> "scan results.txt""#
        ));
    }

    #[test]
    fn test_redirect_without_target_is_usage_error() {
        let mut h = Harness::new(&[]);
        assert_eq!(
            h.run("scanner >"),
            "[!] Redirection syntax: command > file  or  command >> file\n"
        );
        assert!(h.shell_lines.borrow().is_empty());
    }

    #[test]
    fn test_module_variable_requires_selection() {
        let mut h = Harness::new(&["geo"]);
        assert_eq!(
            h.run("@ip"),
            "[!] No module selected. Use 'use <module>' first.\n"
        );
        h.run("use geo");
        h.run("set ip 8.8.8.8");
        assert_eq!(h.run("@ip"), "8.8.8.8\n");
        assert_eq!(
            h.run("@port"),
            "[~] Variable '@port' not set for current module.\n"
        );
    }

    #[test]
    fn test_info_shortcuts() {
        let mut h = Harness::new(&["geo"]);
        assert!(h.run("geo!").starts_with("[*] Module: geo\n  Language:    bash\n"));
        assert_eq!(
            h.run("!"),
            "[!] No active module selected. Use 'use <module>' first.\n"
        );
        assert_eq!(h.run("ghost!"), "[!] module 'ghost' not found\n");
    }
}
