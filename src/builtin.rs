use crate::command::Syntax;
use crate::console::Color;
use crate::functions;
use crate::interpreter::Interpreter;
use crate::lexer::{ArgumentMap, argument_map, quote_argument, split_arguments};
use crate::module::{Language, ModuleError};
use anyhow::{Context, Result, bail};
use argh::{EarlyExit, FromArgs};

/// Built-in verbs known to the interpreter at compile time.
///
/// Verbs are parsed using the [`argh`] crate (`FromArgs`) from the
/// whitespace-separated words after the verb, and run in-process.
pub(crate) trait Verb: Sized + FromArgs + 'static {
    /// Accepted spellings; the first one is canonical.
    const NAMES: &'static [&'static str];

    fn execute(self, shell: &mut Interpreter) -> Result<()>;

    /// Runs the verb given the unsplit text after its name.
    ///
    /// Verbs that tokenize their own arguments override this.
    fn execute_line(self, shell: &mut Interpreter, _rest: &str) -> Result<()> {
        self.execute(shell)
    }
}

/// A verb line, or the usage text argh produced instead of parsing it.
pub(crate) enum VerbCall<T> {
    Parsed { verb: T, rest: String },
    InvalidArgs { output: String, is_error: bool },
}

impl<T: Verb> Syntax for VerbCall<T> {
    fn name() -> &'static str {
        T::NAMES[0]
    }

    fn parse(_shell: &Interpreter, line: &str) -> Option<Self> {
        let mut words = line.split_whitespace();
        let name = words.next()?;
        if !T::NAMES.contains(&name) {
            return None;
        }
        let args: Vec<&str> = words.collect();
        let rest = line
            .split_once(char::is_whitespace)
            .map_or("", |(_, rest)| rest.trim());
        Some(match T::from_args(&[name], &args) {
            Ok(verb) => VerbCall::Parsed {
                verb,
                rest: rest.to_string(),
            },
            Err(EarlyExit { output, status }) => VerbCall::InvalidArgs {
                output,
                is_error: status.is_err(),
            },
        })
    }

    fn execute(self, shell: &mut Interpreter) -> Result<()> {
        match self {
            VerbCall::Parsed { verb, rest } => verb.execute_line(shell, &rest),
            VerbCall::InvalidArgs { output, is_error } => {
                if is_error {
                    shell.console.error(output.trim_end());
                } else {
                    shell.console.line(output.trim_end());
                }
                Ok(())
            }
        }
    }
}

fn require_module(shell: &Interpreter) -> Result<String> {
    match &shell.session.current_module {
        Some(name) => Ok(name.clone()),
        None => bail!("No module selected. Use 'use <module>' first."),
    }
}

#[derive(FromArgs)]
/// Show the available commands and syntaxes.
pub struct Help {
    #[argh(positional, greedy, arg_name = "ignored")]
    /// ignored
    _rest: Vec<String>,
}

const HELP: &[(&str, &str)] = &[
    ("help | h | ?", "show this help"),
    ("list | ls | modules", "list available modules"),
    ("search <keyword>", "search modules by name, description or tag"),
    ("info [module]", "show module details"),
    ("use [module]", "select a module"),
    ("set <name> <value>", "set a variable for the selected module"),
    ("run [key=value ...]", "run the selected module"),
    ("create | new <name> [lang]", "scaffold a module (python, bash, go, ruby)"),
    ("edit <module>", "open a module in $EDITOR"),
    ("delete | rm <module>", "delete a module"),
    ("env | envs", "show ambient variables"),
    ("history", "show session history"),
    ("clear | cls", "clear the screen"),
    ("refresh | reload", "rediscover modules"),
    ("exit | quit | q", "leave"),
];

const SYNTAX_HELP: &[(&str, &str)] = &[
    ("<module> [key=value ...]", "run a module, else the line goes to the shell"),
    ("KEY=value | KEY=?", "set or show an ambient variable"),
    ("@name", "show a variable of the selected module"),
    ("! | <module>!", "module details"),
    ("$<command>", "run a shell command"),
    ("echo | print <text>", "print text"),
    ("a |> b() |> c", "pipe each stage's output into the next"),
    ("for x in 1..10 -> <cmd $x>", "loop over a range, list or $cat(\"file\")"),
    ("<command> > file", "redirect output of a one-shot run"),
    ("#sudo | #proxychains <cmd>", "re-run a command under a wrapper"),
];

impl Verb for Help {
    const NAMES: &'static [&'static str] = &["help", "h", "?"];

    fn execute(self, shell: &mut Interpreter) -> Result<()> {
        let console = &mut shell.console;
        for (title, entries) in [("Commands", HELP), ("Syntax", SYNTAX_HELP)] {
            let title = console.paint(Color::Yellow, title);
            console.blank();
            console.line(title);
            for (usage, text) in entries {
                console.line(format!("  {:<30} {}", usage, text));
            }
        }
        let names: Vec<_> = functions::names().collect();
        console.blank();
        console.line(format!("  Pipeline functions: {}", names.join(", ")));
        console.blank();
        Ok(())
    }
}

#[derive(FromArgs)]
/// List available modules.
pub struct List {
    #[argh(positional, greedy, arg_name = "ignored")]
    /// ignored
    _rest: Vec<String>,
}

impl Verb for List {
    const NAMES: &'static [&'static str] = &["list", "ls", "modules"];

    fn execute(self, shell: &mut Interpreter) -> Result<()> {
        let modules = shell.runtime.modules();
        if modules.is_empty() {
            shell.console.warning(format!(
                "No modules found in {}",
                shell.env.modules_dir.display()
            ));
            return Ok(());
        }
        shell
            .console
            .info(format!("Available modules ({}):", modules.len()));
        for (idx, module) in modules.iter().enumerate() {
            let name = shell.console.paint(Color::Cyan, format!("{:<20}", module.name));
            shell
                .console
                .line(format!("  [{:2}] {} {}", idx + 1, name, module.description()));
        }
        Ok(())
    }
}

#[derive(FromArgs)]
/// Search modules by name, description or tag.
pub struct Search {
    #[argh(positional)]
    /// word to look for (case-insensitive)
    pub keyword: String,

    #[argh(positional, greedy)]
    /// further words, joined to the keyword with spaces
    pub rest: Vec<String>,
}

impl Verb for Search {
    const NAMES: &'static [&'static str] = &["search"];

    fn execute(self, shell: &mut Interpreter) -> Result<()> {
        let mut keyword = self.keyword;
        for word in self.rest {
            keyword.push(' ');
            keyword.push_str(&word);
        }

        let found: Vec<_> = shell
            .runtime
            .modules()
            .into_iter()
            .filter(|m| m.matches(&keyword))
            .collect();
        if found.is_empty() {
            shell
                .console
                .warning(format!("No modules match '{}'", keyword));
            return Ok(());
        }
        shell
            .console
            .success(format!("Found {} module(s) matching '{}':", found.len(), keyword));
        for module in found {
            let name = shell.console.paint(Color::Cyan, &module.name);
            shell
                .console
                .line(format!("  {} - {}", name, module.description()));
        }
        Ok(())
    }
}

#[derive(FromArgs)]
/// Show module details.
pub struct Info {
    #[argh(positional)]
    /// module to describe; defaults to the selected one
    pub module: Option<String>,
}

impl Verb for Info {
    const NAMES: &'static [&'static str] = &["info"];

    fn execute(self, shell: &mut Interpreter) -> Result<()> {
        let name = match self.module {
            Some(name) => name,
            None => match &shell.session.current_module {
                Some(name) => name.clone(),
                None => bail!(
                    "Usage: info <module>  OR  select a module with 'use <module>' and run 'info'"
                ),
            },
        };
        shell.show_module_info(&name)
    }
}

#[derive(FromArgs)]
/// Select a module, or show the selection.
pub struct Use {
    #[argh(positional)]
    /// module to select
    pub module: Option<String>,
}

impl Verb for Use {
    const NAMES: &'static [&'static str] = &["use"];

    fn execute(self, shell: &mut Interpreter) -> Result<()> {
        let Some(name) = self.module else {
            match &shell.session.current_module {
                Some(current) => {
                    let current = shell.console.paint(Color::Cyan, current);
                    shell
                        .console
                        .info(format!("Currently using module: {}", current));
                }
                None => shell.console.info("No module currently selected."),
            }
            return Ok(());
        };

        if !shell.runtime.contains(&name) {
            bail!(
                "Module '{}' not found. Use 'list' to see available modules.",
                name
            );
        }
        let shown = shell.console.paint(Color::Cyan, &name);
        shell.console.success(format!("Using module: {}", shown));
        shell.session.current_module = Some(name);
        Ok(())
    }
}

#[derive(FromArgs)]
/// Set a variable for the selected module, or list them.
pub struct Set {
    #[argh(positional, greedy)]
    /// variable name followed by its value
    pub args: Vec<String>,
}

impl Verb for Set {
    const NAMES: &'static [&'static str] = &["set"];

    fn execute(self, shell: &mut Interpreter) -> Result<()> {
        let module = require_module(shell)?;

        let (key, value) = match self.args.as_slice() {
            [] => {
                let vars = &shell.session.module_vars;
                if vars.is_empty() {
                    shell
                        .console
                        .info(format!("No variables set for module '{}'.", module));
                    return Ok(());
                }
                let lines: Vec<String> = vars
                    .iter()
                    .map(|(k, v)| {
                        format!(
                            "  {} = {}",
                            shell.console.paint(Color::Cyan, k),
                            shell.console.paint(Color::Green, v)
                        )
                    })
                    .collect();
                shell
                    .console
                    .info(format!("Variables for module '{}':", module));
                for line in lines {
                    shell.console.line(line);
                }
                return Ok(());
            }
            [_] => bail!("Usage: set <name> <value>"),
            [key, value @ ..] => (key.clone(), value.join(" ")),
        };

        let shown = format!(
            "Set {} = {}",
            shell.console.paint(Color::Cyan, &key),
            shell.console.paint(Color::Green, &value)
        );
        shell.console.success(shown);
        shell.session.module_vars.insert(key, value);
        Ok(())
    }
}

#[derive(FromArgs)]
/// Run the selected module with its variables.
pub struct Run {
    #[argh(positional, greedy)]
    /// key=value overrides for this run
    pub args: Vec<String>,
}

impl Verb for Run {
    const NAMES: &'static [&'static str] = &["run"];

    fn execute(self, shell: &mut Interpreter) -> Result<()> {
        let rest = self.args.join(" ");
        self.execute_line(shell, &rest)
    }

    /// Overrides are tokenized like any argument list, so quoting and `$name`
    /// expansion apply before they are laid over the module variables.
    fn execute_line(self, shell: &mut Interpreter, rest: &str) -> Result<()> {
        let module = require_module(shell)?;
        let overrides = argument_map(&split_arguments(rest, &shell.env));
        let mut args: ArgumentMap = shell
            .session
            .module_vars
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        args.extend(overrides);
        shell.run_module(&module, args)
    }
}

#[derive(FromArgs)]
/// Scaffold a new module.
pub struct Create {
    #[argh(positional)]
    /// module name
    pub name: String,

    #[argh(positional, default = "String::from(\"python\")")]
    /// language: python, bash, go or ruby
    pub language: String,
}

impl Verb for Create {
    const NAMES: &'static [&'static str] = &["create", "new"];

    fn execute(self, shell: &mut Interpreter) -> Result<()> {
        let language: Language = self.language.parse()?;
        let entry = shell.runtime.create(&self.name, language)?;
        shell.console.success(format!(
            "Created {} module '{}' at {}",
            language.name(),
            self.name,
            entry.display()
        ));
        Ok(())
    }
}

#[derive(FromArgs)]
/// Open a module's entry script in $EDITOR.
pub struct Edit {
    #[argh(positional)]
    /// module to edit
    pub module: String,
}

impl Verb for Edit {
    const NAMES: &'static [&'static str] = &["edit"];

    fn execute(self, shell: &mut Interpreter) -> Result<()> {
        let entry = shell
            .runtime
            .module(&self.module)
            .map(|m| m.entry())
            .ok_or_else(|| ModuleError::NotFound(self.module.clone()))?;
        let editor = std::env::var("EDITOR").unwrap_or_else(|_| "vi".to_string());
        let command = format!("{} {}", editor, quote_argument(&entry.to_string_lossy()));
        shell
            .shell
            .run(&command)
            .with_context(|| format!("can't start editor {}", editor))?;
        Ok(())
    }
}

#[derive(FromArgs)]
/// Delete a module directory.
pub struct Delete {
    #[argh(positional)]
    /// module to delete
    pub module: String,
}

impl Verb for Delete {
    const NAMES: &'static [&'static str] = &["delete", "rm", "remove"];

    fn execute(self, shell: &mut Interpreter) -> Result<()> {
        shell.runtime.delete(&self.module)?;
        if shell.session.current_module.as_deref() == Some(self.module.as_str()) {
            shell.session.current_module = None;
            shell.session.module_vars.clear();
        }
        shell
            .console
            .success(format!("Deleted module '{}'", self.module));
        Ok(())
    }
}

#[derive(FromArgs)]
/// Show ambient variables.
pub struct Env {
    #[argh(positional, greedy, arg_name = "ignored")]
    /// ignored
    _rest: Vec<String>,
}

impl Verb for Env {
    const NAMES: &'static [&'static str] = &["env", "envs"];

    fn execute(self, shell: &mut Interpreter) -> Result<()> {
        let vars = shell.env.sorted_vars();
        if vars.is_empty() {
            shell.console.info("No environment variables set.");
            return Ok(());
        }
        shell.console.info("Environment variables:");
        for (key, value) in vars {
            let line = format!(
                "  {} = {}",
                shell.console.paint(Color::Cyan, key),
                shell.console.paint(Color::Green, value)
            );
            shell.console.line(line);
        }
        Ok(())
    }
}

#[derive(FromArgs)]
/// Show the commands entered in this session.
pub struct History {
    #[argh(positional, greedy, arg_name = "ignored")]
    /// ignored
    _rest: Vec<String>,
}

impl Verb for History {
    const NAMES: &'static [&'static str] = &["history"];

    fn execute(self, shell: &mut Interpreter) -> Result<()> {
        for (idx, line) in shell.session.history.iter().enumerate() {
            shell.console.line(format!("  {:3}  {}", idx + 1, line));
        }
        Ok(())
    }
}

#[derive(FromArgs)]
/// Clear the screen.
pub struct Clear {
    #[argh(positional, greedy, arg_name = "ignored")]
    /// ignored
    _rest: Vec<String>,
}

impl Verb for Clear {
    const NAMES: &'static [&'static str] = &["clear", "cls"];

    fn execute(self, shell: &mut Interpreter) -> Result<()> {
        shell.console.raw("\x1b[2J\x1b[H");
        Ok(())
    }
}

#[derive(FromArgs)]
/// Rediscover modules.
pub struct Refresh {
    #[argh(positional, greedy, arg_name = "ignored")]
    /// ignored
    _rest: Vec<String>,
}

impl Verb for Refresh {
    const NAMES: &'static [&'static str] = &["refresh", "reload"];

    fn execute(self, shell: &mut Interpreter) -> Result<()> {
        let count = shell.runtime.refresh()?;
        shell
            .console
            .success(format!("Modules refreshed: {} loaded", count));
        Ok(())
    }
}

#[derive(FromArgs)]
/// Leave the interpreter.
pub struct Exit {
    #[argh(positional, greedy, arg_name = "ignored")]
    /// ignored
    _rest: Vec<String>,
}

impl Verb for Exit {
    const NAMES: &'static [&'static str] = &["exit", "quit", "q"];

    fn execute(self, shell: &mut Interpreter) -> Result<()> {
        shell.env.should_exit = true;
        shell.console.blank();
        shell.console.success("Goodbye! See you next time.");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::interpreter::tests::Harness;

    #[test]
    fn test_use_and_info() {
        let mut h = Harness::new(&["geo", "scanner"]);
        assert_eq!(h.run("use"), "[*] No module currently selected.\n");
        assert_eq!(
            h.run("use ghost"),
            "[!] Module 'ghost' not found. Use 'list' to see available modules.\n"
        );
        assert_eq!(h.run("use geo"), "[+] Using module: geo\n");
        assert_eq!(h.run("use"), "[*] Currently using module: geo\n");
        assert!(h.run("info").starts_with("[*] Module: geo\n"));
        assert!(h.run("info scanner").starts_with("[*] Module: scanner\n"));
    }

    #[test]
    fn test_set_requires_selection_and_two_args() {
        let mut h = Harness::new(&["geo"]);
        assert_eq!(
            h.run("set ip 1.1.1.1"),
            "[!] No module selected. Use 'use <module>' first.\n"
        );
        h.run("use geo");
        assert_eq!(h.run("set ip"), "[!] Usage: set <name> <value>\n");
        assert_eq!(h.run("set"), "[*] No variables set for module 'geo'.\n");
        assert_eq!(h.run("set note hello   there"), "[+] Set note = hello there\n");
        assert_eq!(
            h.run("set"),
            "[*] Variables for module 'geo':\n  note = hello there\n"
        );
    }

    #[test]
    fn test_run_merges_module_vars_with_overrides() {
        let mut h = Harness::new(&["geo"]);
        h.run("use geo");
        h.run("set ip 1.1.1.1");
        h.run("set mode slow");
        h.run("run mode=fast");

        let calls = h.calls.borrow();
        let (name, args) = calls.last().unwrap();
        assert_eq!(name, "geo");
        assert_eq!(args.get("ip").map(String::as_str), Some("1.1.1.1"));
        assert_eq!(args.get("mode").map(String::as_str), Some("fast"));
    }

    #[test]
    fn test_run_overrides_are_tokenized() {
        let mut h = Harness::new(&["geo"]);
        h.run("IP=8.8.8.8");
        h.run("use geo");
        h.run("set mode slow");
        h.run(r#"run ip=$IP mode="very  fast", verbose"#);

        let calls = h.calls.borrow();
        let (_, args) = calls.last().unwrap();
        assert_eq!(args.get("ip").map(String::as_str), Some("8.8.8.8"));
        assert_eq!(args.get("mode").map(String::as_str), Some("very  fast"));
        assert_eq!(args.get("arg1").map(String::as_str), Some("verbose"));
    }

    #[test]
    fn test_plain_verbs_ignore_extra_words() {
        let mut h = Harness::new(&["geo"]);
        assert!(h.run("help modules").contains("Commands"));
        assert!(h.run("list all").starts_with("[*] Available modules (1):"));
        assert_eq!(h.run("env all"), "[*] No environment variables set.\n");
        assert_eq!(h.run("refresh now"), "[+] Modules refreshed: 1 loaded\n");
        assert_eq!(h.run("clear screen"), "\x1b[2J\x1b[H");
        assert!(h.run("history all").ends_with("  history all\n"));
    }

    #[test]
    fn test_search_needs_keyword() {
        let mut h = Harness::new(&["geo", "scanner"]);
        let out = h.run("search");
        assert!(out.starts_with("[!] Required positional arguments not provided:"));

        let out = h.run("search SCAN");
        assert_eq!(out, "[+] Found 1 module(s) matching 'SCAN':\n  scanner - \n");
    }

    #[test]
    fn test_list_modules() {
        let mut h = Harness::new(&[]);
        assert_eq!(h.run("ls"), "[~] No modules found in /opt/lmv/modules\n");

        let mut h = Harness::new(&["geo"]);
        let out = h.run("list");
        assert!(out.starts_with("[*] Available modules (1):\n  [ 1] geo"));
    }

    #[test]
    fn test_create_on_fake_runtime_is_unsupported() {
        let mut h = Harness::new(&[]);
        assert_eq!(
            h.run("create recon cobol"),
            "[!] unknown language 'cobol' (use python, bash, go or ruby)\n"
        );
        assert_eq!(
            h.run("new recon"),
            "[!] this runtime cannot create modules\n"
        );
    }

    #[test]
    fn test_edit_uses_shell_runner() {
        let mut h = Harness::new(&["geo"]);
        h.run("edit geo");
        let lines = h.shell_lines.borrow();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].ends_with(r#" "/modules/geo/main.sh""#));
    }

    #[test]
    fn test_env_history_and_exit() {
        let mut h = Harness::new(&[]);
        assert_eq!(h.run("env"), "[*] No environment variables set.\n");
        h.run("B=2");
        h.run("A=1");
        assert_eq!(h.run("envs"), "[*] Environment variables:\n  A = 1\n  B = 2\n");
        assert_eq!(
            h.run("history"),
            "    1  env\n    2  B=2\n    3  A=1\n    4  envs\n    5  history\n"
        );

        assert!(!h.shell.should_exit());
        assert_eq!(h.run("quit now"), "\n[+] Goodbye! See you next time.\n");
        assert!(h.shell.should_exit());
    }

    #[test]
    fn test_help_lists_functions() {
        let mut h = Harness::new(&[]);
        let out = h.run("?");
        assert!(out.contains("Commands"));
        assert!(out.contains("Pipeline functions: echo, cat, upper"));
    }
}
