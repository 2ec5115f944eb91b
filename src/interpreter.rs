use crate::command::{Action, Syntax, SyntaxRule};
use crate::console::{Color, Console};
use crate::env::Environment;
use crate::external::ShellRunner;
use crate::lexer::ArgumentMap;
use crate::loops::LoopBody;
use crate::module::{ModuleError, ModuleRuntime};
use crate::pipeline::{Pipeline, merge_ambient};
use anyhow::{Result, bail};
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use std::collections::BTreeMap;
use std::marker::PhantomData;
use tracing::{debug, warn};

/// Rule allows turning any [`Syntax`] into an entry of the classification table.
pub(crate) struct Rule<T> {
    _phantom: PhantomData<T>,
}

impl<T> Default for Rule<T> {
    fn default() -> Self {
        Self {
            _phantom: PhantomData,
        }
    }
}

impl<T: Syntax> SyntaxRule for Rule<T> {
    fn name(&self) -> &'static str {
        T::name()
    }

    fn try_create(&self, shell: &Interpreter, line: &str) -> Option<Box<dyn Action>> {
        T::parse(shell, line).map(|syntax| Box::new(syntax) as Box<dyn Action>)
    }
}

/// Per-session state that is not part of the ambient variable store.
#[derive(Debug, Default)]
pub struct Session {
    pub history: Vec<String>,
    pub current_module: Option<String>,
    /// Variables set with `set`, applied by `run` to the selected module.
    pub module_vars: BTreeMap<String, String>,
}

/// The interactive command interpreter.
///
/// Each input line is offered to an ordered table of [`SyntaxRule`]s; the first
/// rule that recognizes the line executes it. See [`Interpreter::default_rules`]
/// for the table.
pub struct Interpreter {
    pub(crate) env: Environment,
    pub(crate) runtime: Box<dyn ModuleRuntime>,
    pub(crate) shell: Box<dyn ShellRunner>,
    pub(crate) console: Console,
    pub(crate) session: Session,
    rules: Vec<Box<dyn SyntaxRule>>,
}

impl Interpreter {
    /// Create an interpreter with the default classification table.
    pub fn new(
        env: Environment,
        runtime: Box<dyn ModuleRuntime>,
        shell: Box<dyn ShellRunner>,
        console: Console,
    ) -> Self {
        Self {
            env,
            runtime,
            shell,
            console,
            session: Session::default(),
            rules: Self::default_rules(),
        }
    }

    /// The classification table, highest priority first.
    pub fn default_rules() -> Vec<Box<dyn SyntaxRule>> {
        use crate::builtin::*;
        use crate::syntax::*;
        vec![
            Box::new(Rule::<LoopLine>::default()),
            Box::new(Rule::<Privileged>::default()),
            Box::new(Rule::<Redirect>::default()),
            Box::new(Rule::<PipelineLine>::default()),
            Box::new(Rule::<PrintLine>::default()),
            Box::new(Rule::<Assignment>::default()),
            Box::new(Rule::<ShellEscape>::default()),
            Box::new(Rule::<ModuleVariable>::default()),
            Box::new(Rule::<VerbCall<Help>>::default()),
            Box::new(Rule::<VerbCall<List>>::default()),
            Box::new(Rule::<VerbCall<Search>>::default()),
            Box::new(Rule::<VerbCall<Info>>::default()),
            Box::new(Rule::<VerbCall<Use>>::default()),
            Box::new(Rule::<VerbCall<Set>>::default()),
            Box::new(Rule::<VerbCall<Run>>::default()),
            Box::new(Rule::<VerbCall<Create>>::default()),
            Box::new(Rule::<VerbCall<Edit>>::default()),
            Box::new(Rule::<VerbCall<Delete>>::default()),
            Box::new(Rule::<VerbCall<Env>>::default()),
            Box::new(Rule::<VerbCall<History>>::default()),
            Box::new(Rule::<VerbCall<Clear>>::default()),
            Box::new(Rule::<VerbCall<Refresh>>::default()),
            Box::new(Rule::<VerbCall<Exit>>::default()),
            Box::new(Rule::<InfoShortcut>::default()),
            Box::new(Rule::<Fallback>::default()),
        ]
    }

    pub fn env(&self) -> &Environment {
        &self.env
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn should_exit(&self) -> bool {
        self.env.should_exit
    }

    /// Finds the first rule that recognizes `line`.
    pub fn classify(&self, line: &str) -> Option<(&'static str, Box<dyn Action>)> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        self.rules
            .iter()
            .find_map(|rule| rule.try_create(self, line).map(|action| (rule.name(), action)))
    }

    /// Records `line` in the session history and runs it.
    pub fn execute_command(&mut self, line: &str) {
        let line = line.trim();
        if line.is_empty() {
            return;
        }
        self.session.history.push(line.to_string());
        self.dispatch_line(line);
    }

    /// Runs one line. Errors are reported to the user, never propagated.
    fn dispatch_line(&mut self, line: &str) {
        let Some((rule, action)) = self.classify(line) else {
            return;
        };
        debug!(rule, line, "classified");
        if let Err(e) = action.execute(self) {
            self.console.error(format!("{:#}", e));
        }
    }

    /// Invokes a module with ambient variables merged under `args`, printing its output.
    pub(crate) fn run_module(&mut self, name: &str, mut args: ArgumentMap) -> Result<()> {
        merge_ambient(&mut args, &self.env);
        let shown = self.console.paint(Color::Cyan, name);
        self.console.info(format!("Running module: {}", shown));

        match self.runtime.invoke(name, &args) {
            Ok(result) => {
                self.print_output(&result.output);
                Ok(())
            }
            Err(ModuleError::Failed { name, code, output }) => {
                self.print_output(&output);
                bail!("Module '{}' exited with status {}", name, code)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn print_output(&mut self, output: &str) {
        if output.is_empty() {
            return;
        }
        self.console.raw(output);
        if !output.ends_with('\n') {
            self.console.blank();
        }
    }

    /// Prints the details of a module.
    pub(crate) fn show_module_info(&mut self, name: &str) -> Result<()> {
        let Some(module) = self.runtime.module(name) else {
            bail!(ModuleError::NotFound(name.to_string()));
        };
        let manifest = &module.manifest;
        let mut lines = vec![
            format!("  Language:    {}", module.language.name()),
            format!("  Path:        {}", module.dir.display()),
            format!("  Description: {}", module.description()),
        ];
        if let Some(author) = &manifest.author {
            lines.push(format!("  Author:      {}", author));
        }
        if let Some(version) = &manifest.version {
            lines.push(format!("  Version:     {}", version));
        }
        if !manifest.tags.is_empty() {
            lines.push(format!("  Tags:        {}", manifest.tags.join(", ")));
        }

        let title = self.console.paint(Color::Cyan, &module.name);
        self.console.info(format!("Module: {}", title));
        for line in lines {
            self.console.line(line);
        }
        Ok(())
    }

    pub fn banner(&mut self) {
        let title = self.console.paint(
            Color::Cyan,
            format!("lanmanvan {} - modular tool runner", env!("CARGO_PKG_VERSION")),
        );
        let count = self.runtime.modules().len();
        self.console.blank();
        self.console.line(title);
        self.console.info(format!(
            "{} module(s) in {}",
            count,
            self.env.modules_dir.display()
        ));
        self.console.info("Type 'help' to list commands.");
        self.console.blank();
    }

    fn prompt(&self) -> String {
        match &self.session.current_module {
            Some(module) => format!("lmv({}) ❯ ", self.console.paint(Color::Cyan, module)),
            None => "lmv ❯ ".to_string(),
        }
    }

    /// Interactive read-eval-print loop.
    ///
    /// Ctrl-C discards the current line; Ctrl-D or a read failure ends the session.
    pub fn repl(&mut self) -> rustyline::Result<()> {
        let mut rl = DefaultEditor::new()?;

        while !self.should_exit() {
            match rl.readline(&self.prompt()) {
                Ok(line) => {
                    if !line.trim().is_empty() {
                        rl.add_history_entry(line.as_str())?;
                    }
                    self.execute_command(&line);
                }
                Err(ReadlineError::Interrupted) => continue,
                Err(ReadlineError::Eof) => break,
                Err(err) => {
                    warn!(error = %err, "input stream failed");
                    break;
                }
            }
        }

        Ok(())
    }
}

impl LoopBody for Interpreter {
    fn piped(&mut self, line: &str) -> String {
        Pipeline::new(&self.env, self.runtime.as_ref(), &mut self.console).run_quiet(line)
    }

    fn dispatch(&mut self, line: &str) {
        self.dispatch_line(line);
    }

    fn console(&mut self) -> &mut Console {
        &mut self.console
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::command::ExitCode;
    use crate::io_adapters::{SharedBuffer, buffer_text};
    use crate::pipeline::tests::FakeRuntime;
    use std::cell::RefCell;
    use std::rc::Rc;

    /// Shell runner that records command lines instead of running them.
    #[derive(Clone, Default)]
    pub(crate) struct RecordingShell {
        pub(crate) lines: Rc<RefCell<Vec<String>>>,
    }

    impl ShellRunner for RecordingShell {
        fn run(&mut self, command_line: &str) -> Result<ExitCode> {
            self.lines.borrow_mut().push(command_line.to_string());
            Ok(0)
        }
    }

    pub(crate) struct Harness {
        pub(crate) shell: Interpreter,
        pub(crate) out: SharedBuffer,
        pub(crate) shell_lines: Rc<RefCell<Vec<String>>>,
        pub(crate) calls: Rc<RefCell<Vec<(String, ArgumentMap)>>>,
    }

    impl Harness {
        pub(crate) fn new(modules: &[&str]) -> Self {
            let runtime = FakeRuntime::new(modules);
            let calls = runtime.calls.clone();
            let recorder = RecordingShell::default();
            let shell_lines = recorder.lines.clone();
            let (console, out) = Console::captured();
            let shell = Interpreter::new(
                Environment::new("/opt/lmv/modules"),
                Box::new(runtime),
                Box::new(recorder),
                console,
            );
            Self {
                shell,
                out,
                shell_lines,
                calls,
            }
        }

        pub(crate) fn run(&mut self, line: &str) -> String {
            self.out.borrow_mut().clear();
            self.shell.execute_command(line);
            buffer_text(&self.out)
        }

        pub(crate) fn rule(&self, line: &str) -> Option<&'static str> {
            self.shell.classify(line).map(|(name, _)| name)
        }
    }

    #[test]
    fn test_classification_order() {
        let h = Harness::new(&["scanner"]);
        let cases = [
            ("for x in 1..3 -> echo $x > out.txt", "loop"),
            ("#sudo scanner > out.txt", "privileged"),
            ("scanner |> upper() > out.txt", "redirect"),
            ("echo a |> upper()", "pipeline"),
            ("echo a=b", "print"),
            ("TARGET=10.0.0.1", "assignment"),
            ("$ls -la", "shell"),
            ("@target", "module-variable"),
            ("help", "help"),
            ("h", "help"),
            ("?", "help"),
            ("ls", "list"),
            ("modules", "list"),
            ("new recon bash", "create"),
            ("rm recon", "delete"),
            ("envs", "env"),
            ("cls", "clear"),
            ("reload", "refresh"),
            ("q", "exit"),
            ("!", "info-shortcut"),
            ("scanner!", "info-shortcut"),
            ("scanner target=1", "fallback"),
            ("uname -a", "fallback"),
            ("for f in *; do echo $f; done", "fallback"),
            ("cmd ->", "fallback"),
        ];
        for (line, expected) in cases {
            assert_eq!(h.rule(line), Some(expected), "{line}");
        }
        assert_eq!(h.rule("   "), None);
    }

    #[test]
    fn test_pipeline_line_prints_result() {
        let mut h = Harness::new(&[]);
        assert_eq!(h.run(r#""abc" |> upper()"#), "\nABC\n\n");
        assert_eq!(h.shell.session().history, vec![r#""abc" |> upper()"#]);
    }

    #[test]
    fn test_pipeline_error_reports_step() {
        let mut h = Harness::new(&[]);
        let out = h.run(r#""abc" |> nothing"#);
        assert_eq!(
            out,
            "[!] Pipe error at step 2: 'nothing' is neither a function nor a module\n"
        );
    }

    #[test]
    fn test_zero_item_loop_dispatches_nothing() {
        let mut h = Harness::new(&["scanner"]);
        let out = h.run("for x in 3..1 -> scanner target=$x");
        assert_eq!(out, "[~] Empty range - nothing to do\n");
        assert!(h.calls.borrow().is_empty());
        assert!(h.shell_lines.borrow().is_empty());
    }

    #[test]
    fn test_loop_dispatches_through_interpreter() {
        let mut h = Harness::new(&["scanner"]);
        h.run("for x in 1..2 -> scanner target=$x");

        let calls = h.calls.borrow();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1].1.get("target").map(String::as_str), Some("2"));
        assert_eq!(h.shell.session().history.len(), 1);
    }

    #[test]
    fn test_loop_collects_piped_results() {
        let mut h = Harness::new(&[]);
        let out = h.run(r#"for w in a|b -> "$w" |> upper() |> missing"#);
        assert!(!out.contains("Collected results"));

        let out = h.run(r#"for w in a|b -> "$w" |> upper()"#);
        assert!(out.ends_with("[+] Collected results (2):\n  [ 1] A\n  [ 2] B\n\n"));
    }

    #[test]
    fn test_malformed_loop_prints_usage() {
        let mut h = Harness::new(&[]);
        let out = h.run("for x in 1..3 ->");
        assert!(out.starts_with("[!] Invalid for-loop syntax: loop body is empty\n"));
        assert!(out.contains("for $x in 1..100 -> echo $x"));
    }

    #[test]
    fn test_bad_range_reports_source() {
        let mut h = Harness::new(&[]);
        let out = h.run("for x in 1..a.b -> echo $x");
        assert!(out.starts_with("[!] Cannot parse range '1..a.b'"));
    }

    #[test]
    fn test_fallback_runs_module_with_ambient_vars() {
        let mut h = Harness::new(&["scanner"]);
        h.run("PORTS=22");
        let out = h.run("scanner target=10.0.0.1");

        assert!(out.starts_with("[*] Running module: scanner\n"));
        assert!(out.contains("scanner:PORTS=22;target=10.0.0.1"));
        assert!(h.shell_lines.borrow().is_empty());
    }

    #[test]
    fn test_fallback_tokenizes_module_arguments() {
        let mut h = Harness::new(&["scanner"]);
        h.run("T=1.2.3.4");
        h.run(r#"scanner target=$T note="a b", extra"#);

        let calls = h.calls.borrow();
        let (name, args) = calls.last().unwrap();
        assert_eq!(name, "scanner");
        assert_eq!(args.get("target").map(String::as_str), Some("1.2.3.4"));
        assert_eq!(args.get("note").map(String::as_str), Some("a b"));
        assert_eq!(args.get("arg1").map(String::as_str), Some("extra"));
    }

    #[test]
    fn test_fallback_passes_unknown_line_to_shell() {
        let mut h = Harness::new(&[]);
        h.run("uname -a");
        assert_eq!(*h.shell_lines.borrow(), vec!["uname -a"]);
    }

    #[test]
    fn test_failed_module_reports_status() {
        let mut h = Harness::new(&["fail"]);
        let out = h.run("fail");
        assert!(out.ends_with("[!] Module 'fail' exited with status 2\n"));
    }
}
