//! `|>` chains: each stage's text output feeds the next stage.

use crate::console::Console;
use crate::env::Environment;
use crate::functions::{self, WRITE_TO_FILE};
use crate::lexer::{ArgumentMap, argument_map, split_arguments};
use crate::module::{ModuleError, ModuleRuntime};
use crate::parser::{ParsingError, Stage, split_pipeline};
use thiserror::Error;
use tracing::debug;

/// Argument keys that never reach a module from a pipeline stage.
pub const RESERVED_KEYS: [&str; 2] = ["threads", "save"];

/// Why a single stage could not produce output.
#[derive(Debug, Error)]
pub enum StageError {
    #[error(transparent)]
    Syntax(#[from] ParsingError),
    #[error("'{0}' is neither a function nor a module")]
    Unknown(String),
    #[error("{name}(): {message}")]
    Function { name: String, message: String },
    #[error(transparent)]
    Module(#[from] ModuleError),
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Syntax(#[from] ParsingError),
    /// `step` is the 1-based position of the failing stage.
    #[error("Pipe error at step {step}")]
    Stage {
        step: usize,
        #[source]
        source: StageError,
    },
}

impl PipelineError {
    /// 1-based index of the stage that failed, when one did.
    pub fn step(&self) -> Option<usize> {
        match self {
            PipelineError::Syntax(ParsingError::EmptyStage(step)) => Some(*step),
            PipelineError::Syntax(_) => None,
            PipelineError::Stage { step, .. } => Some(*step),
        }
    }
}

/// Result of a successful chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineOutput {
    pub text: String,
    /// The last stage reported its own result; do not echo `text`.
    pub self_reporting: bool,
}

/// Executes `|>` chains against the module runtime.
///
/// Borrowing the interpreter's pieces separately lets a pipeline run while the
/// caller still owns the rest of its state.
pub struct Pipeline<'a> {
    env: &'a Environment,
    runtime: &'a dyn ModuleRuntime,
    console: &'a mut Console,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        env: &'a Environment,
        runtime: &'a dyn ModuleRuntime,
        console: &'a mut Console,
    ) -> Self {
        Self {
            env,
            runtime,
            console,
        }
    }

    /// Runs the chain stage by stage. No stage starts before the previous one
    /// has produced its text, and the first failure stops the chain.
    pub fn evaluate(&mut self, line: &str) -> Result<PipelineOutput, PipelineError> {
        let stages = split_pipeline(line)?;
        let mut output = String::new();
        let mut self_reporting = false;

        for (idx, text) in stages.iter().enumerate() {
            let step = idx + 1;
            let stage = Stage::parse(text).map_err(|e| PipelineError::Stage {
                step,
                source: e.into(),
            })?;
            self_reporting = matches!(&stage, Stage::Call { name, .. } if name == WRITE_TO_FILE);

            let had_input = !output.is_empty();
            let stage = stage.with_input(&output);
            debug!(step, ?stage, "resolving stage");
            output = self
                .resolve(stage, had_input)
                .map_err(|source| PipelineError::Stage { step, source })?;
        }

        Ok(PipelineOutput {
            text: output,
            self_reporting,
        })
    }

    /// Runs the chain and prints its result between blank lines.
    pub fn run(&mut self, line: &str) -> Result<(), PipelineError> {
        let output = self.evaluate(line)?;
        if !output.self_reporting {
            self.console.blank();
            self.console.line(&output.text);
            self.console.blank();
        }
        Ok(())
    }

    /// Loop variant: any failure yields an empty string and no report.
    pub fn run_quiet(&mut self, line: &str) -> String {
        match self.evaluate(line) {
            Ok(output) => output.text,
            Err(e) => {
                debug!(line, error = ?e, "pipeline failed inside loop");
                String::new()
            }
        }
    }

    fn resolve(&mut self, stage: Stage, had_input: bool) -> Result<String, StageError> {
        match stage {
            Stage::Literal(text) => Ok(text),
            Stage::Call { name, args } => {
                let tokens = split_arguments(&args, self.env);
                if let Some(function) = functions::lookup(&name) {
                    return function(&tokens, &mut *self.console).map_err(|e| {
                        StageError::Function {
                            name,
                            message: format!("{:#}", e),
                        }
                    });
                }
                if !self.runtime.contains(&name) {
                    return Err(StageError::Unknown(name));
                }
                let mut args = argument_map(&tokens);
                if had_input {
                    if let Some(last) = tokens.last() {
                        args.insert("input".to_string(), last.clone());
                    }
                }
                self.invoke(&name, args)
            }
            Stage::Module { name, args } => {
                if !self.runtime.contains(&name) {
                    return Err(StageError::Unknown(name));
                }
                let tokens = split_arguments(&args, self.env);
                self.invoke(&name, argument_map(&tokens))
            }
        }
    }

    fn invoke(&self, name: &str, mut args: ArgumentMap) -> Result<String, StageError> {
        args.retain(|key, _| !RESERVED_KEYS.contains(&key.as_str()));
        merge_ambient(&mut args, self.env);
        let result = self.runtime.invoke(name, &args)?;
        Ok(result.output.trim().to_string())
    }
}

/// Adds ambient variables for every key the caller did not set explicitly.
pub fn merge_ambient(args: &mut ArgumentMap, env: &Environment) {
    for (key, value) in env.vars() {
        args.entry(key.clone()).or_insert_with(|| value.clone());
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::io_adapters::buffer_text;
    use crate::module::{Language, ModuleInfo, ModuleOutput};
    use std::cell::RefCell;
    use std::rc::Rc;

    /// Module runtime that echoes its arguments and records every call.
    pub(crate) struct FakeRuntime {
        modules: Vec<ModuleInfo>,
        pub(crate) calls: Rc<RefCell<Vec<(String, ArgumentMap)>>>,
    }

    impl FakeRuntime {
        pub(crate) fn new(names: &[&str]) -> Self {
            Self {
                modules: names
                    .iter()
                    .map(|n| ModuleInfo::new(*n, format!("/modules/{n}"), Language::Bash))
                    .collect(),
                calls: Rc::new(RefCell::new(Vec::new())),
            }
        }

        pub(crate) fn last_args(&self) -> ArgumentMap {
            self.calls.borrow().last().map(|(_, a)| a.clone()).unwrap_or_default()
        }
    }

    impl ModuleRuntime for FakeRuntime {
        fn module(&self, name: &str) -> Option<&ModuleInfo> {
            self.modules.iter().find(|m| m.name == name)
        }

        fn modules(&self) -> Vec<&ModuleInfo> {
            self.modules.iter().collect()
        }

        /// `fail` exits with 2; every other module echoes its sorted arguments.
        fn invoke(&self, name: &str, args: &ArgumentMap) -> Result<ModuleOutput, ModuleError> {
            self.calls.borrow_mut().push((name.to_string(), args.clone()));
            if name == "fail" {
                return Err(ModuleError::Failed {
                    name: name.to_string(),
                    code: 2,
                    output: String::new(),
                });
            }
            let mut pairs: Vec<_> = args.iter().map(|(k, v)| format!("{k}={v}")).collect();
            pairs.sort();
            Ok(ModuleOutput {
                output: format!("  {}:{}\n", name, pairs.join(";")),
            })
        }
    }

    fn evaluate(
        env: &Environment,
        runtime: &FakeRuntime,
        line: &str,
    ) -> Result<String, PipelineError> {
        let (mut console, _) = Console::captured();
        Pipeline::new(env, runtime, &mut console)
            .evaluate(line)
            .map(|o| o.text)
    }

    #[test]
    fn test_literal_into_function() {
        let env = Environment::empty();
        let runtime = FakeRuntime::new(&[]);
        assert_eq!(evaluate(&env, &runtime, r#""abc" |> upper()"#).unwrap(), "ABC");
        assert_eq!(
            evaluate(&env, &runtime, r#""a\tb" |> "!" |> len()"#).unwrap(),
            "4"
        );
    }

    #[test]
    fn test_function_input_survives_quotes_and_commas() {
        let env = Environment::empty();
        let runtime = FakeRuntime::new(&[]);
        let out = evaluate(&env, &runtime, r#"echo("say \"hi\", ok") |> reverse()"#).unwrap();
        assert_eq!(out, "ko ,\"ih\" yas");
    }

    #[test]
    fn test_module_stage_receives_input_and_ambient() {
        let mut env = Environment::empty();
        env.set_var("timeout", "5").unwrap();
        env.set_var("ip", "ambient").unwrap();
        let runtime = FakeRuntime::new(&["geo"]);

        let out = evaluate(&env, &runtime, r#""8.8.8.8" |> geo ip=$target threads=9"#).unwrap();

        assert_eq!(out, "geo:ip=8.8.8.8;timeout=5");
    }

    #[test]
    fn test_module_stage_without_variable_gets_input_key() {
        let env = Environment::empty();
        let runtime = FakeRuntime::new(&["geo"]);
        let out = evaluate(&env, &runtime, r#""x y" |> geo mode=fast"#).unwrap();
        assert_eq!(out, "geo:input=x y;mode=fast");
    }

    #[test]
    fn test_call_shaped_module_binds_positionals() {
        let env = Environment::empty();
        let runtime = FakeRuntime::new(&["geo"]);
        evaluate(&env, &runtime, r#""1.1.1.1" |> geo(verbose, save=yes)"#).unwrap();

        let args = runtime.last_args();
        assert_eq!(args.get("arg1").map(String::as_str), Some("verbose"));
        assert_eq!(args.get("arg2").map(String::as_str), Some("1.1.1.1"));
        assert_eq!(args.get("input").map(String::as_str), Some("1.1.1.1"));
        assert!(!args.contains_key("save"));
    }

    #[test]
    fn test_failure_reports_step_and_stops_chain() {
        let env = Environment::empty();
        let runtime = FakeRuntime::new(&["geo", "fail"]);

        let err = evaluate(&env, &runtime, r#""a" |> fail |> geo"#).unwrap_err();
        assert_eq!(err.step(), Some(2));
        assert_eq!(runtime.calls.borrow().len(), 1);

        let err = evaluate(&env, &runtime, r#""a" |> upper() |> nowhere"#).unwrap_err();
        assert_eq!(err.step(), Some(3));
        assert_eq!(err.to_string(), "Pipe error at step 3");

        let err = evaluate(&env, &runtime, "upper(x |> geo").unwrap_err();
        assert_eq!(err.step(), Some(1));
    }

    #[test]
    fn test_run_prints_result_between_blank_lines() {
        let env = Environment::empty();
        let runtime = FakeRuntime::new(&[]);
        let (mut console, out) = Console::captured();

        Pipeline::new(&env, &runtime, &mut console)
            .run(r#""abc" |> upper()"#)
            .unwrap();

        assert_eq!(buffer_text(&out), "\nABC\n\n");
    }

    #[test]
    fn test_run_does_not_echo_file_stage() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("o.txt");
        let env = Environment::empty();
        let runtime = FakeRuntime::new(&[]);
        let (mut console, out) = Console::captured();

        let line = format!(r#""data" |> file("{}")"#, path.display());
        Pipeline::new(&env, &runtime, &mut console).run(&line).unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "data");
        assert!(buffer_text(&out).starts_with("[+] Wrote 4 bytes"));
        assert!(!buffer_text(&out).contains("\ndata\n"));
    }

    #[test]
    fn test_run_quiet_swallows_errors() {
        let env = Environment::empty();
        let runtime = FakeRuntime::new(&[]);
        let (mut console, out) = Console::captured();

        let text = Pipeline::new(&env, &runtime, &mut console).run_quiet("\"a\" |> ghost");

        assert_eq!(text, "");
        assert_eq!(buffer_text(&out), "");
    }
}
