use anyhow::{Context, Result};
use argh::FromArgs;
use lanmanvan::Interpreter;
use lanmanvan::console::Console;
use lanmanvan::env::Environment;
use lanmanvan::external::SystemShell;
use lanmanvan::module::ModuleDirectory;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// Environment variable holding the log filter, e.g. `LANMANVAN_LOG=lanmanvan=debug`.
const LOG_ENV: &str = "LANMANVAN_LOG";

#[derive(FromArgs)]
/// Interactive command interpreter for a directory of tool modules.
struct Args {
    #[argh(option, default = "String::from(\"./modules\")")]
    /// path to the modules directory
    modules: String,

    #[argh(switch)]
    /// execute one command and exit
    idle_exec: bool,

    #[argh(option, default = "String::from(\"help\")")]
    /// command run by --idle-exec
    idle_cmd: String,

    #[argh(option, short = 'r')]
    /// file of commands to run before the session, one per line
    resource: Option<PathBuf>,

    #[argh(switch)]
    /// show the banner
    banner: bool,

    #[argh(switch)]
    /// show the version and exit
    version: bool,
}

fn init_logging() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Commands of a resource file: trimmed lines, without blanks and `#` comments.
fn resource_commands(content: &str) -> Vec<&str> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .collect()
}

fn run(args: Args) -> Result<()> {
    if args.version {
        println!("lanmanvan {} - modular tool runner", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let modules_dir = shellexpand::tilde(&args.modules).into_owned();
    let modules_dir = std::path::absolute(&modules_dir)
        .with_context(|| format!("invalid modules path {}", modules_dir))?;
    debug!(modules_dir = %modules_dir.display(), "starting");

    let runtime = ModuleDirectory::open(modules_dir.clone())
        .with_context(|| format!("can't load modules from {}", modules_dir.display()))?;
    let mut shell = Interpreter::new(
        Environment::new(modules_dir),
        Box::new(runtime),
        Box::new(SystemShell::detect()),
        Console::stdout(),
    );

    if args.banner {
        shell.banner();
    }

    if let Some(path) = &args.resource {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("can't read resource file {}", path.display()))?;
        for command in resource_commands(&content) {
            if shell.should_exit() {
                return Ok(());
            }
            shell.execute_command(command);
        }
    }

    if args.idle_exec {
        shell.execute_command(&args.idle_cmd);
        return Ok(());
    }

    shell.repl().context("interactive session failed")
}

fn main() -> ExitCode {
    init_logging();
    match run(argh::from_env()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_commands_skip_blanks_and_comments() {
        let content = "# setup\n\nTARGET=10.0.0.1\n   use scanner  \n#sudo id\nrun\n";
        assert_eq!(
            resource_commands(content),
            vec!["TARGET=10.0.0.1", "use scanner", "run"]
        );
    }

    #[test]
    fn test_args_defaults() {
        let args = Args::from_args(&["lanmanvan"], &[]).unwrap();
        assert_eq!(args.modules, "./modules");
        assert_eq!(args.idle_cmd, "help");
        assert!(!args.idle_exec);
        assert!(args.resource.is_none());

        let args = Args::from_args(
            &["lanmanvan"],
            &["--idle-exec", "--idle-cmd", "list", "-r", "boot.rc", "--modules", "~/mods"],
        )
        .unwrap();
        assert!(args.idle_exec);
        assert_eq!(args.idle_cmd, "list");
        assert_eq!(args.resource, Some(PathBuf::from("boot.rc")));
        assert_eq!(args.modules, "~/mods");
    }
}
