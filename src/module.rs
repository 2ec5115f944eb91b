//! Module runtime: discovery and execution of named modules.
//!
//! A module is a directory under the modules root holding an entry script
//! (`main.py`, `main.go`, `main.rb` or `main.sh`) and, optionally, a
//! `module.yaml` manifest. Arguments reach the script as `ARG_<KEY>`
//! environment variables and the script's stdout is returned as the result.

use crate::command::ExitCode;
use crate::external::{exit_code, find_command_path};
use crate::lexer::ArgumentMap;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::str::FromStr;
use thiserror::Error;
use tracing::{debug, warn};

pub const MANIFEST_FILE: &str = "module.yaml";

#[derive(Debug, Error)]
pub enum ModuleError {
    #[error("module '{0}' not found")]
    NotFound(String),
    #[error("module '{0}' already exists")]
    AlreadyExists(String),
    #[error("invalid module name '{0}' (letters, digits, '-' and '_' only)")]
    InvalidName(String),
    #[error("unknown language '{0}' (use python, bash, go or ruby)")]
    UnknownLanguage(String),
    #[error("interpreter '{0}' not found in PATH")]
    InterpreterMissing(String),
    /// The module ran but exited unsuccessfully; `output` holds what it printed.
    #[error("module '{name}' exited with status {code}")]
    Failed {
        name: String,
        code: ExitCode,
        output: String,
    },
    #[error("{0}")]
    Unsupported(&'static str),
    #[error("modules directory {0} is not a directory")]
    NotADirectory(PathBuf),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Language of a module's entry script.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Language {
    Python,
    Go,
    Ruby,
    Bash,
}

impl Language {
    /// Discovery order when a directory holds several entry scripts.
    pub const ALL: [Language; 4] = [
        Language::Python,
        Language::Go,
        Language::Ruby,
        Language::Bash,
    ];

    pub fn entry_file(self) -> &'static str {
        match self {
            Language::Python => "main.py",
            Language::Go => "main.go",
            Language::Ruby => "main.rb",
            Language::Bash => "main.sh",
        }
    }

    /// Interpreter program and the arguments placed before the script path.
    fn interpreter(self) -> (&'static str, &'static [&'static str]) {
        match self {
            Language::Python => ("python3", &[]),
            Language::Go => ("go", &["run"]),
            Language::Ruby => ("ruby", &[]),
            Language::Bash => ("bash", &[]),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Language::Python => "python",
            Language::Go => "go",
            Language::Ruby => "ruby",
            Language::Bash => "bash",
        }
    }

    fn template(self, module: &str) -> String {
        match self {
            Language::Python => format!(
                "#!/usr/bin/env python3\n\"\"\"{module} module\"\"\"\nimport os\nimport sys\n\n\n\
                 def main():\n    target = os.getenv('ARG_TARGET')\n    if not target:\n        \
                 print('[!] Error: TARGET is required')\n        sys.exit(1)\n    \
                 print(f'[*] {module}: {{target}}')\n\n\nif __name__ == '__main__':\n    main()\n"
            ),
            Language::Go => format!(
                "package main\n\nimport (\n\t\"fmt\"\n\t\"os\"\n)\n\nfunc main() {{\n\
                 \ttarget := os.Getenv(\"ARG_TARGET\")\n\tif target == \"\" {{\n\
                 \t\tfmt.Println(\"[!] Error: TARGET is required\")\n\t\tos.Exit(1)\n\t}}\n\
                 \tfmt.Printf(\"[*] {module}: %s\\n\", target)\n}}\n"
            ),
            Language::Ruby => format!(
                "#!/usr/bin/env ruby\n# {module} module\n\ntarget = ENV['ARG_TARGET']\n\
                 if target.nil? || target.empty?\n  puts '[!] Error: TARGET is required'\n  \
                 exit 1\nend\nputs \"[*] {module}: #{{target}}\"\n"
            ),
            Language::Bash => format!(
                "#!/usr/bin/env bash\n# {module} module\n\nif [ -z \"$ARG_TARGET\" ]; then\n  \
                 echo '[!] Error: TARGET is required'\n  exit 1\nfi\n\
                 echo \"[*] {module}: $ARG_TARGET\"\n"
            ),
        }
    }
}

impl FromStr for Language {
    type Err = ModuleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "python" | "py" => Ok(Language::Python),
            "go" | "golang" => Ok(Language::Go),
            "ruby" | "rb" => Ok(Language::Ruby),
            "bash" | "sh" => Ok(Language::Bash),
            other => Err(ModuleError::UnknownLanguage(other.to_string())),
        }
    }
}

/// Optional `module.yaml` contents.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Manifest {
    pub description: Option<String>,
    pub author: Option<String>,
    pub version: Option<String>,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleInfo {
    pub name: String,
    pub dir: PathBuf,
    pub language: Language,
    pub manifest: Manifest,
}

impl ModuleInfo {
    pub fn new(name: impl Into<String>, dir: impl Into<PathBuf>, language: Language) -> Self {
        Self {
            name: name.into(),
            dir: dir.into(),
            language,
            manifest: Manifest::default(),
        }
    }

    pub fn entry(&self) -> PathBuf {
        self.dir.join(self.language.entry_file())
    }

    pub fn description(&self) -> &str {
        self.manifest.description.as_deref().unwrap_or("")
    }

    /// Case-insensitive match on name, description and tags.
    pub fn matches(&self, keyword: &str) -> bool {
        let keyword = keyword.to_lowercase();
        self.name.to_lowercase().contains(&keyword)
            || self.description().to_lowercase().contains(&keyword)
            || self
                .manifest
                .tags
                .iter()
                .any(|t| t.to_lowercase().contains(&keyword))
    }
}

/// What a module invocation produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleOutput {
    pub output: String,
}

/// The collaborator that knows which modules exist and how to run them.
///
/// `invoke` returns the module's captured text directly; callers never need to
/// redirect the process-wide stdout to read it.
pub trait ModuleRuntime {
    fn module(&self, name: &str) -> Option<&ModuleInfo>;

    /// All modules, sorted by name.
    fn modules(&self) -> Vec<&ModuleInfo>;

    fn invoke(&self, name: &str, args: &ArgumentMap) -> Result<ModuleOutput, ModuleError>;

    fn contains(&self, name: &str) -> bool {
        self.module(name).is_some()
    }

    /// Re-discovers modules and returns how many were found.
    fn refresh(&mut self) -> Result<usize, ModuleError> {
        Ok(self.modules().len())
    }

    /// Scaffolds a new module and returns the path of its entry script.
    fn create(&mut self, _name: &str, _language: Language) -> Result<PathBuf, ModuleError> {
        Err(ModuleError::Unsupported("this runtime cannot create modules"))
    }

    fn delete(&mut self, _name: &str) -> Result<(), ModuleError> {
        Err(ModuleError::Unsupported("this runtime cannot delete modules"))
    }
}

/// [`ModuleRuntime`] over a directory of module sub-directories.
pub struct ModuleDirectory {
    root: PathBuf,
    modules: BTreeMap<String, ModuleInfo>,
}

impl ModuleDirectory {
    /// Opens the modules root and discovers its modules.
    ///
    /// A missing root is not an error: it simply holds no modules yet.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, ModuleError> {
        let mut dir = Self {
            root: root.into(),
            modules: BTreeMap::new(),
        };
        dir.discover()?;
        Ok(dir)
    }

    fn discover(&mut self) -> Result<(), ModuleError> {
        self.modules.clear();
        if !self.root.exists() {
            warn!(root = %self.root.display(), "modules directory does not exist");
            return Ok(());
        }
        if !self.root.is_dir() {
            return Err(ModuleError::NotADirectory(self.root.clone()));
        }

        for entry in fs::read_dir(&self.root)? {
            let path = entry?.path();
            if !path.is_dir() {
                continue;
            }
            let Some(name) = path.file_name().map(|n| n.to_string_lossy().into_owned()) else {
                continue;
            };
            let Some(language) = Language::ALL
                .into_iter()
                .find(|lang| path.join(lang.entry_file()).is_file())
            else {
                debug!(dir = %path.display(), "skipping directory without entry script");
                continue;
            };

            let mut info = ModuleInfo::new(name.clone(), path.clone(), language);
            info.manifest = load_manifest(&path);
            self.modules.insert(name, info);
        }

        debug!(count = self.modules.len(), root = %self.root.display(), "discovered modules");
        Ok(())
    }
}

fn load_manifest(dir: &Path) -> Manifest {
    let path = dir.join(MANIFEST_FILE);
    let Ok(text) = fs::read_to_string(&path) else {
        return Manifest::default();
    };
    match serde_yml::from_str(&text) {
        Ok(manifest) => manifest,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "ignoring malformed manifest");
            Manifest::default()
        }
    }
}

fn is_module_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

impl ModuleRuntime for ModuleDirectory {
    fn module(&self, name: &str) -> Option<&ModuleInfo> {
        self.modules.get(name)
    }

    fn modules(&self) -> Vec<&ModuleInfo> {
        self.modules.values().collect()
    }

    fn invoke(&self, name: &str, args: &ArgumentMap) -> Result<ModuleOutput, ModuleError> {
        let module = self
            .module(name)
            .ok_or_else(|| ModuleError::NotFound(name.to_string()))?;

        let (program, program_args) = module.language.interpreter();
        let search_paths = std::env::var_os("PATH").unwrap_or_default();
        let interpreter = find_command_path(&search_paths, Path::new(program))
            .ok_or_else(|| ModuleError::InterpreterMissing(program.to_string()))?
            .into_owned();

        debug!(module = name, ?args, "invoking module");
        let output = Command::new(interpreter)
            .args(program_args)
            .arg(module.entry())
            .current_dir(&module.dir)
            .envs(
                args.iter()
                    .map(|(k, v)| (format!("ARG_{}", k.to_uppercase()), v)),
            )
            .stdin(Stdio::null())
            .output()?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let code = exit_code(output.status);
        if output.status.success() {
            if !output.stderr.is_empty() {
                if let Err(e) = std::io::stderr().write_all(&output.stderr) {
                    warn!(module = name, error = %e, "can't forward module stderr");
                }
            }
            return Ok(ModuleOutput { output: stdout });
        }

        let mut combined = stdout;
        combined.push_str(&String::from_utf8_lossy(&output.stderr));
        Err(ModuleError::Failed {
            name: name.to_string(),
            code,
            output: combined,
        })
    }

    fn refresh(&mut self) -> Result<usize, ModuleError> {
        self.discover()?;
        Ok(self.modules.len())
    }

    fn create(&mut self, name: &str, language: Language) -> Result<PathBuf, ModuleError> {
        if !is_module_name(name) {
            return Err(ModuleError::InvalidName(name.to_string()));
        }
        let dir = self.root.join(name);
        if dir.exists() {
            return Err(ModuleError::AlreadyExists(name.to_string()));
        }

        fs::create_dir_all(&dir)?;
        let mut info = ModuleInfo::new(name, dir.clone(), language);
        fs::write(info.entry(), language.template(name))?;

        let description = format!("{} module ({})", name, language.name());
        fs::write(
            dir.join(MANIFEST_FILE),
            format!("description: \"{description}\"\ntags: []\n"),
        )?;
        info.manifest.description = Some(description);

        let entry = info.entry();
        self.modules.insert(name.to_string(), info);
        Ok(entry)
    }

    fn delete(&mut self, name: &str) -> Result<(), ModuleError> {
        let module = self
            .modules
            .get(name)
            .ok_or_else(|| ModuleError::NotFound(name.to_string()))?;
        fs::remove_dir_all(&module.dir)?;
        self.modules.remove(name);
        Ok(())
    }
}
