//! Table-driven mapping from (ecosystem, command kind) to toolchain invocations.
//!
//! Every entry is a small function of the target directory so it can probe
//! for manifests or installed tools. Pairs without an entry resolve to a skip
//! with a readable reason; a missing toolchain for one language never aborts
//! work for another.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::ecosystem::Ecosystem;
use crate::manifest::{is_npm_placeholder_test, npm_script};
use crate::probe::{any_file, file_name, find_executable};

/// Placeholder in arguments replaced by the port a server must bind.
pub const PORT_TOKEN: &str = "{port}";

/// Binary name used when a Go target is compiled to be run as a server.
pub const GO_SERVER_BINARY: &str = "app";

/// The toolchain actions the resolver knows how to map.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    /// Compile or install dependencies.
    Build,
    /// Lint / format / vet.
    StaticCheck,
    /// Run the unit test suite.
    UnitTest,
    /// Start the application as a long-lived server.
    RunServer,
}

impl CommandKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandKind::Build => "build",
            CommandKind::StaticCheck => "static_check",
            CommandKind::UnitTest => "unit_test",
            CommandKind::RunServer => "run_server",
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A concrete executable invocation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<(String, String)>,
}

impl Invocation {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            env: Vec::new(),
        }
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Replace every `{port}` token in the arguments.
    pub fn with_port(mut self, port: u16) -> Self {
        let port = port.to_string();
        for arg in &mut self.args {
            if arg.contains(PORT_TOKEN) {
                *arg = arg.replace(PORT_TOKEN, &port);
            }
        }
        self
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Outcome of resolving a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Run these commands in order, stopping at the first failure.
    Run(Vec<Invocation>),
    /// Nothing to run; the reason is reported to the caller.
    Skip { reason: String },
}

impl Resolution {
    pub fn run(invocation: Invocation) -> Self {
        Resolution::Run(vec![invocation])
    }

    pub fn skip(reason: impl Into<String>) -> Self {
        Resolution::Skip {
            reason: reason.into(),
        }
    }

    pub fn is_skip(&self) -> bool {
        matches!(self, Resolution::Skip { .. })
    }
}

/// A table entry: probes the target directory and picks the command.
pub type ResolveFn = Arc<dyn Fn(&Path) -> Resolution + Send + Sync>;

/// Lookup table of command resolvers.
#[derive(Clone)]
pub struct CommandResolver {
    table: HashMap<(Ecosystem, CommandKind), ResolveFn>,
}

impl Default for CommandResolver {
    fn default() -> Self {
        Self::builtin()
    }
}

impl fmt::Debug for CommandResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<String> = self
            .table
            .keys()
            .map(|(eco, kind)| format!("{eco}/{kind}"))
            .collect();
        keys.sort();
        f.debug_struct("CommandResolver").field("entries", &keys).finish()
    }
}

impl CommandResolver {
    /// A resolver with no entries; everything resolves to skip.
    pub fn empty() -> Self {
        Self {
            table: HashMap::new(),
        }
    }

    /// The built-in table for all supported ecosystems.
    pub fn builtin() -> Self {
        let mut r = Self::empty();

        // go
        r.register(Ecosystem::Go, CommandKind::Build, |dir| {
            build_or_make(dir, "go.mod", || {
                Invocation::new("go", ["build", "./..."])
            })
        });
        r.register(Ecosystem::Go, CommandKind::StaticCheck, |dir| {
            if !dir.join("go.mod").is_file() {
                return Resolution::skip("no go.mod found");
            }
            Resolution::Run(vec![
                Invocation::new("go", ["vet", "./..."]),
                Invocation::new("gofmt", ["-l", "."]),
            ])
        });
        r.register(Ecosystem::Go, CommandKind::UnitTest, |dir| {
            if !dir.join("go.mod").is_file() {
                return Resolution::skip("no go.mod found");
            }
            if !any_file(dir, |p| file_name(p).ends_with("_test.go")) {
                return Resolution::skip("no Go test files found");
            }
            Resolution::run(Invocation::new("go", ["test", "-v", "-cover", "./..."]))
        });
        r.register(Ecosystem::Go, CommandKind::RunServer, |dir| {
            if !dir.join("go.mod").is_file() {
                return Resolution::skip("no go.mod found");
            }
            let binary = dir.join(GO_SERVER_BINARY);
            Resolution::Run(vec![
                Invocation::new("go", ["build", "-o", GO_SERVER_BINARY, "."]),
                Invocation::new(binary.to_string_lossy(), Vec::<String>::new()),
            ])
        });

        // node
        r.register(Ecosystem::Node, CommandKind::Build, |dir| {
            build_or_make(dir, "package.json", || Invocation::new("npm", ["install"]))
        });
        r.register(Ecosystem::Node, CommandKind::StaticCheck, |_| {
            installed_tools(
                &[("eslint", &["."][..]), ("prettier", &["--check", "."][..])],
                "node",
            )
        });
        r.register(Ecosystem::Node, CommandKind::UnitTest, |dir| {
            match npm_script(dir, "test") {
                Some(script) if !is_npm_placeholder_test(&script) => {
                    Resolution::run(Invocation::new("npm", ["test"]))
                }
                Some(_) => Resolution::skip("package.json test script is the npm placeholder"),
                None => Resolution::skip("no test script declared in package.json"),
            }
        });
        r.register(Ecosystem::Node, CommandKind::RunServer, |dir| {
            if npm_script(dir, "start").is_some() {
                return Resolution::run(Invocation::new("npm", ["start"]));
            }
            for entry in ["app.js", "index.js", "server.js"] {
                if dir.join(entry).is_file() {
                    return Resolution::run(Invocation::new("node", [entry]));
                }
            }
            Resolution::skip("no start script or entry file found")
        });

        // python
        r.register(Ecosystem::Python, CommandKind::Build, |dir| {
            build_or_make(dir, "requirements.txt", || {
                match first_installed(&["pip", "pip3"]) {
                    Some(pip) => Invocation::new(pip, ["install", "-r", "requirements.txt"]),
                    None => Invocation::new(
                        python_interpreter(),
                        ["-m", "pip", "install", "-r", "requirements.txt"],
                    ),
                }
            })
        });
        r.register(Ecosystem::Python, CommandKind::StaticCheck, |_| {
            installed_tools(
                &[("flake8", &["."][..]), ("black", &["--check", "."][..])],
                "python",
            )
        });
        r.register(Ecosystem::Python, CommandKind::UnitTest, |dir| {
            let has_tests = any_file(dir, |p| {
                let name = file_name(p);
                name.ends_with(".py") && (name.starts_with("test_") || name.ends_with("_test.py"))
            });
            if !has_tests {
                return Resolution::skip("no Python test files found");
            }
            if find_executable("pytest").is_some() {
                Resolution::run(Invocation::new("pytest", ["-v"]))
            } else {
                Resolution::run(Invocation::new(
                    python_interpreter(),
                    ["-m", "unittest", "discover", "-v"],
                ))
            }
        });
        r.register(Ecosystem::Python, CommandKind::RunServer, |dir| {
            for entry in ["app.py", "main.py", "server.py"] {
                if dir.join(entry).is_file() {
                    return Resolution::run(Invocation::new(python_interpreter(), [entry]));
                }
            }
            Resolution::skip("no app.py or main.py found")
        });

        // java
        r.register(Ecosystem::Java, CommandKind::Build, |dir| {
            build_or_make(dir, "pom.xml", || Invocation::new("mvn", ["-q", "compile"]))
        });
        r.register(Ecosystem::Java, CommandKind::StaticCheck, |_| {
            installed_tools(
                &[("checkstyle", &["-c", "/google_checks.xml", "."][..])],
                "java",
            )
        });
        r.register(Ecosystem::Java, CommandKind::UnitTest, |dir| {
            if dir.join("pom.xml").is_file() && dir.join("src/test").is_dir() {
                Resolution::run(Invocation::new("mvn", ["-q", "test"]))
            } else {
                Resolution::skip("no Maven test sources found")
            }
        });

        // php
        r.register(Ecosystem::Php, CommandKind::Build, |dir| {
            build_or_make(dir, "composer.json", || {
                Invocation::new("composer", ["install", "--no-interaction"])
            })
        });
        r.register(Ecosystem::Php, CommandKind::StaticCheck, |_| {
            installed_tools(&[("phpcs", &["."][..])], "php")
        });
        r.register(Ecosystem::Php, CommandKind::UnitTest, |dir| {
            if !dir.join("tests").is_dir() {
                return Resolution::skip("no tests directory found");
            }
            match first_installed(&["phpunit"]) {
                Some(_) => Resolution::run(Invocation::new("phpunit", Vec::<String>::new())),
                None => Resolution::skip("phpunit is not installed"),
            }
        });
        r.register(Ecosystem::Php, CommandKind::RunServer, |dir| {
            let bind = format!("127.0.0.1:{PORT_TOKEN}");
            if dir.join("public/index.php").is_file() {
                Resolution::run(Invocation::new("php", ["-S", bind.as_str(), "-t", "public"]))
            } else if dir.join("index.php").is_file() {
                Resolution::run(Invocation::new("php", ["-S", bind.as_str()]))
            } else {
                Resolution::skip("no index.php found")
            }
        });

        // ruby
        r.register(Ecosystem::Ruby, CommandKind::Build, |dir| {
            build_or_make(dir, "Gemfile", || Invocation::new("bundle", ["install"]))
        });
        r.register(Ecosystem::Ruby, CommandKind::StaticCheck, |_| {
            installed_tools(&[("rubocop", &["."][..])], "ruby")
        });
        r.register(Ecosystem::Ruby, CommandKind::UnitTest, |dir| {
            if dir.join("Rakefile").is_file() {
                Resolution::run(Invocation::new("rake", ["test"]))
            } else if dir.join("spec").is_dir() && find_executable("rspec").is_some() {
                Resolution::run(Invocation::new("rspec", Vec::<String>::new()))
            } else {
                Resolution::skip("no Rakefile or spec directory found")
            }
        });
        r.register(Ecosystem::Ruby, CommandKind::RunServer, |dir| {
            if dir.join("config.ru").is_file() {
                Resolution::run(Invocation::new("rackup", ["-p", PORT_TOKEN]))
            } else if dir.join("app.rb").is_file() {
                Resolution::run(Invocation::new("ruby", ["app.rb", "-p", PORT_TOKEN]))
            } else {
                Resolution::skip("no config.ru or app.rb found")
            }
        });

        // unknown: only a Makefile can help
        r.register(Ecosystem::Unknown, CommandKind::Build, |dir| {
            if dir.join("Makefile").is_file() {
                Resolution::run(Invocation::new("make", Vec::<String>::new()))
            } else {
                Resolution::skip("unknown ecosystem and no Makefile found")
            }
        });

        r
    }

    /// Insert or replace the entry for `(eco, kind)`.
    pub fn register<F>(&mut self, eco: Ecosystem, kind: CommandKind, f: F)
    where
        F: Fn(&Path) -> Resolution + Send + Sync + 'static,
    {
        self.table.insert((eco, kind), Arc::new(f));
    }

    pub fn has_entry(&self, eco: Ecosystem, kind: CommandKind) -> bool {
        self.table.contains_key(&(eco, kind))
    }

    /// Resolve the command for `(eco, kind)` against `dir`.
    pub fn resolve(&self, eco: Ecosystem, kind: CommandKind, dir: &Path) -> Resolution {
        match self.table.get(&(eco, kind)) {
            Some(f) => f(dir),
            None => Resolution::skip(format!("no {kind} command known for {eco}")),
        }
    }
}

fn build_or_make<F>(dir: &Path, manifest: &str, command: F) -> Resolution
where
    F: FnOnce() -> Invocation,
{
    if dir.join(manifest).is_file() {
        Resolution::run(command())
    } else if dir.join("Makefile").is_file() {
        Resolution::run(Invocation::new("make", Vec::<String>::new()))
    } else {
        Resolution::skip(format!("no {manifest} found"))
    }
}

fn installed_tools(tools: &[(&str, &[&str])], eco: &str) -> Resolution {
    let found: Vec<Invocation> = tools
        .iter()
        .filter(|(program, _)| find_executable(program).is_some())
        .map(|(program, args)| Invocation::new(*program, args.iter().copied()))
        .collect();
    if found.is_empty() {
        Resolution::skip(format!("no static analysis tool installed for {eco}"))
    } else {
        Resolution::Run(found)
    }
}

fn first_installed(candidates: &[&'static str]) -> Option<&'static str> {
    candidates
        .iter()
        .copied()
        .find(|p| find_executable(p).is_some())
}

fn python_interpreter() -> &'static str {
    first_installed(&["python3", "python"]).unwrap_or("python3")
}
