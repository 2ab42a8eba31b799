//! Locating Emscripten and running external tools.

use crate::driver::DriverError;
use std::env;
use std::fmt;
use std::io;
use std::path::PathBuf;
use std::process::Command;
use tracing::{debug, info};

const NON_UNIX_INSTRUCTIONS: &str = "\
This host is not supported by the automated build.
Use Emscripten to compile Unicorn manually:
  1. apply the patches on a Unix machine (`unicorn-patcher apply`),
  2. run `emmake make` inside the unicorn directory,
  3. link libunicorn.a with emcc using the symbols from `unicorn-patcher exports`.";

const MISSING_EMSCRIPTEN_INSTRUCTIONS: &str = "\
Emscripten was not found.
Install the Emscripten SDK and activate it:
  git clone https://github.com/emscripten-core/emsdk.git ~/emsdk
  cd ~/emsdk && ./emsdk install latest && ./emsdk activate latest
  source ~/emsdk/emsdk_env.sh
or point $EMSCRIPTEN at the directory containing emcc and emmake.";

/// Fail unless the host can run the build scripts at all.
pub fn check_host() -> Result<(), DriverError> {
    if cfg!(unix) {
        Ok(())
    } else {
        Err(DriverError::UnsupportedHostPlatform {
            instructions: NON_UNIX_INSTRUCTIONS.to_string(),
        })
    }
}

/// Paths of the Emscripten front ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toolchain {
    pub emcc: PathBuf,
    pub emmake: PathBuf,
}

impl Toolchain {
    pub fn new(emcc: impl Into<PathBuf>, emmake: impl Into<PathBuf>) -> Self {
        Self {
            emcc: emcc.into(),
            emmake: emmake.into(),
        }
    }

    /// Look in `$EMSCRIPTEN`, then `PATH`, then `~/emsdk/upstream/emscripten`.
    pub fn detect() -> Result<Self, DriverError> {
        check_host()?;

        let mut candidates = Vec::new();
        if let Some(dir) = env::var_os("EMSCRIPTEN") {
            candidates.push(PathBuf::from(dir));
        }
        if let Some(path) = env::var_os("PATH") {
            candidates.extend(env::split_paths(&path));
        }
        if let Some(home) = home::home_dir() {
            candidates.push(home.join("emsdk/upstream/emscripten"));
        }

        let toolchain = Self::find_in(candidates).ok_or_else(|| {
            DriverError::UnsupportedHostPlatform {
                instructions: MISSING_EMSCRIPTEN_INSTRUCTIONS.to_string(),
            }
        })?;
        info!(emcc = %toolchain.emcc.display(), "found Emscripten");
        Ok(toolchain)
    }

    /// First directory holding both `emcc` and `emmake`.
    pub fn find_in(dirs: impl IntoIterator<Item = PathBuf>) -> Option<Self> {
        dirs.into_iter().find_map(|dir| {
            let emcc = dir.join("emcc");
            let emmake = dir.join("emmake");
            debug!(dir = %dir.display(), "looking for Emscripten");
            (emcc.is_file() && emmake.is_file()).then(|| Self::new(emcc, emmake))
        })
    }
}

/// A fully specified external command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
}

impl Invocation {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, A>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    /// Program file name, for messages.
    pub fn program_name(&self) -> String {
        self.program
            .file_name()
            .unwrap_or(self.program.as_os_str())
            .to_string_lossy()
            .into_owned()
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            if arg.is_empty() || arg.contains(char::is_whitespace) {
                write!(f, " '{arg}'")?;
            } else {
                write!(f, " {arg}")?;
            }
        }
        Ok(())
    }
}

/// How an external tool finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolExit {
    Success,
    /// `None` when the process was killed by a signal.
    Failed(Option<i32>),
}

impl fmt::Display for ToolExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToolExit::Success => write!(f, "success"),
            ToolExit::Failed(Some(code)) => write!(f, "exit code {code}"),
            ToolExit::Failed(None) => write!(f, "terminated by signal"),
        }
    }
}

/// Runs external tools to completion.
pub trait ToolRunner {
    fn run(&mut self, invocation: &Invocation) -> io::Result<ToolExit>;
}

impl<R: ToolRunner + ?Sized> ToolRunner for &mut R {
    fn run(&mut self, invocation: &Invocation) -> io::Result<ToolExit> {
        (**self).run(invocation)
    }
}

/// Spawns real processes with inherited stdio, so tool diagnostics reach
/// the terminal unmodified.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessRunner;

impl ToolRunner for ProcessRunner {
    fn run(&mut self, invocation: &Invocation) -> io::Result<ToolExit> {
        info!(command = %invocation, "running");
        let mut command = Command::new(&invocation.program);
        command.args(&invocation.args);
        if let Some(dir) = &invocation.cwd {
            command.current_dir(dir);
        }
        let status = command.status()?;
        Ok(if status.success() {
            ToolExit::Success
        } else {
            ToolExit::Failed(status.code())
        })
    }
}

/// Records invocations instead of running them.
#[derive(Debug, Default, Clone)]
pub struct RecordingRunner {
    pub invocations: Vec<Invocation>,
    /// Programs (by file name) that report failure.
    pub failing: Vec<String>,
}

impl RecordingRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(mut self, program: impl Into<String>) -> Self {
        self.failing.push(program.into());
        self
    }
}

impl ToolRunner for RecordingRunner {
    fn run(&mut self, invocation: &Invocation) -> io::Result<ToolExit> {
        self.invocations.push(invocation.clone());
        if self.failing.contains(&invocation.program_name()) {
            Ok(ToolExit::Failed(Some(2)))
        } else {
            Ok(ToolExit::Success)
        }
    }
}

/// Run `invocation`, mapping non-zero exits to
/// [`DriverError::ExternalToolFailure`].
pub fn run_checked<R: ToolRunner + ?Sized>(
    runner: &mut R,
    invocation: &Invocation,
) -> Result<(), DriverError> {
    let exit = runner
        .run(invocation)
        .map_err(|source| DriverError::Spawn {
            program: invocation.program.clone(),
            source,
        })?;
    match exit {
        ToolExit::Success => Ok(()),
        failed => Err(DriverError::ExternalToolFailure {
            program: invocation.program_name(),
            status: failed,
        }),
    }
}
