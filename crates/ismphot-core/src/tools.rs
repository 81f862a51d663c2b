//! Typed invocations of the external fitsh tools.
//!
//! Each tool call is built from an argument struct into a [`ToolInvocation`]
//! that names the input files it reads and the output files it promises. The
//! [`ToolRunner`] executes it; on any failure the declared outputs are removed
//! so a half-written file never reaches a later stage.

use std::ffi::OsString;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, warn};
use wait_timeout::ChildExt;

use crate::config::ToolsConfig;
use crate::error::{IsmError, Result};

/// Bytes of stderr kept for the error message.
const MAX_STDERR_BYTES: u64 = 64 * 1024;

#[derive(Clone, Debug)]
pub struct ToolInvocation {
    /// Short tool name used in logs and errors.
    pub tool: &'static str,
    pub program: PathBuf,
    pub args: Vec<OsString>,
    pub inputs: Vec<PathBuf>,
    pub outputs: Vec<PathBuf>,
}

impl ToolInvocation {
    fn new(tool: &'static str, program: &Path) -> Self {
        Self {
            tool,
            program: program.to_path_buf(),
            args: Vec::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }

    fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    fn input(mut self, path: &Path) -> Self {
        self.args.push(path.as_os_str().to_owned());
        self.inputs.push(path.to_path_buf());
        self
    }

    fn output(mut self, path: &Path) -> Self {
        self.args.push(path.as_os_str().to_owned());
        self.outputs.push(path.to_path_buf());
        self
    }

    /// Remove whatever declared outputs exist.
    pub fn remove_outputs(&self) {
        for out in &self.outputs {
            if out.exists() {
                if let Err(e) = fs::remove_file(out) {
                    warn!(tool = self.tool, path = %out.display(), error = %e, "Could not remove partial output");
                }
            }
        }
    }

    fn failure(&self, reason: impl Into<String>) -> IsmError {
        IsmError::ExternalTool {
            tool: self.tool.to_string(),
            reason: reason.into(),
        }
    }
}

/// Executes tool invocations. Implementations must leave either every
/// declared output in place (success) or none of them (failure).
pub trait ToolRunner: Send + Sync {
    fn run(&self, invocation: &ToolInvocation) -> Result<()>;
}

/// Runs tools as child processes with an optional wall-clock limit.
#[derive(Clone, Debug, Default)]
pub struct CommandRunner {
    timeout: Option<Duration>,
}

impl CommandRunner {
    pub fn new(timeout: Option<Duration>) -> Self {
        Self { timeout }
    }

    fn execute(&self, inv: &ToolInvocation) -> Result<()> {
        let mut child = Command::new(&inv.program)
            .args(&inv.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| inv.failure(format!("could not start {}: {e}", inv.program.display())))?;

        // Drain stderr off-thread so a chatty tool cannot block on a full pipe.
        let stderr = child.stderr.take().map(|pipe| {
            thread::spawn(move || {
                let mut buf = Vec::new();
                let _ = pipe.take(MAX_STDERR_BYTES).read_to_end(&mut buf);
                String::from_utf8_lossy(&buf).into_owned()
            })
        });

        let start = Instant::now();
        let status = match self.timeout {
            Some(limit) => match child.wait_timeout(limit)? {
                Some(status) => status,
                None => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(inv.failure(format!(
                        "timed out after {:.1}s",
                        start.elapsed().as_secs_f64()
                    )));
                }
            },
            None => child.wait()?,
        };

        let stderr = stderr
            .and_then(|h| h.join().ok())
            .unwrap_or_default();
        if !status.success() {
            let code = status
                .code()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "signal".into());
            return Err(inv.failure(format!("exit status {code}: {}", stderr.trim())));
        }
        debug!(tool = inv.tool, elapsed_ms = start.elapsed().as_millis() as u64, "Tool finished");
        Ok(())
    }
}

impl ToolRunner for CommandRunner {
    fn run(&self, invocation: &ToolInvocation) -> Result<()> {
        if let Err(e) = self.execute(invocation) {
            invocation.remove_outputs();
            return Err(e);
        }
        if let Some(missing) = invocation.outputs.iter().find(|p| !p.exists()) {
            let err = invocation.failure(format!("did not write {}", missing.display()));
            invocation.remove_outputs();
            return Err(err);
        }
        Ok(())
    }
}

/// Shift transform between a frame's source list and the astrometric reference's.
#[derive(Clone, Debug)]
pub struct GrMatch<'a> {
    pub reference_sources: &'a Path,
    pub input_sources: &'a Path,
    pub output_transform: &'a Path,
}

/// Apply a transform to a frame, producing the registered frame.
#[derive(Clone, Debug)]
pub struct FiTrans<'a> {
    pub frame: &'a Path,
    pub transform: &'a Path,
    pub output_frame: &'a Path,
}

/// Smoothed spatial model of source shape parameters (`.xysdk`), also used as
/// convolution registration.
#[derive(Clone, Debug)]
pub struct GrTrans<'a> {
    pub sources: &'a Path,
    pub output_transform: &'a Path,
}

/// Convolve `reference` onto the PSF of `target`.
#[derive(Clone, Debug)]
pub struct FiConv<'a> {
    pub target: &'a Path,
    pub reference: &'a Path,
    pub registration: &'a Path,
    pub kernel_spec: &'a str,
    pub output_kernel: &'a Path,
    pub output_convolved: &'a Path,
}

/// Aperture photometry of listed sources on a frame.
#[derive(Clone, Debug)]
pub struct FiPhot<'a> {
    pub frame: &'a Path,
    pub source_list: &'a Path,
    pub apertures: &'a str,
    pub gain: Option<f64>,
    pub zeropoint: Option<f64>,
    pub exposure_time: Option<f64>,
    pub output: &'a Path,
}

/// Differential photometry on a subtracted frame against raw reference photometry.
#[derive(Clone, Debug)]
pub struct FiPhotSubtracted<'a> {
    pub subtracted: &'a Path,
    pub raw_photometry: &'a Path,
    pub kernel: &'a Path,
    pub disjoint_radius: f64,
    pub output: &'a Path,
}

/// Source extraction.
#[derive(Clone, Debug)]
pub struct FiStar<'a> {
    pub frame: &'a Path,
    pub flux_threshold: f64,
    pub output: &'a Path,
}

/// The configured tool set together with the runner that executes it.
pub struct Tools {
    config: ToolsConfig,
    runner: Box<dyn ToolRunner>,
}

impl Tools {
    /// Child-process tools with the configured timeout.
    pub fn new(config: ToolsConfig) -> Self {
        let runner = CommandRunner::new(config.timeout_secs.map(Duration::from_secs));
        Self::with_runner(config, runner)
    }

    pub fn with_runner(config: ToolsConfig, runner: impl ToolRunner + 'static) -> Self {
        Self {
            config,
            runner: Box::new(runner),
        }
    }

    fn run(&self, invocation: ToolInvocation) -> Result<()> {
        debug!(tool = invocation.tool, args = ?invocation.args, "Running tool");
        self.runner.run(&invocation)
    }

    pub fn grmatch(&self, a: &GrMatch<'_>) -> Result<()> {
        let inv = ToolInvocation::new("grmatch", &self.config.grmatch)
            .arg("--match-points")
            .arg("-r")
            .input(a.reference_sources)
            .arg("--col-ref")
            .arg("2,3")
            .arg("--col-ref-ordering")
            .arg("+9")
            .arg("-i")
            .input(a.input_sources)
            .arg("--col-inp")
            .arg("2,3")
            .arg("--col-inp-ordering")
            .arg("+9")
            .arg("--weight")
            .arg("reference,column=9")
            .arg("--triangulation")
            .arg("maxinp=5000,maxref=5000,conformable,auto,unitarity=0.01")
            .arg("--order")
            .arg("4")
            .arg("--max-distance")
            .arg("1")
            .arg("--comment")
            .arg("--output-transformation")
            .output(a.output_transform)
            .arg("--output")
            .arg("/dev/null");
        self.run(inv)
    }

    pub fn fitrans(&self, a: &FiTrans<'_>) -> Result<()> {
        let inv = ToolInvocation::new("fitrans", &self.config.fitrans)
            .input(a.frame)
            .arg("-k")
            .arg("--input-transformation")
            .input(a.transform)
            .arg("--reverse")
            .arg("-o")
            .output(a.output_frame);
        self.run(inv)
    }

    pub fn grtrans(&self, a: &GrTrans<'_>) -> Result<()> {
        let inv = ToolInvocation::new("grtrans", &self.config.grtrans)
            .input(a.sources)
            .arg("--col-xy")
            .arg("2,3")
            .arg("--col-fit")
            .arg("6,7,8")
            .arg("--col-weight")
            .arg("10")
            .arg("--order")
            .arg("4")
            .arg("--iterations")
            .arg("3")
            .arg("--rejection-level")
            .arg("3")
            .arg("--comment")
            .arg("--output-transformation")
            .output(a.output_transform);
        self.run(inv)
    }

    pub fn ficonv(&self, a: &FiConv<'_>) -> Result<()> {
        let inv = ToolInvocation::new("ficonv", &self.config.ficonv)
            .arg("-i")
            .input(a.target)
            .arg("-r")
            .input(a.reference)
            .arg("-it")
            .input(a.registration)
            .arg("-k")
            .arg(a.kernel_spec)
            .arg("-ok")
            .output(a.output_kernel)
            .arg("-oc")
            .output(a.output_convolved);
        self.run(inv)
    }

    pub fn fiphot(&self, a: &FiPhot<'_>) -> Result<()> {
        let mut inv = ToolInvocation::new("fiphot", &self.config.fiphot)
            .arg("--input")
            .input(a.frame)
            .arg("--input-list")
            .input(a.source_list)
            .arg("--col-id")
            .arg("1")
            .arg("--col-xy")
            .arg("2,3")
            .arg("--apertures")
            .arg(a.apertures);
        if let Some(gain) = a.gain {
            inv = inv.arg("--gain").arg(gain.to_string());
        }
        if let Some(zp) = a.zeropoint {
            let mag_flux = match a.exposure_time {
                Some(t) => format!("{zp},{t}"),
                None => zp.to_string(),
            };
            inv = inv.arg("--mag-flux").arg(mag_flux);
        }
        let inv = inv
            .arg("--sort-order")
            .arg("+id")
            .arg("--comment")
            .arg("--output")
            .output(a.output);
        self.run(inv)
    }

    pub fn fiphot_subtracted(&self, a: &FiPhotSubtracted<'_>) -> Result<()> {
        let inv = ToolInvocation::new("fiphot", &self.config.fiphot)
            .arg("--input-subtracted")
            .input(a.subtracted)
            .arg("--input-raw-photometry")
            .input(a.raw_photometry)
            .arg("--input-kernel")
            .input(a.kernel)
            .arg("--disjoint-radius")
            .arg(a.disjoint_radius.to_string())
            .arg("--sort-order")
            .arg("+id")
            .arg("--comment")
            .arg("--output")
            .output(a.output);
        self.run(inv)
    }

    pub fn fistar(&self, a: &FiStar<'_>) -> Result<()> {
        let inv = ToolInvocation::new("fistar", &self.config.fistar)
            .input(a.frame)
            .arg("--flux-threshold")
            .arg(a.flux_threshold.to_string())
            .arg("--algorithm")
            .arg("uplink")
            .arg("--format")
            .arg("id,x,y,bg,amp,s,d,k,flux,s/n")
            .arg("--comment")
            .arg("-o")
            .output(a.output);
        self.run(inv)
    }
}
