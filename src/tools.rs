use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::str::FromStr;
use std::thread;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::KiraError;
use crate::tasks::CancelToken;

/// External collaborators invoked through the command-line contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Tool {
    ExtractNucleotides,
    Translate,
    Digest,
    PredictPi,
    PiServer,
    SplitFractions,
    TargetDecoy,
    DecoyOnly,
    Search,
    SearchTable,
    Validate,
}

impl Tool {
    pub const ALL: [Tool; 11] = [
        Tool::ExtractNucleotides,
        Tool::Translate,
        Tool::Digest,
        Tool::PredictPi,
        Tool::PiServer,
        Tool::SplitFractions,
        Tool::TargetDecoy,
        Tool::DecoyOnly,
        Tool::Search,
        Tool::SearchTable,
        Tool::Validate,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Tool::ExtractNucleotides => "extract",
            Tool::Translate => "translate",
            Tool::Digest => "digest",
            Tool::PredictPi => "pi-annotate",
            Tool::PiServer => "pi-server",
            Tool::SplitFractions => "split-fractions",
            Tool::TargetDecoy => "target-decoy",
            Tool::DecoyOnly => "decoy-only",
            Tool::Search => "search",
            Tool::SearchTable => "search-table",
            Tool::Validate => "validate",
        }
    }

    /// Placeholders a template for this tool may reference.
    pub fn placeholders(&self) -> &'static [&'static str] {
        match self {
            Tool::ExtractNucleotides => &["input", "output", "genome"],
            Tool::Translate => &["input", "output"],
            Tool::Digest => &["input", "output", "enzyme", "missed_cleavages"],
            Tool::PredictPi => &["input", "output"],
            Tool::PiServer => &[],
            Tool::SplitFractions => &[
                "input",
                "reference",
                "fractions_list",
                "intercept",
                "width",
                "tolerance",
                "amount",
                "prefix",
                "outdir",
            ],
            Tool::TargetDecoy => &["target", "canonical", "output"],
            Tool::DecoyOnly => &["canonical", "output"],
            Tool::Search => &["spectra", "database", "output", "mods", "threads"],
            Tool::SearchTable => &["input", "output"],
            Tool::Validate => &["set", "inputs_list", "output"],
        }
    }

    pub fn default_spec(&self) -> ToolSpec {
        let (program, args): (&str, &[&str]) = match self {
            Tool::ExtractNucleotides => ("gffread", &["-w", "{output}", "-g", "{genome}", "{input}"]),
            Tool::Translate => (
                "transeq",
                &["-sequence", "{input}", "-outseq", "{output}", "-frame", "F"],
            ),
            Tool::Digest => (
                "pg-digest",
                &[
                    "--enzyme",
                    "{enzyme}",
                    "--missed-cleavages",
                    "{missed_cleavages}",
                    "{input}",
                    "{output}",
                ],
            ),
            Tool::PredictPi => ("pg-pi-annotate", &["{input}", "{output}"]),
            Tool::PiServer => ("pg-pi-server", &[]),
            Tool::SplitFractions => (
                "pg-pi-split",
                &[
                    "--peptides",
                    "{input}",
                    "--reference",
                    "{reference}",
                    "--fractions",
                    "{fractions_list}",
                    "--intercept",
                    "{intercept}",
                    "--width",
                    "{width}",
                    "--tolerance",
                    "{tolerance}",
                    "--amount",
                    "{amount}",
                    "--prefix",
                    "{prefix}",
                    "--outdir",
                    "{outdir}",
                ],
            ),
            Tool::TargetDecoy => (
                "pg-target-decoy",
                &["--target", "{target}", "--canonical", "{canonical}", "--output", "{output}"],
            ),
            Tool::DecoyOnly => (
                "pg-target-decoy",
                &["--canonical", "{canonical}", "--output", "{output}"],
            ),
            Tool::Search => (
                "msgf_plus",
                &[
                    "-s",
                    "{spectra}",
                    "-d",
                    "{database}",
                    "-o",
                    "{output}",
                    "-mod",
                    "{mods}",
                    "-thread",
                    "{threads}",
                    "-tda",
                    "0",
                    "-t",
                    "10.0ppm",
                    "-ti",
                    "-1,2",
                    "-m",
                    "0",
                    "-inst",
                    "3",
                    "-e",
                    "1",
                    "-protocol",
                    "0",
                    "-ntt",
                    "2",
                    "-minLength",
                    "7",
                    "-maxLength",
                    "50",
                    "-minCharge",
                    "2",
                    "-maxCharge",
                    "6",
                    "-n",
                    "1",
                    "-addFeatures",
                    "1",
                ],
            ),
            Tool::SearchTable => (
                "msgf_plus",
                &["edu.ucsd.msjava.ui.MzIDToTsv", "-i", "{input}", "-o", "{output}"],
            ),
            Tool::Validate => (
                "pg-percolate",
                &["--set", "{set}", "--inputs", "{inputs_list}", "--output", "{output}"],
            ),
        };
        ToolSpec {
            program: program.to_string(),
            args: args.iter().map(|arg| arg.to_string()).collect(),
        }
    }
}

impl fmt::Display for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for Tool {
    type Err = KiraError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Tool::ALL
            .into_iter()
            .find(|tool| tool.name() == value.trim())
            .ok_or_else(|| KiraError::InvalidConfig(format!("unknown tool: {value}")))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub program: String,
    pub args: Vec<String>,
}

impl ToolSpec {
    /// Substitutes `{name}` placeholders in every argument.
    pub fn render(&self, bindings: &BTreeMap<&'static str, String>) -> Result<Vec<String>, KiraError> {
        self.args
            .iter()
            .map(|arg| render_template(arg, |name| bindings.get(name).map(String::as_str)))
            .collect()
    }

    fn validate(&self, tool: Tool) -> Result<(), KiraError> {
        if self.program.trim().is_empty() {
            return Err(KiraError::InvalidConfig(format!("{tool}: empty program")));
        }
        let allowed = tool.placeholders();
        for arg in &self.args {
            render_template(arg, |name| allowed.contains(&name).then_some(""))
                .map_err(|err| KiraError::InvalidConfig(format!("{tool}: {err}")))?;
        }
        Ok(())
    }
}

fn render_template<'b>(
    template: &str,
    lookup: impl Fn(&str) -> Option<&'b str>,
) -> Result<String, KiraError> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        let Some(end) = after.find('}') else {
            out.push_str(&rest[start..]);
            return Ok(out);
        };
        let name = &after[..end];
        let value = lookup(name).ok_or_else(|| {
            KiraError::InvalidConfig(format!("unbound placeholder {{{name}}} in {template:?}"))
        })?;
        out.push_str(value);
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolTable {
    specs: BTreeMap<Tool, ToolSpec>,
}

impl Default for ToolTable {
    fn default() -> Self {
        Self {
            specs: Tool::ALL
                .into_iter()
                .map(|tool| (tool, tool.default_spec()))
                .collect(),
        }
    }
}

impl ToolTable {
    pub fn get(&self, tool: Tool) -> &ToolSpec {
        // every tool is seeded in Default and never removed
        &self.specs[&tool]
    }

    pub fn override_program(&mut self, tool: Tool, program: String) {
        if let Some(spec) = self.specs.get_mut(&tool) {
            spec.program = program;
        }
    }

    pub fn override_args(&mut self, tool: Tool, args: Vec<String>) {
        if let Some(spec) = self.specs.get_mut(&tool) {
            spec.args = args;
        }
    }

    pub fn validate(&self) -> Result<(), KiraError> {
        for (tool, spec) in &self.specs {
            spec.validate(*tool)?;
        }
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Tool, &ToolSpec)> {
        self.specs.iter()
    }
}

/// One call of an external tool: the bindings for its argument template,
/// the artifacts it must leave behind, and where its console output goes.
#[derive(Debug, Clone)]
pub struct ToolInvocation {
    pub tool: Tool,
    pub label: String,
    pub bindings: BTreeMap<&'static str, String>,
    pub outputs: Vec<Utf8PathBuf>,
    pub log: Utf8PathBuf,
}

impl ToolInvocation {
    pub fn new(tool: Tool, label: impl Into<String>, log: Utf8PathBuf) -> Self {
        Self {
            tool,
            label: label.into(),
            bindings: BTreeMap::new(),
            outputs: Vec::new(),
            log,
        }
    }

    pub fn bind(mut self, name: &'static str, value: impl ToString) -> Self {
        self.bindings.insert(name, value.to_string());
        self
    }

    pub fn expect_output(mut self, path: &Utf8Path) -> Self {
        self.outputs.push(path.to_path_buf());
        self
    }

    pub fn binding(&self, name: &str) -> Option<&str> {
        self.bindings.get(name).map(String::as_str)
    }
}

/// A helper process that lives for the duration of a stage. Killed on drop.
#[derive(Debug, Default)]
pub struct CoProcess {
    child: Option<Child>,
    tool: Option<Tool>,
}

impl CoProcess {
    pub fn detached() -> Self {
        Self::default()
    }

    fn spawned(tool: Tool, child: Child) -> Self {
        Self {
            child: Some(child),
            tool: Some(tool),
        }
    }

    pub fn is_running(&mut self) -> bool {
        match self.child.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }
}

impl Drop for CoProcess {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take() {
            if let Err(err) = child.kill() {
                debug!("co-process already exited: {err}");
            }
            let _ = child.wait();
            if let Some(tool) = self.tool {
                debug!(tool = %tool, "co-process stopped");
            }
        }
    }
}

pub trait ToolRunner: Send + Sync {
    /// Runs one invocation to completion. Success means exit status zero and
    /// every declared output present.
    fn run(&self, invocation: &ToolInvocation, cancel: &CancelToken) -> Result<(), KiraError>;

    /// Starts a helper process that must stay up while a stage runs.
    fn spawn(&self, _invocation: &ToolInvocation) -> Result<CoProcess, KiraError> {
        Ok(CoProcess::detached())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolStatus {
    pub tool: String,
    pub program: String,
    pub resolved: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SystemToolRunner {
    tools: ToolTable,
    poll_interval: Duration,
}

impl SystemToolRunner {
    pub fn new(tools: ToolTable) -> Self {
        Self {
            tools,
            poll_interval: Duration::from_millis(100),
        }
    }

    pub fn resolve_program(&self, tool: Tool) -> Result<PathBuf, KiraError> {
        let program = &self.tools.get(tool).program;
        resolve_program(program).ok_or_else(|| KiraError::MissingTool(program.clone()))
    }

    pub fn tool_report(&self) -> Vec<ToolStatus> {
        self.tools
            .iter()
            .map(|(tool, spec)| ToolStatus {
                tool: tool.name().to_string(),
                program: spec.program.clone(),
                resolved: resolve_program(&spec.program).map(|path| path.display().to_string()),
            })
            .collect()
    }

    fn command(&self, invocation: &ToolInvocation) -> Result<Command, KiraError> {
        let program = self.resolve_program(invocation.tool)?;
        let args = self.tools.get(invocation.tool).render(&invocation.bindings)?;
        if let Some(parent) = invocation.log.parent() {
            fs::create_dir_all(parent.as_std_path())
                .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        }
        let log = fs::File::create(invocation.log.as_std_path())
            .map_err(|err| KiraError::Filesystem(format!("create {}: {err}", invocation.log)))?;
        let log_err = log
            .try_clone()
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;

        debug!(
            tool = %invocation.tool,
            label = %invocation.label,
            "{} {}",
            program.display(),
            args.join(" ")
        );
        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(log_err));
        Ok(cmd)
    }
}

impl ToolRunner for SystemToolRunner {
    fn run(&self, invocation: &ToolInvocation, cancel: &CancelToken) -> Result<(), KiraError> {
        cancel.check()?;
        clear_outputs(invocation)?;
        let mut child = self
            .command(invocation)?
            .spawn()
            .map_err(|err| KiraError::MissingTool(format!("{}: {err}", invocation.tool)))?;

        let status = loop {
            if cancel.is_cancelled() {
                if let Err(err) = child.kill() {
                    debug!("kill after cancel: {err}");
                }
                let _ = child.wait();
                warn!(tool = %invocation.tool, label = %invocation.label, "killed after cancellation");
                return Err(KiraError::Cancelled);
            }
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) => thread::sleep(self.poll_interval),
                Err(err) => return Err(KiraError::Filesystem(err.to_string())),
            }
        };

        if !status.success() {
            return Err(KiraError::ExternalTool {
                tool: invocation.tool.to_string(),
                status: status
                    .code()
                    .map(|code| code.to_string())
                    .unwrap_or_else(|| "signal".to_string()),
                log: invocation.log.to_string(),
            });
        }
        check_outputs(invocation)
    }

    fn spawn(&self, invocation: &ToolInvocation) -> Result<CoProcess, KiraError> {
        let child = self
            .command(invocation)?
            .spawn()
            .map_err(|err| KiraError::MissingTool(format!("{}: {err}", invocation.tool)))?;
        debug!(tool = %invocation.tool, pid = child.id(), "co-process started");
        Ok(CoProcess::spawned(invocation.tool, child))
    }
}

/// Removes declared outputs so only files written by this invocation can
/// satisfy [`check_outputs`].
pub fn clear_outputs(invocation: &ToolInvocation) -> Result<(), KiraError> {
    for output in &invocation.outputs {
        match fs::remove_file(output.as_std_path()) {
            Ok(()) => debug!(tool = %invocation.tool, "removed previous {output}"),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => {
                return Err(KiraError::Filesystem(format!("remove {output}: {err}")));
            }
        }
    }
    Ok(())
}

/// Exit status zero is not enough: the conventional artifacts must exist.
pub fn check_outputs(invocation: &ToolInvocation) -> Result<(), KiraError> {
    for output in &invocation.outputs {
        if !output.as_std_path().exists() {
            return Err(KiraError::MissingOutput {
                tool: invocation.tool.to_string(),
                path: output.to_string(),
            });
        }
    }
    Ok(())
}

fn resolve_program(program: &str) -> Option<PathBuf> {
    let path = Path::new(program);
    if path.components().count() > 1 {
        return path.exists().then(|| path.to_path_buf());
    }
    find_in_path(program)
}

fn find_in_path(name: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    for path in std::env::split_paths(&path_var) {
        let exe = path.join(format!("{name}.exe"));
        if exe.exists() {
            return Some(exe);
        }
        let plain = path.join(name);
        if plain.exists() {
            return Some(plain);
        }
    }
    None
}
