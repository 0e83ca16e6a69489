//! # Satisfiability Adapter
//!
//! Wraps an SMT solver. Solver answers are deterministic for a given formula,
//! so results are cached by content hash with a long TTL. When the solver
//! cannot be reached the adapter answers `unknown`, which callers already
//! have to treat conservatively.

use crate::adapters::base::{AdapterService, ResilientAdapter};
use crate::adapters::result::ServiceError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::io::ErrorKind;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

/// Adapter over [`SatisfiabilityService`]
pub type SatisfiabilityAdapter = ResilientAdapter<SatisfiabilityService>;

/// One satisfiability query in SMT-LIB2 text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SatRequest {
    pub formula: String,
    /// Ask the solver for a model when the formula is satisfiable
    #[serde(default)]
    pub produce_model: bool,
}

impl SatRequest {
    pub fn new(formula: impl Into<String>) -> Self {
        Self {
            formula: formula.into(),
            produce_model: false,
        }
    }

    pub fn with_model(mut self) -> Self {
        self.produce_model = true;
        self
    }

    /// Solver script: the formula plus the commands needed to get an answer
    fn script(&self) -> String {
        let mut script = self.formula.trim_end().to_string();
        if !script.contains("(check-sat)") {
            script.push_str("\n(check-sat)");
        }
        if self.produce_model && !script.contains("(get-model)") {
            script.push_str("\n(get-model)");
        }
        script.push('\n');
        script
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SatStatus {
    Sat,
    Unsat,
    Unknown,
}

impl fmt::Display for SatStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SatStatus::Sat => write!(f, "sat"),
            SatStatus::Unsat => write!(f, "unsat"),
            SatStatus::Unknown => write!(f, "unknown"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SatResponse {
    pub status: SatStatus,
    /// Raw `(model ...)` text when one was requested and produced
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// `(error ...)` lines reported by the solver
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub diagnostics: Vec<String>,
}

impl SatResponse {
    pub fn unknown() -> Self {
        Self {
            status: SatStatus::Unknown,
            model: None,
            diagnostics: Vec::new(),
        }
    }

    /// Parse solver stdout: the first status line, any model text after it,
    /// and every `(error ...)` line.
    pub fn parse(output: &str) -> Result<Self, ServiceError> {
        let mut status = None;
        let mut model_lines = Vec::new();
        let mut diagnostics = Vec::new();

        for line in output.lines().map(str::trim).filter(|line| !line.is_empty()) {
            if line.starts_with("(error") {
                diagnostics.push(line.to_string());
                continue;
            }

            match (status, line) {
                (None, "sat") => status = Some(SatStatus::Sat),
                (None, "unsat") => status = Some(SatStatus::Unsat),
                (None, "unknown") => status = Some(SatStatus::Unknown),
                (Some(_), _) => model_lines.push(line),
                (None, _) => {}
            }
        }

        let status = match status {
            Some(status) => status,
            None if !diagnostics.is_empty() => SatStatus::Unknown,
            None => {
                return Err(ServiceError::InvalidResponse(
                    "solver produced no status line".to_string(),
                ))
            }
        };

        Ok(Self {
            status,
            model: (!model_lines.is_empty()).then(|| model_lines.join("\n")),
            diagnostics,
        })
    }
}

/// Seam between the adapter and a concrete solver.
///
/// Returns the solver's raw output for an SMT-LIB2 script.
#[async_trait]
pub trait SmtSolver: Send + Sync {
    async fn run(&self, script: &str) -> Result<String, ServiceError>;
}

/// Runs a solver binary per query, feeding the script on stdin.
///
/// A missing binary is reported as [`ServiceError::Unavailable`], which
/// permanently degrades the adapter to its fallback.
#[derive(Debug, Clone)]
pub struct ProcessSolver {
    program: String,
    args: Vec<String>,
}

impl Default for ProcessSolver {
    fn default() -> Self {
        Self::new("z3", ["-in", "-smt2"])
    }
}

impl ProcessSolver {
    pub fn new<I, A>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }
}

#[async_trait]
impl SmtSolver for ProcessSolver {
    async fn run(&self, script: &str) -> Result<String, ServiceError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // The adapter timeout drops this future; the solver must die with it
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound | ErrorKind::PermissionDenied => {
                    ServiceError::Unavailable(format!("{}: {e}", self.program))
                }
                _ => ServiceError::Failed(format!("failed to start {}: {e}", self.program)),
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(script.as_bytes())
                .await
                .map_err(|e| ServiceError::Failed(format!("failed to write to solver: {e}")))?;
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| ServiceError::Failed(format!("solver did not complete: {e}")))?;

        debug!(
            program = %self.program,
            exit_code = ?output.status.code(),
            stdout_bytes = output.stdout.len(),
            "Solver process finished"
        );

        // Solvers exit non-zero when they print `(error ...)`; stdout still carries the answer
        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if stdout.trim().is_empty() && !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ServiceError::Failed(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }
        Ok(stdout)
    }
}

/// Satisfiability checks through an [`SmtSolver`]
#[derive(Clone)]
pub struct SatisfiabilityService {
    solver: Arc<dyn SmtSolver>,
}

impl fmt::Debug for SatisfiabilityService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SatisfiabilityService").finish_non_exhaustive()
    }
}

impl Default for SatisfiabilityService {
    fn default() -> Self {
        Self::new(Arc::new(ProcessSolver::default()))
    }
}

impl SatisfiabilityService {
    pub fn new(solver: Arc<dyn SmtSolver>) -> Self {
        Self { solver }
    }
}

#[async_trait]
impl AdapterService for SatisfiabilityService {
    type Request = SatRequest;
    type Response = SatResponse;

    async fn execute(&self, request: &SatRequest) -> Result<SatResponse, ServiceError> {
        let output = self.solver.run(&request.script()).await?;
        SatResponse::parse(&output)
    }

    fn validate(&self, response: &SatResponse) -> Result<(), String> {
        if response.diagnostics.is_empty() {
            Ok(())
        } else {
            Err(format!(
                "solver reported errors: {}",
                response.diagnostics.join("; ")
            ))
        }
    }

    fn cache_key(&self, request: &SatRequest) -> Option<String> {
        let digest = hex::encode(Sha256::digest(request.formula.as_bytes()));
        Some(if request.produce_model {
            format!("sat:{digest}:model")
        } else {
            format!("sat:{digest}")
        })
    }

    fn fallback(&self, _request: &SatRequest) -> Option<SatResponse> {
        Some(SatResponse::unknown())
    }
}
