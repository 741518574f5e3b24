//! Interpolating backend driving an external SMT-LIB2 solver process.
//!
//! Each pushed formula becomes a named assertion in its own `push` scope.
//! Interpolation uses the `get-interpolants` command over those names, which
//! answers pairwise and sequence queries in one round trip.

use std::collections::{BTreeSet, HashMap};
use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command, Stdio};

use thiserror::Error;
use tracing::debug;

use crate::backends::sexp::{paren_balance, parse_all, to_term, Sexp};
use crate::backends::smtlib_printer::{sort_to_smtlib, symbol, to_smtlib};
use crate::solver::{InterpolatingSolver, Model, ModelValue, SatResult, SolverFactory};
use crate::sorts::SmtSort;
use crate::terms::{infer_sorts, SmtTerm};

#[derive(Debug, Error)]
pub enum SmtLibError {
    #[error("solver I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("solver not found: {0}")]
    NotFound(String),
    #[error("solver error: {0}")]
    SolverError(String),
    #[error("failed to parse solver output: {0}")]
    ParseError(String),
    #[error("pop on empty stack")]
    EmptyStack,
}

/// Name of one pushed assertion.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SmtLibGroup(String);

/// How to launch the external solver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmtLibCommand {
    pub program: String,
    pub args: Vec<String>,
    pub timeout_ms: Option<u64>,
}

impl Default for SmtLibCommand {
    fn default() -> Self {
        Self {
            program: "smtinterpol".to_string(),
            args: vec!["-q".to_string()],
            timeout_ms: None,
        }
    }
}

pub struct SmtLibSolver {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
    stderr: BufReader<ChildStderr>,
    declared: HashMap<String, SmtSort>,
    stack: Vec<SmtLibGroup>,
    next_group: u64,
}

impl SmtLibSolver {
    pub fn new() -> Result<Self, SmtLibError> {
        Self::with_command(&SmtLibCommand::default())
    }

    pub fn with_command(command: &SmtLibCommand) -> Result<Self, SmtLibError> {
        let mut child = Command::new(&command.program)
            .args(&command.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| SmtLibError::NotFound(format!("{}: {e}", command.program)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| SmtLibError::SolverError("failed to capture solver stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SmtLibError::SolverError("failed to capture solver stdout".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| SmtLibError::SolverError("failed to capture solver stderr".into()))?;

        let mut solver = Self {
            child,
            stdin,
            stdout: BufReader::new(stdout),
            stderr: BufReader::new(stderr),
            declared: HashMap::new(),
            stack: Vec::new(),
            next_group: 0,
        };

        for line in setup_commands(command.timeout_ms) {
            solver.send_command_no_response(&line)?;
        }
        Ok(solver)
    }

    fn send_command_no_response(&mut self, cmd: &str) -> Result<(), SmtLibError> {
        writeln!(self.stdin, "{cmd}")?;
        self.stdin.flush()?;
        Ok(())
    }

    /// Send `cmd` and read one complete S-expression or atom in response.
    fn send_command(&mut self, cmd: &str) -> Result<String, SmtLibError> {
        self.send_command_no_response(cmd)?;

        let mut response = String::new();
        loop {
            let mut line = String::new();
            let read = self.stdout.read_line(&mut line)?;
            if read == 0 {
                let mut stderr = String::new();
                let _ = self.stderr.read_line(&mut stderr);
                return Err(SmtLibError::SolverError(format!(
                    "no response for command `{cmd}`. stderr: {}",
                    stderr.trim()
                )));
            }
            response.push_str(&line);
            if !response.trim().is_empty() && paren_balance(&response) <= 0 {
                break;
            }
        }
        let response = response.trim().to_string();
        if response.starts_with("(error") {
            return Err(SmtLibError::SolverError(response));
        }
        Ok(response)
    }

    fn declare_new_vars(&mut self, formula: &SmtTerm) -> Result<(), SmtLibError> {
        for (name, sort) in infer_sorts([formula]) {
            if self.declared.contains_key(&name) {
                continue;
            }
            self.send_command_no_response(&declare_command(&name, sort))?;
            self.declared.insert(name, sort);
        }
        Ok(())
    }

    fn parse_interpolants(&self, response: &str, expected: usize) -> Result<Vec<SmtTerm>, SmtLibError> {
        let parsed = parse_all(response).map_err(SmtLibError::ParseError)?;
        let items = match parsed.as_slice() {
            [Sexp::List(items)] => items,
            _ => {
                return Err(SmtLibError::ParseError(format!(
                    "expected an interpolant list, got `{response}`"
                )))
            }
        };
        if items.len() != expected {
            return Err(SmtLibError::SolverError(format!(
                "expected {expected} interpolants, solver returned {}",
                items.len()
            )));
        }
        items
            .iter()
            .map(|item| to_term(item).map_err(SmtLibError::ParseError))
            .collect()
    }
}

impl Drop for SmtLibSolver {
    fn drop(&mut self) {
        let _ = writeln!(self.stdin, "(exit)");
        let _ = self.stdin.flush();
        let _ = self.child.wait();
    }
}

impl InterpolatingSolver for SmtLibSolver {
    type Error = SmtLibError;
    type Group = SmtLibGroup;

    fn push(&mut self, formula: &SmtTerm) -> Result<SmtLibGroup, SmtLibError> {
        self.declare_new_vars(formula)?;
        let group = SmtLibGroup(format!("IP_{}", self.next_group));
        self.next_group += 1;
        self.send_command_no_response("(push 1)")?;
        self.send_command_no_response(&format!(
            "(assert (! {} :named {}))",
            to_smtlib(formula),
            group.0
        ))?;
        self.stack.push(group.clone());
        Ok(group)
    }

    fn pop(&mut self) -> Result<(), SmtLibError> {
        if self.stack.is_empty() {
            return Err(SmtLibError::EmptyStack);
        }
        self.send_command_no_response("(pop 1)")?;
        self.stack.pop();
        Ok(())
    }

    fn check_sat(&mut self) -> Result<SatResult, SmtLibError> {
        let response = self.send_command("(check-sat)")?;
        debug!(depth = self.stack.len(), %response, "smt-lib check");
        parse_check_sat(&response)
    }

    fn model(&mut self) -> Result<Model, SmtLibError> {
        if self.declared.is_empty() {
            return Ok(Model::new());
        }
        let mut names: Vec<(String, SmtSort)> =
            self.declared.iter().map(|(n, s)| (n.clone(), *s)).collect();
        names.sort();
        let payload: Vec<String> = names.iter().map(|(n, _)| symbol(n)).collect();
        let response = self.send_command(&format!("(get-value ({}))", payload.join(" ")))?;
        parse_model(&response, &names)
    }

    fn interpolant(&mut self, a_side: &[SmtLibGroup]) -> Result<SmtTerm, SmtLibError> {
        let a: BTreeSet<&SmtLibGroup> = a_side.iter().collect();
        let b: Vec<SmtLibGroup> = self
            .stack
            .iter()
            .filter(|g| !a.contains(g))
            .cloned()
            .collect();
        let cmd = format!(
            "(get-interpolants {} {})",
            partition_term(a_side),
            partition_term(&b)
        );
        let response = self.send_command(&cmd)?;
        let mut itps = self.parse_interpolants(&response, 1)?;
        itps.pop()
            .ok_or_else(|| SmtLibError::ParseError("empty interpolant list".into()))
    }

    fn supports_sequence_interpolants(&self) -> bool {
        true
    }

    fn sequence_interpolants(
        &mut self,
        partitions: &[Vec<SmtLibGroup>],
    ) -> Result<Vec<SmtTerm>, SmtLibError> {
        if partitions.len() < 2 {
            return Ok(Vec::new());
        }
        let args: Vec<String> = partitions.iter().map(|p| partition_term(p)).collect();
        let response = self.send_command(&format!("(get-interpolants {})", args.join(" ")))?;
        self.parse_interpolants(&response, partitions.len() - 1)
    }
}

/// Factory spawning one solver process per session.
#[derive(Debug, Clone, Default)]
pub struct SmtLibSolverFactory {
    pub command: SmtLibCommand,
}

impl SolverFactory for SmtLibSolverFactory {
    type Solver = SmtLibSolver;

    fn create(&self) -> Result<SmtLibSolver, SmtLibError> {
        SmtLibSolver::with_command(&self.command)
    }
}

fn setup_commands(timeout_ms: Option<u64>) -> Vec<String> {
    let mut lines = vec![
        "(set-option :print-success false)".to_string(),
        "(set-option :produce-models true)".to_string(),
        "(set-option :produce-interpolants true)".to_string(),
        "(set-option :global-declarations true)".to_string(),
    ];
    if let Some(ms) = timeout_ms {
        lines.push(format!("(set-option :timeout {ms})"));
    }
    lines.push("(set-logic QF_LIA)".to_string());
    lines
}

fn declare_command(name: &str, sort: SmtSort) -> String {
    format!("(declare-fun {} () {})", symbol(name), sort_to_smtlib(&sort))
}

fn partition_term(groups: &[SmtLibGroup]) -> String {
    match groups {
        [] => "true".to_string(),
        [single] => single.0.clone(),
        many => {
            let names: Vec<&str> = many.iter().map(|g| g.0.as_str()).collect();
            format!("(and {})", names.join(" "))
        }
    }
}

fn parse_check_sat(response: &str) -> Result<SatResult, SmtLibError> {
    match response {
        "sat" => Ok(SatResult::Sat),
        "unsat" => Ok(SatResult::Unsat),
        "unknown" => Ok(SatResult::Unknown("solver returned unknown".into())),
        other => Err(SmtLibError::SolverError(other.to_string())),
    }
}

fn parse_model(response: &str, vars: &[(String, SmtSort)]) -> Result<Model, SmtLibError> {
    let parsed = parse_all(response).map_err(SmtLibError::ParseError)?;
    let pairs = match parsed.as_slice() {
        [Sexp::List(pairs)] => pairs,
        _ => {
            return Err(SmtLibError::ParseError(format!(
                "expected a value list, got `{response}`"
            )))
        }
    };
    let sorts: HashMap<&str, SmtSort> = vars.iter().map(|(n, s)| (n.as_str(), *s)).collect();
    let mut model = Model::new();
    for pair in pairs {
        let (name, value) = match pair {
            Sexp::List(items) if items.len() == 2 => (&items[0], &items[1]),
            _ => return Err(SmtLibError::ParseError(format!("malformed value entry {pair:?}"))),
        };
        let name = name
            .as_atom()
            .ok_or_else(|| SmtLibError::ParseError(format!("malformed value name {name:?}")))?;
        let term = to_term(value).map_err(SmtLibError::ParseError)?;
        let value = match (sorts.get(name), Model::new().evaluate(&term)) {
            (Some(SmtSort::Int), Some(v @ ModelValue::Int(_)))
            | (Some(SmtSort::Bool), Some(v @ ModelValue::Bool(_))) => v,
            _ => {
                return Err(SmtLibError::ParseError(format!(
                    "unexpected value for `{name}`: {value:?}"
                )))
            }
        };
        model.insert(name, value);
    }
    Ok(model)
}
