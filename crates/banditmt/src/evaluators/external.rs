//! Wrappers around external scoring tools.
//!
//! The tools are run to completion on the calling thread with no timeout;
//! a hung scorer blocks training.

use super::{serialize_to_bytes, Evaluator};
use crate::data::Sentence;
use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Output, Stdio};
use tempfile::NamedTempFile;

/// Where the score sits in the first line of the tool's stdout.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ScoreFormat {
    /// Last whitespace-separated token (`"BEER 0.4321"`)
    LastToken,
    /// The whole line (`"31.42"`)
    WholeLine,
}

/// Wrapper for the BEER scorer (<https://github.com/stanojevic/beer>).
///
/// Runs `<wrapper> -r <reference-file> -s <hypothesis-file>`.
#[derive(Clone, Debug)]
pub struct BeerWrapper {
    wrapper: PathBuf,
    interpreter: Option<String>,
    name: String,
}

impl BeerWrapper {
    pub fn new(wrapper: impl Into<PathBuf>) -> Self {
        Self {
            wrapper: wrapper.into(),
            interpreter: None,
            name: "BEER".to_string(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Run the wrapper through an interpreter instead of executing it directly.
    pub fn with_interpreter(mut self, interpreter: impl Into<String>) -> Self {
        self.interpreter = Some(interpreter.into());
        self
    }

    fn run(&self, hypotheses: &[Sentence], references: &[Sentence]) -> std::io::Result<Output> {
        let reffile = write_temp(&serialize_to_bytes(references))?;
        let decfile = write_temp(&serialize_to_bytes(hypotheses))?;

        let mut command = match &self.interpreter {
            Some(interpreter) => {
                let mut command = Command::new(interpreter);
                command.arg(&self.wrapper);
                command
            }
            None => Command::new(&self.wrapper),
        };
        command
            .arg("-r")
            .arg(reffile.path())
            .arg("-s")
            .arg(decfile.path())
            .output()
    }
}

impl Evaluator for BeerWrapper {
    fn name(&self) -> &str {
        &self.name
    }

    fn score(&self, hypotheses: &[Sentence], references: &[Sentence]) -> f64 {
        match self.run(hypotheses, references) {
            Ok(output) => parse_output(&self.name, &output, ScoreFormat::LastToken),
            Err(e) => {
                tracing::error!(wrapper = %self.wrapper.display(), "Failed to run BEER wrapper: {}", e);
                0.0
            }
        }
    }
}

/// Wrapper for a reference BLEU implementation script.
///
/// Runs `<interpreter> <script> <reference-file>` with the hypotheses on
/// stdin; the first stdout line is the score.
#[derive(Clone, Debug)]
pub struct BleuReferenceWrapper {
    script: PathBuf,
    interpreter: String,
    name: String,
}

impl BleuReferenceWrapper {
    pub fn new(script: impl Into<PathBuf>) -> Self {
        Self {
            script: script.into(),
            interpreter: "perl".to_string(),
            name: "BLEU".to_string(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Program used to run the script (default: `perl`).
    pub fn with_interpreter(mut self, interpreter: impl Into<String>) -> Self {
        self.interpreter = interpreter.into();
        self
    }

    fn run(&self, hypotheses: &[Sentence], references: &[Sentence]) -> std::io::Result<Output> {
        let reffile = write_temp(&serialize_to_bytes(references))?;

        let mut child = Command::new(&self.interpreter)
            .arg(&self.script)
            .arg(reffile.path())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(&serialize_to_bytes(hypotheses))?;
        }
        child.wait_with_output()
    }
}

impl Evaluator for BleuReferenceWrapper {
    fn name(&self) -> &str {
        &self.name
    }

    fn score(&self, hypotheses: &[Sentence], references: &[Sentence]) -> f64 {
        match self.run(hypotheses, references) {
            Ok(output) => parse_output(&self.name, &output, ScoreFormat::WholeLine),
            Err(e) => {
                tracing::error!(script = %self.script.display(), "Failed to run BLEU wrapper: {}", e);
                0.0
            }
        }
    }
}

fn write_temp(bytes: &[u8]) -> std::io::Result<NamedTempFile> {
    let mut file = NamedTempFile::new()?;
    file.write_all(bytes)?;
    file.flush()?;
    Ok(file)
}

fn parse_output(tool: &str, output: &Output, format: ScoreFormat) -> f64 {
    let stdout = String::from_utf8_lossy(&output.stdout);
    match parse_score(&stdout, format) {
        Ok(score) => score,
        Err(ParseFailure::NoOutput) => {
            tracing::error!(
                tool,
                stdout = %stdout,
                stderr = %String::from_utf8_lossy(&output.stderr),
                "Malformed output from scorer"
            );
            0.0
        }
        Err(ParseFailure::NotANumber(text)) => {
            tracing::error!(tool, "Value error - '{}' is not a number", text);
            0.0
        }
    }
}

#[derive(Debug, PartialEq)]
enum ParseFailure {
    NoOutput,
    NotANumber(String),
}

fn parse_score(stdout: &str, format: ScoreFormat) -> Result<f64, ParseFailure> {
    let first = stdout.lines().next().ok_or(ParseFailure::NoOutput)?;
    let text = match format {
        ScoreFormat::LastToken => first
            .split_whitespace()
            .last()
            .ok_or(ParseFailure::NoOutput)?,
        ScoreFormat::WholeLine => first.trim(),
    };
    text.parse::<f64>()
        .map_err(|_| ParseFailure::NotANumber(first.to_string()))
}
