use std::{
    os::unix::process::ExitStatusExt,
    process::{Command, Output},
};

use anyhow::{bail, Context, Error};
use log::trace;

use crate::crate_private::Sealed;

/// Checks the exit status of a finished process. Failures carry the captured
/// stdout and stderr.
pub trait OutputChecker: Sealed {
    /// Human readable exit status.
    fn explain_exit(&self) -> String;

    /// Captured stdout and stderr, empty streams left out.
    fn output_report(&self) -> String;

    fn check(&self) -> Result<(), Error>;
}

impl Sealed for Output {}

impl OutputChecker for Output {
    fn explain_exit(&self) -> String {
        if let Some(code) = self.status.code() {
            format!("process exited with status: {code}")
        } else if let Some(signal) = self.status.signal() {
            format!("process was terminated by signal: {signal}")
        } else {
            "process exited with unknown status".into()
        }
    }

    fn output_report(&self) -> String {
        [("stdout", &self.stdout), ("stderr", &self.stderr)]
            .into_iter()
            .filter(|(_, stream)| !stream.is_empty())
            .map(|(name, stream)| format!("{name}:\n{}", String::from_utf8_lossy(stream)))
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn check(&self) -> Result<(), Error> {
        if self.status.success() {
            return Ok(());
        }

        match self.output_report() {
            report if report.is_empty() => {
                bail!("{} (no output was captured)", self.explain_exit())
            }
            report => bail!("{}\n{report}", self.explain_exit()),
        }
    }
}

pub trait RunAndCheck: Sealed {
    /// Runs the command to completion and fails unless it exited successfully.
    fn run_and_check(&mut self) -> Result<(), Error>;

    fn render_command(&self) -> String;
}

impl Sealed for Command {}

impl RunAndCheck for Command {
    fn run_and_check(&mut self) -> Result<(), Error> {
        let rendered_command = self.render_command();
        trace!("Executing '{rendered_command}'");

        let output = self
            .output()
            .with_context(|| format!("Failed to execute '{rendered_command}'"))?;
        trace!(
            "Executed '{rendered_command}': {}",
            output.explain_exit()
        );

        output
            .check()
            .with_context(|| format!("Error when running: {rendered_command}"))
    }

    fn render_command(&self) -> String {
        std::iter::once(self.get_program())
            .chain(self.get_args())
            .map(|part| part.to_string_lossy())
            .map(|part| {
                if part.contains(' ') {
                    format!("'{part}'")
                } else {
                    part.into_owned()
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}
