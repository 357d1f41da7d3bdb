//! Operator decisions during discovery and destructive steps.
//!
//! Drivers never read the terminal themselves; they ask an [`Operator`].
//! [`TerminalOperator`] prompts on a terminal, [`AutoOperator`] answers from
//! flags and the recommended [`ScanDecision`].

use std::io::{self, BufRead, Write};

use tracing::info;

use crate::config::NetworkKind;
use crate::discovery::{DiscoveryTable, ScanDecision, ScanStatus};
use crate::error::{ClusterError, Result};
use crate::report;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatorChoice {
    Continue,
    ContinueWithSubset,
    Terminate,
    /// Power-cycle nodes that have not shown up, then keep scanning.
    CyclePowerToMissing,
}

impl From<ScanDecision> for OperatorChoice {
    fn from(decision: ScanDecision) -> Self {
        match decision {
            ScanDecision::Continue => OperatorChoice::Continue,
            ScanDecision::ContinueWithSubset => OperatorChoice::ContinueWithSubset,
            ScanDecision::Terminate => OperatorChoice::Terminate,
        }
    }
}

pub trait Operator {
    /// y/n before a destructive action.
    fn confirm(&mut self, question: &str) -> Result<bool>;

    /// Called after every scan round.
    fn progress(&mut self, network: NetworkKind, round: u32, table: &DiscoveryTable);

    /// Called after every scan round that fell short of the expected count.
    fn on_incomplete(
        &mut self,
        status: &ScanStatus,
        recommended: ScanDecision,
    ) -> Result<OperatorChoice>;
}

/// Answers without asking.
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoOperator {
    pub assume_yes: bool,
}

impl Operator for AutoOperator {
    fn confirm(&mut self, question: &str) -> Result<bool> {
        info!(question, answer = self.assume_yes, "answered without prompting");
        Ok(self.assume_yes)
    }

    fn progress(&mut self, network: NetworkKind, round: u32, table: &DiscoveryTable) {
        info!(%network, round, found = table.len(), expected = table.expected(), "scan progress");
    }

    fn on_incomplete(
        &mut self,
        status: &ScanStatus,
        recommended: ScanDecision,
    ) -> Result<OperatorChoice> {
        match recommended {
            ScanDecision::Terminate => Err(status.timeout()),
            other => Ok(other.into()),
        }
    }
}

/// Prompts on a terminal.
pub struct TerminalOperator<R, W> {
    input: R,
    output: W,
}

impl TerminalOperator<io::StdinLock<'static>, io::Stdout> {
    pub fn stdio() -> Self {
        Self::new(io::stdin().lock(), io::stdout())
    }
}

impl<R: BufRead, W: Write> TerminalOperator<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }

    fn ask(&mut self, prompt: &str) -> Result<String> {
        let io_err = |err: io::Error| ClusterError::UserCritical(format!("terminal: {err}"));
        write!(self.output, "{prompt}").map_err(io_err)?;
        self.output.flush().map_err(io_err)?;
        let mut line = String::new();
        if self.input.read_line(&mut line).map_err(io_err)? == 0 {
            return Err(ClusterError::Terminated);
        }
        Ok(line.trim().to_ascii_lowercase())
    }
}

impl<R: BufRead, W: Write> Operator for TerminalOperator<R, W> {
    fn confirm(&mut self, question: &str) -> Result<bool> {
        loop {
            match self.ask(&format!("{question} [y/n]: "))?.as_str() {
                "y" | "yes" => return Ok(true),
                "n" | "no" => return Ok(false),
                _ => continue,
            }
        }
    }

    fn progress(&mut self, network: NetworkKind, round: u32, table: &DiscoveryTable) {
        let rendered = report::render_discovery(network, round, table);
        let _ = writeln!(self.output, "{rendered}");
    }

    fn on_incomplete(
        &mut self,
        status: &ScanStatus,
        recommended: ScanDecision,
    ) -> Result<OperatorChoice> {
        let default = match recommended {
            ScanDecision::Continue => "c",
            ScanDecision::ContinueWithSubset => "s",
            ScanDecision::Terminate => "t",
        };
        let prompt = format!(
            "{status}\n[c]ontinue scanning, continue with [s]ubset, cycle [p]ower to missing, [t]erminate ({default}): "
        );
        loop {
            let answer = self.ask(&prompt)?;
            let answer = if answer.is_empty() { default } else { answer.as_str() };
            match answer {
                "c" => return Ok(OperatorChoice::Continue),
                "s" => return Ok(OperatorChoice::ContinueWithSubset),
                "p" => return Ok(OperatorChoice::CyclePowerToMissing),
                "t" => return Ok(OperatorChoice::Terminate),
                _ => continue,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::{AutoOperator, Operator, OperatorChoice, TerminalOperator};
    use crate::config::NetworkKind;
    use crate::discovery::{ScanDecision, ScanStatus};
    use crate::error::ClusterError;

    fn status(found: usize) -> ScanStatus {
        ScanStatus {
            network: NetworkKind::Ipmi,
            found,
            expected: 4,
            rounds: 25,
            remaining: 0,
        }
    }

    #[test]
    fn terminal_reprompts_until_it_understands() {
        let mut out = Vec::new();
        let mut operator = TerminalOperator::new(Cursor::new("maybe\nY\n"), &mut out);
        assert!(operator.confirm("Deconfigure MLAG?").expect("answer"));
        let shown = String::from_utf8(out).expect("utf8");
        assert_eq!(shown.matches("[y/n]").count(), 2);
    }

    #[test]
    fn empty_answer_takes_the_recommendation() {
        let mut out = Vec::new();
        let mut operator = TerminalOperator::new(Cursor::new("\np\n"), &mut out);
        let first = operator
            .on_incomplete(&status(2), ScanDecision::ContinueWithSubset)
            .expect("choice");
        assert_eq!(first, OperatorChoice::ContinueWithSubset);
        let second = operator
            .on_incomplete(&status(2), ScanDecision::ContinueWithSubset)
            .expect("choice");
        assert_eq!(second, OperatorChoice::CyclePowerToMissing);
    }

    #[test]
    fn closed_input_terminates() {
        let mut operator = TerminalOperator::new(Cursor::new(""), Vec::new());
        let err = operator.confirm("Proceed?").expect_err("no input");
        assert!(matches!(err, ClusterError::Terminated));
    }

    #[test]
    fn auto_operator_times_out_when_nothing_was_found() {
        let mut operator = AutoOperator::default();
        assert!(!operator.confirm("Proceed?").expect("answer"));
        let err = operator
            .on_incomplete(&status(0), ScanDecision::Terminate)
            .expect_err("should time out");
        assert!(matches!(err, ClusterError::TimeoutExceeded { found: 0, .. }));
        let choice = operator
            .on_incomplete(&status(2), ScanDecision::ContinueWithSubset)
            .expect("choice");
        assert_eq!(choice, OperatorChoice::ContinueWithSubset);
    }
}
