//! Interactive selection between the recommendation and its alternatives.

use crate::decision::{Action, ConfidenceBand, Decision};
use colored::*;
use std::io::{self, BufRead, Write};

/// What the user chose.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    Accept,
    /// Index into [`Decision::alternatives`].
    Alternative(usize),
    /// Accept the recommendation with an edited title and/or branch name.
    Adjust {
        title: Option<String>,
        branch: Option<String>,
    },
    Cancel,
}

pub trait Selector: Send {
    fn select(&mut self, decision: &Decision) -> io::Result<Selection>;
}

/// Accepts every recommendation without asking.
#[derive(Debug, Default)]
pub struct AutoAccept;

impl Selector for AutoAccept {
    fn select(&mut self, _decision: &Decision) -> io::Result<Selection> {
        Ok(Selection::Accept)
    }
}

/// Line-oriented selector over any reader/writer pair.
pub struct TerminalSelector<R, W> {
    input: R,
    output: W,
}

impl TerminalSelector<io::BufReader<io::Stdin>, io::Stdout> {
    pub fn stdio() -> Self {
        TerminalSelector::new(io::BufReader::new(io::stdin()), io::stdout())
    }
}

impl<R: BufRead, W: Write> TerminalSelector<R, W> {
    pub fn new(input: R, output: W) -> Self {
        TerminalSelector { input, output }
    }

    /// Reads one trimmed line; `None` at end of input.
    fn read_line(&mut self) -> io::Result<Option<String>> {
        let mut line = String::new();
        if self.input.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        Ok(Some(line.trim().to_string()))
    }

    fn ask(&mut self, question: &str) -> io::Result<Option<String>> {
        write!(self.output, "{question}")?;
        self.output.flush()?;
        Ok(self.read_line()?.filter(|answer| !answer.is_empty()))
    }

    fn render(&mut self, decision: &Decision) -> io::Result<()> {
        let out = &mut self.output;
        let confidence = decision.confidence();
        let shown = match confidence.band() {
            ConfidenceBand::High => confidence.to_string().green(),
            ConfidenceBand::Medium => confidence.to_string().yellow(),
            ConfidenceBand::Low => confidence.to_string().red(),
        };

        writeln!(out)?;
        writeln!(
            out,
            "{} {} ({})",
            "Recommendation:".bold(),
            decision.action().description().cyan().bold(),
            shown
        )?;
        if let Some(message) = decision.commit_message() {
            writeln!(out, "  {} {}", "message:".dimmed(), message.title())?;
            if let Some(body) = message.body() {
                for line in body.lines() {
                    writeln!(out, "           {line}")?;
                }
            }
        }
        if let Some(branch) = decision.branch_name() {
            writeln!(out, "  {} {}", "branch:".dimmed(), branch)?;
        }
        if let Some(target) = decision.merge_target() {
            let strategy = decision.merge_strategy().unwrap_or_default();
            writeln!(out, "  {} {} ({})", "merge into:".dimmed(), target, strategy)?;
        }
        writeln!(out, "  {} {}", "why:".dimmed(), decision.reasoning())?;
        if decision.requires_review() {
            writeln!(out, "  {}", "Low confidence, please review before accepting".yellow())?;
        }

        if !decision.alternatives().is_empty() {
            writeln!(out, "\n{}", "Alternatives:".bold())?;
            for (i, alt) in decision.alternatives().iter().enumerate() {
                writeln!(
                    out,
                    "  [{}] {} ({}) {}",
                    i + 1,
                    alt.action().description(),
                    alt.confidence(),
                    alt.description().dimmed()
                )?;
            }
        }
        writeln!(out)?;
        Ok(())
    }

    fn prompt_line(decision: &Decision) -> String {
        let mut options = vec!["[a]ccept".to_string()];
        match decision.alternatives().len() {
            0 => {}
            1 => options.push("[1] alternative".to_string()),
            n => options.push(format!("[1-{n}] alternative")),
        }
        if decision.commit_message().is_some() {
            options.push("[e]dit".to_string());
        }
        options.push("[c]ancel".to_string());
        format!("{}: ", options.join(", "))
    }

    fn adjust(&mut self, decision: &Decision) -> io::Result<Selection> {
        let title = self.ask("New title (blank keeps current): ")?;
        let branch = if decision.action() == Action::CreateBranch {
            self.ask("New branch name (blank keeps current): ")?
        } else {
            None
        };
        if title.is_none() && branch.is_none() {
            return Ok(Selection::Accept);
        }
        Ok(Selection::Adjust { title, branch })
    }
}

impl<R: BufRead + Send, W: Write + Send> Selector for TerminalSelector<R, W> {
    fn select(&mut self, decision: &Decision) -> io::Result<Selection> {
        self.render(decision)?;
        let prompt = Self::prompt_line(decision);
        let alternatives = decision.alternatives().len();

        loop {
            write!(self.output, "{prompt}")?;
            self.output.flush()?;
            let Some(input) = self.read_line()? else {
                return Ok(Selection::Cancel);
            };

            match input.to_lowercase().as_str() {
                "" | "a" | "accept" | "y" | "yes" => return Ok(Selection::Accept),
                "c" | "cancel" | "n" | "no" | "q" => return Ok(Selection::Cancel),
                "e" | "edit" if decision.commit_message().is_some() => return self.adjust(decision),
                other => match other.parse::<usize>() {
                    Ok(n) if (1..=alternatives).contains(&n) => {
                        return Ok(Selection::Alternative(n - 1))
                    }
                    _ => {
                        let complaint = format!("Unrecognized choice '{input}'");
                        writeln!(self.output, "{}", complaint.red())?
                    }
                },
            }
        }
    }
}
