//! Terminal interaction behind a trait so the init flow can run scripted.

use std::collections::VecDeque;
use std::io::{BufRead, IsTerminal, Write};

use console::style;
use dialoguer::theme::ColorfulTheme;
use dialoguer::{Confirm, Input, Password};

use crate::init::error::InitError;

pub trait Prompter {
    /// A visible line of input.
    fn input(&mut self, prompt: &str) -> Result<String, InitError>;

    /// A line of input read without echo.
    fn password(&mut self, prompt: &str) -> Result<String, InitError>;

    fn confirm(&mut self, prompt: &str, default: bool) -> Result<bool, InitError>;

    /// Informational output for the user.
    fn message(&mut self, line: &str);
}

/// Prompts on the controlling terminal. When stdin is not a terminal it warns
/// once and falls back to plain line reads, which echo.
pub struct TerminalPrompter {
    theme: ColorfulTheme,
    interactive: bool,
    warned: bool,
}

impl TerminalPrompter {
    pub fn new() -> Self {
        Self {
            theme: ColorfulTheme::default(),
            interactive: std::io::stdin().is_terminal(),
            warned: false,
        }
    }

    fn read_plain_line(&mut self, prompt: &str) -> Result<String, InitError> {
        if !self.warned {
            eprintln!(
                "{} stdin is not a terminal; input will not be hidden",
                style("warning:").yellow().bold()
            );
            self.warned = true;
        }
        eprint!("{prompt}: ");
        let _ = std::io::stderr().flush();

        let mut line = String::new();
        let read = std::io::stdin()
            .lock()
            .read_line(&mut line)
            .map_err(|e| InitError::user_input("failed to read input").with_cause(e))?;
        if read == 0 {
            return Err(InitError::user_input("input closed").fatal());
        }
        let trimmed = line.trim_end_matches(['\r', '\n']).to_string();
        zeroize::Zeroize::zeroize(&mut line);
        Ok(trimmed)
    }
}

impl Default for TerminalPrompter {
    fn default() -> Self {
        Self::new()
    }
}

fn terminal_error(err: dialoguer::Error) -> InitError {
    InitError::user_input("failed to read from terminal")
        .with_cause(err)
        .fatal()
}

impl Prompter for TerminalPrompter {
    fn input(&mut self, prompt: &str) -> Result<String, InitError> {
        if !self.interactive {
            return self.read_plain_line(prompt);
        }
        Input::<String>::with_theme(&self.theme)
            .with_prompt(prompt)
            .allow_empty(true)
            .interact_text()
            .map_err(terminal_error)
    }

    fn password(&mut self, prompt: &str) -> Result<String, InitError> {
        if !self.interactive {
            return self.read_plain_line(prompt);
        }
        Password::with_theme(&self.theme)
            .with_prompt(prompt)
            .allow_empty_password(true)
            .interact()
            .map_err(terminal_error)
    }

    fn confirm(&mut self, prompt: &str, default: bool) -> Result<bool, InitError> {
        if !self.interactive {
            let hint = if default { "Y/n" } else { "y/N" };
            let answer = self.read_plain_line(&format!("{prompt} [{hint}]"))?;
            return Ok(match answer.trim().to_ascii_lowercase().as_str() {
                "" => default,
                "y" | "yes" => true,
                _ => false,
            });
        }
        Confirm::with_theme(&self.theme)
            .with_prompt(prompt)
            .default(default)
            .interact()
            .map_err(terminal_error)
    }

    fn message(&mut self, line: &str) {
        eprintln!("{line}");
    }
}

/// Answers prompts from a fixed script; records what was asked.
#[derive(Debug, Default)]
pub struct ScriptedPrompter {
    answers: VecDeque<String>,
    confirmations: VecDeque<bool>,
    pub prompts: Vec<String>,
    pub messages: Vec<String>,
}

impl ScriptedPrompter {
    pub fn new<I, S>(answers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            answers: answers.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn with_confirmations(mut self, confirmations: impl IntoIterator<Item = bool>) -> Self {
        self.confirmations = confirmations.into_iter().collect();
        self
    }

    pub fn remaining_answers(&self) -> usize {
        self.answers.len()
    }

    fn next_answer(&mut self, prompt: &str) -> Result<String, InitError> {
        self.prompts.push(prompt.to_string());
        self.answers
            .pop_front()
            .ok_or_else(|| InitError::user_input(format!("no scripted answer for '{prompt}'")).fatal())
    }
}

impl Prompter for ScriptedPrompter {
    fn input(&mut self, prompt: &str) -> Result<String, InitError> {
        self.next_answer(prompt)
    }

    fn password(&mut self, prompt: &str) -> Result<String, InitError> {
        self.next_answer(prompt)
    }

    fn confirm(&mut self, prompt: &str, default: bool) -> Result<bool, InitError> {
        self.prompts.push(prompt.to_string());
        Ok(self.confirmations.pop_front().unwrap_or(default))
    }

    fn message(&mut self, line: &str) {
        self.messages.push(line.to_string());
    }
}
