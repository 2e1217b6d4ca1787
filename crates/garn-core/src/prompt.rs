//! Interactive prompts
//!
//! When prompting is disabled (CI servers, `--no-prompt`) free-form questions
//! answer with an empty string, confirmations answer "no" and selections fail
//! with [`PromptError::NonInteractive`].

use dialoguer::{Confirm, Input, MultiSelect, Select};
use regex::Regex;

use crate::error::PromptError;

/// One entry of a selection list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Choice {
    /// Label shown to the user
    pub name: String,
    /// Value returned when chosen
    pub value: String,
    /// Initially ticked (multi-select only)
    pub checked: bool,
}

impl Choice {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            checked: false,
        }
    }

    pub fn checked(mut self, checked: bool) -> Self {
        self.checked = checked;
        self
    }
}

impl From<&str> for Choice {
    fn from(s: &str) -> Self {
        Self::new(s, s)
    }
}

/// Prompt front-end bound to the `no-prompt` setting
#[derive(Debug, Clone, Copy)]
pub struct Prompter {
    no_prompt: bool,
}

impl Prompter {
    pub fn new(no_prompt: bool) -> Self {
        Self { no_prompt }
    }

    /// Whether a human can be asked
    pub fn is_interactive(&self) -> bool {
        !self.no_prompt
    }

    /// Ask for free-form input, optionally validated against a pattern
    pub fn question(&self, question: &str, pattern: Option<&Regex>) -> Result<String, PromptError> {
        if self.no_prompt {
            return Ok(String::new());
        }

        let mut input = Input::<String>::new()
            .with_prompt(question)
            .allow_empty(true);
        if let Some(pattern) = pattern {
            let pattern = pattern.clone();
            input = input.validate_with(move |value: &String| -> Result<(), String> {
                if pattern.is_match(value) {
                    Ok(())
                } else {
                    Err(format!("Input must match {}", pattern))
                }
            });
        }
        input.interact_text().map_err(terminal_error)
    }

    /// Ask a yes/no question
    pub fn answers_yes(&self, question: &str) -> Result<bool, PromptError> {
        if self.no_prompt {
            return Ok(false);
        }

        Confirm::new()
            .with_prompt(question)
            .default(false)
            .interact()
            .map_err(terminal_error)
    }

    /// Let the user pick one of `choices`, returning its value
    pub fn select_option(
        &self,
        question: &str,
        choices: &[Choice],
        default: Option<&str>,
    ) -> Result<String, PromptError> {
        if self.no_prompt {
            return Err(PromptError::NonInteractive("prompt.select_option"));
        }

        let labels: Vec<&str> = choices.iter().map(|c| c.name.as_str()).collect();
        let default_index = default
            .and_then(|d| choices.iter().position(|c| c.value == d))
            .unwrap_or(0);

        let index = Select::new()
            .with_prompt(question)
            .items(&labels)
            .default(default_index)
            .interact()
            .map_err(terminal_error)?;

        choices
            .get(index)
            .map(|c| c.value.clone())
            .ok_or_else(|| PromptError::Terminal(format!("invalid selection {}", index)))
    }

    /// Let the user tick any number of `choices`, returning their values
    pub fn select_options(
        &self,
        question: &str,
        choices: &[Choice],
    ) -> Result<Vec<String>, PromptError> {
        if self.no_prompt {
            return Err(PromptError::NonInteractive("prompt.select_options"));
        }

        let labels: Vec<&str> = choices.iter().map(|c| c.name.as_str()).collect();
        let checked: Vec<bool> = choices.iter().map(|c| c.checked).collect();

        let picked = MultiSelect::new()
            .with_prompt(question)
            .items(&labels)
            .defaults(&checked)
            .interact()
            .map_err(terminal_error)?;

        Ok(picked
            .into_iter()
            .filter_map(|i| choices.get(i).map(|c| c.value.clone()))
            .collect())
    }
}

fn terminal_error(e: dialoguer::Error) -> PromptError {
    PromptError::Terminal(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_interactive_question_is_empty() {
        let prompter = Prompter::new(true);
        assert_eq!(prompter.question("Name?", None).unwrap(), "");
        assert!(!prompter.is_interactive());
    }

    #[test]
    fn test_non_interactive_confirm_is_no() {
        assert!(!Prompter::new(true).answers_yes("Publish?").unwrap());
    }

    #[test]
    fn test_non_interactive_select_fails() {
        let prompter = Prompter::new(true);
        let err = prompter
            .select_option("Pick", &["a".into(), "b".into()], None)
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Can't call prompt.select_option() when running on a CI server or with the --no-prompt flag"
        );
        assert!(prompter.select_options("Pick", &["a".into()]).is_err());
    }

    #[test]
    fn test_choice_from_str() {
        let choice = Choice::from("build");
        assert_eq!(choice.name, "build");
        assert_eq!(choice.value, "build");
        assert!(!choice.checked);
    }
}
