//! Human-escalation collaborator.

use crate::{Error, Result};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

#[async_trait]
pub trait HumanChannel: Send + Sync {
    /// Put `question` to a person and wait for the answer.
    async fn ask(&self, question: &str) -> Result<String>;
}

/// Asks on stderr, reads one line from stdin.
#[derive(Debug, Default, Clone, Copy)]
pub struct TerminalHuman;

#[async_trait]
impl HumanChannel for TerminalHuman {
    async fn ask(&self, question: &str) -> Result<String> {
        let mut err = tokio::io::stderr();
        err.write_all(format!("\n[agent asks] {}\n> ", question).as_bytes())
            .await?;
        err.flush().await?;

        let mut line = String::new();
        let read = BufReader::new(tokio::io::stdin()).read_line(&mut line).await?;
        if read == 0 {
            return Err(Error::ActionFailed("stdin closed before an answer".into()));
        }
        Ok(line.trim().to_string())
    }
}

/// Answers from a fixed queue; fails once empty.
#[derive(Debug, Default)]
pub struct ScriptedHuman {
    answers: Mutex<VecDeque<String>>,
    asked: Mutex<Vec<String>>,
}

impl ScriptedHuman {
    pub fn new<I, S>(answers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            answers: Mutex::new(answers.into_iter().map(Into::into).collect()),
            asked: Mutex::new(Vec::new()),
        }
    }

    /// Questions received so far.
    pub fn asked(&self) -> Vec<String> {
        self.asked.lock().map(|a| a.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl HumanChannel for ScriptedHuman {
    async fn ask(&self, question: &str) -> Result<String> {
        if let Ok(mut asked) = self.asked.lock() {
            asked.push(question.to_string());
        }
        self.answers
            .lock()
            .ok()
            .and_then(|mut a| a.pop_front())
            .ok_or_else(|| Error::ActionFailed("nobody answered".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scripted_answers() {
        let human = ScriptedHuman::new(["yes"]);
        assert_eq!(human.ask("Proceed?").await.unwrap(), "yes");
        assert!(human.ask("Again?").await.is_err());
        assert_eq!(human.asked(), vec!["Proceed?", "Again?"]);
    }
}
