use std::collections::VecDeque;
use std::io;

use super::{Input, Prompt};
use crate::engine::state::ChoiceSet;

/// Replays canned inputs and answers; pends forever once exhausted.
#[derive(Default)]
pub struct ScriptedPrompt {
    inputs: VecDeque<Input>,
    answers: VecDeque<bool>,
    pub frames: Vec<Vec<Option<String>>>,
    pub questions: Vec<String>,
    pub finished: Option<Option<String>>,
}

impl ScriptedPrompt {
    pub fn new(inputs: &[Input], answers: &[bool]) -> Self {
        Self {
            inputs: inputs.iter().copied().collect(),
            answers: answers.iter().copied().collect(),
            ..Default::default()
        }
    }
}

impl Prompt for ScriptedPrompt {
    fn render(&mut self, choices: &ChoiceSet) -> io::Result<()> {
        self.frames.push(
            choices
                .choices()
                .iter()
                .map(|c| c.tag().map(str::to_owned))
                .collect(),
        );
        Ok(())
    }

    async fn next_input(&mut self) -> io::Result<Input> {
        match self.inputs.pop_front() {
            Some(input) => Ok(input),
            None => std::future::pending().await,
        }
    }

    async fn confirm(&mut self, question: &str) -> io::Result<bool> {
        self.questions.push(question.to_owned());
        Ok(self.answers.pop_front().unwrap_or(false))
    }

    fn finish(&mut self, summary: Option<&str>) -> io::Result<()> {
        self.finished = Some(summary.map(str::to_owned));
        Ok(())
    }
}
