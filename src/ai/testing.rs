//! Scripted [`Completion`] double for tests that must not touch the network.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use super::llm::{Completion, LlmError, Message};

#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub system: String,
    pub messages: Vec<Message>,
}

pub enum Scripted {
    Reply(String),
    Fail(LlmError),
    Hang(Duration),
}

#[derive(Default)]
pub struct ScriptedCompletion {
    script: Mutex<VecDeque<Scripted>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedCompletion {
    pub fn replying(text: &str) -> Self {
        let double = Self::default();
        double.push(Scripted::Reply(text.to_string()));
        double
    }

    pub fn push(&self, step: Scripted) {
        self.script.lock().unwrap().push_back(step);
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Completion for ScriptedCompletion {
    async fn complete(&self, system: &str, messages: &[Message]) -> Result<String, LlmError> {
        self.calls.lock().unwrap().push(RecordedCall {
            system: system.to_string(),
            messages: messages.to_vec(),
        });

        let step = self.script.lock().unwrap().pop_front();
        match step {
            Some(Scripted::Reply(text)) => Ok(text),
            Some(Scripted::Fail(err)) => Err(err),
            Some(Scripted::Hang(d)) => {
                tokio::time::sleep(d).await;
                Ok("too late".to_string())
            }
            None => Ok("default reply".to_string()),
        }
    }
}
