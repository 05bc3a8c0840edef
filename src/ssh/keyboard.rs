// ABOUTME: Keyboard-interactive challenge responders.
// ABOUTME: Answers prompts by exact question lookup or with one fixed password.

use super::error::{Error, Result};
use std::collections::HashMap;

/// How a keyboard-interactive strategy fills in server prompts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Responder {
    /// Every question gets the same password, verbatim.
    Password(String),
    /// Answers are looked up by exact question text.
    Answers(HashMap<String, String>),
}

impl Responder {
    /// Produce one answer per question, in order.
    ///
    /// A lookup responder fails on the first question it has no answer for and
    /// supplies no answers at all in that case.
    pub fn respond(&self, questions: &[String]) -> Result<Vec<String>> {
        match self {
            Responder::Password(password) => Ok(vec![password.clone(); questions.len()]),
            Responder::Answers(answers) => questions
                .iter()
                .map(|question| {
                    answers
                        .get(question)
                        .cloned()
                        .ok_or_else(|| Error::QuestionNotAnswered(question.clone()))
                })
                .collect(),
        }
    }
}
