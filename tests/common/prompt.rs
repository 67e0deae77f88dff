//! Scripted secret prompts.

use pdf_signer::{Secret, SecretPrompt, SecretRequest};
use std::cell::RefCell;
use std::rc::Rc;

/// Answers in order; `None` cancels. Runs out as a cancel.
pub struct ScriptedPrompt {
    answers: std::vec::IntoIter<Option<String>>,
    seen: Rc<RefCell<Vec<String>>>,
}

impl ScriptedPrompt {
    /// Prompt plus a handle to the messages it was shown.
    pub fn new(answers: &[Option<&str>]) -> (Self, Rc<RefCell<Vec<String>>>) {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let prompt = Self {
            answers: answers
                .iter()
                .map(|a| a.map(str::to_string))
                .collect::<Vec<_>>()
                .into_iter(),
            seen: Rc::clone(&seen),
        };
        (prompt, seen)
    }

    pub fn boxed(answers: &[Option<&str>]) -> Box<dyn SecretPrompt> {
        Box::new(Self::new(answers).0)
    }
}

impl SecretPrompt for ScriptedPrompt {
    fn request_secret(&mut self, request: &SecretRequest) -> Option<Secret> {
        self.seen.borrow_mut().push(request.message.clone());
        self.answers.next().flatten().map(Secret::new)
    }
}
