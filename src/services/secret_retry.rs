//! Bounded PIN/password acquisition.
//!
//! A candidate secret is validated before anything is committed; the caller
//! only receives a secret that its validator accepted.

use crate::domain::constants::{DEFAULT_PIN_PROMPT, MAX_SECRET_ATTEMPTS, PFX_PASSWORD_PROMPT};
use crate::domain::types::Secret;
use crate::infra::error::{SigningError, SigningResult};

/// What the prompt is asking for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecretKind {
    /// Password of a PKCS#12 container.
    FilePassword,
    /// User PIN of a hardware token.
    TokenPin,
}

impl SecretKind {
    #[must_use]
    pub fn message(&self, attempt: u32, max_attempts: u32) -> String {
        match (self, attempt) {
            (SecretKind::FilePassword, 1) => PFX_PASSWORD_PROMPT.to_string(),
            (SecretKind::TokenPin, 1) => DEFAULT_PIN_PROMPT.to_string(),
            (SecretKind::FilePassword, n) => {
                format!("Incorrect password. Attempt {n} of {max_attempts}")
            }
            (SecretKind::TokenPin, n) => format!("Incorrect PIN. Attempt {n} of {max_attempts}"),
        }
    }

    /// Outcome when the operator backs out. A token that already rejected a
    /// PIN reports that rejection instead of a plain cancellation.
    fn abandoned(self, rejected: u32) -> SigningError {
        match self {
            SecretKind::TokenPin if rejected > 0 => SigningError::IncorrectPin(format!(
                "the token rejected the PIN {rejected} time(s) before entry was abandoned"
            )),
            _ => SigningError::UserCancelled("User cancelled secret entry.".to_string()),
        }
    }

    /// Outcome when every attempt was rejected.
    fn exhausted(self, max_attempts: u32) -> SigningError {
        match self {
            SecretKind::FilePassword => SigningError::UserCancelled(
                "Maximum password attempts exceeded. Aborting operation.".to_string(),
            ),
            SecretKind::TokenPin => SigningError::MaxPinAttemptsExceeded(format!(
                "the token rejected {max_attempts} PIN entries; last error: incorrect PIN"
            )),
        }
    }
}

/// One prompt shown to the operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretRequest {
    pub kind: SecretKind,
    /// Neutral on the first attempt, carries the attempt count afterwards.
    pub message: String,
    /// 1-based.
    pub attempt: u32,
    pub max_attempts: u32,
    /// Free-form context, e.g. the file or token being unlocked.
    pub target: String,
}

impl SecretRequest {
    /// Whether the previous attempt was rejected.
    #[must_use]
    pub fn is_retry(&self) -> bool {
        self.attempt > 1
    }
}

/// Source of secrets. `None` means the operator cancelled.
pub trait SecretPrompt {
    fn request_secret(&mut self, request: &SecretRequest) -> Option<Secret>;
}

impl<F> SecretPrompt for F
where
    F: FnMut(&SecretRequest) -> Option<Secret>,
{
    fn request_secret(&mut self, request: &SecretRequest) -> Option<Secret> {
        self(request)
    }
}

/// Outcome of validating one candidate.
#[derive(Debug)]
pub enum Verdict<T> {
    /// Secret works; carries whatever the validation produced.
    Accepted(T),
    /// Wrong secret; the operator may try again.
    Rejected,
}

/// Prompt until `validate` accepts, the operator cancels, or the attempts run
/// out. Errors returned by `validate` abort immediately.
///
/// Running out is a cancellation for file passwords and
/// `MaxPinAttemptsExceeded` for token PINs.
pub fn acquire_secret<T>(
    prompt: &mut dyn SecretPrompt,
    kind: SecretKind,
    target: &str,
    mut validate: impl FnMut(&Secret) -> SigningResult<Verdict<T>>,
) -> SigningResult<(Secret, T)> {
    let mut rejected = 0;
    for attempt in 1..=MAX_SECRET_ATTEMPTS {
        let request = SecretRequest {
            kind,
            message: kind.message(attempt, MAX_SECRET_ATTEMPTS),
            attempt,
            max_attempts: MAX_SECRET_ATTEMPTS,
            target: target.to_string(),
        };
        let Some(secret) = prompt.request_secret(&request) else {
            log::info!("Secret entry cancelled for {target}");
            return Err(kind.abandoned(rejected));
        };

        if !secret.is_empty() {
            if let Verdict::Accepted(value) = validate(&secret)? {
                log::debug!("Secret accepted for {target} on attempt {attempt}");
                return Ok((secret, value));
            }
        }
        rejected += 1;
        log::warn!("Rejected secret for {target} (attempt {attempt} of {MAX_SECRET_ATTEMPTS})");
    }

    Err(kind.exhausted(MAX_SECRET_ATTEMPTS))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scripted(answers: Vec<Option<&'static str>>) -> impl FnMut(&SecretRequest) -> Option<Secret> {
        let mut answers = answers.into_iter();
        move |_req: &SecretRequest| answers.next().flatten().map(Secret::from)
    }

    #[test]
    fn first_message_is_neutral_then_counts_attempts() {
        assert_eq!(SecretKind::FilePassword.message(1, 3), "Enter PFX Password");
        assert_eq!(
            SecretKind::FilePassword.message(2, 3),
            "Incorrect password. Attempt 2 of 3"
        );
        assert_eq!(SecretKind::TokenPin.message(1, 3), "Please enter your PIN:");
    }

    #[test]
    fn accepts_on_second_attempt() {
        let mut seen = Vec::new();
        let mut prompt = |req: &SecretRequest| {
            seen.push(req.message.clone());
            Some(Secret::from(if req.attempt == 1 { "wrong" } else { "right" }))
        };
        let (secret, validated) = acquire_secret(&mut prompt, SecretKind::FilePassword, "a.p12", |s| {
            Ok(if s.expose() == "right" {
                Verdict::Accepted(42)
            } else {
                Verdict::Rejected
            })
        })
        .unwrap();
        assert_eq!(secret.expose(), "right");
        assert_eq!(validated, 42);
        assert_eq!(seen, vec!["Enter PFX Password", "Incorrect password. Attempt 2 of 3"]);
    }

    #[test]
    fn three_wrong_secrets_cancel() {
        let mut calls = 0;
        let mut prompt = scripted(vec![Some("a"), Some("b"), Some("c"), Some("never asked")]);
        let err = acquire_secret(&mut prompt, SecretKind::FilePassword, "x", |_| {
            calls += 1;
            Ok(Verdict::<()>::Rejected)
        })
        .unwrap_err();
        assert!(err.is_cancellation());
        assert_eq!(calls, 3);
    }

    #[test]
    fn rejected_token_pins_end_in_max_attempts() {
        let mut seen = Vec::new();
        let mut prompt = |req: &SecretRequest| {
            seen.push(req.message.clone());
            Some(Secret::from("0000"))
        };
        let err = acquire_secret(&mut prompt, SecretKind::TokenPin, "token", |_| {
            Ok(Verdict::<()>::Rejected)
        })
        .unwrap_err();
        assert!(matches!(err, SigningError::MaxPinAttemptsExceeded(_)));
        assert!(!err.is_cancellation());
        assert_eq!(
            seen,
            vec![
                "Please enter your PIN:",
                "Incorrect PIN. Attempt 2 of 3",
                "Incorrect PIN. Attempt 3 of 3"
            ]
        );
    }

    #[test]
    fn giving_up_after_a_rejected_pin_is_incorrect_pin() {
        let mut prompt = scripted(vec![Some("1111"), None]);
        let err = acquire_secret(&mut prompt, SecretKind::TokenPin, "token", |_| {
            Ok(Verdict::<()>::Rejected)
        })
        .unwrap_err();
        assert!(matches!(err, SigningError::IncorrectPin(_)));
        assert!(!err.is_cancellation());
    }

    #[test]
    fn cancelling_the_first_pin_prompt_is_a_cancellation() {
        let mut prompt = scripted(vec![None]);
        let err = acquire_secret(&mut prompt, SecretKind::TokenPin, "token", |_| {
            Ok(Verdict::<()>::Accepted(()))
        })
        .unwrap_err();
        assert!(err.is_cancellation());
    }

    #[test]
    fn cancel_stops_immediately() {
        let mut calls = 0;
        let mut prompt = scripted(vec![Some("a"), None]);
        let err = acquire_secret(&mut prompt, SecretKind::FilePassword, "a.p12", |_| {
            calls += 1;
            Ok(Verdict::<()>::Rejected)
        })
        .unwrap_err();
        assert!(matches!(err, SigningError::UserCancelled(_)));
        assert_eq!(calls, 1);
    }

    #[test]
    fn validator_errors_abort() {
        let mut prompt = scripted(vec![Some("a"), Some("b")]);
        let err = acquire_secret(&mut prompt, SecretKind::TokenPin, "token", |_| {
            Err::<Verdict<()>, _>(SigningError::MaxPinAttemptsExceeded("locked".into()))
        })
        .unwrap_err();
        assert!(matches!(err, SigningError::MaxPinAttemptsExceeded(_)));
    }
}
