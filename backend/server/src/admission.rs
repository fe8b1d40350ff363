//! # Admission
//!
//! Decides whether a form accepts one more feedback entry.
//!
//! - Pause wins over the limit: a paused form with room left still reports `FormPaused`
//! - A limit of zero admits nothing
//! - No limit admits everything that is not paused
//!
//! Pure, so writers re-run it against the freshest snapshot right before touching the count.
use model::FormState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    FormPaused,
    LimitReached,
}

impl Rejection {
    pub fn message(&self) -> &'static str {
        match self {
            Rejection::FormPaused => "Form is paused and not accepting feedback.",
            Rejection::LimitReached => "Feedback limit reached for this form.",
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Rejection::FormPaused => "form_paused",
            Rejection::LimitReached => "limit_reached",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admit,
    Reject(Rejection),
}

pub fn evaluate(state: &FormState) -> Admission {
    if state.paused {
        return Admission::Reject(Rejection::FormPaused);
    }

    match state.limit {
        Some(limit) if state.count >= limit => Admission::Reject(Rejection::LimitReached),
        _ => Admission::Admit,
    }
}
