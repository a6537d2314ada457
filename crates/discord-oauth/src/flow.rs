//! Callback state machine
//!
//! A flow is `Pending` from the login redirect until Discord calls back, then
//! ends `Complete` (code exchanged, token stored) or `Failed` (Discord
//! reported an error, typically the user denying consent). The transition is
//! decided from the callback query alone, before any I/O.

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::state::StateParams;

/// Query parameters Discord appends to the redirect URI.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct CallbackParams {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub error_description: Option<String>,
}

/// Outcome of a handled callback.
#[derive(Debug, Clone, PartialEq)]
pub enum Callback {
    /// Token stored. `params` are exactly what the caller embedded at login.
    Complete { params: StateParams },
    /// Discord reported an error; no exchange was attempted.
    Failed { error: String },
}

/// What the callback handler must do next.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Step<'a> {
    Fail { error: &'a str },
    Exchange { code: &'a str, state: &'a str },
}

impl<'a> Step<'a> {
    /// Decide the transition out of `Pending` for an inbound callback.
    ///
    /// A provider error wins over everything else. Without one, both `code`
    /// and `state` are required.
    pub(crate) fn decide(params: &'a CallbackParams) -> Result<Self> {
        if let Some(error) = non_empty(&params.error) {
            return Ok(Step::Fail { error });
        }
        let code = non_empty(&params.code)
            .ok_or_else(|| Error::InvalidRequest("callback is missing the code".into()))?;
        let state = non_empty(&params.state)
            .ok_or_else(|| Error::InvalidState("callback is missing the state".into()))?;
        Ok(Step::Exchange { code, state })
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(code: Option<&str>, state: Option<&str>, error: Option<&str>) -> CallbackParams {
        CallbackParams {
            code: code.map(Into::into),
            state: state.map(Into::into),
            error: error.map(Into::into),
            error_description: None,
        }
    }

    #[test]
    fn provider_error_fails_without_exchange() {
        let p = params(Some("c"), Some("s"), Some("access_denied"));
        let step = Step::decide(&p).unwrap();
        assert_eq!(step, Step::Fail { error: "access_denied" });
    }

    #[test]
    fn code_and_state_exchange() {
        let p = params(Some("c"), Some("s"), None);
        let step = Step::decide(&p).unwrap();
        assert_eq!(step, Step::Exchange { code: "c", state: "s" });
    }

    #[test]
    fn missing_code_is_invalid_request() {
        let p = params(None, Some("s"), None);
        assert!(matches!(Step::decide(&p), Err(Error::InvalidRequest(_))));

        let empty = params(Some(""), Some("s"), None);
        assert!(matches!(Step::decide(&empty), Err(Error::InvalidRequest(_))));
    }

    #[test]
    fn missing_state_is_invalid_state() {
        let p = params(Some("c"), None, None);
        assert!(matches!(Step::decide(&p), Err(Error::InvalidState(_))));
    }

    #[test]
    fn params_deserialize_from_query_shape() {
        let p: CallbackParams =
            serde_json::from_str(r#"{"error":"access_denied","error_description":"denied"}"#).unwrap();
        assert_eq!(p.error.as_deref(), Some("access_denied"));
        assert!(p.code.is_none());
    }
}
