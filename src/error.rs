pub type CadenzaResult<T> = Result<T, CadenzaError>;

#[derive(thiserror::Error, Debug)]
pub enum CadenzaError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("animation error: {0}")]
    Animation(String),

    #[error("evaluation error: {0}")]
    Evaluation(String),

    #[error("dispatch error: {0}")]
    Dispatch(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Best-effort text of a caught panic payload, for diagnostic logging.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "non-string panic payload"
    }
}

impl CadenzaError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn animation(msg: impl Into<String>) -> Self {
        Self::Animation(msg.into())
    }

    pub fn evaluation(msg: impl Into<String>) -> Self {
        Self::Evaluation(msg.into())
    }

    pub fn dispatch(msg: impl Into<String>) -> Self {
        Self::Dispatch(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_prefixes_are_stable() {
        assert!(
            CadenzaError::validation("x")
                .to_string()
                .contains("validation error:")
        );
        assert!(
            CadenzaError::animation("x")
                .to_string()
                .contains("animation error:")
        );
        assert!(
            CadenzaError::evaluation("x")
                .to_string()
                .contains("evaluation error:")
        );
        assert!(
            CadenzaError::dispatch("x")
                .to_string()
                .contains("dispatch error:")
        );
    }

    #[test]
    fn other_preserves_source() {
        let base = std::io::Error::other("boom");
        let err = CadenzaError::Other(anyhow::Error::new(base));
        assert!(err.to_string().contains("boom"));
    }
}
