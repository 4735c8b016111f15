use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    /// `BITMEX_API_KEY` or `BITMEX_API_SECRET` is not set.
    #[error("{0} is not set")]
    MissingEnvVar(String),

    /// The variable is set but blank.
    #[error("{0} is empty")]
    Blank(String),
}
