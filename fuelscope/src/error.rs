use thiserror::Error;

/// Error kinds callers branch on. Everything else travels as a plain `anyhow::Error`
/// with context attached; these are wrapped into it and recovered with `downcast_ref`.
#[derive(Error, Debug)]
pub enum Error {
    #[error("credential missing: environment variable `{0}` is not set")]
    CredentialMissing(String),

    #[error("unexpected schema from {api}: {detail}")]
    UnexpectedSchema { api: &'static str, detail: String },

    #[error("{api} API error {status}: {body}")]
    Api {
        api: &'static str,
        status: u16,
        body: String,
    },
}

/// Read an API credential from the environment.
pub fn require_env(var: &str) -> Result<String, Error> {
    match std::env::var(var) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(Error::CredentialMissing(var.to_string())),
    }
}

/// True when `err` (or anything it wraps) is a missing-credential error.
pub fn is_credential_missing(err: &anyhow::Error) -> bool {
    err.chain()
        .any(|cause| matches!(cause.downcast_ref::<Error>(), Some(Error::CredentialMissing(_))))
}
