use thiserror::Error;

/// Input problems caught before any network call is made.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("no access token, run `login` first")]
    MissingToken,
    #[error("client id and client secret must be configured before logging in")]
    MissingClientCredentials,
    #[error("unknown mirror `{0}` (expected chimu, sayobot or nerinyan)")]
    UnknownMirror(String),
    #[error("star rating must be a number, got `{0}`")]
    InvalidStars(String),
    #[error("date must look like YYYY-MM-DD, got `{0}`")]
    InvalidDate(String),
    #[error("invalid date range: since {since} is after until {until}")]
    InvertedDateRange { since: String, until: String },
    #[error("unknown status `{0}` (expected r, l, p, u or a)")]
    UnknownStatus(String),
}
