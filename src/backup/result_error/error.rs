use crate::backup::result_error::{AddFunctionName, AddMsg};
use itertools::Itertools;
use std::fmt::Debug;
use std::path::PathBuf;
use thiserror::Error;
use thiserror_ext::Construct;

#[derive(Error, Debug, Construct)]
pub enum Error {
    #[construct(skip)]
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[construct(skip)]
    #[error(transparent)]
    S3(#[from] s3::error::S3Error),
    #[construct(skip)]
    #[error(transparent)]
    LettreEmail(#[from] lettre::error::Error),
    #[construct(skip)]
    #[error(transparent)]
    LettreSmtp(#[from] lettre::transport::smtp::Error),
    #[error("Invalid configuration: {0}")]
    ConfigError(String),
    #[error("Dump failed: {reason}{}", format_stderr(stderr))]
    DumpFailure { reason: String, stderr: String },
    #[error("Upload of {key:?} failed:\n{}", indent::indent_all_with("  ", error.to_string()))]
    UploadFailure { key: String, error: Box<Error> },
    #[error("Removing local archive {path:?} failed:\n{}", indent::indent_all_with("  ", error.to_string()))]
    CleanupFailure { path: PathBuf, error: Box<Error> },
    #[error("Listing backups failed:\n{}", indent::indent_all_with("  ", error.to_string()))]
    ListFailure { error: Box<Error> },
    #[error("Deleting old backup {key:?} failed:\n{}", indent::indent_all_with("  ", error.to_string()))]
    DeleteFailure { key: String, error: Box<Error> },
    #[error("{0}")]
    SmtpSendError(String),
    #[construct(skip)]
    #[error("{}:\n{}", msg, indent::indent_all_with("  ", error.to_string()))]
    WithMsg { msg: String, error: Box<Error> },
    #[construct(skip)]
    #[error("{} failed:\n{}", fn_name, indent::indent_all_with("  ", error.to_string()))]
    WithFnName { fn_name: String, error: Box<Error> },
    #[error("{}", itertools::join(.0, "\n\n"))]
    LotsOfError(Vec<Error>),
}

fn format_stderr(stderr: &str) -> String {
    let stderr = stderr.trim();
    if stderr.is_empty() {
        String::new()
    } else {
        format!("\n{}", indent::indent_all_with("  ", stderr))
    }
}

impl<S: Into<String>> AddFunctionName<S> for Error {
    fn add_fn_name(self, fn_name: S) -> Self {
        Error::WithFnName {
            fn_name: fn_name.into(),
            error: Box::new(self),
        }
    }
}

impl<S: Into<String>> AddMsg<S> for Error {
    fn add_msg(self, msg: S) -> Self {
        Self::WithMsg {
            msg: msg.into(),
            error: Box::new(self),
        }
    }
}

impl From<Vec<Error>> for Error {
    fn from(errors: Vec<Error>) -> Self {
        if errors.is_empty() {
            panic!("Should not create lots of errors when error is empty")
        }
        Self::LotsOfError(errors.into_iter().flat_map(Error::into_iter).collect_vec())
    }
}

impl Error {
    pub fn into_iter(self) -> Box<dyn Iterator<Item = Error> + Send> {
        match self {
            Error::LotsOfError(v) => Box::new(v.into_iter().flat_map(Error::into_iter)),
            e => Box::new(std::iter::once(e)),
        }
    }

    /// Strips message and function name wrappers.
    pub fn root(&self) -> &Error {
        match self {
            Error::WithMsg { error, .. } | Error::WithFnName { error, .. } => error.root(),
            e => e,
        }
    }
}
