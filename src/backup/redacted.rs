//! Secret string handling with redacted display and serialization.
//!
//! Storage secret keys, database connection strings and SMTP passwords are
//! kept in `RedactedString` so they never leak through logs, `Debug` output
//! or the serialized configuration dump printed at startup.

use bon::Builder;
use derive_more::From;
use getset::Getters;
use serde::{Serialize, Serializer};
use std::fmt::{Debug, Formatter};
use std::result;
use validator::Validate;
use zeroize::Zeroize;

/// Placeholder text shown instead of the secret in logs/debug output
pub static REDACTED: &str = "###REDACTED###";

/// A string that gets redacted in debug output and serialization
///
/// The memory is zeroed on drop.
#[derive(Validate, Clone, Zeroize, From, Builder, PartialEq, Eq, Getters)]
#[getset(get = "pub")]
pub struct RedactedString {
    #[validate(length(min = 1))]
    #[builder(into)]
    inner: String,
}

impl Debug for RedactedString {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", REDACTED)
    }
}

impl Serialize for RedactedString {
    fn serialize<S: Serializer>(&self, serializer: S) -> result::Result<S::Ok, S::Error> {
        serializer.serialize_str(REDACTED)
    }
}

impl Drop for RedactedString {
    fn drop(&mut self) {
        self.zeroize();
    }
}
