use crate::backup::dump::DumpConfig;
use crate::backup::compress::GzipConfig;
use crate::backup::notifications::smtp::{SmtpMode, SmtpNotificationConfig};
use crate::backup::redacted::RedactedString;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::{convert_error_vec, Result};
use crate::backup::retention::RetentionConfig;
use crate::backup::storage::s3::S3Config;
use crate::backup::validate::{validate_cron_str, validate_writable_dir};
use bon::Builder;
use getset::Getters;
use lettre::message::Mailbox;
use serde::Serialize;
use serde_with::skip_serializing_none;
use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use validator::Validate;

pub const AWS_ACCESS_KEY_ID: &str = "AWS_ACCESS_KEY_ID";
pub const AWS_SECRET_ACCESS_KEY: &str = "AWS_SECRET_ACCESS_KEY";
pub const AWS_S3_BUCKET: &str = "AWS_S3_BUCKET";
pub const AWS_S3_REGION: &str = "AWS_S3_REGION";
pub const AWS_S3_ENDPOINT: &str = "AWS_S3_ENDPOINT";
pub const BACKUP_DATABASE_URL: &str = "BACKUP_DATABASE_URL";
pub const KEEP_BACKUPS: &str = "KEEP_BACKUPS";
pub const BACKUP_CRON_SCHEDULE: &str = "BACKUP_CRON_SCHEDULE";
pub const RUN_ON_STARTUP: &str = "RUN_ON_STARTUP";
pub const BACKUP_TMP_DIR: &str = "BACKUP_TMP_DIR";
pub const PG_DUMP_BIN: &str = "PG_DUMP_BIN";
pub const BACKUP_DUMP_TIMEOUT: &str = "BACKUP_DUMP_TIMEOUT";
pub const BACKUP_GZIP_LEVEL: &str = "BACKUP_GZIP_LEVEL";
pub const BACKUP_DELETE_CONCURRENCY: &str = "BACKUP_DELETE_CONCURRENCY";
pub const SMTP_HOST: &str = "SMTP_HOST";
pub const SMTP_PORT: &str = "SMTP_PORT";
pub const SMTP_MODE: &str = "SMTP_MODE";
pub const SMTP_FROM: &str = "SMTP_FROM";
pub const SMTP_TO: &str = "SMTP_TO";
pub const SMTP_USERNAME: &str = "SMTP_USERNAME";
pub const SMTP_PASSWORD: &str = "SMTP_PASSWORD";

/// Validated settings of the backup process, built once at startup.
#[skip_serializing_none]
#[derive(Clone, Debug, Serialize, Validate, Builder, Getters)]
#[getset(get = "pub")]
pub struct BackupConfig {
    #[validate(nested)]
    storage: S3Config,
    #[validate(nested)]
    #[builder(into)]
    database_url: RedactedString,
    #[validate(custom(function = validate_cron_str))]
    #[builder(into)]
    cron: Option<String>,
    #[builder(default)]
    run_on_startup: bool,
    #[validate(custom(function = validate_writable_dir))]
    #[builder(into, default = std::env::temp_dir())]
    tmp_dir: PathBuf,
    #[validate(nested)]
    #[builder(default)]
    dump: DumpConfig,
    #[validate(nested)]
    #[builder(default)]
    retention: RetentionConfig,
    #[validate(nested)]
    notification: Option<SmtpNotificationConfig>,
}

/// Reads variables through `lookup`, collecting every problem instead of
/// stopping at the first one.
struct EnvReader<F> {
    lookup: F,
    errors: Vec<Error>,
}

impl<F: Fn(&str) -> Option<String>> EnvReader<F> {
    fn new(lookup: F) -> Self {
        Self {
            lookup,
            errors: Vec::new(),
        }
    }

    /// Empty values count as absent.
    fn optional(&self, name: &str) -> Option<String> {
        (self.lookup)(name)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn required(&mut self, name: &str) -> String {
        match self.optional(name) {
            Some(value) => value,
            None => {
                self.errors
                    .push(Error::config_error(format!("{name} is required")));
                String::new()
            }
        }
    }

    fn parsed<T>(&mut self, name: &str) -> Option<T>
    where
        T: FromStr,
        T::Err: Display,
    {
        let value = self.optional(name)?;
        match value.parse() {
            Ok(parsed) => Some(parsed),
            Err(e) => {
                self.errors.push(Error::config_error(format!(
                    "{name} has invalid value {value:?}: {e}"
                )));
                None
            }
        }
    }

    fn flag(&mut self, name: &str) -> Option<bool> {
        let value = self.optional(name)?;
        match value.to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Some(true),
            "false" | "0" | "no" | "off" => Some(false),
            _ => {
                self.errors.push(Error::config_error(format!(
                    "{name} has invalid value {value:?}, expected true or false"
                )));
                None
            }
        }
    }

    fn duration(&mut self, name: &str) -> Option<Duration> {
        let value = self.optional(name)?;
        match humantime::parse_duration(&value) {
            Ok(duration) => Some(duration),
            Err(e) => {
                self.errors.push(Error::config_error(format!(
                    "{name} has invalid duration {value:?}: {e}"
                )));
                None
            }
        }
    }

    fn smtp(&mut self) -> Option<SmtpNotificationConfig> {
        let host = self.optional(SMTP_HOST)?;
        let errors_before = self.errors.len();

        let port = self.parsed::<u16>(SMTP_PORT);
        let smtp_mode = self.parsed::<SmtpMode>(SMTP_MODE).unwrap_or_default();
        let from = match self.optional(SMTP_FROM) {
            Some(_) => self.parsed::<Mailbox>(SMTP_FROM),
            None => {
                self.required(SMTP_FROM);
                None
            }
        };
        let to = self
            .required(SMTP_TO)
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| {
                s.parse::<Mailbox>().map_err(|e| {
                    Error::config_error(format!("{SMTP_TO} has invalid mailbox {s:?}: {e}"))
                })
            })
            .collect::<Vec<_>>();
        let username = self.required(SMTP_USERNAME);
        let password = self.required(SMTP_PASSWORD);

        let mut mailboxes = Vec::with_capacity(to.len());
        for mailbox in to {
            match mailbox {
                Ok(mailbox) => mailboxes.push(mailbox),
                Err(e) => self.errors.push(e),
            }
        }

        if self.errors.len() > errors_before {
            return None;
        }
        Some(
            SmtpNotificationConfig::builder()
                .host(host)
                .maybe_port(port)
                .smtp_mode(smtp_mode)
                .from(from?)
                .to(mailboxes)
                .username(username)
                .password(password)
                .build(),
        )
    }
}

impl BackupConfig {
    /// Loads the configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Loads and validates the configuration, reading variables through `lookup`.
    ///
    /// Every missing or malformed variable is reported as a `ConfigError`.
    pub fn from_lookup<F: Fn(&str) -> Option<String>>(lookup: F) -> Result<Self> {
        let mut env = EnvReader::new(lookup);

        let storage = S3Config::builder()
            .access_key_id(env.required(AWS_ACCESS_KEY_ID))
            .secret_access_key(env.required(AWS_SECRET_ACCESS_KEY))
            .bucket(env.required(AWS_S3_BUCKET))
            .region(env.required(AWS_S3_REGION))
            .maybe_endpoint(env.optional(AWS_S3_ENDPOINT))
            .build();
        let database_url = env.required(BACKUP_DATABASE_URL);
        let dump = DumpConfig::builder()
            .maybe_pg_dump_bin(env.optional(PG_DUMP_BIN))
            .maybe_timeout(env.duration(BACKUP_DUMP_TIMEOUT))
            .gzip(
                GzipConfig::builder()
                    .maybe_level(env.parsed(BACKUP_GZIP_LEVEL))
                    .build(),
            )
            .build();
        let retention = RetentionConfig::builder()
            .maybe_keep(env.parsed(KEEP_BACKUPS))
            .maybe_delete_concurrency(env.parsed(BACKUP_DELETE_CONCURRENCY))
            .build();
        let cron = env.optional(BACKUP_CRON_SCHEDULE);
        let run_on_startup = env.flag(RUN_ON_STARTUP);
        let tmp_dir = env.optional(BACKUP_TMP_DIR);
        let notification = env.smtp();

        convert_error_vec(env.errors)?;

        let config = BackupConfig::builder()
            .storage(storage)
            .database_url(database_url)
            .maybe_cron(cron)
            .maybe_run_on_startup(run_on_startup)
            .maybe_tmp_dir(tmp_dir)
            .dump(dump)
            .retention(retention)
            .maybe_notification(notification)
            .build();

        config
            .validate()
            .map_err(|e| Error::config_error(e.to_string()))?;
        Ok(config)
    }

    /// JSON rendering for the startup log, secrets redacted.
    pub fn describe(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| format!("<unserializable: {e}>"))
    }
}

/// Loads `path` as a dotenv file, or `./.env` when present.
pub fn load_env_file(path: Option<&Path>) -> Result<()> {
    match path {
        Some(path) => dotenv::from_path(path)
            .map(|_| tracing::info!("Loaded environment from {:?}", path))
            .map_err(|e| Error::config_error(format!("cannot load env file {path:?}: {e}"))),
        None => match dotenv::dotenv() {
            Ok(path) => {
                tracing::info!("Loaded environment from {:?}", path);
                Ok(())
            }
            Err(e) if e.not_found() => Ok(()),
            Err(e) => Err(Error::config_error(format!("cannot load .env file: {e}"))),
        },
    }
}
