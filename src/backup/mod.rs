pub mod artifact;
pub mod backup_config;
pub mod compress;
pub mod dump;
pub mod notifications;
pub mod pipeline;
pub mod redacted;
pub mod result_error;
pub mod retention;
pub mod schedule;
pub mod storage;
pub mod validate;

macro_rules! function_path {
    () => {
        concat!(module_path!(), "::", function_name!(), " ", file!(), ":", line!())
    };
}

pub(crate) use function_path;
