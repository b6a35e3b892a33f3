pub mod gzip;

pub use gzip::GzipConfig;
