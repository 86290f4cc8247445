use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid ranges: {0}")]
    InvalidRanges(String),

    #[error("Invalid points: {0}")]
    InvalidPoints(String),

    #[error("Ranges should only be built once at shard level, but they are already built")]
    AlreadyPrepared,

    #[error("Invalid aggregation: {0}")]
    InvalidAggregation(String),

    #[error("Sub-aggregation error: {0}")]
    SubCollector(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlDe(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("Tantivy error: {0}")]
    Tantivy(#[from] tantivy::TantivyError),
}

pub type Result<T> = std::result::Result<T, Error>;
