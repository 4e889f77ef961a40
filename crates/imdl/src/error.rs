use std::fmt;

#[derive(Debug)]
pub enum Error {
    PipeCreation(String),
    ProcessSpawn(String),
    EmptyResolution(String),
    Fetch(String),
    Validation(String),
    Config(String),
    Io(String),
    Other(String),
}

impl Error {
    pub fn msg<M: Into<String>>(msg: M) -> Self {
        Self::Other(msg.into())
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Error::PipeCreation(_) => "pipe",
            Error::ProcessSpawn(_) => "spawn",
            Error::EmptyResolution(_) => "resolve",
            Error::Fetch(_) => "fetch",
            Error::Validation(_) => "validation",
            Error::Config(_) => "config",
            Error::Io(_) => "io",
            Error::Other(_) => "other",
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::PipeCreation(m) => write!(f, "pipe creation failed: {m}"),
            Error::ProcessSpawn(m) => write!(f, "process spawn failed: {m}"),
            Error::EmptyResolution(m) => write!(f, "could not determine output filename: {m}"),
            Error::Fetch(m) => write!(f, "tool fetch failed: {m}"),
            Error::Validation(m) => write!(f, "invalid input: {m}"),
            Error::Config(m) => write!(f, "config error: {m}"),
            Error::Io(m) | Error::Other(m) => write!(f, "{m}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
