use std::{fmt, io, num::{ParseFloatError, ParseIntError, TryFromIntError}, str::Utf8Error};
use quick_xml::events::attributes::AttrError;
use png::EncodingError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The place could not be resolved or the map service failed.
    Provider,
    /// Malformed OSM or service payload.
    Parse,
    NodeNotFound,
    NoPath,
    /// Source or target missing when a path was requested.
    MissingSelection,
    Cancelled,
    /// The operation is not available in the current session state.
    InvalidState,
    Config,
    Io,
    Render,
    Other,
}

#[derive(Debug)]
pub struct Error {
    pub kind: ErrorKind,
    pub message: String,
}

impl Error {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Error {
            kind,
            message: message.into(),
        }
    }

    pub fn provider(message: impl Into<String>) -> Self {
        Error::new(ErrorKind::Provider, message)
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Error::new(ErrorKind::Parse, message)
    }

    pub fn cancelled() -> Self {
        Error::new(ErrorKind::Cancelled, "Load was cancelled")
    }

    pub fn is(&self, kind: ErrorKind) -> bool {
        self.kind == kind
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for Error {}

impl From<io::Error> for Error {
    fn from(value: io::Error) -> Self {
        Error::new(ErrorKind::Io, value.to_string())
    }
}

impl From<quick_xml::Error> for Error {
    fn from(value: quick_xml::Error) -> Self {
        Error::parse(value.to_string())
    }
}

impl From<ParseFloatError> for Error {
    fn from(value: ParseFloatError) -> Self {
        Error::parse(value.to_string())
    }
}

impl From<ParseIntError> for Error {
    fn from(value: ParseIntError) -> Self {
        Error::parse(value.to_string())
    }
}

impl From<AttrError> for Error {
    fn from(value: AttrError) -> Self {
        Error::parse(value.to_string())
    }
}

impl From<Utf8Error> for Error {
    fn from(value: Utf8Error) -> Self {
        Error::parse(value.to_string())
    }
}

impl From<&str> for Error {
    fn from(value: &str) -> Self {
        Error::new(ErrorKind::Other, value)
    }
}

impl From<String> for Error {
    fn from(value: String) -> Self {
        Error::new(ErrorKind::Other, value)
    }
}

impl From<TryFromIntError> for Error {
    fn from(value: TryFromIntError) -> Self {
        Error::new(ErrorKind::Other, value.to_string())
    }
}

impl From<EncodingError> for Error {
    fn from(value: EncodingError) -> Self {
        Error::new(ErrorKind::Render, value.to_string())
    }
}

impl From<font_kit::error::FontLoadingError> for Error {
    fn from(value: font_kit::error::FontLoadingError) -> Self {
        Error::new(ErrorKind::Render, value.to_string())
    }
}

impl From<font_kit::error::SelectionError> for Error {
    fn from(value: font_kit::error::SelectionError) -> Self {
        Error::new(ErrorKind::Render, value.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(value: reqwest::Error) -> Self {
        Error::provider(value.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(value: serde_json::Error) -> Self {
        Error::parse(value.to_string())
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(value: tokio::task::JoinError) -> Self {
        Error::new(ErrorKind::Other, value.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
