use std::error::Error as StdError;
use std::fmt;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    Internal,
    Usage,
    NotFound,
    AlreadyExists,
    TypeMismatch,
    OutOfRange,
    UnknownType,
    Decode,
    Encode,
    Transport,
    Timeout,
    Io,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Internal => "Internal",
            ErrorKind::Usage => "Usage",
            ErrorKind::NotFound => "NotFound",
            ErrorKind::AlreadyExists => "AlreadyExists",
            ErrorKind::TypeMismatch => "TypeMismatch",
            ErrorKind::OutOfRange => "OutOfRange",
            ErrorKind::UnknownType => "UnknownType",
            ErrorKind::Decode => "Decode",
            ErrorKind::Encode => "Encode",
            ErrorKind::Transport => "Transport",
            ErrorKind::Timeout => "Timeout",
            ErrorKind::Io => "Io",
        }
    }

    pub fn parse(kind: &str) -> Option<Self> {
        let kind = match kind {
            "Internal" => ErrorKind::Internal,
            "Usage" => ErrorKind::Usage,
            "NotFound" => ErrorKind::NotFound,
            "AlreadyExists" => ErrorKind::AlreadyExists,
            "TypeMismatch" => ErrorKind::TypeMismatch,
            "OutOfRange" => ErrorKind::OutOfRange,
            "UnknownType" => ErrorKind::UnknownType,
            "Decode" => ErrorKind::Decode,
            "Encode" => ErrorKind::Encode,
            "Transport" => ErrorKind::Transport,
            "Timeout" => ErrorKind::Timeout,
            "Io" => ErrorKind::Io,
            _ => return None,
        };
        Some(kind)
    }
}

#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    message: Option<String>,
    hint: Option<String>,
    column: Option<String>,
    index: Option<u64>,
    status: Option<u16>,
    source: Option<Box<dyn StdError + Send + Sync>>,
}

impl Error {
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: None,
            hint: None,
            column: None,
            index: None,
            status: None,
            source: None,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn hint(&self) -> Option<&str> {
        self.hint.as_deref()
    }

    pub fn column(&self) -> Option<&str> {
        self.column.as_deref()
    }

    pub fn index(&self) -> Option<u64> {
        self.index
    }

    /// HTTP status of the response that produced this error, if any.
    pub fn status(&self) -> Option<u16> {
        self.status
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn with_column(mut self, column: impl Into<String>) -> Self {
        self.column = Some(column.into());
        self
    }

    pub fn with_index(mut self, index: u64) -> Self {
        self.index = Some(index);
        self
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_source(mut self, source: impl StdError + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind.as_str())?;
        if let Some(message) = &self.message {
            write!(f, ": {message}")?;
        }
        if let Some(column) = &self.column {
            write!(f, " (column: {column})")?;
        }
        if let Some(index) = self.index {
            write!(f, " (index: {index})")?;
        }
        if let Some(status) = self.status {
            write!(f, " (status: {status})")?;
        }
        Ok(())
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|source| source.as_ref() as &(dyn StdError + 'static))
    }
}

pub fn to_exit_code(kind: ErrorKind) -> i32 {
    match kind {
        ErrorKind::Internal => 1,
        ErrorKind::Usage => 2,
        ErrorKind::NotFound => 3,
        ErrorKind::AlreadyExists => 4,
        ErrorKind::TypeMismatch => 5,
        ErrorKind::OutOfRange => 6,
        ErrorKind::UnknownType => 7,
        ErrorKind::Decode => 8,
        ErrorKind::Encode => 9,
        ErrorKind::Transport => 10,
        ErrorKind::Timeout => 11,
        ErrorKind::Io => 12,
    }
}

#[cfg(test)]
mod tests {
    use super::{Error, ErrorKind, to_exit_code};

    const ALL: [ErrorKind; 12] = [
        ErrorKind::Internal,
        ErrorKind::Usage,
        ErrorKind::NotFound,
        ErrorKind::AlreadyExists,
        ErrorKind::TypeMismatch,
        ErrorKind::OutOfRange,
        ErrorKind::UnknownType,
        ErrorKind::Decode,
        ErrorKind::Encode,
        ErrorKind::Transport,
        ErrorKind::Timeout,
        ErrorKind::Io,
    ];

    #[test]
    fn exit_code_mapping_is_stable() {
        for (offset, kind) in ALL.into_iter().enumerate() {
            assert_eq!(to_exit_code(kind), offset as i32 + 1);
        }
    }

    #[test]
    fn kind_names_parse_back() {
        for kind in ALL {
            assert_eq!(ErrorKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(ErrorKind::parse("Busy"), None);
    }

    #[test]
    fn display_includes_context() {
        let err = Error::new(ErrorKind::OutOfRange)
            .with_message("index out of range")
            .with_column("x")
            .with_index(9);
        assert_eq!(
            err.to_string(),
            "OutOfRange: index out of range (column: x) (index: 9)"
        );
    }
}
