use num_enum::TryFromPrimitive;
use std::fmt::{self, Display, Formatter};
use thiserror::Error;

pub type ArborResult<T> = Result<T, ArborGenericError>;
pub type ArborGenericError = anyhow::Error;

/// numeric error codes carried inside `failure` responses
// the exact values are part of the wire contract, do not renumber
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u32)]
pub enum ErrCode {
    Io = 120100,
    ConnectionClosed = 120101,
    MalformedData = 120102,
    UnknownCmd = 120103,
    Cancelled = 120104,
    Unsupported = 120105,
    PathNotFound = 125002,
    NameTaken = 125003,
    KindMismatch = 125004,
    Precondition = 125005,
    OutOfDate = 160049,
    Generic = 200000,
    NoSuchRevision = 210004,
}

impl ErrCode {
    #[inline]
    pub fn as_u32(self) -> u32 {
        self as u32
    }
}

// usually we can just use anyhow for errors, but the protocol needs a "rust"
// representation we can test and match against
#[derive(Debug, Error)]
#[cfg_attr(test, derive(PartialEq))]
pub enum ArborError {
    #[error("connection closed unexpectedly")]
    ConnectionClosed,
    #[error("malformed network data: {0}")]
    MalformedData(String),
    #[error("unknown command `{0}`")]
    UnknownCmd(String),
    #[error("out of date: `{0}`")]
    OutOfDate(String),
    #[error("precondition violated: {0}")]
    PreconditionViolated(String),
    #[error("operation cancelled")]
    Cancelled,
    #[error("editor does not implement `{0}`")]
    Unsupported(&'static str),
    /// sentinel wrapper: report the inner failure as a `failure` response and
    /// keep the dispatcher loop alive
    #[error("{0}")]
    CmdErr(WireFailure),
}

/// one `(code message file line)` entry of a failure response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureLink {
    pub code: u32,
    pub message: String,
    pub file: String,
    pub line: u32,
}

/// an error chain in its wire-transmissible form
///
/// links are held innermost cause first; the serializer emits them outermost
/// first and the peer reverses them back on read
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireFailure {
    links: Vec<FailureLink>,
}

impl WireFailure {
    pub fn new(links: Vec<FailureLink>) -> Self {
        assert!(!links.is_empty(), "failure must carry at least one link");
        Self { links }
    }

    pub fn single(code: ErrCode, message: String, file: &str, line: u32) -> Self {
        Self {
            links: vec![FailureLink {
                code: code.as_u32(),
                message,
                file: file.to_owned(),
                line,
            }],
        }
    }

    /// wrap with an outer cause
    pub fn chain(mut self, outer: Self) -> Self {
        self.links.extend(outer.links);
        self
    }

    /// innermost cause first
    pub fn links(&self) -> &[FailureLink] {
        &self.links
    }

    pub fn innermost(&self) -> &FailureLink {
        &self.links[0]
    }

    pub fn outermost(&self) -> &FailureLink {
        self.links.last().unwrap()
    }

    pub fn contains_code(&self, code: ErrCode) -> bool {
        self.links.iter().any(|link| link.code == code.as_u32())
    }

    /// flatten a generic error into a transmissible chain, stamping links that
    /// did not originate from a [WireFailure] with the caller's location
    pub fn from_generic(err: &ArborGenericError, file: &str, line: u32) -> Self {
        if let Some(arbor_err) = err.downcast_ref::<ArborError>() {
            if let ArborError::CmdErr(failure) = arbor_err {
                return failure.clone();
            }
        }
        if let Some(failure) = err.downcast_ref::<WireFailure>() {
            return failure.clone();
        }

        // anyhow chains iterate outermost first, we store innermost first
        let links = err
            .chain()
            .map(|cause| FailureLink {
                code: code_of_cause(cause).as_u32(),
                message: cause.to_string(),
                file: file.to_owned(),
                line,
            })
            .rev()
            .collect();
        Self { links }
    }
}

fn code_of_cause(cause: &(dyn std::error::Error + 'static)) -> ErrCode {
    if cause.is::<std::io::Error>() {
        return ErrCode::Io;
    }
    match cause.downcast_ref::<ArborError>() {
        Some(ArborError::ConnectionClosed) => ErrCode::ConnectionClosed,
        Some(ArborError::MalformedData(..)) => ErrCode::MalformedData,
        Some(ArborError::UnknownCmd(..)) => ErrCode::UnknownCmd,
        Some(ArborError::OutOfDate(..)) => ErrCode::OutOfDate,
        Some(ArborError::PreconditionViolated(..)) => ErrCode::Precondition,
        Some(ArborError::Cancelled) => ErrCode::Cancelled,
        Some(ArborError::Unsupported(..)) => ErrCode::Unsupported,
        Some(ArborError::CmdErr(failure)) => {
            ErrCode::try_from(failure.outermost().code).unwrap_or(ErrCode::Generic)
        }
        None => ErrCode::Generic,
    }
}

impl Display for WireFailure {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.outermost().message)?;
        for link in self.links.iter().rev().skip(1) {
            write!(f, ": {}", link.message)?;
        }
        Ok(())
    }
}

impl std::error::Error for WireFailure {
}

pub trait ArborErrorExt {
    fn try_into_arbor_error(self) -> ArborResult<ArborError>;
    fn try_into_failure(self) -> ArborResult<WireFailure>;
}

impl ArborErrorExt for ArborGenericError {
    /// tries to convert the generic error into the matchable enum and just
    /// returns the previous error on failure
    fn try_into_arbor_error(self) -> ArborResult<ArborError> {
        self.downcast::<ArborError>()
    }

    fn try_into_failure(self) -> ArborResult<WireFailure> {
        match self.try_into_arbor_error()? {
            ArborError::CmdErr(failure) => Ok(failure),
            err => Err(anyhow!(err)),
        }
    }
}

pub trait ArborResultExt {
    fn is_out_of_date(&self) -> bool;
    fn is_connection_closed(&self) -> bool;
    fn is_cancelled(&self) -> bool;
    /// errors that poison the connection itself rather than the current
    /// exchange; the dispatcher never converts these into `failure` responses
    fn is_transport_fatal(&self) -> bool;
}

macro_rules! error_ext_is_method {
    ($method:ident) => {
        fn $method(&self) -> bool {
            match self {
                Ok(..) => false,
                Err(err) => err.$method(),
            }
        }
    };
}

impl<T> ArborResultExt for ArborResult<T> {
    error_ext_is_method!(is_out_of_date);

    error_ext_is_method!(is_connection_closed);

    error_ext_is_method!(is_cancelled);

    error_ext_is_method!(is_transport_fatal);
}

impl ArborResultExt for ArborGenericError {
    fn is_out_of_date(&self) -> bool {
        match self.downcast_ref::<ArborError>() {
            Some(ArborError::OutOfDate(..)) => true,
            Some(ArborError::CmdErr(failure)) => failure.contains_code(ErrCode::OutOfDate),
            _ => self
                .downcast_ref::<WireFailure>()
                .map(|failure| failure.contains_code(ErrCode::OutOfDate))
                .unwrap_or(false),
        }
    }

    fn is_connection_closed(&self) -> bool {
        matches!(self.downcast_ref::<ArborError>(), Some(ArborError::ConnectionClosed))
    }

    fn is_cancelled(&self) -> bool {
        matches!(self.downcast_ref::<ArborError>(), Some(ArborError::Cancelled))
    }

    fn is_transport_fatal(&self) -> bool {
        if self.downcast_ref::<std::io::Error>().is_some() {
            return true;
        }
        matches!(
            self.downcast_ref::<ArborError>(),
            Some(
                ArborError::ConnectionClosed
                    | ArborError::MalformedData(..)
                    | ArborError::Cancelled
            )
        )
    }
}
