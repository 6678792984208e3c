macro_rules! ensure_eq {
    ($a:expr, $b:expr) => {
        ensure!($a == $b)
    };
    ($a:expr, $b:expr, $($arg:tt)*) => {
        ensure!($a == $b, $($arg)*)
    };
}

/// build a single-link [crate::error::WireFailure] stamped with the callsite
macro_rules! wire_err {
    ($code:expr, $($arg:tt)*) => {
        $crate::error::WireFailure::single($code, format!($($arg)*), file!(), line!())
    };
}

/// wrap a failure in the dispatcher sentinel so it is reported as a `failure`
/// response without tearing down the connection
macro_rules! cmd_err {
    ($code:expr, $($arg:tt)*) => {
        $crate::error::ArborError::CmdErr(wire_err!($code, $($arg)*))
    };
}

macro_rules! bail_cmd {
    ($code:expr, $($arg:tt)*) => {
        return Err(cmd_err!($code, $($arg)*).into())
    };
}
