/// Returns early with `$error` unless `$predicate` holds.
///
/// ```ignore
/// ensure!(limit > 0, ParseError::invalid_body("read limit must be positive"));
/// ```
macro_rules! ensure {
    ($predicate:expr, $error:expr) => {
        if !$predicate {
            return Err($error);
        }
    };
}

pub(crate) use ensure;
