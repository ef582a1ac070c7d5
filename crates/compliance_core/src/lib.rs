pub mod config;
pub mod db;
pub mod domain;
pub mod error;
pub mod logging;
pub mod normalize;

#[cfg(test)]
mod tests {
    use super::error::{AppError, ErrorKind};

    #[test]
    fn app_error_is_structured() {
        let err = AppError::new("INDEX_UNAVAILABLE", "index failed").with_retryable(false);
        assert_eq!(err.code, "INDEX_UNAVAILABLE");
        assert_eq!(err.message, "index failed");
        assert!(!err.retryable);
        assert_eq!(err.kind(), ErrorKind::IndexUnavailable);
    }
}
