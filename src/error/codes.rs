//! Error code constants.
//!
//! Error codes are organized by category:
//! - 1xxx: Configuration errors
//! - 2xxx: Workflow errors (browser, mailbox)
//! - 3xxx: Sync errors
//! - 4xxx: Resource/job errors
//! - 5xxx: Storage/System errors

/// Error code type with semantic categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ErrorCode(i32);

impl ErrorCode {
    // ===== Configuration Errors (1xxx) =====

    /// Invalid or missing configuration.
    pub const INVALID_CONFIG: Self = Self(1001);

    // ===== Workflow Errors (2xxx) =====

    /// Host unreachable or browser could not start.
    pub const NETWORK: Self = Self(2001);

    /// Expected page element or state did not appear.
    pub const AUTOMATION: Self = Self(2002);

    /// A bounded wait (OTP, redirect) ran out.
    pub const EXPIRED_WAIT: Self = Self(2003);

    // ===== Sync Errors (3xxx) =====

    /// Transport failure talking to gpt-load.
    pub const SYNC_TRANSPORT: Self = Self(3001);

    /// gpt-load rejected the request.
    pub const SYNC_REJECTED: Self = Self(3002);

    /// Target group does not exist.
    pub const SYNC_GROUP_NOT_FOUND: Self = Self(3003);

    // ===== Resource Errors (4xxx) =====

    /// Resource not found.
    pub const NOT_FOUND: Self = Self(4001);

    /// A run is already active.
    pub const RUN_IN_PROGRESS: Self = Self(4002);

    // ===== Internal/System Errors (5xxx) =====

    /// Key store error.
    pub const STORAGE_ERROR: Self = Self(5001);

    /// Get the error code as an i32.
    #[must_use]
    pub const fn as_i32(self) -> i32 {
        self.0
    }

    /// Get the category of this error code.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self.0 {
            1000..=1999 => ErrorCategory::Configuration,
            2000..=2999 => ErrorCategory::Workflow,
            3000..=3999 => ErrorCategory::Sync,
            4000..=4999 => ErrorCategory::Resource,
            5000..=5999 => ErrorCategory::Internal,
            _ => ErrorCategory::Unknown,
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<ErrorCode> for i32 {
    fn from(code: ErrorCode) -> Self {
        code.0
    }
}

/// Error category based on error code range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Configuration-related errors (1xxx).
    Configuration,
    /// Browser/mailbox workflow errors (2xxx).
    Workflow,
    /// gpt-load sync errors (3xxx).
    Sync,
    /// Resource errors (4xxx).
    Resource,
    /// Internal/system errors (5xxx).
    Internal,
    /// Unknown category.
    Unknown,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Configuration => write!(f, "configuration"),
            Self::Workflow => write!(f, "workflow"),
            Self::Sync => write!(f, "sync"),
            Self::Resource => write!(f, "resource"),
            Self::Internal => write!(f, "internal"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_values() {
        assert_eq!(ErrorCode::INVALID_CONFIG.as_i32(), 1001);
        assert_eq!(ErrorCode::EXPIRED_WAIT.as_i32(), 2003);
        assert_eq!(ErrorCode::SYNC_REJECTED.as_i32(), 3002);
        assert_eq!(ErrorCode::RUN_IN_PROGRESS.as_i32(), 4002);
        assert_eq!(i32::from(ErrorCode::STORAGE_ERROR), 5001);
    }

    #[test]
    fn test_error_categories() {
        assert_eq!(
            ErrorCode::INVALID_CONFIG.category(),
            ErrorCategory::Configuration
        );
        assert_eq!(ErrorCode::AUTOMATION.category(), ErrorCategory::Workflow);
        assert_eq!(
            ErrorCode::SYNC_GROUP_NOT_FOUND.category(),
            ErrorCategory::Sync
        );
        assert_eq!(ErrorCode::NOT_FOUND.category(), ErrorCategory::Resource);
        assert_eq!(ErrorCategory::Internal.to_string(), "internal");
    }
}
