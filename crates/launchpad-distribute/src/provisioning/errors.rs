//! Developer portal error classification

use std::fmt;

use serde::{Deserialize, Serialize};

/// Reason shown when a provisioning step fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorPage {
    /// Apple ID or service connection rejected
    AuthFailed,
    /// Account requires two-factor authentication, which is not supported
    TwoFactorUnsupported,
    /// A program license agreement must be accepted first
    LicensePending,
    /// The developer team could not be found
    TeamNotFound,
    /// No matching provisioning profile
    ProfileNotFound,
    /// The developer program membership has expired
    ProgramExpired,
    /// The Apple ID is not enrolled in the developer program
    AccountNotDeveloper,
    /// Anything else; the raw server message is displayed
    Unhandled,
}

impl ErrorPage {
    /// Map a developer portal error code to an error page
    pub fn from_code(code: &str) -> Self {
        match code {
            "invalid_credentials" | "authentication_failed" => ErrorPage::AuthFailed,
            "two_factor_not_supported" => ErrorPage::TwoFactorUnsupported,
            "license_agreement_pending" => ErrorPage::LicensePending,
            "team_not_found" => ErrorPage::TeamNotFound,
            "profile_not_found" => ErrorPage::ProfileNotFound,
            "program_expired" => ErrorPage::ProgramExpired,
            "not_a_developer_account" => ErrorPage::AccountNotDeveloper,
            _ => ErrorPage::Unhandled,
        }
    }

    /// Authentication failures send the user back to the login step
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, ErrorPage::AuthFailed)
    }

    /// Short user-facing explanation
    pub fn description(&self) -> &'static str {
        match self {
            ErrorPage::AuthFailed => "The Apple ID or password is incorrect.",
            ErrorPage::TwoFactorUnsupported => {
                "Accounts with two-factor authentication must use an app-specific connection."
            }
            ErrorPage::LicensePending => {
                "A new program license agreement must be accepted in the Apple Developer portal."
            }
            ErrorPage::TeamNotFound => "The developer team for this app could not be found.",
            ErrorPage::ProfileNotFound => "No provisioning profile matches this app.",
            ErrorPage::ProgramExpired => "The Apple Developer Program membership has expired.",
            ErrorPage::AccountNotDeveloper => {
                "This Apple ID is not enrolled in the Apple Developer Program."
            }
            ErrorPage::Unhandled => "The developer portal returned an unexpected error.",
        }
    }
}

impl fmt::Display for ErrorPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorPage::AuthFailed => "auth failed",
            ErrorPage::TwoFactorUnsupported => "two-factor unsupported",
            ErrorPage::LicensePending => "license pending",
            ErrorPage::TeamNotFound => "team not found",
            ErrorPage::ProfileNotFound => "profile not found",
            ErrorPage::ProgramExpired => "program expired",
            ErrorPage::AccountNotDeveloper => "account not a developer",
            ErrorPage::Unhandled => "unhandled",
        };
        write!(f, "{}", name)
    }
}
