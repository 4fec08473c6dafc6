//! Allowed binary extensions per target OS

use crate::error::{DistributeError, Result};
use crate::types::TargetOs;

/// Extensions accepted for a target OS.
///
/// `public_store` narrows the list to what the public store of that
/// platform ingests.
pub fn allowed_extensions(os: TargetOs, public_store: bool) -> &'static [&'static str] {
    match (os, public_store) {
        (TargetOs::Ios | TargetOs::Tvos, _) => &[".ipa"],
        (TargetOs::Android, false) => &[".apk", ".aab"],
        (TargetOs::Android, true) => &[".aab", ".apk"],
        (TargetOs::Macos, false) => &[".app.zip", ".pkg", ".dmg"],
        (TargetOs::Macos, true) => &[".pkg"],
        (TargetOs::Windows, false) => &[
            ".appx",
            ".appxbundle",
            ".appxupload",
            ".msi",
            ".msix",
            ".msixbundle",
            ".msixupload",
            ".zip",
        ],
        (TargetOs::Windows, true) => &[".appxupload", ".msixupload"],
        (TargetOs::Custom, false) => &[".zip", ".apk", ".ipa", ".app.zip"],
        (TargetOs::Custom, true) => &[],
    }
}

/// Longest allowed extension that `file_name` ends with, compared case-insensitively
pub fn matching_extension(file_name: &str, allowed: &[&'static str]) -> Option<&'static str> {
    let lower = file_name.to_lowercase();
    allowed
        .iter()
        .copied()
        .filter(|ext| lower.len() > ext.len() && lower.ends_with(ext))
        .max_by_key(|ext| ext.len())
}

/// Validate a file name for upload, returning the matched extension
pub fn validate_file_name(
    file_name: &str,
    os: TargetOs,
    public_store: bool,
) -> Result<&'static str> {
    let allowed = allowed_extensions(os, public_store);

    if allowed.is_empty() {
        return Err(DistributeError::Validation(format!(
            "{} apps cannot be distributed to a public store",
            os
        )));
    }

    matching_extension(file_name, allowed).ok_or_else(|| {
        DistributeError::Validation(format!(
            "'{}' is not a valid {} binary. Expected one of: {}",
            file_name,
            os,
            allowed.join(", ")
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ios_accepts_ipa_only() {
        assert_eq!(validate_file_name("app-v2.ipa", TargetOs::Ios, false).unwrap(), ".ipa");
        assert!(validate_file_name("app.apk", TargetOs::Ios, false).is_err());
    }

    #[test]
    fn test_extension_match_is_case_insensitive() {
        assert_eq!(validate_file_name("Release.IPA", TargetOs::Ios, false).unwrap(), ".ipa");
    }

    #[test]
    fn test_multi_part_extension_wins() {
        assert_eq!(
            validate_file_name("Rocket.app.zip", TargetOs::Macos, false).unwrap(),
            ".app.zip"
        );
        assert_eq!(
            validate_file_name("rocket.app.zip", TargetOs::Custom, false).unwrap(),
            ".app.zip"
        );
        assert_eq!(validate_file_name("rocket.zip", TargetOs::Custom, false).unwrap(), ".zip");
    }

    #[test]
    fn test_public_store_narrows_list() {
        assert!(validate_file_name("Rocket.dmg", TargetOs::Macos, false).is_ok());
        assert!(validate_file_name("Rocket.dmg", TargetOs::Macos, true).is_err());
        assert!(validate_file_name("Rocket.msix", TargetOs::Windows, true).is_err());
        assert!(validate_file_name("Rocket.msixupload", TargetOs::Windows, true).is_ok());
    }

    #[test]
    fn test_custom_has_no_store() {
        let err = validate_file_name("rocket.zip", TargetOs::Custom, true).unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn test_bare_extension_is_not_a_file_name() {
        assert!(validate_file_name(".ipa", TargetOs::Ios, false).is_err());
    }
}
