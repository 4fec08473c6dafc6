//! Wizard pages and how the page list is derived

use std::fmt;

use crate::types::{Destination, DistributionGroup, ProvisioningProfileType, Release, TargetOs};

/// Where the wizard was opened from
#[derive(Debug, Clone, PartialEq)]
pub enum EntryContext {
    ReleaseList,
    /// Opened from a group; the group is preselected as the destination
    DistributionGroup(DistributionGroup),
    /// Re-distribution of an existing release
    ReleaseDetails(Release),
}

/// Where the release comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    Upload,
    /// A build produced by CI for a branch
    Branch { branch: String, build_id: String },
    /// A binary hosted outside the service
    ExternalBuild { url: String },
}

impl Source {
    pub fn is_external(&self) -> bool {
        matches!(self, Source::ExternalBuild { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Page {
    Upload,
    SelectBuild,
    ExternalBuild,
    ReleaseNotes,
    Destinations,
    DeviceRegistration,
    Summary,
    /// Modal sub-flow for creating a group
    CreateNewGroup,
    /// Shown while a release is being resigned
    Publishing,
}

impl fmt::Display for Page {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Page::Upload => "Upload",
            Page::SelectBuild => "Select build",
            Page::ExternalBuild => "External build",
            Page::ReleaseNotes => "Release notes",
            Page::Destinations => "Destinations",
            Page::DeviceRegistration => "Device registration",
            Page::Summary => "Summary",
            Page::CreateNewGroup => "Create new group",
            Page::Publishing => "Publishing",
        };
        write!(f, "{}", name)
    }
}

/// Ordered page list for a wizard configuration
pub fn derive_pages(
    context: &EntryContext,
    source: &Source,
    device_registration_required: bool,
) -> Vec<Page> {
    let mut pages = Vec::with_capacity(5);

    match context {
        EntryContext::ReleaseDetails(_) => pages.push(Page::Destinations),
        EntryContext::ReleaseList | EntryContext::DistributionGroup(_) => {
            pages.push(match source {
                Source::Upload => Page::Upload,
                Source::Branch { .. } => Page::SelectBuild,
                Source::ExternalBuild { .. } => Page::ExternalBuild,
            });
            pages.push(Page::ReleaseNotes);
            if !matches!(context, EntryContext::DistributionGroup(_)) {
                pages.push(Page::Destinations);
            }
        }
    }

    if device_registration_required {
        pages.push(Page::DeviceRegistration);
    }
    pages.push(Page::Summary);
    pages
}

/// Whether testers' devices must be registered before distributing.
///
/// Applies to iOS builds signed with an ad hoc (or unknown) profile sent to
/// a group that does not have auto-provisioning enabled. External builds
/// are never re-signed.
pub fn device_registration_required(
    os: TargetOs,
    source: &Source,
    release: Option<&Release>,
    destinations: &[Destination],
    auto_provisioning_enabled: bool,
) -> bool {
    if os != TargetOs::Ios || source.is_external() {
        return false;
    }

    if let Some(release) = release {
        if release.is_external_build {
            return false;
        }
        if !matches!(
            release.provisioning_profile_type,
            None | Some(ProvisioningProfileType::Adhoc)
        ) {
            return false;
        }
    }

    destinations.iter().any(Destination::is_group) && !auto_provisioning_enabled
}

#[cfg(test)]
mod tests {
    use super::*;

    fn release(profile: Option<ProvisioningProfileType>) -> Release {
        Release {
            id: 1,
            version: "1".to_string(),
            short_version: "1.0".to_string(),
            file_extension: Some("ipa".to_string()),
            is_external_build: false,
            provisioning_profile_type: profile,
            enabled: true,
            destinations: Vec::new(),
        }
    }

    #[test]
    fn test_pages_from_release_list() {
        assert_eq!(
            derive_pages(&EntryContext::ReleaseList, &Source::Upload, false),
            vec![Page::Upload, Page::ReleaseNotes, Page::Destinations, Page::Summary]
        );
        assert_eq!(
            derive_pages(
                &EntryContext::ReleaseList,
                &Source::Branch {
                    branch: "main".to_string(),
                    build_id: "42".to_string()
                },
                true
            ),
            vec![
                Page::SelectBuild,
                Page::ReleaseNotes,
                Page::Destinations,
                Page::DeviceRegistration,
                Page::Summary
            ]
        );
    }

    #[test]
    fn test_pages_from_group_skip_destinations() {
        let group = DistributionGroup {
            id: "g-1".to_string(),
            name: "Beta".to_string(),
            is_public: false,
            total_user_count: Some(4),
        };
        assert_eq!(
            derive_pages(
                &EntryContext::DistributionGroup(group),
                &Source::ExternalBuild {
                    url: "https://cdn.example.com/app.ipa".to_string()
                },
                false
            ),
            vec![Page::ExternalBuild, Page::ReleaseNotes, Page::Summary]
        );
    }

    #[test]
    fn test_pages_from_release_details() {
        assert_eq!(
            derive_pages(
                &EntryContext::ReleaseDetails(release(None)),
                &Source::Upload,
                true
            ),
            vec![Page::Destinations, Page::DeviceRegistration, Page::Summary]
        );
    }

    #[test]
    fn test_device_registration_rules() {
        let group = [Destination::group("g-1", "Beta")];
        let tester = [Destination::tester("ann@example.com")];
        let adhoc = release(Some(ProvisioningProfileType::Adhoc));
        let enterprise = release(Some(ProvisioningProfileType::Enterprise));
        let ios = |release: Option<&Release>, selected: &[Destination], auto: bool| {
            device_registration_required(TargetOs::Ios, &Source::Upload, release, selected, auto)
        };

        assert!(ios(Some(&adhoc), &group, false));
        assert!(ios(None, &group, false));
        assert!(!ios(Some(&adhoc), &group, true));
        assert!(!ios(Some(&adhoc), &tester, false));
        assert!(!ios(Some(&enterprise), &group, false));
        assert!(!device_registration_required(
            TargetOs::Android,
            &Source::Upload,
            None,
            &group,
            false
        ));

        let external = Source::ExternalBuild {
            url: "https://cdn.example.com/app.ipa".to_string(),
        };
        assert!(!device_registration_required(TargetOs::Ios, &external, None, &group, false));

        let mut hosted = adhoc.clone();
        hosted.is_external_build = true;
        assert!(!ios(Some(&hosted), &group, false));
    }
}
