//! # Intake access policy.
//!
//! Three independent allow lists consulted when a submission arrives:
//! `allowuser`, `allowhost`, `allowgroup`. An empty list allows everyone;
//! a non-empty list admits exact matches only. The three checks are ANDed.

use crate::proto::HostDescriptor;

/// Why a submission was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    /// Submitter's user is not on `allowuser`.
    User,
    /// Submitter's host name is not on `allowhost`.
    Host,
    /// Submitter's group is not on `allowgroup`.
    Group,
}

impl DenyReason {
    /// Short label for logs and events.
    pub fn as_label(self) -> &'static str {
        match self {
            DenyReason::User => "user not allowed",
            DenyReason::Host => "host not allowed",
            DenyReason::Group => "group not allowed",
        }
    }
}

/// The three allow lists, fixed at startup.
#[derive(Debug, Clone, Default)]
pub struct AccessLists {
    pub allowuser: Vec<String>,
    pub allowhost: Vec<String>,
    pub allowgroup: Vec<String>,
}

impl AccessLists {
    /// Checks a submitter against all three lists.
    pub fn admit(&self, submitter: &HostDescriptor) -> Result<(), DenyReason> {
        if !allowed(&self.allowuser, &submitter.user) {
            return Err(DenyReason::User);
        }
        if !allowed(&self.allowhost, &submitter.name) {
            return Err(DenyReason::Host);
        }
        if !allowed(&self.allowgroup, &submitter.group) {
            return Err(DenyReason::Group);
        }
        Ok(())
    }
}

/// Empty list means "allow all"; otherwise exact match.
fn allowed(list: &[String], value: &str) -> bool {
    list.is_empty() || list.iter().any(|entry| entry == value)
}
