//! share configuration
//!
//! [`Configuration`] is what a caller fills in (every field optional);
//! [`ShareConfiguration`] is the validated layout the orchestrator runs with.

use serde::{Deserialize, Serialize};

use crate::shard::MAX_NIBBLE_COUNT;
use crate::{Error, Result};

/// members stored per node when not configured
pub const DEFAULT_GROUP_MEMBERS: usize = 2;

/// members needed per node when not configured
pub const DEFAULT_GROUP_MEMBER_THRESHOLD: usize = 2;

/// caller-facing options, missing values fall back to defaults
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Configuration {
    /// groups needed to recover, default majority of nodes
    pub group_threshold: Option<usize>,
    /// shares stored on each node
    pub group_members: Option<usize>,
    /// shares needed from each node
    pub group_member_threshold: Option<usize>,
}

impl Configuration {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_group_threshold(mut self, threshold: usize) -> Self {
        self.group_threshold = Some(threshold);
        self
    }

    pub fn with_group_members(mut self, members: usize) -> Self {
        self.group_members = Some(members);
        self
    }

    pub fn with_group_member_threshold(mut self, threshold: usize) -> Self {
        self.group_member_threshold = Some(threshold);
        self
    }

    /// parse from json, e.g. `{"group_threshold": 2}`
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::InvalidConfiguration(e.to_string()))
    }

    /// resolve against `nodes` nodes, one group per node
    pub fn resolve(&self, nodes: usize) -> Result<ShareConfiguration> {
        ShareConfiguration::new(
            nodes,
            self.group_threshold.unwrap_or(nodes / 2 + 1),
            self.group_members.unwrap_or(DEFAULT_GROUP_MEMBERS),
            self.group_member_threshold.unwrap_or(DEFAULT_GROUP_MEMBER_THRESHOLD),
        )
    }
}

/// validated group/member layout, fixed for the orchestrator's lifetime
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct ShareConfiguration {
    groups: usize,
    group_threshold: usize,
    group_members: usize,
    group_member_threshold: usize,
}

impl ShareConfiguration {
    pub fn new(
        groups: usize,
        group_threshold: usize,
        group_members: usize,
        group_member_threshold: usize,
    ) -> Result<Self> {
        if groups == 0 || groups > MAX_NIBBLE_COUNT {
            return Err(Error::InvalidConfiguration(format!(
                "groups must be 1..={}, got {}",
                MAX_NIBBLE_COUNT, groups
            )));
        }
        if group_members == 0 || group_members > MAX_NIBBLE_COUNT {
            return Err(Error::InvalidConfiguration(format!(
                "group members must be 1..={}, got {}",
                MAX_NIBBLE_COUNT, group_members
            )));
        }
        if group_threshold == 0 || group_member_threshold == 0 {
            return Err(Error::InvalidConfiguration("thresholds must be at least 1".into()));
        }
        if group_threshold > groups {
            return Err(Error::GroupThresholdExceeded {
                threshold: group_threshold,
                groups,
            });
        }
        if group_member_threshold > group_members {
            return Err(Error::MemberThresholdExceeded {
                threshold: group_member_threshold,
                members: group_members,
            });
        }

        Ok(Self {
            groups,
            group_threshold,
            group_members,
            group_member_threshold,
        })
    }

    pub fn groups(&self) -> usize {
        self.groups
    }

    pub fn group_threshold(&self) -> usize {
        self.group_threshold
    }

    pub fn group_members(&self) -> usize {
        self.group_members
    }

    pub fn group_member_threshold(&self) -> usize {
        self.group_member_threshold
    }
}
