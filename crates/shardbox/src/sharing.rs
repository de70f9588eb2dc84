//! two-level threshold sharing
//!
//! the secret is split across groups, then each group's share is split
//! again across that group's members. every member share is wrapped in a
//! [`GroupShard`] record so the joiner can check it belongs to the same
//! split before interpolating.

use rand::Rng;
use tracing::debug;

use crate::shamir::{Gf256Shamir, Shamir};
use crate::shard::{GroupShard, MemberShard, MAX_NIBBLE_COUNT};
use crate::{Error, Result};

/// longest secret the one-byte length budget allows
pub const MAX_SECRET_SIZE: usize = u8::MAX as usize;

/// member layout of one group
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GroupSpec {
    pub members: usize,
    pub member_threshold: usize,
}

impl GroupSpec {
    pub fn new(members: usize, member_threshold: usize) -> Self {
        Self { members, member_threshold }
    }
}

/// pluggable group/member secret sharing scheme
pub trait SecretSharing: Send + Sync {
    /// split into one record set per group, one record per member
    fn split(&self, secret: &[u8], groups: &[GroupSpec], group_threshold: usize) -> Result<Vec<Vec<Vec<u8>>>>;

    /// reconstruct from the record sets of at least `group_threshold` groups
    fn join(&self, parts: &[Vec<Vec<u8>>]) -> Result<Vec<u8>>;
}

/// sskr-style sharing on top of a [`Shamir`] backend
#[derive(Clone, Debug, Default)]
pub struct ThresholdSharing<S = Gf256Shamir> {
    shamir: S,
}

impl<S: Shamir> ThresholdSharing<S> {
    pub fn new(shamir: S) -> Self {
        Self { shamir }
    }

    fn split_members(&self, group_share: &[u8], spec: &GroupSpec) -> Result<Vec<MemberShard>> {
        let shares = self.shamir.split(group_share, spec.members, spec.member_threshold)?;
        Ok(shares
            .into_iter()
            .enumerate()
            .map(|(index, share_value)| MemberShard {
                member_index: index as u8,
                share_value,
            })
            .collect())
    }

    fn join_members(&self, group: &GroupShard) -> Result<Vec<u8>> {
        let need = group.member_threshold as usize;
        if group.members.len() < need {
            return Err(Error::NotEnoughMembers {
                have: group.members.len(),
                need,
            });
        }

        let mut members: Vec<&MemberShard> = group.members.iter().collect();
        members.sort_by_key(|m| m.member_index);
        if let Some(pair) = members.windows(2).find(|w| w[0].member_index == w[1].member_index) {
            return Err(Error::DuplicateMemberIndex(pair[0].member_index));
        }

        let shares: Vec<(u8, &[u8])> = members
            .iter()
            .map(|m| (m.member_index, m.share_value.as_slice()))
            .collect();
        Ok(self.shamir.join(&shares)?)
    }
}

impl<S: Shamir> SecretSharing for ThresholdSharing<S> {
    fn split(&self, secret: &[u8], groups: &[GroupSpec], group_threshold: usize) -> Result<Vec<Vec<Vec<u8>>>> {
        if secret.len() > MAX_SECRET_SIZE {
            return Err(Error::InvalidSecretSize(secret.len()));
        }
        if groups.is_empty() || groups.len() > MAX_NIBBLE_COUNT {
            return Err(Error::UnsupportedGroupSize(groups.len()));
        }
        if group_threshold == 0 || group_threshold > groups.len() {
            return Err(Error::InvalidGroupThreshold);
        }
        for spec in groups {
            if spec.members == 0 || spec.members > MAX_NIBBLE_COUNT {
                return Err(Error::UnsupportedMemberSize(spec.members));
            }
            if spec.member_threshold == 0 || spec.member_threshold > spec.members {
                return Err(Error::InvalidMemberThreshold);
            }
        }

        let identifier: u16 = rand::thread_rng().gen();
        let group_shares = self.shamir.split(secret, groups.len(), group_threshold)?;
        debug!(
            groups = groups.len(),
            group_threshold,
            identifier,
            "split secret into group shares"
        );

        group_shares
            .iter()
            .zip(groups)
            .enumerate()
            .map(|(index, (group_share, spec))| -> Result<Vec<Vec<u8>>> {
                let group = GroupShard {
                    identifier,
                    group_threshold: group_threshold as u8,
                    group_count: groups.len() as u8,
                    group_index: index as u8,
                    member_threshold: spec.member_threshold as u8,
                    members: self.split_members(group_share, spec)?,
                };
                group.serialize()
            })
            .collect()
    }

    fn join(&self, parts: &[Vec<Vec<u8>>]) -> Result<Vec<u8>> {
        let groups = parts
            .iter()
            .map(|records| GroupShard::deserialize(records))
            .collect::<Result<Vec<_>>>()?;

        let first = groups.first().ok_or(Error::EmptyShardSet)?;
        for group in &groups[1..] {
            if group.identifier != first.identifier
                || group.group_threshold != first.group_threshold
                || group.group_count != first.group_count
            {
                return Err(Error::GroupShardsMismatch);
            }
        }

        let need = first.group_threshold as usize;
        if groups.len() < need {
            return Err(Error::NotEnoughGroups {
                have: groups.len(),
                need,
            });
        }

        let mut group_shares: Vec<(u8, Vec<u8>)> = Vec::with_capacity(groups.len());
        for group in &groups {
            if group_shares.iter().any(|(index, _)| *index == group.group_index) {
                return Err(Error::DuplicateGroupIndex(group.group_index));
            }
            group_shares.push((group.group_index, self.join_members(group)?));
        }

        let shares: Vec<(u8, &[u8])> = group_shares
            .iter()
            .map(|(index, share)| (*index, share.as_slice()))
            .collect();
        Ok(self.shamir.join(&shares)?)
    }
}
