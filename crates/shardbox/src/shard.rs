//! shard wire format
//!
//! one record per member, big-endian, 5 byte header followed by the share:
//!
//! ```text
//! byte 0-1 : identifier (u16)
//! byte 2   : (group_threshold - 1) << 4 | (group_count - 1)
//! byte 3   : group_index << 4 | (member_threshold - 1)
//! byte 4   : reserved (upper 4 bits, zero) | member_index
//! byte 5.. : share value
//! ```

use crate::{Error, Result};

/// header length of a serialized member record
pub const HEADER_LEN: usize = 5;

/// largest value representable in a 4 bit field (as count, stored n - 1)
pub const MAX_NIBBLE_COUNT: usize = 16;

/// one member's share of a group
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MemberShard {
    /// 0-based member position (0..=15)
    pub member_index: u8,
    /// share bytes from the inner shamir round
    pub share_value: Vec<u8>,
}

/// the member shards of one group plus the split metadata they carry
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GroupShard {
    /// random tag shared by every shard of one split
    pub identifier: u16,
    pub group_threshold: u8,
    pub group_count: u8,
    /// 0-based group position
    pub group_index: u8,
    pub member_threshold: u8,
    pub members: Vec<MemberShard>,
}

impl GroupShard {
    /// serialize into one record per member
    ///
    /// every header field must fit its 4 bit slot; out of range values are
    /// rejected instead of being truncated into a different header.
    pub fn serialize(&self) -> Result<Vec<Vec<u8>>> {
        self.check_header()?;

        let id = self.identifier.to_be_bytes();
        let byte2 = (self.group_threshold - 1) << 4 | (self.group_count - 1);
        let byte3 = self.group_index << 4 | (self.member_threshold - 1);

        Ok(self
            .members
            .iter()
            .map(|member| {
                let mut record = Vec::with_capacity(HEADER_LEN + member.share_value.len());
                record.extend_from_slice(&id);
                record.push(byte2);
                record.push(byte3);
                record.push(member.member_index);
                record.extend_from_slice(&member.share_value);
                record
            })
            .collect())
    }

    fn check_header(&self) -> Result<()> {
        let count = self.group_count as usize;
        if count == 0 || count > MAX_NIBBLE_COUNT {
            return Err(Error::UnsupportedGroupSize(count));
        }
        if self.group_threshold == 0 || self.group_threshold > self.group_count {
            return Err(Error::InvalidGroupThreshold);
        }
        if self.group_index >= self.group_count {
            return Err(Error::InvalidShardFormat);
        }
        if self.member_threshold == 0 || self.member_threshold as usize > MAX_NIBBLE_COUNT {
            return Err(Error::InvalidMemberThreshold);
        }
        if self.members.iter().any(|m| m.member_index as usize >= MAX_NIBBLE_COUNT) {
            return Err(Error::InvalidShardFormat);
        }
        Ok(())
    }

    /// decode a set of member records into one group
    ///
    /// every record must carry the same identifier, thresholds, count and
    /// group index as the first one. members are accumulated in record order.
    pub fn deserialize<B: AsRef<[u8]>>(records: &[B]) -> Result<Self> {
        let (first, rest) = records.split_first().ok_or(Error::EmptyShardSet)?;
        let mut group = Self::decode_record(first.as_ref())?;

        for record in rest {
            let next = Self::decode_record(record.as_ref())?;
            if !group.matches(&next) {
                return Err(Error::GroupShardsMismatch);
            }
            group.members.extend(next.members);
        }

        Ok(group)
    }

    /// true when both shards come from the same split and group
    pub fn matches(&self, other: &GroupShard) -> bool {
        self.identifier == other.identifier
            && self.group_threshold == other.group_threshold
            && self.group_count == other.group_count
            && self.group_index == other.group_index
            && self.member_threshold == other.member_threshold
    }

    fn decode_record(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_LEN {
            return Err(Error::InvalidShardFormat);
        }

        let group_threshold = (bytes[2] >> 4) + 1;
        let group_count = (bytes[2] & 0xf) + 1;
        if group_threshold > group_count {
            return Err(Error::InvalidGroupThreshold);
        }

        if bytes[4] >> 4 != 0 {
            return Err(Error::InvalidReservedBit);
        }

        Ok(Self {
            identifier: u16::from_be_bytes([bytes[0], bytes[1]]),
            group_threshold,
            group_count,
            group_index: bytes[3] >> 4,
            member_threshold: (bytes[3] & 0xf) + 1,
            members: vec![MemberShard {
                member_index: bytes[4] & 0xf,
                share_value: bytes[HEADER_LEN..].to_vec(),
            }],
        })
    }
}
