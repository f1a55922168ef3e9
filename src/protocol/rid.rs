use std::{fmt, str::FromStr};

use bincode::{Decode, Encode};
use thiserror::Error;

/// Record identifier: the cluster a record lives in and its position there.
///
/// On the wire a RID is exactly ten bytes, the cluster id (2 bytes) followed
/// by the cluster position (8 bytes), both big-endian. There is no null RID at
/// this layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Encode, Decode)]
pub struct Rid {
    pub cluster_id: i16,
    pub cluster_position: i64,
}

/// Encoded size of a [`Rid`].
pub const RID_SIZE: usize = size_of::<i16>() + size_of::<i64>();

impl Rid {
    pub const fn new(cluster_id: i16, cluster_position: i64) -> Self {
        Self {
            cluster_id,
            cluster_position,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("invalid record id '{0}', expected #<cluster>:<position>")]
pub struct ParseRidError(String);

impl fmt::Display for Rid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}:{}", self.cluster_id, self.cluster_position)
    }
}

impl FromStr for Rid {
    type Err = ParseRidError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseRidError(s.to_string());
        let (cluster, position) = s
            .trim()
            .strip_prefix('#')
            .unwrap_or(s.trim())
            .split_once(':')
            .ok_or_else(err)?;

        Ok(Rid {
            cluster_id: cluster.parse().map_err(|_| err())?,
            cluster_position: position.parse().map_err(|_| err())?,
        })
    }
}
