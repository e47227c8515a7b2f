use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// A block number or one of the `latest`, `earliest` or `pending` sentinels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum BlockNumberOrTag {
    /// The most recent block of the canonical chain.
    #[default]
    Latest,
    /// The genesis block.
    Earliest,
    /// The block currently being built.
    Pending,
    /// A block of the given height.
    Number(u64),
}

impl BlockNumberOrTag {
    /// Returns the block number when this is not a sentinel.
    pub const fn as_number(&self) -> Option<u64> {
        match *self {
            Self::Number(num) => Some(num),
            _ => None,
        }
    }

    /// Returns `true` for the `pending` sentinel.
    pub const fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }
}

impl From<u64> for BlockNumberOrTag {
    fn from(num: u64) -> Self {
        Self::Number(num)
    }
}

impl fmt::Display for BlockNumberOrTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Latest => f.write_str("latest"),
            Self::Earliest => f.write_str("earliest"),
            Self::Pending => f.write_str("pending"),
            Self::Number(num) => write!(f, "0x{num:x}"),
        }
    }
}

impl FromStr for BlockNumberOrTag {
    type Err = ParseBlockNumberError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let block = match s {
            "latest" => Self::Latest,
            "earliest" => Self::Earliest,
            "pending" => Self::Pending,
            _ => {
                let number = match s.strip_prefix("0x") {
                    Some(hex) => u64::from_str_radix(hex, 16),
                    None => s.parse(),
                }
                .map_err(|_| ParseBlockNumberError(s.to_string()))?;
                Self::Number(number)
            }
        };
        Ok(block)
    }
}

impl Serialize for BlockNumberOrTag {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for BlockNumberOrTag {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

/// Failed to parse a block number or tag.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid block number or tag: {0}")]
pub struct ParseBlockNumberError(pub String);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tags_and_numbers() {
        assert_eq!("latest".parse::<BlockNumberOrTag>().unwrap(), BlockNumberOrTag::Latest);
        assert_eq!("pending".parse::<BlockNumberOrTag>().unwrap(), BlockNumberOrTag::Pending);
        assert_eq!("earliest".parse::<BlockNumberOrTag>().unwrap(), BlockNumberOrTag::Earliest);
        assert_eq!("0xaf".parse::<BlockNumberOrTag>().unwrap(), BlockNumberOrTag::Number(175));
        assert_eq!("42".parse::<BlockNumberOrTag>().unwrap(), BlockNumberOrTag::Number(42));
        assert!("0xzz".parse::<BlockNumberOrTag>().is_err());
    }

    #[test]
    fn serde_roundtrip() {
        for id in
            [BlockNumberOrTag::Latest, BlockNumberOrTag::Pending, BlockNumberOrTag::Number(175)]
        {
            let json = serde_json::to_string(&id).unwrap();
            let back: BlockNumberOrTag = serde_json::from_str(&json).unwrap();
            assert_eq!(id, back);
        }
        assert_eq!(
            serde_json::from_str::<BlockNumberOrTag>("\"0xaf\"").unwrap(),
            BlockNumberOrTag::Number(175)
        );
    }
}
