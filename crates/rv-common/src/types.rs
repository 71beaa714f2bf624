//! Common types used across Retail Vault

use serde::{Deserialize, Serialize};

/// Whether a transaction line is a regular sale or a return/credit note
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ReturnStatus {
    #[default]
    Normal,
    Return,
}

impl ReturnStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReturnStatus::Normal => "Normal",
            ReturnStatus::Return => "Return",
        }
    }

    pub fn is_return(&self) -> bool {
        matches!(self, ReturnStatus::Return)
    }
}

impl std::fmt::Display for ReturnStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_return_status_serializes_as_label() {
        assert_eq!(serde_json::to_string(&ReturnStatus::Return).unwrap(), "\"Return\"");
        let parsed: ReturnStatus = serde_json::from_str("\"Normal\"").unwrap();
        assert_eq!(parsed, ReturnStatus::Normal);
        assert_eq!(ReturnStatus::Return.to_string(), "Return");
    }
}
