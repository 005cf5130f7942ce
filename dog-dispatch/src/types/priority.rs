use serde::{Deserialize, Serialize};

/// Item priority levels. Declaration order is dequeue order: lower rank first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Dispatched before everything else
    High = 0,

    /// Default priority
    Normal = 1,

    /// Dispatched last
    Low = 2,
}

// Dequeue ordering: items.sort_by_key(|i| (i.priority, i.metadata.queued_at))
// - high < normal < low
// - within a tier, oldest first

impl Default for Priority {
    fn default() -> Self {
        Self::Normal
    }
}

impl Priority {
    /// All priority levels in dequeue order
    pub fn all() -> &'static [Priority] {
        &[Self::High, Self::Normal, Self::Low]
    }

    /// Numeric rank used for ordering (0 is dispatched first)
    pub fn rank(self) -> u8 {
        self as u8
    }

    /// Create from numeric rank
    pub fn from_rank(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::High),
            1 => Some(Self::Normal),
            2 => Some(Self::Low),
            _ => None,
        }
    }

    /// Get human-readable name
    pub fn name(self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Normal => "normal",
            Self::Low => "low",
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "high" => Ok(Self::High),
            "normal" => Ok(Self::Normal),
            "low" => Ok(Self::Low),
            _ => Err(format!("Invalid priority: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn high_sorts_before_low() {
        let mut levels = vec![Priority::Low, Priority::High, Priority::Normal];
        levels.sort();
        assert_eq!(levels, Priority::all());
    }

    #[test]
    fn parses_case_insensitively() {
        assert_eq!("HIGH".parse::<Priority>(), Ok(Priority::High));
        assert!("urgent".parse::<Priority>().is_err());
    }

    #[test]
    fn rank_round_trips() {
        for p in Priority::all() {
            assert_eq!(Priority::from_rank(p.rank()), Some(*p));
        }
        assert_eq!(Priority::from_rank(7), None);
    }
}
