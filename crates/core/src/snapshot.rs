use serde::{Deserialize, Serialize};

/// Serializable image of the calculator loop's scalar state.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct CalculatorSnapshot {
    pub last_key: u32,
    pub current_digit: u32,
    pub running_sum: u32,
}
