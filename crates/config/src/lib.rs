use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Addresses of the three calculator ports. The repository's two firmware
/// variants differ only in these values, so they live in board files.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct PortMap {
    pub status: u64,
    pub keycode: u64,
    pub display: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct BoardDescriptor {
    pub name: String,
    pub ports: PortMap,
    /// Busy-wait countdown per loop iteration; 2000 on the original board.
    #[serde(default = "default_debounce_spins")]
    pub debounce_spins: u32,
}

fn default_debounce_spins() -> u32 {
    2000
}

impl BoardDescriptor {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let f = std::fs::File::open(&path)
            .with_context(|| format!("Failed to open board file at {:?}", path.as_ref()))?;
        let board: Self = serde_yaml::from_reader(f).context("Failed to parse Board Descriptor")?;
        board.validate()?;
        Ok(board)
    }

    pub fn validate(&self) -> Result<()> {
        if self.ports.status <= self.ports.keycode {
            anyhow::bail!(
                "Status port {:#x} must sit above the key-code port {:#x} in the keypad block",
                self.ports.status,
                self.ports.keycode
            );
        }
        if self.ports.status - self.ports.keycode > 0x100 {
            anyhow::bail!(
                "Status port {:#x} is too far from the key-code port {:#x} to share a block",
                self.ports.status,
                self.ports.keycode
            );
        }
        let keypad_end = self.ports.status + 4;
        if self.ports.display >= self.ports.keycode && self.ports.display < keypad_end {
            anyhow::bail!(
                "Display port {:#x} overlaps the keypad block",
                self.ports.display
            );
        }
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct ScenarioLimits {
    pub max_iterations: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct PressEvent {
    pub at: u64,
    pub press: u32,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct ReleaseEvent {
    pub at: u64,
    pub release: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(untagged)]
pub enum KeyEvent {
    Press(PressEvent),
    Release(ReleaseEvent),
}

impl KeyEvent {
    pub fn at(&self) -> u64 {
        match self {
            KeyEvent::Press(e) => e.at,
            KeyEvent::Release(e) => e.at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct DisplayShowsAssertion {
    pub display_shows: u32,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct SumEqualsAssertion {
    pub sum_equals: u32,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct DigitEqualsAssertion {
    pub digit_equals: u32,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(untagged)]
pub enum ScenarioAssertion {
    DisplayShows(DisplayShowsAssertion),
    SumEquals(SumEqualsAssertion),
    DigitEquals(DigitEqualsAssertion),
}

/// A scripted run of the calculator loop: key events pinned to iteration
/// numbers, an iteration budget, and assertions on the end state.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct ScenarioScript {
    pub schema_version: String,
    /// Board file path, resolved relative to the script's directory.
    #[serde(default)]
    pub board: Option<String>,
    pub limits: ScenarioLimits,
    #[serde(default)]
    pub events: Vec<KeyEvent>,
    #[serde(default)]
    pub assertions: Vec<ScenarioAssertion>,
}

impl ScenarioScript {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let f = std::fs::File::open(&path)
            .with_context(|| format!("Failed to open scenario script at {:?}", path.as_ref()))?;
        let script: Self =
            serde_yaml::from_reader(f).context("Failed to parse Scenario Script YAML")?;
        script.validate()?;
        Ok(script)
    }

    pub fn validate(&self) -> Result<()> {
        if self.schema_version != "1.0" {
            anyhow::bail!(
                "Unsupported schema_version '{}'. Supported versions: '1.0'",
                self.schema_version
            );
        }

        if self.limits.max_iterations == 0 {
            anyhow::bail!("Limit 'max_iterations' must be greater than zero");
        }

        let mut prev = 0u64;
        for event in &self.events {
            let at = event.at();
            if at >= self.limits.max_iterations {
                anyhow::bail!(
                    "Event at iteration {} is outside the {} iteration budget",
                    at,
                    self.limits.max_iterations
                );
            }
            if at < prev {
                anyhow::bail!("Events must be ordered by iteration ({} after {})", at, prev);
            }
            prev = at;
        }

        Ok(())
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum KeyParseError {
    #[error("Unrecognized key '{0}' (expected a digit 0-9, 'A', or '+')")]
    Unrecognized(String),
}

/// Parse a comma-separated key list like "3,4,A" into raw key codes.
/// 'A' and '+' both mean the add key (code 10).
pub fn parse_key_list(s: &str) -> Result<Vec<u32>, KeyParseError> {
    s.split(',')
        .map(|tok| tok.trim())
        .filter(|tok| !tok.is_empty())
        .map(|tok| match tok {
            "A" | "a" | "+" => Ok(10),
            _ => tok
                .parse::<u32>()
                .ok()
                .filter(|v| *v <= 9)
                .ok_or_else(|| KeyParseError::Unrecognized(tok.to_string())),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn board_yaml() -> &'static str {
        r#"
name: minisys-1a
ports:
  status: 0xFFFFFC12
  keycode: 0xFFFFFC10
  display: 0xFFFF0010
debounce_spins: 2000
"#
    }

    #[test]
    fn test_valid_board() {
        let board: BoardDescriptor = serde_yaml::from_str(board_yaml()).unwrap();
        assert!(board.validate().is_ok());
        assert_eq!(board.ports.status, 0xFFFF_FC12);
        assert_eq!(board.ports.keycode, 0xFFFF_FC10);
        assert_eq!(board.debounce_spins, 2000);
    }

    #[test]
    fn test_board_default_debounce() {
        let yaml = r#"
name: bare
ports:
  status: 0x12
  keycode: 0x10
  display: 0x20
"#;
        let board: BoardDescriptor = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(board.debounce_spins, 2000);
    }

    #[test]
    fn test_board_status_below_keycode() {
        let yaml = r#"
name: broken
ports:
  status: 0x10
  keycode: 0x12
  display: 0x20
"#;
        let board: BoardDescriptor = serde_yaml::from_str(yaml).unwrap();
        let err = board.validate().unwrap_err();
        assert!(err.to_string().contains("must sit above"));
    }

    #[test]
    fn test_board_display_overlaps_keypad() {
        let yaml = r#"
name: broken
ports:
  status: 0x12
  keycode: 0x10
  display: 0x12
"#;
        let board: BoardDescriptor = serde_yaml::from_str(yaml).unwrap();
        let err = board.validate().unwrap_err();
        assert!(err.to_string().contains("overlaps"));
    }

    #[test]
    fn test_valid_script() {
        let yaml = r#"
schema_version: "1.0"
limits:
  max_iterations: 100
events:
  - { at: 0, press: 3 }
  - { at: 2, release: true }
  - { at: 4, press: 10 }
assertions:
  - display_shows: 3
  - sum_equals: 3
  - digit_equals: 0
"#;
        let script: ScenarioScript = serde_yaml::from_str(yaml).unwrap();
        assert!(script.validate().is_ok());
        assert_eq!(script.events.len(), 3);
        assert_eq!(script.assertions.len(), 3);
        assert!(matches!(
            script.events[0],
            KeyEvent::Press(PressEvent { at: 0, press: 3 })
        ));
    }

    #[test]
    fn test_invalid_version() {
        let yaml = r#"
schema_version: "2.0"
limits:
  max_iterations: 10
"#;
        let script: ScenarioScript = serde_yaml::from_str(yaml).unwrap();
        let err = script.validate().unwrap_err();
        assert!(err.to_string().contains("Unsupported schema_version"));
    }

    #[test]
    fn test_zero_iterations() {
        let yaml = r#"
schema_version: "1.0"
limits:
  max_iterations: 0
"#;
        let script: ScenarioScript = serde_yaml::from_str(yaml).unwrap();
        let err = script.validate().unwrap_err();
        assert!(err.to_string().contains("max_iterations"));
    }

    #[test]
    fn test_event_past_budget() {
        let yaml = r#"
schema_version: "1.0"
limits:
  max_iterations: 5
events:
  - { at: 5, press: 1 }
"#;
        let script: ScenarioScript = serde_yaml::from_str(yaml).unwrap();
        let err = script.validate().unwrap_err();
        assert!(err.to_string().contains("iteration budget"));
    }

    #[test]
    fn test_events_out_of_order() {
        let yaml = r#"
schema_version: "1.0"
limits:
  max_iterations: 10
events:
  - { at: 4, press: 1 }
  - { at: 2, release: true }
"#;
        let script: ScenarioScript = serde_yaml::from_str(yaml).unwrap();
        let err = script.validate().unwrap_err();
        assert!(err.to_string().contains("ordered"));
    }

    #[test]
    fn test_parse_key_list() {
        assert_eq!(parse_key_list("3,4,A").unwrap(), vec![3, 4, 10]);
        assert_eq!(parse_key_list(" 0, 9 , +").unwrap(), vec![0, 9, 10]);
        assert_eq!(
            parse_key_list("3,x").unwrap_err(),
            KeyParseError::Unrecognized("x".to_string())
        );
        assert_eq!(
            parse_key_list("12").unwrap_err(),
            KeyParseError::Unrecognized("12".to_string())
        );
    }
}
