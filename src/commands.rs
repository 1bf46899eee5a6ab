//! Key command table
//!
//! An ordered list of [`CommandBinding`]s, immutable once loaded. Lookup is
//! first-match-wins in declaration order.

use serde::{Deserialize, Serialize};

use crate::action::Action;
use crate::event::{Edge, KeyEvent};

/// Key edge a binding reacts to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KeyMatch {
    pub state: i64,
    pub edge: Edge,
    pub index: i64,
}

impl KeyMatch {
    pub fn down(state: i64, index: i64) -> Self {
        Self {
            state,
            edge: Edge::Down,
            index,
        }
    }

    pub fn up(state: i64, index: i64) -> Self {
        Self {
            state,
            edge: Edge::Up,
            index,
        }
    }

    /// True when the event carries exactly this (state, edge, index) tuple
    pub fn matches(&self, event: &KeyEvent) -> bool {
        event.state == self.state && event.edge() == Some((self.edge, self.index))
    }
}

/// One entry of the command table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandBinding {
    pub key: KeyMatch,
    pub description: String,
    /// `None` marks an observed edge that intentionally fires nothing
    pub action: Option<Action>,
}

/// Ordered, read-only command table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTable {
    bindings: Vec<CommandBinding>,
}

impl CommandTable {
    pub fn new(bindings: Vec<CommandBinding>) -> Self {
        Self { bindings }
    }

    /// Built-in transport bindings used when no table is configured
    ///
    /// Key slot `n` reports `ks = 1 << n`. Slots 0-3 map to previous,
    /// play/pause, next and mute on their down edge; the matching up edges
    /// (`ks = 0`) are listed so they are recognized, but fire nothing.
    pub fn defaults() -> Self {
        let transport = [
            (Action::PreviousTrack, "Previous track"),
            (Action::PlayPause, "Play/Pause"),
            (Action::NextTrack, "Next track"),
            (Action::ToggleMute, "Toggle mute"),
        ];

        let mut bindings = Vec::with_capacity(transport.len() * 2);
        for (slot, (action, description)) in transport.into_iter().enumerate() {
            let slot = slot as i64;
            bindings.push(CommandBinding {
                key: KeyMatch::down(1 << slot, slot),
                description: description.to_string(),
                action: Some(action),
            });
            bindings.push(CommandBinding {
                key: KeyMatch::up(0, slot),
                description: format!("{} (release)", description),
                action: None,
            });
        }

        Self { bindings }
    }

    /// First binding matching the event, if any
    pub fn resolve(&self, event: &KeyEvent) -> Option<&CommandBinding> {
        self.bindings.iter().find(|b| b.key.matches(event))
    }

    pub fn bindings(&self) -> &[CommandBinding] {
        &self.bindings
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

impl Default for CommandTable {
    fn default() -> Self {
        Self::defaults()
    }
}

/// Command table entry as written in the configuration file
///
/// Mirrors the device wire keys: `ks` plus exactly one of `kd` / `ku`, and
/// either a shell `command` or a built-in `action`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BindingConfig {
    pub ks: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kd: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ku: Option<i64>,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<Action>,
}

impl BindingConfig {
    /// Convert into a table entry, describing what is wrong on failure
    pub fn to_binding(&self) -> Result<CommandBinding, String> {
        if self.ks < 0 {
            return Err(format!("ks must be non-negative, got {}", self.ks));
        }

        let key = match (self.kd, self.ku) {
            (Some(index), None) => KeyMatch::down(self.ks, index),
            (None, Some(index)) => KeyMatch::up(self.ks, index),
            (Some(_), Some(_)) => return Err("specify only one of 'kd' or 'ku'".to_string()),
            (None, None) => return Err("one of 'kd' or 'ku' is required".to_string()),
        };
        if key.index < 0 {
            return Err(format!("key index must be non-negative, got {}", key.index));
        }

        if self.description.trim().is_empty() {
            return Err("description cannot be empty".to_string());
        }

        let action = match (&self.command, &self.action) {
            (Some(_), Some(_)) => {
                return Err("specify only one of 'command' or 'action'".to_string())
            }
            (Some(cmd), None) if cmd.trim().is_empty() => {
                return Err("command cannot be empty".to_string())
            }
            (Some(cmd), None) => Some(Action::Command(cmd.clone())),
            (None, Some(action)) => Some(action.clone()),
            (None, None) => None,
        };

        Ok(CommandBinding {
            key,
            description: self.description.clone(),
            action,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn binding(state: i64, index: i64, action: Action) -> CommandBinding {
        CommandBinding {
            key: KeyMatch::down(state, index),
            description: action.to_string(),
            action: Some(action),
        }
    }

    #[test]
    fn test_first_match_wins() {
        let table = CommandTable::new(vec![
            binding(2, 1, Action::Command("A".into())),
            binding(2, 1, Action::Command("B".into())),
        ]);

        let hit = table.resolve(&KeyEvent::down(2, 1)).unwrap();
        assert_eq!(hit.action, Some(Action::Command("A".into())));
    }

    #[test]
    fn test_match_requires_full_tuple() {
        let table = CommandTable::new(vec![binding(2, 1, Action::NextTrack)]);

        assert!(table.resolve(&KeyEvent::down(3, 1)).is_none());
        assert!(table.resolve(&KeyEvent::down(2, 0)).is_none());
        assert!(table.resolve(&KeyEvent::up(2, 1)).is_none());
        assert!(table.resolve(&KeyEvent::state_only(2)).is_none());
    }

    #[test]
    fn test_defaults() {
        let table = CommandTable::defaults();
        assert_eq!(table.len(), 8);

        let next = table.resolve(&KeyEvent::down(4, 2)).unwrap();
        assert_eq!(next.action, Some(Action::NextTrack));

        let mute = table.resolve(&KeyEvent::down(8, 3)).unwrap();
        assert_eq!(mute.action, Some(Action::ToggleMute));

        let release = table.resolve(&KeyEvent::up(0, 2)).unwrap();
        assert_eq!(release.action, None);
    }

    #[test]
    fn test_binding_config_validation() {
        let ok: BindingConfig = serde_yaml::from_str(
            "{ ks: 16, kd: 4, description: Launch, command: 'open -a Music' }",
        )
        .unwrap();
        let b = ok.to_binding().unwrap();
        assert_eq!(b.key, KeyMatch::down(16, 4));
        assert_eq!(b.action, Some(Action::Command("open -a Music".into())));

        let builtin: BindingConfig =
            serde_yaml::from_str("{ ks: 1, kd: 0, description: Prev, action: previous_track }")
                .unwrap();
        assert_eq!(
            builtin.to_binding().unwrap().action,
            Some(Action::PreviousTrack)
        );

        let both: BindingConfig =
            serde_yaml::from_str("{ ks: 1, kd: 0, ku: 0, description: x, command: y }").unwrap();
        assert!(both.to_binding().is_err());

        let neither: BindingConfig =
            serde_yaml::from_str("{ ks: 1, description: x, command: y }").unwrap();
        assert!(neither.to_binding().is_err());
    }
}
