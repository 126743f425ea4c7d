use chrono::{DateTime, Local};
use std::collections::BTreeMap;

use crate::mqtt::topic_codec::{ControlType, ControlValue};

/// Current value of one control instance
#[derive(Debug, Clone, PartialEq)]
pub struct ControlState {
    pub value: ControlValue,
    pub updated_at: DateTime<Local>,
}

/// Control values keyed by `(control type, index)`
///
/// Lives on the application thread only.
#[derive(Debug, Clone, Default)]
pub struct ControlStore {
    controls: BTreeMap<(ControlType, u32), ControlState>,
}

impl ControlStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `value` for `index`; the key's control type comes from the value
    pub fn apply(&mut self, index: u32, value: ControlValue, at: DateTime<Local>) {
        self.controls.insert(
            (value.control_type(), index),
            ControlState {
                value,
                updated_at: at,
            },
        );
    }

    pub fn get(&self, control: ControlType, index: u32) -> Option<&ControlState> {
        self.controls.get(&(control, index))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&(ControlType, u32), &ControlState)> {
        self.controls.iter()
    }

    pub fn len(&self) -> usize {
        self.controls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.controls.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_latest_value_per_control_and_index() {
        let mut store = ControlStore::new();
        let now = Local::now();
        store.apply(2, ControlValue::Dimmer(10), now);
        store.apply(2, ControlValue::Dimmer(20), now);
        store.apply(1, ControlValue::Dimmer(5), now);
        store.apply(2, ControlValue::Switch(true), now);

        assert_eq!(store.len(), 3);
        assert_eq!(
            store.get(ControlType::Dimmer, 2).map(|state| &state.value),
            Some(&ControlValue::Dimmer(20))
        );
        assert_eq!(
            store.get(ControlType::Switch, 2).map(|state| &state.value),
            Some(&ControlValue::Switch(true))
        );
        assert!(store.get(ControlType::Text, 2).is_none());
    }
}
