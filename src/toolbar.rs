//! Toolbar button discovery
//!
//! The toolbar sits at a fixed depth below the window:
//! `window -> group -> group -> buttons`. Its buttons share one footprint,
//! which is what separates them from decorative siblings of the same role.

use serde::{Deserialize, Serialize};

use crate::error::{HammerError, Result};
use crate::tree::{ElementTree, Size};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolbarPattern {
    pub group_role: String,
    pub button_role: String,
    pub button_width: f64,
    pub button_height: f64,
    /// Absolute tolerance on both dimensions, exclusive.
    pub tolerance: f64,
    pub press_action: String,
}

impl Default for ToolbarPattern {
    fn default() -> Self {
        ToolbarPattern {
            group_role: "AXGroup".to_string(),
            button_role: "AXButton".to_string(),
            button_width: 40.0,
            button_height: 40.0,
            tolerance: 0.01,
            press_action: "AXPress".to_string(),
        }
    }
}

impl ToolbarPattern {
    /// Walk down from `window` and return the toolbar buttons in tree order.
    pub fn locate<T: ElementTree>(&self, tree: &T, window: &T::Handle) -> Result<Vec<T::Handle>> {
        let outer = self.first_group(tree, window, 2)?;
        let inner = self.first_group(tree, &outer, 3)?;

        let candidates = tree
            .children(&inner)
            .filter(|c| !c.is_empty())
            .ok_or(HammerError::ToolbarStructureNotFound { level: 4 })?;

        let buttons: Vec<T::Handle> = candidates
            .into_iter()
            .filter(|c| self.is_toolbar_button(tree, c))
            .collect();

        if buttons.is_empty() {
            return Err(HammerError::NoMatchingButtons);
        }

        tracing::debug!("Located {} toolbar buttons", buttons.len());
        Ok(buttons)
    }

    pub fn matches_size(&self, size: Size) -> bool {
        (size.width - self.button_width).abs() < self.tolerance
            && (size.height - self.button_height).abs() < self.tolerance
    }

    fn is_toolbar_button<T: ElementTree>(&self, tree: &T, element: &T::Handle) -> bool {
        if tree.role(element).as_deref() != Some(self.button_role.as_str()) {
            return false;
        }

        match tree.size(element) {
            Some(size) => self.matches_size(size),
            None => {
                tracing::trace!("Skipping {:?}: size unavailable", element);
                false
            }
        }
    }

    fn first_group<T: ElementTree>(
        &self,
        tree: &T,
        parent: &T::Handle,
        level: u8,
    ) -> Result<T::Handle> {
        tree.children(parent)
            .into_iter()
            .flatten()
            .find(|child| tree.role(child).as_deref() == Some(self.group_role.as_str()))
            .ok_or(HammerError::ToolbarStructureNotFound { level })
    }
}
