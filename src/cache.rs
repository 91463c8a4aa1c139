//! Element cache storage
//!
//! Plain storage for the application, window and toolbar-button handles.
//! Nothing here checks validity; the coordinator decides that by probing
//! the element tree at refresh time.

use serde::{Deserialize, Serialize};

/// How many windows the cache tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WindowMode {
    /// Track only the focused window.
    #[default]
    Single,
    /// Track every window seen, with the focused one as main.
    Multi,
}

#[derive(Debug, Clone)]
enum WindowSlot<H> {
    Single(Option<H>),
    Multi { windows: Vec<H>, main: Option<usize> },
}

impl<H> WindowSlot<H> {
    fn empty(mode: WindowMode) -> Self {
        match mode {
            WindowMode::Single => WindowSlot::Single(None),
            WindowMode::Multi => WindowSlot::Multi {
                windows: Vec::new(),
                main: None,
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct ElementCache<H> {
    mode: WindowMode,
    application: Option<H>,
    window: WindowSlot<H>,
    buttons: Vec<H>,
}

impl<H: Clone + PartialEq> ElementCache<H> {
    pub fn new(mode: WindowMode) -> Self {
        ElementCache {
            mode,
            application: None,
            window: WindowSlot::empty(mode),
            buttons: Vec::new(),
        }
    }

    pub fn mode(&self) -> WindowMode {
        self.mode
    }

    pub fn application(&self) -> Option<&H> {
        self.application.as_ref()
    }

    pub fn set_application(&mut self, application: H) {
        self.application = Some(application);
    }

    pub fn clear_application(&mut self) {
        self.application = None;
    }

    /// The main window: the only one in single mode, the selected one in
    /// multi mode.
    pub fn window(&self) -> Option<&H> {
        match &self.window {
            WindowSlot::Single(window) => window.as_ref(),
            WindowSlot::Multi { windows, main } => main.and_then(|i| windows.get(i)),
        }
    }

    /// Store `window` as the main window. In multi mode a handle already
    /// tracked is selected instead of being added twice.
    pub fn set_window(&mut self, window: H) {
        match &mut self.window {
            WindowSlot::Single(slot) => *slot = Some(window),
            WindowSlot::Multi { windows, main } => {
                let index = match windows.iter().position(|w| *w == window) {
                    Some(index) => index,
                    None => {
                        windows.push(window);
                        windows.len() - 1
                    }
                };
                *main = Some(index);
            }
        }
    }

    pub fn windows(&self) -> Vec<H> {
        match &self.window {
            WindowSlot::Single(window) => window.iter().cloned().collect(),
            WindowSlot::Multi { windows, .. } => windows.clone(),
        }
    }

    /// Drop tracked windows that fail `keep`, preserving the main selection
    /// when the main window survives.
    pub fn retain_windows(&mut self, mut keep: impl FnMut(&H) -> bool) {
        match &mut self.window {
            WindowSlot::Single(slot) => {
                if slot.as_ref().is_some_and(|w| !keep(w)) {
                    *slot = None;
                }
            }
            WindowSlot::Multi { windows, main } => {
                let current = main.and_then(|i| windows.get(i).cloned());
                windows.retain(|w| keep(w));
                *main = current.and_then(|c| windows.iter().position(|w| *w == c));
            }
        }
    }

    pub fn clear_window(&mut self) {
        self.window = WindowSlot::empty(self.mode);
    }

    pub fn buttons(&self) -> &[H] {
        &self.buttons
    }

    pub fn add_button(&mut self, button: H) {
        self.buttons.push(button);
    }

    pub fn button(&self, index: usize) -> Option<&H> {
        self.buttons.get(index)
    }

    pub fn contains_button(&self, button: &H) -> bool {
        self.buttons.iter().any(|b| b == button)
    }

    pub fn clear_buttons(&mut self) {
        self.buttons.clear();
    }

    pub fn clear_all(&mut self) {
        self.clear_application();
        self.clear_window();
        self.clear_buttons();
    }

    pub fn is_empty(&self) -> bool {
        self.application.is_none() && self.window().is_none() && self.buttons.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_cache_is_empty() {
        let cache: ElementCache<u32> = ElementCache::new(WindowMode::Single);
        assert!(cache.is_empty());
        assert!(cache.application().is_none());
        assert!(cache.window().is_none());
        assert!(cache.buttons().is_empty());
        assert!(cache.button(0).is_none());
    }

    #[test]
    fn buttons_keep_insertion_order() {
        let mut cache = ElementCache::new(WindowMode::Single);
        for b in [30, 10, 20] {
            cache.add_button(b);
        }
        assert_eq!(cache.buttons(), &[30, 10, 20]);
        assert_eq!(cache.button(1), Some(&10));
        assert!(cache.contains_button(&20));
        assert!(!cache.contains_button(&40));

        cache.clear_buttons();
        assert!(cache.buttons().is_empty());
    }

    #[test]
    fn single_mode_replaces_window() {
        let mut cache = ElementCache::new(WindowMode::Single);
        cache.set_window(1);
        cache.set_window(2);
        assert_eq!(cache.window(), Some(&2));
        assert_eq!(cache.windows(), vec![2]);
    }

    #[test]
    fn multi_mode_tracks_windows_and_main() {
        let mut cache = ElementCache::new(WindowMode::Multi);
        cache.set_window(1);
        cache.set_window(2);
        cache.set_window(1);
        assert_eq!(cache.windows(), vec![1, 2]);
        assert_eq!(cache.window(), Some(&1));

        cache.retain_windows(|w| *w != 1);
        assert_eq!(cache.windows(), vec![2]);
        assert!(cache.window().is_none());

        cache.set_window(3);
        cache.retain_windows(|w| *w != 2);
        assert_eq!(cache.window(), Some(&3));
    }

    #[test]
    fn clear_all_resets_every_slot() {
        let mut cache = ElementCache::new(WindowMode::Multi);
        cache.set_application(9);
        cache.set_window(1);
        cache.add_button(5);
        cache.clear_all();

        assert!(cache.is_empty());
        assert!(cache.windows().is_empty());
        assert_eq!(cache.mode(), WindowMode::Multi);
    }
}
