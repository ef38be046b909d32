//! platform-input: map toolkit-neutral input events to `rfb_client::ClientCommand`.
//!
//! This crate provides `InputDispatcher`, which translates [`InputEvent`]s
//! (constructed by the host application from whatever windowing toolkit it
//! uses) into VNC client commands suitable for sending to the server.

mod event;
mod keyboard;
mod mouse;
mod shortcuts;

use rfb_client::ClientCommand;

pub use event::{InputEvent, KeyCode, Modifiers, MouseButton, ScrollDelta};
pub use keyboard::{keysyms, map_key_event_to_keysym, KeyMapper, Modifier};
pub use mouse::{ButtonMask, MouseState, ThrottleConfig};
pub use shortcuts::{Shortcut, ShortcutAction, ShortcutsConfig};

/// Coordinate mapper for translating window coordinates to framebuffer coords.
/// Defaults to identity mapping (clamped to u16).
pub type CoordMapper = Box<dyn Fn(i32, i32) -> (u16, u16) + Send + Sync>;

/// Input dispatcher state and helpers.
pub struct InputDispatcher {
    mouse: MouseState,
    coord_mapper: CoordMapper,
    modifiers: Modifiers,
}

impl Default for InputDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl InputDispatcher {
    /// Create a new dispatcher with identity coordinate mapping.
    pub fn new() -> Self {
        Self {
            mouse: MouseState::default(),
            coord_mapper: Box::new(|x, y| (x.max(0) as u16, y.max(0) as u16)),
            modifiers: Modifiers::default(),
        }
    }

    /// Override coordinate mapper (e.g. to account for scroll-view offset).
    pub fn set_coord_mapper<F>(&mut self, f: F)
    where
        F: Fn(i32, i32) -> (u16, u16) + Send + Sync + 'static,
    {
        self.coord_mapper = Box::new(f);
    }

    /// Handle an [`InputEvent`] and return zero or more VNC client commands.
    ///
    /// This also keeps track of modifier state via `InputEvent::ModifiersChanged`,
    /// which can be queried via `active_modifiers()` and used with `ShortcutsConfig`.
    pub fn handle_input_event(&mut self, event: &InputEvent) -> Vec<ClientCommand> {
        let mut out = Vec::new();
        match *event {
            InputEvent::ModifiersChanged(mods) => {
                self.modifiers = mods;
            }
            InputEvent::PointerMove { x, y } => {
                self.mouse.set_pos(x, y);
                let (fx, fy) = (self.coord_mapper)(x, y);
                out.push(ClientCommand::Pointer {
                    x: fx,
                    y: fy,
                    buttons: self.mouse.buttons.bits(),
                });
            }
            InputEvent::PointerButton { button, down } => {
                let (x, y) = self.mouse.pos();
                if self.mouse.handle_button(button, down).is_some() {
                    let (fx, fy) = (self.coord_mapper)(x, y);
                    out.push(ClientCommand::Pointer {
                        x: fx,
                        y: fy,
                        buttons: self.mouse.buttons.bits(),
                    });
                }
            }
            InputEvent::WheelScroll(delta) => {
                let (x, y) = self.mouse.pos();
                let (fx, fy) = (self.coord_mapper)(x, y);
                let (dx, dy) = match delta {
                    ScrollDelta::Lines { x, y } => (x, y),
                    ScrollDelta::Pixels { x, y } => (x, y),
                };
                for masked in self.mouse.wheel_button_mask(dx, dy) {
                    out.push(ClientCommand::Pointer {
                        x: fx,
                        y: fy,
                        buttons: masked,
                    });
                }
            }
            InputEvent::Key { key, down } => {
                if let Some((keysym, down)) = keyboard::map_keyboard_input(key, down) {
                    out.push(ClientCommand::Key { key: keysym, down });
                }
            }
            InputEvent::TextInput(ch) => {
                // Send printable Unicode characters as key press+release using their UCS keysym.
                if !ch.is_control() {
                    let keysym = ch as u32;
                    out.push(ClientCommand::Key {
                        key: keysym,
                        down: true,
                    });
                    out.push(ClientCommand::Key {
                        key: keysym,
                        down: false,
                    });
                }
            }
        }
        out
    }

    /// Return the currently active modifiers as a list of platform-input `Modifier` values.
    ///
    /// This reflects the last `ModifiersChanged` event processed by this dispatcher.
    pub fn active_modifiers(&self) -> Vec<keyboard::Modifier> {
        let mut mods = Vec::new();
        if self.modifiers.shift {
            mods.push(keyboard::Modifier::Shift);
        }
        if self.modifiers.control {
            mods.push(keyboard::Modifier::Control);
        }
        if self.modifiers.alt {
            mods.push(keyboard::Modifier::Alt);
        }
        if self.modifiers.logo {
            mods.push(keyboard::Modifier::Super);
        }
        mods
    }

    /// Convenience helper: process a key event through `ShortcutsConfig`.
    ///
    /// This uses the dispatcher's tracked modifier state.
    pub fn process_shortcut(
        &self,
        shortcuts: &ShortcutsConfig,
        key: Option<KeyCode>,
        down: bool,
    ) -> Option<ShortcutAction> {
        shortcuts.process_key_input(key, down, &self.active_modifiers())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mouse_move_generates_pointer() {
        let mut d = InputDispatcher::new();
        let cmds = d.handle_input_event(&InputEvent::PointerMove { x: 100, y: 200 });
        assert_eq!(cmds.len(), 1);
        match &cmds[0] {
            ClientCommand::Pointer { x, y, buttons } => {
                assert_eq!((*x, *y, *buttons), (100, 200, 0));
            }
            _ => panic!("expected pointer"),
        }
    }

    #[test]
    fn test_left_button_mask() {
        let mut d = InputDispatcher::new();
        // Move first
        let _ = d.handle_input_event(&InputEvent::PointerMove { x: 10, y: 10 });
        // Press
        let cmds = d.handle_input_event(&InputEvent::PointerButton {
            button: MouseButton::Left,
            down: true,
        });
        assert!(!cmds.is_empty());
        // Release
        let cmds2 = d.handle_input_event(&InputEvent::PointerButton {
            button: MouseButton::Left,
            down: false,
        });
        assert!(!cmds2.is_empty());
    }

    #[test]
    fn test_key_mapping_basic() {
        let mapped = keyboard::map_keyboard_input(Some(KeyCode::Return), true).unwrap();
        assert_eq!(mapped, (0xFF0D, true));
    }

    #[test]
    fn test_modifiers_changed_updates_state() {
        let mut d = InputDispatcher::new();
        // No modifiers by default
        assert!(d.active_modifiers().is_empty());

        // Simulate shift+ctrl being pressed via ModifiersChanged
        let mods = Modifiers {
            shift: true,
            control: true,
            ..Default::default()
        };
        let _ = d.handle_input_event(&InputEvent::ModifiersChanged(mods));

        let active = d.active_modifiers();
        assert!(active.contains(&keyboard::Modifier::Shift));
        assert!(active.contains(&keyboard::Modifier::Control));
    }

    #[test]
    fn test_text_input_sends_press_and_release() {
        let mut d = InputDispatcher::new();
        let cmds = d.handle_input_event(&InputEvent::TextInput('a'));
        assert_eq!(cmds.len(), 2);
    }
}
