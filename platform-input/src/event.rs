//! Toolkit-neutral input event types.
//!
//! The dispatcher is driven by [`InputEvent`], which a host application
//! constructs from whatever windowing toolkit it uses (winit, SDL, a
//! browser's DOM events, ...). This keeps `platform-input` free of any
//! dependency on a specific windowing crate.

/// A platform-independent key identity.
///
/// Covers the subset of keys the RFB keysym mapping needs. Unknown or
/// unmapped host keys should be passed through as `None` in [`InputEvent::Key`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum KeyCode {
    A, B, C, D, E, F, G, H, I, J, K, L, M,
    N, O, P, Q, R, S, T, U, V, W, X, Y, Z,
    Digit0, Digit1, Digit2, Digit3, Digit4,
    Digit5, Digit6, Digit7, Digit8, Digit9,
    Space, Return, Escape, Backspace, Tab,
    Delete, Insert, Home, End, PageUp, PageDown,
    Left, Up, Right, Down,
    F1, F2, F3, F4, F5, F6, F7, F8, F9, F10, F11, F12,
    LShift, RShift, LControl, RControl, LAlt, RAlt, LSuper, RSuper,
    Minus, Equals, Grave, LBracket, RBracket, Backslash,
    Semicolon, Apostrophe, Comma, Period, Slash,
    CapsLock, NumLock,
}

/// A mouse button identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MouseButton {
    /// Left (primary) button.
    Left,
    /// Middle button, usually the scroll wheel click.
    Middle,
    /// Right (secondary) button.
    Right,
}

/// Snapshot of which keyboard modifiers are currently held.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Modifiers {
    /// Shift key.
    pub shift: bool,
    /// Control key.
    pub control: bool,
    /// Alt/Option key.
    pub alt: bool,
    /// Super/Windows/Command key.
    pub logo: bool,
}

/// A scroll delta, in either discrete wheel lines or continuous pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScrollDelta {
    /// Discrete notches, as reported by a physical mouse wheel.
    Lines { x: f32, y: f32 },
    /// Continuous pixel delta, as reported by a trackpad.
    Pixels { x: f32, y: f32 },
}

/// A single input event from the host windowing toolkit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InputEvent {
    /// Pointer moved to an absolute window position.
    PointerMove {
        /// X coordinate in window pixels.
        x: i32,
        /// Y coordinate in window pixels.
        y: i32,
    },
    /// A mouse button changed state.
    PointerButton {
        /// Which button.
        button: MouseButton,
        /// `true` if pressed, `false` if released.
        down: bool,
    },
    /// A scroll/wheel event.
    WheelScroll(ScrollDelta),
    /// A key changed state. `key` is `None` if the host could not map the
    /// physical key to a [`KeyCode`]; such events are ignored.
    Key {
        /// The mapped key, if recognised.
        key: Option<KeyCode>,
        /// `true` if pressed, `false` if released.
        down: bool,
    },
    /// A printable Unicode character was typed (IME/composed input).
    TextInput(char),
    /// The set of held modifier keys changed.
    ModifiersChanged(Modifiers),
}
