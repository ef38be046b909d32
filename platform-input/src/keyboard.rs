use crate::event::KeyCode;
use tracing::trace;

/// X11 keysym values
pub mod keysyms {
    // X11 keysym constants
    pub const XK_BackSpace: u32 = 0xff08;
    pub const XK_Tab: u32 = 0xff09;
    pub const XK_Return: u32 = 0xff0d;
    pub const XK_Escape: u32 = 0xff1b;
    pub const XK_Insert: u32 = 0xff63;
    pub const XK_Delete: u32 = 0xffff;
    pub const XK_Home: u32 = 0xff50;
    pub const XK_End: u32 = 0xff57;
    pub const XK_Page_Up: u32 = 0xff55;
    pub const XK_Page_Down: u32 = 0xff56;
    pub const XK_Left: u32 = 0xff51;
    pub const XK_Up: u32 = 0xff52;
    pub const XK_Right: u32 = 0xff53;
    pub const XK_Down: u32 = 0xff54;
    pub const XK_F1: u32 = 0xffbe;
    pub const XK_F2: u32 = 0xffbf;
    pub const XK_F3: u32 = 0xffc0;
    pub const XK_F4: u32 = 0xffc1;
    pub const XK_F5: u32 = 0xffc2;
    pub const XK_F6: u32 = 0xffc3;
    pub const XK_F7: u32 = 0xffc4;
    pub const XK_F8: u32 = 0xffc5;
    pub const XK_F9: u32 = 0xffc6;
    pub const XK_F10: u32 = 0xffc7;
    pub const XK_F11: u32 = 0xffc8;
    pub const XK_F12: u32 = 0xffc9;
    pub const XK_Shift_L: u32 = 0xffe1;
    pub const XK_Shift_R: u32 = 0xffe2;
    pub const XK_Control_L: u32 = 0xffe3;
    pub const XK_Control_R: u32 = 0xffe4;
    pub const XK_Alt_L: u32 = 0xffe9;
    pub const XK_Alt_R: u32 = 0xffea;
    pub const XK_Super_L: u32 = 0xffeb; // Left Windows/Command key
    pub const XK_Super_R: u32 = 0xffec; // Right Windows/Command key
    pub const XK_Menu: u32 = 0xff67;
    pub const XK_Num_Lock: u32 = 0xff7f;
    pub const XK_Caps_Lock: u32 = 0xffe5;
    pub const XK_Scroll_Lock: u32 = 0xff14;
    pub const XK_Print: u32 = 0xff61;
}
use keysyms::*;

/// Map a key event to (X11 keysym, down?) suitable for RFB KeyEvent.
pub fn map_keyboard_input(key: Option<KeyCode>, down: bool) -> Option<(u32, bool)> {
    Some((map_key_event_to_keysym(key?), down))
}

/// Map a [`KeyCode`] to its X11 keysym.
pub fn map_key_event_to_keysym(key: KeyCode) -> u32 {
    use KeyCode as K;
    match key {
        // ASCII letters and digits
        K::A => 'a' as u32,
        K::B => 'b' as u32,
        K::C => 'c' as u32,
        K::D => 'd' as u32,
        K::E => 'e' as u32,
        K::F => 'f' as u32,
        K::G => 'g' as u32,
        K::H => 'h' as u32,
        K::I => 'i' as u32,
        K::J => 'j' as u32,
        K::K => 'k' as u32,
        K::L => 'l' as u32,
        K::M => 'm' as u32,
        K::N => 'n' as u32,
        K::O => 'o' as u32,
        K::P => 'p' as u32,
        K::Q => 'q' as u32,
        K::R => 'r' as u32,
        K::S => 's' as u32,
        K::T => 't' as u32,
        K::U => 'u' as u32,
        K::V => 'v' as u32,
        K::W => 'w' as u32,
        K::X => 'x' as u32,
        K::Y => 'y' as u32,
        K::Z => 'z' as u32,

        K::Digit0 => '0' as u32,
        K::Digit1 => '1' as u32,
        K::Digit2 => '2' as u32,
        K::Digit3 => '3' as u32,
        K::Digit4 => '4' as u32,
        K::Digit5 => '5' as u32,
        K::Digit6 => '6' as u32,
        K::Digit7 => '7' as u32,
        K::Digit8 => '8' as u32,
        K::Digit9 => '9' as u32,

        // Whitespace and controls
        K::Space => 0x0020,
        K::Return => XK_Return,
        K::Escape => XK_Escape,
        K::Backspace => XK_BackSpace,
        K::Tab => XK_Tab,
        K::Delete => XK_Delete,
        K::Insert => XK_Insert,
        K::Home => XK_Home,
        K::End => XK_End,
        K::PageUp => XK_Page_Up,
        K::PageDown => XK_Page_Down,

        // Arrows
        K::Left => XK_Left,
        K::Up => XK_Up,
        K::Right => XK_Right,
        K::Down => XK_Down,

        // Function keys
        K::F1 => XK_F1,
        K::F2 => XK_F2,
        K::F3 => XK_F3,
        K::F4 => XK_F4,
        K::F5 => XK_F5,
        K::F6 => XK_F6,
        K::F7 => XK_F7,
        K::F8 => XK_F8,
        K::F9 => XK_F9,
        K::F10 => XK_F10,
        K::F11 => XK_F11,
        K::F12 => XK_F12,

        // Modifiers
        K::LShift => XK_Shift_L,
        K::RShift => XK_Shift_R,
        K::LControl => XK_Control_L,
        K::RControl => XK_Control_R,
        K::LAlt => XK_Alt_L,
        K::RAlt => XK_Alt_R,
        K::LSuper => XK_Super_L,
        K::RSuper => XK_Super_R,
        K::CapsLock => XK_Caps_Lock,
        K::NumLock => XK_Num_Lock,

        // Punctuation (common subset)
        K::Minus => '-' as u32,
        K::Equals => '=' as u32,
        K::Grave => '`' as u32,
        K::LBracket => '[' as u32,
        K::RBracket => ']' as u32,
        K::Backslash => '\\' as u32,
        K::Semicolon => ';' as u32,
        K::Apostrophe => '\'' as u32,
        K::Comma => ',' as u32,
        K::Period => '.' as u32,
        K::Slash => '/' as u32,
    }
}

/// Stores state of key modifiers and handles key repeat rate limiting.
#[derive(Debug)]
pub struct KeyMapper {
    // Track modifiers state
    shift: bool,
    control: bool,
    alt: bool,
    super_key: bool, // Windows/Command
    caps_lock: bool,
    num_lock: bool,

    // Track last seen key states to handle auto-repeat
    last_key: Option<u32>,
    throttle_repeats: bool,
    repeat_delay_ms: u64,
    last_press_time: std::time::Instant,
}

impl KeyMapper {
    /// Create a new key mapper with default settings.
    pub fn new() -> Self {
        Self {
            shift: false,
            control: false,
            alt: false,
            super_key: false,
            caps_lock: false,
            num_lock: false,
            last_key: None,
            throttle_repeats: true,
            repeat_delay_ms: 50, // 50ms = 20 keys/sec maximum rate
            last_press_time: std::time::Instant::now(),
        }
    }

    /// Enable or disable key repeat throttling.
    pub fn set_throttle_repeats(&mut self, enable: bool) {
        self.throttle_repeats = enable;
    }

    /// Set repeat rate limit in milliseconds.
    pub fn set_repeat_delay(&mut self, delay_ms: u64) {
        self.repeat_delay_ms = delay_ms;
    }

    /// Process a key event, returning a keysym and down state.
    /// May return None if the key should be ignored (e.g., throttled repeat).
    pub fn process_key(&mut self, key: Option<KeyCode>, down: bool) -> Option<(u32, bool)> {
        let key = key?;

        // Map key to keysym
        let keysym = map_key_event_to_keysym(key);

        // Update modifier state
        match (key, down) {
            (KeyCode::LShift | KeyCode::RShift, true) => self.shift = true,
            (KeyCode::LShift | KeyCode::RShift, false) => self.shift = false,
            (KeyCode::LControl | KeyCode::RControl, true) => self.control = true,
            (KeyCode::LControl | KeyCode::RControl, false) => self.control = false,
            (KeyCode::LAlt | KeyCode::RAlt, true) => self.alt = true,
            (KeyCode::LAlt | KeyCode::RAlt, false) => self.alt = false,
            (KeyCode::LSuper | KeyCode::RSuper, true) => self.super_key = true,
            (KeyCode::LSuper | KeyCode::RSuper, false) => self.super_key = false,
            (KeyCode::CapsLock, true) => self.caps_lock = !self.caps_lock,
            (KeyCode::NumLock, true) => self.num_lock = !self.num_lock,
            _ => {}
        }

        // Handle throttling for key repeats
        let now = std::time::Instant::now();
        if self.throttle_repeats && down {
            // Check if it's the same key pressed again (auto-repeat)
            if self.last_key == Some(keysym) {
                let elapsed = now.duration_since(self.last_press_time);
                if elapsed.as_millis() < self.repeat_delay_ms as u128 {
                    // Too soon, throttle this repeat
                    trace!("Throttling repeated key: {}", keysym);
                    return None;
                }
            }
            self.last_key = Some(keysym);
            self.last_press_time = now;
        } else if !down {
            // Key release - clear last key if it matches
            if self.last_key == Some(keysym) {
                self.last_key = None;
            }
        }

        // Return mapped keysym and down state
        Some((keysym, down))
    }

    /// Get current modifier state as a bitmask (for use in protocol messages).
    pub fn modifier_mask(&self) -> u8 {
        let mut mask = 0;
        if self.shift {
            mask |= 1
        }
        if self.control {
            mask |= 4
        }
        if self.alt {
            mask |= 8
        }
        if self.super_key {
            mask |= 64
        }
        mask
    }

    /// Returns true if given modifier is active.
    pub fn is_modifier_active(&self, modifier: Modifier) -> bool {
        match modifier {
            Modifier::Shift => self.shift,
            Modifier::Control => self.control,
            Modifier::Alt => self.alt,
            Modifier::Super => self.super_key,
            Modifier::CapsLock => self.caps_lock,
            Modifier::NumLock => self.num_lock,
        }
    }
}

impl Default for KeyMapper {
    fn default() -> Self {
        Self::new()
    }
}

/// Keyboard modifiers for shortcuts and key combinations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Modifier {
    Shift,
    Control,
    Alt,
    Super, // Windows/Command key
    CapsLock,
    NumLock,
}
