/// HID report maps and report builders for the two supported profiles.
///
/// Remote profile report map and button bit table are ported verbatim (as
/// numeric constants, not transliterated Python) from the upstream remote
/// descriptor. The keyboard profile's report map is the standard fixed USB
/// HID boot-keyboard descriptor plus a 16-usage consumer control report.

use std::collections::HashMap;

pub const REMOTE_REPORT_ID: u8 = 1;
pub const KEYBOARD_REPORT_ID: u8 = 1;
pub const CONSUMER_REPORT_ID: u8 = 2;

/// Bit assignments for the single 16-bit Remote profile input report.
pub fn remote_buttons() -> HashMap<&'static str, u16> {
    [
        ("DPAD_UP", 0x0001),
        ("DPAD_DOWN", 0x0002),
        ("DPAD_LEFT", 0x0004),
        ("DPAD_RIGHT", 0x0008),
        ("SELECT", 0x0010),
        ("BACK", 0x0020),
        ("HOME", 0x0040),
        ("MENU", 0x0080),
        ("PLAY_PAUSE", 0x0100),
        ("STOP", 0x0200),
        ("REWIND", 0x0400),
        ("FAST_FORWARD", 0x0800),
        ("VOLUME_UP", 0x1000),
        ("VOLUME_DOWN", 0x2000),
        ("MUTE", 0x4000),
        ("POWER", 0x8000),
    ]
    .into_iter()
    .collect()
}

/// Consumer Control collection, Report ID 1, 16 single-bit buttons
/// (D-pad/select/system nav/media/volume/power), matching the fixed bit
/// layout above.
pub const REMOTE_REPORT_MAP: &[u8] = &[
    0x05, 0x0C, // Usage Page (Consumer)
    0x09, 0x01, // Usage (Consumer Control)
    0xA1, 0x01, // Collection (Application)
    0x85, REMOTE_REPORT_ID, //   Report ID (1)
    0x05, 0x01, //   Usage Page (Generic Desktop)
    0x09, 0x90, //   Usage (D-pad Up)
    0x09, 0x91, //   Usage (D-pad Down)
    0x09, 0x92, //   Usage (D-pad Right)
    0x09, 0x93, //   Usage (D-pad Left)
    0x05, 0x0C, //   Usage Page (Consumer)
    0x09, 0x41, //   Usage (Menu Pick / Select)
    0x0A, 0x24, 0x02, //   Usage (AC Back)
    0x0A, 0x23, 0x02, //   Usage (AC Home)
    0x09, 0x40, //   Usage (Menu)
    0x09, 0xCD, //   Usage (Play/Pause)
    0x09, 0xB7, //   Usage (Stop)
    0x09, 0xB4, //   Usage (Rewind)
    0x09, 0xB3, //   Usage (Fast Forward)
    0x09, 0xE9, //   Usage (Volume Up)
    0x09, 0xEA, //   Usage (Volume Down)
    0x09, 0xE2, //   Usage (Mute)
    0x09, 0x30, //   Usage (Power)
    0x15, 0x00, //   Logical Minimum (0)
    0x25, 0x01, //   Logical Maximum (1)
    0x75, 0x01, //   Report Size (1)
    0x95, 0x10, //   Report Count (16)
    0x81, 0x02, //   Input (Data,Var,Abs)
    0xC0, // End Collection
];

/// Standard 8-byte boot-keyboard report (ID 1: modifier, reserved, 6 key
/// codes) plus a 2-byte, 16-usage consumer control report (ID 2).
pub const KEYBOARD_REPORT_MAP: &[u8] = &[
    0x05, 0x01, // Usage Page (Generic Desktop)
    0x09, 0x06, // Usage (Keyboard)
    0xA1, 0x01, // Collection (Application)
    0x85, KEYBOARD_REPORT_ID, //   Report ID (1)
    0x05, 0x07, //   Usage Page (Key Codes)
    0x19, 0xE0, //   Usage Minimum (224)
    0x29, 0xE7, //   Usage Maximum (231)
    0x15, 0x00, //   Logical Minimum (0)
    0x25, 0x01, //   Logical Maximum (1)
    0x75, 0x01, //   Report Size (1)
    0x95, 0x08, //   Report Count (8)
    0x81, 0x02, //   Input (Data,Var,Abs) — modifier byte
    0x95, 0x01, //   Report Count (1)
    0x75, 0x08, //   Report Size (8)
    0x81, 0x01, //   Input (Const) — reserved byte
    0x95, 0x06, //   Report Count (6)
    0x75, 0x08, //   Report Size (8)
    0x15, 0x00, //   Logical Minimum (0)
    0x25, 0x65, //   Logical Maximum (101)
    0x05, 0x07, //   Usage Page (Key Codes)
    0x19, 0x00, //   Usage Minimum (0)
    0x29, 0x65, //   Usage Maximum (101)
    0x81, 0x00, //   Input (Data,Array) — 6 key codes
    0xC0, // End Collection
    0x05, 0x0C, // Usage Page (Consumer)
    0x09, 0x01, // Usage (Consumer Control)
    0xA1, 0x01, // Collection (Application)
    0x85, CONSUMER_REPORT_ID, //   Report ID (2)
    0x19, 0x00, //   Usage Minimum (0)
    0x2A, 0x9C, 0x02, //   Usage Maximum (668)
    0x15, 0x00, //   Logical Minimum (0)
    0x26, 0x9C, 0x02, //   Logical Maximum (668)
    0x75, 0x10, //   Report Size (16)
    0x95, 0x01, //   Report Count (1)
    0x81, 0x00, //   Input (Data,Array)
    0xC0, // End Collection
];

/// Builds a remote-profile 16-bit report with `bit` set (or cleared).
pub fn remote_report(state: u16) -> [u8; 2] {
    state.to_le_bytes()
}

/// Builds a keyboard input report (ID 1 payload, 8 bytes): modifier +
/// reserved + up to 6 simultaneous key codes.
pub fn keyboard_report(modifier: u8, keys: &[u8]) -> [u8; 8] {
    let mut report = [0u8; 8];
    report[0] = modifier;
    for (i, &k) in keys.iter().take(6).enumerate() {
        report[2 + i] = k;
    }
    report
}

/// Builds a consumer-key input report (ID 2 payload, 2 bytes little-endian).
pub fn consumer_report(usage: u16) -> [u8; 2] {
    usage.to_le_bytes()
}

/// Keyboard key name (e.g. `"KEY_A"`, `"KEY_ENTER"`) to USB HID Keyboard/
/// Keypad Page usage code. Names and codes ported from `KeymapHelper.py`'s
/// `KEY_TABLE`.
pub fn keyboard_key_code(name: &str) -> Option<u8> {
    keyboard_key_table().get(name).copied()
}

/// Consumer/media key name (e.g. `"KEY_PLAY_PAUSE"`) to USB HID Consumer
/// Page usage code, matching this profile's `CONSUMER_REPORT_MAP` (a direct
/// usage selector, not the upstream's one-hot bitmask encoding). Codes
/// ported from `KeymapHelper.py`'s `MEDIA_KEYS` comments, which already
/// record the real HID Consumer Page usage for each name.
pub fn media_key_code(name: &str) -> Option<u16> {
    media_key_table().get(name).copied()
}

fn keyboard_key_table() -> HashMap<&'static str, u8> {
    [
        ("KEY_RESERVED", 0),
        ("KEY_ESC", 41),
        ("KEY_1", 30),
        ("KEY_2", 31),
        ("KEY_3", 32),
        ("KEY_4", 33),
        ("KEY_5", 34),
        ("KEY_6", 35),
        ("KEY_7", 36),
        ("KEY_8", 37),
        ("KEY_9", 38),
        ("KEY_0", 39),
        ("KEY_MINUS", 45),
        ("KEY_EQUAL", 46),
        ("KEY_BACKSPACE", 42),
        ("KEY_TAB", 43),
        ("KEY_Q", 20),
        ("KEY_W", 26),
        ("KEY_E", 8),
        ("KEY_R", 21),
        ("KEY_T", 23),
        ("KEY_Y", 28),
        ("KEY_U", 24),
        ("KEY_I", 12),
        ("KEY_O", 18),
        ("KEY_P", 19),
        ("KEY_LEFTBRACE", 47),
        ("KEY_RIGHTBRACE", 48),
        ("KEY_ENTER", 40),
        ("KEY_LEFTCTRL", 224),
        ("KEY_A", 4),
        ("KEY_S", 22),
        ("KEY_D", 7),
        ("KEY_F", 9),
        ("KEY_G", 10),
        ("KEY_H", 11),
        ("KEY_J", 13),
        ("KEY_K", 14),
        ("KEY_L", 15),
        ("KEY_SEMICOLON", 51),
        ("KEY_APOSTROPHE", 52),
        ("KEY_GRAVE", 53),
        ("KEY_LEFTSHIFT", 225),
        ("KEY_BACKSLASH", 50),
        ("KEY_Z", 29),
        ("KEY_X", 27),
        ("KEY_C", 6),
        ("KEY_V", 25),
        ("KEY_B", 5),
        ("KEY_N", 17),
        ("KEY_M", 16),
        ("KEY_COMMA", 54),
        ("KEY_DOT", 55),
        ("KEY_SLASH", 56),
        ("KEY_RIGHTSHIFT", 229),
        ("KEY_LEFTALT", 226),
        ("KEY_SPACE", 44),
        ("KEY_CAPSLOCK", 57),
        ("KEY_F1", 58),
        ("KEY_F2", 59),
        ("KEY_F3", 60),
        ("KEY_F4", 61),
        ("KEY_F5", 62),
        ("KEY_F6", 63),
        ("KEY_F7", 64),
        ("KEY_F8", 65),
        ("KEY_F9", 66),
        ("KEY_F10", 67),
        ("KEY_F11", 68),
        ("KEY_F12", 69),
        ("KEY_NUMLOCK", 83),
        ("KEY_SCROLLLOCK", 71),
        ("KEY_RIGHTCTRL", 228),
        ("KEY_RIGHTALT", 230),
        ("KEY_HOME", 74),
        ("KEY_UP", 82),
        ("KEY_PAGEUP", 75),
        ("KEY_LEFT", 80),
        ("KEY_RIGHT", 79),
        ("KEY_END", 77),
        ("KEY_DOWN", 81),
        ("KEY_PAGEDOWN", 78),
        ("KEY_INSERT", 73),
        ("KEY_DELETE", 76),
        ("KEY_MUTE", 239),
        ("KEY_VOLUMEDOWN", 238),
        ("KEY_VOLUMEUP", 237),
        ("KEY_POWER", 102),
        ("KEY_PAUSE", 72),
        ("KEY_LEFTMETA", 227),
        ("KEY_RIGHTMETA", 231),
        ("KEY_COMPOSE", 101),
        ("KEY_STOP", 243),
        ("KEY_WWW", 240),
        ("KEY_BACK", 241),
        ("KEY_FORWARD", 242),
        ("KEY_EJECTCD", 236),
        ("KEY_NEXTSONG", 235),
        ("KEY_PLAYPAUSE", 232),
        ("KEY_PREVIOUSSONG", 234),
        ("KEY_STOPCD", 233),
        ("KEY_REFRESH", 250),
    ]
    .into_iter()
    .collect()
}

fn media_key_table() -> HashMap<&'static str, u16> {
    [
        ("KEY_PLAY", 0xB0),
        ("KEY_PAUSE", 0xB1),
        ("KEY_PLAY_PAUSE", 0xCD),
        ("KEY_FAST_FORWARD", 0xB3),
        ("KEY_REWIND", 0xB4),
        ("KEY_NEXT_TRACK", 0xB5),
        ("KEY_PREVIOUS_TRACK", 0xB6),
        ("KEY_STOP", 0xB7),
        ("KEY_MENU", 0x40),
        ("KEY_VOLUME_UP", 0xE9),
        ("KEY_VOLUME_DOWN", 0xEA),
        ("KEY_MUTE", 0xE2),
        ("KEY_POWER", 0x30),
        ("KEY_MENU_PICK", 0x32),
        ("KEY_AC_SEARCH", 0x221),
        ("KEY_AC_HOME", 0x223),
    ]
    .into_iter()
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_button_bits_match_spec_table() {
        let buttons = remote_buttons();
        assert_eq!(buttons["DPAD_UP"], 0x0001);
        assert_eq!(buttons["POWER"], 0x8000);
        assert_eq!(buttons["VOLUME_DOWN"], 0x2000);
        assert_eq!(buttons.len(), 16);
    }

    #[test]
    fn remote_report_round_trips_bits() {
        let buttons = remote_buttons();
        let state = buttons["HOME"] | buttons["SELECT"];
        let bytes = remote_report(state);
        let decoded = u16::from_le_bytes(bytes);
        assert_eq!(decoded, state);
    }

    #[test]
    fn keyboard_key_name_resolves_to_usage_code() {
        assert_eq!(keyboard_key_code("KEY_A"), Some(4));
        assert_eq!(keyboard_key_code("KEY_ENTER"), Some(40));
        assert_eq!(keyboard_key_code("KEY_NOT_A_REAL_KEY"), None);
    }

    #[test]
    fn media_key_name_resolves_to_usage_code() {
        assert_eq!(media_key_code("KEY_PLAY_PAUSE"), Some(0xCD));
        assert_eq!(media_key_code("KEY_VOLUME_UP"), Some(0xE9));
        assert_eq!(media_key_code("KEY_NOT_A_REAL_KEY"), None);
    }

    #[test]
    fn keyboard_report_places_keys_after_reserved_byte() {
        let report = keyboard_report(0x02, &[0x04, 0x05]);
        assert_eq!(report[0], 0x02); // modifier
        assert_eq!(report[1], 0x00); // reserved
        assert_eq!(report[2], 0x04);
        assert_eq!(report[3], 0x05);
        assert_eq!(report[4], 0x00);
    }
}
