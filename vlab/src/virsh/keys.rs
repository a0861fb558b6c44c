// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Translation of console key strings into `virsh send-key` keycodes.

use crate::error::ManagerError;
use std::time::Duration;

pub const WAIT: Duration = Duration::from_secs(1);

const SHIFT: &str = "KEY_LEFTSHIFT";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyAction {
    /// Keycodes pressed together in one `send-key` call.
    Press(Vec<&'static str>),
    Wait(Duration),
}

const LETTERS: [&str; 26] = [
    "KEY_A", "KEY_B", "KEY_C", "KEY_D", "KEY_E", "KEY_F", "KEY_G", "KEY_H",
    "KEY_I", "KEY_J", "KEY_K", "KEY_L", "KEY_M", "KEY_N", "KEY_O", "KEY_P",
    "KEY_Q", "KEY_R", "KEY_S", "KEY_T", "KEY_U", "KEY_V", "KEY_W", "KEY_X",
    "KEY_Y", "KEY_Z",
];

const DIGITS: [&str; 10] = [
    "KEY_0", "KEY_1", "KEY_2", "KEY_3", "KEY_4", "KEY_5", "KEY_6", "KEY_7",
    "KEY_8", "KEY_9",
];

fn press(c: char) -> Result<KeyAction, ManagerError> {
    type Pressed = Result<KeyAction, ManagerError>;
    let plain = |code: &'static str| -> Pressed {
        Ok(KeyAction::Press(vec![code]))
    };
    let shifted = |code: &'static str| -> Pressed {
        Ok(KeyAction::Press(vec![SHIFT, code]))
    };
    match c {
        'a'..='z' => plain(LETTERS[c as usize - 'a' as usize]),
        'A'..='Z' => shifted(LETTERS[c as usize - 'A' as usize]),
        '0'..='9' => plain(DIGITS[c as usize - '0' as usize]),
        ' ' => plain("KEY_SPACE"),
        '.' => plain("KEY_DOT"),
        ',' => plain("KEY_COMMA"),
        '/' => plain("KEY_SLASH"),
        '=' => plain("KEY_EQUAL"),
        '-' => plain("KEY_MINUS"),
        ';' => plain("KEY_SEMICOLON"),
        '\'' => plain("KEY_APOSTROPHE"),
        '\t' => plain("KEY_TAB"),
        ':' => shifted("KEY_SEMICOLON"),
        '_' => shifted("KEY_MINUS"),
        '+' => shifted("KEY_EQUAL"),
        '<' => shifted("KEY_COMMA"),
        '>' => shifted("KEY_DOT"),
        '"' => shifted("KEY_APOSTROPHE"),
        '@' => shifted("KEY_2"),
        _ => Err(ManagerError::UnsupportedKey(c)),
    }
}

/// Parse a console key string. `<Esc>`, `<Enter>` and `<Wait>` are named
/// keys, newlines are layout only and are dropped.
pub fn parse_keys(keys: &str) -> Result<Vec<KeyAction>, ManagerError> {
    let mut actions = Vec::new();
    let mut rest = keys;
    while let Some(c) = rest.chars().next() {
        let named = [
            ("<Esc>", KeyAction::Press(vec!["KEY_ESC"])),
            ("<Enter>", KeyAction::Press(vec!["KEY_ENTER"])),
            ("<Wait>", KeyAction::Wait(WAIT)),
        ]
        .into_iter()
        .find(|(token, _)| rest.starts_with(token));

        if let Some((token, action)) = named {
            actions.push(action);
            rest = &rest[token.len()..];
            continue;
        }
        if c != '\n' && c != '\r' {
            actions.push(press(c)?);
        }
        rest = &rest[c.len_utf8()..];
    }
    Ok(actions)
}
