//! Key name → category. Accepts DOM `KeyboardEvent.key` style names.

use super::KeyCategory;

const MODIFIERS: &[&str] = &[
    "Shift", "Control", "Alt", "AltGraph", "Meta", "OS", "CapsLock", "Fn", "FnLock", "Hyper",
    "Super", "NumLock", "ScrollLock",
];

// Deletion keys are grouped with navigation so the client error indicator covers corrections.
const NAVIGATION: &[&str] = &[
    "ArrowLeft",
    "ArrowRight",
    "ArrowUp",
    "ArrowDown",
    "Home",
    "End",
    "PageUp",
    "PageDown",
    "Backspace",
    "Delete",
];

impl KeyCategory {
    pub fn classify(key: &str) -> Self {
        let mut chars = key.chars();
        if let (Some(c), None) = (chars.next(), chars.next()) {
            return if c.is_alphabetic() {
                KeyCategory::Letter
            } else if c.is_ascii_digit() {
                KeyCategory::Digit
            } else if !c.is_control() {
                KeyCategory::Punctuation
            } else {
                KeyCategory::Other
            };
        }
        if MODIFIERS.contains(&key) {
            return KeyCategory::Modifier;
        }
        if NAVIGATION.contains(&key) {
            return KeyCategory::Navigation;
        }
        if key == "Escape" || is_function_key(key) {
            return KeyCategory::Function;
        }
        KeyCategory::Other
    }
}

fn is_function_key(key: &str) -> bool {
    key.strip_prefix('F')
        .and_then(|n| n.parse::<u8>().ok())
        .map(|n| (1..=24).contains(&n))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_common_keys() {
        assert_eq!(KeyCategory::classify("a"), KeyCategory::Letter);
        assert_eq!(KeyCategory::classify("É"), KeyCategory::Letter);
        assert_eq!(KeyCategory::classify("7"), KeyCategory::Digit);
        assert_eq!(KeyCategory::classify(","), KeyCategory::Punctuation);
        assert_eq!(KeyCategory::classify(" "), KeyCategory::Punctuation);
        assert_eq!(KeyCategory::classify("Shift"), KeyCategory::Modifier);
        assert_eq!(KeyCategory::classify("Backspace"), KeyCategory::Navigation);
        assert_eq!(KeyCategory::classify("ArrowLeft"), KeyCategory::Navigation);
        assert_eq!(KeyCategory::classify("F12"), KeyCategory::Function);
        assert_eq!(KeyCategory::classify("F25"), KeyCategory::Other);
        assert_eq!(KeyCategory::classify("Escape"), KeyCategory::Function);
        assert_eq!(KeyCategory::classify("Enter"), KeyCategory::Other);
        assert_eq!(KeyCategory::classify("Dead"), KeyCategory::Other);
    }
}
