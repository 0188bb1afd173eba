//! HID usage page/usage constants referenced by the array-diff and
//! roll-over suppression logic in [`crate::report`].
//!
//! This is not a full usage table (that belongs to a descriptor-parsing
//! crate, out of scope here per the element tree's Non-goals) — only the
//! handful of constants the codec itself has to reason about.

/// Generic Desktop usage page.
pub const PAGE_GENERIC_DESKTOP: u16 = 0x01;
/// Keyboard/Keypad usage page.
pub const PAGE_KEYBOARD: u16 = 0x07;
/// LED usage page.
pub const PAGE_LED: u16 = 0x08;
/// Button usage page.
pub const PAGE_BUTTON: u16 = 0x09;
/// Consumer usage page.
pub const PAGE_CONSUMER: u16 = 0x0C;

/// `Keyboard ErrorRollOver` — the sentinel usage a keyboard report fills
/// every array slot with when more keys are down than the report can
/// represent. Array-diff must not treat its presence/absence as a normal
/// key press/release edge.
pub const KEYBOARD_ERROR_ROLL_OVER: u32 = 0x01;
/// `Keyboard POSTFail`, also part of the degenerate/phantom range next to
/// `ErrorRollOver` that real keyboards never use for actual key usages.
pub const KEYBOARD_POST_FAIL: u32 = 0x02;
/// First usage id real keys start at; anything below this on the keyboard
/// page is a phantom/reserved slot, mirroring the roll-over handling in
/// `IOHIDElementPrivate::processArrayReport`.
pub const KEYBOARD_FIRST_REAL_KEY: u32 = 0x04;

/// First of the eight keyboard modifier usages (LeftControl..RightGUI).
/// Array buttons that under-declare modifier coverage get `usage_max`
/// extended to `KEYBOARD_LEFT_CONTROL - 1` at build time (§4.3) — just
/// short of the modifier range, which is covered by separately-declared
/// modifier buttons, not by array items.
pub const KEYBOARD_LEFT_CONTROL: u32 = 0xE0;
/// Last of the eight keyboard modifier usages.
pub const KEYBOARD_RIGHT_GUI: u32 = 0xE7;

/// `true` if `usage` on the keyboard page is one of the eight modifier
/// keys, the range the roll-over guard in `process_report` special-cases.
pub fn is_keyboard_modifier_usage(usage_page: u16, usage: u32) -> bool {
    usage_page == PAGE_KEYBOARD && (KEYBOARD_LEFT_CONTROL..=KEYBOARD_RIGHT_GUI).contains(&usage)
}

/// `true` if `usage` on the keyboard page is one of the roll-over/no-event
/// sentinels rather than a real key.
pub fn is_keyboard_phantom_usage(usage_page: u16, usage: u32) -> bool {
    usage_page == PAGE_KEYBOARD && usage < KEYBOARD_FIRST_REAL_KEY
}
