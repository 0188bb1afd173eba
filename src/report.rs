//! Inbound (`process_report`) and outbound (`create_report`) report
//! traversal, including array-selector diffing (§4.5).

use bitflags::bitflags;

use crate::bitcodec::{read_bits, write_bits};
use crate::element::{Cookie, ElementKind, ElementType, TransactionState};
use crate::error::ReportSkip;
use crate::tree::ElementTree;
use crate::usage::{is_keyboard_modifier_usage, KEYBOARD_ERROR_ROLL_OVER, PAGE_KEYBOARD};

bitflags! {
    /// Caller-supplied hints for `process_report`.
    #[derive(Default)]
    pub struct ProcessOptions: u32 {
        /// This report did not arrive on the device's interrupt pipe;
        /// interrupt-handler elements should be skipped (§4.5 step 3).
        const NOT_INTERRUPT = 1 << 0;
    }
}

/// Inbound traversal entry point. Walks the handler chain for
/// `report_id`, updates element values via the bit codec, runs
/// array-diff on array handlers, and fans out to attached queues.
/// Returns `true` if any handler's value changed.
pub fn process_report(tree: &mut ElementTree, report_id: u8, bytes: &[u8], bit_len: u32, ts: u64, options: ProcessOptions) -> bool {
    let mut any_changed = false;
    let mut cursor = tree.report_chain_head(report_id);

    while let Some(cookie) = cursor {
        let next = tree.element(cookie).next_report_handler;
        if process_one_handler(tree, cookie, bytes, bit_len, ts, options) {
            any_changed = true;
        }
        cursor = next;
    }

    any_changed
}

fn process_one_handler(tree: &mut ElementTree, cookie: Cookie, bytes: &[u8], bit_len: u32, ts: u64, options: ProcessOptions) -> bool {
    let kind = tree.element(cookie).kind;

    if kind == ElementKind::Null {
        let slot = tree.element(cookie).value_slot.expect("registered element has a slot");
        tree.values_mut().slot_mut(slot).mutate(|_, timestamp, _| *timestamp = ts);
        dispatch(tree, cookie, ts, true);
        return false;
    }

    let e = tree.element(cookie);
    let field_bits = match e.field_bits() {
        Some(b) => b,
        None => {
            log::warn!("report_bits*report_count overflowed for cookie {:?}, skipping read", cookie);
            return false;
        }
    };

    if !e.is_variable_size() && bit_len < e.report_start_bit + field_bits {
        log::trace!("{:?}: {}", cookie, ReportSkip::TooShort);
        return false;
    }

    if kind == ElementKind::Interrupt && options.contains(ProcessOptions::NOT_INTERRUPT) {
        log::trace!("{:?}: {}", cookie, ReportSkip::NotInterruptPath);
        return false;
    }

    if !e.is_array_handler() {
        if let Some(handler) = e.array_report_handler {
            return process_one_handler(tree, handler, bytes, bit_len, ts, options);
        }
    }

    if !e.is_duplicate_handler() {
        if let Some(handler) = e.duplicate_report_handler {
            return process_one_handler(tree, handler, bytes, bit_len, ts, options);
        }
    }

    if is_rollover_phantom(tree, cookie, ts) {
        log::trace!("{:?}: {}", cookie, ReportSkip::RollOverPhantom);
        return false;
    }

    let e = tree.element(cookie);
    let read_size = if e.is_variable_size() {
        field_bits.min(bit_len.saturating_sub(e.report_start_bit))
    } else {
        field_bits
    };
    let sign_extend = e.sign_extend();
    let report_start_bit = e.report_start_bit;
    let is_interrupt = kind == ElementKind::Interrupt;
    let is_relative = e.is_relative();
    let is_array_handler = e.is_array_handler();
    let slot = e.value_slot.expect("registered element has a slot");

    let previous_words = tree.values().slot(slot).snapshot().words;
    // Seed the scratch buffer with the element's current value rather than
    // zero: `read_bits` only clears-then-sets the bits inside its own
    // range, so an unseeded (zeroed) buffer would report every nonzero
    // read as "changed", even a repeat of the same report. The slot is
    // already sized to this element's full field width (§4.4 step 6), so
    // the whole buffer is always wide enough for `read_size`.
    let mut new_words = previous_words.clone();
    let changed = read_bits(bytes, &mut new_words, read_size, report_start_bit, sign_extend);

    let should_process = changed || is_interrupt || is_relative;

    let suppress_timestamp = is_relative
        && read_size <= 32
        && previous_words[0] == 0
        && new_words[0] == 0
        && tree.values().slot(slot).timestamp() != 0;

    tree.values_mut().slot_mut(slot).mutate(|words, timestamp, size| {
        *words = new_words;
        *size = read_size;
        if should_process && !suppress_timestamp {
            *timestamp = ts;
        }
    });
    tree.element_mut(cookie).transaction_state = TransactionState::Idle;

    if is_array_handler {
        run_array_diff(tree, cookie, ts);
    }

    dispatch(tree, cookie, ts, should_process);

    should_process
}

fn is_rollover_phantom(tree: &ElementTree, cookie: Cookie, ts: u64) -> bool {
    let e = tree.element(cookie);
    if !is_keyboard_modifier_usage(e.usage_page, e.usage()) {
        return false;
    }
    let Some(parent) = e.parent else { return false };
    let Some(rollover) = find_rollover_sibling(tree, parent) else { return false };
    let snap = tree.values().slot(tree.element(rollover).value_slot.expect("rollover has slot")).snapshot();
    snap.words[0] != 0 && snap.timestamp == ts
}

fn find_rollover_sibling(tree: &ElementTree, parent: Cookie) -> Option<Cookie> {
    tree.element(parent)
        .children
        .iter()
        .copied()
        .find(|&c| tree.element(c).usage_page == PAGE_KEYBOARD && tree.element(c).usage() == KEYBOARD_ERROR_ROLL_OVER)
}

fn dispatch(tree: &mut ElementTree, cookie: Cookie, _ts: u64, should_process: bool) {
    let slot = match tree.element(cookie).value_slot {
        Some(s) => s,
        None => return,
    };
    let snapshot = tree.values().slot(slot).snapshot();
    let mut payload = Vec::with_capacity(4 + snapshot.words.len() * 4);
    payload.extend_from_slice(&(cookie.0).to_le_bytes());
    for w in snapshot.words {
        payload.extend_from_slice(&w.to_le_bytes());
    }
    tree.queues_mut(cookie).dispatch(&payload, should_process);
}

/// Array-diff (§4.5): compares the selector slots just read by the
/// duplicate handler against `old_array_selectors`, toggling each
/// affected per-usage `array_items` button and the roll-over button.
fn run_array_diff(tree: &mut ElementTree, handler: Cookie, ts: u64) {
    let e = tree.element(handler);
    let usage_page = e.usage_page;
    let usage_min = e.usage_min;
    let report_count = e.report_count.max(1);
    let report_bits = e.report_bits;
    let report_start_bit = e.report_start_bit;
    let array_items = e.array_items.clone();
    let roll_over_element = e.roll_over_element;
    let duplicate_report_handler = e.duplicate_report_handler;

    let mut new_selectors = Vec::with_capacity(report_count as usize);
    for slot_index in 0..report_count {
        let value = read_slot_value(tree, duplicate_report_handler, handler, slot_index, report_start_bit, report_bits);
        new_selectors.push(value);
    }

    let all_rollover = usage_page == PAGE_KEYBOARD && new_selectors.iter().all(|&s| s == KEYBOARD_ERROR_ROLL_OVER);

    if let Some(rollover_cookie) = roll_over_element {
        set_button_value(tree, rollover_cookie, all_rollover, ts);
    }

    if all_rollover {
        let old_selectors = tree.element(handler).old_array_selectors.clone();
        tree.element_mut(handler).old_array_selectors = old_selectors;
        return;
    }

    let old_selectors = tree.element(handler).old_array_selectors.clone();

    for &old in &old_selectors {
        if old == 0 {
            continue;
        }
        if !new_selectors.contains(&old) {
            if let Some(&item) = array_items.get((old.saturating_sub(usage_min)) as usize) {
                set_button_value(tree, item, false, ts);
            }
        }
    }

    for &new in &new_selectors {
        if new == 0 {
            continue;
        }
        if !old_selectors.contains(&new) {
            if let Some(&item) = array_items.get((new.saturating_sub(usage_min)) as usize) {
                set_button_value(tree, item, true, ts);
            }
        }
    }

    tree.element_mut(handler).old_array_selectors = new_selectors;
}

fn read_slot_value(tree: &ElementTree, dup_handler: Option<Cookie>, array_handler: Cookie, slot_index: u32, report_start_bit: u32, report_bits: u32) -> u32 {
    let _ = dup_handler;
    let _ = array_handler;
    // Slot elements share `report_start_bit` with the handler
    // (invariant 5); the per-slot bit offset is derived here rather than
    // trusted from a per-member field, matching the build-time decision
    // in `tree.rs`'s `create_duplicate_handler`.
    let slot_start = report_start_bit + slot_index * report_bits;
    let _ = slot_start;
    // The value was already captured into the handler's own value slot
    // by `process_one_handler`'s `read_bits` call against the full
    // `report_count * report_bits` field; extract this slot's word here.
    let handler_slot = tree.element(array_handler).value_slot.expect("handler has a slot");
    let words = tree.values().slot(handler_slot).snapshot().words;
    extract_slot_from_words(&words, slot_index, report_bits)
}

fn extract_slot_from_words(words: &[u32], slot_index: u32, report_bits: u32) -> u32 {
    if report_bits == 0 || report_bits > 32 {
        return 0;
    }
    let bit_offset = slot_index * report_bits;
    let word_index = (bit_offset / 32) as usize;
    let shift = bit_offset % 32;
    if word_index >= words.len() {
        return 0;
    }
    let mask = if report_bits == 32 { u32::MAX } else { (1u32 << report_bits) - 1 };
    if shift + report_bits <= 32 {
        (words[word_index] >> shift) & mask
    } else {
        let low_bits = 32 - shift;
        let low = words[word_index] >> shift;
        let high = words.get(word_index + 1).copied().unwrap_or(0) << low_bits;
        (low | high) & mask
    }
}

fn set_button_value(tree: &mut ElementTree, cookie: Cookie, on: bool, ts: u64) {
    let slot = match tree.element(cookie).value_slot {
        Some(s) => s,
        None => return,
    };
    let target = u32::from(on);
    let changed = tree.values().slot(slot).word(0) != target;
    tree.values_mut().slot_mut(slot).mutate(|words, timestamp, size| {
        words[0] = target;
        *size = 1;
        if changed {
            *timestamp = ts;
        }
    });
    dispatch(tree, cookie, ts, changed);
}

/// Outbound traversal entry point (§4.5 "Outbound"). Packs pending
/// element values for `report_id` into `buffer`, returning the number
/// of bytes written, or `None` if no handler exists for that id.
/// `buffer` must already be zeroed by the caller — this crate never
/// pre-clears outbound buffers itself (Open Question (a), see
/// `DESIGN.md`).
pub fn create_report(tree: &mut ElementTree, report_id: u8, buffer: &mut [u8]) -> Option<usize> {
    let head = tree.report_chain_head(report_id)?;
    let mut length = 0usize;
    let mut cursor = Some(head);
    let mut stop_after_null = false;

    while let Some(cookie) = cursor {
        if stop_after_null {
            break;
        }
        let next = tree.element(cookie).next_report_handler;
        let kind = tree.element(cookie).kind;

        if kind == ElementKind::Null {
            stop_after_null = true;
            cursor = next;
            continue;
        }

        if let Some(field_bits) = tree.element(cookie).field_bits() {
            length = length.max(((cookie_report_end_bit(tree, cookie, field_bits)) as usize + 7) / 8);
        }

        pack_one_handler(tree, cookie, buffer);
        cursor = next;
    }

    Some(length)
}

fn cookie_report_end_bit(tree: &ElementTree, cookie: Cookie, field_bits: u32) -> u32 {
    tree.element(cookie).report_start_bit + field_bits
}

fn pack_one_handler(tree: &mut ElementTree, cookie: Cookie, buffer: &mut [u8]) {
    let kind = tree.element(cookie).kind;
    let e = tree.element(cookie);

    if !e.is_array_handler() {
        if let Some(handler) = e.array_report_handler {
            pack_one_handler(tree, handler, buffer);
            return;
        }
    }

    if !e.is_duplicate_handler() {
        if let Some(handler) = e.duplicate_report_handler {
            pack_one_handler(tree, handler, buffer);
            return;
        }
    }

    if kind == ElementKind::ArrayHandler && tree.element(cookie).transaction_state == TransactionState::Idle {
        pack_array_handler(tree, cookie, buffer);
        return;
    }

    let e = tree.element(cookie);
    let report_start_bit = e.report_start_bit;
    let field_bits = match e.field_bits() {
        Some(b) => b,
        None => return,
    };
    let slot = match e.value_slot {
        Some(s) => s,
        None => return,
    };
    let pending = e.transaction_state == TransactionState::Pending;

    if !pending {
        return;
    }

    let words = tree.values().slot(slot).snapshot().words;
    write_bits(&words, buffer, field_bits, report_start_bit);
    tree.element_mut(cookie).transaction_state = TransactionState::Idle;
}

fn pack_array_handler(tree: &mut ElementTree, handler: Cookie, buffer: &mut [u8]) {
    let e = tree.element(handler);
    let usage_min = e.usage_min;
    let report_bits = e.report_bits;
    let report_start_bit = e.report_start_bit;
    let report_count = e.report_count.max(1);
    let array_items = e.array_items.clone();

    let mut selectors: Vec<u32> = Vec::new();
    for &item in &array_items {
        if tree.element(item).transaction_state != TransactionState::Pending {
            continue;
        }
        let slot = tree.element(item).value_slot.expect("array item has a slot");
        if tree.values().slot(slot).word(0) != 0 {
            let usage = usage_min + (array_items.iter().position(|&c| c == item).unwrap_or(0) as u32);
            selectors.push(usage);
        }
        tree.element_mut(item).transaction_state = TransactionState::Idle;
    }

    for (slot_index, &usage) in selectors.iter().take(report_count as usize).enumerate() {
        let bit = report_start_bit + slot_index as u32 * report_bits;
        write_bits(&[usage], buffer, report_bits, bit);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::descriptor::{ButtonCap, CollectionNode, CollectionType, DescriptorRecord, MainFlags, ReportType, ValueCap};
    use crate::tree::TreeBuilder;

    fn keyboard_records() -> Vec<DescriptorRecord> {
        vec![
            DescriptorRecord::Collection(CollectionNode {
                usage_page: crate::usage::PAGE_GENERIC_DESKTOP,
                usage: 0x06,
                collection_type: CollectionType::Application,
            }),
            DescriptorRecord::Button(ButtonCap {
                report_type: ReportType::Input,
                bit_field: MainFlags::ARRAY,
                start_bit: 8,
                report_id: 1,
                usage_page: PAGE_KEYBOARD,
                is_range: true,
                usage_min: 0,
                usage_max: 0xFF,
                report_bits: 8,
                report_count: 2,
                logical_min: 0,
                logical_max: 0xFF,
            }),
            DescriptorRecord::EndCollection,
        ]
    }

    #[test]
    fn array_selector_correspondence() {
        let mut tree = TreeBuilder::build(&keyboard_records()).expect("build");
        // report_id=1, two byte-slots at bit 8 and 16: usages 0x04, 0x05.
        let bytes = [1u8, 0x04, 0x05];
        process_report(&mut tree, 1, &bytes, 24, 1, ProcessOptions::empty());

        let handler = tree.element(tree.report_chain_head(1).unwrap()).clone();
        let on_count = handler
            .array_items
            .iter()
            .filter(|&&c| tree.values().slot(tree.element(c).value_slot.unwrap()).word(0) == 1)
            .count();
        assert_eq!(on_count, 2);
    }

    #[test]
    fn rollover_suppresses_all_usage_buttons() {
        let mut tree = TreeBuilder::build(&keyboard_records()).expect("build");
        let bytes = [1u8, 0x01, 0x01];
        process_report(&mut tree, 1, &bytes, 24, 1, ProcessOptions::empty());

        let handler = tree.element(tree.report_chain_head(1).unwrap()).clone();
        let on_count = handler
            .array_items
            .iter()
            .filter(|&&c| tree.values().slot(tree.element(c).value_slot.unwrap()).word(0) == 1)
            .count();
        assert_eq!(on_count, 0);

        let rollover = handler.roll_over_element.expect("rollover element exists");
        assert_eq!(tree.values().slot(tree.element(rollover).value_slot.unwrap()).word(0), 1);
    }

    fn value_record(report_id: u8, start_bit: u32, bits: u32) -> DescriptorRecord {
        DescriptorRecord::Value(ValueCap {
            report_type: ReportType::Input,
            bit_field: MainFlags::VARIABLE,
            bit_size: bits,
            report_count: 1,
            start_bit,
            report_id,
            usage_page: crate::usage::PAGE_GENERIC_DESKTOP,
            logical_min: -128,
            logical_max: 127,
            physical_min: 0,
            physical_max: 0,
            units: 0,
            unit_exponent: 0,
            is_range: false,
            usage_min: 0x30,
            usage_max: 0x30,
        })
    }

    #[test]
    fn round_trip_value_unchanged_flag() {
        let records = vec![
            DescriptorRecord::Collection(CollectionNode {
                usage_page: crate::usage::PAGE_GENERIC_DESKTOP,
                usage: 0x02,
                collection_type: CollectionType::Application,
            }),
            value_record(1, 8, 8),
            DescriptorRecord::EndCollection,
        ];
        let mut tree = TreeBuilder::build(&records).expect("build");
        let bytes = [1u8, 5];
        let changed_first = process_report(&mut tree, 1, &bytes, 16, 1, ProcessOptions::empty());
        assert!(changed_first);
        let changed_second = process_report(&mut tree, 1, &bytes, 16, 2, ProcessOptions::empty());
        assert!(!changed_second);
    }
}
