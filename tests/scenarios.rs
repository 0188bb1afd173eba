//! Concrete scenarios from the HID element tree design doc, each one
//! exercised end to end through the public API: build a tree from a
//! handful of descriptor records, push bytes through `process_report`/
//! `create_report`, and check the resulting element values.

use hid_element_tree::commit::NullCommit;
use hid_element_tree::descriptor::{
    ButtonCap, CollectionNode, CollectionType, DescriptorRecord, MainFlags, ReportType, ValueCap,
};
use hid_element_tree::report::{create_report, process_report, ProcessOptions};
use hid_element_tree::tree::{GetValueOptions, TreeBuilder};
use hid_element_tree::usage::PAGE_KEYBOARD;

fn application(usage_page: u16, usage: u32) -> DescriptorRecord {
    DescriptorRecord::Collection(CollectionNode { usage_page, usage, collection_type: CollectionType::Application })
}

fn array_value(on: bool) -> u32 {
    u32::from(on)
}

/// S1: a keyboard array field (report_id 1, 6 one-byte selector slots at
/// bit 8) sees an inbound report naming usages 0x04 and 0x05; exactly
/// those two array items turn on.
#[test]
fn s1_keyboard_array_sets_selected_items() {
    let records = vec![
        application(hid_element_tree::usage::PAGE_GENERIC_DESKTOP, 0x06),
        DescriptorRecord::Button(ButtonCap {
            report_type: ReportType::Input,
            bit_field: MainFlags::ARRAY,
            start_bit: 8,
            report_id: 1,
            usage_page: PAGE_KEYBOARD,
            is_range: true,
            usage_min: 0x04,
            usage_max: 0xE7,
            report_bits: 8,
            report_count: 6,
            logical_min: 0,
            logical_max: 0xFF,
        }),
        DescriptorRecord::EndCollection,
    ];
    let mut tree = TreeBuilder::build(&records).expect("build");
    let handler = tree.report_chain_head(1).expect("report 1 has a handler");

    let bytes = [1u8, 0x04, 0x05, 0x00, 0x00, 0x00, 0x00];
    let changed = process_report(&mut tree, 1, &bytes, bytes.len() as u32 * 8, 10, ProcessOptions::empty());
    assert!(changed);

    let items = tree.element(handler).array_items.clone();
    let on: Vec<u32> = items
        .iter()
        .enumerate()
        .filter(|(_, &c)| tree.values().slot(tree.element(c).value_slot.unwrap()).word(0) == 1)
        .map(|(i, _)| 0x04 + i as u32)
        .collect();
    assert_eq!(on, vec![0x04, 0x05]);

    for &item in &items {
        let slot = tree.element(item).value_slot.unwrap();
        if tree.values().slot(slot).word(0) == 1 {
            assert_eq!(tree.values().slot(slot).timestamp(), 10);
        }
    }
}

/// S2: following S1, a new report naming 0x05 and 0x07 clears 0x04, sets
/// 0x07, and leaves 0x05 (present in both reports) without a second edge.
#[test]
fn s2_keyboard_array_diffs_against_prior_report() {
    let records = vec![
        application(hid_element_tree::usage::PAGE_GENERIC_DESKTOP, 0x06),
        DescriptorRecord::Button(ButtonCap {
            report_type: ReportType::Input,
            bit_field: MainFlags::ARRAY,
            start_bit: 8,
            report_id: 1,
            usage_page: PAGE_KEYBOARD,
            is_range: true,
            usage_min: 0x04,
            usage_max: 0xE7,
            report_bits: 8,
            report_count: 6,
            logical_min: 0,
            logical_max: 0xFF,
        }),
        DescriptorRecord::EndCollection,
    ];
    let mut tree = TreeBuilder::build(&records).expect("build");
    let handler = tree.report_chain_head(1).expect("report 1 has a handler");

    process_report(&mut tree, 1, &[1, 0x04, 0x05, 0, 0, 0, 0], 56, 10, ProcessOptions::empty());
    process_report(&mut tree, 1, &[1, 0x05, 0x07, 0, 0, 0, 0], 56, 20, ProcessOptions::empty());

    let items = tree.element(handler).array_items.clone();
    let value_of = |usage: u32| tree.values().slot(tree.element(items[(usage - 0x04) as usize]).value_slot.unwrap()).word(0);
    assert_eq!(value_of(0x04), 0, "0x04 dropped between reports");
    assert_eq!(value_of(0x07), 1, "0x07 newly present");
    assert_eq!(value_of(0x05), 1, "0x05 present in both, stays on");

    assert_eq!(tree.element(handler).old_array_selectors, vec![5, 7, 0, 0, 0, 0]);
}

/// S3: an 8-bit signed relative X field reads -1 from `0xFF`, then an
/// identical repeat report is detected unchanged by the bit-level
/// comparison even though the element is relative.
#[test]
fn s3_mouse_relative_x_signed_and_unchanged_on_repeat() {
    let records = vec![
        application(hid_element_tree::usage::PAGE_GENERIC_DESKTOP, 0x02),
        DescriptorRecord::Value(ValueCap {
            report_type: ReportType::Input,
            bit_field: MainFlags::VARIABLE | MainFlags::RELATIVE,
            bit_size: 8,
            report_count: 1,
            start_bit: 8,
            report_id: 2,
            usage_page: hid_element_tree::usage::PAGE_GENERIC_DESKTOP,
            logical_min: -128,
            logical_max: 127,
            physical_min: 0,
            physical_max: 0,
            units: 0,
            unit_exponent: 0,
            is_range: false,
            usage_min: 0x30,
            usage_max: 0x30,
        }),
        DescriptorRecord::EndCollection,
    ];
    let mut tree = TreeBuilder::build(&records).expect("build");
    let handler = tree.report_chain_head(2).expect("report 2 has a handler");
    let slot = tree.element(handler).value_slot.unwrap();

    let changed_first = process_report(&mut tree, 2, &[2, 0xFF], 16, 5, ProcessOptions::empty());
    assert!(changed_first);
    assert_eq!(tree.values().slot(slot).word(0) as i32, -1);

    let changed_second = process_report(&mut tree, 2, &[2, 0xFF], 16, 6, ProcessOptions::empty());
    assert!(!changed_second, "identical raw bits compare unchanged");
    assert_eq!(tree.values().slot(slot).word(0) as i32, -1);
}

/// S4: a vendor "Message" payload field is marked variable-size; a
/// shorter-than-declared report only consumes the bits actually present.
#[test]
fn s4_variable_size_payload_reads_available_bits_only() {
    let records = vec![
        DescriptorRecord::Collection(CollectionNode {
            usage_page: 0xFF00,
            usage: 0x01,
            collection_type: CollectionType::Application,
        }),
        DescriptorRecord::Value(ValueCap {
            report_type: ReportType::Input,
            bit_field: MainFlags::VARIABLE,
            bit_size: 8,
            report_count: 32,
            start_bit: 16,
            report_id: 3,
            usage_page: 0xFF00,
            logical_min: 0,
            logical_max: 0xFF,
            physical_min: 0,
            physical_max: 0,
            units: 0,
            unit_exponent: 0,
            is_range: false,
            usage_min: 0x10,
            usage_max: 0x10,
        }),
        DescriptorRecord::EndCollection,
    ];
    let mut tree = TreeBuilder::build(&records).expect("build");
    let handler = tree.report_chain_head(3).expect("report 3 has a handler");
    assert!(tree.element(handler).is_variable_size());

    let bytes = [3u8, 0, 0, 0xAA, 0xBB, 0xCC, 0xDD];
    process_report(&mut tree, 3, &bytes, 48, 1, ProcessOptions::empty());

    let slot = tree.element(handler).value_slot.unwrap();
    assert_eq!(tree.values().slot(slot).current_report_size_bits(), 32);
}

/// S5: a 10-bit feature value round-trips through `set_value` +
/// `create_report` + `process_report`.
#[test]
fn s5_feature_round_trip() {
    let records = vec![
        application(hid_element_tree::usage::PAGE_GENERIC_DESKTOP, 0x04),
        DescriptorRecord::Value(ValueCap {
            report_type: ReportType::Feature,
            bit_field: MainFlags::VARIABLE,
            bit_size: 10,
            report_count: 1,
            start_bit: 3,
            report_id: 0,
            usage_page: hid_element_tree::usage::PAGE_GENERIC_DESKTOP,
            logical_min: 0,
            logical_max: 1023,
            physical_min: 0,
            physical_max: 0,
            units: 0,
            unit_exponent: 0,
            is_range: false,
            usage_min: 0x40,
            usage_max: 0x40,
        }),
        DescriptorRecord::EndCollection,
    ];
    let mut tree = TreeBuilder::build(&records).expect("build");
    let handler = tree.report_chain_head(0).expect("report 0 has a handler");
    let mut commit = NullCommit;

    tree.set_value(handler, 517, &mut commit).expect("set_value succeeds");

    let mut buffer = [0u8; 2];
    let length = create_report(&mut tree, 0, &mut buffer).expect("handler exists");
    assert_eq!(length, 2);
    // 517 = 0b10_0000_0101 packed starting at bit 3: byte0 = 0b0010_1000,
    // byte1 = 0b0001_0000.
    assert_eq!(buffer, [0x28, 0x10]);

    let changed = process_report(&mut tree, 0, &buffer, 16, 1, ProcessOptions::empty());
    assert!(!changed, "packed bytes decode back to the same value");
    assert_eq!(tree.get_value(handler, GetValueOptions::empty(), &mut commit), 517);
}

/// S6: a duplicate-backed array handler (report_count 3, usages 1..4)
/// packs pending `array_items` selections into the duplicate slots and
/// clears every item's transaction state afterward.
#[test]
fn s6_duplicate_array_outbound_assembly() {
    let records = vec![
        application(hid_element_tree::usage::PAGE_BUTTON, 0x01),
        DescriptorRecord::Button(ButtonCap {
            report_type: ReportType::Output,
            bit_field: MainFlags::ARRAY,
            start_bit: 8,
            report_id: 4,
            usage_page: hid_element_tree::usage::PAGE_BUTTON,
            is_range: true,
            usage_min: 0x01,
            usage_max: 0x04,
            report_bits: 8,
            report_count: 3,
            logical_min: 0,
            logical_max: 0xFF,
        }),
        DescriptorRecord::EndCollection,
    ];
    let mut tree = TreeBuilder::build(&records).expect("build");
    let handler = tree.report_chain_head(4).expect("report 4 has a handler");
    let items = tree.element(handler).array_items.clone();
    assert_eq!(items.len(), 4);

    let mut commit = NullCommit;
    tree.set_value(items[1], array_value(true), &mut commit).expect("item 1 set"); // usage 0x02
    tree.set_value(items[3], array_value(true), &mut commit).expect("item 3 set"); // usage 0x04

    let mut buffer = [0u8; 4];
    create_report(&mut tree, 4, &mut buffer).expect("handler exists");
    assert_eq!(&buffer[1..4], &[0x02, 0x04, 0x00]);

    for &item in &items {
        assert_eq!(tree.element(item).transaction_state, hid_element_tree::element::TransactionState::Idle);
    }
}
