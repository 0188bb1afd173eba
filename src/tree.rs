//! Builds an [`ElementTree`] from descriptor records: the heart of §4.4.
//!
//! The arena is a single `Vec<Element>` indexed by dense [`Cookie`].
//! Every relation other than "owns" (`children`, `array_items`,
//! `duplicate_elements`) is a plain `Cookie` index, so the tree never
//! needs `Rc`/reference counting — its elements live exactly as long as
//! the `Vec` that owns them (see design notes in `DESIGN.md`).

use std::collections::HashMap;
use std::sync::Arc;

use bitflags::bitflags;

use crate::bitcodec::{read_bits, write_bits};
use crate::commit::ElementValueCommit;
use crate::descriptor::{ButtonCap, CollectionType, DescriptorRecord, MainFlags, ValueCap};
use crate::element::{Calibration, Cookie, Element, ElementKind, ElementType, TransactionState};
use crate::error::{BuildError, PostFailure};
use crate::queue::{QueueList, ReportQueue};
use crate::usage::{KEYBOARD_LEFT_CONTROL, PAGE_KEYBOARD};
use crate::value::ElementValueStore;

bitflags! {
    /// Caller-supplied hints for [`ElementTree::get_value`]/[`ElementTree::get_data_value`],
    /// mirroring `kIOHIDValueOptions*`.
    #[derive(Default)]
    pub struct GetValueOptions: u32 {
        /// Call the external commit collaborator's `update_element_values`
        /// before reading, so the caller sees fresh hardware state.
        const UPDATE_ELEMENT_VALUES = 1 << 0;
        /// Return the value from *before* the element's last update
        /// rather than its current one.
        const FLAG_PREVIOUS = 1 << 1;
        /// Return `new - previous` (wrap-aware) instead of the absolute
        /// value; only meaningful for fields <= 32 bits.
        const FLAG_RELATIVE_SIMPLE = 1 << 2;
    }
}

/// A collection usage pair vendor hardware uses to mark a collection as
/// carrying a variable-size "message"/"payload" blob rather than a fixed
/// HID control. Not part of the HID usage tables; a local convention
/// this crate's builder recognises (see `DESIGN.md`, Open Question c).
const VENDOR_PAGE_MIN: u16 = 0xFF00;
const VENDOR_USAGE_MESSAGE: u32 = 0x01;
const VENDOR_USAGE_PAYLOAD: u32 = 0x02;

/// Key used to deduplicate array handlers: members that share a type,
/// start bit, and report id belong to the same selector group (§4.4
/// step 4).
type ArrayHandlerKey = (ElementType, u32, u8);

/// Incrementally constructs an [`ElementTree`] by walking descriptor
/// records in order. See [`TreeBuilder::build`] for the entry point most
/// callers want.
pub struct TreeBuilder {
    elements: Vec<Element>,
    open_collections: Vec<Cookie>,
    array_handlers: HashMap<ArrayHandlerKey, Cookie>,
    report_chain_heads: HashMap<u8, Cookie>,
    report_chain_tails: HashMap<u8, Cookie>,
    roll_over_elements: HashMap<u8, Cookie>,
    max_children: usize,
}

impl Default for TreeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TreeBuilder {
    pub fn new() -> Self {
        let root = Element {
            cookie: Cookie::ROOT,
            kind: ElementKind::Collection,
            element_type: ElementType::Collection,
            collection_type: Some(CollectionType::Application),
            usage_page: 0,
            usage_min: 0,
            usage_max: 0,
            range_index: 0,
            report_id: 0,
            report_start_bit: 0,
            report_bits: 0,
            report_count: 0,
            raw_report_count: 0,
            current_report_size_bits: 0,
            flags: MainFlags::empty(),
            logical_min: 0,
            logical_max: 0,
            physical_min: 0,
            physical_max: 0,
            units: 0,
            unit_exponent: 0,
            calibration: Calibration::default(),
            parent: None,
            children: Vec::new(),
            next_report_handler: None,
            array_report_handler: None,
            duplicate_report_handler: None,
            array_items: Vec::new(),
            duplicate_elements: Vec::new(),
            roll_over_element: None,
            value_slot: Some(0),
            previous_value: 0,
            transaction_state: TransactionState::Idle,
            old_array_selectors: Vec::new(),
        };

        Self {
            elements: vec![root],
            open_collections: vec![Cookie::ROOT],
            array_handlers: HashMap::new(),
            report_chain_heads: HashMap::new(),
            report_chain_tails: HashMap::new(),
            roll_over_elements: HashMap::new(),
            max_children: 0x1000,
        }
    }

    /// Override the collection child-count threshold used by property
    /// dumps to elide an oversized sub-tree (§4.4). Defaults to `0x1000`.
    pub fn with_max_children(mut self, max_children: usize) -> Self {
        self.max_children = max_children;
        self
    }

    pub fn max_children(&self) -> usize {
        self.max_children
    }

    /// Build a tree from `records` in one pass. On error, everything
    /// built so far is dropped with the `TreeBuilder` (no partial tree
    /// escapes), per §4.4's error contract.
    pub fn build(records: &[DescriptorRecord]) -> Result<ElementTree, BuildError> {
        let mut builder = Self::new();
        builder.apply(records)?;
        builder.finish()
    }

    fn apply(&mut self, records: &[DescriptorRecord]) -> Result<(), BuildError> {
        for record in records {
            match record {
                DescriptorRecord::Collection(node) => self.open_collection(node)?,
                DescriptorRecord::EndCollection => self.close_collection()?,
                DescriptorRecord::Button(cap) => {
                    self.add_button(cap, self.current_parent())?;
                }
                DescriptorRecord::Value(cap) => {
                    self.add_value(cap, self.current_parent())?;
                }
                DescriptorRecord::Interrupt { report_type, report_id, total_bits } => {
                    self.add_interrupt(*report_type, *report_id, *total_bits, self.current_parent())?;
                }
                DescriptorRecord::Null { report_id } => {
                    self.add_null(*report_id, self.current_parent())?;
                }
            }
        }

        if self.open_collections.len() != 1 {
            return Err(BuildError::InvalidRecord("unterminated collection"));
        }

        Ok(())
    }

    fn finish(self) -> Result<ElementTree, BuildError> {
        let len = self.elements.len();
        // §4.4 step 6: each element's value-size contribution is its own
        // `report_bits*report_count`, not a shared fixed-width cap — a
        // 256-bit vendor payload gets an 8-word slot, a button gets one.
        let word_counts: Vec<usize> = self
            .elements
            .iter()
            .map(|e| {
                let bits = e.field_bits().unwrap_or(0) as usize;
                (bits + 31) / 32
            })
            .collect();
        Ok(ElementTree {
            elements: self.elements,
            values: ElementValueStore::with_word_counts(&word_counts),
            report_chain_heads: self.report_chain_heads,
            max_children: self.max_children,
            queues: vec![QueueList::default(); len],
        })
    }

    fn current_parent(&self) -> Cookie {
        *self.open_collections.last().expect("root always open")
    }

    fn open_collection(&mut self, node: &crate::descriptor::CollectionNode) -> Result<(), BuildError> {
        let parent = self.current_parent();
        let element = Element {
            cookie: Cookie(0),
            kind: ElementKind::Collection,
            element_type: ElementType::Collection,
            collection_type: Some(node.collection_type),
            usage_page: node.usage_page,
            usage_min: node.usage,
            usage_max: node.usage,
            range_index: 0,
            report_id: 0,
            report_start_bit: 0,
            report_bits: 0,
            report_count: 0,
            raw_report_count: 0,
            current_report_size_bits: 0,
            flags: MainFlags::empty(),
            logical_min: 0,
            logical_max: 0,
            physical_min: 0,
            physical_max: 0,
            units: 0,
            unit_exponent: 0,
            calibration: Calibration::default(),
            parent: None,
            children: Vec::new(),
            next_report_handler: None,
            array_report_handler: None,
            duplicate_report_handler: None,
            array_items: Vec::new(),
            duplicate_elements: Vec::new(),
            roll_over_element: None,
            value_slot: None,
            previous_value: 0,
            transaction_state: TransactionState::Idle,
            old_array_selectors: Vec::new(),
        };
        let cookie = self.register(element);
        self.link_child(parent, cookie);
        self.open_collections.push(cookie);
        Ok(())
    }

    fn close_collection(&mut self) -> Result<(), BuildError> {
        if self.open_collections.len() <= 1 {
            return Err(BuildError::InvalidRecord("end collection without matching open"));
        }
        self.open_collections.pop();
        Ok(())
    }

    fn register(&mut self, mut element: Element) -> Cookie {
        let cookie = Cookie(self.elements.len() as u32);
        element.cookie = cookie;
        element.value_slot = Some(cookie.index());
        self.elements.push(element);
        cookie
    }

    fn link_child(&mut self, parent: Cookie, child: Cookie) {
        self.elements[child.index()].parent = Some(parent);
        self.elements[parent.index()].children.push(child);
    }

    fn link_report_handler(&mut self, report_id: u8, cookie: Cookie) {
        if let Some(&tail) = self.report_chain_tails.get(&report_id) {
            self.elements[tail.index()].next_report_handler = Some(cookie);
        } else {
            self.report_chain_heads.insert(report_id, cookie);
        }
        self.report_chain_tails.insert(report_id, cookie);
    }

    fn parent_is_payload_collection(&self, parent: Cookie) -> bool {
        let p = &self.elements[parent.index()];
        p.usage_page >= VENDOR_PAGE_MIN && (p.usage_min == VENDOR_USAGE_MESSAGE || p.usage_min == VENDOR_USAGE_PAYLOAD)
    }

    /// Implements the array-member wiring from §4.4 step 4: the first
    /// array member for a `(type, start_bit, report_id)` triple gets a
    /// freshly synthesised handler; every member (including the first)
    /// is then rewritten into a 1-bit boolean and redirected to that
    /// Links a non-array report-bearing element straight into its
    /// report-id chain.
    fn register_handler(&mut self, cookie: Cookie) {
        self.link_report_handler(self.elements[cookie.index()].report_id, cookie);
    }

    /// Builds (or reuses) the array handler for one array `ButtonCap`
    /// record. Unlike a plain ranged button — which spawns one tree
    /// element per range index and links each straight into its report
    /// chain — an array field owns two separate synthetic structures
    /// (§4.3 "Array handler element"):
    ///
    /// - `array_items`: one boolean button per selectable usage code
    ///   (`usage_max - usage_min + 1` of them), driven only by
    ///   `report.rs`'s array-diff, never read directly off the wire.
    /// - the duplicate slots (via [`Self::create_duplicate_handler`]):
    ///   `report_count` elements that *are* read directly off the wire,
    ///   each holding whatever raw usage code currently sits in that
    ///   report slot.
    ///
    /// The handler itself is the sole element linked into the
    /// `report_id` chain for this group.
    fn build_array_field(&mut self, cap: &ButtonCap, parent: Cookie) -> Result<Cookie, BuildError> {
        let mut usage_max = cap.usage_max;
        if cap.usage_page == PAGE_KEYBOARD && cap.is_range && usage_max < KEYBOARD_LEFT_CONTROL - 1 {
            usage_max = KEYBOARD_LEFT_CONTROL - 1;
        }
        if usage_max < cap.usage_min {
            return Err(BuildError::InvalidUsageRange);
        }

        let key: ArrayHandlerKey = (cap.report_type.into(), cap.start_bit, cap.report_id);
        if let Some(&existing) = self.array_handlers.get(&key) {
            return Ok(existing);
        }

        let n_items = (usage_max - cap.usage_min + 1) as usize;

        let handler = Element {
            cookie: Cookie(0),
            kind: ElementKind::ArrayHandler,
            element_type: cap.report_type.into(),
            collection_type: None,
            usage_page: cap.usage_page,
            usage_min: cap.usage_min,
            usage_max,
            range_index: 0,
            report_id: cap.report_id,
            report_start_bit: cap.start_bit,
            report_bits: cap.report_bits,
            report_count: cap.report_count,
            raw_report_count: cap.report_count,
            current_report_size_bits: 0,
            flags: cap.bit_field,
            logical_min: cap.logical_min,
            logical_max: cap.logical_max,
            physical_min: 0,
            physical_max: 0,
            units: 0,
            unit_exponent: 0,
            calibration: Calibration::default(),
            parent: None,
            children: Vec::new(),
            next_report_handler: None,
            array_report_handler: None,
            duplicate_report_handler: None,
            array_items: Vec::with_capacity(n_items),
            duplicate_elements: Vec::new(),
            roll_over_element: None,
            value_slot: None,
            previous_value: 0,
            transaction_state: TransactionState::Idle,
            old_array_selectors: vec![0; cap.report_count.max(1) as usize],
        };
        let handler_cookie = self.register(handler);
        self.elements[handler_cookie.index()].array_report_handler = Some(handler_cookie);
        self.link_child(parent, handler_cookie);
        self.link_report_handler(cap.report_id, handler_cookie);
        self.array_handlers.insert(key, handler_cookie);

        for i in 0..n_items as u32 {
            let item = Element {
                cookie: Cookie(0),
                kind: ElementKind::Button,
                element_type: cap.report_type.into(),
                collection_type: None,
                usage_page: cap.usage_page,
                usage_min: cap.usage_min + i,
                usage_max: cap.usage_min + i,
                range_index: 0,
                report_id: cap.report_id,
                report_start_bit: cap.start_bit,
                report_bits: 1,
                report_count: 1,
                raw_report_count: 1,
                current_report_size_bits: 0,
                flags: MainFlags::VARIABLE,
                logical_min: 0,
                logical_max: 1,
                physical_min: 0,
                physical_max: 0,
                units: 0,
                unit_exponent: 0,
                calibration: Calibration::default(),
                parent: Some(handler_cookie),
                children: Vec::new(),
                next_report_handler: None,
                array_report_handler: Some(handler_cookie),
                duplicate_report_handler: None,
                array_items: Vec::new(),
                duplicate_elements: Vec::new(),
                roll_over_element: None,
                value_slot: None,
                previous_value: 0,
                transaction_state: TransactionState::Idle,
                old_array_selectors: Vec::new(),
            };
            let item_cookie = self.register(item);
            self.elements[handler_cookie.index()].array_items.push(item_cookie);
        }

        if cap.report_count > 1 {
            self.create_duplicate_handler(handler_cookie, cap.report_count)?;
        }

        if cap.usage_page == PAGE_KEYBOARD {
            self.wire_roll_over(parent, handler_cookie)?;
        }

        Ok(handler_cookie)
    }

    /// Spawns a `DuplicateHandler` owning `report_count` `DuplicateMember`
    /// slots. All share `report_start_bit` with the array handler
    /// (invariant 5); `report.rs`'s array-diff computes each slot's
    /// actual bit offset as `report_start_bit + range_index * report_bits`
    /// rather than trusting a per-member field, since members are
    /// identity placeholders more than independently addressed fields
    /// (see `DESIGN.md`, Open Question resolution for duplicate layout).
    fn create_duplicate_handler(&mut self, array_handler: Cookie, report_count: u32) -> Result<(), BuildError> {
        let template = self.elements[array_handler.index()].clone();

        let dup_handler = Element {
            cookie: Cookie(0),
            kind: ElementKind::DuplicateHandler,
            element_type: template.element_type,
            collection_type: None,
            usage_page: template.usage_page,
            usage_min: template.usage_min,
            usage_max: template.usage_max,
            range_index: 0,
            report_id: template.report_id,
            report_start_bit: template.report_start_bit,
            report_bits: template.report_bits,
            report_count,
            raw_report_count: report_count,
            current_report_size_bits: 0,
            flags: template.flags,
            logical_min: template.logical_min,
            logical_max: template.logical_max,
            physical_min: 0,
            physical_max: 0,
            units: 0,
            unit_exponent: 0,
            calibration: Calibration::default(),
            parent: Some(array_handler),
            children: Vec::new(),
            next_report_handler: None,
            array_report_handler: Some(array_handler),
            duplicate_report_handler: None,
            array_items: Vec::new(),
            duplicate_elements: Vec::with_capacity(report_count as usize),
            roll_over_element: None,
            value_slot: None,
            previous_value: 0,
            transaction_state: TransactionState::Idle,
            old_array_selectors: Vec::new(),
        };
        let dup_handler_cookie = self.register(dup_handler);
        self.elements[dup_handler_cookie.index()].duplicate_report_handler = Some(dup_handler_cookie);
        self.elements[array_handler.index()].duplicate_report_handler = Some(dup_handler_cookie);

        for range_index in 0..report_count {
            let member = Element {
                cookie: Cookie(0),
                kind: ElementKind::Button,
                element_type: template.element_type,
                collection_type: None,
                usage_page: template.usage_page,
                usage_min: template.usage_min,
                usage_max: template.usage_max,
                range_index,
                report_id: template.report_id,
                report_start_bit: template.report_start_bit,
                report_bits: template.report_bits,
                report_count: 1,
                raw_report_count: 1,
                current_report_size_bits: 0,
                flags: template.flags,
                logical_min: template.logical_min,
                logical_max: template.logical_max,
                physical_min: 0,
                physical_max: 0,
                units: 0,
                unit_exponent: 0,
                calibration: Calibration::default(),
                parent: Some(dup_handler_cookie),
                children: Vec::new(),
                next_report_handler: None,
                array_report_handler: Some(array_handler),
                duplicate_report_handler: Some(dup_handler_cookie),
                array_items: Vec::new(),
                duplicate_elements: Vec::new(),
                roll_over_element: None,
                value_slot: None,
                previous_value: 0,
                transaction_state: TransactionState::Idle,
                old_array_selectors: Vec::new(),
            };
            let member_cookie = self.register(member);
            self.elements[dup_handler_cookie.index()].duplicate_elements.push(member_cookie);
        }

        Ok(())
    }

    /// Keyboard array handlers get a synthetic roll-over button: a
    /// single-bit element array-diff sets to 1 when every inbound
    /// selector equals `ErrorRollOver` (§4.3, §4.5 step "Array-diff").
    fn wire_roll_over(&mut self, parent: Cookie, handler: Cookie) -> Result<(), BuildError> {
        if let Some(&existing) = self.roll_over_elements.get(&self.elements[handler.index()].report_id) {
            self.elements[handler.index()].roll_over_element = Some(existing);
            return Ok(());
        }

        let template = self.elements[handler.index()].clone();
        let rollover = Element {
            cookie: Cookie(0),
            kind: ElementKind::Button,
            element_type: template.element_type,
            collection_type: None,
            usage_page: PAGE_KEYBOARD,
            usage_min: crate::usage::KEYBOARD_ERROR_ROLL_OVER,
            usage_max: crate::usage::KEYBOARD_ERROR_ROLL_OVER,
            range_index: 0,
            report_id: template.report_id,
            report_start_bit: template.report_start_bit,
            report_bits: 1,
            report_count: 1,
            raw_report_count: 1,
            current_report_size_bits: 0,
            flags: MainFlags::VARIABLE,
            logical_min: 0,
            logical_max: 1,
            physical_min: 0,
            physical_max: 0,
            units: 0,
            unit_exponent: 0,
            calibration: Calibration::default(),
            parent: Some(parent),
            children: Vec::new(),
            next_report_handler: None,
            array_report_handler: None,
            duplicate_report_handler: None,
            array_items: Vec::new(),
            duplicate_elements: Vec::new(),
            roll_over_element: None,
            value_slot: None,
            previous_value: 0,
            transaction_state: TransactionState::Idle,
            old_array_selectors: Vec::new(),
        };
        let rollover_cookie = self.register(rollover);
        self.link_child(parent, rollover_cookie);
        self.roll_over_elements.insert(template.report_id, rollover_cookie);
        self.elements[handler.index()].roll_over_element = Some(rollover_cookie);
        Ok(())
    }

    fn add_button(&mut self, cap: &ButtonCap, parent: Cookie) -> Result<Cookie, BuildError> {
        if cap.bit_field.contains(MainFlags::ARRAY) {
            return self.build_array_field(cap, parent);
        }

        let (logical_min, logical_max) = (0, 1);

        let base = Element {
            cookie: Cookie(0),
            kind: ElementKind::Button,
            element_type: cap.report_type.into(),
            collection_type: None,
            usage_page: cap.usage_page,
            usage_min: cap.usage_min,
            usage_max: cap.usage_max,
            range_index: 0,
            report_id: cap.report_id,
            report_start_bit: cap.start_bit,
            report_bits: 1,
            report_count: 1,
            raw_report_count: cap.report_count,
            current_report_size_bits: 0,
            flags: cap.bit_field,
            logical_min,
            logical_max,
            physical_min: 0,
            physical_max: 0,
            units: 0,
            unit_exponent: 0,
            calibration: Calibration::default(),
            parent: Some(parent),
            children: Vec::new(),
            next_report_handler: None,
            array_report_handler: None,
            duplicate_report_handler: None,
            array_items: Vec::new(),
            duplicate_elements: Vec::new(),
            roll_over_element: None,
            value_slot: None,
            previous_value: 0,
            transaction_state: TransactionState::Idle,
            old_array_selectors: Vec::new(),
        };

        let base_cookie = self.register(base);
        self.link_child(parent, base_cookie);
        self.register_handler(base_cookie);

        if cap.is_range {
            self.spawn_button_siblings(parent, base_cookie, cap)?;
        }

        Ok(base_cookie)
    }

    fn spawn_button_siblings(&mut self, parent: Cookie, base_cookie: Cookie, cap: &ButtonCap) -> Result<(), BuildError> {
        let range_count = cap.usage_max.saturating_sub(cap.usage_min) + 1;
        let base_start = cap.start_bit;

        for range_index in 1..range_count {
            let mut sibling = self.elements[base_cookie.index()].clone();
            sibling.cookie = Cookie(0);
            sibling.range_index = range_index;
            sibling.report_start_bit = base_start.saturating_add(range_index);
            sibling.parent = Some(parent);
            sibling.children.clear();

            let sibling_cookie = self.register(sibling);
            self.link_child(parent, sibling_cookie);
            self.register_handler(sibling_cookie);
        }
        Ok(())
    }

    fn add_value(&mut self, cap: &ValueCap, parent: Cookie) -> Result<Cookie, BuildError> {
        let mut report_bits = cap.bit_size;
        let mut report_count = cap.report_count;

        if cap.is_range {
            report_count = 1;
        } else if report_count > 1 {
            report_bits = report_bits.checked_mul(report_count).ok_or(BuildError::FieldSizeOverflow)?;
            report_count = 1;
        }

        let mut flags = cap.bit_field;
        if self.parent_is_payload_collection(parent) {
            flags |= MainFlags::BUFFERED_BYTE;
        }

        let element = Element {
            cookie: Cookie(0),
            kind: ElementKind::Value,
            element_type: cap.report_type.into(),
            collection_type: None,
            usage_page: cap.usage_page,
            usage_min: cap.usage_min,
            usage_max: cap.usage_max,
            range_index: 0,
            report_id: cap.report_id,
            report_start_bit: cap.start_bit,
            report_bits,
            report_count,
            raw_report_count: cap.report_count,
            current_report_size_bits: report_bits * report_count,
            flags,
            logical_min: cap.logical_min,
            logical_max: cap.logical_max,
            physical_min: cap.physical_min,
            physical_max: cap.physical_max,
            units: cap.units,
            unit_exponent: cap.unit_exponent,
            calibration: Calibration::default(),
            parent: Some(parent),
            children: Vec::new(),
            next_report_handler: None,
            array_report_handler: None,
            duplicate_report_handler: None,
            array_items: Vec::new(),
            duplicate_elements: Vec::new(),
            roll_over_element: None,
            value_slot: None,
            previous_value: 0,
            transaction_state: TransactionState::Idle,
            old_array_selectors: Vec::new(),
        };

        let cookie = self.register(element);
        self.link_child(parent, cookie);
        self.link_report_handler(cap.report_id, cookie);

        if cap.is_range {
            self.spawn_value_siblings(parent, cookie, cap, report_bits)?;
        }

        Ok(cookie)
    }

    fn spawn_value_siblings(&mut self, parent: Cookie, base_cookie: Cookie, cap: &ValueCap, report_bits: u32) -> Result<(), BuildError> {
        let range_count = cap.usage_max.saturating_sub(cap.usage_min) + 1;
        for range_index in 1..range_count {
            let mut sibling = self.elements[base_cookie.index()].clone();
            sibling.cookie = Cookie(0);
            sibling.range_index = range_index;
            sibling.report_start_bit = cap.start_bit.saturating_add(range_index.saturating_mul(report_bits));
            sibling.parent = Some(parent);
            sibling.children.clear();

            let sibling_cookie = self.register(sibling);
            self.link_child(parent, sibling_cookie);
            self.link_report_handler(cap.report_id, sibling_cookie);
        }
        Ok(())
    }

    fn add_interrupt(
        &mut self,
        report_type: crate::descriptor::ReportType,
        report_id: u8,
        total_bits: u32,
        parent: Cookie,
    ) -> Result<Cookie, BuildError> {
        let element = Element {
            cookie: Cookie(0),
            kind: ElementKind::Interrupt,
            element_type: report_type.into(),
            collection_type: None,
            usage_page: 0,
            usage_min: 0,
            usage_max: 0,
            range_index: 0,
            report_id,
            report_start_bit: 0,
            report_bits: total_bits,
            report_count: 1,
            raw_report_count: 1,
            current_report_size_bits: total_bits,
            flags: MainFlags::VARIABLE | MainFlags::RELATIVE,
            logical_min: 0,
            logical_max: 0,
            physical_min: 0,
            physical_max: 0,
            units: 0,
            unit_exponent: 0,
            calibration: Calibration::default(),
            parent: Some(parent),
            children: Vec::new(),
            next_report_handler: None,
            array_report_handler: None,
            duplicate_report_handler: None,
            array_items: Vec::new(),
            duplicate_elements: Vec::new(),
            roll_over_element: None,
            value_slot: None,
            previous_value: 0,
            transaction_state: TransactionState::Idle,
            old_array_selectors: Vec::new(),
        };
        let cookie = self.register(element);
        self.link_child(parent, cookie);
        self.link_report_handler(report_id, cookie);
        Ok(cookie)
    }

    fn add_null(&mut self, report_id: u8, parent: Cookie) -> Result<Cookie, BuildError> {
        let element = Element {
            cookie: Cookie(0),
            kind: ElementKind::Null,
            element_type: ElementType::InputNull,
            collection_type: None,
            usage_page: 0,
            usage_min: 0,
            usage_max: 0,
            range_index: 0,
            report_id,
            report_start_bit: 0,
            report_bits: 0,
            report_count: 0,
            raw_report_count: 0,
            current_report_size_bits: 0,
            flags: MainFlags::empty(),
            logical_min: 0,
            logical_max: 0,
            physical_min: 0,
            physical_max: 0,
            units: 0,
            unit_exponent: 0,
            calibration: Calibration::default(),
            parent: Some(parent),
            children: Vec::new(),
            next_report_handler: None,
            array_report_handler: None,
            duplicate_report_handler: None,
            array_items: Vec::new(),
            duplicate_elements: Vec::new(),
            roll_over_element: None,
            value_slot: None,
            previous_value: 0,
            transaction_state: TransactionState::Idle,
            old_array_selectors: Vec::new(),
        };
        let cookie = self.register(element);
        self.link_child(parent, cookie);
        self.link_report_handler(report_id, cookie);
        Ok(cookie)
    }
}

/// The built, immutable-shape element tree: an arena plus the per-report
/// chain heads needed to start a `process_report`/`create_report` walk.
/// Element *contents* (values, transaction state) remain mutable through
/// `&mut ElementTree`; the arena's length and relations never change
/// after `TreeBuilder::build` returns.
pub struct ElementTree {
    pub(crate) elements: Vec<Element>,
    pub(crate) values: ElementValueStore,
    pub(crate) report_chain_heads: HashMap<u8, Cookie>,
    pub(crate) max_children: usize,
    pub(crate) queues: Vec<QueueList>,
}

impl ElementTree {
    pub fn element(&self, cookie: Cookie) -> &Element {
        &self.elements[cookie.index()]
    }

    pub fn element_mut(&mut self, cookie: Cookie) -> &mut Element {
        &mut self.elements[cookie.index()]
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn values(&self) -> &ElementValueStore {
        &self.values
    }

    pub fn values_mut(&mut self) -> &mut ElementValueStore {
        &mut self.values
    }

    pub fn report_chain_head(&self, report_id: u8) -> Option<Cookie> {
        self.report_chain_heads.get(&report_id).copied()
    }

    pub fn max_children(&self) -> usize {
        self.max_children
    }

    pub fn queues(&self, cookie: Cookie) -> &QueueList {
        &self.queues[cookie.index()]
    }

    pub fn queues_mut(&mut self, cookie: Cookie) -> &mut QueueList {
        &mut self.queues[cookie.index()]
    }

    /// §4.6: attach a consumer to `cookie`'s change notifications.
    /// Returns `false` if it was already attached.
    pub fn attach_queue(&mut self, cookie: Cookie, queue: Arc<dyn ReportQueue>) -> bool {
        self.queues_mut(cookie).attach(queue)
    }

    /// §4.6: detach a consumer. Returns `false` if it was not attached
    /// (a no-op, not an error).
    pub fn detach_queue(&mut self, cookie: Cookie, queue: &Arc<dyn ReportQueue>) -> bool {
        self.queues_mut(cookie).detach(queue)
    }

    pub fn set_calibration(&mut self, cookie: Cookie, calibration: Calibration) {
        self.element_mut(cookie).calibration = calibration;
    }

    /// `getValue(options)` from §6: read the element's first value word,
    /// optionally refreshing from hardware first, returning the prior
    /// value instead, or the wrap-aware delta instead of the absolute
    /// value. Fields wider than 32 bits always return 0, matching the
    /// source's `(report_bits * report_count) <= 32` guard.
    pub fn get_value(&mut self, cookie: Cookie, options: GetValueOptions, commit: &mut dyn ElementValueCommit) -> u32 {
        match self.element(cookie).field_bits() {
            Some(bits) if bits <= 32 => {}
            _ => return 0,
        }

        if options.contains(GetValueOptions::UPDATE_ELEMENT_VALUES) {
            if let Err(status) = commit.update_element_values(&[cookie]) {
                log::error!("update_element_values failed for {cookie:?}: {status}");
            }
        }

        let slot = self.element(cookie).value_slot.expect("registered element has a slot");
        let previous = self.element(cookie).previous_value;
        let current = self.values().slot(slot).word(0);

        let mut value = if options.contains(GetValueOptions::FLAG_PREVIOUS) { previous } else { current };

        if options.contains(GetValueOptions::FLAG_RELATIVE_SIMPLE) {
            let e = self.element(cookie);
            let wrap = e.flags.contains(MainFlags::WRAP);
            value = if wrap && current == e.logical_min as u32 && previous == e.logical_max as u32 {
                1
            } else if wrap && current == e.logical_max as u32 && previous == e.logical_min as u32 {
                0u32.wrapping_sub(1)
            } else {
                current.wrapping_sub(previous)
            };
        }

        value
    }

    /// `getDataValue()` from §6: pack the element's current value words
    /// back into a byte buffer sized to `current_report_size_bits`,
    /// optionally refreshing from hardware first.
    pub fn get_data_value(&mut self, cookie: Cookie, options: GetValueOptions, commit: &mut dyn ElementValueCommit) -> Vec<u8> {
        if options.contains(GetValueOptions::UPDATE_ELEMENT_VALUES) {
            if let Err(status) = commit.update_element_values(&[cookie]) {
                log::error!("update_element_values failed for {cookie:?}: {status}");
            }
        }

        let slot = self.element(cookie).value_slot.expect("registered element has a slot");
        let snapshot = self.values().slot(slot).snapshot();
        let bits = snapshot.current_report_size_bits.max(self.element(cookie).field_bits().unwrap_or(0));
        let mut bytes = vec![0u8; ((bits as usize) + 7) / 8];
        write_bits(&snapshot.words, &mut bytes, bits, 0);
        bytes
    }

    /// `setValue(value)` from §6. Per the source: a write that doesn't
    /// change anything and isn't the element's first-ever write is a
    /// no-op (skips the commit round-trip entirely). On commit failure
    /// the element is rolled back to its previous value and the failure
    /// is returned to the caller.
    pub fn set_value(&mut self, cookie: Cookie, value: u32, commit: &mut dyn ElementValueCommit) -> Result<(), PostFailure> {
        let slot = self.element(cookie).value_slot.expect("registered element has a slot");
        let previous = self.values().slot(slot).word(0);
        let has_history = self.values().slot(slot).generation() > 0;

        if previous == value && has_history {
            return Ok(());
        }

        self.values_mut().slot_mut(slot).mutate(|words, _, _| words[0] = value);
        self.element_mut(cookie).transaction_state = TransactionState::Pending;

        match commit.post_element_values(&[cookie]) {
            Ok(()) => {
                self.element_mut(cookie).previous_value = previous;
                Ok(())
            }
            Err(status) => {
                log::error!("post_element_values failed for {cookie:?}: {status}");
                self.values_mut().slot_mut(slot).mutate(|words, _, _| words[0] = previous);
                Err(PostFailure { status })
            }
        }
    }

    /// `setDataValue(bytes)` from §6: the multi-word counterpart of
    /// [`Self::set_value`], reading up to `report_bits * report_count`
    /// bits out of `bytes` (shorter inputs leave the remaining bits
    /// untouched, matching `setDataBits`'s `min(len*8, field_bits)`).
    pub fn set_data_value(&mut self, cookie: Cookie, bytes: &[u8], commit: &mut dyn ElementValueCommit) -> Result<(), PostFailure> {
        let slot = self.element(cookie).value_slot.expect("registered element has a slot");
        let field_bits = self.element(cookie).field_bits().unwrap_or(0);
        let bits_to_copy = field_bits.min((bytes.len() as u32).saturating_mul(8));

        let previous_words = self.values().slot(slot).snapshot().words;
        let mut new_words = previous_words.clone();
        read_bits(bytes, &mut new_words, bits_to_copy, 0, false);

        self.values_mut().slot_mut(slot).mutate(|words, _, _| *words = new_words);
        self.element_mut(cookie).transaction_state = TransactionState::Pending;

        match commit.post_element_values(&[cookie]) {
            Ok(()) => {
                self.element_mut(cookie).previous_value = previous_words[0];
                Ok(())
            }
            Err(status) => {
                log::error!("post_element_values failed for {cookie:?}: {status}");
                self.values_mut().slot_mut(slot).mutate(|words, _, _| *words = previous_words);
                Err(PostFailure { status })
            }
        }
    }

    #[cfg(test)]
    pub fn set_max_children_for_test(&mut self, max_children: usize) {
        self.max_children = max_children;
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::descriptor::{CollectionNode, ReportType};

    fn simple_keyboard_records() -> Vec<DescriptorRecord> {
        vec![
            DescriptorRecord::Collection(CollectionNode {
                usage_page: crate::usage::PAGE_GENERIC_DESKTOP,
                usage: 0x06,
                collection_type: CollectionType::Application,
            }),
            DescriptorRecord::Button(ButtonCap {
                report_type: ReportType::Input,
                bit_field: MainFlags::VARIABLE,
                start_bit: 8,
                report_id: 1,
                usage_page: PAGE_KEYBOARD,
                is_range: true,
                usage_min: 0xE0,
                usage_max: 0xE7,
                report_bits: 1,
                report_count: 1,
                logical_min: 0,
                logical_max: 1,
            }),
            DescriptorRecord::Button(ButtonCap {
                report_type: ReportType::Input,
                bit_field: MainFlags::ARRAY,
                start_bit: 16,
                report_id: 1,
                usage_page: PAGE_KEYBOARD,
                is_range: true,
                usage_min: 0,
                usage_max: 0xFF,
                report_bits: 8,
                report_count: 6,
                logical_min: 0,
                logical_max: 0xFF,
            }),
            DescriptorRecord::EndCollection,
        ]
    }

    #[test]
    fn builds_keyboard_tree() {
        let tree = TreeBuilder::build(&simple_keyboard_records()).expect("build succeeds");
        assert!(tree.len() > 1);
        assert!(tree.report_chain_head(1).is_some());
    }

    #[test]
    fn modifier_buttons_spawn_eight_siblings() {
        let tree = TreeBuilder::build(&simple_keyboard_records()).expect("build succeeds");
        let modifiers = tree
            .elements
            .iter()
            .filter(|e| {
                e.array_report_handler.is_none()
                    && e.usage_page == PAGE_KEYBOARD
                    && (0xE0..=0xE7).contains(&e.usage_min)
                    && e.usage_min == e.usage_max
            })
            .count();
        assert_eq!(modifiers, 8);
    }

    #[test]
    fn array_handler_allocates_item_per_usage() {
        let tree = TreeBuilder::build(&simple_keyboard_records()).expect("build succeeds");
        let handler = tree.elements.iter().find(|e| e.is_array_handler()).expect("handler exists");
        assert_eq!(handler.array_items.len(), 256);
        let dup_handler = tree.elements.iter().find(|e| e.is_duplicate_handler());
        assert!(dup_handler.is_some(), "report_count==6 spawns a duplicate handler");
        assert_eq!(dup_handler.unwrap().duplicate_elements.len(), 6);
    }

    #[test]
    fn unterminated_collection_is_an_error() {
        let mut records = simple_keyboard_records();
        records.pop();
        let result = TreeBuilder::build(&records);
        assert!(result.is_err());
    }
}
