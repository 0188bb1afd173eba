//! The polymorphic tree node: collection, value, button, array-handler,
//! duplicate-handler, interrupt-handler, or null element.
//!
//! Modeled as a tagged struct (`ElementKind` discriminant) rather than a
//! trait-object hierarchy: per the design notes, the kinds share nearly
//! all fields and differ only in how `report.rs` dispatches on them, so
//! a `match` on the tag is a better fit than dynamic dispatch.

use crate::descriptor::{CollectionType, MainFlags, ReportType};

/// Stable, dense, opaque identifier for one element within a tree.
/// `Cookie(0)` is reserved for the root collection (invariant 7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Cookie(pub u32);

impl Cookie {
    pub const ROOT: Cookie = Cookie(0);

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// `type` field in the specification: which report this element's bits
/// belong to, or `Collection`/`InputNull` for the non-bit-bearing kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementType {
    Input,
    Output,
    Feature,
    Collection,
    InputNull,
}

impl From<ReportType> for ElementType {
    fn from(rt: ReportType) -> Self {
        match rt {
            ReportType::Input => Self::Input,
            ReportType::Output => Self::Output,
            ReportType::Feature => Self::Feature,
        }
    }
}

/// The specific role this element plays beyond its `ElementType`, used
/// to pick the `process_report`/`create_report` dispatch path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementKind {
    Collection,
    /// A button, whether a plain 1-bit control, one of the synthetic
    /// per-usage selector items owned by an `ArrayHandler`'s
    /// `array_items`, or one of a `DuplicateHandler`'s raw-reading
    /// slots. Which role a given `Button` plays is read off
    /// `array_report_handler`/`duplicate_report_handler` rather than a
    /// separate kind tag, matching the 7-way element taxonomy in the
    /// design notes.
    Button,
    Value,
    /// The report-bearing element for a group of array-selector members.
    ArrayHandler,
    /// The report-bearing element owning several raw-reading selector
    /// slots (an array handler whose `report_count > 1`).
    DuplicateHandler,
    Interrupt,
    Null,
}

/// Saturation/deadzone calibration, consumed by [`crate::scale`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Calibration {
    pub min: i32,
    pub max: i32,
    pub sat_min: i32,
    pub sat_max: i32,
    pub dz_min: i32,
    pub dz_max: i32,
    pub gran: i32,
}

/// Per-element host-write bookkeeping: has a `set_value`/`set_data_value`
/// call arrived that `create_report` has not yet packed?
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Idle,
    Pending,
}

/// One node of the element tree.
///
/// Ownership (see design notes): `children`, `array_items`, and
/// `duplicate_elements` are the only *owning* edges, and even those are
/// just `Vec<Cookie>` index lists into the tree's single arena — no
/// element owns another element directly. Every other pointer-like field
/// (`parent`, `next_report_handler`, `array_report_handler`,
/// `duplicate_report_handler`, `roll_over_element`) is a plain,
/// non-owning `Option<Cookie>`.
#[derive(Debug, Clone)]
pub struct Element {
    pub cookie: Cookie,
    pub kind: ElementKind,
    pub element_type: ElementType,
    pub collection_type: Option<CollectionType>,
    pub usage_page: u16,
    pub usage_min: u32,
    pub usage_max: u32,
    pub range_index: u32,

    pub report_id: u8,
    pub report_start_bit: u32,
    pub report_bits: u32,
    pub report_count: u32,
    pub raw_report_count: u32,
    pub current_report_size_bits: u32,
    pub flags: MainFlags,

    pub logical_min: i32,
    pub logical_max: i32,
    pub physical_min: i32,
    pub physical_max: i32,
    pub units: u32,
    pub unit_exponent: u8,
    pub calibration: Calibration,

    pub parent: Option<Cookie>,
    pub children: Vec<Cookie>,
    pub next_report_handler: Option<Cookie>,
    pub array_report_handler: Option<Cookie>,
    pub duplicate_report_handler: Option<Cookie>,
    pub array_items: Vec<Cookie>,
    pub duplicate_elements: Vec<Cookie>,
    pub roll_over_element: Option<Cookie>,

    /// Offset into the [`crate::value::ElementValueStore`] arena this
    /// element's slot lives at, assigned once the tree finishes
    /// building (§4.4 step 6). `None` until then.
    pub value_slot: Option<usize>,
    pub previous_value: u32,
    pub transaction_state: TransactionState,
    /// Scratch buffer an array handler uses to diff consecutive reports;
    /// empty on every other kind.
    pub old_array_selectors: Vec<u32>,
}

impl Element {
    /// `usage(e)` from §4.3: a ranged element's effective usage is
    /// `usage_min + range_index`; a non-ranged element's is just
    /// `usage_min` (which equals `usage_max`).
    pub fn usage(&self) -> u32 {
        if self.usage_max == self.usage_min {
            self.usage_min
        } else {
            self.usage_min + self.range_index
        }
    }

    pub fn is_array(&self) -> bool {
        self.flags.contains(MainFlags::ARRAY)
    }

    /// Per §4.3: an element is the array handler for its group iff its
    /// own `array_report_handler` points at itself.
    pub fn is_array_handler(&self) -> bool {
        self.array_report_handler == Some(self.cookie)
    }

    /// Analogous self-pointing check on `duplicate_report_handler`.
    pub fn is_duplicate_handler(&self) -> bool {
        self.duplicate_report_handler == Some(self.cookie)
    }

    pub fn is_variable_size(&self) -> bool {
        self.flags.contains(MainFlags::BUFFERED_BYTE)
    }

    pub fn is_relative(&self) -> bool {
        self.flags.contains(MainFlags::RELATIVE)
    }

    /// `range_count(e)` from §4.3.
    pub fn range_count(&self) -> u32 {
        if self.report_count > 1 {
            self.report_count
        } else {
            self.usage_max.saturating_sub(self.usage_min) + 1
        }
    }

    pub fn field_bits(&self) -> Option<u32> {
        self.report_bits.checked_mul(self.report_count)
    }

    pub fn sign_extend(&self) -> bool {
        self.logical_min < 0 || self.logical_max < 0
    }
}
