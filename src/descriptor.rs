//! Read-only records produced by the (external, out-of-scope) HID report
//! descriptor parser. [`crate::tree::TreeBuilder`] consumes these; nothing
//! in this module parses raw descriptor bytes.

use bitflags::bitflags;

bitflags! {
    /// Main-item flags as packed into a descriptor's `bit_field` byte.
    /// Bit positions follow the HID 1.11 spec's Input/Output/Feature item
    /// layout.
    #[derive(Default)]
    pub struct MainFlags: u16 {
        const CONSTANT      = 1 << 0;
        const VARIABLE      = 1 << 1;
        const RELATIVE      = 1 << 2;
        const WRAP          = 1 << 3;
        const NON_LINEAR    = 1 << 4;
        const NO_PREFERRED  = 1 << 5;
        const NULL_STATE    = 1 << 6;
        const VOLATILE      = 1 << 7;
        const BUFFERED_BYTE = 1 << 8;
        /// Not a real HID bit — set by the builder once it determines an
        /// element is an array selector (absence of `VARIABLE`).
        const ARRAY         = 1 << 9;
    }
}

/// Which report this element's bits live in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReportType {
    Input,
    Output,
    Feature,
}

/// A button (one-bit-per-usage, or array-selector) capability record.
#[derive(Debug, Clone)]
pub struct ButtonCap {
    pub report_type: ReportType,
    pub bit_field: MainFlags,
    pub start_bit: u32,
    pub report_id: u8,
    pub usage_page: u16,
    pub is_range: bool,
    pub usage_min: u32,
    pub usage_max: u32,
    /// Only meaningful when `bit_field` has `ARRAY` set: array selectors
    /// are packed `report_bits` wide, `report_count` deep, using the
    /// same reserved descriptor fields a plain value item would.
    pub report_bits: u32,
    pub report_count: u32,
    pub logical_min: i32,
    pub logical_max: i32,
}

/// A value (multi-bit) capability record.
#[derive(Debug, Clone)]
pub struct ValueCap {
    pub report_type: ReportType,
    pub bit_field: MainFlags,
    pub bit_size: u32,
    pub report_count: u32,
    pub start_bit: u32,
    pub report_id: u8,
    pub usage_page: u16,
    pub logical_min: i32,
    pub logical_max: i32,
    pub physical_min: i32,
    pub physical_max: i32,
    pub units: u32,
    pub unit_exponent: u8,
    pub is_range: bool,
    pub usage_min: u32,
    pub usage_max: u32,
}

/// Collection grouping semantics, mirrors `kHIDCollectionType*`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CollectionType {
    Physical,
    Application,
    Logical,
    Report,
    NamedArray,
    UsageSwitch,
    UsageModifier,
}

/// A collection open/close record from the descriptor.
#[derive(Debug, Clone)]
pub struct CollectionNode {
    pub usage_page: u16,
    pub usage: u32,
    pub collection_type: CollectionType,
}

/// One parsed descriptor record, in descriptor order. The builder walks a
/// `&[DescriptorRecord]` exactly as delivered; it never reorders or
/// deduplicates.
#[derive(Debug, Clone)]
pub enum DescriptorRecord {
    Collection(CollectionNode),
    /// Closes the innermost open `Collection`.
    EndCollection,
    Button(ButtonCap),
    Value(ValueCap),
    /// A report/type pair whose individual fields were not itemised by
    /// the parser — becomes an interrupt report handler.
    Interrupt { report_type: ReportType, report_id: u8, total_bits: u32 },
    /// A report ID with no payload fields at all, used purely to flush a
    /// timestamp (`InputNull` handler).
    Null { report_id: u8 },
}
