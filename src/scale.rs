//! Logical ↔ physical ↔ calibrated value mapping (§4.7).
//!
//! All arithmetic runs in `i64` and is truncated toward zero only at the
//! final cast back to `i32`, matching the specification's "64-bit signed
//! intermediates" rule.

use crate::element::{Calibration, Element};

/// Which mapping `scaled_value`/`scaled_fixed_value` should apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleMode {
    /// Map through `element.calibration`, clamping to the saturation
    /// range and collapsing the deadzone to the calibrated midpoint.
    Calibrated,
    /// Linearly map `[logical_min, logical_max]` to
    /// `[physical_min, physical_max]`.
    Physical,
}

/// Options affecting [`scaled_fixed_value`]; currently only whether the
/// unit exponent should be applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FixedValueOptions {
    pub apply_exponent: bool,
}

fn decode_exponent_nibble(nibble: u8) -> i32 {
    let n = (nibble & 0x0F) as i32;
    if n >= 8 {
        n - 16
    } else {
        n
    }
}

fn lerp(value: i64, in_min: i64, in_max: i64, out_min: i64, out_max: i64) -> i64 {
    if in_max == in_min {
        return out_min;
    }
    (value - in_min) * (out_max - out_min) / (in_max - in_min) + out_min
}

fn scaled_calibrated(raw: i32, cal: &Calibration) -> i32 {
    let raw = raw as i64;
    if raw >= cal.dz_min as i64 && raw <= cal.dz_max as i64 {
        return ((cal.min as i64 + cal.max as i64) / 2) as i32;
    }
    let clamped = raw.clamp(cal.sat_min as i64, cal.sat_max as i64);
    lerp(clamped, cal.sat_min as i64, cal.sat_max as i64, cal.min as i64, cal.max as i64) as i32
}

fn scaled_physical(raw: i32, element: &Element) -> i32 {
    lerp(
        raw as i64,
        element.logical_min as i64,
        element.logical_max as i64,
        element.physical_min as i64,
        element.physical_max as i64,
    ) as i32
}

/// `scaled_value(Calibrated | Physical)` from §4.7.
pub fn scaled_value(element: &Element, raw: i32, mode: ScaleMode) -> i32 {
    match mode {
        ScaleMode::Calibrated => scaled_calibrated(raw, &element.calibration),
        ScaleMode::Physical => scaled_physical(raw, element),
    }
}

/// `scaled_fixed_value(Exponent)` from §4.7 — as `scaled_value`, further
/// multiplied by `10^unit_exponent` when `options.apply_exponent`.
pub fn scaled_fixed_value(element: &Element, raw: i32, mode: ScaleMode, options: FixedValueOptions) -> i64 {
    let scaled = scaled_value(element, raw, mode) as i64;
    if !options.apply_exponent {
        return scaled;
    }
    let exponent = decode_exponent_nibble(element.unit_exponent);
    if exponent >= 0 {
        scaled * 10i64.pow(exponent as u32)
    } else {
        scaled / 10i64.pow((-exponent) as u32)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::element::{Cookie, ElementKind, ElementType, TransactionState};
    use crate::descriptor::MainFlags;

    fn test_element() -> Element {
        Element {
            cookie: Cookie(1),
            kind: ElementKind::Value,
            element_type: ElementType::Input,
            collection_type: None,
            usage_page: 0,
            usage_min: 0,
            usage_max: 0,
            range_index: 0,
            report_id: 0,
            report_start_bit: 0,
            report_bits: 8,
            report_count: 1,
            raw_report_count: 1,
            current_report_size_bits: 8,
            flags: MainFlags::VARIABLE,
            logical_min: 0,
            logical_max: 255,
            physical_min: 0,
            physical_max: 100,
            units: 0,
            unit_exponent: 0,
            calibration: Calibration { min: -1000, max: 1000, sat_min: 0, sat_max: 255, dz_min: 120, dz_max: 135, gran: 0 },
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
        }
    }

    #[test]
    fn physical_scaling_linear() {
        let e = test_element();
        assert_eq!(scaled_value(&e, 0, ScaleMode::Physical), 0);
        assert_eq!(scaled_value(&e, 255, ScaleMode::Physical), 100);
    }

    #[test]
    fn calibrated_clamps_outside_saturation() {
        let e = test_element();
        assert_eq!(scaled_value(&e, -5, ScaleMode::Calibrated), scaled_value(&e, 0, ScaleMode::Calibrated));
    }

    #[test]
    fn calibrated_deadzone_collapses_to_midpoint() {
        let e = test_element();
        assert_eq!(scaled_value(&e, 127, ScaleMode::Calibrated), 0);
    }

    #[test]
    fn fixed_value_applies_exponent() {
        let mut e = test_element();
        e.unit_exponent = 0x02; // +2
        let v = scaled_fixed_value(&e, 0, ScaleMode::Physical, FixedValueOptions { apply_exponent: true });
        assert_eq!(v, 0);
        e.logical_max = 255;
        e.physical_max = 10;
        let v = scaled_fixed_value(&e, 255, ScaleMode::Physical, FixedValueOptions { apply_exponent: true });
        assert_eq!(v, 1000);
    }
}
