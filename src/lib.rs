//! HID report descriptor element tree and bit-exact report codec.
//!
//! Consumes the read-only capability/collection records a descriptor
//! parser would produce ([`descriptor`]), builds a tree of typed
//! elements ([`tree`], [`element`]), and projects inbound/outbound
//! reports onto that tree's bit ranges ([`report`], [`bitcodec`]).
//! Everything upstream of the parsed descriptor (USB/Bluetooth
//! transport, descriptor tokenizing, IPC framing, a GUI) is out of
//! scope — see each module's own doc comment for its slice of the
//! design.

pub mod bitcodec;
pub mod commit;
pub mod descriptor;
pub mod element;
pub mod error;
pub mod properties;
pub mod queue;
pub mod report;
pub mod scale;
pub mod tree;
pub mod usage;
pub mod value;

pub use commit::{ElementValueCommit, NullCommit};
pub use element::{Cookie, Element, ElementKind, ElementType};
pub use error::{BuildError, PostFailure, ReportSkip};
pub use properties::{element_properties, match_properties, PropertyMap, PropertyValue};
pub use queue::{QueueOptions, ReportQueue};
pub use report::{create_report, process_report, ProcessOptions};
pub use scale::{scaled_fixed_value, scaled_value, FixedValueOptions, ScaleMode};
pub use tree::{ElementTree, GetValueOptions, TreeBuilder};
