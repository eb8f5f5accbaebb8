//! Shared EAP-SIM/AKA machinery
//!
//! Attribute TLV codec, subtype framing, and key derivation used by the
//! EAP-SIM, EAP-AKA and EAP-AKA' method state machines.

pub mod attribute;
pub mod keys;
pub mod typedata;

pub use attribute::EapSimAkaAttribute;
pub use keys::EapSimAkaKeys;
pub use typedata::EapSimAkaTypeData;
