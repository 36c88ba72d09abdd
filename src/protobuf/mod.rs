//! Generated protobuf modules
//!
//! This module conditionally includes code generated from the Meshtastic protobuf
//! definitions under `protos/` when the `meshtastic-proto` feature is enabled.

#[cfg(feature = "meshtastic-proto")]
pub mod meshtastic_generated {
    //! Generated Meshtastic protobuf types.
    //! prost emits one file per package (meshtastic.rs); the decoder only reads a
    //! handful of the fields, so the usual dead-code lints are relaxed here.
    #[allow(dead_code, unused_imports, clippy::all)]
    #[allow(rustdoc::invalid_html_tags)]
    mod inner {
        include!(concat!(env!("OUT_DIR"), "/meshtastic.rs"));
    }
    pub use inner::*;
}
