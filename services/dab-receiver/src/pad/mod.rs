//! Programme associated data: dynamic labels and MOT slideshows

pub mod dynamic_label;
pub mod mot;
pub mod pad_decoder;

pub use dynamic_label::DynamicLabelDecoder;
pub use mot::{MotDecoder, MotFile};
pub use pad_decoder::{dse_pad, PadDecoder};
