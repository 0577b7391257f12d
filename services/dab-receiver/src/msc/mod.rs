//! Main Service Channel: sub-channel decoding and audio framing

pub mod audio;
pub mod mp2;
pub mod msc_handler;
pub mod subchannel;
pub mod superframe;

pub use audio::{AccessUnit, AudioCodec, AudioFormat, DecodedAudio};
pub use msc_handler::{MscHandler, Subscriptions};
pub use subchannel::{LogicalFrame, SubchannelDecoder};
pub use superframe::{Superframe, SuperframeAssembler, SuperframeHeader, SuperframeOutput};
