//! DAB constants, labels, and the ensemble data model

pub mod charset;
pub mod constants;
pub mod crc;
pub mod label;
pub mod types;

pub use charset::Charset;
pub use constants::DabParams;
pub use label::DabLabel;
pub use types::{
    AudioType, ComponentInfo, EepProfile, Ensemble, EnsembleInfo, ProtectionSettings, Service,
    ServiceComponent, ServiceInfo, Subchannel, TransportMode, SERVICE_ID_UNKNOWN,
};
