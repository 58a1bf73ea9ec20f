//! Startup steps that run before any controller

mod crds;

pub use crds::CrdRegistry;
