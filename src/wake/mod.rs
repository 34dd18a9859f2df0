//! # Wake Word Engine
//!
//! Everything between "a keyword name" and "a scored audio window":
//!
//! - **settings**: built-in and operator keyword overrides
//! - **registry**: model discovery and keyword resolution
//! - **detector**: the detector traits and the always-available energy backend
//! - **info**: the capability report
//! - **snowboy**: Snowboy FFI backend (`snowboy` feature only)

pub mod detector;
pub mod info;
pub mod registry;
pub mod settings;

#[cfg(feature = "snowboy")]
pub mod snowboy;

