#![doc = env!("CARGO_PKG_DESCRIPTION")]

#[doc(inline)]
pub use cisreg_3d as geometry;

#[doc(inline)]
pub use cisreg_icp as icp;
