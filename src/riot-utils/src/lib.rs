#![cfg_attr(not(test), no_std)]

#[doc(hidden)]
pub mod env;
