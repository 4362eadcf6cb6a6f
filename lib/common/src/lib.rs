#![no_std]

extern crate alloc;

pub mod atomicflags;

#[doc(hidden)]
pub use paste;
