#![no_std]

pub mod fs;
pub mod mm;
