#![doc = include_str!("../README.md")]

mod error;
pub mod protocol;
pub mod storage;

pub use error::{Error, Result};
