#![allow(dead_code)]

pub mod fakes;
pub mod harness;
pub mod scripted;

pub use fakes::*;
pub use harness::*;
pub use scripted::*;
