//! Shared message model and store row format for `convsync`.

pub mod message;
pub mod page;
pub mod row;
