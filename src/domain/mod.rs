pub mod notification;
pub mod records;
pub mod source;
