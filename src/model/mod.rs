pub mod api;
pub mod mongodb;
pub mod otp;
pub mod subject;
