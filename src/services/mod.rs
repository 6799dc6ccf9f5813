pub mod archiver;
pub mod conversion_service;
pub mod converter;
pub mod retention;
pub mod staging;
pub mod worker;
