pub mod doctor;
pub mod gateway;
pub mod init;
