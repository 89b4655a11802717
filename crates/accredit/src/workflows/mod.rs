pub mod access;
pub mod accreditation;
