pub mod envelope;
pub mod validation;
