pub mod check;
pub mod records;
