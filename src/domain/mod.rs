pub mod canonical;
pub mod cap;
pub mod geo;
