pub mod ask;
pub mod onboard;
pub mod pricing;
