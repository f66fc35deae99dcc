pub mod resource;
pub mod stat;

pub use resource::*;
pub use stat::*;
