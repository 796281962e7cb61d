pub mod countdown;
pub mod model;
pub mod resolver;
