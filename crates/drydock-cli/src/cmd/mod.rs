pub mod facts;
pub mod lifecycle;
pub mod render;
pub mod schema;
pub mod validate;
