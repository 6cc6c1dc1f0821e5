mod dfs;
pub mod error;
pub mod plugins;
mod validate;
pub mod vertex;
