#![forbid(unsafe_code)]

mod config;
mod ddl;
mod engine;
mod error;
mod ident;
mod mutator;
mod record;
mod types;

pub use config::*;
pub use ddl::*;
pub use engine::*;
pub use error::*;
pub use ident::*;
pub use mutator::*;
pub use record::*;
pub use types::*;
