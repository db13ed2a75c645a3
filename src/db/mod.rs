pub mod batch;
pub mod pool;
pub mod table_meta;

pub use batch::*;
pub use pool::*;
pub use table_meta::*;
