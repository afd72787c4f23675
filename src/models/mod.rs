pub mod cache;
pub mod envelope;
pub mod memory;
pub mod result_table;
pub mod schema;
pub mod session;
pub mod turn;

pub use cache::*;
pub use envelope::*;
pub use memory::*;
pub use result_table::*;
pub use schema::*;
pub use session::*;
pub use turn::*;
