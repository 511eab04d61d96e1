pub mod resolve;
pub mod semaphore;

pub use resolve::{resolve, Family, ResolveError, ResolvedAddress};
pub use semaphore::Semaphore;
