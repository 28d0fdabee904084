pub mod candidate;
pub mod download;
pub mod track;
pub mod verification;
pub mod wishlist;

pub use candidate::*;
pub use download::*;
pub use track::*;
pub use verification::*;
pub use wishlist::*;
