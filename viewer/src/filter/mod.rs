pub mod bilateral;
pub mod traits;

pub use bilateral::FastBilateralFilter;
pub use traits::PostFilter;
