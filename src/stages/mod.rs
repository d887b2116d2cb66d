pub mod chimera;
pub mod denoise;
pub mod filter;
pub mod merge;

pub use chimera::ChimeraStage;
pub use denoise::DenoiseStage;
pub use filter::FilterStage;
pub use merge::MergeStage;
