pub mod clustering;
pub mod copy_move;
pub mod neighbor_regression;
pub mod resampling_detection;
pub mod spectrum;
