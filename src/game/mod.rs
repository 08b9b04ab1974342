pub mod autoplay;
pub mod chart;
pub mod gameplay;
pub mod judge;
pub mod judgment;
pub mod note;
pub mod scores;
pub mod stage_stats;
pub mod timing;
pub mod timing_windows;
pub mod tracker;
