pub mod app;
pub mod config;
pub mod core;
pub mod game;

pub use game::chart::{ChartData, ChartError, ChartFile, KeyMode};
pub use game::gameplay::{FrameReport, Session, SessionError, SessionOptions, SessionPhase, SessionSetup, SessionSignal};
pub use game::stage_stats::SessionResult;
