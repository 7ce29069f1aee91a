pub mod scripted;
pub mod stub;

pub use scripted::ScriptedTracker;
pub use stub::StubTracker;
