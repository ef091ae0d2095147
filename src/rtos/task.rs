/// Dispatch order: higher priorities run first within a pass
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum TaskPriority {
    Low = 0,
    Normal = 1,
    High = 2,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TaskState {
    /// Done for now, next run one period later
    Ready,
    Running,
    /// Has pending work, run again on the next pass
    Blocked,
    /// Not dispatched until resumed
    Suspended,
}

/// Cooperative task: `run` must return promptly, keeping its progress in
/// `self` between calls
pub trait Task {
    fn name(&self) -> &'static str;

    fn run(&mut self, now: u32) -> TaskState;
}
