//! Cooperative priority scheduler

use crate::os::{elapsed_ms, Clock};
use super::task::{Task, TaskPriority, TaskState};

const PRIORITIES: [TaskPriority; 3] = [TaskPriority::High, TaskPriority::Normal, TaskPriority::Low];

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TaskId(u8);

struct Slot<'t> {
    task: &'t mut dyn Task,
    priority: TaskPriority,
    period_ms: u32,
    next_run: u32,
    state: TaskState,
}

impl Slot<'_> {
    fn is_due(&self, now: u32) -> bool {
        // next_run may lie up to half the counter range in the past
        (now.wrapping_sub(self.next_run) as i32) >= 0
    }
}

pub struct Scheduler<'t, const N: usize> {
    tasks: [Option<Slot<'t>>; N],
    task_count: usize,
}

impl<'t, const N: usize> Scheduler<'t, N> {
    pub fn new() -> Self {
        Self {
            tasks: core::array::from_fn(|_| None),
            task_count: 0,
        }
    }

    /// Registers a task, first run at `now`. `period_ms` 0 runs it every pass.
    pub fn add_task(
        &mut self,
        task: &'t mut dyn Task,
        priority: TaskPriority,
        period_ms: u32,
        now: u32,
    ) -> Option<TaskId> {
        let index = self.tasks.iter().position(Option::is_none)?;
        log::debug!("task {} added at {:?}", task.name(), priority);
        self.tasks[index] = Some(Slot {
            task,
            priority,
            period_ms,
            next_run: now,
            state: TaskState::Ready,
        });
        self.task_count += 1;
        Some(TaskId(index as u8))
    }

    pub fn remove_task(&mut self, id: TaskId) -> bool {
        match self.tasks.get_mut(id.0 as usize) {
            Some(slot @ Some(_)) => {
                *slot = None;
                self.task_count -= 1;
                true
            }
            _ => false,
        }
    }

    pub fn suspend(&mut self, id: TaskId) {
        if let Some(Some(slot)) = self.tasks.get_mut(id.0 as usize) {
            slot.state = TaskState::Suspended;
        }
    }

    pub fn resume(&mut self, id: TaskId, now: u32) {
        if let Some(Some(slot)) = self.tasks.get_mut(id.0 as usize) {
            if slot.state == TaskState::Suspended {
                slot.state = TaskState::Ready;
                slot.next_run = now;
            }
        }
    }

    pub fn state(&self, id: TaskId) -> Option<TaskState> {
        self.tasks.get(id.0 as usize)?.as_ref().map(|slot| slot.state)
    }

    pub fn task_count(&self) -> usize {
        self.task_count
    }

    /// One dispatch pass: every due task once, highest priority first.
    /// Returns how many tasks ran.
    pub fn run_pending(&mut self, now: u32) -> usize {
        let mut ran = 0;
        for priority in PRIORITIES {
            for slot in self.tasks.iter_mut().flatten() {
                if slot.priority != priority
                    || slot.state == TaskState::Suspended
                    || !slot.is_due(now)
                {
                    continue;
                }

                slot.state = TaskState::Running;
                let new_state = slot.task.run(now);
                slot.state = new_state;
                ran += 1;

                match new_state {
                    TaskState::Ready | TaskState::Running => {
                        let next_run = slot.next_run.wrapping_add(slot.period_ms);
                        slot.next_run = if elapsed_ms(next_run, now) as i32 > 0 {
                            next_run
                        } else {
                            now.wrapping_add(slot.period_ms)
                        };
                        slot.state = TaskState::Ready;
                    }
                    TaskState::Blocked => slot.next_run = now,
                    TaskState::Suspended => {}
                }
            }
        }
        ran
    }

    /// Dispatches forever; `idle` runs after every pass
    pub fn run<C: Clock>(&mut self, clock: &C, mut idle: impl FnMut()) -> ! {
        loop {
            self.run_pending(clock.now_ms());
            idle();
        }
    }
}

impl<const N: usize> Default for Scheduler<'_, N> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    struct Recorder {
        name: &'static str,
        log: Rc<RefCell<Vec<(&'static str, u32)>>>,
        reply: TaskState,
    }

    impl Task for Recorder {
        fn name(&self) -> &'static str {
            self.name
        }

        fn run(&mut self, now: u32) -> TaskState {
            self.log.borrow_mut().push((self.name, now));
            self.reply
        }
    }

    fn recorder(name: &'static str, log: &Rc<RefCell<Vec<(&'static str, u32)>>>) -> Recorder {
        Recorder { name, log: log.clone(), reply: TaskState::Ready }
    }

    #[test]
    fn higher_priority_runs_first() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let (mut low, mut high, mut normal) = (recorder("low", &log), recorder("high", &log), recorder("normal", &log));
        let mut scheduler: Scheduler<'_, 4> = Scheduler::new();
        scheduler.add_task(&mut low, TaskPriority::Low, 0, 0).unwrap();
        scheduler.add_task(&mut high, TaskPriority::High, 0, 0).unwrap();
        scheduler.add_task(&mut normal, TaskPriority::Normal, 0, 0).unwrap();

        assert_eq!(scheduler.run_pending(0), 3);
        let order: Vec<_> = log.borrow().iter().map(|(name, _)| *name).collect();
        assert_eq!(order, vec!["high", "normal", "low"]);
    }

    #[test]
    fn periods_are_kept() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut monitor = recorder("monitor", &log);
        let mut scheduler: Scheduler<'_, 2> = Scheduler::new();
        scheduler.add_task(&mut monitor, TaskPriority::Low, 500, 0).unwrap();

        for now in 0..1600 {
            scheduler.run_pending(now);
        }
        let times: Vec<_> = log.borrow().iter().map(|(_, t)| *t).collect();
        assert_eq!(times, vec![0, 500, 1000, 1500]);
    }

    #[test]
    fn late_dispatch_does_not_burst() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut task = recorder("t", &log);
        let mut scheduler: Scheduler<'_, 1> = Scheduler::new();
        scheduler.add_task(&mut task, TaskPriority::Normal, 10, 0).unwrap();
        scheduler.run_pending(0);
        scheduler.run_pending(95);
        scheduler.run_pending(100);
        scheduler.run_pending(105);
        let times: Vec<_> = log.borrow().iter().map(|(_, t)| *t).collect();
        assert_eq!(times, vec![0, 95, 105]);
    }

    #[test]
    fn table_full_and_removal() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let (mut a, mut b, mut c) = (recorder("a", &log), recorder("b", &log), recorder("c", &log));
        let mut scheduler: Scheduler<'_, 2> = Scheduler::new();
        let id_a = scheduler.add_task(&mut a, TaskPriority::Normal, 0, 0).unwrap();
        scheduler.add_task(&mut b, TaskPriority::Normal, 0, 0).unwrap();
        assert!(scheduler.remove_task(id_a));
        assert!(!scheduler.remove_task(id_a));
        assert!(scheduler.add_task(&mut c, TaskPriority::Normal, 0, 0).is_some());
        assert_eq!(scheduler.task_count(), 2);
    }

    #[test]
    fn suspended_tasks_are_skipped() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut task = recorder("t", &log);
        let mut scheduler: Scheduler<'_, 1> = Scheduler::new();
        let id = scheduler.add_task(&mut task, TaskPriority::High, 0, 0).unwrap();
        scheduler.suspend(id);
        assert_eq!(scheduler.run_pending(1), 0);
        scheduler.resume(id, 2);
        assert_eq!(scheduler.run_pending(2), 1);
        assert_eq!(scheduler.state(id), Some(TaskState::Ready));
    }

    #[test]
    fn due_check_survives_wrap() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut task = recorder("t", &log);
        let mut scheduler: Scheduler<'_, 1> = Scheduler::new();
        scheduler.add_task(&mut task, TaskPriority::High, 10, u32::MAX - 4).unwrap();
        scheduler.run_pending(u32::MAX - 4);
        assert_eq!(scheduler.run_pending(2), 0);
        assert_eq!(scheduler.run_pending(5), 1);
    }
}
