//! Process listing for debugging (spec §4.7 "dump").

use super::table::TaskTable;
use super::task::TaskState;

/// Logs one line per non-`UNUSED` task slot: pid, state, and name. Tries
/// the global lock rather than blocking on it, so a dump requested while
/// the table is wedged elsewhere still prints a warning instead of hanging
/// (the teacher's `procdump` reads `ptable` with no lock at all for the
/// same reason; a safe `Spinlock<T>` has no way to read `T` without going
/// through the lock, so `try_lock` is the closest equivalent here).
/// Callers should treat its output as best-effort.
pub fn dump(table: &TaskTable) {
    log::info!("task dump:");
    let Some(guard) = table.try_lock() else {
        log::warn!("task dump: table lock held elsewhere, skipping");
        return;
    };
    for task in guard.tasks.iter() {
        if task.state == TaskState::Unused {
            continue;
        }
        let pid = task.pid.map(|p| p.get()).unwrap_or(0);
        let kind = if task.is_thread() { "thread" } else { "process" };
        log::info!(
            "  {pid:>5} {:<10} {kind:<8} {}",
            task.state.name(),
            task.name.as_str()
        );
        if task.state == TaskState::Sleeping {
            // Best-effort only (spec §4.7): walking the actual kernel-stack
            // frame chain needs the arch/trap glue this crate treats as an
            // external collaborator (§1), so this reports the raw saved
            // resume address and frame pointer rather than a symbolized
            // trace.
            log::info!(
                "        sleeping at ra={:#x} fp={:#x}",
                task.context.ra, task.context.s0
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proc::task::TaskState as S;

    #[test]
    fn dump_skips_unused_slots_without_panicking() {
        let table = TaskTable::new();
        {
            let mut guard = table.lock();
            let (index, _pid) = guard.allocate_slot().unwrap();
            guard.get_mut(index).state = S::Runnable;
        }
        dump(&table);
    }
}
