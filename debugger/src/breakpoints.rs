//! The session's breakpoint list
//!
//! Breakpoints are kept in insertion order and addressed by index. Line
//! numbers follow edits made to their file so they stay on the same source
//! line.
use std::path::Path;

use crate::types::{Breakpoint, BreakpointIndex};
use crate::utils::same_file;

/// Result of applying an edit to the breakpoint list
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct EditOutcome {
    /// Breakpoints that now sit at a different line, with their old line
    pub moved: Vec<(usize, Breakpoint)>,
    /// Breakpoints on lines that no longer exist
    pub removed: Vec<Breakpoint>,
}

impl EditOutcome {
    pub fn is_empty(&self) -> bool {
        self.moved.is_empty() && self.removed.is_empty()
    }
}

#[derive(Debug, Default, Clone)]
pub struct Breakpoints {
    items: Vec<Breakpoint>,
}

impl Breakpoints {
    pub fn new() -> Self {
        Self::default()
    }

    #[tracing::instrument(skip(self), level = "debug")]
    pub fn add(&mut self, breakpoint: Breakpoint) -> eyre::Result<BreakpointIndex> {
        eyre::ensure!(breakpoint.line > 0, "breakpoint line numbers start at 1");
        eyre::ensure!(
            !breakpoint.path.as_os_str().is_empty(),
            "breakpoint has no file"
        );
        if self.at(&breakpoint.path, breakpoint.line).is_some() {
            eyre::bail!(
                "breakpoint already set at {}:{}",
                breakpoint.path.display(),
                breakpoint.line
            );
        }
        self.items.push(breakpoint);
        Ok(self.items.len() - 1)
    }

    pub fn remove(&mut self, index: BreakpointIndex) -> Option<Breakpoint> {
        (index < self.items.len()).then(|| self.items.remove(index))
    }

    pub fn remove_at(&mut self, path: &Path, line: usize) -> Option<Breakpoint> {
        let (index, _) = self.at(path, line)?;
        self.remove(index)
    }

    pub fn set_condition(
        &mut self,
        index: BreakpointIndex,
        condition: Option<String>,
    ) -> eyre::Result<&Breakpoint> {
        let breakpoint = self.get_mut(index)?;
        breakpoint.condition = condition.filter(|c| !c.trim().is_empty());
        Ok(breakpoint)
    }

    pub fn set_enabled(&mut self, index: BreakpointIndex, enabled: bool) -> eyre::Result<&Breakpoint> {
        let breakpoint = self.get_mut(index)?;
        breakpoint.enabled = enabled;
        Ok(breakpoint)
    }

    /// Record GDB's number for the breakpoint at a location
    pub fn assign_number(&mut self, path: &Path, line: usize, number: u32) -> Option<&Breakpoint> {
        let (index, _) = self.at(path, line)?;
        let breakpoint = &mut self.items[index];
        breakpoint.number = Some(number);
        Some(breakpoint)
    }

    /// Forget GDB's number for one breakpoint, returning it
    pub fn take_number(&mut self, path: &Path, line: usize) -> Option<u32> {
        let (index, _) = self.at(path, line)?;
        self.items[index].number.take()
    }

    /// Forget GDB's numbers, e.g. when a new debugger process starts
    pub fn clear_numbers(&mut self) {
        for breakpoint in &mut self.items {
            breakpoint.number = None;
        }
    }

    pub fn get(&self, index: BreakpointIndex) -> Option<&Breakpoint> {
        self.items.get(index)
    }

    fn get_mut(&mut self, index: BreakpointIndex) -> eyre::Result<&mut Breakpoint> {
        let len = self.items.len();
        self.items
            .get_mut(index)
            .ok_or_else(|| eyre::eyre!("no breakpoint {index} (have {len})"))
    }

    pub fn at(&self, path: &Path, line: usize) -> Option<(BreakpointIndex, &Breakpoint)> {
        self.items
            .iter()
            .enumerate()
            .find(|(_, b)| b.line == line && same_file(&b.path, path))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Breakpoint> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn clear(&mut self) -> Vec<Breakpoint> {
        std::mem::take(&mut self.items)
    }

    /// Drop every breakpoint in a file
    pub fn remove_for_file(&mut self, path: &Path) -> Vec<Breakpoint> {
        let (removed, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.items)
            .into_iter()
            .partition(|b| same_file(&b.path, path));
        self.items = kept;
        removed
    }

    /// `count` lines were inserted before line `start_line`
    pub fn on_lines_inserted(&mut self, path: &Path, start_line: usize, count: usize) -> EditOutcome {
        let mut outcome = EditOutcome::default();
        if count == 0 {
            return outcome;
        }
        for breakpoint in &mut self.items {
            if breakpoint.line >= start_line && same_file(&breakpoint.path, path) {
                let old = breakpoint.line;
                breakpoint.line += count;
                outcome.moved.push((old, breakpoint.clone()));
            }
        }
        outcome
    }

    /// Lines `start_line..start_line + count` were deleted
    pub fn on_lines_deleted(&mut self, path: &Path, start_line: usize, count: usize) -> EditOutcome {
        let mut outcome = EditOutcome::default();
        if count == 0 {
            return outcome;
        }
        let end = start_line + count;
        let mut kept = Vec::with_capacity(self.items.len());
        for mut breakpoint in std::mem::take(&mut self.items) {
            if !same_file(&breakpoint.path, path) || breakpoint.line < start_line {
                kept.push(breakpoint);
            } else if breakpoint.line < end {
                outcome.removed.push(breakpoint);
            } else {
                let old = breakpoint.line;
                breakpoint.line -= count;
                outcome.moved.push((old, breakpoint.clone()));
                kept.push(breakpoint);
            }
        }
        self.items = kept;
        outcome
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::Breakpoints;
    use crate::types::Breakpoint;

    fn lines(breakpoints: &Breakpoints) -> Vec<usize> {
        breakpoints.iter().map(|b| b.line).collect()
    }

    fn with_lines(path: &str, lines: &[usize]) -> Breakpoints {
        let mut breakpoints = Breakpoints::new();
        for line in lines {
            breakpoints.add(Breakpoint::new(path, *line)).unwrap();
        }
        breakpoints
    }

    #[test]
    fn duplicates_are_rejected() {
        let mut breakpoints = with_lines("/src/main.c", &[10]);
        assert!(breakpoints.add(Breakpoint::new("/src/main.c", 10)).is_err());
        assert!(breakpoints.add(Breakpoint::new("/src/other.c", 10)).is_ok());
        assert_eq!(breakpoints.len(), 2);
    }

    #[test]
    fn invalid_locations_are_rejected() {
        let mut breakpoints = Breakpoints::new();
        assert!(breakpoints.add(Breakpoint::new("/src/main.c", 0)).is_err());
        assert!(breakpoints.add(Breakpoint::new("", 3)).is_err());
        assert!(breakpoints.is_empty());
    }

    #[test]
    fn remove_by_index_and_location() {
        let mut breakpoints = with_lines("/src/main.c", &[1, 2, 3]);
        assert_eq!(breakpoints.remove(1).map(|b| b.line), Some(2));
        assert_eq!(breakpoints.remove(7), None);
        assert_eq!(
            breakpoints.remove_at(Path::new("/src/main.c"), 3).map(|b| b.line),
            Some(3)
        );
        assert_eq!(lines(&breakpoints), vec![1]);
    }

    #[test]
    fn conditions_and_enablement() {
        let mut breakpoints = with_lines("/src/main.c", &[5]);
        breakpoints.set_condition(0, Some("i > 3".to_string())).unwrap();
        assert_eq!(breakpoints.get(0).unwrap().condition.as_deref(), Some("i > 3"));
        breakpoints.set_condition(0, Some("  ".to_string())).unwrap();
        assert_eq!(breakpoints.get(0).unwrap().condition, None);

        breakpoints.set_enabled(0, false).unwrap();
        assert!(!breakpoints.get(0).unwrap().enabled);
        assert!(breakpoints.set_enabled(3, true).is_err());
    }

    #[test]
    fn insertion_shifts_following_lines() {
        let mut breakpoints = with_lines("/src/main.c", &[4, 10, 12]);
        breakpoints.add(Breakpoint::new("/src/other.c", 10)).unwrap();

        let outcome = breakpoints.on_lines_inserted(Path::new("/src/main.c"), 10, 3);
        assert_eq!(lines(&breakpoints), vec![4, 13, 15, 10]);
        assert_eq!(outcome.moved.len(), 2);
        assert_eq!(outcome.moved[0].0, 10);
        assert!(outcome.removed.is_empty());
    }

    #[test]
    fn deletion_removes_and_shifts() {
        let mut breakpoints = with_lines("/src/main.c", &[4, 10, 11, 12, 20]);
        let outcome = breakpoints.on_lines_deleted(Path::new("/src/main.c"), 10, 2);

        assert_eq!(lines(&breakpoints), vec![4, 10, 18]);
        assert_eq!(
            outcome.removed.iter().map(|b| b.line).collect::<Vec<_>>(),
            vec![10, 11]
        );
        assert_eq!(outcome.moved.len(), 2);
    }

    #[test]
    fn zero_line_edits_are_no_ops() {
        let mut breakpoints = with_lines("/src/main.c", &[4, 10]);
        assert!(breakpoints.on_lines_inserted(Path::new("/src/main.c"), 1, 0).is_empty());
        assert!(breakpoints.on_lines_deleted(Path::new("/src/main.c"), 1, 0).is_empty());
        assert_eq!(lines(&breakpoints), vec![4, 10]);
    }

    #[test]
    fn insert_then_delete_restores_lines() {
        let original = [3, 8, 9, 30];
        let mut breakpoints = with_lines("/src/main.c", &original);
        breakpoints.on_lines_inserted(Path::new("/src/main.c"), 5, 7);
        breakpoints.on_lines_deleted(Path::new("/src/main.c"), 5, 7);
        assert_eq!(lines(&breakpoints), original.to_vec());
    }

    #[test]
    fn edits_match_normalised_paths() {
        let home = dirs::home_dir().unwrap();
        let mut breakpoints = with_lines("~/main.c", &[6]);
        breakpoints.on_lines_inserted(&home.join("main.c"), 1, 1);
        assert_eq!(lines(&breakpoints), vec![7]);
    }

    #[test]
    fn remove_for_file_keeps_others() {
        let mut breakpoints = with_lines("/src/main.c", &[1, 2]);
        breakpoints.add(Breakpoint::new("/src/other.c", 1)).unwrap();
        let removed = breakpoints.remove_for_file(Path::new("/src/main.c"));
        assert_eq!(removed.len(), 2);
        assert_eq!(breakpoints.len(), 1);
        assert_eq!(breakpoints.get(0).unwrap().path, Path::new("/src/other.c"));
    }

    #[test]
    fn numbers_are_assigned_by_location() {
        let mut breakpoints = with_lines("/src/main.c", &[1, 2]);
        breakpoints.assign_number(Path::new("/src/main.c"), 2, 4);
        assert_eq!(breakpoints.get(1).unwrap().number, Some(4));
        assert_eq!(breakpoints.take_number(Path::new("/src/main.c"), 2), Some(4));
        assert_eq!(breakpoints.take_number(Path::new("/src/main.c"), 2), None);

        breakpoints.assign_number(Path::new("/src/main.c"), 1, 2);
        breakpoints.clear_numbers();
        assert_eq!(breakpoints.get(0).unwrap().number, None);
        assert_eq!(breakpoints.get(1).unwrap().number, None);
    }
}
