//! In-memory pagination of a loaded tab, one cursor per status group.

use std::collections::BTreeMap;
use thiserror::Error;

use crate::approvals::types::{ApprovalItem, StatusGroup};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PageError {
  #[error("page numbers start at 1, got {0}")]
  InvalidPage(u32),
}

/// Derived pagination for one status group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaginationState {
  pub current_page: u32,
  pub total_pages: u32,
  pub total_items: usize,
  pub has_next_page: bool,
  pub has_prev_page: bool,
}

impl PaginationState {
  /// `total_pages` is never below 1, even with no items.
  pub fn compute(current_page: u32, total_items: usize, page_size: usize) -> Self {
    let page_size = page_size.max(1);
    let total_pages = total_items.div_ceil(page_size).max(1) as u32;
    Self {
      current_page,
      total_pages,
      total_items,
      has_next_page: current_page < total_pages,
      has_prev_page: current_page > 1,
    }
  }

  /// The selected page lies past the end of the group.
  pub fn is_out_of_range(&self) -> bool {
    self.current_page > self.total_pages
  }
}

/// What a status group shows for its current page.
#[derive(Debug, Clone, PartialEq)]
pub enum GroupPage {
  Items {
    items: Vec<ApprovalItem>,
    state: PaginationState,
  },
  /// The selected page no longer exists (the group shrank). Shown as an
  /// explicit empty page with a way back to page 1, never a silent jump.
  OutOfRange { requested: u32, total_pages: u32 },
}

#[derive(Debug, Clone, Copy)]
struct Cursor {
  current_page: u32,
  total_items: usize,
}

impl Default for Cursor {
  fn default() -> Self {
    Self {
      current_page: 1,
      total_items: 0,
    }
  }
}

/// Page cursors for every status group of one tab.
#[derive(Debug, Clone)]
pub struct StatusPager {
  page_size: usize,
  cursors: BTreeMap<StatusGroup, Cursor>,
}

impl StatusPager {
  pub fn new(page_size: usize) -> Self {
    Self {
      page_size: page_size.max(1),
      cursors: StatusGroup::ALL
        .into_iter()
        .map(|group| (group, Cursor::default()))
        .collect(),
    }
  }

  fn cursor(&self, group: StatusGroup) -> Cursor {
    self.cursors.get(&group).copied().unwrap_or_default()
  }

  /// Recount every group after the item list changed. Selected pages are kept
  /// as they are, even if they now lie past the end.
  pub fn recompute(&mut self, items: &[ApprovalItem]) {
    for cursor in self.cursors.values_mut() {
      cursor.total_items = 0;
    }
    for item in items {
      self.cursors.entry(item.status.group()).or_default().total_items += 1;
    }
  }

  pub fn state(&self, group: StatusGroup) -> PaginationState {
    let cursor = self.cursor(group);
    PaginationState::compute(cursor.current_page, cursor.total_items, self.page_size)
  }

  /// Select a page. Purely local: never triggers a fetch.
  pub fn set_page(&mut self, group: StatusGroup, page: u32) -> Result<PaginationState, PageError> {
    if page < 1 {
      return Err(PageError::InvalidPage(page));
    }
    self.cursors.entry(group).or_default().current_page = page;
    Ok(self.state(group))
  }

  pub fn return_to_first(&mut self, group: StatusGroup) -> PaginationState {
    self.cursors.entry(group).or_default().current_page = 1;
    self.state(group)
  }

  /// Back to page 1 everywhere with nothing counted.
  pub fn reset(&mut self) {
    *self = Self::new(self.page_size);
  }

  /// Slice out the current page of `group` from the tab's items.
  pub fn page_of(&self, group: StatusGroup, items: &[ApprovalItem]) -> GroupPage {
    let state = self.state(group);
    if state.is_out_of_range() {
      return GroupPage::OutOfRange {
        requested: state.current_page,
        total_pages: state.total_pages,
      };
    }

    let start = (state.current_page as usize - 1) * self.page_size;
    let items = items
      .iter()
      .filter(|item| item.status.group() == group)
      .skip(start)
      .take(self.page_size)
      .cloned()
      .collect();
    GroupPage::Items { items, state }
  }
}
